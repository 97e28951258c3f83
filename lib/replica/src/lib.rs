//! Replica Pool (§4.3): short-lived connections to the replica SQL cluster,
//! under a strict no-idle-persistent-connections policy.

use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use std::time::Duration;
use thiserror::Error;

const HOSTED_SUFFIX: &str = ".db.svc.wikimedia.cloud";
/// Port used by the hosted environment's per-dbname replica services.
const HOSTED_PORT: u16 = 3306;
/// Default port assumed reachable via the developer's SSH tunnel when not
/// running in the hosted environment.
const DEV_DEFAULT_PORT: u16 = 4711;
const IDLE_TIMEOUT: Duration = Duration::from_secs(5);
const MIN_CONNECTIONS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplicaKind {
    Analytics,
    Web,
}

impl ReplicaKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Analytics => "analytics",
            Self::Web => "web",
        }
    }
}

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("resolved host `{0}` is outside the hosted environment's trust boundary")]
    ConnectionRefused(String),
    #[error("no replica credentials could be discovered")]
    NoCredentials,
    #[error("failed to read credentials file {0}: {1}")]
    CredentialFile(std::path::PathBuf, String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

/// True when this process is running inside the hosted build-service
/// environment (Toolforge-style), detected the same way the hosted build
/// service itself injects its marker env var.
pub fn is_hosted_environment() -> bool {
    std::env::var_os("TOOL_TOOLFORGE").is_some() || std::env::var_os("DISPATCH_FORCE_HOSTED").is_some()
}

fn env_dbname_suffix(dbname: &str) -> String {
    dbname.to_uppercase().replace(['-', '.'], "_")
}

fn resolve_host_port(dbname: &str, kind: ReplicaKind) -> (String, u16) {
    if is_hosted_environment() {
        return (format!("{dbname}.{}.db.svc.wikimedia.cloud", kind.as_str()), HOSTED_PORT);
    }
    let suffix = env_dbname_suffix(dbname);
    let host = std::env::var(format!("DISPATCH_TOOLSDB_HOST_{suffix}"))
        .unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var(format!("DISPATCH_TOOLSDB_PORT_{suffix}"))
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEV_DEFAULT_PORT);
    (host, port)
}

/// Credential discovery, in the order the distilled contract mandates:
/// explicit env, hosted build-service env, then an INI file searched in
/// the tool data dir, `$HOME`, and the project root, in that order. INI
/// parsing itself is an external collaborator (`ini` crate), not
/// hand-rolled.
async fn resolve_credentials() -> Result<(String, String), ReplicaError> {
    if let (Ok(user), Ok(pass)) = (
        std::env::var("DISPATCH_TOOLSDB_USER"),
        std::env::var("DISPATCH_TOOLSDB_PASS"),
    ) {
        return Ok((user, pass));
    }
    if let (Ok(user), Ok(pass)) = (
        std::env::var("TOOL_TOOLSDB_USER"),
        std::env::var("TOOL_TOOLSDB_PASSWORD"),
    ) {
        return Ok((user, pass));
    }

    for path in dispatch_env::replica_ini_candidates("replica.my.cnf") {
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let ini = ini::Ini::load_from_str(&contents)
                    .map_err(|e| ReplicaError::CredentialFile(path.clone(), e.to_string()))?;
                let section = ini.section(Some("client"));
                if let Some(section) = section {
                    if let (Some(user), Some(pass)) = (section.get("user"), section.get("password"))
                    {
                        return Ok((user.to_string(), pass.to_string()));
                    }
                }
            }
            Err(_) => continue,
        }
    }

    Err(ReplicaError::NoCredentials)
}

/// Opens a fresh pool for `dbname`/`kind`. Callers open, query, and drop the
/// pool themselves — no pool is cached across jobs (§5: "Replica
/// connections are short-lived and not shared between jobs").
pub async fn connect(dbname: &str, kind: ReplicaKind) -> Result<MySqlPool, ReplicaError> {
    let (host, port) = resolve_host_port(dbname, kind);
    if is_hosted_environment() && !host.ends_with(HOSTED_SUFFIX) {
        return Err(ReplicaError::ConnectionRefused(host));
    }

    let (user, password) = resolve_credentials().await?;
    let options = MySqlConnectOptions::new()
        .host(&host)
        .port(port)
        .username(&user)
        .password(&password)
        .database(dbname);

    let pool = MySqlPoolOptions::new()
        .min_connections(MIN_CONNECTIONS)
        .idle_timeout(IDLE_TIMEOUT)
        .connect_with(options)
        .await?;
    tracing::debug!(dbname, host, port, "opened replica connection");
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hosted_host_carries_the_trust_suffix() {
        std::env::set_var("DISPATCH_FORCE_HOSTED", "1");
        let (host, port) = resolve_host_port("enwiki", ReplicaKind::Analytics);
        assert_eq!(host, "enwiki.analytics.db.svc.wikimedia.cloud");
        assert_eq!(port, HOSTED_PORT);
        std::env::remove_var("DISPATCH_FORCE_HOSTED");
    }

    #[test]
    fn dev_host_defaults_to_localhost() {
        std::env::remove_var("DISPATCH_FORCE_HOSTED");
        std::env::remove_var("TOOL_TOOLFORGE");
        let (host, port) = resolve_host_port("testwiki", ReplicaKind::Web);
        assert_eq!(host, "localhost");
        assert_eq!(port, DEV_DEFAULT_PORT);
    }
}
