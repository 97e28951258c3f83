//! Startup configuration (§4.12): env vars (loaded via `dotenvy::dotenv()`
//! first, matching the corpus's "load .env then read env" idiom), with an
//! optional TOML overlay for per-dbname overrides, validated before
//! anything else runs.

use std::collections::HashMap;

#[derive(Debug, Clone, serde::Deserialize, Default)]
struct FileOverlay {
    #[serde(default)]
    toolsdb_host_overrides: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub port: u16,
    pub oauth_token: String,
    pub raw_log: bool,
    pub log_dir: std::path::PathBuf,
    pub toolsdb_host_overrides: HashMap<String, String>,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingOauthToken,
    MalformedPort(String),
}

/// Startup-fatal exit codes (§7): missing OAuth token exits 129, a
/// malformed port exits 128.
impl ConfigError {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::MissingOauthToken => 129,
            Self::MalformedPort(_) => 128,
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingOauthToken => write!(f, "DISPATCH_SELF_OAUTH_ACCESS_TOKEN is required"),
            Self::MalformedPort(raw) => write!(f, "`{raw}` is not a valid port in 1-65535"),
        }
    }
}

impl DispatchConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let oauth_token = std::env::var("DISPATCH_SELF_OAUTH_ACCESS_TOKEN")
            .map_err(|_| ConfigError::MissingOauthToken)?;
        if oauth_token.trim().is_empty() {
            return Err(ConfigError::MissingOauthToken);
        }

        let raw_port = std::env::var("DISPATCH_PORT")
            .or_else(|_| std::env::var("PORT"))
            .unwrap_or_else(|_| "8080".to_string());
        let port: u16 = raw_port
            .parse()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| ConfigError::MalformedPort(raw_port.clone()))?;

        let raw_log = std::env::var("DISPATCH_RAWLOG").is_ok();
        let log_dir = dispatch_env::dispatch_log_dir();

        let overlay = std::env::var("DISPATCH_CONFIG_FILE")
            .ok()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|contents| toml::from_str::<FileOverlay>(&contents).ok())
            .unwrap_or_default();

        Ok(Self {
            port,
            oauth_token,
            raw_log,
            log_dir,
            toolsdb_host_overrides: overlay.toolsdb_host_overrides,
        })
    }
}
