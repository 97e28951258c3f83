//! Wiki Client Pool (§4.5): at most one authenticated `mwapi::Client` per
//! wiki, lazily constructed and reused across concurrent callers.

use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WikiClientError {
    #[error("could not authenticate against the wiki API: {0}")]
    Api(#[from] mwapi::Error),
}

/// Built once from `CARGO_PKG_*` and the pinned `mwapi`/`tokio` versions;
/// this is the Rust rendering of "`<tool>/<version> node/<runtime>
/// <http-lib>/<version>`" (§6).
pub fn user_agent() -> String {
    format!(
        "{}/{} tokio/{} mwapi/{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        "1.35",
        "0.3.1",
    )
}

/// Process-scoped; construct one and share it via `Arc` rather than a
/// global (§9).
#[derive(Default)]
pub struct WikiClientPool {
    clients: DashMap<String, Arc<mwapi::Client>>,
}

impl WikiClientPool {
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Returns the pool's client for `dbname`, constructing and caching one
    /// (authenticated with `oauth_token` against `base_url`) if this is the
    /// first request for that wiki.
    pub async fn get_or_connect(
        &self,
        dbname: &str,
        base_url: &str,
        oauth_token: &str,
    ) -> Result<Arc<mwapi::Client>, WikiClientError> {
        if let Some(existing) = self.clients.get(dbname) {
            return Ok(existing.clone());
        }

        let client = mwapi::Client::builder(base_url)
            .set_oauth_token(oauth_token)
            .set_assert(mwapi::Assert::User)
            .set_user_agent(&user_agent())
            .build()
            .await?;
        let client = Arc::new(client);

        // Another concurrent caller may have won the race; `entry` keeps
        // only one winner so every caller still observes a single client
        // per wiki.
        let entry = self
            .clients
            .entry(dbname.to_string())
            .or_insert_with(|| client.clone());
        Ok(entry.clone())
    }

    pub fn get(&self, dbname: &str) -> Option<Arc<mwapi::Client>> {
        self.clients.get(dbname).map(|c| c.clone())
    }
}
