//! Site Registry (§4.1): `dbname → wiki`, `hostname → wiki`, `origin → wiki`
//! lookups over a catalogue fetched from a well-known endpoint.

use dispatch_core::wiki::{WikiDescriptor, WikiFlags};
use futures::future::{FutureExt, Shared};
use serde::Deserialize;
use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};

#[derive(Debug, Error, Clone)]
pub enum RegistryError {
    #[error("upstream catalogue endpoint unavailable: {0}")]
    UpstreamUnavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKind {
    DbName,
    Hostname,
    Origin,
}

#[derive(Debug, Deserialize)]
struct CatalogueEntry {
    dbname: String,
    url: String,
    lang: String,
    #[serde(default)]
    private: bool,
    #[serde(default)]
    closed: bool,
    #[serde(default)]
    fishbowl: bool,
    #[serde(default)]
    nonglobal: bool,
}

#[derive(Debug, Deserialize)]
struct CatalogueResponse {
    wikis: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, Default)]
struct Snapshot {
    by_dbname: HashMap<String, Arc<WikiDescriptor>>,
    by_hostname: HashMap<String, Arc<WikiDescriptor>>,
}

type RefreshFuture = Shared<Pin<Box<dyn Future<Output = Result<(), RegistryError>> + Send>>>;

/// Process-scoped registry state; construct one and share it via `Arc`
/// rather than reaching for a global (§9).
pub struct WikiRegistry {
    endpoint: String,
    http: reqwest::Client,
    snapshot: RwLock<Option<Snapshot>>,
    inflight: Mutex<Option<RefreshFuture>>,
}

impl WikiRegistry {
    pub fn new(endpoint: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.into(),
            http,
            snapshot: RwLock::new(None),
            inflight: Mutex::new(None),
        }
    }

    /// Fetch the full catalogue and atomically replace the snapshot. On
    /// failure the prior snapshot is left intact. Concurrent callers share
    /// a single in-flight network request.
    pub async fn refresh(&self) -> Result<(), RegistryError> {
        let shared = {
            let mut inflight = self.inflight.lock().await;
            if let Some(existing) = inflight.as_ref() {
                existing.clone()
            } else {
                let fut: Pin<Box<dyn Future<Output = Result<(), RegistryError>> + Send>> =
                    Box::pin(self.do_refresh());
                let shared = fut.shared();
                *inflight = Some(shared.clone());
                shared
            }
        };
        let result = shared.await;
        // Clear the in-flight slot once this refresh cycle is done so the
        // next call starts a fresh request rather than replaying the cache.
        let mut inflight = self.inflight.lock().await;
        *inflight = None;
        result
    }

    async fn do_refresh(&self) -> Result<(), RegistryError> {
        let resp = self
            .http
            .get(&self.endpoint)
            .send()
            .await
            .map_err(|e| RegistryError::UpstreamUnavailable(e.to_string()))?;
        let parsed: CatalogueResponse = resp
            .json()
            .await
            .map_err(|e| RegistryError::UpstreamUnavailable(e.to_string()))?;

        let mut by_dbname = HashMap::with_capacity(parsed.wikis.len());
        let mut by_hostname = HashMap::with_capacity(parsed.wikis.len());
        for entry in parsed.wikis {
            let descriptor = Arc::new(WikiDescriptor {
                dbname: entry.dbname.clone(),
                base_url: entry.url,
                language_code: entry.lang,
                flags: WikiFlags {
                    private: entry.private,
                    closed: entry.closed,
                    fishbowl: entry.fishbowl,
                    nonglobal: entry.nonglobal,
                },
            });
            if let Some(host) = descriptor.hostname() {
                by_hostname.insert(host.to_string(), descriptor.clone());
            }
            by_dbname.insert(entry.dbname, descriptor);
        }

        tracing::info!(count = by_dbname.len(), "site registry refreshed");
        *self.snapshot.write().await = Some(Snapshot {
            by_dbname,
            by_hostname,
        });
        Ok(())
    }

    /// Drop the snapshot; the next lookup re-fetches.
    pub async fn flush(&self) {
        *self.snapshot.write().await = None;
    }

    /// Look a wiki up by dbname, hostname, or request Origin header value
    /// (treated the same as hostname). Lazily refreshes if there is no
    /// snapshot yet.
    pub async fn get(&self, key: &str, kind: LookupKind) -> Option<Arc<WikiDescriptor>> {
        if self.snapshot.read().await.is_none() {
            if let Err(e) = self.refresh().await {
                tracing::warn!(error = %e, "site registry refresh failed");
                return None;
            }
        }
        let snapshot = self.snapshot.read().await;
        let snapshot = snapshot.as_ref()?;
        match kind {
            LookupKind::DbName => snapshot.by_dbname.get(key).cloned(),
            LookupKind::Hostname | LookupKind::Origin => snapshot.by_hostname.get(key).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn refresh_populates_both_indices() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "wikis": [
                    {"dbname": "enwiki", "url": "https://en.example.org/w", "lang": "en"},
                ]
            })))
            .mount(&server)
            .await;

        let registry = WikiRegistry::new(server.uri(), reqwest::Client::new());
        registry.refresh().await.unwrap();

        let by_db = registry.get("enwiki", LookupKind::DbName).await.unwrap();
        assert_eq!(by_db.dbname, "enwiki");
        let by_host = registry
            .get("en.example.org", LookupKind::Hostname)
            .await
            .unwrap();
        assert_eq!(by_host.dbname, "enwiki");
    }

    #[tokio::test]
    async fn failed_refresh_preserves_prior_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "wikis": [{"dbname": "enwiki", "url": "https://en.example.org/w", "lang": "en"}]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = WikiRegistry::new(server.uri(), reqwest::Client::new());
        registry.refresh().await.unwrap();
        assert!(registry.refresh().await.is_err());
        assert!(registry.get("enwiki", LookupKind::DbName).await.is_some());
    }

    #[tokio::test]
    async fn flush_forces_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "wikis": [{"dbname": "enwiki", "url": "https://en.example.org/w", "lang": "en"}]
            })))
            .mount(&server)
            .await;

        let registry = WikiRegistry::new(server.uri(), reqwest::Client::new());
        registry.get("enwiki", LookupKind::DbName).await;
        registry.flush().await;
        assert!(registry.get("enwiki", LookupKind::DbName).await.is_some());
    }
}
