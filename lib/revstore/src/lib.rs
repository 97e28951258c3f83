//! Revision Store (§4.7): a revid → revision map kept coherent by a live
//! Server-Sent-Events change stream. Membership is only meaningful while
//! the stream is Open; writes outside that window are dropped with a
//! warning, never silently queued.

use dashmap::DashMap;
use dispatch_core::revision::{HiddenFlags, Revision, VisibilitySnapshot};
use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum RevStoreError {
    #[error("change stream connection failed: {0}")]
    Connect(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Closed,
    Connecting,
    Open,
}

/// The two event topics a change stream can carry (§4.7).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ChangeEvent {
    VisibilityChange {
        revid: u64,
        old: RawFlags,
        new: RawFlags,
    },
    TagsChange {
        revid: u64,
        tags: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RawFlags {
    pub content: bool,
    pub comment: bool,
    pub user: bool,
    pub restricted: bool,
}

impl From<RawFlags> for HiddenFlags {
    fn from(f: RawFlags) -> Self {
        HiddenFlags {
            content: f.content,
            comment: f.comment,
            user: f.user,
            restricted: f.restricted,
        }
    }
}

/// Marker proving the caller has deliberately accepted the safety
/// implication of a privileged store: it subscribes only to tags-change,
/// on the assumption it is allowed to see suppressed data already (§4.7,
/// §9 Open Question — see DESIGN.md for why this is an explicit type
/// rather than a bare `bool`).
pub struct AcknowledgedSuppressionRisk(());

impl AcknowledgedSuppressionRisk {
    pub fn acknowledge() -> Self {
        Self(())
    }
}

enum Privilege {
    NonPrivileged,
    Privileged(#[allow(dead_code)] AcknowledgedSuppressionRisk),
}

pub struct RevisionStore {
    revisions: DashMap<u64, Arc<Revision>>,
    state_tx: watch::Sender<StreamState>,
    state_rx: watch::Receiver<StreamState>,
    stream_url: String,
    http: reqwest::Client,
    privilege: Privilege,
    handle: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl RevisionStore {
    pub fn new(stream_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new_inner(stream_url, http, Privilege::NonPrivileged)
    }

    /// A privileged store only subscribes to tags-change (§4.7).
    pub fn new_privileged(
        stream_url: impl Into<String>,
        http: reqwest::Client,
        ack: AcknowledgedSuppressionRisk,
    ) -> Self {
        Self::new_inner(stream_url, http, Privilege::Privileged(ack))
    }

    fn new_inner(stream_url: impl Into<String>, http: reqwest::Client, privilege: Privilege) -> Self {
        let (state_tx, state_rx) = watch::channel(StreamState::Closed);
        Self {
            revisions: DashMap::new(),
            state_tx,
            state_rx,
            stream_url: stream_url.into(),
            http,
            privilege,
            handle: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state_rx.borrow()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Revision>> {
        self.revisions.get(&id).map(|r| r.clone())
    }

    /// Only writes while the stream is Open (§4.7 contract); otherwise a
    /// no-op with a warning, the rest of the store untouched.
    pub fn set(&self, id: u64, rev: Revision) {
        if self.state() != StreamState::Open {
            tracing::warn!(revid = id, "dropped revision store write: stream not open");
            return;
        }
        self.revisions.insert(id, Arc::new(rev));
    }

    /// Idempotent: a second call while already Connecting/Open is a no-op.
    pub async fn start_stream(self: &Arc<Self>) {
        if self.state() != StreamState::Closed {
            return;
        }
        let _ = self.state_tx.send(StreamState::Connecting);
        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_stream().await });
        *self.handle.lock().await = Some(handle);
    }

    /// Closes the stream; subsequent `set` calls are no-ops until restart.
    pub async fn stop_stream(&self) {
        if let Some(handle) = self.handle.lock().await.take() {
            handle.abort();
        }
        let _ = self.state_tx.send(StreamState::Closed);
    }

    async fn run_stream(self: Arc<Self>) {
        let resp = match self.http.get(&self.stream_url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "change stream connect failed");
                let _ = self.state_tx.send(StreamState::Closed);
                return;
            }
        };
        let _ = self.state_tx.send(StreamState::Open);

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(error = %e, "change stream read failed");
                    break;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim_end_matches('\r').to_string();
                buf.drain(..=pos);
                if let Some(data) = line.strip_prefix("data:") {
                    self.handle_frame(data.trim());
                }
            }
        }
        let _ = self.state_tx.send(StreamState::Closed);
    }

    fn handle_frame(&self, data: &str) {
        let event: ChangeEvent = match serde_json::from_str(data) {
            Ok(e) => e,
            Err(e) => {
                tracing::warn!(error = %e, "malformed change stream frame");
                return;
            }
        };
        match (&self.privilege, event) {
            (Privilege::Privileged(_), ChangeEvent::VisibilityChange { .. }) => {
                // privileged stores don't track visibility-change at all
            }
            (_, ChangeEvent::VisibilityChange { revid, old, new }) => {
                self.apply_visibility_change(revid, old.into(), new.into());
            }
            (_, ChangeEvent::TagsChange { revid, tags }) => {
                self.apply_tags_change(revid, tags);
            }
        }
    }

    fn apply_visibility_change(&self, revid: u64, old: HiddenFlags, new: HiddenFlags) {
        let Some(entry) = self.revisions.get(&revid) else {
            return;
        };
        let Revision::Complete(data) = entry.as_ref() else {
            return;
        };
        let mut updated = data.clone();
        if new.user {
            updated.user = None;
        }
        if new.comment {
            updated.comment = None;
            updated.parsed_comment = None;
        }
        updated.hidden = new;
        updated.visibility = Some(VisibilitySnapshot {
            old,
            new,
            observed_at: chrono_now(),
        });
        self.revisions.insert(revid, Arc::new(Revision::Complete(updated)));
    }

    fn apply_tags_change(&self, revid: u64, tags: Vec<String>) {
        let Some(entry) = self.revisions.get(&revid) else {
            return;
        };
        let Revision::Complete(data) = entry.as_ref() else {
            return;
        };
        let mut updated = data.clone();
        updated.tags = tags.into_iter().collect();
        self.revisions.insert(revid, Arc::new(Revision::Complete(updated)));
    }
}

/// Isolated so the one call site that needs wall-clock time is easy to find
/// and substitute in tests.
fn chrono_now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_core::revision::{PageRef, RevisionData};
    use std::collections::BTreeSet;

    fn sample_revision(revid: u64) -> Revision {
        Revision::Complete(RevisionData {
            revid,
            parentid: None,
            minor: false,
            user: Some("Example".to_string()),
            timestamp: None,
            size: 100,
            comment: Some("hello".to_string()),
            parsed_comment: None,
            tags: BTreeSet::new(),
            page: PageRef {
                pageid: 1,
                namespace: 0,
                prefixed_title: "Example".to_string(),
            },
            diffsize: None,
            hidden: HiddenFlags::default(),
            visibility: None,
            deleted: None,
        })
    }

    #[tokio::test]
    async fn set_is_a_noop_while_stream_is_closed() {
        let store = RevisionStore::new("http://example.invalid/stream", reqwest::Client::new());
        store.set(1, sample_revision(1));
        assert!(store.get(1).is_none());
    }

    #[tokio::test]
    async fn visibility_change_blanks_user_and_comment_when_flagged() {
        let store = RevisionStore::new("http://example.invalid/stream", reqwest::Client::new());
        let _ = store.state_tx.send(StreamState::Open);
        store.set(1, sample_revision(1));

        store.apply_visibility_change(
            1,
            HiddenFlags::default(),
            HiddenFlags {
                user: true,
                comment: true,
                content: false,
                restricted: false,
            },
        );

        let updated = store.get(1).unwrap();
        match updated.as_ref() {
            Revision::Complete(d) => {
                assert!(d.user.is_none());
                assert!(d.comment.is_none());
                assert!(d.visibility.is_some());
            }
            Revision::Missing { .. } => panic!("expected complete revision"),
        }
    }

    #[tokio::test]
    async fn unknown_revid_events_are_ignored() {
        let store = RevisionStore::new("http://example.invalid/stream", reqwest::Client::new());
        let _ = store.state_tx.send(StreamState::Open);
        store.apply_tags_change(999, vec!["bot".to_string()]);
        assert!(store.get(999).is_none());
    }
}
