//! Revision Expander (§4.6): a staggered coalescer. Callers `queue` revision
//! ids and get back a receiver each; behind the scenes a single-flight,
//! re-entrant runner drains the pending set in batches of `PER_BATCH`.

use dispatch_core::revision::{HiddenFlags, PageRef, Revision, RevisionData};
use mwapi_responses::prelude::*;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

const PER_BATCH: usize = 50;

#[derive(Debug, Error, Clone)]
pub enum ExpanderError {
    #[error("upstream API error: {0}")]
    Upstream(String),
    #[error("batch did not resolve within the expander timeout")]
    Timeout,
}

#[query(
    prop = "revisions",
    rvprop = "ids|timestamp|flags|comment|parsedcomment|user|size|tags",
    rvslots = "main",
)]
struct RevisionQuery;

#[query(prop = "revisions", rvprop = "ids|size")]
struct ParentSizeQuery;

type Resolver = oneshot::Sender<Result<Revision, ExpanderError>>;

#[derive(Default)]
struct Inner {
    pending: VecDeque<u64>,
    pending_set: HashSet<u64>,
    waiters: HashMap<u64, Vec<Resolver>>,
}

/// One per (wiki, purpose) the caller cares to keep separate; cheap to
/// clone, wraps `Arc`s throughout.
#[derive(Clone)]
pub struct RevisionExpander {
    client: Arc<mwapi::Client>,
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    rerun: Arc<AtomicBool>,
}

impl RevisionExpander {
    pub fn new(client: Arc<mwapi::Client>) -> Self {
        Self {
            client,
            inner: Arc::new(Mutex::new(Inner::default())),
            running: Arc::new(AtomicBool::new(false)),
            rerun: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Enqueues `ids` for expansion and returns one receiver per id, in the
    /// same order. Concurrent `queue` calls for the same id share a single
    /// pending slot but each still gets its own receiver (§4.6: "duplicates
    /// for the same id must share a single resolver").
    pub async fn queue(&self, ids: &[u64]) -> Vec<oneshot::Receiver<Result<Revision, ExpanderError>>> {
        let mut receivers = Vec::with_capacity(ids.len());
        {
            let mut inner = self.inner.lock().await;
            for &id in ids {
                let (tx, rx) = oneshot::channel();
                inner.waiters.entry(id).or_default().push(tx);
                if inner.pending_set.insert(id) {
                    inner.pending.push_back(id);
                }
                receivers.push(rx);
            }
        }
        self.kick_runner();
        receivers
    }

    /// Synchronous batch path: chunks `ids` into groups of `PER_BATCH` and
    /// resolves them directly, bypassing the coalescer. Used by callers that
    /// already hold a bounded, known-small id set (§6: the `GET` revisions
    /// endpoint caps at 50).
    pub async fn request(&self, ids: &[u64]) -> Result<HashMap<u64, Revision>, ExpanderError> {
        let mut out = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(PER_BATCH) {
            let resolved = self.fetch_batch(chunk).await?;
            out.extend(resolved);
        }
        Ok(out)
    }

    fn kick_runner(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let this = self.clone();
            tokio::spawn(async move { this.run_loop().await });
        } else {
            self.rerun.store(true, Ordering::Release);
        }
    }

    /// Single-flight re-entrant runner (§4.6 step 2): drains up to
    /// `PER_BATCH` ids per pass; if another `queue` arrived while a pass was
    /// in flight, the "please re-run" flag schedules one more pass before
    /// the runner gives up the running slot.
    async fn run_loop(&self) {
        loop {
            let batch: Vec<u64> = {
                let mut inner = self.inner.lock().await;
                let mut batch = Vec::with_capacity(PER_BATCH.min(inner.pending.len()));
                while batch.len() < PER_BATCH {
                    match inner.pending.pop_front() {
                        Some(id) => {
                            inner.pending_set.remove(&id);
                            batch.push(id);
                        }
                        None => break,
                    }
                }
                batch
            };

            if !batch.is_empty() {
                let result = self.fetch_batch(&batch).await;
                let mut inner = self.inner.lock().await;
                match result {
                    Ok(resolved) => {
                        for id in &batch {
                            if let Some(senders) = inner.waiters.remove(id) {
                                let value = resolved
                                    .get(id)
                                    .cloned()
                                    .unwrap_or(Revision::Missing {
                                        revid: *id,
                                        missing: true,
                                    });
                                for tx in senders {
                                    let _ = tx.send(Ok(value.clone()));
                                }
                            }
                        }
                    }
                    Err(e) => {
                        for id in &batch {
                            if let Some(senders) = inner.waiters.remove(id) {
                                for tx in senders {
                                    let _ = tx.send(Err(e.clone()));
                                }
                            }
                        }
                    }
                }
            }

            let mut inner = self.inner.lock().await;
            let should_continue = self.rerun.swap(false, Ordering::AcqRel) || !inner.pending.is_empty();
            if !should_continue {
                self.running.store(false, Ordering::Release);
                // Re-check after releasing: a `queue` call racing the store
                // above would have seen `running == true` and only set
                // `rerun`, so pick that back up here.
                if self.rerun.swap(false, Ordering::AcqRel) || !inner.pending.is_empty() {
                    if self
                        .running
                        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                        .is_err()
                    {
                        return;
                    }
                } else {
                    return;
                }
            }
            drop(inner);
        }
    }

    /// Two upstream passes per §4.6: revision properties, then parent sizes
    /// for diffsize computation.
    async fn fetch_batch(&self, ids: &[u64]) -> Result<HashMap<u64, Revision>, ExpanderError> {
        let revids = ids.iter().map(u64::to_string).collect::<Vec<_>>().join("|");
        let resp: RevisionQuery = self
            .client
            .post([
                ("action".to_string(), "query".to_string()),
                ("revids".to_string(), revids),
            ])
            .await
            .map_err(|e| ExpanderError::Upstream(e.to_string()))?;

        let mut data = HashMap::new();
        let mut parent_ids = HashSet::new();
        for page in &resp.query.pages {
            for rev in &page.revisions {
                if let Some(parentid) = rev.parentid.filter(|p| *p != 0) {
                    parent_ids.insert(parentid);
                }
                let hidden = HiddenFlags {
                    user: rev.userhidden,
                    comment: rev.commenthidden,
                    content: rev.sha1hidden,
                    restricted: false,
                };
                data.insert(
                    rev.revid,
                    RevisionData {
                        revid: rev.revid,
                        parentid: rev.parentid.filter(|p| *p != 0),
                        minor: rev.minor,
                        user: rev.user.clone(),
                        timestamp: rev.timestamp,
                        size: rev.size,
                        comment: rev.comment.clone(),
                        parsed_comment: rev.parsedcomment.clone(),
                        tags: rev.tags.iter().cloned().collect(),
                        page: PageRef {
                            pageid: page.pageid,
                            namespace: page.ns,
                            prefixed_title: page.title.clone(),
                        },
                        diffsize: None,
                        hidden,
                        visibility: None,
                        deleted: None,
                    },
                );
            }
        }

        let parent_sizes = if parent_ids.is_empty() {
            HashMap::new()
        } else {
            self.fetch_parent_sizes(&parent_ids).await?
        };

        let mut out = HashMap::with_capacity(ids.len());
        for &id in ids {
            match data.remove(&id) {
                Some(mut rev) => {
                    let parent_size = rev.parentid.and_then(|p| parent_sizes.get(&p).copied());
                    rev.compute_diffsize(parent_size);
                    out.insert(id, Revision::Complete(rev));
                }
                None => {
                    out.insert(
                        id,
                        Revision::Missing {
                            revid: id,
                            missing: true,
                        },
                    );
                }
            }
        }
        Ok(out)
    }

    async fn fetch_parent_sizes(&self, parent_ids: &HashSet<u64>) -> Result<HashMap<u64, u64>, ExpanderError> {
        let mut sizes = HashMap::with_capacity(parent_ids.len());
        let ids: Vec<u64> = parent_ids.iter().copied().collect();
        for chunk in ids.chunks(PER_BATCH) {
            let revids = chunk.iter().map(u64::to_string).collect::<Vec<_>>().join("|");
            let resp: ParentSizeQuery = self
                .client
                .post([
                    ("action".to_string(), "query".to_string()),
                    ("revids".to_string(), revids),
                ])
                .await
                .map_err(|e| ExpanderError::Upstream(e.to_string()))?;
            for page in &resp.query.pages {
                for rev in &page.revisions {
                    sizes.insert(rev.revid, rev.size);
                }
            }
        }
        Ok(sizes)
    }
}

/// Races a batch resolution against the ~10s wall-clock expander timeout
/// (§5). Leaves the expander itself running for subsequent callers.
pub async fn with_timeout<F, T>(fut: F) -> Result<T, ExpanderError>
where
    F: std::future::Future<Output = Result<T, ExpanderError>>,
{
    tokio::time::timeout(std::time::Duration::from_secs(10), fut)
        .await
        .unwrap_or(Err(ExpanderError::Timeout))
}
