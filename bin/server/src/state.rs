//! Process-scoped, explicitly constructed state (§9: no implicit global).
//! Handed to handlers via axum's `State` extractor.

use dispatch_registry::WikiRegistry;
use dispatch_revstore::RevisionStore;
use dispatch_tasks::TaskEngine;
use dispatch_titler::TitlerRegistry;
use dispatch_wikiclient::WikiClientPool;
use std::sync::Arc;

pub struct DispatchState {
    pub http: reqwest::Client,
    pub registry: Arc<WikiRegistry>,
    pub titler: Arc<TitlerRegistry>,
    pub wiki_clients: Arc<WikiClientPool>,
    pub revstore: Arc<RevisionStore>,
    pub oauth_token: String,
    pub deleted_revisions_tasks: TaskEngine,
    pub largest_edits_tasks: TaskEngine,
    pub search_talk_tasks: TaskEngine,
}

pub type AppState = Arc<DispatchState>;
