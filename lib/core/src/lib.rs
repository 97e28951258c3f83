//! Shared data model for Dispatch: wiki/namespace descriptors, the revision
//! sum type, task records and the error taxonomy used at the HTTP boundary.

pub mod error;
pub mod revision;
pub mod task;
pub mod wiki;

pub use error::{DispatchError, ErrorFormat};
pub use revision::{
    DeletedPage, DeletionLogEntry, DeletionParams, HiddenFlags, PageRef, Revision,
    VisibilitySnapshot,
};
pub use task::{Task, TaskId};
pub use wiki::{NamespaceDescriptor, WikiDescriptor, WikiFlags, WikiKey};
