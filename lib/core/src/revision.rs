//! The revision sum type and the types that ride along with deleted
//! revisions/pages (§3, §4.9).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRef {
    pub pageid: u64,
    pub namespace: i32,
    pub prefixed_title: String,
}

/// Which fields of a revision are hidden by revision-deletion/suppression.
/// Decoded from the `rev_deleted` bitmask: bit0=content, bit1=comment,
/// bit2=user, bit3=restricted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HiddenFlags {
    pub content: bool,
    pub comment: bool,
    pub user: bool,
    pub restricted: bool,
}

impl HiddenFlags {
    pub const CONTENT_BIT: u8 = 0b0001;
    pub const COMMENT_BIT: u8 = 0b0010;
    pub const USER_BIT: u8 = 0b0100;
    pub const RESTRICTED_BIT: u8 = 0b1000;

    pub fn from_bitmask(mask: u8) -> Self {
        Self {
            content: mask & Self::CONTENT_BIT != 0,
            comment: mask & Self::COMMENT_BIT != 0,
            user: mask & Self::USER_BIT != 0,
            restricted: mask & Self::RESTRICTED_BIT != 0,
        }
    }

    pub fn to_bitmask(self) -> u8 {
        let mut mask = 0u8;
        if self.content {
            mask |= Self::CONTENT_BIT;
        }
        if self.comment {
            mask |= Self::COMMENT_BIT;
        }
        if self.user {
            mask |= Self::USER_BIT;
        }
        if self.restricted {
            mask |= Self::RESTRICTED_BIT;
        }
        mask
    }
}

/// Attached to a stored revision once a `visibility-change` event has been
/// observed for it (§4.7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibilitySnapshot {
    pub old: HiddenFlags,
    pub new: HiddenFlags,
    pub observed_at: DateTime<Utc>,
}

/// One PHP-serialized `logging.log_params` deletion payload, decoded (§4.9,
/// `dispatch-php-params`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionParams {
    pub kind: String,
    pub ids: Vec<u64>,
    pub old_flags: HiddenFlags,
    pub new_flags: HiddenFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletionLogEntry {
    pub logid: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Option<String>,
    pub comment: Option<String>,
    pub tags: BTreeSet<String>,
    pub params: DeletionParams,
}

/// Why a revision is hidden: either we know which log entry did it
/// (with a `likely cause` heuristic bit, §4.9) or deletion was suppressed
/// and the replica scrubbed the causal row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionCause {
    Unknown,
    LogEntry {
        entry: DeletionLogEntry,
        is_likely_cause: bool,
    },
}

/// The fields common to every non-missing revision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionData {
    pub revid: u64,
    pub parentid: Option<u64>,
    pub minor: bool,
    pub user: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub size: u64,
    pub comment: Option<String>,
    pub parsed_comment: Option<String>,
    pub tags: BTreeSet<String>,
    pub page: PageRef,
    /// `size - parent.size`; `None` when the parent's size is unknown.
    pub diffsize: Option<i64>,
    pub hidden: HiddenFlags,
    pub visibility: Option<VisibilitySnapshot>,
    /// Present only for revisions surfaced through the deleted-revision
    /// reconstructor.
    pub deleted: Option<DeletionCause>,
}

impl RevisionData {
    pub fn compute_diffsize(&mut self, parent_size: Option<u64>) {
        self.diffsize = parent_size.map(|p| self.size as i64 - p as i64);
    }
}

/// A revision either fully resolved, or known-missing upstream (§3: "Revision
/// (missing)"). Never partially populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Revision {
    Complete(RevisionData),
    Missing { revid: u64, missing: bool },
}

impl Revision {
    pub fn missing(revid: u64) -> Self {
        Self::Missing {
            revid,
            missing: true,
        }
    }

    pub fn revid(&self) -> u64 {
        match self {
            Self::Complete(d) => d.revid,
            Self::Missing { revid, .. } => *revid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageDeletionCause {
    Unknown,
    LogEntry { entry: DeletionLogEntry, guessed: bool },
}

/// A page deleted outright (as opposed to a single revision within it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedPage {
    pub pageid: Option<u64>,
    pub namespace: i32,
    pub title: String,
    pub created: DateTime<Utc>,
    pub length: u64,
    pub cause: PageDeletionCause,
}
