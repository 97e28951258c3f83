//! The `Task` record shared by the async task engine and the HTTP surface
//! (§3, §4.8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A task's terminal state. `finished` implies `result` is either the final
/// value or a captured error — never both absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskOutcome {
    Pending,
    Success(serde_json::Value),
    Error(String),
}

impl TaskOutcome {
    pub fn is_finished(&self) -> bool {
        !matches!(self, TaskOutcome::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// Monotonic non-decreasing within a worker; the engine never decreases
    /// it.
    pub progress: f64,
    pub finished: bool,
    pub outcome: TaskOutcome,
    pub expire_time: DateTime<Utc>,
}

impl Task {
    pub fn new(expire_time: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            progress: 0.0,
            finished: false,
            outcome: TaskOutcome::Pending,
            expire_time,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expire_time < now
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Error(_))
    }
}
