//! Task lifecycle types
//!
//! A `Task` is one generation or update attempt. Its status moves forward
//! along PENDING → GENERATING → {COMPLETED, FAILED, CANCELLED} and never
//! leaves a terminal state; `ended_at` is stamped exactly once, at the
//! terminal transition.

use chrono::{DateTime, Utc};
use musicflow_common::Track;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter disambiguating tasks created in the same millisecond
static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique task identifier, derived from creation time and track name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Allocate a fresh id: `task_{unix_millis}_{seq}_{track_name}`
    ///
    /// The monotonic sequence component keeps ids unique even when many
    /// submissions land within one clock tick.
    pub fn new(track_name: &str) -> Self {
        let millis = Utc::now().timestamp_millis();
        let seq = TASK_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("task_{}_{}_{}", millis, seq, track_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Accepted, waiting for a worker
    Pending,
    /// A worker is executing the collaborator call
    Generating,
    /// Finished successfully; the track store was updated
    Completed,
    /// The collaborator call failed
    Failed,
    /// Cancelled before completing on its own
    Cancelled,
}

impl TaskStatus {
    /// True for COMPLETED, FAILED and CANCELLED
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// True for PENDING and GENERATING (the "active" states)
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// One generation or update attempt and its lifecycle state
///
/// Snapshots handed out by the registry are plain clones; the callback and
/// cancellation token live in registry side-tables and are never part of a
/// snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub track_name: String,
    pub prompt: String,
    pub is_update: bool,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    /// Stamped exactly once, at the transition into a terminal state
    pub ended_at: Option<DateTime<Utc>>,
    /// Present iff status is COMPLETED
    pub result: Option<Track>,
    /// Present iff status is FAILED
    pub error: Option<String>,
    /// Clip-length conformance verdict, present iff status is COMPLETED
    pub conformance: Option<crate::normalize::ClipConformance>,
}

impl Task {
    pub fn new(track_name: String, prompt: String, is_update: bool) -> Self {
        let task_id = TaskId::new(&track_name);
        Self {
            task_id,
            track_name,
            prompt,
            is_update,
            status: TaskStatus::Pending,
            started_at: Utc::now(),
            ended_at: None,
            result: None,
            error: None,
            conformance: None,
        }
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.task_id.clone(),
            track_name: self.track_name.clone(),
            is_update: self.is_update,
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            error: self.error.clone(),
        }
    }
}

/// Compact task view for list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub track_name: String,
    pub is_update: bool,
    pub status: TaskStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// Final outcome delivered to a submission callback
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// The stored track, post-normalization
    Completed(Track),
    /// Collaborator or precondition failure message
    Failed(String),
}

/// Callback registered at submission time, invoked at most once, outside the
/// registry lock
pub type TaskCallback = Box<dyn FnOnce(TaskOutcome) + Send + 'static>;
