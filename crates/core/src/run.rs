//! The minimal view of a run the dispatcher needs: enough to admit it,
//! bind it to a runtime, and track it through to a terminal state (§3).

use crate::envelope::HarnessResultEnvelope;
use crate::ids::{ImageRef, ProjectId, RepositoryId, RunId, TaskId};
use crate::runtime_entry::ImageSource;
use serde::{Deserialize, Serialize};

/// Lifecycle of a single dispatched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Queued,
    Dispatching,
    PendingApproval,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl RunState {
    /// Whether this state admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Succeeded | RunState::Failed | RunState::Cancelled | RunState::TimedOut
        )
    }
}

/// A unit of work the dispatcher admits onto a task runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub project_id: ProjectId,
    pub repository_id: RepositoryId,
    pub state: RunState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub bound_runtime_container_id: Option<String>,
    pub result: Option<HarnessResultEnvelope>,
    pub failure_class: Option<String>,
    pub output_json: Option<String>,
    pub pr_url: Option<String>,
    pub image_ref: Option<ImageRef>,
    pub image_digest: Option<String>,
    pub image_source: Option<ImageSource>,
}

impl Run {
    /// Whether another dispatch attempt is still allowed after a failure.
    pub fn has_retries_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
