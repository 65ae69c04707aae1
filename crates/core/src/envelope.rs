//! The result envelope a task runtime reports back through the dispatcher
//! once a run finishes, errors, or is cancelled (§3).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a run as reported by the task runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HarnessStatus {
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

/// A single emitted artifact reference (log file, diff, report, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub path: String,
    pub media_type: Option<String>,
    pub size_bytes: Option<u64>,
}

/// A follow-up action the runtime suggests the orchestrator take.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    pub kind: String,
    pub detail: Option<String>,
}

/// The full result payload returned by a task runtime for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessResultEnvelope {
    pub status: HarnessStatus,
    pub summary: Option<String>,
    pub error: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub actions: Vec<SuggestedAction>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default)]
    pub metrics: HashMap<String, f64>,
}

impl HarnessResultEnvelope {
    /// True for any terminal, non-success outcome.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, HarnessStatus::Failed | HarnessStatus::TimedOut)
    }

    /// Build a minimal envelope for a run that never reported back, e.g.
    /// because the runtime disappeared mid-run.
    pub fn missing(reason: impl Into<String>) -> Self {
        Self {
            status: HarnessStatus::Failed,
            summary: None,
            error: Some(reason.into()),
            metadata: HashMap::new(),
            actions: Vec::new(),
            artifacts: Vec::new(),
            metrics: HashMap::new(),
        }
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
