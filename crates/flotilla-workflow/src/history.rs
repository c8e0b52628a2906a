//! Execution history and status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Something that happened during a workflow execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HistoryEventKind {
    /// A run of the workflow started
    WorkflowStarted {
        /// Workflow name
        workflow: String,
        /// Run ID
        run_id: String,
    },
    /// An activity attempt started
    ActivityScheduled {
        /// Activity name
        activity: String,
        /// 1-based attempt number
        attempt: u32,
    },
    /// An activity attempt succeeded
    ActivityCompleted {
        /// Activity name
        activity: String,
        /// 1-based attempt number
        attempt: u32,
    },
    /// An activity attempt failed
    ActivityFailed {
        /// Activity name
        activity: String,
        /// 1-based attempt number
        attempt: u32,
        /// Failure description
        message: String,
    },
    /// The run finished and a new run was started with fresh history
    WorkflowContinuedAsNew {
        /// ID of the next run
        next_run_id: String,
    },
    /// The workflow finished successfully
    WorkflowCompleted,
    /// The workflow failed
    WorkflowFailed {
        /// Failure description
        message: String,
    },
    /// The workflow honored a cancellation request
    WorkflowCanceled,
}

/// A timestamped history entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub kind: HistoryEventKind,
}

impl HistoryEvent {
    /// Record an event now
    pub fn now(kind: HistoryEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}

/// Status of a workflow execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionStatus {
    /// Still running (possibly in a continued run)
    Running,
    /// Finished successfully
    Completed,
    /// Failed with the given message
    Failed(String),
    /// Canceled on request
    Canceled,
    /// Exceeded the execution timeout
    TimedOut,
}

impl ExecutionStatus {
    /// True once the execution can make no further progress
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}
