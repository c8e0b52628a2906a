//! Workflow errors

use std::fmt;
use std::time::Duration;

use flotilla_common::Error;
use thiserror::Error;

/// Which activity timeout expired
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeoutKind {
    /// The activity waited too long for a free worker slot
    ScheduleToStart,
    /// A single attempt ran too long
    StartToClose,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScheduleToStart => write!(f, "schedule-to-start"),
            Self::StartToClose => write!(f, "start-to-close"),
        }
    }
}

/// Errors raised while running workflows and activities
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An activity failed and will not be retried any more
    #[error("activity {activity} failed after {attempts} attempt(s): {source}")]
    Activity {
        /// Activity name
        activity: String,
        /// Attempts made, including the failing one
        attempts: u32,
        /// Error returned by the last attempt
        #[source]
        source: Error,
    },

    /// An activity timed out and will not be retried any more
    #[error("activity {activity} exceeded its {kind} timeout of {timeout:?} after {attempts} attempt(s)")]
    Timeout {
        /// Activity name
        activity: String,
        /// Which timeout expired
        kind: TimeoutKind,
        /// The configured timeout
        timeout: Duration,
        /// Attempts made
        attempts: u32,
    },

    /// The workflow was canceled
    #[error("workflow canceled")]
    Canceled,

    /// No workflow or activity is registered under the name
    #[error("{kind} {name} is not registered")]
    NotRegistered {
        /// "workflow" or "activity"
        kind: &'static str,
        /// Name that was looked up
        name: String,
    },

    /// A workflow or activity is already registered under the name
    #[error("{kind} {name} is already registered")]
    AlreadyRegistered {
        /// "workflow" or "activity"
        kind: &'static str,
        /// Duplicate name
        name: String,
    },

    /// A workflow execution with the same ID is still running
    #[error("workflow {workflow_id} is already running")]
    AlreadyStarted {
        /// Workflow ID
        workflow_id: String,
    },

    /// A workflow execution could not be found
    #[error("workflow execution {workflow_id} not found")]
    ExecutionNotFound {
        /// Workflow ID
        workflow_id: String,
    },

    /// A workflow or activity payload could not be (de)serialized
    #[error("invalid payload for {name}: {message}")]
    Payload {
        /// Workflow or activity name
        name: String,
        /// Description of what failed
        message: String,
    },

    /// The workflow exceeded its execution timeout
    #[error("workflow {workflow} exceeded its execution timeout of {timeout:?}")]
    ExecutionTimeout {
        /// Workflow name
        workflow: String,
        /// Configured timeout
        timeout: Duration,
    },

    /// The workflow failed for an application reason
    #[error("workflow failed: {message}")]
    Failed {
        /// Description of the failure
        message: String,
    },

    /// The engine could not accept or track the request
    #[error("workflow engine error: {message}")]
    Engine {
        /// Description of what failed
        message: String,
    },
}

impl WorkflowError {
    /// Create a payload error
    pub fn payload(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Payload {
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create an engine error
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    /// The activity error this failure wraps, if any
    pub fn cause(&self) -> Option<&Error> {
        match self {
            WorkflowError::Activity { source, .. } => Some(source),
            _ => None,
        }
    }

    /// True if the failure was caused by invalid input and was never retried
    pub fn is_client_error(&self) -> bool {
        self.cause().map(Error::is_service_error).unwrap_or(false)
    }

    /// True if the workflow was canceled
    pub fn is_canceled(&self) -> bool {
        matches!(self, WorkflowError::Canceled)
    }

    /// True if the workflow was canceled or ran out of time and must stop
    pub fn is_interrupted(&self) -> bool {
        matches!(
            self,
            WorkflowError::Canceled | WorkflowError::ExecutionTimeout { .. }
        )
    }

    /// The unwrapped underlying message, suitable as a cluster status message
    pub fn root_message(&self) -> String {
        match self {
            WorkflowError::Activity { source, .. } => source.root_message(),
            WorkflowError::Failed { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<WorkflowError> for Error {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::Activity { source, .. } => source,
            other => Error::internal_with_context("workflow", other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_message_unwraps_activity_errors() {
        let err = WorkflowError::Activity {
            activity: "create-node-pool".to_string(),
            attempts: 30,
            source: Error::provider_for("prod", "eks", "stack CREATE_FAILED"),
        };
        assert!(err.to_string().contains("after 30 attempt(s)"));
        assert_eq!(err.root_message(), "stack CREATE_FAILED");
        assert!(!err.is_client_error());
    }

    #[test]
    fn client_errors_are_detected() {
        let err = WorkflowError::Activity {
            activity: "set-cluster-status".to_string(),
            attempts: 1,
            source: Error::cluster_not_found("id 9"),
        };
        assert!(err.is_client_error());
        assert!(!WorkflowError::Canceled.is_client_error());
    }

    #[test]
    fn conversion_into_service_error() {
        let err: Error = WorkflowError::Activity {
            activity: "a".to_string(),
            attempts: 1,
            source: Error::validation("bad"),
        }
        .into();
        assert!(err.is_validation());

        let err: Error = WorkflowError::Canceled.into();
        assert_eq!(err.root_message(), "workflow canceled");
    }

    #[test]
    fn timeout_display() {
        let err = WorkflowError::Timeout {
            activity: "delete-node-pool".to_string(),
            kind: TimeoutKind::StartToClose,
            timeout: Duration::from_secs(5),
            attempts: 3,
        };
        assert!(err.to_string().contains("start-to-close"));
        assert!(!err.is_interrupted());
    }

    #[test]
    fn execution_timeout_interrupts_without_being_a_cancel() {
        let err = WorkflowError::ExecutionTimeout {
            workflow: "create-node-pool".to_string(),
            timeout: Duration::from_secs(60),
        };
        assert!(err.is_interrupted());
        assert!(!err.is_canceled());
        assert_eq!(
            err.root_message(),
            "workflow create-node-pool exceeded its execution timeout of 60s"
        );
        assert!(WorkflowError::Canceled.is_interrupted());
    }
}
