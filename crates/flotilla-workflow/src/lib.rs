//! Durable step-sequence execution for flotilla
//!
//! Long-running lifecycle operations are expressed as named [`Workflow`]s that
//! issue named [`Activity`] calls in program order. Each activity call carries
//! its own [`ActivityOptions`]: queue and execution timeouts, a
//! [`RetryPolicy`] and whether cancellation waits for the running attempt.
//!
//! The engine executing workflows is injected through [`WorkflowEngine`].
//! [`LocalEngine`] is an in-process engine honoring the same contract, used
//! by tests and tooling.

#![deny(missing_docs)]

pub mod context;
pub mod engine;
pub mod error;
pub mod history;
pub mod local;
pub mod options;
pub mod registry;
pub mod retry;

pub use context::{ActivityInvoker, Deadline, WorkflowContext, WorkflowInfo};
pub use engine::{start_workflow, StartWorkflowOptions, WorkflowEngine, WorkflowExecution};
pub use error::{TimeoutKind, WorkflowError};
pub use history::{ExecutionStatus, HistoryEvent, HistoryEventKind};
pub use local::{LocalEngine, LocalEngineConfig};
pub use options::ActivityOptions;
pub use registry::{Activity, Continuation, Registry, Workflow};
pub use retry::{retry_with_policy, RetryError, RetryPolicy};

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;
