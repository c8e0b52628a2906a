//! Workflow execution context
//!
//! A [`WorkflowContext`] is the only way workflow code talks to the outside
//! world: every side effect goes through [`WorkflowContext::execute_activity`],
//! which suspends the workflow until the engine reports the activity's
//! completion, failure or timeout.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::WorkflowError;
use crate::options::ActivityOptions;

/// Identity of a running workflow execution
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkflowInfo {
    /// Registered workflow name
    pub workflow_name: String,
    /// Workflow ID, stable across continuations
    pub workflow_id: String,
    /// ID of this run
    pub run_id: String,
}

/// Execution deadline of a workflow run, shared with the engine
///
/// Once expired, the run's cancellation token is triggered as well, and
/// interrupted activity calls report [`WorkflowError::ExecutionTimeout`]
/// instead of [`WorkflowError::Canceled`].
#[derive(Clone, Debug, Default)]
pub struct Deadline {
    expired: Arc<Mutex<Option<Duration>>>,
}

impl Deadline {
    /// Mark the deadline as passed after `timeout`
    pub fn expire(&self, timeout: Duration) {
        *self.expired.lock() = Some(timeout);
    }

    /// The execution timeout that expired, if any
    pub fn expired(&self) -> Option<Duration> {
        *self.expired.lock()
    }
}

/// Dispatches activity calls on behalf of a workflow
///
/// Implemented by engines; the invoker owns retries and timeouts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ActivityInvoker: Send + Sync {
    /// Run the named activity with the given options until it succeeds or gives up
    async fn invoke(
        &self,
        activity: &str,
        options: &ActivityOptions,
        input: Value,
        cancel: &CancellationToken,
    ) -> Result<Value, WorkflowError>;
}

/// Context handed to workflow code
#[derive(Clone)]
pub struct WorkflowContext {
    info: WorkflowInfo,
    invoker: Arc<dyn ActivityInvoker>,
    cancel: CancellationToken,
    deadline: Deadline,
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("info", &self.info)
            .field("canceled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl WorkflowContext {
    /// Create a context for a workflow run
    pub fn new(
        info: WorkflowInfo,
        invoker: Arc<dyn ActivityInvoker>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            info,
            invoker,
            cancel,
            deadline: Deadline::default(),
        }
    }

    /// Attach the execution deadline tracked by the engine
    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Identity of the running workflow
    pub fn info(&self) -> &WorkflowInfo {
        &self.info
    }

    /// True once cancellation of the workflow was requested
    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The error reported for activity calls after an interruption
    fn interruption(&self) -> WorkflowError {
        match self.deadline.expired() {
            Some(timeout) => WorkflowError::ExecutionTimeout {
                workflow: self.info.workflow_name.clone(),
                timeout,
            },
            None => WorkflowError::Canceled,
        }
    }

    /// A context that ignores cancellation of this workflow
    ///
    /// Compensating steps run on a disconnected context so that they still
    /// execute after the workflow was canceled.
    pub fn disconnected(&self) -> Self {
        Self {
            info: self.info.clone(),
            invoker: self.invoker.clone(),
            cancel: CancellationToken::new(),
            deadline: Deadline::default(),
        }
    }

    /// Execute an activity and decode its result
    pub async fn execute_activity<I, O>(
        &self,
        activity: &str,
        options: &ActivityOptions,
        input: &I,
    ) -> Result<O, WorkflowError>
    where
        I: Serialize + Sync + ?Sized,
        O: DeserializeOwned,
    {
        if self.cancel.is_cancelled() {
            return Err(self.interruption());
        }

        let payload = serde_json::to_value(input)
            .map_err(|e| WorkflowError::payload(activity, e.to_string()))?;

        debug!(
            workflow = %self.info.workflow_name,
            workflow_id = %self.info.workflow_id,
            activity = %activity,
            "executing activity"
        );

        let output = self
            .invoker
            .invoke(activity, options, payload, &self.cancel)
            .await
            .map_err(|e| if e.is_canceled() { self.interruption() } else { e })?;

        serde_json::from_value(output).map_err(|e| WorkflowError::payload(activity, e.to_string()))
    }
}
