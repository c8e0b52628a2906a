//! The injected workflow engine
//!
//! Lifecycle managers only ever start and cancel workflows; the durable
//! engine behind [`WorkflowEngine`] persists history, schedules activities
//! and survives restarts.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WorkflowError;
use crate::registry::Workflow;

/// Default task list workflows are started on
pub const DEFAULT_TASK_LIST: &str = "default";

/// Options for starting a workflow execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartWorkflowOptions {
    /// Workflow ID; a random ID is generated when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    /// Task list (queue) the workflow is scheduled on
    pub task_list: String,
    /// Maximum duration of the whole execution, per run
    pub execution_timeout: Duration,
}

impl Default for StartWorkflowOptions {
    fn default() -> Self {
        Self {
            workflow_id: None,
            task_list: DEFAULT_TASK_LIST.to_string(),
            execution_timeout: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl StartWorkflowOptions {
    /// Set the workflow ID and return self for chaining
    pub fn workflow_id(mut self, id: impl Into<String>) -> Self {
        self.workflow_id = Some(id.into());
        self
    }

    /// Set the task list and return self for chaining
    pub fn task_list(mut self, task_list: impl Into<String>) -> Self {
        self.task_list = task_list.into();
        self
    }

    /// Set the execution timeout and return self for chaining
    pub fn execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }
}

/// Handle of a started workflow execution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    /// Workflow ID
    pub workflow_id: String,
    /// ID of the first run
    pub run_id: String,
}

/// Durable workflow engine
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WorkflowEngine: Send + Sync {
    /// Enqueue a workflow execution; returns once the engine accepted it
    async fn start_workflow(
        &self,
        workflow: &str,
        options: StartWorkflowOptions,
        input: Value,
    ) -> Result<WorkflowExecution, WorkflowError>;

    /// Request cancellation of a running execution
    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError>;
}

/// Start a workflow with a typed input
pub async fn start_workflow<W: Workflow>(
    engine: &dyn WorkflowEngine,
    options: StartWorkflowOptions,
    input: &W::Input,
) -> Result<WorkflowExecution, WorkflowError> {
    let payload =
        serde_json::to_value(input).map_err(|e| WorkflowError::payload(W::NAME, e.to_string()))?;
    engine.start_workflow(W::NAME, options, payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WorkflowContext;
    use crate::registry::Continuation;
    use serde_json::json;

    struct Greet;

    #[async_trait]
    impl Workflow for Greet {
        const NAME: &'static str = "greet";
        type Input = String;

        async fn run(
            &self,
            _ctx: &WorkflowContext,
            _input: String,
        ) -> Result<Continuation<String>, WorkflowError> {
            Ok(Continuation::Complete)
        }
    }

    #[tokio::test]
    async fn typed_start_serializes_input() {
        let mut engine = MockWorkflowEngine::new();
        engine
            .expect_start_workflow()
            .withf(|name, options, input| {
                name == "greet" && options.task_list == "cluster" && *input == json!("hello")
            })
            .times(1)
            .returning(|_, _, _| {
                Ok(WorkflowExecution {
                    workflow_id: "wf".to_string(),
                    run_id: "run".to_string(),
                })
            });

        let execution = start_workflow::<Greet>(
            &engine,
            StartWorkflowOptions::default().task_list("cluster"),
            &"hello".to_string(),
        )
        .await
        .unwrap();
        assert_eq!(execution.workflow_id, "wf");
    }
}
