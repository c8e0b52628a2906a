//! Scripted activity invoker for workflow unit tests

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::Error;
use flotilla_workflow::{
    ActivityInvoker, ActivityOptions, WorkflowContext, WorkflowError, WorkflowInfo,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::StepOptions;

pub(crate) const FAILURE: &str = "stack ROLLBACK_COMPLETE";

/// Records every activity call; named activities fail or return canned output
#[derive(Default)]
pub(crate) struct ScriptedInvoker {
    calls: Mutex<Vec<(String, Value)>>,
    failing: Vec<&'static str>,
    outputs: HashMap<&'static str, Value>,
}

impl ScriptedInvoker {
    pub(crate) fn failing(mut self, activity: &'static str) -> Self {
        self.failing.push(activity);
        self
    }

    pub(crate) fn returning(mut self, activity: &'static str, output: Value) -> Self {
        self.outputs.insert(activity, output);
        self
    }

    pub(crate) fn names(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub(crate) fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ActivityInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        activity: &str,
        _options: &ActivityOptions,
        input: Value,
        _cancel: &CancellationToken,
    ) -> Result<Value, WorkflowError> {
        self.calls.lock().push((activity.to_string(), input.clone()));
        if self.failing.contains(&activity) {
            return Err(WorkflowError::Activity {
                activity: activity.to_string(),
                attempts: 3,
                source: Error::provider(FAILURE),
            });
        }
        Ok(self.outputs.get(activity).cloned().unwrap_or(Value::Null))
    }
}

pub(crate) fn steps() -> StepOptions {
    StepOptions {
        bookkeeping: ActivityOptions::default(),
        infrastructure: ActivityOptions::default().wait_for_cancellation(true),
    }
}

pub(crate) fn context(invoker: Arc<ScriptedInvoker>) -> WorkflowContext {
    context_with(invoker, CancellationToken::new())
}

pub(crate) fn context_with(
    invoker: Arc<ScriptedInvoker>,
    cancel: CancellationToken,
) -> WorkflowContext {
    WorkflowContext::new(
        WorkflowInfo {
            workflow_name: "test".to_string(),
            workflow_id: "wf".to_string(),
            run_id: "run".to_string(),
        },
        invoker,
        cancel,
    )
}
