//! Workflow and activity registration
//!
//! Workflows and activities are registered under unique names with typed,
//! serializable inputs and outputs. The registry erases their types so that
//! engines can dispatch by name with JSON payloads.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::Error;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::WorkflowError;

/// A single idempotent unit of work invoked by workflows
#[async_trait]
pub trait Activity: Send + Sync + 'static {
    /// Registered name
    const NAME: &'static str;
    /// Input payload
    type Input: DeserializeOwned + Send;
    /// Output payload
    type Output: Serialize + Send;

    /// Execute one attempt
    ///
    /// Service errors fail the call immediately; other errors are retried
    /// according to the caller's retry policy.
    async fn execute(&self, input: Self::Input) -> Result<Self::Output, Error>;
}

/// What a workflow run asks the engine to do when it returns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Continuation<I> {
    /// The workflow is finished
    Complete,
    /// Start a fresh run of the same workflow with the given input
    ContinueAsNew(I),
}

/// A named, durable sequence of activity calls
#[async_trait]
pub trait Workflow: Send + Sync + 'static {
    /// Registered name
    const NAME: &'static str;
    /// Input payload
    type Input: Serialize + DeserializeOwned + Send + Sync;

    /// Run the workflow
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Self::Input,
    ) -> Result<Continuation<Self::Input>, WorkflowError>;
}

#[async_trait]
pub(crate) trait ErasedActivity: Send + Sync {
    async fn call(&self, input: Value) -> Result<Value, Error>;
}

#[async_trait]
impl<A: Activity> ErasedActivity for A {
    async fn call(&self, input: Value) -> Result<Value, Error> {
        let input: A::Input = serde_json::from_value(input)
            .map_err(|e| Error::serialization_for_kind(A::NAME, e.to_string()))?;
        let output = self.execute(input).await?;
        serde_json::to_value(output)
            .map_err(|e| Error::serialization_for_kind(A::NAME, e.to_string()))
    }
}

#[async_trait]
pub(crate) trait ErasedWorkflow: Send + Sync {
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Value,
    ) -> Result<Continuation<Value>, WorkflowError>;
}

#[async_trait]
impl<W: Workflow> ErasedWorkflow for W {
    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: Value,
    ) -> Result<Continuation<Value>, WorkflowError> {
        let input: W::Input = serde_json::from_value(input)
            .map_err(|e| WorkflowError::payload(W::NAME, e.to_string()))?;
        match Workflow::run(self, ctx, input).await? {
            Continuation::Complete => Ok(Continuation::Complete),
            Continuation::ContinueAsNew(next) => serde_json::to_value(next)
                .map(Continuation::ContinueAsNew)
                .map_err(|e| WorkflowError::payload(W::NAME, e.to_string())),
        }
    }
}

/// Name-keyed registry of workflows and activities
#[derive(Default)]
pub struct Registry {
    workflows: BTreeMap<String, Arc<dyn ErasedWorkflow>>,
    activities: BTreeMap<String, Arc<dyn ErasedActivity>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a workflow under its name
    ///
    /// Fails if a workflow with the same name is already registered.
    pub fn register_workflow<W: Workflow>(&mut self, workflow: W) -> Result<(), WorkflowError> {
        if self.workflows.contains_key(W::NAME) {
            return Err(WorkflowError::AlreadyRegistered {
                kind: "workflow",
                name: W::NAME.to_string(),
            });
        }
        self.workflows.insert(W::NAME.to_string(), Arc::new(workflow));
        Ok(())
    }

    /// Register an activity under its name
    ///
    /// Fails if an activity with the same name is already registered.
    pub fn register_activity<A: Activity>(&mut self, activity: A) -> Result<(), WorkflowError> {
        if self.activities.contains_key(A::NAME) {
            return Err(WorkflowError::AlreadyRegistered {
                kind: "activity",
                name: A::NAME.to_string(),
            });
        }
        self.activities.insert(A::NAME.to_string(), Arc::new(activity));
        Ok(())
    }

    /// Names of registered workflows, sorted
    pub fn workflow_names(&self) -> Vec<&str> {
        self.workflows.keys().map(String::as_str).collect()
    }

    /// Names of registered activities, sorted
    pub fn activity_names(&self) -> Vec<&str> {
        self.activities.keys().map(String::as_str).collect()
    }

    /// True if a workflow is registered under the name
    pub fn has_workflow(&self, name: &str) -> bool {
        self.workflows.contains_key(name)
    }

    pub(crate) fn workflow(&self, name: &str) -> Result<Arc<dyn ErasedWorkflow>, WorkflowError> {
        self.workflows
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::NotRegistered {
                kind: "workflow",
                name: name.to_string(),
            })
    }

    pub(crate) fn activity(&self, name: &str) -> Result<Arc<dyn ErasedActivity>, WorkflowError> {
        self.activities
            .get(name)
            .cloned()
            .ok_or_else(|| WorkflowError::NotRegistered {
                kind: "activity",
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Double;

    #[async_trait]
    impl Activity for Double {
        const NAME: &'static str = "double";
        type Input = u32;
        type Output = u32;

        async fn execute(&self, input: u32) -> Result<u32, Error> {
            Ok(input * 2)
        }
    }

    struct Noop;

    #[async_trait]
    impl Workflow for Noop {
        const NAME: &'static str = "noop";
        type Input = ();

        async fn run(
            &self,
            _ctx: &WorkflowContext,
            _input: (),
        ) -> Result<Continuation<()>, WorkflowError> {
            Ok(Continuation::Complete)
        }
    }

    #[test]
    fn duplicate_names_fail_fast() {
        let mut registry = Registry::new();
        registry.register_activity(Double).unwrap();
        registry.register_workflow(Noop).unwrap();

        assert!(matches!(
            registry.register_activity(Double),
            Err(WorkflowError::AlreadyRegistered { kind: "activity", .. })
        ));
        assert!(matches!(
            registry.register_workflow(Noop),
            Err(WorkflowError::AlreadyRegistered { kind: "workflow", .. })
        ));
    }

    #[test]
    fn lookup_by_name() {
        let mut registry = Registry::new();
        registry.register_activity(Double).unwrap();
        registry.register_workflow(Noop).unwrap();

        assert_eq!(registry.activity_names(), vec!["double"]);
        assert_eq!(registry.workflow_names(), vec!["noop"]);
        assert!(registry.has_workflow("noop"));
        assert!(matches!(
            registry.activity("triple"),
            Err(WorkflowError::NotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn erased_activity_round_trips_payloads() {
        let mut registry = Registry::new();
        registry.register_activity(Double).unwrap();

        let activity = registry.activity("double").unwrap();
        assert_eq!(activity.call(json!(21)).await.unwrap(), json!(42));

        let err = activity.call(json!("21")).await.unwrap_err();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }
}
