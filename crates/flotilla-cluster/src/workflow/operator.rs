//! Fleet-wide operator installation

use async_trait::async_trait;
use flotilla_workflow::{
    start_workflow, Activity, Continuation, Workflow, WorkflowContext, WorkflowEngine,
    WorkflowError, WorkflowExecution,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::activities::{
    ClusterInput, InstallOperatorActivity, ListClusterPageActivity, ListClusterPageInput,
};
use super::StepOptions;
use crate::config::LifecycleConfig;

/// Workflow ID of the fleet installation; one runs at a time
pub const OPERATOR_FLEET_WORKFLOW_ID: &str = "install-operator-fleet";

/// Cursor of [`InstallOperatorFleetWorkflow`], carried across continuations
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallOperatorFleetInput {
    /// Clusters with an ID up to this one were handled by earlier runs
    pub after: u64,
    /// Clusters handled per run
    pub batch_size: usize,
    /// Installations so far
    #[serde(default)]
    pub installed: u32,
    /// Clusters skipped because they were not ready
    #[serde(default)]
    pub skipped: u32,
    /// Failed installations so far
    #[serde(default)]
    pub failed: u32,
}

/// Installs the operator on every cluster, one page per run
///
/// A full page continues as a new run from the last cluster ID, keeping
/// the history of each run bounded. Per-cluster failures are counted and
/// logged; only cancellation or the execution timeout ends the workflow early.
pub struct InstallOperatorFleetWorkflow {
    steps: StepOptions,
}

impl InstallOperatorFleetWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }
}

#[async_trait]
impl Workflow for InstallOperatorFleetWorkflow {
    const NAME: &'static str = "install-operator-fleet";
    type Input = InstallOperatorFleetInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: InstallOperatorFleetInput,
    ) -> Result<Continuation<InstallOperatorFleetInput>, WorkflowError> {
        let page = ListClusterPageInput {
            after: input.after,
            limit: input.batch_size,
        };
        let ids: Vec<u64> = ctx
            .execute_activity(ListClusterPageActivity::NAME, &self.steps.bookkeeping, &page)
            .await?;

        let mut next = input.clone();
        for &cluster_id in &ids {
            let installed = ctx
                .execute_activity::<_, bool>(
                    InstallOperatorActivity::NAME,
                    &self.steps.infrastructure,
                    &ClusterInput { cluster_id },
                )
                .await;
            match installed {
                Ok(true) => next.installed += 1,
                Ok(false) => next.skipped += 1,
                Err(e) if e.is_interrupted() => return Err(e),
                Err(e) => {
                    warn!(cluster_id, error = %e, "operator installation failed");
                    next.failed += 1;
                }
            }
            next.after = cluster_id;
        }

        if !ids.is_empty() && ids.len() >= input.batch_size {
            info!(
                after = next.after,
                installed = next.installed,
                failed = next.failed,
                "continuing operator installation"
            );
            return Ok(Continuation::ContinueAsNew(next));
        }

        info!(
            installed = next.installed,
            skipped = next.skipped,
            failed = next.failed,
            "operator installation finished"
        );
        Ok(Continuation::Complete)
    }
}

/// Start installing the operator on every cluster
///
/// Fails with `AlreadyStarted` while a previous fleet installation runs.
pub async fn start_operator_fleet_install(
    engine: &dyn WorkflowEngine,
    config: &LifecycleConfig,
) -> Result<WorkflowExecution, WorkflowError> {
    let input = InstallOperatorFleetInput {
        batch_size: config.workflow.operator_batch_size,
        ..Default::default()
    };
    let options = config.start_options().workflow_id(OPERATOR_FLEET_WORKFLOW_ID);
    start_workflow::<InstallOperatorFleetWorkflow>(engine, options, &input).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    use crate::workflow::testing::{context, steps, ScriptedInvoker};

    fn input(batch_size: usize) -> InstallOperatorFleetInput {
        InstallOperatorFleetInput {
            after: 10,
            batch_size,
            installed: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn full_page_continues_from_last_id() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .returning(ListClusterPageActivity::NAME, json!([11, 14]))
                .returning(InstallOperatorActivity::NAME, json!(true)),
        );
        let next = InstallOperatorFleetWorkflow::new(steps())
            .run(&context(invoker.clone()), input(2))
            .await
            .unwrap();

        assert_eq!(
            next,
            Continuation::ContinueAsNew(InstallOperatorFleetInput {
                after: 14,
                batch_size: 2,
                installed: 6,
                skipped: 0,
                failed: 0,
            })
        );
        assert_eq!(invoker.calls()[0].1, json!({"after": 10, "limit": 2}));
    }

    #[tokio::test]
    async fn short_page_completes_and_counts_failures() {
        let invoker = Arc::new(
            ScriptedInvoker::default()
                .returning(ListClusterPageActivity::NAME, json!([11]))
                .failing(InstallOperatorActivity::NAME),
        );
        let next = InstallOperatorFleetWorkflow::new(steps())
            .run(&context(invoker.clone()), input(2))
            .await
            .unwrap();

        assert_eq!(next, Continuation::Complete);
        assert_eq!(invoker.names().len(), 2);
    }

    #[tokio::test]
    async fn empty_page_completes() {
        let invoker = Arc::new(
            ScriptedInvoker::default().returning(ListClusterPageActivity::NAME, json!([])),
        );
        let next = InstallOperatorFleetWorkflow::new(steps())
            .run(&context(invoker), input(2))
            .await
            .unwrap();
        assert_eq!(next, Continuation::Complete);
    }
}
