//! Cluster workflows

use async_trait::async_trait;
use flotilla_common::{status_message, ClusterStatus};
use flotilla_workflow::{Activity, Continuation, Workflow, WorkflowContext, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::activities::{
    ClusterInput, DeleteClusterInfrastructureActivity, DeleteClusterRecordActivity,
    DeleteNodePoolActivity, DeleteNodePoolRecordActivity, ListNodePoolNamesActivity,
    NodePoolInput, UpdateClusterVersionActivity, UpdateClusterVersionInput,
};
use super::{compensate, set_cluster_status, StepOptions};

// =============================================================================
// update-cluster
// =============================================================================

/// Input of [`UpdateClusterWorkflow`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterWorkflowInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Target Kubernetes version
    pub version: String,
}

/// Upgrades the Kubernetes version, then marks the cluster running
pub struct UpdateClusterWorkflow {
    steps: StepOptions,
}

impl UpdateClusterWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }

    async fn upgrade(
        &self,
        ctx: &WorkflowContext,
        input: &UpdateClusterWorkflowInput,
    ) -> Result<(), WorkflowError> {
        let upgrade = UpdateClusterVersionInput {
            cluster_id: input.cluster_id,
            version: input.version.clone(),
        };
        ctx.execute_activity::<_, ()>(
            UpdateClusterVersionActivity::NAME,
            &self.steps.infrastructure,
            &upgrade,
        )
        .await?;
        set_cluster_status(
            ctx,
            &self.steps.bookkeeping,
            input.cluster_id,
            ClusterStatus::Running,
            status_message::RUNNING,
        )
        .await
    }
}

#[async_trait]
impl Workflow for UpdateClusterWorkflow {
    const NAME: &'static str = "update-cluster";
    type Input = UpdateClusterWorkflowInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: UpdateClusterWorkflowInput,
    ) -> Result<Continuation<UpdateClusterWorkflowInput>, WorkflowError> {
        if let Err(e) = self.upgrade(ctx, &input).await {
            compensate(
                ctx,
                &self.steps.bookkeeping,
                input.cluster_id,
                None,
                ClusterStatus::Warning,
                &e,
            )
            .await;
            return Err(e);
        }
        info!(cluster_id = input.cluster_id, version = %input.version, "cluster updated");
        Ok(Continuation::Complete)
    }
}

// =============================================================================
// delete-cluster
// =============================================================================

/// Input of [`DeleteClusterWorkflow`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteClusterWorkflowInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Skip failing cloud steps instead of aborting
    #[serde(default)]
    pub force: bool,
}

/// Deletes every node pool, the cluster infrastructure and finally the
/// cluster record
///
/// Every step is idempotent, so a retried or restarted deletion picks up
/// where the previous one stopped. With `force`, failing cloud steps are
/// logged and skipped. Removal of the record itself is never skipped, and
/// cancellation always aborts. A deletion that aborts leaves the cluster in
/// Error.
pub struct DeleteClusterWorkflow {
    steps: StepOptions,
}

impl DeleteClusterWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }

    async fn delete(
        &self,
        ctx: &WorkflowContext,
        input: &DeleteClusterWorkflowInput,
    ) -> Result<(), WorkflowError> {
        let cluster = ClusterInput {
            cluster_id: input.cluster_id,
        };

        let names: Vec<String> = ctx
            .execute_activity(ListNodePoolNamesActivity::NAME, &self.steps.bookkeeping, &cluster)
            .await?;

        for name in names {
            let node_pool = NodePoolInput {
                cluster_id: input.cluster_id,
                name,
            };
            let removed = ctx
                .execute_activity(
                    DeleteNodePoolActivity::NAME,
                    &self.steps.infrastructure,
                    &node_pool,
                )
                .await;
            if !tolerate(input, DeleteNodePoolActivity::NAME, removed)? {
                // the record is kept so the pool stays visible for cleanup
                continue;
            }
            ctx.execute_activity::<_, ()>(
                DeleteNodePoolRecordActivity::NAME,
                &self.steps.bookkeeping,
                &node_pool,
            )
            .await?;
        }

        let removed = ctx
            .execute_activity(
                DeleteClusterInfrastructureActivity::NAME,
                &self.steps.infrastructure,
                &cluster,
            )
            .await;
        tolerate(input, DeleteClusterInfrastructureActivity::NAME, removed)?;

        ctx.execute_activity(DeleteClusterRecordActivity::NAME, &self.steps.bookkeeping, &cluster)
            .await
    }
}

/// Whether a cloud step succeeded; forced deletions skip failures unless interrupted
fn tolerate(
    input: &DeleteClusterWorkflowInput,
    step: &str,
    result: Result<(), WorkflowError>,
) -> Result<bool, WorkflowError> {
    match result {
        Ok(()) => Ok(true),
        Err(e) if input.force && !e.is_interrupted() => {
            warn!(
                cluster_id = input.cluster_id,
                step = %step,
                error = %e,
                "forced deletion skipping failed step"
            );
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Workflow for DeleteClusterWorkflow {
    const NAME: &'static str = "delete-cluster";
    type Input = DeleteClusterWorkflowInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: DeleteClusterWorkflowInput,
    ) -> Result<Continuation<DeleteClusterWorkflowInput>, WorkflowError> {
        if let Err(e) = self.delete(ctx, &input).await {
            compensate(
                ctx,
                &self.steps.bookkeeping,
                input.cluster_id,
                None,
                ClusterStatus::Error,
                &e,
            )
            .await;
            return Err(e);
        }
        info!(cluster_id = input.cluster_id, force = input.force, "cluster deleted");
        Ok(Continuation::Complete)
    }
}
