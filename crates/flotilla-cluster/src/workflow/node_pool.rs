//! Node pool workflows

use async_trait::async_trait;
use flotilla_common::{status_message, ClusterStatus, NodePool};
use flotilla_workflow::{Activity, Continuation, Workflow, WorkflowContext, WorkflowError};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::activities::{
    CreateNodePoolActivity, CreateNodePoolInput, DeleteNodePoolActivity,
    DeleteNodePoolRecordActivity, NodePoolInput, UpdateNodePoolActivity, UpdateNodePoolInput,
};
use super::{compensate, set_cluster_status, set_node_pool_status, StepOptions};
use crate::distribution::{NodePoolSpec, NodePoolUpdate};
use crate::store::NodePoolStatus;

/// Input of [`CreateNodePoolWorkflow`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePoolWorkflowInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool to provision; its record already exists
    pub node_pool: NodePoolSpec,
}

/// Provisions a node pool, then marks it ready and the cluster running
pub struct CreateNodePoolWorkflow {
    steps: StepOptions,
}

impl CreateNodePoolWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }

    async fn provision(
        &self,
        ctx: &WorkflowContext,
        input: &CreateNodePoolWorkflowInput,
    ) -> Result<(), WorkflowError> {
        let name = input.node_pool.name();
        let create = CreateNodePoolInput {
            cluster_id: input.cluster_id,
            node_pool: input.node_pool.clone(),
        };
        ctx.execute_activity::<_, ()>(
            CreateNodePoolActivity::NAME,
            &self.steps.infrastructure,
            &create,
        )
        .await?;

        set_node_pool_status(
            ctx,
            &self.steps.bookkeeping,
            input.cluster_id,
            name,
            NodePoolStatus::Ready,
            "",
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
impl Workflow for CreateNodePoolWorkflow {
    const NAME: &'static str = "create-node-pool";
    type Input = CreateNodePoolWorkflowInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: CreateNodePoolWorkflowInput,
    ) -> Result<Continuation<CreateNodePoolWorkflowInput>, WorkflowError> {
        if let Err(e) = self.provision(ctx, &input).await {
            compensate(
                ctx,
                &self.steps.bookkeeping,
                input.cluster_id,
                Some(input.node_pool.name()),
                ClusterStatus::Warning,
                &e,
            )
            .await;
            return Err(e);
        }
        info!(
            cluster_id = input.cluster_id,
            node_pool = %input.node_pool.name(),
            "node pool created"
        );
        Ok(Continuation::Complete)
    }
}

/// Input of [`UpdateNodePoolWorkflow`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodePoolWorkflowInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool name
    pub name: String,
    /// Partial update to apply
    pub update: NodePoolUpdate,
}

/// Applies a node pool update, then marks it ready and the cluster running
pub struct UpdateNodePoolWorkflow {
    steps: StepOptions,
}

impl UpdateNodePoolWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }

    async fn apply(
        &self,
        ctx: &WorkflowContext,
        input: &UpdateNodePoolWorkflowInput,
    ) -> Result<(), WorkflowError> {
        let update = UpdateNodePoolInput {
            cluster_id: input.cluster_id,
            name: input.name.clone(),
            update: input.update.clone(),
        };
        ctx.execute_activity::<_, ()>(
            UpdateNodePoolActivity::NAME,
            &self.steps.infrastructure,
            &update,
        )
        .await?;

        set_node_pool_status(
            ctx,
            &self.steps.bookkeeping,
            input.cluster_id,
            &input.name,
            NodePoolStatus::Ready,
            "",
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
impl Workflow for UpdateNodePoolWorkflow {
    const NAME: &'static str = "update-node-pool";
    type Input = UpdateNodePoolWorkflowInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: UpdateNodePoolWorkflowInput,
    ) -> Result<Continuation<UpdateNodePoolWorkflowInput>, WorkflowError> {
        if let Err(e) = self.apply(ctx, &input).await {
            compensate(
                ctx,
                &self.steps.bookkeeping,
                input.cluster_id,
                Some(&input.name),
                ClusterStatus::Warning,
                &e,
            )
            .await;
            return Err(e);
        }
        info!(cluster_id = input.cluster_id, node_pool = %input.name, "node pool updated");
        Ok(Continuation::Complete)
    }
}

/// Input of [`DeleteNodePoolWorkflow`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteNodePoolWorkflowInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool name
    pub name: String,
}

/// Removes a node pool from the cloud and its record, then marks the
/// cluster running
pub struct DeleteNodePoolWorkflow {
    steps: StepOptions,
}

impl DeleteNodePoolWorkflow {
    /// Create the workflow
    pub fn new(steps: StepOptions) -> Self {
        Self { steps }
    }

    async fn remove(
        &self,
        ctx: &WorkflowContext,
        input: &DeleteNodePoolWorkflowInput,
    ) -> Result<(), WorkflowError> {
        let node_pool = NodePoolInput {
            cluster_id: input.cluster_id,
            name: input.name.clone(),
        };

        set_node_pool_status(
            ctx,
            &self.steps.bookkeeping,
            input.cluster_id,
            &input.name,
            NodePoolStatus::Deleting,
            "",
        )
        .await?;
        ctx.execute_activity::<_, ()>(
            DeleteNodePoolActivity::NAME,
            &self.steps.infrastructure,
            &node_pool,
        )
        .await?;
        ctx.execute_activity::<_, ()>(
            DeleteNodePoolRecordActivity::NAME,
            &self.steps.bookkeeping,
            &node_pool,
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
impl Workflow for DeleteNodePoolWorkflow {
    const NAME: &'static str = "delete-node-pool";
    type Input = DeleteNodePoolWorkflowInput;

    async fn run(
        &self,
        ctx: &WorkflowContext,
        input: DeleteNodePoolWorkflowInput,
    ) -> Result<Continuation<DeleteNodePoolWorkflowInput>, WorkflowError> {
        if let Err(e) = self.remove(ctx, &input).await {
            compensate(
                ctx,
                &self.steps.bookkeeping,
                input.cluster_id,
                Some(&input.name),
                ClusterStatus::Warning,
                &e,
            )
            .await;
            return Err(e);
        }
        info!(cluster_id = input.cluster_id, node_pool = %input.name, "node pool deleted");
        Ok(Continuation::Complete)
    }
}
