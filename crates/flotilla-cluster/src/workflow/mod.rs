//! Workflow-backed execution of lifecycle operations
//!
//! Every long-running operation is a named workflow issuing named
//! activities in order. Bookkeeping activities (status changes, record
//! removal) use short timeouts; infrastructure activities use the long
//! running timeout and wait for cancellation so a canceled workflow never
//! abandons a half-applied change.
//!
//! When a step fails for good, or the workflow is canceled, a compensating
//! status update runs on a disconnected context before the failure is
//! propagated.

mod activities;
mod cluster;
mod manager;
mod node_pool;
mod operator;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use flotilla_common::ClusterStatus;
use flotilla_workflow::{Activity, ActivityOptions, Registry, WorkflowContext, WorkflowError};
use tracing::error;

pub use activities::{
    ClusterInput, CreateNodePoolActivity, CreateNodePoolInput,
    DeleteClusterInfrastructureActivity, DeleteClusterRecordActivity, DeleteNodePoolActivity,
    DeleteNodePoolRecordActivity, InstallOperatorActivity, ListClusterPageActivity,
    ListClusterPageInput, ListNodePoolNamesActivity, NodePoolInput, SetClusterStatusActivity,
    SetClusterStatusInput, SetNodePoolStatusActivity, SetNodePoolStatusInput,
    UpdateClusterVersionActivity, UpdateClusterVersionInput, UpdateNodePoolActivity,
    UpdateNodePoolInput,
};
pub use cluster::{
    DeleteClusterWorkflow, DeleteClusterWorkflowInput, UpdateClusterWorkflow,
    UpdateClusterWorkflowInput,
};
pub use manager::WorkflowManager;
pub use node_pool::{
    CreateNodePoolWorkflow, CreateNodePoolWorkflowInput, DeleteNodePoolWorkflow,
    DeleteNodePoolWorkflowInput, UpdateNodePoolWorkflow, UpdateNodePoolWorkflowInput,
};
pub use operator::{
    start_operator_fleet_install, InstallOperatorFleetInput, InstallOperatorFleetWorkflow,
    OPERATOR_FLEET_WORKFLOW_ID,
};

use crate::config::LifecycleConfig;
use crate::distribution::DistributionRegistry;
use crate::infrastructure::{ClusterInfrastructure, OperatorInstaller};
use crate::store::{NodePoolStatus, NodePoolStore, Store};

/// Collaborators of the lifecycle activities
#[derive(Clone)]
pub struct ActivityDeps {
    /// Cluster persistence
    pub store: Arc<dyn Store>,
    /// Node pool persistence
    pub node_pools: Arc<dyn NodePoolStore>,
    /// Cloud plumbing per distribution
    pub infrastructure: Arc<DistributionRegistry<Arc<dyn ClusterInfrastructure>>>,
    /// Installs the in-cluster operator
    pub installer: Arc<dyn OperatorInstaller>,
}

/// Activity options of the two kinds of workflow steps
#[derive(Clone, Debug)]
pub struct StepOptions {
    /// Short status and record changes
    pub bookkeeping: ActivityOptions,
    /// Long-running cloud changes
    pub infrastructure: ActivityOptions,
}

impl From<&LifecycleConfig> for StepOptions {
    fn from(config: &LifecycleConfig) -> Self {
        Self {
            bookkeeping: config.bookkeeping_options(),
            infrastructure: config.infrastructure_options(),
        }
    }
}

/// Names of every lifecycle activity, in registration order
pub const ACTIVITY_NAMES: [&str; 12] = [
    SetClusterStatusActivity::NAME,
    SetNodePoolStatusActivity::NAME,
    CreateNodePoolActivity::NAME,
    UpdateNodePoolActivity::NAME,
    DeleteNodePoolActivity::NAME,
    DeleteNodePoolRecordActivity::NAME,
    ListNodePoolNamesActivity::NAME,
    UpdateClusterVersionActivity::NAME,
    DeleteClusterInfrastructureActivity::NAME,
    DeleteClusterRecordActivity::NAME,
    ListClusterPageActivity::NAME,
    InstallOperatorActivity::NAME,
];

/// Register every lifecycle activity
pub fn register_activities(
    registry: &mut Registry,
    deps: ActivityDeps,
) -> Result<(), WorkflowError> {
    registry.register_activity(SetClusterStatusActivity::new(deps.store.clone()))?;
    registry.register_activity(SetNodePoolStatusActivity::new(deps.node_pools.clone()))?;
    registry.register_activity(CreateNodePoolActivity::new(&deps))?;
    registry.register_activity(UpdateNodePoolActivity::new(&deps))?;
    registry.register_activity(DeleteNodePoolActivity::new(&deps))?;
    registry.register_activity(DeleteNodePoolRecordActivity::new(deps.node_pools.clone()))?;
    registry.register_activity(ListNodePoolNamesActivity::new(deps.node_pools.clone()))?;
    registry.register_activity(UpdateClusterVersionActivity::new(&deps))?;
    registry.register_activity(DeleteClusterInfrastructureActivity::new(&deps))?;
    registry.register_activity(DeleteClusterRecordActivity::new(deps.store.clone()))?;
    registry.register_activity(ListClusterPageActivity::new(deps.store.clone()))?;
    registry.register_activity(InstallOperatorActivity::new(deps.store, deps.installer))?;
    Ok(())
}

/// Register every lifecycle workflow
pub fn register_workflows(
    registry: &mut Registry,
    steps: StepOptions,
) -> Result<(), WorkflowError> {
    registry.register_workflow(CreateNodePoolWorkflow::new(steps.clone()))?;
    registry.register_workflow(UpdateNodePoolWorkflow::new(steps.clone()))?;
    registry.register_workflow(DeleteNodePoolWorkflow::new(steps.clone()))?;
    registry.register_workflow(UpdateClusterWorkflow::new(steps.clone()))?;
    registry.register_workflow(DeleteClusterWorkflow::new(steps.clone()))?;
    registry.register_workflow(InstallOperatorFleetWorkflow::new(steps))?;
    Ok(())
}

/// Register every lifecycle activity and workflow
pub fn register(
    registry: &mut Registry,
    deps: ActivityDeps,
    config: &LifecycleConfig,
) -> Result<(), WorkflowError> {
    register_activities(registry, deps)?;
    register_workflows(registry, StepOptions::from(config))
}

// =============================================================================
// Shared steps
// =============================================================================

pub(crate) async fn set_cluster_status(
    ctx: &WorkflowContext,
    options: &ActivityOptions,
    cluster_id: u64,
    status: ClusterStatus,
    message: &str,
) -> Result<(), WorkflowError> {
    let input = SetClusterStatusInput {
        cluster_id,
        status,
        message: message.to_string(),
    };
    ctx.execute_activity(SetClusterStatusActivity::NAME, options, &input)
        .await
}

pub(crate) async fn set_node_pool_status(
    ctx: &WorkflowContext,
    options: &ActivityOptions,
    cluster_id: u64,
    name: &str,
    status: NodePoolStatus,
    message: &str,
) -> Result<(), WorkflowError> {
    let input = SetNodePoolStatusInput {
        cluster_id,
        name: name.to_string(),
        status,
        message: message.to_string(),
    };
    ctx.execute_activity(SetNodePoolStatusActivity::NAME, options, &input)
        .await
}

/// Record a failure on the node pool (if any) and the cluster
///
/// Runs on a disconnected context so that it also runs after cancellation.
/// Failures of the compensation itself are logged; the original error is
/// what the workflow reports.
pub(crate) async fn compensate(
    ctx: &WorkflowContext,
    options: &ActivityOptions,
    cluster_id: u64,
    node_pool: Option<&str>,
    cluster_status: ClusterStatus,
    cause: &WorkflowError,
) {
    let compensation = ctx.disconnected();
    let message = cause.root_message();

    if let Some(name) = node_pool {
        if let Err(e) = set_node_pool_status(
            &compensation,
            options,
            cluster_id,
            name,
            NodePoolStatus::Error,
            &message,
        )
        .await
        {
            error!(
                cluster_id,
                node_pool = %name,
                error = %e,
                "failed to record node pool failure"
            );
        }
    }

    if let Err(e) =
        set_cluster_status(&compensation, options, cluster_id, cluster_status, &message).await
    {
        error!(
            cluster_id,
            status = %cluster_status,
            error = %e,
            "failed to record cluster failure"
        );
    }
}
