//! Workflow-backed [`Manager`]

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::{Cluster, DeleteClusterOptions, NodePool, Result};
use flotilla_workflow::{start_workflow, StartWorkflowOptions, Workflow, WorkflowEngine};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::cluster::{
    DeleteClusterWorkflow, DeleteClusterWorkflowInput, UpdateClusterWorkflow,
    UpdateClusterWorkflowInput,
};
use super::node_pool::{
    CreateNodePoolWorkflow, CreateNodePoolWorkflowInput, DeleteNodePoolWorkflow,
    DeleteNodePoolWorkflowInput, UpdateNodePoolWorkflow, UpdateNodePoolWorkflowInput,
};
use crate::distribution::{ClusterVersionUpdate, Manager, NodePoolSpec, NodePoolUpdate};
use crate::store::{NodePoolStatus, NodePoolStore};

/// Starts lifecycle workflows on the injected engine
///
/// Node pool creation persists the record before the workflow starts; the
/// record is what makes a repeated create request fail as a conflict.
pub struct WorkflowManager {
    engine: Arc<dyn WorkflowEngine>,
    node_pools: Arc<dyn NodePoolStore>,
    options: StartWorkflowOptions,
}

impl WorkflowManager {
    /// Create a manager starting workflows with the given options
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        node_pools: Arc<dyn NodePoolStore>,
        options: StartWorkflowOptions,
    ) -> Self {
        Self {
            engine,
            node_pools,
            options,
        }
    }

    /// Start options with a fresh workflow ID for the cluster
    fn options_for<W: Workflow>(&self, cluster_id: u64) -> StartWorkflowOptions {
        self.options
            .clone()
            .workflow_id(format!("{}-{}-{}", W::NAME, cluster_id, Uuid::new_v4()))
    }

    async fn start<W: Workflow>(&self, cluster_id: u64, input: &W::Input) -> Result<()> {
        let execution =
            start_workflow::<W>(self.engine.as_ref(), self.options_for::<W>(cluster_id), input)
                .await?;
        info!(
            cluster_id,
            workflow = W::NAME,
            workflow_id = %execution.workflow_id,
            run_id = %execution.run_id,
            "workflow started"
        );
        Ok(())
    }
}

#[async_trait]
impl Manager for WorkflowManager {
    #[instrument(skip_all, fields(cluster_id = cluster.id, version = %update.version))]
    async fn update_cluster(&self, cluster: &Cluster, update: ClusterVersionUpdate) -> Result<()> {
        let input = UpdateClusterWorkflowInput {
            cluster_id: cluster.id,
            version: update.version,
        };
        self.start::<UpdateClusterWorkflow>(cluster.id, &input).await
    }

    #[instrument(skip_all, fields(cluster_id = cluster.id, force = options.force))]
    async fn delete_cluster(&self, cluster: &Cluster, options: DeleteClusterOptions) -> Result<()> {
        let input = DeleteClusterWorkflowInput {
            cluster_id: cluster.id,
            force: options.force,
        };
        self.start::<DeleteClusterWorkflow>(cluster.id, &input).await
    }

    #[instrument(skip_all, fields(cluster_id = cluster.id, pool = %node_pool.name()))]
    async fn create_node_pool(&self, cluster: &Cluster, node_pool: NodePoolSpec) -> Result<()> {
        self.node_pools.create_node_pool(cluster.id, &node_pool).await?;

        let name = node_pool.name().to_string();
        let input = CreateNodePoolWorkflowInput {
            cluster_id: cluster.id,
            node_pool,
        };
        if let Err(e) = self.start::<CreateNodePoolWorkflow>(cluster.id, &input).await {
            // without a workflow the record would block every retry
            if let Err(cleanup) = self.node_pools.delete_node_pool(cluster.id, &name).await {
                warn!(error = %cleanup, "failed to remove node pool record");
            }
            return Err(e);
        }
        Ok(())
    }

    #[instrument(skip(self, cluster, update), fields(cluster_id = cluster.id))]
    async fn update_node_pool(
        &self,
        cluster: &Cluster,
        name: &str,
        update: NodePoolUpdate,
    ) -> Result<()> {
        self.node_pools
            .set_node_pool_status(cluster.id, name, NodePoolStatus::Updating, "")
            .await?;

        let input = UpdateNodePoolWorkflowInput {
            cluster_id: cluster.id,
            name: name.to_string(),
            update,
        };
        self.start::<UpdateNodePoolWorkflow>(cluster.id, &input).await
    }

    #[instrument(skip(self, cluster), fields(cluster_id = cluster.id))]
    async fn delete_node_pool(&self, cluster: &Cluster, name: &str) -> Result<()> {
        let input = DeleteNodePoolWorkflowInput {
            cluster_id: cluster.id,
            name: name.to_string(),
        };
        self.start::<DeleteNodePoolWorkflow>(cluster.id, &input).await
    }
}
