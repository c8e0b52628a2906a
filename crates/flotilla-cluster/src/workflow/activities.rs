//! Lifecycle activities
//!
//! Each activity is idempotent: a retried attempt after a partial success
//! converges to the same state.

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::{Cluster, ClusterStatus, Result};
use flotilla_workflow::Activity;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::ActivityDeps;
use crate::distribution::{DistributionRegistry, NodePoolSpec, NodePoolUpdate};
use crate::infrastructure::{ClusterInfrastructure, OperatorInstaller};
use crate::store::{NodePoolStatus, NodePoolStore, Store};

type Infrastructure = Arc<DistributionRegistry<Arc<dyn ClusterInfrastructure>>>;

/// Input naming a cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterInput {
    /// Cluster ID
    pub cluster_id: u64,
}

/// Input naming a node pool of a cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool name
    pub name: String,
}

/// Loads the cluster and the infrastructure of its distribution
async fn resolve<'a>(
    store: &dyn Store,
    infrastructure: &'a Infrastructure,
    cluster_id: u64,
) -> Result<(Cluster, &'a Arc<dyn ClusterInfrastructure>)> {
    let cluster = store.get_cluster(cluster_id).await?;
    let infrastructure = infrastructure.lookup(&cluster)?;
    Ok((cluster, infrastructure))
}

// =============================================================================
// Status bookkeeping
// =============================================================================

/// Input of [`SetClusterStatusActivity`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetClusterStatusInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// New status
    pub status: ClusterStatus,
    /// New status message
    pub message: String,
}

/// Sets the status of a cluster
pub struct SetClusterStatusActivity {
    store: Arc<dyn Store>,
}

impl SetClusterStatusActivity {
    /// Create the activity
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for SetClusterStatusActivity {
    const NAME: &'static str = "set-cluster-status";
    type Input = SetClusterStatusInput;
    type Output = ();

    async fn execute(&self, input: SetClusterStatusInput) -> Result<()> {
        self.store
            .set_status(input.cluster_id, input.status, &input.message)
            .await
    }
}

/// Input of [`SetNodePoolStatusActivity`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetNodePoolStatusInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool name
    pub name: String,
    /// New status
    pub status: NodePoolStatus,
    /// New status message
    pub message: String,
}

/// Sets the status of a node pool record
pub struct SetNodePoolStatusActivity {
    node_pools: Arc<dyn NodePoolStore>,
}

impl SetNodePoolStatusActivity {
    /// Create the activity
    pub fn new(node_pools: Arc<dyn NodePoolStore>) -> Self {
        Self { node_pools }
    }
}

#[async_trait]
impl Activity for SetNodePoolStatusActivity {
    const NAME: &'static str = "set-node-pool-status";
    type Input = SetNodePoolStatusInput;
    type Output = ();

    async fn execute(&self, input: SetNodePoolStatusInput) -> Result<()> {
        self.node_pools
            .set_node_pool_status(input.cluster_id, &input.name, input.status, &input.message)
            .await
    }
}

// =============================================================================
// Node pools
// =============================================================================

/// Input of [`CreateNodePoolActivity`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNodePoolInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool to provision
    pub node_pool: NodePoolSpec,
}

/// Provisions a node pool in the cloud
pub struct CreateNodePoolActivity {
    store: Arc<dyn Store>,
    infrastructure: Infrastructure,
}

impl CreateNodePoolActivity {
    /// Create the activity
    pub fn new(deps: &ActivityDeps) -> Self {
        Self {
            store: deps.store.clone(),
            infrastructure: deps.infrastructure.clone(),
        }
    }
}

#[async_trait]
impl Activity for CreateNodePoolActivity {
    const NAME: &'static str = "create-node-pool";
    type Input = CreateNodePoolInput;
    type Output = ();

    async fn execute(&self, input: CreateNodePoolInput) -> Result<()> {
        let (cluster, infrastructure) =
            resolve(self.store.as_ref(), &self.infrastructure, input.cluster_id).await?;
        infrastructure.create_node_pool(&cluster, &input.node_pool).await
    }
}

/// Input of [`UpdateNodePoolActivity`]
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNodePoolInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Node pool name
    pub name: String,
    /// Partial update to apply
    pub update: NodePoolUpdate,
}

/// Applies a partial update to a node pool in the cloud and in its record
pub struct UpdateNodePoolActivity {
    store: Arc<dyn Store>,
    node_pools: Arc<dyn NodePoolStore>,
    infrastructure: Infrastructure,
}

impl UpdateNodePoolActivity {
    /// Create the activity
    pub fn new(deps: &ActivityDeps) -> Self {
        Self {
            store: deps.store.clone(),
            node_pools: deps.node_pools.clone(),
            infrastructure: deps.infrastructure.clone(),
        }
    }
}

#[async_trait]
impl Activity for UpdateNodePoolActivity {
    const NAME: &'static str = "update-node-pool";
    type Input = UpdateNodePoolInput;
    type Output = ();

    async fn execute(&self, input: UpdateNodePoolInput) -> Result<()> {
        let (cluster, infrastructure) =
            resolve(self.store.as_ref(), &self.infrastructure, input.cluster_id).await?;
        let record = self
            .node_pools
            .get_node_pool(input.cluster_id, &input.name)
            .await?;
        let desired = record.spec.apply(&input.update)?;

        infrastructure.update_node_pool(&cluster, &desired).await?;
        self.node_pools
            .update_node_pool(input.cluster_id, &desired)
            .await
    }
}

/// Removes a node pool from the cloud
pub struct DeleteNodePoolActivity {
    store: Arc<dyn Store>,
    infrastructure: Infrastructure,
}

impl DeleteNodePoolActivity {
    /// Create the activity
    pub fn new(deps: &ActivityDeps) -> Self {
        Self {
            store: deps.store.clone(),
            infrastructure: deps.infrastructure.clone(),
        }
    }
}

#[async_trait]
impl Activity for DeleteNodePoolActivity {
    const NAME: &'static str = "delete-node-pool";
    type Input = NodePoolInput;
    type Output = ();

    async fn execute(&self, input: NodePoolInput) -> Result<()> {
        let (cluster, infrastructure) =
            resolve(self.store.as_ref(), &self.infrastructure, input.cluster_id).await?;
        infrastructure.delete_node_pool(&cluster, &input.name).await
    }
}

/// Removes a node pool record
pub struct DeleteNodePoolRecordActivity {
    node_pools: Arc<dyn NodePoolStore>,
}

impl DeleteNodePoolRecordActivity {
    /// Create the activity
    pub fn new(node_pools: Arc<dyn NodePoolStore>) -> Self {
        Self { node_pools }
    }
}

#[async_trait]
impl Activity for DeleteNodePoolRecordActivity {
    const NAME: &'static str = "delete-node-pool-record";
    type Input = NodePoolInput;
    type Output = ();

    async fn execute(&self, input: NodePoolInput) -> Result<()> {
        self.node_pools
            .delete_node_pool(input.cluster_id, &input.name)
            .await
    }
}

/// Lists the node pool names of a cluster
pub struct ListNodePoolNamesActivity {
    node_pools: Arc<dyn NodePoolStore>,
}

impl ListNodePoolNamesActivity {
    /// Create the activity
    pub fn new(node_pools: Arc<dyn NodePoolStore>) -> Self {
        Self { node_pools }
    }
}

#[async_trait]
impl Activity for ListNodePoolNamesActivity {
    const NAME: &'static str = "list-node-pool-names";
    type Input = ClusterInput;
    type Output = Vec<String>;

    async fn execute(&self, input: ClusterInput) -> Result<Vec<String>> {
        let records = self.node_pools.list_node_pools(input.cluster_id).await?;
        Ok(records.iter().map(|r| r.name().to_string()).collect())
    }
}

// =============================================================================
// Clusters
// =============================================================================

/// Input of [`UpdateClusterVersionActivity`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateClusterVersionInput {
    /// Cluster ID
    pub cluster_id: u64,
    /// Target Kubernetes version
    pub version: String,
}

/// Upgrades the Kubernetes version of a cluster
pub struct UpdateClusterVersionActivity {
    store: Arc<dyn Store>,
    infrastructure: Infrastructure,
}

impl UpdateClusterVersionActivity {
    /// Create the activity
    pub fn new(deps: &ActivityDeps) -> Self {
        Self {
            store: deps.store.clone(),
            infrastructure: deps.infrastructure.clone(),
        }
    }
}

#[async_trait]
impl Activity for UpdateClusterVersionActivity {
    const NAME: &'static str = "update-cluster-version";
    type Input = UpdateClusterVersionInput;
    type Output = ();

    async fn execute(&self, input: UpdateClusterVersionInput) -> Result<()> {
        let (cluster, infrastructure) =
            resolve(self.store.as_ref(), &self.infrastructure, input.cluster_id).await?;
        if cluster.version == input.version {
            debug!(cluster_id = cluster.id, version = %input.version, "cluster already at version");
            return Ok(());
        }
        infrastructure
            .update_cluster_version(&cluster, &input.version)
            .await?;
        self.store.set_version(cluster.id, &input.version).await
    }
}

/// Removes the cloud resources of a cluster
pub struct DeleteClusterInfrastructureActivity {
    store: Arc<dyn Store>,
    infrastructure: Infrastructure,
}

impl DeleteClusterInfrastructureActivity {
    /// Create the activity
    pub fn new(deps: &ActivityDeps) -> Self {
        Self {
            store: deps.store.clone(),
            infrastructure: deps.infrastructure.clone(),
        }
    }
}

#[async_trait]
impl Activity for DeleteClusterInfrastructureActivity {
    const NAME: &'static str = "delete-cluster-infrastructure";
    type Input = ClusterInput;
    type Output = ();

    async fn execute(&self, input: ClusterInput) -> Result<()> {
        let (cluster, infrastructure) =
            resolve(self.store.as_ref(), &self.infrastructure, input.cluster_id).await?;
        infrastructure.delete_cluster(&cluster).await
    }
}

/// Removes the cluster record
pub struct DeleteClusterRecordActivity {
    store: Arc<dyn Store>,
}

impl DeleteClusterRecordActivity {
    /// Create the activity
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for DeleteClusterRecordActivity {
    const NAME: &'static str = "delete-cluster-record";
    type Input = ClusterInput;
    type Output = ();

    async fn execute(&self, input: ClusterInput) -> Result<()> {
        match self.store.delete_cluster(input.cluster_id).await {
            Err(e) if e.is_not_found() => Ok(()),
            other => other,
        }
    }
}

// =============================================================================
// Operator
// =============================================================================

/// Input of [`ListClusterPageActivity`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListClusterPageInput {
    /// Only IDs greater than this are listed
    pub after: u64,
    /// Maximum number of IDs
    pub limit: usize,
}

/// Lists one page of cluster IDs in ascending order
pub struct ListClusterPageActivity {
    store: Arc<dyn Store>,
}

impl ListClusterPageActivity {
    /// Create the activity
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Activity for ListClusterPageActivity {
    const NAME: &'static str = "list-cluster-page";
    type Input = ListClusterPageInput;
    type Output = Vec<u64>;

    async fn execute(&self, input: ListClusterPageInput) -> Result<Vec<u64>> {
        self.store.list_cluster_ids(input.after, input.limit).await
    }
}

/// Installs the operator on a cluster
///
/// Returns false without installing when the cluster is not ready.
pub struct InstallOperatorActivity {
    store: Arc<dyn Store>,
    installer: Arc<dyn OperatorInstaller>,
}

impl InstallOperatorActivity {
    /// Create the activity
    pub fn new(store: Arc<dyn Store>, installer: Arc<dyn OperatorInstaller>) -> Self {
        Self { store, installer }
    }
}

#[async_trait]
impl Activity for InstallOperatorActivity {
    const NAME: &'static str = "install-operator";
    type Input = ClusterInput;
    type Output = bool;

    async fn execute(&self, input: ClusterInput) -> Result<bool> {
        let cluster = self.store.get_cluster(input.cluster_id).await?;
        if !cluster.status.is_ready() {
            debug!(cluster_id = cluster.id, status = %cluster.status, "skipping operator install");
            return Ok(false);
        }
        self.installer.install(&cluster).await?;
        info!(cluster_id = cluster.id, "operator installed");
        Ok(true)
    }
}
