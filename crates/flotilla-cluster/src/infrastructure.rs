//! Cloud plumbing seams
//!
//! Activities drive the cloud through these traits. Implementations are
//! registered per distribution and must be idempotent: an activity may be
//! retried after a partial failure.

use async_trait::async_trait;
use flotilla_common::{Cluster, Result};
#[cfg(test)]
use mockall::automock;

use crate::distribution::NodePoolSpec;

/// Infrastructure operations of one distribution
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterInfrastructure: Send + Sync {
    /// Provision a node pool
    async fn create_node_pool(&self, cluster: &Cluster, node_pool: &NodePoolSpec) -> Result<()>;

    /// Converge a node pool to the desired spec
    async fn update_node_pool(&self, cluster: &Cluster, node_pool: &NodePoolSpec) -> Result<()>;

    /// Remove a node pool; removing an absent node pool succeeds
    async fn delete_node_pool(&self, cluster: &Cluster, name: &str) -> Result<()>;

    /// Upgrade the control plane to a Kubernetes version
    async fn update_cluster_version(&self, cluster: &Cluster, version: &str) -> Result<()>;

    /// Tear down the remaining cluster infrastructure
    async fn delete_cluster(&self, cluster: &Cluster) -> Result<()>;
}

/// Installs the flotilla operator into a cluster
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperatorInstaller: Send + Sync {
    /// Install or upgrade the operator; must be idempotent
    async fn install(&self, cluster: &Cluster) -> Result<()>;
}
