//! Persistence seams of the lifecycle engine
//!
//! The engine only talks to storage through these traits. [`crate::memory`]
//! provides in-memory implementations.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flotilla_common::{Cluster, ClusterStatus, NodePool, Result};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::distribution::NodePoolSpec;

/// Provisioning status of a node pool
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodePoolStatus {
    /// Being provisioned
    #[default]
    Creating,
    /// Provisioned and usable
    Ready,
    /// An update is in progress
    Updating,
    /// Being removed
    Deleting,
    /// The last operation failed
    Error,
}

/// Persisted node pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolRecord {
    /// Owning cluster
    pub cluster_id: u64,
    /// Typed node pool
    pub spec: NodePoolSpec,
    /// Provisioning status
    pub status: NodePoolStatus,
    /// Human-readable status detail
    #[serde(default)]
    pub status_message: String,
    /// Creation time of the record
    pub created_at: DateTime<Utc>,
}

impl NodePoolRecord {
    /// A new record in status Creating
    pub fn new(cluster_id: u64, spec: NodePoolSpec) -> Self {
        Self {
            cluster_id,
            spec,
            status: NodePoolStatus::Creating,
            status_message: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Node pool name
    pub fn name(&self) -> &str {
        self.spec.name()
    }
}

/// List view of a node pool
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolInfo {
    /// Node pool name
    pub name: String,
    /// Instance type
    pub instance_type: String,
    /// True unless the nodes are spot instances
    pub on_demand: bool,
    /// Desired number of nodes
    pub size: u32,
    /// Node labels
    pub labels: BTreeMap<String, String>,
    /// Provisioning status
    pub status: NodePoolStatus,
    /// Human-readable status detail
    pub status_message: String,
}

impl From<&NodePoolRecord> for NodePoolInfo {
    fn from(record: &NodePoolRecord) -> Self {
        Self {
            name: record.spec.name().to_string(),
            instance_type: record.spec.instance_type().to_string(),
            on_demand: record.spec.is_on_demand(),
            size: record.spec.size(),
            labels: record.spec.labels(),
            status: record.status,
            status_message: record.status_message.clone(),
        }
    }
}

/// Cluster persistence
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Store: Send + Sync {
    /// Get a cluster by ID; fails with NotFound
    async fn get_cluster(&self, id: u64) -> Result<Cluster>;

    /// Get a cluster by name within an organization; fails with NotFound
    async fn get_cluster_by_name(&self, organization_id: u64, name: &str) -> Result<Cluster>;

    /// Set status and status message, recording the transition
    async fn set_status(&self, id: u64, status: ClusterStatus, message: &str) -> Result<()>;

    /// Record the Kubernetes version of a cluster
    async fn set_version(&self, id: u64, version: &str) -> Result<()>;

    /// IDs greater than `after` in ascending order, at most `limit` of them
    async fn list_cluster_ids(&self, after: u64, limit: usize) -> Result<Vec<u64>>;

    /// Remove the cluster record; removing an absent cluster succeeds
    async fn delete_cluster(&self, id: u64) -> Result<()>;
}

/// Node pool persistence
///
/// The existence of a record is what makes node pool operations idempotent.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodePoolStore: Send + Sync {
    /// Whether a node pool record exists
    async fn node_pool_exists(&self, cluster_id: u64, name: &str) -> Result<bool>;

    /// Persist a new record in status Creating; fails with NodePoolAlreadyExists
    async fn create_node_pool(&self, cluster_id: u64, spec: &NodePoolSpec) -> Result<()>;

    /// Get a record; fails with NodePoolNotFound
    async fn get_node_pool(&self, cluster_id: u64, name: &str) -> Result<NodePoolRecord>;

    /// All records of a cluster, ordered by name
    async fn list_node_pools(&self, cluster_id: u64) -> Result<Vec<NodePoolRecord>>;

    /// Replace the spec of an existing record; fails with NodePoolNotFound
    async fn update_node_pool(&self, cluster_id: u64, spec: &NodePoolSpec) -> Result<()>;

    /// Set the status of an existing record; fails with NodePoolNotFound
    async fn set_node_pool_status(
        &self,
        cluster_id: u64,
        name: &str,
        status: NodePoolStatus,
        message: &str,
    ) -> Result<()>;

    /// Remove a record; removing an absent record succeeds
    async fn delete_node_pool(&self, cluster_id: u64, name: &str) -> Result<()>;
}

/// Guard consulted before a cluster is removed
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterGroupManager: Send + Sync {
    /// Fail if the cluster must not be removed (e.g. it belongs to a group)
    async fn validate_cluster_removal(&self, cluster_id: u64) -> Result<()>;
}
