//! In-memory stores
//!
//! Used by the operator CLI and by tests. State lives behind `parking_lot`
//! locks that are never held across an await point.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use flotilla_common::{Cluster, ClusterStatus, Error, NodePool, Result, StatusHistory};
use parking_lot::RwLock;
use tracing::debug;

use crate::distribution::NodePoolSpec;
use crate::store::{ClusterGroupManager, NodePoolRecord, NodePoolStatus, NodePoolStore, Store};

#[derive(Default)]
struct State {
    clusters: BTreeMap<u64, Cluster>,
    node_pools: BTreeMap<(u64, String), NodePoolRecord>,
    history: Vec<StatusHistory>,
}

/// Cluster and node pool store kept in memory
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster; names are unique per organization and IDs are unique
    pub fn insert_cluster(&self, cluster: Cluster) -> Result<()> {
        cluster.validate()?;
        let mut state = self.state.write();
        if state.clusters.contains_key(&cluster.id) {
            return Err(Error::validation(format!(
                "cluster {} already exists",
                cluster.id
            )));
        }
        if state
            .clusters
            .values()
            .any(|c| c.organization_id == cluster.organization_id && c.name == cluster.name)
        {
            return Err(Error::validation(format!(
                "cluster name {} is already used in organization {}",
                cluster.name, cluster.organization_id
            )));
        }
        state.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    /// Recorded status transitions, oldest first
    pub fn status_history(&self, cluster_id: u64) -> Vec<StatusHistory> {
        self.state
            .read()
            .history
            .iter()
            .filter(|h| h.cluster_id == cluster_id)
            .cloned()
            .collect()
    }

    /// Whether a cluster record exists
    pub fn contains_cluster(&self, id: u64) -> bool {
        self.state.read().clusters.contains_key(&id)
    }
}

fn cluster_not_found(id: u64) -> Error {
    Error::cluster_not_found(format!("id {id}"))
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get_cluster(&self, id: u64) -> Result<Cluster> {
        self.state
            .read()
            .clusters
            .get(&id)
            .cloned()
            .ok_or_else(|| cluster_not_found(id))
    }

    async fn get_cluster_by_name(&self, organization_id: u64, name: &str) -> Result<Cluster> {
        self.state
            .read()
            .clusters
            .values()
            .find(|c| c.organization_id == organization_id && c.name == name)
            .cloned()
            .ok_or_else(|| {
                Error::cluster_not_found(format!("name {name} in organization {organization_id}"))
            })
    }

    async fn set_status(&self, id: u64, status: ClusterStatus, message: &str) -> Result<()> {
        let mut state = self.state.write();
        let cluster = state.clusters.get_mut(&id).ok_or_else(|| cluster_not_found(id))?;
        let Some(transition) = StatusHistory::transition(cluster, status, message) else {
            return Ok(());
        };
        cluster.status = status;
        cluster.status_message = message.to_string();
        debug!(
            cluster_id = id,
            from = %transition.from_status,
            to = %transition.to_status,
            "cluster status changed"
        );
        state.history.push(transition);
        Ok(())
    }

    async fn set_version(&self, id: u64, version: &str) -> Result<()> {
        let mut state = self.state.write();
        let cluster = state.clusters.get_mut(&id).ok_or_else(|| cluster_not_found(id))?;
        cluster.version = version.to_string();
        Ok(())
    }

    async fn list_cluster_ids(&self, after: u64, limit: usize) -> Result<Vec<u64>> {
        Ok(self
            .state
            .read()
            .clusters
            .range(after.saturating_add(1)..)
            .take(limit)
            .map(|(id, _)| *id)
            .collect())
    }

    async fn delete_cluster(&self, id: u64) -> Result<()> {
        let mut state = self.state.write();
        state.clusters.remove(&id);
        state.node_pools.retain(|(cluster_id, _), _| *cluster_id != id);
        Ok(())
    }
}

#[async_trait]
impl NodePoolStore for InMemoryStore {
    async fn node_pool_exists(&self, cluster_id: u64, name: &str) -> Result<bool> {
        Ok(self
            .state
            .read()
            .node_pools
            .contains_key(&(cluster_id, name.to_string())))
    }

    async fn create_node_pool(&self, cluster_id: u64, spec: &NodePoolSpec) -> Result<()> {
        let mut state = self.state.write();
        if !state.clusters.contains_key(&cluster_id) {
            return Err(cluster_not_found(cluster_id));
        }
        let key = (cluster_id, spec.name().to_string());
        if state.node_pools.contains_key(&key) {
            return Err(Error::node_pool_already_exists(cluster_id, spec.name()));
        }
        state
            .node_pools
            .insert(key, NodePoolRecord::new(cluster_id, spec.clone()));
        Ok(())
    }

    async fn get_node_pool(&self, cluster_id: u64, name: &str) -> Result<NodePoolRecord> {
        self.state
            .read()
            .node_pools
            .get(&(cluster_id, name.to_string()))
            .cloned()
            .ok_or_else(|| Error::node_pool_not_found(cluster_id, name))
    }

    async fn list_node_pools(&self, cluster_id: u64) -> Result<Vec<NodePoolRecord>> {
        Ok(self
            .state
            .read()
            .node_pools
            .iter()
            .filter(|((id, _), _)| *id == cluster_id)
            .map(|(_, record)| record.clone())
            .collect())
    }

    async fn update_node_pool(&self, cluster_id: u64, spec: &NodePoolSpec) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .node_pools
            .get_mut(&(cluster_id, spec.name().to_string()))
            .ok_or_else(|| Error::node_pool_not_found(cluster_id, spec.name()))?;
        record.spec = spec.clone();
        Ok(())
    }

    async fn set_node_pool_status(
        &self,
        cluster_id: u64,
        name: &str,
        status: NodePoolStatus,
        message: &str,
    ) -> Result<()> {
        let mut state = self.state.write();
        let record = state
            .node_pools
            .get_mut(&(cluster_id, name.to_string()))
            .ok_or_else(|| Error::node_pool_not_found(cluster_id, name))?;
        record.status = status;
        record.status_message = message.to_string();
        Ok(())
    }

    async fn delete_node_pool(&self, cluster_id: u64, name: &str) -> Result<()> {
        self.state
            .write()
            .node_pools
            .remove(&(cluster_id, name.to_string()));
        Ok(())
    }
}

/// Cluster group membership kept in memory
///
/// A cluster that is a member of any group may not be removed.
#[derive(Default)]
pub struct InMemoryClusterGroups {
    groups: RwLock<BTreeMap<String, BTreeSet<u64>>>,
}

impl InMemoryClusterGroups {
    /// Create an empty group registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cluster to a group
    pub fn add_member(&self, group: impl Into<String>, cluster_id: u64) {
        self.groups
            .write()
            .entry(group.into())
            .or_default()
            .insert(cluster_id);
    }

    /// Remove a cluster from a group
    pub fn remove_member(&self, group: &str, cluster_id: u64) {
        if let Some(members) = self.groups.write().get_mut(group) {
            members.remove(&cluster_id);
        }
    }
}

#[async_trait]
impl ClusterGroupManager for InMemoryClusterGroups {
    async fn validate_cluster_removal(&self, cluster_id: u64) -> Result<()> {
        let groups: Vec<String> = self
            .groups
            .read()
            .iter()
            .filter(|(_, members)| members.contains(&cluster_id))
            .map(|(name, _)| name.clone())
            .collect();

        if groups.is_empty() {
            Ok(())
        } else {
            Err(Error::cluster_delete_not_permitted(
                cluster_id,
                format!("cluster is a member of cluster group(s) {}", groups.join(", ")),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::spec::{EksNodePool, NodePoolSpec};
    use flotilla_common::status_message;

    fn cluster(id: u64, name: &str) -> Cluster {
        Cluster::new(id, 1, name, "amazon", "eks").with_status(ClusterStatus::Running)
    }

    fn pool(name: &str) -> NodePoolSpec {
        NodePoolSpec::Eks(EksNodePool {
            name: name.to_string(),
            instance_type: "m5.large".to_string(),
            spot_price: String::new(),
            size: 1,
            autoscaling: None,
            volume_size: 50,
            image: None,
            subnet_id: None,
            labels: BTreeMap::new(),
        })
    }

    mod clusters {
        use super::*;

        #[test]
        fn names_are_unique_per_organization() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();
            assert!(store.insert_cluster(cluster(2, "prod")).is_err());
            assert!(store.insert_cluster(cluster(1, "other")).is_err());

            let other_org = Cluster::new(3, 2, "prod", "amazon", "eks");
            assert!(store.insert_cluster(other_org).is_ok());
        }

        #[tokio::test]
        async fn lookup_by_id_and_name() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();

            assert_eq!(store.get_cluster(1).await.unwrap().name, "prod");
            assert_eq!(store.get_cluster_by_name(1, "prod").await.unwrap().id, 1);
            assert!(store.get_cluster(2).await.unwrap_err().is_not_found());
            assert!(store
                .get_cluster_by_name(2, "prod")
                .await
                .unwrap_err()
                .is_not_found());
        }

        #[tokio::test]
        async fn history_is_recorded_only_for_changes() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();

            store
                .set_status(1, ClusterStatus::Updating, status_message::CREATING_NODE_POOL)
                .await
                .unwrap();
            store
                .set_status(1, ClusterStatus::Updating, status_message::CREATING_NODE_POOL)
                .await
                .unwrap();
            store
                .set_status(1, ClusterStatus::Running, status_message::RUNNING)
                .await
                .unwrap();

            let history = store.status_history(1);
            assert_eq!(history.len(), 2);
            assert_eq!(history[0].from_status, ClusterStatus::Running);
            assert_eq!(history[0].to_status, ClusterStatus::Updating);
            assert_eq!(history[1].to_status_message, status_message::RUNNING);
        }

        #[tokio::test]
        async fn id_pages_are_ordered() {
            let store = InMemoryStore::new();
            for id in [5, 1, 3, 2, 4] {
                store.insert_cluster(cluster(id, &format!("c{id}"))).unwrap();
            }
            assert_eq!(store.list_cluster_ids(0, 2).await.unwrap(), vec![1, 2]);
            assert_eq!(store.list_cluster_ids(2, 2).await.unwrap(), vec![3, 4]);
            assert_eq!(store.list_cluster_ids(4, 2).await.unwrap(), vec![5]);
            assert!(store.list_cluster_ids(5, 2).await.unwrap().is_empty());
        }

        #[tokio::test]
        async fn deleting_cluster_removes_node_pools() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();
            store.create_node_pool(1, &pool("pool0")).await.unwrap();

            store.delete_cluster(1).await.unwrap();
            store.delete_cluster(1).await.unwrap();
            assert!(!store.contains_cluster(1));
            assert!(store.list_node_pools(1).await.unwrap().is_empty());
        }
    }

    mod node_pools {
        use super::*;

        #[tokio::test]
        async fn create_conflicts_on_duplicate_name() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();

            store.create_node_pool(1, &pool("pool0")).await.unwrap();
            let err = store.create_node_pool(1, &pool("pool0")).await.unwrap_err();
            assert!(err.is_conflict());
            assert!(store.node_pool_exists(1, "pool0").await.unwrap());
        }

        #[tokio::test]
        async fn status_updates_require_a_record() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();
            store.create_node_pool(1, &pool("pool0")).await.unwrap();

            store
                .set_node_pool_status(1, "pool0", NodePoolStatus::Ready, "")
                .await
                .unwrap();
            assert_eq!(
                store.get_node_pool(1, "pool0").await.unwrap().status,
                NodePoolStatus::Ready
            );

            let err = store
                .set_node_pool_status(1, "pool1", NodePoolStatus::Ready, "")
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn delete_is_idempotent() {
            let store = InMemoryStore::new();
            store.insert_cluster(cluster(1, "prod")).unwrap();
            store.create_node_pool(1, &pool("pool0")).await.unwrap();

            store.delete_node_pool(1, "pool0").await.unwrap();
            store.delete_node_pool(1, "pool0").await.unwrap();
            assert!(!store.node_pool_exists(1, "pool0").await.unwrap());
        }
    }

    #[tokio::test]
    async fn group_members_cannot_be_removed() {
        let groups = InMemoryClusterGroups::new();
        groups.add_member("edge", 1);

        let err = groups.validate_cluster_removal(1).await.unwrap_err();
        assert!(matches!(err, Error::ClusterDeleteNotPermitted { cluster_id: 1, .. }));
        assert!(groups.validate_cluster_removal(2).await.is_ok());

        groups.remove_member("edge", 1);
        assert!(groups.validate_cluster_removal(1).await.is_ok());
    }
}
