//! Generic operations of one distribution

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::{
    Cluster, ClusterUpdate, DeleteClusterOptions, RawNodePool, RawNodePoolUpdate, Result,
};
use tracing::debug;

use super::{Manager, NodePoolCodec, Service};
use crate::store::{NodePoolInfo, NodePoolStore};

/// Decodes generic payloads with the distribution's codec and delegates
/// the typed operation to a [`Manager`]
pub struct DistributionService {
    codec: Arc<dyn NodePoolCodec>,
    manager: Arc<dyn Manager>,
    node_pools: Arc<dyn NodePoolStore>,
}

impl DistributionService {
    /// Create a service for one distribution
    pub fn new(
        codec: Arc<dyn NodePoolCodec>,
        manager: Arc<dyn Manager>,
        node_pools: Arc<dyn NodePoolStore>,
    ) -> Self {
        Self {
            codec,
            manager,
            node_pools,
        }
    }
}

#[async_trait]
impl Service for DistributionService {
    fn validate_cluster_update(&self, cluster: &Cluster, update: &ClusterUpdate) -> Result<()> {
        self.codec.decode_cluster_update(cluster, update).map(|_| ())
    }

    async fn update_cluster(&self, cluster: &Cluster, update: &ClusterUpdate) -> Result<()> {
        let update = self.codec.decode_cluster_update(cluster, update)?;
        self.manager.update_cluster(cluster, update).await
    }

    async fn delete_cluster(&self, cluster: &Cluster, options: DeleteClusterOptions) -> Result<()> {
        self.manager.delete_cluster(cluster, options).await
    }

    async fn create_node_pool(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let spec = self.codec.decode_new(node_pool)?;
        debug!(cluster_id = cluster.id, node_pool = ?spec, "node pool decoded");
        self.manager.create_node_pool(cluster, spec).await
    }

    async fn update_node_pool(
        &self,
        cluster: &Cluster,
        name: &str,
        update: &RawNodePoolUpdate,
    ) -> Result<()> {
        let update = self.codec.decode_update(update)?;
        self.manager.update_node_pool(cluster, name, update).await
    }

    async fn delete_node_pool(&self, cluster: &Cluster, name: &str) -> Result<()> {
        self.manager.delete_node_pool(cluster, name).await
    }

    async fn list_node_pools(&self, cluster: &Cluster) -> Result<Vec<NodePoolInfo>> {
        let records = self.node_pools.list_node_pools(cluster.id).await?;
        Ok(records.iter().map(NodePoolInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{EksCodec, MockManager, NodePoolSpec, NodePoolUpdate};
    use crate::store::{MockNodePoolStore, NodePoolRecord, NodePoolStatus};

    fn cluster() -> Cluster {
        Cluster::new(1, 1, "prod", "amazon", "eks")
    }

    fn service(manager: MockManager, node_pools: MockNodePoolStore) -> DistributionService {
        DistributionService::new(Arc::new(EksCodec), Arc::new(manager), Arc::new(node_pools))
    }

    #[tokio::test]
    async fn create_decodes_before_delegating() {
        let mut manager = MockManager::new();
        manager
            .expect_create_node_pool()
            .withf(|cluster, spec| {
                cluster.id == 1 && matches!(spec, NodePoolSpec::Eks(p) if p.name == "pool0")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let pool = RawNodePool::new()
            .with("name", "pool0")
            .with("instanceType", "m5.large");
        service(manager, MockNodePoolStore::new())
            .create_node_pool(&cluster(), &pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn undecodable_payloads_never_reach_the_manager() {
        let mut manager = MockManager::new();
        manager.expect_create_node_pool().never();
        manager.expect_update_node_pool().never();
        manager.expect_update_cluster().never();
        let service = service(manager, MockNodePoolStore::new());

        let err = service
            .create_node_pool(&cluster(), &RawNodePool::new().with("name", "pool0"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let update = RawNodePoolUpdate::new().with("size", "many");
        assert!(service
            .update_node_pool(&cluster(), "pool0", &update)
            .await
            .is_err());

        let update = ClusterUpdate {
            version: Some("latest".to_string()),
        };
        assert!(service.update_cluster(&cluster(), &update).await.is_err());
    }

    #[test]
    fn cluster_updates_are_checked_without_dispatch() {
        let mut manager = MockManager::new();
        manager.expect_update_cluster().never();
        let service = service(manager, MockNodePoolStore::new());

        let valid = ClusterUpdate {
            version: Some("1.30".to_string()),
        };
        service.validate_cluster_update(&cluster(), &valid).unwrap();

        let invalid = ClusterUpdate {
            version: Some("1.30.2".to_string()),
        };
        let err = service
            .validate_cluster_update(&cluster(), &invalid)
            .unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn update_and_delete_are_delegated() {
        let mut manager = MockManager::new();
        manager
            .expect_update_node_pool()
            .withf(|_, name, update| {
                name == "pool0" && matches!(update, NodePoolUpdate::Eks(u) if u.size == Some(5))
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        manager
            .expect_delete_node_pool()
            .withf(|_, name| name == "pool0")
            .times(1)
            .returning(|_, _| Ok(()));
        manager
            .expect_delete_cluster()
            .withf(|_, options| options.force)
            .times(1)
            .returning(|_, _| Ok(()));

        let service = service(manager, MockNodePoolStore::new());
        service
            .update_node_pool(&cluster(), "pool0", &RawNodePoolUpdate::new().with("size", 5))
            .await
            .unwrap();
        service.delete_node_pool(&cluster(), "pool0").await.unwrap();
        service
            .delete_cluster(&cluster(), DeleteClusterOptions { force: true })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn node_pools_are_listed_from_the_store() {
        let mut node_pools = MockNodePoolStore::new();
        node_pools
            .expect_list_node_pools()
            .withf(|cluster_id| *cluster_id == 1)
            .returning(|cluster_id| {
                let spec = EksCodec
                    .decode_new(
                        &RawNodePool::new()
                            .with("name", "pool0")
                            .with("instanceType", "m5.large")
                            .with("spotPrice", "0.2"),
                    )
                    .unwrap();
                let mut record = NodePoolRecord::new(cluster_id, spec);
                record.status = NodePoolStatus::Ready;
                Ok(vec![record])
            });

        let pools = service(MockManager::new(), node_pools)
            .list_node_pools(&cluster())
            .await
            .unwrap();
        assert_eq!(pools.len(), 1);
        assert_eq!(pools[0].name, "pool0");
        assert!(!pools[0].on_demand);
        assert_eq!(pools[0].status, NodePoolStatus::Ready);
        assert_eq!(pools[0].instance_type, "m5.large");
    }
}
