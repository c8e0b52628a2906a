//! Generic cluster and node pool service
//!
//! Entry point for lifecycle requests. Each operation resolves the cluster,
//! checks that its distribution is supported and that it is in an operable
//! status, validates and enriches the request, marks the cluster as busy and
//! hands the work to the distribution's [`Service`], which starts a workflow.
//!
//! The cluster status is an advisory lock only: the checks and the status
//! change are not atomic, so concurrent duplicate requests may both be
//! dispatched. Downstream workflows tolerate this because every step is
//! idempotent.

use std::future::Future;
use std::sync::Arc;

use flotilla_common::{
    status_message, Cluster, ClusterRef, ClusterStatus, ClusterUpdate, DeleteClusterOptions,
    Error, Identifier, NodePool, RawNodePool, RawNodePoolUpdate, Result,
};
use tracing::{debug, error, info, instrument, warn};

use crate::distribution::{DistributionRegistry, Service};
use crate::nodepool::{NodePoolProcessor, NodePoolValidator};
use crate::store::{ClusterGroupManager, NodePoolInfo, NodePoolStore, Store};

/// Generic lifecycle operations on clusters and node pools
pub struct ClusterService {
    store: Arc<dyn Store>,
    node_pools: Arc<dyn NodePoolStore>,
    groups: Arc<dyn ClusterGroupManager>,
    services: DistributionRegistry<Arc<dyn Service>>,
    validator: Arc<dyn NodePoolValidator>,
    processor: Arc<dyn NodePoolProcessor>,
}

impl ClusterService {
    /// Create a service over the given collaborators
    pub fn new(
        store: Arc<dyn Store>,
        node_pools: Arc<dyn NodePoolStore>,
        groups: Arc<dyn ClusterGroupManager>,
        services: DistributionRegistry<Arc<dyn Service>>,
        validator: Arc<dyn NodePoolValidator>,
        processor: Arc<dyn NodePoolProcessor>,
    ) -> Self {
        Self {
            store,
            node_pools,
            groups,
            services,
            validator,
            processor,
        }
    }

    /// Resolve a cluster by ID or name within the caller's organization
    ///
    /// A cluster owned by another organization is reported as not found.
    pub async fn get_cluster(&self, identifier: &Identifier) -> Result<Cluster> {
        match &identifier.cluster {
            ClusterRef::Id(id) => {
                let cluster = self.store.get_cluster(*id).await?;
                if cluster.organization_id != identifier.organization_id {
                    return Err(Error::cluster_not_found(identifier.to_string()));
                }
                Ok(cluster)
            }
            ClusterRef::Name(name) => {
                self.store
                    .get_cluster_by_name(identifier.organization_id, name)
                    .await
            }
        }
    }

    /// Start a cluster update
    #[instrument(skip_all, fields(identifier = %identifier))]
    pub async fn update_cluster(
        &self,
        identifier: &Identifier,
        update: &ClusterUpdate,
    ) -> Result<()> {
        let cluster = self.get_cluster(identifier).await?;
        let service = self.services.lookup(&cluster)?;

        if update.is_empty() {
            debug!(cluster_id = cluster.id, "empty cluster update ignored");
            return Ok(());
        }
        service.validate_cluster_update(&cluster, update)?;

        self.transition(
            &cluster,
            ClusterStatus::Updating,
            status_message::UPDATING_CLUSTER,
            service.update_cluster(&cluster, update),
        )
        .await?;
        info!(cluster_id = cluster.id, version = ?update.version, "cluster update started");
        Ok(())
    }

    /// Start a cluster deletion
    ///
    /// Returns true if the cluster does not exist, false if the deletion was
    /// started and continues in the background.
    #[instrument(skip_all, fields(identifier = %identifier, force = options.force))]
    pub async fn delete_cluster(
        &self,
        identifier: &Identifier,
        options: DeleteClusterOptions,
    ) -> Result<bool> {
        let cluster = match self.get_cluster(identifier).await {
            Ok(cluster) => cluster,
            Err(e) if e.is_not_found() => {
                debug!("cluster already deleted");
                return Ok(true);
            }
            Err(e) => return Err(e),
        };
        let service = self.services.lookup(&cluster)?;

        if let Err(e) = self.groups.validate_cluster_removal(cluster.id).await {
            return Err(Error::cluster_delete_not_permitted(
                cluster.id,
                e.root_message(),
            ));
        }

        self.transition(
            &cluster,
            ClusterStatus::Deleting,
            status_message::DELETING,
            service.delete_cluster(&cluster, options),
        )
        .await?;
        info!(cluster_id = cluster.id, force = options.force, "cluster deletion started");
        Ok(false)
    }

    /// Validate, enrich and start creating a node pool
    #[instrument(skip_all, fields(cluster_id = cluster_id, pool = %node_pool.name()))]
    pub async fn create_node_pool(&self, cluster_id: u64, node_pool: RawNodePool) -> Result<()> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        let service = self.operable(&cluster)?;

        self.validator.validate_new(&cluster, &node_pool).await?;

        let name = node_pool.name().to_string();
        if self.node_pools.node_pool_exists(cluster.id, &name).await? {
            return Err(Error::node_pool_already_exists(cluster.id, name));
        }

        let node_pool = self.processor.process_new(&cluster, node_pool).await?;

        self.transition(
            &cluster,
            ClusterStatus::Updating,
            status_message::CREATING_NODE_POOL,
            service.create_node_pool(&cluster, &node_pool),
        )
        .await?;
        info!(cluster_id = cluster.id, node_pool = %name, "node pool creation started");
        Ok(())
    }

    /// Start updating an existing node pool
    #[instrument(skip(self, update))]
    pub async fn update_node_pool(
        &self,
        cluster_id: u64,
        name: &str,
        update: &RawNodePoolUpdate,
    ) -> Result<()> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        let service = self.operable(&cluster)?;

        if !self.node_pools.node_pool_exists(cluster.id, name).await? {
            return Err(Error::node_pool_not_found(cluster.id, name));
        }

        self.transition(
            &cluster,
            ClusterStatus::Updating,
            status_message::UPDATING_NODE_POOL,
            service.update_node_pool(&cluster, name, update),
        )
        .await?;
        info!(cluster_id = cluster.id, node_pool = %name, "node pool update started");
        Ok(())
    }

    /// Start deleting a node pool
    ///
    /// Returns true if the node pool does not exist, false if the deletion
    /// was started.
    #[instrument(skip(self))]
    pub async fn delete_node_pool(&self, cluster_id: u64, name: &str) -> Result<bool> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        let service = self.operable(&cluster)?;

        if !self.node_pools.node_pool_exists(cluster.id, name).await? {
            debug!(cluster_id = cluster.id, node_pool = %name, "node pool already deleted");
            return Ok(true);
        }

        self.transition(
            &cluster,
            ClusterStatus::Updating,
            status_message::DELETING_NODE_POOL,
            service.delete_node_pool(&cluster, name),
        )
        .await?;
        info!(cluster_id = cluster.id, node_pool = %name, "node pool deletion started");
        Ok(false)
    }

    /// List the node pools of a cluster
    pub async fn list_node_pools(&self, cluster_id: u64) -> Result<Vec<NodePoolInfo>> {
        let cluster = self.store.get_cluster(cluster_id).await?;
        self.services
            .lookup(&cluster)?
            .list_node_pools(&cluster)
            .await
    }

    /// The distribution service of a cluster that may run node pool operations
    fn operable(&self, cluster: &Cluster) -> Result<&Arc<dyn Service>> {
        let service = self.services.lookup(cluster)?;
        if !cluster.status.is_ready() {
            return Err(Error::not_ready(cluster.id, cluster.status));
        }
        Ok(service)
    }

    /// Mark the cluster busy, then dispatch
    ///
    /// The previous status is restored when the dispatch fails, since no
    /// workflow was started that would ever reset it.
    async fn transition<F>(
        &self,
        cluster: &Cluster,
        status: ClusterStatus,
        message: &str,
        dispatch: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        self.store.set_status(cluster.id, status, message).await?;

        if let Err(e) = dispatch.await {
            warn!(cluster_id = cluster.id, error = %e, "dispatch failed, restoring cluster status");
            if let Err(restore) = self
                .store
                .set_status(cluster.id, cluster.status, &cluster.status_message)
                .await
            {
                error!(
                    cluster_id = cluster.id,
                    error = %restore,
                    "failed to restore cluster status"
                );
            }
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::distribution::{
        default_codecs, services, DistributionProcessor, DistributionValidator, MockManager,
        MockService, NodePoolSpec,
    };
    use crate::nodepool::{MockNodePoolProcessor, MockNodePoolValidator};
    use crate::store::{MockClusterGroupManager, MockNodePoolStore, MockStore};
    use flotilla_common::DistributionKey;
    use mockall::predicate::eq;
    use mockall::Sequence;

    fn running(id: u64, distribution: &str) -> Cluster {
        Cluster::new(id, 1, "prod", "amazon", distribution).with_status(ClusterStatus::Running)
    }

    /// Service wired with the real distribution layer over mocks
    struct Harness {
        store: MockStore,
        node_pools: MockNodePoolStore,
        groups: MockClusterGroupManager,
        manager: MockManager,
        list_pools: MockNodePoolStore,
        validator: Option<Arc<dyn NodePoolValidator>>,
        processor: Option<Arc<dyn NodePoolProcessor>>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                store: MockStore::new(),
                node_pools: MockNodePoolStore::new(),
                groups: MockClusterGroupManager::new(),
                manager: MockManager::new(),
                list_pools: MockNodePoolStore::new(),
                validator: None,
                processor: None,
            }
        }

        fn build(self) -> ClusterService {
            let codecs = Arc::new(default_codecs().unwrap());
            let services = services(
                &codecs,
                Arc::new(self.manager),
                Arc::new(self.list_pools),
            )
            .unwrap();
            let validator = self
                .validator
                .unwrap_or_else(|| Arc::new(DistributionValidator::new(codecs.clone())));
            let processor = self
                .processor
                .unwrap_or_else(|| Arc::new(DistributionProcessor::new(codecs.clone())));

            ClusterService::new(
                Arc::new(self.store),
                Arc::new(self.node_pools),
                Arc::new(self.groups),
                services,
                validator,
                processor,
            )
        }
    }

    fn eks_pool() -> RawNodePool {
        RawNodePool::new()
            .with("name", "pool0")
            .with("instanceType", "m5.large")
            .with("size", 1)
    }

    mod resolve {
        use super::*;

        #[tokio::test]
        async fn foreign_cluster_is_not_found() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(Cluster::new(id, 2, "other", "amazon", "eks")));

            let err = h
                .build()
                .get_cluster(&Identifier::by_id(1, 7))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn by_name_within_organization() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster_by_name()
                .with(eq(1), eq("prod"))
                .returning(|_, _| Ok(running(3, "eks")));

            let cluster = h
                .build()
                .get_cluster(&Identifier::by_name(1, "prod"))
                .await
                .unwrap();
            assert_eq!(cluster.id, 3);
        }
    }

    mod delete_cluster {
        use super::*;

        #[tokio::test]
        async fn missing_cluster_is_already_deleted() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .with(eq(99))
                .returning(|_| Err(Error::cluster_not_found("id 99")));
            h.store.expect_set_status().never();
            h.manager.expect_delete_cluster().never();

            let service = h.build();
            for _ in 0..2 {
                let deleted = service
                    .delete_cluster(&Identifier::by_id(1, 99), DeleteClusterOptions::default())
                    .await
                    .unwrap();
                assert!(deleted);
            }
        }

        #[tokio::test]
        async fn deletion_is_started_in_order() {
            let mut h = Harness::new();
            let mut seq = Sequence::new();
            h.store
                .expect_get_cluster()
                .with(eq(1))
                .returning(|id| Ok(running(id, "eks")));
            h.groups
                .expect_validate_cluster_removal()
                .with(eq(1))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_| Ok(()));
            h.store
                .expect_set_status()
                .with(
                    eq(1),
                    eq(ClusterStatus::Deleting),
                    eq("Termination is in progress"),
                )
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_delete_cluster()
                .withf(|cluster, options| cluster.id == 1 && !options.force)
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));

            let deleted = h
                .build()
                .delete_cluster(&Identifier::by_id(1, 1), DeleteClusterOptions::default())
                .await
                .unwrap();
            assert!(!deleted);
        }

        #[tokio::test]
        async fn guard_failure_is_not_permitted() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.groups
                .expect_validate_cluster_removal()
                .returning(|_| Err(Error::validation("cluster is a member of group edge")));
            h.store.expect_set_status().never();
            h.manager.expect_delete_cluster().never();

            let err = h
                .build()
                .delete_cluster(&Identifier::by_id(1, 1), DeleteClusterOptions::default())
                .await
                .unwrap_err();
            assert!(err.is_validation());
            assert!(err.is_service_error());
            assert!(matches!(
                err,
                Error::ClusterDeleteNotPermitted { ref reason, .. } if reason == "cluster is a member of group edge"
            ));
        }

        #[tokio::test]
        async fn failed_dispatch_restores_status() {
            let mut h = Harness::new();
            let mut seq = Sequence::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.groups
                .expect_validate_cluster_removal()
                .returning(|_| Ok(()));
            h.store
                .expect_set_status()
                .with(eq(1), eq(ClusterStatus::Deleting), eq(status_message::DELETING))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_delete_cluster()
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Err(Error::internal("engine unavailable")));
            h.store
                .expect_set_status()
                .with(eq(1), eq(ClusterStatus::Running), eq(""))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));

            let err = h
                .build()
                .delete_cluster(&Identifier::by_id(1, 1), DeleteClusterOptions::default())
                .await
                .unwrap_err();
            assert!(err.is_retryable());
        }
    }

    mod create_node_pool {
        use super::*;

        #[tokio::test]
        async fn unsupported_distribution_fails_before_storage() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "xks")));
            h.node_pools.expect_node_pool_exists().never();
            h.store.expect_set_status().never();

            let err = h
                .build()
                .create_node_pool(1, RawNodePool::new().with("name", "pool0"))
                .await
                .unwrap_err();
            assert!(matches!(err, Error::NotSupportedDistribution { .. }));
        }

        #[tokio::test]
        async fn not_ready_clusters_are_rejected() {
            for status in [
                ClusterStatus::Creating,
                ClusterStatus::Updating,
                ClusterStatus::Deleting,
                ClusterStatus::Error,
            ] {
                let mut h = Harness::new();
                h.store
                    .expect_get_cluster()
                    .returning(move |id| Ok(running(id, "eks").with_status(status)));
                h.store.expect_set_status().never();
                h.node_pools.expect_node_pool_exists().never();
                h.manager.expect_create_node_pool().never();
                h.manager.expect_delete_node_pool().never();

                let service = h.build();
                let err = service.create_node_pool(1, eks_pool()).await.unwrap_err();
                assert!(
                    matches!(err, Error::NotReady { status: s, .. } if s == status),
                    "{status}"
                );
                let err = service.delete_node_pool(1, "pool0").await.unwrap_err();
                assert!(err.is_conflict(), "{status}");
            }
        }

        #[tokio::test]
        async fn violations_are_returned_before_existence_check() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools.expect_node_pool_exists().never();
            let mut validator = MockNodePoolValidator::new();
            validator.expect_validate_new().returning(|_, _| {
                Err(Error::validation_with(
                    "invalid node pool",
                    vec!["a".to_string(), "b".to_string()],
                ))
            });
            h.validator = Some(Arc::new(validator));

            let err = h.build().create_node_pool(1, eks_pool()).await.unwrap_err();
            assert_eq!(err.violations(), ["a", "b"]);
        }

        #[tokio::test]
        async fn existing_node_pool_conflicts() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools
                .expect_node_pool_exists()
                .with(eq(1), eq("pool0"))
                .returning(|_, _| Ok(true));
            h.store.expect_set_status().never();
            h.manager.expect_create_node_pool().never();

            let err = h.build().create_node_pool(1, eks_pool()).await.unwrap_err();
            assert!(err.is_conflict());
            assert!(matches!(err, Error::NodePoolAlreadyExists { .. }));
        }

        #[tokio::test]
        async fn processed_pool_is_dispatched() {
            let mut h = Harness::new();
            let mut seq = Sequence::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks").with_status(ClusterStatus::Warning)));
            h.node_pools
                .expect_node_pool_exists()
                .returning(|_, _| Ok(false));
            let mut processor = MockNodePoolProcessor::new();
            processor
                .expect_process_new()
                .returning(|_, pool| Ok(pool.with("volumeSize", 80)));
            h.processor = Some(Arc::new(processor));
            h.store
                .expect_set_status()
                .with(
                    eq(1),
                    eq(ClusterStatus::Updating),
                    eq(status_message::CREATING_NODE_POOL),
                )
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_create_node_pool()
                .withf(|_, spec| matches!(spec, NodePoolSpec::Eks(p) if p.volume_size == 80))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));

            h.build().create_node_pool(1, eks_pool()).await.unwrap();
        }
    }

    mod node_pool_updates {
        use super::*;

        #[tokio::test]
        async fn missing_node_pool_is_already_deleted() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools
                .expect_node_pool_exists()
                .with(eq(1), eq("pool0"))
                .returning(|_, _| Ok(false));
            h.store.expect_set_status().never();
            h.manager.expect_delete_node_pool().never();

            assert!(h.build().delete_node_pool(1, "pool0").await.unwrap());
        }

        #[tokio::test]
        async fn existing_node_pool_deletion_is_started() {
            let mut h = Harness::new();
            let mut seq = Sequence::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools
                .expect_node_pool_exists()
                .returning(|_, _| Ok(true));
            h.store
                .expect_set_status()
                .with(eq(1), eq(ClusterStatus::Updating), eq("deleting node pool"))
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_delete_node_pool()
                .withf(|cluster, name| cluster.id == 1 && name == "pool0")
                .times(1)
                .in_sequence(&mut seq)
                .returning(|_, _| Ok(()));

            assert!(!h.build().delete_node_pool(1, "pool0").await.unwrap());
        }

        #[tokio::test]
        async fn update_of_missing_node_pool_fails() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools
                .expect_node_pool_exists()
                .returning(|_, _| Ok(false));
            h.manager.expect_update_node_pool().never();

            let err = h
                .build()
                .update_node_pool(1, "pool0", &RawNodePoolUpdate::new().with("size", 2))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }

        #[tokio::test]
        async fn update_is_dispatched() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.node_pools
                .expect_node_pool_exists()
                .returning(|_, _| Ok(true));
            h.store
                .expect_set_status()
                .with(
                    eq(1),
                    eq(ClusterStatus::Updating),
                    eq(status_message::UPDATING_NODE_POOL),
                )
                .times(1)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_update_node_pool()
                .times(1)
                .returning(|_, _, _| Ok(()));

            h.build()
                .update_node_pool(1, "pool0", &RawNodePoolUpdate::new().with("size", 2))
                .await
                .unwrap();
        }
    }

    mod update_cluster {
        use super::*;

        #[tokio::test]
        async fn empty_update_changes_nothing() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.store.expect_set_status().never();
            h.manager.expect_update_cluster().never();

            h.build()
                .update_cluster(&Identifier::by_id(1, 1), &ClusterUpdate::default())
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn version_update_is_dispatched() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster_by_name()
                .returning(|_, _| Ok(running(4, "eks")));
            h.store
                .expect_set_status()
                .with(
                    eq(4),
                    eq(ClusterStatus::Updating),
                    eq(status_message::UPDATING_CLUSTER),
                )
                .times(1)
                .returning(|_, _, _| Ok(()));
            h.manager
                .expect_update_cluster()
                .withf(|cluster, update| cluster.id == 4 && update.version == "1.30")
                .times(1)
                .returning(|_, _| Ok(()));

            let update = ClusterUpdate {
                version: Some("1.30".to_string()),
            };
            h.build()
                .update_cluster(&Identifier::by_name(1, "prod"), &update)
                .await
                .unwrap();
        }

        #[tokio::test]
        async fn invalid_version_leaves_status_untouched() {
            let mut h = Harness::new();
            h.store
                .expect_get_cluster()
                .returning(|id| Ok(running(id, "eks")));
            h.store.expect_set_status().never();
            h.manager.expect_update_cluster().never();

            let update = ClusterUpdate {
                version: Some("1.30.2".to_string()),
            };
            let err = h
                .build()
                .update_cluster(&Identifier::by_id(1, 1), &update)
                .await
                .unwrap_err();
            assert!(err.is_validation());
        }
    }

    #[tokio::test]
    async fn list_errors_propagate_unchanged() {
        let mut service = MockService::new();
        service
            .expect_list_node_pools()
            .returning(|_| Err(Error::provider("throttled")));
        let mut registry: DistributionRegistry<Arc<dyn Service>> = DistributionRegistry::new();
        registry
            .register(DistributionKey::new("amazon", "eks"), Arc::new(service))
            .unwrap();

        let mut store = MockStore::new();
        store
            .expect_get_cluster()
            .returning(|id| Ok(running(id, "eks")));

        let service = ClusterService::new(
            Arc::new(store),
            Arc::new(MockNodePoolStore::new()),
            Arc::new(MockClusterGroupManager::new()),
            registry,
            Arc::new(MockNodePoolValidator::new()),
            Arc::new(MockNodePoolProcessor::new()),
        );
        let err = service.list_node_pools(1).await.unwrap_err();
        assert!(matches!(err, Error::Provider { .. }));
    }
}
