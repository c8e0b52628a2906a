//! Distribution dispatch
//!
//! Every supported `(cloud, distribution)` pair registers a
//! [`NodePoolCodec`] that validates, defaults and decodes node pools for
//! that distribution, and a [`Service`] that executes generic operations.
//! Lookups for unregistered pairs fail with `NotSupportedDistribution`.

mod eks;
mod pke;
mod service;
pub mod spec;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::distribution::{cloud, distribution};
use flotilla_common::{
    Cluster, ClusterUpdate, DeleteClusterOptions, DistributionKey, Error, RawNodePool,
    RawNodePoolUpdate, Result,
};
#[cfg(test)]
use mockall::automock;

pub use eks::EksCodec;
pub use pke::{PkeAwsCodec, PkeAzureCodec};
pub use service::DistributionService;
pub use spec::{ClusterVersionUpdate, NodePoolSpec, NodePoolUpdate};

use crate::nodepool::{NodePoolProcessor, NodePoolValidator};
use crate::store::{NodePoolInfo, NodePoolStore};

/// Implementations keyed by `(cloud, distribution)`
#[derive(Clone)]
pub struct DistributionRegistry<T> {
    entries: BTreeMap<DistributionKey, T>,
}

impl<T> Default for DistributionRegistry<T> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<T> DistributionRegistry<T> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an implementation
    ///
    /// Fails on a malformed key or a key that is already registered.
    pub fn register(&mut self, key: DistributionKey, value: T) -> Result<()> {
        key.validate()?;
        if self.entries.contains_key(&key) {
            return Err(Error::validation(format!(
                "distribution {key} is already registered"
            )));
        }
        self.entries.insert(key, value);
        Ok(())
    }

    /// Implementation registered for the key
    pub fn get(&self, key: &DistributionKey) -> Option<&T> {
        self.entries.get(key)
    }

    /// Implementation for the cluster's distribution
    pub fn lookup(&self, cluster: &Cluster) -> Result<&T> {
        self.get(&cluster.distribution_key()).ok_or_else(|| {
            Error::not_supported_distribution(cluster.id, &cluster.cloud, &cluster.distribution)
        })
    }

    /// Registered keys, sorted
    pub fn keys(&self) -> impl Iterator<Item = &DistributionKey> {
        self.entries.keys()
    }

    /// Registered entries, sorted by key
    pub fn iter(&self) -> impl Iterator<Item = (&DistributionKey, &T)> {
        self.entries.iter()
    }

    /// Number of registered implementations
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Distribution-specific node pool handling
#[cfg_attr(test, automock)]
pub trait NodePoolCodec: Send + Sync {
    /// Check the distribution's rules for a new node pool
    fn validate_new(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()>;

    /// Apply distribution defaults to a new node pool
    fn process_new(&self, cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool>;

    /// Decode a processed node pool
    fn decode_new(&self, node_pool: &RawNodePool) -> Result<NodePoolSpec>;

    /// Decode and check a node pool update
    fn decode_update(&self, update: &RawNodePoolUpdate) -> Result<NodePoolUpdate>;

    /// Decode and check a cluster update
    fn decode_cluster_update(
        &self,
        cluster: &Cluster,
        update: &ClusterUpdate,
    ) -> Result<ClusterVersionUpdate>;
}

/// Generic operations executed by a distribution
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Service: Send + Sync {
    /// Check a cluster update without starting anything
    fn validate_cluster_update(&self, cluster: &Cluster, update: &ClusterUpdate) -> Result<()>;

    /// Start a cluster update
    async fn update_cluster(&self, cluster: &Cluster, update: &ClusterUpdate) -> Result<()>;

    /// Start a cluster deletion
    async fn delete_cluster(&self, cluster: &Cluster, options: DeleteClusterOptions) -> Result<()>;

    /// Start creating a processed node pool
    async fn create_node_pool(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()>;

    /// Start updating a node pool
    async fn update_node_pool(
        &self,
        cluster: &Cluster,
        name: &str,
        update: &RawNodePoolUpdate,
    ) -> Result<()>;

    /// Start deleting a node pool
    async fn delete_node_pool(&self, cluster: &Cluster, name: &str) -> Result<()>;

    /// List the node pools of a cluster
    async fn list_node_pools(&self, cluster: &Cluster) -> Result<Vec<NodePoolInfo>>;
}

/// Starts the asynchronous execution of typed operations
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Manager: Send + Sync {
    /// Start the cluster update workflow
    async fn update_cluster(&self, cluster: &Cluster, update: ClusterVersionUpdate) -> Result<()>;

    /// Start the cluster deletion workflow
    async fn delete_cluster(&self, cluster: &Cluster, options: DeleteClusterOptions) -> Result<()>;

    /// Persist the node pool and start the creation workflow
    async fn create_node_pool(&self, cluster: &Cluster, node_pool: NodePoolSpec) -> Result<()>;

    /// Start the node pool update workflow
    async fn update_node_pool(
        &self,
        cluster: &Cluster,
        name: &str,
        update: NodePoolUpdate,
    ) -> Result<()>;

    /// Start the node pool deletion workflow
    async fn delete_node_pool(&self, cluster: &Cluster, name: &str) -> Result<()>;
}

/// Codecs of every supported distribution
pub fn default_codecs() -> Result<DistributionRegistry<Arc<dyn NodePoolCodec>>> {
    let mut codecs: DistributionRegistry<Arc<dyn NodePoolCodec>> = DistributionRegistry::new();
    codecs.register(
        DistributionKey::new(cloud::AMAZON, distribution::EKS),
        Arc::new(EksCodec),
    )?;
    codecs.register(
        DistributionKey::new(cloud::AMAZON, distribution::PKE),
        Arc::new(PkeAwsCodec),
    )?;
    codecs.register(
        DistributionKey::new(cloud::AZURE, distribution::PKE),
        Arc::new(PkeAzureCodec),
    )?;
    Ok(codecs)
}

/// A [`DistributionService`] for every registered codec
pub fn services(
    codecs: &DistributionRegistry<Arc<dyn NodePoolCodec>>,
    manager: Arc<dyn Manager>,
    node_pools: Arc<dyn NodePoolStore>,
) -> Result<DistributionRegistry<Arc<dyn Service>>> {
    let mut services: DistributionRegistry<Arc<dyn Service>> = DistributionRegistry::new();
    for (key, codec) in codecs.iter() {
        services.register(
            key.clone(),
            Arc::new(DistributionService::new(
                codec.clone(),
                manager.clone(),
                node_pools.clone(),
            )),
        )?;
    }
    Ok(services)
}

/// Runs the codec of the cluster's distribution as a validator
pub struct DistributionValidator {
    codecs: Arc<DistributionRegistry<Arc<dyn NodePoolCodec>>>,
}

impl DistributionValidator {
    /// Create a validator dispatching to `codecs`
    pub fn new(codecs: Arc<DistributionRegistry<Arc<dyn NodePoolCodec>>>) -> Self {
        Self { codecs }
    }
}

#[async_trait]
impl NodePoolValidator for DistributionValidator {
    async fn validate_new(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        self.codecs.lookup(cluster)?.validate_new(cluster, node_pool)
    }
}

/// Runs the codec of the cluster's distribution as a processor
pub struct DistributionProcessor {
    codecs: Arc<DistributionRegistry<Arc<dyn NodePoolCodec>>>,
}

impl DistributionProcessor {
    /// Create a processor dispatching to `codecs`
    pub fn new(codecs: Arc<DistributionRegistry<Arc<dyn NodePoolCodec>>>) -> Self {
        Self { codecs }
    }
}

#[async_trait]
impl NodePoolProcessor for DistributionProcessor {
    async fn process_new(&self, cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        self.codecs.lookup(cluster)?.process_new(cluster, node_pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod registry {
        use super::*;

        #[test]
        fn duplicate_keys_fail_fast() {
            let mut registry = DistributionRegistry::new();
            registry
                .register(DistributionKey::new("amazon", "eks"), 1)
                .unwrap();
            let err = registry
                .register(DistributionKey::new("amazon", "eks"), 2)
                .unwrap_err();
            assert!(err.is_validation());
            assert_eq!(registry.get(&DistributionKey::new("amazon", "eks")), Some(&1));
        }

        #[test]
        fn malformed_keys_are_rejected() {
            let mut registry = DistributionRegistry::new();
            assert!(registry
                .register(DistributionKey::new("Amazon", "eks"), 1)
                .is_err());
            assert!(registry.register(DistributionKey::new("", "eks"), 1).is_err());
            assert!(registry.is_empty());
        }

        #[test]
        fn same_distribution_on_different_clouds() {
            let codecs = default_codecs().unwrap();
            assert_eq!(codecs.len(), 3);

            let aws = Cluster::new(1, 1, "a", "amazon", "pke");
            let azure = Cluster::new(2, 1, "b", "azure", "pke");
            assert!(codecs.lookup(&aws).is_ok());
            assert!(codecs.lookup(&azure).is_ok());
        }

        #[test]
        fn lookup_miss_is_a_bad_request() {
            let codecs = default_codecs().unwrap();
            let cluster = Cluster::new(1, 1, "a", "amazon", "xks");

            let err = codecs.lookup(&cluster).err().unwrap();
            assert!(err.is_bad_request());
            assert!(err.is_service_error());
            assert!(matches!(
                err,
                Error::NotSupportedDistribution { cluster_id: 1, ref distribution, .. } if distribution == "xks"
            ));
        }
    }

    #[tokio::test]
    async fn validator_and_processor_dispatch_by_cluster() {
        let mut codec = MockNodePoolCodec::new();
        codec.expect_validate_new().times(1).returning(|_, _| Ok(()));
        codec
            .expect_process_new()
            .times(1)
            .returning(|_, pool| Ok(pool.with("volumeSize", 50)));

        let mut codecs: DistributionRegistry<Arc<dyn NodePoolCodec>> = DistributionRegistry::new();
        codecs
            .register(DistributionKey::new("amazon", "eks"), Arc::new(codec))
            .unwrap();
        let codecs = Arc::new(codecs);

        let cluster = Cluster::new(1, 1, "a", "amazon", "eks");
        let pool = RawNodePool::new().with("name", "pool0");

        DistributionValidator::new(codecs.clone())
            .validate_new(&cluster, &pool)
            .await
            .unwrap();
        let processed = DistributionProcessor::new(codecs.clone())
            .process_new(&cluster, pool)
            .await
            .unwrap();
        assert!(processed.contains("volumeSize"));

        let unsupported = Cluster::new(2, 1, "b", "azure", "aks");
        assert!(DistributionValidator::new(codecs)
            .validate_new(&unsupported, &RawNodePool::new())
            .await
            .unwrap_err()
            .is_bad_request());
    }
}
