//! Label sources of node pools

use std::collections::BTreeMap;

use flotilla_common::{Cluster, NodePool, RawNodePool, Result};

/// Contributes labels to a new node pool
pub trait NodePoolLabelSource: Send + Sync {
    /// Labels to set on the node pool
    fn labels_for(&self, cluster: &Cluster, node_pool: &RawNodePool)
        -> Result<BTreeMap<String, String>>;
}

/// Fixed labels applied to every node pool
#[derive(Clone, Debug, Default)]
pub struct StaticLabels(BTreeMap<String, String>);

impl StaticLabels {
    /// Create a source of the given labels
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self(labels)
    }
}

impl NodePoolLabelSource for StaticLabels {
    fn labels_for(
        &self,
        _cluster: &Cluster,
        _node_pool: &RawNodePool,
    ) -> Result<BTreeMap<String, String>> {
        Ok(self.0.clone())
    }
}

/// Labels nodes with the name of their node pool
#[derive(Clone, Debug)]
pub struct NodePoolNameLabel {
    key: String,
}

impl NodePoolNameLabel {
    /// `nodepool.<domain>/name`
    pub fn new(domain: &str) -> Self {
        Self {
            key: format!("nodepool.{domain}/name"),
        }
    }
}

impl NodePoolLabelSource for NodePoolNameLabel {
    fn labels_for(
        &self,
        _cluster: &Cluster,
        node_pool: &RawNodePool,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            self.key.clone(),
            node_pool.name().to_string(),
        )]))
    }
}

/// Labels nodes with whether they are on-demand instances
#[derive(Clone, Debug)]
pub struct OnDemandLabel {
    key: String,
}

impl OnDemandLabel {
    /// `node.<domain>/ondemand`
    pub fn new(domain: &str) -> Self {
        Self {
            key: format!("node.{domain}/ondemand"),
        }
    }
}

impl NodePoolLabelSource for OnDemandLabel {
    fn labels_for(
        &self,
        _cluster: &Cluster,
        node_pool: &RawNodePool,
    ) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::from([(
            self.key.clone(),
            node_pool.is_on_demand().to_string(),
        )]))
    }
}
