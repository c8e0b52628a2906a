//! Node pool validation and processing chains
//!
//! A node pool descriptor passes every [`NodePoolValidator`] before anything
//! is persisted; then the [`NodePoolProcessor`]s enrich it in order. Common
//! processing (labels) runs before distribution-specific defaulting.

mod common;
mod labels;

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::{Cluster, Error, RawNodePool, Result};
#[cfg(test)]
use mockall::automock;

pub use common::{CommonNodePoolProcessor, CommonNodePoolValidator};
pub use labels::{NodePoolLabelSource, NodePoolNameLabel, OnDemandLabel, StaticLabels};

/// Message of the aggregated validation error
pub const INVALID_NODE_POOL: &str = "invalid node pool";

/// Validates a new node pool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodePoolValidator: Send + Sync {
    /// Fail with a Validation error listing every violation found
    async fn validate_new(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()>;
}

/// Enriches a new node pool
#[cfg_attr(test, automock)]
#[async_trait]
pub trait NodePoolProcessor: Send + Sync {
    /// Return the processed node pool
    async fn process_new(&self, cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool>;
}

/// Runs every validator and unions their violations
#[derive(Clone, Default)]
pub struct Validators(Vec<Arc<dyn NodePoolValidator>>);

impl Validators {
    /// Compose validators; they run in the given order
    pub fn new(validators: Vec<Arc<dyn NodePoolValidator>>) -> Self {
        Self(validators)
    }
}

#[async_trait]
impl NodePoolValidator for Validators {
    async fn validate_new(&self, cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let mut violations = Vec::new();
        for validator in &self.0 {
            match validator.validate_new(cluster, node_pool).await {
                Ok(()) => {}
                Err(Error::Validation {
                    violations: found, ..
                }) => violations.extend(found),
                Err(e) => return Err(e),
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with(INVALID_NODE_POOL, violations))
        }
    }
}

/// Threads a node pool through every processor in order
#[derive(Clone, Default)]
pub struct Processors(Vec<Arc<dyn NodePoolProcessor>>);

impl Processors {
    /// Compose processors; later processors see earlier enrichments
    pub fn new(processors: Vec<Arc<dyn NodePoolProcessor>>) -> Self {
        Self(processors)
    }
}

#[async_trait]
impl NodePoolProcessor for Processors {
    async fn process_new(&self, cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        let mut node_pool = node_pool;
        for processor in &self.0 {
            node_pool = processor.process_new(cluster, node_pool).await?;
        }
        Ok(node_pool)
    }
}
