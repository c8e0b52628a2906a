//! Cluster and node pool lifecycle orchestration for flotilla
//!
//! [`ClusterService`] validates and authorizes lifecycle requests, flips the
//! cluster status and dispatches to the cluster's distribution. The
//! distribution decodes the request into typed form and hands it to a
//! [`distribution::Manager`], which starts a durable workflow. The
//! workflows in [`workflow`] carry out the cloud steps and compensate on
//! failure.
//!
//! Related crates:
//! - `flotilla-common`: cluster model, node pool descriptors, errors
//! - `flotilla-workflow`: the durable step-sequence executor abstraction

#![deny(missing_docs)]

pub mod config;
pub mod distribution;
pub mod infrastructure;
pub mod memory;
pub mod nodepool;
pub mod service;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use flotilla_workflow::WorkflowEngine;

pub use config::{ConfigError, EnvSource, LifecycleConfig, NodePoolConfig, OsEnv};
pub use distribution::{
    default_codecs, DistributionRegistry, Manager, NodePoolCodec, NodePoolSpec, NodePoolUpdate,
    Service,
};
pub use infrastructure::{ClusterInfrastructure, OperatorInstaller};
pub use memory::{InMemoryClusterGroups, InMemoryStore};
pub use service::ClusterService;
pub use store::{ClusterGroupManager, NodePoolInfo, NodePoolStatus, NodePoolStore, Store};
pub use workflow::WorkflowManager;

// Re-export common error types
pub use flotilla_common::{Error, Result};

use distribution::{DistributionProcessor, DistributionValidator};
use nodepool::{
    CommonNodePoolProcessor, CommonNodePoolValidator, NodePoolLabelSource, NodePoolNameLabel,
    OnDemandLabel, Processors, StaticLabels, Validators,
};

type Codecs = Arc<DistributionRegistry<Arc<dyn NodePoolCodec>>>;

/// Common checks first, then the rules of the cluster's distribution
pub fn default_validators(config: &NodePoolConfig, codecs: Codecs) -> Validators {
    Validators::new(vec![
        Arc::new(CommonNodePoolValidator::new(config.label_domain.clone())),
        Arc::new(DistributionValidator::new(codecs)),
    ])
}

/// Label merging first, then the defaults of the cluster's distribution
pub fn default_processors(config: &NodePoolConfig, codecs: Codecs) -> Processors {
    let sources: Vec<Arc<dyn NodePoolLabelSource>> = vec![
        Arc::new(StaticLabels::new(config.common_labels.clone())),
        Arc::new(NodePoolNameLabel::new(&config.label_domain)),
        Arc::new(OnDemandLabel::new(&config.label_domain)),
    ];
    Processors::new(vec![
        Arc::new(CommonNodePoolProcessor::new(sources)),
        Arc::new(DistributionProcessor::new(codecs)),
    ])
}

/// Wire a [`ClusterService`] dispatching to workflows on `engine`
pub fn cluster_service(
    config: &LifecycleConfig,
    store: Arc<dyn Store>,
    node_pools: Arc<dyn NodePoolStore>,
    groups: Arc<dyn ClusterGroupManager>,
    engine: Arc<dyn WorkflowEngine>,
) -> Result<ClusterService> {
    let codecs: Codecs = Arc::new(default_codecs()?);
    let manager = Arc::new(WorkflowManager::new(
        engine,
        node_pools.clone(),
        config.start_options(),
    ));
    let services = distribution::services(&codecs, manager, node_pools.clone())?;

    Ok(ClusterService::new(
        store,
        node_pools,
        groups,
        services,
        Arc::new(default_validators(&config.node_pools, codecs.clone())),
        Arc::new(default_processors(&config.node_pools, codecs)),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flotilla_common::{Cluster, NodePool, RawNodePool};
    use nodepool::{NodePoolProcessor, NodePoolValidator};
    use std::collections::BTreeMap;

    fn config() -> NodePoolConfig {
        NodePoolConfig {
            common_labels: BTreeMap::from([("team".to_string(), "platform".to_string())]),
            ..Default::default()
        }
    }

    fn cluster() -> Cluster {
        Cluster::new(1, 1, "prod", "amazon", "eks")
    }

    #[tokio::test]
    async fn validators_union_common_and_distribution_violations() {
        let codecs = Arc::new(default_codecs().unwrap());
        let node_pool = RawNodePool::new().with("name", "Bad_Name");

        let err = default_validators(&config(), codecs)
            .validate_new(&cluster(), &node_pool)
            .await
            .unwrap_err();
        assert!(err.is_validation());
        let violations = err.violations();
        assert!(violations.iter().any(|v| v.contains("DNS label")));
        assert!(violations.iter().any(|v| v.contains("instanceType")));
    }

    #[tokio::test]
    async fn processors_label_then_default() {
        let codecs = Arc::new(default_codecs().unwrap());
        let node_pool = RawNodePool::new()
            .with("name", "pool0")
            .with("instanceType", "m5.large")
            .with("spotPrice", "0.2");

        let processed = default_processors(&config(), codecs)
            .process_new(&cluster(), node_pool)
            .await
            .unwrap();

        let labels = processed.labels();
        assert_eq!(labels["team"], "platform");
        assert_eq!(labels["nodepool.flotilla.dev/name"], "pool0");
        assert_eq!(labels["node.flotilla.dev/ondemand"], "false");
        assert_eq!(processed.get("volumeSize"), Some(&serde_json::json!(50)));
    }
}
