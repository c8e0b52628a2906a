//! Distribution-independent validation and processing

use std::sync::Arc;

use async_trait::async_trait;
use flotilla_common::{merge_labels, Cluster, Error, NodePool, RawNodePool, Result};
use tracing::debug;

use super::labels::NodePoolLabelSource;
use super::{NodePoolProcessor, NodePoolValidator, INVALID_NODE_POOL};
use crate::config::is_dns_subdomain;

const MAX_NAME_LENGTH: usize = 63;

/// Checks the name and user labels of a node pool
#[derive(Clone, Debug)]
pub struct CommonNodePoolValidator {
    label_domain: String,
}

impl CommonNodePoolValidator {
    /// Create a validator reserving labels under `label_domain`
    pub fn new(label_domain: impl Into<String>) -> Self {
        Self {
            label_domain: label_domain.into(),
        }
    }

    fn is_reserved(&self, key: &str) -> bool {
        let Some((prefix, _)) = key.split_once('/') else {
            return false;
        };
        prefix == self.label_domain || prefix.ends_with(&format!(".{}", self.label_domain))
    }
}

#[async_trait]
impl NodePoolValidator for CommonNodePoolValidator {
    async fn validate_new(&self, _cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let mut violations = Vec::new();

        let name = node_pool.name();
        if name.is_empty() {
            violations.push("name is required".to_string());
        } else if !is_dns_label(name) {
            violations.push(format!(
                "name {name:?} must be a lowercase DNS label of at most {MAX_NAME_LENGTH} characters"
            ));
        }

        match node_pool.try_labels() {
            Ok(labels) => {
                for (key, value) in &labels {
                    if !is_label_key(key) {
                        violations.push(format!("label key {key:?} is malformed"));
                    } else if self.is_reserved(key) {
                        violations.push(format!(
                            "label key {key:?} uses the reserved domain {}",
                            self.label_domain
                        ));
                    }
                    if !is_label_value(value) {
                        violations.push(format!("label value {value:?} of {key:?} is malformed"));
                    }
                }
            }
            Err(e) => violations.extend(e.violations().iter().cloned()),
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with(INVALID_NODE_POOL, violations))
        }
    }
}

/// Merges labels from the configured sources on top of the user's labels
pub struct CommonNodePoolProcessor {
    sources: Vec<Arc<dyn NodePoolLabelSource>>,
}

impl CommonNodePoolProcessor {
    /// Sources are applied in order; the last one wins on conflicting keys
    pub fn new(sources: Vec<Arc<dyn NodePoolLabelSource>>) -> Self {
        Self { sources }
    }
}

#[async_trait]
impl NodePoolProcessor for CommonNodePoolProcessor {
    async fn process_new(&self, cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        let mut node_pool = node_pool;
        let mut sources = vec![node_pool.try_labels()?];
        for source in &self.sources {
            sources.push(source.labels_for(cluster, &node_pool)?);
        }
        let labels = merge_labels(sources);
        debug!(
            cluster_id = cluster.id,
            node_pool = %node_pool.name(),
            labels = labels.len(),
            "node pool labels merged"
        );
        node_pool.set_labels(labels);
        Ok(node_pool)
    }
}

fn is_dns_label(value: &str) -> bool {
    value.len() <= MAX_NAME_LENGTH
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

fn is_label_name(value: &str) -> bool {
    value.len() <= 63
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && value.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

fn is_label_key(key: &str) -> bool {
    match key.split_once('/') {
        Some((prefix, name)) => is_dns_subdomain(prefix) && is_label_name(name),
        None => is_label_name(key),
    }
}

fn is_label_value(value: &str) -> bool {
    value.is_empty() || is_label_name(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodepool::{NodePoolNameLabel, OnDemandLabel, StaticLabels};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn cluster() -> Cluster {
        Cluster::new(1, 1, "prod", "amazon", "eks")
    }

    fn validator() -> CommonNodePoolValidator {
        CommonNodePoolValidator::new("flotilla.dev")
    }

    mod validation {
        use super::*;

        #[tokio::test]
        async fn well_formed_pool_passes() {
            let pool = RawNodePool::new()
                .with("name", "pool-0")
                .with("labels", json!({"team": "platform", "example.com/tier": "web"}));
            assert!(validator().validate_new(&cluster(), &pool).await.is_ok());
        }

        #[tokio::test]
        async fn missing_name_is_reported() {
            let err = validator()
                .validate_new(&cluster(), &RawNodePool::new())
                .await
                .unwrap_err();
            assert_eq!(err.violations(), ["name is required"]);
        }

        #[tokio::test]
        async fn every_violation_is_reported() {
            let pool = RawNodePool::new().with("name", "Pool_0").with(
                "labels",
                json!({"nodepool.flotilla.dev/name": "x", "bad key!": "ok", "team": "-bad-"}),
            );
            let err = validator().validate_new(&cluster(), &pool).await.unwrap_err();
            assert_eq!(err.violations().len(), 4);
        }

        #[tokio::test]
        async fn reserved_domain_is_rejected() {
            let pool = RawNodePool::new()
                .with("name", "pool0")
                .with("labels", json!({"flotilla.dev/owner": "me"}));
            let err = validator().validate_new(&cluster(), &pool).await.unwrap_err();
            assert!(err.violations()[0].contains("reserved domain"));
        }

        #[tokio::test]
        async fn non_string_labels_are_reported() {
            let pool = RawNodePool::new()
                .with("name", "pool0")
                .with("labels", json!({"size": 3}));
            let err = validator().validate_new(&cluster(), &pool).await.unwrap_err();
            assert_eq!(err.violations().len(), 1);
        }
    }

    #[tokio::test]
    async fn sources_are_merged_over_user_labels() {
        let processor = CommonNodePoolProcessor::new(vec![
            Arc::new(StaticLabels::new(BTreeMap::from([
                ("team".to_string(), "platform".to_string()),
                ("env".to_string(), "prod".to_string()),
            ]))),
            Arc::new(NodePoolNameLabel::new("flotilla.dev")),
            Arc::new(OnDemandLabel::new("flotilla.dev")),
        ]);
        let pool = RawNodePool::new()
            .with("name", "pool0")
            .with("spotPrice", "0.1")
            .with("labels", json!({"team": "data", "app": "db"}));

        let processed = processor.process_new(&cluster(), pool).await.unwrap();
        let labels = processed.labels();
        assert_eq!(labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(labels.get("app").map(String::as_str), Some("db"));
        assert_eq!(
            labels.get("nodepool.flotilla.dev/name").map(String::as_str),
            Some("pool0")
        );
        assert_eq!(
            labels.get("node.flotilla.dev/ondemand").map(String::as_str),
            Some("false")
        );
    }
}
