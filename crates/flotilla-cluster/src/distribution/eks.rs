//! EKS on amazon

use flotilla_common::{Cluster, ClusterUpdate, Error, RawNodePool, RawNodePoolUpdate, Result};

use super::spec::{
    check_version, sizing_violations, spot_price_violations, volume_size_violations,
    ClusterVersionUpdate, EksNodePool, EksNodePoolUpdate, NodePoolSpec, NodePoolUpdate,
    DEFAULT_VOLUME_SIZE,
};
use super::NodePoolCodec;

const KIND: &str = "eks";

/// Node pool rules and defaults of EKS
#[derive(Clone, Copy, Debug, Default)]
pub struct EksCodec;

impl NodePoolCodec for EksCodec {
    fn validate_new(&self, _cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let pool: EksNodePool = node_pool.decode(KIND)?;

        let mut violations = Vec::new();
        if pool.instance_type.trim().is_empty() {
            violations.push("instanceType is required".to_string());
        }
        violations.extend(spot_price_violations(&pool.spot_price));
        violations.extend(sizing_violations(pool.size, pool.autoscaling.as_ref()));
        violations.extend(volume_size_violations(pool.volume_size));

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with("invalid eks node pool", violations))
        }
    }

    fn process_new(&self, _cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        let mut node_pool = node_pool;
        let volume_size = node_pool
            .get("volumeSize")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        if volume_size == 0 {
            node_pool.insert("volumeSize", DEFAULT_VOLUME_SIZE);
        }
        Ok(node_pool)
    }

    fn decode_new(&self, node_pool: &RawNodePool) -> Result<NodePoolSpec> {
        node_pool.decode(KIND).map(NodePoolSpec::Eks)
    }

    fn decode_update(&self, update: &RawNodePoolUpdate) -> Result<NodePoolUpdate> {
        let update: EksNodePoolUpdate = update.decode(KIND)?;
        let violations = update
            .volume_size
            .map(volume_size_violations)
            .unwrap_or_default();
        if violations.is_empty() {
            Ok(NodePoolUpdate::Eks(update))
        } else {
            Err(Error::validation_with("invalid eks node pool update", violations))
        }
    }

    fn decode_cluster_update(
        &self,
        _cluster: &Cluster,
        update: &ClusterUpdate,
    ) -> Result<ClusterVersionUpdate> {
        let version = update
            .version
            .clone()
            .ok_or_else(|| Error::validation("version is required"))?;
        check_version(&version, 2, "major.minor")?;
        Ok(ClusterVersionUpdate { version })
    }
}
