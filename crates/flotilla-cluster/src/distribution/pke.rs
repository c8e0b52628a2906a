//! PKE on amazon and azure
//!
//! Both clouds share roles and versioning; azure has no spot instances and
//! places nodes in numbered availability zones.

use flotilla_common::nodepool::keys;
use flotilla_common::{Cluster, ClusterUpdate, Error, RawNodePool, RawNodePoolUpdate, Result};
use serde_json::Value;

use super::spec::{
    check_version, sizing_violations, spot_price_violations, volume_size_violations,
    ClusterVersionUpdate, NodePoolSpec, NodePoolUpdate, PkeAwsNodePool, PkeAzureNodePool,
    PkeNodePoolUpdate, PkeRole, DEFAULT_VOLUME_SIZE,
};
use super::NodePoolCodec;

const AZURE_ZONES: [&str; 3] = ["1", "2", "3"];

fn default_roles(node_pool: &mut RawNodePool) {
    let missing = match node_pool.get("roles") {
        None | Some(Value::Null) => true,
        Some(Value::Array(roles)) => roles.is_empty(),
        Some(_) => false,
    };
    if missing {
        node_pool.insert("roles", vec![Value::from("worker")]);
    }
}

fn role_violations(roles: &[PkeRole]) -> Vec<String> {
    let mut sorted = roles.to_vec();
    sorted.sort();
    sorted.dedup();
    if sorted.len() == roles.len() {
        Vec::new()
    } else {
        vec!["roles must not contain duplicates".to_string()]
    }
}

fn decode_pke_update(update: &RawNodePoolUpdate, kind: &str) -> Result<NodePoolUpdate> {
    update.decode::<PkeNodePoolUpdate>(kind).map(NodePoolUpdate::Pke)
}

fn decode_pke_version(update: &ClusterUpdate) -> Result<ClusterVersionUpdate> {
    let version = update
        .version
        .clone()
        .ok_or_else(|| Error::validation("version is required"))?;
    check_version(&version, 3, "major.minor.patch")?;
    Ok(ClusterVersionUpdate { version })
}

/// Node pool rules and defaults of PKE on amazon
#[derive(Clone, Copy, Debug, Default)]
pub struct PkeAwsCodec;

impl NodePoolCodec for PkeAwsCodec {
    fn validate_new(&self, _cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let pool: PkeAwsNodePool = node_pool.decode("pke on amazon")?;

        let mut violations = Vec::new();
        if pool.instance_type.trim().is_empty() {
            violations.push("instanceType is required".to_string());
        }
        violations.extend(spot_price_violations(&pool.spot_price));
        violations.extend(sizing_violations(pool.size, pool.autoscaling.as_ref()));
        violations.extend(volume_size_violations(pool.volume_size));
        violations.extend(role_violations(&pool.roles));

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with("invalid pke node pool", violations))
        }
    }

    fn process_new(&self, _cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        let mut node_pool = node_pool;
        default_roles(&mut node_pool);
        if node_pool.get("volumeSize").and_then(Value::as_u64).unwrap_or(0) == 0 {
            node_pool.insert("volumeSize", DEFAULT_VOLUME_SIZE);
        }
        Ok(node_pool)
    }

    fn decode_new(&self, node_pool: &RawNodePool) -> Result<NodePoolSpec> {
        node_pool.decode("pke on amazon").map(NodePoolSpec::PkeAws)
    }

    fn decode_update(&self, update: &RawNodePoolUpdate) -> Result<NodePoolUpdate> {
        decode_pke_update(update, "pke on amazon")
    }

    fn decode_cluster_update(
        &self,
        _cluster: &Cluster,
        update: &ClusterUpdate,
    ) -> Result<ClusterVersionUpdate> {
        decode_pke_version(update)
    }
}

/// Node pool rules and defaults of PKE on azure
#[derive(Clone, Copy, Debug, Default)]
pub struct PkeAzureCodec;

impl NodePoolCodec for PkeAzureCodec {
    fn validate_new(&self, _cluster: &Cluster, node_pool: &RawNodePool) -> Result<()> {
        let pool: PkeAzureNodePool = node_pool.decode("pke on azure")?;

        let mut violations = Vec::new();
        if pool.instance_type.trim().is_empty() {
            violations.push("instanceType is required".to_string());
        }
        if node_pool
            .get_str(keys::SPOT_PRICE)
            .is_some_and(|price| !price.trim().is_empty())
        {
            violations.push("spot instances are not supported on azure".to_string());
        }
        violations.extend(
            pool.zones
                .iter()
                .filter(|zone| !AZURE_ZONES.contains(&zone.as_str()))
                .map(|zone| format!("zone {zone:?} must be one of 1, 2, 3")),
        );
        violations.extend(sizing_violations(pool.size, pool.autoscaling.as_ref()));
        violations.extend(role_violations(&pool.roles));

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with("invalid pke node pool", violations))
        }
    }

    fn process_new(&self, _cluster: &Cluster, node_pool: RawNodePool) -> Result<RawNodePool> {
        let mut node_pool = node_pool;
        default_roles(&mut node_pool);
        Ok(node_pool)
    }

    fn decode_new(&self, node_pool: &RawNodePool) -> Result<NodePoolSpec> {
        node_pool.decode("pke on azure").map(NodePoolSpec::PkeAzure)
    }

    fn decode_update(&self, update: &RawNodePoolUpdate) -> Result<NodePoolUpdate> {
        decode_pke_update(update, "pke on azure")
    }

    fn decode_cluster_update(
        &self,
        _cluster: &Cluster,
        update: &ClusterUpdate,
    ) -> Result<ClusterVersionUpdate> {
        decode_pke_version(update)
    }
}
