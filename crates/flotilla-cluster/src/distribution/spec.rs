//! Typed node pools of the supported distributions
//!
//! Node pools arrive as unstructured [`RawNodePool`](flotilla_common::RawNodePool)
//! descriptors and are decoded into one variant of [`NodePoolSpec`] by the
//! distribution's codec once common and distribution processing are done.

use std::collections::BTreeMap;

use flotilla_common::nodepool::spot_price_is_on_demand;
use flotilla_common::{Error, NodePool, Result};
use serde::{Deserialize, Serialize};

/// Smallest root volume accepted for amazon node pools, in GiB
pub const MIN_VOLUME_SIZE: u32 = 20;
/// Root volume size applied when none is requested, in GiB
pub const DEFAULT_VOLUME_SIZE: u32 = 50;

/// Autoscaling bounds of a node pool
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Autoscaling {
    /// Whether the cluster autoscaler manages the pool
    pub enabled: bool,
    /// Lower bound of the pool size
    #[serde(default)]
    pub min_size: u32,
    /// Upper bound of the pool size
    #[serde(default)]
    pub max_size: u32,
}

/// Role of a PKE node
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PkeRole {
    /// Control plane node
    Master,
    /// Worker node
    Worker,
}

/// EKS node pool
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksNodePool {
    /// Node pool name
    pub name: String,
    /// EC2 instance type
    pub instance_type: String,
    /// Maximum spot price; empty or zero means on-demand
    #[serde(default)]
    pub spot_price: String,
    /// Desired number of nodes
    #[serde(default)]
    pub size: u32,
    /// Autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Root volume size in GiB (0 = default)
    #[serde(default)]
    pub volume_size: u32,
    /// Node image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Subnet the nodes are placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_id: Option<String>,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// PKE node pool on amazon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkeAwsNodePool {
    /// Node pool name
    pub name: String,
    /// EC2 instance type
    pub instance_type: String,
    /// Maximum spot price; empty or zero means on-demand
    #[serde(default)]
    pub spot_price: String,
    /// Desired number of nodes
    #[serde(default)]
    pub size: u32,
    /// Autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Root volume size in GiB (0 = default)
    #[serde(default)]
    pub volume_size: u32,
    /// Node roles
    #[serde(default)]
    pub roles: Vec<PkeRole>,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// PKE node pool on azure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkeAzureNodePool {
    /// Node pool name
    pub name: String,
    /// VM size
    pub instance_type: String,
    /// Desired number of nodes
    #[serde(default)]
    pub size: u32,
    /// Autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Availability zones
    #[serde(default)]
    pub zones: Vec<String>,
    /// Node roles
    #[serde(default)]
    pub roles: Vec<PkeRole>,
    /// Node labels
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A node pool decoded for its distribution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", content = "nodePool", rename_all = "camelCase")]
pub enum NodePoolSpec {
    /// EKS on amazon
    Eks(EksNodePool),
    /// PKE on amazon
    PkeAws(PkeAwsNodePool),
    /// PKE on azure
    PkeAzure(PkeAzureNodePool),
}

impl NodePool for NodePoolSpec {
    fn name(&self) -> &str {
        match self {
            NodePoolSpec::Eks(p) => &p.name,
            NodePoolSpec::PkeAws(p) => &p.name,
            NodePoolSpec::PkeAzure(p) => &p.name,
        }
    }

    fn instance_type(&self) -> &str {
        match self {
            NodePoolSpec::Eks(p) => &p.instance_type,
            NodePoolSpec::PkeAws(p) => &p.instance_type,
            NodePoolSpec::PkeAzure(p) => &p.instance_type,
        }
    }

    fn is_on_demand(&self) -> bool {
        match self {
            NodePoolSpec::Eks(p) => spot_price_is_on_demand(&p.spot_price),
            NodePoolSpec::PkeAws(p) => spot_price_is_on_demand(&p.spot_price),
            NodePoolSpec::PkeAzure(_) => true,
        }
    }

    fn labels(&self) -> BTreeMap<String, String> {
        match self {
            NodePoolSpec::Eks(p) => p.labels.clone(),
            NodePoolSpec::PkeAws(p) => p.labels.clone(),
            NodePoolSpec::PkeAzure(p) => p.labels.clone(),
        }
    }
}

/// Partial update of an EKS node pool; unset fields are left unchanged
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EksNodePoolUpdate {
    /// New desired size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// New autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// New root volume size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_size: Option<u32>,
    /// New node image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Labels to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// Partial update of a PKE node pool; unset fields are left unchanged
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkeNodePoolUpdate {
    /// New desired size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u32>,
    /// New autoscaling bounds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autoscaling: Option<Autoscaling>,
    /// Labels to add or overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

/// A node pool update decoded for its distribution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "distribution", content = "update", rename_all = "camelCase")]
pub enum NodePoolUpdate {
    /// EKS update
    Eks(EksNodePoolUpdate),
    /// PKE update (amazon and azure)
    Pke(PkeNodePoolUpdate),
}

/// Kubernetes version upgrade of a cluster
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterVersionUpdate {
    /// Target Kubernetes version
    pub version: String,
}

impl NodePoolSpec {
    /// Apply a partial update, returning the desired node pool
    pub fn apply(&self, update: &NodePoolUpdate) -> Result<NodePoolSpec> {
        let updated = match (self, update) {
            (NodePoolSpec::Eks(pool), NodePoolUpdate::Eks(update)) => {
                let mut pool = pool.clone();
                if let Some(size) = update.size {
                    pool.size = size;
                }
                if let Some(autoscaling) = &update.autoscaling {
                    pool.autoscaling = Some(autoscaling.clone());
                }
                if let Some(volume_size) = update.volume_size {
                    pool.volume_size = volume_size;
                }
                if let Some(image) = &update.image {
                    pool.image = Some(image.clone());
                }
                if let Some(labels) = &update.labels {
                    pool.labels.extend(labels.clone());
                }
                NodePoolSpec::Eks(pool)
            }
            (NodePoolSpec::PkeAws(pool), NodePoolUpdate::Pke(update)) => {
                let mut pool = pool.clone();
                apply_pke(&mut pool.size, &mut pool.autoscaling, &mut pool.labels, update);
                NodePoolSpec::PkeAws(pool)
            }
            (NodePoolSpec::PkeAzure(pool), NodePoolUpdate::Pke(update)) => {
                let mut pool = pool.clone();
                apply_pke(&mut pool.size, &mut pool.autoscaling, &mut pool.labels, update);
                NodePoolSpec::PkeAzure(pool)
            }
            _ => {
                return Err(Error::validation(format!(
                    "update does not match the distribution of node pool {}",
                    self.name()
                )))
            }
        };

        let violations = sizing_violations(updated.size(), updated.autoscaling());
        if violations.is_empty() {
            Ok(updated)
        } else {
            Err(Error::validation_with("invalid node pool update", violations))
        }
    }

    /// Desired number of nodes
    pub fn size(&self) -> u32 {
        match self {
            NodePoolSpec::Eks(p) => p.size,
            NodePoolSpec::PkeAws(p) => p.size,
            NodePoolSpec::PkeAzure(p) => p.size,
        }
    }

    /// Autoscaling bounds, if any
    pub fn autoscaling(&self) -> Option<&Autoscaling> {
        match self {
            NodePoolSpec::Eks(p) => p.autoscaling.as_ref(),
            NodePoolSpec::PkeAws(p) => p.autoscaling.as_ref(),
            NodePoolSpec::PkeAzure(p) => p.autoscaling.as_ref(),
        }
    }
}

fn apply_pke(
    size: &mut u32,
    autoscaling: &mut Option<Autoscaling>,
    labels: &mut BTreeMap<String, String>,
    update: &PkeNodePoolUpdate,
) {
    if let Some(new_size) = update.size {
        *size = new_size;
    }
    if let Some(new_autoscaling) = &update.autoscaling {
        *autoscaling = Some(new_autoscaling.clone());
    }
    if let Some(new_labels) = &update.labels {
        labels.extend(new_labels.clone());
    }
}

// =============================================================================
// Shared validation rules
// =============================================================================

/// Violations of the size and autoscaling bounds
pub(crate) fn sizing_violations(size: u32, autoscaling: Option<&Autoscaling>) -> Vec<String> {
    let mut violations = Vec::new();
    if let Some(autoscaling) = autoscaling.filter(|a| a.enabled) {
        if autoscaling.max_size == 0 {
            violations.push("autoscaling maxSize must be positive".to_string());
        }
        if autoscaling.min_size > autoscaling.max_size {
            violations.push(format!(
                "autoscaling minSize {} exceeds maxSize {}",
                autoscaling.min_size, autoscaling.max_size
            ));
        } else if size < autoscaling.min_size || size > autoscaling.max_size {
            violations.push(format!(
                "size {size} is outside the autoscaling bounds [{}, {}]",
                autoscaling.min_size, autoscaling.max_size
            ));
        }
    }
    violations
}

/// Violations of a spot price
pub(crate) fn spot_price_violations(spot_price: &str) -> Vec<String> {
    let trimmed = spot_price.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    match trimmed.parse::<f64>() {
        Ok(price) if price >= 0.0 && price.is_finite() => Vec::new(),
        _ => vec![format!("spot price {spot_price:?} must be a non-negative number")],
    }
}

/// Violations of a root volume size (0 selects the default)
pub(crate) fn volume_size_violations(volume_size: u32) -> Vec<String> {
    if volume_size != 0 && volume_size < MIN_VOLUME_SIZE {
        vec![format!(
            "volume size {volume_size} GiB is below the minimum of {MIN_VOLUME_SIZE} GiB"
        )]
    } else {
        Vec::new()
    }
}

/// Check a dotted numeric version with the given number of components
pub(crate) fn check_version(version: &str, components: usize, format: &str) -> Result<()> {
    let parts: Vec<&str> = version.trim_start_matches('v').split('.').collect();
    let well_formed = parts.len() == components
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if well_formed {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "version {version:?} must have the form {format}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eks_pool() -> EksNodePool {
        EksNodePool {
            name: "pool0".to_string(),
            instance_type: "m5.large".to_string(),
            spot_price: String::new(),
            size: 2,
            autoscaling: Some(Autoscaling {
                enabled: true,
                min_size: 1,
                max_size: 3,
            }),
            volume_size: 50,
            image: None,
            subnet_id: None,
            labels: BTreeMap::from([("team".to_string(), "a".to_string())]),
        }
    }

    mod apply {
        use super::*;

        #[test]
        fn eks_update_overrides_set_fields_only() {
            let spec = NodePoolSpec::Eks(eks_pool());
            let update = NodePoolUpdate::Eks(EksNodePoolUpdate {
                size: Some(3),
                labels: Some(BTreeMap::from([("tier".to_string(), "web".to_string())])),
                ..Default::default()
            });

            let NodePoolSpec::Eks(updated) = spec.apply(&update).unwrap() else {
                panic!("distribution changed");
            };
            assert_eq!(updated.size, 3);
            assert_eq!(updated.volume_size, 50);
            assert_eq!(updated.labels.len(), 2);
        }

        #[test]
        fn update_outside_bounds_is_rejected() {
            let spec = NodePoolSpec::Eks(eks_pool());
            let update = NodePoolUpdate::Eks(EksNodePoolUpdate {
                size: Some(10),
                ..Default::default()
            });
            let err = spec.apply(&update).unwrap_err();
            assert!(err.is_validation());
        }

        #[test]
        fn mismatched_distribution_is_rejected() {
            let spec = NodePoolSpec::Eks(eks_pool());
            let update = NodePoolUpdate::Pke(PkeNodePoolUpdate::default());
            assert!(spec.apply(&update).unwrap_err().is_validation());
        }
    }

    mod rules {
        use super::*;

        #[test]
        fn sizing() {
            let bounds = Autoscaling {
                enabled: true,
                min_size: 2,
                max_size: 1,
            };
            assert_eq!(sizing_violations(1, Some(&bounds)).len(), 1);
            assert!(sizing_violations(100, None).is_empty());

            let disabled = Autoscaling {
                enabled: false,
                ..bounds
            };
            assert!(sizing_violations(100, Some(&disabled)).is_empty());
        }

        #[test]
        fn spot_prices() {
            assert!(spot_price_violations("").is_empty());
            assert!(spot_price_violations("0.04").is_empty());
            assert_eq!(spot_price_violations("cheap").len(), 1);
            assert_eq!(spot_price_violations("-1").len(), 1);
        }

        #[test]
        fn volume_sizes() {
            assert!(volume_size_violations(0).is_empty());
            assert!(volume_size_violations(20).is_empty());
            assert_eq!(volume_size_violations(8).len(), 1);
        }

        #[test]
        fn versions() {
            assert!(check_version("1.29", 2, "major.minor").is_ok());
            assert!(check_version("v1.29", 2, "major.minor").is_ok());
            assert!(check_version("1.29.3", 2, "major.minor").is_err());
            assert!(check_version("1.29.3", 3, "major.minor.patch").is_ok());
            assert!(check_version("1.x.3", 3, "major.minor.patch").is_err());
        }
    }

    #[test]
    fn capabilities_of_typed_pools() {
        let mut pool = eks_pool();
        pool.spot_price = "0.2".to_string();
        let spec = NodePoolSpec::Eks(pool);
        assert_eq!(spec.name(), "pool0");
        assert_eq!(spec.instance_type(), "m5.large");
        assert!(!spec.is_on_demand());

        let azure = NodePoolSpec::PkeAzure(PkeAzureNodePool {
            name: "pool1".to_string(),
            instance_type: "Standard_B2s".to_string(),
            size: 1,
            autoscaling: None,
            zones: vec!["1".to_string()],
            roles: vec![PkeRole::Worker],
            labels: BTreeMap::new(),
        });
        assert!(azure.is_on_demand());
    }
}
