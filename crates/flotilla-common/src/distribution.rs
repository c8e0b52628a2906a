//! Distribution keys
//!
//! Every distribution implementation is registered under an explicit
//! `(cloud, distribution)` pair, so siblings sharing a distribution name
//! across clouds (e.g., PKE on amazon and on azure) never shadow each other.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Known cloud provider tags
pub mod cloud {
    /// Amazon Web Services
    pub const AMAZON: &str = "amazon";
    /// Microsoft Azure
    pub const AZURE: &str = "azure";
}

/// Known distribution names
pub mod distribution {
    /// Amazon Elastic Kubernetes Service
    pub const EKS: &str = "eks";
    /// Self-hosted Kubernetes installer
    pub const PKE: &str = "pke";
}

/// Registry key of a distribution implementation
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DistributionKey {
    cloud: String,
    distribution: String,
}

impl DistributionKey {
    /// Create a key; use [`DistributionKey::validate`] before registering it
    pub fn new(cloud: impl Into<String>, distribution: impl Into<String>) -> Self {
        Self {
            cloud: cloud.into(),
            distribution: distribution.into(),
        }
    }

    /// Cloud provider tag
    pub fn cloud(&self) -> &str {
        &self.cloud
    }

    /// Distribution name
    pub fn distribution(&self) -> &str {
        &self.distribution
    }

    /// Check that both parts are non-empty lowercase identifiers
    pub fn validate(&self) -> Result<()> {
        let parts = [("cloud", &self.cloud), ("distribution", &self.distribution)];
        let violations: Vec<String> = parts
            .into_iter()
            .filter(|(_, value)| !is_identifier(value))
            .map(|(part, value)| {
                format!("{part} {value:?} must be a non-empty lowercase identifier")
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with(
                format!("malformed distribution key {self}"),
                violations,
            ))
        }
    }
}

fn is_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !value.starts_with('-')
        && !value.ends_with('-')
}

impl fmt::Display for DistributionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.cloud, self.distribution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_formed_keys() {
        assert!(DistributionKey::new(cloud::AMAZON, distribution::EKS)
            .validate()
            .is_ok());
        assert!(DistributionKey::new("vsphere", "pke-2").validate().is_ok());
    }

    #[test]
    fn malformed_keys() {
        assert!(DistributionKey::new("", "eks").validate().is_err());
        assert!(DistributionKey::new("Amazon", "eks").validate().is_err());
        assert!(DistributionKey::new("amazon", "-eks").validate().is_err());

        let err = DistributionKey::new("", "").validate().unwrap_err();
        assert_eq!(err.violations().len(), 2);
    }

    #[test]
    fn same_distribution_on_different_clouds_are_distinct() {
        let aws = DistributionKey::new(cloud::AMAZON, distribution::PKE);
        let azure = DistributionKey::new(cloud::AZURE, distribution::PKE);
        assert_ne!(aws, azure);
        assert_eq!(aws.to_string(), "amazon/pke");
    }
}
