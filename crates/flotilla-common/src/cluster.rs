//! Cluster model
//!
//! A [`Cluster`] is a provisioned Kubernetes cluster owned by an organization.
//! Its status is only ever changed through the store's `set_status`, which
//! records every effective transition as a [`StatusHistory`] entry.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::distribution::DistributionKey;
use crate::{Error, Result};

/// Human-readable status messages set by lifecycle operations
pub mod status_message {
    /// Cluster is operational
    pub const RUNNING: &str = "Cluster is running";
    /// Cluster deletion was accepted
    pub const DELETING: &str = "Termination is in progress";
    /// Cluster version update was accepted
    pub const UPDATING_CLUSTER: &str = "updating cluster";
    /// Node pool creation was accepted
    pub const CREATING_NODE_POOL: &str = "creating node pool";
    /// Node pool update was accepted
    pub const UPDATING_NODE_POOL: &str = "updating node pool";
    /// Node pool deletion was accepted
    pub const DELETING_NODE_POOL: &str = "deleting node pool";
}

/// Cluster lifecycle status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClusterStatus {
    /// Cluster is being created by the creation flow
    #[default]
    Creating,
    /// Cluster is operational
    Running,
    /// A cluster or node pool mutation is in progress
    Updating,
    /// Cluster removal is in progress
    Deleting,
    /// A step failed but the cluster is usable
    Warning,
    /// Terminal failure
    Error,
}

impl ClusterStatus {
    /// Statuses in which node pool operations may start
    pub fn is_ready(self) -> bool {
        matches!(self, ClusterStatus::Running | ClusterStatus::Warning)
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creating => write!(f, "CREATING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Updating => write!(f, "UPDATING"),
            Self::Deleting => write!(f, "DELETING"),
            Self::Warning => write!(f, "WARNING"),
            Self::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for ClusterStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "CREATING" => Ok(Self::Creating),
            "RUNNING" => Ok(Self::Running),
            "UPDATING" => Ok(Self::Updating),
            "DELETING" => Ok(Self::Deleting),
            "WARNING" => Ok(Self::Warning),
            "ERROR" => Ok(Self::Error),
            other => Err(Error::validation(format!(
                "unknown cluster status: {other}"
            ))),
        }
    }
}

/// Reference to an organization-scoped resource (e.g., a secret)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopedId {
    /// Opaque resource ID
    pub id: String,
    /// Organization owning the resource
    pub organization_id: u64,
}

impl ScopedId {
    /// Create a reference owned by the given organization
    pub fn new(organization_id: u64, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            organization_id,
        }
    }
}

/// A provisioned Kubernetes cluster
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cluster {
    /// Numeric ID
    pub id: u64,
    /// Immutable unique identifier
    pub uid: String,
    /// Name, unique within the organization
    pub name: String,
    /// Owning organization
    pub organization_id: u64,
    /// Current lifecycle status
    #[serde(default)]
    pub status: ClusterStatus,
    /// Human-readable status message
    #[serde(default)]
    pub status_message: String,
    /// Cloud provider tag (e.g., "amazon")
    pub cloud: String,
    /// Kubernetes distribution (e.g., "eks", "pke")
    pub distribution: String,
    /// Region or location
    #[serde(default)]
    pub location: String,
    /// Cloud credentials reference
    pub secret_id: ScopedId,
    /// Kubeconfig reference, set once the cluster is reachable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_secret_id: Option<ScopedId>,
    /// Free-form tags
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
    /// Kubernetes version
    #[serde(default)]
    pub version: String,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Cluster {
    /// Create a cluster in Creating status with a fresh UID
    ///
    /// The credentials reference is owned by the same organization.
    pub fn new(
        id: u64,
        organization_id: u64,
        name: impl Into<String>,
        cloud: impl Into<String>,
        distribution: impl Into<String>,
    ) -> Self {
        Self {
            id,
            uid: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            organization_id,
            status: ClusterStatus::Creating,
            status_message: String::new(),
            cloud: cloud.into(),
            distribution: distribution.into(),
            location: String::new(),
            secret_id: ScopedId::new(organization_id, format!("secret-{id}")),
            config_secret_id: None,
            tags: BTreeMap::new(),
            version: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the location and return self for chaining
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Set the status and return self for chaining
    pub fn with_status(mut self, status: ClusterStatus) -> Self {
        self.status = status;
        self
    }

    /// Set the Kubernetes version and return self for chaining
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Key used to resolve the distribution implementation for this cluster
    pub fn distribution_key(&self) -> DistributionKey {
        DistributionKey::new(&self.cloud, &self.distribution)
    }

    /// Check the ownership invariants of the cluster
    pub fn validate(&self) -> Result<()> {
        let mut violations = Vec::new();
        if self.name.is_empty() {
            violations.push("cluster name cannot be empty".to_string());
        }
        if self.secret_id.organization_id != self.organization_id {
            violations.push(format!(
                "secret {} belongs to organization {}, not {}",
                self.secret_id.id, self.secret_id.organization_id, self.organization_id
            ));
        }
        if let Some(config) = &self.config_secret_id {
            if config.organization_id != self.organization_id {
                violations.push(format!(
                    "config secret {} belongs to organization {}, not {}",
                    config.id, config.organization_id, self.organization_id
                ));
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::validation_with("invalid cluster", violations))
        }
    }
}

/// How a cluster is referenced within an organization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClusterRef {
    /// By numeric ID
    Id(u64),
    /// By name
    Name(String),
}

/// Lookup key resolving a cluster by ID or by name within an organization
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    /// Organization the caller acts in
    pub organization_id: u64,
    /// Cluster reference
    pub cluster: ClusterRef,
}

impl Identifier {
    /// Reference a cluster by ID
    pub fn by_id(organization_id: u64, cluster_id: u64) -> Self {
        Self {
            organization_id,
            cluster: ClusterRef::Id(cluster_id),
        }
    }

    /// Reference a cluster by name
    pub fn by_name(organization_id: u64, name: impl Into<String>) -> Self {
        Self {
            organization_id,
            cluster: ClusterRef::Name(name.into()),
        }
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cluster {
            ClusterRef::Id(id) => write!(f, "org {} cluster id {}", self.organization_id, id),
            ClusterRef::Name(name) => {
                write!(f, "org {} cluster name {}", self.organization_id, name)
            }
        }
    }
}

/// Options for cluster deletion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteClusterOptions {
    /// Continue past failing steps instead of aborting
    #[serde(default)]
    pub force: bool,
}

/// Partial cluster update; unset fields mean "no change"
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterUpdate {
    /// Target Kubernetes version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ClusterUpdate {
    /// True if the update changes nothing
    pub fn is_empty(&self) -> bool {
        self.version.is_none()
    }
}

/// Append-only audit record of a status transition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusHistory {
    /// ID of the cluster
    pub cluster_id: u64,
    /// Name of the cluster at the time of the transition
    pub cluster_name: String,
    /// Previous status
    pub from_status: ClusterStatus,
    /// Previous status message
    pub from_status_message: String,
    /// New status
    pub to_status: ClusterStatus,
    /// New status message
    pub to_status_message: String,
    /// When the transition happened
    pub created_at: DateTime<Utc>,
}

impl StatusHistory {
    /// Build the transition record for moving `cluster` to the given status
    ///
    /// Returns None when neither the status nor the message changes.
    pub fn transition(cluster: &Cluster, status: ClusterStatus, message: &str) -> Option<Self> {
        if cluster.status == status && cluster.status_message == message {
            return None;
        }
        Some(Self {
            cluster_id: cluster.id,
            cluster_name: cluster.name.clone(),
            from_status: cluster.status,
            from_status_message: cluster.status_message.clone(),
            to_status: status,
            to_status_message: message.to_string(),
            created_at: Utc::now(),
        })
    }
}
