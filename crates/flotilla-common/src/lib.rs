//! Common types for flotilla: cluster model, node pool descriptors, errors and telemetry

#![deny(missing_docs)]

pub mod cluster;
pub mod distribution;
pub mod error;
pub mod nodepool;
pub mod telemetry;

pub use cluster::{
    status_message, Cluster, ClusterRef, ClusterStatus, ClusterUpdate, DeleteClusterOptions,
    Identifier, ScopedId, StatusHistory,
};
pub use distribution::DistributionKey;
pub use error::Error;
pub use nodepool::{merge_labels, NodePool, RawNodePool, RawNodePoolUpdate};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default domain for labels managed by flotilla itself
pub const DEFAULT_LABEL_DOMAIN: &str = "flotilla.dev";
