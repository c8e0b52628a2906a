//! Error types for cluster lifecycle operations
//!
//! Errors are structured with fields to aid debugging in production. The
//! first group of variants are service errors: they are caused by the
//! caller's input or the current state of a cluster, are surfaced verbatim
//! and are never retried by the workflow layer. The remaining variants are
//! infrastructure faults which may be retried.

use thiserror::Error;

use crate::cluster::ClusterStatus;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Stable error reasons, usable in retry policies to mark errors non-retriable
pub mod reason {
    /// Resource is absent
    pub const NOT_FOUND: &str = "NotFound";
    /// Cluster is not in an operable status
    pub const NOT_READY: &str = "NotReady";
    /// No implementation is registered for the cluster's distribution
    pub const NOT_SUPPORTED_DISTRIBUTION: &str = "NotSupportedDistribution";
    /// Input failed validation
    pub const VALIDATION: &str = "Validation";
    /// A node pool with the same name already exists
    pub const NODE_POOL_ALREADY_EXISTS: &str = "NodePoolAlreadyExists";
    /// The node pool does not exist
    pub const NODE_POOL_NOT_FOUND: &str = "NodePoolNotFound";
    /// The removal guard rejected a cluster deletion
    pub const CLUSTER_DELETE_NOT_PERMITTED: &str = "ClusterDeleteNotPermitted";
    /// Payload could not be (de)serialized
    pub const SERIALIZATION: &str = "Serialization";
    /// Infrastructure provider failure
    pub const PROVIDER: &str = "Provider";
    /// Internal failure
    pub const INTERNAL: &str = "Internal";
}

/// Main error type for cluster lifecycle operations
#[derive(Debug, Error)]
pub enum Error {
    /// A resource could not be found
    #[error("{resource} not found: {message}")]
    NotFound {
        /// Kind of resource (e.g., "cluster")
        resource: String,
        /// Which resource was looked up
        message: String,
    },

    /// The cluster is not in an operable status
    #[error("cluster {cluster_id} is not ready (status: {status})")]
    NotReady {
        /// ID of the cluster
        cluster_id: u64,
        /// Status the cluster was found in
        status: ClusterStatus,
    },

    /// No implementation is registered for the cluster's (cloud, distribution)
    #[error("{message}: cluster {cluster_id} ({cloud}/{distribution})")]
    NotSupportedDistribution {
        /// ID of the cluster
        cluster_id: u64,
        /// Cloud provider tag of the cluster
        cloud: String,
        /// Distribution of the cluster
        distribution: String,
        /// Description of the failure
        message: String,
    },

    /// Input failed validation
    #[error("{message}")]
    Validation {
        /// Summary of what was being validated
        message: String,
        /// Individual violations, in the order they were found
        violations: Vec<String>,
    },

    /// A node pool with the same name already exists in the cluster
    #[error("node pool {name} already exists in cluster {cluster_id}")]
    NodePoolAlreadyExists {
        /// ID of the cluster
        cluster_id: u64,
        /// Name of the node pool
        name: String,
    },

    /// The node pool does not exist in the cluster
    #[error("node pool {name} not found in cluster {cluster_id}")]
    NodePoolNotFound {
        /// ID of the cluster
        cluster_id: u64,
        /// Name of the node pool
        name: String,
    },

    /// The cluster removal guard rejected the deletion
    #[error("deleting cluster {cluster_id} is not permitted: {reason}")]
    ClusterDeleteNotPermitted {
        /// ID of the cluster
        cluster_id: u64,
        /// Why removal was refused
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The payload kind being serialized (if known)
        kind: Option<String>,
    },

    /// Infrastructure provider error
    #[error("provider error [{provider}] for {cluster}: {message}")]
    Provider {
        /// Name of the cluster being operated on
        cluster: String,
        /// Distribution or cloud that failed
        provider: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "store", "workflow", "registry")
        context: String,
    },
}

impl Error {
    /// Create a not-found error for the given resource kind
    pub fn not_found(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for a cluster
    pub fn cluster_not_found(msg: impl Into<String>) -> Self {
        Self::not_found("cluster", msg)
    }

    /// Create a not-ready error for a cluster in the given status
    pub fn not_ready(cluster_id: u64, status: ClusterStatus) -> Self {
        Self::NotReady { cluster_id, status }
    }

    /// Create an error for a cluster whose distribution has no implementation
    pub fn not_supported_distribution(
        cluster_id: u64,
        cloud: impl Into<String>,
        distribution: impl Into<String>,
    ) -> Self {
        Self::NotSupportedDistribution {
            cluster_id,
            cloud: cloud.into(),
            distribution: distribution.into(),
            message: "not supported distribution".to_string(),
        }
    }

    /// Create a node-pool-already-exists conflict
    pub fn node_pool_already_exists(cluster_id: u64, name: impl Into<String>) -> Self {
        Self::NodePoolAlreadyExists {
            cluster_id,
            name: name.into(),
        }
    }

    /// Create a node-pool-not-found error
    pub fn node_pool_not_found(cluster_id: u64, name: impl Into<String>) -> Self {
        Self::NodePoolNotFound {
            cluster_id,
            name: name.into(),
        }
    }

    /// Create a cluster-delete-not-permitted error
    pub fn cluster_delete_not_permitted(cluster_id: u64, reason: impl Into<String>) -> Self {
        Self::ClusterDeleteNotPermitted {
            cluster_id,
            reason: reason.into(),
        }
    }

    /// Create a validation error with a single violation
    pub fn validation(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        Self::Validation {
            violations: vec![msg.clone()],
            message: msg,
        }
    }

    /// Create a validation error carrying a list of violations
    pub fn validation_with(msg: impl Into<String>, violations: Vec<String>) -> Self {
        Self::Validation {
            message: msg.into(),
            violations,
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with payload kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a provider error with the given message
    ///
    /// For simple provider errors without full context.
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider {
            cluster: UNKNOWN_CONTEXT.to_string(),
            provider: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a provider error with full context
    pub fn provider_for(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable provider error (e.g., quota or configuration error)
    pub fn provider_permanent(
        cluster: impl Into<String>,
        provider: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provider {
            cluster: cluster.into(),
            provider: provider.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// True if the error is caused by the caller (a "client error")
    ///
    /// Service errors are surfaced verbatim and must never be retried.
    pub fn is_service_error(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::NotReady { .. }
                | Error::NotSupportedDistribution { .. }
                | Error::Validation { .. }
                | Error::NodePoolAlreadyExists { .. }
                | Error::NodePoolNotFound { .. }
                | Error::ClusterDeleteNotPermitted { .. }
        )
    }

    /// True if the error means the resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. } | Error::NodePoolNotFound { .. })
    }

    /// True if the error is a conflict with the current state
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::NotReady { .. } | Error::NodePoolAlreadyExists { .. }
        )
    }

    /// True if the request can never be served as issued
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Error::NotSupportedDistribution { .. })
    }

    /// True if the error carries validation violations
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::Validation { .. } | Error::ClusterDeleteNotPermitted { .. }
        )
    }

    /// Validation violations, empty for other kinds
    pub fn violations(&self) -> &[String] {
        match self {
            Error::Validation { violations, .. } => violations,
            _ => &[],
        }
    }

    /// Check if this error is retryable
    ///
    /// Service errors and serialization errors are never retryable.
    /// Provider errors carry their own flag, internal errors are retryable.
    pub fn is_retryable(&self) -> bool {
        if self.is_service_error() {
            return false;
        }
        match self {
            Error::Provider { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
            _ => false,
        }
    }

    /// Stable reason of this error, see [`reason`]
    pub fn reason(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => reason::NOT_FOUND,
            Error::NotReady { .. } => reason::NOT_READY,
            Error::NotSupportedDistribution { .. } => reason::NOT_SUPPORTED_DISTRIBUTION,
            Error::Validation { .. } => reason::VALIDATION,
            Error::NodePoolAlreadyExists { .. } => reason::NODE_POOL_ALREADY_EXISTS,
            Error::NodePoolNotFound { .. } => reason::NODE_POOL_NOT_FOUND,
            Error::ClusterDeleteNotPermitted { .. } => reason::CLUSTER_DELETE_NOT_PERMITTED,
            Error::Serialization { .. } => reason::SERIALIZATION,
            Error::Provider { .. } => reason::PROVIDER,
            Error::Internal { .. } => reason::INTERNAL,
        }
    }

    /// The underlying message without the variant's context prefix
    ///
    /// Used as the human-readable status message when a workflow escalates
    /// a cluster to Warning or Error.
    pub fn root_message(&self) -> String {
        match self {
            Error::Validation {
                message,
                violations,
            } if !repeats_message(message, violations) => {
                format!("{}: {}", message, violations.join(", "))
            }
            Error::Validation { message, .. }
            | Error::Serialization { message, .. }
            | Error::Provider { message, .. }
            | Error::Internal { message, .. } => message.clone(),
            Error::ClusterDeleteNotPermitted { reason, .. } => reason.clone(),
            other => other.to_string(),
        }
    }
}

/// True if the violations add nothing to the message
fn repeats_message(message: &str, violations: &[String]) -> bool {
    match violations {
        [] => true,
        [only] => only == message,
        _ => false,
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod classification {
        use super::*;

        #[test]
        fn service_errors_are_never_retried() {
            let errors = vec![
                Error::cluster_not_found("id 1"),
                Error::not_ready(1, ClusterStatus::Creating),
                Error::NotSupportedDistribution {
                    cluster_id: 1,
                    cloud: "amazon".into(),
                    distribution: "xks".into(),
                    message: "not supported distribution".into(),
                },
                Error::validation("bad"),
                Error::NodePoolAlreadyExists {
                    cluster_id: 1,
                    name: "pool0".into(),
                },
                Error::NodePoolNotFound {
                    cluster_id: 1,
                    name: "pool0".into(),
                },
                Error::ClusterDeleteNotPermitted {
                    cluster_id: 1,
                    reason: "member of group".into(),
                },
            ];

            for err in errors {
                assert!(err.is_service_error(), "{err} should be a service error");
                assert!(!err.is_retryable(), "{err} should not be retryable");
            }
        }

        #[test]
        fn capability_tags() {
            assert!(Error::cluster_not_found("x").is_not_found());
            assert!(Error::not_ready(1, ClusterStatus::Updating).is_conflict());
            assert!(Error::NodePoolAlreadyExists {
                cluster_id: 1,
                name: "p".into()
            }
            .is_conflict());
            assert!(Error::NodePoolNotFound {
                cluster_id: 1,
                name: "p".into()
            }
            .is_not_found());
            assert!(Error::NotSupportedDistribution {
                cluster_id: 1,
                cloud: "amazon".into(),
                distribution: "xks".into(),
                message: "not supported".into(),
            }
            .is_bad_request());
            assert!(Error::validation("x").is_validation());
            assert!(Error::ClusterDeleteNotPermitted {
                cluster_id: 1,
                reason: "x".into()
            }
            .is_validation());
        }

        #[test]
        fn infrastructure_errors() {
            assert!(Error::provider("timeout").is_retryable());
            assert!(!Error::provider_permanent("c", "eks", "quota").is_retryable());
            assert!(Error::internal("oops").is_retryable());
            assert!(!Error::serialization("parse").is_retryable());
            assert!(!Error::provider("timeout").is_service_error());
        }
    }

    mod messages {
        use super::*;

        #[test]
        fn root_message_strips_context() {
            let err = Error::provider_for("prod", "eks", "stack rollback");
            assert!(err.to_string().contains("[eks]"));
            assert_eq!(err.root_message(), "stack rollback");

            let err = Error::internal_with_context("store", "connection reset");
            assert_eq!(err.root_message(), "connection reset");
        }

        #[test]
        fn root_message_includes_violations() {
            let err = Error::validation_with(
                "invalid node pool",
                vec!["name is required".into(), "size must be positive".into()],
            );
            assert_eq!(
                err.root_message(),
                "invalid node pool: name is required, size must be positive"
            );
            assert_eq!(Error::validation("just one").root_message(), "just one");
        }

        #[test]
        fn violations_accessor() {
            let err = Error::validation_with("m", vec!["a".into(), "b".into()]);
            assert_eq!(err.violations(), ["a", "b"]);
            assert!(Error::internal("x").violations().is_empty());
        }

        #[test]
        fn reasons_are_stable() {
            assert_eq!(Error::validation("x").reason(), "Validation");
            assert_eq!(Error::provider("x").reason(), "Provider");
            assert_eq!(Error::cluster_not_found("x").reason(), "NotFound");
        }
    }
}
