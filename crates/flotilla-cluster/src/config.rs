//! Lifecycle configuration
//!
//! Configuration is read from an optional YAML file and then overridden from
//! the environment. Environment access goes through [`EnvSource`] so tests
//! never touch process-global state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use flotilla_common::DEFAULT_LABEL_DOMAIN;
use flotilla_workflow::{ActivityOptions, RetryPolicy, StartWorkflowOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Overrides the workflow task list
pub const ENV_TASK_LIST: &str = "FLOTILLA_TASK_LIST";
/// Overrides the maximum attempts of every activity
pub const ENV_ACTIVITY_MAX_ATTEMPTS: &str = "FLOTILLA_ACTIVITY_MAX_ATTEMPTS";
/// Overrides the operator installation batch size
pub const ENV_OPERATOR_BATCH_SIZE: &str = "FLOTILLA_OPERATOR_BATCH_SIZE";

/// Errors raised while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid YAML for this schema
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// An environment override could not be parsed
    #[error("invalid value {value:?} for {var}: {message}")]
    Env {
        /// Environment variable name
        var: String,
        /// Raw value
        value: String,
        /// Why it was rejected
        message: String,
    },

    /// A configuration value is out of range
    #[error("invalid configuration {field}: {message}")]
    Invalid {
        /// Dotted field path
        field: &'static str,
        /// Why it was rejected
        message: String,
    },
}

/// Read access to environment variables
#[cfg_attr(test, mockall::automock)]
pub trait EnvSource: Send + Sync {
    /// Value of the variable, if set
    fn var(&self, name: &str) -> Option<String>;
}

/// [`EnvSource`] backed by the process environment
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvSource for OsEnv {
    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Retry settings applied to every activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    /// Delay before the first retry, in milliseconds
    pub initial_interval_ms: u64,
    /// Multiplier applied after every failed attempt
    pub backoff_coefficient: f64,
    /// Upper bound of the delay, in seconds
    pub maximum_interval_secs: u64,
    /// Attempts including the first one
    pub maximum_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2_000,
            backoff_coefficient: 1.5,
            maximum_interval_secs: 30,
            maximum_attempts: 30,
        }
    }
}

/// Activity timeouts
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActivityConfig {
    /// Maximum queue wait of an attempt
    pub schedule_to_start_secs: u64,
    /// Maximum duration of a bookkeeping attempt (status and record updates)
    pub start_to_close_secs: u64,
    /// Maximum duration of an infrastructure attempt
    pub long_running_start_to_close_secs: u64,
    /// Retry settings
    pub retry: RetryConfig,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            schedule_to_start_secs: 600,
            start_to_close_secs: 600,
            long_running_start_to_close_secs: 3_600,
            retry: RetryConfig::default(),
        }
    }
}

/// Workflow settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowConfig {
    /// Task list lifecycle workflows are started on
    pub task_list: String,
    /// Maximum duration of a workflow run, in seconds
    pub execution_timeout_secs: u64,
    /// Clusters handled per run of the operator installation workflow
    pub operator_batch_size: usize,
    /// Activity settings
    pub activity: ActivityConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            task_list: "cluster".to_string(),
            execution_timeout_secs: 3 * 60 * 60,
            operator_batch_size: 50,
            activity: ActivityConfig::default(),
        }
    }
}

/// Node pool settings
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodePoolConfig {
    /// Labels applied to every node pool
    pub common_labels: BTreeMap<String, String>,
    /// Label domain reserved for labels set by flotilla
    pub label_domain: String,
}

impl Default for NodePoolConfig {
    fn default() -> Self {
        Self {
            common_labels: BTreeMap::new(),
            label_domain: DEFAULT_LABEL_DOMAIN.to_string(),
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LifecycleConfig {
    /// Workflow settings
    pub workflow: WorkflowConfig,
    /// Node pool settings
    pub node_pools: NodePoolConfig,
}

impl LifecycleConfig {
    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from an optional file, apply environment overrides and validate
    pub fn load(path: Option<&Path>, env: &dyn EnvSource) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_yaml(&yaml)?
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env(&mut self, env: &dyn EnvSource) -> Result<(), ConfigError> {
        if let Some(task_list) = env.var(ENV_TASK_LIST) {
            self.workflow.task_list = task_list;
        }
        if let Some(value) = env.var(ENV_ACTIVITY_MAX_ATTEMPTS) {
            self.workflow.activity.retry.maximum_attempts =
                parse_env(ENV_ACTIVITY_MAX_ATTEMPTS, value)?;
        }
        if let Some(value) = env.var(ENV_OPERATOR_BATCH_SIZE) {
            self.workflow.operator_batch_size = parse_env(ENV_OPERATOR_BATCH_SIZE, value)?;
        }
        Ok(())
    }

    /// Reject values the lifecycle engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let workflow = &self.workflow;
        let activity = &workflow.activity;
        let retry = &activity.retry;

        if workflow.task_list.trim().is_empty() {
            return Err(invalid("workflow.taskList", "must not be empty"));
        }
        if workflow.execution_timeout_secs == 0 {
            return Err(invalid("workflow.executionTimeoutSecs", "must be positive"));
        }
        if workflow.operator_batch_size == 0 {
            return Err(invalid("workflow.operatorBatchSize", "must be positive"));
        }
        if activity.schedule_to_start_secs == 0 {
            return Err(invalid(
                "workflow.activity.scheduleToStartSecs",
                "must be positive",
            ));
        }
        if activity.start_to_close_secs == 0 {
            return Err(invalid("workflow.activity.startToCloseSecs", "must be positive"));
        }
        if activity.long_running_start_to_close_secs == 0 {
            return Err(invalid(
                "workflow.activity.longRunningStartToCloseSecs",
                "must be positive",
            ));
        }
        if retry.maximum_attempts == 0 {
            return Err(invalid(
                "workflow.activity.retry.maximumAttempts",
                "must be at least 1",
            ));
        }
        if !(retry.backoff_coefficient >= 1.0 && retry.backoff_coefficient.is_finite()) {
            return Err(invalid(
                "workflow.activity.retry.backoffCoefficient",
                format!("must be a finite number >= 1, got {}", retry.backoff_coefficient),
            ));
        }
        if !is_dns_subdomain(&self.node_pools.label_domain) {
            return Err(invalid(
                "nodePools.labelDomain",
                format!("{:?} is not a DNS subdomain", self.node_pools.label_domain),
            ));
        }
        Ok(())
    }

    /// Retry policy of every activity
    pub fn retry_policy(&self) -> RetryPolicy {
        let retry = &self.workflow.activity.retry;
        RetryPolicy {
            initial_interval: Duration::from_millis(retry.initial_interval_ms),
            backoff_coefficient: retry.backoff_coefficient,
            maximum_interval: Duration::from_secs(retry.maximum_interval_secs),
            maximum_attempts: retry.maximum_attempts,
            non_retriable_error_reasons: Vec::new(),
        }
    }

    /// Options of short bookkeeping activities
    pub fn bookkeeping_options(&self) -> ActivityOptions {
        let activity = &self.workflow.activity;
        ActivityOptions::default()
            .schedule_to_start(Duration::from_secs(activity.schedule_to_start_secs))
            .start_to_close(Duration::from_secs(activity.start_to_close_secs))
            .retry_policy(self.retry_policy())
    }

    /// Options of long-running infrastructure activities
    ///
    /// These wait for cancellation so that a canceled workflow never
    /// abandons an infrastructure change half way.
    pub fn infrastructure_options(&self) -> ActivityOptions {
        let activity = &self.workflow.activity;
        ActivityOptions::default()
            .schedule_to_start(Duration::from_secs(activity.schedule_to_start_secs))
            .start_to_close(Duration::from_secs(activity.long_running_start_to_close_secs))
            .wait_for_cancellation(true)
            .retry_policy(self.retry_policy())
    }

    /// Options for starting lifecycle workflows
    pub fn start_options(&self) -> StartWorkflowOptions {
        StartWorkflowOptions::default()
            .task_list(self.workflow.task_list.clone())
            .execution_timeout(Duration::from_secs(self.workflow.execution_timeout_secs))
    }
}

fn parse_env<T>(var: &str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Env {
        var: var.to_string(),
        message: e.to_string(),
        value,
    })
}

fn invalid(field: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        message: message.into(),
    }
}

/// True if `value` is a DNS-1123 subdomain
pub(crate) fn is_dns_subdomain(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 253
        && value.split('.').all(|part| {
            !part.is_empty()
                && part.len() <= 63
                && part
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
                && !part.starts_with('-')
                && !part.ends_with('-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env() -> MockEnvSource {
        let mut env = MockEnvSource::new();
        env.expect_var().returning(|_| None);
        env
    }

    mod parsing {
        use super::*;

        #[test]
        fn empty_document_yields_defaults() {
            let config = LifecycleConfig::from_yaml("").unwrap();
            assert_eq!(config, LifecycleConfig::default());
            assert_eq!(config.workflow.task_list, "cluster");
            assert_eq!(config.workflow.operator_batch_size, 50);
            assert_eq!(config.workflow.activity.retry.maximum_attempts, 30);
            assert_eq!(config.node_pools.label_domain, "flotilla.dev");
        }

        #[test]
        fn partial_document_keeps_other_defaults() {
            let config = LifecycleConfig::from_yaml(
                r#"
workflow:
  taskList: lifecycle
  activity:
    retry:
      maximumAttempts: 5
nodePools:
  commonLabels:
    team: platform
"#,
            )
            .unwrap();

            assert_eq!(config.workflow.task_list, "lifecycle");
            assert_eq!(config.workflow.activity.retry.maximum_attempts, 5);
            assert_eq!(config.workflow.activity.retry.initial_interval_ms, 2_000);
            assert_eq!(config.workflow.activity.start_to_close_secs, 600);
            assert_eq!(
                config.node_pools.common_labels.get("team").map(String::as_str),
                Some("platform")
            );
        }

        #[test]
        fn malformed_document_is_rejected() {
            assert!(matches!(
                LifecycleConfig::from_yaml("workflow: [1, 2]"),
                Err(ConfigError::Parse(_))
            ));
        }
    }

    mod environment {
        use super::*;

        #[test]
        fn overrides_are_applied() {
            let mut env = MockEnvSource::new();
            env.expect_var().returning(|name| match name {
                ENV_TASK_LIST => Some("fleet".to_string()),
                ENV_ACTIVITY_MAX_ATTEMPTS => Some("7".to_string()),
                ENV_OPERATOR_BATCH_SIZE => Some(" 10 ".to_string()),
                _ => None,
            });

            let config = LifecycleConfig::load(None, &env).unwrap();
            assert_eq!(config.workflow.task_list, "fleet");
            assert_eq!(config.workflow.activity.retry.maximum_attempts, 7);
            assert_eq!(config.workflow.operator_batch_size, 10);
        }

        #[test]
        fn unparsable_override_is_reported() {
            let mut env = MockEnvSource::new();
            env.expect_var().returning(|name| {
                (name == ENV_ACTIVITY_MAX_ATTEMPTS).then(|| "many".to_string())
            });

            let err = LifecycleConfig::load(None, &env).unwrap_err();
            assert!(matches!(err, ConfigError::Env { ref var, .. } if var == ENV_ACTIVITY_MAX_ATTEMPTS));
        }

        #[test]
        fn zero_attempts_from_env_fail_validation() {
            let mut env = MockEnvSource::new();
            env.expect_var().returning(|name| {
                (name == ENV_ACTIVITY_MAX_ATTEMPTS).then(|| "0".to_string())
            });

            assert!(matches!(
                LifecycleConfig::load(None, &env),
                Err(ConfigError::Invalid {
                    field: "workflow.activity.retry.maximumAttempts",
                    ..
                })
            ));
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn defaults_are_valid() {
            assert!(LifecycleConfig::load(None, &no_env()).is_ok());
        }

        #[test]
        fn coefficient_below_one_is_rejected() {
            let mut config = LifecycleConfig::default();
            config.workflow.activity.retry.backoff_coefficient = 0.5;
            assert!(config.validate().is_err());
        }

        #[test]
        fn zero_batch_size_is_rejected() {
            let mut config = LifecycleConfig::default();
            config.workflow.operator_batch_size = 0;
            assert!(config.validate().is_err());
        }

        #[test]
        fn malformed_label_domain_is_rejected() {
            let mut config = LifecycleConfig::default();
            config.node_pools.label_domain = "Flotilla_Dev".to_string();
            assert!(config.validate().is_err());
        }
    }

    #[test]
    fn derived_activity_options() {
        let config = LifecycleConfig::default();

        let bookkeeping = config.bookkeeping_options();
        assert_eq!(bookkeeping.start_to_close_timeout, Duration::from_secs(600));
        assert!(!bookkeeping.wait_for_cancellation);
        assert_eq!(bookkeeping.retry_policy.initial_interval, Duration::from_secs(2));

        let infrastructure = config.infrastructure_options();
        assert_eq!(infrastructure.start_to_close_timeout, Duration::from_secs(3_600));
        assert!(infrastructure.wait_for_cancellation);
        assert_eq!(infrastructure.retry_policy.maximum_attempts, 30);

        let start = config.start_options();
        assert_eq!(start.task_list, "cluster");
        assert_eq!(start.execution_timeout, Duration::from_secs(3 * 60 * 60));
    }
}
