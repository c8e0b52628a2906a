//! flotilla - cluster and node pool lifecycle tooling

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use flotilla_common::telemetry::{init_tracing, TelemetryConfig};
use flotilla_common::{Cluster, RawNodePool};
use flotilla_workflow::Registry;
use tracing::debug;

use flotilla_cluster::nodepool::{NodePoolProcessor, NodePoolValidator};
use flotilla_cluster::workflow::{register_workflows, StepOptions, ACTIVITY_NAMES};
use flotilla_cluster::{default_codecs, default_processors, default_validators};
use flotilla_cluster::{LifecycleConfig, OsEnv};

/// flotilla - offline tooling for the lifecycle engine
#[derive(Parser, Debug)]
#[command(name = "flotilla", version, about, long_about = None)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long = "config", env = "FLOTILLA_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Emit JSON structured logs
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load and validate the configuration, then print the effective values
    CheckConfig,

    /// List the registered workflow and activity names
    Workflows,

    /// Run the validation and processing chains on a node pool offline
    ///
    /// Prints the typed node pool the distribution would receive.
    ProcessNodePool(ProcessNodePoolArgs),
}

#[derive(Parser, Debug)]
struct ProcessNodePoolArgs {
    /// Cluster as JSON (id, uid, name, organizationId, cloud, distribution, secretId)
    #[arg(long)]
    cluster: String,

    /// Node pool descriptor as JSON
    #[arg(long = "node-pool")]
    node_pool: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TelemetryConfig {
        json: cli.json_logs,
        ..Default::default()
    })?;

    let config = LifecycleConfig::load(cli.config.as_deref(), &OsEnv)
        .context("failed to load configuration")?;
    debug!(task_list = %config.workflow.task_list, "configuration loaded");

    match cli.command {
        Commands::CheckConfig => {
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
        Commands::Workflows => list_workflows(&config),
        Commands::ProcessNodePool(args) => process_node_pool(&config, args).await,
    }
}

fn list_workflows(config: &LifecycleConfig) -> anyhow::Result<()> {
    let mut registry = Registry::new();
    register_workflows(&mut registry, StepOptions::from(config))?;

    println!("workflows:");
    for name in registry.workflow_names() {
        println!("  {name}");
    }
    println!("activities:");
    let mut activities = ACTIVITY_NAMES.to_vec();
    activities.sort_unstable();
    for name in activities {
        println!("  {name}");
    }
    Ok(())
}

async fn process_node_pool(
    config: &LifecycleConfig,
    args: ProcessNodePoolArgs,
) -> anyhow::Result<()> {
    let cluster: Cluster =
        serde_json::from_str(&args.cluster).context("cluster is not valid JSON")?;
    let node_pool = RawNodePool::from_value(
        serde_json::from_str(&args.node_pool).context("node pool is not valid JSON")?,
    )?;

    let codecs = Arc::new(default_codecs()?);
    let codec = codecs.lookup(&cluster)?.clone();

    let validated = default_validators(&config.node_pools, codecs.clone())
        .validate_new(&cluster, &node_pool)
        .await;
    if let Err(e) = validated {
        for violation in e.violations() {
            eprintln!("  - {violation}");
        }
        return Err(e.into());
    }
    let processed = default_processors(&config.node_pools, codecs)
        .process_new(&cluster, node_pool)
        .await?;
    let spec = codec.decode_new(&processed)?;

    println!("{}", serde_json::to_string_pretty(&spec)?);
    Ok(())
}
