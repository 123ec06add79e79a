use anyhow::Context;
use stackctl::actions::{ActionError, ActionOutcome, ClusterActions};
use stackctl::cli::{Args, ConfigDiscovery, LifecycleConfig, Operation, OutputFormat, RunMode};
use stackctl::env;
use stackctl::stack::{LocalBackend, StackManager};
use stackctl::workload::LocalWorkload;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; RUST_LOG wins over the built-in filters
    let default_filter = if args.verbose {
        env::VERBOSE_LOG_FILTER
    } else {
        env::DEFAULT_LOG_FILTER
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    match mode {
        RunMode::ShowConfig { config_override } => {
            ConfigDiscovery::show_discovery_info(config_override.as_deref());
            Ok(())
        }
        RunMode::Lifecycle(config) => run_lifecycle(config).await,
    }
}

async fn run_lifecycle(config: LifecycleConfig) -> anyhow::Result<()> {
    let workspace = match &config.workspace_override {
        Some(path) => path.clone(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    };

    let (mut cluster_config, config_path) =
        ConfigDiscovery::discover_config_in(&workspace, config.config_override.as_deref())?;
    if let Some(cluster) = &config.cluster_override {
        cluster_config.metadata.name = cluster.clone();
    }
    if let Some(region) = &config.region_override {
        cluster_config.metadata.region = region.clone();
    }
    cluster_config.validate()?;
    info!(
        "Using cluster {:?} in {} from {:?}",
        cluster_config.name(),
        cluster_config.region(),
        config_path
    );

    let backend = Arc::new(
        LocalBackend::load(
            &cluster_config.simulation,
            env::state_file_path(&workspace, cluster_config.name()),
        )
        .context("loading local stack state")?,
    );
    let workload = Arc::new(
        LocalWorkload::open(
            backend.clone(),
            &cluster_config,
            env::auth_map_file_path(&workspace, cluster_config.name()),
        )
        .await
        .context("loading local authorization map")?,
    );

    let manager = StackManager::new(backend.clone(), Arc::new(cluster_config));
    let actions = ClusterActions::new(manager, workload.clone(), workload.clone())
        .with_plan_mode(config.plan);

    let result = dispatch(&actions, &config.operation).await;

    if !config.plan {
        backend.flush().context("saving local stack state")?;
        workload
            .flush()
            .await
            .context("saving local authorization map")?;
    }

    match result {
        Ok(outcome) => {
            print_outcome(&outcome, config.output)?;
            Ok(())
        }
        Err(ActionError::TasksFailed { subject, report }) => {
            match config.output {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => {
                    for line in report.failure_lines() {
                        eprintln!("{}", line);
                    }
                }
            }
            error!("failed {}", subject);
            std::process::exit(1);
        }
        Err(err) => Err(err.into()),
    }
}

async fn dispatch(actions: &ClusterActions, operation: &Operation) -> Result<ActionOutcome, ActionError> {
    match operation {
        Operation::CreateCluster => actions.create_cluster().await,
        Operation::CreateNodeGroups { names } => actions.create_nodegroups(names).await,
        Operation::DeleteCluster { wait } => actions.delete_cluster(*wait).await,
        Operation::DeleteNodeGroups { names, wait } => actions.delete_nodegroups(names, *wait).await,
        Operation::UpgradeNodeGroups { names, version } => {
            actions.upgrade_nodegroups(names, version.as_deref()).await
        }
        Operation::UpdateAddons { names } => actions.update_addons(names).await,
        Operation::UpdateAuthMap => actions.bootstrap_authorization().await,
    }
}

fn print_outcome(outcome: &ActionOutcome, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(outcome)?),
        OutputFormat::Text => {
            if outcome.planned {
                for report in &outcome.reports {
                    println!("{}", report.plan);
                }
                println!("(plan) {}", outcome.summary);
            } else {
                println!("{}", outcome.summary);
            }
        }
    }
    Ok(())
}
