//! Command line argument parsing
//!
//! This module handles CLI argument parsing with nested subcommands:
//! - `create cluster|nodegroup`: Provision a cluster or some of its nodegroups
//! - `delete cluster|nodegroup`: Tear down a cluster or some of its nodegroups
//! - `upgrade nodegroup`: Move nodegroups to a new Kubernetes version
//! - `update addon|auth-map`: Reconcile addon stacks or the node authorization map
//! - `show-config`: Show configuration discovery information

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug)]
pub enum RunMode {
    Lifecycle(LifecycleConfig),
    ShowConfig { config_override: Option<PathBuf> },
}

/// Lifecycle operation requested on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    CreateCluster,
    CreateNodeGroups { names: Vec<String> },
    DeleteCluster { wait: bool },
    DeleteNodeGroups { names: Vec<String>, wait: bool },
    UpgradeNodeGroups { names: Vec<String>, version: Option<String> },
    UpdateAddons { names: Vec<String> },
    UpdateAuthMap,
}

#[derive(Debug)]
pub struct LifecycleConfig {
    pub operation: Operation,
    pub config_override: Option<PathBuf>,
    pub workspace_override: Option<PathBuf>,
    pub cluster_override: Option<String>,
    pub region_override: Option<String>,
    pub plan: bool,
    pub output: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "stackctl")]
#[command(author = "stackctl Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Create, upgrade and delete Kubernetes clusters through declarative stacks")]
#[command(long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Args {
    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Flags shared by every lifecycle command
#[derive(Debug, Clone, Default, clap::Args)]
pub struct CommonOptions {
    /// Configuration file path
    #[arg(short = 'c', long = "config-file")]
    pub config_file: Option<PathBuf>,
    /// Workspace directory holding local state
    #[arg(short = 'w', long = "workspace")]
    pub workspace: Option<PathBuf>,
    /// Cluster name, overriding metadata.name
    #[arg(long = "cluster")]
    pub cluster: Option<String>,
    /// Region, overriding metadata.region
    #[arg(long = "region")]
    pub region: Option<String>,
    /// Print the plan without running anything
    #[arg(long = "plan")]
    pub plan: bool,
    /// Output format of the final result
    #[arg(short = 'o', long = "output", value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create a cluster or nodegroups
    Create {
        #[command(subcommand)]
        resource: CreateResource,
    },
    /// Delete a cluster or nodegroups
    Delete {
        #[command(subcommand)]
        resource: DeleteResource,
    },
    /// Upgrade nodegroups
    Upgrade {
        #[command(subcommand)]
        resource: UpgradeResource,
    },
    /// Update addons or the node authorization map
    Update {
        #[command(subcommand)]
        resource: UpdateResource,
    },
    /// Show configuration discovery information
    ShowConfig {
        /// Configuration file path
        #[arg(short = 'c', long = "config-file")]
        config_file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CreateResource {
    /// Create the cluster with all configured nodegroups and addons
    Cluster {
        #[command(flatten)]
        common: CommonOptions,
    },
    /// Create nodegroups of an existing cluster
    Nodegroup {
        /// Nodegroup to create (can be used multiple times; all when omitted)
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
        #[command(flatten)]
        common: CommonOptions,
    },
}

#[derive(Debug, Subcommand)]
pub enum DeleteResource {
    /// Delete the cluster and everything it owns
    Cluster {
        /// Wait for every stack deletion to complete
        #[arg(long = "wait")]
        wait: bool,
        #[command(flatten)]
        common: CommonOptions,
    },
    /// Delete nodegroups
    Nodegroup {
        /// Nodegroup to delete (can be used multiple times; all when omitted)
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
        /// Wait for every stack deletion to complete
        #[arg(long = "wait")]
        wait: bool,
        #[command(flatten)]
        common: CommonOptions,
    },
}

#[derive(Debug, Subcommand)]
pub enum UpgradeResource {
    /// Upgrade nodegroups to a Kubernetes version
    Nodegroup {
        /// Nodegroup to upgrade (can be used multiple times; all when omitted)
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
        /// Target version; defaults to the cluster version
        #[arg(long = "kubernetes-version", value_name = "VERSION")]
        version: Option<String>,
        #[command(flatten)]
        common: CommonOptions,
    },
}

#[derive(Debug, Subcommand)]
pub enum UpdateResource {
    /// Create or update addon stacks
    Addon {
        /// Addon to update (can be used multiple times; all when omitted)
        #[arg(long = "name", value_name = "NAME")]
        names: Vec<String>,
        #[command(flatten)]
        common: CommonOptions,
    },
    /// Map the instance roles of existing nodegroups
    AuthMap {
        #[command(flatten)]
        common: CommonOptions,
    },
}

impl Args {
    pub fn parse() -> Self {
        Parser::parse()
    }

    pub fn mode(&self) -> Result<RunMode, String> {
        let (operation, common) = match &self.command {
            Some(Commands::Create { resource }) => match resource {
                CreateResource::Cluster { common } => (Operation::CreateCluster, common),
                CreateResource::Nodegroup { names, common } => (
                    Operation::CreateNodeGroups {
                        names: names.clone(),
                    },
                    common,
                ),
            },
            Some(Commands::Delete { resource }) => match resource {
                DeleteResource::Cluster { wait, common } => {
                    (Operation::DeleteCluster { wait: *wait }, common)
                }
                DeleteResource::Nodegroup {
                    names,
                    wait,
                    common,
                } => (
                    Operation::DeleteNodeGroups {
                        names: names.clone(),
                        wait: *wait,
                    },
                    common,
                ),
            },
            Some(Commands::Upgrade { resource }) => match resource {
                UpgradeResource::Nodegroup {
                    names,
                    version,
                    common,
                } => (
                    Operation::UpgradeNodeGroups {
                        names: names.clone(),
                        version: version.clone(),
                    },
                    common,
                ),
            },
            Some(Commands::Update { resource }) => match resource {
                UpdateResource::Addon { names, common } => (
                    Operation::UpdateAddons {
                        names: names.clone(),
                    },
                    common,
                ),
                UpdateResource::AuthMap { common } => (Operation::UpdateAuthMap, common),
            },
            Some(Commands::ShowConfig { config_file }) => {
                return Ok(RunMode::ShowConfig {
                    config_override: config_file.clone(),
                });
            }
            None => {
                return Err(
                    "No command specified. Use 'stackctl --help' to see available commands."
                        .to_string(),
                );
            }
        };

        Ok(RunMode::Lifecycle(LifecycleConfig {
            operation,
            config_override: common.config_file.clone(),
            workspace_override: common.workspace.clone(),
            cluster_override: common.cluster.clone(),
            region_override: common.region.clone(),
            plan: common.plan,
            output: common.output,
        }))
    }
}
