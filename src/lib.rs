//! # stackctl
//!
//! Cluster lifecycle CLI that drives stack-based provisioning through a
//! composable task tree. Every command builds a plan of infrastructure,
//! readiness and authorization tasks, prints it, runs it with
//! continue-on-error semantics and reports every failure at once.
//!
//! ## Architecture Overview
//!
//! - **[`task`]**: Task trait, sequential/parallel task trees and failure reporting
//! - **[`stack`]**: Provisioning backend boundary, stack tasks and the task factory
//! - **[`workload`]**: Node readiness and authorization map tasks
//! - **[`actions`]**: Lifecycle commands composed from the above
//! - **[`config`]**: Cluster configuration file
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stackctl::task::{GenericTask, Task, TaskTree};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut nodegroups = TaskTree::parallel();
//!     nodegroups.append(GenericTask::new("create nodegroup \"ng-1\"", || async { Ok(()) }));
//!     nodegroups.append(GenericTask::new("create nodegroup \"ng-2\"", || async { Ok(()) }));
//!
//!     let mut tree = TaskTree::sequential();
//!     tree.append(GenericTask::new("fix cluster compatibility", || async { Ok(()) }));
//!     tree.append(nodegroups);
//!
//!     println!("{}", tree.describe());
//!     let failures = tree.do_all().await;
//!     assert!(failures.is_empty());
//! }
//! ```

/// Task orchestration engine.
///
/// Task trees nest sequential and parallel regions to arbitrary depth and
/// collect every failure instead of stopping at the first one.
pub mod task;

/// Stack management.
///
/// Backend boundary, waiters, stack tasks and the factory that turns cluster
/// configuration into task trees.
pub mod stack;

/// Workload collaborators: node readiness and the authorization map.
pub mod workload;

/// Lifecycle actions composing stack and workload tasks.
pub mod actions;

/// Cluster configuration file.
pub mod config;

/// Environment constants and path utilities.
///
/// Centralizes hardcoded paths, directory names and stack naming
/// conventions used throughout the application.
pub mod env;

// CLI module for command-line interface
pub mod cli;

pub use actions::{ActionError, ActionOutcome, ClusterActions};
pub use config::{ClusterConfig, ConfigError};
pub use stack::{LocalBackend, StackBackend, StackError, StackManager};
pub use task::{ExecutionMode, ExecutionReport, Task, TaskError, TaskTree};
pub use workload::{LocalWorkload, WorkloadError};
