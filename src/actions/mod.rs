//! # Lifecycle Actions
//!
//! Command handlers for cluster, nodegroup and addon lifecycle operations.
//! Every action builds one task tree per phase, logs its plan, runs it and
//! turns the failure list into an operator-facing report:
//!
//! ```text
//! Sequential {
//!     fix cluster compatibility,        <- strict prerequisite
//!     Parallel { per-resource tasks },  <- attached only when non-empty
//! }
//! ```
//!
//! Post-provisioning work (authorization map updates, node readiness waits)
//! runs as a second tree only once provisioning succeeded.

use crate::config::{ClusterConfig, ConfigError, NodeGroupSpec};
use crate::stack::{StackError, StackManager};
use crate::task::{ExecutionMode, ExecutionReport, Remediation, TaskTree};
use crate::workload::{
    AuthMapChange, AuthMapStore, NodeGroupRole, NodeStatusSource, UpdateAuthMapTask,
    WaitForNodesTask, WorkloadError,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

pub mod addon;
pub mod cluster;
pub mod identity;
pub mod nodegroup;

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stack(#[from] StackError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),

    #[error("{} error(s) occurred while {subject}", .report.error_count())]
    TasksFailed {
        subject: String,
        report: Box<ExecutionReport>,
    },
}

impl ActionError {
    /// Report of the failed run, if tasks were executed
    pub fn report(&self) -> Option<&ExecutionReport> {
        match self {
            Self::TasksFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Log the plan, run `tree` and report its failures with an optional hint
pub async fn run_task_tree(
    tree: &TaskTree,
    subject: &str,
    remediation: Option<&Remediation>,
) -> Result<ExecutionReport, ActionError> {
    let report = ExecutionReport::execute(tree, subject).await;
    report.log_outcome(remediation);
    if report.succeeded() {
        Ok(report)
    } else {
        Err(ActionError::TasksFailed {
            subject: subject.to_string(),
            report: Box::new(report),
        })
    }
}

/// Result of a successful action
#[derive(Debug, Clone, Serialize)]
pub struct ActionOutcome {
    pub summary: String,
    pub planned: bool,
    pub reports: Vec<ExecutionReport>,
}

impl ActionOutcome {
    fn new(summary: String, planned: bool, reports: Vec<ExecutionReport>) -> Self {
        if planned {
            info!("(plan) {}", summary);
        } else {
            info!("{}", summary);
        }
        Self {
            summary,
            planned,
            reports,
        }
    }
}

/// Entry point for every lifecycle command of one cluster
pub struct ClusterActions {
    manager: StackManager,
    nodes: Arc<dyn NodeStatusSource>,
    auth_map: Arc<dyn AuthMapStore>,
    plan_mode: bool,
}

impl ClusterActions {
    pub fn new(
        manager: StackManager,
        nodes: Arc<dyn NodeStatusSource>,
        auth_map: Arc<dyn AuthMapStore>,
    ) -> Self {
        Self {
            manager,
            nodes,
            auth_map,
            plan_mode: false,
        }
    }

    /// Only describe the plans; no task is run
    pub fn with_plan_mode(mut self, plan_mode: bool) -> Self {
        self.plan_mode = plan_mode;
        self
    }

    pub fn manager(&self) -> &StackManager {
        &self.manager
    }

    pub fn config(&self) -> &ClusterConfig {
        self.manager.config()
    }

    /// Top-level tree carrying the action's plan mode
    fn top_level(&self, mode: ExecutionMode) -> TaskTree {
        TaskTree::new(mode).with_plan_mode(self.plan_mode)
    }

    fn remediation_delete_nodegroups(&self) -> Remediation {
        Remediation::DeleteNodeGroups {
            region: self.config().region().to_string(),
            cluster: self.config().name().to_string(),
        }
    }

    /// Config entry for a nodegroup, or a bare spec for stacks the config no
    /// longer names
    fn nodegroup_spec(&self, name: &str) -> NodeGroupSpec {
        let config = self.config();
        config
            .nodegroups
            .iter()
            .chain(&config.managed_nodegroups)
            .find(|ng| ng.name == name)
            .cloned()
            .unwrap_or_else(|| NodeGroupSpec::new(name))
    }

    fn auth_map_task(&self, change: AuthMapChange, nodegroups: &[NodeGroupSpec]) -> UpdateAuthMapTask {
        UpdateAuthMapTask::new(
            change,
            self.config().name(),
            node_roles(nodegroups),
            self.auth_map.clone(),
            self.manager.backend(),
        )
    }

    /// Authorization map update for unmanaged nodegroups followed by node
    /// readiness waits for all of them
    fn post_nodegroup_tasks(&self, unmanaged: &[NodeGroupSpec], managed: &[NodeGroupSpec]) -> TaskTree {
        let settings = &self.config().settings;
        let mut tree = self.top_level(ExecutionMode::Sequential);

        if settings.update_auth_map && !unmanaged.is_empty() {
            tree.append(self.auth_map_task(AuthMapChange::Add, unmanaged));
        }

        if settings.wait_for_nodes {
            let mut waits = TaskTree::parallel();
            for ng in unmanaged.iter().chain(managed) {
                waits.append(WaitForNodesTask::new(
                    ng.name.clone(),
                    ng.min_ready_nodes() as usize,
                    self.nodes.clone(),
                    self.manager.policy(),
                ));
            }
            if !waits.is_empty() {
                tree.append(waits);
            }
        }
        tree
    }
}

fn node_roles(nodegroups: &[NodeGroupSpec]) -> Vec<NodeGroupRole> {
    nodegroups
        .iter()
        .map(|ng| NodeGroupRole {
            nodegroup: ng.name.clone(),
            role_arn: ng.instance_role_arn.clone(),
        })
        .collect()
}

fn plural(count: usize, noun: &str) -> String {
    format!("{} {}(s)", count, noun)
}
