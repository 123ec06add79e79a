//! Outcome of one top-level task tree run and its operator-facing report.

use crate::task::tree::TaskTree;
use crate::task::types::{Task, TaskError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

/// Hint printed after a failed run telling the operator how to follow up
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Remediation {
    /// Failed nodegroups must be deleted one by one before retrying
    DeleteNodeGroups { region: String, cluster: String },
    /// A partially created cluster must be deleted before retrying
    DeleteCluster { region: String, cluster: String },
    /// Leftover stacks need manual inspection in the provisioning backend
    InspectStacks { region: String, cluster: String },
    /// Retry the whole cluster deletion once the listed failures are fixed
    RetryClusterDelete { region: String, cluster: String },
    Custom(String),
}

impl fmt::Display for Remediation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Remediation::DeleteNodeGroups { region, cluster } => write!(
                f,
                "to cleanup resources, run 'stackctl delete nodegroup --region={} --cluster={} --name=<name>' for each of the failed nodegroups",
                region, cluster
            ),
            Remediation::DeleteCluster { region, cluster } => write!(
                f,
                "to cleanup resources, run 'stackctl delete cluster --region={} --cluster={}'",
                region, cluster
            ),
            Remediation::InspectStacks { region, cluster } => write!(
                f,
                "you may wish to inspect the stacks of cluster {:?} in region {} and re-run the command",
                cluster, region
            ),
            Remediation::RetryClusterDelete { region, cluster } => write!(
                f,
                "once the failures above are resolved, run 'stackctl delete cluster --region={} --cluster={}' again",
                region, cluster
            ),
            Remediation::Custom(hint) => write!(f, "{}", hint),
        }
    }
}

/// Result of running a top-level tree, ready to be logged or serialized
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// What the run was doing, e.g. `creating nodegroups`
    pub subject: String,
    pub summary: String,
    pub plan: String,
    pub planned: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub failures: Vec<TaskError>,
}

impl ExecutionReport {
    /// Log the plan, run the tree and collect the outcome
    pub async fn execute(tree: &TaskTree, subject: impl Into<String>) -> Self {
        let plan = tree.describe();
        info!("{}", plan);

        let started_at = Utc::now();
        let failures = tree.do_all().await;
        let finished_at = Utc::now();

        Self {
            subject: subject.into(),
            summary: tree.summary(),
            plan,
            planned: tree.is_plan_mode(),
            started_at,
            finished_at,
            failures,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn error_count(&self) -> usize {
        self.failures.len()
    }

    pub fn duration(&self) -> Duration {
        self.finished_at - self.started_at
    }

    /// Count header plus one detail block per failure
    pub fn failure_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "{} error(s) occurred while {}",
            self.error_count(),
            self.subject
        )];
        lines.extend(self.failures.iter().map(TaskError::render_detail));
        lines
    }

    pub fn log_outcome(&self, remediation: Option<&Remediation>) {
        if self.succeeded() {
            let action = if self.planned {
                "skipped"
            } else {
                "completed successfully"
            };
            debug!("all {} were {}", self.summary, action);
            return;
        }

        warn!(
            "{} error(s) occurred while {}",
            self.error_count(),
            self.subject
        );
        if let Some(remediation) = remediation {
            info!("{}", remediation);
        }
        for failure in &self.failures {
            error!("{}", failure.render_detail());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::GenericTask;
    use anyhow::anyhow;

    #[tokio::test]
    async fn test_report_counts_failures() {
        let mut tree = TaskTree::parallel();
        tree.append(GenericTask::new("create nodegroup \"ng-1\"", || async { Ok(()) }));
        tree.append(GenericTask::new("create nodegroup \"ng-2\"", || async {
            Err(anyhow!("stack entered ROLLBACK_COMPLETE"))
        }));

        let report = ExecutionReport::execute(&tree, "creating nodegroups").await;

        assert!(!report.succeeded());
        assert_eq!(report.error_count(), 1);
        assert_eq!(report.summary, "2 parallel tasks");
        assert!(report.duration() >= Duration::zero());

        let lines = report.failure_lines();
        assert_eq!(lines[0], "1 error(s) occurred while creating nodegroups");
        assert_eq!(
            lines[1],
            "create nodegroup \"ng-2\": stack entered ROLLBACK_COMPLETE"
        );
    }

    #[tokio::test]
    async fn test_report_serializes_failures() {
        let mut tree = TaskTree::sequential();
        tree.append(GenericTask::new("update addon \"vpc-cni\"", || async {
            Err(anyhow!("timed out"))
        }));

        let report = ExecutionReport::execute(&tree, "updating addons").await;
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["subject"], "updating addons");
        assert_eq!(json["failures"][0]["kind"], "failed");
        assert_eq!(json["failures"][0]["task"], "update addon \"vpc-cni\"");
    }

    #[test]
    fn test_remediation_hint() {
        let hint = Remediation::DeleteNodeGroups {
            region: "us-west-2".to_string(),
            cluster: "dev".to_string(),
        };
        assert_eq!(
            hint.to_string(),
            "to cleanup resources, run 'stackctl delete nodegroup --region=us-west-2 --cluster=dev --name=<name>' for each of the failed nodegroups"
        );
    }
}
