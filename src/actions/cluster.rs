use crate::actions::{ActionError, ActionOutcome, ClusterActions, plural, run_task_tree};
use crate::stack::ClusterDeletion;
use crate::task::{Remediation, Task};

impl ClusterActions {
    /// Create the control plane, addons and every configured nodegroup
    pub async fn create_cluster(&self) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let remediation = Remediation::DeleteCluster {
            region: config.region().to_string(),
            cluster: config.name().to_string(),
        };

        let mut post_cluster_tasks: Vec<Box<dyn Task>> = Vec::new();
        let addons = self.manager.tasks_to_update_addons(&config.addons).await?;
        if !addons.is_empty() {
            post_cluster_tasks.push(Box::new(addons));
        }

        let mut tree = self.manager.tasks_to_create_cluster(post_cluster_tasks);
        tree.set_plan_mode(self.plan_mode);
        let subject = format!("creating cluster {:?}", config.name());
        let mut reports = vec![run_task_tree(&tree, &subject, Some(&remediation)).await?];

        let post = self.post_nodegroup_tasks(&config.nodegroups, &config.managed_nodegroups);
        if !post.is_empty() {
            let subject = format!("waiting for nodegroups of cluster {:?}", config.name());
            reports.push(run_task_tree(&post, &subject, Some(&remediation)).await?);
        }

        let nodegroups = config.nodegroups.len() + config.managed_nodegroups.len();
        Ok(ActionOutcome::new(
            format!(
                "created cluster {:?} with {} and {}",
                config.name(),
                plural(nodegroups, "nodegroup"),
                plural(config.addons.len(), "addon")
            ),
            self.plan_mode,
            reports,
        ))
    }

    /// Delete the cluster and everything it owns. The control plane is only
    /// deleted once every dependent stack is gone.
    pub async fn delete_cluster(&self, wait: bool) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let ClusterDeletion {
            mut dependents,
            mut control_plane,
        } = self
            .manager
            .tasks_to_delete_cluster_with_nodegroups(wait, Some(self.nodegroup_cleanup()))
            .await?;
        dependents.set_plan_mode(self.plan_mode);
        control_plane.set_plan_mode(self.plan_mode);

        let remediation = Remediation::RetryClusterDelete {
            region: config.region().to_string(),
            cluster: config.name().to_string(),
        };
        let mut reports = Vec::new();
        if !dependents.is_empty() {
            let subject = format!("deleting resources of cluster {:?}", config.name());
            reports.push(run_task_tree(&dependents, &subject, Some(&remediation)).await?);
        }
        let subject = format!("deleting cluster {:?}", config.name());
        reports.push(run_task_tree(&control_plane, &subject, Some(&remediation)).await?);

        let summary = if wait {
            format!("deleted cluster {:?}", config.name())
        } else {
            format!("initiated deletion of cluster {:?}", config.name())
        };
        Ok(ActionOutcome::new(summary, self.plan_mode, reports))
    }
}
