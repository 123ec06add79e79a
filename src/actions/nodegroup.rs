use crate::actions::{ActionError, ActionOutcome, ClusterActions, plural, run_task_tree};
use crate::config::NodeGroupSpec;
use crate::env;
use crate::stack::StackError;
use crate::task::{ExecutionMode, Remediation};
use crate::workload::AuthMapChange;
use std::collections::HashSet;
use tracing::info;

impl ClusterActions {
    /// Create the selected nodegroups (all when `only` is empty), skipping
    /// those that already have a stack
    pub async fn create_nodegroups(&self, only: &[String]) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let (unmanaged, managed) = config.select_nodegroups(only)?;

        let existing: HashSet<String> = self
            .manager
            .list_nodegroup_stacks()
            .await?
            .into_iter()
            .map(|s| s.nodegroup_name)
            .collect();
        let exclude_existing = |ngs: Vec<NodeGroupSpec>| -> Vec<NodeGroupSpec> {
            ngs.into_iter()
                .filter(|ng| {
                    let exists = existing.contains(&ng.name);
                    if exists {
                        info!("nodegroup {:?} already exists and will be excluded", ng.name);
                    }
                    !exists
                })
                .collect()
        };
        let unmanaged = exclude_existing(unmanaged);
        let managed = exclude_existing(managed);

        let mut tree = self.top_level(ExecutionMode::Sequential);
        tree.append(self.manager.fix_cluster_compatibility_task());
        let nodegroup_tasks = self.manager.nodegroup_tasks(&unmanaged, &managed);
        if !nodegroup_tasks.is_empty() {
            tree.append(nodegroup_tasks);
        }

        let remediation = self.remediation_delete_nodegroups();
        let subject = format!("creating nodegroups in cluster {:?}", config.name());
        let mut reports = vec![run_task_tree(&tree, &subject, Some(&remediation)).await?];

        let post = self.post_nodegroup_tasks(&unmanaged, &managed);
        if !post.is_empty() {
            let subject = format!("waiting for nodegroups of cluster {:?}", config.name());
            reports.push(run_task_tree(&post, &subject, Some(&remediation)).await?);
        }

        Ok(ActionOutcome::new(
            format!(
                "created {} in cluster {:?}",
                plural(unmanaged.len() + managed.len(), "nodegroup"),
                config.name()
            ),
            self.plan_mode,
            reports,
        ))
    }

    /// Delete the selected nodegroup stacks (all when `only` is empty)
    pub async fn delete_nodegroups(&self, only: &[String], wait: bool) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let stacks = self.manager.list_nodegroup_stacks().await?;
        for name in only {
            if !stacks.iter().any(|s| &s.nodegroup_name == name) {
                return Err(StackError::NotFound {
                    name: env::nodegroup_stack_name(config.name(), name),
                }
                .into());
            }
        }
        let selected = |name: &str| only.is_empty() || only.iter().any(|n| n == name);

        let mut tree = self.top_level(ExecutionMode::Sequential);

        // roles are resolved from the stacks, so they go before the stacks do
        let unmanaged: Vec<NodeGroupSpec> = stacks
            .iter()
            .filter(|s| !s.managed && selected(&s.nodegroup_name))
            .map(|s| self.nodegroup_spec(&s.nodegroup_name))
            .collect();
        if config.settings.update_auth_map && !unmanaged.is_empty() {
            tree.append(self.auth_map_task(AuthMapChange::Remove, &unmanaged));
        }

        let deletes = self.manager.tasks_to_delete_nodegroups(
            &stacks,
            selected,
            wait,
            Some(self.nodegroup_cleanup()),
        );
        let count = stacks.iter().filter(|s| selected(&s.nodegroup_name)).count();
        if !deletes.is_empty() {
            tree.append(deletes);
        }

        let remediation = self.remediation_delete_nodegroups();
        let subject = format!("deleting nodegroups of cluster {:?}", config.name());
        let report = run_task_tree(&tree, &subject, Some(&remediation)).await?;

        let verb = if wait { "deleted" } else { "initiated deletion of" };
        Ok(ActionOutcome::new(
            format!("{} {} from cluster {:?}", verb, plural(count, "nodegroup"), config.name()),
            self.plan_mode,
            vec![report],
        ))
    }

    /// Move the selected nodegroups to `version` (the cluster version when `None`)
    pub async fn upgrade_nodegroups(
        &self,
        only: &[String],
        version: Option<&str>,
    ) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let version = version.unwrap_or(&config.metadata.version);
        let (unmanaged, managed) = config.select_nodegroups(only)?;

        let mut tree = self.top_level(ExecutionMode::Sequential);
        tree.append(self.manager.fix_cluster_compatibility_task());
        let updates = self
            .manager
            .tasks_to_update_nodegroups(&unmanaged, &managed, version);
        if !updates.is_empty() {
            tree.append(updates);
        }

        let remediation = Remediation::InspectStacks {
            region: config.region().to_string(),
            cluster: config.name().to_string(),
        };
        let subject = format!("upgrading nodegroups of cluster {:?}", config.name());
        let report = run_task_tree(&tree, &subject, Some(&remediation)).await?;

        Ok(ActionOutcome::new(
            format!(
                "upgraded {} to Kubernetes {}",
                plural(unmanaged.len() + managed.len(), "nodegroup"),
                version
            ),
            self.plan_mode,
            vec![report],
        ))
    }
}
