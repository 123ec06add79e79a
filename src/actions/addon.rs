use crate::actions::{ActionError, ActionOutcome, ClusterActions, plural, run_task_tree};
use crate::task::{ExecutionMode, Remediation};

impl ClusterActions {
    /// Create or update the IAM stacks of the selected addons (all when
    /// `only` is empty)
    pub async fn update_addons(&self, only: &[String]) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let addons = config.select_addons(only)?;

        let mut tree = self.top_level(ExecutionMode::Sequential);
        tree.append(self.manager.fix_cluster_compatibility_task());
        let addon_tasks = self.manager.tasks_to_update_addons(&addons).await?;
        if !addon_tasks.is_empty() {
            tree.append(addon_tasks);
        }

        let remediation = Remediation::InspectStacks {
            region: config.region().to_string(),
            cluster: config.name().to_string(),
        };
        let subject = format!("updating addons of cluster {:?}", config.name());
        let report = run_task_tree(&tree, &subject, Some(&remediation)).await?;

        Ok(ActionOutcome::new(
            format!("updated {} in cluster {:?}", plural(addons.len(), "addon"), config.name()),
            self.plan_mode,
            vec![report],
        ))
    }
}
