use crate::actions::{ActionError, ActionOutcome, ClusterActions, plural, run_task_tree};
use crate::config::NodeGroupSpec;
use crate::stack::CleanupFn;
use crate::task::{ExecutionMode, Remediation};
use crate::workload::AuthMapChange;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info};

impl ClusterActions {
    /// Map the instance roles of every existing unmanaged nodegroup
    pub async fn bootstrap_authorization(&self) -> Result<ActionOutcome, ActionError> {
        let config = self.config();
        let unmanaged: Vec<NodeGroupSpec> = self
            .manager
            .list_nodegroup_stacks()
            .await?
            .into_iter()
            .filter(|s| !s.managed)
            .map(|s| self.nodegroup_spec(&s.nodegroup_name))
            .collect();

        let mut tree = self.top_level(ExecutionMode::Sequential);
        tree.append(self.manager.fix_cluster_compatibility_task());
        if !unmanaged.is_empty() {
            tree.append(self.auth_map_task(AuthMapChange::Add, &unmanaged));
        }

        let remediation = Remediation::Custom(format!(
            "re-run 'stackctl update auth-map --cluster={}' once the nodegroup stacks are healthy",
            config.name()
        ));
        let subject = format!("updating the authorization map of cluster {:?}", config.name());
        let report = run_task_tree(&tree, &subject, Some(&remediation)).await?;

        Ok(ActionOutcome::new(
            format!("authorized {} in cluster {:?}", plural(unmanaged.len(), "nodegroup"), config.name()),
            self.plan_mode,
            vec![report],
        ))
    }

    /// Cleanup run before retrying the delete of a nodegroup whose last
    /// delete failed: drops its explicitly configured role from the
    /// authorization map. Each call rewrites the whole map, so cleanups are
    /// only ever run one at a time.
    pub(crate) fn nodegroup_cleanup(&self) -> CleanupFn {
        let store = self.auth_map.clone();
        let config = self.manager.config().clone();
        Arc::new(move |nodegroup: String| -> BoxFuture<'static, anyhow::Result<()>> {
            let store = store.clone();
            let role = config
                .nodegroups
                .iter()
                .find(|ng| ng.name == nodegroup)
                .and_then(|ng| ng.instance_role_arn.clone());
            async move {
                let Some(role) = role else {
                    debug!("nothing to clean up for nodegroup {:?}", nodegroup);
                    return Ok(());
                };
                let mut map = store.load().await?;
                if map.remove_role(&role) {
                    store.store(map).await?;
                    info!("removed role of nodegroup {:?} from the authorization map", nodegroup);
                }
                Ok(())
            }
            .boxed()
        })
    }
}

