//! Task factory over the provisioning backend.
//!
//! [`StackManager`] never runs anything itself: every method returns a task
//! or a [`TaskTree`] that callers compose further and hand to the executor.

use crate::config::{AddonSpec, ClusterConfig, NodeGroupSpec};
use crate::env::{self, stack as keys};
use crate::stack::{
    Stack, StackAction, StackBackend, StackError, StackKind, StackOperation, StackStatus,
    StackTask, TagPropagationTask, WaitPolicy, template, wait_for_stack,
};
use crate::task::{GenericTask, NamedTask, Task, TaskTree};
use anyhow::{Context, bail};
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, info};

/// Callback run for a nodegroup whose previous delete failed, before retrying it
pub type CleanupFn = Arc<dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// A nodegroup stack found in the backend
#[derive(Debug, Clone)]
pub struct NodeGroupStack {
    pub nodegroup_name: String,
    pub managed: bool,
    pub stack: Stack,
}

/// Trees deleting a cluster; `control_plane` must only run once
/// `dependents` succeeded
#[derive(Debug)]
pub struct ClusterDeletion {
    pub dependents: TaskTree,
    pub control_plane: TaskTree,
}

#[derive(Clone)]
pub struct StackManager {
    backend: Arc<dyn StackBackend>,
    config: Arc<ClusterConfig>,
    policy: WaitPolicy,
}

impl StackManager {
    pub fn new(backend: Arc<dyn StackBackend>, config: Arc<ClusterConfig>) -> Self {
        let policy = WaitPolicy::from_settings(&config.settings);
        Self {
            backend,
            config,
            policy,
        }
    }

    pub fn with_policy(mut self, policy: WaitPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn backend(&self) -> Arc<dyn StackBackend> {
        self.backend.clone()
    }

    pub fn config(&self) -> &Arc<ClusterConfig> {
        &self.config
    }

    pub fn policy(&self) -> WaitPolicy {
        self.policy
    }

    fn stack_task(&self, info: String, action: StackAction) -> StackTask {
        StackTask::new(info, action, self.backend.clone(), self.policy)
    }

    fn delete_task(&self, info: String, name: &str, wait: bool) -> StackTask {
        let task = self.stack_task(
            info,
            StackAction::Delete {
                name: name.to_string(),
            },
        );
        if wait { task } else { task.without_wait() }
    }

    pub async fn describe_cluster_stack(&self) -> Result<Option<Stack>, StackError> {
        self.backend
            .describe_stack(&env::cluster_stack_name(self.config.name()))
            .await
    }

    /// Every stack tagged with this cluster's name
    async fn owned_stacks(&self) -> Result<Vec<Stack>, StackError> {
        let cluster = self.config.name();
        Ok(self
            .backend
            .list_stacks()
            .await?
            .into_iter()
            .filter(|stack| {
                stack.tags.get(keys::CLUSTER_NAME_TAG).map(String::as_str) == Some(cluster)
            })
            .collect())
    }

    pub async fn list_nodegroup_stacks(&self) -> Result<Vec<NodeGroupStack>, StackError> {
        let stacks = self.owned_stacks().await?;
        Ok(stacks
            .into_iter()
            .filter_map(|stack| {
                let (nodegroup_name, managed) = match &stack.kind {
                    StackKind::NodeGroup { name } => (name.clone(), false),
                    StackKind::ManagedNodeGroup { name } => (name.clone(), true),
                    _ => return None,
                };
                Some(NodeGroupStack {
                    nodegroup_name,
                    managed,
                    stack,
                })
            })
            .collect())
    }

    /// Cluster control plane followed by all configured nodegroups; post
    /// cluster tasks (e.g. authorization bootstrap) run before the nodegroups
    pub fn tasks_to_create_cluster(&self, post_cluster_tasks: Vec<Box<dyn Task>>) -> TaskTree {
        let mut tree = TaskTree::sequential();
        tree.append(self.stack_task(
            format!("create cluster control plane {:?}", self.config.name()),
            StackAction::Create(template::cluster_request(&self.config)),
        ));

        let nodegroup_tasks =
            self.nodegroup_tasks(&self.config.nodegroups, &self.config.managed_nodegroups);

        if post_cluster_tasks.is_empty() {
            if !nodegroup_tasks.is_empty() {
                tree.append(nodegroup_tasks);
            }
            return tree;
        }

        let mut post_cluster = TaskTree::sequential();
        for task in post_cluster_tasks {
            post_cluster.append_boxed(task);
        }
        if !nodegroup_tasks.is_empty() {
            post_cluster.append(nodegroup_tasks);
        }
        tree.append(post_cluster);
        tree
    }

    /// Parallel creation of unmanaged and managed nodegroups, each set
    /// attached only when non-empty
    pub fn nodegroup_tasks(&self, unmanaged: &[NodeGroupSpec], managed: &[NodeGroupSpec]) -> TaskTree {
        let mut tree = TaskTree::parallel();
        let unmanaged = self.unmanaged_nodegroup_tasks(unmanaged);
        if !unmanaged.is_empty() {
            tree.append(unmanaged);
        }
        let managed = self.managed_nodegroup_tasks(managed);
        if !managed.is_empty() {
            tree.append(managed);
        }
        tree
    }

    pub fn unmanaged_nodegroup_tasks(&self, nodegroups: &[NodeGroupSpec]) -> TaskTree {
        let mut tree = TaskTree::parallel();
        for ng in nodegroups {
            tree.append(self.stack_task(
                format!("create nodegroup {:?}", ng.name),
                StackAction::Create(template::nodegroup_request(&self.config, ng, false, None)),
            ));
        }
        tree
    }

    /// One sequential sub-tree per nodegroup: tags can only be propagated once
    /// the nodegroup exists
    pub fn managed_nodegroup_tasks(&self, nodegroups: &[NodeGroupSpec]) -> TaskTree {
        let mut tree = TaskTree::parallel();
        for ng in nodegroups {
            let mut sub_task = TaskTree::sequential();
            sub_task.append(self.stack_task(
                format!("create managed nodegroup {:?}", ng.name),
                StackAction::Create(template::nodegroup_request(&self.config, ng, true, None)),
            ));
            if ng.propagate_asg_tags {
                sub_task.append(TagPropagationTask::new(
                    format!("propagate tags to ASG for managed nodegroup {:?}", ng.name),
                    env::nodegroup_stack_name(self.config.name(), &ng.name),
                    ng.tags.clone(),
                    self.backend.clone(),
                ));
            }
            tree.append(sub_task);
        }
        tree
    }

    /// Checks the cluster stack is usable and brings its template up to date
    pub fn fix_cluster_compatibility_task(&self) -> GenericTask {
        let backend = self.backend.clone();
        let config = self.config.clone();
        let policy = self.policy;
        GenericTask::new("fix cluster compatibility", move || {
            let backend = backend.clone();
            let config = config.clone();
            async move { ensure_cluster_compatible(backend.as_ref(), &config, policy).await }
        })
    }

    /// Parallel stack updates moving nodegroups to `version`
    pub fn tasks_to_update_nodegroups(
        &self,
        unmanaged: &[NodeGroupSpec],
        managed: &[NodeGroupSpec],
        version: &str,
    ) -> TaskTree {
        let mut tree = TaskTree::parallel();
        let all = unmanaged
            .iter()
            .map(|ng| (ng, false))
            .chain(managed.iter().map(|ng| (ng, true)));
        for (ng, is_managed) in all {
            let kind = if is_managed { "managed nodegroup" } else { "nodegroup" };
            tree.append(self.stack_task(
                format!("upgrade {} {:?} to Kubernetes {}", kind, ng.name, version),
                StackAction::Update(template::nodegroup_request(
                    &self.config,
                    ng,
                    is_managed,
                    Some(version),
                )),
            ));
        }
        tree
    }

    /// Create addon stacks that do not exist yet and update the others
    pub async fn tasks_to_update_addons(&self, addons: &[AddonSpec]) -> Result<TaskTree, StackError> {
        let mut tree = TaskTree::parallel();
        for addon in addons {
            let request = template::addon_request(&self.config, addon);
            let existing = self.backend.describe_stack(&request.name).await?;
            let (info, action) = match existing {
                Some(_) => (
                    format!("update addon {:?} to {}", addon.name, addon.version),
                    StackAction::Update(request),
                ),
                None => (
                    format!("create addon {:?} at {}", addon.name, addon.version),
                    StackAction::Create(request),
                ),
            };
            tree.append(self.stack_task(info, action));
        }
        Ok(tree)
    }

    /// Parallel deletes of the nodegroup stacks accepted by `should_delete`.
    ///
    /// When `cleanup` is given, stacks whose previous delete failed are
    /// cleaned up first, one at a time, ahead of all deletes.
    pub fn tasks_to_delete_nodegroups(
        &self,
        stacks: &[NodeGroupStack],
        should_delete: impl Fn(&str) -> bool,
        wait: bool,
        cleanup: Option<CleanupFn>,
    ) -> TaskTree {
        let mut cleanups = TaskTree::sequential();
        let mut deletes = TaskTree::parallel();
        for ng in stacks {
            if !should_delete(&ng.nodegroup_name) {
                continue;
            }
            if ng.stack.status == StackStatus::DeleteFailed {
                if let Some(cleanup) = &cleanup {
                    let cleanup = cleanup.clone();
                    cleanups.append(NamedTask::new(
                        format!("cleanup for nodegroup {:?}", ng.nodegroup_name),
                        ng.nodegroup_name.clone(),
                        move |name| cleanup(name),
                    ));
                }
            }
            deletes.append(self.delete_task(
                format!("delete nodegroup {:?}", ng.nodegroup_name),
                &ng.stack.name,
                wait,
            ));
        }

        if cleanups.is_empty() {
            return deletes;
        }
        let mut tree = TaskTree::sequential();
        tree.append(cleanups);
        tree.append(deletes);
        tree
    }

    pub async fn tasks_to_delete_addon_stacks(&self, wait: bool) -> Result<TaskTree, StackError> {
        let mut tree = TaskTree::parallel();
        for stack in self.owned_stacks().await? {
            if let StackKind::Addon { name } = &stack.kind {
                tree.append(self.delete_task(
                    format!("delete IAM resources of addon {:?}", name),
                    &stack.name,
                    wait,
                ));
            }
        }
        Ok(tree)
    }

    /// Stacks left behind by older releases
    pub async fn tasks_to_delete_deprecated_stacks(&self) -> Result<TaskTree, StackError> {
        let mut tree = TaskTree::sequential();
        for stack in self.owned_stacks().await? {
            if let StackKind::Deprecated { .. } = &stack.kind {
                if stack.status == StackStatus::DeleteInProgress {
                    debug!("deprecated stack {:?} is already being deleted", stack.name);
                    continue;
                }
                tree.append(self.delete_task(
                    format!("delete deprecated stack {:?}", stack.name),
                    &stack.name,
                    true,
                ));
            }
        }
        Ok(tree)
    }

    /// Everything the cluster owns, split into the dependents and the
    /// control plane that may only be deleted once they are all gone
    pub async fn tasks_to_delete_cluster_with_nodegroups(
        &self,
        wait: bool,
        cleanup: Option<CleanupFn>,
    ) -> Result<ClusterDeletion, StackError> {
        let cluster_stack = self
            .describe_cluster_stack()
            .await?
            .ok_or_else(|| StackError::NotFound {
                name: env::cluster_stack_name(self.config.name()),
            })?;

        let mut dependents = TaskTree::sequential();

        let deprecated = self.tasks_to_delete_deprecated_stacks().await?;
        if !deprecated.is_empty() {
            dependents.append(deprecated);
        }

        let nodegroup_stacks = self.list_nodegroup_stacks().await?;
        // the cluster cannot go before its nodegroups, so these always wait
        let nodegroups = self.tasks_to_delete_nodegroups(&nodegroup_stacks, |_| true, true, cleanup);
        if !nodegroups.is_empty() {
            dependents.append(nodegroups);
        }

        let addons = self.tasks_to_delete_addon_stacks(wait).await?;
        if !addons.is_empty() {
            dependents.append(addons);
        }

        let mut control_plane = TaskTree::sequential();
        control_plane.append(self.delete_task(
            format!("delete cluster control plane {:?}", self.config.name()),
            &cluster_stack.name,
            wait,
        ));
        Ok(ClusterDeletion {
            dependents,
            control_plane,
        })
    }
}

async fn ensure_cluster_compatible(
    backend: &dyn StackBackend,
    config: &ClusterConfig,
    policy: WaitPolicy,
) -> anyhow::Result<()> {
    let name = env::cluster_stack_name(config.name());
    let stack = backend
        .describe_stack(&name)
        .await
        .with_context(|| format!("describing cluster stack {:?}", name))?;
    let Some(stack) = stack else {
        bail!("cluster stack {:?} does not exist", name);
    };
    if !stack.status.is_healthy() {
        bail!(
            "cluster stack {:?} is in state {} and cannot be used",
            name,
            stack.status
        );
    }

    let version = stack
        .parameter(keys::TEMPLATE_VERSION_KEY)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    if version >= keys::TEMPLATE_VERSION {
        debug!("cluster stack {:?} is up to date", name);
        return Ok(());
    }

    info!(
        "updating cluster stack {:?} from template version {} to {}",
        name,
        version,
        keys::TEMPLATE_VERSION
    );
    backend
        .update_stack(template::cluster_request(config))
        .await
        .with_context(|| format!("updating cluster stack {:?}", name))?;
    wait_for_stack(backend, &name, StackOperation::Update, policy).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimulationConfig;
    use crate::stack::LocalBackend;
    use futures::FutureExt;
    use crate::task::TaskError;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn fast_policy() -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(5),
            max_poll_interval: Duration::from_millis(10),
        }
    }

    fn sample_config() -> ClusterConfig {
        let mut config = ClusterConfig::new("dev", "us-west-2");
        config.nodegroups.push(NodeGroupSpec::new("ng-1"));
        config.nodegroups.push(NodeGroupSpec::new("ng-2"));
        let mut managed = NodeGroupSpec::new("mng-1");
        managed.propagate_asg_tags = true;
        managed.tags.insert("team".to_string(), "platform".to_string());
        config.managed_nodegroups.push(managed);
        config.addons.push(AddonSpec {
            name: "vpc-cni".to_string(),
            version: "v1.18.0".to_string(),
        });
        config
    }

    fn setup(config: ClusterConfig, fail: &[&str]) -> (Arc<LocalBackend>, StackManager) {
        let backend = Arc::new(LocalBackend::new(&SimulationConfig {
            latency_ms: 0,
            fail_resources: fail.iter().map(|s| s.to_string()).collect(),
        }));
        let manager =
            StackManager::new(backend.clone(), Arc::new(config)).with_policy(fast_policy());
        (backend, manager)
    }

    fn seeded_stack(config: &ClusterConfig, kind: StackKind, name: String, version: u32) -> Stack {
        let now = Utc::now();
        Stack {
            id: format!("stack/{}", name),
            name,
            kind,
            status: StackStatus::CreateComplete,
            status_reason: None,
            parameters: BTreeMap::from([(
                keys::TEMPLATE_VERSION_KEY.to_string(),
                version.to_string(),
            )]),
            outputs: BTreeMap::new(),
            tags: BTreeMap::from([(
                keys::CLUSTER_NAME_TAG.to_string(),
                config.name().to_string(),
            )]),
            template: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_create_cluster_plan() {
        let (_, manager) = setup(sample_config(), &[]);
        let tree = manager.tasks_to_create_cluster(Vec::new());

        assert_eq!(
            tree.describe(),
            r#"2 sequential tasks: {
    create cluster control plane "dev",
    2 parallel sub-tasks: {
        2 parallel sub-tasks: {
            create nodegroup "ng-1",
            create nodegroup "ng-2",
        },
        1 parallel sub-task: {
            2 sequential sub-tasks: {
                create managed nodegroup "mng-1",
                propagate tags to ASG for managed nodegroup "mng-1",
            },
        },
    },
}"#
        );
    }

    #[test]
    fn test_create_cluster_with_post_tasks() {
        let (_, manager) = setup(ClusterConfig::new("dev", "us-west-2"), &[]);
        let post: Vec<Box<dyn Task>> = vec![Box::new(GenericTask::new(
            "bootstrap node authorization",
            || async { Ok(()) },
        ))];
        let tree = manager.tasks_to_create_cluster(post);

        assert_eq!(tree.len(), 2);
        assert_eq!(
            tree.describe(),
            r#"2 sequential tasks: {
    create cluster control plane "dev",
    1 sequential sub-task: {
        bootstrap node authorization,
    },
}"#
        );
    }

    #[tokio::test]
    async fn test_create_cluster_runs_all_stacks() {
        let (backend, manager) = setup(sample_config(), &[]);
        let tree = manager.tasks_to_create_cluster(Vec::new());

        assert!(tree.do_all().await.is_empty());
        assert_eq!(backend.len(), 4);

        let stacks = manager.list_nodegroup_stacks().await.unwrap();
        assert_eq!(stacks.len(), 3);
        let managed = stacks.iter().find(|s| s.managed).unwrap();
        assert_eq!(managed.nodegroup_name, "mng-1");
        assert_eq!(managed.stack.output("PropagatedTag:team"), Some("platform"));
    }

    #[tokio::test]
    async fn test_failed_nodegroup_does_not_stop_siblings() {
        let (backend, manager) = setup(sample_config(), &["ng-1"]);
        let tree = manager.tasks_to_create_cluster(Vec::new());

        let failures = tree.do_all().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].leaf_failures(), 1);
        assert!(failures[0].render_detail().contains("create nodegroup \"ng-1\""));

        let ng2 = backend
            .describe_stack("stackctl-dev-nodegroup-ng-2")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ng2.status, StackStatus::CreateComplete);
    }

    #[tokio::test]
    async fn test_compatibility_task_upgrades_old_template() {
        let config = sample_config();
        let (backend, manager) = setup(config.clone(), &[]);
        backend.insert_stack(seeded_stack(
            &config,
            StackKind::Cluster {
                name: "dev".to_string(),
            },
            "stackctl-dev-cluster".to_string(),
            1,
        ));

        manager.fix_cluster_compatibility_task().run().await.unwrap();

        let stack = manager.describe_cluster_stack().await.unwrap().unwrap();
        assert_eq!(stack.status, StackStatus::UpdateComplete);
        assert_eq!(
            stack.parameter(keys::TEMPLATE_VERSION_KEY),
            Some(keys::TEMPLATE_VERSION.to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_compatibility_task_requires_cluster() {
        let (_, manager) = setup(sample_config(), &[]);
        let err = manager.fix_cluster_compatibility_task().run().await.unwrap_err();
        assert!(matches!(err, TaskError::Failed { .. }));
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn test_update_addons_creates_then_updates() {
        let config = sample_config();
        let (_, manager) = setup(config.clone(), &[]);

        let tree = manager.tasks_to_update_addons(&config.addons).await.unwrap();
        assert!(tree.describe().contains("create addon \"vpc-cni\" at v1.18.0"));
        assert!(tree.do_all().await.is_empty());

        let tree = manager.tasks_to_update_addons(&config.addons).await.unwrap();
        assert!(tree.describe().contains("update addon \"vpc-cni\" to v1.18.0"));
        assert!(tree.do_all().await.is_empty());
    }

    #[tokio::test]
    async fn test_delete_cluster_requires_cluster_stack() {
        let (_, manager) = setup(sample_config(), &[]);
        let result = manager.tasks_to_delete_cluster_with_nodegroups(true, None).await;
        assert!(matches!(result, Err(StackError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_delete_cluster_plan_and_run() {
        let config = sample_config();
        let (backend, manager) = setup(config.clone(), &[]);
        assert!(manager.tasks_to_create_cluster(Vec::new()).do_all().await.is_empty());
        assert!(
            manager
                .tasks_to_update_addons(&config.addons)
                .await
                .unwrap()
                .do_all()
                .await
                .is_empty()
        );
        backend.insert_stack(seeded_stack(
            &config,
            StackKind::Deprecated {
                name: "dev".to_string(),
            },
            "stackctl-dev-legacy-iam".to_string(),
            1,
        ));

        let deletion = manager
            .tasks_to_delete_cluster_with_nodegroups(true, None)
            .await
            .unwrap();
        assert_eq!(
            deletion.dependents.describe(),
            r#"3 sequential tasks: {
    1 sequential sub-task: {
        delete deprecated stack "stackctl-dev-legacy-iam",
    },
    3 parallel sub-tasks: {
        delete nodegroup "mng-1",
        delete nodegroup "ng-1",
        delete nodegroup "ng-2",
    },
    1 parallel sub-task: {
        delete IAM resources of addon "vpc-cni",
    },
}"#
        );
        assert_eq!(
            deletion.control_plane.describe(),
            "1 sequential task: {\n    delete cluster control plane \"dev\",\n}"
        );

        assert!(deletion.dependents.do_all().await.is_empty());
        assert_eq!(backend.len(), 1);
        assert!(deletion.control_plane.do_all().await.is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_delete_nodegroups_with_cleanup() {
        let config = sample_config();
        let (backend, manager) = setup(config.clone(), &[]);
        for name in ["ng-1", "ng-2"] {
            let mut failed = seeded_stack(
                &config,
                StackKind::NodeGroup {
                    name: name.to_string(),
                },
                env::nodegroup_stack_name("dev", name),
                3,
            );
            failed.status = StackStatus::DeleteFailed;
            backend.insert_stack(failed);
        }

        // every cleanup must see both stacks still in place
        let cleaned = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = cleaned.clone();
        let observed = backend.clone();
        let cleanup: CleanupFn = Arc::new(move |name: String| {
            let seen = seen.clone();
            let observed = observed.clone();
            async move {
                let remaining = observed.list_stacks().await?.len();
                seen.lock().unwrap().push((name, remaining));
                Ok::<(), anyhow::Error>(())
            }
            .boxed()
        });

        let stacks = manager.list_nodegroup_stacks().await.unwrap();
        let tree = manager.tasks_to_delete_nodegroups(&stacks, |_| true, true, Some(cleanup));
        assert_eq!(
            tree.describe(),
            r#"2 sequential tasks: {
    2 sequential sub-tasks: {
        cleanup for nodegroup "ng-1",
        cleanup for nodegroup "ng-2",
    },
    2 parallel sub-tasks: {
        delete nodegroup "ng-1",
        delete nodegroup "ng-2",
    },
}"#
        );
        assert!(tree.do_all().await.is_empty());
        assert_eq!(
            *cleaned.lock().unwrap(),
            vec![("ng-1".to_string(), 2), ("ng-2".to_string(), 2)]
        );
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_delete_nodegroups_without_failed_stacks_is_flat() {
        let config = sample_config();
        let (backend, manager) = setup(config.clone(), &[]);
        backend.insert_stack(seeded_stack(
            &config,
            StackKind::NodeGroup {
                name: "ng-1".to_string(),
            },
            env::nodegroup_stack_name("dev", "ng-1"),
            3,
        ));
        let cleanup: CleanupFn = Arc::new(|_: String| async { Ok::<(), anyhow::Error>(()) }.boxed());

        let stacks = manager.list_nodegroup_stacks().await.unwrap();
        let tree = manager.tasks_to_delete_nodegroups(&stacks, |_| true, false, Some(cleanup));
        assert_eq!(
            tree.describe(),
            "1 parallel task: {\n    delete nodegroup \"ng-1\",\n}"
        );
    }
}
