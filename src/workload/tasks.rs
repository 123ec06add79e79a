use crate::env::{self, stack as keys};
use crate::stack::{StackBackend, WaitPolicy};
use crate::task::{Task, TaskError};
use crate::workload::{AuthMapStore, NodeStatusSource, WorkloadError};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info};

/// Poll until at least `min_ready` nodes of a nodegroup report Ready
pub struct WaitForNodesTask {
    info: String,
    nodegroup: String,
    min_ready: usize,
    source: Arc<dyn NodeStatusSource>,
    policy: WaitPolicy,
}

impl WaitForNodesTask {
    pub fn new(
        nodegroup: impl Into<String>,
        min_ready: usize,
        source: Arc<dyn NodeStatusSource>,
        policy: WaitPolicy,
    ) -> Self {
        let nodegroup = nodegroup.into();
        Self {
            info: format!("wait for {} node(s) of nodegroup {:?} to be ready", min_ready, nodegroup),
            nodegroup,
            min_ready,
            source,
            policy,
        }
    }

    async fn wait(&self) -> Result<(), WorkloadError> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut interval = self.policy.poll_interval;
        loop {
            let ready = self.source.ready_nodes(&self.nodegroup).await?;
            if ready >= self.min_ready {
                info!(
                    "nodegroup {:?} has {} node(s) ready",
                    self.nodegroup, ready
                );
                return Ok(());
            }
            debug!(
                "waiting for nodegroup {:?}: {} of {} node(s) ready",
                self.nodegroup, ready, self.min_ready
            );

            let now = Instant::now();
            if now >= deadline {
                return Err(WorkloadError::NodesNotReady {
                    nodegroup: self.nodegroup.clone(),
                    ready,
                    expected: self.min_ready,
                    timeout: self.policy.timeout,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = (interval * 2).min(self.policy.max_poll_interval);
        }
    }
}

#[async_trait]
impl Task for WaitForNodesTask {
    fn describe(&self) -> String {
        self.info.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.wait()
            .await
            .map_err(|err| TaskError::failed(&self.info, err))
    }
}

/// Direction of an authorization map update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMapChange {
    Add,
    Remove,
}

/// Nodegroup whose instance role is reconciled; an explicit role wins over
/// the one its stack reports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeGroupRole {
    pub nodegroup: String,
    pub role_arn: Option<String>,
}

/// Reconcile the node authorization map for a set of nodegroups
pub struct UpdateAuthMapTask {
    info: String,
    change: AuthMapChange,
    cluster: String,
    nodegroups: Vec<NodeGroupRole>,
    store: Arc<dyn AuthMapStore>,
    backend: Arc<dyn StackBackend>,
}

impl UpdateAuthMapTask {
    pub fn new(
        change: AuthMapChange,
        cluster: impl Into<String>,
        nodegroups: Vec<NodeGroupRole>,
        store: Arc<dyn AuthMapStore>,
        backend: Arc<dyn StackBackend>,
    ) -> Self {
        let verb = match change {
            AuthMapChange::Add => "add",
            AuthMapChange::Remove => "remove",
        };
        let names: Vec<String> = nodegroups.iter().map(|ng| format!("{:?}", ng.nodegroup)).collect();
        Self {
            info: format!(
                "{} node role(s) of nodegroup(s) {} in the authorization map",
                verb,
                names.join(", ")
            ),
            change,
            cluster: cluster.into(),
            nodegroups,
            store,
            backend,
        }
    }

    /// `None` when the nodegroup stack is gone and no explicit role is known
    async fn resolve_role(&self, nodegroup: &NodeGroupRole) -> Result<Option<String>, WorkloadError> {
        if let Some(role) = &nodegroup.role_arn {
            return Ok(Some(role.clone()));
        }
        let stack_name = env::nodegroup_stack_name(&self.cluster, &nodegroup.nodegroup);
        let stack = self.backend.describe_stack(&stack_name).await?;
        Ok(stack.and_then(|s| s.output(keys::INSTANCE_ROLE_OUTPUT).map(str::to_owned)))
    }

    async fn apply(&self) -> Result<(), WorkloadError> {
        let mut map = self.store.load().await?;
        let mut changed = 0;
        for nodegroup in &self.nodegroups {
            let role = match (self.resolve_role(nodegroup).await?, self.change) {
                (Some(role), _) => role,
                (None, AuthMapChange::Add) => {
                    return Err(WorkloadError::RoleNotFound {
                        nodegroup: nodegroup.nodegroup.clone(),
                    });
                }
                (None, AuthMapChange::Remove) => {
                    debug!(
                        "no instance role known for nodegroup {:?}, nothing to remove",
                        nodegroup.nodegroup
                    );
                    continue;
                }
            };
            let updated = match self.change {
                AuthMapChange::Add => map.add_node_role(&role),
                AuthMapChange::Remove => map.remove_role(&role),
            };
            if updated {
                changed += 1;
            }
        }

        if changed > 0 {
            self.store.store(map).await?;
        }
        info!("authorization map updated ({} change(s))", changed);
        Ok(())
    }
}

#[async_trait]
impl Task for UpdateAuthMapTask {
    fn describe(&self) -> String {
        self.info.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.apply()
            .await
            .map_err(|err| TaskError::failed(&self.info, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::AuthMap;
    use crate::config::{ClusterConfig, NodeGroupSpec, SimulationConfig};
    use crate::stack::{LocalBackend, template};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;

    fn fast_policy(timeout_ms: u64) -> WaitPolicy {
        WaitPolicy {
            timeout: Duration::from_millis(timeout_ms),
            poll_interval: Duration::from_millis(5),
            max_poll_interval: Duration::from_millis(10),
        }
    }

    /// Reports one more ready node on every poll
    struct GrowingNodes(AtomicUsize);

    #[async_trait]
    impl NodeStatusSource for GrowingNodes {
        async fn ready_nodes(&self, _nodegroup: &str) -> Result<usize, WorkloadError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[derive(Default)]
    struct MemoryStore(Mutex<AuthMap>);

    #[async_trait]
    impl AuthMapStore for MemoryStore {
        async fn load(&self) -> Result<AuthMap, WorkloadError> {
            Ok(self.0.lock().await.clone())
        }

        async fn store(&self, map: AuthMap) -> Result<(), WorkloadError> {
            *self.0.lock().await = map;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_wait_for_nodes() {
        let source = Arc::new(GrowingNodes(AtomicUsize::new(0)));
        let task = WaitForNodesTask::new("ng-1", 3, source, fast_policy(5_000));
        assert_eq!(task.describe(), "wait for 3 node(s) of nodegroup \"ng-1\" to be ready");
        task.run().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_for_nodes_times_out() {
        let source = Arc::new(GrowingNodes(AtomicUsize::new(0)));
        let task = WaitForNodesTask::new("ng-1", 1_000_000, source, fast_policy(30));
        let err = task.run().await.unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_auth_map_add_and_remove() {
        let backend = Arc::new(LocalBackend::new(&SimulationConfig {
            latency_ms: 0,
            fail_resources: Vec::new(),
        }));
        let config = ClusterConfig::new("dev", "us-west-2");
        backend
            .create_stack(template::nodegroup_request(&config, &NodeGroupSpec::new("ng-1"), false, None))
            .await
            .unwrap();
        let store = Arc::new(MemoryStore::default());
        let nodegroups = vec![
            NodeGroupRole {
                nodegroup: "ng-1".to_string(),
                role_arn: None,
            },
            NodeGroupRole {
                nodegroup: "ng-2".to_string(),
                role_arn: Some("arn:aws:iam::000000000000:role/explicit".to_string()),
            },
        ];

        let add = UpdateAuthMapTask::new(
            AuthMapChange::Add,
            "dev",
            nodegroups.clone(),
            store.clone(),
            backend.clone(),
        );
        add.run().await.unwrap();
        add.run().await.unwrap();
        let map = store.load().await.unwrap();
        assert_eq!(map.map_roles.len(), 2);
        assert!(map.contains("arn:aws:iam::000000000000:role/explicit"));

        let remove = UpdateAuthMapTask::new(AuthMapChange::Remove, "dev", nodegroups, store.clone(), backend);
        remove.run().await.unwrap();
        assert!(store.load().await.unwrap().map_roles.is_empty());
    }

    #[tokio::test]
    async fn test_auth_map_add_requires_role() {
        let backend = Arc::new(LocalBackend::new(&SimulationConfig::default()));
        let store = Arc::new(MemoryStore::default());
        let task = UpdateAuthMapTask::new(
            AuthMapChange::Add,
            "dev",
            vec![NodeGroupRole {
                nodegroup: "ng-1".to_string(),
                role_arn: None,
            }],
            store,
            backend,
        );
        let err = task.run().await.unwrap_err();
        assert!(err.to_string().contains("cannot resolve the instance role"));
    }
}
