//! Workload view derived from the local stack backend.
//!
//! A nodegroup's nodes count as Ready once its stack has been healthy for
//! the configured join latency; the authorization map is kept in memory and
//! optionally persisted next to the stack snapshot.

use crate::config::{ClusterConfig, SimulationConfig};
use crate::env::{self, stack as keys};
use crate::stack::StackBackend;
use crate::workload::{AuthMap, AuthMapStore, NodeStatusSource, WorkloadError};
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs as async_fs;
use tokio::sync::RwLock;
use tracing::debug;

pub struct LocalWorkload {
    backend: Arc<dyn StackBackend>,
    cluster: String,
    join_latency: chrono::Duration,
    auth_map: RwLock<AuthMap>,
    state_file: Option<PathBuf>,
}

impl LocalWorkload {
    pub fn new(backend: Arc<dyn StackBackend>, config: &ClusterConfig) -> Self {
        Self {
            backend,
            cluster: config.name().to_string(),
            join_latency: join_latency(&config.simulation),
            auth_map: RwLock::new(AuthMap::default()),
            state_file: None,
        }
    }

    /// Create a workload whose authorization map lives in `path`
    pub async fn open(
        backend: Arc<dyn StackBackend>,
        config: &ClusterConfig,
        path: impl AsRef<Path>,
    ) -> Result<Self, WorkloadError> {
        let path = path.as_ref();
        let mut workload = Self::new(backend, config);
        workload.state_file = Some(path.to_path_buf());

        let io_err = |source| WorkloadError::Io {
            path: path.to_path_buf(),
            source,
        };
        if async_fs::try_exists(path).await.map_err(io_err)? {
            let content = async_fs::read_to_string(path).await.map_err(io_err)?;
            let map: AuthMap = serde_json::from_str(&content)?;
            debug!("loaded {} role mapping(s) from {:?}", map.map_roles.len(), path);
            workload.auth_map = RwLock::new(map);
        }
        Ok(workload)
    }

    pub async fn flush(&self) -> Result<(), WorkloadError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let io_err = |source| WorkloadError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let content = serde_json::to_string_pretty(&*self.auth_map.read().await)?;
        async_fs::write(path, content).await.map_err(io_err)?;
        Ok(())
    }
}

fn join_latency(simulation: &SimulationConfig) -> chrono::Duration {
    chrono::Duration::milliseconds(simulation.latency_ms as i64)
}

#[async_trait]
impl NodeStatusSource for LocalWorkload {
    async fn ready_nodes(&self, nodegroup: &str) -> Result<usize, WorkloadError> {
        let name = env::nodegroup_stack_name(&self.cluster, nodegroup);
        let Some(stack) = self.backend.describe_stack(&name).await? else {
            return Ok(0);
        };
        if !stack.status.is_healthy() || Utc::now() < stack.updated_at + self.join_latency {
            return Ok(0);
        }
        Ok(stack
            .parameter(keys::DESIRED_CAPACITY_KEY)
            .and_then(|capacity| capacity.parse().ok())
            .unwrap_or(0))
    }
}

#[async_trait]
impl AuthMapStore for LocalWorkload {
    async fn load(&self) -> Result<AuthMap, WorkloadError> {
        Ok(self.auth_map.read().await.clone())
    }

    async fn store(&self, map: AuthMap) -> Result<(), WorkloadError> {
        *self.auth_map.write().await = map;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeGroupSpec;
    use crate::stack::{LocalBackend, template};
    use tempfile::TempDir;

    fn setup() -> (Arc<LocalBackend>, ClusterConfig) {
        let mut config = ClusterConfig::new("dev", "us-west-2");
        config.simulation.latency_ms = 0;
        let backend = Arc::new(LocalBackend::new(&config.simulation));
        (backend, config)
    }

    #[tokio::test]
    async fn test_ready_nodes_follow_stack() {
        let (backend, config) = setup();
        let workload = LocalWorkload::new(backend.clone(), &config);
        assert_eq!(workload.ready_nodes("ng-1").await.unwrap(), 0);

        let mut ng = NodeGroupSpec::new("ng-1");
        ng.desired_capacity = 3;
        backend
            .create_stack(template::nodegroup_request(&config, &ng, false, None))
            .await
            .unwrap();
        assert_eq!(workload.ready_nodes("ng-1").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_auth_map_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("auth").join("dev.json");
        let (backend, config) = setup();

        let workload = LocalWorkload::open(backend.clone(), &config, &path).await.unwrap();
        let mut map = workload.load().await.unwrap();
        map.add_node_role("arn:aws:iam::000000000000:role/ng-1");
        workload.store(map).await.unwrap();
        workload.flush().await.unwrap();

        let reloaded = LocalWorkload::open(backend, &config, &path).await.unwrap();
        assert!(
            reloaded
                .load()
                .await
                .unwrap()
                .contains("arn:aws:iam::000000000000:role/ng-1")
        );
    }

    #[tokio::test]
    async fn test_unreadable_auth_map_path_is_an_error() {
        let dir = TempDir::new().unwrap();
        let not_a_dir = dir.path().join("state");
        std::fs::write(&not_a_dir, "").unwrap();
        let (backend, config) = setup();

        let result = LocalWorkload::open(backend, &config, not_a_dir.join("dev.json")).await;
        assert!(matches!(result, Err(WorkloadError::Io { .. })));
    }
}
