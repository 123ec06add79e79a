//! # Workload Layer
//!
//! Collaborators that talk to the running cluster rather than to the
//! provisioning backend: node readiness and the node authorization map.
//! Both are exposed as leaf tasks so they compose into the same task trees
//! as stack operations.

use crate::stack::StackError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Workload leaf tasks
pub mod tasks;

/// In-process workload backed by the local stack backend
pub mod local;

pub use local::LocalWorkload;
pub use tasks::{AuthMapChange, NodeGroupRole, UpdateAuthMapTask, WaitForNodesTask};

/// Username template the node bootstrap expects
pub const NODE_USERNAME: &str = "system:node:{{EC2PrivateDNSName}}";

/// Groups granted to every node role
pub const NODE_GROUPS: [&str; 2] = ["system:bootstrappers", "system:nodes"];

#[derive(Debug, thiserror::Error)]
pub enum WorkloadError {
    #[error(
        "timed out after {timeout:?} waiting for at least {expected} nodes of nodegroup {nodegroup:?} to be ready (got {ready})"
    )]
    NodesNotReady {
        nodegroup: String,
        ready: usize,
        expected: usize,
        timeout: Duration,
    },

    #[error("cannot resolve the instance role of nodegroup {nodegroup:?}")]
    RoleNotFound { nodegroup: String },

    #[error("failed to access workload state {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize workload state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Stack(#[from] StackError),
}

/// One entry of the node authorization map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMapping {
    pub rolearn: String,
    pub username: String,
    pub groups: Vec<String>,
}

impl RoleMapping {
    pub fn node(role_arn: impl Into<String>) -> Self {
        Self {
            rolearn: role_arn.into(),
            username: NODE_USERNAME.to_string(),
            groups: NODE_GROUPS.iter().map(|g| g.to_string()).collect(),
        }
    }
}

/// Role mappings that let nodes join the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthMap {
    #[serde(default)]
    pub map_roles: Vec<RoleMapping>,
}

impl AuthMap {
    pub fn contains(&self, role_arn: &str) -> bool {
        self.map_roles.iter().any(|m| m.rolearn == role_arn)
    }

    /// Map a node instance role; returns false if it was already mapped
    pub fn add_node_role(&mut self, role_arn: &str) -> bool {
        if self.contains(role_arn) {
            return false;
        }
        self.map_roles.push(RoleMapping::node(role_arn));
        true
    }

    /// Drop every mapping of a role; returns false if none existed
    pub fn remove_role(&mut self, role_arn: &str) -> bool {
        let before = self.map_roles.len();
        self.map_roles.retain(|m| m.rolearn != role_arn);
        self.map_roles.len() != before
    }
}

/// Reports how many nodes of a nodegroup are Ready
#[async_trait]
pub trait NodeStatusSource: Send + Sync {
    async fn ready_nodes(&self, nodegroup: &str) -> Result<usize, WorkloadError>;
}

/// Storage of the node authorization map
#[async_trait]
pub trait AuthMapStore: Send + Sync {
    async fn load(&self) -> Result<AuthMap, WorkloadError>;

    async fn store(&self, map: AuthMap) -> Result<(), WorkloadError>;
}
