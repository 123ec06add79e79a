//! # Stack Management
//!
//! Everything that talks to the declarative provisioning backend. The task
//! engine never looks inside these tasks; it only describes and runs them.
//!
//! ## Core Components
//!
//! - **[`StackBackend`]**: narrow async interface to the provisioning backend
//! - **[`StackManager`]**: factory turning cluster configuration into task trees
//! - **[`StackTask`]**: create, update or delete one stack, optionally waiting
//! - **[`LocalBackend`]**: in-process backend with JSON snapshots, used by the CLI
//!
//! ## Stack Lifecycle
//!
//! ```text
//! create ─► CREATE_IN_PROGRESS ─► CREATE_COMPLETE ─► update ─► UPDATE_IN_PROGRESS
//!                 │                                                │
//!                 └─► ROLLBACK_COMPLETE                            ├─► UPDATE_COMPLETE
//!                                                                  └─► UPDATE_ROLLBACK_COMPLETE
//! delete ─► DELETE_IN_PROGRESS ─► (gone) | DELETE_FAILED
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Task factory over the backend
pub mod manager;

/// Template and request construction for each stack kind
pub mod template;

/// Stack operations wrapped as tasks
pub mod tasks;

/// Polling until a stack settles
pub mod waiter;

/// In-process backend used by the CLI and tests
pub mod local;

pub use local::LocalBackend;
pub use manager::{CleanupFn, ClusterDeletion, NodeGroupStack, StackManager};
pub use tasks::{StackAction, StackTask, TagPropagationTask};
pub use waiter::{WaitPolicy, wait_for_stack};

/// Lifecycle state of a stack
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    CreateInProgress,
    CreateComplete,
    CreateFailed,
    RollbackComplete,
    UpdateInProgress,
    UpdateComplete,
    UpdateRollbackComplete,
    DeleteInProgress,
    DeleteComplete,
    DeleteFailed,
}

impl StackStatus {
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            Self::CreateInProgress | Self::UpdateInProgress | Self::DeleteInProgress
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::CreateFailed | Self::RollbackComplete | Self::UpdateRollbackComplete | Self::DeleteFailed
        )
    }

    /// Stack is usable and can be updated
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::CreateComplete | Self::UpdateComplete | Self::UpdateRollbackComplete)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::CreateInProgress => "CREATE_IN_PROGRESS",
            Self::CreateComplete => "CREATE_COMPLETE",
            Self::CreateFailed => "CREATE_FAILED",
            Self::RollbackComplete => "ROLLBACK_COMPLETE",
            Self::UpdateInProgress => "UPDATE_IN_PROGRESS",
            Self::UpdateComplete => "UPDATE_COMPLETE",
            Self::UpdateRollbackComplete => "UPDATE_ROLLBACK_COMPLETE",
            Self::DeleteInProgress => "DELETE_IN_PROGRESS",
            Self::DeleteComplete => "DELETE_COMPLETE",
            Self::DeleteFailed => "DELETE_FAILED",
        };
        write!(f, "{}", name)
    }
}

/// Operation a waiter is waiting on
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StackOperation {
    Create,
    Update,
    Delete,
}

impl StackOperation {
    pub fn success_status(&self) -> StackStatus {
        match self {
            Self::Create => StackStatus::CreateComplete,
            Self::Update => StackStatus::UpdateComplete,
            Self::Delete => StackStatus::DeleteComplete,
        }
    }
}

impl fmt::Display for StackOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// What a stack provisions
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StackKind {
    Cluster { name: String },
    NodeGroup { name: String },
    ManagedNodeGroup { name: String },
    Addon { name: String },
    /// Left behind by older releases; only ever deleted
    Deprecated { name: String },
}

impl StackKind {
    /// Name of the cluster, nodegroup or addon this stack provisions
    pub fn resource_name(&self) -> &str {
        match self {
            Self::Cluster { name }
            | Self::NodeGroup { name }
            | Self::ManagedNodeGroup { name }
            | Self::Addon { name }
            | Self::Deprecated { name } => name,
        }
    }

    pub fn is_nodegroup(&self) -> bool {
        matches!(self, Self::NodeGroup { .. } | Self::ManagedNodeGroup { .. })
    }
}

/// Snapshot of a stack as reported by the backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stack {
    pub id: String,
    pub name: String,
    pub kind: StackKind,
    pub status: StackStatus,
    pub status_reason: Option<String>,
    pub parameters: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub template: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Stack {
    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn output(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).map(String::as_str)
    }
}

/// Desired state submitted for create or update
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackRequest {
    pub name: String,
    pub kind: StackKind,
    pub parameters: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub template: serde_json::Value,
}

#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("stack {name:?} not found")]
    NotFound { name: String },

    #[error("stack {name:?} already exists")]
    AlreadyExists { name: String },

    #[error("stack {name:?} cannot be updated in state {status}")]
    UpdateNotPossible { name: String, status: StackStatus },

    #[error("stack {name:?} entered {status} while waiting for {operation} to complete{}", reason_suffix(.reason))]
    UnexpectedStatus {
        name: String,
        operation: StackOperation,
        status: StackStatus,
        reason: Option<String>,
    },

    #[error("timed out after {timeout:?} waiting for {operation} of stack {name:?}")]
    Timeout {
        name: String,
        operation: StackOperation,
        timeout: Duration,
    },

    #[error("failed to access stack state {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to (de)serialize stack state: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

fn reason_suffix(reason: &Option<String>) -> String {
    match reason {
        Some(reason) => format!(": {}", reason),
        None => String::new(),
    }
}

/// Provisioning backend boundary
#[async_trait]
pub trait StackBackend: Send + Sync {
    async fn create_stack(&self, request: StackRequest) -> Result<Stack, StackError>;

    async fn update_stack(&self, request: StackRequest) -> Result<Stack, StackError>;

    /// Start deleting a stack; completion is observed through `describe_stack`
    async fn delete_stack(&self, name: &str) -> Result<(), StackError>;

    /// `None` once a stack no longer exists
    async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, StackError>;

    async fn list_stacks(&self) -> Result<Vec<Stack>, StackError>;

    /// Copy tags onto the resources a stack created (e.g. autoscaling groups)
    async fn tag_stack_resources(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), StackError>;
}
