use crate::task::tree::TaskTree;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Indentation unit used by plan text and failure detail rendering
pub(crate) const INDENT: &str = "    ";

/// Execution strategy for the children of a [`TaskTree`]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run children one at a time, in append order
    #[default]
    Sequential,
    /// Run every child on its own worker and join on all of them
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Sequential => write!(f, "sequential"),
            ExecutionMode::Parallel => write!(f, "parallel"),
        }
    }
}

/// A describable, runnable unit of work.
///
/// Implementations own whatever handles they need. Siblings inside a parallel
/// tree may run concurrently, so `run` must not rely on exclusive access to
/// anything it does not own.
#[async_trait]
pub trait Task: Send + Sync {
    /// Short human-readable description used in the execution plan
    fn describe(&self) -> String;

    /// Perform the side effect
    async fn run(&self) -> Result<(), TaskError>;

    /// Structural view used by the plan renderer; only [`TaskTree`] returns `Some`
    fn as_tree(&self) -> Option<&TaskTree> {
        None
    }
}

/// Failure produced by running a task or a task tree
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// A leaf task returned an error
    #[error("{task}: {message}")]
    Failed { task: String, message: String },

    /// One or more descendants of a task tree failed
    #[error("{} of {total} sub-tasks failed in {task}", .failures.len())]
    Aggregate {
        task: String,
        total: usize,
        failures: Vec<TaskError>,
    },

    /// A task panicked on its worker
    #[error("{task}: task panicked: {message}")]
    Panicked { task: String, message: String },
}

impl TaskError {
    /// Leaf failure with a plain message
    pub fn failed(task: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Failed {
            task: task.into(),
            message: message.to_string(),
        }
    }

    /// Leaf failure keeping the whole context chain of an `anyhow` error
    pub fn from_anyhow(task: impl Into<String>, error: &anyhow::Error) -> Self {
        Self::Failed {
            task: task.into(),
            message: format!("{:#}", error),
        }
    }

    /// Description of the task (or tree) that failed
    pub fn task(&self) -> &str {
        match self {
            Self::Failed { task, .. } | Self::Aggregate { task, .. } | Self::Panicked { task, .. } => {
                task
            }
        }
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Aggregate { .. })
    }

    /// Direct children of an aggregate failure; empty for leaf failures
    pub fn failures(&self) -> &[TaskError] {
        match self {
            Self::Aggregate { failures, .. } => failures,
            _ => &[],
        }
    }

    /// Number of leaf failures underneath this one (1 for a leaf)
    pub fn leaf_failures(&self) -> usize {
        match self {
            Self::Aggregate { failures, .. } => failures.iter().map(Self::leaf_failures).sum(),
            _ => 1,
        }
    }

    /// Multi-line rendering that keeps the nesting of aggregate failures
    pub fn render_detail(&self) -> String {
        let mut lines = Vec::new();
        self.detail_lines(0, &mut lines);
        lines.join("\n")
    }

    fn detail_lines(&self, depth: usize, lines: &mut Vec<String>) {
        lines.push(format!("{}{}", INDENT.repeat(depth), self));
        for failure in self.failures() {
            failure.detail_lines(depth + 1, lines);
        }
    }
}
