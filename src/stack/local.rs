//! In-process provisioning backend.
//!
//! Stacks live in a concurrent map and move through their lifecycle lazily:
//! each operation records when it will settle and what it settles into, and
//! the transition is applied the next time the stack is observed. State can
//! be flushed to and reloaded from a JSON snapshot so consecutive CLI
//! invocations see the same stacks.

use crate::config::SimulationConfig;
use crate::env::stack as keys;
use crate::stack::{Stack, StackBackend, StackError, StackKind, StackRequest, StackStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingTransition {
    ready_at: DateTime<Utc>,
    outcome: StackStatus,
    reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StackRecord {
    stack: Stack,
    pending: Option<PendingTransition>,
}

impl StackRecord {
    /// Apply the pending transition if it is due; returns true once a delete completed
    fn settle(&mut self, now: DateTime<Utc>) -> bool {
        let due = matches!(&self.pending, Some(pending) if pending.ready_at <= now);
        if !due {
            return false;
        }
        let Some(pending) = self.pending.take() else {
            return false;
        };
        if pending.outcome == StackStatus::DeleteComplete {
            return true;
        }

        self.stack.status = pending.outcome;
        self.stack.status_reason = pending.reason;
        self.stack.updated_at = pending.ready_at;
        if self.stack.kind.is_nodegroup() && pending.outcome.is_healthy() {
            let role = self
                .stack
                .parameter(keys::INSTANCE_ROLE_OUTPUT)
                .map(str::to_owned)
                .unwrap_or_else(|| {
                    format!("arn:aws:iam::000000000000:role/{}-NodeInstanceRole", self.stack.name)
                });
            self.stack
                .outputs
                .insert(keys::INSTANCE_ROLE_OUTPUT.to_string(), role);
        }
        false
    }
}

/// Local backend shipped with the CLI
pub struct LocalBackend {
    stacks: DashMap<String, StackRecord>,
    latency: chrono::Duration,
    fail_resources: HashSet<String>,
    state_file: Option<PathBuf>,
}

impl LocalBackend {
    pub fn new(simulation: &SimulationConfig) -> Self {
        Self {
            stacks: DashMap::new(),
            latency: chrono::Duration::milliseconds(simulation.latency_ms as i64),
            fail_resources: simulation.fail_resources.iter().cloned().collect(),
            state_file: None,
        }
    }

    /// Create a backend backed by a snapshot file, loading it if it exists
    pub fn load(simulation: &SimulationConfig, path: impl AsRef<Path>) -> Result<Self, StackError> {
        let path = path.as_ref();
        let mut backend = Self::new(simulation);
        backend.state_file = Some(path.to_path_buf());

        if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| StackError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let records: Vec<StackRecord> = serde_json::from_str(&content)?;
            debug!("loaded {} stacks from {:?}", records.len(), path);
            for record in records {
                backend.stacks.insert(record.stack.name.clone(), record);
            }
        }
        Ok(backend)
    }

    /// Write every stack to the snapshot file, if one was configured
    pub fn flush(&self) -> Result<(), StackError> {
        let Some(path) = &self.state_file else {
            return Ok(());
        };
        let io_err = |source| StackError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut records: Vec<StackRecord> = self.stacks.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.stack.name.cmp(&b.stack.name));
        let content = serde_json::to_string_pretty(&records)?;
        std::fs::write(path, content).map_err(io_err)?;
        info!("saved {} stacks to {:?}", records.len(), path);
        Ok(())
    }

    /// Seed a stack in its current state, bypassing the lifecycle
    pub fn insert_stack(&self, stack: Stack) {
        self.stacks.insert(
            stack.name.clone(),
            StackRecord {
                stack,
                pending: None,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    fn should_fail(&self, kind: &StackKind) -> bool {
        self.fail_resources.contains(kind.resource_name())
    }

    fn transition(&self, kind: &StackKind, success: StackStatus, failure: StackStatus) -> PendingTransition {
        let (outcome, reason) = if self.should_fail(kind) {
            (
                failure,
                Some(format!("simulated failure for {:?}", kind.resource_name())),
            )
        } else {
            (success, None)
        };
        PendingTransition {
            ready_at: Utc::now() + self.latency,
            outcome,
            reason,
        }
    }

    fn settle(&self, name: &str) {
        let now = Utc::now();
        let deleted = match self.stacks.get_mut(name) {
            Some(mut record) => record.settle(now),
            None => false,
        };
        if deleted {
            debug!("stack {:?} deleted", name);
            self.stacks.remove(name);
        }
    }
}

#[async_trait]
impl StackBackend for LocalBackend {
    async fn create_stack(&self, request: StackRequest) -> Result<Stack, StackError> {
        self.settle(&request.name);
        if self.stacks.contains_key(&request.name) {
            return Err(StackError::AlreadyExists { name: request.name });
        }

        let now = Utc::now();
        let pending = self.transition(&request.kind, StackStatus::CreateComplete, StackStatus::RollbackComplete);
        let stack = Stack {
            id: format!("stack/{}/{}", request.name, uuid::Uuid::new_v4()),
            name: request.name.clone(),
            kind: request.kind,
            status: StackStatus::CreateInProgress,
            status_reason: None,
            parameters: request.parameters,
            outputs: BTreeMap::new(),
            tags: request.tags,
            template: request.template,
            created_at: now,
            updated_at: now,
        };
        debug!("creating stack {:?}", stack.name);
        self.stacks.insert(
            request.name,
            StackRecord {
                stack: stack.clone(),
                pending: Some(pending),
            },
        );
        Ok(stack)
    }

    async fn update_stack(&self, request: StackRequest) -> Result<Stack, StackError> {
        self.settle(&request.name);
        let mut record = self
            .stacks
            .get_mut(&request.name)
            .ok_or_else(|| StackError::NotFound {
                name: request.name.clone(),
            })?;

        let status = record.stack.status;
        if !status.is_healthy() || record.pending.is_some() {
            return Err(StackError::UpdateNotPossible {
                name: request.name,
                status,
            });
        }

        record.pending = Some(self.transition(
            &request.kind,
            StackStatus::UpdateComplete,
            StackStatus::UpdateRollbackComplete,
        ));
        let stack = &mut record.stack;
        stack.status = StackStatus::UpdateInProgress;
        stack.status_reason = None;
        stack.parameters = request.parameters;
        stack.tags = request.tags;
        stack.template = request.template;
        stack.updated_at = Utc::now();
        debug!("updating stack {:?}", stack.name);
        Ok(stack.clone())
    }

    async fn delete_stack(&self, name: &str) -> Result<(), StackError> {
        self.settle(name);
        let mut record = self.stacks.get_mut(name).ok_or_else(|| StackError::NotFound {
            name: name.to_string(),
        })?;
        if record.stack.status == StackStatus::DeleteInProgress {
            return Ok(());
        }

        record.pending = Some(self.transition(
            &record.stack.kind,
            StackStatus::DeleteComplete,
            StackStatus::DeleteFailed,
        ));
        record.stack.status = StackStatus::DeleteInProgress;
        record.stack.updated_at = Utc::now();
        debug!("deleting stack {:?}", name);
        Ok(())
    }

    async fn describe_stack(&self, name: &str) -> Result<Option<Stack>, StackError> {
        self.settle(name);
        Ok(self.stacks.get(name).map(|record| record.stack.clone()))
    }

    async fn list_stacks(&self) -> Result<Vec<Stack>, StackError> {
        let names: Vec<String> = self.stacks.iter().map(|r| r.key().clone()).collect();
        let mut stacks = Vec::with_capacity(names.len());
        for name in names {
            if let Some(stack) = self.describe_stack(&name).await? {
                stacks.push(stack);
            }
        }
        stacks.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stacks)
    }

    async fn tag_stack_resources(
        &self,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), StackError> {
        self.settle(name);
        let mut record = self.stacks.get_mut(name).ok_or_else(|| StackError::NotFound {
            name: name.to_string(),
        })?;
        if self.should_fail(&record.stack.kind) {
            return Err(StackError::Backend(format!(
                "simulated failure tagging resources of stack {:?}",
                name
            )));
        }
        for (key, value) in tags {
            record
                .stack
                .outputs
                .insert(format!("PropagatedTag:{}", key), value.clone());
        }
        Ok(())
    }
}
