use crate::stack::{
    StackBackend, StackError, StackOperation, StackRequest, WaitPolicy, wait_for_stack,
};
use crate::task::{Task, TaskError};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Backend operation a [`StackTask`] performs
#[derive(Debug, Clone)]
pub enum StackAction {
    Create(StackRequest),
    Update(StackRequest),
    Delete { name: String },
}

impl StackAction {
    pub fn stack_name(&self) -> &str {
        match self {
            Self::Create(request) | Self::Update(request) => &request.name,
            Self::Delete { name } => name,
        }
    }

    pub fn operation(&self) -> StackOperation {
        match self {
            Self::Create(_) => StackOperation::Create,
            Self::Update(_) => StackOperation::Update,
            Self::Delete { .. } => StackOperation::Delete,
        }
    }
}

/// Create, update or delete one stack and optionally wait for it to settle
pub struct StackTask {
    info: String,
    action: StackAction,
    backend: Arc<dyn StackBackend>,
    policy: WaitPolicy,
    wait: bool,
}

impl StackTask {
    pub fn new(
        info: impl Into<String>,
        action: StackAction,
        backend: Arc<dyn StackBackend>,
        policy: WaitPolicy,
    ) -> Self {
        Self {
            info: info.into(),
            action,
            backend,
            policy,
            wait: true,
        }
    }

    /// Return as soon as the backend accepted the operation
    pub fn without_wait(mut self) -> Self {
        self.wait = false;
        self
    }

    pub fn action(&self) -> &StackAction {
        &self.action
    }

    pub fn waits(&self) -> bool {
        self.wait
    }

    async fn apply(&self) -> Result<(), StackError> {
        let name = self.action.stack_name();
        match &self.action {
            StackAction::Create(request) => {
                self.backend.create_stack(request.clone()).await?;
            }
            StackAction::Update(request) => {
                self.backend.update_stack(request.clone()).await?;
            }
            StackAction::Delete { name } => match self.backend.delete_stack(name).await {
                Ok(()) => {}
                Err(StackError::NotFound { .. }) => {
                    debug!("stack {:?} is already gone", name);
                    return Ok(());
                }
                Err(err) => return Err(err),
            },
        }

        if !self.wait {
            info!("initiated {} of stack {:?}", self.action.operation(), name);
            return Ok(());
        }
        wait_for_stack(self.backend.as_ref(), name, self.action.operation(), self.policy).await?;
        info!("{} of stack {:?} completed", self.action.operation(), name);
        Ok(())
    }
}

#[async_trait]
impl Task for StackTask {
    fn describe(&self) -> String {
        self.info.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.apply()
            .await
            .map_err(|err| TaskError::failed(&self.info, err))
    }
}

/// Copy tags onto the resources a managed nodegroup stack created
pub struct TagPropagationTask {
    info: String,
    stack_name: String,
    tags: BTreeMap<String, String>,
    backend: Arc<dyn StackBackend>,
}

impl TagPropagationTask {
    pub fn new(
        info: impl Into<String>,
        stack_name: impl Into<String>,
        tags: BTreeMap<String, String>,
        backend: Arc<dyn StackBackend>,
    ) -> Self {
        Self {
            info: info.into(),
            stack_name: stack_name.into(),
            tags,
            backend,
        }
    }
}

#[async_trait]
impl Task for TagPropagationTask {
    fn describe(&self) -> String {
        self.info.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        self.backend
            .tag_stack_resources(&self.stack_name, &self.tags)
            .await
            .map_err(|err| TaskError::failed(&self.info, err))?;
        debug!(
            "propagated {} tag(s) to resources of stack {:?}",
            self.tags.len(),
            self.stack_name
        );
        Ok(())
    }
}
