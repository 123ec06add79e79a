//! Closure-backed leaf tasks.
//!
//! Most leaves in a lifecycle plan are one-off operations ("fix cluster
//! compatibility", "cleanup for nodegroup") that do not deserve a dedicated
//! type. These wrappers turn an async closure into a [`Task`].

use crate::task::types::{Task, TaskError};
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;

type Doer = dyn Fn() -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;
type NamedDoer = dyn Fn(String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// Leaf task made of a description and an async closure
pub struct GenericTask {
    description: String,
    doer: Box<Doer>,
}

impl GenericTask {
    pub fn new<F, Fut>(description: impl Into<String>, doer: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            description: description.into(),
            doer: Box::new(move || doer().boxed()),
        }
    }
}

#[async_trait]
impl Task for GenericTask {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        (self.doer)()
            .await
            .map_err(|err| TaskError::from_anyhow(&self.description, &err))
    }
}

/// Leaf task whose closure receives the name of the resource it acts on
pub struct NamedTask {
    description: String,
    name: String,
    doer: Box<NamedDoer>,
}

impl NamedTask {
    pub fn new<F, Fut>(description: impl Into<String>, name: impl Into<String>, doer: F) -> Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            description: description.into(),
            name: name.into(),
            doer: Box::new(move |name| doer(name).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Task for NamedTask {
    fn describe(&self) -> String {
        self.description.clone()
    }

    async fn run(&self) -> Result<(), TaskError> {
        (self.doer)(self.name.clone())
            .await
            .map_err(|err| TaskError::from_anyhow(&self.description, &err))
    }
}
