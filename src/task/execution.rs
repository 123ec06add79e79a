use crate::task::tree::TaskTree;
use crate::task::types::*;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinError;
use tracing::debug;

impl TaskTree {
    /// Run the whole tree in the foreground and return every failure.
    ///
    /// Both modes continue past failing children. A failing nested tree shows
    /// up as a single [`TaskError::Aggregate`] entry. An empty result means the
    /// whole tree succeeded. Must be called from within a tokio runtime.
    pub async fn do_all(&self) -> Vec<TaskError> {
        if self.is_empty() || self.is_plan_mode() {
            debug!("no actual tasks");
            return Vec::new();
        }

        match self.mode() {
            ExecutionMode::Sequential => do_sequential_tasks(self.children()).await,
            ExecutionMode::Parallel => do_parallel_tasks(self.children()).await,
        }
    }
}

/// Name used in progress logs; trees log their title rather than the full plan
fn task_name(task: &dyn Task) -> String {
    match task.as_tree() {
        Some(tree) => tree.title(),
        None => task.describe(),
    }
}

async fn do_single_task(task: &dyn Task) -> Result<(), TaskError> {
    let name = task_name(task);
    debug!("started task: {}", name);
    let started = Instant::now();
    let result = match AssertUnwindSafe(task.run()).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked {
            task: name.clone(),
            message: panic_message(payload),
        }),
    };
    if result.is_ok() {
        debug!("completed task: {} in {:?}", name, started.elapsed());
    }
    result
}

async fn do_sequential_tasks(tasks: &[Arc<dyn Task>]) -> Vec<TaskError> {
    let mut failures = Vec::new();
    for task in tasks {
        if let Err(err) = do_single_task(task.as_ref()).await {
            debug!(
                "failed task: {} (will continue with remaining sequential tasks)",
                task_name(task.as_ref())
            );
            failures.push(err);
        }
    }
    failures
}

async fn do_parallel_tasks(tasks: &[Arc<dyn Task>]) -> Vec<TaskError> {
    let handles: Vec<_> = tasks
        .iter()
        .map(|task| {
            let task = Arc::clone(task);
            tokio::spawn(async move {
                let result = do_single_task(task.as_ref()).await;
                if result.is_err() {
                    debug!(
                        "failed task: {} (will continue until other parallel tasks are completed)",
                        task_name(task.as_ref())
                    );
                }
                result
            })
        })
        .collect();

    debug!("waiting for {} parallel tasks to complete", handles.len());

    // One slot per child, filled in child order.
    let mut outcomes: Vec<Option<TaskError>> = Vec::with_capacity(handles.len());
    for (task, handle) in tasks.iter().zip(handles) {
        let outcome = match handle.await {
            Ok(result) => result.err(),
            Err(join_err) => Some(join_failure(task.as_ref(), join_err)),
        };
        outcomes.push(outcome);
    }

    outcomes.into_iter().flatten().collect()
}

fn join_failure(task: &dyn Task, err: JoinError) -> TaskError {
    let message = if err.is_panic() {
        panic_message(err.into_panic())
    } else {
        err.to_string()
    };
    TaskError::Panicked {
        task: task_name(task),
        message,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
