use crate::config::Settings;
use crate::stack::{Stack, StackBackend, StackError, StackOperation};
use rand::Rng;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// How long and how often to poll a stack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_poll_interval: Duration,
}

impl WaitPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            timeout: settings.wait_timeout(),
            poll_interval: settings.poll_interval(),
            max_poll_interval: settings.max_poll_interval().max(settings.poll_interval()),
        }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Spread pollers of parallel siblings so they do not hit the backend in lockstep
fn jittered(interval: Duration) -> Duration {
    let factor = rand::rng().random_range(0.8..1.2);
    interval.mul_f64(factor)
}

/// Poll `name` until `operation` completes.
///
/// Returns the settled stack, or `None` when a delete made the stack disappear.
/// Any other terminal state is reported as [`StackError::UnexpectedStatus`].
pub async fn wait_for_stack(
    backend: &dyn StackBackend,
    name: &str,
    operation: StackOperation,
    policy: WaitPolicy,
) -> Result<Option<Stack>, StackError> {
    let deadline = Instant::now() + policy.timeout;
    let mut interval = policy.poll_interval;

    loop {
        match backend.describe_stack(name).await? {
            None if operation == StackOperation::Delete => return Ok(None),
            None => {
                return Err(StackError::NotFound {
                    name: name.to_string(),
                });
            }
            Some(stack) if stack.status == operation.success_status() => {
                return Ok(Some(stack));
            }
            Some(stack) if stack.status.is_terminal() => {
                return Err(StackError::UnexpectedStatus {
                    name: name.to_string(),
                    operation,
                    status: stack.status,
                    reason: stack.status_reason,
                });
            }
            Some(stack) => {
                debug!(
                    "waiting for {} of stack {:?} to complete, currently {}",
                    operation, name, stack.status
                );
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(StackError::Timeout {
                name: name.to_string(),
                operation,
                timeout: policy.timeout,
            });
        }
        tokio::time::sleep(jittered(interval).min(deadline - now)).await;
        interval = (interval * 2).min(policy.max_poll_interval);
    }
}
