//! Poller - Wait for asynchronous remote operations
//!
//! Polls with bounded exponential backoff until the operation reaches a
//! terminal status, the deadline passes, or the caller cancels. Giving up
//! never cancels the remote operation itself.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::PollConfig;
use crate::error::Error;
use crate::provider::{OperationStatus, PendingOperation, RemoteClient};
use crate::resource::ResourceIdentity;

/// Outcome of one status probe
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    Ready(T),
    Pending,
}

/// A pending operation that finished successfully
#[derive(Debug, Clone, PartialEq)]
pub struct Completed {
    /// Identity reported by the operation, if any
    pub resource_identity: Option<ResourceIdentity>,
}

#[derive(Debug, Clone, Default)]
pub struct OperationPoller {
    config: PollConfig,
}

impl OperationPoller {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Wait for a pending operation to reach a terminal status
    pub async fn wait<C: RemoteClient + ?Sized>(
        &self,
        client: &C,
        operation: &PendingOperation,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Completed, Error> {
        let description = format!("operation {}", operation.token);
        self.wait_for(&description, timeout, cancel, move || async move {
            match client.poll_status(operation).await {
                Ok(OperationStatus::InProgress) => Ok(Probe::Pending),
                Ok(OperationStatus::Succeeded { resource_identity }) => {
                    Ok(Probe::Ready(Completed {
                        resource_identity: resource_identity
                            .or_else(|| operation.resource_identity.clone()),
                    }))
                }
                Ok(OperationStatus::Failed { code, reason }) => {
                    Err(Error::RemoteFailure { code, reason })
                }
                Err(e) => Err(Error::classify(e)),
            }
        })
        .await
    }

    /// Run `probe` until it reports ready
    ///
    /// The token is checked before every probe and during every sleep.
    /// Transient probe errors are retried until the deadline; any other
    /// error ends the wait.
    pub async fn wait_for<T, F, Fut>(
        &self,
        operation: &str,
        timeout: Duration,
        cancel: &CancellationToken,
        mut probe: F,
    ) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>, Error>>,
    {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut interval = self.config.initial_interval;
        let mut attempts = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(cancelled(operation));
            }

            attempts += 1;
            match probe().await {
                Ok(Probe::Ready(value)) => {
                    log::debug!("{} finished after {} polls", operation, attempts);
                    return Ok(value);
                }
                Ok(Probe::Pending) => {}
                Err(e) if e.is_transient() => {
                    log::debug!("{}: retrying after transient error: {}", operation, e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::Timeout {
                    operation: operation.to_string(),
                    waited: now - start,
                });
            }

            let delay = interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled(operation)),
                _ = tokio::time::sleep(delay) => {}
            }
            interval = self.config.next_interval(interval);
        }
    }
}

fn cancelled(operation: &str) -> Error {
    Error::Cancelled {
        operation: operation.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::provider::ProviderError;
    use crate::testing::{Call, MemoryRemote};

    fn op() -> PendingOperation {
        PendingOperation::new("op-1").with_resource_identity("res-1")
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_three_polls() {
        let remote = MemoryRemote::new();
        remote.script_statuses([
            OperationStatus::InProgress,
            OperationStatus::InProgress,
            OperationStatus::succeeded(),
        ]);

        let start = Instant::now();
        let completed = OperationPoller::default()
            .wait(&remote, &op(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(remote.call_count(Call::PollStatus), 3);
        assert_eq!(
            completed.resource_identity,
            Some(ResourceIdentity::new("res-1"))
        );
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn perpetual_in_progress_times_out() {
        let remote = MemoryRemote::new();
        remote.script_statuses(std::iter::repeat_n(OperationStatus::InProgress, 1000));

        let err = OperationPoller::default()
            .wait(&remote, &op(), Duration::from_secs(60), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }), "got {:?}", err);
        assert!(err.is_ambiguous());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_carries_remote_reason() {
        let remote = MemoryRemote::new();
        remote.script_statuses([OperationStatus::Failed {
            code: Some("InvalidInputException".to_string()),
            reason: "bundle nano_9 does not exist".to_string(),
        }]);

        let err = OperationPoller::default()
            .wait(&remote, &op(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::RemoteFailure { code, reason } => {
                assert_eq!(code.as_deref(), Some("InvalidInputException"));
                assert_eq!(reason, "bundle nano_9 does not exist");
            }
            other => panic!("Expected RemoteFailure, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let remote = MemoryRemote::new();
        remote.fail_next(
            Call::PollStatus,
            ProviderError::new("slow down").with_code("ThrottlingException"),
        );
        remote.script_statuses([OperationStatus::succeeded()]);

        OperationPoller::default()
            .wait(&remote, &op(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(remote.call_count(Call::PollStatus), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_poll_makes_no_calls() {
        let remote = MemoryRemote::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = OperationPoller::default()
            .wait(&remote, &op(), Duration::from_secs(30), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Cancelled { .. }));
        assert_eq!(remote.call_count(Call::PollStatus), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_sleep() {
        let polls = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1500)).await;
            trigger.cancel();
        });

        let counter = polls.clone();
        let result: Result<(), Error> = OperationPoller::default()
            .wait_for("test", Duration::from_secs(600), &cancel, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(Probe::Pending)
                }
            })
            .await;

        assert!(matches!(result, Err(Error::Cancelled { .. })));
        // polls at t=0 and t=1s; the 2s sleep is cut short
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }
}
