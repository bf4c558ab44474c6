//! # Queue Consumer
//!
//! Pulls task identifiers off the work queue one at a time and hands them to
//! the [`TaskOrchestrator`]. Delivery is at-most-once: a message is deleted
//! before its task runs, and the task document is the only record of how the
//! run went.

use super::errors::{MessagingError, MessagingResult};
use super::{QueueMessage, WorkQueue};
use crate::config::QueueConfig;
use crate::logging::{log_error, log_queue_operation};
use crate::orchestration::{TaskOrchestrator, TaskOutcome};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// What one `process_next` call did
#[derive(Debug)]
pub enum ConsumerOutcome {
    /// The queue had nothing to deliver
    Idle,
    /// The task ran; its outcome is also recorded on the task document
    Processed { task_id: Uuid, outcome: TaskOutcome },
    /// The payload was not a task id; the message was acknowledged and dropped
    Dropped { msg_id: i64, reason: String },
    /// Acknowledgement failed, so the task was not run. The message becomes
    /// visible again after the visibility timeout.
    AcknowledgeFailed { msg_id: i64, error: String },
    /// The orchestrator could not run the task at all (missing document,
    /// repository failure)
    Abandoned { task_id: Uuid, error: String },
}

pub struct QueueConsumer {
    queue: Arc<dyn WorkQueue>,
    orchestrator: Arc<TaskOrchestrator>,
    config: QueueConfig,
}

impl QueueConsumer {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        orchestrator: Arc<TaskOrchestrator>,
        config: QueueConfig,
    ) -> Self {
        Self {
            queue,
            orchestrator,
            config,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.config.name
    }

    /// Receive and fully process at most one message
    #[instrument(skip(self), fields(queue = %self.config.name))]
    pub async fn process_next(&self) -> MessagingResult<ConsumerOutcome> {
        let Some(message) = self
            .queue
            .receive(&self.config.name, self.config.visibility_timeout_seconds)
            .await?
        else {
            return Ok(ConsumerOutcome::Idle);
        };

        if let Err(e) = self.queue.acknowledge(&self.config.name, message.msg_id).await {
            warn!(
                msg_id = message.msg_id,
                error = %e,
                "Failed to acknowledge message; leaving it for redelivery"
            );
            return Ok(ConsumerOutcome::AcknowledgeFailed {
                msg_id: message.msg_id,
                error: e.to_string(),
            });
        }

        Ok(self.dispatch(message).await)
    }

    async fn dispatch(&self, message: QueueMessage) -> ConsumerOutcome {
        let task_id = match message.task_id() {
            Ok(id) => id,
            Err(e) => {
                log_error("queue_consumer", "parse_payload", &e.to_string(), None);
                return ConsumerOutcome::Dropped {
                    msg_id: message.msg_id,
                    reason: e.to_string(),
                };
            }
        };

        info!(task_id = %task_id, msg_id = message.msg_id, "Processing task");
        match self.orchestrator.process_task(task_id).await {
            Ok(outcome) => ConsumerOutcome::Processed { task_id, outcome },
            Err(e) => {
                log_error(
                    "queue_consumer",
                    "process_task",
                    &e.to_string(),
                    Some(&task_id.to_string()),
                );
                ConsumerOutcome::Abandoned {
                    task_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Consume until `shutdown` flips to true. Shutdown is honored between
    /// messages only; a running task always finishes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.config.name,
            poll_interval_ms = self.config.poll_interval_ms,
            "Starting queue consumer"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let idle = match self.process_next().await {
                Ok(ConsumerOutcome::Idle) => true,
                Ok(outcome) => {
                    debug!(outcome = ?outcome, "Message handled");
                    false
                }
                Err(e) => {
                    error!(error = %e, "Error receiving from queue");
                    true
                }
            };

            if idle {
                tokio::select! {
                    _ = sleep(self.config.poll_interval()) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        log_queue_operation("consume", &self.config.name, None, "stopped");
    }
}

/// Retry `connect` at a fixed backoff, giving up after `attempts` failures
pub async fn connect_with_retry<T, F, Fut>(
    attempts: u32,
    backoff: Duration,
    mut connect: F,
) -> MessagingResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MessagingResult<T>>,
{
    let attempts = attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        match connect().await {
            Ok(value) => {
                if attempt > 1 {
                    info!(attempt = attempt, "Connected after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                warn!(
                    attempt = attempt,
                    max_attempts = attempts,
                    error = %e,
                    "Queue connection failed"
                );
                last_error = Some(e);
                if attempt < attempts {
                    sleep(backoff).await;
                }
            }
        }
    }

    Err(MessagingError::connect_attempts_exhausted(
        attempts,
        last_error.map(|e| e.to_string()).unwrap_or_default(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_connect_with_retry_gives_up() {
        let calls = AtomicU32::new(0);
        let result: MessagingResult<()> = connect_with_retry(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(MessagingError::database_connection("refused")) }
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(MessagingError::ConnectAttemptsExhausted { attempts: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_connect_with_retry_recovers() {
        let calls = AtomicU32::new(0);
        let result = connect_with_retry(5, Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(MessagingError::database_connection("refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
    }
}
