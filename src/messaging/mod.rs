//! # Work Queue Messaging
//!
//! The inbound side of the worker: a durable queue of task identifiers.
//!
//! - [`WorkQueue`] - the queue seam (`ensure_queue`, `receive`, `acknowledge`, `publish`)
//! - [`PgmqWorkQueue`] - PostgreSQL message queue implementation
//! - [`QueueConsumer`] - at-most-once consumer loop feeding the orchestrator

pub mod consumer;
pub mod errors;
pub mod pgmq_client;

use async_trait::async_trait;
use uuid::Uuid;

pub use consumer::{connect_with_retry, ConsumerOutcome, QueueConsumer};
pub use errors::{MessagingError, MessagingResult};
pub use pgmq_client::PgmqWorkQueue;

/// One delivered message
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub msg_id: i64,
    pub read_count: i32,
    pub payload: serde_json::Value,
}

impl QueueMessage {
    /// Task identifier carried by the payload: a JSON string holding a UUID
    pub fn task_id(&self) -> MessagingResult<Uuid> {
        let raw = match &self.payload {
            serde_json::Value::String(s) => s.trim(),
            other => {
                return Err(MessagingError::invalid_payload(
                    self.msg_id,
                    format!("expected a task id string, got {other}"),
                ))
            }
        };
        // Tolerate a payload that was JSON-encoded twice
        let raw = raw.trim_matches('"');
        Uuid::parse_str(raw).map_err(|e| {
            MessagingError::invalid_payload(self.msg_id, format!("{raw:?} is not a task id: {e}"))
        })
    }
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Create the queue if it does not exist
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()>;

    /// Take at most one message, hiding it for the visibility timeout
    async fn receive(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
    ) -> MessagingResult<Option<QueueMessage>>;

    /// Remove a delivered message permanently
    async fn acknowledge(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()>;

    async fn publish(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64>;
}
