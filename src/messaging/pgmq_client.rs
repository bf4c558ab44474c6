//! # PostgreSQL Message Queue Client (pgmq-rs)
//!
//! [`WorkQueue`] implementation on top of the pgmq-rs crate.

use super::errors::{MessagingError, MessagingResult};
use super::{QueueMessage, WorkQueue};
use crate::logging::log_queue_operation;
use async_trait::async_trait;
use pgmq::PGMQueue;
use tracing::{debug, info};

/// pgmq-rs based work queue client
#[derive(Debug, Clone)]
pub struct PgmqWorkQueue {
    pgmq: PGMQueue,
}

impl PgmqWorkQueue {
    /// Create new pgmq client using connection string
    pub async fn new(database_url: &str) -> MessagingResult<Self> {
        info!("Connecting to pgmq");

        let pgmq = PGMQueue::new(database_url.to_string())
            .await
            .map_err(|e| MessagingError::database_connection(e.to_string()))?;

        info!("Connected to pgmq");
        Ok(Self { pgmq })
    }

    /// Create new pgmq client using existing connection pool
    pub async fn new_with_pool(pool: sqlx::PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        debug!("pgmq client created with shared pool");
        Self { pgmq }
    }
}

#[async_trait]
impl WorkQueue for PgmqWorkQueue {
    async fn ensure_queue(&self, queue_name: &str) -> MessagingResult<()> {
        self.pgmq
            .create(queue_name)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "create", e.to_string()))?;
        log_queue_operation("create", queue_name, None, "ok");
        Ok(())
    }

    async fn receive(
        &self,
        queue_name: &str,
        visibility_timeout_seconds: i32,
    ) -> MessagingResult<Option<QueueMessage>> {
        let message = self
            .pgmq
            .read::<serde_json::Value>(queue_name, Some(visibility_timeout_seconds))
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "read", e.to_string()))?;

        Ok(message.map(|m| {
            log_queue_operation("read", queue_name, Some(m.msg_id), "received");
            QueueMessage {
                msg_id: m.msg_id,
                read_count: m.read_ct,
                payload: m.message,
            }
        }))
    }

    async fn acknowledge(&self, queue_name: &str, msg_id: i64) -> MessagingResult<()> {
        self.pgmq
            .delete(queue_name, msg_id)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "delete", e.to_string()))?;
        log_queue_operation("delete", queue_name, Some(msg_id), "acknowledged");
        Ok(())
    }

    async fn publish(&self, queue_name: &str, payload: &serde_json::Value) -> MessagingResult<i64> {
        let msg_id = self
            .pgmq
            .send(queue_name, payload)
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "send", e.to_string()))?;
        log_queue_operation("send", queue_name, Some(msg_id), "published");
        Ok(msg_id)
    }
}
