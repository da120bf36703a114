//! Queue transport: at-least-once, batch delivery, dead-letter capable.
//!
//! Producers only see [`QueueTransport`]. Consumers lease batches through
//! [`QueueSource`] and must settle every delivery; an unsettled delivery
//! becomes visible again once its lease expires.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryQueue;
pub use postgres::PgQueue;

/// Wire format of a queued extraction request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub text: String,
    pub job_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub body: Value,
    /// Deliveries so far, including this one.
    pub attempts: i32,
}

impl Delivery {
    pub fn decode(&self) -> Result<QueueMessage, serde_json::Error> {
        QueueMessage::deserialize(&self.body)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// Done; remove the message.
    Ack,
    /// Make the message visible again after `delay`.
    Retry { delay: Duration },
    /// Park the message; it will not be delivered again.
    DeadLetter { reason: String },
}

impl Settlement {
    pub fn dead_letter(reason: impl Into<String>) -> Self {
        Settlement::DeadLetter {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("lease on delivery {0} lost")]
    LeaseLost(Uuid),

    #[error("message encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(&self, message: &QueueMessage) -> Result<(), TransportError>;
}

#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Lease up to `max` visible messages for `visibility`.
    async fn receive(
        &self,
        consumer_id: &str,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<Delivery>, TransportError>;

    async fn settle(
        &self,
        delivery_id: Uuid,
        consumer_id: &str,
        settlement: &Settlement,
    ) -> Result<(), TransportError>;

    /// Return expired leases to the visible set.
    async fn reclaim_expired(&self) -> Result<u64, TransportError>;
}
