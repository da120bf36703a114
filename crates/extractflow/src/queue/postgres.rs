// crates/extractflow/src/queue/postgres.rs

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::queue::{Delivery, QueueMessage, QueueSource, QueueTransport, Settlement, TransportError};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DeadLetter {
    pub id: Uuid,
    pub queue: String,
    pub body: Value,
    pub attempts: i32,
    pub dlq_reason: Option<String>,
    pub dlq_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Postgres-backed queue on the `queue_messages` table.
///
/// Leasing uses `FOR UPDATE SKIP LOCKED`, so concurrent consumers never lease
/// the same row. A lease is a visibility timeout: once `lock_expires_at`
/// passes, `reclaim_expired` makes the row deliverable again.
#[derive(Clone)]
pub struct PgQueue {
    pool: PgPool,
    queue: String,
}

impl PgQueue {
    pub fn new(pool: PgPool, queue: impl Into<String>) -> Self {
        Self {
            pool,
            queue: queue.into(),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Most recent dead letters first.
    pub async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>, TransportError> {
        let limit = limit.clamp(1, 500);
        let rows = sqlx::query_as::<_, DeadLetter>(
            r#"
            SELECT id, queue, body, attempts, dlq_reason, dlq_at, created_at
            FROM queue_messages
            WHERE queue = $1 AND status = 'dlq'
            ORDER BY dlq_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(&self.queue)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Returns: (ready, leased, dead)
    pub async fn depth(&self) -> Result<(i64, i64, i64), TransportError> {
        let row: (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'ready'),
                COUNT(*) FILTER (WHERE status = 'leased'),
                COUNT(*) FILTER (WHERE status = 'dlq')
            FROM queue_messages
            WHERE queue = $1
            "#,
        )
        .bind(&self.queue)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }
}

fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl QueueTransport for PgQueue {
    async fn publish(&self, message: &QueueMessage) -> Result<(), TransportError> {
        let body = serde_json::to_value(message)?;

        sqlx::query(
            r#"
            INSERT INTO queue_messages (id, queue, body, status, visible_at)
            VALUES ($1, $2, $3, 'ready', now())
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&self.queue)
        .bind(body)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                TransportError::Unavailable(e.to_string())
            }
            other => TransportError::Database(other),
        })?;

        Ok(())
    }
}

#[async_trait]
impl QueueSource for PgQueue {
    async fn receive(
        &self,
        consumer_id: &str,
        max: usize,
        visibility: Duration,
    ) -> Result<Vec<Delivery>, TransportError> {
        let max = i64::try_from(max.max(1)).unwrap_or(i64::MAX);

        let rows = sqlx::query_as::<_, (Uuid, Value, i32)>(
            r#"
            UPDATE queue_messages m
            SET status = 'leased',
                attempts = m.attempts + 1,
                locked_by = $2,
                lock_expires_at = now() + ($3::bigint * interval '1 millisecond'),
                updated_at = now()
            WHERE m.id IN (
                SELECT id
                FROM queue_messages
                WHERE queue = $1
                  AND status = 'ready'
                  AND visible_at <= now()
                ORDER BY visible_at ASC, created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT $4
            )
            RETURNING m.id, m.body, m.attempts
            "#,
        )
        .bind(&self.queue)
        .bind(consumer_id)
        .bind(millis(visibility))
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, body, attempts)| Delivery { id, body, attempts })
            .collect())
    }

    async fn settle(
        &self,
        delivery_id: Uuid,
        consumer_id: &str,
        settlement: &Settlement,
    ) -> Result<(), TransportError> {
        let res = match settlement {
            Settlement::Ack => {
                sqlx::query(
                    r#"
                    DELETE FROM queue_messages
                    WHERE id = $1 AND status = 'leased' AND locked_by = $2
                    "#,
                )
                .bind(delivery_id)
                .bind(consumer_id)
                .execute(&self.pool)
                .await?
            }
            Settlement::Retry { delay } => {
                sqlx::query(
                    r#"
                    UPDATE queue_messages
                    SET status = 'ready',
                        visible_at = now() + ($3::bigint * interval '1 millisecond'),
                        locked_by = NULL,
                        lock_expires_at = NULL,
                        updated_at = now()
                    WHERE id = $1 AND status = 'leased' AND locked_by = $2
                    "#,
                )
                .bind(delivery_id)
                .bind(consumer_id)
                .bind(millis(*delay))
                .execute(&self.pool)
                .await?
            }
            Settlement::DeadLetter { reason } => {
                sqlx::query(
                    r#"
                    UPDATE queue_messages
                    SET status = 'dlq',
                        dlq_reason = $3,
                        dlq_at = now(),
                        locked_by = NULL,
                        lock_expires_at = NULL,
                        updated_at = now()
                    WHERE id = $1 AND status = 'leased' AND locked_by = $2
                    "#,
                )
                .bind(delivery_id)
                .bind(consumer_id)
                .bind(reason)
                .execute(&self.pool)
                .await?
            }
        };

        if res.rows_affected() == 0 {
            return Err(TransportError::LeaseLost(delivery_id));
        }
        Ok(())
    }

    async fn reclaim_expired(&self) -> Result<u64, TransportError> {
        let res = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'ready',
                visible_at = now(),
                locked_by = NULL,
                lock_expires_at = NULL,
                updated_at = now()
            WHERE queue = $1
              AND status = 'leased'
              AND lock_expires_at IS NOT NULL
              AND lock_expires_at < now()
            "#,
        )
        .bind(&self.queue)
        .execute(&self.pool)
        .await?;

        Ok(res.rows_affected())
    }
}
