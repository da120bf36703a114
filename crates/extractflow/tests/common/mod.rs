#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use extractflow::consumer::{ConsumerOptions, QueueConsumer};
use extractflow::extract::{ExtractError, Extractor, ReceiptExtractor};
use extractflow::jobs::retry::RetryConfig;
use extractflow::jobs::{InMemoryJobStore, JobStore};
use extractflow::queue::{InMemoryQueue, QueueMessage, QueueTransport, TransportError};
use extractflow::submission::SubmissionService;
use serde_json::{json, Value};
use sqlx::PgPool;

pub const MAX_PAYLOAD: usize = 1024;

/// Extraction counter wrapped around the real parser.
#[derive(Default)]
pub struct CountingExtractor {
    pub calls: AtomicUsize,
}

impl CountingExtractor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for CountingExtractor {
    async fn extract(&self, text: &str) -> Result<Value, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ReceiptExtractor::new().extract(text).await
    }
}

/// Fails with `code` for texts containing `"fail"`, succeeds otherwise.
pub struct FailingExtractor {
    pub code: &'static str,
    pub calls: AtomicUsize,
}

impl FailingExtractor {
    pub fn new(code: &'static str) -> Self {
        Self {
            code,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extractor for FailingExtractor {
    async fn extract(&self, text: &str) -> Result<Value, ExtractError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if text.contains("fail") {
            return Err(ExtractError::new(self.code, format!("simulated {}", self.code)));
        }
        Ok(json!({ "echo": text }))
    }
}

/// Sleeps before answering.
pub struct SlowExtractor(pub Duration);

#[async_trait]
impl Extractor for SlowExtractor {
    async fn extract(&self, text: &str) -> Result<Value, ExtractError> {
        tokio::time::sleep(self.0).await;
        Ok(json!({ "echo": text }))
    }
}

/// Transport that is down.
#[derive(Default)]
pub struct DownTransport {
    pub attempts: Mutex<Vec<QueueMessage>>,
}

#[async_trait]
impl QueueTransport for DownTransport {
    async fn publish(&self, message: &QueueMessage) -> Result<(), TransportError> {
        if let Ok(mut a) = self.attempts.lock() {
            a.push(message.clone());
        }
        Err(TransportError::Unavailable("broker unreachable".to_string()))
    }
}

pub fn fast_options() -> ConsumerOptions {
    ConsumerOptions {
        consumer_id: "test-consumer".to_string(),
        max_attempts: 3,
        max_deliveries: 6,
        idle_sleep: Duration::from_millis(5),
        retry: RetryConfig {
            base_seconds: 0,
            max_seconds: 0,
            jitter_pct: 0.0,
        },
        ..ConsumerOptions::default()
    }
}

pub struct Harness {
    pub store: Arc<InMemoryJobStore>,
    pub queue: Arc<InMemoryQueue>,
    pub submissions: SubmissionService,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryJobStore::new());
        let queue = Arc::new(InMemoryQueue::new());
        let submissions = SubmissionService::new(store.clone(), queue.clone(), MAX_PAYLOAD);
        Self {
            store,
            queue,
            submissions,
        }
    }

    pub fn consumer(&self, extractor: Arc<dyn Extractor>, opts: ConsumerOptions) -> QueueConsumer {
        let store: Arc<dyn JobStore> = self.store.clone();
        QueueConsumer::new(store, extractor, opts)
    }
}

/// `None` when TEST_DATABASE_URL is unset; Postgres tests skip in that case.
pub async fn setup_db() -> Option<PgPool> {
    let _ = dotenvy::dotenv();

    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping");
        return None;
    };

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&url)
        .await
        .expect("failed to connect to TEST_DATABASE_URL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations failed");

    sqlx::query("TRUNCATE TABLE queue_messages, jobs")
        .execute(&pool)
        .await
        .expect("truncate failed");

    Some(pool)
}
