//! Queue consumer: turns deliveries into job state changes and settlements.
//!
//! Delivery is at-least-once, so every step is keyed on the job record:
//! - a job already `succeeded`/`failed` is acknowledged without re-running
//!   extraction
//! - the terminal write is a compare-and-swap from `processing`; losing it
//!   to a delivery that already finished the job is a no-op, losing it to
//!   one that requeued or took the job over retries this message
//! - store errors never touch the job; the delivery is retried with backoff

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::extract::{ExtractError, Extractor};
use crate::jobs::error_codes::{self, ErrorCode, MAX_ATTEMPTS_EXCEEDED, NON_RETRYABLE};
use crate::jobs::retry::{classify_error, next_delay, ErrorClass, RetryConfig};
use crate::jobs::{Job, JobStatus, JobStore, StoreError, TransitionFields};
use crate::queue::{Delivery, QueueMessage, QueueSource, Settlement, TransportError};

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub consumer_id: String,
    pub batch_size: usize,
    /// Lease length; a delivery still running after this may be redelivered.
    pub visibility: Duration,
    pub reclaim_interval: Duration,
    pub idle_sleep: Duration,
    /// Extraction attempts per job, first run included.
    pub max_attempts: i32,
    /// Deliveries per message before the job is given up on.
    pub max_deliveries: i32,
    pub extract_timeout: Option<Duration>,
    pub max_concurrency: usize,
    pub retry: RetryConfig,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            consumer_id: "consumer-1".to_string(),
            batch_size: 10,
            visibility: Duration::from_secs(30),
            reclaim_interval: Duration::from_secs(5),
            idle_sleep: Duration::from_millis(250),
            max_attempts: 5,
            max_deliveries: 10,
            extract_timeout: Some(Duration::from_secs(10)),
            max_concurrency: 16,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Clone)]
pub struct QueueConsumer {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    opts: Arc<ConsumerOptions>,
    permits: Arc<Semaphore>,
}

impl QueueConsumer {
    pub fn new(
        store: Arc<dyn JobStore>,
        extractor: Arc<dyn Extractor>,
        opts: ConsumerOptions,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(opts.max_concurrency.max(1)));
        Self {
            store,
            extractor,
            opts: Arc::new(opts),
            permits,
        }
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.opts
    }

    /// Decide the fate of a single delivery.
    pub async fn process(&self, delivery: &Delivery) -> Settlement {
        let message = match delivery.decode() {
            Ok(m) => m,
            Err(e) => {
                warn!(delivery_id = %delivery.id, error = %e, "undecodable message");
                return Settlement::dead_letter(ErrorCode::BadMessage.as_str());
            }
        };

        match self.process_message(delivery, &message).await {
            Ok(settlement) => settlement,
            Err(e) => {
                let delay = next_delay(delivery.attempts, &self.opts.retry);
                warn!(
                    job_id = %message.job_id,
                    attempts = delivery.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "job store error; delivery will be retried"
                );
                Settlement::Retry { delay }
            }
        }
    }

    async fn process_message(
        &self,
        delivery: &Delivery,
        message: &QueueMessage,
    ) -> Result<Settlement, StoreError> {
        let job_id = message.job_id;

        let Some(job) = self.store.get(job_id).await? else {
            warn!(job_id = %job_id, "message for unknown job");
            return Ok(Settlement::dead_letter(ErrorCode::UnknownJob.as_str()));
        };

        if job.status.is_terminal() {
            debug!(job_id = %job_id, status = %job.status, "duplicate delivery of finished job");
            return Ok(Settlement::Ack);
        }

        if delivery.attempts > self.opts.max_deliveries {
            return self.give_up(&job, delivery.attempts).await;
        }

        let job = match self
            .store
            .transition(
                job_id,
                &[JobStatus::Queued, JobStatus::Processing],
                JobStatus::Processing,
                TransitionFields::default(),
            )
            .await
        {
            Ok(job) => job,
            Err(StoreError::Conflict { current, .. }) => {
                debug!(job_id = %job_id, status = %current, "job settled by another delivery");
                return Ok(Settlement::Ack);
            }
            Err(StoreError::NotFound(_)) => {
                return Ok(Settlement::dead_letter(ErrorCode::UnknownJob.as_str()));
            }
            Err(e) => return Err(e),
        };

        let started = Instant::now();
        let outcome = self.run_extractor(&message.text).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => self.complete(&job, result, latency_ms).await,
            Err(err) => self.fail(&job, err, latency_ms).await,
        }
    }

    async fn run_extractor(&self, text: &str) -> Result<serde_json::Value, ExtractError> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            ExtractError::new(ErrorCode::DependencyDown.as_str(), "consumer shutting down")
        })?;

        let fut = self.extractor.extract(text);
        match self.opts.extract_timeout {
            Some(dur) => tokio::time::timeout(dur, fut).await.unwrap_or_else(|_| {
                Err(ExtractError::new(
                    ErrorCode::Timeout.as_str(),
                    format!("extraction timed out after {}ms", dur.as_millis()),
                ))
            }),
            None => fut.await,
        }
    }

    async fn complete(
        &self,
        job: &Job,
        result: serde_json::Value,
        latency_ms: u64,
    ) -> Result<Settlement, StoreError> {
        match self
            .store
            .transition(
                job.id,
                &[JobStatus::Processing],
                JobStatus::Succeeded,
                TransitionFields::succeeded(result),
            )
            .await
        {
            Ok(_) => {
                info!(job_id = %job.id, latency_ms, retries = job.retry_count, "job succeeded");
                Ok(Settlement::Ack)
            }
            Err(StoreError::Conflict { current, .. }) => {
                debug!(job_id = %job.id, status = %current, "lost race; result discarded");
                Ok(self.after_lost_race(job, current))
            }
            Err(e) => Err(e),
        }
    }

    async fn fail(
        &self,
        job: &Job,
        err: ExtractError,
        latency_ms: u64,
    ) -> Result<Settlement, StoreError> {
        let attempt_no = job.retry_count + 1;
        let class = classify_error(err.code);
        let can_retry = class == ErrorClass::Retryable && attempt_no < self.opts.max_attempts;

        let (to, fields) = if can_retry {
            (JobStatus::Queued, TransitionFields::requeued(attempt_no))
        } else {
            (
                JobStatus::Failed,
                TransitionFields::failed(err.code, err.message.clone(), job.retry_count),
            )
        };

        match self
            .store
            .transition(job.id, &[JobStatus::Processing], to, fields)
            .await
        {
            Ok(_) => {}
            Err(StoreError::Conflict { current, .. }) => {
                debug!(job_id = %job.id, status = %current, "lost race; failure discarded");
                return Ok(self.after_lost_race(job, current));
            }
            Err(e) => return Err(e),
        }

        if can_retry {
            let delay = next_delay(attempt_no, &self.opts.retry);
            info!(
                job_id = %job.id,
                attempt_no,
                code = err.code,
                latency_ms,
                delay_ms = delay.as_millis() as u64,
                "job failed; retry scheduled"
            );
            return Ok(Settlement::Retry { delay });
        }

        let reason = match class {
            ErrorClass::NonRetryable => NON_RETRYABLE,
            ErrorClass::Retryable => MAX_ATTEMPTS_EXCEEDED,
        };
        warn!(
            job_id = %job.id,
            attempt_no,
            code = err.code,
            message = %err.message,
            reason,
            action = error_codes::suggested_action(err.code),
            "job failed permanently"
        );
        Ok(Settlement::dead_letter(reason))
    }

    /// Another delivery moved the job first. Only a terminal job lets this
    /// message go; otherwise it must come back so the record is re-read.
    fn after_lost_race(&self, job: &Job, current: JobStatus) -> Settlement {
        if current.is_terminal() {
            return Settlement::Ack;
        }
        Settlement::Retry {
            delay: next_delay(job.retry_count + 1, &self.opts.retry),
        }
    }

    /// The message keeps coming back without a consumer finishing it.
    async fn give_up(&self, job: &Job, deliveries: i32) -> Result<Settlement, StoreError> {
        let code = ErrorCode::MaxDeliveriesExceeded.as_str();
        let fields = TransitionFields::failed(
            code,
            format!("abandoned after {deliveries} deliveries"),
            job.retry_count,
        );

        match self
            .store
            .transition(
                job.id,
                &[JobStatus::Queued, JobStatus::Processing],
                JobStatus::Failed,
                fields,
            )
            .await
        {
            Ok(_) => {
                warn!(job_id = %job.id, deliveries, "delivery budget exhausted");
                Ok(Settlement::dead_letter(code))
            }
            Err(StoreError::Conflict { current, .. }) => {
                debug!(job_id = %job.id, status = %current, "job settled before give-up");
                Ok(self.after_lost_race(job, current))
            }
            Err(e) => Err(e),
        }
    }

    /// Process a batch concurrently. Each delivery runs in its own task; a
    /// panicking task leaves its delivery unsettled for redelivery.
    pub async fn consume_batch(&self, deliveries: Vec<Delivery>) -> Vec<(Uuid, Settlement)> {
        let mut join_set = JoinSet::new();
        let n = deliveries.len();

        for delivery in deliveries {
            let this = self.clone();
            join_set.spawn(async move {
                let settlement = this.process(&delivery).await;
                (delivery.id, settlement)
            });
        }

        let mut out = Vec::with_capacity(n);
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(pair) => out.push(pair),
                Err(e) => error!(error = %e, "delivery task aborted; left for redelivery"),
            }
        }
        out
    }

    /// Receive one batch, process it, settle it. Returns the batch size.
    pub async fn poll_once(&self, source: &dyn QueueSource) -> Result<usize, TransportError> {
        let batch = source
            .receive(&self.opts.consumer_id, self.opts.batch_size, self.opts.visibility)
            .await?;
        let n = batch.len();
        if n == 0 {
            return Ok(0);
        }

        for (delivery_id, settlement) in self.consume_batch(batch).await {
            if let Err(e) = source
                .settle(delivery_id, &self.opts.consumer_id, &settlement)
                .await
            {
                // Unsettled deliveries come back after their lease expires.
                warn!(delivery_id = %delivery_id, error = %e, "settle failed");
            }
        }
        Ok(n)
    }

    /// Consume until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(&self, source: Arc<dyn QueueSource>, mut shutdown: watch::Receiver<bool>) {
        let opts = Arc::clone(&self.opts);
        info!(
            consumer_id = %opts.consumer_id,
            batch_size = opts.batch_size,
            visibility_ms = opts.visibility.as_millis() as u64,
            max_attempts = opts.max_attempts,
            "consumer starting"
        );

        let mut last_reclaim: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            // reclaim on a fixed interval, not every poll
            if last_reclaim.map_or(true, |t| t.elapsed() >= opts.reclaim_interval) {
                match source.reclaim_expired().await {
                    Ok(n) if n > 0 => info!(reclaimed = n, "expired leases reclaimed"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "reclaim failed"),
                }
                last_reclaim = Some(Instant::now());
            }

            let busy = match self.poll_once(source.as_ref()).await {
                Ok(n) => n > 0,
                Err(e) => {
                    warn!(error = %e, "receive failed");
                    false
                }
            };

            if !busy && idle(opts.idle_sleep, &mut shutdown).await {
                break;
            }
        }

        info!(consumer_id = %opts.consumer_id, "consumer stopped");
    }
}

/// Sleep, waking early on shutdown. Returns `true` when shutting down.
async fn idle(dur: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(dur) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
