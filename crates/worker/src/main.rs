use std::sync::Arc;

use extractflow::api;
use extractflow::auth::StaticTokenVerifier;
use extractflow::config;
use extractflow::consumer::QueueConsumer;
use extractflow::db;
use extractflow::extract::ReceiptExtractor;
use extractflow::jobs::{JobStore, JobsRepo};
use extractflow::queue::{PgQueue, QueueSource, QueueTransport};
use extractflow::submission::SubmissionService;
use extractflow::telemetry;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::Config::from_env()?;
    telemetry::init(cfg.log_json);

    let opts = cfg.consumer_options();
    let api_addr = cfg.api_addr.clone();
    let verifier = StaticTokenVerifier::from_pairs(cfg.api_tokens.as_deref().unwrap_or(""));

    info!(
        worker_id = %cfg.worker_id,
        queue = %cfg.queue,
        lease_seconds = cfg.lease_seconds,
        batch_size = cfg.batch_size,
        reclaim_interval_ms = cfg.reclaim_interval_ms,
        max_attempts = cfg.max_attempts,
        max_deliveries = cfg.max_deliveries,
        extract_timeout_ms = cfg.extract_timeout_ms,
        api = api_addr.as_deref().unwrap_or("disabled"),
        auth_tokens = verifier.len(),
        migrate_on_startup = cfg.migrate_on_startup,
        "extractflow starting"
    );

    let pool = db::make_pool(&cfg.database_url).await?;
    if cfg.migrate_on_startup {
        db::run_migrations(&pool).await?;
    }

    let store: Arc<dyn JobStore> = Arc::new(JobsRepo::new(pool.clone()));
    let queue = Arc::new(PgQueue::new(pool.clone(), cfg.queue.clone()));

    // ---- API task ----
    let transport: Arc<dyn QueueTransport> = queue.clone();
    let api_state = api::ApiState {
        submissions: SubmissionService::new(store.clone(), transport, cfg.max_payload_bytes),
        auth: Arc::new(verifier),
    };
    let app = api::router(api_state);

    let api_handle = tokio::spawn(async move {
        if let Some(addr) = api_addr {
            let listener = tokio::net::TcpListener::bind(&addr).await?;
            info!(%addr, "api listening");
            axum::serve(listener, app).await?;
        } else {
            std::future::pending::<()>().await;
        }
        Ok::<(), anyhow::Error>(())
    });

    // ---- Consumer task ----
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let consumer = QueueConsumer::new(store, Arc::new(ReceiptExtractor::new()), opts);
    let source: Arc<dyn QueueSource> = queue;
    let mut consumer_handle = tokio::spawn(async move {
        consumer.run(source, shutdown_rx).await;
        Ok::<(), anyhow::Error>(())
    });

    tokio::select! {
        res = api_handle => res??,
        res = &mut consumer_handle => res??,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested; draining consumer");
            let _ = shutdown_tx.send(true);
            consumer_handle.await??;
        }
    }

    Ok(())
}
