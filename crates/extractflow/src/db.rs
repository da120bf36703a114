use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;

use crate::config::env_bool;

pub async fn make_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let max_connections = std::env::var("EXTRACTFLOW_DB_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(8)
        .clamp(1, 64);

    let acquire_timeout_secs = std::env::var("EXTRACTFLOW_DB_ACQUIRE_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(10)
        .clamp(1, 60);

    let disable_jit = env_bool("EXTRACTFLOW_DISABLE_JIT").unwrap_or(true);

    let mut opts = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(acquire_timeout_secs));

    if disable_jit {
        opts = opts.after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query("SET jit = OFF").execute(&mut *conn).await?;
                Ok(())
            })
        });
    }

    let pool = opts.connect(database_url).await?;
    tracing::debug!(max_connections, acquire_timeout_secs, "database pool ready");

    Ok(pool)
}

pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::info!("migrations applied");
    Ok(())
}
