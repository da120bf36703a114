use std::env;
use std::sync::Arc;

use anyhow::Context;
use extractflow::client::{ExtractflowClient, StaticCredentials};
use extractflow::db;
use extractflow::jobs::error_codes::suggested_action;
use extractflow::jobs::JobsRepo;
use extractflow::queue::PgQueue;
use uuid::Uuid;

const USAGE: &str = "extractflowctl <command>\n\
Commands:\n\
- submit <text>\n\
- status <job_id>\n\
- dlq [limit]\n\
- stats\n\
\n\
submit/status talk to EXTRACTFLOW_API_URL (default http://127.0.0.1:3003),\n\
sending EXTRACTFLOW_API_TOKEN as a bearer token when set.\n\
dlq/stats read DATABASE_URL directly (queue from EXTRACTFLOW_QUEUE).\n";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    match args[1].as_str() {
        "submit" => {
            let text = args.get(2).context("usage: extractflowctl submit <text>")?;
            let resp = client().submit(text).await?;
            println!("{}", serde_json::to_string_pretty(&resp)?);
        }
        "status" => {
            let id = args.get(2).context("usage: extractflowctl status <job_id>")?;
            let job_id: Uuid = id.parse().context("job_id must be a uuid")?;
            let view = client().get_status(job_id).await?;
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        "dlq" => {
            let limit: i64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(20);
            print_dead_letters(limit).await?;
        }
        "stats" => print_stats().await?,
        other => {
            eprintln!("Unknown command: {other}\n\n{USAGE}");
            std::process::exit(2);
        }
    }

    Ok(())
}

fn client() -> ExtractflowClient {
    let base = env::var("EXTRACTFLOW_API_URL").unwrap_or_else(|_| "http://127.0.0.1:3003".into());
    let creds = StaticCredentials::new(env::var("EXTRACTFLOW_API_TOKEN").ok());
    ExtractflowClient::new(base, Arc::new(creds))
}

async fn queue() -> anyhow::Result<(sqlx::PgPool, PgQueue)> {
    let url = env::var("DATABASE_URL")
        .or_else(|_| env::var("TEST_DATABASE_URL"))
        .context("DATABASE_URL or TEST_DATABASE_URL must be set")?;
    let pool = db::make_pool(&url).await?;
    let name = env::var("EXTRACTFLOW_QUEUE").unwrap_or_else(|_| "extract".to_string());
    Ok((pool.clone(), PgQueue::new(pool, name)))
}

async fn print_dead_letters(limit: i64) -> anyhow::Result<()> {
    let (_, queue) = queue().await?;
    let rows = queue.list_dead_letters(limit).await?;

    if rows.is_empty() {
        println!("dlq empty (queue={})", queue.queue());
        return Ok(());
    }

    for dl in rows {
        let reason = dl.dlq_reason.as_deref().unwrap_or("-");
        let job_id = dl
            .body
            .get("jobId")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let at = dl
            .dlq_at
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{at} | msg={} job={job_id} attempts={} reason={reason}\n    -> {}",
            dl.id,
            dl.attempts,
            suggested_action(reason)
        );
    }
    Ok(())
}

async fn print_stats() -> anyhow::Result<()> {
    let (pool, queue) = queue().await?;
    let (queued, processing, succeeded, failed) = JobsRepo::new(pool).status_counts().await?;
    let (ready, leased, dead) = queue.depth().await?;

    println!("jobs: queued={queued} processing={processing} succeeded={succeeded} failed={failed}");
    println!(
        "queue[{}]: ready={ready} leased={leased} dlq={dead}",
        queue.queue()
    );
    Ok(())
}
