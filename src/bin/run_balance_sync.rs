//! Refresh token balances for a set of owners and persist the observations.
//!
//! Environment:
//! - `DATABASE_URL`: Postgres connection string (required)
//! - `SYNC_BATCH_FILE`: path to a JSON array of `{ owner, mints }` requests (required)
//! - `SOLANA_RPC_URL`: RPC endpoint (default: devnet)
//! - `SYNC_WORKER_COUNT` / `SYNC_RATE_LIMIT` / `UPSERT_CHUNK_SIZE`: tuning

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use solana_batch_engine::app::{BalanceSyncService, BalanceUpsertEngine, Cancellation};
use solana_batch_engine::config::EngineSettings;
use solana_batch_engine::domain::BalanceFetchRequest;
use solana_batch_engine::infra::{PostgresBalanceStore, RpcOperationClient};

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    init_tracing();

    let settings = EngineSettings::from_env()?;
    let batch_file = env::var("SYNC_BATCH_FILE").context("SYNC_BATCH_FILE not set")?;

    let raw = std::fs::read_to_string(&batch_file)
        .with_context(|| format!("Failed to read {batch_file}"))?;
    let requests: Vec<BalanceFetchRequest> =
        serde_json::from_str(&raw).context("Failed to parse batch file")?;
    info!(count = requests.len(), file = %batch_file, "Loaded sync requests");

    let store = PostgresBalanceStore::with_defaults(&settings.database_url).await?;
    store.run_migrations().await?;

    let engine = Arc::new(BalanceUpsertEngine::with_chunk_size(
        Arc::new(store) as _,
        settings.upsert_chunk_size,
    ));
    let client = Arc::new(RpcOperationClient::with_defaults(&settings.rpc_url));
    let service = BalanceSyncService::new(client, engine);

    let (outcome, summary) = service
        .sync_batch(requests, &settings.sync_limits, Cancellation::none())
        .await?;

    info!(
        fetched = outcome.success_count,
        fetch_failures = outcome.failure_count,
        persisted = summary.success_count,
        persist_failures = summary.failure_count,
        "Sync finished"
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "outcome": outcome,
            "persistence": summary,
        }))?
    );

    Ok(())
}
