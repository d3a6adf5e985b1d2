//! Run one transfer batch from a JSON file of candidates.
//!
//! Environment:
//! - `TRANSFER_BATCH_FILE`: path to a JSON array of transfer specs (required)
//! - `SIGNER_KEYS`: comma-separated Base58 secret keys (required)
//! - `SOLANA_RPC_URL`: RPC endpoint (default: devnet)
//! - `TRANSFER_WORKER_COUNT` / `TRANSFER_RATE_LIMIT`: pool tuning

use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use secrecy::SecretString;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use solana_batch_engine::app::{
    BatchLimits, BatchLimitsPatch, Cancellation, DispatchOptions, TransferBatchService,
};
use solana_batch_engine::domain::TransferSpec;
use solana_batch_engine::infra::{InMemoryKeyStore, RpcOperationClient};

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

    let rpc_url = env::var("SOLANA_RPC_URL")
        .unwrap_or_else(|_| "https://api.devnet.solana.com".to_string());
    let batch_file = env::var("TRANSFER_BATCH_FILE").context("TRANSFER_BATCH_FILE not set")?;

    let raw = std::fs::read_to_string(&batch_file)
        .with_context(|| format!("Failed to read {batch_file}"))?;
    let candidates: Vec<TransferSpec> =
        serde_json::from_str(&raw).context("Failed to parse batch file")?;
    info!(count = candidates.len(), file = %batch_file, "Loaded transfer candidates");

    let signer_keys = env::var("SIGNER_KEYS").context("SIGNER_KEYS not set")?;
    let secrets: Vec<SecretString> = signer_keys
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| SecretString::from(s.to_string()))
        .collect();
    let resolver = Arc::new(InMemoryKeyStore::from_secrets(&secrets)?);
    info!(signers = resolver.len(), "Key store loaded");

    let client = Arc::new(RpcOperationClient::with_defaults(&rpc_url));
    let service = TransferBatchService::new(client, resolver);

    let overrides = BatchLimitsPatch {
        worker_count: env::var("TRANSFER_WORKER_COUNT")
            .ok()
            .and_then(|v| v.parse().ok()),
        rate_limit_per_sec: env::var("TRANSFER_RATE_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok()),
        stagger_ms: None,
    };
    let limits = BatchLimits::transfers().apply(&overrides)?;

    let outcome = service
        .execute_batch(
            candidates,
            &limits,
            &DispatchOptions::default(),
            Cancellation::none(),
        )
        .await?;

    info!(
        success = outcome.success_count,
        failure = outcome.failure_count,
        skipped = outcome.skipped.len(),
        "Batch finished"
    );
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}
