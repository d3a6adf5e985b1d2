//! Environment-driven engine configuration.

use std::env;

use secrecy::SecretString;

use crate::app::batch::BatchLimits;
use crate::app::balance_sync::SyncPoolConfig;
use crate::app::upsert::DEFAULT_CHUNK_SIZE;
use crate::domain::{AppError, ConfigError};

/// Engine settings assembled from the process environment.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub database_url: String,
    pub rpc_url: String,
    /// Base58-encoded signer secrets (comma separated in `SIGNER_KEYS`)
    pub signer_secrets: Vec<SecretString>,
    pub transfer_limits: BatchLimits,
    pub sync_limits: BatchLimits,
    pub sync_pool: SyncPoolConfig,
    pub upsert_chunk_size: usize,
}

impl EngineSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config(ConfigError::Missing("DATABASE_URL".to_string())))?;
        let rpc_url = env::var("SOLANA_RPC_URL")
            .unwrap_or_else(|_| "https://api.devnet.solana.com".to_string());

        let signer_secrets = env::var("SIGNER_KEYS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| SecretString::from(s.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut transfer_limits = BatchLimits::transfers();
        transfer_limits.worker_count =
            env_parse("TRANSFER_WORKER_COUNT", transfer_limits.worker_count);
        transfer_limits.rate_limit_per_sec =
            env_parse("TRANSFER_RATE_LIMIT", transfer_limits.rate_limit_per_sec);

        let mut sync_limits = BatchLimits::balance_sync();
        sync_limits.worker_count = env_parse("SYNC_WORKER_COUNT", sync_limits.worker_count);
        sync_limits.rate_limit_per_sec =
            env_parse("SYNC_RATE_LIMIT", sync_limits.rate_limit_per_sec);

        let sync_pool = SyncPoolConfig {
            worker_count: env_parse("SYNC_POOL_WORKERS", SyncPoolConfig::default().worker_count),
            rate_limit_per_sec: env_parse(
                "SYNC_POOL_RATE_LIMIT",
                SyncPoolConfig::default().rate_limit_per_sec,
            ),
            queue_capacity: env_parse(
                "SYNC_POOL_QUEUE_CAPACITY",
                SyncPoolConfig::default().queue_capacity,
            ),
        };

        let upsert_chunk_size = env_parse("UPSERT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE);

        Ok(Self {
            database_url,
            rpc_url,
            signer_secrets,
            transfer_limits,
            sync_limits,
            sync_pool,
            upsert_chunk_size,
        })
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}
