//! Concurrent batch engine for Solana on-chain operations.
//!
//! Two workloads share one fan-out core: bulk value transfers and token
//! balance synchronization. Each batch seeds a bounded work queue, runs a
//! fixed worker pool under a shared token-bucket rate limit, isolates
//! per-item failures, and aggregates results into a [`domain::BatchOutcome`].
//! Fetched balances persist through a cascading three-stage upsert that
//! degrades gracefully when the store cannot guarantee atomic conflict
//! handling.
//!
//! Layering:
//!
//! - [`domain`]: types, collaborator traits, and error definitions
//! - [`app`]: batch machinery, transfer/sync services, upsert cascade
//! - [`infra`]: Postgres store, Solana RPC client, in-memory key store
//! - [`config`]: environment-driven settings

pub mod app;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
