//! Balance synchronization: request-scoped batch refresh and the long-lived
//! sync pool.
//!
//! The pool is an explicitly constructed, explicitly owned handle: started
//! with [`BalanceSyncPool::start`], injected where needed, stopped with
//! [`BalanceSyncPool::shutdown`]. There is no ambient global instance.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use validator::Validate;

use crate::domain::{
    AppError, BalanceFetchRequest, BalanceRecord, BatchOutcome, OperationClient, SkippedItem,
    UpsertSummary, WorkItem,
};

use super::batch::{BatchLimits, Cancellation, build_limiter, run_batch};
use super::transfers::validate_address;
use super::upsert::BalanceUpsertEngine;

/// Rejection returned by [`BalanceSyncPool::submit`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubmitError {
    /// The queue is at capacity; the item was not enqueued.
    #[error("sync queue is full")]
    QueueFull,
    /// The pool has been shut down.
    #[error("sync pool is shut down")]
    Closed,
    /// The request failed structural validation.
    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Tunables for the long-lived sync pool.
#[derive(Debug, Clone)]
pub struct SyncPoolConfig {
    pub worker_count: usize,
    pub rate_limit_per_sec: u32,
    pub queue_capacity: usize,
}

impl Default for SyncPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            rate_limit_per_sec: 10,
            queue_capacity: 256,
        }
    }
}

/// Request-scoped balance refresh: fan the fetches out, collect the fetched
/// records, and hand them to the persistence cascade in one pass.
pub struct BalanceSyncService {
    client: Arc<dyn OperationClient>,
    engine: Arc<BalanceUpsertEngine>,
}

impl BalanceSyncService {
    #[must_use]
    pub fn new(client: Arc<dyn OperationClient>, engine: Arc<BalanceUpsertEngine>) -> Self {
        Self { client, engine }
    }

    /// Refresh balances for a batch of owners and persist the observations.
    ///
    /// Records fetched before a cancellation signal are still persisted;
    /// owners whose fetch never ran appear as failures in the outcome.
    #[instrument(skip(self, requests, limits, cancel), fields(submitted = requests.len()))]
    pub async fn sync_batch(
        &self,
        requests: Vec<BalanceFetchRequest>,
        limits: &BatchLimits,
        cancel: Cancellation,
    ) -> Result<(BatchOutcome, UpsertSummary), AppError> {
        let submitted = requests.len();
        let mut skipped = Vec::new();
        let mut work = Vec::with_capacity(submitted);

        for request in requests {
            let key = request.key();
            match screen_fetch(&request) {
                Ok(()) => work.push(WorkItem::new(key, request)),
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "balance fetch skipped before dispatch");
                    skipped.push(SkippedItem { key, reason });
                }
            }
        }

        if work.is_empty() {
            return Ok((
                BatchOutcome::all_skipped(submitted, skipped),
                UpsertSummary::default(),
            ));
        }

        let collected: Arc<Mutex<Vec<BalanceRecord>>> = Arc::new(Mutex::new(Vec::new()));
        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&collected);
        let results = run_batch(work, limits, cancel, move |request: BalanceFetchRequest| {
            let client = Arc::clone(&client);
            let sink = Arc::clone(&sink);
            async move {
                let records = client.fetch_balances(&request.owner, &request.mints).await?;
                let fetched = records.len();
                sink.lock().await.extend(records);
                Ok(format!("{fetched} balances"))
            }
        })
        .await?;

        let outcome = BatchOutcome::collect(submitted, skipped, results);
        let records = {
            let mut guard = collected.lock().await;
            std::mem::take(&mut *guard)
        };
        let summary = self.engine.upsert_balances(records).await?;

        info!(
            dispatched = outcome.dispatched,
            fetch_failures = outcome.failure_count,
            persisted = summary.success_count,
            persist_failures = summary.failure_count,
            "balance sync batch complete"
        );
        Ok((outcome, summary))
    }
}

/// Long-lived pool accepting ad-hoc single refreshes.
///
/// Contract: `start` spawns the workers, `submit` enqueues without blocking
/// (full queue → immediate rejection), `shutdown` closes the queue and waits
/// for in-flight work to finish. Dropping the handle without `shutdown`
/// detaches the workers; they drain the queue and exit.
pub struct BalanceSyncPool {
    queue_tx: mpsc::Sender<BalanceFetchRequest>,
    workers: Vec<JoinHandle<()>>,
}

impl BalanceSyncPool {
    /// Start the pool. Fails only if the rate limiter cannot be constructed.
    pub fn start(
        client: Arc<dyn OperationClient>,
        engine: Arc<BalanceUpsertEngine>,
        config: SyncPoolConfig,
    ) -> Result<Self, AppError> {
        let limiter = build_limiter(config.rate_limit_per_sec)?;
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let worker_count = config.worker_count.max(1);
        let workers = (0..worker_count)
            .map(|index| {
                let queue_rx = Arc::clone(&queue_rx);
                let client = Arc::clone(&client);
                let engine = Arc::clone(&engine);
                let limiter = Arc::clone(&limiter);
                tokio::spawn(sync_worker(index, queue_rx, client, engine, limiter))
            })
            .collect();

        info!(
            workers = worker_count,
            rate = config.rate_limit_per_sec,
            capacity = config.queue_capacity,
            "balance sync pool started"
        );
        Ok(Self { queue_tx, workers })
    }

    /// Fire-and-forget submission. Never blocks: a full queue rejects the
    /// item immediately.
    pub fn submit(&self, request: BalanceFetchRequest) -> Result<(), SubmitError> {
        if let Err(reason) = screen_fetch(&request) {
            warn!(owner = %request.owner, reason = %reason, "sync submission rejected");
            return Err(SubmitError::Invalid(reason));
        }
        self.queue_tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        })
    }

    /// Close the queue and wait for every worker to finish in-flight work.
    pub async fn shutdown(self) {
        drop(self.queue_tx);
        for handle in self.workers {
            let _ = handle.await;
        }
        info!("balance sync pool stopped");
    }
}

async fn sync_worker(
    index: usize,
    queue_rx: Arc<Mutex<mpsc::Receiver<BalanceFetchRequest>>>,
    client: Arc<dyn OperationClient>,
    engine: Arc<BalanceUpsertEngine>,
    limiter: Arc<governor::DefaultDirectRateLimiter>,
) {
    loop {
        let request = { queue_rx.lock().await.recv().await };
        let Some(request) = request else {
            break;
        };

        limiter.until_ready().await;

        match client.fetch_balances(&request.owner, &request.mints).await {
            Ok(records) if records.is_empty() => {
                debug!(owner = %request.owner, "no balances to record");
            }
            Ok(records) => match engine.upsert_balances(records).await {
                Ok(summary) => debug!(
                    owner = %request.owner,
                    persisted = summary.success_count,
                    failed = summary.failure_count,
                    "balances refreshed"
                ),
                Err(e) => warn!(owner = %request.owner, error = %e, "balance persistence failed"),
            },
            Err(e) => warn!(owner = %request.owner, error = %e, "balance fetch failed"),
        }
    }
    debug!(worker = index, "sync worker exited");
}

fn screen_fetch(request: &BalanceFetchRequest) -> Result<(), String> {
    if let Err(e) = request.validate() {
        return Err(e.to_string());
    }
    validate_address(&request.owner).map_err(|e| format!("invalid owner: {e}"))?;
    for mint in &request.mints {
        validate_address(mint).map_err(|e| format!("invalid mint {mint}: {e}"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const OWNER: &str = "11111111111111111111111111111111";

    #[test]
    fn test_screen_fetch_rejects_empty_mints() {
        let request = BalanceFetchRequest::new(OWNER.to_string(), vec![]);
        assert!(screen_fetch(&request).is_err());
    }

    #[test]
    fn test_screen_fetch_rejects_bad_mint() {
        let request = BalanceFetchRequest::new(OWNER.to_string(), vec!["not-base58!".to_string()]);
        let err = screen_fetch(&request).unwrap_err();
        assert!(err.contains("invalid mint"));
    }

    #[test]
    fn test_screen_fetch_accepts_valid_request() {
        let request = BalanceFetchRequest::new(OWNER.to_string(), vec![OWNER.to_string()]);
        assert!(screen_fetch(&request).is_ok());
    }

    #[test]
    fn test_sync_pool_config_defaults() {
        let config = SyncPoolConfig::default();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.rate_limit_per_sec, 10);
        assert_eq!(config.queue_capacity, 256);
    }
}
