//! Generic batch fan-out machinery.
//!
//! One invocation seeds a bounded work queue (capacity equals the item
//! count, so the producer never blocks), starts a fixed set of workers that
//! share a token-bucket rate limiter, and drains a result channel that
//! closes deterministically once every worker's loop has exited. Per-item
//! failures stay per-item; only infrastructure failures (a limiter that
//! cannot be constructed) fail the whole call.

use std::future::Future;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio::sync::{Mutex, mpsc, watch};
use tracing::debug;

use crate::domain::{AppError, ConfigError, OperationResult, WorkItem};

/// Startup delay applied per worker index to smooth the initial burst
/// against the external endpoint. Heuristic, not a correctness requirement.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(25);

const MAX_WORKERS: usize = 64;
const MAX_RATE_PER_SEC: u32 = 1_000;

/// Tunables for one batch invocation.
#[derive(Debug, Clone)]
pub struct BatchLimits {
    /// Fixed worker pool size
    pub worker_count: usize,
    /// Shared steady-state rate; burst equals one second's worth of permits
    pub rate_limit_per_sec: u32,
    /// Per-worker startup stagger step
    pub stagger: Duration,
}

impl BatchLimits {
    /// Defaults for transfer batches.
    #[must_use]
    pub fn transfers() -> Self {
        Self {
            worker_count: 8,
            rate_limit_per_sec: 20,
            stagger: DEFAULT_STAGGER,
        }
    }

    /// Defaults for balance-sync batches: cheaper per item, wider pool.
    #[must_use]
    pub fn balance_sync() -> Self {
        Self {
            worker_count: 16,
            rate_limit_per_sec: 50,
            stagger: DEFAULT_STAGGER,
        }
    }

    /// Apply a caller-supplied patch, validating once at the boundary.
    pub fn apply(mut self, patch: &BatchLimitsPatch) -> Result<Self, AppError> {
        if let Some(workers) = patch.worker_count {
            if workers == 0 || workers > MAX_WORKERS {
                return Err(ConfigError::Invalid {
                    key: "worker_count".to_string(),
                    message: format!("must be between 1 and {MAX_WORKERS}"),
                }
                .into());
            }
            self.worker_count = workers;
        }
        if let Some(rate) = patch.rate_limit_per_sec {
            if rate == 0 || rate > MAX_RATE_PER_SEC {
                return Err(ConfigError::Invalid {
                    key: "rate_limit_per_sec".to_string(),
                    message: format!("must be between 1 and {MAX_RATE_PER_SEC}"),
                }
                .into());
            }
            self.rate_limit_per_sec = rate;
        }
        if let Some(ms) = patch.stagger_ms {
            self.stagger = Duration::from_millis(ms);
        }
        Ok(self)
    }
}

/// Partial override of [`BatchLimits`]. Absent fields keep their defaults;
/// presence is explicit, so there is no dynamic field map to misinterpret.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct BatchLimitsPatch {
    pub worker_count: Option<usize>,
    pub rate_limit_per_sec: Option<u32>,
    pub stagger_ms: Option<u64>,
}

/// Caller side of a cancellation pair.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Items not yet dispatched fail with a
    /// cancellation error; in-flight client calls run to completion.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Engine side of a cancellation pair. Cloneable; `none()` never fires.
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: Option<watch::Receiver<bool>>,
}

impl Cancellation {
    /// A signal that never fires.
    #[must_use]
    pub fn none() -> Self {
        Self { rx: None }
    }

    /// Create a connected handle/signal pair.
    #[must_use]
    pub fn pair() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx: Some(rx) })
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolve when cancellation fires. Pends forever for `none()` or when
    /// the handle is dropped without firing.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = &mut self.rx {
            if *rx.borrow() {
                return;
            }
            while rx.changed().await.is_ok() {
                if *rx.borrow() {
                    return;
                }
            }
        }
        std::future::pending::<()>().await;
    }
}

/// Build the shared token-bucket limiter for one pool.
///
/// Failure here is a batch-level infrastructure error: the whole call is
/// rejected before any item is dispatched.
pub(crate) fn build_limiter(rate_per_sec: u32) -> Result<Arc<DefaultDirectRateLimiter>, AppError> {
    let rate = NonZeroU32::new(rate_per_sec).ok_or_else(|| {
        AppError::Config(ConfigError::Invalid {
            key: "rate_limit_per_sec".to_string(),
            message: "must be at least 1".to_string(),
        })
    })?;
    Ok(Arc::new(RateLimiter::direct(Quota::per_second(rate))))
}

/// Fan `items` out to a bounded worker pool and collect one result per item.
///
/// Returns results in completion order; callers must not rely on any
/// ordering. The only `Err` this returns is limiter construction failure.
pub(crate) async fn run_batch<T, F, Fut>(
    items: Vec<WorkItem<T>>,
    limits: &BatchLimits,
    cancel: Cancellation,
    op: F,
) -> Result<Vec<OperationResult>, AppError>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<String, AppError>> + Send + 'static,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    let limiter = build_limiter(limits.rate_limit_per_sec)?;
    let capacity = items.len();

    // Queue sized to the batch: seeding never blocks, and dropping the
    // sender closes the queue for the workers.
    let (work_tx, work_rx) = mpsc::channel::<WorkItem<T>>(capacity);
    for item in items {
        work_tx
            .try_send(item)
            .expect("work queue is sized to the batch");
    }
    drop(work_tx);

    let work_rx = Arc::new(Mutex::new(work_rx));
    let (result_tx, mut result_rx) = mpsc::channel::<OperationResult>(capacity);

    let worker_count = limits.worker_count.min(capacity).max(1);
    let mut handles = Vec::with_capacity(worker_count);
    for index in 0..worker_count {
        let work_rx = Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let limiter = Arc::clone(&limiter);
        let cancel = cancel.clone();
        let op = op.clone();
        let stagger = limits.stagger * index as u32;
        handles.push(tokio::spawn(worker_loop(
            index, work_rx, result_tx, limiter, cancel, op, stagger,
        )));
    }
    // Workers hold the only remaining senders; the drain below terminates
    // once every worker loop has exited.
    drop(result_tx);

    let mut results = Vec::with_capacity(capacity);
    while let Some(result) = result_rx.recv().await {
        results.push(result);
    }
    for handle in handles {
        let _ = handle.await;
    }

    Ok(results)
}

async fn worker_loop<T, F, Fut>(
    index: usize,
    work_rx: Arc<Mutex<mpsc::Receiver<WorkItem<T>>>>,
    result_tx: mpsc::Sender<OperationResult>,
    limiter: Arc<DefaultDirectRateLimiter>,
    mut cancel: Cancellation,
    op: F,
    stagger: Duration,
) where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, AppError>> + Send + 'static,
{
    if !stagger.is_zero() {
        tokio::time::sleep(stagger).await;
    }

    loop {
        let item = { work_rx.lock().await.recv().await };
        let Some(WorkItem { key, payload }) = item else {
            break;
        };

        // A cancelled batch still drains the queue so every item gets a
        // terminal result; nothing is silently dropped.
        let result = if cancel.is_cancelled() {
            OperationResult::failed(key, AppError::Cancelled.to_string())
        } else {
            let acquired = tokio::select! {
                () = limiter.until_ready() => true,
                () = cancel.cancelled() => false,
            };
            if acquired {
                match op(payload).await {
                    Ok(reference) => OperationResult::succeeded(key, reference),
                    Err(e) => OperationResult::failed(key, e.to_string()),
                }
            } else {
                OperationResult::failed(key, AppError::Cancelled.to_string())
            }
        };

        if result_tx.send(result).await.is_err() {
            break;
        }
    }

    debug!(worker = index, "worker loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(n: usize) -> Vec<WorkItem<u64>> {
        (0..n)
            .map(|i| WorkItem::new(format!("item-{i}"), i as u64))
            .collect()
    }

    fn quick_limits() -> BatchLimits {
        BatchLimits {
            worker_count: 4,
            rate_limit_per_sec: 1_000,
            stagger: Duration::ZERO,
        }
    }

    #[test]
    fn test_limits_patch_applies_present_fields_only() {
        let patch = BatchLimitsPatch {
            worker_count: Some(3),
            rate_limit_per_sec: None,
            stagger_ms: Some(0),
        };
        let limits = BatchLimits::transfers().apply(&patch).unwrap();
        assert_eq!(limits.worker_count, 3);
        assert_eq!(
            limits.rate_limit_per_sec,
            BatchLimits::transfers().rate_limit_per_sec
        );
        assert_eq!(limits.stagger, Duration::ZERO);
    }

    #[test]
    fn test_limits_patch_rejects_out_of_range() {
        let patch = BatchLimitsPatch {
            worker_count: Some(0),
            ..Default::default()
        };
        assert!(BatchLimits::transfers().apply(&patch).is_err());

        let patch = BatchLimitsPatch {
            rate_limit_per_sec: Some(0),
            ..Default::default()
        };
        assert!(BatchLimits::transfers().apply(&patch).is_err());

        let patch = BatchLimitsPatch {
            rate_limit_per_sec: Some(MAX_RATE_PER_SEC + 1),
            ..Default::default()
        };
        assert!(BatchLimits::transfers().apply(&patch).is_err());
    }

    #[test]
    fn test_build_limiter_rejects_zero_rate() {
        assert!(build_limiter(0).is_err());
        assert!(build_limiter(10).is_ok());
    }

    #[tokio::test]
    async fn test_run_batch_produces_one_result_per_item() {
        let results = run_batch(
            items(5),
            &quick_limits(),
            Cancellation::none(),
            |payload: u64| async move { Ok(format!("ref-{payload}")) },
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 5);
        assert!(results.iter().all(OperationResult::is_success));
    }

    #[tokio::test]
    async fn test_run_batch_empty_input_yields_no_results() {
        let results = run_batch(
            Vec::<WorkItem<u64>>::new(),
            &quick_limits(),
            Cancellation::none(),
            |_: u64| async move { Ok(String::new()) },
        )
        .await
        .unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_run_batch_isolates_item_failures() {
        let results = run_batch(
            items(6),
            &quick_limits(),
            Cancellation::none(),
            |payload: u64| async move {
                if payload == 3 {
                    Err(AppError::NotSupported("injected".to_string()))
                } else {
                    Ok(format!("ref-{payload}"))
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(results.len(), 6);
        assert_eq!(results.iter().filter(|r| r.is_success()).count(), 5);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].key, "item-3");
        assert!(failed[0].error().unwrap().contains("injected"));
    }

    #[tokio::test]
    async fn test_run_batch_pre_cancelled_fails_every_item() {
        let (handle, cancel) = Cancellation::pair();
        handle.cancel();

        let results = run_batch(items(4), &quick_limits(), cancel, |payload: u64| async move {
            Ok(format!("ref-{payload}"))
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 4);
        assert!(results.iter().all(|r| !r.is_success()));
        assert!(
            results
                .iter()
                .all(|r| r.error().unwrap().contains("cancelled"))
        );
    }

    #[tokio::test]
    async fn test_worker_count_clamped_to_batch_size() {
        // More workers than items must not deadlock or duplicate results.
        let limits = BatchLimits {
            worker_count: 16,
            ..quick_limits()
        };
        let results = run_batch(items(2), &limits, Cancellation::none(), |p: u64| async move {
            Ok(p.to_string())
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 2);
    }
}
