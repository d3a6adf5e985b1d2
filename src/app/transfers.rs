//! Batch transfer execution.
//!
//! The dispatcher half of the service screens candidates synchronously
//! (structural checks, signing-key resolution, optional destination
//! precondition) and skips what fails; survivors fan out through the shared
//! batch machinery. A partially failed batch is still a successful call;
//! callers read the counts and the failure list.

use std::collections::HashSet;
use std::sync::Arc;

use solana_sdk::signature::Keypair;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::domain::{
    AppError, BatchOutcome, KeyResolver, OperationClient, SkippedItem, TransferSpec, WorkItem,
};

use super::batch::{BatchLimits, Cancellation, run_batch};

/// Per-batch dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// When present, a transfer's destination must be a member of this set;
    /// items whose destination is absent are skipped, not failed.
    pub known_destinations: Option<HashSet<String>>,
}

struct TransferJob {
    spec: TransferSpec,
    signer: Arc<Keypair>,
}

/// Request-scoped batch transfer service. The worker pool for each batch is
/// built on entry and torn down when the call returns.
pub struct TransferBatchService {
    client: Arc<dyn OperationClient>,
    resolver: Arc<dyn KeyResolver>,
}

impl TransferBatchService {
    #[must_use]
    pub fn new(client: Arc<dyn OperationClient>, resolver: Arc<dyn KeyResolver>) -> Self {
        Self { client, resolver }
    }

    /// Execute a batch of transfers, returning only after every dispatched
    /// item has a terminal result.
    #[instrument(
        skip(self, candidates, limits, options, cancel),
        fields(batch_id = %Uuid::new_v4(), submitted = candidates.len())
    )]
    pub async fn execute_batch(
        &self,
        candidates: Vec<TransferSpec>,
        limits: &BatchLimits,
        options: &DispatchOptions,
        cancel: Cancellation,
    ) -> Result<BatchOutcome, AppError> {
        let submitted = candidates.len();
        let mut skipped = Vec::new();
        let mut work = Vec::with_capacity(submitted);

        for spec in candidates {
            let key = spec.key();
            match self.screen(&spec, options) {
                Ok(signer) => work.push(WorkItem::new(key, TransferJob { spec, signer })),
                Err(reason) => {
                    warn!(key = %key, reason = %reason, "transfer skipped before dispatch");
                    skipped.push(SkippedItem { key, reason });
                }
            }
        }

        if work.is_empty() {
            return Ok(BatchOutcome::all_skipped(submitted, skipped));
        }

        let client = Arc::clone(&self.client);
        let results = run_batch(work, limits, cancel, move |job: TransferJob| {
            let client = Arc::clone(&client);
            async move {
                client
                    .transfer(
                        &job.signer,
                        &job.spec.to_address,
                        job.spec.amount,
                        job.spec.token_mint.as_deref(),
                    )
                    .await
            }
        })
        .await?;

        let outcome = BatchOutcome::collect(submitted, skipped, results);
        info!(
            dispatched = outcome.dispatched,
            skipped = outcome.skipped.len(),
            success = outcome.success_count,
            failure = outcome.failure_count,
            "transfer batch complete"
        );
        Ok(outcome)
    }

    /// Synchronous pre-dispatch screening. No I/O happens here.
    fn screen(
        &self,
        spec: &TransferSpec,
        options: &DispatchOptions,
    ) -> Result<Arc<Keypair>, String> {
        if let Err(e) = spec.validate() {
            return Err(e.to_string());
        }
        validate_address(&spec.from_address).map_err(|e| format!("invalid from_address: {e}"))?;
        validate_address(&spec.to_address).map_err(|e| format!("invalid to_address: {e}"))?;
        if let Some(mint) = &spec.token_mint {
            validate_address(mint).map_err(|e| format!("invalid token_mint: {e}"))?;
        }
        if let Some(known) = &options.known_destinations {
            if !known.contains(&spec.to_address) {
                return Err("destination is not a known account".to_string());
            }
        }
        self.resolver
            .resolve(&spec.from_address)
            .map_err(|e| e.to_string())
    }
}

/// Structural address check: Base58, 32 bytes decoded.
pub(crate) fn validate_address(address: &str) -> Result<(), String> {
    match bs58::decode(address).into_vec() {
        Ok(bytes) if bytes.len() == 32 => Ok(()),
        Ok(bytes) => Err(format!("decodes to {} bytes, expected 32", bytes.len())),
        Err(e) => Err(format!("not valid Base58: {e}")),
    }
}
