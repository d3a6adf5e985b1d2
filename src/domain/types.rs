//! Domain types for batch execution and balance persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Candidate value transfer submitted to a batch.
///
/// `amount` is in raw base units: lamports for native SOL, raw token units
/// for SPL transfers (callers pre-convert using the mint's decimals).
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct TransferSpec {
    /// Sender wallet address (Base58)
    #[validate(length(min = 1, message = "From address is required"))]
    pub from_address: String,
    /// Recipient wallet address (Base58)
    #[validate(length(min = 1, message = "To address is required"))]
    pub to_address: String,
    /// Amount in raw base units
    #[validate(range(min = 1, message = "Amount must be greater than 0"))]
    pub amount: u64,
    /// SPL token mint (Base58); `None` transfers native SOL
    pub token_mint: Option<String>,
}

impl TransferSpec {
    #[must_use]
    pub fn new(from_address: String, to_address: String, amount: u64) -> Self {
        Self {
            from_address,
            to_address,
            amount,
            token_mint: None,
        }
    }

    /// Stable item key: source and destination pair.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}->{}", self.from_address, self.to_address)
    }
}

/// Request to refresh the token balances of one owner.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct BalanceFetchRequest {
    /// Owner wallet address (Base58)
    #[validate(length(min = 1, message = "Owner address is required"))]
    pub owner: String,
    /// Mints to observe (Base58); must be non-empty
    #[validate(length(min = 1, message = "At least one mint is required"))]
    pub mints: Vec<String>,
}

impl BalanceFetchRequest {
    #[must_use]
    pub fn new(owner: String, mints: Vec<String>) -> Self {
        Self { owner, mints }
    }

    /// Stable item key: the owner address.
    #[must_use]
    pub fn key(&self) -> String {
        self.owner.clone()
    }
}

/// One dispatchable unit of work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    pub key: String,
    pub payload: T,
}

impl<T> WorkItem<T> {
    #[must_use]
    pub fn new(key: String, payload: T) -> Self {
        Self { key, payload }
    }
}

/// Terminal outcome of one dispatched item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Operation completed; `reference` is an opaque success payload
    /// (a transaction signature for transfers).
    Succeeded { reference: String },
    /// Operation failed; sibling items are unaffected.
    Failed { error: String },
}

/// Result for one dispatched work item. Exactly one is produced per item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OperationResult {
    pub key: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

impl OperationResult {
    #[must_use]
    pub fn succeeded(key: String, reference: String) -> Self {
        Self {
            key,
            outcome: ItemOutcome::Succeeded { reference },
        }
    }

    #[must_use]
    pub fn failed(key: String, error: String) -> Self {
        Self {
            key,
            outcome: ItemOutcome::Failed { error },
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Succeeded { .. })
    }

    /// Error text, if this result is a failure.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            ItemOutcome::Failed { error } => Some(error),
            ItemOutcome::Succeeded { .. } => None,
        }
    }
}

/// Item rejected by the dispatcher before reaching a worker.
/// Skipped items never produce an [`OperationResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SkippedItem {
    pub key: String,
    pub reason: String,
}

/// Failed item summary: key plus error text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FailedItem {
    pub key: String,
    pub error: String,
}

/// Aggregate view of one batch invocation.
///
/// Invariants: `dispatched == success_count + failure_count` and
/// `submitted == dispatched + skipped.len()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Total candidates handed to the batch call
    pub submitted: usize,
    /// Candidates that passed validation and reached a worker
    pub dispatched: usize,
    /// Items rejected before dispatch, with reasons
    pub skipped: Vec<SkippedItem>,
    pub success_count: usize,
    pub failure_count: usize,
    /// Per-item results, in completion order (unspecified)
    pub results: Vec<OperationResult>,
    /// Failures only, for callers that resubmit
    pub failures: Vec<FailedItem>,
}

impl BatchOutcome {
    /// Assemble an outcome from the dispatcher's skip list and the
    /// aggregator's result stream.
    #[must_use]
    pub fn collect(
        submitted: usize,
        skipped: Vec<SkippedItem>,
        results: Vec<OperationResult>,
    ) -> Self {
        let dispatched = results.len();
        let success_count = results.iter().filter(|r| r.is_success()).count();
        let failure_count = dispatched - success_count;
        let failures = results
            .iter()
            .filter_map(|r| {
                r.error().map(|e| FailedItem {
                    key: r.key.clone(),
                    error: e.to_string(),
                })
            })
            .collect();

        debug_assert_eq!(submitted, dispatched + skipped.len());

        Self {
            submitted,
            dispatched,
            skipped,
            success_count,
            failure_count,
            results,
            failures,
        }
    }

    /// Outcome for a batch where nothing survived validation.
    #[must_use]
    pub fn all_skipped(submitted: usize, skipped: Vec<SkippedItem>) -> Self {
        Self::collect(submitted, skipped, Vec::new())
    }
}

/// Composite identity of one balance observation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BalanceKey {
    pub owner: String,
    pub mint: String,
}

impl BalanceKey {
    #[must_use]
    pub fn new(owner: impl Into<String>, mint: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            mint: mint.into(),
        }
    }
}

impl std::fmt::Display for BalanceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.mint)
    }
}

/// One (owner, mint) balance observation to persist.
///
/// Balances are overwritten on every observation, never accumulated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceRecord {
    pub owner: String,
    pub mint: String,
    /// Balance in raw token units
    pub raw_amount: u64,
    /// Human-readable quantity: `raw_amount / 10^decimals`
    pub ui_amount: f64,
    pub decimals: u8,
    /// Slot the observation was read at
    pub slot: u64,
    pub observed_at: DateTime<Utc>,
}

impl BalanceRecord {
    #[must_use]
    pub fn new(
        owner: impl Into<String>,
        mint: impl Into<String>,
        raw_amount: u64,
        decimals: u8,
        slot: u64,
        observed_at: DateTime<Utc>,
    ) -> Self {
        let ui_amount = raw_amount as f64 / 10f64.powi(i32::from(decimals));
        Self {
            owner: owner.into(),
            mint: mint.into(),
            raw_amount,
            ui_amount,
            decimals,
            slot,
            observed_at,
        }
    }

    #[must_use]
    pub fn key(&self) -> BalanceKey {
        BalanceKey::new(self.owner.clone(), self.mint.clone())
    }
}

/// Aggregate result of one `upsert_balances` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpsertSummary {
    pub success_count: usize,
    pub failure_count: usize,
    /// Keys that exhausted every write strategy
    pub failed_keys: Vec<BalanceKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_spec_validation() {
        let spec = TransferSpec::new("From".to_string(), "To".to_string(), 1_000);
        assert!(spec.validate().is_ok());

        let spec = TransferSpec::new("".to_string(), "To".to_string(), 1_000);
        assert!(spec.validate().is_err());

        let spec = TransferSpec::new("From".to_string(), "To".to_string(), 0);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_transfer_spec_key_is_source_destination_pair() {
        let spec = TransferSpec::new("A".to_string(), "B".to_string(), 1);
        assert_eq!(spec.key(), "A->B");
    }

    #[test]
    fn test_balance_fetch_request_requires_mints() {
        let req = BalanceFetchRequest::new("Owner".to_string(), vec![]);
        assert!(req.validate().is_err());

        let req = BalanceFetchRequest::new("Owner".to_string(), vec!["Mint".to_string()]);
        assert!(req.validate().is_ok());
        assert_eq!(req.key(), "Owner");
    }

    #[test]
    fn test_batch_outcome_conservation() {
        let skipped = vec![SkippedItem {
            key: "a->b".to_string(),
            reason: "bad address".to_string(),
        }];
        let results = vec![
            OperationResult::succeeded("c->d".to_string(), "sig1".to_string()),
            OperationResult::failed("e->f".to_string(), "rpc timeout".to_string()),
        ];
        let outcome = BatchOutcome::collect(3, skipped, results);

        assert_eq!(outcome.submitted, 3);
        assert_eq!(outcome.dispatched, 2);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.success_count, 1);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key, "e->f");
        assert_eq!(
            outcome.dispatched,
            outcome.success_count + outcome.failure_count
        );
        assert_eq!(outcome.submitted, outcome.dispatched + outcome.skipped.len());
    }

    #[test]
    fn test_batch_outcome_empty_batch_is_all_zero() {
        let outcome = BatchOutcome::collect(0, vec![], vec![]);
        assert_eq!(outcome.submitted, 0);
        assert_eq!(outcome.dispatched, 0);
        assert_eq!(outcome.success_count, 0);
        assert_eq!(outcome.failure_count, 0);
        assert!(outcome.results.is_empty());
    }

    #[test]
    fn test_balance_record_ui_amount_derivation() {
        let record = BalanceRecord::new("Owner", "Mint", 1_500_000, 6, 42, Utc::now());
        assert!((record.ui_amount - 1.5).abs() < f64::EPSILON);
        assert_eq!(record.key(), BalanceKey::new("Owner", "Mint"));
    }

    #[test]
    fn test_operation_result_serialization_roundtrip() {
        let result = OperationResult::succeeded("A->B".to_string(), "sig_abc".to_string());
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"succeeded\""));
        let back: OperationResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);

        let result = OperationResult::failed("A->B".to_string(), "boom".to_string());
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"status\":\"failed\""));
        let back: OperationResult = serde_json::from_str(&json).unwrap();
        assert!(!back.is_success());
        assert_eq!(back.error(), Some("boom"));
    }
}
