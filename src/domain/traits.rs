//! Domain traits defining contracts for external collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use solana_sdk::signature::Keypair;

use super::error::AppError;
use super::types::{BalanceKey, BalanceRecord};

/// Client performing one unit of external on-chain work.
///
/// Latency and failure modes are opaque; every error is treated as an
/// item-level failure; the engine never distinguishes transient from
/// permanent at this layer.
#[async_trait]
pub trait OperationClient: Send + Sync {
    /// Check RPC connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Send a value transfer and return the transaction signature.
    /// `token_mint == None` transfers native SOL lamports; otherwise the
    /// amount is in raw units of the given SPL mint.
    async fn transfer(
        &self,
        signer: &Keypair,
        to_address: &str,
        amount: u64,
        token_mint: Option<&str>,
    ) -> Result<String, AppError>;

    /// Fetch the owner's balances for the given mints, stamped with the
    /// slot they were observed at.
    async fn fetch_balances(
        &self,
        owner: &str,
        mints: &[String],
    ) -> Result<Vec<BalanceRecord>, AppError>;
}

/// Resolves the signing material that authorizes transfers out of an owner
/// address. A failed resolution causes the work item to be skipped before
/// dispatch, never counted as a dispatch failure.
pub trait KeyResolver: Send + Sync {
    fn resolve(&self, owner: &str) -> Result<Arc<Keypair>, AppError>;
}

/// Relational store for balance observations.
///
/// The store may or may not enforce (owner, mint) uniqueness physically;
/// [`upsert_batch`](BalanceStore::upsert_batch) failing with
/// `DatabaseError::ConstraintMissing` is how the absence is discovered at
/// runtime. The remaining primitives exist so writes can degrade gracefully.
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Check store connectivity
    async fn health_check(&self) -> Result<(), AppError>;

    /// Conflict-aware write: insert-or-update every record in one statement,
    /// keyed on (owner, mint).
    async fn upsert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError>;

    /// Return the subset of `keys` that already exist, in one round trip.
    async fn fetch_existing(&self, keys: &[BalanceKey]) -> Result<Vec<BalanceKey>, AppError>;

    /// Plain batch insert with no conflict clause.
    async fn insert_batch(&self, records: &[BalanceRecord]) -> Result<(), AppError>;

    /// Apply each record as an individual UPDATE inside one transaction,
    /// committed once. All-or-nothing: any failure rolls the whole set back.
    async fn update_chunk(&self, records: &[BalanceRecord]) -> Result<(), AppError>;

    /// Read one row by key.
    async fn get(&self, key: &BalanceKey) -> Result<Option<BalanceRecord>, AppError>;

    /// Insert one row.
    async fn insert_one(&self, record: &BalanceRecord) -> Result<(), AppError>;

    /// Overwrite one existing row.
    async fn update_one(&self, record: &BalanceRecord) -> Result<(), AppError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MinimalOperationClient;

    #[async_trait]
    impl OperationClient for MinimalOperationClient {
        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }

        async fn transfer(
            &self,
            _signer: &Keypair,
            _to_address: &str,
            _amount: u64,
            _token_mint: Option<&str>,
        ) -> Result<String, AppError> {
            Ok("sig_123".to_string())
        }

        async fn fetch_balances(
            &self,
            _owner: &str,
            _mints: &[String],
        ) -> Result<Vec<BalanceRecord>, AppError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_operation_client_is_object_safe() {
        let client: Arc<dyn OperationClient> = Arc::new(MinimalOperationClient);
        assert!(client.health_check().await.is_ok());
        let signer = Keypair::new();
        let sig = client.transfer(&signer, "Dest", 1, None).await.unwrap();
        assert_eq!(sig, "sig_123");
    }
}
