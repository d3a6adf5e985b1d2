//! Domain layer containing core business types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, ConfigError, DatabaseError, SignerError, ValidationError,
};
pub use traits::{BalanceStore, KeyResolver, OperationClient};
pub use types::{
    BalanceFetchRequest, BalanceKey, BalanceRecord, BatchOutcome, FailedItem, ItemOutcome,
    OperationResult, SkippedItem, TransferSpec, UpsertSummary, WorkItem,
};
