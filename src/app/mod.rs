//! Application layer: batch machinery and the services built on it.

pub mod balance_sync;
pub mod batch;
pub mod transfers;
pub mod upsert;

pub use balance_sync::{BalanceSyncPool, BalanceSyncService, SubmitError, SyncPoolConfig};
pub use batch::{BatchLimits, BatchLimitsPatch, CancelHandle, Cancellation};
pub use transfers::{DispatchOptions, TransferBatchService};
pub use upsert::{BalanceUpsertEngine, DEFAULT_CHUNK_SIZE};
