//! Infrastructure layer implementations.

pub mod blockchain;
pub mod database;
pub mod keys;

pub use blockchain::{RpcClientConfig, RpcOperationClient};
pub use database::{PostgresBalanceStore, PostgresConfig};
pub use keys::{InMemoryKeyStore, keypair_from_base58};
