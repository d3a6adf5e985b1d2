//! Blockchain RPC adapters.

pub mod rpc;

pub use rpc::{RpcClientConfig, RpcOperationClient};
