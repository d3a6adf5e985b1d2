//! Test helpers and mock collaborators, available to unit tests and, via
//! the `test-utils` feature, to integration tests and downstream crates.

pub mod mocks;

pub use mocks::{MockBalanceStore, MockKeyResolver, MockOperationClient, test_address};
