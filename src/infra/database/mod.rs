//! Relational store adapters.

pub mod postgres;

pub use postgres::{PostgresBalanceStore, PostgresConfig};
