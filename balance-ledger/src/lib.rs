//! Balance Ledger
//!
//! Per-user balances adjusted by signed transactions from external sources
//! (games, servers, payment systems).
//!
//! # Architecture
//!
//! - **Connection supervisor**: opens the PostgreSQL pool with bounded exponential backoff
//! - **Ledger engine**: validates input and applies each transaction as one database transaction
//! - **HTTP transport**: actix-web routes mapping error kinds to status codes
//!
//! # Invariants
//!
//! - Non-negative balances: a debit that would go below zero is rejected whole
//! - At-most-once: a transaction ID commits at most one balance mutation
//! - Atomicity: balance update and transaction record commit together or not at all
//! - Per-user linearizability via the account row lock

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms, clippy::all)]

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod store;
pub mod supervisor;
pub mod types;

// Re-exports
pub use config::Config;
pub use engine::LedgerEngine;
pub use error::{ErrorKind, LedgerError, Result};
pub use store::{BalanceStore, PgStore};
pub use types::{
    AppliedTransaction, BalanceChange, Direction, NewTransaction, TransactionInput, UserId,
};
