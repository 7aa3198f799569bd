//! Ledger engine
//!
//! Stateless front for the balance store: validates caller input, bounds
//! every storage call by the caller's deadline and logs the outcome. When a
//! deadline fires, the in-flight store future is dropped, which rolls back
//! any open database transaction.
//!
//! # Example
//!
//! ```no_run
//! use balance_ledger::{LedgerEngine, PgStore, TransactionInput};
//! use std::sync::Arc;
//! use tokio::time::{Duration, Instant};
//!
//! # async fn demo(pool: sqlx::PgPool) -> balance_ledger::Result<()> {
//! let engine = LedgerEngine::new(Arc::new(PgStore::new(pool)), 2);
//! let input = TransactionInput {
//!     transaction_id: "3f1c9a52-6d1e-4c4b-9b7e-2d0f5a8c1e21".to_string(),
//!     direction: "win".to_string(),
//!     source_type: "game".to_string(),
//!     amount: "50.00".to_string(),
//! };
//! let deadline = Instant::now() + Duration::from_secs(5);
//! let applied = engine.apply_transaction(1, &input, deadline).await?;
//! println!("{} -> {}", applied.old_balance, applied.new_balance);
//! # Ok(())
//! # }
//! ```

use crate::error::{ErrorKind, LedgerError, Result};
use crate::store::BalanceStore;
use crate::types::{AppliedTransaction, TransactionInput, UserId};
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Span};

#[derive(Clone)]
pub struct LedgerEngine {
    store: Arc<dyn BalanceStore>,
    decimal_places: u32,
    span: Span,
}

impl LedgerEngine {
    pub fn new(store: Arc<dyn BalanceStore>, decimal_places: u32) -> Self {
        Self {
            store,
            decimal_places,
            span: Span::current(),
        }
    }

    /// Span under which the engine records its events
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn decimal_places(&self) -> u32 {
        self.decimal_places
    }

    /// Current balance of `user_id`
    pub async fn get_balance(&self, user_id: UserId, deadline: Instant) -> Result<Decimal> {
        match within(deadline, self.store.balance(user_id)).await {
            Ok(balance) => {
                info!(parent: &self.span, user_id, balance = %balance, "Fetched user balance");
                Ok(balance)
            }
            Err(e) => {
                self.log_rejection(user_id, None, &e);
                Err(e)
            }
        }
    }

    /// Validate and apply one transaction.
    ///
    /// Nothing reaches storage unless every input field is well formed.
    pub async fn apply_transaction(
        &self,
        user_id: UserId,
        input: &TransactionInput,
        deadline: Instant,
    ) -> Result<AppliedTransaction> {
        let tx = match input.validate(user_id, self.decimal_places) {
            Ok(tx) => tx,
            Err(e) => {
                self.log_rejection(user_id, Some(&input.transaction_id), &e);
                return Err(e);
            }
        };

        match within(deadline, self.store.apply(tx.clone())).await {
            Ok(change) => {
                debug!(
                    parent: &self.span,
                    user_id,
                    transaction_id = %tx.id,
                    direction = %tx.direction,
                    amount = %tx.amount,
                    old_balance = %change.old_balance,
                    new_balance = %change.new_balance,
                    "Transaction processed successfully"
                );
                Ok(AppliedTransaction::new(tx, change))
            }
            Err(e) => {
                self.log_rejection(user_id, Some(&input.transaction_id), &e);
                Err(e)
            }
        }
    }

    /// Readiness probe
    pub async fn ping(&self, deadline: Instant) -> Result<()> {
        within(deadline, self.store.ping()).await
    }

    fn log_rejection(&self, user_id: UserId, transaction_id: Option<&str>, err: &LedgerError) {
        let transaction_id = transaction_id.unwrap_or("-");
        match err.kind() {
            ErrorKind::DuplicateTransaction => {
                info!(parent: &self.span, user_id, transaction_id, "Transaction already processed")
            }
            ErrorKind::InsufficientBalance => {
                debug!(parent: &self.span, user_id, transaction_id, error = %err, "Insufficient balance for transaction")
            }
            _ if err.is_client_fault() => {
                warn!(parent: &self.span, user_id, transaction_id, error = %err, "Request rejected")
            }
            _ => {
                error!(parent: &self.span, user_id, transaction_id, error = %err, "Storage operation failed")
            }
        }
    }
}

/// Run `operation` until `deadline`; the operation is dropped if it runs over.
async fn within<T, F>(deadline: Instant, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let budget = deadline.saturating_duration_since(Instant::now());
    match tokio::time::timeout_at(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::DeadlineExceeded(budget)),
    }
}
