//! PostgreSQL-backed balance store
//!
//! All serialization of conflicting writes is delegated to the database:
//! the account row is locked with `SELECT ... FOR UPDATE` for the lifetime of
//! the transaction, and the primary key on `transactions.id` rejects a
//! transaction ID that slipped past the existence check.

use crate::error::{LedgerError, Result};
use crate::supervisor::DbPool;
use crate::types::{BalanceChange, NewTransaction, UserId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Postgres, Transaction};
use tracing::{info_span, warn, Instrument, Span};
use uuid::Uuid;

#[cfg(test)]
use mockall::automock;

/// Postgres SQLSTATE for unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Storage operations the ledger engine runs against.
///
/// Implementations must apply a transaction atomically: either the balance
/// update and the record insert both commit, or neither does.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BalanceStore: Send + Sync {
    /// Current balance of an account
    async fn balance(&self, user_id: UserId) -> Result<Decimal>;

    /// Apply a validated transaction, returning the balances around it
    async fn apply(&self, tx: NewTransaction) -> Result<BalanceChange>;

    /// Round-trip to the backing store
    async fn ping(&self) -> Result<()>;
}

pub struct PgStore {
    pool: DbPool,
    span: Span,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            span: Span::current(),
        }
    }

    /// Parent span for every storage operation
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn apply_in_transaction(&self, tx: NewTransaction) -> Result<BalanceChange> {
        let account_id = account_key(tx.user_id)?;

        let mut db_tx = self.pool.begin().await?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL READ COMMITTED")
            .execute(&mut *db_tx)
            .await?;

        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM transactions WHERE id = $1)")
                .bind(tx.id)
                .fetch_one(&mut *db_tx)
                .await?;

        if exists {
            return abort(db_tx, LedgerError::DuplicateTransaction(tx.id)).await;
        }

        let old_balance: Option<Decimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(account_id)
                .fetch_optional(&mut *db_tx)
                .await?;

        let old_balance = match old_balance {
            Some(balance) => balance,
            None => return abort(db_tx, LedgerError::AccountNotFound(tx.user_id)).await,
        };

        let new_balance = match tx.direction.apply(old_balance, tx.amount) {
            Ok(balance) => balance,
            Err(e) => return abort(db_tx, e).await,
        };

        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(new_balance)
            .bind(account_id)
            .execute(&mut *db_tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO transactions (id, user_id, amount, direction, source_type)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(tx.id)
        .bind(account_id)
        .bind(tx.amount)
        .bind(tx.direction.as_str())
        .bind(tx.source_type.as_str())
        .execute(&mut *db_tx)
        .await
        .map_err(|e| map_write_error(e, tx.id))?;

        db_tx.commit().await.map_err(|e| map_write_error(e, tx.id))?;

        Ok(BalanceChange {
            old_balance,
            new_balance,
        })
    }
}

#[async_trait]
impl BalanceStore for PgStore {
    async fn balance(&self, user_id: UserId) -> Result<Decimal> {
        let span = info_span!(parent: &self.span, "balance", user_id);

        async {
            let account_id = account_key(user_id)?;

            sqlx::query_scalar::<_, Decimal>("SELECT balance FROM accounts WHERE id = $1")
                .bind(account_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or(LedgerError::AccountNotFound(user_id))
        }
        .instrument(span)
        .await
    }

    async fn apply(&self, tx: NewTransaction) -> Result<BalanceChange> {
        let span = info_span!(
            parent: &self.span,
            "apply",
            user_id = tx.user_id,
            transaction_id = %tx.id,
            direction = %tx.direction,
        );

        self.apply_in_transaction(tx).instrument(span).await
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Accounts are keyed by BIGINT; IDs beyond its range cannot exist.
fn account_key(user_id: UserId) -> Result<i64> {
    i64::try_from(user_id).map_err(|_| LedgerError::AccountNotFound(user_id))
}

/// Roll back explicitly, then surface the rejection that caused it.
async fn abort<T>(db_tx: Transaction<'_, Postgres>, err: LedgerError) -> Result<T> {
    if let Err(rollback_err) = db_tx.rollback().await {
        // The connection discards the transaction when it returns to the pool
        warn!(error = %rollback_err, "Explicit rollback failed");
    }
    Err(err)
}

fn map_write_error(err: sqlx::Error, transaction_id: Uuid) -> LedgerError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) {
            return LedgerError::DuplicateTransaction(transaction_id);
        }
    }
    LedgerError::StorageUnavailable(err)
}
