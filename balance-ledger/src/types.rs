//! Core domain types for the balance ledger

use crate::error::{LedgerError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Account identifier
pub type UserId = u64;

/// Fractional digits kept by the `NUMERIC(20, 2)` balance and amount columns
pub const STORED_SCALE: u32 = 2;

/// Exclusive upper bound of the `NUMERIC(20, 2)` columns: 10^18
pub fn storage_limit() -> Decimal {
    Decimal::from(1_000_000_000_000_000_000i64)
}

/// Direction of a balance adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Credit: the amount is added to the balance
    Win,
    /// Debit: the amount is subtracted from the balance
    Lose,
}

impl Direction {
    /// Wire and storage representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Win => "win",
            Direction::Lose => "lose",
        }
    }

    /// Candidate balance after applying `amount` in this direction.
    ///
    /// Fails with `InsufficientBalance` when a debit would go below zero, and
    /// with `InvalidArgument` when a credit would leave the storable range.
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> Result<Decimal> {
        let candidate = match self {
            Direction::Win => balance.checked_add(amount),
            Direction::Lose => balance.checked_sub(amount),
        }
        .filter(|candidate| *candidate < storage_limit())
        .ok_or_else(|| {
            LedgerError::invalid(format!(
                "balance {} plus {} exceeds the storable range",
                balance, amount
            ))
        })?;

        if candidate < Decimal::ZERO {
            return Err(LedgerError::InsufficientBalance {
                balance,
                requested: amount,
            });
        }

        Ok(candidate)
    }
}

impl FromStr for Direction {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "win" => Ok(Direction::Win),
            "lose" => Ok(Direction::Lose),
            other => Err(LedgerError::invalid(format!(
                "direction must be 'win' or 'lose', got '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated transaction fields as received from a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInput {
    pub transaction_id: String,
    pub direction: String,
    pub source_type: String,
    pub amount: String,
}

impl TransactionInput {
    /// Validate every field, producing a transaction ready to apply.
    ///
    /// `decimal_places` bounds the fractional digits accepted in `amount`.
    pub fn validate(&self, user_id: UserId, decimal_places: u32) -> Result<NewTransaction> {
        let id = Uuid::parse_str(&self.transaction_id).map_err(|e| {
            LedgerError::invalid(format!(
                "transactionId '{}' is not a valid UUID: {}",
                self.transaction_id, e
            ))
        })?;

        let direction = self.direction.parse::<Direction>()?;
        let amount = parse_amount(&self.amount, decimal_places)?;

        let source_type = self.source_type.trim();
        if source_type.is_empty() {
            return Err(LedgerError::invalid("source type must not be empty"));
        }

        Ok(NewTransaction {
            id,
            user_id,
            direction,
            source_type: source_type.to_string(),
            amount,
        })
    }
}

/// Parse a non-negative decimal amount with at most `decimal_places` fractional digits
pub fn parse_amount(raw: &str, decimal_places: u32) -> Result<Decimal> {
    if raw.contains('_') {
        return Err(LedgerError::invalid(format!(
            "amount '{}' must not contain digit separators",
            raw
        )));
    }

    let amount = Decimal::from_str(raw)
        .map_err(|e| LedgerError::invalid(format!("amount '{}' is not a decimal: {}", raw, e)))?;

    if amount < Decimal::ZERO {
        return Err(LedgerError::invalid(format!(
            "amount must not be negative, got {}",
            raw
        )));
    }

    let amount = amount.normalize();
    if amount.scale() > decimal_places {
        return Err(LedgerError::invalid(format!(
            "amount {} has more than {} decimal places",
            raw, decimal_places
        )));
    }

    if amount >= storage_limit() {
        return Err(LedgerError::invalid(format!(
            "amount {} exceeds the storable range",
            raw
        )));
    }

    Ok(amount.abs())
}

/// A validated transaction, ready for the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    /// Caller-supplied idempotency token
    pub id: Uuid,
    pub user_id: UserId,
    pub direction: Direction,
    pub source_type: String,
    pub amount: Decimal,
}

/// Balances on either side of a committed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChange {
    pub old_balance: Decimal,
    pub new_balance: Decimal,
}

/// A committed transaction with the balances around it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransaction {
    pub transaction: NewTransaction,
    pub old_balance: Decimal,
    pub new_balance: Decimal,
}

impl AppliedTransaction {
    pub fn new(transaction: NewTransaction, change: BalanceChange) -> Self {
        Self {
            transaction,
            old_balance: change.old_balance,
            new_balance: change.new_balance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn input(tx: &str, direction: &str, amount: &str) -> TransactionInput {
        TransactionInput {
            transaction_id: tx.to_string(),
            direction: direction.to_string(),
            source_type: "game".to_string(),
            amount: amount.to_string(),
        }
    }

    const TX: &str = "3f1c9a52-6d1e-4c4b-9b7e-2d0f5a8c1e21";

    #[test]
    fn test_direction_parsing_is_exact() {
        assert_eq!("win".parse::<Direction>().unwrap(), Direction::Win);
        assert_eq!("lose".parse::<Direction>().unwrap(), Direction::Lose);

        for bad in ["draw", "WIN", " lose", ""] {
            let err = bad.parse::<Direction>().unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument(_)), "{:?}", bad);
        }
    }

    #[test]
    fn test_win_adds_amount() {
        assert_eq!(Direction::Win.apply(dec!(100.00), dec!(50.00)).unwrap(), dec!(150.00));
    }

    #[test]
    fn test_lose_of_entire_balance_reaches_zero() {
        assert_eq!(Direction::Lose.apply(dec!(150.00), dec!(150.00)).unwrap(), dec!(0.00));
    }

    #[test]
    fn test_lose_past_zero_is_rejected() {
        let err = Direction::Lose.apply(dec!(150.00), dec!(150.01)).unwrap_err();
        match err {
            LedgerError::InsufficientBalance { balance, requested } => {
                assert_eq!(balance, dec!(150.00));
                assert_eq!(requested, dec!(150.01));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_input() {
        let tx = input(TX, "win", "10.15").validate(42, 2).unwrap();
        assert_eq!(tx.id, Uuid::parse_str(TX).unwrap());
        assert_eq!(tx.user_id, 42);
        assert_eq!(tx.direction, Direction::Win);
        assert_eq!(tx.amount, dec!(10.15));
        assert_eq!(tx.source_type, "game");
    }

    #[test]
    fn test_validate_rejects_bad_uuid() {
        let err = input("not-a-uuid", "win", "1").validate(1, 2).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_draw() {
        let err = input(TX, "draw", "1").validate(1, 2).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_rejects_empty_source() {
        let mut bad = input(TX, "lose", "1");
        bad.source_type = "  ".to_string();
        assert!(matches!(bad.validate(1, 2), Err(LedgerError::InvalidArgument(_))));
    }

    #[test]
    fn test_amount_parsing() {
        assert_eq!(parse_amount("0", 2).unwrap(), dec!(0));
        assert_eq!(parse_amount("-0", 2).unwrap(), dec!(0));
        assert_eq!(parse_amount("12.50", 2).unwrap(), dec!(12.5));
        assert_eq!(parse_amount("12.500", 2).unwrap(), dec!(12.5));

        assert!(parse_amount("-1.00", 2).is_err());
        assert!(parse_amount("abc", 2).is_err());
        assert!(parse_amount("", 2).is_err());
        assert!(parse_amount("1.005", 2).is_err());
        assert!(parse_amount("1.005", 3).is_ok());
    }

    #[test]
    fn test_amount_rejects_digit_separators() {
        for raw in ["1_000", "1_000.00", "_5"] {
            let err = parse_amount(raw, 2).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument(_)), "{}", raw);
        }
    }

    #[test]
    fn test_amount_bounded_by_column_range() {
        assert_eq!(
            parse_amount("999999999999999999.99", 2).unwrap(),
            dec!(999999999999999999.99)
        );

        for raw in ["1000000000000000000", "99999999999999999999"] {
            let err = parse_amount(raw, 2).unwrap_err();
            assert!(matches!(err, LedgerError::InvalidArgument(_)), "{}", raw);
        }
    }

    #[test]
    fn test_win_past_column_range_is_invalid() {
        let top = dec!(999999999999999999.99);
        assert_eq!(Direction::Win.apply(top - dec!(1), dec!(1)).unwrap(), top);

        let err = Direction::Win.apply(top, dec!(0.01)).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }
}
