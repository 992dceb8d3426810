//! Ledger engine: the balance mutation primitive and the trading-log
//! processor that dispatches typed log entries onto it.

pub mod balance;
pub mod processor;

pub use balance::update_balance;
pub use processor::{ProcessOutcome, Processor, TradingLogRequest};

use thiserror::Error;

/// Errors raised by the balance engine and trading-log processor.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// A debit would take the balance below zero (and the reason does not
    /// allow it).
    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),
    /// The caller does not own the referenced resource.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// The request shape or account pairing is invalid for its type.
    #[error("invalid trading log: {0}")]
    InvalidTradingLog(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

impl LedgerError {
    /// Business rejections are terminal: for bus events they are recorded and
    /// acked instead of retried.
    pub fn is_business_rejection(&self) -> bool {
        !matches!(self, LedgerError::Db(_))
    }
}
