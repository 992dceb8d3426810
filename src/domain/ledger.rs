//! Ledger rows: append-only transactions, trading logs, and the event
//! processing (dedup) ledger.

use super::{Decimal, Direction, Id, LogSource, TimeMs};
use serde::{Deserialize, Serialize};

/// Append-only balance-mutation record.
///
/// `closing_balance` is the owning sub-account's balance immediately after
/// this mutation. Never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Id,
    pub user_id: Id,
    pub exchange_id: Id,
    pub sub_account_id: Id,
    pub time_ms: TimeMs,
    pub direction: Direction,
    /// Free-form tag, e.g. `deposit`, `long`, `cleanup`.
    pub reason: String,
    /// Always positive; the sign comes from `direction`.
    pub amount: Decimal,
    pub closing_balance: Decimal,
    pub info: serde_json::Value,
    pub created_at: TimeMs,
}

/// Semantic event record. Manual logs may be soft-deleted by the owner; bot
/// logs are immutable from the API's perspective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingLog {
    pub id: Id,
    pub user_id: Id,
    pub exchange_id: Id,
    pub sub_account_id: Option<Id>,
    pub transaction_id: Option<Id>,
    /// Server-assigned insertion time.
    pub time_ms: TimeMs,
    /// Logical time; may be historical for backtesting.
    pub event_time_ms: Option<TimeMs>,
    /// Open set: `long`, `short`, `stop_loss`, `deposit`, `withdraw`, …
    pub log_type: String,
    pub source: LogSource,
    pub message: String,
    pub info: serde_json::Value,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

/// Outcome recorded in the event processing ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// Dedup ledger row. Presence of a row for an `event_id` means "already
/// handled; skip", regardless of status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventProcessing {
    pub event_id: String,
    pub event_type: String,
    pub user_id: Option<Id>,
    pub sub_account_id: Option<Id>,
    pub status: EventStatus,
    pub processed_at: TimeMs,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_event_status_roundtrip() {
        for s in [EventStatus::Processed, EventStatus::Failed] {
            assert_eq!(EventStatus::from_str(s.as_str()).unwrap(), s);
        }
        assert!(EventStatus::from_str("parked").is_err());
    }
}
