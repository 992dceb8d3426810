//! Bus event payloads and subject constants (the wire contract).
//!
//! Every payload carries a globally-unique `event_id`; the consumer side uses
//! it for the authoritative dedup in the event processing ledger.

use super::{Decimal, Direction};
use serde::{Deserialize, Serialize};

/// Subject patterns the streams bind to.
pub mod subjects {
    pub const ORDERS_WILDCARD: &str = "trading.orders.*";
    pub const BALANCE_WILDCARD: &str = "trading.balance.*";
    pub const SIGNALS: &str = "trading.signals";
    pub const ERRORS: &str = "trading.errors";
    pub const SYSTEM_WILDCARD: &str = "system.*";
    pub const HEARTBEAT: &str = "system.heartbeat";

    /// Subject for an order lifecycle action (`created`, `filled`,
    /// `cancelled`, `failed`).
    pub fn order(action: &str) -> String {
        format!("trading.orders.{}", action)
    }

    /// Subject for a balance change on the given asset symbol.
    pub fn balance(symbol: &str) -> String {
        format!("trading.balance.{}", symbol.to_lowercase())
    }
}

/// Fields shared by every event class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMeta {
    pub event_id: String,
    pub event_type: String,
    pub user_id: String,
    pub exchange_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_account_id: Option<String>,
    /// Milliseconds since Unix epoch.
    pub timestamp: i64,
}

/// Order lifecycle notification. No balance effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub order_id: String,
    pub symbol: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Balance mutation reported by a bot; drives the balance engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub symbol: String,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub amount: Decimal,
    pub direction: Direction,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related_order_id: Option<String>,
}

/// Error raised by a bot or integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub error_code: String,
    pub severity: String,
    pub component: String,
    pub error_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Trading signal emitted by a strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub signal_type: String,
    pub symbol: String,
    pub confidence: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<Decimal>,
    pub strategy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Liveness ping from a component. Recorded in the event ledger only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatEvent {
    #[serde(flatten)]
    pub meta: EventMeta,
    pub component: String,
    pub status: String,
}
