//! Domain types: primitives, the lossless Decimal wrapper, ledger entities,
//! and the bus event payloads.

pub mod decimal;
pub mod events;
pub mod exchange;
pub mod ledger;
pub mod primitives;
pub mod user;

pub use decimal::Decimal;
pub use events::{
    subjects, BalanceEvent, ErrorEvent, EventMeta, HeartbeatEvent, OrderEvent, SignalEvent,
};
pub use exchange::{Exchange, SubAccount};
pub use ledger::{EventProcessing, EventStatus, TradingLog, Transaction};
pub use primitives::{Direction, Id, LogSource, TimeMs};
pub use user::{OAuthToken, User};
