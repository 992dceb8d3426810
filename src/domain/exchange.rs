//! Exchange credentials and the per-asset sub-accounts they own.

use super::{Decimal, Id, TimeMs};
use serde::{Deserialize, Serialize};

/// A set of venue API credentials owned by one user.
///
/// `(user_id, name)`, `(user_id, api_key)` and `(user_id, api_secret)` are
/// unique among non-deleted rows (partial unique indexes in schema.sql).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: Id,
    pub user_id: Id,
    pub name: String,
    /// Venue tag, e.g. `binance`, `kraken`. Open set.
    pub venue: String,
    pub api_key: String,
    pub api_secret: String,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

impl Exchange {
    pub fn new(user_id: Id, name: String, venue: String, api_key: String, api_secret: String) -> Self {
        let now = TimeMs::now();
        Exchange {
            id: Id::generate(),
            user_id,
            name,
            venue,
            api_key,
            api_secret,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

/// A single-asset balance ledger scoped to one exchange and one user.
///
/// `balance` is mutated only by the balance engine inside a database
/// transaction; deletion requires a zero balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAccount {
    pub id: Id,
    pub user_id: Id,
    pub exchange_id: Id,
    pub name: String,
    /// Asset code, e.g. `USDT`, `ETH`.
    pub symbol: String,
    pub balance: Decimal,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
    pub deleted_at: Option<TimeMs>,
}

impl SubAccount {
    pub fn new(user_id: Id, exchange_id: Id, name: String, symbol: String) -> Self {
        let now = TimeMs::now();
        SubAccount {
            id: Id::generate(),
            user_id,
            exchange_id,
            name,
            symbol,
            balance: Decimal::zero(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sub_account_starts_at_zero() {
        let acct = SubAccount::new(
            Id::generate(),
            Id::generate(),
            "main-usdt".into(),
            "USDT".into(),
        );
        assert!(acct.balance.is_zero());
        assert!(acct.deleted_at.is_none());
    }
}
