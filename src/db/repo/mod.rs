//! Repository layer for database operations.
//!
//! Methods are organized across submodules by domain:
//! - `users.rs` - users and OAuth token rows
//! - `exchanges.rs` - exchanges and sub-accounts (soft-delete aware)
//! - `ledger.rs` - append-only transactions and trading logs
//! - `events.rs` - event processing (dedup) ledger
//!
//! Reads filter `deleted_at IS NULL`; the partial unique indexes in
//! schema.sql enforce uniqueness with the same predicate. Mutations that must
//! be atomic with balance updates are exposed as associated functions taking
//! an open `SqliteConnection` so the engine can thread one transaction
//! through them.

mod events;
mod exchanges;
mod ledger;
mod users;

pub use exchanges::ExchangeConflict;
pub use ledger::{Page, TradingLogFilter};

use sqlx::sqlite::SqlitePool;

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// The underlying pool, for callers that open their own transactions.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
