//! Transaction and trading-log operations.
//!
//! Transactions are append-only: there is deliberately no update or delete
//! here. Replay order within a sub-account is `(time_ms, rowid)`.

use crate::domain::{Decimal, Direction, Id, LogSource, TimeMs, TradingLog, Transaction};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

/// Pagination window; page numbers start at 1, page size capped at 100.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: i64,
    pub page_size: i64,
}

impl Page {
    pub fn new(page: Option<i64>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let page_size = page_size.unwrap_or(50).clamp(1, 100);
        Page { page, page_size }
    }

    pub fn offset(&self) -> i64 {
        // page comes straight from the query string, so stay saturating
        self.page.saturating_sub(1).saturating_mul(self.page_size)
    }
}

/// Optional filters for trading-log listings.
#[derive(Debug, Clone, Default)]
pub struct TradingLogFilter {
    pub log_type: Option<String>,
    pub source: Option<LogSource>,
    pub from_ms: Option<TimeMs>,
    pub to_ms: Option<TimeMs>,
}

impl Repository {
    // =========================================================================
    // Transaction operations
    // =========================================================================

    /// Append a transaction row inside an open database transaction. Only the
    /// balance engine calls this.
    pub(crate) async fn insert_transaction_in(
        conn: &mut SqliteConnection,
        txn: &Transaction,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO transactions
                (id, user_id, exchange_id, sub_account_id, time_ms, direction,
                 reason, amount, closing_balance, info, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(txn.id.as_str())
        .bind(txn.user_id.as_str())
        .bind(txn.exchange_id.as_str())
        .bind(txn.sub_account_id.as_str())
        .bind(txn.time_ms.as_i64())
        .bind(txn.direction.as_str())
        .bind(&txn.reason)
        .bind(txn.amount.to_canonical_string())
        .bind(txn.closing_balance.to_canonical_string())
        .bind(txn.info.to_string())
        .bind(txn.created_at.as_i64())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// List a sub-account's transactions in replay order, paginated.
    pub async fn list_transactions(
        &self,
        sub_account_id: &Id,
        page: Page,
    ) -> Result<Vec<Transaction>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, exchange_id, sub_account_id, time_ms, direction,
                   reason, amount, closing_balance, info, created_at
            FROM transactions
            WHERE sub_account_id = ?
            ORDER BY time_ms ASC, rowid ASC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(sub_account_id.as_str())
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_transaction).collect())
    }

    /// Total number of transactions for a sub-account.
    pub async fn count_transactions(&self, sub_account_id: &Id) -> Result<i64, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM transactions WHERE sub_account_id = ?")
                .bind(sub_account_id.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    // =========================================================================
    // Trading-log operations
    // =========================================================================

    /// Insert a trading-log row inside an open database transaction.
    pub(crate) async fn insert_trading_log_in(
        conn: &mut SqliteConnection,
        log: &TradingLog,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO trading_logs
                (id, user_id, exchange_id, sub_account_id, transaction_id, time_ms,
                 event_time_ms, log_type, source, message, info, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(log.id.as_str())
        .bind(log.user_id.as_str())
        .bind(log.exchange_id.as_str())
        .bind(log.sub_account_id.as_ref().map(|i| i.as_str()))
        .bind(log.transaction_id.as_ref().map(|i| i.as_str()))
        .bind(log.time_ms.as_i64())
        .bind(log.event_time_ms.map(|t| t.as_i64()))
        .bind(&log.log_type)
        .bind(log.source.as_str())
        .bind(&log.message)
        .bind(log.info.to_string())
        .bind(log.created_at.as_i64())
        .bind(log.updated_at.as_i64())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Insert a trading-log row using its own connection.
    pub async fn insert_trading_log(&self, log: &TradingLog) -> Result<(), sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::insert_trading_log_in(&mut conn, log).await
    }

    /// Fetch a live trading log by id.
    pub async fn get_trading_log(&self, id: &Id) -> Result<Option<TradingLog>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, exchange_id, sub_account_id, transaction_id, time_ms,
                   event_time_ms, log_type, source, message, info, created_at, updated_at, deleted_at
            FROM trading_logs
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_trading_log))
    }

    /// List a user's live trading logs, newest first, with optional filters.
    pub async fn list_trading_logs(
        &self,
        user_id: &Id,
        filter: &TradingLogFilter,
        page: Page,
    ) -> Result<Vec<TradingLog>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, exchange_id, sub_account_id, transaction_id, time_ms,
                   event_time_ms, log_type, source, message, info, created_at, updated_at, deleted_at
            FROM trading_logs
            WHERE user_id = ? AND deleted_at IS NULL
              AND (? IS NULL OR log_type = ?)
              AND (? IS NULL OR source = ?)
              AND time_ms >= ? AND time_ms <= ?
            ORDER BY time_ms DESC, rowid DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(filter.log_type.as_deref())
        .bind(filter.log_type.as_deref())
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.from_ms.unwrap_or(TimeMs::new(0)).as_i64())
        .bind(filter.to_ms.unwrap_or(TimeMs::new(i64::MAX)).as_i64())
        .bind(page.page_size)
        .bind(page.offset())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_trading_log).collect())
    }

    /// Total live trading logs matching the filter.
    pub async fn count_trading_logs(
        &self,
        user_id: &Id,
        filter: &TradingLogFilter,
    ) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM trading_logs
            WHERE user_id = ? AND deleted_at IS NULL
              AND (? IS NULL OR log_type = ?)
              AND (? IS NULL OR source = ?)
              AND time_ms >= ? AND time_ms <= ?
            "#,
        )
        .bind(user_id.as_str())
        .bind(filter.log_type.as_deref())
        .bind(filter.log_type.as_deref())
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.source.map(|s| s.as_str()))
        .bind(filter.from_ms.unwrap_or(TimeMs::new(0)).as_i64())
        .bind(filter.to_ms.unwrap_or(TimeMs::new(i64::MAX)).as_i64())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Soft-delete a trading log. Callers enforce the `source = manual` rule.
    pub async fn soft_delete_trading_log(&self, id: &Id, now: TimeMs) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE trading_logs SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now.as_i64())
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

}

fn map_transaction(row: &SqliteRow) -> Transaction {
    let id: String = row.get("id");
    let direction_str: String = row.get("direction");
    let direction = Direction::from_str(&direction_str).unwrap_or_else(|e| {
        warn!(transaction_id = %id, error = %e, "Unknown transaction direction, defaulting to credit");
        Direction::Credit
    });

    Transaction {
        id: Id::new(id.clone()),
        user_id: Id::new(row.get("user_id")),
        exchange_id: Id::new(row.get("exchange_id")),
        sub_account_id: Id::new(row.get("sub_account_id")),
        time_ms: TimeMs::new(row.get("time_ms")),
        direction,
        reason: row.get("reason"),
        amount: parse_decimal(row, "amount", &id),
        closing_balance: parse_decimal(row, "closing_balance", &id),
        info: parse_info(row, &id),
        created_at: TimeMs::new(row.get("created_at")),
    }
}

fn map_trading_log(row: &SqliteRow) -> TradingLog {
    let id: String = row.get("id");
    let source_str: String = row.get("source");
    let source = LogSource::from_str(&source_str).unwrap_or_else(|e| {
        warn!(trading_log_id = %id, error = %e, "Unknown log source, defaulting to manual");
        LogSource::Manual
    });

    TradingLog {
        id: Id::new(id.clone()),
        user_id: Id::new(row.get("user_id")),
        exchange_id: Id::new(row.get("exchange_id")),
        sub_account_id: row.get::<Option<String>, _>("sub_account_id").map(Id::new),
        transaction_id: row.get::<Option<String>, _>("transaction_id").map(Id::new),
        time_ms: TimeMs::new(row.get("time_ms")),
        event_time_ms: row.get::<Option<i64>, _>("event_time_ms").map(TimeMs::new),
        log_type: row.get("log_type"),
        source,
        message: row.get("message"),
        info: parse_info(row, &id),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
        deleted_at: row.get::<Option<i64>, _>("deleted_at").map(TimeMs::new),
    }
}

fn parse_decimal(row: &SqliteRow, column: &str, id: &str) -> Decimal {
    let s: String = row.get(column);
    Decimal::from_str(&s).unwrap_or_else(|e| {
        warn!(row_id = %id, column = %column, value = %s, error = %e, "Failed to parse decimal, using zero");
        Decimal::zero()
    })
}

fn parse_info(row: &SqliteRow, id: &str) -> serde_json::Value {
    let s: String = row.get("info");
    serde_json::from_str(&s).unwrap_or_else(|e| {
        warn!(row_id = %id, error = %e, "Failed to parse info JSON, using empty object");
        serde_json::json!({})
    })
}
