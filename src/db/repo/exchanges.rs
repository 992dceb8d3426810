//! Exchange and sub-account operations.
//!
//! Every read filters `deleted_at IS NULL`; soft-deleting sets the timestamp
//! so the partial unique indexes free the natural key for reuse.

use crate::domain::{Decimal, Exchange, Id, SubAccount, TimeMs};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

/// Which uniqueness invariant a prospective exchange row would violate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeConflict {
    Name,
    ApiKey,
    ApiSecret,
}

impl ExchangeConflict {
    /// The stable API error code for this conflict.
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeConflict::Name => "EXCHANGE_NAME_EXISTS",
            ExchangeConflict::ApiKey => "API_KEY_EXISTS",
            ExchangeConflict::ApiSecret => "API_SECRET_EXISTS",
        }
    }
}

impl Repository {
    // =========================================================================
    // Exchange operations
    // =========================================================================

    /// Insert an exchange row.
    ///
    /// Callers should run [`Repository::find_exchange_conflict`] first for a
    /// typed error; the partial unique indexes remain the backstop.
    pub async fn create_exchange(&self, exchange: &Exchange) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO exchanges
                (id, user_id, name, venue, api_key, api_secret, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(exchange.id.as_str())
        .bind(exchange.user_id.as_str())
        .bind(&exchange.name)
        .bind(&exchange.venue)
        .bind(&exchange.api_key)
        .bind(&exchange.api_secret)
        .bind(exchange.created_at.as_i64())
        .bind(exchange.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a live exchange by id.
    pub async fn get_exchange(&self, id: &Id) -> Result<Option<Exchange>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, name, venue, api_key, api_secret, created_at, updated_at, deleted_at
            FROM exchanges
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(map_exchange))
    }

    /// List a user's live exchanges, newest first.
    pub async fn list_exchanges(&self, user_id: &Id) -> Result<Vec<Exchange>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, name, venue, api_key, api_secret, created_at, updated_at, deleted_at
            FROM exchanges
            WHERE user_id = ? AND deleted_at IS NULL
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_exchange).collect())
    }

    /// Check whether a prospective `(name, api_key, api_secret)` tuple would
    /// collide with another live exchange of the same user.
    ///
    /// `exclude_id` skips the row being updated.
    pub async fn find_exchange_conflict(
        &self,
        user_id: &Id,
        name: &str,
        api_key: &str,
        api_secret: &str,
        exclude_id: Option<&Id>,
    ) -> Result<Option<ExchangeConflict>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, api_key, api_secret
            FROM exchanges
            WHERE user_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(user_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let id: String = row.get("id");
            if exclude_id.map(|e| e.as_str() == id).unwrap_or(false) {
                continue;
            }
            if row.get::<String, _>("name") == name {
                return Ok(Some(ExchangeConflict::Name));
            }
            if row.get::<String, _>("api_key") == api_key {
                return Ok(Some(ExchangeConflict::ApiKey));
            }
            if row.get::<String, _>("api_secret") == api_secret {
                return Ok(Some(ExchangeConflict::ApiSecret));
            }
        }

        Ok(None)
    }

    /// Rename a live exchange. Name is the only updatable attribute.
    pub async fn rename_exchange(
        &self,
        id: &Id,
        name: &str,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE exchanges SET name = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(name)
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete an exchange. Callers must first verify it has no live
    /// sub-accounts.
    pub async fn soft_delete_exchange(&self, id: &Id, now: TimeMs) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE exchanges SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now.as_i64())
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count live sub-accounts under an exchange.
    pub async fn count_live_sub_accounts(&self, exchange_id: &Id) -> Result<i64, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sub_accounts WHERE exchange_id = ? AND deleted_at IS NULL",
        )
        .bind(exchange_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    // =========================================================================
    // Sub-account operations
    // =========================================================================

    /// Insert a sub-account row.
    pub async fn create_sub_account(&self, account: &SubAccount) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sub_accounts
                (id, user_id, exchange_id, name, symbol, balance, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(account.id.as_str())
        .bind(account.user_id.as_str())
        .bind(account.exchange_id.as_str())
        .bind(&account.name)
        .bind(&account.symbol)
        .bind(account.balance.to_canonical_string())
        .bind(account.created_at.as_i64())
        .bind(account.updated_at.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fetch a live sub-account by id.
    pub async fn get_sub_account(&self, id: &Id) -> Result<Option<SubAccount>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;
        Self::sub_account_in(&mut conn, id).await
    }

    /// Fetch a live sub-account inside an open transaction.
    pub async fn sub_account_in(
        conn: &mut SqliteConnection,
        id: &Id,
    ) -> Result<Option<SubAccount>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, exchange_id, name, symbol, balance, created_at, updated_at, deleted_at
            FROM sub_accounts
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(conn)
        .await?;

        Ok(row.as_ref().map(map_sub_account))
    }

    /// List an exchange's live sub-accounts.
    pub async fn list_sub_accounts(&self, exchange_id: &Id) -> Result<Vec<SubAccount>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, exchange_id, name, symbol, balance, created_at, updated_at, deleted_at
            FROM sub_accounts
            WHERE exchange_id = ? AND deleted_at IS NULL
            ORDER BY created_at DESC, id ASC
            "#,
        )
        .bind(exchange_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(map_sub_account).collect())
    }

    /// Does another live sub-account of this exchange already use `name`?
    pub async fn sub_account_name_exists(
        &self,
        exchange_id: &Id,
        name: &str,
        exclude_id: Option<&Id>,
    ) -> Result<bool, sqlx::Error> {
        let row: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM sub_accounts
            WHERE exchange_id = ? AND name = ? AND deleted_at IS NULL
              AND id != ?
            "#,
        )
        .bind(exchange_id.as_str())
        .bind(name)
        .bind(exclude_id.map(|i| i.as_str()).unwrap_or(""))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0 > 0)
    }

    /// Rename a live sub-account.
    pub async fn rename_sub_account(
        &self,
        id: &Id,
        name: &str,
        now: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sub_accounts SET name = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(name)
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Soft-delete a sub-account. Callers must first verify the balance is 0.
    pub async fn soft_delete_sub_account(&self, id: &Id, now: TimeMs) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE sub_accounts SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(now.as_i64())
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Write a new balance inside an open transaction. Only the balance
    /// engine calls this.
    pub(crate) async fn set_sub_account_balance_in(
        conn: &mut SqliteConnection,
        id: &Id,
        balance: Decimal,
        now: TimeMs,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE sub_accounts SET balance = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(balance.to_canonical_string())
        .bind(now.as_i64())
        .bind(id.as_str())
        .execute(conn)
        .await?;

        Ok(())
    }
}

fn map_exchange(row: &SqliteRow) -> Exchange {
    Exchange {
        id: Id::new(row.get("id")),
        user_id: Id::new(row.get("user_id")),
        name: row.get("name"),
        venue: row.get("venue"),
        api_key: row.get("api_key"),
        api_secret: row.get("api_secret"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
        deleted_at: row.get::<Option<i64>, _>("deleted_at").map(TimeMs::new),
    }
}

pub(crate) fn map_sub_account(row: &SqliteRow) -> SubAccount {
    let id: String = row.get("id");
    let balance_str: String = row.get("balance");
    let balance = Decimal::from_str(&balance_str).unwrap_or_else(|e| {
        warn!(sub_account_id = %id, balance = %balance_str, error = %e, "Failed to parse balance decimal, using zero");
        Decimal::zero()
    });

    SubAccount {
        id: Id::new(id),
        user_id: Id::new(row.get("user_id")),
        exchange_id: Id::new(row.get("exchange_id")),
        name: row.get("name"),
        symbol: row.get("symbol"),
        balance,
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
        deleted_at: row.get::<Option<i64>, _>("deleted_at").map(TimeMs::new),
    }
}
