//! Event processing (dedup) ledger operations.
//!
//! Presence of a row for an `event_id` means the event has been handled and a
//! redelivery must become a no-op. The primary key on `event_id` is the
//! database-enforced backstop for idempotency.

use crate::domain::{EventProcessing, EventStatus, Id, TimeMs};
use sqlx::sqlite::SqliteConnection;
use sqlx::Row;
use std::str::FromStr;
use tracing::warn;

use super::Repository;

impl Repository {
    /// Has this event id been handled already?
    pub async fn event_processed(&self, event_id: &str) -> Result<bool, sqlx::Error> {
        let row: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM event_processing WHERE event_id = ?")
                .bind(event_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0 > 0)
    }

    /// Record an event as handled, inside an open database transaction so the
    /// marker commits atomically with the event's effect.
    pub(crate) async fn insert_event_processing_in(
        conn: &mut SqliteConnection,
        record: &EventProcessing,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO event_processing
                (event_id, event_type, user_id, sub_account_id, status, processed_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.user_id.as_ref().map(|i| i.as_str()))
        .bind(record.sub_account_id.as_ref().map(|i| i.as_str()))
        .bind(record.status.as_str())
        .bind(record.processed_at.as_i64())
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Fetch the ledger row for an event id.
    pub async fn get_event_processing(
        &self,
        event_id: &str,
    ) -> Result<Option<EventProcessing>, sqlx::Error> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_type, user_id, sub_account_id, status, processed_at
            FROM event_processing
            WHERE event_id = ?
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            let status_str: String = r.get("status");
            let status = EventStatus::from_str(&status_str).unwrap_or_else(|e| {
                warn!(event_id = %event_id, error = %e, "Unknown event status, defaulting to processed");
                EventStatus::Processed
            });
            EventProcessing {
                event_id: r.get("event_id"),
                event_type: r.get("event_type"),
                user_id: r.get::<Option<String>, _>("user_id").map(Id::new),
                sub_account_id: r.get::<Option<String>, _>("sub_account_id").map(Id::new),
                status,
                processed_at: TimeMs::new(r.get("processed_at")),
            }
        }))
    }
}
