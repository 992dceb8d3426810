//! Per-class event handlers.
//!
//! Every handler runs the same idempotency envelope: check the event ledger,
//! apply the effect and insert the `Processed` marker in one database
//! transaction, and treat a marker hit as a successful no-op. If two
//! deliveries of the same event race past the check, the primary key on the
//! marker fails the second transaction, which surfaces as a transient error;
//! the redelivery then hits the marker and no-ops.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Repository;
use crate::domain::{
    BalanceEvent, ErrorEvent, EventMeta, EventProcessing, EventStatus, HeartbeatEvent, Id,
    LogSource, OrderEvent, SignalEvent, TimeMs, TradingLog,
};
use crate::engine::{balance::update_balance, LedgerError};

pub struct EventHandlers {
    repo: Arc<Repository>,
}

impl EventHandlers {
    pub fn new(repo: Arc<Repository>) -> Self {
        EventHandlers { repo }
    }

    /// Apply a bot-reported balance mutation through the balance engine.
    ///
    /// The event's `new_balance` claim is advisory; the ledger's own balance
    /// plus the signed amount is authoritative.
    pub async fn handle_balance(&self, ev: BalanceEvent) -> Result<(), LedgerError> {
        if self.already_processed(&ev.meta).await? {
            return Ok(());
        }
        let sub_account_id = ev
            .meta
            .sub_account_id
            .clone()
            .map(Id::new)
            .ok_or_else(|| {
                LedgerError::InvalidTradingLog("balance event without sub_account_id".into())
            })?;

        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;

        let (txn, account) = update_balance(
            &mut tx,
            &sub_account_id,
            ev.amount,
            ev.direction,
            &ev.reason,
            serde_json::json!({ "event_id": ev.meta.event_id }),
        )
        .await?;

        if account.balance != ev.new_balance {
            warn!(
                event_id = %ev.meta.event_id,
                sub_account_id = %sub_account_id,
                ledger_balance = %account.balance,
                reported_balance = %ev.new_balance,
                "Ledger balance diverges from bot-reported balance"
            );
        }

        let log = self.bot_log(
            &ev.meta,
            "balance_update",
            format!("{} {} {} ({})", ev.direction, ev.amount, ev.symbol, ev.reason),
            serde_json::json!({
                "event_id": ev.meta.event_id,
                "symbol": ev.symbol,
                "reason": ev.reason,
                "related_order_id": ev.related_order_id,
                "closing_balance": txn.closing_balance.to_canonical_string(),
            }),
            Some(sub_account_id),
            Some(txn.id.clone()),
            now,
        );
        Repository::insert_trading_log_in(&mut tx, &log).await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(&ev.meta, EventStatus::Processed, now))
            .await?;
        tx.commit().await?;

        info!(event_id = %ev.meta.event_id, transaction_id = %txn.id, "Balance event applied");
        Ok(())
    }

    /// Record an order lifecycle notification. No balance effect.
    pub async fn handle_order(&self, ev: OrderEvent) -> Result<(), LedgerError> {
        if self.already_processed(&ev.meta).await? {
            return Ok(());
        }
        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;

        let log = self.bot_log(
            &ev.meta,
            &format!("order_{}", ev.status),
            ev.message.clone().unwrap_or_else(|| {
                format!("{} {} {} {}", ev.side, ev.amount, ev.symbol, ev.status)
            }),
            serde_json::json!({
                "event_id": ev.meta.event_id,
                "order_id": ev.order_id,
                "symbol": ev.symbol,
                "side": ev.side,
                "type": ev.order_type,
                "amount": ev.amount,
                "price": ev.price,
                "status": ev.status,
            }),
            ev.meta.sub_account_id.clone().map(Id::new),
            None,
            now,
        );
        Repository::insert_trading_log_in(&mut tx, &log).await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(&ev.meta, EventStatus::Processed, now))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a bot error report.
    pub async fn handle_error(&self, ev: ErrorEvent) -> Result<(), LedgerError> {
        if self.already_processed(&ev.meta).await? {
            return Ok(());
        }
        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;

        let log = self.bot_log(
            &ev.meta,
            "system_error",
            ev.error_message.clone(),
            serde_json::json!({
                "event_id": ev.meta.event_id,
                "error_code": ev.error_code,
                "severity": ev.severity,
                "component": ev.component,
                "stack_trace": ev.stack_trace,
            }),
            ev.meta.sub_account_id.clone().map(Id::new),
            None,
            now,
        );
        Repository::insert_trading_log_in(&mut tx, &log).await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(&ev.meta, EventStatus::Processed, now))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Record a strategy signal.
    pub async fn handle_signal(&self, ev: SignalEvent) -> Result<(), LedgerError> {
        if self.already_processed(&ev.meta).await? {
            return Ok(());
        }
        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;

        let log = self.bot_log(
            &ev.meta,
            "trading_signal",
            ev.reasoning.clone().unwrap_or_else(|| {
                format!("{} {} ({})", ev.signal_type, ev.symbol, ev.strategy)
            }),
            serde_json::json!({
                "event_id": ev.meta.event_id,
                "signal_type": ev.signal_type,
                "symbol": ev.symbol,
                "confidence": ev.confidence,
                "price": ev.price,
                "strategy": ev.strategy,
            }),
            ev.meta.sub_account_id.clone().map(Id::new),
            None,
            now,
        );
        Repository::insert_trading_log_in(&mut tx, &log).await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(&ev.meta, EventStatus::Processed, now))
            .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Heartbeats only leave a marker in the event ledger.
    pub async fn handle_heartbeat(&self, ev: HeartbeatEvent) -> Result<(), LedgerError> {
        if self.already_processed(&ev.meta).await? {
            return Ok(());
        }
        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(&ev.meta, EventStatus::Processed, now))
            .await?;
        tx.commit().await?;
        debug!(event_id = %ev.meta.event_id, component = %ev.component, status = %ev.status, "Heartbeat recorded");
        Ok(())
    }

    /// Record a business rejection so the delivery can be acked instead of
    /// retried: an `error` trading log plus a `Failed` marker, atomically.
    pub async fn record_rejection(
        &self,
        meta: &EventMeta,
        err: &LedgerError,
    ) -> Result<(), LedgerError> {
        if self.already_processed(meta).await? {
            return Ok(());
        }
        let now = TimeMs::now();
        let mut tx = self.repo.pool().begin().await?;

        let log = self.bot_log(
            meta,
            "error",
            err.to_string(),
            serde_json::json!({
                "event_id": meta.event_id,
                "rejected_event_type": meta.event_type,
            }),
            meta.sub_account_id.clone().map(Id::new),
            None,
            now,
        );
        Repository::insert_trading_log_in(&mut tx, &log).await?;
        Repository::insert_event_processing_in(&mut tx, &self.marker(meta, EventStatus::Failed, now))
            .await?;
        tx.commit().await?;

        warn!(event_id = %meta.event_id, error = %err, "Event rejected and recorded");
        Ok(())
    }

    async fn already_processed(&self, meta: &EventMeta) -> Result<bool, LedgerError> {
        if self.repo.event_processed(&meta.event_id).await? {
            debug!(event_id = %meta.event_id, "Duplicate event, skipping");
            return Ok(true);
        }
        Ok(false)
    }

    fn marker(&self, meta: &EventMeta, status: EventStatus, now: TimeMs) -> EventProcessing {
        EventProcessing {
            event_id: meta.event_id.clone(),
            event_type: meta.event_type.clone(),
            user_id: Some(Id::new(meta.user_id.clone())),
            sub_account_id: meta.sub_account_id.clone().map(Id::new),
            status,
            processed_at: now,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn bot_log(
        &self,
        meta: &EventMeta,
        log_type: &str,
        message: String,
        info: serde_json::Value,
        sub_account_id: Option<Id>,
        transaction_id: Option<Id>,
        now: TimeMs,
    ) -> TradingLog {
        TradingLog {
            id: Id::generate(),
            user_id: Id::new(meta.user_id.clone()),
            exchange_id: Id::new(meta.exchange_id.clone()),
            sub_account_id,
            transaction_id,
            time_ms: now,
            event_time_ms: Some(TimeMs::new(meta.timestamp)),
            log_type: log_type.to_string(),
            source: LogSource::Bot,
            message,
            info,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }
}
