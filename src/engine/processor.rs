//! Trading-log processor: a typed dispatcher over semantic log entries.
//!
//! The semi-structured `info` payload is validated and destructured exactly
//! once, at this boundary, into a [`LogCommand`]; everything past that point
//! works with statically-typed records. Every path runs inside one database
//! transaction so the log row, its transactions, and the balance updates
//! commit together or not at all.

use serde::Deserialize;
use sqlx::sqlite::SqliteConnection;
use std::sync::Arc;
use tracing::info;

use super::{balance::update_balance, LedgerError};
use crate::db::Repository;
use crate::domain::{Decimal, Direction, Id, LogSource, SubAccount, TimeMs, TradingLog, Transaction};

/// A trading-log submission, before typing.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingLogRequest {
    #[serde(rename = "type")]
    pub log_type: String,
    pub exchange_id: Id,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub event_time_ms: Option<i64>,
    #[serde(default = "empty_object")]
    pub info: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

/// Everything a processed trading log produced.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub log: TradingLog,
    pub transactions: Vec<Transaction>,
    /// Post-update state of every sub-account the log touched.
    pub sub_accounts: Vec<SubAccount>,
}

/// `info` schema for `deposit` / `withdraw`.
#[derive(Debug, Deserialize)]
struct TransferInfo {
    sub_account_id: Id,
    amount: Decimal,
}

/// `info` schema for `long` / `short` / `stop_loss`.
#[derive(Debug, Deserialize)]
struct PairedInfo {
    stock_account_id: Id,
    currency_account_id: Id,
    volume: Decimal,
    price: Decimal,
    #[serde(default)]
    fee: Decimal,
    #[allow(dead_code)]
    stock: String,
    #[allow(dead_code)]
    currency: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairedKind {
    Long,
    Short,
    StopLoss,
}

/// The typed form of a request, produced once at the processor boundary.
enum LogCommand {
    Deposit(TransferInfo),
    Withdraw(TransferInfo),
    Paired(PairedKind, PairedInfo),
    /// Any other type: trading-log row only, no balance effect.
    Plain,
}

impl LogCommand {
    fn parse(req: &TradingLogRequest) -> Result<Self, LedgerError> {
        match req.log_type.as_str() {
            "deposit" => Ok(LogCommand::Deposit(typed(req)?)),
            "withdraw" => Ok(LogCommand::Withdraw(typed(req)?)),
            "long" => Ok(LogCommand::Paired(PairedKind::Long, typed(req)?)),
            "short" => Ok(LogCommand::Paired(PairedKind::Short, typed(req)?)),
            "stop_loss" => Ok(LogCommand::Paired(PairedKind::StopLoss, typed(req)?)),
            "" => Err(LedgerError::InvalidTradingLog("type must not be empty".into())),
            _ => Ok(LogCommand::Plain),
        }
    }
}

fn typed<T: serde::de::DeserializeOwned>(req: &TradingLogRequest) -> Result<T, LedgerError> {
    serde_json::from_value(req.info.clone()).map_err(|e| {
        LedgerError::InvalidTradingLog(format!("invalid info for type {}: {}", req.log_type, e))
    })
}

/// Dispatches trading-log entries onto the balance engine.
pub struct Processor {
    repo: Arc<Repository>,
}

impl Processor {
    pub fn new(repo: Arc<Repository>) -> Self {
        Processor { repo }
    }

    /// Process one trading-log entry for `user_id`.
    ///
    /// Ownership of the exchange and every referenced sub-account is checked
    /// against `user_id`; violations fail with `Forbidden` before any write.
    pub async fn process(
        &self,
        user_id: &Id,
        source: LogSource,
        req: TradingLogRequest,
    ) -> Result<ProcessOutcome, LedgerError> {
        let cmd = LogCommand::parse(&req)?;

        let exchange = self
            .repo
            .get_exchange(&req.exchange_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("exchange {}", req.exchange_id)))?;
        if &exchange.user_id != user_id {
            return Err(LedgerError::Forbidden(format!(
                "exchange {} does not belong to the caller",
                req.exchange_id
            )));
        }

        let log_id = Id::generate();
        let now = TimeMs::now();

        let mut tx = self.repo.pool().begin().await?;

        let (transactions, sub_accounts) = match &cmd {
            LogCommand::Deposit(transfer) => {
                let (txn, acct) = self
                    .single_leg(&mut tx, user_id, &log_id, transfer, Direction::Credit, "deposit")
                    .await?;
                (vec![txn], vec![acct])
            }
            LogCommand::Withdraw(transfer) => {
                let (txn, acct) = self
                    .single_leg(&mut tx, user_id, &log_id, transfer, Direction::Debit, "withdraw")
                    .await?;
                (vec![txn], vec![acct])
            }
            LogCommand::Paired(kind, paired) => {
                self.paired_legs(&mut tx, user_id, &log_id, *kind, &req.log_type, paired)
                    .await?
            }
            LogCommand::Plain => (Vec::new(), Vec::new()),
        };

        let mut log_info = match req.info {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                if !other.is_null() {
                    map.insert("payload".to_string(), other);
                }
                map
            }
        };
        if !transactions.is_empty() {
            log_info.insert(
                "transaction_ids".to_string(),
                serde_json::Value::Array(
                    transactions
                        .iter()
                        .map(|t| serde_json::Value::String(t.id.as_str().to_string()))
                        .collect(),
                ),
            );
        }

        let log = TradingLog {
            id: log_id,
            user_id: user_id.clone(),
            exchange_id: req.exchange_id.clone(),
            sub_account_id: sub_accounts.first().map(|a| a.id.clone()),
            transaction_id: transactions.first().map(|t| t.id.clone()),
            time_ms: now,
            event_time_ms: req.event_time_ms.map(TimeMs::new),
            log_type: req.log_type.clone(),
            source,
            message: req.message.unwrap_or_default(),
            info: serde_json::Value::Object(log_info),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        Repository::insert_trading_log_in(&mut tx, &log).await?;

        tx.commit().await?;

        info!(
            trading_log_id = %log.id,
            log_type = %log.log_type,
            source = %log.source,
            transactions = transactions.len(),
            "Trading log processed"
        );

        Ok(ProcessOutcome {
            log,
            transactions,
            sub_accounts,
        })
    }

    /// Credit or debit a single sub-account.
    async fn single_leg(
        &self,
        conn: &mut SqliteConnection,
        user_id: &Id,
        log_id: &Id,
        transfer: &TransferInfo,
        direction: Direction,
        reason: &str,
    ) -> Result<(Transaction, SubAccount), LedgerError> {
        self.check_account_owner(conn, user_id, &transfer.sub_account_id)
            .await?;

        update_balance(
            conn,
            &transfer.sub_account_id,
            transfer.amount,
            direction,
            reason,
            serde_json::json!({ "trading_log_id": log_id.as_str() }),
        )
        .await
    }

    /// Apply the two legs of a `long`/`short`/`stop_loss` entry.
    ///
    /// Legs are applied in ascending sub-account-id order, giving every
    /// concurrent paired-entry writer the same total order.
    async fn paired_legs(
        &self,
        conn: &mut SqliteConnection,
        user_id: &Id,
        log_id: &Id,
        kind: PairedKind,
        reason: &str,
        paired: &PairedInfo,
    ) -> Result<(Vec<Transaction>, Vec<SubAccount>), LedgerError> {
        if paired.stock_account_id == paired.currency_account_id {
            return Err(LedgerError::InvalidTradingLog(
                "stock and currency accounts must differ".into(),
            ));
        }
        if !paired.volume.is_positive() {
            return Err(LedgerError::InvalidTradingLog(format!(
                "volume must be positive, got {}",
                paired.volume
            )));
        }
        if paired.price.is_negative() || paired.fee.is_negative() {
            return Err(LedgerError::InvalidTradingLog(
                "price and fee must be non-negative".into(),
            ));
        }

        let stock = self
            .check_account_owner(conn, user_id, &paired.stock_account_id)
            .await?;
        self.check_account_owner(conn, user_id, &paired.currency_account_id)
            .await?;

        // A stop-loss closes whichever position the stock account holds.
        let effective = match kind {
            PairedKind::Long => PairedKind::Long,
            PairedKind::Short => PairedKind::Short,
            PairedKind::StopLoss => {
                if stock.balance.is_positive() {
                    PairedKind::Short
                } else if stock.balance.is_negative() {
                    PairedKind::Long
                } else {
                    return Err(LedgerError::InvalidTradingLog(format!(
                        "stop_loss with zero holding on stock account {}",
                        paired.stock_account_id
                    )));
                }
            }
        };

        let notional = paired.volume * paired.price;
        let (stock_direction, currency_direction, currency_amount) = match effective {
            PairedKind::Long => (Direction::Credit, Direction::Debit, notional + paired.fee),
            PairedKind::Short => (Direction::Debit, Direction::Credit, notional - paired.fee),
            PairedKind::StopLoss => unreachable!("resolved above"),
        };
        if !currency_amount.is_positive() {
            return Err(LedgerError::InvalidTradingLog(format!(
                "currency leg amount must be positive, got {}",
                currency_amount
            )));
        }

        let mut legs = vec![
            (
                paired.stock_account_id.clone(),
                stock_direction,
                paired.volume,
            ),
            (
                paired.currency_account_id.clone(),
                currency_direction,
                currency_amount,
            ),
        ];
        legs.sort_by(|a, b| a.0.cmp(&b.0));

        let leg_info = serde_json::json!({ "trading_log_id": log_id.as_str() });
        let mut transactions = Vec::with_capacity(2);
        let mut accounts = Vec::with_capacity(2);
        for (account_id, direction, amount) in legs {
            let (txn, acct) =
                update_balance(conn, &account_id, amount, direction, reason, leg_info.clone())
                    .await?;
            transactions.push(txn);
            accounts.push(acct);
        }

        // Report the stock account first regardless of apply order.
        accounts.sort_by_key(|a| a.id != paired.stock_account_id);
        Ok((transactions, accounts))
    }

    async fn check_account_owner(
        &self,
        conn: &mut SqliteConnection,
        user_id: &Id,
        sub_account_id: &Id,
    ) -> Result<SubAccount, LedgerError> {
        let account = Repository::sub_account_in(conn, sub_account_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("sub-account {}", sub_account_id)))?;
        if &account.user_id != user_id {
            return Err(LedgerError::Forbidden(format!(
                "sub-account {} does not belong to the caller",
                sub_account_id
            )));
        }
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Exchange, User};
    use std::str::FromStr;
    use tempfile::TempDir;

    struct Fixture {
        repo: Arc<Repository>,
        processor: Processor,
        user_id: Id,
        exchange_id: Id,
        usdt: Id,
        eth: Id,
        _temp: TempDir,
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn setup() -> Fixture {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path, 5).await.expect("init_db failed");
        let repo = Arc::new(Repository::new(pool));

        let user = User::new("erin".into(), "erin@example.com".into());
        repo.create_user(&user).await.unwrap();
        let ex = Exchange::new(
            user.id.clone(),
            "binance-main".into(),
            "binance".into(),
            "k".into(),
            "s".into(),
        );
        repo.create_exchange(&ex).await.unwrap();

        let usdt = SubAccount::new(user.id.clone(), ex.id.clone(), "usdt".into(), "USDT".into());
        repo.create_sub_account(&usdt).await.unwrap();
        let eth = SubAccount::new(user.id.clone(), ex.id.clone(), "eth".into(), "ETH".into());
        repo.create_sub_account(&eth).await.unwrap();

        Fixture {
            processor: Processor::new(repo.clone()),
            repo,
            user_id: user.id,
            exchange_id: ex.id,
            usdt: usdt.id,
            eth: eth.id,
            _temp: temp_dir,
        }
    }

    fn request(log_type: &str, exchange_id: &Id, info: serde_json::Value) -> TradingLogRequest {
        TradingLogRequest {
            log_type: log_type.to_string(),
            exchange_id: exchange_id.clone(),
            message: None,
            event_time_ms: None,
            info,
        }
    }

    async fn deposit(fx: &Fixture, account: &Id, amount: &str) -> ProcessOutcome {
        fx.processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "deposit",
                    &fx.exchange_id,
                    serde_json::json!({ "sub_account_id": account.as_str(), "amount": amount.parse::<f64>().unwrap() }),
                ),
            )
            .await
            .expect("deposit failed")
    }

    #[tokio::test]
    async fn test_deposit_scenario() {
        let fx = setup().await;

        let outcome = deposit(&fx, &fx.usdt, "1000").await;

        assert_eq!(outcome.transactions.len(), 1);
        let txn = &outcome.transactions[0];
        assert_eq!(txn.direction, Direction::Credit);
        assert_eq!(txn.amount, dec("1000"));
        assert_eq!(txn.closing_balance, dec("1000"));

        let stored = fx.repo.get_sub_account(&fx.usdt).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec("1000"));
        assert_eq!(outcome.log.transaction_id, Some(txn.id.clone()));
    }

    #[tokio::test]
    async fn test_withdraw_insufficient_rolls_back() {
        let fx = setup().await;
        deposit(&fx, &fx.usdt, "100").await;

        let err = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "withdraw",
                    &fx.exchange_id,
                    serde_json::json!({ "sub_account_id": fx.usdt.as_str(), "amount": 200 }),
                ),
            )
            .await;
        assert!(matches!(err, Err(LedgerError::InsufficientBalance(_))));

        let stored = fx.repo.get_sub_account(&fx.usdt).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec("100"));
        assert_eq!(fx.repo.count_transactions(&fx.usdt).await.unwrap(), 1);
        // no log row either: the whole entry rolled back
        let logs = fx
            .repo
            .count_trading_logs(&fx.user_id, &Default::default())
            .await
            .unwrap();
        assert_eq!(logs, 1, "only the seed deposit log should exist");
    }

    #[tokio::test]
    async fn test_long_scenario_paired_entries() {
        let fx = setup().await;
        deposit(&fx, &fx.usdt, "10000").await;

        let outcome = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "long",
                    &fx.exchange_id,
                    serde_json::json!({
                        "stock_account_id": fx.eth.as_str(),
                        "currency_account_id": fx.usdt.as_str(),
                        "volume": 2.0,
                        "price": 3000,
                        "fee": 12,
                        "stock": "ETH",
                        "currency": "USDT"
                    }),
                ),
            )
            .await
            .expect("long failed");

        assert_eq!(outcome.transactions.len(), 2);
        let eth = fx.repo.get_sub_account(&fx.eth).await.unwrap().unwrap();
        let usdt = fx.repo.get_sub_account(&fx.usdt).await.unwrap().unwrap();
        assert_eq!(eth.balance, dec("2"));
        assert_eq!(usdt.balance, dec("3988"));

        // both transactions carry the trading-log id for audit linkage
        for txn in &outcome.transactions {
            assert_eq!(
                txn.info["trading_log_id"],
                serde_json::Value::String(outcome.log.id.as_str().to_string())
            );
        }
        // and the log lists both transaction ids
        let ids = outcome.log.info["transaction_ids"].as_array().unwrap();
        assert_eq!(ids.len(), 2);
    }

    #[tokio::test]
    async fn test_short_mirror_image() {
        let fx = setup().await;
        deposit(&fx, &fx.eth, "5").await;

        fx.processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "short",
                    &fx.exchange_id,
                    serde_json::json!({
                        "stock_account_id": fx.eth.as_str(),
                        "currency_account_id": fx.usdt.as_str(),
                        "volume": 2.0,
                        "price": 3000,
                        "fee": 12,
                        "stock": "ETH",
                        "currency": "USDT"
                    }),
                ),
            )
            .await
            .expect("short failed");

        let eth = fx.repo.get_sub_account(&fx.eth).await.unwrap().unwrap();
        let usdt = fx.repo.get_sub_account(&fx.usdt).await.unwrap().unwrap();
        assert_eq!(eth.balance, dec("3"));
        assert_eq!(usdt.balance, dec("5988"));
    }

    #[tokio::test]
    async fn test_stop_loss_closes_long_holding() {
        let fx = setup().await;
        deposit(&fx, &fx.eth, "2").await;

        // positive stock holding: stop_loss behaves like a short
        fx.processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "stop_loss",
                    &fx.exchange_id,
                    serde_json::json!({
                        "stock_account_id": fx.eth.as_str(),
                        "currency_account_id": fx.usdt.as_str(),
                        "volume": 2.0,
                        "price": 2800,
                        "fee": 10,
                        "stock": "ETH",
                        "currency": "USDT"
                    }),
                ),
            )
            .await
            .expect("stop_loss failed");

        let eth = fx.repo.get_sub_account(&fx.eth).await.unwrap().unwrap();
        let usdt = fx.repo.get_sub_account(&fx.usdt).await.unwrap().unwrap();
        assert!(eth.balance.is_zero());
        assert_eq!(usdt.balance, dec("5590"));
    }

    #[tokio::test]
    async fn test_stop_loss_zero_holding_rejected() {
        let fx = setup().await;

        let err = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "stop_loss",
                    &fx.exchange_id,
                    serde_json::json!({
                        "stock_account_id": fx.eth.as_str(),
                        "currency_account_id": fx.usdt.as_str(),
                        "volume": 1.0,
                        "price": 100,
                        "fee": 0,
                        "stock": "ETH",
                        "currency": "USDT"
                    }),
                ),
            )
            .await;
        assert!(matches!(err, Err(LedgerError::InvalidTradingLog(_))));
    }

    #[tokio::test]
    async fn test_same_account_pair_rejected() {
        let fx = setup().await;

        let err = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "long",
                    &fx.exchange_id,
                    serde_json::json!({
                        "stock_account_id": fx.eth.as_str(),
                        "currency_account_id": fx.eth.as_str(),
                        "volume": 1.0,
                        "price": 100,
                        "fee": 0,
                        "stock": "ETH",
                        "currency": "ETH"
                    }),
                ),
            )
            .await;
        assert!(matches!(err, Err(LedgerError::InvalidTradingLog(_))));
    }

    #[tokio::test]
    async fn test_foreign_account_forbidden() {
        let fx = setup().await;

        let other = User::new("mallory".into(), "mallory@example.com".into());
        fx.repo.create_user(&other).await.unwrap();
        let other_ex = Exchange::new(
            other.id.clone(),
            "kraken-main".into(),
            "kraken".into(),
            "k2".into(),
            "s2".into(),
        );
        fx.repo.create_exchange(&other_ex).await.unwrap();
        let other_acct = SubAccount::new(
            other.id.clone(),
            other_ex.id.clone(),
            "usdt".into(),
            "USDT".into(),
        );
        fx.repo.create_sub_account(&other_acct).await.unwrap();

        let err = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "deposit",
                    &fx.exchange_id,
                    serde_json::json!({ "sub_account_id": other_acct.id.as_str(), "amount": 10 }),
                ),
            )
            .await;
        assert!(matches!(err, Err(LedgerError::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_opaque_type_creates_log_only() {
        let fx = setup().await;

        let outcome = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "api_call",
                    &fx.exchange_id,
                    serde_json::json!({ "endpoint": "/ticker" }),
                ),
            )
            .await
            .expect("plain log failed");

        assert!(outcome.transactions.is_empty());
        assert!(outcome.sub_accounts.is_empty());
        assert_eq!(fx.repo.count_transactions(&fx.usdt).await.unwrap(), 0);
        let fetched = fx.repo.get_trading_log(&outcome.log.id).await.unwrap();
        assert!(fetched.is_some());
    }

    #[tokio::test]
    async fn test_malformed_info_rejected() {
        let fx = setup().await;

        let err = fx
            .processor
            .process(
                &fx.user_id,
                LogSource::Manual,
                request(
                    "deposit",
                    &fx.exchange_id,
                    serde_json::json!({ "amount": 10 }),
                ),
            )
            .await;
        assert!(matches!(err, Err(LedgerError::InvalidTradingLog(_))));
    }
}
