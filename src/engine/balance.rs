//! The balance mutation primitive.
//!
//! `update_balance` is the only code path that writes `sub_accounts.balance`.
//! It runs against an open database transaction handle supplied by the
//! caller, so a multi-leg trade commits or rolls back as one unit. SQLite
//! serializes write transactions, which linearizes concurrent mutations of
//! the same sub-account the way a row lock would.

use sqlx::sqlite::SqliteConnection;
use tracing::debug;

use super::LedgerError;
use crate::db::Repository;
use crate::domain::{Decimal, Direction, Id, SubAccount, TimeMs, Transaction};

/// Reasons permitted to drive a balance negative.
const NEGATIVE_BALANCE_REASONS: &[&str] = &["cleanup", "correction"];

/// Apply a single balance mutation and append its transaction row.
///
/// Contract (all inside the caller's transaction):
/// 1. Load the live sub-account.
/// 2. `new_balance = balance + sign(direction) * amount`.
/// 3. Reject with `InsufficientBalance` if `new_balance < 0` and the reason
///    is not `cleanup`/`correction`.
/// 4. Write the new balance; insert a transaction row whose
///    `closing_balance` is the balance after this mutation.
///
/// Returns the transaction row and the updated sub-account.
///
/// # Errors
/// `NotFound` for a missing/deleted sub-account, `InvalidTradingLog` for a
/// non-positive amount, `InsufficientBalance` per the contract, or the
/// underlying database error.
pub async fn update_balance(
    conn: &mut SqliteConnection,
    sub_account_id: &Id,
    amount: Decimal,
    direction: Direction,
    reason: &str,
    info: serde_json::Value,
) -> Result<(Transaction, SubAccount), LedgerError> {
    if !amount.is_positive() {
        return Err(LedgerError::InvalidTradingLog(format!(
            "amount must be positive, got {}",
            amount
        )));
    }

    let mut account = Repository::sub_account_in(conn, sub_account_id)
        .await?
        .ok_or_else(|| LedgerError::NotFound(format!("sub-account {}", sub_account_id)))?;

    let signed = if direction == Direction::Credit {
        amount
    } else {
        -amount
    };
    let new_balance = account.balance + signed;

    if new_balance.is_negative() && !NEGATIVE_BALANCE_REASONS.contains(&reason) {
        return Err(LedgerError::InsufficientBalance(format!(
            "sub-account {}: balance {} cannot cover {} {}",
            sub_account_id, account.balance, direction, amount
        )));
    }

    let now = TimeMs::now();
    Repository::set_sub_account_balance_in(conn, sub_account_id, new_balance, now).await?;

    let txn = Transaction {
        id: Id::generate(),
        user_id: account.user_id.clone(),
        exchange_id: account.exchange_id.clone(),
        sub_account_id: account.id.clone(),
        time_ms: now,
        direction,
        reason: reason.to_string(),
        amount,
        closing_balance: new_balance,
        info,
        created_at: now,
    };
    Repository::insert_transaction_in(conn, &txn).await?;

    debug!(
        sub_account_id = %sub_account_id,
        direction = %direction,
        amount = %amount,
        closing_balance = %new_balance,
        "Balance updated"
    );

    account.balance = new_balance;
    account.updated_at = now;
    Ok((txn, account))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::init_db;
    use crate::domain::{Exchange, User};
    use std::str::FromStr;
    use tempfile::TempDir;

    async fn setup() -> (Repository, Id, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("test.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path, 5).await.expect("init_db failed");
        let repo = Repository::new(pool);

        let user = User::new("dave".into(), "dave@example.com".into());
        repo.create_user(&user).await.unwrap();
        let ex = Exchange::new(
            user.id.clone(),
            "binance-main".into(),
            "binance".into(),
            "k".into(),
            "s".into(),
        );
        repo.create_exchange(&ex).await.unwrap();
        let acct = SubAccount::new(user.id.clone(), ex.id.clone(), "usdt".into(), "USDT".into());
        repo.create_sub_account(&acct).await.unwrap();

        (repo, acct.id, temp_dir)
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    async fn apply(
        repo: &Repository,
        acct: &Id,
        amount: &str,
        direction: Direction,
        reason: &str,
    ) -> Result<(Transaction, SubAccount), LedgerError> {
        let mut tx = repo.pool().begin().await.unwrap();
        let result = update_balance(
            &mut tx,
            acct,
            dec(amount),
            direction,
            reason,
            serde_json::json!({}),
        )
        .await;
        match result {
            Ok(ok) => {
                tx.commit().await.unwrap();
                Ok(ok)
            }
            Err(e) => {
                tx.rollback().await.unwrap();
                Err(e)
            }
        }
    }

    #[tokio::test]
    async fn test_credit_then_debit_prefix_sum() {
        let (repo, acct, _temp) = setup().await;

        let (t1, a1) = apply(&repo, &acct, "1000", Direction::Credit, "deposit")
            .await
            .unwrap();
        assert_eq!(t1.closing_balance, dec("1000"));
        assert_eq!(a1.balance, dec("1000"));

        let (t2, a2) = apply(&repo, &acct, "250", Direction::Debit, "withdraw")
            .await
            .unwrap();
        assert_eq!(t2.closing_balance, dec("750"));
        assert_eq!(a2.balance, dec("750"));

        // replay invariant: closing balances form a prefix sum
        let txns = repo
            .list_transactions(&acct, crate::db::repo::Page::new(None, None))
            .await
            .unwrap();
        let mut running = Decimal::zero();
        for t in &txns {
            let signed = if t.direction == Direction::Credit {
                t.amount
            } else {
                -t.amount
            };
            running = running + signed;
            assert_eq!(t.closing_balance, running);
        }
        let stored = repo.get_sub_account(&acct).await.unwrap().unwrap();
        assert_eq!(stored.balance, running);
    }

    #[tokio::test]
    async fn test_insufficient_balance_rejected() {
        let (repo, acct, _temp) = setup().await;

        apply(&repo, &acct, "100", Direction::Credit, "deposit")
            .await
            .unwrap();

        let err = apply(&repo, &acct, "200", Direction::Debit, "user_withdrawal").await;
        assert!(matches!(err, Err(LedgerError::InsufficientBalance(_))));

        // nothing changed
        let stored = repo.get_sub_account(&acct).await.unwrap().unwrap();
        assert_eq!(stored.balance, dec("100"));
        assert_eq!(repo.count_transactions(&acct).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_reason_may_go_negative() {
        let (repo, acct, _temp) = setup().await;

        let (t, a) = apply(&repo, &acct, "50", Direction::Debit, "cleanup")
            .await
            .unwrap();
        assert_eq!(t.closing_balance, dec("-50"));
        assert_eq!(a.balance, dec("-50"));

        let (_, a) = apply(&repo, &acct, "10", Direction::Debit, "correction")
            .await
            .unwrap();
        assert_eq!(a.balance, dec("-60"));
    }

    #[tokio::test]
    async fn test_non_positive_amount_rejected() {
        let (repo, acct, _temp) = setup().await;
        let err = apply(&repo, &acct, "0", Direction::Credit, "deposit").await;
        assert!(matches!(err, Err(LedgerError::InvalidTradingLog(_))));
        let err = apply(&repo, &acct, "-5", Direction::Credit, "deposit").await;
        assert!(matches!(err, Err(LedgerError::InvalidTradingLog(_))));
    }

    #[tokio::test]
    async fn test_missing_account_rejected() {
        let (repo, _acct, _temp) = setup().await;
        let err = apply(&repo, &Id::generate(), "5", Direction::Credit, "deposit").await;
        assert!(matches!(err, Err(LedgerError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rollback_discards_mutation() {
        let (repo, acct, _temp) = setup().await;

        let mut tx = repo.pool().begin().await.unwrap();
        update_balance(
            &mut tx,
            &acct,
            dec("500"),
            Direction::Credit,
            "deposit",
            serde_json::json!({}),
        )
        .await
        .unwrap();
        tx.rollback().await.unwrap();

        let stored = repo.get_sub_account(&acct).await.unwrap().unwrap();
        assert!(stored.balance.is_zero());
        assert_eq!(repo.count_transactions(&acct).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_debits_serialize() {
        let (repo, acct, _temp) = setup().await;
        apply(&repo, &acct, "100", Direction::Credit, "deposit")
            .await
            .unwrap();

        let repo = std::sync::Arc::new(repo);
        let mut handles = Vec::new();
        for _ in 0..2 {
            let repo = repo.clone();
            let acct = acct.clone();
            handles.push(tokio::spawn(async move {
                // Transient write contention (busy/stale snapshot) is retried,
                // matching how callers treat transient DB errors.
                for attempt in 0u64..20 {
                    let mut tx = repo.pool().begin().await.unwrap();
                    let res = update_balance(
                        &mut tx,
                        &acct,
                        dec("50"),
                        Direction::Debit,
                        "withdraw",
                        serde_json::json!({}),
                    )
                    .await;
                    match res {
                        Ok(_) => {
                            if tx.commit().await.is_ok() {
                                return;
                            }
                        }
                        Err(LedgerError::Db(_)) => {
                            let _ = tx.rollback().await;
                        }
                        Err(e) => panic!("unexpected rejection: {}", e),
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10 * (attempt + 1))).await;
                }
                panic!("debit did not commit after retries");
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stored = repo.get_sub_account(&acct).await.unwrap().unwrap();
        assert!(stored.balance.is_zero());
        assert_eq!(repo.count_transactions(&acct).await.unwrap(), 3);

        let txns = repo
            .list_transactions(&acct, crate::db::repo::Page::new(None, None))
            .await
            .unwrap();
        assert_eq!(txns[1].closing_balance, dec("50"));
        assert_eq!(txns[2].closing_balance, dec("0"));
    }
}
