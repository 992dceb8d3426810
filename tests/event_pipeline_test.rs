//! End-to-end event pipeline tests over the in-process bus backend.

use quantledger::bus::{BusProfile, InMemoryBus, MessageBus};
use quantledger::config::Environment;
use quantledger::consumers::{spawn_consumers, EventHandlers};
use quantledger::db::{init_db, Repository};
use quantledger::domain::{
    subjects, BalanceEvent, Decimal, Direction, EventMeta, EventStatus, Exchange, HeartbeatEvent,
    OrderEvent, SubAccount, User,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    bus: Arc<dyn MessageBus>,
    repo: Arc<Repository>,
    user: User,
    exchange: Exchange,
    account: SubAccount,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    _temp: TempDir,
}

async fn setup_pipeline() -> Pipeline {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path, 5).await.expect("init_db failed");
    let repo = Arc::new(Repository::new(pool));

    let user = User::new("ivan".into(), "ivan@example.com".into());
    repo.create_user(&user).await.unwrap();
    let exchange = Exchange::new(
        user.id.clone(),
        "binance-main".into(),
        "binance".into(),
        "k".into(),
        "s".into(),
    );
    repo.create_exchange(&exchange).await.unwrap();
    let account = SubAccount::new(
        user.id.clone(),
        exchange.id.clone(),
        "usdt".into(),
        "USDT".into(),
    );
    repo.create_sub_account(&account).await.unwrap();

    let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
    let profile = BusProfile::for_environment(Environment::Development);
    for spec in profile.streams() {
        bus.ensure_stream(&spec).await.unwrap();
    }

    let handlers = Arc::new(EventHandlers::new(repo.clone()));
    let cancel = CancellationToken::new();
    let tasks = spawn_consumers(bus.clone(), handlers, &profile, "test", cancel.clone())
        .await
        .unwrap();

    Pipeline {
        bus,
        repo,
        user,
        exchange,
        account,
        cancel,
        tasks,
        _temp: temp_dir,
    }
}

async fn shutdown(p: Pipeline) {
    p.cancel.cancel();
    for task in p.tasks {
        task.await.unwrap();
    }
}

async fn logs_for_event(repo: &Repository, event_id: &str) -> i64 {
    let row: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM trading_logs WHERE json_extract(info, '$.event_id') = ?",
    )
    .bind(event_id)
    .fetch_one(repo.pool())
    .await
    .unwrap();
    row.0
}

async fn wait_for_marker(repo: &Repository, event_id: &str) {
    for _ in 0..150 {
        if repo.event_processed(event_id).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("event {} was not processed in time", event_id);
}

fn meta(p: &Pipeline, event_id: &str, event_type: &str) -> EventMeta {
    EventMeta {
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        user_id: p.user.id.as_str().to_string(),
        exchange_id: p.exchange.id.as_str().to_string(),
        sub_account_id: Some(p.account.id.as_str().to_string()),
        timestamp: 1_700_000_000_000,
    }
}

fn balance_event(p: &Pipeline, event_id: &str, amount: &str, direction: Direction) -> Vec<u8> {
    let amount = Decimal::from_str(amount).unwrap();
    serde_json::to_vec(&BalanceEvent {
        meta: meta(p, event_id, "balance_update"),
        symbol: "USDT".into(),
        previous_balance: Decimal::zero(),
        new_balance: amount,
        amount,
        direction,
        reason: "deposit".into(),
        related_order_id: None,
    })
    .unwrap()
}

#[tokio::test]
async fn test_balance_event_flows_to_ledger() {
    let p = setup_pipeline().await;

    p.bus
        .publish(
            &subjects::balance("USDT"),
            "evt-1",
            balance_event(&p, "evt-1", "100", Direction::Credit),
        )
        .await
        .unwrap();
    wait_for_marker(&p.repo, "evt-1").await;

    let account = p.repo.get_sub_account(&p.account.id).await.unwrap().unwrap();
    assert_eq!(account.balance, Decimal::from_str("100").unwrap());
    assert_eq!(p.repo.count_transactions(&p.account.id).await.unwrap(), 1);
    assert_eq!(logs_for_event(&p.repo, "evt-1").await, 1);

    shutdown(p).await;
}

#[tokio::test]
async fn test_duplicate_event_applied_once() {
    let p = setup_pipeline().await;
    let payload = balance_event(&p, "evt-dup", "100", Direction::Credit);

    // same event id published twice inside the duplicate window
    p.bus
        .publish(&subjects::balance("USDT"), "evt-dup", payload.clone())
        .await
        .unwrap();
    p.bus
        .publish(&subjects::balance("USDT"), "evt-dup", payload)
        .await
        .unwrap();
    wait_for_marker(&p.repo, "evt-dup").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let account = p.repo.get_sub_account(&p.account.id).await.unwrap().unwrap();
    assert_eq!(account.balance, Decimal::from_str("100").unwrap());
    assert_eq!(p.repo.count_transactions(&p.account.id).await.unwrap(), 1);
    assert_eq!(
        logs_for_event(&p.repo, "evt-dup").await,
        1
    );

    shutdown(p).await;
}

#[tokio::test]
async fn test_rejected_event_recorded_and_not_retried() {
    let p = setup_pipeline().await;

    // debit with nothing to cover it: a business rejection, not a retry case
    p.bus
        .publish(
            &subjects::balance("USDT"),
            "evt-rej",
            balance_event(&p, "evt-rej", "50", Direction::Debit),
        )
        .await
        .unwrap();
    wait_for_marker(&p.repo, "evt-rej").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let marker = p.repo.get_event_processing("evt-rej").await.unwrap().unwrap();
    assert_eq!(marker.status, EventStatus::Failed);

    let account = p.repo.get_sub_account(&p.account.id).await.unwrap().unwrap();
    assert!(account.balance.is_zero());
    assert_eq!(p.repo.count_transactions(&p.account.id).await.unwrap(), 0);
    // exactly one error log, no redelivery pile-up
    assert_eq!(
        logs_for_event(&p.repo, "evt-rej").await,
        1
    );

    shutdown(p).await;
}

#[tokio::test]
async fn test_order_event_logged_without_balance_effect() {
    let p = setup_pipeline().await;

    let payload = serde_json::to_vec(&OrderEvent {
        meta: meta(&p, "evt-ord", "order_update"),
        order_id: "ord-1".into(),
        symbol: "ETH".into(),
        side: "buy".into(),
        order_type: "limit".into(),
        amount: Decimal::from_str("2").unwrap(),
        price: Some(Decimal::from_str("3000").unwrap()),
        status: "filled".into(),
        message: None,
    })
    .unwrap();
    p.bus
        .publish(&subjects::order("filled"), "evt-ord", payload)
        .await
        .unwrap();
    wait_for_marker(&p.repo, "evt-ord").await;

    assert_eq!(p.repo.count_transactions(&p.account.id).await.unwrap(), 0);
    assert_eq!(
        logs_for_event(&p.repo, "evt-ord").await,
        1
    );

    shutdown(p).await;
}

#[tokio::test]
async fn test_heartbeat_leaves_marker_only() {
    let p = setup_pipeline().await;

    let payload = serde_json::to_vec(&HeartbeatEvent {
        meta: meta(&p, "evt-hb", "heartbeat"),
        component: "executor".into(),
        status: "ok".into(),
    })
    .unwrap();
    p.bus
        .publish(subjects::HEARTBEAT, "evt-hb", payload)
        .await
        .unwrap();
    wait_for_marker(&p.repo, "evt-hb").await;

    assert_eq!(
        logs_for_event(&p.repo, "evt-hb").await,
        0
    );
    assert_eq!(
        p.repo
            .count_trading_logs(&p.user.id, &Default::default())
            .await
            .unwrap(),
        0
    );

    shutdown(p).await;
}
