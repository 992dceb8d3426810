//! Durable pull consumers for the five event classes.
//!
//! Each class runs its own fetch loop against its own durable, so a slow
//! class never starves the others. Outcome policy per delivery:
//! decode failure or transient error naks for redelivery (bounded by the
//! consumer's max-deliver), a business rejection is recorded in the ledger
//! and acked, success acks.

pub mod handlers;

pub use handlers::EventHandlers;

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{BusError, BusProfile, BusSubscription, Delivery, MessageBus};
use crate::domain::{BalanceEvent, ErrorEvent, EventMeta, HeartbeatEvent, OrderEvent, SignalEvent};
use crate::engine::LedgerError;

const FETCH_BATCH: usize = 10;
const FETCH_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventClass {
    Orders,
    Balance,
    Signals,
    Errors,
    System,
}

impl EventClass {
    fn name(&self) -> &'static str {
        match self {
            EventClass::Orders => "orders",
            EventClass::Balance => "balance",
            EventClass::Signals => "signals",
            EventClass::Errors => "errors",
            EventClass::System => "system",
        }
    }
}

/// Start one consumer task per event class. Returned handles complete after
/// `cancel` fires and the in-flight batch finishes.
pub async fn spawn_consumers(
    bus: Arc<dyn MessageBus>,
    handlers: Arc<EventHandlers>,
    profile: &BusProfile,
    durable_prefix: &str,
    cancel: CancellationToken,
) -> Result<Vec<JoinHandle<()>>, BusError> {
    let specs = [
        (EventClass::Orders, profile.orders_consumer(durable_prefix)),
        (EventClass::Balance, profile.balance_consumer(durable_prefix)),
        (EventClass::Signals, profile.signals_consumer(durable_prefix)),
        (EventClass::Errors, profile.errors_consumer(durable_prefix)),
        (EventClass::System, profile.system_consumer(durable_prefix)),
    ];

    let mut tasks = Vec::with_capacity(specs.len());
    for (class, spec) in specs {
        let subscription = bus.subscribe(&spec).await?;
        tasks.push(tokio::spawn(run_loop(
            class,
            subscription,
            handlers.clone(),
            cancel.clone(),
        )));
    }
    Ok(tasks)
}

async fn run_loop(
    class: EventClass,
    mut subscription: Box<dyn BusSubscription>,
    handlers: Arc<EventHandlers>,
    cancel: CancellationToken,
) {
    info!(consumer = class.name(), "Consumer started");
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = subscription.fetch(FETCH_BATCH, FETCH_WAIT) => match batch {
                Ok(batch) => {
                    for delivery in batch {
                        process_delivery(class, &handlers, delivery).await;
                    }
                }
                Err(e) => {
                    warn!(consumer = class.name(), error = %e, "Fetch failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }
    }
    info!(consumer = class.name(), "Consumer stopped");
}

enum Dispatch {
    Handled,
    Decode(serde_json::Error),
    Rejected(EventMeta, LedgerError),
    Transient(LedgerError),
}

fn classify(meta: EventMeta, result: Result<(), LedgerError>) -> Dispatch {
    match result {
        Ok(()) => Dispatch::Handled,
        Err(e) if e.is_business_rejection() => Dispatch::Rejected(meta, e),
        Err(e) => Dispatch::Transient(e),
    }
}

async fn dispatch(class: EventClass, handlers: &EventHandlers, delivery: &Delivery) -> Dispatch {
    match class {
        EventClass::Balance => match serde_json::from_slice::<BalanceEvent>(&delivery.payload) {
            Err(e) => Dispatch::Decode(e),
            Ok(ev) => {
                let meta = ev.meta.clone();
                classify(meta, handlers.handle_balance(ev).await)
            }
        },
        EventClass::Orders => match serde_json::from_slice::<OrderEvent>(&delivery.payload) {
            Err(e) => Dispatch::Decode(e),
            Ok(ev) => {
                let meta = ev.meta.clone();
                classify(meta, handlers.handle_order(ev).await)
            }
        },
        EventClass::Signals => match serde_json::from_slice::<SignalEvent>(&delivery.payload) {
            Err(e) => Dispatch::Decode(e),
            Ok(ev) => {
                let meta = ev.meta.clone();
                classify(meta, handlers.handle_signal(ev).await)
            }
        },
        EventClass::Errors => match serde_json::from_slice::<ErrorEvent>(&delivery.payload) {
            Err(e) => Dispatch::Decode(e),
            Ok(ev) => {
                let meta = ev.meta.clone();
                classify(meta, handlers.handle_error(ev).await)
            }
        },
        EventClass::System => match serde_json::from_slice::<HeartbeatEvent>(&delivery.payload) {
            Err(e) => Dispatch::Decode(e),
            Ok(ev) => {
                let meta = ev.meta.clone();
                classify(meta, handlers.handle_heartbeat(ev).await)
            }
        },
    }
}

async fn process_delivery(class: EventClass, handlers: &EventHandlers, delivery: Delivery) {
    let subject = delivery.subject.clone();
    let attempt = delivery.deliveries;
    match dispatch(class, handlers, &delivery).await {
        Dispatch::Handled => {
            if let Err(e) = delivery.ack().await {
                warn!(consumer = class.name(), subject = %subject, error = %e, "Ack failed");
            }
        }
        Dispatch::Decode(e) => {
            warn!(
                consumer = class.name(),
                subject = %subject,
                attempt,
                error = %e,
                "Undecodable payload, rejecting for redelivery"
            );
            if let Err(e) = delivery.nak().await {
                warn!(consumer = class.name(), subject = %subject, error = %e, "Nak failed");
            }
        }
        Dispatch::Rejected(meta, err) => {
            // the rejection record must be durable before we ack
            match handlers.record_rejection(&meta, &err).await {
                Ok(()) => {
                    if let Err(e) = delivery.ack().await {
                        warn!(consumer = class.name(), subject = %subject, error = %e, "Ack failed");
                    }
                }
                Err(e) => {
                    warn!(
                        consumer = class.name(),
                        subject = %subject,
                        error = %e,
                        "Failed to record rejection, rejecting for redelivery"
                    );
                    if let Err(e) = delivery.nak().await {
                        warn!(consumer = class.name(), subject = %subject, error = %e, "Nak failed");
                    }
                }
            }
        }
        Dispatch::Transient(err) => {
            warn!(
                consumer = class.name(),
                subject = %subject,
                attempt,
                error = %err,
                "Transient failure, rejecting for redelivery"
            );
            if let Err(e) = delivery.nak().await {
                warn!(consumer = class.name(), subject = %subject, error = %e, "Nak failed");
            }
        }
    }
}
