//! Message-bus abstraction.
//!
//! Consumers and publishers talk to a [`MessageBus`] trait object so the
//! event pipeline can run against the real NATS JetStream backend in
//! production and an in-process backend in tests. Both backends provide the
//! same delivery semantics: at-least-once with explicit ack/nak, a bounded
//! redelivery count, and publish-side dedup keyed on the event id.

pub mod memory;
pub mod nats;
pub mod streams;

pub use memory::InMemoryBus;
pub use nats::NatsBus;
pub use streams::BusProfile;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus connect failed: {0}")]
    Connect(String),
    #[error("stream setup failed: {0}")]
    Stream(String),
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("consume failed: {0}")]
    Consume(String),
    #[error("ack failed: {0}")]
    Ack(String),
}

/// Declarative description of a stream and its retention.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
    pub max_age: Duration,
    /// Publishes with a repeated event id inside this window are dropped.
    pub duplicate_window: Duration,
}

/// Declarative description of a durable pull consumer.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    pub stream: String,
    pub durable: String,
    /// Subject filter; empty means the whole stream.
    pub filter_subject: String,
    /// Redelivery ceiling, after which the message is parked.
    pub max_deliver: i64,
    /// How long a delivery may stay unacked before redelivery.
    pub ack_wait: Duration,
}

/// One message handed to a consumer, with its ack handle attached.
pub struct Delivery {
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1 for the first delivery, incremented on each redelivery.
    pub deliveries: u64,
    acker: Box<dyn Acker>,
}

impl Delivery {
    pub fn new(subject: String, payload: Vec<u8>, deliveries: u64, acker: Box<dyn Acker>) -> Self {
        Delivery {
            subject,
            payload,
            deliveries,
            acker,
        }
    }

    /// Confirm the message as handled; it will not be redelivered.
    pub async fn ack(self) -> Result<(), BusError> {
        self.acker.ack().await
    }

    /// Reject the message for redelivery.
    pub async fn nak(self) -> Result<(), BusError> {
        self.acker.nak().await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("subject", &self.subject)
            .field("payload_len", &self.payload.len())
            .field("deliveries", &self.deliveries)
            .finish()
    }
}

#[async_trait]
pub trait Acker: Send + Sync {
    async fn ack(self: Box<Self>) -> Result<(), BusError>;
    async fn nak(self: Box<Self>) -> Result<(), BusError>;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Create the stream if missing; update its retention if present.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BusError>;

    /// Publish a payload; `event_id` is the dedup key within the stream's
    /// duplicate window.
    async fn publish(
        &self,
        subject: &str,
        event_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;

    /// Open (or resume) a durable pull subscription.
    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Box<dyn BusSubscription>, BusError>;

    /// Backend reachability, for readiness reporting.
    async fn healthy(&self) -> bool;
}

#[async_trait]
pub trait BusSubscription: Send {
    /// Fetch up to `max` deliveries, waiting at most `wait` for the first.
    async fn fetch(&mut self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError>;
}
