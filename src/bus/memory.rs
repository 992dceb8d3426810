//! In-process bus backend with the same delivery semantics as the real one:
//! publish-side dedup inside the duplicate window, explicit ack/nak, ack-wait
//! redelivery, and a max-deliver ceiling. Used by tests and by local runs
//! without a bus.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{
    Acker, BusError, BusSubscription, ConsumerSpec, Delivery, MessageBus, StreamSpec,
};

#[derive(Clone, Default)]
pub struct InMemoryBus {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, StreamState>,
}

struct StreamState {
    spec: StreamSpec,
    messages: Vec<StoredMessage>,
    /// event_id -> publish instant, pruned past the duplicate window.
    dedup: HashMap<String, Instant>,
    consumers: HashMap<String, ConsumerState>,
}

struct StoredMessage {
    subject: String,
    payload: Vec<u8>,
}

struct ConsumerState {
    spec: ConsumerSpec,
    /// Per-message delivery bookkeeping, keyed by message sequence.
    deliveries: HashMap<usize, MessageState>,
}

#[derive(Default)]
struct MessageState {
    delivered: u64,
    acked: bool,
    inflight_until: Option<Instant>,
}

/// Token-wise subject match: `*` matches one token, `>` matches the rest.
fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pat = pattern.split('.');
    let mut sub = subject.split('.');
    loop {
        match (pat.next(), sub.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(p), Some(s)) if p == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn collect(
        &self,
        stream_name: &str,
        durable: &str,
        max: usize,
        now: Instant,
    ) -> Result<Vec<Delivery>, BusError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .get_mut(stream_name)
            .ok_or_else(|| BusError::Consume(format!("unknown stream {}", stream_name)))?;

        // split borrow: messages are read-only here, consumer state mutates
        let messages = &stream.messages;
        let consumer = stream
            .consumers
            .get_mut(durable)
            .ok_or_else(|| BusError::Consume(format!("unknown consumer {}", durable)))?;

        let mut batch = Vec::new();
        for (seq, msg) in messages.iter().enumerate() {
            if batch.len() >= max {
                break;
            }
            if !consumer.spec.filter_subject.is_empty()
                && !subject_matches(&consumer.spec.filter_subject, &msg.subject)
            {
                continue;
            }
            let state = consumer.deliveries.entry(seq).or_default();
            if state.acked {
                continue;
            }
            if let Some(until) = state.inflight_until {
                if until > now {
                    continue;
                }
            }
            if state.delivered >= consumer.spec.max_deliver as u64 {
                continue;
            }
            state.delivered += 1;
            state.inflight_until = Some(now + consumer.spec.ack_wait);

            batch.push(Delivery::new(
                msg.subject.clone(),
                msg.payload.clone(),
                state.delivered,
                Box::new(MemoryAcker {
                    inner: self.inner.clone(),
                    stream: stream_name.to_string(),
                    durable: durable.to_string(),
                    seq,
                }),
            ));
        }
        Ok(batch)
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .streams
            .entry(spec.name.clone())
            .and_modify(|s| s.spec = spec.clone())
            .or_insert_with(|| StreamState {
                spec: spec.clone(),
                messages: Vec::new(),
                dedup: HashMap::new(),
                consumers: HashMap::new(),
            });
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        event_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .values_mut()
            .find(|s| s.spec.subjects.iter().any(|p| subject_matches(p, subject)))
            .ok_or_else(|| BusError::Publish(format!("no stream binds subject {}", subject)))?;

        let now = Instant::now();
        let window = stream.spec.duplicate_window;
        stream.dedup.retain(|_, at| now.duration_since(*at) < window);
        if stream.dedup.contains_key(event_id) {
            // duplicate inside the window: silently dropped
            return Ok(());
        }
        stream.dedup.insert(event_id.to_string(), now);
        stream.messages.push(StoredMessage {
            subject: subject.to_string(),
            payload,
        });
        Ok(())
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Box<dyn BusSubscription>, BusError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner
            .streams
            .get_mut(&spec.stream)
            .ok_or_else(|| BusError::Stream(format!("unknown stream {}", spec.stream)))?;
        stream
            .consumers
            .entry(spec.durable.clone())
            .or_insert_with(|| ConsumerState {
                spec: spec.clone(),
                deliveries: HashMap::new(),
            });
        Ok(Box::new(MemorySubscription {
            bus: self.clone(),
            stream: spec.stream.clone(),
            durable: spec.durable.clone(),
        }))
    }

    async fn healthy(&self) -> bool {
        true
    }
}

struct MemorySubscription {
    bus: InMemoryBus,
    stream: String,
    durable: String,
}

#[async_trait]
impl BusSubscription for MemorySubscription {
    async fn fetch(&mut self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError> {
        let deadline = Instant::now() + wait;
        loop {
            let now = Instant::now();
            let batch = self.bus.collect(&self.stream, &self.durable, max, now)?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

struct MemoryAcker {
    inner: Arc<Mutex<Inner>>,
    stream: String,
    durable: String,
    seq: usize,
}

impl MemoryAcker {
    fn with_state<F: FnOnce(&mut MessageState)>(&self, f: F) -> Result<(), BusError> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner
            .streams
            .get_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.durable))
            .and_then(|c| c.deliveries.get_mut(&self.seq))
            .ok_or_else(|| BusError::Ack(format!("delivery {} no longer tracked", self.seq)))?;
        f(state);
        Ok(())
    }
}

#[async_trait]
impl Acker for MemoryAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.with_state(|state| {
            state.acked = true;
            state.inflight_until = None;
        })
    }

    async fn nak(self: Box<Self>) -> Result<(), BusError> {
        self.with_state(|state| {
            state.inflight_until = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_spec() -> StreamSpec {
        StreamSpec {
            name: "TEST".to_string(),
            subjects: vec!["trading.orders.*".to_string()],
            max_age: Duration::from_secs(3600),
            duplicate_window: Duration::from_millis(200),
        }
    }

    fn consumer_spec() -> ConsumerSpec {
        ConsumerSpec {
            stream: "TEST".to_string(),
            durable: "t-orders".to_string(),
            filter_subject: "trading.orders.*".to_string(),
            max_deliver: 3,
            ack_wait: Duration::from_millis(50),
        }
    }

    #[test]
    fn test_subject_matching() {
        assert!(subject_matches("trading.orders.*", "trading.orders.filled"));
        assert!(!subject_matches("trading.orders.*", "trading.balance.usdt"));
        assert!(!subject_matches("trading.orders.*", "trading.orders.a.b"));
        assert!(subject_matches("system.>", "system.a.b.c"));
        assert!(subject_matches("trading.signals", "trading.signals"));
        assert!(!subject_matches("trading.signals", "trading.signals.x"));
    }

    #[tokio::test]
    async fn test_publish_fetch_ack() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut sub = bus.subscribe(&consumer_spec()).await.unwrap();

        bus.publish("trading.orders.filled", "evt-1", b"hello".to_vec())
            .await
            .unwrap();

        let batch = sub.fetch(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload, b"hello");
        assert_eq!(batch[0].deliveries, 1);
        for d in batch {
            d.ack().await.unwrap();
        }

        let batch = sub.fetch(10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty(), "acked message must not be redelivered");
    }

    #[tokio::test]
    async fn test_duplicate_event_id_dropped_inside_window() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut sub = bus.subscribe(&consumer_spec()).await.unwrap();

        bus.publish("trading.orders.filled", "evt-dup", b"a".to_vec())
            .await
            .unwrap();
        bus.publish("trading.orders.filled", "evt-dup", b"a".to_vec())
            .await
            .unwrap();

        let batch = sub.fetch(10, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1, "second publish should be deduped");
    }

    #[tokio::test]
    async fn test_nak_redelivers_with_incremented_count() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut sub = bus.subscribe(&consumer_spec()).await.unwrap();

        bus.publish("trading.orders.filled", "evt-1", b"x".to_vec())
            .await
            .unwrap();

        let mut batch = sub.fetch(1, Duration::from_millis(100)).await.unwrap();
        batch.pop().unwrap().nak().await.unwrap();

        let batch = sub.fetch(1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].deliveries, 2);
    }

    #[tokio::test]
    async fn test_max_deliver_parks_message() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut sub = bus.subscribe(&consumer_spec()).await.unwrap();

        bus.publish("trading.orders.filled", "evt-1", b"x".to_vec())
            .await
            .unwrap();

        for _ in 0..3 {
            let mut batch = sub.fetch(1, Duration::from_millis(100)).await.unwrap();
            assert_eq!(batch.len(), 1);
            batch.pop().unwrap().nak().await.unwrap();
        }

        let batch = sub.fetch(1, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty(), "message past max_deliver must be parked");
    }

    #[tokio::test]
    async fn test_ack_wait_expiry_redelivers() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut sub = bus.subscribe(&consumer_spec()).await.unwrap();

        bus.publish("trading.orders.filled", "evt-1", b"x".to_vec())
            .await
            .unwrap();

        // fetch without acking, then let the ack window lapse
        let batch = sub.fetch(1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1);
        drop(batch);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let batch = sub.fetch(1, Duration::from_millis(100)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].deliveries, 2);
    }

    #[tokio::test]
    async fn test_independent_durables_each_see_the_message() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let mut a = bus.subscribe(&consumer_spec()).await.unwrap();
        let mut b = bus
            .subscribe(&ConsumerSpec {
                durable: "t-audit".to_string(),
                ..consumer_spec()
            })
            .await
            .unwrap();

        bus.publish("trading.orders.filled", "evt-1", b"x".to_vec())
            .await
            .unwrap();

        assert_eq!(a.fetch(1, Duration::from_millis(100)).await.unwrap().len(), 1);
        assert_eq!(b.fetch(1, Duration::from_millis(100)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unbound_subject_rejected() {
        let bus = InMemoryBus::new();
        bus.ensure_stream(&stream_spec()).await.unwrap();
        let err = bus.publish("other.subject", "evt-1", b"x".to_vec()).await;
        assert!(matches!(err, Err(BusError::Publish(_))));
    }
}
