//! NATS JetStream backend.
//!
//! Streams are created idempotently at startup; consumers are durable pull
//! consumers so a restarted service resumes where it left off. Publish-side
//! dedup rides on the `Nats-Msg-Id` header and the stream's duplicate window.

use async_nats::jetstream::{self, consumer::pull, consumer::AckPolicy, AckKind};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use super::{
    Acker, BusError, BusSubscription, ConsumerSpec, Delivery, MessageBus, StreamSpec,
};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

pub struct NatsBus {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsBus {
    pub async fn connect(url: &str, client_id: &str) -> Result<Self, BusError> {
        let client = async_nats::ConnectOptions::new()
            .name(client_id)
            .connect(url)
            .await
            .map_err(|e| BusError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());
        info!(url = %url, client_id = %client_id, "Connected to message bus");
        Ok(NatsBus { client, jetstream })
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), BusError> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: spec.name.clone(),
                subjects: spec.subjects.clone(),
                max_age: spec.max_age,
                duplicate_window: spec.duplicate_window,
                ..Default::default()
            })
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;
        debug!(stream = %spec.name, subjects = ?spec.subjects, "Stream ensured");
        Ok(())
    }

    async fn publish(
        &self,
        subject: &str,
        event_id: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert("Nats-Msg-Id", event_id);
        let ack = self
            .jetstream
            .publish_with_headers(subject.to_string(), headers, payload.into())
            .await
            .map_err(|e| BusError::Publish(e.to_string()))?;
        ack.await.map_err(|e| BusError::Publish(e.to_string()))?;
        Ok(())
    }

    async fn subscribe(&self, spec: &ConsumerSpec) -> Result<Box<dyn BusSubscription>, BusError> {
        let stream = self
            .jetstream
            .get_stream(&spec.stream)
            .await
            .map_err(|e| BusError::Stream(e.to_string()))?;
        let consumer = stream
            .get_or_create_consumer(
                &spec.durable,
                pull::Config {
                    durable_name: Some(spec.durable.clone()),
                    filter_subject: spec.filter_subject.clone(),
                    ack_policy: AckPolicy::Explicit,
                    max_deliver: spec.max_deliver,
                    ack_wait: spec.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;
        debug!(stream = %spec.stream, durable = %spec.durable, "Durable consumer ready");
        Ok(Box::new(NatsSubscription { consumer }))
    }

    async fn healthy(&self) -> bool {
        if self.client.connection_state() != async_nats::connection::State::Connected {
            return false;
        }
        matches!(
            tokio::time::timeout(HEALTH_TIMEOUT, self.jetstream.query_account()).await,
            Ok(Ok(_))
        )
    }
}

struct NatsSubscription {
    consumer: jetstream::consumer::Consumer<pull::Config>,
}

#[async_trait]
impl BusSubscription for NatsSubscription {
    async fn fetch(&mut self, max: usize, wait: Duration) -> Result<Vec<Delivery>, BusError> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(max)
            .expires(wait)
            .messages()
            .await
            .map_err(|e| BusError::Consume(e.to_string()))?;

        let mut batch = Vec::new();
        while let Some(msg) = messages.next().await {
            let msg = msg.map_err(|e| BusError::Consume(e.to_string()))?;
            let deliveries = msg.info().map(|i| i.delivered as u64).unwrap_or(1);
            batch.push(Delivery::new(
                msg.subject.to_string(),
                msg.payload.to_vec(),
                deliveries,
                Box::new(NatsAcker { msg }),
            ));
        }
        Ok(batch)
    }
}

struct NatsAcker {
    msg: jetstream::Message,
}

#[async_trait]
impl Acker for NatsAcker {
    async fn ack(self: Box<Self>) -> Result<(), BusError> {
        self.msg
            .ack()
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }

    async fn nak(self: Box<Self>) -> Result<(), BusError> {
        self.msg
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| BusError::Ack(e.to_string()))
    }
}
