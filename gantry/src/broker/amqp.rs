use crate::broker::dispatch::Dispatch;
use crate::broker::queue::{BrokerQueue, InboundMessage, ReceiveError};
use crate::broker::{Broker, BrokerError, ExchangeKind, QueueSpec};
use crate::connector::{Connector, Gateway};
use crate::util::field_table::{byte_headers, to_field_table};
use crate::{Handle, NodeConfig};
use async_trait::async_trait;
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicPublishOptions,
    BasicQosOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::{Channel, Consumer, Error as LapinError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// A lapin-backed [`Broker`] for real RabbitMQ clusters.
///
/// The underlying connection is maintained by a [`Connector`]; channels are
/// created on demand, one per declared queue plus one cached channel for
/// publishing.
pub struct AmqpBroker {
    gateway: Gateway,
    publish_channel: AsyncMutex<Option<Channel>>,
    prefetch_count: Option<u16>,
}

/// A consumer handle onto one RabbitMQ queue.
pub struct AmqpQueue {
    name: Arc<str>,
    channel: Channel,
    consumer: AsyncMutex<Consumer>,
    consumer_tag: Arc<str>,
    disposed: CancellationToken,
}

impl AmqpBroker {
    /// Starts a [`Connector`] for the given [`Handle`] and wraps it into a
    /// broker.
    pub fn start(handle: impl AsRef<Handle>) -> Self {
        Self::new(Connector::start(handle))
    }

    /// Starts a broker as configured by the given [`NodeConfig`].
    pub fn from_config(config: &NodeConfig) -> Self {
        let mut broker = Self::start(config.handle());
        broker.prefetch_count = config.prefetch_count();

        broker
    }

    /// Wraps an existing [`Gateway`] into a broker.
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway,
            publish_channel: AsyncMutex::new(None),
            prefetch_count: None,
        }
    }

    /// Returns this broker with the given per-consumer prefetch count.
    pub fn with_prefetch_count(mut self, prefetch_count: u16) -> Self {
        self.prefetch_count = Some(prefetch_count);

        self
    }

    /// Returns the cached publishing channel, replacing it when the previous
    /// one is no longer connected.
    async fn fresh_publish_channel(&self) -> Channel {
        let mut channel_guard = self.publish_channel.lock().await;

        match channel_guard.as_ref() {
            Some(channel) if channel.status().connected() => channel.clone(),
            _ => {
                let channel = self.gateway.channel().await;
                *channel_guard = Some(channel.clone());

                channel
            }
        }
    }

    /// Composes a globally unique consumer tag.
    fn compose_consumer_tag(queue: &str) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "gantry:consumer:{}:{}",
            queue,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), BrokerError> {
        let channel = self.gateway.channel().await;

        channel
            .exchange_declare(
                name,
                lapin_exchange_kind(kind),
                ExchangeDeclareOptions {
                    passive: false,
                    durable,
                    auto_delete,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|error| declaration_error(name, error))
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<Arc<dyn BrokerQueue>, BrokerError> {
        let channel = self.gateway.channel().await;

        // Apply back-pressure before the consumer exists
        if let Some(prefetch_count) = self.prefetch_count {
            channel
                .basic_qos(prefetch_count, BasicQosOptions { global: false })
                .await
                .map_err(|error| declaration_error(&spec.name, error))?;
        }

        let mut args = FieldTable::default();
        for (key, value) in &spec.args {
            args.insert(
                ShortString::from(key.as_str()),
                AMQPValue::LongString(LongString::from(value.as_str())),
            );
        }

        let queue = channel
            .queue_declare(
                &spec.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: spec.durable,
                    exclusive: spec.exclusive,
                    auto_delete: spec.auto_delete,
                    nowait: false,
                },
                args,
            )
            .await
            .map_err(|error| declaration_error(&spec.name, error))?;

        if let Some((exchange, routing_key)) = &spec.binding {
            channel
                .queue_bind(
                    queue.name().as_str(),
                    exchange,
                    routing_key,
                    QueueBindOptions { nowait: false },
                    FieldTable::default(),
                )
                .await
                .map_err(|error| declaration_error(&spec.name, error))?;
        }

        let consumer_tag = Self::compose_consumer_tag(&spec.name);
        let consumer = channel
            .basic_consume(
                queue.name().as_str(),
                &consumer_tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
            .map_err(|error| declaration_error(&spec.name, error))?;

        Ok(Arc::new(AmqpQueue {
            name: Arc::from(spec.name.as_str()),
            channel,
            consumer: AsyncMutex::new(consumer),
            consumer_tag,
            disposed: CancellationToken::new(),
        }))
    }

    async fn publish(&self, dispatch: Dispatch) -> Result<(), BrokerError> {
        let (exchange, routing_key, correlation_id, reply_to, headers, body) =
            dispatch.into_parts();

        let mut properties =
            lapin::protocol::basic::AMQPProperties::default().with_headers(to_field_table(&headers));
        if let Some(correlation_id) = correlation_id {
            properties = properties.with_correlation_id(ShortString::from(correlation_id.to_string()));
        }
        if let Some(reply_to) = reply_to {
            properties = properties.with_reply_to(ShortString::from(reply_to));
        }

        let channel = self.fresh_publish_channel().await;

        channel
            .basic_publish(
                &exchange,
                &routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await
            .map_err(|error| BrokerError::Publish(error.to_string()))?;

        Ok(())
    }
}

impl AmqpQueue {
    /// Pumps the consumer until it yields a usable delivery.
    async fn next_delivery(&self) -> Result<InboundMessage, ReceiveError> {
        let mut consumer = self.consumer.lock().await;

        loop {
            match consumer.next().await {
                Some(Ok(delivery)) => {
                    self.finalize(&delivery).await;

                    return Ok(convert_delivery(delivery));
                }

                // A consumer error is transient; the next poll may succeed
                Some(Err(error)) => {
                    warn!(
                        queue = self.name.as_ref(),
                        ?error,
                        error_message = %error,
                        "Received an error from a broker consumer",
                    );
                }

                None => return Err(ReceiveError::Closed),
            }
        }
    }

    /// Acknowledges the given delivery right away; the runtime has no
    /// redelivery protocol of its own, so a received message is a handled
    /// message as far as the broker is concerned.
    async fn finalize(&self, delivery: &Delivery) {
        if let Err(error) = delivery.acker.ack(BasicAckOptions::default()).await {
            warn!(
                queue = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Failed to acknowledge a delivery",
            );
        }
    }
}

#[async_trait]
impl BrokerQueue for AmqpQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn receive(&self) -> Result<InboundMessage, ReceiveError> {
        if self.disposed.is_cancelled() {
            return Err(ReceiveError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => Err(ReceiveError::Cancelled),
            outcome = self.next_delivery() => outcome,
        }
    }

    async fn receive_timeout(&self, timeout: Duration) -> Result<InboundMessage, ReceiveError> {
        match tokio::time::timeout(timeout, self.receive()).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(ReceiveError::Timeout),
        }
    }

    async fn receive_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InboundMessage, ReceiveError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ReceiveError::Cancelled),
            outcome = self.receive() => outcome,
        }
    }

    async fn bind(&self, exchange: &str, routing_key: &str) -> Result<(), BrokerError> {
        self.channel
            .queue_bind(
                &self.name,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
            .map_err(|error| declaration_error(&self.name, error))
    }

    async fn dispose(&self) {
        if self.disposed.is_cancelled() {
            return;
        }

        self.disposed.cancel();

        let cancel_result = self
            .channel
            .basic_cancel(&self.consumer_tag, BasicCancelOptions { nowait: false })
            .await;

        if let Err(error) = cancel_result {
            warn!(
                queue = self.name.as_ref(),
                ?error,
                error_message = %error,
                "Failed to cleanly cancel a broker consumer",
            );
        }
    }
}

/// Maps the runtime's exchange kinds onto lapin's.
fn lapin_exchange_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
        ExchangeKind::Topic => lapin::ExchangeKind::Topic,
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
    }
}

/// Maps a lapin declaration failure onto [`BrokerError`], surfacing an
/// exclusivity conflict as [`BrokerError::ResourceLocked`].
fn declaration_error(resource: &str, error: LapinError) -> BrokerError {
    // The 405 reply code spells RESOURCE-LOCKED in the broker's reply text
    let text = error.to_string();
    if text.contains("RESOURCE-LOCKED") || text.contains("RESOURCE_LOCKED") {
        return BrokerError::ResourceLocked(resource.to_string());
    }

    BrokerError::Declaration(text)
}

/// Translates a lapin [`Delivery`] into the runtime's [`InboundMessage`].
fn convert_delivery(delivery: Delivery) -> InboundMessage {
    let correlation_id = delivery
        .properties
        .correlation_id()
        .as_ref()
        .and_then(|value| Uuid::parse_str(value.as_str()).ok());
    let reply_to = delivery
        .properties
        .reply_to()
        .as_ref()
        .map(|value| value.as_str().to_string());
    let headers = byte_headers(&delivery.properties);

    InboundMessage::new(
        delivery.delivery_tag,
        correlation_id,
        reply_to,
        headers,
        delivery.data,
    )
}
