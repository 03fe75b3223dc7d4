use async_trait::async_trait;
use futures::stream::Stream;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::BrokerError;

/// Represents an **incoming** broker delivery, before it is wrapped into an
/// [`Envelope`](crate::Envelope).
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub(crate) delivery_tag: u64,
    pub(crate) correlation_id: Option<Uuid>,
    pub(crate) reply_to: Option<String>,
    pub(crate) headers: HashMap<String, Vec<u8>>,
    pub(crate) body: Vec<u8>,
}

impl InboundMessage {
    /// Creates a new inbound message from its parts. This is the constructor
    /// that [`Broker`](crate::Broker) implementations use when translating
    /// their native delivery type.
    pub fn new(
        delivery_tag: u64,
        correlation_id: Option<Uuid>,
        reply_to: Option<String>,
        headers: HashMap<String, Vec<u8>>,
        body: Vec<u8>,
    ) -> Self {
        Self {
            delivery_tag,
            correlation_id,
            reply_to,
            headers,
            body,
        }
    }

    /// Reports the broker-assigned delivery tag.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }

    /// Reports the correlation ID carried by the delivery, if any.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Reports the reply-to routing key carried by the delivery, if any.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Exposes the byte-keyed headers of the delivery.
    pub fn headers(&self) -> &HashMap<String, Vec<u8>> {
        &self.headers
    }

    /// Exposes the payload of the delivery.
    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

/// Represents the ways a receive can conclude without a message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveError {
    /// The given timeout elapsed before a message arrived.
    #[error("timed out waiting for a message")]
    Timeout,
    /// The given cancel token was tripped, or the queue handle was disposed.
    #[error("the receive was cancelled")]
    Cancelled,
    /// The queue is permanently out of messages (deleted on the broker, or
    /// the broker is gone).
    #[error("the queue is closed")]
    Closed,
}

/// A cancellable, timed source of inbound messages from one broker queue.
///
/// A handle owns its broker-side consumer: at most one live queue handle
/// exists per service at a time, and [`dispose`](BrokerQueue::dispose)
/// releases the consumer and fails outstanding receives with
/// [`ReceiveError::Cancelled`].
///
/// Messages are yielded in the broker's arrival order per routing key; the
/// handle never reorders.
#[async_trait]
pub trait BrokerQueue: Send + Sync {
    /// Reports the queue name.
    fn name(&self) -> &str;

    /// Suspends until a message is available, then yields it whole.
    async fn receive(&self) -> Result<InboundMessage, ReceiveError>;

    /// As [`receive`](BrokerQueue::receive), but fails with
    /// [`ReceiveError::Timeout`] when the deadline elapses first.
    async fn receive_timeout(&self, timeout: Duration) -> Result<InboundMessage, ReceiveError>;

    /// As [`receive`](BrokerQueue::receive), but fails with
    /// [`ReceiveError::Cancelled`] when the given token trips first.
    async fn receive_cancel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<InboundMessage, ReceiveError>;

    /// Adds one more binding to this queue. Repeating an identical binding is
    /// a no-op.
    async fn bind(&self, exchange: &str, routing_key: &str) -> Result<(), BrokerError>;

    /// Releases the broker-side consumer and cancels outstanding receives.
    /// Safe to call any number of times.
    async fn dispose(&self);
}

/// Adapts the given queue handle into an infinite, non-restartable stream of
/// inbound messages.
///
/// The stream ends when the queue is disposed or permanently closed; it is
/// not recoverable past that point.
pub fn message_stream(queue: Arc<dyn BrokerQueue>) -> impl Stream<Item = InboundMessage> {
    futures::stream::unfold(queue, |queue| async move {
        match queue.receive().await {
            Ok(message) => Some((message, queue)),
            Err(_) => None,
        }
    })
}
