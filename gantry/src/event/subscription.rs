use crate::broker::queue::{BrokerQueue, InboundMessage, ReceiveError};
use crate::event::observer::EventObserver;
use crate::proto::header::{EventHeader, HeaderError, HEADER_EVENT};
use crate::serializer::registry::event_serializers;
use crate::{Envelope, EventAddress, Node};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Represents a failure to decode one inbound message into an event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    /// The message carries no event header.
    #[error("the message carries no event header")]
    MissingHeader,
    /// The event header line is malformed.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// The message names a protocol version this runtime does not speak.
    #[error("unsupported event protocol version '{0}'")]
    UnsupportedVersion(String),
    /// The message names a serializer that is not registered.
    #[error("unsupported event serializer '{0}'")]
    UnsupportedSerializer(String),
    /// The payload could not be decoded by the named serializer.
    #[error("failed to decode an event payload: {0}")]
    Payload(String),
}

/// A typed, lazy stream of events from one event-address queue.
///
/// Pull-based receives silently skip messages that fail decoding and keep
/// going until a decodable event arrives, the timeout elapses, or the cancel
/// token trips. Push-based delivery through [`observe`](EventSubscription::observe)
/// instead surfaces decode failures to the observer.
pub struct EventSubscription<T> {
    name: Arc<str>,
    address: EventAddress,
    queue: Arc<dyn BrokerQueue>,
    node: Node,
    _payload: PhantomData<fn() -> T>,
}

impl<T> EventSubscription<T> {
    /// Wraps the given queue into a subscription.
    pub(crate) fn new(node: Node, address: EventAddress, queue: Arc<dyn BrokerQueue>) -> Self {
        Self {
            name: Self::compose_name(&address),
            address,
            queue,
            node,
            _payload: PhantomData,
        }
    }

    /// Composes a globally unique, human-readable name for a subscription.
    fn compose_name(address: &EventAddress) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "subscription:{}:{}",
            address,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Reports the name of this subscription.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the event address this subscription listens on.
    pub fn address(&self) -> &EventAddress {
        &self.address
    }

    /// Releases the underlying queue. Safe to call any number of times;
    /// outstanding receives fail with [`ReceiveError::Cancelled`] and
    /// observers receive `on_completed`.
    pub async fn dispose(&self) {
        self.queue.dispose().await;
    }
}

impl<T> EventSubscription<T>
where
    T: DeserializeOwned,
{
    /// Receives the next decodable event, waiting as long as it takes.
    pub async fn receive(&self) -> Result<T, ReceiveError> {
        loop {
            let message = self.queue.receive().await?;

            match decode(message, &self.node) {
                Ok(event) => return Ok(event),
                Err(error) => self.discard(error),
            }
        }
    }

    /// As [`receive`](EventSubscription::receive), but fails with
    /// [`ReceiveError::Timeout`] when a single underlying receive exceeds the
    /// given timeout.
    ///
    /// The timeout paces each wait for a message, not the whole call: a
    /// stream of undecodable messages arriving faster than the timeout keeps
    /// the call alive.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<T, ReceiveError> {
        loop {
            let message = self.queue.receive_timeout(timeout).await?;

            match decode(message, &self.node) {
                Ok(event) => return Ok(event),
                Err(error) => self.discard(error),
            }
        }
    }

    /// As [`receive`](EventSubscription::receive), but fails with
    /// [`ReceiveError::Cancelled`] when the given token trips first.
    pub async fn receive_cancel(&self, cancel: &CancellationToken) -> Result<T, ReceiveError> {
        loop {
            let message = self.queue.receive_cancel(cancel).await?;

            match decode(message, &self.node) {
                Ok(event) => return Ok(event),
                Err(error) => self.discard(error),
            }
        }
    }

    /// Reports and drops one undecodable message.
    fn discard(&self, error: EventDecodeError) {
        warn!(
            alert = true,
            subscription = self.name.as_ref(),
            ?error,
            error_message = %error,
            "Discarded an undecodable event message",
        );
    }
}

impl<T> EventSubscription<T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Starts push delivery into the given observer.
    ///
    /// Every decoded event is delivered through `on_next`. A decode failure
    /// is delivered through `on_error` and ends the delivery; a cleanly
    /// closed or disposed queue ends it through `on_completed`.
    pub fn observe(&self, observer: Arc<dyn EventObserver<T>>) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let node = self.node.clone();

        tokio::spawn(async move {
            loop {
                match queue.receive().await {
                    Ok(message) => match decode::<T>(message, &node) {
                        Ok(event) => observer.on_next(event),
                        Err(error) => {
                            observer.on_error(error);

                            return;
                        }
                    },

                    Err(ReceiveError::Closed) | Err(ReceiveError::Cancelled) => {
                        observer.on_completed();

                        return;
                    }

                    // A plain receive cannot time out; keep pulling
                    Err(ReceiveError::Timeout) => {}
                }
            }
        })
    }
}

/// Runs one message through the decoding pipeline: envelope, event header,
/// version check, serializer lookup, payload decode.
fn decode<T>(message: InboundMessage, node: &Node) -> Result<T, EventDecodeError>
where
    T: DeserializeOwned,
{
    let envelope = Envelope::new(message, node.clone());

    let line = envelope
        .header_text(HEADER_EVENT)
        .ok_or(EventDecodeError::MissingHeader)?;
    let header: EventHeader = line.parse()?;

    if !header.is_current_version() {
        return Err(EventDecodeError::UnsupportedVersion(
            header.version().to_string(),
        ));
    }

    let serializer = event_serializers()
        .get(header.serializer())
        .ok_or_else(|| EventDecodeError::UnsupportedSerializer(header.serializer().to_string()))?;

    let value = serializer
        .read(envelope.body())
        .map_err(|error| EventDecodeError::Payload(error.to_string()))?;

    serde_json::from_value(value).map_err(|error| EventDecodeError::Payload(error.to_string()))
}
