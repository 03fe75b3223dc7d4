use crate::Handle;
use gantry_util::Backoff;
use lapin::{Channel, Connection, ConnectionProperties};
use secure_string::SecureString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Maintains no more than one active connection to an AMQP broker, identified
/// by the given [`Handle`], and hands out fresh [`Channel`]s on demand.
///
/// Reconnection is fully encapsulated: whenever a channel is requested and
/// the current connection cannot produce one, the connection is discarded and
/// re-established with an exponential backoff. Callers should keep a clone of
/// the [`Gateway`] and request a new channel whenever the previous one stops
/// working; they should expect that a request may take a long or even
/// indefinite time, depending on broker availability.
pub struct Connector;

/// An asynchronous gateway to creating and retrieving fresh [`Channel`]s on
/// an internally maintained [`Connection`]. Cheaply clonable.
///
/// A gateway is created by [starting](Connector::start) a [`Connector`].
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    /// The globally unique name of this gateway, for logging purposes.
    name: Arc<str>,
    /// The non-sensitive identifier of the underlying [`Handle`].
    identifier: Arc<str>,
    /// The DSN of the broker this gateway connects to.
    dsn: SecureString,
    /// The current connection, if present.
    connection: AsyncMutex<Option<Connection>>,
    /// The backoff algorithm used between repeated connection attempts.
    backoff: Backoff,
}

impl Connector {
    /// Creates a [`Gateway`] for the given [`Handle`].
    ///
    /// No connection is attempted until the first channel is requested.
    pub fn start(handle: impl AsRef<Handle>) -> Gateway {
        let handle = handle.as_ref();

        Gateway {
            inner: Arc::new(GatewayInner {
                name: Self::compose_name(handle),
                identifier: Arc::from(handle.identifier()),
                dsn: handle.dsn().clone(),
                connection: AsyncMutex::new(None),
                backoff: Backoff::new(handle.backoff()),
            }),
        }
    }

    /// Composes a human-readable name for a gateway.
    fn compose_name(handle: &Handle) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "amqp:gateway:{}:{}",
            handle.name(),
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }
}

impl Gateway {
    /// Reports the name of this gateway.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Produces a fresh [`Channel`] on the internally maintained connection,
    /// re-establishing the connection as many times as it takes.
    ///
    /// Depending on broker availability this method may take arbitrarily long
    /// to return. Use [`channel_with_timeout`](Gateway::channel_with_timeout)
    /// to limit the waiting time.
    pub async fn channel(&self) -> Channel {
        // Grab the connection slot for the whole attempt sequence
        let mut connection_guard = self.inner.connection.lock().await;
        let mut optional_connection = connection_guard.take();

        loop {
            match self.try_create_channel(optional_connection).await {
                // Success: put the connection back and return the channel
                Ok((connection, channel)) => {
                    *connection_guard = Some(connection);
                    self.inner.backoff.settle();

                    return channel;
                }

                // Error: either there was no connection to begin with, or it
                // has gone bad; establish a fresh one before retrying
                Err(()) => {
                    optional_connection = self.establish_connection().await;
                }
            }
        }
    }

    /// Same as the [`channel`](Gateway::channel) method, but returns [`None`]
    /// if waiting for the [`Channel`] exceeds the given `timeout`.
    pub async fn channel_with_timeout(&self, timeout: Duration) -> Option<Channel> {
        tokio::time::timeout(timeout, self.channel()).await.ok()
    }

    /// Takes and closes the current connection, if any.
    pub async fn disconnect(&self) {
        let optional_connection = self.inner.connection.lock().await.take();

        if let Some(connection) = optional_connection {
            info!(
                name = self.inner.name.as_ref(),
                identifier = self.inner.identifier.as_ref(),
                "Closing the broker connection",
            );

            if let Err(error) = connection.close(0, "Disconnected").await {
                warn!(
                    name = self.inner.name.as_ref(),
                    identifier = self.inner.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to cleanly close the broker connection",
                );
            }
        }
    }

    /// Tries to create a channel on the given connection. On failure the
    /// connection is dropped as unusable.
    async fn try_create_channel(
        &self,
        optional_connection: Option<Connection>,
    ) -> Result<(Connection, Channel), ()> {
        let connection = optional_connection.ok_or(())?;

        match connection.create_channel().await {
            Ok(channel) => Ok((connection, channel)),

            Err(error) => {
                warn!(
                    name = self.inner.name.as_ref(),
                    identifier = self.inner.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to create a channel on the broker connection",
                );

                // The connection is obviously bad; let it drop
                self.inner.backoff.pause().await;

                Err(())
            }
        }
    }

    /// Attempts to establish a fresh connection to the broker.
    async fn establish_connection(&self) -> Option<Connection> {
        // Set up the connection to use the current Tokio context
        let connection_properties = ConnectionProperties::default()
            .with_executor(tokio_executor_trait::Tokio::current())
            .with_reactor(tokio_reactor_trait::Tokio);

        match Connection::connect(self.inner.dsn.unsecure(), connection_properties).await {
            Ok(connection) => {
                info!(
                    name = self.inner.name.as_ref(),
                    identifier = self.inner.identifier.as_ref(),
                    "Established a broker connection",
                );

                Some(connection)
            }

            // Likely no connectivity with the broker
            Err(error) => {
                warn!(
                    name = self.inner.name.as_ref(),
                    identifier = self.inner.identifier.as_ref(),
                    ?error,
                    error_message = %error,
                    "Failed to establish a broker connection",
                );

                self.inner.backoff.pause().await;

                None
            }
        }
    }
}
