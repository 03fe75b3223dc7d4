use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub mod amqp;
pub mod dispatch;
pub mod memory;
pub mod queue;

use self::dispatch::Dispatch;
use self::queue::BrokerQueue;

/// The kinds of exchanges the runtime declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Routes on an exact routing-key match.
    Direct,
    /// Routes on a routing-key pattern match (`*`, `#` wildcards).
    Topic,
    /// Routes every message to every bound queue.
    Fanout,
}

impl ExchangeKind {
    /// Reports the wire name of this exchange kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Topic => "topic",
            Self::Fanout => "fanout",
        }
    }
}

/// Describes a queue to be declared on the broker, along with its optional
/// initial binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    /// The queue name.
    pub name: String,
    /// Whether the queue survives a broker restart.
    pub durable: bool,
    /// Whether the queue may only be consumed by its declaring connection.
    /// A second exclusive declaration of the same name fails with
    /// [`BrokerError::ResourceLocked`].
    pub exclusive: bool,
    /// Whether the broker deletes the queue once its last consumer is gone.
    pub auto_delete: bool,
    /// The exchange and routing key to bind the queue to, if any. A queue
    /// without a binding is reachable through the default exchange only.
    pub binding: Option<(String, String)>,
    /// Extra broker-specific declaration arguments.
    pub args: HashMap<String, String>,
}

impl QueueSpec {
    /// Creates a spec for a plain, unbound queue reachable through the
    /// default exchange: non-durable, non-exclusive, non-auto-deleting.
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            exclusive: false,
            auto_delete: false,
            binding: None,
            args: HashMap::new(),
        }
    }

    /// Returns this spec with the given binding.
    pub fn bound_to(mut self, exchange: impl Into<String>, routing_key: impl Into<String>) -> Self {
        self.binding = Some((exchange.into(), routing_key.into()));

        self
    }

    /// Returns this spec with the `durable` flag set.
    pub fn durable(mut self) -> Self {
        self.durable = true;

        self
    }

    /// Returns this spec with the `exclusive` flag set.
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;

        self
    }

    /// Returns this spec with the `auto_delete` flag set.
    pub fn auto_delete(mut self) -> Self {
        self.auto_delete = true;

        self
    }
}

/// Represents a failure to declare a broker resource or publish a message.
#[derive(Error, Debug)]
pub enum BrokerError {
    /// The broker refused a declaration (mismatched flags, bad name, lost
    /// connection mid-declare).
    #[error("the broker refused a declaration: {0}")]
    Declaration(String),
    /// The named resource is held exclusively by another consumer.
    #[error("the resource '{0}' is held exclusively by another consumer")]
    ResourceLocked(String),
    /// The message targets an exchange that has not been declared.
    #[error("unknown exchange '{0}'")]
    UnknownExchange(String),
    /// The message could not be published.
    #[error("failed to publish a message: {0}")]
    Publish(String),
}

/// The broker-side surface the runtime is built against.
///
/// Two implementations ship with this crate: the lapin-backed
/// [`AmqpBroker`](amqp::AmqpBroker) for real RabbitMQ clusters, and the
/// in-process [`MemoryBroker`](memory::MemoryBroker) for tests and local
/// development.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Declares an exchange. Redeclaring an existing exchange with the same
    /// parameters is a no-op.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
        auto_delete: bool,
    ) -> Result<(), BrokerError>;

    /// Declares a queue (and its binding, if the spec carries one) and starts
    /// consuming from it. The returned handle owns the consumer.
    async fn declare_queue(&self, spec: QueueSpec) -> Result<Arc<dyn BrokerQueue>, BrokerError>;

    /// Publishes the given message. An empty exchange name addresses the
    /// default exchange, which routes directly to the queue named by the
    /// routing key.
    async fn publish(&self, dispatch: Dispatch) -> Result<(), BrokerError>;
}
