use crate::broker::dispatch::Dispatch;
use crate::broker::queue::{BrokerQueue, InboundMessage, ReceiveError};
use crate::broker::{Broker, BrokerError, ExchangeKind, QueueSpec};
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An in-process [`Broker`] with real routing semantics: topic exchanges with
/// `*`/`#` pattern matching, exclusive-queue enforcement, and work-sharing
/// across handles of the same non-exclusive queue.
///
/// This broker backs the test suites of this crate and allows a node to run
/// without external infrastructure. It holds no persistent state: durability
/// flags are accepted and ignored.
pub struct MemoryBroker {
    state: Arc<SyncMutex<MemoryState>>,
}

/// The mutable routing table of a [`MemoryBroker`].
#[derive(Default)]
struct MemoryState {
    exchanges: HashMap<String, ExchangeEntry>,
    queues: HashMap<String, QueueEntry>,
}

/// A declared exchange and its queue bindings.
struct ExchangeEntry {
    kind: ExchangeKind,
    bindings: Vec<QueueBinding>,
}

/// A single binding of a queue to an exchange.
#[derive(PartialEq, Eq)]
struct QueueBinding {
    routing_key: String,
    queue: String,
}

/// The broker-side half of a declared queue.
struct QueueEntry {
    sender: UnboundedSender<InboundMessage>,
    shared: Arc<SharedQueue>,
    exclusive: bool,
}

/// The consumer-side half of a declared queue, shared by every handle that
/// declared the same non-exclusive queue name.
struct SharedQueue {
    name: Arc<str>,
    receiver: AsyncMutex<UnboundedReceiver<InboundMessage>>,
    delivery_counter: AtomicU64,
}

/// A consumer handle onto one queue of a [`MemoryBroker`].
pub struct MemoryQueue {
    shared: Arc<SharedQueue>,
    state: Weak<SyncMutex<MemoryState>>,
    ephemeral: bool,
    disposed: CancellationToken,
}

impl MemoryBroker {
    /// Creates a new, empty broker.
    pub fn new() -> Self {
        Self {
            state: Arc::new(SyncMutex::new(MemoryState::default())),
        }
    }

    /// Drops every queue and exchange, closing all outstanding consumers.
    ///
    /// Pending receives observe [`ReceiveError::Closed`] once the already
    /// delivered messages are drained.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();

        state.queues.clear();
        state.exchanges.clear();
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        _durable: bool,
        _auto_delete: bool,
    ) -> Result<(), BrokerError> {
        let mut state = self.state.lock();

        match state.exchanges.get(name) {
            // Redeclaration must agree on the exchange kind
            Some(existing) if existing.kind == kind => Ok(()),
            Some(existing) => Err(BrokerError::Declaration(format!(
                "exchange '{}' already exists as kind '{}'",
                name,
                existing.kind.as_str(),
            ))),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    ExchangeEntry {
                        kind,
                        bindings: Vec::new(),
                    },
                );

                Ok(())
            }
        }
    }

    async fn declare_queue(&self, spec: QueueSpec) -> Result<Arc<dyn BrokerQueue>, BrokerError> {
        let mut state = self.state.lock();

        let shared = match state.queues.get(&spec.name) {
            // An existing queue is joinable only when neither side claims it
            // exclusively; this is the uniqueness mechanism for singletons
            Some(entry) => {
                if entry.exclusive || spec.exclusive {
                    return Err(BrokerError::ResourceLocked(spec.name));
                }

                Arc::clone(&entry.shared)
            }

            None => {
                let (sender, receiver) = mpsc::unbounded_channel();
                let shared = Arc::new(SharedQueue {
                    name: Arc::from(spec.name.as_str()),
                    receiver: AsyncMutex::new(receiver),
                    delivery_counter: AtomicU64::new(0),
                });

                state.queues.insert(
                    spec.name.clone(),
                    QueueEntry {
                        sender,
                        shared: Arc::clone(&shared),
                        exclusive: spec.exclusive,
                    },
                );

                shared
            }
        };

        if let Some((exchange, routing_key)) = &spec.binding {
            bind_queue(&mut state, exchange, routing_key, &spec.name)?;
        }

        Ok(Arc::new(MemoryQueue {
            shared,
            state: Arc::downgrade(&self.state),
            // Exclusive queues are connection-scoped on a real broker, so
            // both kinds die with their consumer here
            ephemeral: spec.auto_delete || spec.exclusive,
            disposed: CancellationToken::new(),
        }))
    }

    async fn publish(&self, dispatch: Dispatch) -> Result<(), BrokerError> {
        let (exchange, routing_key, correlation_id, reply_to, headers, body) =
            dispatch.into_parts();

        let state = self.state.lock();

        // The default exchange routes directly to the queue named by the
        // routing key; an unroutable message is dropped, as a real broker
        // would without the mandatory flag
        if exchange.is_empty() {
            match state.queues.get(&routing_key) {
                Some(entry) => {
                    deliver(entry, correlation_id, reply_to, headers, body);
                }
                None => {
                    debug!(
                        routing_key = routing_key.as_str(),
                        "Dropped an unroutable message on the default exchange",
                    );
                }
            }

            return Ok(());
        }

        let entry = state
            .exchanges
            .get(&exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.clone()))?;

        // One copy per matching queue, even when several bindings match
        let mut routed: Vec<&str> = Vec::new();
        for binding in &entry.bindings {
            if !key_matches(entry.kind, &binding.routing_key, &routing_key) {
                continue;
            }
            if routed.contains(&binding.queue.as_str()) {
                continue;
            }

            routed.push(&binding.queue);
        }

        for queue_name in routed {
            if let Some(queue) = state.queues.get(queue_name) {
                deliver(
                    queue,
                    correlation_id,
                    reply_to.clone(),
                    headers.clone(),
                    body.clone(),
                );
            }
        }

        Ok(())
    }
}

/// Pushes one copy of a message onto the given queue with a fresh per-queue
/// delivery tag.
fn deliver(
    queue: &QueueEntry,
    correlation_id: Option<uuid::Uuid>,
    reply_to: Option<String>,
    headers: HashMap<String, Vec<u8>>,
    body: Vec<u8>,
) {
    let delivery_tag = queue.shared.delivery_counter.fetch_add(1, Ordering::Relaxed) + 1;
    let message = InboundMessage::new(delivery_tag, correlation_id, reply_to, headers, body);

    // A failed send means the queue was dropped concurrently; the message is
    // lost, as it would be on a real broker
    let _ = queue.sender.send(message);
}

/// Adds a binding to the routing table, ignoring exact repeats.
fn bind_queue(
    state: &mut MemoryState,
    exchange: &str,
    routing_key: &str,
    queue: &str,
) -> Result<(), BrokerError> {
    let entry = state
        .exchanges
        .get_mut(exchange)
        .ok_or_else(|| BrokerError::Declaration(format!("unknown exchange '{}'", exchange)))?;

    let binding = QueueBinding {
        routing_key: routing_key.to_string(),
        queue: queue.to_string(),
    };

    if !entry.bindings.contains(&binding) {
        entry.bindings.push(binding);
    }

    Ok(())
}

/// Reports whether the given routing key lands on the given binding pattern
/// under the given exchange kind.
fn key_matches(kind: ExchangeKind, pattern: &str, key: &str) -> bool {
    match kind {
        ExchangeKind::Direct => pattern == key,
        ExchangeKind::Fanout => true,
        ExchangeKind::Topic => topic_matches(pattern, key),
    }
}

/// Implements AMQP topic matching: `.`-separated words, where `*` matches
/// exactly one word and `#` matches zero or more words.
fn topic_matches(pattern: &str, key: &str) -> bool {
    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();

    words_match(&pattern, &key)
}

fn words_match(pattern: &[&str], key: &[&str]) -> bool {
    match pattern.split_first() {
        None => key.is_empty(),
        Some((&"#", rest)) => {
            // `#` absorbs zero words, or one word and stays in play
            words_match(rest, key) || (!key.is_empty() && words_match(pattern, &key[1..]))
        }
        Some((&"*", rest)) => !key.is_empty() && words_match(rest, &key[1..]),
        Some((&word, rest)) => key.split_first().is_some_and(|(&head, tail)| {
            word == head && words_match(rest, tail)
        }),
    }
}

impl MemoryQueue {
    /// Waits for the next message on the shared receiver.
    async fn next_message(&self) -> Option<InboundMessage> {
        self.shared.receiver.lock().await.recv().await
    }
}

#[async_trait]
impl BrokerQueue for MemoryQueue {
    fn name(&self) -> &str {
        &self.shared.name
    }

    async fn receive(&self) -> Result<InboundMessage, ReceiveError> {
        if self.disposed.is_cancelled() {
            return Err(ReceiveError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = self.disposed.cancelled() => Err(ReceiveError::Cancelled),
            message = self.next_message() => message.ok_or(ReceiveError::Closed),
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
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| BrokerError::Declaration("the broker is gone".to_string()))?;

        bind_queue(&mut state.lock(), exchange, routing_key, &self.shared.name)
    }

    async fn dispose(&self) {
        if self.disposed.is_cancelled() {
            return;
        }

        self.disposed.cancel();

        if self.ephemeral {
            if let Some(state) = self.state.upgrade() {
                let mut state = state.lock();

                state.queues.remove(self.shared.name.as_ref());
                for exchange in state.exchanges.values_mut() {
                    exchange
                        .bindings
                        .retain(|binding| binding.queue != self.shared.name.as_ref());
                }
            }
        }
    }
}
