use crate::broker::queue::{BrokerQueue, ReceiveError};
use crate::broker::{Broker, BrokerError, ExchangeKind, QueueSpec};
use crate::routing::address::suffixed_queue_name;
use crate::{Envelope, Node, ServiceAddress};
use async_trait::async_trait;
use gantry_util::Backoff;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// The open-ended error type that a [`ServiceBehaviour`] may fail with.
///
/// Behaviour failures are never fatal to a service: they are reported through
/// the node's [fault channel](Node::faults) and the receive loop keeps going.
pub type HandlerError = Box<dyn Error + Send + Sync + 'static>;

/// Determines how many consumers of an address may exist across the cluster,
/// and how the broker divides messages between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    /// Exactly one node serves the address. The queue is declared exclusive,
    /// so a concurrent second declaration fails; that failure is the
    /// uniqueness mechanism.
    Singleton,
    /// Every subscriber of the address gets its own randomly suffixed queue,
    /// so every delivery is copied to all subscribers.
    Fanout,
    /// All subscribers share one queue, so the broker spreads deliveries
    /// across them (work-sharing).
    Balanced,
}

/// Determines how a service runs its behaviour against incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// Await each handler to completion before receiving the next message.
    /// Completion order equals delivery order, and the queue is
    /// back-pressured through the broker's prefetch.
    Serial,
    /// Spawn each handler onto the runtime without awaiting it. Handlers
    /// start in delivery order; completion order is unconstrained.
    Parallel,
}

/// The capability a service dispatches to: handle one decoded [`Envelope`].
///
/// The [`RpcBehaviour`](crate::RpcBehaviour) is the built-in implementation;
/// anything that can digest an envelope qualifies.
#[async_trait]
pub trait ServiceBehaviour: Send + Sync {
    /// A short label identifying this behaviour in logs and fault reports.
    fn label(&self) -> &str {
        "behaviour"
    }

    /// Handles one incoming message.
    ///
    /// An error escaping this method is reported through the node's
    /// [fault channel](Node::faults); it never stops the receive loop.
    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError>;
}

/// Represents a failure to set up a service.
#[derive(ThisError, Debug)]
pub enum ServiceError {
    /// `setup` was called twice without an intervening `dispose`.
    #[error("the service at '{0}' is already set up")]
    AlreadySetup(ServiceAddress),
    /// The broker refused one of the declarations.
    #[error("failed to declare broker resources for the service at '{address}': {source}")]
    Declaration {
        /// The address of the service that failed to set up.
        address: ServiceAddress,
        /// The underlying broker failure.
        #[source]
        source: BrokerError,
    },
}

/// A queue-bound message handler hosted by a [`Node`].
///
/// A service is constructed inert; [`setup`](Service::setup) declares the
/// broker resources and spawns the receive loop, [`resetup`](Service::resetup)
/// repeats that against a new broker after failover, and
/// [`dispose`](Service::dispose) cancels the loop and releases the queue.
pub struct Service {
    name: Arc<str>,
    address: ServiceAddress,
    kind: ServiceKind,
    execution: Execution,
    behaviour: Arc<dyn ServiceBehaviour>,
    node: Node,
    state: AsyncMutex<ServiceState>,
}

/// The mutable lifecycle state of a [`Service`].
#[derive(Default)]
struct ServiceState {
    queue: Option<Arc<dyn BrokerQueue>>,
    cancel: Option<CancellationToken>,
}

impl Service {
    /// Creates an inert service owned by the given node.
    pub(crate) fn new(
        address: ServiceAddress,
        kind: ServiceKind,
        execution: Execution,
        behaviour: Arc<dyn ServiceBehaviour>,
        node: Node,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: Self::compose_name(&address),
            address,
            kind,
            execution,
            behaviour,
            node,
            state: AsyncMutex::new(ServiceState::default()),
        })
    }

    /// Composes a globally unique, human-readable name for a service.
    fn compose_name(address: &ServiceAddress) -> Arc<str> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        Arc::from(format!(
            "service:{}:{}",
            address,
            COUNTER.fetch_add(1, Ordering::Relaxed),
        ))
    }

    /// Reports the name of this service.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reports the address this service is bound to.
    pub fn address(&self) -> &ServiceAddress {
        &self.address
    }

    /// Reports the kind of this service.
    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    /// Reports the execution strategy of this service.
    pub fn execution(&self) -> Execution {
        self.execution
    }
}

impl Service {
    /// Declares the broker resources for this service and spawns its receive
    /// loop.
    ///
    /// Callable exactly once before the matching [`dispose`](Service::dispose);
    /// a second call fails with [`ServiceError::AlreadySetup`].
    pub async fn setup(self: &Arc<Self>, broker: &Arc<dyn Broker>) -> Result<(), ServiceError> {
        let mut state = self.state.lock().await;

        if state.queue.is_some() {
            return Err(ServiceError::AlreadySetup(self.address.clone()));
        }

        // The namespace is always a durable topic exchange
        broker
            .declare_exchange(self.address.namespace(), ExchangeKind::Topic, true, false)
            .await
            .map_err(|source| self.declaration_error(source))?;

        let queue = broker
            .declare_queue(self.queue_spec())
            .await
            .map_err(|source| self.declaration_error(source))?;

        let cancel = CancellationToken::new();
        state.queue = Some(Arc::clone(&queue));
        state.cancel = Some(cancel.clone());

        tokio::spawn(Arc::clone(self).run(queue, cancel));

        debug!(
            service = self.name.as_ref(),
            "Declared broker resources and started the receive loop",
        );

        Ok(())
    }

    /// Cancels the current receive loop, drops the current queue, and sets
    /// the service up again against the given broker.
    ///
    /// The address and behaviour are preserved; the queue identity is not.
    /// Handlers already spawned in [`Parallel`](Execution::Parallel) mode run
    /// to completion independently.
    pub async fn resetup(self: &Arc<Self>, broker: &Arc<dyn Broker>) -> Result<(), ServiceError> {
        self.teardown().await;
        self.setup(broker).await
    }

    /// Cancels the receive loop and releases the queue. Safe to call any
    /// number of times.
    pub async fn dispose(&self) {
        self.teardown().await;
    }

    /// Takes and releases the current queue and cancel token, if any.
    async fn teardown(&self) {
        let mut state = self.state.lock().await;

        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }

        if let Some(queue) = state.queue.take() {
            queue.dispose().await;
        }
    }

    /// Describes the queue this service consumes, according to its kind.
    fn queue_spec(&self) -> QueueSpec {
        let binding = (
            self.address.namespace().to_string(),
            self.address.routing_key().to_string(),
        );

        let spec = match self.kind {
            ServiceKind::Singleton => QueueSpec::plain(self.address.to_string()).exclusive(),
            ServiceKind::Fanout => QueueSpec::plain(suffixed_queue_name(&self.address)),
            ServiceKind::Balanced => QueueSpec::plain(self.address.to_string()).durable(),
        };

        spec.bound_to(binding.0, binding.1)
    }

    /// Wraps a broker failure into a [`ServiceError`].
    fn declaration_error(&self, source: BrokerError) -> ServiceError {
        ServiceError::Declaration {
            address: self.address.clone(),
            source,
        }
    }
}

impl Service {
    /// The receive loop: pull a message, wrap it, dispatch it per the
    /// execution strategy, repeat until cancelled.
    async fn run(self: Arc<Self>, queue: Arc<dyn BrokerQueue>, cancel: CancellationToken) {
        let backoff = Backoff::default();

        loop {
            let message = match queue.receive_cancel(&cancel).await {
                Ok(message) => {
                    backoff.settle();

                    message
                }

                Err(ReceiveError::Cancelled) => break,

                // A transport failure is not attributable to any request:
                // report it and keep the loop alive, pacing the retries so a
                // dead queue does not spin hot
                Err(error) => {
                    self.report(error.into());

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = backoff.pause() => continue,
                    }
                }
            };

            let envelope = Envelope::new(message, self.node.clone());

            match self.execution {
                Execution::Serial => {
                    if let Err(error) = self.behaviour.handle(envelope).await {
                        self.report(error);
                    }
                }

                Execution::Parallel => {
                    let service = Arc::clone(&self);

                    tokio::spawn(async move {
                        if let Err(error) = service.behaviour.handle(envelope).await {
                            service.report(error);
                        }
                    });
                }
            }
        }

        debug!(service = self.name.as_ref(), "Exited the receive loop");
    }

    /// Reports an error that could not be attributed to a specific request.
    fn report(&self, error: HandlerError) {
        self.node
            .report_fault(&self.name, self.behaviour.label(), error);
    }
}
