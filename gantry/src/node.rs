use crate::broker::dispatch::Dispatch;
use crate::broker::{Broker, BrokerError, ExchangeKind, QueueSpec};
use crate::event::subscription::EventSubscription;
use crate::proto::header::{EventHeader, HEADER_EVENT};
use crate::routing::address::suffixed_queue_name;
use crate::serializer::registry::event_serializers;
use crate::serializer::CodecError;
use crate::service::{Execution, HandlerError, Service, ServiceBehaviour, ServiceError, ServiceKind};
use crate::{EventAddress, ServiceAddress};
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::error;
use uuid::Uuid;

/// The number of faults the broadcast channel buffers for slow listeners.
const FAULT_CHANNEL_CAPACITY: usize = 64;

/// Hosts services on a broker: declares their resources, runs their receive
/// loops, routes replies, and hands out event subscriptions.
///
/// A node is a cheaply clonable handle; every [`Envelope`](crate::Envelope)
/// carries one back to its receiving node so that behaviours can
/// [reply](Node::reply) without state of their own.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    name: Arc<str>,
    broker: SyncRwLock<Arc<dyn Broker>>,
    services: SyncMutex<Vec<Weak<Service>>>,
    faults: broadcast::Sender<Fault>,
}

/// Describes one unhandled behaviour error: which service and behaviour it
/// escaped from, and the error rendered as text.
///
/// Faults are broadcast to every listener obtained through
/// [`Node::faults`]; they cover exactly the errors that could not be answered
/// as a structured response to a specific request.
#[derive(Debug, Clone)]
pub struct Fault {
    service: Arc<str>,
    behaviour: Arc<str>,
    message: Arc<str>,
}

/// Represents a failure to publish an event.
#[derive(Error, Debug)]
pub enum PublishError {
    /// The named serializer is not present in the event registry.
    #[error("unsupported event serializer '{0}'")]
    UnsupportedSerializer(String),
    /// The payload could not be encoded.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// The broker refused the message.
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

impl Node {
    /// Creates a node with the given name on the given broker.
    pub fn new(name: impl AsRef<str>, broker: Arc<dyn Broker>) -> Self {
        let (faults, _) = broadcast::channel(FAULT_CHANNEL_CAPACITY);

        Self {
            inner: Arc::new(NodeInner {
                name: Arc::from(name.as_ref()),
                broker: SyncRwLock::new(broker),
                services: SyncMutex::new(Vec::new()),
                faults,
            }),
        }
    }

    /// Reports the name of this node.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the broker this node currently points at.
    pub fn broker(&self) -> Arc<dyn Broker> {
        Arc::clone(&self.inner.broker.read())
    }

    /// Subscribes to the stream of unhandled behaviour errors.
    pub fn faults(&self) -> broadcast::Receiver<Fault> {
        self.inner.faults.subscribe()
    }
}

impl Node {
    /// Declares and starts a service: a queue bound to the given address,
    /// consumed per the given kind and execution strategy, dispatching to the
    /// given behaviour.
    pub async fn host(
        &self,
        address: ServiceAddress,
        kind: ServiceKind,
        execution: Execution,
        behaviour: Arc<dyn ServiceBehaviour>,
    ) -> Result<Arc<Service>, ServiceError> {
        let service = Service::new(address, kind, execution, behaviour, self.clone());

        service.setup(&self.broker()).await?;
        self.inner.services.lock().push(Arc::downgrade(&service));

        Ok(service)
    }

    /// Points this node at a new broker and sets every hosted service up
    /// again on it.
    ///
    /// Addresses and behaviours are preserved; queue identities are not.
    /// In-flight handlers finish independently.
    pub async fn failover(&self, broker: Arc<dyn Broker>) -> Result<(), ServiceError> {
        *self.inner.broker.write() = Arc::clone(&broker);

        for service in self.live_services() {
            service.resetup(&broker).await?;
        }

        Ok(())
    }

    /// Disposes every hosted service. Safe to call any number of times.
    pub async fn dispose(&self) {
        let services = {
            let mut services = self.inner.services.lock();

            std::mem::take(&mut *services)
        };

        for service in services.iter().filter_map(Weak::upgrade) {
            service.dispose().await;
        }
    }

    /// Snapshots the currently live hosted services.
    fn live_services(&self) -> Vec<Arc<Service>> {
        self.inner
            .services
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }
}

impl Node {
    /// Publishes a reply to the default exchange at the given reply address,
    /// echoing the given correlation ID.
    pub async fn reply(
        &self,
        reply_to: &str,
        correlation_id: Uuid,
        headers: HashMap<String, Vec<u8>>,
        body: Vec<u8>,
    ) -> Result<(), BrokerError> {
        let dispatch = Dispatch::builder()
            .routing_key(reply_to)
            .correlation_id(correlation_id)
            .headers(headers)
            .body(body)
            .build();

        self.broker().publish(dispatch).await
    }

    /// Serializes the given event with the named serializer, attaches the
    /// event header, and publishes it to the address's topic exchange.
    pub async fn publish_event<T>(
        &self,
        address: &EventAddress,
        serializer: &str,
        event: &T,
    ) -> Result<(), PublishError>
    where
        T: Serialize,
    {
        let codec = event_serializers()
            .get(serializer)
            .ok_or_else(|| PublishError::UnsupportedSerializer(serializer.to_string()))?;

        let value = serde_json::to_value(event)
            .map_err(|error| CodecError::Encode(error.to_string()))?;
        let body = codec.write(&value)?;

        let broker = self.broker();
        broker
            .declare_exchange(address.namespace(), ExchangeKind::Topic, true, false)
            .await?;

        let dispatch = Dispatch::builder()
            .exchange(address.namespace())
            .routing_key(address.routing_key())
            .header(HEADER_EVENT, EventHeader::current(serializer).to_string())
            .body(body)
            .build();

        broker.publish(dispatch).await?;

        Ok(())
    }

    /// Declares a private, auto-deleting queue bound to the given event
    /// address and returns a typed subscription over it.
    pub async fn subscribe<T>(
        &self,
        address: EventAddress,
    ) -> Result<EventSubscription<T>, BrokerError>
    where
        T: DeserializeOwned,
    {
        let broker = self.broker();

        broker
            .declare_exchange(address.namespace(), ExchangeKind::Topic, true, false)
            .await?;

        let spec = QueueSpec::plain(suffixed_queue_name(&address))
            .exclusive()
            .auto_delete()
            .bound_to(address.namespace(), address.routing_key());
        let queue = broker.declare_queue(spec).await?;

        Ok(EventSubscription::new(self.clone(), address, queue))
    }

    /// Reports one unhandled behaviour error: logs it and broadcasts it to
    /// every fault listener.
    pub(crate) fn report_fault(&self, service: &Arc<str>, behaviour: &str, fault: HandlerError) {
        error!(
            alert = true,
            node = self.inner.name.as_ref(),
            service = service.as_ref(),
            behaviour,
            error_message = %fault,
            "A behaviour error escaped the handler",
        );

        let fault = Fault {
            service: Arc::clone(service),
            behaviour: Arc::from(behaviour),
            message: Arc::from(fault.to_string().as_str()),
        };

        // Nobody listening is a legitimate state
        let _ = self.inner.faults.send(fault);
    }
}

impl Fault {
    /// Reports the name of the service the error escaped from.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Reports the label of the behaviour the error escaped from.
    pub fn behaviour(&self) -> &str {
        &self.behaviour
    }

    /// Reports the error rendered as text.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Debug for Node {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}
