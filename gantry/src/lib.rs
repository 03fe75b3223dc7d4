#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![cfg_attr(test, deny(warnings))]

/// Exposes an application configuration section.
mod config;
pub use self::config::NodeConfig;

/// Exposes a handle for defining a set of connection credentials.
mod handle;
pub use self::handle::{DsnParts, Handle};

/// Exposes the address types used to route services and events.
mod routing {
    pub mod address;
}
pub use self::routing::address::{AddressError, EventAddress, ServiceAddress};

/// Exposes the wire-level building blocks shared by RPC and events.
mod proto {
    pub mod header;
    pub mod request;
    pub mod response;
}
pub use self::proto::header::{
    EventHeader, HeaderError, RpcHeader, HEADER_EVENT, HEADER_RPC, MESSAGE_SINGLE,
    PROTOCOL_VERSION,
};
pub use self::proto::request::{Arguments, RpcRequest};
pub use self::proto::response::{
    RpcError, RpcResponse, CODE_BAD_REQUEST, CODE_EXCEPTION, CODE_NOT_FOUND,
    CODE_NOT_IMPLEMENTED,
};

/// Exposes the payload codecs and their process-wide registries.
mod serializer;
pub use self::serializer::json::{JsonSerializer, SERIALIZER_JSON};
pub use self::serializer::registry::{
    event_serializers, rpc_serializers, RegistryError, SerializerRegistry,
};
pub use self::serializer::{
    CodecError, EventSerializer, MemberResolver, MemberShape, ParamShape, RequestReadError,
    RpcSerializer,
};

/// Exposes the broker abstraction and the two shipped implementations.
mod broker;
pub use self::broker::amqp::{AmqpBroker, AmqpQueue};
pub use self::broker::dispatch::{Dispatch, DispatchBuilder};
pub use self::broker::memory::{MemoryBroker, MemoryQueue};
pub use self::broker::queue::{message_stream, BrokerQueue, InboundMessage, ReceiveError};
pub use self::broker::{Broker, BrokerError, ExchangeKind, QueueSpec};

/// Exposes machinery for maintaining a connection to an AMQP broker.
mod connector;
pub use self::connector::{Connector, Gateway};

/// Exposes the decoded inbound message.
mod envelope;
pub use self::envelope::Envelope;

/// Exposes the node: the host of services, the reply path, and the fault
/// channel.
mod node;
pub use self::node::{Fault, Node, PublishError};

/// Exposes the queue-bound service and its execution strategies.
mod service;
pub use self::service::{
    Execution, HandlerError, Service, ServiceBehaviour, ServiceError, ServiceKind,
};

/// Exposes the RPC dispatcher: contracts, the behaviour, and introspection.
mod rpc {
    pub mod behaviour;
    pub mod contract;
    pub mod introspection;
}
pub use self::rpc::behaviour::{BindError, DispatchError, RpcBehaviour};
pub use self::rpc::contract::{
    Contract, ContractBuilder, Invoker, Member, Operation, OperationBuilder, OperationResult,
    Param, Property,
};
pub use self::rpc::introspection::{
    ArgumentInfo, InterfaceInfo, OperationInfo, PropertyInfo, INTERFACE_QUERY,
};

/// Exposes typed event subscriptions and their observer bridge.
mod event {
    pub mod observer;
    pub mod subscription;
}
pub use self::event::observer::EventObserver;
pub use self::event::subscription::{EventDecodeError, EventSubscription};

/// Exposes convenience layers around broker types.
mod util {
    pub(crate) mod field_table;
}
