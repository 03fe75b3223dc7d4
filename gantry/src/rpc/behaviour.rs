use crate::proto::header::{RpcHeader, HEADER_RPC};
use crate::proto::request::{Arguments, RpcRequest};
use crate::proto::response::{RpcError, RpcResponse, CODE_EXCEPTION, CODE_NOT_IMPLEMENTED};
use crate::rpc::contract::{Contract, Member};
use crate::rpc::introspection::{self, InterfaceInfo};
use crate::serializer::registry::rpc_serializers;
use crate::serializer::{MemberResolver, MemberShape, RequestReadError};
use crate::service::{HandlerError, ServiceBehaviour};
use crate::Envelope;
use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// The well-known name of the request argument that designates a property
/// write. Requests carrying it are refused, as property writes are not
/// supported.
const PROPERTY_WRITE_ARGUMENT: &str = "Property";

/// A [`ServiceBehaviour`] that dispatches RPC requests to bound
/// [`Contract`]s: it parses the versioned envelope, routes the call to the
/// right interface/operation/argument set, converts request-attributable
/// failures into structured responses, and replies through the envelope's
/// node.
///
/// Every behaviour auto-binds the
/// [introspection contract](crate::INTERFACE_QUERY), through which callers
/// can enumerate and describe the interfaces bound with introspection
/// enabled.
pub struct RpcBehaviour {
    bindings: Arc<SyncMutex<BindingSet>>,
}

/// The registry of bound interfaces, keyed by ASCII-lowercased interface
/// name.
///
/// The one lock guarding this set covers binding writes and introspection
/// reads; dispatch takes a snapshot of the relevant binding under the same
/// lock, so a racing late bind is observed either fully or not at all.
#[derive(Default)]
pub(crate) struct BindingSet {
    by_key: HashMap<String, Arc<Binding>>,
}

/// One bound interface: its contract, its introspection visibility, and the
/// lazily computed introspection descriptor.
pub(crate) struct Binding {
    contract: Arc<Contract>,
    introspectable: bool,
    descriptor: OnceLock<Arc<InterfaceInfo>>,
}

/// Represents a failure to bind a contract.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindError {
    /// An interface with the same (case-insensitive) name is already bound.
    #[error("an interface named '{0}' is already bound")]
    DuplicateInterface(String),
}

/// Represents an RPC failure that cannot be attributed to a well-formed
/// request and therefore cannot be answered as a structured response.
///
/// These errors escape [`RpcBehaviour::handle`] and surface through the
/// node's [fault channel](crate::Node::faults).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The envelope is not a dispatchable request (no reply identifier,
    /// missing or malformed RPC header, no reply address).
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    /// The request names a protocol version this runtime does not speak.
    #[error("unsupported protocol version '{0}'")]
    UnsupportedVersion(String),
    /// The request names a message type this runtime deliberately does not
    /// dispatch (anything but single calls; batching is rejected here).
    #[error("the message type '{0}' is not implemented")]
    NotImplemented(String),
    /// The request names a serializer that is not registered.
    #[error("unsupported serializer '{0}'")]
    UnsupportedSerializer(String),
}

impl RpcBehaviour {
    /// Creates a new behaviour with only the introspection contract bound.
    pub fn new() -> Self {
        let bindings = Arc::new(SyncMutex::new(BindingSet::default()));

        // The query contract reaches back into the binding set it lives in;
        // the weak reference keeps that knot from leaking
        let query = introspection::query_contract(Arc::downgrade(&bindings));
        bindings.lock().by_key.insert(
            query.name().to_ascii_lowercase(),
            Arc::new(Binding::new(query, false)),
        );

        Self { bindings }
    }

    /// Binds the given contract with introspection enabled.
    pub fn bind(&self, contract: Contract) -> Result<(), BindError> {
        self.bind_with(contract, true)
    }

    /// Binds the given contract without exposing it through introspection.
    pub fn bind_hidden(&self, contract: Contract) -> Result<(), BindError> {
        self.bind_with(contract, false)
    }

    /// Binds every given contract with introspection enabled.
    pub fn bind_many(
        &self,
        contracts: impl IntoIterator<Item = Contract>,
    ) -> Result<(), BindError> {
        for contract in contracts {
            self.bind(contract)?;
        }

        Ok(())
    }

    /// Binds one contract under its (case-insensitively unique) name.
    fn bind_with(&self, contract: Contract, introspectable: bool) -> Result<(), BindError> {
        let mut bindings = self.bindings.lock();
        let key = contract.name().to_ascii_lowercase();

        if bindings.by_key.contains_key(&key) {
            return Err(BindError::DuplicateInterface(contract.name().to_string()));
        }

        bindings
            .by_key
            .insert(key, Arc::new(Binding::new(contract, introspectable)));

        Ok(())
    }
}

impl Default for RpcBehaviour {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcBehaviour {
    /// Computes the response for one parsed request.
    ///
    /// Everything that can go wrong in here is attributable to the request
    /// and comes back as a structured error response, never as an error.
    pub(crate) async fn invoke(&self, request: &RpcRequest) -> RpcResponse {
        // Snapshot the contract so a racing late bind is either fully
        // visible or not at all
        let contract = self
            .bindings
            .lock()
            .get(request.interface())
            .map(|binding| binding.contract());

        let Some(contract) = contract else {
            return RpcResponse::Error(RpcError::not_found());
        };

        // Resolve the member again post-parse; it may have been rebound
        // since the body was read
        let Some(member) = contract.member(request.operation()) else {
            return RpcResponse::Error(RpcError::not_found());
        };

        match member {
            Member::Property(property) => {
                if request.argument(PROPERTY_WRITE_ARGUMENT).is_some() {
                    return RpcResponse::error(
                        CODE_NOT_IMPLEMENTED,
                        "Property writes are not supported",
                    );
                }

                match property.invoke(request.arguments().clone()).await {
                    Ok(value) => RpcResponse::Ok(value),
                    Err(error) => error_response(error),
                }
            }

            Member::Operation(operation) => {
                // Gather the declared parameters by name; extra arguments
                // are dropped, absent optional ones take their defaults
                let mut gathered = Arguments::new();
                for param in operation.params() {
                    match request.argument(param.name()) {
                        Some(value) => {
                            gathered.insert(param.name().to_string(), value.clone());
                        }
                        None if param.optional() => {
                            if let Some(default) = param.default() {
                                gathered.insert(param.name().to_string(), default.clone());
                            }
                        }
                        None => {
                            return RpcResponse::Error(RpcError::missing_argument(param.name()));
                        }
                    }
                }

                match operation.invoke(gathered).await {
                    Ok(value) => match operation.returns() {
                        Some(_) => RpcResponse::Ok(value),
                        // A void operation responds with null no matter
                        // what the handler produced
                        None => RpcResponse::Ok(Value::Null),
                    },
                    Err(error) => error_response(error),
                }
            }
        }
    }

    /// Reports whether the member targeted by the given request is flagged to
    /// produce no reply.
    fn is_no_reply(&self, request: &RpcRequest) -> bool {
        let bindings = self.bindings.lock();

        bindings
            .get(request.interface())
            .and_then(|binding| {
                binding
                    .contract
                    .member(request.operation())
                    .map(|member| match member {
                        Member::Operation(operation) => operation.no_reply(),
                        Member::Property(_) => false,
                    })
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl ServiceBehaviour for RpcBehaviour {
    fn label(&self) -> &str {
        "rpc"
    }

    async fn handle(&self, envelope: Envelope) -> Result<(), HandlerError> {
        // A request without a reply identifier cannot be correlated; there
        // is nobody to answer
        if envelope.id().is_nil() {
            return Err(
                DispatchError::InvalidRequest("the request carries no reply identifier").into(),
            );
        }

        let line = envelope
            .header_text(HEADER_RPC)
            .ok_or(DispatchError::InvalidRequest("the request carries no RPC header"))?;
        let header: RpcHeader = line
            .parse()
            .map_err(|_| DispatchError::InvalidRequest("the RPC header line is malformed"))?;

        if !header.is_current_version() {
            return Err(DispatchError::UnsupportedVersion(header.version().to_string()).into());
        }

        if !header.is_single() {
            return Err(DispatchError::NotImplemented(header.message_type().to_string()).into());
        }

        let serializer = rpc_serializers().get(header.serializer()).ok_or_else(|| {
            DispatchError::UnsupportedSerializer(header.serializer().to_string())
        })?;

        // From here on, failures are attributable to the request and are
        // answered as structured responses
        let (response, no_reply) = match serializer.read_request(envelope.body(), self) {
            Err(RequestReadError::UnknownMember) => {
                (RpcResponse::Error(RpcError::not_found()), false)
            }
            Err(RequestReadError::Malformed(detail)) => {
                (RpcResponse::Error(RpcError::bad_request(detail)), false)
            }
            Ok(request) => {
                let no_reply = self.is_no_reply(&request);

                (self.invoke(&request).await, no_reply)
            }
        };

        if no_reply {
            return Ok(());
        }

        let reply_to = envelope
            .reply_to()
            .ok_or(DispatchError::InvalidRequest("the request carries no reply address"))?;
        let body = serializer.write_response(&response)?;

        let mut headers = HashMap::new();
        headers.insert(
            HEADER_RPC.to_string(),
            RpcHeader::single(header.serializer()).to_string().into_bytes(),
        );

        envelope
            .node()
            .reply(reply_to, envelope.id(), headers, body)
            .await?;

        Ok(())
    }
}

impl MemberResolver for RpcBehaviour {
    fn resolve(&self, interface: &str, operation: &str) -> Option<MemberShape> {
        let bindings = self.bindings.lock();
        let binding = bindings.get(interface)?;
        let member = binding.contract.member(operation)?;

        Some(member.shape())
    }
}

impl BindingSet {
    /// Looks up a binding by interface name, case-insensitively.
    pub(crate) fn get(&self, interface: &str) -> Option<&Arc<Binding>> {
        self.by_key.get(&interface.to_ascii_lowercase())
    }

    /// Iterates over all bindings, in no particular order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Arc<Binding>> {
        self.by_key.values()
    }
}

impl Binding {
    /// Creates a new binding for the given contract.
    fn new(contract: Contract, introspectable: bool) -> Self {
        Self {
            contract: Arc::new(contract),
            introspectable,
            descriptor: OnceLock::new(),
        }
    }

    /// Exposes the bound contract.
    pub(crate) fn contract(&self) -> Arc<Contract> {
        Arc::clone(&self.contract)
    }

    /// Reports whether this binding is exposed through introspection.
    pub(crate) fn introspectable(&self) -> bool {
        self.introspectable
    }

    /// Returns the introspection descriptor of this binding, computing it on
    /// first use and memoizing it for the binding's lifetime.
    pub(crate) fn descriptor(&self) -> Arc<InterfaceInfo> {
        Arc::clone(
            self.descriptor
                .get_or_init(|| Arc::new(introspection::describe(&self.contract))),
        )
    }
}

/// Converts a handler failure into a structured response: an [`RpcError`]
/// keeps its code, anything else is reported under [`CODE_EXCEPTION`].
fn error_response(error: HandlerError) -> RpcResponse {
    match error.downcast::<RpcError>() {
        Ok(rpc_error) => RpcResponse::Error(*rpc_error),
        Err(other) => RpcResponse::error(CODE_EXCEPTION, other.to_string()),
    }
}
