use crate::{RpcRequest, RpcResponse};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

pub mod json;
pub mod registry;

/// Encodes and decodes RPC request and response bodies.
///
/// Implementations are registered by name in the
/// [RPC registry](crate::rpc_serializers) at startup; the name travels on the
/// wire inside the [`RpcHeader`](crate::RpcHeader) so that both sides agree on
/// the codec.
pub trait RpcSerializer: Send + Sync {
    /// Reports the registered name of this serializer.
    fn name(&self) -> &str;

    /// Decodes a request body.
    ///
    /// The given resolver maps the interface/operation pair named by the raw
    /// body onto the bound member's shape, so that argument names and types
    /// can be bound while parsing. An unresolvable pair fails with
    /// [`RequestReadError::UnknownMember`]; anything else that prevents
    /// parsing fails with [`RequestReadError::Malformed`].
    fn read_request(
        &self,
        bytes: &[u8],
        resolver: &dyn MemberResolver,
    ) -> Result<RpcRequest, RequestReadError>;

    /// Encodes a request body.
    fn write_request(&self, request: &RpcRequest) -> Result<Vec<u8>, CodecError>;

    /// Decodes a response body.
    fn read_response(&self, bytes: &[u8]) -> Result<RpcResponse, CodecError>;

    /// Encodes a response body.
    fn write_response(&self, response: &RpcResponse) -> Result<Vec<u8>, CodecError>;
}

/// Encodes and decodes event payloads.
///
/// Implementations are registered by name in the
/// [event registry](crate::event_serializers) at startup; the name travels on
/// the wire inside the [`EventHeader`](crate::EventHeader).
pub trait EventSerializer: Send + Sync {
    /// Reports the registered name of this serializer.
    fn name(&self) -> &str;

    /// Decodes an event payload.
    fn read(&self, bytes: &[u8]) -> Result<Value, CodecError>;

    /// Encodes an event payload.
    fn write(&self, value: &Value) -> Result<Vec<u8>, CodecError>;
}

/// Resolves an interface/operation pair named by a raw request body onto the
/// shape of the bound member, for use during request parsing.
pub trait MemberResolver {
    /// Returns the shape of the named member, or [`None`] when no such member
    /// is bound.
    fn resolve(&self, interface: &str, operation: &str) -> Option<MemberShape>;
}

/// The parsing-relevant shape of a bound member: its declared parameters.
///
/// Properties resolve to a shape with no parameters.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MemberShape {
    /// The declared parameters, in declaration order.
    pub params: Vec<ParamShape>,
}

/// The parsing-relevant shape of one declared parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamShape {
    /// The parameter name, as it appears in request arguments.
    pub name: Arc<str>,
    /// The declared type name, as reported by introspection.
    pub type_name: Arc<str>,
    /// Whether the parameter may be omitted from a request.
    pub optional: bool,
}

/// Represents a failure to decode a request body.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestReadError {
    /// The body names an interface/operation pair that is not bound.
    #[error("the interface or operation could not be found")]
    UnknownMember,
    /// The body cannot be parsed as a request.
    #[error("the request format is invalid: {0}")]
    Malformed(String),
}

/// Represents a failure to encode or decode a payload.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The payload could not be encoded.
    #[error("failed to encode a payload: {0}")]
    Encode(String),
    /// The payload could not be decoded.
    #[error("failed to decode a payload: {0}")]
    Decode(String),
}
