use crate::serializer::{
    CodecError, EventSerializer, MemberResolver, RequestReadError, RpcSerializer,
};
use crate::{RpcRequest, RpcResponse};
use serde_json::Value;

/// The registered name of the built-in JSON serializer.
pub const SERIALIZER_JSON: &str = "json";

/// The built-in JSON codec, registered under the name
/// [`"json"`](SERIALIZER_JSON) in both the RPC and the event registries.
///
/// Requests travel as `{"interface": .., "operation": .., "arguments": {..}}`,
/// responses as `{"ok": <value>}` or `{"error": {"code": .., "message": ..}}`,
/// and events as the bare JSON encoding of the payload value.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl RpcSerializer for JsonSerializer {
    fn name(&self) -> &str {
        SERIALIZER_JSON
    }

    fn read_request(
        &self,
        bytes: &[u8],
        resolver: &dyn MemberResolver,
    ) -> Result<RpcRequest, RequestReadError> {
        // Parse the raw body first
        let request: RpcRequest = serde_json::from_slice(bytes)
            .map_err(|error| RequestReadError::Malformed(error.to_string()))?;

        // Bind the named member; JSON needs no type information beyond the
        // member existing, since arguments are already self-describing
        resolver
            .resolve(request.interface(), request.operation())
            .ok_or(RequestReadError::UnknownMember)?;

        Ok(request)
    }

    fn write_request(&self, request: &RpcRequest) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(request).map_err(|error| CodecError::Encode(error.to_string()))
    }

    fn read_response(&self, bytes: &[u8]) -> Result<RpcResponse, CodecError> {
        serde_json::from_slice(bytes).map_err(|error| CodecError::Decode(error.to_string()))
    }

    fn write_response(&self, response: &RpcResponse) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(response).map_err(|error| CodecError::Encode(error.to_string()))
    }
}

impl EventSerializer for JsonSerializer {
    fn name(&self) -> &str {
        SERIALIZER_JSON
    }

    fn read(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(bytes).map_err(|error| CodecError::Decode(error.to_string()))
    }

    fn write(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|error| CodecError::Encode(error.to_string()))
    }
}
