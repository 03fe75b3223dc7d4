use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The argument set of an RPC request: argument name mapped to its value.
pub type Arguments = serde_json::Map<String, Value>;

/// A single RPC call: the target interface, the operation (or property) on
/// that interface, and the named arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    interface: String,
    operation: String,
    #[serde(default)]
    arguments: Arguments,
}

impl RpcRequest {
    /// Creates a new request for the given interface and operation, with no
    /// arguments.
    pub fn new(interface: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            operation: operation.into(),
            arguments: Arguments::new(),
        }
    }

    /// Returns this request with the given argument added.
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);

        self
    }

    /// Reports the target interface name.
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Reports the target operation name.
    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Exposes the named arguments of this request.
    pub fn arguments(&self) -> &Arguments {
        &self.arguments
    }

    /// Retrieves a single argument by name.
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}
