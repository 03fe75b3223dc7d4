use crate::proto::request::Arguments;
use crate::proto::response::{RpcError, CODE_BAD_REQUEST, CODE_NOT_FOUND};
use crate::rpc::behaviour::BindingSet;
use crate::rpc::contract::{Contract, Member, Operation};
use crate::serializer::CodecError;
use crate::service::HandlerError;
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Weak};

/// The well-known name of the built-in introspection contract, auto-bound by
/// every [`RpcBehaviour`](crate::RpcBehaviour).
///
/// This name is part of the wire contract and must remain stable across
/// nodes.
pub const INTERFACE_QUERY: &str = "IInterfaceQuery001";

/// Describes one introspectable interface: its operations and properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// The declared interface name.
    pub name: String,
    /// The introspectable operations, in declaration order.
    pub operations: Vec<OperationInfo>,
    /// The introspectable properties, in declaration order.
    pub properties: Vec<PropertyInfo>,
}

/// Describes one operation of an introspectable interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    /// The declared operation name.
    pub name: String,
    /// The declared arguments, in declaration order.
    pub arguments: Vec<ArgumentInfo>,
    /// The declared return type, absent for operations that produce no
    /// value.
    pub returns: Option<String>,
    /// Whether the operation withholds its reply.
    pub no_reply: bool,
}

/// Describes one declared argument of an operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentInfo {
    /// The declared argument name.
    pub name: String,
    /// The declared argument type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the argument may be omitted from a request.
    pub optional: bool,
}

/// Describes one property of an introspectable interface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyInfo {
    /// The declared property name.
    pub name: String,
    /// The declared property type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Whether the property can be read.
    pub readable: bool,
    /// Whether the property can be written.
    pub writeable: bool,
}

/// Renders the introspection descriptor of the given contract, enumerating
/// only the members declared introspectable.
pub(crate) fn describe(contract: &Contract) -> InterfaceInfo {
    let mut operations = Vec::new();
    let mut properties = Vec::new();

    for member in contract.members() {
        match member {
            Member::Operation(operation) if operation.introspectable() => {
                operations.push(OperationInfo {
                    name: operation.name().to_string(),
                    arguments: operation
                        .params()
                        .iter()
                        .map(|param| ArgumentInfo {
                            name: param.name().to_string(),
                            type_name: param.type_name().to_string(),
                            optional: param.optional(),
                        })
                        .collect(),
                    returns: operation.returns().map(str::to_string),
                    no_reply: operation.no_reply(),
                })
            }

            Member::Property(property) if property.introspectable() => {
                properties.push(PropertyInfo {
                    name: property.name().to_string(),
                    type_name: property.type_name().to_string(),
                    readable: property.readable(),
                    writeable: property.writeable(),
                })
            }

            _ => {}
        }
    }

    InterfaceInfo {
        name: contract.name().to_string(),
        operations,
        properties,
    }
}

/// Builds the [`INTERFACE_QUERY`] contract over the given binding set.
///
/// The reference is weak on purpose: the contract ends up stored inside the
/// very binding set it queries.
pub(crate) fn query_contract(bindings: Weak<SyncMutex<BindingSet>>) -> Contract {
    let list_bindings = Weak::clone(&bindings);
    let has_bindings = Weak::clone(&bindings);
    let info_bindings = bindings;

    Contract::builder(INTERFACE_QUERY)
        .operation(
            Operation::builder("get_interfaces")
                .returns("string[]")
                .handler(move |_arguments| {
                    let names = introspectable_names(&list_bindings);

                    async move { Ok(Value::Array(names.into_iter().map(Value::String).collect())) }
                }),
        )
        .operation(
            Operation::builder("has_interface")
                .param("name", "string")
                .returns("bool")
                .handler(move |arguments| {
                    let outcome = required_name(&arguments)
                        .map(|name| is_introspectable(&has_bindings, &name));

                    async move { outcome.map(Value::Bool) }
                }),
        )
        .operation(
            Operation::builder("get_interface_info")
                .param("name", "string")
                .returns("InterfaceInfo")
                .handler(move |arguments| {
                    let outcome = required_name(&arguments)
                        .and_then(|name| interface_info(&info_bindings, &name));

                    async move {
                        let info = outcome?;

                        serde_json::to_value(info.as_ref())
                            .map_err(|error| CodecError::Encode(error.to_string()).into())
                    }
                }),
        )
        .build()
}

/// Extracts the mandatory string argument `name`.
fn required_name(arguments: &Arguments) -> Result<String, HandlerError> {
    arguments
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RpcError::new(CODE_BAD_REQUEST, "The argument name must be a string").into())
}

/// Lists the declared names of all introspectable bindings, sorted for a
/// stable wire shape.
fn introspectable_names(bindings: &Weak<SyncMutex<BindingSet>>) -> Vec<String> {
    let Some(bindings) = bindings.upgrade() else {
        return Vec::new();
    };

    let mut names: Vec<String> = bindings
        .lock()
        .iter()
        .filter(|binding| binding.introspectable())
        .map(|binding| binding.contract().name().to_string())
        .collect();

    names.sort();

    names
}

/// Reports whether an introspectable binding exists under the given name.
fn is_introspectable(bindings: &Weak<SyncMutex<BindingSet>>, name: &str) -> bool {
    bindings
        .upgrade()
        .map(|bindings| {
            bindings
                .lock()
                .get(name)
                .is_some_and(|binding| binding.introspectable())
        })
        .unwrap_or(false)
}

/// Retrieves the memoized descriptor of the introspectable binding under the
/// given name, or the canonical not-found error.
fn interface_info(
    bindings: &Weak<SyncMutex<BindingSet>>,
    name: &str,
) -> Result<Arc<InterfaceInfo>, HandlerError> {
    bindings
        .upgrade()
        .and_then(|bindings| {
            let bindings = bindings.lock();

            bindings
                .get(name)
                .filter(|binding| binding.introspectable())
                .map(|binding| binding.descriptor())
        })
        .ok_or_else(|| RpcError::new(CODE_NOT_FOUND, "The interface could not be found").into())
}
