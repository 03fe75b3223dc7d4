use rand::RngCore;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// The character that separates the namespace from the routing key in the
/// textual form of an address.
const SEPARATOR: char = ':';

/// The character that joins a queue name and its uniquifying suffix.
const SUFFIX_SEPARATOR: char = '%';

/// Identifies a service on the broker: a topic exchange (the namespace) plus a
/// routing key within it.
///
/// The textual form is `namespace:routing-key`. For
/// [singleton](crate::ServiceKind::Singleton) and
/// [balanced](crate::ServiceKind::Balanced) services the textual form doubles
/// as the broker queue name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceAddress {
    namespace: Arc<str>,
    routing_key: Arc<str>,
}

/// Identifies an event topic on the broker: a topic exchange (the namespace)
/// plus a routing-key filter within it.
///
/// The textual form is `namespace:routing-key`. The routing key may contain
/// the usual topic wildcards (`*`, `#`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventAddress {
    namespace: Arc<str>,
    routing_key: Arc<str>,
}

/// Represents a failure to interpret a string as an address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// The separator between namespace and routing key is absent.
    #[error("the address '{0}' contains no '{SEPARATOR}' separator")]
    MissingSeparator(String),
    /// The namespace part is empty.
    #[error("the address '{0}' has an empty namespace")]
    EmptyNamespace(String),
    /// The routing-key part is empty.
    #[error("the address '{0}' has an empty routing key")]
    EmptyRoutingKey(String),
}

impl ServiceAddress {
    /// Creates a new address from the given namespace and routing key.
    pub fn new(namespace: impl AsRef<str>, routing_key: impl AsRef<str>) -> Self {
        Self {
            namespace: Arc::from(namespace.as_ref()),
            routing_key: Arc::from(routing_key.as_ref()),
        }
    }

    /// Reports the namespace (the exchange name) of this address.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reports the routing key of this address.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

impl EventAddress {
    /// Creates a new address from the given namespace and routing-key filter.
    pub fn new(namespace: impl AsRef<str>, routing_key: impl AsRef<str>) -> Self {
        Self {
            namespace: Arc::from(namespace.as_ref()),
            routing_key: Arc::from(routing_key.as_ref()),
        }
    }

    /// Reports the namespace (the exchange name) of this address.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Reports the routing-key filter of this address.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }
}

impl Display for ServiceAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.namespace, SEPARATOR, self.routing_key)
    }
}

impl Display for EventAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.namespace, SEPARATOR, self.routing_key)
    }
}

impl FromStr for ServiceAddress {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (namespace, routing_key) = split_address(input)?;

        Ok(Self {
            namespace,
            routing_key,
        })
    }
}

impl FromStr for EventAddress {
    type Err = AddressError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let (namespace, routing_key) = split_address(input)?;

        Ok(Self {
            namespace,
            routing_key,
        })
    }
}

/// Splits the given textual address on the first separator and validates that
/// both parts are non-empty.
fn split_address(input: &str) -> Result<(Arc<str>, Arc<str>), AddressError> {
    let (namespace, routing_key) = input
        .split_once(SEPARATOR)
        .ok_or_else(|| AddressError::MissingSeparator(input.to_string()))?;

    if namespace.is_empty() {
        return Err(AddressError::EmptyNamespace(input.to_string()));
    }

    if routing_key.is_empty() {
        return Err(AddressError::EmptyRoutingKey(input.to_string()));
    }

    Ok((Arc::from(namespace), Arc::from(routing_key)))
}

/// Composes a globally unique queue name for consumers that each require a
/// private copy of the delivery stream: the address joined to 40 lowercase hex
/// characters (20 random bytes) by a `%`.
pub(crate) fn suffixed_queue_name(address: &impl Display) -> String {
    let mut suffix = [0u8; 20];
    rand::rng().fill_bytes(&mut suffix);

    let mut name = format!("{}{}", address, SUFFIX_SEPARATOR);
    for byte in suffix {
        name.push_str(&format!("{:02x}", byte));
    }

    name
}
