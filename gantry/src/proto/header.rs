use std::fmt::{Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// The well-known header key that carries the RPC header line.
///
/// This key is part of the wire contract and must remain stable across nodes.
pub const HEADER_RPC: &str = "X-RPC";

/// The well-known header key that carries the event header line.
///
/// This key is part of the wire contract and must remain stable across nodes.
pub const HEADER_EVENT: &str = "X-Event";

/// The protocol version emitted and dispatched by this runtime.
pub const PROTOCOL_VERSION: &str = "1.1";

/// The only RPC message type this runtime dispatches.
pub const MESSAGE_SINGLE: &str = "Single";

/// The parsed form of the [`HEADER_RPC`] header line:
/// `"<version> <serializer> <message-type>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcHeader {
    version: String,
    serializer: String,
    message_type: String,
}

/// The parsed form of the [`HEADER_EVENT`] header line:
/// `"<version> <serializer>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventHeader {
    version: String,
    serializer: String,
}

/// Represents a failure to interpret a header value as a header line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// The line does not have the expected number of ASCII tokens.
    #[error("malformed header line '{0}'")]
    Malformed(String),
}

impl RpcHeader {
    /// Creates a current-version header line for a single-call message encoded
    /// with the given serializer.
    pub fn single(serializer: impl AsRef<str>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            serializer: serializer.as_ref().to_string(),
            message_type: MESSAGE_SINGLE.to_string(),
        }
    }

    /// Reports the protocol version named by this header.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reports the serializer named by this header.
    pub fn serializer(&self) -> &str {
        &self.serializer
    }

    /// Reports the message type named by this header.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Reports whether this header names the current protocol version.
    pub fn is_current_version(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }

    /// Reports whether this header names a single-call message.
    pub fn is_single(&self) -> bool {
        self.message_type == MESSAGE_SINGLE
    }
}

impl EventHeader {
    /// Creates a current-version header line for an event encoded with the
    /// given serializer.
    pub fn current(serializer: impl AsRef<str>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            serializer: serializer.as_ref().to_string(),
        }
    }

    /// Reports the protocol version named by this header.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reports the serializer named by this header.
    pub fn serializer(&self) -> &str {
        &self.serializer
    }

    /// Reports whether this header names the current protocol version.
    pub fn is_current_version(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

impl FromStr for RpcHeader {
    type Err = HeaderError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let [version, serializer, message_type] = split_tokens(line)?;

        Ok(Self {
            version,
            serializer,
            message_type,
        })
    }
}

impl FromStr for EventHeader {
    type Err = HeaderError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let [version, serializer] = split_tokens(line)?;

        Ok(Self {
            version,
            serializer,
        })
    }
}

impl Display for RpcHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {}",
            self.version, self.serializer, self.message_type,
        )
    }
}

impl Display for EventHeader {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.version, self.serializer)
    }
}

/// Splits the given line into exactly `N` ASCII tokens.
fn split_tokens<const N: usize>(line: &str) -> Result<[String; N], HeaderError> {
    if !line.is_ascii() {
        return Err(HeaderError::Malformed(line.to_string()));
    }

    let mut tokens = line.split_ascii_whitespace();
    let mut result = [const { String::new() }; N];

    for slot in result.iter_mut() {
        *slot = tokens
            .next()
            .ok_or_else(|| HeaderError::Malformed(line.to_string()))?
            .to_string();
    }

    if tokens.next().is_some() {
        return Err(HeaderError::Malformed(line.to_string()));
    }

    Ok(result)
}
