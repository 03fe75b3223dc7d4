use crate::broker::queue::InboundMessage;
use crate::Node;
use std::collections::HashMap;
use uuid::Uuid;

/// Represents a decoded inbound message as it is handed to a
/// [behaviour](crate::ServiceBehaviour): the correlation ID, the reply
/// address, the byte-keyed headers, the payload, and a back-reference to the
/// [`Node`] that received it.
///
/// An envelope is immutable. The back-reference is what allows a behaviour to
/// [reply](Node::reply) without holding any state of its own.
#[derive(Debug, Clone)]
pub struct Envelope {
    id: Uuid,
    reply_to: Option<String>,
    headers: HashMap<String, Vec<u8>>,
    body: Vec<u8>,
    node: Node,
}

impl Envelope {
    /// Wraps the given broker delivery, attaching the receiving node.
    pub(crate) fn new(message: InboundMessage, node: Node) -> Self {
        let InboundMessage {
            delivery_tag: _,
            correlation_id,
            reply_to,
            headers,
            body,
        } = message;

        Self {
            id: correlation_id.unwrap_or(Uuid::nil()),
            reply_to,
            headers,
            body,
            node,
        }
    }

    /// Reports the correlation ID of this message. A [nil](Uuid::nil) ID
    /// means the sender did not set one; such a message cannot be replied to.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Reports the reply address of this message, if the sender set one.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Exposes the byte-keyed headers of this message.
    pub fn headers(&self) -> &HashMap<String, Vec<u8>> {
        &self.headers
    }

    /// Retrieves a single header value by key.
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers.get(key).map(Vec::as_slice)
    }

    /// Retrieves a single header value by key, interpreted as UTF-8 text.
    pub fn header_text(&self, key: &str) -> Option<&str> {
        self.header(key)
            .and_then(|bytes| std::str::from_utf8(bytes).ok())
    }

    /// Exposes the payload of this message.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Exposes the node that received this message.
    pub fn node(&self) -> &Node {
        &self.node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::memory::MemoryBroker;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn test_node() -> Node {
        Node::new("test", Arc::new(MemoryBroker::new()))
    }

    #[test]
    fn wraps_a_delivery() {
        // Given
        let id = Uuid::new_v4();
        let mut headers = HashMap::new();
        headers.insert("X-RPC".to_string(), b"1.1 json Single".to_vec());
        let message = InboundMessage::new(
            7,
            Some(id),
            Some("replies".to_string()),
            headers,
            b"payload".to_vec(),
        );

        // When
        let envelope = Envelope::new(message, test_node());

        // Then
        assert_eq!(envelope.id(), id);
        assert_eq!(envelope.reply_to(), Some("replies"));
        assert_eq!(envelope.header_text("X-RPC"), Some("1.1 json Single"));
        assert_eq!(envelope.body(), b"payload");
    }

    #[test]
    fn defaults_a_missing_correlation_id_to_nil() {
        // Given
        let message = InboundMessage::new(1, None, None, HashMap::new(), Vec::new());

        // When
        let envelope = Envelope::new(message, test_node());

        // Then
        assert!(envelope.id().is_nil());
        assert_eq!(envelope.reply_to(), None);
    }
}
