use std::collections::HashMap;
use uuid::Uuid;

/// Represents an **outgoing** message: the exchange and routing key that
/// address it, the correlation metadata, the byte-keyed headers, and the
/// encoded payload.
///
/// A dispatch owns only the encoded bytes of the payload; encoding is the
/// concern of the [serializers](crate::serializer).
#[derive(Debug, Clone, Default)]
pub struct Dispatch {
    exchange: String,
    routing_key: String,
    correlation_id: Option<Uuid>,
    reply_to: Option<String>,
    headers: HashMap<String, Vec<u8>>,
    body: Vec<u8>,
}

/// Allows to build a [`Dispatch`] incrementally.
#[derive(Debug, Default)]
pub struct DispatchBuilder {
    dispatch: Dispatch,
}

impl Dispatch {
    /// Creates a new [`DispatchBuilder`].
    pub fn builder() -> DispatchBuilder {
        DispatchBuilder::default()
    }

    /// Reports the target exchange. Empty means the default exchange.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Reports the routing key.
    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Reports the correlation ID, if set.
    pub fn correlation_id(&self) -> Option<Uuid> {
        self.correlation_id
    }

    /// Reports the reply-to routing key, if set.
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Exposes the byte-keyed headers.
    pub fn headers(&self) -> &HashMap<String, Vec<u8>> {
        &self.headers
    }

    /// Exposes the encoded payload.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Consumes this dispatch and returns its building blocks.
    pub(crate) fn into_parts(
        self,
    ) -> (
        String,
        String,
        Option<Uuid>,
        Option<String>,
        HashMap<String, Vec<u8>>,
        Vec<u8>,
    ) {
        (
            self.exchange,
            self.routing_key,
            self.correlation_id,
            self.reply_to,
            self.headers,
            self.body,
        )
    }
}

impl DispatchBuilder {
    /// Sets the target exchange.
    pub fn exchange(mut self, exchange: impl Into<String>) -> Self {
        self.dispatch.exchange = exchange.into();

        self
    }

    /// Sets the routing key.
    pub fn routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.dispatch.routing_key = routing_key.into();

        self
    }

    /// Sets the correlation ID.
    pub fn correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.dispatch.correlation_id = Some(correlation_id);

        self
    }

    /// Sets the reply-to routing key.
    pub fn reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.dispatch.reply_to = Some(reply_to.into());

        self
    }

    /// Adds a single byte-valued header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.dispatch.headers.insert(key.into(), value.into());

        self
    }

    /// Replaces all headers with the given map.
    pub fn headers(mut self, headers: HashMap<String, Vec<u8>>) -> Self {
        self.dispatch.headers = headers;

        self
    }

    /// Sets the encoded payload.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.dispatch.body = body.into();

        self
    }

    /// Finalizes and returns the [`Dispatch`].
    pub fn build(self) -> Dispatch {
        self.dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn builds_a_fully_specified_dispatch() {
        // Given
        let id = Uuid::new_v4();

        // When
        let dispatch = Dispatch::builder()
            .exchange("billing")
            .routing_key("invoice.created")
            .correlation_id(id)
            .reply_to("replies")
            .header("X-Test", "value".as_bytes())
            .body(b"payload".to_vec())
            .build();

        // Then
        assert_eq!(dispatch.exchange(), "billing");
        assert_eq!(dispatch.routing_key(), "invoice.created");
        assert_eq!(dispatch.correlation_id(), Some(id));
        assert_eq!(dispatch.reply_to(), Some("replies"));
        assert_eq!(
            dispatch.headers().get("X-Test").map(Vec::as_slice),
            Some("value".as_bytes()),
        );
        assert_eq!(dispatch.body(), b"payload");
    }

    #[test]
    fn defaults_to_the_default_exchange() {
        // When
        let dispatch = Dispatch::builder().routing_key("replies").build();

        // Then
        assert_eq!(dispatch.exchange(), "");
        assert_eq!(dispatch.correlation_id(), None);
        assert_eq!(dispatch.reply_to(), None);
    }
}
