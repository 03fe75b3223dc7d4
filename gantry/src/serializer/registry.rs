use crate::serializer::json::{JsonSerializer, SERIALIZER_JSON};
use crate::serializer::{EventSerializer, RpcSerializer};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use thiserror::Error;

/// A process-wide, name-keyed collection of serializers.
///
/// Two independent registries exist: [one for RPC codecs](rpc_serializers)
/// and [one for event codecs](event_serializers). Both are expected to be
/// populated once at startup and only read afterwards; the dispatch paths
/// never write.
pub struct SerializerRegistry<S: ?Sized> {
    entries: RwLock<HashMap<String, Arc<S>>>,
}

/// Represents a failed registration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A serializer is already registered under the same name.
    #[error("a serializer named '{0}' is already registered")]
    Duplicate(String),
}

impl<S: ?Sized> SerializerRegistry<S> {
    /// Creates an empty registry.
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Registers the given serializer under the given name.
    ///
    /// The name must match what remote nodes put on the wire in their header
    /// lines. Registering a name twice is refused.
    pub fn register(
        &self,
        name: impl Into<String>,
        serializer: Arc<S>,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut entries = self.entries.write();

        if entries.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }

        entries.insert(name, serializer);

        Ok(())
    }

    /// Retrieves the serializer registered under the given name, if any.
    pub fn get(&self, name: &str) -> Option<Arc<S>> {
        self.entries.read().get(name).cloned()
    }

    /// Reports whether a serializer is registered under the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }
}

/// Exposes the process-wide registry of RPC codecs.
///
/// The built-in [JSON codec](JsonSerializer) is pre-registered under the name
/// [`"json"`](SERIALIZER_JSON).
pub fn rpc_serializers() -> &'static SerializerRegistry<dyn RpcSerializer> {
    static REGISTRY: LazyLock<SerializerRegistry<dyn RpcSerializer>> = LazyLock::new(|| {
        let registry: SerializerRegistry<dyn RpcSerializer> = SerializerRegistry::new();
        registry
            .entries
            .write()
            .insert(SERIALIZER_JSON.to_string(), Arc::new(JsonSerializer));

        registry
    });

    &REGISTRY
}

/// Exposes the process-wide registry of event codecs.
///
/// The built-in [JSON codec](JsonSerializer) is pre-registered under the name
/// [`"json"`](SERIALIZER_JSON).
pub fn event_serializers() -> &'static SerializerRegistry<dyn EventSerializer> {
    static REGISTRY: LazyLock<SerializerRegistry<dyn EventSerializer>> = LazyLock::new(|| {
        let registry: SerializerRegistry<dyn EventSerializer> = SerializerRegistry::new();
        registry
            .entries
            .write()
            .insert(SERIALIZER_JSON.to_string(), Arc::new(JsonSerializer));

        registry
    });

    &REGISTRY
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn serves_the_builtin_json_codec() {
        // When
        let rpc = rpc_serializers().get(SERIALIZER_JSON);
        let event = event_serializers().get(SERIALIZER_JSON);

        // Then
        assert!(rpc.is_some());
        assert!(event.is_some());
        assert_eq!(rpc.unwrap().name(), SERIALIZER_JSON);
        assert_eq!(event.unwrap().name(), SERIALIZER_JSON);
    }

    #[test]
    fn misses_unregistered_names() {
        assert!(rpc_serializers().get("carrier-pigeon").is_none());
        assert!(!event_serializers().contains("carrier-pigeon"));
    }

    #[test]
    fn refuses_duplicate_names() {
        // Given
        let registry: SerializerRegistry<dyn RpcSerializer> = SerializerRegistry::new();

        // When
        let first = registry.register("json", Arc::new(JsonSerializer));
        let second = registry.register("json", Arc::new(JsonSerializer));

        // Then
        assert_eq!(first, Ok(()));
        assert_eq!(second, Err(RegistryError::Duplicate("json".to_string())));
    }
}
