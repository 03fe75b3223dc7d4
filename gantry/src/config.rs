use crate::Handle;
use serde::Deserialize;

/// Represents the application-level configuration section for a node: the
/// node name, the broker connection [`Handle`], and consumer tuning.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    name: String,
    handle: Handle,
    prefetch_count: Option<u16>,
}

impl NodeConfig {
    /// Reports the configured node name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the broker connection [`Handle`] for this configuration.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Reports the per-consumer prefetch count, if configured.
    pub fn prefetch_count(&self) -> Option<u16> {
        self.prefetch_count
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "gantry".to_string(),
            handle: Handle::default(),
            prefetch_count: None,
        }
    }
}

impl AsRef<NodeConfig> for NodeConfig {
    fn as_ref(&self) -> &NodeConfig {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn deserializes_with_defaults() {
        // Given
        let input = "{}";

        // When
        let config: NodeConfig = serde_json::from_str(input).unwrap();

        // Then
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.name(), "gantry");
    }

    #[test]
    fn deserializes_a_full_section() {
        // Given
        let input = r#"{
            "name": "billing-node",
            "handle": {"host": "mq.internal", "user": "billing", "password": "p"},
            "prefetch_count": 32
        }"#;

        // When
        let config: NodeConfig = serde_json::from_str(input).unwrap();

        // Then
        assert_eq!(config.name(), "billing-node");
        assert_eq!(config.prefetch_count(), Some(32));
        assert_eq!(config.handle().identifier(), "billing@mq.internal:5672/%2F");
    }
}
