//! Managed devices ("things") reported to the platform

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A managed device identified by its platform-issued key.
///
/// Serializes in field order, which is also the order of the registration
/// snapshot sent to the platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thing {
    pub thing_key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the thing accepts remote instructions
    #[serde(default)]
    pub bi_directional: bool,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub data: Map<String, Value>,
}

impl Thing {
    pub fn new(thing_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            thing_key: thing_key.into(),
            name: name.into(),
            description: None,
            bi_directional: false,
            data: Map::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn bi_directional(mut self, enabled: bool) -> Self {
        self.bi_directional = enabled;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let thing = Thing::new("614a5ed34c", "Compressor")
            .with_description("Thing for compressor")
            .bi_directional(true)
            .with_metadata("site", json!("Pune"));

        assert_eq!(thing.thing_key, "614a5ed34c");
        assert_eq!(thing.description.as_deref(), Some("Thing for compressor"));
        assert!(thing.bi_directional);
        assert_eq!(thing.data["site"], "Pune");
    }

    #[test]
    fn test_serialization_skips_empty_fields() {
        let thing = Thing::new("k1", "Pump");
        let encoded = serde_json::to_string(&thing).unwrap();
        assert_eq!(
            encoded,
            r#"{"thing_key":"k1","name":"Pump","bi_directional":false}"#
        );
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let thing: Thing = serde_json::from_str(r#"{"thing_key":"k2","name":"Fan"}"#).unwrap();
        assert_eq!(thing, Thing::new("k2", "Fan"));
    }
}
