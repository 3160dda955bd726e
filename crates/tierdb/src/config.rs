//! Configuration for a tierdb database.
//!
//! Provides sensible defaults with the ability to customize behavior
//! through the builder pattern or a JSON document.

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Collection used by [`crate::Database::doc`].
pub const DEFAULT_COLLECTION_ID: &str = "DEFAULT_COLLECTION_ID";

/// Where a query snapshot reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuerySource {
    /// Evaluate the predicate against memory only.
    Memory,
    /// Ask remote for the authoritative id set, then read matching
    /// documents from memory.
    #[default]
    Remote,
}

/// Configuration for a [`crate::Database`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Collection used for documents addressed without one.
    pub default_collection: String,
    /// Capacity of the memory tier's change channel.
    pub change_channel_capacity: usize,
    /// Source used by query snapshots when none is given.
    pub default_query_source: QuerySource,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            default_collection: DEFAULT_COLLECTION_ID.to_string(),
            change_channel_capacity: 1024,
            default_query_source: QuerySource::Remote,
        }
    }
}

impl DatabaseConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Set the default collection.
    pub fn with_default_collection(mut self, collection_id: impl Into<String>) -> Self {
        self.default_collection = collection_id.into();
        self
    }

    /// Set the memory change channel capacity.
    pub fn with_change_channel_capacity(mut self, capacity: usize) -> Self {
        self.change_channel_capacity = capacity;
        self
    }

    /// Set the default query source.
    pub fn with_default_query_source(mut self, source: QuerySource) -> Self {
        self.default_query_source = source;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DatabaseConfig::default();
        assert_eq!(config.default_collection, DEFAULT_COLLECTION_ID);
        assert_eq!(config.default_query_source, QuerySource::Remote);
        assert_eq!(config.change_channel_capacity, 1024);
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            DatabaseConfig::from_json(r#"{"default_query_source": "memory"}"#).unwrap();
        assert_eq!(config.default_query_source, QuerySource::Memory);
        assert_eq!(config.default_collection, DEFAULT_COLLECTION_ID);
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(DatabaseConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_builder_methods() {
        let config = DatabaseConfig::default()
            .with_default_collection("notes")
            .with_change_channel_capacity(16)
            .with_default_query_source(QuerySource::Memory);
        assert_eq!(config.default_collection, "notes");
        assert_eq!(config.change_channel_capacity, 16);
        assert_eq!(config.default_query_source, QuerySource::Memory);
    }
}
