//! Tunables for indexes and queries.

use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};

/// Grid point store settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    /// Cells are `360 / 2^zoom_level` degrees wide. Clamped to 1..=24.
    /// Default: 10 (~0.35 degrees)
    pub zoom_level: u8,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self { zoom_level: 10 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Upper bound on lookups in flight during one traversal layer.
    pub max_concurrent_lookups: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_concurrent_lookups: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Log entries read per catch-up page.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self { batch_size: 256 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OsmConfig {
    pub spatial: SpatialConfig,
    pub query: QueryConfig,
    pub indexer: IndexerConfig,
}

impl OsmConfig {
    /// Parse a TOML document; absent keys keep their defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ValidationError::new("config", e.to_string()).into())
    }
}
