use serde::{Deserialize, Serialize};

use super::vector::VectorMetadata;

/// A raw match as returned by the vector store, in store order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: String,
    #[serde(default)]
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<VectorMetadata>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f32>,
}

impl Match {
    pub fn source_asset_id(&self) -> Option<&str> {
        self.metadata.as_ref().map(|m| m.source_asset_id.as_str())
    }
}

/// A ranked, deduplicated search hit returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}
