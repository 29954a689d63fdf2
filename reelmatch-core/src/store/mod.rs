//! Vector store access.
//!
//! `VectorStore` is the typed surface the sync, search and maintenance subsystems
//! talk to. Two implementations ship:
//! - **Pinecone**: JSON over HTTPS against an index data plane
//! - **Memory**: process-local store with the same filter and ranking semantics
//!
//! Callers own batch sizing; implementations send whatever they are given.

pub mod memory;
pub mod pinecone;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use async_trait::async_trait;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::config::StoreConfig;
use crate::models::{Match, VectorMetadata, VectorRecord};

pub use memory::InMemoryStore;
pub use pinecone::PineconeStore;

// ============================================================================
// Errors
// ============================================================================

/// Store operation, used for error attribution and batch events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreOp {
    Query,
    Fetch,
    Upsert,
    Delete,
    DeleteAll,
    Describe,
}

impl StoreOp {
    pub fn is_write(&self) -> bool {
        matches!(self, StoreOp::Upsert | StoreOp::Delete | StoreOp::DeleteAll)
    }
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoreOp::Query => "query",
            StoreOp::Fetch => "fetch",
            StoreOp::Upsert => "upsert",
            StoreOp::Delete => "delete",
            StoreOp::DeleteAll => "delete_all",
            StoreOp::Describe => "describe",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Store request timed out")]
    Timeout,

    #[error("Store API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Malformed store response: {0}")]
    Malformed(String),

    #[error("Invalid vector: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Unsupported store backend '{0}'")]
    UnsupportedBackend(String),
}

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.is_decode() {
            StoreError::Malformed(e.to_string())
        } else {
            StoreError::Http(e)
        }
    }
}

impl StoreError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, StoreError::Timeout)
    }
}

// ============================================================================
// Filters and queries
// ============================================================================

pub const SOURCE_ASSET_ID: &str = "source_asset_id";
pub const TENANT_INDEX_ID: &str = "tenant_index_id";
pub const SCOPE: &str = "scope";

/// Conjunction of metadata equality clauses.
///
/// Serialises to the store's operator syntax: `{"key": {"$eq": "value"}}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    clauses: BTreeMap<String, String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, key: &str, value: impl Into<String>) -> Self {
        self.clauses.insert(key.to_string(), value.into());
        self
    }

    pub fn source_asset(asset_id: &str) -> Self {
        Self::new().eq(SOURCE_ASSET_ID, asset_id)
    }

    pub fn tenant(tenant_index_id: &str) -> Self {
        Self::new().eq(TENANT_INDEX_ID, tenant_index_id)
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.clauses.get(key).map(String::as_str)
    }

    /// Evaluate the filter locally against a record's metadata.
    pub fn matches(&self, metadata: &VectorMetadata) -> bool {
        self.clauses
            .iter()
            .all(|(key, value)| metadata_value(metadata, key).as_deref() == Some(value.as_str()))
    }
}

fn metadata_value(metadata: &VectorMetadata, key: &str) -> Option<String> {
    match key {
        "asset_file" => Some(metadata.asset_file.clone()),
        "segment_index" => Some(metadata.segment_index.to_string()),
        SCOPE => Some(metadata.scope.as_str().to_string()),
        SOURCE_ASSET_ID => Some(metadata.source_asset_id.clone()),
        TENANT_INDEX_ID => Some(metadata.tenant_index_id.clone()),
        _ => None,
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.clauses.len()))?;
        for (key, value) in &self.clauses {
            let mut op = BTreeMap::new();
            op.insert("$eq", value);
            map.serialize_entry(key, &op)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub vector: Vec<f32>,
    pub filter: Filter,
    pub top_k: usize,
    pub include_metadata: bool,
    pub include_values: bool,
}

/// Query vector used when the filter alone determines the matches.
///
/// A unit basis vector rather than zeros: cosine indexes reject zero-norm queries.
pub fn placeholder_vector(dimension: usize) -> Vec<f32> {
    let mut v = vec![0.0; dimension];
    if let Some(first) = v.first_mut() {
        *first = 1.0;
    }
    v
}

// ============================================================================
// VectorStore trait
// ============================================================================

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Similarity query restricted by `filter`, best match first.
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Match>, StoreError>;

    /// Look up records by id. Absent ids are simply missing from the map.
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, VectorRecord>, StoreError>;

    /// Which of `ids` are stored. Only presence matters, so records whose
    /// metadata this crate cannot read still count.
    async fn fetch_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        Ok(self.fetch(ids).await?.into_keys().collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError>;

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError>;

    /// Remove every vector in the configured namespace.
    async fn delete_all(&self) -> Result<(), StoreError>;

    /// Metadata-only lookup. The default goes through `query` with a placeholder
    /// vector; stores with a native filter read should override it.
    async fn find_by_filter(
        &self,
        filter: &Filter,
        limit: usize,
        include_values: bool,
    ) -> Result<Vec<Match>, StoreError> {
        let request = QueryRequest {
            vector: placeholder_vector(self.dimension()),
            filter: filter.clone(),
            top_k: limit,
            include_metadata: true,
            include_values,
        };
        self.query(&request).await
    }

    /// Cheap reachability probe for health checks.
    async fn health(&self) -> Result<serde_json::Value, StoreError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Create the configured store backend.
pub fn create_store(config: &StoreConfig) -> Result<Box<dyn VectorStore>, StoreError> {
    match config.backend.as_str() {
        "pinecone" => Ok(Box::new(PineconeStore::new(config)?)),
        "memory" => Ok(Box::new(InMemoryStore::new(config.dimension))),
        other => Err(StoreError::UnsupportedBackend(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Scope;

    fn metadata() -> VectorMetadata {
        VectorMetadata {
            asset_file: "ad.mp4".into(),
            segment_index: 2,
            start_time: 12.0,
            end_time: 18.0,
            scope: Scope::Clip,
            source_asset_id: "vid-1".into(),
            tenant_index_id: "idx-a".into(),
        }
    }

    #[test]
    fn test_filter_serializes_eq_operators() {
        let filter = Filter::tenant("idx-a").eq(SCOPE, "clip");
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "scope": { "$eq": "clip" },
                "tenant_index_id": { "$eq": "idx-a" }
            })
        );
    }

    #[test]
    fn test_filter_matches_all_clauses() {
        let meta = metadata();
        assert!(Filter::tenant("idx-a").eq(SCOPE, "clip").matches(&meta));
        assert!(!Filter::tenant("idx-a").eq(SCOPE, "video").matches(&meta));
        assert!(!Filter::tenant("idx-b").matches(&meta));
        assert!(Filter::new().matches(&meta));
        assert!(!Filter::new().eq("unknown_key", "x").matches(&meta));
    }

    #[test]
    fn test_placeholder_vector_is_unit_norm() {
        let v = placeholder_vector(4);
        assert_eq!(v, vec![1.0, 0.0, 0.0, 0.0]);
        assert!(placeholder_vector(0).is_empty());
    }

    #[test]
    fn test_create_store_rejects_unknown_backend() {
        let config = StoreConfig {
            backend: "redis".into(),
            index_host: String::new(),
            api_key: None,
            namespace: String::new(),
            dimension: 8,
            timeout_seconds: 5,
            api_version: "2025-01".into(),
        };
        assert!(matches!(
            create_store(&config),
            Err(StoreError::UnsupportedBackend(_))
        ));
    }
}
