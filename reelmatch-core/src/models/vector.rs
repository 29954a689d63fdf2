use serde::{Deserialize, Deserializer, Serialize};

use crate::error::ReelmatchError;

/// Granularity a stored vector represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Clip,
    Video,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Clip => "clip",
            Scope::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "clip" => Some(Scope::Clip),
            "video" => Some(Scope::Video),
            _ => None,
        }
    }
}

/// Metadata attached to every stored vector. Field names are the store-side keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub asset_file: String,
    #[serde(default, deserialize_with = "integral_number")]
    pub segment_index: u32,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    pub scope: Scope,
    pub source_asset_id: String,
    pub tenant_index_id: String,
}

/// Metadata numbers come back from the store as floats (`3.0`).
fn integral_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let n = f64::deserialize(deserializer)?;
    if n < 0.0 || n.fract() != 0.0 || n > u32::MAX as f64 {
        return Err(serde::de::Error::custom(format!(
            "expected a non-negative integer, got {}",
            n
        )));
    }
    Ok(n as u32)
}

/// A single stored embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub values: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl VectorRecord {
    /// Build a record, rejecting metadata that would make it unqueryable.
    pub fn new(
        id: String,
        values: Vec<f32>,
        metadata: VectorMetadata,
    ) -> Result<Self, ReelmatchError> {
        if id.is_empty() {
            return Err(ReelmatchError::validation("vector id must not be empty"));
        }
        if metadata.source_asset_id.trim().is_empty() {
            return Err(ReelmatchError::validation(format!(
                "vector {} is missing source_asset_id",
                id
            )));
        }
        if metadata.tenant_index_id.trim().is_empty() {
            return Err(ReelmatchError::validation(format!(
                "vector {} is missing tenant_index_id",
                id
            )));
        }
        Ok(Self {
            id,
            values,
            metadata,
        })
    }
}
