//! Pinecone data-plane client (REST/JSON).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use super::{Filter, QueryRequest, StoreError, VectorStore};
use crate::config::StoreConfig;
use crate::models::{Match, VectorMetadata, VectorRecord};

// ============================================================================
// Wire structs (private)
// ============================================================================

fn filter_is_empty(filter: &&Filter) -> bool {
    filter.is_empty()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PineconeQuery<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    #[serde(skip_serializing_if = "filter_is_empty")]
    filter: &'a Filter,
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

// Records and matches are parsed loosely: the namespace may hold vectors written
// by other clients, and one foreign record must not fail the whole response.

#[derive(Debug, Deserialize)]
struct PineconeQueryResponse {
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Debug, Deserialize)]
struct RawMatch {
    id: String,
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<serde_json::Value>,
    #[serde(default)]
    values: Option<Vec<f32>>,
}

impl From<RawMatch> for Match {
    fn from(raw: RawMatch) -> Self {
        let metadata = raw.metadata.and_then(|value| {
            serde_json::from_value::<VectorMetadata>(value)
                .map_err(|e| {
                    tracing::warn!(id = %raw.id, error = %e, "Ignoring unreadable match metadata");
                })
                .ok()
        });
        Match {
            id: raw.id,
            score: raw.score,
            metadata,
            values: raw.values.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PineconeFetchResponse {
    #[serde(default, alias = "records")]
    vectors: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct PineconeUpsert<'a> {
    vectors: &'a [VectorRecord],
    namespace: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PineconeDelete<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    ids: Option<&'a [String]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    delete_all: bool,
    namespace: &'a str,
}

#[derive(Debug, Deserialize)]
struct PineconeErrorResponse {
    message: Option<String>,
    error: Option<PineconeErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct PineconeErrorDetail {
    message: String,
}

// ============================================================================
// PineconeStore
// ============================================================================

#[derive(Debug, Clone)]
pub struct PineconeStore {
    client: Client,
    base_url: String,
    api_key: String,
    api_version: String,
    namespace: String,
    dimension: usize,
}

impl PineconeStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        Self::with_base_url(config, config.index_host.clone())
    }

    /// Create a client against an explicit host (for testing / local emulators).
    pub fn with_base_url(config: &StoreConfig, base_url: String) -> Result<Self, StoreError> {
        let api_key = config.resolved_api_key();
        if api_key.is_empty() {
            return Err(StoreError::MissingApiKey);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_version: config.api_version.clone(),
            namespace: config.namespace.clone(),
            dimension: config.dimension,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn fetch_raw(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, serde_json::Value>, StoreError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut params: Vec<(&str, &str)> = ids.iter().map(|id| ("ids", id.as_str())).collect();
        params.push(("namespace", &self.namespace));

        let response = self
            .client
            .get(self.url("/vectors/fetch"))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
            .query(&params)
            .send()
            .await?;
        let response: PineconeFetchResponse = check_status(response).await?.json().await?;
        Ok(response.vectors)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, StoreError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", &self.api_version)
            .json(body)
            .send()
            .await?;
        check_status(response).await
    }
}

async fn check_status(response: Response) -> Result<Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<PineconeErrorResponse>(&body)
        .ok()
        .and_then(|e| e.error.map(|d| d.message).or(e.message))
        .unwrap_or(body);

    tracing::error!(code = status.as_u16(), message = %message, "Pinecone API error");

    Err(StoreError::Api {
        code: status.as_u16(),
        message,
    })
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Match>, StoreError> {
        if request.vector.len() != self.dimension {
            return Err(StoreError::InvalidDimensions {
                expected: self.dimension,
                actual: request.vector.len(),
            });
        }

        let body = PineconeQuery {
            namespace: &self.namespace,
            vector: &request.vector,
            filter: &request.filter,
            top_k: request.top_k,
            include_metadata: request.include_metadata,
            include_values: request.include_values,
        };
        let response: PineconeQueryResponse = self.post("/query", &body).await?.json().await?;
        Ok(response.matches.into_iter().map(Match::from).collect())
    }

    /// Records that do not carry this crate's metadata are left out.
    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, VectorRecord>, StoreError> {
        let raw = self.fetch_raw(ids).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(id, value)| match serde_json::from_value::<VectorRecord>(value) {
                Ok(record) => Some((id, record)),
                Err(e) => {
                    tracing::warn!(id = %id, error = %e, "Skipping unreadable fetched record");
                    None
                }
            })
            .collect())
    }

    async fn fetch_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        Ok(self.fetch_raw(ids).await?.into_keys().collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let body = PineconeUpsert {
            vectors: records,
            namespace: &self.namespace,
        };
        self.post("/vectors/upsert", &body).await?;
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let body = PineconeDelete {
            ids: Some(ids),
            delete_all: false,
            namespace: &self.namespace,
        };
        self.post("/vectors/delete", &body).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        let body = PineconeDelete {
            ids: None,
            delete_all: true,
            namespace: &self.namespace,
        };
        self.post("/vectors/delete", &body).await?;
        Ok(())
    }

    async fn health(&self) -> Result<serde_json::Value, StoreError> {
        let stats: serde_json::Value = self
            .post("/describe_index_stats", &serde_json::json!({}))
            .await?
            .json()
            .await?;
        Ok(serde_json::json!({
            "backend": "pinecone",
            "dimension": self.dimension,
            "namespace": self.namespace,
            "stats": stats,
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "pinecone"
    }
}

// ============================================================================
// TESTS
// ============================================================================
