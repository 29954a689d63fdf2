//! Similarity search subsystem: nearest neighbours within one tenant partition.
//!
//! Two entry modes share the same post-processing:
//! - **text**: embed the query text, search clip vectors of the tenant
//! - **seed asset**: reuse the asset's own stored clip vector as the query
//!
//! Results are reduced to one hit per source asset (highest score, first seen
//! on ties) and then sorted by score descending. A search is all-or-nothing.

use std::collections::HashMap;
use std::sync::Arc;

use reelmatch_core::config::{BatchingConfig, SearchConfig};
use reelmatch_core::store::{SCOPE, TENANT_INDEX_ID};
use reelmatch_core::{
    EmbeddingProvider, Filter, Match, QueryRequest, ReelmatchError, Scope, SearchResult, StoreOp,
    VectorStore,
};

/// What to search with.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    Text(String),
    SeedAsset(String),
}

pub struct SimilaritySearch {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    search: SearchConfig,
    max_top_k: usize,
}

impl SimilaritySearch {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        search: SearchConfig,
        batching: &BatchingConfig,
    ) -> Self {
        Self {
            store,
            provider,
            search,
            max_top_k: batching.max_top_k,
        }
    }

    /// Run a search. `top_k` falls back to the per-mode default and is clamped
    /// to `[1, max_top_k]`.
    pub async fn search(
        &self,
        query: &SearchQuery,
        tenant_index_id: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, ReelmatchError> {
        let tenant_index_id = tenant_index_id.trim();
        if tenant_index_id.is_empty() {
            return Err(ReelmatchError::validation("tenantIndexId is required"));
        }
        match query {
            SearchQuery::Text(text) => {
                self.search_by_text(text, tenant_index_id, top_k.unwrap_or(self.search.text_top_k))
                    .await
            }
            SearchQuery::SeedAsset(asset_id) => {
                self.search_by_asset(
                    asset_id,
                    tenant_index_id,
                    top_k.unwrap_or(self.search.seed_top_k),
                )
                .await
            }
        }
    }

    pub async fn search_by_text(
        &self,
        text: &str,
        tenant_index_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, ReelmatchError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReelmatchError::validation("queryText must not be empty"));
        }

        let vector = self.provider.embed_text(text).await.map_err(|e| {
            tracing::error!(
                provider = self.provider.name(),
                error = %e,
                "Failed to embed search text"
            );
            ReelmatchError::from(e)
        })?;

        let results = self.query_tenant(vector, tenant_index_id, top_k).await?;
        tracing::info!(
            tenant_index_id,
            results = results.len(),
            "Text search complete"
        );
        Ok(results)
    }

    pub async fn search_by_asset(
        &self,
        asset_id: &str,
        tenant_index_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, ReelmatchError> {
        let asset_id = asset_id.trim();
        if asset_id.is_empty() {
            return Err(ReelmatchError::validation("assetId must not be empty"));
        }

        let seed_filter = Filter::source_asset(asset_id).eq(SCOPE, Scope::Clip.as_str());
        let seed = self
            .store
            .find_by_filter(&seed_filter, 1, true)
            .await
            .map_err(|e| ReelmatchError::store(StoreOp::Query, e))?
            .into_iter()
            .next()
            .filter(|m| !m.values.is_empty())
            .ok_or_else(|| {
                ReelmatchError::not_found(format!("no clip embedding stored for asset {}", asset_id))
            })?;

        tracing::debug!(asset_id, seed_id = %seed.id, "Using stored clip vector as query");

        let results = self.query_tenant(seed.values, tenant_index_id, top_k).await?;
        tracing::info!(
            asset_id,
            tenant_index_id,
            results = results.len(),
            "Seed asset search complete"
        );
        Ok(results)
    }

    async fn query_tenant(
        &self,
        vector: Vec<f32>,
        tenant_index_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, ReelmatchError> {
        let request = QueryRequest {
            vector,
            filter: Filter::new()
                .eq(TENANT_INDEX_ID, tenant_index_id)
                .eq(SCOPE, Scope::Clip.as_str()),
            top_k: top_k.clamp(1, self.max_top_k.max(1)),
            include_metadata: true,
            include_values: false,
        };
        let matches = self
            .store
            .query(&request)
            .await
            .map_err(|e| ReelmatchError::store(StoreOp::Query, e))?;
        Ok(dedupe_and_rank(matches))
    }
}

/// Keep the best match per source asset, then sort by score descending.
///
/// Ties on score keep store order: the first match seen for an asset wins over a
/// later equal score, and the final sort is stable.
pub fn dedupe_and_rank(matches: Vec<Match>) -> Vec<SearchResult> {
    let mut best: Vec<SearchResult> = Vec::new();
    let mut slot_of: HashMap<String, usize> = HashMap::new();

    for m in matches {
        let Some(metadata) = m.metadata else {
            tracing::warn!(id = %m.id, "Dropping match without metadata");
            continue;
        };
        match slot_of.get(&metadata.source_asset_id) {
            Some(&slot) => {
                if m.score > best[slot].score {
                    best[slot] = SearchResult {
                        id: m.id,
                        score: m.score,
                        metadata,
                    };
                }
            }
            None => {
                slot_of.insert(metadata.source_asset_id.clone(), best.len());
                best.push(SearchResult {
                    id: m.id,
                    score: m.score,
                    metadata,
                });
            }
        }
    }

    best.sort_by(|a, b| b.score.total_cmp(&a.score));
    best
}

// ============================================================================
// TESTS
// ============================================================================
