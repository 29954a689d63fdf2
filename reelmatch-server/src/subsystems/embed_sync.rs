//! Embedding sync subsystem: turns a video asset into stored vectors once.
//!
//! `ensure_embedded` flow:
//! 1. Asset-level existence check (`source_asset_id` filter, limit 1)
//! 2. Provider call for the asset's segment embeddings
//! 3. Per-id existence check in fetch batches, dropping ids already stored
//! 4. Upsert of the remainder in small batches
//!
//! Steps 1 and 2 are single calls raced against the cancellation token, so a
//! slow store or provider cannot hold the call past its deadline.
//!
//! The existence checks make retries safe but not atomic: two concurrent calls
//! for the same asset can both pass step 1. Ids are deterministic, so the second
//! write overwrites the first rather than duplicating it; the cost is a wasted
//! provider call. Callers needing strict at-most-once must lock on the asset id.

use std::collections::HashSet;
use std::sync::Arc;

use reelmatch_core::config::BatchingConfig;
use reelmatch_core::{
    until_cancelled, vector_id, BatchObserver, BatchRunner, EmbeddingProvider, Filter,
    ReelmatchError, StoreOp, TracingObserver, VectorMetadata, VectorRecord, VectorStore,
    VideoEmbedding,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of a successful `ensure_embedded` call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    pub written: usize,
    /// The asset already had vectors; the provider was not called.
    pub skipped: bool,
    /// Ids the provider produced that were already stored.
    pub already_present: usize,
    pub operation_id: Uuid,
}

pub struct EmbeddingSync {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    batching: BatchingConfig,
    observer: Arc<dyn BatchObserver>,
}

impl EmbeddingSync {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        batching: BatchingConfig,
    ) -> Self {
        Self {
            store,
            provider,
            batching,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Make sure `asset_id` has vectors in the store, generating them at most once.
    pub async fn ensure_embedded(
        &self,
        asset_id: &str,
        tenant_index_id: &str,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome, ReelmatchError> {
        let asset_id = asset_id.trim();
        let tenant_index_id = tenant_index_id.trim();
        if asset_id.is_empty() {
            return Err(ReelmatchError::validation("assetId is required"));
        }
        if tenant_index_id.is_empty() {
            return Err(ReelmatchError::validation("tenantIndexId is required"));
        }

        let operation_id = Uuid::new_v4();

        if until_cancelled(cancel, self.is_embedded(asset_id)).await? {
            tracing::info!(
                operation_id = %operation_id,
                asset_id,
                tenant_index_id,
                "Asset already embedded, skipping"
            );
            return Ok(SyncOutcome {
                written: 0,
                skipped: true,
                already_present: 0,
                operation_id,
            });
        }

        let generate = async {
            self.provider
                .embed_video(asset_id, tenant_index_id)
                .await
                .map_err(|e| {
                    tracing::error!(
                        operation_id = %operation_id,
                        asset_id,
                        provider = self.provider.name(),
                        error = %e,
                        "Failed to generate video embeddings"
                    );
                    ReelmatchError::from(e)
                })
        };
        let embedding = until_cancelled(cancel, generate).await.map_err(|e| {
            if matches!(e, ReelmatchError::Cancelled { .. }) {
                tracing::warn!(
                    operation_id = %operation_id,
                    asset_id,
                    "Embedding generation abandoned at deadline"
                );
            }
            e
        })?;

        if embedding.segments.is_empty() {
            tracing::info!(
                operation_id = %operation_id,
                asset_id,
                "Provider returned no segments, nothing to write"
            );
            return Ok(SyncOutcome {
                written: 0,
                skipped: false,
                already_present: 0,
                operation_id,
            });
        }

        let records = build_records(asset_id, tenant_index_id, embedding)?;
        let total = records.len();
        let fresh = self.drop_existing(records, operation_id, cancel).await?;
        let already_present = total - fresh.len();

        if fresh.is_empty() {
            tracing::info!(
                operation_id = %operation_id,
                asset_id,
                already_present,
                "All segment vectors already stored"
            );
            return Ok(SyncOutcome {
                written: 0,
                skipped: false,
                already_present,
                operation_id,
            });
        }

        let store = self.store.as_ref();
        let runner = BatchRunner::new(
            StoreOp::Upsert,
            self.batching.upsert,
            operation_id,
            self.observer.as_ref(),
            cancel,
        );
        runner
            .run(
                &fresh,
                |r: &VectorRecord| r.id.as_str(),
                move |chunk: Vec<VectorRecord>| async move { store.upsert(&chunk).await },
            )
            .await?;

        tracing::info!(
            operation_id = %operation_id,
            asset_id,
            tenant_index_id,
            written = fresh.len(),
            already_present,
            "Asset embedded"
        );

        Ok(SyncOutcome {
            written: fresh.len(),
            skipped: false,
            already_present,
            operation_id,
        })
    }

    /// Whether any vector tagged with this asset exists, in any scope or tenant.
    async fn is_embedded(&self, asset_id: &str) -> Result<bool, ReelmatchError> {
        let matches = self
            .store
            .find_by_filter(&Filter::source_asset(asset_id), 1, false)
            .await
            .map_err(|e| ReelmatchError::store(StoreOp::Query, e))?;
        Ok(!matches.is_empty())
    }

    /// Remove records whose id is already stored. Guards against partial earlier
    /// writes that the asset-level check can miss.
    async fn drop_existing(
        &self,
        records: Vec<VectorRecord>,
        operation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<Vec<VectorRecord>, ReelmatchError> {
        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        let store = self.store.as_ref();
        let runner = BatchRunner::new(
            StoreOp::Fetch,
            self.batching.fetch,
            operation_id,
            self.observer.as_ref(),
            cancel,
        );
        let run = runner
            .run(
                &ids,
                |id: &String| id.as_str(),
                move |chunk: Vec<String>| async move { store.fetch_ids(&chunk).await },
            )
            .await?;

        let existing: HashSet<String> = run.outputs.into_iter().flatten().collect();
        Ok(records
            .into_iter()
            .filter(|r| !existing.contains(&r.id))
            .collect())
    }
}

/// Shape provider segments into store records. Segment order defines the index.
pub fn build_records(
    asset_id: &str,
    tenant_index_id: &str,
    embedding: VideoEmbedding,
) -> Result<Vec<VectorRecord>, ReelmatchError> {
    let VideoEmbedding {
        asset_name,
        segments,
    } = embedding;

    segments
        .into_iter()
        .enumerate()
        .map(|(index, segment)| {
            VectorRecord::new(
                vector_id(&asset_name, index),
                segment.values,
                VectorMetadata {
                    asset_file: asset_name.clone(),
                    segment_index: segment_index(index)?,
                    start_time: segment.start,
                    end_time: segment.end,
                    scope: segment.scope,
                    source_asset_id: asset_id.to_string(),
                    tenant_index_id: tenant_index_id.to_string(),
                },
            )
        })
        .collect()
}

fn segment_index(index: usize) -> Result<u32, ReelmatchError> {
    u32::try_from(index).map_err(|_| {
        ReelmatchError::validation(format!("segment index {} exceeds the u32 range", index))
    })
}

// ============================================================================
// TESTS
// ============================================================================
