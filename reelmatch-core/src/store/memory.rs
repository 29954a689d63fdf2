use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{Filter, QueryRequest, StoreError, VectorStore};
use crate::models::{Match, VectorRecord};

/// Process-local vector store. Records keep insertion order, which is also the
/// tie-break order for equal scores.
pub struct InMemoryStore {
    dimension: usize,
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn to_match(record: &VectorRecord, score: f32, request: &QueryRequest) -> Match {
        Match {
            id: record.id.clone(),
            score,
            metadata: request.include_metadata.then(|| record.metadata.clone()),
            values: if request.include_values {
                record.values.clone()
            } else {
                Vec::new()
            },
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Match>, StoreError> {
        if request.vector.len() != self.dimension {
            return Err(StoreError::InvalidDimensions {
                expected: self.dimension,
                actual: request.vector.len(),
            });
        }

        let records = self.records.read().await;
        let mut scored: Vec<(&VectorRecord, f32)> = records
            .iter()
            .filter(|r| request.filter.matches(&r.metadata))
            .map(|r| (r, cosine_similarity(&request.vector, &r.values)))
            .collect();

        // stable: equal scores stay in insertion order
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(request.top_k);

        Ok(scored
            .into_iter()
            .map(|(r, score)| Self::to_match(r, score, request))
            .collect())
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, VectorRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| ids.contains(&r.id))
            .map(|r| (r.id.clone(), r.clone()))
            .collect())
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        let mut store = self.records.write().await;
        for record in records {
            if record.values.len() != self.dimension {
                return Err(StoreError::InvalidDimensions {
                    expected: self.dimension,
                    actual: record.values.len(),
                });
            }
            match store.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record.clone(),
                None => store.push(record.clone()),
            }
        }
        debug!(count = records.len(), "Upserted vectors into memory store");
        Ok(())
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        let mut store = self.records.write().await;
        store.retain(|r| !ids.contains(&r.id));
        Ok(())
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn find_by_filter(
        &self,
        filter: &Filter,
        limit: usize,
        include_values: bool,
    ) -> Result<Vec<Match>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|r| filter.matches(&r.metadata))
            .take(limit)
            .map(|r| Match {
                id: r.id.clone(),
                score: 0.0,
                metadata: Some(r.metadata.clone()),
                values: if include_values {
                    r.values.clone()
                } else {
                    Vec::new()
                },
            })
            .collect())
    }

    async fn health(&self) -> Result<serde_json::Value, StoreError> {
        Ok(serde_json::json!({
            "backend": "memory",
            "dimension": self.dimension,
            "vectorCount": self.len().await,
        }))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "memory"
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
