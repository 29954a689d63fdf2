//! Test doubles shared by the subsystem unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reelmatch_core::{
    EmbeddingProvider, Filter, InMemoryStore, Match, ProviderError, QueryRequest, Scope, Segment,
    StoreError, StoreOp, VectorRecord, VectorStore, VideoEmbedding,
};

pub const DIMS: usize = 4;

pub fn unit(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIMS];
    v[axis % DIMS] = 1.0;
    v
}

pub fn clip(axis: usize, start: f64) -> Segment {
    Segment {
        scope: Scope::Clip,
        start,
        end: start + 6.0,
        values: unit(axis),
    }
}

// ------------------------------------------------------------------
// Provider
// ------------------------------------------------------------------

/// Provider answering from a fixed table and counting calls.
#[derive(Default)]
pub struct StubProvider {
    videos: HashMap<String, VideoEmbedding>,
    text_vector: Option<Vec<f32>>,
    delay: Option<Duration>,
    video_calls: AtomicUsize,
    text_calls: AtomicUsize,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_video(mut self, asset_id: &str, asset_name: &str, segments: Vec<Segment>) -> Self {
        self.videos.insert(
            asset_id.to_string(),
            VideoEmbedding {
                asset_name: asset_name.to_string(),
                segments,
            },
        );
        self
    }

    pub fn with_text_vector(mut self, values: Vec<f32>) -> Self {
        self.text_vector = Some(values);
        self
    }

    /// Sleep this long inside every `embed_video` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn video_calls(&self) -> usize {
        self.video_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for StubProvider {
    async fn embed_video(
        &self,
        asset_id: &str,
        _tenant_index_id: &str,
    ) -> Result<VideoEmbedding, ProviderError> {
        self.video_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.videos.get(asset_id).cloned().ok_or_else(|| ProviderError::Api {
            code: 404,
            message: format!("video {} not found", asset_id),
        })
    }

    async fn embed_text(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);
        self.text_vector.clone().ok_or(ProviderError::Timeout)
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "stub"
    }
}

// ------------------------------------------------------------------
// Store
// ------------------------------------------------------------------

/// In-memory store that records batch sizes per operation and can be told to
/// fail a specific upsert call or to answer queries from a script.
pub struct InstrumentedStore {
    inner: InMemoryStore,
    batch_sizes: Mutex<HashMap<StoreOp, Vec<usize>>>,
    fail_upsert_call: Option<usize>,
    fail_delete_call: Option<usize>,
    lagging_deletes: usize,
    deferred_deletes: Mutex<Vec<String>>,
    filter_delay: Option<Duration>,
    scripted_matches: Option<Vec<Match>>,
    upsert_calls: AtomicUsize,
    delete_calls: AtomicUsize,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(DIMS),
            batch_sizes: Mutex::new(HashMap::new()),
            fail_upsert_call: None,
            fail_delete_call: None,
            lagging_deletes: 0,
            deferred_deletes: Mutex::new(Vec::new()),
            filter_delay: None,
            scripted_matches: None,
            upsert_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
        }
    }

    /// Fail the n-th (0-based) upsert call.
    pub fn failing_upsert(mut self, call: usize) -> Self {
        self.fail_upsert_call = Some(call);
        self
    }

    /// Fail the n-th (0-based) delete call.
    pub fn failing_delete(mut self, call: usize) -> Self {
        self.fail_delete_call = Some(call);
        self
    }

    /// Acknowledge the first `calls` delete calls but apply them only after the
    /// next filter lookup has answered, like an eventually consistent store.
    pub fn lagging_deletes(mut self, calls: usize) -> Self {
        self.lagging_deletes = calls;
        self
    }

    /// Sleep this long inside every `find_by_filter` call.
    pub fn with_filter_delay(mut self, delay: Duration) -> Self {
        self.filter_delay = Some(delay);
        self
    }

    /// Answer every similarity query with these matches, in this order.
    pub fn with_scripted_matches(mut self, matches: Vec<Match>) -> Self {
        self.scripted_matches = Some(matches);
        self
    }

    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }

    pub fn batch_sizes(&self, op: StoreOp) -> Vec<usize> {
        self.batch_sizes
            .lock()
            .unwrap()
            .get(&op)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, op: StoreOp, len: usize) {
        self.batch_sizes
            .lock()
            .unwrap()
            .entry(op)
            .or_default()
            .push(len);
    }

    pub async fn seed(&self, records: &[VectorRecord]) {
        self.inner.upsert(records).await.unwrap();
    }
}

#[async_trait]
impl VectorStore for InstrumentedStore {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Match>, StoreError> {
        self.record(StoreOp::Query, request.top_k);
        match &self.scripted_matches {
            Some(matches) => Ok(matches.clone()),
            None => self.inner.query(request).await,
        }
    }

    async fn fetch(&self, ids: &[String]) -> Result<HashMap<String, VectorRecord>, StoreError> {
        self.record(StoreOp::Fetch, ids.len());
        self.inner.fetch(ids).await
    }

    async fn fetch_ids(&self, ids: &[String]) -> Result<Vec<String>, StoreError> {
        self.record(StoreOp::Fetch, ids.len());
        self.inner.fetch_ids(ids).await
    }

    async fn upsert(&self, records: &[VectorRecord]) -> Result<(), StoreError> {
        self.record(StoreOp::Upsert, records.len());
        let call = self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_upsert_call == Some(call) {
            return Err(StoreError::Api {
                code: 500,
                message: "injected upsert failure".to_string(),
            });
        }
        self.inner.upsert(records).await
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<(), StoreError> {
        self.record(StoreOp::Delete, ids.len());
        let call = self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete_call == Some(call) {
            return Err(StoreError::Api {
                code: 500,
                message: "injected delete failure".to_string(),
            });
        }
        if call < self.lagging_deletes {
            self.deferred_deletes.lock().unwrap().extend_from_slice(ids);
            return Ok(());
        }
        self.inner.delete_by_ids(ids).await
    }

    async fn delete_all(&self) -> Result<(), StoreError> {
        self.record(StoreOp::DeleteAll, 0);
        self.inner.delete_all().await
    }

    // Scripted matches only apply to similarity queries, not filter lookups.
    async fn find_by_filter(
        &self,
        filter: &Filter,
        limit: usize,
        include_values: bool,
    ) -> Result<Vec<Match>, StoreError> {
        self.record(StoreOp::Query, limit);
        if let Some(delay) = self.filter_delay {
            tokio::time::sleep(delay).await;
        }
        let found = self.inner.find_by_filter(filter, limit, include_values).await?;
        let deferred: Vec<String> = std::mem::take(&mut *self.deferred_deletes.lock().unwrap());
        if !deferred.is_empty() {
            self.inner.delete_by_ids(&deferred).await?;
        }
        Ok(found)
    }

    async fn health(&self) -> Result<serde_json::Value, StoreError> {
        self.inner.health().await
    }

    fn dimension(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "instrumented"
    }
}
