//! Reelmatch HTTP REST API
//!
//! Axum-based HTTP server that exposes embedding sync, similarity search and
//! vector maintenance.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions are directly testable without axum dispatch
//! machinery.
//!
//! Endpoints:
//! - POST /embeddings/sync             embed an asset once
//! - POST /search/similar              text or seed-asset search
//! - POST /maintenance/deleteByTenant  purge vectors by tenant tag
//! - POST /maintenance/deleteAll       wipe the namespace
//! - GET  /health                      store reachability
//! - GET  /version                     server version info

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use reelmatch_core::{EmbeddingProvider, ReelmatchConfig, ReelmatchError, VectorStore};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::subsystems::embed_sync::EmbeddingSync;
use crate::subsystems::maintenance::BulkMaintenance;
use crate::subsystems::similarity::{SearchQuery, SimilaritySearch};

/// Shared state for all HTTP handlers
pub struct HttpState {
    pub sync: EmbeddingSync,
    pub search: SimilaritySearch,
    pub maintenance: BulkMaintenance,
    pub store: Arc<dyn VectorStore>,
    pub config: ReelmatchConfig,
}

impl HttpState {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        config: ReelmatchConfig,
    ) -> Self {
        Self {
            sync: EmbeddingSync::new(store.clone(), provider.clone(), config.batching.clone()),
            search: SimilaritySearch::new(
                store.clone(),
                provider,
                config.search.clone(),
                &config.batching,
            ),
            maintenance: BulkMaintenance::new(store.clone(), config.batching.clone()),
            store,
            config,
        }
    }

    fn deadline(&self) -> Duration {
        Duration::from_secs(self.config.http.request_deadline_seconds.max(1))
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/embeddings/sync", post(sync_handler))
        .route("/search/similar", post(search_handler))
        .route("/maintenance/deleteByTenant", post(delete_by_tenant_handler))
        .route("/maintenance/deleteAll", post(delete_all_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Reelmatch HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

// Fields are optional so a missing field is a 400 with our message, not a 422.

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub asset_id: Option<String>,
    pub tenant_index_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest {
    pub asset_id: Option<String>,
    pub query_text: Option<String>,
    pub tenant_index_id: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteByTenantRequest {
    pub tenant_index_ids: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAllRequest {
    pub tenant_index_id: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: probes the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn VectorStore) -> (StatusCode, serde_json::Value) {
    match store.health().await {
        Ok(details) => (
            StatusCode::OK,
            json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "store": store.name(),
                "storeDetails": details,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "store": store.name(),
                "error": e.to_string(),
            }),
        ),
    }
}

/// Inner version: returns version info (pure, no IO).
pub fn version_inner() -> serde_json::Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "reelmatch/1",
    })
}

pub async fn sync_inner(state: &HttpState, req: SyncRequest) -> (StatusCode, serde_json::Value) {
    let asset_id = req.asset_id.unwrap_or_default();
    let tenant_index_id = req.tenant_index_id.unwrap_or_default();

    let (cancel, _guard) = deadline_token(state.deadline());
    match state
        .sync
        .ensure_embedded(&asset_id, &tenant_index_id, &cancel)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            json!({
                "written": outcome.written,
                "skipped": outcome.skipped,
                "alreadyPresent": outcome.already_present,
                "operationId": outcome.operation_id,
            }),
        ),
        Err(e) => {
            let written = e.completed();
            let (status, mut body) = error_response(&e);
            insert(&mut body, "written", json!(written));
            (status, body)
        }
    }
}

pub async fn search_inner(state: &HttpState, req: SearchRequest) -> (StatusCode, serde_json::Value) {
    let query = match (non_blank(req.query_text), non_blank(req.asset_id)) {
        (Some(text), None) => SearchQuery::Text(text),
        (None, Some(asset_id)) => SearchQuery::SeedAsset(asset_id),
        (Some(_), Some(_)) => {
            return error_response(&ReelmatchError::validation(
                "provide either queryText or assetId, not both",
            ))
        }
        (None, None) => {
            return error_response(&ReelmatchError::validation(
                "queryText or assetId is required",
            ))
        }
    };
    let tenant_index_id = req.tenant_index_id.unwrap_or_default();

    let start = Instant::now();
    let result = with_deadline(
        state.deadline(),
        state.search.search(&query, &tenant_index_id, req.top_k),
    )
    .await;

    match result {
        Ok(results) => {
            tracing::debug!(
                took_ms = start.elapsed().as_millis() as u64,
                count = results.len(),
                "Search served"
            );
            (StatusCode::OK, json!(results))
        }
        Err(e) => error_response(&e),
    }
}

pub async fn delete_by_tenant_inner(
    state: &HttpState,
    req: DeleteByTenantRequest,
) -> (StatusCode, serde_json::Value) {
    let ids = req.tenant_index_ids.unwrap_or_default();

    let (cancel, _guard) = deadline_token(state.deadline());
    match state
        .maintenance
        .delete_by_tenant_index_ids(&ids, &cancel)
        .await
    {
        Ok(report) => (StatusCode::OK, json!(report)),
        Err(e) => {
            let deleted = e.completed();
            let (status, mut body) = error_response(&e);
            insert(&mut body, "deletedCount", json!(deleted));
            insert(&mut body, "mayBeIncomplete", json!(true));
            (status, body)
        }
    }
}

pub async fn delete_all_inner(
    state: &HttpState,
    req: DeleteAllRequest,
) -> (StatusCode, serde_json::Value) {
    let Some(tenant_index_id) = non_blank(req.tenant_index_id) else {
        return error_response(&ReelmatchError::validation("tenantIndexId is required"));
    };
    tracing::warn!(
        requested_by = %tenant_index_id,
        "Namespace wipe requested"
    );

    match with_deadline(state.deadline(), state.maintenance.delete_all()).await {
        Ok(operation_id) => (
            StatusCode::OK,
            json!({ "success": true, "operationId": operation_id }),
        ),
        Err(e) => {
            let (status, mut body) = error_response(&e);
            insert(&mut body, "success", json!(false));
            (status, body)
        }
    }
}

// ============================================================================
// Axum handler wrappers (thin, delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn sync_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<SyncRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match parse_body(payload) {
        Ok(req) => sync_inner(&state, req).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn search_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<SearchRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match parse_body(payload) {
        Ok(req) => search_inner(&state, req).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn delete_by_tenant_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<DeleteByTenantRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match parse_body(payload) {
        Ok(req) => delete_by_tenant_inner(&state, req).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

pub async fn delete_all_handler(
    State(state): State<Arc<HttpState>>,
    payload: Result<Json<DeleteAllRequest>, JsonRejection>,
) -> impl IntoResponse {
    let (status, body) = match parse_body(payload) {
        Ok(req) => delete_all_inner(&state, req).await,
        Err(rejected) => rejected,
    };
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

/// Map an error to its status and `{error, details}` body.
pub fn error_response(err: &ReelmatchError) -> (StatusCode, serde_json::Value) {
    let (status, summary) = match err {
        ReelmatchError::Validation(_) => (StatusCode::BAD_REQUEST, "Invalid request"),
        ReelmatchError::NotFound(_) => (StatusCode::NOT_FOUND, "Not found"),
        ReelmatchError::EmbeddingGeneration(_) => {
            (StatusCode::BAD_GATEWAY, "Embedding generation failed")
        }
        ReelmatchError::Store { .. } => (StatusCode::BAD_GATEWAY, "Vector store request failed"),
        ReelmatchError::Interrupted { .. } if err.is_timeout() => {
            (StatusCode::GATEWAY_TIMEOUT, "Operation stopped at deadline")
        }
        ReelmatchError::Interrupted { .. } => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Operation partially completed")
        }
        ReelmatchError::Cancelled { .. } | ReelmatchError::DeadlineExceeded(_) => {
            (StatusCode::GATEWAY_TIMEOUT, "Operation timed out")
        }
        ReelmatchError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Server misconfigured"),
    };

    if status.is_server_error() {
        tracing::error!(status = status.as_u16(), error = %err, "Request failed");
    }

    let mut body = json!({
        "error": summary,
        "details": err.to_string(),
    });
    match err {
        ReelmatchError::Store { batch_index, .. } => {
            insert(&mut body, "failedBatch", json!(batch_index));
        }
        ReelmatchError::Interrupted { progress, .. } => {
            insert(&mut body, "completed", json!(err.completed()));
            insert(&mut body, "progress", json!(progress));
        }
        _ => {}
    }
    (status, body)
}

/// Unwrap a JSON body, turning axum's plain-text rejection into a 400 with
/// the usual error body.
fn parse_body<T>(
    payload: Result<Json<T>, JsonRejection>,
) -> Result<T, (StatusCode, serde_json::Value)> {
    payload
        .map(|Json(req)| req)
        .map_err(|rejection| error_response(&ReelmatchError::validation(rejection.body_text())))
}

/// Token that cancels itself after `deadline`. Dropping the guard stops the timer.
fn deadline_token(deadline: Duration) -> (CancellationToken, DropGuard) {
    let token = CancellationToken::new();
    let timer = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(deadline) => {
                tracing::warn!(deadline_secs = deadline.as_secs(), "Request deadline reached");
                timer.cancel();
            }
            _ = timer.cancelled() => {}
        }
    });
    let guard = token.clone().drop_guard();
    (token, guard)
}

async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, ReelmatchError>
where
    F: Future<Output = Result<T, ReelmatchError>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| ReelmatchError::DeadlineExceeded(deadline))?
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn insert(body: &mut serde_json::Value, key: &str, value: serde_json::Value) {
    if let Some(obj) = body.as_object_mut() {
        obj.insert(key.to_string(), value);
    }
}

// ============================================================================
// Unit Tests: call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subsystems::test_support::{clip, unit, InstrumentedStore, StubProvider};
    use reelmatch_core::{BatchProgress, ProviderError, StoreError, StoreOp};

    const CONFIG: &str = r#"
        [store]
        backend = "memory"
        dimension = 4

        [provider]
        backend = "twelvelabs"
        base_url = "http://localhost:1"
        model = "Marengo-retrieval-2.7"
        dimension = 4
    "#;

    fn make_state(store: Arc<InstrumentedStore>, provider: StubProvider) -> HttpState {
        let config = ReelmatchConfig::from_toml(CONFIG).unwrap();
        HttpState::new(store, Arc::new(provider), config)
    }

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "reelmatch/1");
    }

    #[test]
    fn test_error_response_status_mapping() {
        let cases = [
            (ReelmatchError::validation("x"), StatusCode::BAD_REQUEST),
            (ReelmatchError::not_found("x"), StatusCode::NOT_FOUND),
            (
                ReelmatchError::EmbeddingGeneration(ProviderError::Timeout),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ReelmatchError::store(StoreOp::Query, StoreError::Timeout),
                StatusCode::BAD_GATEWAY,
            ),
            (
                ReelmatchError::DeadlineExceeded(Duration::from_secs(1)),
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, expected) in cases {
            let (status, body) = error_response(&err);
            assert_eq!(status, expected, "{}", err);
            assert!(body["error"].is_string());
            assert!(body["details"].is_string());
        }
    }

    #[test]
    fn test_interrupted_carries_counts() {
        let err = ReelmatchError::Interrupted {
            op: StoreOp::Upsert,
            completed: 5,
            progress: BatchProgress {
                total_batches: 3,
                completed_batches: 1,
                failed_batch: Some(1),
                ..BatchProgress::default()
            },
            cause: Box::new(ReelmatchError::store(
                StoreOp::Upsert,
                StoreError::Api {
                    code: 500,
                    message: "boom".to_string(),
                },
            )),
        };

        let (status, body) = error_response(&err);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["completed"], 5);
        assert_eq!(body["progress"]["failedBatch"], 1);
        assert_eq!(body["progress"]["totalBatches"], 3);
    }

    #[test]
    fn test_cancelled_interruption_is_gateway_timeout() {
        let err = ReelmatchError::Interrupted {
            op: StoreOp::Delete,
            completed: 10,
            progress: BatchProgress::default(),
            cause: Box::new(ReelmatchError::Cancelled { next_batch: 1 }),
        };
        let (status, body) = error_response(&err);
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["completed"], 10);
    }

    #[tokio::test]
    async fn test_sync_inner_missing_fields() {
        let state = make_state(Arc::new(InstrumentedStore::new()), StubProvider::new());

        let (status, body) = sync_inner(&state, SyncRequest::default()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["written"], 0);
    }

    #[tokio::test]
    async fn test_sync_inner_then_skip() {
        let store = Arc::new(InstrumentedStore::new());
        let provider = StubProvider::new().with_video("vid-1", "clip.mp4", vec![clip(0, 0.0)]);
        let state = make_state(store, provider);
        let req = || SyncRequest {
            asset_id: Some("vid-1".to_string()),
            tenant_index_id: Some("idx-a".to_string()),
        };

        let (status, body) = sync_inner(&state, req()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["written"], 1);
        assert_eq!(body["skipped"], false);

        let (_, body) = sync_inner(&state, req()).await;
        assert_eq!(body["written"], 0);
        assert_eq!(body["skipped"], true);
    }

    #[tokio::test]
    async fn test_search_inner_requires_exactly_one_mode() {
        let state = make_state(
            Arc::new(InstrumentedStore::new()),
            StubProvider::new().with_text_vector(unit(0)),
        );

        let both = SearchRequest {
            asset_id: Some("a".to_string()),
            query_text: Some("b".to_string()),
            tenant_index_id: Some("idx-a".to_string()),
            top_k: None,
        };
        let (status, _) = search_inner(&state, both).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = search_inner(&state, SearchRequest::default()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_search_inner_returns_array() {
        let state = make_state(
            Arc::new(InstrumentedStore::new()),
            StubProvider::new().with_text_vector(unit(0)),
        );
        let req = SearchRequest {
            query_text: Some("beach".to_string()),
            tenant_index_id: Some("idx-a".to_string()),
            ..SearchRequest::default()
        };

        let (status, body) = search_inner(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_array());
    }

    #[tokio::test]
    async fn test_delete_by_tenant_inner_empty_list() {
        let state = make_state(Arc::new(InstrumentedStore::new()), StubProvider::new());
        let req = DeleteByTenantRequest {
            tenant_index_ids: Some(Vec::new()),
        };

        let (status, body) = delete_by_tenant_inner(&state, req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["deletedCount"], 0);
    }

    #[tokio::test]
    async fn test_delete_all_inner_requires_tenant() {
        let state = make_state(Arc::new(InstrumentedStore::new()), StubProvider::new());

        let (status, _) = delete_all_inner(&state, DeleteAllRequest::default()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let req = DeleteAllRequest {
            tenant_index_id: Some("idx-a".to_string()),
        };
        let (status, body) = delete_all_inner(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_deadline_token_fires() {
        let (token, _guard) = deadline_token(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(2), token.cancelled())
            .await
            .expect("token should cancel at the deadline");
    }

    #[tokio::test]
    async fn test_with_deadline_maps_timeout() {
        let result: Result<(), ReelmatchError> = with_deadline(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ReelmatchError::DeadlineExceeded(_))));
    }
}
