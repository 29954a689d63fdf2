//! Bulk vector maintenance: administrative purges by tenant tag or namespace.
//!
//! The store has no delete-by-filter, so purging a tenant is query-then-delete:
//! collect up to `query_page` ids tagged with the tenant, delete them in batches
//! of `delete`, repeat for up to `max_delete_passes`. A pass that still collects
//! a full page means vectors may remain; the tenant is reported as incomplete
//! instead of the call claiming full success.
//!
//! `deletedCount` counts distinct ids. An eventually consistent store can hand
//! back ids from an earlier pass that it has acknowledged but not yet applied;
//! those are neither resubmitted nor counted twice.

use std::collections::HashSet;
use std::sync::Arc;

use reelmatch_core::config::BatchingConfig;
use reelmatch_core::{
    until_cancelled, BatchObserver, BatchProgress, BatchRunner, Filter, ReelmatchError, StoreOp,
    TracingObserver, VectorStore,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteReport {
    pub deleted_count: usize,
    pub may_be_incomplete: bool,
    pub incomplete_tenants: Vec<String>,
    pub warnings: Vec<String>,
    pub operation_id: Uuid,
}

pub struct BulkMaintenance {
    store: Arc<dyn VectorStore>,
    batching: BatchingConfig,
    observer: Arc<dyn BatchObserver>,
}

impl BulkMaintenance {
    pub fn new(store: Arc<dyn VectorStore>, batching: BatchingConfig) -> Self {
        Self {
            store,
            batching,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn BatchObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Delete every vector tagged with one of `tenant_index_ids`.
    ///
    /// On failure the error carries the number of vectors deleted before it
    /// (`ReelmatchError::completed`); those deletions are not undone.
    pub async fn delete_by_tenant_index_ids(
        &self,
        tenant_index_ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<DeleteReport, ReelmatchError> {
        let tenants = normalize_tenants(tenant_index_ids)?;
        let operation_id = Uuid::new_v4();
        let page = self.batching.query_page;
        let passes = self.batching.max_delete_passes.max(1);

        let mut deleted = 0usize;
        let mut incomplete_tenants = Vec::new();
        let mut warnings = Vec::new();

        for tenant in &tenants {
            let mut submitted: HashSet<String> = HashSet::new();
            let mut pass = 0;
            loop {
                if cancel.is_cancelled() {
                    tracing::warn!(
                        operation_id = %operation_id,
                        tenant_index_id = %tenant,
                        deleted,
                        "Tenant purge cancelled"
                    );
                    return Err(interrupted(deleted, ReelmatchError::Cancelled { next_batch: 0 }));
                }

                let lookup = async {
                    self.store
                        .find_by_filter(&Filter::tenant(tenant), page, false)
                        .await
                        .map_err(|e| ReelmatchError::store(StoreOp::Query, e))
                };
                let ids: Vec<String> = until_cancelled(cancel, lookup)
                    .await
                    .map_err(|e| interrupted(deleted, e))?
                    .into_iter()
                    .map(|m| m.id)
                    .collect();
                pass += 1;

                if ids.is_empty() {
                    break;
                }

                let collected = ids.len();
                let fresh: Vec<String> = ids
                    .into_iter()
                    .filter(|id| submitted.insert(id.clone()))
                    .collect();
                if !fresh.is_empty() {
                    self.delete_ids(&fresh, operation_id, cancel)
                        .await
                        .map_err(|e| e.with_prior_completed(deleted))?;
                    deleted += fresh.len();
                }

                tracing::info!(
                    operation_id = %operation_id,
                    tenant_index_id = %tenant,
                    pass,
                    collected,
                    deleted = fresh.len(),
                    "Deleted tenant vectors"
                );

                if collected < page {
                    break;
                }
                if pass >= passes {
                    warnings.push(format!(
                        "tenant {} still matched a full page of {} vectors after {} pass(es); more may remain",
                        tenant, page, pass
                    ));
                    incomplete_tenants.push(tenant.clone());
                    break;
                }
            }
        }

        if !incomplete_tenants.is_empty() {
            tracing::warn!(
                operation_id = %operation_id,
                incomplete = ?incomplete_tenants,
                "Tenant purge may be incomplete"
            );
        }

        Ok(DeleteReport {
            deleted_count: deleted,
            may_be_incomplete: !incomplete_tenants.is_empty(),
            incomplete_tenants,
            warnings,
            operation_id,
        })
    }

    async fn delete_ids(
        &self,
        ids: &[String],
        operation_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<(), ReelmatchError> {
        let store = self.store.as_ref();
        let runner = BatchRunner::new(
            StoreOp::Delete,
            self.batching.delete,
            operation_id,
            self.observer.as_ref(),
            cancel,
        );
        runner
            .run(
                ids,
                |id: &String| id.as_str(),
                move |chunk: Vec<String>| async move { store.delete_by_ids(&chunk).await },
            )
            .await?;
        Ok(())
    }

    /// Wipe the whole namespace. Irreversible; confirmation is the caller's job.
    pub async fn delete_all(&self) -> Result<Uuid, ReelmatchError> {
        let operation_id = Uuid::new_v4();
        tracing::warn!(
            operation_id = %operation_id,
            store = self.store.name(),
            "Deleting every vector in the namespace"
        );
        self.store
            .delete_all()
            .await
            .map_err(|e| ReelmatchError::store(StoreOp::DeleteAll, e))?;
        tracing::info!(operation_id = %operation_id, "Namespace purged");
        Ok(operation_id)
    }
}

/// Trim, reject blanks, drop repeats (first occurrence keeps its position).
fn normalize_tenants(ids: &[String]) -> Result<Vec<String>, ReelmatchError> {
    if ids.is_empty() {
        return Err(ReelmatchError::validation(
            "tenantIndexIds must contain at least one id",
        ));
    }
    let mut seen = HashSet::new();
    let mut tenants = Vec::with_capacity(ids.len());
    for id in ids {
        let id = id.trim();
        if id.is_empty() {
            return Err(ReelmatchError::validation(
                "tenantIndexIds must not contain blank ids",
            ));
        }
        if seen.insert(id.to_string()) {
            tenants.push(id.to_string());
        }
    }
    Ok(tenants)
}

/// A failure that is not itself a batch sequence still reports committed deletes.
fn interrupted(deleted: usize, cause: ReelmatchError) -> ReelmatchError {
    if deleted == 0 {
        return cause;
    }
    ReelmatchError::Interrupted {
        op: StoreOp::Delete,
        completed: deleted,
        progress: BatchProgress::default(),
        cause: Box::new(cause),
    }
}

// ============================================================================
// TESTS
// ============================================================================
