//! Sequential batch dispatch with per-batch failure attribution.
//!
//! Batches run one after another. The first failing batch stops the sequence:
//! batches already sent stay committed, the rest are reported as never attempted.
//! A cancelled token stops the sequence before the next dispatch; the batch in
//! flight is allowed to finish.

use std::future::Future;

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::ReelmatchError;
use crate::events::{BatchEvent, BatchEventKind, BatchObserver};
use crate::store::{StoreError, StoreOp};

/// Where a batch sequence got to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub total_batches: usize,
    pub completed_batches: usize,
    pub failed_batch: Option<usize>,
    pub completed_ids: Vec<String>,
    pub failed_ids: Vec<String>,
    pub unattempted_ids: Vec<String>,
}

impl BatchProgress {
    pub fn unattempted_batches(&self) -> usize {
        self.total_batches - self.completed_batches - usize::from(self.failed_batch.is_some())
    }
}

/// Outputs of a fully completed sequence, one per batch.
#[derive(Debug)]
pub struct BatchRun<R> {
    pub outputs: Vec<R>,
    pub progress: BatchProgress,
}

pub struct BatchRunner<'a> {
    op: StoreOp,
    batch_size: usize,
    operation_id: Uuid,
    observer: &'a dyn BatchObserver,
    cancel: &'a CancellationToken,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        op: StoreOp,
        batch_size: usize,
        operation_id: Uuid,
        observer: &'a dyn BatchObserver,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            op,
            batch_size: batch_size.max(1),
            operation_id,
            observer,
            cancel,
        }
    }

    fn emit(&self, batch_index: usize, total_batches: usize, batch_len: usize, kind: BatchEventKind) {
        self.observer.on_event(&BatchEvent {
            operation_id: self.operation_id,
            op: self.op,
            batch_index,
            total_batches,
            batch_len,
            kind,
            at: Utc::now(),
        });
    }

    /// Dispatch `items` in chunks of at most `batch_size`, calling `send` once per chunk.
    pub async fn run<T, R, I, F, Fut>(
        &self,
        items: &[T],
        id_of: I,
        mut send: F,
    ) -> Result<BatchRun<R>, ReelmatchError>
    where
        T: Clone,
        I: Fn(&T) -> &str,
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = Result<R, StoreError>>,
    {
        let chunks: Vec<&[T]> = items.chunks(self.batch_size).collect();
        let total = chunks.len();
        let ids_of = |chunk: &[T]| -> Vec<String> {
            chunk.iter().map(|t| id_of(t).to_string()).collect()
        };
        let remaining_ids = |from: usize| -> Vec<String> {
            chunks[from..].iter().flat_map(|c| ids_of(*c)).collect()
        };

        let mut progress = BatchProgress {
            total_batches: total,
            ..BatchProgress::default()
        };
        let mut outputs = Vec::with_capacity(total);

        for (index, chunk) in chunks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                self.emit(index, total, chunk.len(), BatchEventKind::Cancelled);
                progress.unattempted_ids = remaining_ids(index);
                return Err(ReelmatchError::Interrupted {
                    op: self.op,
                    completed: progress.completed_ids.len(),
                    progress,
                    cause: Box::new(ReelmatchError::Cancelled { next_batch: index }),
                });
            }

            let ids = ids_of(*chunk);
            self.emit(index, total, chunk.len(), BatchEventKind::Started);

            match send(chunk.to_vec()).await {
                Ok(output) => {
                    self.emit(index, total, chunk.len(), BatchEventKind::Completed);
                    progress.completed_batches += 1;
                    progress.completed_ids.extend(ids);
                    outputs.push(output);
                }
                Err(source) => {
                    self.emit(
                        index,
                        total,
                        chunk.len(),
                        BatchEventKind::Failed {
                            error: source.to_string(),
                        },
                    );
                    progress.failed_batch = Some(index);
                    progress.failed_ids = ids.clone();
                    progress.unattempted_ids = remaining_ids(index + 1);
                    return Err(ReelmatchError::Interrupted {
                        op: self.op,
                        completed: progress.completed_ids.len(),
                        progress,
                        cause: Box::new(ReelmatchError::Store {
                            op: self.op,
                            batch_index: index,
                            ids,
                            source,
                        }),
                    });
                }
            }
        }

        Ok(BatchRun { outputs, progress })
    }
}

/// Await a single (non-batched) call unless `cancel` fires first.
///
/// The losing future is dropped, so an abandoned HTTP call is aborted rather
/// than left running past the caller's deadline.
pub async fn until_cancelled<T, Fut>(
    cancel: &CancellationToken,
    fut: Fut,
) -> Result<T, ReelmatchError>
where
    Fut: Future<Output = Result<T, ReelmatchError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ReelmatchError::Cancelled { next_batch: 0 }),
        result = fut => result,
    }
}
