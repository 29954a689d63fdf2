//! Structured batch events.
//!
//! Batched store operations report every batch transition to a `BatchObserver`.
//! The default observer forwards to `tracing`; tests record events and assert on them.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::store::StoreOp;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchEventKind {
    Started,
    Completed,
    Failed { error: String },
    /// The batch was never dispatched because the operation was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEvent {
    pub operation_id: Uuid,
    pub op: StoreOp,
    pub batch_index: usize,
    pub total_batches: usize,
    pub batch_len: usize,
    #[serde(flatten)]
    pub kind: BatchEventKind,
    pub at: DateTime<Utc>,
}

pub trait BatchObserver: Send + Sync {
    fn on_event(&self, event: &BatchEvent);
}

/// Emits each event as a tracing record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl BatchObserver for TracingObserver {
    fn on_event(&self, event: &BatchEvent) {
        match &event.kind {
            BatchEventKind::Started => tracing::debug!(
                operation_id = %event.operation_id,
                op = %event.op,
                batch_index = event.batch_index,
                total_batches = event.total_batches,
                batch_len = event.batch_len,
                "Batch started"
            ),
            BatchEventKind::Completed => tracing::info!(
                operation_id = %event.operation_id,
                op = %event.op,
                batch_index = event.batch_index,
                total_batches = event.total_batches,
                batch_len = event.batch_len,
                "Batch completed"
            ),
            BatchEventKind::Failed { error } => tracing::error!(
                operation_id = %event.operation_id,
                op = %event.op,
                batch_index = event.batch_index,
                total_batches = event.total_batches,
                batch_len = event.batch_len,
                error = %error,
                "Batch failed"
            ),
            BatchEventKind::Cancelled => tracing::warn!(
                operation_id = %event.operation_id,
                op = %event.op,
                batch_index = event.batch_index,
                total_batches = event.total_batches,
                "Batch not dispatched: operation cancelled"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<BatchEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BatchEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Events of a given operation kind, in emission order.
    pub fn events_for(&self, op: StoreOp) -> Vec<BatchEvent> {
        self.events().into_iter().filter(|e| e.op == op).collect()
    }
}

impl BatchObserver for RecordingObserver {
    fn on_event(&self, event: &BatchEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
