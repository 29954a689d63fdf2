use std::time::Duration;

use thiserror::Error;

use crate::batch::BatchProgress;
use crate::provider::ProviderError;
use crate::store::{StoreError, StoreOp};

#[derive(Error, Debug)]
pub enum ReelmatchError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingGeneration(#[from] ProviderError),

    #[error("Store {op} failed at batch {batch_index} ({} ids): {source}", .ids.len())]
    Store {
        op: StoreOp,
        batch_index: usize,
        ids: Vec<String>,
        #[source]
        source: StoreError,
    },

    /// A batch sequence stopped early. Batches already committed are not rolled back.
    #[error("{op} stopped after {completed} items: {cause}")]
    Interrupted {
        op: StoreOp,
        completed: usize,
        progress: BatchProgress,
        #[source]
        cause: Box<ReelmatchError>,
    },

    #[error("Operation cancelled before batch {next_batch}")]
    Cancelled { next_batch: usize },

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ReelmatchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Wrap a single (non-batched) store call failure.
    pub fn store(op: StoreOp, source: StoreError) -> Self {
        Self::Store {
            op,
            batch_index: 0,
            ids: Vec::new(),
            source,
        }
    }

    /// Items committed by write batches before the failure. Read sequences
    /// (fetch) commit nothing, so they report 0.
    pub fn completed(&self) -> usize {
        match self {
            Self::Interrupted { op, completed, .. } if op.is_write() => *completed,
            _ => 0,
        }
    }

    /// Add work committed by earlier sequences of the same operation.
    pub fn with_prior_completed(self, prior: usize) -> Self {
        match self {
            Self::Interrupted {
                op,
                completed,
                progress,
                cause,
            } => Self::Interrupted {
                op,
                completed: completed + prior,
                progress,
                cause,
            },
            other => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        match self {
            Self::DeadlineExceeded(_) | Self::Cancelled { .. } => true,
            Self::Store { source, .. } => source.is_timeout(),
            Self::EmbeddingGeneration(e) => e.is_timeout(),
            Self::Interrupted { cause, .. } => cause.is_timeout(),
            _ => false,
        }
    }
}
