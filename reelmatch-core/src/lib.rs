pub mod batch;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod provider;
pub mod sanitize;
pub mod store;

pub use batch::{until_cancelled, BatchProgress, BatchRun, BatchRunner};
pub use config::ReelmatchConfig;
pub use error::ReelmatchError;
pub use events::{BatchEvent, BatchEventKind, BatchObserver, RecordingObserver, TracingObserver};
pub use models::{Match, Scope, SearchResult, VectorMetadata, VectorRecord};
pub use provider::{
    create_provider, EmbeddingProvider, ProviderError, Segment, TwelveLabsClient, VideoEmbedding,
    MARENGO_DIMENSIONS,
};
pub use sanitize::{sanitize_id, vector_id};
pub use store::{
    create_store, Filter, InMemoryStore, PineconeStore, QueryRequest, StoreError, StoreOp,
    VectorStore,
};
