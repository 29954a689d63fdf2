pub mod search;
pub mod vector;

pub use search::{Match, SearchResult};
pub use vector::{Scope, VectorMetadata, VectorRecord};
