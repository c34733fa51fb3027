pub mod descriptor;
pub mod engine;

pub use descriptor::{GraphQuery, QueryDescriptor, SimilarityQuery, StructuredQuery};
pub use engine::{QueryError, SearchEngine, SearchResponse, SearchResult};
