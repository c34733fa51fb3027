pub mod coordinator;
pub mod graph;
pub mod relational;
pub mod store;
pub mod vector;

pub use coordinator::{PersistResult, StoreStatus, WriteCoordinator};
pub use graph::Neo4jGraphStore;
pub use relational::MySqlRelationalStore;
pub use store::{
    DocumentMetadata, FieldFilter, GraphFilter, GraphMatch, GraphStore, RelationalStore,
    SimilarityMatch, StoreError, StoreTag, StructuredRow, VectorStore,
};
pub use vector::QdrantVectorStore;
