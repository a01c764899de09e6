//! Vector store boundary used by the quarry indexer.
//!
//! The [`VectorStore`] trait is object-safe so the coordinator can hold an
//! `Arc<dyn VectorStore>` regardless of the backend chosen at startup.

pub mod in_memory;
pub mod qdrant;
pub mod vector_store;

pub use in_memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;
pub use vector_store::{BoxFuture, ScoredVectorPoint, VectorPoint, VectorStore, VectorStoreError};
