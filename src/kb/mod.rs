//! The knowledge base: bounded `kb_document` rows built from the projected
//! views, embeddings with provenance, and keyword / vector / hybrid search.

pub mod builder;
pub mod retrieval;

pub use builder::{build_documents, KbDocument};
pub use retrieval::{Retriever, RrfWeights, SearchMode, SearchResult};
