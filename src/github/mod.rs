//! GitHub forge ingestion: REST discovery of closed items, GraphQL hydration
//! of their conversations, and content-addressed archival of every exchange.

pub mod archive;
pub mod ingest;
pub mod queries;

pub use archive::RawArchive;
pub use ingest::{IngestOptions, IngestSummary, Ingester};
