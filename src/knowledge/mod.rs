//! Knowledge Base Module
//! Mission: Idempotent ingestion from lifecycle events, hybrid-score retrieval

pub mod ingestion;
pub mod models;
pub mod query;

pub use ingestion::KnowledgeIngestionPipeline;
pub use query::KnowledgeQueryService;
