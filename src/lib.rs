//! Feed ingestion and LLM summarization pipeline.
//!
//! Two sequential stages share a SQLite store: ingestion resolves feeds,
//! fetches them with conditional requests, and persists deduplicated items;
//! summarization selects eligible items and turns them into validated,
//! structured summaries.

pub mod config;
pub mod discovery;
pub mod extractor;
pub mod fetcher;
pub mod ingest;
pub mod llm;
pub mod store;
pub mod summarizer;
pub mod types;

pub use config::{load_sources, Settings, SourceConfig};
pub use fetcher::Fetcher;
pub use ingest::{run_ingest, IngestReport};
pub use llm::{select_provider, LlmClient, MockLlmClient};
pub use store::{url_hash, Store};
pub use summarizer::{run_summarizer, SummaryReport};
pub use types::{DigestError, Item, ItemStatus, Result, Source, SourceKind, Summary};
