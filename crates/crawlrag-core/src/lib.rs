//! All retrieval logic independent of how the app is run.
//!
//! Crawled pages live in a folder the crawler writes to. crawlrag chunks and
//! embeds them into an in-memory [`VectorStore`], answers queries against it
//! and persists it as a [`Snapshot`] in its own app data directory (see [app_data]).

pub mod app_data;
pub mod chunks;
pub mod config;
pub mod documents;
pub mod embedder;
pub mod index;
pub mod llm;
pub mod logging;
pub mod ollama;
pub mod snapshot;
pub mod store;
pub mod throttle;
pub mod validate;
pub mod watcher;

pub use app_data::app_data_dir;
pub use chunks::{chunk, chunk_text, Boundary, Chunk, ChunkError, ChunkerConfig, DEFAULT_MAX_CHARS, DEFAULT_OVERLAP};
pub use config::{load_config, save_config, set_crawl_root, Config, ConfigError, LoggingConfig};
pub use documents::{scan_documents, Document, ScanError};
pub use embedder::{Embedder, EmbeddingError, HashEmbedder};
pub use index::{Answer, AnswerOptions, IngestReport, PipelineError, RetrievalPipeline, SkippedChunk};
pub use llm::{CompletionError, CompletionParams, LanguageModel, Prompt, NO_CONTEXT_REPLY};
pub use ollama::{OllamaClient, OllamaError};
pub use snapshot::{load_snapshot, load_store, save_snapshot, Snapshot, SnapshotError};
pub use store::{Metric, RecordId, SearchHit, StoreError, VectorStore, FIRST_ID};
pub use throttle::{RateLimiter, ThrottledModel};
pub use validate::{is_valid_url, validate_content, ContentRejection};
pub use watcher::{watch_documents, WatchError};

/// Returns a short status string. Used to verify the backend is wired up.
pub fn status() -> &'static str {
    "crawlrag-core ready"
}
