//! Retrieval pipeline: chunk → embed → store on ingest, embed → search on query.
//!
//! The pipeline owns the [`VectorStore`] behind a single async mutex, so a
//! background ingest and a query can share one `Arc<RetrievalPipeline>`. The
//! lock is taken per insert and per search, never across an embedding call.
//! Dropping an in-flight `ingest` keeps the records inserted so far.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chunks::{chunk_text, Chunk, ChunkError, ChunkerConfig};
use crate::embedder::{Embedder, EmbeddingError};
use crate::llm::{answer_prompt, summary_prompt, CompletionError, CompletionParams, LanguageModel};
use crate::snapshot::Snapshot;
use crate::store::{RecordId, SearchHit, StoreError, VectorStore};

/// A chunk that was not stored, and why.
#[derive(Debug)]
pub struct SkippedChunk {
    pub chunk: Chunk,
    pub error: EmbeddingError,
}

/// Outcome of ingesting one source.
#[derive(Debug, Default)]
pub struct IngestReport {
    /// Ids of stored chunks, in sequence order.
    pub ids: Vec<RecordId>,
    /// Chunks that could not be embedded, in sequence order.
    pub skipped: Vec<SkippedChunk>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerOptions {
    pub k: usize,
    pub min_score: Option<f32>,
    /// Build the context from chunk summaries where present.
    pub use_summary: bool,
    pub params: CompletionParams,
}

impl Default for AnswerOptions {
    fn default() -> Self {
        Self {
            k: 3,
            min_score: None,
            use_summary: true,
            params: CompletionParams::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Chunks the answer was grounded on, best first. Empty means no relevant context.
    pub sources: Vec<SearchHit>,
}

struct Summarizer {
    model: Arc<dyn LanguageModel>,
    params: CompletionParams,
}

pub struct RetrievalPipeline {
    store: Mutex<VectorStore>,
    embedder: Arc<dyn Embedder>,
    summarizer: Option<Summarizer>,
}

impl RetrievalPipeline {
    /// Wrap an explicitly created store. The embedder must produce vectors of
    /// the store's dimension.
    pub fn new(store: VectorStore, embedder: Arc<dyn Embedder>) -> Result<Self, PipelineError> {
        if store.dimension() != embedder.dimension() {
            return Err(StoreError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            }
            .into());
        }
        Ok(Self {
            store: Mutex::new(store),
            embedder,
            summarizer: None,
        })
    }

    /// Attach an LLM summary to every chunk on ingest.
    pub fn with_summarizer(mut self, model: Arc<dyn LanguageModel>, params: CompletionParams) -> Self {
        self.summarizer = Some(Summarizer { model, params });
        self
    }

    /// Tear down the pipeline and hand back the store.
    pub fn into_store(self) -> VectorStore {
        self.store.into_inner()
    }

    /// Chunk, embed and store `text`. Chunks the embedder rejects are skipped
    /// and reported; store errors abort the ingest.
    pub async fn ingest(
        &self,
        source_id: &str,
        text: &str,
        max_chunk_size: usize,
        overlap: usize,
    ) -> Result<IngestReport, PipelineError> {
        let config = ChunkerConfig::new(max_chunk_size, overlap)?;
        self.ingest_with(source_id, text, &config).await
    }

    pub async fn ingest_with(
        &self,
        source_id: &str,
        text: &str,
        config: &ChunkerConfig,
    ) -> Result<IngestReport, PipelineError> {
        let mut report = IngestReport::default();
        let (blank, chunks): (Vec<Chunk>, Vec<Chunk>) =
            chunk_text(source_id, text, config).into_iter().partition(Chunk::is_blank);
        report.skipped.extend(blank.into_iter().map(|chunk| SkippedChunk {
            chunk,
            error: EmbeddingError::EmptyInput,
        }));

        let vectors = self.embed_all(&chunks).await;
        for (chunk, vector) in chunks.into_iter().zip(vectors) {
            match vector {
                Ok(vector) => {
                    let chunk = self.summarize(chunk).await;
                    let id = self.store.lock().await.insert(chunk, vector)?;
                    report.ids.push(id);
                }
                Err(error) => {
                    tracing::warn!(
                        source_id,
                        sequence_index = chunk.sequence_index,
                        "skipping chunk: {error}"
                    );
                    report.skipped.push(SkippedChunk { chunk, error });
                }
            }
        }
        report.skipped.sort_by_key(|s| s.chunk.sequence_index);
        tracing::info!(
            source_id,
            stored = report.ids.len(),
            skipped = report.skipped.len(),
            "ingested source"
        );
        Ok(report)
    }

    /// Replace everything stored for `source_id` with a fresh ingest of `text`.
    pub async fn reingest(
        &self,
        source_id: &str,
        text: &str,
        config: &ChunkerConfig,
    ) -> Result<IngestReport, PipelineError> {
        self.remove_source(source_id).await?;
        self.ingest_with(source_id, text, config).await
    }

    /// Delete every record of `source_id`. Returns how many were removed.
    pub async fn remove_source(&self, source_id: &str) -> Result<usize, PipelineError> {
        let mut store = self.store.lock().await;
        let ids = store.ids_for_source(source_id);
        for &id in &ids {
            store.delete(id)?;
        }
        Ok(ids.len())
    }

    /// Drop the records of every source for which `keep` is false, e.g. pages
    /// that disappeared from the crawl directory. Returns the removed sources
    /// with their record counts.
    pub async fn retain_sources(
        &self,
        mut keep: impl FnMut(&str) -> bool,
    ) -> Result<Vec<(String, usize)>, PipelineError> {
        let mut store = self.store.lock().await;
        let mut removed = Vec::new();
        for source_id in store.source_ids() {
            if keep(&source_id) {
                continue;
            }
            let ids = store.ids_for_source(&source_id);
            for &id in &ids {
                store.delete(id)?;
            }
            tracing::info!(source_id, records = ids.len(), "removed stale source");
            removed.push((source_id, ids.len()));
        }
        Ok(removed)
    }

    /// Up to `k` stored chunks most similar to `text`, best first. An empty
    /// store yields an empty result without calling the embedder.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        min_score: Option<f32>,
    ) -> Result<Vec<SearchHit>, PipelineError> {
        if self.store.lock().await.is_empty() {
            return Ok(Vec::new());
        }
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput.into());
        }
        let vector = self.embedder.embed(text).await?;
        let hits = self.store.lock().await.search(&vector, k, min_score)?;
        tracing::debug!(k, hits = hits.len(), "query");
        Ok(hits)
    }

    /// Retrieve context for `question` and ask `model` to answer from it.
    pub async fn answer(
        &self,
        model: &dyn LanguageModel,
        question: &str,
        options: &AnswerOptions,
    ) -> Result<Answer, PipelineError> {
        let sources = self.query(question, options.k, options.min_score).await?;
        if sources.is_empty() {
            tracing::info!("no relevant context for question");
        }
        let prompt = answer_prompt(question, &sources, options.use_summary);
        let text = model.complete(&prompt, &options.params).await?;
        Ok(Answer { text, sources })
    }

    pub async fn delete(&self, id: RecordId) -> Result<(), PipelineError> {
        Ok(self.store.lock().await.delete(id)?)
    }

    pub async fn clear(&self) {
        self.store.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.lock().await.is_empty()
    }

    pub async fn export_snapshot(&self) -> Snapshot {
        self.store.lock().await.export_snapshot()
    }

    pub async fn import_snapshot(&self, snapshot: Snapshot) -> Result<(), PipelineError> {
        Ok(self.store.lock().await.import_snapshot(snapshot)?)
    }

    /// One result per chunk. Tries a single batch call first and falls back to
    /// per-chunk calls so one bad chunk does not sink the rest.
    async fn embed_all(&self, chunks: &[Chunk]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        if chunks.is_empty() {
            return Vec::new();
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        match self.embedder.embed_batch(&texts).await {
            Ok(vectors) if vectors.len() == texts.len() => return vectors.into_iter().map(Ok).collect(),
            Ok(vectors) => tracing::debug!(
                expected = texts.len(),
                actual = vectors.len(),
                "batch embedding returned wrong count, embedding one by one"
            ),
            Err(e) => tracing::debug!("batch embedding failed, embedding one by one: {e}"),
        }
        let mut out = Vec::with_capacity(texts.len());
        for text in &texts {
            out.push(self.embedder.embed(text).await);
        }
        out
    }

    async fn summarize(&self, chunk: Chunk) -> Chunk {
        let Some(summarizer) = &self.summarizer else {
            return chunk;
        };
        match summarizer
            .model
            .complete(&summary_prompt(&chunk.text), &summarizer.params)
            .await
        {
            Ok(summary) => chunk.with_summary(summary),
            Err(e) => {
                tracing::warn!(
                    source_id = %chunk.source_id,
                    sequence_index = chunk.sequence_index,
                    "storing chunk without summary: {e}"
                );
                chunk
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("chunking error: {0}")]
    Chunk(#[from] ChunkError),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::chunks::Boundary;
    use crate::embedder::HashEmbedder;
    use crate::llm::Prompt;
    use crate::store::Metric;

    /// Returns canned vectors per text and counts calls.
    struct TableEmbedder {
        table: HashMap<String, Vec<f32>>,
        calls: AtomicUsize,
    }

    impl TableEmbedder {
        fn new(entries: &[(&str, Vec<f32>)]) -> Self {
            Self {
                table: entries.iter().map(|(t, v)| (t.to_string(), v.clone())).collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn dimension(&self) -> usize {
            3
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.table
                .get(text)
                .cloned()
                .ok_or_else(|| EmbeddingError::Backend(format!("unknown text {text:?}")))
        }
    }

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn complete(&self, prompt: &Prompt, _params: &CompletionParams) -> Result<String, CompletionError> {
            Ok(format!("summary of {}", prompt.user))
        }
    }

    struct FailingModel;

    #[async_trait]
    impl LanguageModel for FailingModel {
        async fn complete(&self, _prompt: &Prompt, _params: &CompletionParams) -> Result<String, CompletionError> {
            Err(CompletionError::Backend("offline".to_string()))
        }
    }

    fn hard(size: usize) -> ChunkerConfig {
        ChunkerConfig::new(size, 0).unwrap().with_boundary(Boundary::Hard)
    }

    fn pipeline(embedder: Arc<dyn Embedder>) -> RetrievalPipeline {
        let store = VectorStore::new(embedder.dimension(), Metric::Cosine).unwrap();
        RetrievalPipeline::new(store, embedder).unwrap()
    }

    fn doc1_embedder() -> Arc<TableEmbedder> {
        Arc::new(TableEmbedder::new(&[
            ("aaaa", vec![1.0, 0.0, 0.0]),
            ("bbbb", vec![0.0, 1.0, 0.0]),
            ("cccc", vec![0.6, 0.8, 0.0]),
        ]))
    }

    #[tokio::test]
    async fn query_ranks_the_matching_chunk_first() {
        let p = pipeline(doc1_embedder());
        let report = p.ingest_with("doc1", "aaaabbbbcccc", &hard(4)).await.unwrap();
        assert_eq!(report.ids.len(), 3);
        assert!(report.skipped.is_empty());

        let store = p.into_store();
        let hits = store.search(&[0.0, 1.0, 0.0], 2, None).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, report.ids[1]);
        assert_eq!(hits[0].chunk.text, "bbbb");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].chunk.text, "cccc");
        assert!((hits[1].score - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn query_embeds_the_question() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("aaaa", vec![1.0, 0.0, 0.0]),
            ("bbbb", vec![0.0, 1.0, 0.0]),
            ("b?", vec![0.1, 1.0, 0.0]),
        ]));
        let p = pipeline(embedder);
        p.ingest_with("doc", "aaaabbbb", &hard(4)).await.unwrap();
        let hits = p.query("b?", 1, None).await.unwrap();
        assert_eq!(hits[0].chunk.text, "bbbb");
    }

    #[tokio::test]
    async fn embedding_failures_are_skipped_and_reported() {
        let embedder = Arc::new(TableEmbedder::new(&[
            ("aaaa", vec![1.0, 0.0, 0.0]),
            ("cccc", vec![0.0, 0.0, 1.0]),
        ]));
        let p = pipeline(embedder.clone());
        let report = p.ingest_with("doc", "aaaabbbbcccc    ", &hard(4)).await.unwrap();

        assert_eq!(report.ids, vec![1, 2]);
        let skipped: Vec<usize> = report.skipped.iter().map(|s| s.chunk.sequence_index).collect();
        assert_eq!(skipped, vec![1, 3]);
        assert!(matches!(report.skipped[0].error, EmbeddingError::Backend(_)));
        assert!(matches!(report.skipped[1].error, EmbeddingError::EmptyInput));
        assert_eq!(p.len().await, 2);
        // Default batch tries all three, then the per-chunk fallback repeats them.
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2 + 3);
    }

    #[tokio::test]
    async fn empty_text_and_empty_store() {
        let embedder = doc1_embedder();
        let p = pipeline(embedder.clone());
        let report = p.ingest("doc", "", 10, 2).await.unwrap();
        assert!(report.ids.is_empty() && report.skipped.is_empty());
        assert!(p.query("anything", 5, None).await.unwrap().is_empty());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blank_query_is_rejected_without_embedding() {
        let embedder = doc1_embedder();
        let p = pipeline(embedder.clone());
        p.ingest_with("doc", "aaaa", &hard(4)).await.unwrap();
        let calls = embedder.calls.load(Ordering::SeqCst);
        assert!(matches!(
            p.query("  ", 3, None).await,
            Err(PipelineError::Embedding(EmbeddingError::EmptyInput))
        ));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn invalid_chunking_and_k_are_errors() {
        let p = pipeline(doc1_embedder());
        assert!(matches!(p.ingest("doc", "aaaa", 4, 4).await, Err(PipelineError::Chunk(_))));
        p.ingest_with("doc", "aaaa", &hard(4)).await.unwrap();
        assert!(matches!(
            p.query("aaaa", 0, None).await,
            Err(PipelineError::Store(StoreError::InvalidArgument(_)))
        ));
    }

    #[tokio::test]
    async fn mismatched_embedder_is_rejected() {
        let store = VectorStore::new(4, Metric::Cosine).unwrap();
        let result = RetrievalPipeline::new(store, doc1_embedder());
        assert!(matches!(
            result,
            Err(PipelineError::Store(StoreError::DimensionMismatch { expected: 4, actual: 3 }))
        ));
    }

    #[tokio::test]
    async fn reingest_replaces_a_source() {
        let p = pipeline(Arc::new(HashEmbedder::new(32)));
        let config = ChunkerConfig::new(20, 0).unwrap();
        p.ingest_with("a", "first version of the page", &config).await.unwrap();
        p.ingest_with("b", "another page entirely", &config).await.unwrap();
        let before = p.len().await;

        let report = p.reingest("a", "new text", &config).await.unwrap();
        assert_eq!(report.ids.len(), 1);
        assert_eq!(p.len().await, before - 2 + 1);
        let hits = p.query("new text", 10, None).await.unwrap();
        assert!(hits.iter().all(|h| h.chunk.source_id != "a" || h.chunk.text == "new text"));
    }

    #[tokio::test]
    async fn stale_sources_are_removed() {
        let p = pipeline(Arc::new(HashEmbedder::new(32)));
        let config = ChunkerConfig::new(20, 0).unwrap();
        p.ingest_with("kept", "this page is still there", &config).await.unwrap();
        p.ingest_with("gone", "this page was deleted", &config).await.unwrap();
        p.ingest_with("bad", "now fails validation", &config).await.unwrap();
        let gone = p.export_snapshot().await.records.iter().filter(|r| r.source_id == "gone").count();

        let removed = p.retain_sources(|id| id == "kept").await.unwrap();
        let names: Vec<&str> = removed.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(names, vec!["bad", "gone"]);
        assert_eq!(removed[1].1, gone);

        let snap = p.export_snapshot().await;
        assert!(!snap.records.is_empty());
        assert!(snap.records.iter().all(|r| r.source_id == "kept"));
        assert_eq!(p.remove_source("kept").await.unwrap(), snap.records.len());
        assert!(p.is_empty().await);
        assert_eq!(p.remove_source("kept").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn summaries_are_attached_and_failures_tolerated() {
        let p = pipeline(doc1_embedder()).with_summarizer(Arc::new(EchoModel), CompletionParams::default());
        p.ingest_with("doc", "aaaa", &hard(4)).await.unwrap();
        let snap = p.export_snapshot().await;
        assert_eq!(snap.records[0].summary.as_deref(), Some("summary of aaaa"));

        let p = pipeline(doc1_embedder()).with_summarizer(Arc::new(FailingModel), CompletionParams::default());
        let report = p.ingest_with("doc", "aaaa", &hard(4)).await.unwrap();
        assert_eq!(report.ids.len(), 1);
        assert!(p.export_snapshot().await.records[0].summary.is_none());
    }

    #[tokio::test]
    async fn answer_passes_context_to_the_model() {
        let p = pipeline(doc1_embedder());
        p.ingest_with("doc", "aaaabbbb", &hard(4)).await.unwrap();
        let options = AnswerOptions {
            k: 1,
            use_summary: false,
            ..AnswerOptions::default()
        };
        let answer = p.answer(&EchoModel, "aaaa", &options).await.unwrap();
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].chunk.text, "aaaa");
        assert!(answer.text.ends_with("\naaaa"));
    }

    #[tokio::test]
    async fn snapshot_round_trip_through_pipelines() {
        let embedder = Arc::new(HashEmbedder::new(16));
        let p = pipeline(embedder.clone());
        p.ingest("https://example.com/", "Rust is fast. Rust is safe. Python is slow.", 16, 4)
            .await
            .unwrap();
        let snap = p.export_snapshot().await;

        let q = pipeline(embedder);
        q.import_snapshot(snap).await.unwrap();
        let a = p.query("rust safe", 3, None).await.unwrap();
        let b = q.query("rust safe", 3, None).await.unwrap();
        assert_eq!(a, b);

        q.clear().await;
        assert!(q.is_empty().await);
    }
}
