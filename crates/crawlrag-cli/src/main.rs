//! CLI entry point for crawlrag: ingest crawled pages, query the store, ask questions.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crawlrag_core::{
    app_data_dir, load_config, load_snapshot, load_store, logging, save_snapshot, scan_documents,
    set_crawl_root, status, validate_content, AnswerOptions, ChunkerConfig, CompletionParams, Config,
    Document, Embedder, HashEmbedder, LanguageModel, Metric, OllamaClient, RecordId, RetrievalPipeline,
    ThrottledModel, VectorStore,
};

#[derive(Parser)]
#[command(name = "crawlrag")]
#[command(about = "crawlrag: retrieval over crawled web pages")]
struct Cli {
    /// Use the built-in hashing embedder instead of Ollama (no LLM features).
    #[arg(long, global = true)]
    offline: bool,
    /// Snapshot file to read and write (.json, .yaml or .yml).
    #[arg(long, global = true, value_name = "FILE")]
    snapshot: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Show backend status (for dev).
    Status,
    /// Show where crawlrag stores its config and snapshot (app data directory).
    DataDir,
    /// Remember the crawl output directory.
    SetRoot {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },
    /// Scan a crawl directory and list the pages found.
    Scan {
        /// Crawl directory. Defaults to the configured root.
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
    /// Chunk, embed and store every page of a crawl directory.
    Ingest {
        /// Crawl directory. Defaults to the configured root.
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
        #[arg(long)]
        chunk_size: Option<usize>,
        #[arg(long)]
        overlap: Option<usize>,
        /// Ask the language model for a summary of every chunk.
        #[arg(long)]
        summarize: bool,
    },
    /// Show the chunks most similar to a query.
    Query {
        text: String,
        #[arg(short)]
        k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Print hits as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Answer a question from the stored pages.
    Ask {
        question: String,
        #[arg(short)]
        k: Option<usize>,
        #[arg(long)]
        min_score: Option<f32>,
        /// Build the context from chunk text even where summaries exist.
        #[arg(long)]
        full_text: bool,
    },
    /// Remove one stored chunk by id.
    Delete { id: RecordId },
    /// Remove every stored chunk.
    Clear,
    /// Write the current store to a file.
    Export {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Replace the current store with the contents of a snapshot file.
    Import {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
    /// Re-ingest pages whenever the crawl directory changes.
    Watch {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },
}

/// Collaborators picked from the flags and config.
struct Backend {
    embedder: Arc<dyn Embedder>,
    llm: Option<Arc<dyn LanguageModel>>,
}

impl Backend {
    fn new(offline: bool, config: &Config) -> Result<Self> {
        if offline {
            let embedder = HashEmbedder::new(config.embed_dimension).with_max_chars(config.max_input_chars);
            return Ok(Self {
                embedder: Arc::new(embedder),
                llm: None,
            });
        }
        let client = OllamaClient::from_config(config).context("configuring Ollama")?;
        Ok(Self {
            embedder: Arc::new(client.clone()),
            llm: Some(Arc::new(ThrottledModel::from_config(client, config))),
        })
    }

    fn llm(&self) -> Result<Arc<dyn LanguageModel>> {
        match &self.llm {
            Some(llm) => Ok(llm.clone()),
            None => bail!("this command needs a language model; run without --offline"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config();
    logging::init_with_config(&config.logging);

    match cli.command.unwrap_or(Commands::Status) {
        Commands::Status => {
            println!("crawlrag backend");
            println!("  core: {}", status());
        }
        Commands::DataDir => match app_data_dir() {
            Some(p) => println!("{}", p.display()),
            None => eprintln!("Could not determine app data directory."),
        },
        Commands::SetRoot { path } => {
            set_crawl_root(&path).with_context(|| format!("setting crawl root to {}", path.display()))?;
            println!("Crawl root set to {}", path.display());
        }
        Commands::Scan { path } => {
            let root = crawl_root(path, &config)?;
            let docs = scan_documents(&root)?;
            println!("Scanned {} page(s) under {}", docs.len(), root.display());
            for d in docs {
                let first = d.body.lines().next().unwrap_or("").trim();
                let title = d.title.as_deref().unwrap_or(first);
                println!("  {}  {}", d.source_id, preview(title, 60));
            }
        }
        Commands::Ingest {
            path,
            chunk_size,
            overlap,
            summarize,
        } => {
            let root = crawl_root(path, &config)?;
            let backend = Backend::new(cli.offline, &config)?;
            let snapshot = snapshot_path(cli.snapshot, &config)?;
            let mut pipeline = open_pipeline(&backend, &snapshot)?;
            if summarize || config.use_summaries {
                pipeline = pipeline.with_summarizer(backend.llm()?, completion_params(&config));
            }
            let chunker = ChunkerConfig::new(
                chunk_size.unwrap_or(config.chunk_size),
                overlap.unwrap_or(config.chunk_overlap),
            )?;

            let docs = scan_documents(&root)?;
            let live = accepted_sources(&docs);
            for (source_id, n) in pipeline.retain_sources(|id| live.contains(id)).await? {
                println!("{source_id}: page gone or rejected, {n} chunk(s) removed");
            }
            for doc in &docs {
                if let Err(reason) = validate_content(&doc.body) {
                    tracing::warn!(source_id = %doc.source_id, "skipping page: {reason}");
                    continue;
                }
                let report = pipeline.reingest(&doc.source_id, &doc.body, &chunker).await?;
                println!(
                    "{}: {} chunk(s) stored, {} skipped",
                    doc.source_id,
                    report.ids.len(),
                    report.skipped.len()
                );
                for s in &report.skipped {
                    println!("  chunk {}: {}", s.chunk.sequence_index, s.error);
                }
            }
            save_snapshot(&snapshot, &pipeline.export_snapshot().await)?;
            println!("Store holds {} chunk(s): {}", pipeline.len().await, snapshot.display());
        }
        Commands::Query {
            text,
            k,
            min_score,
            json,
        } => {
            let backend = Backend::new(cli.offline, &config)?;
            let pipeline = open_pipeline(&backend, &snapshot_path(cli.snapshot, &config)?)?;
            let hits = pipeline
                .query(&text, k.unwrap_or(config.top_k), min_score.or(config.min_score))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("No relevant chunks.");
            } else {
                for h in hits {
                    println!(
                        "{:.3}  #{}  {} [{}]  {}",
                        h.score,
                        h.id,
                        h.chunk.source_id,
                        h.chunk.sequence_index,
                        preview(&h.chunk.text, 80)
                    );
                }
            }
        }
        Commands::Ask {
            question,
            k,
            min_score,
            full_text,
        } => {
            let backend = Backend::new(cli.offline, &config)?;
            let llm = backend.llm()?;
            let pipeline = open_pipeline(&backend, &snapshot_path(cli.snapshot, &config)?)?;
            let options = AnswerOptions {
                k: k.unwrap_or(config.top_k),
                min_score: min_score.or(config.min_score),
                use_summary: !full_text,
                params: completion_params(&config),
            };
            let answer = pipeline.answer(llm.as_ref(), &question, &options).await?;
            println!("{}", answer.text);
            if !answer.sources.is_empty() {
                println!();
                println!("Sources:");
                for s in &answer.sources {
                    println!("  {:.3}  {} [{}]", s.score, s.chunk.source_id, s.chunk.sequence_index);
                }
            }
        }
        Commands::Delete { id } => {
            let backend = Backend::new(cli.offline, &config)?;
            let snapshot = snapshot_path(cli.snapshot, &config)?;
            let pipeline = open_pipeline(&backend, &snapshot)?;
            pipeline.delete(id).await?;
            save_snapshot(&snapshot, &pipeline.export_snapshot().await)?;
            println!("Deleted #{id}");
        }
        Commands::Clear => {
            let backend = Backend::new(cli.offline, &config)?;
            let snapshot = snapshot_path(cli.snapshot, &config)?;
            let pipeline = open_pipeline(&backend, &snapshot)?;
            pipeline.clear().await;
            save_snapshot(&snapshot, &pipeline.export_snapshot().await)?;
            println!("Store cleared");
        }
        Commands::Export { path } => {
            let backend = Backend::new(cli.offline, &config)?;
            let pipeline = open_pipeline(&backend, &snapshot_path(cli.snapshot, &config)?)?;
            save_snapshot(&path, &pipeline.export_snapshot().await)?;
            println!("Exported {} chunk(s) to {}", pipeline.len().await, path.display());
        }
        Commands::Import { path } => {
            let backend = Backend::new(cli.offline, &config)?;
            let snapshot = snapshot_path(cli.snapshot, &config)?;
            let pipeline = open_pipeline(&backend, &snapshot)?;
            let incoming = load_snapshot(&path).with_context(|| format!("reading {}", path.display()))?;
            pipeline.import_snapshot(incoming).await?;
            save_snapshot(&snapshot, &pipeline.export_snapshot().await)?;
            println!("Imported {} chunk(s) from {}", pipeline.len().await, path.display());
        }
        Commands::Watch { path } => {
            let root = crawl_root(path, &config)?;
            let backend = Backend::new(cli.offline, &config)?;
            let snapshot = snapshot_path(cli.snapshot, &config)?;
            let pipeline = Arc::new(open_pipeline(&backend, &snapshot)?);
            let chunker = ChunkerConfig::new(config.chunk_size, config.chunk_overlap)?;
            watch(root, pipeline, chunker, snapshot).await?;
        }
    }
    Ok(())
}

/// Re-ingests changed pages on every debounced change and saves the snapshot.
async fn watch(
    root: PathBuf,
    pipeline: Arc<RetrievalPipeline>,
    chunker: ChunkerConfig,
    snapshot: PathBuf,
) -> Result<()> {
    let handle = tokio::runtime::Handle::current();
    let mut seen: HashMap<String, String> = HashMap::new();
    println!("Watching {} (Ctrl+C to stop)", root.display());

    tokio::task::spawn_blocking(move || {
        crawlrag_core::watch_documents(&root, move |scan| {
            let docs = match scan {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::error!("rescan failed: {e}");
                    return;
                }
            };
            let live = accepted_sources(&docs);
            seen.retain(|source_id, _| live.contains(source_id));
            let changed: Vec<Document> = docs
                .into_iter()
                .filter(|d| live.contains(&d.source_id))
                .filter(|d| seen.get(&d.source_id) != Some(&d.body))
                .collect();
            // The debouncer calls us on its own thread, outside the runtime.
            handle.block_on(async {
                let removed = match pipeline.retain_sources(|id| live.contains(id)).await {
                    Ok(removed) => removed,
                    Err(e) => {
                        tracing::error!("removing stale pages failed: {e}");
                        Vec::new()
                    }
                };
                for (source_id, n) in &removed {
                    println!("{source_id}: page gone or rejected, {n} chunk(s) removed");
                }
                if changed.is_empty() && removed.is_empty() {
                    return;
                }
                for doc in &changed {
                    match pipeline.reingest(&doc.source_id, &doc.body, &chunker).await {
                        Ok(report) => println!("{}: {} chunk(s) stored", doc.source_id, report.ids.len()),
                        Err(e) => tracing::error!(source_id = %doc.source_id, "re-ingest failed: {e}"),
                    }
                }
                if let Err(e) = save_snapshot(&snapshot, &pipeline.export_snapshot().await) {
                    tracing::error!("saving snapshot failed: {e}");
                }
            });
            for doc in changed {
                seen.insert(doc.source_id, doc.body);
            }
        })
    })
    .await??;
    Ok(())
}

/// Source ids of the scanned pages that pass content validation.
fn accepted_sources(docs: &[Document]) -> HashSet<String> {
    docs.iter()
        .filter(|d| validate_content(&d.body).is_ok())
        .map(|d| d.source_id.clone())
        .collect()
}

/// Load the snapshot at `path` if there is one, else start with an empty store.
fn open_pipeline(backend: &Backend, path: &Path) -> Result<RetrievalPipeline> {
    let store = if path.exists() {
        load_store(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        VectorStore::new(backend.embedder.dimension(), Metric::Cosine)?
    };
    RetrievalPipeline::new(store, backend.embedder.clone())
        .with_context(|| format!("{} was built with a different embedder", path.display()))
}

fn completion_params(config: &Config) -> CompletionParams {
    CompletionParams {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
    }
}

fn crawl_root(path: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    match path.or_else(|| config.crawl_root()) {
        Some(p) => Ok(p),
        None => bail!("no crawl directory given and none configured (see `crawlrag set-root`)"),
    }
}

fn snapshot_path(flag: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    match flag.or_else(|| config.snapshot_path()) {
        Some(p) => Ok(p),
        None => bail!("could not determine a snapshot location; pass --snapshot"),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        flat
    }
}
