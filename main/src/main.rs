//! CLI entry point wiring the library crates together with the reference backends, in the
//! `tracing-subscriber` + `clap` derive idiom the teacher's own binary uses.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use common::backends::embedding::HashedEmbedder;
use common::backends::llm::TemplateJsonLlm;
use common::backends::{Capability, EmbeddingRegistry, LlmRegistry};
use common::config::get_config;
use common::store::db::SurrealDbClient;
use common::store::surreal::SurrealChunkStore;
use common::store::ChunkStore;
use consolidation_engine::{ConsolidationEngine, ConsolidationRequest};
use ingest_pipeline::capacity::CapacityMonitor;
use ingest_pipeline::concurrency::AdaptiveExecutor;
use ingest_pipeline::pause::PauseController;
use ingest_pipeline::pipeline::{DefaultPipelineServices, IngestionConfig, IngestionPipeline};
use ingest_pipeline::qntm::QntmGenerator;
use ingest_pipeline::tokenize::TokenizerService;
use retrieval_pipeline::{SearchEngine, SearchRequest};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const REFERENCE_EMBEDDING_DIMENSIONS: usize = 256;

#[derive(Parser)]
#[command(name = "minne_atlas_cli", about = "Persistent context-management and retrieval engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest files or directories into the store.
    Ingest {
        paths: Vec<PathBuf>,
        #[arg(long)]
        recursive: bool,
    },
    /// Run a search against the store.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        since: Option<DateTime<Utc>>,
        #[arg(long)]
        qntm: Option<String>,
        #[arg(long)]
        rerank: bool,
        #[arg(long)]
        hybrid: bool,
        #[arg(long)]
        expand_query: bool,
    },
    /// List chunks created since a timestamp, most recent first.
    Timeline {
        #[arg(long)]
        since: DateTime<Utc>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Scan for near-duplicate clusters and merge them.
    Consolidate {
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = 0.92)]
        threshold: f32,
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Collection/store maintenance.
    Store {
        #[command(subcommand)]
        action: StoreAction,
    },
}

#[derive(Subcommand)]
enum StoreAction {
    /// Drop the collection entirely.
    Drop {
        #[arg(long)]
        yes: bool,
    },
    /// Hard-delete soft-deleted chunks past their grace period.
    Vacuum {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long, default_value_t = 1000)]
        limit: usize,
    },
    /// Toggle HNSW indexing on the collection.
    Hnsw {
        #[arg(value_enum)]
        mode: HnswMode,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum HnswMode {
    On,
    Off,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = get_config()?;

    let network_timeout = config.network_timeout();

    let db = SurrealDbClient::memory("atlas", &config.store.collection).await?;
    let store: Arc<dyn ChunkStore> = Arc::new(SurrealChunkStore::new(db).with_timeout(network_timeout));

    let mut embeddings = EmbeddingRegistry::new();
    embeddings.register(Capability::TextEmbedding, Arc::new(HashedEmbedder::new(REFERENCE_EMBEDDING_DIMENSIONS)));
    let embeddings = Arc::new(embeddings);

    let mut llm = LlmRegistry::new();
    llm.register(Capability::JsonCompletion, Arc::new(TemplateJsonLlm));
    let llm = Arc::new(llm);

    let qntm = Arc::new(QntmGenerator::new(Arc::clone(&llm)).with_timeout(network_timeout));

    match cli.command {
        Command::Ingest { paths, recursive } => {
            let tokenizer = Arc::new(TokenizerService::new()?);
            let executor = Arc::new(AdaptiveExecutor::new(config.concurrency_min, config.concurrency_max));
            let watchdog = executor.start_watchdog(Arc::new(CapacityMonitor::new()), std::time::Duration::from_secs(5));
            let services = Arc::new(
                DefaultPipelineServices::new(
                    Arc::clone(&embeddings),
                    Arc::clone(&llm),
                    tokenizer,
                    Arc::clone(&store),
                    executor,
                )
                .with_timeout(network_timeout),
            );
            let pipeline_config = IngestionConfig { recursive, ..Default::default() };
            let pipeline = IngestionPipeline::new(store, services, PauseController::new(), pipeline_config);

            let root_dir = std::env::current_dir()?;
            let result = pipeline.ingest(&paths, &root_dir).await?;
            println!(
                "ingested {} file(s), {} chunk(s), {} skipped under pressure, {} error(s)",
                result.files_processed,
                result.chunks_stored,
                result.files_skipped_pressure,
                result.errors.len()
            );
            for (path, err) in &result.errors {
                error!(path = %path.display(), error = %err, "file failed to ingest");
            }
            watchdog.abort();
        }
        Command::Search { query, limit, since, qntm: qntm_key, rerank, hybrid, expand_query } => {
            let embedding = embeddings.resolve(Capability::TextEmbedding)?;
            let engine = SearchEngine::new(store, embedding, None, Some(Arc::clone(&qntm))).with_timeout(network_timeout);
            let request = SearchRequest {
                query,
                limit,
                since,
                qntm_key,
                rerank,
                hybrid,
                expand_query,
                ..Default::default()
            };
            let results = engine.search(request).await?;
            print_results(&results);
        }
        Command::Timeline { since, limit } => {
            let embedding = embeddings.resolve(Capability::TextEmbedding)?;
            let engine = SearchEngine::new(store, embedding, None, Some(qntm)).with_timeout(network_timeout);
            let results = engine.timeline(since, limit).await?;
            print_results(&results);
        }
        Command::Consolidate { dry_run, threshold, limit } => {
            let embedding = embeddings.resolve(Capability::TextEmbedding)?;
            let engine = ConsolidationEngine::new(store, embedding, llm.resolve(Capability::JsonCompletion)?, qntm)
                .with_timeout(network_timeout);
            let request = ConsolidationRequest { threshold, limit, dry_run };
            let summary = engine.run(request).await?;
            if dry_run {
                println!("{} candidate cluster(s) found", summary.candidates_found);
                for candidate in &summary.candidates {
                    println!("  seed {} -> {} member(s)", candidate.seed_id, candidate.member_ids.len());
                }
            } else {
                println!("{} cluster(s) consolidated out of {} candidate(s)", summary.consolidated, summary.candidates_found);
            }
        }
        Command::Store { action } => match action {
            StoreAction::Drop { yes } => {
                if !yes {
                    anyhow::bail!("refusing to drop the collection without --yes");
                }
                store.delete_collection().await?;
                println!("collection dropped");
            }
            StoreAction::Vacuum { force, dry_run, limit } => {
                let request = consolidation_engine::VacuumRequest { force, dry_run, limit };
                let summary = consolidation_engine::vacuum::run(store.as_ref(), request).await?;
                println!(
                    "scanned {}, deleted {}, {} within grace period",
                    summary.scanned, summary.deleted, summary.within_grace
                );
            }
            StoreAction::Hnsw { mode } => {
                let enabled = matches!(mode, HnswMode::On);
                store.set_hnsw_enabled(enabled).await?;
                println!("hnsw {}", if enabled { "enabled" } else { "disabled" });
            }
        },
    }

    Ok(())
}

fn print_results(results: &[retrieval_pipeline::SearchResult]) {
    if results.is_empty() {
        println!("no results");
        return;
    }
    for result in results {
        println!(
            "[{:.3}] {}#{} ({})",
            result.score,
            result.file_path,
            result.chunk_index,
            result.created_at.to_rfc3339()
        );
        println!("    {}", result.text.chars().take(200).collect::<String>());
    }
}
