use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use cortexsearch::cache::SearchCache;
use cortexsearch::capabilities::{NoopReranker, QdrantVectorIndex, RemoteReranker, VoyageEmbeddingCapability};
use cortexsearch::config::Config;
use cortexsearch::engine::{SearchEngine, SearchOptions};
use cortexsearch::indexer::Indexer;
use cortexsearch::server::{run_stdio_server, ServerState};

#[derive(Debug, Parser)]
#[command(name = "cortexsearch")]
#[command(version)]
#[command(about = "Code-aware semantic search engine (pure Rust MCP server)")]
struct Cli {
    /// Repo root. Defaults to the current directory.
    #[arg(long, short = 'r')]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the line-delimited JSON-RPC stdio server (the default mode).
    Mcp,
    /// One-shot directory index, for scripting/CI without a long-running server.
    Index {
        /// Directory to index, relative to the repo root.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// One-shot search, for scripting/CI without a long-running server.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))).init();
}

fn build_engine(config: &Config) -> Result<SearchEngine> {
    let embedding = Arc::new(VoyageEmbeddingCapability::new(
        config.indexing.voyage_api_key.clone(),
        config.indexing.embedding_model.clone(),
        config.indexing.batch_size,
    )?);
    let vector_index = Arc::new(QdrantVectorIndex::new(
        config.indexing.qdrant_url.clone(),
        config.indexing.qdrant_api_key.clone(),
        config.indexing.collection_name.clone(),
    ));
    let reranker: Arc<dyn cortexsearch::capabilities::RerankCapability> = if config.retrieval.enable_llm_reranking {
        let base_url = config.retrieval.llm_reranker_base_url.clone().unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        let api_key = config.retrieval.llm_reranker_api_key.clone().unwrap_or_default();
        Arc::new(RemoteReranker::new(base_url, api_key, config.retrieval.llm_reranker_model.clone(), config.retrieval.llm_reranker_project_id.clone()))
    } else {
        Arc::new(NoopReranker)
    };
    let cache = Arc::new(SearchCache::new(config.retrieval.search_cache_max_size, std::time::Duration::from_secs(config.retrieval.search_cache_ttl_secs)));

    Ok(SearchEngine::new(embedding, vector_index, reranker, cache, config.clone()))
}

fn build_indexer(repo_root: PathBuf, config: &Config) -> Result<Indexer> {
    let embedding = Box::new(VoyageEmbeddingCapability::new(
        config.indexing.voyage_api_key.clone(),
        config.indexing.embedding_model.clone(),
        config.indexing.batch_size,
    )?);
    let vector_index = Box::new(QdrantVectorIndex::new(
        config.indexing.qdrant_url.clone(),
        config.indexing.qdrant_api_key.clone(),
        config.indexing.collection_name.clone(),
    ));
    Ok(Indexer::new(repo_root, config.clone(), embedding, vector_index))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let repo_root = cli.root.clone().unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    let config = Config::load(&repo_root).context("loading .cortexsearch.json")?;

    match cli.command.unwrap_or(Command::Mcp) {
        Command::Mcp => {
            let indexer = Arc::new(build_indexer(repo_root.clone(), &config)?);
            let engine = Arc::new(build_engine(&config)?);
            let state = ServerState::new(repo_root, indexer, engine);
            run_stdio_server(state).await?;
        }
        Command::Index { path } => {
            let indexer = build_indexer(repo_root.clone(), &config)?;
            let stats = indexer.index_directory(&path).await.map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Search { query, limit } => {
            let engine = build_engine(&config)?;
            let opts = SearchOptions {
                limit,
                enable_hybrid: true,
                ..Default::default()
            };
            let response = engine.search(&query, &opts).await.map_err(|e| anyhow::anyhow!(e))?;
            println!("{}", serde_json::to_string_pretty(&response.results)?);
        }
    }

    Ok(())
}
