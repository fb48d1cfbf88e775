// crates/oracle-server/src/main.rs
// Thin operational CLI over the Oracle library

use anyhow::Result;
use clap::{Parser, Subcommand};
use oracle::config::{ApiKeys, OracleConfig};
use oracle::db::pool::DatabasePool;
use oracle::vault::MemoryVault;
use oracle::{Oracle, OracleEvent, QueryRequest, SourceKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "oracle", about = "Multi-source project context retrieval")]
struct Cli {
    /// Path to the TOML config file (default: ~/.oracle/oracle.toml)
    #[arg(long, env = "ORACLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a project and index it (scan + forced commit)
    Index {
        /// Project identifier
        project: String,
        /// Project root directory
        path: PathBuf,
    },
    /// Show index and delta-queue status for a project
    Status { project: String },
    /// Ask a question and stream the answer
    Ask {
        project: String,
        question: String,
        /// Sources to search (code, notes, threads)
        #[arg(long, value_delimiter = ',', default_value = "code")]
        sources: Vec<String>,
        /// Model override
        #[arg(long)]
        model: Option<String>,
        /// Show model reasoning when available
        #[arg(long)]
        thinking: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from the data dir only, never from CWD
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".oracle/.env"));
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(|| {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".oracle/oracle.toml")
    });
    let config = OracleConfig::load(&config_path)?;
    let api_keys = ApiKeys::from_env();

    let pool = Arc::new(DatabasePool::open(&config.db_path()).await?);
    let http = reqwest::Client::new();
    let embedder = oracle::embeddings::from_config(&api_keys, &config.embeddings, http);
    let llm = oracle::llm::from_config(&api_keys, &config.llm)
        .ok_or_else(|| anyhow::anyhow!("no chat provider configured (set ORACLE_LLM_API_KEY)"))?;
    let vault: Arc<dyn oracle::vault::Vault> = Arc::new(MemoryVault::new());

    let engine = Oracle::new(pool, llm, embedder, vault, api_keys, config);

    match cli.command {
        Commands::Index { project, path } => {
            let root = path.canonicalize()?;
            engine
                .create_project(&project, &root.to_string_lossy())
                .await?;
            let stats = engine.sync(&project, true, true).await?;
            println!(
                "indexed {} files ({} chunks, {} deleted, {} failed)",
                stats.indexed_files, stats.chunks, stats.deleted_files, stats.failed_files
            );
        }
        Commands::Status { project } => {
            let (index, delta) = engine.index_status(&project).await?;
            println!(
                "chunks: {} ({} embedded), files: {}, edges: {}",
                index.chunk_count, index.embedded_count, index.file_count, index.edge_count
            );
            println!(
                "queue: {} pending files, {} lines, thresholds hit: {:?}",
                delta.queue.queued_files, delta.queue.total_lines, delta.thresholds_hit
            );
        }
        Commands::Ask {
            project,
            question,
            sources,
            model,
            thinking,
        } => {
            let sources: Vec<SourceKind> = sources
                .iter()
                .filter_map(|s| SourceKind::from_str(s))
                .collect();
            let mut request = QueryRequest::new(project, question).with_sources(sources);
            request.model = model;
            request.thinking = thinking;

            let mut stream = engine.query(request);
            while let Some(event) = stream.next().await {
                match event {
                    OracleEvent::Status { message } => eprintln!("· {message}"),
                    OracleEvent::Source {
                        source_kind,
                        path,
                        score,
                    } => eprintln!("· [{source_kind}] {path} ({score:.2})"),
                    OracleEvent::ThinkingDelta { content } => eprint!("{content}"),
                    OracleEvent::ContentDelta { content } => print!("{content}"),
                    OracleEvent::ToolCall { name, .. } => eprintln!("· tool: {name}"),
                    OracleEvent::ToolResult { .. } => {}
                    OracleEvent::Done { context_id, .. } => {
                        println!();
                        eprintln!("· context node {context_id}");
                    }
                    OracleEvent::Error { kind, message } => {
                        eprintln!("error ({kind}): {message}");
                        std::process::exit(1);
                    }
                }
            }
        }
    }

    Ok(())
}
