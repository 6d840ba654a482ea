//! # KnowledgeOps CLI (`kops`)
//!
//! Ingest documents, ask questions against them, and run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! kops --config ./config/kops.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kops init` | Create the SQLite database and run schema migrations |
//! | `kops ingest <path>` | Ingest a file or every supported file under a directory |
//! | `kops query "<question>"` | Answer a question from the indexed documents |
//! | `kops documents list` | List ingested documents |
//! | `kops documents delete <id>` | Delete a document and its chunks |
//! | `kops stats` | Show index and backend status |
//! | `kops clear` | Remove every document and chunk |
//! | `kops serve` | Start the HTTP server |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG`
//! (default `knowledgeops=info,tower_http=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use knowledgeops::{config, documents, ingest, migrate, query, server, stats};

/// KnowledgeOps: retrieval-augmented question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kops.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kops",
    about = "KnowledgeOps: retrieval-augmented question answering over an uploaded document corpus",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kops.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the documents and vectors
    /// tables. Safe to run repeatedly.
    Init,

    /// Ingest a file or a directory of files.
    ///
    /// Supported types: pdf, docx, txt, md. Each file is extracted,
    /// chunked, embedded, and indexed; a file either ingests completely
    /// or leaves nothing behind.
    Ingest {
        /// File or directory to ingest.
        path: PathBuf,
    },

    /// Ask a question.
    Query {
        question: String,

        /// Maximum passages to retrieve (defaults to `[retrieval].max_results`).
        #[arg(long)]
        max_results: Option<usize>,

        /// Skip retrieval and ask the generation backend directly.
        #[arg(long)]
        no_rag: bool,
    },

    /// Inspect or delete ingested documents.
    Documents {
        #[command(subcommand)]
        action: DocumentsAction,
    },

    /// Show document and chunk counts and backend status.
    Stats,

    /// Remove every document and indexed chunk.
    Clear,

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum DocumentsAction {
    /// List documents, newest first.
    List,
    /// Delete one document by id.
    Delete { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("knowledgeops=info,tower_http=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { path } => {
            ingest::run_ingest(&cfg, &path).await?;
        }
        Commands::Query {
            question,
            max_results,
            no_rag,
        } => {
            query::run_query(&cfg, &question, max_results, no_rag).await?;
        }
        Commands::Documents { action } => match action {
            DocumentsAction::List => {
                documents::run_list(&cfg).await?;
            }
            DocumentsAction::Delete { id } => {
                documents::run_delete(&cfg, &id).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Clear => {
            documents::run_clear(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
