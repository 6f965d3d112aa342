//! # Canteen Chat CLI (`canteen`)
//!
//! ## Usage
//!
//! ```bash
//! canteen --config ./config/canteen.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `canteen serve` | Build the index, then serve the web chat UI |
//! | `canteen chat` | Build the index, then chat in the terminal |
//! | `canteen index` | Build the index once and print its statistics |
//! | `canteen corpus` | List the documents the corpus loader produces |
//!
//! Every command that needs the index builds it before accepting input and
//! exits non-zero if the corpus or the embedding service is unusable.
//!
//! Logs go to stderr; set `RUST_LOG` (default `info`) to adjust.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use canteen_chat::config::{self, Config};
use canteen_chat::corpus::load_corpus;
use canteen_chat::server;
use canteen_chat::service::ChatService;
use canteen_chat::terminal;

/// Campus canteen chatbot backed by a local Ollama daemon.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/canteen.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "canteen", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/canteen.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the web chat UI.
    ///
    /// Binds to `[server].bind` once the index is built.
    Serve,

    /// Chat in the terminal.
    Chat,

    /// Build the index once and print its statistics.
    Index,

    /// List the documents produced from the corpus directory.
    ///
    /// Does not contact the embedding service.
    Corpus {
        /// Print each document's text as well.
        #[arg(long)]
        show_text: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let service = Arc::new(start_service(cfg).await?);
            server::run_server(service).await?;
        }
        Commands::Chat => {
            let service = start_service(cfg).await?;
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = std::io::stdout();
            terminal::run_terminal(&service, stdin, &mut stdout).await?;
        }
        Commands::Index => {
            let service = start_service(cfg).await?;
            let index = service.warm_up().await?;
            println!("Index built.");
            println!("  documents: {}", index.document_count());
            println!("  chunks:    {}", index.chunk_count());
            println!("  model:     {}", index.model_name());
            println!("  dims:      {}", index.dims());
        }
        Commands::Corpus { show_text } => {
            let documents = load_corpus(&cfg.corpus)?;
            for doc in &documents {
                match doc.row {
                    Some(row) => println!("{}#{}", doc.source, row),
                    None => println!("{}", doc.source),
                }
                if show_text {
                    for line in doc.rendered_text().lines() {
                        println!("    {}", line);
                    }
                }
            }
            println!("{} documents", documents.len());
        }
    }

    Ok(())
}

/// Wire providers and build the index before any input is accepted.
async fn start_service(cfg: Config) -> Result<ChatService> {
    let service = ChatService::new(cfg)?;
    service
        .warm_up()
        .await
        .context("failed to build the canteen index")?;
    Ok(service)
}
