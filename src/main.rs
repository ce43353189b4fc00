//! # Doc Chat CLI (`docchat`)
//!
//! ## Usage
//!
//! ```bash
//! docchat --config ./config/docchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docchat serve` | Start the HTTP server |
//! | `docchat ingest <path>` | Ingest a `.txt` file into the vector store |
//! | `docchat chat` | Interactive chat against a running server |
//! | `docchat ask "<question>"` | Ask a single question |
//! | `docchat health` | Check Ollama and Chroma |
//!
//! Logging is controlled with `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use doc_chat::client::{ChatSession, PrintObserver, FAILED_RESPONSE};
use doc_chat::config::{load_config, ServerConfig};
use doc_chat::health::run_health;
use doc_chat::ingest::run_ingest;
use doc_chat::server;

/// Doc Chat: ask questions about your documents with a local LLM.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Missing values can be supplied through environment variables.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "Doc Chat: retrieval-augmented chat over your documents, streamed over SSE",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Ingest a `.txt` file: chunk, embed, and store it in Chroma.
    Ingest {
        /// Path to the file.
        path: PathBuf,
    },

    /// Interactive chat session against a running server.
    Chat {
        /// Server base URL. Defaults to `[server].api_url`.
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Ask a single question and print the streamed answer.
    Ask {
        question: String,

        /// Server base URL. Defaults to `[server].api_url`.
        #[arg(long)]
        api_url: Option<String>,
    },

    /// Check that Ollama and Chroma are reachable.
    Health,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Ingest { path } => {
            let cfg = load_config(&cli.config)?;
            run_ingest(&cfg, &path).await?;
        }
        Commands::Health => {
            let cfg = load_config(&cli.config)?;
            run_health(&cfg).await?;
        }
        Commands::Chat { api_url } => {
            let mut session = ChatSession::new(resolve_api_url(api_url, &cli.config));
            run_repl(&mut session).await?;
        }
        Commands::Ask { question, api_url } => {
            let mut session = ChatSession::new(resolve_api_url(api_url, &cli.config));
            let reply = session.submit(&question, &mut PrintObserver::default()).await;
            if reply.is_none() {
                anyhow::bail!("Question must not be empty");
            }
            report_failure(reply.as_deref());
        }
    }

    Ok(())
}

/// Client commands only need the server URL, so a config that does not
/// load (for example, no model configured on this machine) is not fatal.
fn resolve_api_url(flag: Option<String>, config_path: &Path) -> String {
    if let Some(url) = flag {
        return url;
    }
    match load_config(config_path) {
        Ok(cfg) => cfg.server.api_url,
        Err(e) => {
            tracing::debug!(error = %e, "Using default API URL");
            ServerConfig::default().api_url
        }
    }
}

async fn run_repl(session: &mut ChatSession) -> anyhow::Result<()> {
    for message in session.messages() {
        println!("{}", message.content);
    }

    let stdin = std::io::stdin();
    let mut line = String::new();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input == "/exit" || input == "/quit" {
            break;
        }
        let reply = session.submit(input, &mut PrintObserver::default()).await;
        report_failure(reply.as_deref());
    }
    Ok(())
}

/// Transport failures never reach the observer, so print them here.
fn report_failure(reply: Option<&str>) {
    if reply == Some(FAILED_RESPONSE) {
        println!("{}", FAILED_RESPONSE);
    }
}
