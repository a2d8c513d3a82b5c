//! # DocChat CLI (`docchat`)
//!
//! Runs the DocChat API server and offers two one-shot helpers.
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
//! | `docchat serve` | Start the HTTP API |
//! | `docchat status` | Check whether the LLM backend is reachable |
//! | `docchat ask <file> "<question>"` | Ingest one file and answer one question |
//!
//! ## Examples
//!
//! ```bash
//! # Start the API on the configured address
//! docchat serve --config ./config/docchat.toml
//!
//! # Answer a question about a local PDF, showing the model's reasoning
//! docchat ask ./paper.pdf "What dataset was used?" --reasoning
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use docchat::config::{self, Config, LogFormat, LoggingConfig};
use docchat::ingest::IngestOutcome;
use docchat::server;
use docchat::service::DocChat;

/// DocChat: ask questions about an uploaded document.
#[derive(Parser)]
#[command(
    name = "docchat",
    about = "DocChat: retrieval-augmented question answering over a single document",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/docchat.toml`. Built-in defaults are used when
    /// the file does not exist.
    #[arg(long, global = true, default_value = "./config/docchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server.
    Serve {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Report whether the LLM backend is reachable.
    ///
    /// Exits non-zero when it is not.
    Status,

    /// Ingest a file and answer a question about it.
    ///
    /// Uses an isolated in-process session; nothing is kept afterwards.
    Ask {
        /// Document to ingest (pdf, txt, md, docx).
        file: PathBuf,

        /// Question to ask.
        question: String,

        /// Print the model's reasoning trace as well as the answer.
        #[arg(long)]
        reasoning: bool,

        /// Override `[retrieval].top_k`.
        #[arg(long)]
        top_k: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let (config, missing) = match read_config(&cli.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);
    if missing {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    match run(cli.command, config).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Load the config, or defaults when the file is absent. The flag reports
/// the fallback so it can be logged once tracing is up.
fn read_config(path: &Path) -> Result<(Config, bool)> {
    if path.exists() {
        Ok((config::load_config(path)?, false))
    } else {
        Ok((Config::default(), true))
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}

async fn run(command: Commands, mut config: Config) -> Result<ExitCode> {
    match command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            let app = DocChat::from_config(&config)?;
            server::run_server(app).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status => {
            let app = DocChat::from_config(&config)?;
            if app.llm_available().await {
                println!("ollama: running ({})", config.llm.url);
                Ok(ExitCode::SUCCESS)
            } else {
                println!("ollama: not running ({})", config.llm.url);
                Ok(ExitCode::FAILURE)
            }
        }
        Commands::Ask {
            file,
            question,
            reasoning,
            top_k,
        } => {
            if let Some(k) = top_k {
                if k == 0 {
                    bail!("--top-k must be >= 1");
                }
                config.retrieval.top_k = k;
            }
            ask(&config, &file, &question, reasoning).await
        }
    }
}

async fn ask(config: &Config, file: &Path, question: &str, reasoning: bool) -> Result<ExitCode> {
    let bytes = tokio::fs::read(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let app = DocChat::from_config(config)?;
    let accepted = app.pipeline.accept("cli", &filename, bytes)?;
    match accepted.task.await.context("ingestion task failed")? {
        IngestOutcome::Completed { chunks } => {
            eprintln!("processed {} into {} chunks", filename, chunks);
        }
        IngestOutcome::Failed(message) => bail!("{}", message),
        IngestOutcome::Superseded => bail!("ingestion was superseded"),
    }

    let result = app.engine.ask("cli", question, reasoning).await?;
    if reasoning && !result.thinking.is_empty() {
        println!("Thinking:\n{}\n", result.thinking);
        println!("Answer:\n{}", result.answer);
    } else {
        println!("{}", result.answer);
    }
    let sources: Vec<String> = result
        .sources
        .iter()
        .map(|s| format!("#{} ({:.3})", s.index, s.score))
        .collect();
    eprintln!("sources: {}", sources.join(", "));
    Ok(ExitCode::SUCCESS)
}
