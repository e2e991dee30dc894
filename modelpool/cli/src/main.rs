//! Modelpool CLI - Dispatch, Stream and Probe Model Pools
//!
//! Loads the pool file, builds the named pool and runs one operation
//! against it. Results go to stdout (JSON unless noted); logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! # List configured pools
//! modelpool pools
//!
//! # One buffered request
//! modelpool dispatch chat --prompt "Summarise RFC 9110 in one line"
//!
//! # Streamed answer, forcing a strategy
//! modelpool stream chat --prompt "Hello" --strategy race
//!
//! # Probe every endpoint, then show health
//! modelpool test chat
//! modelpool health chat --probe
//!
//! # Custom pool file and verbose logging
//! modelpool --config ./pools.toml --log-level debug pools
//! ```
//!
//! The pool file is found through `--config`, then `MODELPOOL_CONFIG`, then
//! `~/.config/modelpool/pools.toml`. Ctrl-C cancels an in-flight dispatch.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use modelpool_core::{load_config, ModelType, StrategyKind};

use commands::App;

/// Modelpool - load balancing and failover across LLM endpoints
#[derive(Parser, Debug)]
#[command(name = "modelpool")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Pool file path
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Per-attempt timeout in seconds (overrides the pool file)
    #[arg(short = 't', long, global = true, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        short = 'l',
        long,
        global = true,
        env = "MODELPOOL_LOG_LEVEL",
        default_value = "warn"
    )]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send one buffered request through a pool
    Dispatch(RequestArgs),

    /// Stream one request through a pool
    Stream {
        #[command(flatten)]
        request: RequestArgs,

        /// Print every chunk as a JSON line instead of plain text
        #[arg(long)]
        json: bool,
    },

    /// Probe the endpoints of a pool, bypassing its strategy
    Test {
        /// Pool (model group) name
        pool: String,

        /// Probe a single endpoint ("platform:model")
        #[arg(short = 'e', long, value_name = "ID")]
        endpoint: Option<String>,

        /// Probe prompt instead of the built-in one
        #[arg(short = 'p', long)]
        prompt: Option<String>,
    },

    /// Show the health of every endpoint in a pool
    Health {
        /// Pool (model group) name
        pool: String,

        /// Probe every endpoint first
        #[arg(long)]
        probe: bool,

        /// Print `[[health_seeds]]` TOML for the pool file instead of JSON
        #[arg(long)]
        export: bool,
    },

    /// List configured pools
    Pools,
}

/// What to send and where
#[derive(clap::Args, Debug, Clone)]
pub struct RequestArgs {
    /// Pool (model group) name
    pub pool: String,

    /// User prompt for a single-turn chat
    #[arg(short = 'p', long, required_unless_present = "body", conflicts_with = "body")]
    pub prompt: Option<String>,

    /// Provider-facing JSON body ("-" reads stdin)
    #[arg(short = 'b', long, value_name = "FILE")]
    pub body: Option<PathBuf>,

    /// Capability type of the request
    #[arg(short = 'm', long, default_value = "chat", value_parser = parse_model_type)]
    pub model_type: ModelType,

    /// Override the pool's dispatch strategy for this request
    #[arg(short = 's', long, value_name = "STRATEGY")]
    pub strategy: Option<StrategyKind>,

    /// Correlation id (generated when absent)
    #[arg(long, value_name = "ID")]
    pub request_id: Option<String>,
}

fn parse_model_type(value: &str) -> Result<ModelType, String> {
    serde_json::from_value(serde_json::Value::String(value.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unknown model type: {value} (chat, vision, image, embedding)"))
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so stdout carries only results.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("modelpool={level},modelpool_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}

/// Cancel `token` on Ctrl-C
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling dispatch");
            token.cancel();
        }
    });
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    init_logging(&args.log_level);
    debug!(version = env!("CARGO_PKG_VERSION"), "modelpool starting");

    let loaded = load_config(args.config).context("Failed to load pool file")?;
    info!(source = %loaded.source, path = ?loaded.path, "Pool file resolved");

    let timeout_secs = args
        .timeout_secs
        .unwrap_or(loaded.file.dispatch.timeout_secs);
    if timeout_secs == 0 {
        anyhow::bail!("--timeout-secs must be positive");
    }

    let app = App::new(loaded.file, Duration::from_secs(timeout_secs))?;

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    match args.command {
        Command::Dispatch(request) => app.dispatch(&request, &cancel).await,
        Command::Stream { request, json } => app.stream(&request, json, &cancel).await,
        Command::Test {
            pool,
            endpoint,
            prompt,
        } => app.test(&pool, endpoint.as_deref(), prompt).await,
        Command::Health {
            pool,
            probe,
            export,
        } => app.health(&pool, probe, export).await,
        Command::Pools => app.pools().await,
    }
}
