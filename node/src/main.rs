// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Node
//!
//! Entry point for the `strata-node` binary. Parses CLI arguments,
//! initializes logging and metrics, assembles the state router and block
//! producer, and serves the HTTP API.
//!
//! The binary supports four subcommands:
//!
//! - `run`         start the node
//! - `serve-shard` serve one local shard over TCP
//! - `tx`          offline transaction and action tooling
//! - `version`     print build version information

mod api;
mod cli;
mod logging;
mod metrics;
mod node;
mod tx;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

use strata_protocol::config::{NodeConfig, BLOCK_TIME_MS};
use strata_protocol::shard::{LocalShardStore, ShardRange, ShardServer};

use cli::{Commands, StrataNodeCli, TxCommand};
use metrics::{MetricsState, NodeMetrics};

const CONFIG_FILE: &str = "config.toml";

#[tokio::main]
async fn main() -> Result<()> {
    let cli = StrataNodeCli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_logging("strata_node=info,strata_protocol=info,tower_http=debug", cli.log_format)?;
            run_node(args).await
        }
        Commands::ServeShard(args) => {
            init_logging("strata_node=info,strata_protocol=info", cli.log_format)?;
            serve_shard(args).await
        }
        Commands::Tx(command) => {
            init_logging("warn", cli.log_format)?;
            run_tx(command)
        }
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

fn init_logging(default_level: &str, format: logging::LogFormat) -> Result<()> {
    logging::init_logging(default_level, format).context("failed to initialize logging")
}

/// Starts the full node: state router, block production, API server and
/// metrics endpoint.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.data_dir.join(CONFIG_FILE));
    let config = NodeConfig::load(&config_path)
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    tracing::info!(
        api_port = args.api_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        config = %config_path.display(),
        "starting strata-node"
    );

    std::fs::create_dir_all(&args.data_dir).with_context(|| {
        format!("failed to create data directory: {}", args.data_dir.display())
    })?;

    let miner = node::load_or_create_miner_key(&args.data_dir, args.miner_key.as_deref())?;
    tracing::info!(miner = %miner.address(), "miner key loaded");

    let chain = node::open_chain(&args.data_dir)?;
    let node = node::assemble(&config, chain, miner.address()).await?;

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new().context("failed to register metrics")?);
    node_metrics.observe(&node.router, &node.producer);

    // --- Block production ---
    let block_loop = if args.no_mining {
        tracing::info!("mining disabled, transactions will only be queued");
        None
    } else {
        let interval = Duration::from_millis(args.block_interval_ms.unwrap_or(BLOCK_TIME_MS));
        Some(tokio::spawn(node::production_loop(
            node.clone(),
            Arc::clone(&node_metrics),
            interval,
        )))
    };

    // --- API server ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            strata_protocol::config::PROTOCOL_VERSION,
        ),
        producer: Arc::clone(&node.producer),
        router: node.router.clone(),
    };
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.api_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(MetricsState {
            metrics: Arc::clone(&node_metrics),
            router: node.router.clone(),
            producer: Arc::clone(&node.producer),
        });
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    if let Some(handle) = block_loop {
        handle.abort();
    }
    tracing::info!(
        height = node.producer.chain().read().len().saturating_sub(1),
        pending = node.producer.pending_len(),
        "strata-node stopped"
    );
    Ok(())
}

/// Serves one sled-backed shard to remote routers until interrupted.
async fn serve_shard(args: cli::ServeShardArgs) -> Result<()> {
    let range = ShardRange::new(args.range_start, args.range_end);
    if range.is_empty() {
        anyhow::bail!("shard range {}..{} is empty", args.range_start, args.range_end);
    }

    let store = LocalShardStore::open(&args.store_path).with_context(|| {
        format!("failed to open shard store at {}", args.store_path.display())
    })?;
    tracing::info!(
        path = %args.store_path.display(),
        entries = store.len(),
        "shard store opened"
    );

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind shard listener on {}", addr))?;

    ShardServer::new(Arc::new(store), range, args.prefix_bytes)
        .serve(listener, shutdown_signal())
        .await
        .context("shard server failed")?;
    tracing::info!("shard server stopped");
    Ok(())
}

/// Runs a `tx` subcommand. Results go to stdout, everything else to stderr.
fn run_tx(command: TxCommand) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    match command {
        TxCommand::Sign(args) => {
            let raw = tx::sign(&args)?;
            if args.bytes {
                stdout.write_all(&raw)?;
            } else {
                writeln!(stdout, "{}", hex::encode(raw))?;
            }
        }
        TxCommand::Unsigned(args) => writeln!(stdout, "{}", tx::unsigned(&args)?)?,
        TxCommand::TransferAsset(args) => writeln!(stdout, "{}", tx::transfer_asset(&args)?)?,
        TxCommand::PatchTable(args) => {
            let (name, action) = tx::patch_table(&args)?;
            eprintln!("table: {}", name);
            writeln!(stdout, "{}", action)?;
        }
        TxCommand::RenewAdminState(args) => {
            writeln!(stdout, "{}", tx::renew_admin_state(&args))?
        }
        TxCommand::Inspect(args) => write!(stdout, "{}", tx::inspect(&args)?)?,
    }
    stdout.flush()?;
    Ok(())
}

/// Prints version information to stdout.
fn print_version() {
    println!("strata-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol    {}", strata_protocol::config::PROTOCOL_VERSION);
    println!("rustc       {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported. A handler that cannot
/// be installed is logged and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
