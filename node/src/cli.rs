//! # CLI Interface
//!
//! Defines the command-line argument structure for `strata-node` using
//! `clap` derive. Subcommands: `run`, `serve-shard`, `tx` and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use strata_protocol::config::{DEFAULT_API_PORT, DEFAULT_METRICS_PORT, DEFAULT_STATE_SERVICE_PORT};

use crate::logging::LogFormat;

/// Strata node.
///
/// Evaluates actions against range-sharded state, produces blocks, and can
/// serve one shard of state to other nodes.
#[derive(Parser, Debug)]
#[command(
    name = "strata-node",
    about = "Strata range-sharded action evaluation node",
    version,
    propagate_version = true
)]
pub struct StrataNodeCli {
    /// Log output format.
    #[arg(long, global = true, env = "STRATA_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the node: route state, accept transactions, produce blocks.
    Run(RunArgs),
    /// Serve one local shard store over the shard wire protocol.
    ServeShard(ServeShardArgs),
    /// Build, sign and inspect transactions and actions offline.
    #[command(subcommand)]
    Tx(TxCommand),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Path to the node configuration file (TOML).
    ///
    /// When omitted, the node looks for `config.toml` in the data directory.
    #[arg(long, short = 'c', env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding the chain database and the miner key.
    #[arg(long, short = 'd', env = "STRATA_DATA_DIR", default_value = ".strata")]
    pub data_dir: PathBuf,

    /// Port for the HTTP API.
    #[arg(long, env = "STRATA_API_PORT", default_value_t = DEFAULT_API_PORT)]
    pub api_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "STRATA_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Hex-encoded Ed25519 seed of the miner.
    ///
    /// If not provided, the node reads `miner.key` from the data directory,
    /// generating it on first run.
    #[arg(long, env = "STRATA_MINER_KEY")]
    pub miner_key: Option<String>,

    /// Milliseconds between block production attempts.
    #[arg(long, env = "STRATA_BLOCK_INTERVAL_MS")]
    pub block_interval_ms: Option<u64>,

    /// Accept transactions but never produce blocks.
    #[arg(long)]
    pub no_mining: bool,
}

/// Arguments for the `serve-shard` subcommand.
#[derive(Parser, Debug)]
pub struct ServeShardArgs {
    /// sled directory of the shard.
    #[arg(long, env = "STRATA_SHARD_STORE")]
    pub store_path: PathBuf,

    /// First range key served (inclusive).
    #[arg(long)]
    pub range_start: u64,

    /// Last range key served (exclusive).
    #[arg(long)]
    pub range_end: u64,

    /// Address prefix bytes forming a range key. Must match the routers.
    #[arg(long, default_value_t = 1)]
    pub prefix_bytes: usize,

    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, short = 'p', default_value_t = DEFAULT_STATE_SERVICE_PORT)]
    pub port: u16,
}

/// `tx` subcommands.
#[derive(Subcommand, Debug)]
pub enum TxCommand {
    /// Create a signed transaction from encoded actions and dump it as hex.
    Sign(SignArgs),
    /// Build an unsigned transaction for offline signing and dump it as hex.
    Unsigned(UnsignedArgs),
    /// Encode a `transfer_asset` action as hex.
    TransferAsset(TransferAssetArgs),
    /// Encode a `patch_table_sheet` action from a CSV file as hex.
    PatchTable(PatchTableArgs),
    /// Encode a `renew_admin_state` action as hex.
    RenewAdminState(RenewAdminStateArgs),
    /// Decode a transaction without verifying it and print its contents.
    Inspect(InspectArgs),
}

#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Hex-encoded Ed25519 seed.
    pub private_key: String,
    pub nonce: u64,
    /// RFC 3339 timestamp, e.g. `2026-07-01T00:00:00Z`.
    pub timestamp: String,
    /// Hex-encoded genesis block hash.
    #[arg(long, short = 'g')]
    pub genesis_hash: Option<String>,
    /// Hex-encoded action, or a path to a file containing one. Repeatable.
    #[arg(long = "action", short = 'a')]
    pub actions: Vec<String>,
    /// Write raw bytes instead of hex. No trailing newline.
    #[arg(long, short = 'b')]
    pub bytes: bool,
}

#[derive(Parser, Debug)]
pub struct UnsignedArgs {
    /// Hex-encoded public key of the eventual signer.
    pub public_key: String,
    pub nonce: u64,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    #[arg(long, short = 'g')]
    pub genesis_hash: Option<String>,
    #[arg(long = "action", short = 'a')]
    pub actions: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct TransferAssetArgs {
    /// Hex address of the sender.
    pub sender: String,
    /// Hex address of the recipient.
    pub recipient: String,
    pub amount: u64,
    #[arg(long, default_value = strata_actions::NATIVE_TICKER)]
    pub ticker: String,
    #[arg(long)]
    pub memo: Option<String>,
}

#[derive(Parser, Debug)]
pub struct PatchTableArgs {
    /// CSV file; the table name is its file name without `.csv`.
    pub table_path: PathBuf,
}

#[derive(Parser, Debug)]
pub struct RenewAdminStateArgs {
    pub new_valid_until: u64,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Hex-encoded transaction, or a path to a file containing one.
    pub transaction: String,
}
