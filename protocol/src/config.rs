//! # Protocol Configuration & Constants
//!
//! Every protocol constant lives here, together with the node configuration
//! file format. Constants that feed the canonical encoding or the signing
//! payload can never change once a chain exists; the rest are defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::router::RetryPolicy;
use crate::shard::{DownloadSource, Keyspace, ShardDescriptor, ShardEndpoint, ShardId, ShardRange};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

pub const PROTOCOL_VERSION: &str = "0.1.0";

/// Wire protocol version spoken by shard servers. Bump on any change to
/// `ShardRequest` / `ShardResponse`.
pub const SHARD_WIRE_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Cryptographic Parameters
// ---------------------------------------------------------------------------

/// Ed25519 public key length in bytes.
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Ed25519 signature length. Always 64 bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of SHA-256 and BLAKE3 digests.
pub const HASH_LENGTH: usize = 32;

/// Address length: the first 20 bytes of `SHA-256(public key)`.
pub const ADDRESS_LENGTH: usize = 20;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Deepest list/map nesting the canonical decoder accepts.
pub const MAX_VALUE_DEPTH: usize = 64;

/// Transaction timestamps are rendered with microsecond precision in UTC.
/// This string is part of the signing payload.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

// ---------------------------------------------------------------------------
// Sharding
// ---------------------------------------------------------------------------

/// Default number of leading address bytes that form the range key.
/// One byte gives a keyspace of `[0, 256)`.
pub const DEFAULT_PREFIX_BYTES: usize = 1;

/// Largest supported prefix. `256^7` still fits a `u64` range end.
pub const MAX_PREFIX_BYTES: usize = 7;

/// Default port of a state-service shard server.
pub const DEFAULT_STATE_SERVICE_PORT: u16 = 11111;

/// Largest frame either side of the shard wire will read or write.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Entries per `ExportPage` response during bulk export.
pub const EXPORT_PAGE_SIZE: usize = 512;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Default capacity of the router's state cache.
pub const DEFAULT_STORE_STATES_CACHE_SIZE: usize = 4096;

/// Per-call timeout on a shard read or commit phase.
pub const DEFAULT_SHARD_TIMEOUT: Duration = Duration::from_millis(2_000);

/// Total attempts (first try included) before a shard is declared unavailable.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// First retry delay; doubles on each further attempt.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Backoff ceiling.
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(2_000);

// ---------------------------------------------------------------------------
// Block Policy
// ---------------------------------------------------------------------------

pub const DEFAULT_DIFFICULTY: u64 = 5_000_000;

pub const DEFAULT_MAX_TRANSACTIONS_PER_BLOCK: usize = 100;

/// How often the node tries to assemble a block.
pub const BLOCK_TIME_MS: u64 = 2_000;

/// Timestamp of the genesis block (2026-01-01T00:00:00Z). Fixed so that
/// nodes with the same genesis miner derive the same genesis hash.
pub const GENESIS_TIMESTAMP_SECS: i64 = 1_767_225_600;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

pub const DEFAULT_API_PORT: u16 = 9741;

pub const DEFAULT_METRICS_PORT: u16 = 9742;

/// `path` value of a state-service entry that refers to an in-process store.
pub const LOCAL_STATE_SERVICE_PATH: &str = "local";

// ---------------------------------------------------------------------------
// Node configuration file
// ---------------------------------------------------------------------------

/// Errors raised while loading or validating a [`NodeConfig`]. All of them
/// are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// The node configuration file.
///
/// ```toml
/// store_states_cache_size = 4096
///
/// [action_evaluator]
/// type = "state-service"
///
/// [[action_evaluator.state_services]]
/// path = "local"
/// state_store_path = "/var/strata/shard-0"
/// range = { start = 0, end = 256 }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Expected genesis block hash (hex). When set, the node refuses to start
    /// on a chain whose genesis differs.
    #[serde(default)]
    pub genesis_hash: Option<String>,

    #[serde(default = "default_cache_size")]
    pub store_states_cache_size: usize,

    pub action_evaluator: ActionEvaluatorConfig,

    #[serde(default)]
    pub router: RouterConfig,

    #[serde(default)]
    pub policy: PolicyConfig,
}

/// Where action evaluation reads and writes state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionEvaluatorConfig {
    /// A single in-process store covering the whole keyspace.
    Local { store_path: PathBuf },

    /// Range-sharded state services, local or remote.
    StateService {
        state_services: Vec<StateServiceConfig>,
        /// `host:port` of a node serving the full keyspace, used to seed
        /// empty local shards.
        #[serde(default)]
        state_service_download_path: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateServiceConfig {
    /// `"local"` for an in-process shard, otherwise the remote host.
    pub path: String,

    #[serde(default = "default_state_service_port")]
    pub port: u16,

    /// Required for local shards; ignored for remote ones.
    #[serde(default)]
    pub state_store_path: Option<PathBuf>,

    pub range: RangeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterConfig {
    pub prefix_bytes: usize,
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            prefix_bytes: DEFAULT_PREFIX_BYTES,
            timeout_ms: DEFAULT_SHARD_TIMEOUT.as_millis() as u64,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE.as_millis() as u64,
            backoff_max_ms: DEFAULT_BACKOFF_MAX.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PolicyConfig {
    pub difficulty: u64,
    pub max_transactions_per_block: usize,
    pub max_block_bytes: Option<usize>,
    pub allow_empty_actions: bool,
    pub allow_unsigned: bool,
    /// Amount minted to the miner by the block action. `None` disables it.
    pub block_reward: Option<u64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            difficulty: DEFAULT_DIFFICULTY,
            max_transactions_per_block: DEFAULT_MAX_TRANSACTIONS_PER_BLOCK,
            max_block_bytes: None,
            allow_empty_actions: false,
            allow_unsigned: false,
            block_reward: None,
        }
    }
}

fn default_cache_size() -> usize {
    DEFAULT_STORE_STATES_CACHE_SIZE
}

fn default_state_service_port() -> u16 {
    DEFAULT_STATE_SERVICE_PORT
}

impl NodeConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: NodeConfig = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks. Range coverage is checked separately when the
    /// range table is built from [`NodeConfig::shard_descriptors`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_states_cache_size == 0 {
            return Err(ConfigError::invalid(
                "store_states_cache_size",
                "must be at least 1",
            ));
        }
        if !(1..=MAX_PREFIX_BYTES).contains(&self.router.prefix_bytes) {
            return Err(ConfigError::invalid(
                "router.prefix_bytes",
                format!("must be between 1 and {}", MAX_PREFIX_BYTES),
            ));
        }
        if self.router.max_attempts == 0 {
            return Err(ConfigError::invalid("router.max_attempts", "must be at least 1"));
        }
        if self.router.timeout_ms == 0 {
            return Err(ConfigError::invalid("router.timeout_ms", "must be positive"));
        }
        if self.router.backoff_base_ms > self.router.backoff_max_ms {
            return Err(ConfigError::invalid(
                "router.backoff_base_ms",
                "must not exceed router.backoff_max_ms",
            ));
        }
        if self.policy.max_transactions_per_block == 0 {
            return Err(ConfigError::invalid(
                "policy.max_transactions_per_block",
                "must be at least 1",
            ));
        }
        self.genesis_hash_bytes()?;

        match &self.action_evaluator {
            ActionEvaluatorConfig::Local { .. } => Ok(()),
            ActionEvaluatorConfig::StateService {
                state_services,
                state_service_download_path,
            } => {
                if state_services.is_empty() {
                    return Err(ConfigError::invalid(
                        "action_evaluator.state_services",
                        "at least one state service is required",
                    ));
                }
                for service in state_services {
                    if service.is_local() && service.state_store_path.is_none() {
                        return Err(ConfigError::invalid(
                            "action_evaluator.state_services.state_store_path",
                            format!(
                                "local shard [{}, {}) needs a store path",
                                service.range.start, service.range.end
                            ),
                        ));
                    }
                    if !service.is_local() && service.path.trim().is_empty() {
                        return Err(ConfigError::invalid(
                            "action_evaluator.state_services.path",
                            "remote host must not be empty",
                        ));
                    }
                }
                if let Some(download) = state_service_download_path {
                    parse_host_port(download).map_err(|reason| {
                        ConfigError::invalid(
                            "action_evaluator.state_service_download_path",
                            reason,
                        )
                    })?;
                }
                Ok(())
            }
        }
    }

    /// The configured genesis hash, decoded.
    pub fn genesis_hash_bytes(&self) -> Result<Option<[u8; HASH_LENGTH]>, ConfigError> {
        let Some(hex_str) = &self.genesis_hash else {
            return Ok(None);
        };
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| ConfigError::invalid("genesis_hash", e.to_string()))?;
        let hash: [u8; HASH_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            ConfigError::invalid("genesis_hash", format!("expected {} bytes", HASH_LENGTH))
        })?;
        Ok(Some(hash))
    }

    pub fn keyspace(&self) -> Keyspace {
        Keyspace::new(self.router.prefix_bytes)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.router.max_attempts,
            base_delay: Duration::from_millis(self.router.backoff_base_ms),
            max_delay: Duration::from_millis(self.router.backoff_max_ms),
            timeout: Duration::from_millis(self.router.timeout_ms),
        }
    }

    /// Shard descriptors in configuration order. Local mode yields a single
    /// local shard covering the whole keyspace.
    pub fn shard_descriptors(&self) -> Result<Vec<ShardDescriptor>, ConfigError> {
        match &self.action_evaluator {
            ActionEvaluatorConfig::Local { store_path } => {
                let keyspace = self.keyspace();
                Ok(vec![ShardDescriptor {
                    id: ShardId(0),
                    endpoint: ShardEndpoint::Local,
                    range: ShardRange::new(keyspace.min(), keyspace.max()),
                    store_path: Some(store_path.clone()),
                    download_source: None,
                }])
            }
            ActionEvaluatorConfig::StateService {
                state_services,
                state_service_download_path,
            } => {
                let download_source = state_service_download_path
                    .as_deref()
                    .map(parse_host_port)
                    .transpose()
                    .map_err(|reason| {
                        ConfigError::invalid(
                            "action_evaluator.state_service_download_path",
                            reason,
                        )
                    })?
                    .map(|(host, port)| DownloadSource { host, port });

                Ok(state_services
                    .iter()
                    .enumerate()
                    .map(|(i, service)| {
                        let endpoint = if service.is_local() {
                            ShardEndpoint::Local
                        } else {
                            ShardEndpoint::Remote {
                                host: service.path.clone(),
                                port: service.port,
                            }
                        };
                        ShardDescriptor {
                            id: ShardId(i as u32),
                            range: ShardRange::new(service.range.start, service.range.end),
                            store_path: service.state_store_path.clone(),
                            download_source: if service.is_local() {
                                download_source.clone()
                            } else {
                                None
                            },
                            endpoint,
                        }
                    })
                    .collect())
            }
        }
    }
}

impl StateServiceConfig {
    pub fn is_local(&self) -> bool {
        self.path.eq_ignore_ascii_case(LOCAL_STATE_SERVICE_PATH)
    }
}

/// Splits `host:port`; a missing port means [`DEFAULT_STATE_SERVICE_PORT`].
pub fn parse_host_port(raw: &str) -> Result<(String, u16), String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("empty address".to_string());
    }
    match raw.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .map_err(|e| format!("bad port `{}`: {}", port, e))?;
            Ok((host.to_string(), port))
        }
        Some(_) => Err(format!("missing host in `{}`", raw)),
        None => Ok((raw.to_string(), DEFAULT_STATE_SERVICE_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHARDED: &str = r#"
        genesis_hash = "0000000000000000000000000000000000000000000000000000000000000001"
        store_states_cache_size = 2

        [action_evaluator]
        type = "state-service"
        state_service_download_path = "10.0.0.9:12000"

        [[action_evaluator.state_services]]
        path = "local"
        state_store_path = "/tmp/strata/shard-0"
        range = { start = 0, end = 100 }

        [[action_evaluator.state_services]]
        path = "10.0.0.2"
        range = { start = 100, end = 256 }

        [router]
        timeout_ms = 500
        max_attempts = 3

        [policy]
        difficulty = 42
        block_reward = 10
    "#;

    #[test]
    fn parses_sharded_config() {
        let config = NodeConfig::from_toml_str(SHARDED).unwrap();
        assert_eq!(config.store_states_cache_size, 2);
        assert_eq!(config.policy.difficulty, 42);
        assert_eq!(config.policy.block_reward, Some(10));
        assert_eq!(config.policy.max_transactions_per_block, DEFAULT_MAX_TRANSACTIONS_PER_BLOCK);
        assert_eq!(config.router.prefix_bytes, DEFAULT_PREFIX_BYTES);
        assert_eq!(config.genesis_hash_bytes().unwrap().unwrap()[31], 1);

        let retry = config.retry_policy();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.timeout, Duration::from_millis(500));

        let shards = config.shard_descriptors().unwrap();
        assert_eq!(shards.len(), 2);
        assert_eq!(shards[0].endpoint, ShardEndpoint::Local);
        assert_eq!(
            shards[0].download_source,
            Some(DownloadSource {
                host: "10.0.0.9".into(),
                port: 12000
            })
        );
        assert_eq!(
            shards[1].endpoint,
            ShardEndpoint::Remote {
                host: "10.0.0.2".into(),
                port: DEFAULT_STATE_SERVICE_PORT
            }
        );
        assert_eq!(shards[1].download_source, None);
        assert_eq!(shards[1].range, ShardRange::new(100, 256));
    }

    #[test]
    fn local_mode_covers_whole_keyspace() {
        let config = NodeConfig::from_toml_str(
            r#"
            [action_evaluator]
            type = "local"
            store_path = "/tmp/strata/state"
            "#,
        )
        .unwrap();
        let shards = config.shard_descriptors().unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].range, ShardRange::new(0, 256));
        assert_eq!(config.store_states_cache_size, DEFAULT_STORE_STATES_CACHE_SIZE);
    }

    #[test]
    fn local_shard_without_store_path_is_rejected() {
        let err = NodeConfig::from_toml_str(
            r#"
            [action_evaluator]
            type = "state-service"

            [[action_evaluator.state_services]]
            path = "local"
            range = { start = 0, end = 256 }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }), "{err}");
    }

    #[test]
    fn rejects_bad_router_and_genesis_values() {
        let base = r#"
            [action_evaluator]
            type = "local"
            store_path = "/tmp/s"
        "#;
        let bad_prefix = format!("{base}\n[router]\nprefix_bytes = 9\n");
        assert!(NodeConfig::from_toml_str(&bad_prefix).is_err());

        let bad_genesis = format!("genesis_hash = \"abcd\"\n{base}");
        assert!(NodeConfig::from_toml_str(&bad_genesis).is_err());

        let unknown_field = format!("{base}\n[policy]\nwhatever = 1\n");
        assert!(matches!(
            NodeConfig::from_toml_str(&unknown_field),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn host_port_parsing() {
        assert_eq!(parse_host_port("a.b:1").unwrap(), ("a.b".to_string(), 1));
        assert_eq!(
            parse_host_port("a.b").unwrap(),
            ("a.b".to_string(), DEFAULT_STATE_SERVICE_PORT)
        );
        assert!(parse_host_port(":80").is_err());
        assert!(parse_host_port("host:notaport").is_err());
    }
}
