//! # Node Assembly
//!
//! Turns a [`NodeConfig`] into running parts: the state router over the
//! configured shards, the persistent chain, the block policy, and the
//! producer that ties them together. Also owns the miner key and the block
//! production loop.

use anyhow::{bail, Context, Result};
use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use strata_actions::{default_registry, BlockReward};
use strata_protocol::action::Action;
use strata_protocol::address::Address;
use strata_protocol::chain::{Block, Chain, ChainStore};
use strata_protocol::config::{NodeConfig, GENESIS_TIMESTAMP_SECS};
use strata_protocol::crypto::Keypair;
use strata_protocol::evaluator::ActionEvaluator;
use strata_protocol::policy::{ChainView, FixedDifficultyPolicy};
use strata_protocol::producer::BlockProducer;
use strata_protocol::router::StateRouter;

use crate::metrics::NodeMetrics;

const MINER_KEY_FILE: &str = "miner.key";
const CHAIN_DIR: &str = "chain";

/// Everything `run` serves.
#[derive(Clone)]
pub struct Node {
    pub router: StateRouter,
    pub producer: Arc<BlockProducer>,
}

/// The block every Strata chain starts from.
pub fn genesis_block() -> Result<Block> {
    let timestamp = Utc
        .timestamp_opt(GENESIS_TIMESTAMP_SECS, 0)
        .single()
        .context("genesis timestamp out of range")?;
    Ok(Block::genesis(Address::ZERO, timestamp))
}

/// Open (or create) the persistent chain under `data_dir`.
pub fn open_chain(data_dir: &Path) -> Result<Chain> {
    let path = data_dir.join(CHAIN_DIR);
    let store = ChainStore::open(&path)
        .with_context(|| format!("failed to open chain store at {}", path.display()))?;
    let chain = Chain::open(store).context("failed to load chain")?;
    tracing::info!(path = %path.display(), blocks = chain.len(), "chain opened");
    Ok(chain)
}

/// Build the router, policy and producer, bootstrap empty shards, and make
/// sure the chain has a genesis block matching the configuration.
pub async fn assemble(config: &NodeConfig, chain: Chain, miner: Address) -> Result<Node> {
    let descriptors = config
        .shard_descriptors()
        .context("invalid state service configuration")?;
    let router = StateRouter::from_descriptors(
        descriptors,
        config.keyspace(),
        config.store_states_cache_size,
        config.retry_policy(),
    )
    .context("failed to build shard range table")?;

    let imported = router.bootstrap().await.context("shard bootstrap failed")?;
    if imported > 0 {
        tracing::info!(entries = imported, "local shards bootstrapped");
    }

    let mut policy = FixedDifficultyPolicy::new(config.policy.clone());
    if let Some(reward) = config.policy.block_reward {
        policy = policy.with_block_action(BlockReward::native(reward).envelope());
    }

    let evaluator = ActionEvaluator::new(Arc::new(default_registry()), Arc::new(router.clone()));
    let producer = Arc::new(BlockProducer::new(
        Arc::new(RwLock::new(chain)),
        Arc::new(policy),
        evaluator,
        router.clone(),
        miner,
    ));

    if producer.chain().read().is_empty() {
        let genesis = genesis_block()?;
        tracing::info!(hash = %genesis.hash, "writing genesis block");
        producer
            .append_block(genesis)
            .await
            .context("failed to commit genesis block")?;
    }

    let actual = producer.chain().read().genesis_hash();
    if let (Some(expected), Some(actual)) = (config.genesis_hash_bytes()?, actual) {
        if expected != actual.0 {
            bail!(
                "genesis mismatch: config expects {}, chain has {}",
                hex::encode(expected),
                actual
            );
        }
    }

    Ok(Node { router, producer })
}

/// The miner key: `explicit` when given, otherwise `miner.key` in
/// `data_dir`, created on first use.
pub fn load_or_create_miner_key(data_dir: &Path, explicit: Option<&str>) -> Result<Keypair> {
    if let Some(hex_key) = explicit {
        return Keypair::from_hex(hex_key).context("invalid --miner-key");
    }

    let key_path = data_dir.join(MINER_KEY_FILE);
    if key_path.exists() {
        let raw = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read {}", key_path.display()))?;
        return Keypair::from_hex(&raw)
            .with_context(|| format!("malformed miner key in {}", key_path.display()));
    }

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let keypair = Keypair::generate();
    std::fs::write(&key_path, hex::encode(keypair.secret_key_bytes()))
        .with_context(|| format!("failed to write miner key to {}", key_path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(
        address = %keypair.address(),
        key_path = %key_path.display(),
        "miner key generated"
    );
    Ok(keypair)
}

/// Try to produce a block every `interval` until the task is aborted.
/// Failures are logged; the pending pool keeps the transactions for the
/// next attempt.
pub async fn production_loop(node: Node, metrics: Arc<NodeMetrics>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match node.producer.produce(Utc::now()).await {
            Ok(Some((produced, report))) => {
                metrics.observe_evaluation(produced.evaluation_time);
                tracing::debug!(
                    index = produced.block.index,
                    shards = report.shards,
                    "production round finished"
                );
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "block production failed"),
        }
        metrics.observe(&node.router, &node.producer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config(dir: &Path) -> NodeConfig {
        NodeConfig::from_toml_str(&format!(
            r#"
            [action_evaluator]
            type = "local"
            store_path = "{}"

            [policy]
            difficulty = 7
            block_reward = 10
            "#,
            dir.join("state").display()
        ))
        .unwrap()
    }

    #[test]
    fn genesis_is_fixed() {
        let a = genesis_block().unwrap();
        let b = genesis_block().unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.timestamp.timestamp(), GENESIS_TIMESTAMP_SECS);
    }

    #[tokio::test]
    async fn assemble_writes_genesis_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let miner = Keypair::from_seed(&[1; 32]).address();

        let node = assemble(&config, open_chain(dir.path()).unwrap(), miner)
            .await
            .unwrap();
        assert_eq!(node.producer.chain().read().len(), 1);
        drop(node);

        let node = assemble(&config, open_chain(dir.path()).unwrap(), miner)
            .await
            .unwrap();
        assert_eq!(node.producer.chain().read().len(), 1);
    }

    #[tokio::test]
    async fn assemble_rejects_foreign_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        config.genesis_hash = Some("ab".repeat(32));
        let err = assemble(&config, Chain::in_memory(), Address::ZERO)
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("genesis mismatch"));
    }

    #[test]
    fn miner_key_is_created_then_reused() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_miner_key(dir.path(), None).unwrap();
        let second = load_or_create_miner_key(dir.path(), None).unwrap();
        assert_eq!(first.address(), second.address());

        let explicit = load_or_create_miner_key(dir.path(), Some(&"07".repeat(32))).unwrap();
        assert_eq!(explicit.address(), Keypair::from_seed(&[7; 32]).address());
    }
}
