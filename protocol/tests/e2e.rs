//! End-to-end tests for the Strata protocol.
//!
//! These run the whole pipeline: transactions are signed and submitted,
//! the producer evaluates them through the router against real shard
//! stores (sled on disk, and a memory store behind a TCP shard server),
//! and the block's writes are committed across shards.
//!
//! Each test builds its own stores and servers. Nothing is shared.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use tokio::net::TcpListener;

use strata_protocol::action::{Action, ActionContext, ActionEnvelope, ActionError, ActionRegistry};
use strata_protocol::address::Address;
use strata_protocol::chain::{Block, Chain};
use strata_protocol::config::PolicyConfig;
use strata_protocol::crypto::Keypair;
use strata_protocol::evaluator::{ActionEvaluator, StateDelta};
use strata_protocol::policy::{ChainView, FixedDifficultyPolicy};
use strata_protocol::producer::{BlockProducer, ProductionError, SubmissionError};
use strata_protocol::router::{RetryPolicy, RouterError, StateRouter};
use strata_protocol::shard::{
    CommitId, DownloadSource, ExportPage, Keyspace, LocalShardStore, MemoryShardStore, RangeTable,
    ShardDescriptor, ShardEndpoint, ShardError, ShardId, ShardRange, ShardServer, ShardStore,
};
use strata_protocol::transaction::Transaction;
use strata_protocol::value::Value;

// ---------------------------------------------------------------------------
// Test actions: a balance per address
// ---------------------------------------------------------------------------

fn parse_to_amount(tag: &str, v: &Value) -> Result<(Address, u64), ActionError> {
    let map = v.as_map().ok_or_else(|| ActionError::invalid(tag, "expected a map"))?;
    let to = map
        .get_text_key("to")
        .ok_or_else(|| ActionError::invalid(tag, "missing `to`"))
        .and_then(|v| Address::from_value(v).map_err(|e| ActionError::invalid(tag, e.to_string())))?;
    let amount = map
        .get_text_key("amount")
        .and_then(Value::as_u64)
        .ok_or_else(|| ActionError::invalid(tag, "missing `amount`"))?;
    Ok((to, amount))
}

fn to_amount(to: Address, amount: u64) -> Value {
    Value::map([("amount", Value::from(amount)), ("to", to.to_value())])
}

async fn balance(ctx: &ActionContext<'_>, address: &Address) -> Result<u64, ActionError> {
    Ok(ctx.get(address).await?.and_then(|v| v.as_u64()).unwrap_or(0))
}

/// Mints `amount` to `to`.
#[derive(Debug)]
struct Credit {
    to: Address,
    amount: u64,
}

#[async_trait]
impl Action for Credit {
    fn type_tag(&self) -> &str {
        "credit"
    }
    fn plain_value(&self) -> Value {
        to_amount(self.to, self.amount)
    }
    fn declared_addresses(&self, _signer: &Address) -> Vec<Address> {
        vec![self.to]
    }
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        let mut delta = StateDelta::new();
        delta.set(self.to, balance(ctx, &self.to).await? + self.amount);
        Ok(delta)
    }
}

/// Moves `amount` from the signer to `to`.
#[derive(Debug)]
struct Transfer {
    to: Address,
    amount: u64,
}

#[async_trait]
impl Action for Transfer {
    fn type_tag(&self) -> &str {
        "transfer"
    }
    fn plain_value(&self) -> Value {
        to_amount(self.to, self.amount)
    }
    fn declared_addresses(&self, signer: &Address) -> Vec<Address> {
        vec![*signer, self.to]
    }
    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        let from = balance(ctx, &ctx.signer).await?;
        if from < self.amount {
            return Err(ActionError::execution(format!(
                "insufficient balance: have {}, need {}",
                from, self.amount
            )));
        }
        let mut delta = StateDelta::new();
        delta.set(ctx.signer, from - self.amount);
        let to = balance(ctx, &self.to).await? + self.amount;
        delta.set(self.to, to);
        Ok(delta)
    }
}

fn registry() -> Arc<ActionRegistry> {
    let mut registry = ActionRegistry::new();
    registry
        .register("credit", |v| {
            let (to, amount) = parse_to_amount("credit", v)?;
            Ok(Box::new(Credit { to, amount }))
        })
        .register("transfer", |v| {
            let (to, amount) = parse_to_amount("transfer", v)?;
            Ok(Box::new(Transfer { to, amount }))
        });
    Arc::new(registry)
}

fn credit(to: Address, amount: u64) -> ActionEnvelope {
    ActionEnvelope::new("credit", to_amount(to, amount))
}

fn transfer(to: Address, amount: u64) -> ActionEnvelope {
    ActionEnvelope::new("transfer", to_amount(to, amount))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn ts(secs: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, secs).unwrap()
}

fn retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        timeout: Duration::from_secs(2),
    }
}

/// Address whose range key (first byte) is `first`.
fn addr(first: u8, last: u8) -> Address {
    let mut bytes = [0u8; 20];
    bytes[0] = first;
    bytes[19] = last;
    Address::new(bytes)
}

async fn spawn_shard_server(
    store: Arc<dyn ShardStore>,
    range: ShardRange,
) -> (u16, tokio::sync::oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(ShardServer::new(store, range, 1).serve(listener, async {
        let _ = rx.await;
    }));
    (port, tx)
}

fn producer(router: StateRouter) -> BlockProducer {
    producer_with(
        router,
        PolicyConfig {
            difficulty: 1,
            ..PolicyConfig::default()
        },
    )
}

fn producer_with(router: StateRouter, config: PolicyConfig) -> BlockProducer {
    let policy = FixedDifficultyPolicy::new(config);
    let evaluator = ActionEvaluator::new(registry(), Arc::new(router.clone()));
    BlockProducer::new(
        Arc::new(RwLock::new(Chain::in_memory())),
        Arc::new(policy),
        evaluator,
        router,
        MINER,
    )
}

const MINER: Address = Address::new([0xee; 20]);

fn memory_router(low: Arc<dyn ShardStore>, high: Arc<dyn ShardStore>) -> StateRouter {
    let table = RangeTable::new(
        vec![
            ShardDescriptor::local(0, 0, 128),
            ShardDescriptor::local(1, 128, 256),
        ],
        Keyspace::default(),
    )
    .unwrap();
    let mut stores: HashMap<ShardId, Arc<dyn ShardStore>> = HashMap::new();
    stores.insert(ShardId(0), low);
    stores.insert(ShardId(1), high);
    StateRouter::new(table, stores, 64, retry()).unwrap()
}

// ---------------------------------------------------------------------------
// Full lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn block_commits_across_local_and_remote_shards() {
    let dir = tempfile::tempdir().unwrap();
    let remote_backing = Arc::new(MemoryShardStore::new());
    let (port, _shutdown) =
        spawn_shard_server(remote_backing.clone(), ShardRange::new(128, 256)).await;

    let mut low = ShardDescriptor::local(0, 0, 128);
    low.store_path = Some(dir.path().join("shard-0"));
    let high = ShardDescriptor {
        id: ShardId(1),
        endpoint: ShardEndpoint::Remote {
            host: "127.0.0.1".into(),
            port,
        },
        range: ShardRange::new(128, 256),
        store_path: None,
        download_source: None,
    };
    let router =
        StateRouter::from_descriptors(vec![low, high], Keyspace::default(), 64, retry()).unwrap();
    let producer = producer(router.clone());

    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();

    let alice = Keypair::from_seed(&[1; 32]);
    let left = addr(10, 1);
    let right = addr(200, 2);

    let tx0 = Transaction::create(0, &alice, None, ts(1), vec![credit(left, 100)]).unwrap();
    let tx1 = Transaction::create(1, &alice, None, ts(1), vec![credit(right, 40)]).unwrap();
    producer.submit(&tx0.serialize(true)).unwrap();
    producer.submit(&tx1.serialize(true)).unwrap();
    assert_eq!(producer.pending_len(), 2);

    let (produced, report) = producer.produce(ts(2)).await.unwrap().unwrap();
    assert_eq!(produced.block.transactions.len(), 2);
    assert_eq!(report.shards, 2);
    assert_eq!(producer.pending_len(), 0);

    assert_eq!(router.get(&left).await.unwrap(), Some(Value::from(100u64)));
    assert_eq!(remote_backing.snapshot().get(&right), Some(&Value::from(40u64)));

    let chain = producer.chain().read();
    assert_eq!(chain.tip().map(|b| b.index), Some(1));
    assert_eq!(chain.last_nonce(&alice.address()), Some(1));
}

#[tokio::test]
async fn committed_state_is_seen_by_a_cold_router() {
    let low = Arc::new(MemoryShardStore::new());
    let high = Arc::new(MemoryShardStore::new());
    let producer = producer(memory_router(low.clone(), high.clone()));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();

    let alice = Keypair::from_seed(&[2; 32]);
    let bob = addr(250, 9);
    let txs = [
        Transaction::create(0, &alice, None, ts(1), vec![credit(alice.address(), 50)]).unwrap(),
        Transaction::create(1, &alice, None, ts(1), vec![transfer(bob, 20)]).unwrap(),
    ];
    for tx in &txs {
        producer.submit_transaction(tx.clone()).unwrap();
    }
    producer.produce(ts(3)).await.unwrap().unwrap();

    let cold = memory_router(low, high);
    assert_eq!(cold.get(&alice.address()).await.unwrap(), Some(Value::from(30u64)));
    assert_eq!(cold.get(&bob).await.unwrap(), Some(Value::from(20u64)));
}

// ---------------------------------------------------------------------------
// Faults and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn faulted_transaction_is_left_out_of_the_block() {
    let producer = producer(memory_router(
        Arc::new(MemoryShardStore::new()),
        Arc::new(MemoryShardStore::new()),
    ));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();

    let broke = Keypair::from_seed(&[3; 32]);
    let rich = Keypair::from_seed(&[4; 32]);
    let target = addr(5, 5);

    producer
        .submit_transaction(
            Transaction::create(0, &broke, None, ts(1), vec![transfer(target, 1_000)]).unwrap(),
        )
        .unwrap();
    let held_back = Transaction::create(1, &broke, None, ts(1), vec![credit(target, 1)]).unwrap();
    producer.submit_transaction(held_back.clone()).unwrap();
    let good = Transaction::create(0, &rich, None, ts(1), vec![credit(target, 7)]).unwrap();
    producer.submit_transaction(good.clone()).unwrap();

    let (produced, _) = producer.produce(ts(2)).await.unwrap().unwrap();
    let included: Vec<_> = produced.block.transactions.iter().map(|t| t.id()).collect();
    assert_eq!(included, vec![good.id()]);
    assert_eq!(produced.dropped.len(), 1);
    assert_eq!(produced.evaluation.delta.get(&target), Some(&Value::from(7u64)));

    // The signer's next transaction sat behind the faulted one.
    assert!(!producer.is_pending(&held_back.id()));
    assert_eq!(producer.pending_len(), 0);
    assert_eq!(producer.stats().faulted, 1);
    assert_eq!(producer.stats().blocks, 2);
}

#[tokio::test]
async fn no_block_when_every_transaction_faults() {
    let producer = producer(memory_router(
        Arc::new(MemoryShardStore::new()),
        Arc::new(MemoryShardStore::new()),
    ));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();

    let broke = Keypair::from_seed(&[6; 32]);
    producer
        .submit_transaction(
            Transaction::create(0, &broke, None, ts(1), vec![transfer(addr(9, 9), 5)]).unwrap(),
        )
        .unwrap();

    assert!(producer.produce(ts(2)).await.unwrap().is_none());
    assert_eq!(producer.chain().read().len(), 1);
    assert_eq!(producer.pending_len(), 0);
    assert_eq!(producer.stats().faulted, 1);
}

#[tokio::test]
async fn failed_prepare_leaves_shards_and_chain_untouched() {
    let low = Arc::new(MemoryShardStore::new());
    let high = Arc::new(MemoryShardStore::new());
    let producer = producer(memory_router(low.clone(), high.clone()));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();

    high.set_fail_prepare(true);
    let kp = Keypair::from_seed(&[5; 32]);
    let tx = Transaction::create(0, &kp, None, ts(1), vec![credit(addr(1, 0), 1), credit(addr(255, 0), 1)])
        .unwrap();
    producer.submit_transaction(tx.clone()).unwrap();

    let err = producer.produce(ts(2)).await.unwrap_err();
    assert!(matches!(
        err,
        ProductionError::Commit(RouterError::CommitAborted { shard: ShardId(1), .. })
    ));
    assert!(low.snapshot().is_empty());
    assert!(high.snapshot().is_empty());
    assert_eq!(low.prepared_count(), 0);
    assert_eq!(producer.chain().read().len(), 1);
    assert!(producer.is_pending(&tx.id()));

    // Once the shard recovers the same transaction goes through.
    high.set_fail_prepare(false);
    producer.produce(ts(3)).await.unwrap().unwrap();
    assert_eq!(high.snapshot().get(&addr(255, 0)), Some(&Value::from(1u64)));
}

/// Applies the first commit it sees, then reports the connection as lost.
struct LostAckStore {
    inner: Arc<MemoryShardStore>,
    dropped_acks: AtomicUsize,
}

#[async_trait]
impl ShardStore for LostAckStore {
    async fn get(&self, address: &Address) -> Result<Option<Value>, ShardError> {
        self.inner.get(address).await
    }
    async fn export_page(
        &self,
        range: ShardRange,
        prefix_bytes: usize,
        after: Option<Address>,
        limit: usize,
    ) -> Result<ExportPage, ShardError> {
        self.inner.export_page(range, prefix_bytes, after, limit).await
    }
    async fn import(&self, entries: Vec<(Address, Value)>) -> Result<(), ShardError> {
        self.inner.import(entries).await
    }
    async fn prepare(&self, id: CommitId, writes: Vec<(Address, Value)>) -> Result<(), ShardError> {
        self.inner.prepare(id, writes).await
    }
    async fn commit(&self, id: CommitId) -> Result<(), ShardError> {
        self.inner.commit(id).await?;
        if self.dropped_acks.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(ShardError::Io("connection reset".into()));
        }
        Ok(())
    }
    async fn abort(&self, id: CommitId) -> Result<(), ShardError> {
        self.inner.abort(id).await
    }
    async fn is_empty(&self) -> Result<bool, ShardError> {
        self.inner.is_empty().await
    }
}

#[tokio::test]
async fn commit_whose_ack_was_lost_is_applied_once() {
    let low = Arc::new(MemoryShardStore::new());
    let flaky = Arc::new(LostAckStore {
        inner: low.clone(),
        dropped_acks: AtomicUsize::new(0),
    });
    let producer = producer(memory_router(flaky.clone(), Arc::new(MemoryShardStore::new())));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();
    // Genesis writes nothing, so no commit reached the store yet.
    assert_eq!(flaky.dropped_acks.load(Ordering::SeqCst), 0);

    let kp = Keypair::from_seed(&[8; 32]);
    let slot = addr(3, 3);
    let tx = Transaction::create(0, &kp, None, ts(1), vec![credit(slot, 1)]).unwrap();
    producer.submit_transaction(tx.clone()).unwrap();

    let (produced, _) = producer.produce(ts(2)).await.unwrap().unwrap();
    assert_eq!(produced.block.transactions.len(), 1);
    assert_eq!(flaky.dropped_acks.load(Ordering::SeqCst), 2);
    assert_eq!(low.snapshot().get(&slot), Some(&Value::from(1u64)));
    assert_eq!(producer.chain().read().len(), 2);
    assert!(!producer.is_pending(&tx.id()));

    // Nothing left to apply a second time.
    assert!(producer.produce(ts(3)).await.unwrap().is_none());
    assert_eq!(low.snapshot().get(&slot), Some(&Value::from(1u64)));
}

#[tokio::test]
async fn selection_fills_the_byte_limit_exactly() {
    let kp = Keypair::from_seed(&[9; 32]);
    let txs: Vec<Transaction> = (0..40u64)
        .map(|n| Transaction::create(n, &kp, None, ts(1), vec![credit(addr(7, n as u8), n)]).unwrap())
        .collect();
    let genesis = Block::genesis(Address::ZERO, ts(0));
    let header = Block::new(1, Some(genesis.hash), MINER, ts(2), 1, vec![]);
    let fits = 25;
    let max = header.byte_size()
        + txs[..fits]
            .iter()
            .map(|tx| Block::transaction_entry_len(tx.byte_size()))
            .sum::<usize>();

    let producer = producer_with(
        memory_router(Arc::new(MemoryShardStore::new()), Arc::new(MemoryShardStore::new())),
        PolicyConfig {
            difficulty: 1,
            max_block_bytes: Some(max),
            ..PolicyConfig::default()
        },
    );
    producer.append_block(genesis).await.unwrap();
    for tx in &txs {
        producer.submit_transaction(tx.clone()).unwrap();
    }

    let (produced, _) = producer.produce(ts(2)).await.unwrap().unwrap();
    assert_eq!(produced.block.byte_size(), max);
    assert_eq!(produced.block.transactions.len(), fits);
    assert_eq!(producer.pending_len(), txs.len() - fits);

    let (next, _) = producer.produce(ts(3)).await.unwrap().unwrap();
    assert_eq!(next.block.transactions.len(), txs.len() - fits);
    assert!(next.block.byte_size() <= max);
    assert_eq!(producer.pending_len(), 0);
}

#[tokio::test]
async fn submission_errors_reach_the_submitter() {
    let producer = producer(memory_router(
        Arc::new(MemoryShardStore::new()),
        Arc::new(MemoryShardStore::new()),
    ));
    producer
        .append_block(Block::genesis(Address::ZERO, ts(0)))
        .await
        .unwrap();
    let kp = Keypair::from_seed(&[6; 32]);

    assert!(matches!(
        producer.submit(b"not a transaction"),
        Err(SubmissionError::Malformed(_))
    ));

    let skip = Transaction::create(3, &kp, None, ts(1), vec![credit(addr(1, 1), 1)]).unwrap();
    assert!(matches!(
        producer.submit_transaction(skip),
        Err(SubmissionError::Rejected(_))
    ));

    let ok = Transaction::create(0, &kp, None, ts(1), vec![credit(addr(1, 1), 1)]).unwrap();
    producer.submit_transaction(ok.clone()).unwrap();
    assert_eq!(
        producer.submit_transaction(ok.clone()),
        Err(SubmissionError::Duplicate(ok.id()))
    );
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_local_shard_bootstraps_from_remote_source() {
    let seeded = (0..=255u8).map(|i| (addr(i, i), Value::from(u64::from(i)))).collect::<Vec<_>>();
    let source = Arc::new(MemoryShardStore::with_entries(seeded));
    let (port, _shutdown) = spawn_shard_server(source, ShardRange::new(0, 256)).await;

    let dir = tempfile::tempdir().unwrap();
    let mut only = ShardDescriptor::local(0, 0, 256);
    only.store_path = Some(dir.path().join("state"));
    only.download_source = Some(DownloadSource {
        host: "127.0.0.1".into(),
        port,
    });

    let router =
        StateRouter::from_descriptors(vec![only], Keyspace::default(), 16, retry()).unwrap();
    assert_eq!(router.bootstrap().await.unwrap(), 256);
    assert_eq!(router.get(&addr(77, 77)).await.unwrap(), Some(Value::from(77u64)));

    // A second bootstrap finds the shard populated and does nothing.
    assert_eq!(router.bootstrap().await.unwrap(), 0);
}

#[tokio::test]
async fn sled_shard_keeps_state_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shard");
    let key = addr(3, 3);
    {
        let store = LocalShardStore::open(&path).unwrap();
        let mut writes = strata_protocol::router::StagedWrites::new();
        writes.put(key, Value::from("kept"));
        let mut stores: HashMap<ShardId, Arc<dyn ShardStore>> = HashMap::new();
        stores.insert(ShardId(0), Arc::new(store));
        let table = RangeTable::new(vec![ShardDescriptor::local(0, 0, 256)], Keyspace::default())
            .unwrap();
        let router = StateRouter::new(table, stores, 8, retry()).unwrap();
        let id = Block::genesis(Address::ZERO, ts(0)).commit_id();
        router.commit(None, id, writes).await.unwrap();
    }
    let reopened = LocalShardStore::open(&path).unwrap();
    assert_eq!(reopened.len(), 1);
}
