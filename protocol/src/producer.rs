//! # Block Production Pipeline
//!
//! Turns submitted transactions into committed blocks.
//!
//! ```text
//! 1. SUBMIT  : decode, verify, admission check, queue
//! 2. SELECT  : admissible pending transactions, in nonce order
//! 3. EVALUATE: run them through the action evaluator; drop faulted ones
//! 4. BUILD   : assemble the block with the policy's difficulty
//! 5. VALIDATE: the same check every other node will run
//! 6. COMMIT  : two-phase commit of the block delta, then append to chain
//! ```
//!
//! Dropping a faulted transaction also drops its signer's later
//! transactions from the block (their nonces would no longer line up) and
//! re-evaluates what is left, so the committed delta is always exactly the
//! delta of the transactions in the block.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};

use crate::address::Address;
use crate::chain::{Block, Chain, ChainError};
use crate::evaluator::{ActionEvaluator, BlockContext, BlockEvaluation, EvaluationError, TxOutcome};
use crate::policy::{AdmissionError, BlockPolicy, ChainView, ValidationError};
use crate::router::{CommitReport, RouterError, StagedWrites, StateRouter};
use crate::transaction::{Transaction, TransactionError, TxId};

/// Default cap on queued transactions.
pub const DEFAULT_MAX_PENDING: usize = 10_000;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a submitted transaction was not queued. Reported to the submitter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmissionError {
    #[error("malformed transaction: {0}")]
    Malformed(#[from] TransactionError),

    #[error("transaction rejected: {0}")]
    Rejected(#[from] AdmissionError),

    #[error("transaction {0} is already pending")]
    Duplicate(TxId),

    #[error("pending pool is full ({max} transactions)")]
    PoolFull { max: usize },
}

#[derive(Debug, Error)]
pub enum ProductionError {
    #[error("evaluation failed: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("block failed validation: {0}")]
    Validation(#[from] ValidationError),

    #[error("state commit failed: {0}")]
    Commit(#[from] RouterError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("chain tip moved while the block was being built")]
    StaleTip,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A validated block that has not been committed yet.
#[derive(Debug, Clone)]
pub struct ProducedBlock {
    pub block: Block,
    pub evaluation: BlockEvaluation,
    /// Transactions left out of the block, with the reason.
    pub dropped: Vec<TxOutcome>,
    pub evaluation_time: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerStats {
    pub pending: usize,
    pub submitted: u64,
    pub rejected: u64,
    pub evaluated: u64,
    pub faulted: u64,
    pub blocks: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    evaluated: AtomicU64,
    faulted: AtomicU64,
    blocks: AtomicU64,
}

// ---------------------------------------------------------------------------
// BlockProducer
// ---------------------------------------------------------------------------

pub struct BlockProducer {
    chain: Arc<RwLock<Chain>>,
    policy: Arc<dyn BlockPolicy>,
    evaluator: ActionEvaluator,
    router: StateRouter,
    miner: Address,
    pending: DashMap<TxId, Transaction>,
    max_pending: usize,
    /// Serializes commits so the chain and the shards advance together.
    append_lock: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl BlockProducer {
    pub fn new(
        chain: Arc<RwLock<Chain>>,
        policy: Arc<dyn BlockPolicy>,
        evaluator: ActionEvaluator,
        router: StateRouter,
        miner: Address,
    ) -> Self {
        Self {
            chain,
            policy,
            evaluator,
            router,
            miner,
            pending: DashMap::new(),
            max_pending: DEFAULT_MAX_PENDING,
            append_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn with_max_pending(mut self, max_pending: usize) -> Self {
        self.max_pending = max_pending;
        self
    }

    pub fn chain(&self) -> &Arc<RwLock<Chain>> {
        &self.chain
    }

    pub fn miner(&self) -> Address {
        self.miner
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, id: &TxId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn stats(&self) -> ProducerStats {
        let c = &self.counters;
        ProducerStats {
            pending: self.pending.len(),
            submitted: c.submitted.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            evaluated: c.evaluated.load(Ordering::Relaxed),
            faulted: c.faulted.load(Ordering::Relaxed),
            blocks: c.blocks.load(Ordering::Relaxed),
        }
    }

    // -- Submission -----------------------------------------------------------

    /// Decode, verify and queue a serialized transaction.
    pub fn submit(&self, raw: &[u8]) -> Result<TxId, SubmissionError> {
        let tx = Transaction::deserialize(raw, true).map_err(|e| {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            SubmissionError::from(e)
        })?;
        self.submit_transaction(tx)
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<TxId, SubmissionError> {
        let result = self.admit(tx);
        match &result {
            Ok(id) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                debug!(tx = %id, "transaction queued");
            }
            Err(e) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "transaction rejected");
            }
        }
        result
    }

    fn admit(&self, tx: Transaction) -> Result<TxId, SubmissionError> {
        let id = tx.id();
        if self.pending.contains_key(&id) {
            return Err(SubmissionError::Duplicate(id));
        }
        if self.pending.len() >= self.max_pending {
            return Err(SubmissionError::PoolFull {
                max: self.max_pending,
            });
        }

        {
            let chain = self.chain.read();
            let signer = tx.signer();
            let queued_next = self
                .pending
                .iter()
                .filter(|e| e.value().signer() == signer)
                .map(|e| e.value().nonce() + 1)
                .max();
            let expected = chain.next_nonce(&signer).max(queued_next.unwrap_or(0));
            self.policy.check_transaction(&tx, &*chain, Some(expected))?;
        }

        self.pending.insert(id, tx);
        Ok(id)
    }

    // -- Production -----------------------------------------------------------

    /// Build, evaluate and validate the next block without committing it.
    /// `Ok(None)` when nothing is pending.
    pub async fn propose_block(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<ProducedBlock>, ProductionError> {
        let (index, parent, difficulty, mut selected) = {
            let chain = self.chain.read();
            let tip = chain.tip();
            let index = tip.map_or(0, |t| t.index + 1);
            let parent = tip.map(|t| t.hash);
            let difficulty = self.policy.next_difficulty(&*chain);
            let header = Block::new(index, parent, self.miner, timestamp, difficulty, Vec::new());
            (index, parent, difficulty, self.select(&chain, &header))
        };
        if selected.is_empty() {
            return Ok(None);
        }

        let ctx = BlockContext {
            index,
            miner: self.miner,
            timestamp,
        };
        let started = Instant::now();
        let mut dropped = Vec::new();
        let evaluation = loop {
            let evaluation = self
                .evaluator
                .evaluate_block(&ctx, &selected, self.policy.block_action())
                .await?;
            self.counters
                .evaluated
                .fetch_add(evaluation.outcomes.len() as u64, Ordering::Relaxed);

            let faulted: Vec<TxOutcome> = evaluation.faulted().cloned().collect();
            if faulted.is_empty() {
                break evaluation;
            }
            self.counters
                .faulted
                .fetch_add(faulted.len() as u64, Ordering::Relaxed);

            // A faulted transaction leaves a nonce gap, so its signer's later
            // transactions can never be included either. Drop them all.
            let faulted_ids: HashSet<TxId> = faulted.iter().map(|o| o.tx_id).collect();
            let mut first_fault: HashMap<Address, u64> = HashMap::new();
            for tx in selected.iter().filter(|tx| faulted_ids.contains(&tx.id())) {
                let nonce = first_fault.entry(tx.signer()).or_insert(tx.nonce());
                *nonce = (*nonce).min(tx.nonce());
            }
            let stranded = |tx: &Transaction| {
                first_fault
                    .get(&tx.signer())
                    .is_some_and(|n| tx.nonce() >= *n)
            };
            selected.retain(|tx| !stranded(tx));
            let mut stranded_count = 0usize;
            self.pending.retain(|_, tx| {
                let keep = !stranded(tx);
                if !keep {
                    stranded_count += 1;
                }
                keep
            });
            if stranded_count > faulted_ids.len() {
                warn!(
                    count = stranded_count - faulted_ids.len(),
                    "dropped pending transactions queued behind a faulted one"
                );
            }
            dropped.extend(faulted);
            if selected.is_empty() {
                info!(dropped = dropped.len(), "every selected transaction faulted, no block");
                return Ok(None);
            }
        };

        let block = Block::new(index, parent, self.miner, timestamp, difficulty, selected);
        {
            let chain = self.chain.read();
            if let Some(error) = self.policy.validate_next_block(&*chain, &block) {
                return Err(error.into());
            }
        }

        info!(
            index = block.index,
            txs = block.transactions.len(),
            dropped = dropped.len(),
            writes = evaluation.delta.len(),
            "block proposed"
        );
        Ok(Some(ProducedBlock {
            block,
            evaluation,
            dropped,
            evaluation_time: started.elapsed(),
        }))
    }

    /// Commit a block this producer proposed.
    pub async fn commit(&self, produced: ProducedBlock) -> Result<CommitReport, ProductionError> {
        self.commit_evaluated(produced.block, produced.evaluation).await
    }

    /// Evaluate and commit a block built elsewhere (or the genesis block).
    pub async fn append_block(&self, block: Block) -> Result<CommitReport, ProductionError> {
        let ctx = BlockContext {
            index: block.index,
            miner: block.miner,
            timestamp: block.timestamp,
        };
        // Genesis carries no state changes.
        let block_action = if block.is_genesis() {
            None
        } else {
            self.policy.block_action()
        };
        let evaluation = self
            .evaluator
            .evaluate_block(&ctx, &block.transactions, block_action)
            .await?;
        self.commit_evaluated(block, evaluation).await
    }

    /// Propose and commit in one step. `Ok(None)` when nothing is pending.
    pub async fn produce(
        &self,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<(ProducedBlock, CommitReport)>, ProductionError> {
        let Some(produced) = self.propose_block(timestamp).await? else {
            return Ok(None);
        };
        let report = self.commit(produced.clone()).await?;
        Ok(Some((produced, report)))
    }

    async fn commit_evaluated(
        &self,
        block: Block,
        evaluation: BlockEvaluation,
    ) -> Result<CommitReport, ProductionError> {
        let _guard = self.append_lock.lock().await;

        {
            let chain = self.chain.read();
            if chain.tip().map(|t| t.hash) != block.previous_hash {
                return Err(ProductionError::StaleTip);
            }
            if let Some(error) = self.policy.validate_next_block(&*chain, &block) {
                return Err(error.into());
            }
        }

        let report = self
            .router
            .commit(
                block.previous_hash.map(|h| h.0),
                block.commit_id(),
                StagedWrites::from(evaluation.delta),
            )
            .await?;

        let (index, hash, tx_ids) = (
            block.index,
            block.hash,
            block.transactions.iter().map(|tx| tx.id()).collect::<Vec<_>>(),
        );
        self.chain.write().append(block)?;
        for id in &tx_ids {
            self.pending.remove(id);
        }
        self.prune_stale();
        self.counters.blocks.fetch_add(1, Ordering::Relaxed);

        info!(
            index,
            hash = %hash,
            txs = tx_ids.len(),
            shards = report.shards,
            writes = report.writes,
            "block committed"
        );
        Ok(report)
    }

    /// Admissible pending transactions in nonce order, up to the policy's
    /// limits. `header` is the block being built with no transactions; the
    /// byte limit is checked against its exact encoded size.
    fn select(&self, chain: &Chain, header: &Block) -> Vec<Transaction> {
        let mut candidates: Vec<Transaction> = self.pending.iter().map(|e| e.value().clone()).collect();
        candidates.sort_by(|a, b| {
            (a.nonce(), a.timestamp(), a.signer(), a.id()).cmp(&(b.nonce(), b.timestamp(), b.signer(), b.id()))
        });

        let max_txs = self.policy.max_transactions_per_block();
        let max_bytes = self.policy.max_block_bytes(header.index);

        let mut next_nonce: HashMap<Address, u64> = HashMap::new();
        let mut selected = Vec::new();
        let mut bytes = header.byte_size();
        for tx in candidates {
            if selected.len() >= max_txs {
                break;
            }
            let expected = *next_nonce
                .entry(tx.signer())
                .or_insert_with(|| chain.next_nonce(&tx.signer()));
            if let Err(reason) = self.policy.check_transaction(&tx, chain, Some(expected)) {
                debug!(tx = %tx.id(), %reason, "pending transaction not selectable yet");
                continue;
            }
            let size = Block::transaction_entry_len(tx.byte_size());
            if max_bytes.is_some_and(|max| bytes + size > max) {
                continue;
            }
            bytes += size;
            next_nonce.insert(tx.signer(), expected + 1);
            selected.push(tx);
        }
        selected
    }

    /// Forget pending transactions whose nonce is already used.
    fn prune_stale(&self) {
        let chain = self.chain.read();
        let mut pruned = 0usize;
        self.pending.retain(|_, tx| {
            let keep = tx.nonce() >= chain.next_nonce(&tx.signer());
            if !keep {
                pruned += 1;
            }
            keep
        });
        if pruned > 0 {
            warn!(pruned, "dropped pending transactions with spent nonces");
        }
    }
}
