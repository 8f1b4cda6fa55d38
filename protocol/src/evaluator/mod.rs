//! # Action Evaluator
//!
//! Runs the actions of a transaction, in order, against a layered view of
//! state and collects what they change.
//!
//! ```text
//! Pending ──▶ Executing(0) ──▶ Executing(1) ──▶ … ──▶ Committed
//!                   │                │
//!                   └────────────────┴──────────────▶ Faulted
//! ```
//!
//! A fault discards everything the transaction wrote; the rest of the
//! block is unaffected. A shard that cannot be read is not a fault of the
//! transaction, so it aborts the whole evaluation instead.
//!
//! The evaluator reads through a [`StateReader`] and never writes. Turning
//! a block delta into committed state is the router's job.

pub mod delta;
mod view;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

use crate::action::{Action, ActionContext, ActionEnvelope, ActionError, ActionRegistry, StateReader};
use crate::address::Address;
use crate::router::RouterError;
use crate::transaction::{Transaction, TxId};
use view::LayeredView;

pub use delta::StateDelta;

/// Failures that stop evaluation of a whole block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvaluationError {
    #[error("state unavailable: {0}")]
    ShardUnavailable(#[source] RouterError),
}

/// Where a transaction is in its evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Pending,
    /// Running the action at this index.
    Executing(usize),
    Committed,
    Faulted,
}

/// Why a transaction faulted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("action {index} (`{type_tag}`) faulted: {error}")]
pub struct ActionExecutionFault {
    pub index: usize,
    pub type_tag: String,
    pub error: ActionError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutcome {
    pub tx_id: TxId,
    pub signer: Address,
    pub state: TxState,
    /// Empty when faulted.
    pub delta: StateDelta,
    pub fault: Option<ActionExecutionFault>,
}

impl TxOutcome {
    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }
}

/// Block-level facts visible to every action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub index: u64,
    pub miner: Address,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockEvaluation {
    pub outcomes: Vec<TxOutcome>,
    /// Outcome of the block-wide action, if the policy has one.
    pub block_action: Option<TxOutcome>,
    /// Union of every committed delta, in execution order.
    pub delta: StateDelta,
}

impl BlockEvaluation {
    pub fn faulted(&self) -> impl Iterator<Item = &TxOutcome> {
        self.outcomes.iter().filter(|o| !o.is_committed())
    }
}

/// What is being executed: a transaction, or the block action.
struct Execution<'a> {
    tx_id: Option<TxId>,
    signer: Address,
    timestamp: DateTime<Utc>,
    actions: &'a [ActionEnvelope],
}

pub struct ActionEvaluator {
    registry: Arc<ActionRegistry>,
    state: Arc<dyn StateReader>,
}

impl ActionEvaluator {
    pub fn new(registry: Arc<ActionRegistry>, state: Arc<dyn StateReader>) -> Self {
        Self { registry, state }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Evaluate one transaction on top of `block_delta` (what earlier
    /// transactions in the same block wrote).
    pub async fn evaluate_transaction(
        &self,
        block: &BlockContext,
        tx: &Transaction,
        block_delta: &StateDelta,
    ) -> Result<TxOutcome, EvaluationError> {
        self.run(
            block,
            Execution {
                tx_id: Some(tx.id()),
                signer: tx.signer(),
                timestamp: tx.timestamp(),
                actions: tx.actions(),
            },
            block_delta,
        )
        .await
    }

    /// Evaluate `txs` in order, then `block_action` with the miner as
    /// signer.
    pub async fn evaluate_block(
        &self,
        block: &BlockContext,
        txs: &[Transaction],
        block_action: Option<&ActionEnvelope>,
    ) -> Result<BlockEvaluation, EvaluationError> {
        let started = Instant::now();
        let mut delta = StateDelta::new();
        let mut outcomes = Vec::with_capacity(txs.len());

        for tx in txs {
            let outcome = self.evaluate_transaction(block, tx, &delta).await?;
            if outcome.is_committed() {
                delta.merge(outcome.delta.clone());
            }
            outcomes.push(outcome);
        }

        let block_outcome = match block_action {
            Some(action) => {
                let outcome = self
                    .run(
                        block,
                        Execution {
                            tx_id: None,
                            signer: block.miner,
                            timestamp: block.timestamp,
                            actions: std::slice::from_ref(action),
                        },
                        &delta,
                    )
                    .await?;
                if outcome.is_committed() {
                    delta.merge(outcome.delta.clone());
                } else if let Some(fault) = &outcome.fault {
                    warn!(
                        block = block.index,
                        error = %fault.error,
                        "block action faulted, its writes are discarded"
                    );
                }
                Some(outcome)
            }
            None => None,
        };

        debug!(
            block = block.index,
            txs = txs.len(),
            faulted = outcomes.iter().filter(|o| !o.is_committed()).count(),
            writes = delta.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "block evaluated"
        );
        Ok(BlockEvaluation {
            outcomes,
            block_action: block_outcome,
            delta,
        })
    }

    async fn run(
        &self,
        block: &BlockContext,
        exec: Execution<'_>,
        block_delta: &StateDelta,
    ) -> Result<TxOutcome, EvaluationError> {
        // The block action has no transaction id; key its outcome by the
        // zero id.
        let tx_id = exec.tx_id.unwrap_or(TxId([0; 32]));
        let mut tx_delta = StateDelta::new();

        for (index, envelope) in exec.actions.iter().enumerate() {
            let state = TxState::Executing(index);
            debug!(tx = %tx_id, ?state, tag = %envelope.type_tag, "executing action");

            let action = match self.registry.load(envelope) {
                Ok(action) => action,
                Err(error) => {
                    return Ok(self.fault(tx_id, exec.signer, index, &envelope.type_tag, error));
                }
            };

            self.prefetch(action.as_ref(), &exec.signer).await?;

            let view = LayeredView::new(&tx_delta, block_delta, self.state.as_ref());
            let ctx = ActionContext {
                signer: exec.signer,
                miner: block.miner,
                block_index: block.index,
                tx_id: exec.tx_id,
                timestamp: exec.timestamp,
                state: &view,
            };
            let result = action.execute(&ctx).await;
            if let Some(error) = view.take_failure() {
                return Err(EvaluationError::ShardUnavailable(error));
            }

            match result {
                Ok(delta) => tx_delta.merge(delta),
                Err(error) => {
                    return Ok(self.fault(tx_id, exec.signer, index, &envelope.type_tag, error));
                }
            }
        }

        debug!(tx = %tx_id, signer = %exec.signer, writes = tx_delta.len(), "transaction committed");
        Ok(TxOutcome {
            tx_id,
            signer: exec.signer,
            state: TxState::Committed,
            delta: tx_delta,
            fault: None,
        })
    }

    async fn prefetch(&self, action: &dyn Action, signer: &Address) -> Result<(), EvaluationError> {
        let addresses = action.declared_addresses(signer);
        if addresses.is_empty() {
            return Ok(());
        }
        try_join_all(addresses.iter().map(|a| self.state.get_state(a)))
            .await
            .map(|_| ())
            .map_err(EvaluationError::ShardUnavailable)
    }

    fn fault(
        &self,
        tx_id: TxId,
        signer: Address,
        index: usize,
        type_tag: &str,
        error: ActionError,
    ) -> TxOutcome {
        let fault = ActionExecutionFault {
            index,
            type_tag: type_tag.to_string(),
            error,
        };
        warn!(tx = %tx_id, %signer, %fault, "transaction faulted");
        TxOutcome {
            tx_id,
            signer,
            state: TxState::Faulted,
            delta: StateDelta::new(),
            fault: Some(fault),
        }
    }
}
