//! # Block Policy
//!
//! The rules every node must apply identically: which transactions may
//! enter a block, how hard the next block is, how big a block may be, and
//! whether a block-wide system action runs after its transactions.
//!
//! Expected violations come back as values ([`AdmissionError`],
//! [`ValidationError`]). Nothing here panics on bad input.

pub mod fixed;

use thiserror::Error;

use crate::action::ActionEnvelope;
use crate::address::Address;
use crate::chain::{Block, BlockHash};
use crate::transaction::{Transaction, TransactionError, TxId};

pub use fixed::FixedDifficultyPolicy;

/// What the policy needs to know about the chain it is applied to.
pub trait ChainView: Send + Sync {
    fn tip(&self) -> Option<&Block>;

    fn genesis_hash(&self) -> Option<BlockHash>;

    /// Nonce of `signer`'s most recent committed transaction.
    fn last_nonce(&self, signer: &Address) -> Option<u64>;

    /// Nonce `signer`'s next transaction must carry.
    fn next_nonce(&self, signer: &Address) -> u64 {
        self.last_nonce(signer).map_or(0, |n| n + 1)
    }
}

/// Why a transaction may not enter a block.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("signature invalid: {0}")]
    SignatureInvalid(#[source] TransactionError),

    #[error("unsigned transactions are not accepted")]
    Unsigned,

    #[error("nonce mismatch for {signer}: expected {expected}, got {actual}")]
    NonceMismatch {
        signer: Address,
        expected: u64,
        actual: u64,
    },

    #[error("transaction carries no actions")]
    EmptyActions,

    #[error("transaction targets genesis {actual}, this chain is {expected}")]
    GenesisMismatch { expected: String, actual: String },

    #[error("action `{0}` may not appear in a transaction")]
    ActionNotPermitted(String),
}

/// Why a candidate block may not extend the chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("expected index {expected}, got {actual}")]
    InvalidIndex { expected: u64, actual: u64 },

    #[error("previous hash does not match the tip")]
    InvalidPreviousHash {
        expected: Option<BlockHash>,
        actual: Option<BlockHash>,
    },

    #[error("expected difficulty {expected}, got {actual}")]
    InvalidDifficulty { expected: u64, actual: u64 },

    #[error("block hash {stored} does not match contents ({computed})")]
    HashMismatch { stored: BlockHash, computed: BlockHash },

    #[error("block timestamp is earlier than its parent's")]
    TimestampRegression,

    #[error("{count} transactions exceed the limit of {max}")]
    TooManyTransactions { count: usize, max: usize },

    #[error("block is {size} bytes, limit is {max}")]
    TooLarge { size: usize, max: usize },

    #[error("transaction {tx} rejected: {reason}")]
    InvalidTransaction {
        tx: TxId,
        #[source]
        reason: AdmissionError,
    },
}

pub trait BlockPolicy: Send + Sync {
    /// Detailed admission check. `expected_nonce` overrides the nonce
    /// derived from the chain, for transactions queued behind others from
    /// the same signer.
    fn check_transaction(
        &self,
        tx: &Transaction,
        chain: &dyn ChainView,
        expected_nonce: Option<u64>,
    ) -> Result<(), AdmissionError>;

    fn admits(&self, tx: &Transaction, chain: &dyn ChainView) -> bool {
        self.check_transaction(tx, chain, None).is_ok()
    }

    fn next_difficulty(&self, chain: &dyn ChainView) -> u64;

    fn max_transactions_per_block(&self) -> usize;

    fn max_block_bytes(&self, index: u64) -> Option<usize>;

    /// `None` when `candidate` may extend `chain`.
    fn validate_next_block(&self, chain: &dyn ChainView, candidate: &Block) -> Option<ValidationError>;

    /// System action run after every block's transactions.
    fn block_action(&self) -> Option<&ActionEnvelope>;
}
