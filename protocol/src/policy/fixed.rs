//! The stock policy: constant difficulty and configured limits.

use std::collections::HashMap;
use tracing::debug;

use super::{AdmissionError, BlockPolicy, ChainView, ValidationError};
use crate::action::ActionEnvelope;
use crate::chain::Block;
use crate::config::PolicyConfig;
use crate::transaction::Transaction;

#[derive(Debug, Clone)]
pub struct FixedDifficultyPolicy {
    config: PolicyConfig,
    block_action: Option<ActionEnvelope>,
}

impl FixedDifficultyPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self {
            config,
            block_action: None,
        }
    }

    pub fn with_block_action(mut self, action: ActionEnvelope) -> Self {
        self.block_action = Some(action);
        self
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }
}

impl BlockPolicy for FixedDifficultyPolicy {
    fn check_transaction(
        &self,
        tx: &Transaction,
        chain: &dyn ChainView,
        expected_nonce: Option<u64>,
    ) -> Result<(), AdmissionError> {
        if tx.is_signed() {
            tx.verify().map_err(AdmissionError::SignatureInvalid)?;
        } else if !self.config.allow_unsigned {
            return Err(AdmissionError::Unsigned);
        }

        if let (Some(expected), Some(actual)) = (chain.genesis_hash(), tx.genesis_hash()) {
            if expected.0 != *actual {
                return Err(AdmissionError::GenesisMismatch {
                    expected: expected.to_hex(),
                    actual: hex::encode(actual),
                });
            }
        }

        if tx.actions().is_empty() && !self.config.allow_empty_actions {
            return Err(AdmissionError::EmptyActions);
        }

        if let Some(system) = &self.block_action {
            if let Some(action) = tx.actions().iter().find(|a| a.type_tag == system.type_tag) {
                return Err(AdmissionError::ActionNotPermitted(action.type_tag.clone()));
            }
        }

        let expected = expected_nonce.unwrap_or_else(|| chain.next_nonce(&tx.signer()));
        if tx.nonce() != expected {
            return Err(AdmissionError::NonceMismatch {
                signer: tx.signer(),
                expected,
                actual: tx.nonce(),
            });
        }
        Ok(())
    }

    fn next_difficulty(&self, chain: &dyn ChainView) -> u64 {
        match chain.tip() {
            None => 0,
            Some(_) => self.config.difficulty,
        }
    }

    fn max_transactions_per_block(&self) -> usize {
        self.config.max_transactions_per_block
    }

    fn max_block_bytes(&self, _index: u64) -> Option<usize> {
        self.config.max_block_bytes
    }

    fn validate_next_block(&self, chain: &dyn ChainView, candidate: &Block) -> Option<ValidationError> {
        let tip = chain.tip();

        let expected_index = tip.map_or(0, |t| t.index + 1);
        if candidate.index != expected_index {
            return Some(ValidationError::InvalidIndex {
                expected: expected_index,
                actual: candidate.index,
            });
        }

        let expected_parent = tip.map(|t| t.hash);
        if candidate.previous_hash != expected_parent {
            return Some(ValidationError::InvalidPreviousHash {
                expected: expected_parent,
                actual: candidate.previous_hash,
            });
        }

        let expected_difficulty = self.next_difficulty(chain);
        if candidate.difficulty != expected_difficulty {
            return Some(ValidationError::InvalidDifficulty {
                expected: expected_difficulty,
                actual: candidate.difficulty,
            });
        }

        let computed = candidate.compute_hash();
        if computed != candidate.hash {
            return Some(ValidationError::HashMismatch {
                stored: candidate.hash,
                computed,
            });
        }

        if let Some(tip) = tip {
            if candidate.timestamp < tip.timestamp {
                return Some(ValidationError::TimestampRegression);
            }
        }

        let max = self.max_transactions_per_block();
        if candidate.transactions.len() > max {
            return Some(ValidationError::TooManyTransactions {
                count: candidate.transactions.len(),
                max,
            });
        }

        if let Some(max) = self.max_block_bytes(candidate.index) {
            let size = candidate.byte_size();
            if size > max {
                return Some(ValidationError::TooLarge { size, max });
            }
        }

        let mut next_nonces = HashMap::new();
        for tx in &candidate.transactions {
            let expected = *next_nonces
                .entry(tx.signer())
                .or_insert_with(|| chain.next_nonce(&tx.signer()));
            if let Err(reason) = self.check_transaction(tx, chain, Some(expected)) {
                debug!(block = candidate.index, tx = %tx.id(), %reason, "block carries inadmissible transaction");
                return Some(ValidationError::InvalidTransaction { tx: tx.id(), reason });
            }
            next_nonces.insert(tx.signer(), expected + 1);
        }

        None
    }

    fn block_action(&self) -> Option<&ActionEnvelope> {
        self.block_action.as_ref()
    }
}
