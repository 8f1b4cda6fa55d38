//! What an executing action can see.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ActionError;
use crate::address::Address;
use crate::router::RouterError;
use crate::transaction::TxId;
use crate::value::Value;

/// Read access to committed (or layered) state.
#[async_trait]
pub trait StateReader: Send + Sync {
    async fn get_state(&self, address: &Address) -> Result<Option<Value>, RouterError>;
}

/// Execution context handed to [`Action::execute`](super::Action::execute).
pub struct ActionContext<'a> {
    pub signer: Address,
    pub miner: Address,
    pub block_index: u64,
    /// `None` for block-wide actions.
    pub tx_id: Option<TxId>,
    pub timestamp: DateTime<Utc>,
    pub state: &'a dyn StateReader,
}

impl ActionContext<'_> {
    /// Current value at `address` as seen by this action, including writes
    /// made earlier in the same transaction and block.
    pub async fn get(&self, address: &Address) -> Result<Option<Value>, ActionError> {
        Ok(self.state.get_state(address).await?)
    }

    pub fn is_block_action(&self) -> bool {
        self.tx_id.is_none()
    }
}
