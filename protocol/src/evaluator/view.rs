//! Transaction delta, then block delta, then committed state.

use async_trait::async_trait;
use parking_lot::Mutex;

use super::StateDelta;
use crate::action::StateReader;
use crate::address::Address;
use crate::router::RouterError;
use crate::value::Value;

pub(super) struct LayeredView<'a> {
    tx: &'a StateDelta,
    block: &'a StateDelta,
    base: &'a dyn StateReader,
    /// First read failure. Recorded here as well as returned so an action
    /// that swallows the error still cannot turn it into a fault.
    failure: Mutex<Option<RouterError>>,
}

impl<'a> LayeredView<'a> {
    pub(super) fn new(tx: &'a StateDelta, block: &'a StateDelta, base: &'a dyn StateReader) -> Self {
        Self {
            tx,
            block,
            base,
            failure: Mutex::new(None),
        }
    }

    pub(super) fn take_failure(&self) -> Option<RouterError> {
        self.failure.lock().take()
    }
}

#[async_trait]
impl<'a> StateReader for LayeredView<'a> {
    async fn get_state(&self, address: &Address) -> Result<Option<Value>, RouterError> {
        if let Some(value) = self.tx.get(address).or_else(|| self.block.get(address)) {
            return Ok((!value.is_null()).then(|| value.clone()));
        }
        match self.base.get_state(address).await {
            Ok(value) => Ok(value),
            Err(error) => {
                self.failure.lock().get_or_insert_with(|| error.clone());
                Err(error)
            }
        }
    }
}
