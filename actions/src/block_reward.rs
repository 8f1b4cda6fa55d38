//! # BlockReward
//!
//! System action run once per block, after every transaction. Credits the
//! block's miner. Transactions may not carry it; the policy rejects them at
//! admission and the action refuses to run outside a block-wide context.

use async_trait::async_trait;
use tracing::debug;

use strata_protocol::action::{Action, ActionContext, ActionError};
use strata_protocol::address::Address;
use strata_protocol::evaluator::StateDelta;
use strata_protocol::value::Value;

use crate::addresses;
use crate::asset::{balance_of, FungibleAmount};

pub const TYPE_TAG: &str = "block_reward";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReward {
    pub amount: FungibleAmount,
}

impl BlockReward {
    pub fn new(amount: FungibleAmount) -> Self {
        Self { amount }
    }

    /// Reward of `quantity` in the native currency.
    pub fn native(quantity: u64) -> Self {
        Self::new(FungibleAmount::native(quantity))
    }

    pub fn load(value: &Value) -> Result<Box<dyn Action>, ActionError> {
        Ok(Box::new(Self::new(FungibleAmount::from_value(TYPE_TAG, value)?)))
    }
}

#[async_trait]
impl Action for BlockReward {
    fn type_tag(&self) -> &str {
        TYPE_TAG
    }

    fn plain_value(&self) -> Value {
        self.amount.to_value()
    }

    /// `signer` is the miner for block-wide actions.
    fn declared_addresses(&self, signer: &Address) -> Vec<Address> {
        vec![addresses::balance(signer, &self.amount.ticker)]
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        if !ctx.is_block_action() {
            return Err(ActionError::execution(
                "block reward may only run as a block action",
            ));
        }
        let ticker = &self.amount.ticker;
        let balance = balance_of(ctx, &ctx.miner, ticker).await?;
        debug!(miner = %ctx.miner, block = ctx.block_index, amount = %self.amount, "block reward");

        let mut delta = StateDelta::new();
        delta.set(
            addresses::balance(&ctx.miner, ticker),
            balance + &self.amount.quantity,
        );
        Ok(delta)
    }
}
