//! # TransferAsset
//!
//! Moves a fungible amount from the signer to a recipient.
//!
//! Plain value:
//!
//! | Key         | Value                   |
//! |-------------|-------------------------|
//! | `sender`    | 20-byte address         |
//! | `recipient` | 20-byte address         |
//! | `amount`    | `[ticker, quantity]`    |
//! | `memo`      | text, optional          |
//!
//! The sender must be the transaction's signer. Transfers to oneself are
//! rejected rather than treated as no-ops.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use strata_protocol::action::{Action, ActionContext, ActionError};
use strata_protocol::address::Address;
use strata_protocol::evaluator::StateDelta;
use strata_protocol::value::{Value, ValueMap};

use crate::addresses;
use crate::asset::{balance_of, AssetError, FungibleAmount};

pub const TYPE_TAG: &str = "transfer_asset";

/// Longest memo accepted.
pub const MAX_MEMO_LENGTH: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    #[error("sender {sender} is not the signer {signer}")]
    SenderNotSigner { sender: Address, signer: Address },

    #[error("sender and recipient are both {0}")]
    SelfTransfer(Address),
}

impl From<TransferError> for ActionError {
    fn from(e: TransferError) -> Self {
        ActionError::execution(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferAsset {
    pub sender: Address,
    pub recipient: Address,
    pub amount: FungibleAmount,
    pub memo: Option<String>,
}

impl TransferAsset {
    pub fn new(sender: Address, recipient: Address, amount: FungibleAmount) -> Self {
        Self {
            sender,
            recipient,
            amount,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    pub fn from_plain_value(value: &Value) -> Result<Self, ActionError> {
        let map = value
            .as_map()
            .ok_or_else(|| ActionError::invalid(TYPE_TAG, "expected a map"))?;
        let address = |key: &str| {
            map.get_text_key(key)
                .ok_or_else(|| ActionError::invalid(TYPE_TAG, format!("missing `{}`", key)))
                .and_then(|v| {
                    Address::from_value(v)
                        .map_err(|e| ActionError::invalid(TYPE_TAG, format!("`{}`: {}", key, e)))
                })
        };
        let sender = address("sender")?;
        let recipient = address("recipient")?;
        let amount = map
            .get_text_key("amount")
            .ok_or_else(|| ActionError::invalid(TYPE_TAG, "missing `amount`"))
            .and_then(|v| FungibleAmount::from_value(TYPE_TAG, v))?;
        let memo = match map.get_text_key("memo") {
            None => None,
            Some(v) => {
                let memo = v
                    .as_text()
                    .ok_or_else(|| ActionError::invalid(TYPE_TAG, "`memo` must be text"))?;
                if memo.chars().count() > MAX_MEMO_LENGTH {
                    return Err(ActionError::invalid(TYPE_TAG, "`memo` is too long"));
                }
                Some(memo.to_string())
            }
        };
        Ok(Self {
            sender,
            recipient,
            amount,
            memo,
        })
    }

    pub fn load(value: &Value) -> Result<Box<dyn Action>, ActionError> {
        Ok(Box::new(Self::from_plain_value(value)?))
    }
}

#[async_trait]
impl Action for TransferAsset {
    fn type_tag(&self) -> &str {
        TYPE_TAG
    }

    fn plain_value(&self) -> Value {
        let mut map = ValueMap::new();
        map.insert("sender", self.sender);
        map.insert("recipient", self.recipient);
        map.insert("amount", self.amount.to_value());
        if let Some(memo) = &self.memo {
            map.insert("memo", memo.as_str());
        }
        Value::Map(map)
    }

    fn declared_addresses(&self, _signer: &Address) -> Vec<Address> {
        vec![
            addresses::balance(&self.sender, &self.amount.ticker),
            addresses::balance(&self.recipient, &self.amount.ticker),
        ]
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        if self.sender != ctx.signer {
            return Err(TransferError::SenderNotSigner {
                sender: self.sender,
                signer: ctx.signer,
            }
            .into());
        }
        if self.sender == self.recipient {
            return Err(TransferError::SelfTransfer(self.sender).into());
        }

        let ticker = &self.amount.ticker;
        let from = balance_of(ctx, &self.sender, ticker).await?;
        if from < self.amount.quantity {
            return Err(AssetError::InsufficientBalance {
                owner: self.sender,
                ticker: ticker.clone(),
                balance: from,
                amount: self.amount.quantity.clone(),
            }
            .into());
        }
        let to = balance_of(ctx, &self.recipient, ticker).await?;

        debug!(
            sender = %self.sender,
            recipient = %self.recipient,
            amount = %self.amount,
            "transfer"
        );
        let mut delta = StateDelta::new();
        delta.set(
            addresses::balance(&self.sender, ticker),
            from - &self.amount.quantity,
        );
        delta.set(
            addresses::balance(&self.recipient, ticker),
            to + &self.amount.quantity,
        );
        Ok(delta)
    }
}
