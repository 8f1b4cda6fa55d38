//! Fungible amounts and balance slots.

use num_bigint::{BigInt, Sign};
use std::fmt;
use thiserror::Error;

use strata_protocol::action::{ActionContext, ActionError};
use strata_protocol::address::Address;
use strata_protocol::value::Value;

use crate::addresses;

/// Ticker of the chain's native currency, paid out by the block reward.
pub const NATIVE_TICKER: &str = "STR";

/// Longest ticker accepted in an amount.
pub const MAX_TICKER_LENGTH: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssetError {
    #[error("insufficient balance: {owner} holds {balance} {ticker}, needs {amount}")]
    InsufficientBalance {
        owner: Address,
        ticker: String,
        balance: BigInt,
        amount: BigInt,
    },

    #[error("balance slot {0} holds a non-integer value")]
    CorruptBalance(Address),
}

impl From<AssetError> for ActionError {
    fn from(e: AssetError) -> Self {
        ActionError::execution(e)
    }
}

/// A positive quantity of one currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FungibleAmount {
    pub ticker: String,
    pub quantity: BigInt,
}

impl FungibleAmount {
    pub fn new(ticker: impl Into<String>, quantity: impl Into<BigInt>) -> Self {
        Self {
            ticker: ticker.into(),
            quantity: quantity.into(),
        }
    }

    pub fn native(quantity: impl Into<BigInt>) -> Self {
        Self::new(NATIVE_TICKER, quantity)
    }

    /// `[ticker, quantity]`.
    pub fn to_value(&self) -> Value {
        Value::list([
            Value::from(self.ticker.as_str()),
            Value::from(self.quantity.clone()),
        ])
    }

    /// Parse and check an amount carried by action `tag`.
    pub fn from_value(tag: &str, value: &Value) -> Result<Self, ActionError> {
        let [ticker, quantity] = value
            .as_list()
            .ok_or_else(|| ActionError::invalid(tag, "amount must be a list"))?
        else {
            return Err(ActionError::invalid(tag, "amount must be [ticker, quantity]"));
        };
        let ticker = ticker
            .as_text()
            .ok_or_else(|| ActionError::invalid(tag, "ticker must be text"))?;
        if ticker.is_empty() || ticker.len() > MAX_TICKER_LENGTH {
            return Err(ActionError::invalid(tag, format!("bad ticker `{}`", ticker)));
        }
        let quantity = quantity
            .as_integer()
            .ok_or_else(|| ActionError::invalid(tag, "quantity must be an integer"))?;
        if quantity.sign() != Sign::Plus {
            return Err(ActionError::invalid(tag, "quantity must be positive"));
        }
        Ok(Self::new(ticker, quantity.clone()))
    }
}

impl fmt::Display for FungibleAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.quantity, self.ticker)
    }
}

/// `owner`'s balance of `ticker`. An empty slot is zero.
pub async fn balance_of(
    ctx: &ActionContext<'_>,
    owner: &Address,
    ticker: &str,
) -> Result<BigInt, ActionError> {
    let slot = addresses::balance(owner, ticker);
    match ctx.get(&slot).await? {
        None => Ok(BigInt::from(0)),
        Some(value) => value
            .as_integer()
            .cloned()
            .ok_or_else(|| AssetError::CorruptBalance(slot).into()),
    }
}
