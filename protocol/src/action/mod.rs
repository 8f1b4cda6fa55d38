//! # Actions
//!
//! An action is a unit of state-transition logic that travels inside a
//! transaction as an opaque `(type tag, plain value)` pair. The protocol
//! crate knows how to encode, decode and dispatch actions; the logic of each
//! kind lives with whoever registers it in an [`ActionRegistry`].

pub mod codec;
pub mod context;
pub mod registry;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::address::Address;
use crate::evaluator::StateDelta;
use crate::router::RouterError;
use crate::value::Value;

pub use codec::{decode, encode, ActionEnvelope};
pub use context::{ActionContext, StateReader};
pub use registry::{ActionLoader, ActionRegistry};

/// Failures while decoding, loading or executing an action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("malformed action encoding: {0}")]
    MalformedEncoding(String),

    #[error("unknown action type `{0}`")]
    UnknownActionType(String),

    #[error("invalid plain value for `{tag}`: {reason}")]
    InvalidPlainValue { tag: String, reason: String },

    #[error("{0}")]
    Execution(String),

    #[error("state read failed: {0}")]
    State(#[from] RouterError),
}

impl ActionError {
    pub fn invalid(tag: &str, reason: impl Into<String>) -> Self {
        ActionError::InvalidPlainValue {
            tag: tag.to_string(),
            reason: reason.into(),
        }
    }

    pub fn execution(reason: impl fmt::Display) -> Self {
        ActionError::Execution(reason.to_string())
    }
}

/// Executable state-transition logic.
///
/// `execute` must be deterministic: its result may depend only on the
/// action itself and on what it reads through the context.
#[async_trait]
pub trait Action: fmt::Debug + Send + Sync {
    /// Stable identifier written into every encoded instance.
    fn type_tag(&self) -> &str;

    /// Payload that, handed back to this kind's loader, rebuilds the action.
    fn plain_value(&self) -> Value;

    /// Addresses `execute` will read when run by `signer`. Prefetched
    /// concurrently before execution; reading others is allowed, just slower.
    fn declared_addresses(&self, signer: &Address) -> Vec<Address>;

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError>;

    /// Wire form of this action.
    fn envelope(&self) -> ActionEnvelope {
        ActionEnvelope::new(self.type_tag(), self.plain_value())
    }
}
