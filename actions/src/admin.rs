//! # Admin State
//!
//! One privileged address may run operator-only actions until a block
//! height. The state lives at [`addresses::admin_state`] as a map:
//!
//! | Key           | Value           |
//! |---------------|-----------------|
//! | `admin`       | 20-byte address |
//! | `valid_until` | block index     |
//!
//! A chain without admin state has no operator restrictions.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use strata_protocol::action::{Action, ActionContext, ActionError};
use strata_protocol::address::Address;
use strata_protocol::evaluator::StateDelta;
use strata_protocol::value::Value;

use crate::addresses;

pub const RENEW_TYPE_TAG: &str = "renew_admin_state";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("{signer} is not the admin {admin}")]
    PermissionDenied { signer: Address, admin: Address },

    #[error("admin privileges expired at block {valid_until}, now at {block_index}")]
    PolicyExpired { valid_until: u64, block_index: u64 },

    #[error("no admin state on chain")]
    AdminStateMissing,

    #[error("admin state is malformed: {0}")]
    Corrupt(String),
}

impl From<PermissionError> for ActionError {
    fn from(e: PermissionError) -> Self {
        ActionError::execution(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdminState {
    pub admin: Address,
    pub valid_until: u64,
}

impl AdminState {
    pub fn new(admin: Address, valid_until: u64) -> Self {
        Self { admin, valid_until }
    }

    pub fn to_value(&self) -> Value {
        Value::map([
            ("admin", self.admin.to_value()),
            ("valid_until", Value::from(self.valid_until)),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self, PermissionError> {
        let map = value
            .as_map()
            .ok_or_else(|| PermissionError::Corrupt(format!("expected a map, got {}", value.kind())))?;
        let admin = map
            .get_text_key("admin")
            .ok_or_else(|| PermissionError::Corrupt("missing `admin`".into()))
            .and_then(|v| Address::from_value(v).map_err(|e| PermissionError::Corrupt(e.to_string())))?;
        let valid_until = map
            .get_text_key("valid_until")
            .and_then(Value::as_u64)
            .ok_or_else(|| PermissionError::Corrupt("missing `valid_until`".into()))?;
        Ok(Self { admin, valid_until })
    }

    /// Current admin state, if the chain has one.
    pub async fn load(ctx: &ActionContext<'_>) -> Result<Option<Self>, ActionError> {
        match ctx.get(&addresses::admin_state()).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(Self::from_value(&value)?)),
        }
    }
}

/// Fail unless the signer may run operator-only actions at this block.
pub async fn check_permission(ctx: &ActionContext<'_>) -> Result<(), ActionError> {
    let Some(state) = AdminState::load(ctx).await? else {
        debug!(signer = %ctx.signer, "no admin state, permission granted");
        return Ok(());
    };
    if ctx.block_index > state.valid_until {
        return Err(PermissionError::PolicyExpired {
            valid_until: state.valid_until,
            block_index: ctx.block_index,
        }
        .into());
    }
    if ctx.signer != state.admin {
        return Err(PermissionError::PermissionDenied {
            signer: ctx.signer,
            admin: state.admin,
        }
        .into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// RenewAdminState
// ---------------------------------------------------------------------------

/// Move the admin's expiry to `new_valid_until`. Only the admin may do
/// this, and it works even after expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewAdminState {
    pub new_valid_until: u64,
}

impl RenewAdminState {
    pub fn new(new_valid_until: u64) -> Self {
        Self { new_valid_until }
    }

    pub fn load(value: &Value) -> Result<Box<dyn Action>, ActionError> {
        let new_valid_until = value
            .as_map()
            .and_then(|m| m.get_text_key("new_valid_until"))
            .and_then(Value::as_u64)
            .ok_or_else(|| ActionError::invalid(RENEW_TYPE_TAG, "missing `new_valid_until`"))?;
        Ok(Box::new(Self { new_valid_until }))
    }
}

#[async_trait]
impl Action for RenewAdminState {
    fn type_tag(&self) -> &str {
        RENEW_TYPE_TAG
    }

    fn plain_value(&self) -> Value {
        Value::map([("new_valid_until", Value::from(self.new_valid_until))])
    }

    fn declared_addresses(&self, _signer: &Address) -> Vec<Address> {
        vec![addresses::admin_state()]
    }

    async fn execute(&self, ctx: &ActionContext<'_>) -> Result<StateDelta, ActionError> {
        let state = AdminState::load(ctx)
            .await?
            .ok_or(PermissionError::AdminStateMissing)?;
        if ctx.signer != state.admin {
            return Err(PermissionError::PermissionDenied {
                signer: ctx.signer,
                admin: state.admin,
            }
            .into());
        }
        info!(
            admin = %state.admin,
            from = state.valid_until,
            to = self.new_valid_until,
            "admin state renewed"
        );
        let mut delta = StateDelta::new();
        delta.set(
            addresses::admin_state(),
            AdminState::new(state.admin, self.new_valid_until).to_value(),
        );
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_state_value_round_trip() {
        let state = AdminState::new(Address::new([9; 20]), 1_000);
        assert_eq!(AdminState::from_value(&state.to_value()).unwrap(), state);
    }

    #[test]
    fn malformed_admin_state_is_reported() {
        assert!(matches!(
            AdminState::from_value(&Value::from("admin")),
            Err(PermissionError::Corrupt(_))
        ));
        let missing = Value::map([("admin", Address::new([1; 20]).to_value())]);
        assert!(AdminState::from_value(&missing).is_err());
    }

    #[test]
    fn renew_loader_requires_height() {
        assert!(RenewAdminState::load(&Value::map([("new_valid_until", Value::from(5u64))])).is_ok());
        assert!(RenewAdminState::load(&Value::Null).is_err());
    }
}
