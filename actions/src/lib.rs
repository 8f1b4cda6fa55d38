//! # Strata Built-in Actions
//!
//! The action kinds a stock Strata node understands, and the registry that
//! maps their type tags to loaders:
//!
//! - **TransferAsset**: move a fungible amount between accounts.
//! - **PatchTableSheet**: replace a named data table (operator-only).
//! - **RenewAdminState**: extend the operator's privileges.
//! - **BlockReward**: block-wide system action crediting the miner.
//!
//! ## Ground Rules
//!
//! 1. Amounts are arbitrary-precision integers. No wrapping, no floats.
//! 2. Every state slot comes from [`addresses`], never from ad-hoc bytes.
//! 3. A failed check is an `Err`, and the evaluator discards the whole
//!    transaction's writes.

pub mod addresses;
pub mod admin;
pub mod asset;
pub mod block_reward;
pub mod patch_table_sheet;
pub mod transfer_asset;

use strata_protocol::action::ActionRegistry;

pub use admin::{AdminState, PermissionError, RenewAdminState};
pub use asset::{AssetError, FungibleAmount, NATIVE_TICKER};
pub use block_reward::BlockReward;
pub use patch_table_sheet::PatchTableSheet;
pub use transfer_asset::{TransferAsset, TransferError};

/// Registry with every built-in action kind.
pub fn default_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register(transfer_asset::TYPE_TAG, TransferAsset::load)
        .register(patch_table_sheet::TYPE_TAG, PatchTableSheet::load)
        .register(admin::RENEW_TYPE_TAG, RenewAdminState::load)
        .register(block_reward::TYPE_TAG, BlockReward::load);
    registry
}
