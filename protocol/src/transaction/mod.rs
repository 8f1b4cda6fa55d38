//! # Transactions
//!
//! A transaction is a signed, ordered bundle of actions from one signer.
//!
//! ```text
//! types.rs       : Transaction, TxId and the canonical serialization
//! signing.rs     : create / create_unsigned / sign
//! verification.rs: signature checks and TransactionError
//! ```
//!
//! ## Canonical form
//!
//! A transaction serializes to a canonical [`Value`](crate::value::Value)
//! map keyed by single-byte names:
//!
//! | key | field                          |
//! |-----|--------------------------------|
//! | `a` | actions, each `[tag, value]`   |
//! | `g` | genesis hash (omitted if none) |
//! | `n` | nonce                          |
//! | `p` | signer public key              |
//! | `s` | signer address                 |
//! | `t` | timestamp, UTC, microseconds   |
//! | `S` | signature (signed form only)   |
//!
//! The signature covers the map without `S`. The transaction id is the
//! SHA-256 of the map with `S`.

pub mod signing;
pub mod types;
pub mod verification;

pub use types::{Transaction, TxId};
pub use verification::TransactionError;
