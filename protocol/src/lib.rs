// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Strata Protocol Core Library
//!
//! Strata evaluates actions carried in signed transactions against account
//! state that is split by address range across several shards, some of
//! them on other machines.
//!
//! ## Architecture
//!
//! - **value**: The canonical value model and its binary encoding.
//! - **crypto**: Ed25519, SHA-256 and BLAKE3 behind small typed wrappers.
//! - **address**: 20-byte account addresses and their range keys.
//! - **action**: The action trait, wire form and type registry.
//! - **transaction**: Signed bundles of actions.
//! - **shard**: The shard contract, local/remote stores, wire protocol and
//!   range table.
//! - **router**: Address → shard routing, caching, retries and the
//!   cross-shard block commit.
//! - **evaluator**: Runs actions and produces state deltas.
//! - **policy**: Admission, difficulty and block validation rules.
//! - **chain**: Blocks and the chain they form.
//! - **producer**: From submitted transactions to committed blocks.
//! - **config**: Protocol constants and the node configuration file.
//!
//! ## Ground Rules
//!
//! 1. Anything a signature or hash covers goes through the canonical
//!    encoding. No serde in those paths.
//! 2. Evaluation is deterministic. Same transactions, same prior state,
//!    same delta, on every machine.
//! 3. A block's writes land on every shard or on none.

pub mod action;
pub mod address;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod evaluator;
pub mod policy;
pub mod producer;
pub mod router;
pub mod shard;
pub mod transaction;
pub mod value;
