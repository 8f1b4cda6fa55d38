//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations: Ed25519 through
//! `ed25519-dalek`, SHA-256 through `sha2` and BLAKE3 through `blake3`.
//! Nothing in here is novel, and nothing in here should be.

pub mod hash;
pub mod keys;

pub use hash::{blake3_hash, domain_separated_hash, merkle_root, sha256};
pub use keys::{KeyError, Keypair, PublicKey, Signature};
