//! # Hashing Utilities
//!
//! The two digests the chain relies on:
//!
//! - **SHA-256** for transaction ids and address derivation. These have to
//!   match what wallets and other nodes compute, so the choice is fixed.
//! - **BLAKE3** for block hashes and the transaction Merkle root, where we
//!   only have to agree with ourselves.

use sha2::{Digest, Sha256};

/// Domain tag mixed into every block hash.
pub const BLOCK_HASH_CONTEXT: &str = "strata 2026 block header v1";

/// Compute the SHA-256 digest of `data`.
///
/// # Example
///
/// ```
/// use strata_protocol::crypto::sha256;
///
/// let digest = sha256(b"strata");
/// assert_eq!(digest.len(), 32);
/// ```
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute the BLAKE3 digest of `data`.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Hash several byte slices as if they were concatenated.
pub fn blake3_hash_multi(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(part);
    }
    *hasher.finalize().as_bytes()
}

/// BLAKE3 in `derive_key` mode, so hashes from different contexts can never
/// collide even over identical input.
pub fn domain_separated_hash(context: &str, data: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(context);
    hasher.update(data);
    *hasher.finalize().as_bytes()
}

/// Binary BLAKE3 Merkle root over `leaves`.
///
/// An odd leaf at any level is paired with itself. A single leaf is also
/// paired with itself so the root is always a hash output. The empty set
/// has the all-zero root.
pub fn merkle_root(leaves: &[[u8; 32]]) -> [u8; 32] {
    if leaves.is_empty() {
        return [0u8; 32];
    }
    if leaves.len() == 1 {
        return blake3_hash_multi(&[&leaves[0][..], &leaves[0][..]]);
    }

    let mut level: Vec<[u8; 32]> = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).unwrap_or(&pair[0]);
                blake3_hash_multi(&[&pair[0][..], &right[..]])
            })
            .collect();
    }
    level[0]
}
