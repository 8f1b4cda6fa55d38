//! # Addresses
//!
//! A 20-byte account identifier. Signer addresses are the first 20 bytes of
//! `SHA-256(public key)`; well-known system addresses are arbitrary constants.
//!
//! The leading bytes of an address double as its **range key**, which is how
//! the shard range table decides which shard owns it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::config::ADDRESS_LENGTH;
use crate::crypto::{sha256, PublicKey};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be {ADDRESS_LENGTH} bytes, got {0}")]
    InvalidLength(usize),

    #[error("address is not valid hex")]
    InvalidHex,

    #[error("expected an address as bytes, got {0}")]
    NotBytes(&'static str),
}

/// A 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address([u8; ADDRESS_LENGTH]);

impl Address {
    pub const ZERO: Address = Address([0u8; ADDRESS_LENGTH]);

    pub const fn new(bytes: [u8; ADDRESS_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Derive the address of a signer.
    pub fn from_public_key(key: &PublicKey) -> Self {
        let digest = sha256(key.as_bytes());
        let mut bytes = [0u8; ADDRESS_LENGTH];
        bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
        Self(bytes)
    }

    pub fn try_from_slice(slice: &[u8]) -> Result<Self, AddressError> {
        let bytes: [u8; ADDRESS_LENGTH] = slice
            .try_into()
            .map_err(|_| AddressError::InvalidLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Accepts hex with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self, AddressError> {
        let s = s.trim();
        let s = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(s).map_err(|_| AddressError::InvalidHex)?;
        Self::try_from_slice(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Big-endian integer of the first `prefix_bytes` bytes.
    ///
    /// `prefix_bytes` is clamped to `1..=8`; the config layer rejects
    /// anything outside the supported range long before this is called.
    pub fn range_key(&self, prefix_bytes: usize) -> u64 {
        let n = prefix_bytes.clamp(1, 8);
        self.0[..n]
            .iter()
            .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
    }

    pub fn to_value(&self) -> Value {
        Value::Bytes(self.0.to_vec())
    }

    pub fn from_value(value: &Value) -> Result<Self, AddressError> {
        let bytes = value
            .as_bytes()
            .ok_or_else(|| AddressError::NotBytes(value.kind()))?;
        Self::try_from_slice(bytes)
    }
}

impl From<Address> for Value {
    fn from(address: Address) -> Self {
        address.to_value()
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address(0x{})", self.to_hex())
    }
}
