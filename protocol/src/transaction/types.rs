//! Transaction and transaction id types, and the canonical serialization.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::verification::TransactionError;
use crate::action::ActionEnvelope;
use crate::address::Address;
use crate::config::{HASH_LENGTH, TIMESTAMP_FORMAT};
use crate::crypto::{sha256, PublicKey, Signature};
use crate::value::{self, Value, ValueMap};

// ---------------------------------------------------------------------------
// TxId
// ---------------------------------------------------------------------------

/// SHA-256 of a transaction's signed serialization.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxId(pub [u8; HASH_LENGTH]);

impl TxId {
    pub fn as_bytes(&self) -> &[u8; HASH_LENGTH] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim()).ok()?;
        Some(Self(bytes.as_slice().try_into().ok()?))
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({}..)", &self.to_hex()[..12])
    }
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

const KEY_ACTIONS: &[u8] = b"a";
const KEY_GENESIS: &[u8] = b"g";
const KEY_NONCE: &[u8] = b"n";
const KEY_PUBLIC_KEY: &[u8] = b"p";
const KEY_SIGNER: &[u8] = b"s";
const KEY_TIMESTAMP: &[u8] = b"t";
const KEY_SIGNATURE: &[u8] = b"S";

/// A signed (or, for offline signing, not yet signed) bundle of actions.
///
/// Immutable once constructed: the only mutation is
/// [`Transaction::sign`](super::signing), which consumes an unsigned
/// transaction and returns a signed one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub(super) nonce: u64,
    pub(super) public_key: PublicKey,
    pub(super) signer: Address,
    pub(super) genesis_hash: Option<[u8; HASH_LENGTH]>,
    pub(super) timestamp: DateTime<Utc>,
    pub(super) actions: Vec<ActionEnvelope>,
    pub(super) signature: Option<Signature>,
    pub(super) id: TxId,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn signer(&self) -> Address {
        self.signer
    }

    pub fn genesis_hash(&self) -> Option<&[u8; HASH_LENGTH]> {
        self.genesis_hash.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn actions(&self) -> &[ActionEnvelope] {
        &self.actions
    }

    pub fn signature(&self) -> Option<&Signature> {
        self.signature.as_ref()
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    /// Size of the signed serialization in bytes.
    pub fn byte_size(&self) -> usize {
        self.serialize(true).len()
    }

    /// Canonical map form. The signature is included only if requested and
    /// present.
    pub fn to_value(&self, include_signature: bool) -> Value {
        let mut map = ValueMap::with_capacity(7);
        map.insert(
            KEY_ACTIONS,
            Value::list(self.actions.iter().map(ActionEnvelope::to_value)),
        );
        if let Some(genesis) = &self.genesis_hash {
            map.insert(KEY_GENESIS, &genesis[..]);
        }
        map.insert(KEY_NONCE, self.nonce);
        map.insert(KEY_PUBLIC_KEY, &self.public_key.as_bytes()[..]);
        map.insert(KEY_SIGNER, &self.signer.as_bytes()[..]);
        map.insert(KEY_TIMESTAMP, format_timestamp(&self.timestamp));
        if include_signature {
            if let Some(signature) = &self.signature {
                map.insert(KEY_SIGNATURE, signature.as_bytes());
            }
        }
        Value::Map(map)
    }

    /// The bytes the signature covers.
    pub fn signing_bytes(&self) -> Vec<u8> {
        value::encode(&self.to_value(false))
    }

    pub fn serialize(&self, include_signature: bool) -> Vec<u8> {
        value::encode(&self.to_value(include_signature))
    }

    /// Parse a serialized transaction. With `validate`, a present signature
    /// must verify; without it only the structure is checked (inspection
    /// tooling).
    pub fn deserialize(bytes: &[u8], validate: bool) -> Result<Self, TransactionError> {
        let decoded =
            value::decode(bytes).map_err(|e| TransactionError::EncodingError(e.to_string()))?;
        let tx = Self::from_value(&decoded)?;
        if validate && tx.is_signed() {
            tx.verify()?;
        }
        Ok(tx)
    }

    pub fn from_value(value: &Value) -> Result<Self, TransactionError> {
        let map = value
            .as_map()
            .ok_or_else(|| malformed(format!("expected a map, found {}", value.kind())))?;
        if let Some((key, _)) = map.iter().find(|(k, _)| {
            !matches!(k.as_bytes(), Some(k) if [KEY_ACTIONS, KEY_GENESIS, KEY_NONCE, KEY_PUBLIC_KEY, KEY_SIGNER, KEY_TIMESTAMP, KEY_SIGNATURE].contains(&k))
        }) {
            return Err(malformed(format!("unexpected field {}", key)));
        }

        let field = |key: &[u8]| {
            map.get_bytes_key(key)
                .ok_or_else(|| malformed(format!("missing field `{}`", String::from_utf8_lossy(key))))
        };

        let actions = field(KEY_ACTIONS)?
            .as_list()
            .ok_or_else(|| malformed("actions must be a list"))?
            .iter()
            .map(|v| ActionEnvelope::from_value(v).map_err(|e| malformed(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let genesis_hash = match map.get_bytes_key(KEY_GENESIS) {
            None => None,
            Some(v) => Some(
                v.as_bytes()
                    .and_then(|b| <[u8; HASH_LENGTH]>::try_from(b).ok())
                    .ok_or_else(|| malformed("genesis hash must be 32 bytes"))?,
            ),
        };

        let nonce = field(KEY_NONCE)?
            .as_u64()
            .ok_or_else(|| malformed("nonce must be an unsigned 64-bit integer"))?;

        let public_key = field(KEY_PUBLIC_KEY)?
            .as_bytes()
            .ok_or_else(|| malformed("public key must be bytes"))
            .and_then(|b| PublicKey::try_from_slice(b).map_err(|e| malformed(e.to_string())))?;

        let signer = Address::from_value(field(KEY_SIGNER)?).map_err(|e| malformed(e.to_string()))?;
        if signer != public_key.address() {
            return Err(TransactionError::SignerMismatch {
                declared: signer,
                derived: public_key.address(),
            });
        }

        let timestamp = field(KEY_TIMESTAMP)?
            .as_text()
            .ok_or_else(|| malformed("timestamp must be text"))
            .and_then(parse_timestamp)?;

        let signature = match map.get_bytes_key(KEY_SIGNATURE) {
            None => None,
            Some(v) => Some(
                v.as_bytes()
                    .ok_or_else(|| malformed("signature must be bytes"))
                    .and_then(|b| Signature::try_from_slice(b).map_err(|e| malformed(e.to_string())))?,
            ),
        };

        let mut tx = Self {
            nonce,
            public_key,
            signer,
            genesis_hash,
            timestamp,
            actions,
            signature,
            id: TxId([0; HASH_LENGTH]),
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    pub(super) fn compute_id(&self) -> TxId {
        TxId(sha256(&self.serialize(true)))
    }
}

fn malformed(reason: impl Into<String>) -> TransactionError {
    TransactionError::EncodingError(reason.into())
}

/// Truncate to the microsecond precision the wire format carries.
pub(crate) fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, TransactionError> {
    let naive = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .map_err(|e| malformed(format!("bad timestamp `{}`: {}", s, e)))?;
    let ts = naive.and_utc();
    // Reject encodings we would not have produced.
    if format_timestamp(&ts) != s {
        return Err(malformed(format!("non-canonical timestamp `{}`", s)));
    }
    Ok(ts)
}
