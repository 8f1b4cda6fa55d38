//! Building and signing transactions.
//!
//! Signing is separate from building so a transaction can be assembled on
//! one machine and signed on another (`strata-node tx unsigned` then
//! `strata-node tx sign`).

use chrono::{DateTime, Utc};

use super::types::{normalize_timestamp, Transaction, TxId};
use super::verification::TransactionError;
use crate::action::ActionEnvelope;
use crate::config::HASH_LENGTH;
use crate::crypto::{Keypair, PublicKey};
use crate::value::ensure_encodable;

impl Transaction {
    /// Build and sign a transaction.
    ///
    /// Fails with `EncodingError` if an action's plain value cannot be
    /// canonically encoded (too deeply nested).
    pub fn create(
        nonce: u64,
        keypair: &Keypair,
        genesis_hash: Option<[u8; HASH_LENGTH]>,
        timestamp: DateTime<Utc>,
        actions: Vec<ActionEnvelope>,
    ) -> Result<Self, TransactionError> {
        Self::create_unsigned(nonce, keypair.public_key(), genesis_hash, actions, timestamp)?
            .sign(keypair)
    }

    /// Build a transaction without signing it.
    pub fn create_unsigned(
        nonce: u64,
        public_key: PublicKey,
        genesis_hash: Option<[u8; HASH_LENGTH]>,
        actions: Vec<ActionEnvelope>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, TransactionError> {
        for action in &actions {
            ensure_encodable(&action.to_value()).map_err(|e| {
                TransactionError::EncodingError(format!("action `{}`: {}", action.type_tag, e))
            })?;
        }
        let mut tx = Self {
            nonce,
            public_key,
            signer: public_key.address(),
            genesis_hash,
            timestamp: normalize_timestamp(timestamp),
            actions,
            signature: None,
            id: TxId([0; HASH_LENGTH]),
        };
        tx.id = tx.compute_id();
        Ok(tx)
    }

    /// Sign with `keypair`, which must match the embedded public key.
    /// Re-signing a signed transaction replaces the signature (Ed25519 is
    /// deterministic, so the result is identical).
    pub fn sign(mut self, keypair: &Keypair) -> Result<Self, TransactionError> {
        if keypair.public_key() != self.public_key {
            return Err(TransactionError::KeyMismatch);
        }
        self.signature = Some(keypair.sign(&self.signing_bytes()));
        self.id = self.compute_id();
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use chrono::TimeZone;

    fn actions() -> Vec<ActionEnvelope> {
        vec![ActionEnvelope::new(
            "transfer_asset",
            Value::map([("amount", Value::from(5u64))]),
        )]
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn create_signs() {
        let kp = Keypair::from_seed(&[1; 32]);
        let tx = Transaction::create(0, &kp, None, ts(), actions()).unwrap();
        assert!(tx.is_signed());
        assert_eq!(tx.signer(), kp.address());
        assert!(tx.verify().is_ok());
    }

    #[test]
    fn unsigned_then_signed_matches_create() {
        let kp = Keypair::from_seed(&[2; 32]);
        let unsigned =
            Transaction::create_unsigned(3, kp.public_key(), Some([9; 32]), actions(), ts()).unwrap();
        assert!(!unsigned.is_signed());

        let signed = unsigned.clone().sign(&kp).unwrap();
        let direct = Transaction::create(3, &kp, Some([9; 32]), ts(), actions()).unwrap();
        assert_eq!(signed, direct);
        assert_ne!(unsigned.id(), signed.id());
    }

    #[test]
    fn signing_with_other_key_is_refused() {
        let kp = Keypair::from_seed(&[3; 32]);
        let other = Keypair::from_seed(&[4; 32]);
        let unsigned =
            Transaction::create_unsigned(0, kp.public_key(), None, actions(), ts()).unwrap();
        assert_eq!(unsigned.sign(&other).unwrap_err(), TransactionError::KeyMismatch);
    }

    #[test]
    fn too_deep_plain_value_is_an_encoding_error() {
        let mut deep = Value::Null;
        for _ in 0..80 {
            deep = Value::list([deep]);
        }
        let kp = Keypair::from_seed(&[5; 32]);
        let err = Transaction::create(0, &kp, None, ts(), vec![ActionEnvelope::new("x", deep)])
            .unwrap_err();
        assert!(matches!(err, TransactionError::EncodingError(_)));
    }

    #[test]
    fn timestamp_is_truncated_to_microseconds() {
        let kp = Keypair::from_seed(&[6; 32]);
        let precise = ts() + chrono::Duration::nanoseconds(123_456_789);
        let tx = Transaction::create(0, &kp, None, precise, vec![]).unwrap();
        assert_eq!(tx.timestamp().timestamp_subsec_nanos(), 123_456_000);
    }
}
