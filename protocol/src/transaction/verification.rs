//! Signature verification and the transaction error type.
//!
//! Verification needs nothing but the transaction itself, so it runs
//! before any shard is consulted.

use thiserror::Error;

use super::types::Transaction;
use crate::address::Address;

/// Reasons a transaction is rejected on its own merits. Chain-dependent
/// checks (nonce, genesis) belong to the block policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    /// The bytes are not a canonical transaction, or an action cannot be
    /// encoded.
    #[error("transaction encoding error: {0}")]
    EncodingError(String),

    #[error("transaction is unsigned")]
    MissingSignature,

    #[error("signature does not verify against signer {signer}")]
    SignatureInvalid { signer: Address },

    #[error("declared signer {declared} does not match public key address {derived}")]
    SignerMismatch { declared: Address, derived: Address },

    #[error("signing key does not match the transaction's public key")]
    KeyMismatch,
}

impl Transaction {
    /// Check the signature over the canonical unsigned form.
    pub fn verify(&self) -> Result<(), TransactionError> {
        let derived = self.public_key.address();
        if self.signer != derived {
            return Err(TransactionError::SignerMismatch {
                declared: self.signer,
                derived,
            });
        }
        let signature = self
            .signature
            .as_ref()
            .ok_or(TransactionError::MissingSignature)?;
        if !self.public_key.verify(&self.signing_bytes(), signature) {
            return Err(TransactionError::SignatureInvalid {
                signer: self.signer,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionEnvelope;
    use crate::crypto::Keypair;
    use crate::value::{self, Value};
    use chrono::{TimeZone, Utc};

    fn signed() -> (Keypair, Transaction) {
        let kp = Keypair::from_seed(&[7; 32]);
        let tx = Transaction::create(
            4,
            &kp,
            Some([1; 32]),
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            vec![ActionEnvelope::new("renew_admin_state", Value::from(100u64))],
        )
        .unwrap();
        (kp, tx)
    }

    #[test]
    fn serialize_roundtrip_preserves_id() {
        let (_, tx) = signed();
        let back = Transaction::deserialize(&tx.serialize(true), true).unwrap();
        assert_eq!(back, tx);
        assert_eq!(back.id(), tx.id());
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let (_, tx) = signed();
        let mut map = tx.to_value(true).as_map().cloned().unwrap();
        map.insert(&b"n"[..], 5u64);
        let bytes = value::encode(&Value::Map(map));

        let err = Transaction::deserialize(&bytes, true).unwrap_err();
        assert!(matches!(err, TransactionError::SignatureInvalid { .. }));
        // Inspection still parses it.
        assert_eq!(Transaction::deserialize(&bytes, false).unwrap().nonce(), 5);
    }

    #[test]
    fn unsigned_form_has_no_signature_field() {
        let (_, tx) = signed();
        let back = Transaction::deserialize(&tx.serialize(false), true).unwrap();
        assert!(!back.is_signed());
        assert_eq!(back.verify(), Err(TransactionError::MissingSignature));
    }

    #[test]
    fn mismatched_signer_is_rejected() {
        let (_, tx) = signed();
        let mut map = tx.to_value(true).as_map().cloned().unwrap();
        map.insert(&b"s"[..], &[0u8; 20][..]);
        let err = Transaction::deserialize(&value::encode(&Value::Map(map)), false).unwrap_err();
        assert!(matches!(err, TransactionError::SignerMismatch { .. }));
    }

    #[test]
    fn rejects_non_transaction_bytes() {
        assert!(matches!(
            Transaction::deserialize(b"i1e", false),
            Err(TransactionError::EncodingError(_))
        ));
        assert!(matches!(
            Transaction::deserialize(b"garbage", false),
            Err(TransactionError::EncodingError(_))
        ));
    }
}
