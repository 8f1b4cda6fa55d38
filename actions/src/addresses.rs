//! Well-known state addresses.
//!
//! Every slot the built-in actions touch is derived by hashing a label, so
//! slots for unrelated accounts scatter across the keyspace and therefore
//! across shards.

use strata_protocol::address::Address;
use strata_protocol::config::ADDRESS_LENGTH;
use strata_protocol::crypto::sha256;

const ADMIN_LABEL: &[u8] = b"strata/admin";
const TABLE_LABEL: &[u8] = b"strata/table/";
const BALANCE_LABEL: &[u8] = b"strata/balance/";

fn derive(parts: &[&[u8]]) -> Address {
    let mut preimage = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
    for part in parts {
        preimage.extend_from_slice(part);
    }
    let digest = sha256(&preimage);
    let mut bytes = [0u8; ADDRESS_LENGTH];
    bytes.copy_from_slice(&digest[..ADDRESS_LENGTH]);
    Address::new(bytes)
}

/// Holds the [`AdminState`](crate::admin::AdminState).
pub fn admin_state() -> Address {
    derive(&[ADMIN_LABEL])
}

/// Holds the CSV text of table sheet `name`.
pub fn table_sheet(name: &str) -> Address {
    derive(&[TABLE_LABEL, name.as_bytes()])
}

/// Holds `owner`'s balance of `ticker`.
pub fn balance(owner: &Address, ticker: &str) -> Address {
    derive(&[BALANCE_LABEL, owner.as_bytes(), b"/", ticker.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balance_slots_differ_by_owner_and_ticker() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        assert_ne!(balance(&a, "STR"), balance(&b, "STR"));
        assert_ne!(balance(&a, "STR"), balance(&a, "GOLD"));
        assert_eq!(balance(&a, "STR"), balance(&a, "STR"));
    }

    #[test]
    fn table_slots_are_stable() {
        assert_eq!(table_sheet("ItemSheet"), table_sheet("ItemSheet"));
        assert_ne!(table_sheet("ItemSheet"), table_sheet("SkillSheet"));
        assert_ne!(admin_state(), table_sheet(""));
    }
}
