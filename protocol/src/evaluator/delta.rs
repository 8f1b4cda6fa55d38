//! Per-address state changes produced by executing actions.

use std::collections::BTreeMap;

use crate::address::Address;
use crate::value::Value;

/// Ordered map of address to new value. `Value::Null` marks a deletion.
///
/// Ordered by address so two nodes that applied the same actions produce
/// the same delta byte for byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta(BTreeMap<Address, Value>);

impl StateDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `address` to `value`, replacing an earlier write.
    pub fn set(&mut self, address: Address, value: impl Into<Value>) {
        self.0.insert(address, value.into());
    }

    /// Mark `address` for deletion.
    pub fn delete(&mut self, address: Address) {
        self.0.insert(address, Value::Null);
    }

    pub fn get(&self, address: &Address) -> Option<&Value> {
        self.0.get(address)
    }

    /// Apply `later` on top of `self`; its writes win.
    pub fn merge(&mut self, later: StateDelta) {
        self.0.extend(later.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Value)> {
        self.0.iter()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.0.keys()
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl IntoIterator for StateDelta {
    type Item = (Address, Value);
    type IntoIter = std::collections::btree_map::IntoIter<Address, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(Address, Value)> for StateDelta {
    fn from_iter<I: IntoIterator<Item = (Address, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_writes_win_on_merge() {
        let a = Address::new([1; 20]);
        let b = Address::new([2; 20]);
        let mut first = StateDelta::new();
        first.set(a, 1u64);
        first.set(b, 1u64);

        let mut second = StateDelta::new();
        second.set(a, 2u64);
        second.delete(b);

        first.merge(second);
        assert_eq!(first.get(&a), Some(&Value::from(2u64)));
        assert_eq!(first.get(&b), Some(&Value::Null));
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn iterates_in_address_order() {
        let delta: StateDelta = [
            (Address::new([9; 20]), Value::from(9u64)),
            (Address::new([3; 20]), Value::from(3u64)),
        ]
        .into_iter()
        .collect();
        let order: Vec<_> = delta.addresses().map(|a| a.as_bytes()[0]).collect();
        assert_eq!(order, vec![3, 9]);
    }
}
