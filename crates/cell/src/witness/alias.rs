use std::collections::BTreeMap;

use crate::types::EntityId;

pub const MAX_ALIASES: usize = 255;

/// One-byte entity aliases for a single observer. A released alias stays quarantined until the
/// observer acknowledges the leave that carried it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTable {
    in_use: BTreeMap<u8, EntityId>,
    quarantine: Vec<(EntityId, u8)>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, id: EntityId) -> Option<u8> {
        let alias = (0..MAX_ALIASES as u8).find(|candidate| {
            !self.in_use.contains_key(candidate)
                && !self.quarantine.iter().any(|(_, held)| held == candidate)
        })?;
        self.in_use.insert(alias, id);
        Some(alias)
    }

    /// Reserves an alias carried over from elsewhere. Fails when it is already taken.
    pub fn claim(&mut self, id: EntityId, alias: u8) -> bool {
        if self.in_use.contains_key(&alias) || self.quarantine.iter().any(|(_, held)| *held == alias) {
            return false;
        }
        self.in_use.insert(alias, id);
        true
    }

    pub fn release(&mut self, id: EntityId, alias: u8) {
        if self.in_use.get(&alias) == Some(&id) {
            self.in_use.remove(&alias);
            self.quarantine.push((id, alias));
        }
    }

    pub fn acknowledge_leave(&mut self, id: EntityId) -> bool {
        match self.quarantine.iter().position(|(held_by, _)| *held_by == id) {
            Some(slot) => {
                self.quarantine.remove(slot);
                true
            }
            None => false,
        }
    }

    pub fn quarantine(&self) -> &[(EntityId, u8)] {
        &self.quarantine
    }

    pub fn restore_quarantine(&mut self, quarantine: Vec<(EntityId, u8)>) {
        self.quarantine = quarantine;
    }

    pub fn clear_quarantine(&mut self) {
        self.quarantine.clear();
    }

    pub fn in_use(&self) -> usize {
        self.in_use.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarantined_alias_not_reassigned_until_acknowledged() {
        let mut table = AliasTable::new();
        let a = table.assign(10).unwrap();
        table.release(10, a);
        let b = table.assign(11).unwrap();
        assert_ne!(a, b);

        assert!(table.acknowledge_leave(10));
        assert!(!table.acknowledge_leave(10));
        assert_eq!(table.assign(12), Some(a));
    }

    #[test]
    fn exhaustion_falls_back_to_none() {
        let mut table = AliasTable::new();
        for id in 0..MAX_ALIASES as u32 {
            assert!(table.assign(id).is_some());
        }
        assert_eq!(table.assign(999), None);
        assert!(!table.claim(999, 3));
    }
}
