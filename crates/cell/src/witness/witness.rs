use std::collections::{BTreeMap, BTreeSet};

use rkyv::{Archive, Deserialize, Serialize};

use crate::error::CellError;
use crate::types::EntityId;

use super::alias::{AliasTable, MAX_ALIASES};
use super::packet::{AoiEvent, EntityKey};

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct AoiMember {
    pub entity: EntityId,
    pub alias: Option<u8>,
    /// The observer has not acknowledged the enter yet.
    pub pending_enter: bool,
    /// Fell out of range while pending; re-evaluated once the enter is acknowledged.
    pub deferred_leave: bool,
    /// Owed a full-state update after the enter acknowledgment.
    pub catch_up: bool,
}

impl AoiMember {
    pub fn key(&self) -> EntityKey {
        match self.alias {
            Some(alias) => EntityKey::Alias(alias),
            None => EntityKey::Id(self.entity),
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct MembershipDelta {
    pub entered: Vec<EntityId>,
    pub left: Vec<(EntityId, EntityKey)>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct WitnessSnapshot {
    pub radius: f32,
    pub hysteresis: f32,
    pub members: Vec<AoiMember>,
    pub alias_quarantine: Vec<(EntityId, u8)>,
}

/// AOI state of one observer. Enter at distance < R, leave beyond R + H.
#[derive(Debug, Clone)]
pub struct Witness {
    owner: EntityId,
    radius: f32,
    hysteresis: f32,
    alias_entity_ids: bool,
    members: BTreeMap<EntityId, AoiMember>,
    aliases: AliasTable,
    queued: Vec<AoiEvent>,
}

impl Witness {
    pub fn new(owner: EntityId, radius: f32, hysteresis: f32, alias_entity_ids: bool) -> Self {
        Self {
            owner,
            radius: radius.max(0.0),
            hysteresis: hysteresis.max(0.0),
            alias_entity_ids,
            members: BTreeMap::new(),
            aliases: AliasTable::new(),
            queued: Vec::new(),
        }
    }

    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn hysteresis(&self) -> f32 {
        self.hysteresis
    }

    /// Candidates must be queried out to this distance.
    pub fn query_radius(&self) -> f32 {
        self.radius + self.hysteresis
    }

    pub fn set_radius(&mut self, radius: f32, hysteresis: f32) {
        self.radius = radius.max(0.0);
        self.hysteresis = hysteresis.max(0.0);
    }

    /// Diffs the membership against `candidates`, every entity within R + H with its distance.
    pub fn update(&mut self, candidates: &[(EntityId, f32)]) -> MembershipDelta {
        let mut delta = MembershipDelta::default();
        let mut in_range = BTreeSet::new();

        for (id, distance) in candidates {
            if *id == self.owner {
                continue;
            }
            in_range.insert(*id);
            if let Some(member) = self.members.get_mut(id) {
                member.deferred_leave = false;
                continue;
            }
            if *distance < self.radius {
                let alias = if self.alias_entity_ids && self.members.len() < MAX_ALIASES {
                    self.aliases.assign(*id)
                } else {
                    None
                };
                self.members.insert(
                    *id,
                    AoiMember {
                        entity: *id,
                        alias,
                        pending_enter: true,
                        deferred_leave: false,
                        catch_up: false,
                    },
                );
                delta.entered.push(*id);
            }
        }

        let out_of_range: Vec<EntityId> = self
            .members
            .keys()
            .filter(|id| !in_range.contains(id))
            .copied()
            .collect();
        for id in out_of_range {
            let pending = self
                .members
                .get(&id)
                .is_some_and(|member| member.pending_enter);
            if pending {
                if let Some(member) = self.members.get_mut(&id) {
                    member.deferred_leave = true;
                }
            } else if let Some(member) = self.remove_member(id) {
                delta.left.push((id, member.key()));
            }
        }
        delta
    }

    /// Drops a member right away, quarantining its alias.
    pub fn remove_member(&mut self, id: EntityId) -> Option<AoiMember> {
        let member = self.members.remove(&id)?;
        if let Some(alias) = member.alias {
            self.aliases.release(id, alias);
        }
        Some(member)
    }

    /// Returns false when the entity is not a pending member.
    pub fn ack_enter(&mut self, id: EntityId) -> bool {
        match self.members.get_mut(&id) {
            Some(member) if member.pending_enter => {
                member.pending_enter = false;
                member.catch_up = true;
                true
            }
            _ => false,
        }
    }

    /// A leave acknowledgment for an entity still in the membership means the observer lost
    /// track of its state.
    pub fn ack_leave(&mut self, id: EntityId) -> Result<(), CellError> {
        if self.members.contains_key(&id) {
            return Err(CellError::AoiDesync {
                observer: self.owner,
                entity: id,
            });
        }
        self.aliases.acknowledge_leave(id);
        Ok(())
    }

    /// Marks every member pending again so a full resend can follow. Returns the member ids.
    pub fn reset(&mut self) -> Vec<EntityId> {
        self.aliases.clear_quarantine();
        for member in self.members.values_mut() {
            member.pending_enter = true;
            member.deferred_leave = false;
            member.catch_up = false;
        }
        self.members.keys().copied().collect()
    }

    pub fn take_catch_up(&mut self, id: EntityId) -> bool {
        match self.members.get_mut(&id) {
            Some(member) if member.catch_up => {
                member.catch_up = false;
                true
            }
            _ => false,
        }
    }

    pub fn member(&self, id: EntityId) -> Option<&AoiMember> {
        self.members.get(&id)
    }

    pub fn members(&self) -> impl Iterator<Item = &AoiMember> {
        self.members.values()
    }

    pub fn member_ids(&self) -> Vec<EntityId> {
        self.members.keys().copied().collect()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn key_for(&self, id: EntityId) -> EntityKey {
        self.members
            .get(&id)
            .map_or(EntityKey::Id(id), AoiMember::key)
    }

    /// Queues an out-of-band event for the next delivery.
    pub fn queue(&mut self, event: AoiEvent) {
        self.queued.push(event);
    }

    pub fn take_queued(&mut self) -> Vec<AoiEvent> {
        std::mem::take(&mut self.queued)
    }

    pub fn snapshot(&self) -> WitnessSnapshot {
        WitnessSnapshot {
            radius: self.radius,
            hysteresis: self.hysteresis,
            members: self.members.values().cloned().collect(),
            alias_quarantine: self.aliases.quarantine().to_vec(),
        }
    }

    pub fn from_snapshot(owner: EntityId, snapshot: WitnessSnapshot, alias_entity_ids: bool) -> Self {
        let mut witness = Self::new(owner, snapshot.radius, snapshot.hysteresis, alias_entity_ids);
        witness.aliases.restore_quarantine(snapshot.alias_quarantine);
        for mut member in snapshot.members {
            if let Some(alias) = member.alias {
                if !witness.aliases.claim(member.entity, alias) {
                    member.alias = None;
                }
            }
            witness.members.insert(member.entity, member);
        }
        witness
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn witness() -> Witness {
        Witness::new(1, 5.0, 1.0, true)
    }

    fn at(id: EntityId, distance: f32) -> Vec<(EntityId, f32)> {
        if distance <= 6.0 {
            vec![(id, distance)]
        } else {
            Vec::new()
        }
    }

    #[test]
    fn hysteresis_band() {
        let mut w = witness();
        assert_eq!(w.update(&at(2, 4.9)).entered, vec![2]);
        w.ack_enter(2);
        assert_eq!(w.update(&at(2, 5.3)), MembershipDelta::default());
        let delta = w.update(&at(2, 6.2));
        assert_eq!(delta.left.len(), 1);
        assert_eq!(w.update(&at(2, 5.5)), MembershipDelta::default());
        assert!(!w.contains(2));
        assert_eq!(w.update(&at(2, 4.0)).entered, vec![2]);
    }

    #[test]
    fn pending_member_defers_leave_until_ack() {
        let mut w = witness();
        w.update(&at(2, 1.0));
        assert!(w.update(&[]).left.is_empty());
        assert!(w.member(2).unwrap().deferred_leave);

        assert!(w.ack_enter(2));
        assert!(w.take_catch_up(2));
        let delta = w.update(&[]);
        assert_eq!(delta.left, vec![(2, EntityKey::Alias(0))]);
    }

    #[test]
    fn pending_member_returning_clears_deferred_leave() {
        let mut w = witness();
        w.update(&at(2, 1.0));
        w.update(&[]);
        w.update(&at(2, 5.5));
        assert!(!w.member(2).unwrap().deferred_leave);
    }

    #[test]
    fn leave_ack_for_current_member_is_desync() {
        let mut w = witness();
        w.update(&at(2, 1.0));
        assert!(matches!(w.ack_leave(2), Err(CellError::AoiDesync { observer: 1, entity: 2 })));
        assert_eq!(w.reset(), vec![2]);
        assert!(w.member(2).unwrap().pending_enter);
    }

    #[test]
    fn owner_never_becomes_member() {
        let mut w = witness();
        assert!(w.update(&[(1, 0.0)]).entered.is_empty());
    }

    #[test]
    fn snapshot_keeps_aliases() {
        let mut w = witness();
        w.update(&[(2, 1.0), (3, 2.0)]);
        w.remove_member(2);
        let copy = Witness::from_snapshot(1, w.snapshot(), true);
        assert_eq!(copy.member(3).unwrap().alias, w.member(3).unwrap().alias);
        assert_eq!(copy.snapshot(), w.snapshot());
    }
}
