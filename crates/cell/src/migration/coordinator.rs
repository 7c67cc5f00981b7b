use std::collections::HashMap;
use std::fmt;

use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

use crate::error::CellError;
use crate::net::CellMessage;
use crate::types::{Direction3D, EntityId, ProcessId, SpaceId};

use super::snapshot::EntitySnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum RejectReason {
    SpaceGone,
    DuplicateId,
    Shutdown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpaceGone => write!(f, "target space is gone"),
            Self::DuplicateId => write!(f, "entity id already present at target"),
            Self::Shutdown => write!(f, "target is shutting down"),
        }
    }
}

/// A migration this process started and has not yet committed or rolled back.
#[derive(Debug)]
pub struct OutgoingMigration {
    pub entity: EntityId,
    pub target: ProcessId,
    pub target_space: SpaceId,
    pub destination: Vec3,
    pub destination_direction: Direction3D,
    pub deadline_tick: u64,
    /// State at freeze time, used for rollback.
    pub freeze: EntitySnapshot,
    /// Messages for the entity that arrived while it was frozen.
    pub buffered: Vec<CellMessage>,
}

impl OutgoingMigration {
    /// What the target installs as the new real.
    pub fn transfer(&self) -> EntitySnapshot {
        self.freeze
            .relocated(self.target_space, self.destination, self.destination_direction)
    }
}

/// A copy received from another process, not authoritative until the commit arrives.
#[derive(Debug)]
pub struct StagedEntity {
    pub snapshot: EntitySnapshot,
    pub source: ProcessId,
    pub source_space: SpaceId,
    pub expires_at: u64,
}

#[derive(Debug)]
pub struct MigrationCoordinator {
    ack_timeout_ticks: u64,
    outgoing: HashMap<EntityId, OutgoingMigration>,
    staged: HashMap<EntityId, StagedEntity>,
}

impl MigrationCoordinator {
    pub fn new(ack_timeout_ticks: u32) -> Self {
        Self {
            ack_timeout_ticks: ack_timeout_ticks.max(1) as u64,
            outgoing: HashMap::new(),
            staged: HashMap::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        &mut self,
        entity: EntityId,
        target: ProcessId,
        target_space: SpaceId,
        destination: Vec3,
        destination_direction: Direction3D,
        freeze: EntitySnapshot,
        now: u64,
    ) -> Result<(), CellError> {
        if self.outgoing.contains_key(&entity) {
            return Err(CellError::MigrationInProgress { entity });
        }
        self.outgoing.insert(
            entity,
            OutgoingMigration {
                entity,
                target,
                target_space,
                destination,
                destination_direction,
                deadline_tick: now + self.ack_timeout_ticks,
                freeze,
                buffered: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn is_migrating(&self, entity: EntityId) -> bool {
        self.outgoing.contains_key(&entity)
    }

    pub fn outgoing(&self, entity: EntityId) -> Option<&OutgoingMigration> {
        self.outgoing.get(&entity)
    }

    /// Holds a message for a frozen entity. Hands it back when the entity is not migrating.
    pub fn buffer(&mut self, entity: EntityId, message: CellMessage) -> Result<(), CellMessage> {
        match self.outgoing.get_mut(&entity) {
            Some(migration) => {
                migration.buffered.push(message);
                Ok(())
            }
            None => Err(message),
        }
    }

    /// Ends an outgoing migration, whatever the outcome.
    pub fn finish(&mut self, entity: EntityId) -> Option<OutgoingMigration> {
        self.outgoing.remove(&entity)
    }

    /// Outgoing migrations whose ack deadline has passed, in id order.
    pub fn timed_out(&self, now: u64) -> Vec<EntityId> {
        let mut expired: Vec<EntityId> = self
            .outgoing
            .values()
            .filter(|m| now >= m.deadline_tick)
            .map(|m| m.entity)
            .collect();
        expired.sort_unstable();
        expired
    }

    pub fn is_staged(&self, entity: EntityId) -> bool {
        self.staged.contains_key(&entity)
    }

    /// Staged copies outlive the sender's ack timeout so a slow commit can still land.
    pub fn stage(
        &mut self,
        snapshot: EntitySnapshot,
        source: ProcessId,
        source_space: SpaceId,
        now: u64,
    ) {
        let entity = snapshot.id;
        self.staged.insert(
            entity,
            StagedEntity {
                snapshot,
                source,
                source_space,
                expires_at: now + self.ack_timeout_ticks * 2,
            },
        );
    }

    pub fn take_staged(&mut self, entity: EntityId) -> Option<StagedEntity> {
        self.staged.remove(&entity)
    }

    pub fn expire_staged(&mut self, now: u64) -> Vec<EntityId> {
        let expired: Vec<EntityId> = self
            .staged
            .iter()
            .filter(|(_, staged)| now >= staged.expires_at)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            self.staged.remove(id);
        }
        expired
    }

    pub fn outgoing_count(&self) -> usize {
        self.outgoing.len()
    }

    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Entity, PropertyTable};

    fn snapshot(id: EntityId) -> EntitySnapshot {
        EntitySnapshot::capture(&Entity::new_real(
            id,
            1,
            1,
            Vec3::ZERO,
            Direction3D::default(),
            PropertyTable::new(),
        ))
    }

    #[test]
    fn second_migration_for_same_entity_is_refused() {
        let mut coordinator = MigrationCoordinator::new(5);
        coordinator
            .begin(1, 2, 1, Vec3::ZERO, Direction3D::default(), snapshot(1), 0)
            .unwrap();
        assert!(matches!(
            coordinator.begin(1, 3, 1, Vec3::ZERO, Direction3D::default(), snapshot(1), 0),
            Err(CellError::MigrationInProgress { entity: 1 })
        ));
        assert!(coordinator.finish(1).is_some());
        assert!(coordinator.finish(1).is_none());
    }

    #[test]
    fn buffers_only_while_migrating() {
        let mut coordinator = MigrationCoordinator::new(5);
        let message = CellMessage::DestroyGhost { entity: 1 };
        assert!(coordinator.buffer(1, message.clone()).is_err());
        coordinator
            .begin(1, 2, 1, Vec3::ZERO, Direction3D::default(), snapshot(1), 0)
            .unwrap();
        assert!(coordinator.buffer(1, message).is_ok());
        assert_eq!(coordinator.finish(1).map(|m| m.buffered.len()), Some(1));
    }

    #[test]
    fn deadlines_and_staging_expire() {
        let mut coordinator = MigrationCoordinator::new(5);
        coordinator
            .begin(1, 2, 1, Vec3::ZERO, Direction3D::default(), snapshot(1), 10)
            .unwrap();
        assert!(coordinator.timed_out(14).is_empty());
        assert_eq!(coordinator.timed_out(15), vec![1]);

        coordinator.stage(snapshot(4), 2, 1, 10);
        assert!(coordinator.is_staged(4));
        assert!(coordinator.expire_staged(19).is_empty());
        assert_eq!(coordinator.expire_staged(20), vec![4]);
    }
}
