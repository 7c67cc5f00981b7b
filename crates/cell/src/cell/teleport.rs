use glam::Vec3;

use crate::entity::{Entity, EntityFlags};
use crate::error::CellError;
use crate::migration::{EntitySnapshot, OutgoingMigration, RejectReason};
use crate::net::{CellMessage, Envelope};
use crate::script::Hook;
use crate::space::Space;
use crate::types::{Direction3D, EntityId, ProcessId, SpaceId};
use crate::witness::{AoiEvent, Witness};

use super::{CellApp, CellEvent};

impl CellApp {
    /// Moves a real entity to `position` in `space` hosted by `process`. Within this process
    /// the move is immediate; otherwise authority is handed over through a migration whose
    /// outcome arrives as `on_teleport_success` or `on_teleport_failure`.
    pub fn teleport(
        &mut self,
        entity: EntityId,
        process: ProcessId,
        space: SpaceId,
        position: Vec3,
        direction: Direction3D,
    ) -> Result<(), CellError> {
        let current_space = self.live_real_mut(entity)?.space_id;
        if process != self.id {
            return self.begin_migration(entity, process, space, position, direction);
        }
        if !self.spaces.get(space).is_some_and(Space::is_good) {
            return Err(CellError::SpaceNotFound(space));
        }
        if space == current_space {
            self.teleport_local(entity, position, direction);
        } else {
            self.move_between_spaces(entity, space, position, direction);
        }
        Ok(())
    }

    fn teleport_local(&mut self, entity: EntityId, position: Vec3, direction: Direction3D) {
        let Some(real) = self.arena.get_mut(entity) else {
            return;
        };
        real.set_position(position);
        real.set_direction(direction);
        let space = real.space_id;
        let observers = real.witnesses.clone();
        let has_witness = real.has_witness();
        if let Some(space) = self.spaces.get_mut(space) {
            space.move_entity(entity, position);
        }
        for observer in observers {
            self.force_position(observer, entity);
        }
        if has_witness {
            self.force_position(entity, entity);
        }
        self.reinstall_traps(entity);
        self.invoke_hook(entity, Hook::OnTeleportSuccess);
    }

    fn move_between_spaces(
        &mut self,
        entity: EntityId,
        space: SpaceId,
        position: Vec3,
        direction: Direction3D,
    ) {
        let Some(old_space) = self.arena.get(entity).map(|e| e.space_id) else {
            return;
        };
        self.invoke_hook(entity, Hook::OnLeaveSpace { space: old_space });

        let ghosts: Vec<ProcessId> = match self.arena.get_mut(entity).and_then(|e| e.ghosts_mut()) {
            Some(ghosts) => std::mem::take(ghosts).into_iter().collect(),
            None => return,
        };
        for process in ghosts {
            self.send(process, CellMessage::DestroyGhost { entity });
        }
        self.drop_from_observers(entity);
        self.release_members(entity);
        if let Some(old) = self.spaces.get_mut(old_space) {
            old.evict(entity);
        }

        let Some(real) = self.arena.get_mut(entity) else {
            return;
        };
        real.space_id = space;
        real.set_position(position);
        real.set_direction(direction);
        if let Some(new) = self.spaces.get_mut(space) {
            new.admit(entity, position);
        }
        log::debug!("entity {} moved from space {} to {}", entity, old_space, space);

        self.invoke_hook(entity, Hook::OnEnterSpace { space });
        self.reinstall_traps(entity);
        self.invoke_hook(entity, Hook::OnTeleportSuccess);
    }

    fn begin_migration(
        &mut self,
        entity: EntityId,
        target: ProcessId,
        space: SpaceId,
        position: Vec3,
        direction: Direction3D,
    ) -> Result<(), CellError> {
        if self.migration.is_migrating(entity) {
            return Err(CellError::MigrationInProgress { entity });
        }
        if !self.directory.is_alive(target) {
            return Err(CellError::ProcessGone { process: target });
        }
        let real = self.live_real_mut(entity)?;
        let freeze = EntitySnapshot::capture(real);
        let source_space = real.space_id;

        let transfer = freeze.relocated(space, position, direction);

        self.migration.begin(
            entity,
            target,
            space,
            position,
            direction,
            freeze,
            self.tick,
        )?;
        if let Some(real) = self.arena.get_mut(entity) {
            real.flags.insert(EntityFlags::MIGRATING);
        }
        self.send(
            target,
            CellMessage::TeleportRequest {
                source_space,
                snapshot: transfer,
            },
        );
        self.emit(CellEvent::MigrationStarted { entity, target });
        log::info!("entity {} migrating to process {}", entity, target);
        Ok(())
    }

    /// Rolls an in-flight migration back. Returns false when nothing was in flight.
    pub fn cancel_migration(&mut self, entity: EntityId) -> bool {
        match self.rollback(entity, "migration cancelled".to_string()) {
            Some(migration) => {
                self.send(migration.target, CellMessage::TeleportAbort { entity });
                true
            }
            None => false,
        }
    }

    pub(super) fn rollback_timed_out(&mut self, entity: EntityId) {
        let Some(target) = self.migration.outgoing(entity).map(|m| m.target) else {
            return;
        };
        let reason = CellError::MigrationTimeout { entity, target }.to_string();
        log::warn!("{}", reason);
        if let Some(migration) = self.rollback(entity, reason) {
            self.send(migration.target, CellMessage::TeleportAbort { entity });
        }
    }

    /// Restores the freeze-time state, replays whatever was buffered and reports the failure.
    fn rollback(&mut self, entity: EntityId, reason: String) -> Option<OutgoingMigration> {
        let mut migration = self.migration.finish(entity)?;
        if let Some(real) = self.arena.get_mut(entity) {
            real.flags.remove(EntityFlags::MIGRATING);
            real.set_position(migration.freeze.position());
            real.set_direction(migration.freeze.direction());
            real.controllers = migration.freeze.controllers.clone();
            real.timers = migration.freeze.timers.clone();
            let (space, position) = (real.space_id, real.position);
            if let Some(space) = self.spaces.get_mut(space) {
                space.move_entity(entity, position);
            }
        }
        self.stats.migrations_rolled_back += 1;
        self.emit(CellEvent::TeleportFailed {
            entity,
            reason: reason.clone(),
        });

        for message in std::mem::take(&mut migration.buffered) {
            self.receive(Envelope::new(self.id, self.id, message));
        }
        self.invoke_hook(entity, Hook::OnTeleportFailure { reason });
        Some(migration)
    }

    pub(super) fn on_teleport_ack(&mut self, from: ProcessId, entity: EntityId) {
        match self.migration.outgoing(entity) {
            Some(migration) if migration.target == from => self.commit_migration(entity),
            _ => {
                log::warn!("late ack for entity {} from process {}", entity, from);
                self.send(from, CellMessage::TeleportAbort { entity });
            }
        }
    }

    pub(super) fn on_teleport_reject(&mut self, from: ProcessId, entity: EntityId, reason: RejectReason) {
        let target = match self.migration.outgoing(entity) {
            Some(migration) if migration.target == from => migration.target,
            _ => return,
        };
        let err = CellError::MigrationTargetRejected {
            entity,
            target,
            reason,
        };
        log::warn!("{}", err);
        self.rollback(entity, err.to_string());
    }

    /// Authority leaves this process here.
    fn commit_migration(&mut self, entity: EntityId) {
        let Some(migration) = self.migration.finish(entity) else {
            return;
        };
        self.drop_from_observers(entity);
        self.release_members(entity);
        self.revert_controlled_by(entity);
        if let Some(space) = self.arena.get(entity).map(|e| e.space_id) {
            if let Some(space) = self.spaces.get_mut(space) {
                space.evict(entity);
            }
        }
        self.arena.take(entity);
        self.router.add_migrated(entity, migration.target, self.tick);

        self.send(
            migration.target,
            CellMessage::TeleportCommit {
                source_space: migration.freeze.space_id,
                snapshot: migration.transfer(),
            },
        );
        for message in migration.buffered {
            self.send(migration.target, message);
        }
        self.stats.migrations_committed += 1;
        self.emit(CellEvent::MigratedOut {
            entity,
            target: migration.target,
        });
        log::info!("entity {} handed over to process {}", entity, migration.target);
    }

    pub(super) fn on_teleport_request(
        &mut self,
        from: ProcessId,
        source_space: SpaceId,
        snapshot: EntitySnapshot,
    ) {
        let entity = snapshot.id;
        let reason = if self.shutting_down {
            Some(RejectReason::Shutdown)
        } else if !self.spaces.get(snapshot.space_id).is_some_and(Space::is_good) {
            Some(RejectReason::SpaceGone)
        } else if self.arena.is_real(entity) || self.migration.is_staged(entity) {
            Some(RejectReason::DuplicateId)
        } else {
            None
        };
        match reason {
            Some(reason) => {
                log::info!("migration of entity {} refused: {}", entity, reason);
                self.send(from, CellMessage::TeleportReject { entity, reason });
            }
            None => {
                self.migration.stage(snapshot, from, source_space, self.tick);
                self.send(from, CellMessage::TeleportAck { entity });
            }
        }
    }

    /// Authority arrives here. The staged copy becomes the real; if it already expired the
    /// state carried by the commit is used instead.
    pub(super) fn on_teleport_commit(
        &mut self,
        from: ProcessId,
        source_space: SpaceId,
        snapshot: EntitySnapshot,
    ) {
        let entity = snapshot.id;
        let (snapshot, source_space) = match self.migration.take_staged(entity) {
            Some(staged) if staged.source == from => (staged.snapshot, staged.source_space),
            Some(staged) => {
                log::error!(
                    "commit for entity {} from process {}, staged from {}",
                    entity,
                    from,
                    staged.source
                );
                return;
            }
            None if self.arena.is_real(entity) => {
                log::error!("commit for entity {} which is already real here", entity);
                return;
            }
            None => {
                log::warn!("commit for entity {} arrived after its staged copy expired", entity);
                (snapshot, source_space)
            }
        };
        let space = snapshot.space_id;
        let space_changed = source_space != space;
        if !self.spaces.get(space).is_some_and(Space::is_good) {
            let reason = format!("space {} vanished before entity {} arrived", space, entity);
            log::error!("{}", reason);
            if let Ok(data) = snapshot.to_bytes() {
                self.persistence.write_archive_data(entity, data);
            }
            self.emit(CellEvent::TeleportFailed { entity, reason });
            return;
        }

        let mut observers = Vec::new();
        if self.arena.get(entity).is_some_and(Entity::is_ghost) {
            if space_changed {
                self.remove_ghost(entity);
            } else {
                observers = self
                    .arena
                    .get(entity)
                    .map(|e| e.witnesses.clone())
                    .unwrap_or_default();
                if let Some(space) = self.spaces.get_mut(space) {
                    space.evict(entity);
                }
                self.arena.take(entity);
                self.router.remove(entity);
            }
        }

        let alias = self.config.aoi.alias_entity_ids;
        let mut real = snapshot.into_real(alias);
        real.witnesses = observers;
        let ghosts: Vec<ProcessId> = match real.ghosts_mut() {
            Some(ghosts) => {
                ghosts.remove(&self.id);
                ghosts.remove(&from);
                if space_changed {
                    std::mem::take(ghosts).into_iter().collect()
                } else {
                    ghosts.iter().copied().collect()
                }
            }
            None => Vec::new(),
        };
        for process in ghosts {
            let message = if space_changed {
                CellMessage::DestroyGhost { entity }
            } else {
                CellMessage::GhostOwnerChanged {
                    entity,
                    owner: self.id,
                }
            };
            self.send(process, message);
        }

        real.controlled_by = match real.controlled_by {
            Some(c) if c == entity && real.witness.is_some() => Some(c),
            Some(c) if c != entity && self.arena.get_real(c).is_some_and(Entity::has_witness) => {
                Some(c)
            }
            _ => None,
        };

        let mut members = Vec::new();
        if let Some(witness) = real.witness.take() {
            if space_changed {
                let mut fresh = Witness::new(entity, witness.radius(), witness.hysteresis(), alias);
                fresh.queue(AoiEvent::Reset);
                real.witness = Some(fresh);
            } else {
                members = witness.member_ids();
                real.witness = Some(witness);
            }
        }

        let position = real.position;
        self.arena.insert_real(real);
        if let Some(space) = self.spaces.get_mut(space) {
            space.admit(entity, position);
        }
        let mut witnessed = Vec::new();
        for member in members {
            if self
                .arena
                .get_mut(member)
                .is_some_and(|e| e.add_witness(entity))
            {
                witnessed.push(member);
            }
        }
        for member in witnessed {
            self.invoke_hook(member, Hook::OnWitnessed { witnessed: true });
        }

        self.reinstall_traps(entity);
        if space_changed {
            self.invoke_hook(entity, Hook::OnEnterSpace { space });
        }
        self.invoke_hook(entity, Hook::OnTeleportSuccess);
        self.emit(CellEvent::MigratedIn {
            entity,
            source: from,
        });
        log::info!("entity {} now real on process {}", entity, self.id);
    }

    pub(super) fn on_teleport_abort(&mut self, from: ProcessId, entity: EntityId) {
        if self.migration.take_staged(entity).is_some() {
            log::info!("staged copy of entity {} discarded on abort from {}", entity, from);
        }
    }
}
