use glam::Vec3;

use crate::entity::{decode_value, EntityMode};
use crate::error::CellError;
use crate::ghost::ghost_deltas;
use crate::migration::EntitySnapshot;
use crate::net::CellMessage;
use crate::types::{Direction3D, EntityId, ProcessId, PropertyId};

use super::{CellApp, CellEvent};

impl CellApp {
    /// Creates a ghost of a local real on `process`.
    pub fn ghost_to(&mut self, entity: EntityId, process: ProcessId) -> Result<(), CellError> {
        if process == self.id {
            return Ok(());
        }
        if !self.directory.is_alive(process) {
            return Err(CellError::ProcessGone { process });
        }
        let real = self
            .arena
            .get_real(entity)
            .ok_or(CellError::EntityNotFound(entity))?;
        if real.ghosts().is_some_and(|ghosts| ghosts.contains(&process)) {
            return Ok(());
        }
        let snapshot = EntitySnapshot::for_ghost(real, self.defs.get(real.type_id));
        if let Some(ghosts) = self.arena.get_mut(entity).and_then(|e| e.ghosts_mut()) {
            ghosts.insert(process);
        }
        self.send(process, CellMessage::CreateGhost { snapshot });
        log::debug!("entity {} ghosted to process {}", entity, process);
        Ok(())
    }

    /// Returns false when `process` held no ghost of the entity.
    pub fn unghost(&mut self, entity: EntityId, process: ProcessId) -> Result<bool, CellError> {
        let removed = self
            .real_mut(entity)?
            .ghosts_mut()
            .is_some_and(|ghosts| ghosts.remove(&process));
        if removed {
            self.send(process, CellMessage::DestroyGhost { entity });
            log::debug!("ghost of entity {} removed from process {}", entity, process);
        }
        Ok(removed)
    }

    pub(super) fn on_create_ghost(&mut self, owner: ProcessId, snapshot: EntitySnapshot) {
        let id = snapshot.id;
        let space = snapshot.space_id;
        if !self.spaces.contains(space) {
            log::warn!("ghost of entity {} refused: space {} not here", id, space);
            return;
        }
        if self.arena.is_real(id) {
            log::warn!("ghost of entity {} refused: the real lives here", id);
            return;
        }
        if self.arena.contains(id) {
            self.remove_ghost(id);
        }
        let position = snapshot.position();
        self.arena.insert_ghost(snapshot.into_ghost(owner));
        if let Some(space) = self.spaces.get_mut(space) {
            space.admit(id, position);
        }
        self.router.add_ghost_route(id, owner, self.tick);
        self.emit(CellEvent::GhostCreated { entity: id, owner });
    }

    pub(super) fn on_destroy_ghost(&mut self, entity: EntityId) {
        if self.arena.get(entity).is_some_and(|e| e.is_ghost()) {
            self.remove_ghost(entity);
        } else {
            log::debug!("no ghost of entity {} to destroy", entity);
        }
    }

    /// Drops a local ghost together with its observers' view of it and its route.
    pub(crate) fn remove_ghost(&mut self, entity: EntityId) {
        let Some(space) = self
            .arena
            .get(entity)
            .filter(|e| e.is_ghost())
            .map(|e| e.space_id)
        else {
            return;
        };
        self.drop_from_observers(entity);
        if let Some(space) = self.spaces.get_mut(space) {
            space.evict(entity);
        }
        self.arena.take(entity);
        self.router.remove(entity);
        self.emit(CellEvent::GhostDestroyed { entity });
    }

    pub(super) fn on_ghost_owner_changed(&mut self, entity: EntityId, owner: ProcessId) {
        match self.arena.get_mut(entity) {
            Some(ghost) if ghost.is_ghost() => {
                ghost.mode = EntityMode::Ghost { owner };
                if !self.router.set_owner(entity, owner, self.tick) {
                    self.router.add_ghost_route(entity, owner, self.tick);
                }
            }
            _ => log::debug!("owner change for unknown ghost {}", entity),
        }
    }

    /// Applies a replicated property value to a ghost.
    pub fn on_ghost_property_update(
        &mut self,
        entity: EntityId,
        property: PropertyId,
        value: &[u8],
    ) -> Result<(), CellError> {
        let value = decode_value(value)?;
        let ghost = self
            .arena
            .get_mut(entity)
            .ok_or(CellError::EntityNotFound(entity))?;
        if !ghost.is_ghost() {
            log::warn!("property update for real entity {} ignored", entity);
            return Ok(());
        }
        ghost.properties.set(property, value);
        Ok(())
    }

    pub(super) fn on_ghost_volatile_update(
        &mut self,
        entity: EntityId,
        position: Vec3,
        direction: Direction3D,
        on_ground: bool,
    ) {
        let Some(ghost) = self.arena.get_mut(entity).filter(|e| e.is_ghost()) else {
            return;
        };
        ghost.set_position(position);
        ghost.set_direction(direction);
        ghost.on_ground = on_ground;
        let space = ghost.space_id;
        if let Some(space) = self.spaces.get_mut(space) {
            space.move_entity(entity, position);
        }
    }

    /// Ghosts reals near a neighbor's area and unghosts them once they are far enough away.
    pub(super) fn update_boundary_ghosts(&mut self) {
        let distance = self.config.ghost.ghost_distance;
        let release = distance + self.config.ghost.ghost_hysteresis;
        let mut create = Vec::new();
        let mut destroy = Vec::new();

        for entity in self.arena.entities() {
            if !entity.is_real() || entity.is_migrating() || entity.is_destroyed() {
                continue;
            }
            let Some(space) = self.spaces.get(entity.space_id) else {
                continue;
            };
            let Some(ghosts) = entity.ghosts() else {
                continue;
            };
            for neighbor in space.neighbors() {
                if neighbor.process == self.id {
                    continue;
                }
                let gap = neighbor.distance_to(entity.position);
                let ghosted = ghosts.contains(&neighbor.process);
                if !ghosted && gap <= distance && self.directory.is_alive(neighbor.process) {
                    create.push((entity.id, neighbor.process));
                } else if ghosted && gap > release {
                    destroy.push((entity.id, neighbor.process));
                }
            }
        }

        for (entity, process) in create {
            if let Err(err) = self.ghost_to(entity, process) {
                log::warn!("ghosting entity {} failed: {}", entity, err);
            }
        }
        for (entity, process) in destroy {
            if let Err(err) = self.unghost(entity, process) {
                log::warn!("unghosting entity {} failed: {}", entity, err);
            }
        }
    }

    /// Sends this tick's changes of every real to its ghosts, then forgets the changes.
    pub(super) fn send_ghost_deltas(&mut self) {
        let mut outgoing = Vec::new();
        for entity in self.arena.entities() {
            let Some(ghosts) = entity.ghosts().filter(|g| !g.is_empty()) else {
                continue;
            };
            if !entity.has_volatile_changes() && !entity.properties.has_changes() {
                continue;
            }
            match ghost_deltas(entity, self.defs.get(entity.type_id)) {
                Ok(messages) => {
                    for process in ghosts {
                        for message in &messages {
                            outgoing.push((*process, message.clone()));
                        }
                    }
                }
                Err(err) => log::error!("ghost delta for entity {} failed: {}", entity.id, err),
            }
        }
        for (process, message) in outgoing {
            self.send(process, message);
        }
        for entity in self.arena.entities_mut() {
            entity.clear_changes();
        }
    }
}
