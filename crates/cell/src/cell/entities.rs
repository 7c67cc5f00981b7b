use glam::Vec3;

use crate::entity::{Entity, EntityFlags, PropertyTable, PropertyValue};
use crate::error::CellError;
use crate::migration::EntitySnapshot;
use crate::net::CellMessage;
use crate::script::Hook;
use crate::space::{NeighborCell, Space};
use crate::types::{Direction3D, EntityId, EntityTypeId, PropertyId, SpaceId, TimerId};
use crate::witness::Witness;

use super::{CellApp, CellEvent};

impl CellApp {
    /// Returns false when the space already exists.
    pub fn create_space(&mut self, id: SpaceId, geometry: impl Into<String>) -> bool {
        if self.spaces.contains(id) {
            log::warn!("space {} already exists on process {}", id, self.id);
            return false;
        }
        self.spaces
            .insert(Space::new(id, geometry, &self.config.coordinate));
        log::info!("process {} hosts space {}", self.id, id);
        true
    }

    pub fn add_neighbor(&mut self, space: SpaceId, neighbor: NeighborCell) -> Result<(), CellError> {
        self.spaces
            .get_mut(space)
            .ok_or(CellError::SpaceNotFound(space))?
            .add_neighbor(neighbor);
        Ok(())
    }

    /// Tells every real resident the space is going away, then removes all residents.
    pub fn destroy_space(&mut self, id: SpaceId) -> Result<(), CellError> {
        let space = self.spaces.get_mut(id).ok_or(CellError::SpaceNotFound(id))?;
        space.mark_dying();
        let residents = space.residents();

        for entity in &residents {
            self.invoke_hook(*entity, Hook::OnSpaceGone { space: id });
        }
        for entity in residents {
            match self.arena.get(entity) {
                Some(e) if e.is_real() && !e.is_destroyed() => {
                    if let Err(err) = self.destroy_entity(entity) {
                        log::warn!("destroying {} with space {} failed: {}", entity, id, err);
                    }
                }
                Some(e) if e.is_ghost() => self.remove_ghost(entity),
                _ => {}
            }
        }
        self.spaces.remove(id);
        self.emit(CellEvent::SpaceDestroyed { space: id });
        log::info!("space {} destroyed on process {}", id, self.id);
        Ok(())
    }

    /// Creates a real entity. Ids are allocated by the caller and must be cluster unique.
    #[allow(clippy::too_many_arguments)]
    pub fn create_entity(
        &mut self,
        id: EntityId,
        type_id: EntityTypeId,
        space: SpaceId,
        position: Vec3,
        direction: Direction3D,
        properties: Vec<(PropertyId, PropertyValue)>,
    ) -> Result<EntityId, CellError> {
        let def = self
            .defs
            .get(type_id)
            .ok_or(CellError::UnknownEntityType(type_id))?;
        if !self.spaces.get(space).is_some_and(Space::is_good) {
            return Err(CellError::SpaceNotFound(space));
        }

        let mut table =
            PropertyTable::from_values(def.properties().iter().map(|p| (p.id, p.default.clone())));
        for (property, value) in properties {
            if def.property(property).is_none() {
                return Err(CellError::UnknownProperty {
                    entity: id,
                    property,
                });
            }
            table.set(property, value);
        }
        table.clear_changes();

        if self.arena.get(id).is_some_and(Entity::is_ghost) {
            self.remove_ghost(id);
        }
        let mut entity = Entity::new_real(id, type_id, space, position, direction, table);
        entity.flags.insert(EntityFlags::INITING);
        self.arena.insert_real(entity);
        if let Some(space) = self.spaces.get_mut(space) {
            space.admit(id, position);
        }

        self.invoke_hook(id, Hook::OnEnterSpace { space });
        if let Some(entity) = self.arena.get_mut(id) {
            entity.flags.remove(EntityFlags::INITING);
        }
        self.emit(CellEvent::EntityCreated { entity: id });
        log::debug!("entity {} created in space {}", id, space);
        Ok(id)
    }

    /// Destroys a real entity. Destroying the same id twice within one tick is fatal.
    pub fn destroy_entity(&mut self, id: EntityId) -> Result<(), CellError> {
        let Some(entity) = self.arena.get_mut(id) else {
            self.arena.destroy(id);
            return Err(CellError::EntityNotFound(id));
        };
        if entity.is_ghost() {
            return Err(CellError::NotReal(id));
        }
        if entity.is_destroyed() {
            return Ok(());
        }
        entity.flags.insert(EntityFlags::DESTROYED);

        self.invoke_hook(id, Hook::OnDestroy);

        if let Some(migration) = self.migration.finish(id) {
            self.send(migration.target, CellMessage::TeleportAbort { entity: id });
        }
        self.release_members(id);
        if let Some(entity) = self.arena.get_mut(id) {
            entity.witness = None;
        }
        self.drop_from_observers(id);
        self.revert_controlled_by(id);

        let (space, ghosts, archive) = match self.arena.get(id) {
            Some(entity) => (
                entity.space_id,
                entity
                    .ghosts()
                    .map(|g| g.iter().copied().collect::<Vec<_>>())
                    .unwrap_or_default(),
                EntitySnapshot::capture(entity).to_bytes(),
            ),
            None => return Ok(()),
        };
        for process in ghosts {
            self.send(process, CellMessage::DestroyGhost { entity: id });
        }
        match archive {
            Ok(data) => self.persistence.write_archive_data(id, data),
            Err(err) => log::error!("archiving entity {} failed: {}", id, err),
        }

        if let Some(space) = self.spaces.get_mut(space) {
            space.evict(id);
        }
        self.arena.destroy(id);
        self.emit(CellEvent::EntityDestroyed { entity: id });
        log::debug!("entity {} destroyed", id);
        Ok(())
    }

    pub(crate) fn real_mut(&mut self, id: EntityId) -> Result<&mut Entity, CellError> {
        match self.arena.get_mut(id) {
            Some(entity) if entity.is_real() => Ok(entity),
            Some(_) => Err(CellError::NotReal(id)),
            None => Err(CellError::EntityNotFound(id)),
        }
    }

    /// A real entity that is not frozen for migration.
    pub(crate) fn live_real_mut(&mut self, id: EntityId) -> Result<&mut Entity, CellError> {
        let entity = self.real_mut(id)?;
        if entity.is_migrating() {
            return Err(CellError::MigrationInProgress { entity: id });
        }
        Ok(entity)
    }

    pub fn set_position(&mut self, id: EntityId, position: Vec3) -> Result<(), CellError> {
        let entity = self.live_real_mut(id)?;
        entity.set_position(position);
        let space = entity.space_id;
        if let Some(space) = self.spaces.get_mut(space) {
            space.move_entity(id, position);
        }
        Ok(())
    }

    pub fn set_position_and_direction(
        &mut self,
        id: EntityId,
        position: Vec3,
        direction: Direction3D,
    ) -> Result<(), CellError> {
        self.live_real_mut(id)?.set_direction(direction);
        self.set_position(id, position)
    }

    /// Writes a property on a real entity. Returns whether the value changed.
    pub fn set_property(
        &mut self,
        id: EntityId,
        property: PropertyId,
        value: PropertyValue,
    ) -> Result<bool, CellError> {
        let defs = std::sync::Arc::clone(&self.defs);
        let entity = self.live_real_mut(id)?;
        let def = defs
            .get(entity.type_id)
            .and_then(|def| def.property(property))
            .ok_or(CellError::UnknownProperty {
                entity: id,
                property,
            })?;
        let changed = entity.properties.set(property, value);
        if changed && def.is_persistent() {
            entity.dirty = true;
        }
        Ok(changed)
    }

    pub fn property(&self, id: EntityId, property: PropertyId) -> Option<&PropertyValue> {
        self.arena.get(id)?.properties.get(property)
    }

    /// Queues a local real for the next backup cycle. Returns false if it is not here.
    pub fn mark_dirty(&mut self, id: EntityId) -> bool {
        match self.arena.get_real_mut(id) {
            Some(entity) => {
                entity.dirty = true;
                true
            }
            None => false,
        }
    }

    /// Opts a real in or out of the periodic backup. Changes made while opted out are
    /// written once it opts back in.
    pub fn set_auto_backup(&mut self, id: EntityId, enabled: bool) -> Result<(), CellError> {
        self.real_mut(id)?.auto_backup = enabled;
        Ok(())
    }

    /// Sets the per-second top speeds used to validate client movement. Zero disables.
    pub fn set_top_speed(&mut self, id: EntityId, xz: f32, y: f32) -> Result<(), CellError> {
        let xz = self.config.per_tick(xz);
        let y = self.config.per_tick(y);
        let entity = self.real_mut(id)?;
        entity.top_speed = xz;
        entity.top_speed_y = y;
        Ok(())
    }

    /// Seconds are rounded up to whole ticks. A zero interval makes a one-shot timer.
    pub fn add_timer(
        &mut self,
        id: EntityId,
        initial_secs: f32,
        interval_secs: f32,
        user_arg: i32,
    ) -> Result<TimerId, CellError> {
        let rate = self.config.tick_rate.max(1) as f32;
        let initial = ((initial_secs.max(0.0) * rate).ceil() as u32).max(1);
        let interval = if interval_secs > 0.0 {
            ((interval_secs * rate).ceil() as u32).max(1)
        } else {
            0
        };
        Ok(self.real_mut(id)?.timers.add(initial, interval, user_arg))
    }

    pub fn cancel_timer(&mut self, id: EntityId, timer: TimerId) -> Result<bool, CellError> {
        Ok(self.real_mut(id)?.timers.cancel(timer))
    }

    /// Serializes a real entity for backup or disaster recovery.
    pub fn snapshot_entity(&self, id: EntityId) -> Result<Vec<u8>, CellError> {
        let entity = self
            .arena
            .get_real(id)
            .ok_or(CellError::EntityNotFound(id))?;
        Ok(EntitySnapshot::capture(entity).to_bytes()?)
    }

    /// Recreates a real entity from a snapshot. Ghost locations and observers are not
    /// restored; they are rebuilt by the following ticks.
    pub fn restore_entity(&mut self, data: &[u8]) -> Result<EntityId, CellError> {
        let mut snapshot = EntitySnapshot::from_bytes(data)?;
        let id = snapshot.id;
        let space = snapshot.space_id;
        if !self.spaces.get(space).is_some_and(Space::is_good) {
            return Err(CellError::SpaceNotFound(space));
        }
        snapshot.ghosts.clear();
        snapshot.witnesses.clear();

        let mut entity = snapshot.into_real(self.config.aoi.alias_entity_ids);
        entity.flags.remove(EntityFlags::MIGRATING | EntityFlags::DESTROYED);
        if let Some(witness) = entity.witness.take() {
            entity.witness = Some(Witness::new(
                id,
                witness.radius(),
                witness.hysteresis(),
                self.config.aoi.alias_entity_ids,
            ));
        }
        if entity.controlled_by.is_some_and(|c| c != id) {
            entity.controlled_by = None;
        }
        if entity.controlled_by == Some(id) && entity.witness.is_none() {
            entity.controlled_by = None;
        }

        if self.arena.get(id).is_some_and(Entity::is_ghost) {
            self.remove_ghost(id);
        }
        let position = entity.position;
        self.arena.insert_real(entity);
        if let Some(space) = self.spaces.get_mut(space) {
            space.admit(id, position);
        }
        self.reinstall_traps(id);
        self.emit(CellEvent::EntityCreated { entity: id });
        log::info!("entity {} restored into space {}", id, space);
        Ok(id)
    }

    pub fn entities_in_range(
        &self,
        space: SpaceId,
        center: Vec3,
        radius: f32,
    ) -> Result<Vec<EntityId>, CellError> {
        if !radius.is_finite() || radius < 0.0 {
            return Err(CellError::InvalidRange {
                range_xz: radius,
                range_y: radius,
            });
        }
        let space = self.spaces.get(space).ok_or(CellError::SpaceNotFound(space))?;
        Ok(space.index().query_radius(center, radius))
    }

    /// Leaves every observer's membership at once, without the hysteresis window.
    pub(crate) fn drop_from_observers(&mut self, id: EntityId) {
        let observers = match self.arena.get_mut(id) {
            Some(entity) => std::mem::take(&mut entity.witnesses),
            None => return,
        };
        for observer in observers {
            let Some(witness) = self
                .arena
                .get_mut(observer)
                .and_then(|e| e.witness.as_mut())
            else {
                continue;
            };
            if let Some(member) = witness.remove_member(id) {
                witness.queue(crate::witness::AoiEvent::Leave { key: member.key() });
            }
        }
    }

    /// Entities steered by `controller` fall back to their own client, or to nobody.
    pub(crate) fn revert_controlled_by(&mut self, controller: EntityId) {
        let mut lost = Vec::new();
        for entity in self.arena.entities_mut() {
            if entity.controlled_by != Some(controller) {
                continue;
            }
            if entity.id == controller {
                if entity.witness.is_none() {
                    entity.controlled_by = None;
                }
                continue;
            }
            entity.controlled_by = entity.witness.as_ref().map(|_| entity.id);
            if entity.is_real() {
                lost.push(entity.id);
            }
        }
        for entity in lost {
            self.invoke_hook(entity, Hook::OnLoseControlledBy { controller });
        }
    }
}
