use glam::Vec3;
use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::controller::ControllerRegistry;
use crate::entity::{Entity, EntityDef, EntityFlags, EntityMode, PropertyTable, PropertyValue, TimerSet};
use crate::error::CodecError;
use crate::types::{Direction3D, EntityId, EntityTypeId, ProcessId, PropertyId, SpaceId};
use crate::witness::{Witness, WitnessSnapshot};

/// Everything needed to recreate an entity on another process.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntitySnapshot {
    pub id: EntityId,
    pub type_id: EntityTypeId,
    pub space_id: SpaceId,
    pub position: [f32; 3],
    pub direction: [f32; 3],
    pub on_ground: bool,
    pub top_speed: f32,
    pub top_speed_y: f32,
    pub flags: u8,
    pub dirty: bool,
    pub auto_backup: bool,
    pub controlled_by: Option<EntityId>,
    pub properties: Vec<(PropertyId, PropertyValue)>,
    pub controllers: ControllerRegistry,
    pub witness: Option<WitnessSnapshot>,
    pub witnesses: Vec<EntityId>,
    pub timers: TimerSet,
    pub ghosts: Vec<ProcessId>,
}

impl EntitySnapshot {
    pub fn capture(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            type_id: entity.type_id,
            space_id: entity.space_id,
            position: entity.position.to_array(),
            direction: entity.direction.to_array(),
            on_ground: entity.on_ground,
            top_speed: entity.top_speed,
            top_speed_y: entity.top_speed_y,
            flags: (entity.flags - EntityFlags::MIGRATING).bits(),
            dirty: entity.dirty,
            auto_backup: entity.auto_backup,
            controlled_by: entity.controlled_by,
            properties: entity.properties.to_vec(),
            controllers: entity.controllers.clone(),
            witness: entity.witness.as_ref().map(Witness::snapshot),
            witnesses: entity.witnesses.clone(),
            timers: entity.timers.clone(),
            ghosts: entity
                .ghosts()
                .map(|ghosts| ghosts.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    /// The subset a ghost holds: position, direction and the ghosted properties.
    pub fn for_ghost(entity: &Entity, def: Option<&EntityDef>) -> Self {
        let properties = entity
            .properties
            .iter()
            .filter(|(id, _)| {
                def.and_then(|def| def.property(*id))
                    .is_some_and(|property| property.is_ghosted())
            })
            .map(|(id, value)| (id, value.clone()))
            .collect();
        Self {
            id: entity.id,
            type_id: entity.type_id,
            space_id: entity.space_id,
            position: entity.position.to_array(),
            direction: entity.direction.to_array(),
            on_ground: entity.on_ground,
            top_speed: 0.0,
            top_speed_y: 0.0,
            flags: 0,
            dirty: false,
            auto_backup: false,
            controlled_by: entity.controlled_by,
            properties,
            controllers: ControllerRegistry::new(),
            witness: None,
            witnesses: Vec::new(),
            timers: TimerSet::new(),
            ghosts: Vec::new(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn direction(&self) -> Direction3D {
        Direction3D::from_array(self.direction)
    }

    /// The same entity placed at a teleport destination. Observers do not travel along.
    pub fn relocated(&self, space: SpaceId, position: Vec3, direction: Direction3D) -> Self {
        let mut moved = self.clone();
        moved.space_id = space;
        moved.position = position.to_array();
        moved.direction = direction.to_array();
        moved.witnesses.clear();
        moved
    }

    pub fn into_real(self, alias_entity_ids: bool) -> Entity {
        let mut entity = Entity::new_real(
            self.id,
            self.type_id,
            self.space_id,
            Vec3::from_array(self.position),
            Direction3D::from_array(self.direction),
            PropertyTable::from_values(self.properties),
        );
        entity.mode = EntityMode::Real {
            ghosts: self.ghosts.into_iter().collect(),
        };
        entity.on_ground = self.on_ground;
        entity.top_speed = self.top_speed;
        entity.top_speed_y = self.top_speed_y;
        entity.flags = EntityFlags::from_bits_truncate(self.flags);
        entity.dirty = self.dirty;
        entity.auto_backup = self.auto_backup;
        entity.controlled_by = self.controlled_by;
        entity.controllers = self.controllers;
        entity.witness = self
            .witness
            .map(|witness| Witness::from_snapshot(self.id, witness, alias_entity_ids));
        entity.witnesses = self.witnesses;
        entity.timers = self.timers;
        entity
    }

    pub fn into_ghost(self, owner: ProcessId) -> Entity {
        let mut entity = Entity::new_ghost(
            self.id,
            self.type_id,
            self.space_id,
            owner,
            Vec3::from_array(self.position),
            Direction3D::from_array(self.direction),
            PropertyTable::from_values(self.properties),
        );
        entity.on_ground = self.on_ground;
        entity.controlled_by = self.controlled_by;
        entity
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.into_vec())
            .map_err(CodecError::Serialize)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, CodecError> {
        rkyv::from_bytes::<Self, rancor::Error>(data).map_err(CodecError::Deserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ControllerKind, MoveController, MoveTarget};
    use crate::entity::PropertyFlags;

    fn entity() -> Entity {
        let mut entity = Entity::new_real(
            3,
            1,
            1,
            Vec3::new(1.0, 2.0, 3.0),
            Direction3D::from_yaw(0.5),
            PropertyTable::from_values([(1, PropertyValue::Int(10)), (2, PropertyValue::Str("x".into()))]),
        );
        entity.controllers.add_motion(
            ControllerKind::Move(MoveController::new(MoveTarget::Point([9.0, 0.0, 0.0]), 0.5, 0.0, true, false)),
            4,
        );
        entity.controllers.add_proximity(3.0, 1.0, 5).unwrap();
        entity.timers.add(10, 10, 1);
        entity.witness = Some(Witness::new(3, 10.0, 2.0, true));
        if let Some(ghosts) = entity.ghosts_mut() {
            ghosts.insert(7);
        }
        entity.flags |= EntityFlags::MIGRATING;
        entity
    }

    #[test]
    fn serialize_deserialize_serialize_is_stable() {
        let snapshot = EntitySnapshot::capture(&entity());
        let bytes = snapshot.to_bytes().unwrap();
        let decoded = EntitySnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, snapshot);

        let rebuilt = decoded.into_real(true);
        let again = EntitySnapshot::capture(&rebuilt);
        assert_eq!(again.properties, snapshot.properties);
        assert_eq!(again.controllers, snapshot.controllers);
        assert_eq!(again.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn migrating_flag_is_not_captured() {
        let snapshot = EntitySnapshot::capture(&entity());
        assert!(!EntityFlags::from_bits_truncate(snapshot.flags).contains(EntityFlags::MIGRATING));
        assert_eq!(snapshot.ghosts, vec![7]);
    }

    #[test]
    fn ghost_snapshot_keeps_only_ghosted_state() {
        let def = EntityDef::new(1, "Avatar")
            .with_property(1, "hp", PropertyFlags::OTHER_CLIENTS, PropertyValue::Int(0))
            .with_property(2, "secret", PropertyFlags::CELL_PRIVATE, PropertyValue::Int(0));
        let snapshot = EntitySnapshot::for_ghost(&entity(), Some(&def));
        assert_eq!(snapshot.properties, vec![(1, PropertyValue::Int(10))]);
        assert!(snapshot.controllers.is_empty());
        assert!(snapshot.witness.is_none());

        let ghost = snapshot.into_ghost(2);
        assert_eq!(ghost.ghost_owner(), Some(2));
    }
}
