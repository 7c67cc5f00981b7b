use glam::Vec3;

use crate::controller::ControllerHost;
use crate::entity::EntityArena;
use crate::space::Spaces;
use crate::types::{Direction3D, EntityId, SpaceId};

/// Lets one entity's controllers move it and look at its space while the registry is
/// detached from the entity.
pub(crate) struct TickHost<'a> {
    pub entity: EntityId,
    pub space: SpaceId,
    pub arena: &'a mut EntityArena,
    pub spaces: &'a mut Spaces,
}

impl ControllerHost for TickHost<'_> {
    fn position(&self) -> Vec3 {
        self.arena
            .get(self.entity)
            .map_or(Vec3::ZERO, |entity| entity.position)
    }

    fn direction(&self) -> Direction3D {
        self.arena
            .get(self.entity)
            .map_or_else(Direction3D::default, |entity| entity.direction)
    }

    fn set_position_and_direction(&mut self, position: Vec3, direction: Direction3D) {
        let Some(entity) = self.arena.get_mut(self.entity) else {
            return;
        };
        entity.set_position(position);
        entity.set_direction(direction);
        entity.on_ground = false;
        if let Some(space) = self.spaces.get_mut(self.space) {
            space.move_entity(self.entity, position);
        }
    }

    fn entity_position(&self, id: EntityId) -> Option<Vec3> {
        self.arena
            .get(id)
            .filter(|entity| entity.space_id == self.space && !entity.is_destroyed())
            .map(|entity| entity.position)
    }

    fn entities_in_box(&self, center: Vec3, range_xz: f32, range_y: f32) -> Vec<EntityId> {
        self.spaces
            .get(self.space)
            .map(|space| space.index().query_box(center, range_xz, range_y))
            .unwrap_or_default()
    }
}
