use std::collections::{BTreeMap, HashSet};

use crate::error::consistency_violation;
use crate::types::EntityId;

use super::entity::Entity;

/// All entity instances held by one process, reals and ghosts alike.
#[derive(Debug, Default)]
pub struct EntityArena {
    entities: BTreeMap<EntityId, Entity>,
    destroyed_this_tick: HashSet<EntityId>,
    removed_entities: Vec<EntityId>,
}

impl EntityArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a real entity, replacing a local ghost with the same id.
    pub fn insert_real(&mut self, entity: Entity) -> Option<Entity> {
        if let Some(existing) = self.entities.get(&entity.id) {
            if existing.is_real() {
                consistency_violation(format!("second real instance of entity {}", entity.id));
            }
        }
        self.destroyed_this_tick.remove(&entity.id);
        self.entities.insert(entity.id, entity)
    }

    /// Inserts or replaces a ghost. Returns false when a real with that id lives here.
    pub fn insert_ghost(&mut self, entity: Entity) -> bool {
        if self.entities.get(&entity.id).is_some_and(Entity::is_real) {
            return false;
        }
        self.entities.insert(entity.id, entity);
        true
    }

    /// Removes an entity for destruction. A second destroy within the same tick is fatal.
    pub fn destroy(&mut self, id: EntityId) -> Option<Entity> {
        if self.destroyed_this_tick.contains(&id) && !self.entities.contains_key(&id) {
            consistency_violation(format!("entity {id} destroyed twice"));
        }
        let entity = self.entities.remove(&id)?;
        self.destroyed_this_tick.insert(id);
        self.removed_entities.push(id);
        Some(entity)
    }

    /// Removes an entity without destroying it, used when authority moves elsewhere.
    pub fn take(&mut self, id: EntityId) -> Option<Entity> {
        let entity = self.entities.remove(&id);
        if entity.is_some() {
            self.removed_entities.push(id);
        }
        entity
    }

    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn get_real(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id).filter(|e| e.is_real())
    }

    pub fn get_real_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id).filter(|e| e.is_real())
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn is_real(&self, id: EntityId) -> bool {
        self.get_real(id).is_some()
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn entities_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Ids of all real entities in ascending order.
    pub fn real_ids(&self) -> Vec<EntityId> {
        self.entities
            .values()
            .filter(|e| e.is_real())
            .map(|e| e.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    pub fn real_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_real()).count()
    }

    pub fn ghost_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_ghost()).count()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn removed_entities(&self) -> &[EntityId] {
        &self.removed_entities
    }

    pub fn end_tick(&mut self) {
        self.destroyed_this_tick.clear();
        self.removed_entities.clear();
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::entity::PropertyTable;
    use crate::types::Direction3D;

    fn real(id: EntityId) -> Entity {
        Entity::new_real(id, 1, 1, Vec3::ZERO, Direction3D::default(), PropertyTable::new())
    }

    fn ghost(id: EntityId) -> Entity {
        Entity::new_ghost(id, 1, 1, 9, Vec3::ZERO, Direction3D::default(), PropertyTable::new())
    }

    #[test]
    fn real_replaces_ghost() {
        let mut arena = EntityArena::new();
        assert!(arena.insert_ghost(ghost(1)));
        let previous = arena.insert_real(real(1));
        assert!(previous.is_some_and(|e| e.is_ghost()));
        assert!(arena.is_real(1));
        assert!(!arena.insert_ghost(ghost(1)));
    }

    #[test]
    #[should_panic(expected = "consistency violation")]
    fn second_real_is_fatal() {
        let mut arena = EntityArena::new();
        arena.insert_real(real(1));
        arena.insert_real(real(1));
    }

    #[test]
    #[should_panic(expected = "consistency violation")]
    fn double_destroy_is_fatal() {
        let mut arena = EntityArena::new();
        arena.insert_real(real(1));
        arena.destroy(1);
        arena.destroy(1);
    }

    #[test]
    fn destroy_after_tick_boundary_is_a_plain_miss() {
        let mut arena = EntityArena::new();
        arena.insert_real(real(1));
        assert!(arena.destroy(1).is_some());
        assert_eq!(arena.removed_entities(), &[1]);
        arena.end_tick();
        assert!(arena.destroy(1).is_none());
    }

    #[test]
    fn counts_split_by_mode() {
        let mut arena = EntityArena::new();
        arena.insert_real(real(1));
        arena.insert_real(real(2));
        arena.insert_ghost(ghost(3));
        assert_eq!(arena.real_count(), 2);
        assert_eq!(arena.ghost_count(), 1);
        assert_eq!(arena.real_ids(), vec![1, 2]);
    }
}
