use std::collections::{BTreeMap, BTreeSet};

use glam::Vec3;

use crate::config::CoordinateConfig;
use crate::coordinate::CoordinateIndex;
use crate::types::{EntityId, ProcessId, SpaceId};

/// Part of this space hosted by another process, used for boundary ghosting.
#[derive(Debug, Clone, PartialEq)]
pub struct NeighborCell {
    pub process: ProcessId,
    /// xz corner with the smallest coordinates.
    pub min: [f32; 2],
    pub max: [f32; 2],
}

impl NeighborCell {
    pub fn new(process: ProcessId, min: [f32; 2], max: [f32; 2]) -> Self {
        Self { process, min, max }
    }

    /// Planar distance from `position` to the rectangle, zero inside it.
    pub fn distance_to(&self, position: Vec3) -> f32 {
        let dx = (self.min[0] - position.x).max(0.0).max(position.x - self.max[0]);
        let dz = (self.min[1] - position.z).max(0.0).max(position.z - self.max[1]);
        (dx * dx + dz * dz).sqrt()
    }
}

#[derive(Debug)]
pub struct Space {
    pub id: SpaceId,
    pub geometry: String,
    residents: BTreeSet<EntityId>,
    index: CoordinateIndex,
    good: bool,
    neighbors: Vec<NeighborCell>,
}

impl Space {
    pub fn new(id: SpaceId, geometry: impl Into<String>, coordinate: &CoordinateConfig) -> Self {
        Self {
            id,
            geometry: geometry.into(),
            residents: BTreeSet::new(),
            index: CoordinateIndex::new(coordinate),
            good: true,
            neighbors: Vec::new(),
        }
    }

    pub fn admit(&mut self, id: EntityId, position: Vec3) {
        self.residents.insert(id);
        self.index.insert(id, position);
    }

    pub fn evict(&mut self, id: EntityId) -> bool {
        self.index.remove(id);
        self.residents.remove(&id)
    }

    pub fn move_entity(&mut self, id: EntityId, position: Vec3) {
        self.index.update(id, position);
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.residents.contains(&id)
    }

    pub fn residents(&self) -> Vec<EntityId> {
        self.residents.iter().copied().collect()
    }

    pub fn resident_count(&self) -> usize {
        self.residents.len()
    }

    pub fn index(&self) -> &CoordinateIndex {
        &self.index
    }

    pub fn index_mut(&mut self) -> &mut CoordinateIndex {
        &mut self.index
    }

    /// A space being torn down accepts no new entities.
    pub fn is_good(&self) -> bool {
        self.good
    }

    pub fn mark_dying(&mut self) {
        self.good = false;
    }

    pub fn add_neighbor(&mut self, neighbor: NeighborCell) {
        self.neighbors.retain(|n| n.process != neighbor.process);
        self.neighbors.push(neighbor);
    }

    pub fn neighbors(&self) -> &[NeighborCell] {
        &self.neighbors
    }
}

#[derive(Debug, Default)]
pub struct Spaces {
    spaces: BTreeMap<SpaceId, Space>,
}

impl Spaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, space: Space) {
        self.spaces.insert(space.id, space);
    }

    pub fn get(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.get(&id)
    }

    pub fn get_mut(&mut self, id: SpaceId) -> Option<&mut Space> {
        self.spaces.get_mut(&id)
    }

    pub fn remove(&mut self, id: SpaceId) -> Option<Space> {
        self.spaces.remove(&id)
    }

    pub fn contains(&self, id: SpaceId) -> bool {
        self.spaces.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<SpaceId> {
        self.spaces.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Space> {
        self.spaces.values()
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }
}
