use std::collections::BTreeSet;

use bitflags::bitflags;
use glam::Vec3;

use crate::controller::ControllerRegistry;
use crate::types::{Direction3D, EntityId, EntityTypeId, ProcessId, SpaceId};
use crate::witness::Witness;

use super::property::PropertyTable;
use super::timer::TimerSet;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntityFlags: u8 {
        /// Frozen while authority is being handed to another process.
        const MIGRATING = 1 << 0;
        const DESTROYED = 1 << 1;
        const INITING = 1 << 2;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityMode {
    Real { ghosts: BTreeSet<ProcessId> },
    Ghost { owner: ProcessId },
}

#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub type_id: EntityTypeId,
    pub space_id: SpaceId,
    pub mode: EntityMode,
    pub position: Vec3,
    pub direction: Direction3D,
    pub on_ground: bool,
    /// Per-tick limits for client driven movement; zero disables the check.
    pub top_speed: f32,
    pub top_speed_y: f32,
    pub witnesses: Vec<EntityId>,
    pub controlled_by: Option<EntityId>,
    pub dirty: bool,
    /// Dirty entities are only picked up by the periodic backup while this is set.
    pub auto_backup: bool,
    pub properties: PropertyTable,
    pub flags: EntityFlags,
    pub controllers: ControllerRegistry,
    pub witness: Option<Witness>,
    pub timers: TimerSet,
    pub moved: bool,
    pub turned: bool,
}

impl Entity {
    pub fn new_real(
        id: EntityId,
        type_id: EntityTypeId,
        space_id: SpaceId,
        position: Vec3,
        direction: Direction3D,
        properties: PropertyTable,
    ) -> Self {
        Self {
            id,
            type_id,
            space_id,
            mode: EntityMode::Real {
                ghosts: BTreeSet::new(),
            },
            position,
            direction,
            on_ground: false,
            top_speed: 0.0,
            top_speed_y: 0.0,
            witnesses: Vec::new(),
            controlled_by: None,
            dirty: false,
            auto_backup: true,
            properties,
            flags: EntityFlags::empty(),
            controllers: ControllerRegistry::new(),
            witness: None,
            timers: TimerSet::new(),
            moved: false,
            turned: false,
        }
    }

    pub fn new_ghost(
        id: EntityId,
        type_id: EntityTypeId,
        space_id: SpaceId,
        owner: ProcessId,
        position: Vec3,
        direction: Direction3D,
        properties: PropertyTable,
    ) -> Self {
        let mut entity = Self::new_real(id, type_id, space_id, position, direction, properties);
        entity.mode = EntityMode::Ghost { owner };
        entity
    }

    pub fn is_real(&self) -> bool {
        matches!(self.mode, EntityMode::Real { .. })
    }

    pub fn is_ghost(&self) -> bool {
        matches!(self.mode, EntityMode::Ghost { .. })
    }

    pub fn ghost_owner(&self) -> Option<ProcessId> {
        match self.mode {
            EntityMode::Ghost { owner } => Some(owner),
            EntityMode::Real { .. } => None,
        }
    }

    pub fn ghosts(&self) -> Option<&BTreeSet<ProcessId>> {
        match &self.mode {
            EntityMode::Real { ghosts } => Some(ghosts),
            EntityMode::Ghost { .. } => None,
        }
    }

    pub fn ghosts_mut(&mut self) -> Option<&mut BTreeSet<ProcessId>> {
        match &mut self.mode {
            EntityMode::Real { ghosts } => Some(ghosts),
            EntityMode::Ghost { .. } => None,
        }
    }

    pub fn is_migrating(&self) -> bool {
        self.flags.contains(EntityFlags::MIGRATING)
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.contains(EntityFlags::DESTROYED)
    }

    pub fn has_witness(&self) -> bool {
        self.witness.is_some()
    }

    pub fn set_position(&mut self, position: Vec3) {
        if self.position != position {
            self.position = position;
            self.moved = true;
            self.dirty = true;
        }
    }

    pub fn set_direction(&mut self, direction: Direction3D) {
        if self.direction != direction {
            self.direction = direction;
            self.turned = true;
        }
    }

    /// Rejects client moves that exceed the per-tick top speeds, with half a unit of slack.
    /// The vertical axis is checked on its own.
    pub fn check_move_for_top_speed(&self, position: Vec3) -> bool {
        let mut movement = position - self.position;
        if self.top_speed_y > 0.01 && movement.y > self.top_speed_y + 0.5 {
            return false;
        }
        if self.top_speed > 0.01 {
            movement.y = 0.0;
            if movement.length() > self.top_speed + 0.5 {
                return false;
            }
        }
        true
    }

    /// Returns true when this is the first observer.
    pub fn add_witness(&mut self, observer: EntityId) -> bool {
        if self.witnesses.contains(&observer) {
            return false;
        }
        self.witnesses.push(observer);
        self.witnesses.len() == 1
    }

    /// Returns true when the last observer went away.
    pub fn remove_witness(&mut self, observer: EntityId) -> bool {
        let before = self.witnesses.len();
        self.witnesses.retain(|id| *id != observer);
        before == 1 && self.witnesses.is_empty()
    }

    pub fn has_volatile_changes(&self) -> bool {
        self.moved || self.turned
    }

    pub fn clear_changes(&mut self) {
        self.properties.clear_changes();
        self.moved = false;
        self.turned = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity() -> Entity {
        Entity::new_real(1, 1, 1, Vec3::ZERO, Direction3D::default(), PropertyTable::new())
    }

    #[test]
    fn top_speed_allows_slack_and_checks_height_separately() {
        let mut e = entity();
        e.top_speed = 1.0;
        e.top_speed_y = 0.5;
        assert!(e.check_move_for_top_speed(Vec3::new(1.4, 0.0, 0.0)));
        assert!(!e.check_move_for_top_speed(Vec3::new(1.6, 0.0, 0.0)));
        assert!(e.check_move_for_top_speed(Vec3::new(0.0, 0.9, 0.0)));
        assert!(!e.check_move_for_top_speed(Vec3::new(0.0, 1.1, 0.0)));
        assert!(e.check_move_for_top_speed(Vec3::new(0.0, -5.0, 0.0)));
    }

    #[test]
    fn disabled_top_speed_accepts_everything() {
        let e = entity();
        assert!(e.check_move_for_top_speed(Vec3::new(1000.0, 1000.0, 0.0)));
    }

    #[test]
    fn witness_count_transitions() {
        let mut e = entity();
        assert!(e.add_witness(5));
        assert!(!e.add_witness(6));
        assert!(!e.add_witness(6));
        assert!(!e.remove_witness(5));
        assert!(e.remove_witness(6));
        assert!(!e.remove_witness(6));
    }

    #[test]
    fn position_change_marks_volatile_and_dirty() {
        let mut e = entity();
        e.set_position(Vec3::ZERO);
        assert!(!e.has_volatile_changes());
        e.set_position(Vec3::X);
        assert!(e.moved && e.dirty);
        e.clear_changes();
        assert!(!e.has_volatile_changes());
        assert!(e.dirty);
    }
}
