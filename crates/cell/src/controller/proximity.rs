use std::collections::BTreeSet;

use rkyv::{Archive, Deserialize, Serialize};

use crate::types::EntityId;

use super::ControllerHost;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ProximityController {
    pub range_xz: f32,
    pub range_y: f32,
    pub inside: BTreeSet<EntityId>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct TrapChanges {
    pub entered: Vec<EntityId>,
    pub left: Vec<EntityId>,
}

impl ProximityController {
    pub fn new(range_xz: f32, range_y: f32) -> Self {
        Self {
            range_xz,
            range_y,
            inside: BTreeSet::new(),
        }
    }

    /// Diffs the box around the owner against the previous occupants. Occupants that no
    /// longer exist leave by id.
    pub fn evaluate(&mut self, owner: EntityId, host: &dyn ControllerHost) -> TrapChanges {
        let current: BTreeSet<EntityId> = host
            .entities_in_box(host.position(), self.range_xz, self.range_y)
            .into_iter()
            .filter(|id| *id != owner)
            .collect();

        let changes = TrapChanges {
            entered: current.difference(&self.inside).copied().collect(),
            left: self.inside.difference(&current).copied().collect(),
        };
        self.inside = current;
        changes
    }

    /// Empties the trap so the next evaluation starts fresh.
    pub fn reset(&mut self) -> Vec<EntityId> {
        std::mem::take(&mut self.inside).into_iter().collect()
    }
}
