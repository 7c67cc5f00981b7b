use std::collections::BTreeMap;

use rkyv::{rancor, Archive, Deserialize, Serialize};

use crate::error::{CellError, CodecError};
use crate::types::{ControllerId, EntityId};

use super::movement::{MoveController, StepOutcome};
use super::proximity::ProximityController;
use super::turn::TurnController;
use super::{ControllerEvent, ControllerHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ControllerState {
    Idle,
    Active,
    Arrived,
    Cancelled,
    Failed,
}

impl ControllerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Arrived | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum ControllerKind {
    Move(MoveController),
    Turn(TurnController),
    Proximity(ProximityController),
}

impl ControllerKind {
    pub fn is_motion(&self) -> bool {
        matches!(self, Self::Move(_) | Self::Turn(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionKind {
    Move,
    Turn,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Controller {
    pub id: ControllerId,
    pub state: ControllerState,
    pub user_arg: i32,
    pub kind: ControllerKind,
}

/// Per-entity controllers. Released ids sit in quarantine until `end_tick`.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct ControllerRegistry {
    next_id: ControllerId,
    free: Vec<ControllerId>,
    quarantine: Vec<ControllerId>,
    controllers: BTreeMap<ControllerId, Controller>,
}

impl Default for ControllerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ControllerRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            free: Vec::new(),
            quarantine: Vec::new(),
            controllers: BTreeMap::new(),
        }
    }

    fn allocate(&mut self) -> ControllerId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn release(&mut self, id: ControllerId) {
        self.quarantine.push(id);
    }

    fn install(&mut self, kind: ControllerKind, user_arg: i32) -> ControllerId {
        let id = self.allocate();
        self.controllers.insert(
            id,
            Controller {
                id,
                state: ControllerState::Idle,
                user_arg,
                kind,
            },
        );
        id
    }

    /// Starts a movement or turn controller, stopping whichever one was running.
    pub fn add_motion(&mut self, kind: ControllerKind, user_arg: i32) -> ControllerId {
        self.stop_move();
        self.install(kind, user_arg)
    }

    pub fn add_proximity(
        &mut self,
        range_xz: f32,
        range_y: f32,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        let valid = |range: f32| range.is_finite() && range > 0.0;
        if !valid(range_xz) || !valid(range_y) {
            return Err(CellError::InvalidRange { range_xz, range_y });
        }
        Ok(self.install(
            ControllerKind::Proximity(ProximityController::new(range_xz, range_y)),
            user_arg,
        ))
    }

    /// Returns false for ids that are unknown or already released.
    pub fn cancel(&mut self, id: ControllerId) -> bool {
        match self.controllers.remove(&id) {
            Some(_) => {
                self.release(id);
                true
            }
            None => false,
        }
    }

    pub fn stop_move(&mut self) -> Vec<ControllerId> {
        let motion: Vec<ControllerId> = self
            .controllers
            .values()
            .filter(|c| c.kind.is_motion())
            .map(|c| c.id)
            .collect();
        for id in &motion {
            self.cancel(*id);
        }
        motion
    }

    /// Adds a per-tick acceleration to the active controller of that kind and returns the new
    /// per-tick velocity.
    pub fn accelerate(&mut self, kind: MotionKind, acceleration: f32) -> Option<f32> {
        self.controllers
            .values_mut()
            .find_map(|controller| match (&mut controller.kind, kind) {
                (ControllerKind::Move(mover), MotionKind::Move) => {
                    mover.velocity = (mover.velocity + acceleration).max(0.0);
                    Some(mover.velocity)
                }
                (ControllerKind::Turn(turn), MotionKind::Turn) => {
                    turn.velocity = (turn.velocity + acceleration).max(0.0);
                    Some(turn.velocity)
                }
                _ => None,
            })
    }

    /// Steps every movement and turn controller once. Terminal controllers are removed
    /// before the events are returned.
    pub fn advance_motion(&mut self, host: &mut dyn ControllerHost) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        let mut finished = Vec::new();
        for controller in self.controllers.values_mut() {
            if !controller.kind.is_motion() {
                continue;
            }
            controller.state = ControllerState::Active;
            let controller_id = controller.id;
            let user_arg = controller.user_arg;
            let outcome = match &mut controller.kind {
                ControllerKind::Move(mover) => {
                    let outcome = mover.step(host);
                    if outcome != StepOutcome::Failed {
                        events.push(ControllerEvent::Moved { controller: controller_id, user_arg });
                    }
                    outcome
                }
                ControllerKind::Turn(turn) => turn.step(host),
                ControllerKind::Proximity(_) => continue,
            };
            match (outcome, &controller.kind) {
                (StepOutcome::Moving, _) => {}
                (StepOutcome::Arrived, ControllerKind::Turn(_)) => {
                    controller.state = ControllerState::Arrived;
                    events.push(ControllerEvent::TurnOver { controller: controller_id, user_arg });
                    finished.push(controller_id);
                }
                (StepOutcome::Arrived, _) => {
                    controller.state = ControllerState::Arrived;
                    events.push(ControllerEvent::MoveOver { controller: controller_id, user_arg });
                    finished.push(controller_id);
                }
                (StepOutcome::Failed, _) => {
                    controller.state = ControllerState::Failed;
                    events.push(ControllerEvent::MoveFailure { controller: controller_id, user_arg });
                    finished.push(controller_id);
                }
            }
        }
        for id in finished {
            self.controllers.remove(&id);
            self.release(id);
        }
        events
    }

    pub fn evaluate_proximity(
        &mut self,
        owner: EntityId,
        host: &dyn ControllerHost,
    ) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        for controller in self.controllers.values_mut() {
            let ControllerKind::Proximity(trap) = &mut controller.kind else {
                continue;
            };
            controller.state = ControllerState::Active;
            let changes = trap.evaluate(owner, host);
            for other in changes.left {
                events.push(ControllerEvent::LeaveTrap {
                    controller: controller.id,
                    other,
                    range_xz: trap.range_xz,
                    range_y: trap.range_y,
                    user_arg: controller.user_arg,
                });
            }
            for other in changes.entered {
                events.push(ControllerEvent::EnterTrap {
                    controller: controller.id,
                    other,
                    range_xz: trap.range_xz,
                    range_y: trap.range_y,
                    user_arg: controller.user_arg,
                });
            }
        }
        events
    }

    /// Empties every trap, reporting a leave for each occupant. The next evaluation then
    /// re-enters whoever is still inside.
    pub fn reset_proximity(&mut self) -> Vec<ControllerEvent> {
        let mut events = Vec::new();
        for controller in self.controllers.values_mut() {
            let ControllerKind::Proximity(trap) = &mut controller.kind else {
                continue;
            };
            for other in trap.reset() {
                events.push(ControllerEvent::LeaveTrap {
                    controller: controller.id,
                    other,
                    range_xz: trap.range_xz,
                    range_y: trap.range_y,
                    user_arg: controller.user_arg,
                });
            }
        }
        events
    }

    pub fn has_proximity(&self) -> bool {
        self.controllers
            .values()
            .any(|c| matches!(c.kind, ControllerKind::Proximity(_)))
    }

    pub fn has_motion(&self) -> bool {
        self.controllers.values().any(|c| c.kind.is_motion())
    }

    pub fn end_tick(&mut self) {
        self.free.append(&mut self.quarantine);
    }

    pub fn get(&self, id: ControllerId) -> Option<&Controller> {
        self.controllers.get(&id)
    }

    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
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
    use glam::Vec3;

    use super::*;
    use crate::controller::movement::MoveTarget;
    use crate::controller::tests::TestHost;

    fn mover(x: f32) -> ControllerKind {
        ControllerKind::Move(MoveController::new(MoveTarget::Point([x, 0.0, 0.0]), 1.0, 0.0, false, false))
    }

    #[test]
    fn ids_never_zero_and_not_reused_within_tick() {
        let mut registry = ControllerRegistry::new();
        let first = registry.add_proximity(1.0, 1.0, 0).unwrap();
        assert_eq!(first, 1);
        assert!(registry.cancel(first));
        let second = registry.add_proximity(1.0, 1.0, 0).unwrap();
        assert_ne!(second, first);

        registry.end_tick();
        let third = registry.add_proximity(1.0, 1.0, 0).unwrap();
        assert_eq!(third, first);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut registry = ControllerRegistry::new();
        let id = registry.add_motion(mover(5.0), 0);
        assert!(registry.cancel(id));
        assert!(!registry.cancel(id));
        assert!(!registry.cancel(42));
        assert!(registry.is_empty());
    }

    #[test]
    fn new_motion_stops_previous_one() {
        let mut registry = ControllerRegistry::new();
        let first = registry.add_motion(mover(5.0), 0);
        let trap = registry.add_proximity(2.0, 2.0, 0).unwrap();
        let second = registry.add_motion(ControllerKind::Turn(TurnController::new(1.0, 0.1)), 0);
        assert!(registry.get(first).is_none());
        assert!(registry.get(trap).is_some());
        assert!(registry.get(second).is_some());
    }

    #[test]
    fn non_positive_range_rejected() {
        let mut registry = ControllerRegistry::new();
        assert!(matches!(
            registry.add_proximity(0.0, 1.0, 0),
            Err(CellError::InvalidRange { .. })
        ));
        assert!(registry.add_proximity(3.0, -1.0, 0).is_err());
        assert!(registry.add_proximity(f32::INFINITY, 1.0, 0).is_err());
        assert!(registry.add_proximity(1.0, f32::NAN, 0).is_err());
    }

    #[test]
    fn arrival_removes_controller_and_reports_events() {
        let mut host = TestHost::at(Vec3::ZERO);
        let mut registry = ControllerRegistry::new();
        let id = registry.add_motion(mover(1.5), 9);

        let events = registry.advance_motion(&mut host);
        assert_eq!(events, vec![ControllerEvent::Moved { controller: id, user_arg: 9 }]);
        let events = registry.advance_motion(&mut host);
        assert_eq!(
            events,
            vec![
                ControllerEvent::Moved { controller: id, user_arg: 9 },
                ControllerEvent::MoveOver { controller: id, user_arg: 9 },
            ]
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn accelerate_changes_active_velocity() {
        let mut registry = ControllerRegistry::new();
        assert_eq!(registry.accelerate(MotionKind::Move, 1.0), None);
        registry.add_motion(mover(50.0), 0);
        assert_eq!(registry.accelerate(MotionKind::Move, 0.5), Some(1.5));
        assert_eq!(registry.accelerate(MotionKind::Turn, 0.5), None);
    }

    #[test]
    fn snapshot_restores_free_list_and_controllers() {
        let mut registry = ControllerRegistry::new();
        let a = registry.add_motion(mover(5.0), 1);
        registry.add_proximity(4.0, 2.0, 2).unwrap();
        registry.cancel(a);

        let bytes = registry.to_bytes().unwrap();
        let restored = ControllerRegistry::from_bytes(&bytes).unwrap();
        assert_eq!(restored, registry);
        assert_eq!(restored.to_bytes().unwrap(), bytes);
    }
}
