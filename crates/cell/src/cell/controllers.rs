use glam::Vec3;

use crate::controller::{ControllerKind, MotionKind, MoveController, MoveTarget, TurnController};
use crate::error::CellError;
use crate::types::{ControllerId, EntityId};

use super::host::TickHost;
use super::CellApp;

impl CellApp {
    /// Velocities are per second. Starting a movement stops the one already running.
    #[allow(clippy::too_many_arguments)]
    pub fn move_to_point(
        &mut self,
        id: EntityId,
        destination: Vec3,
        velocity: f32,
        distance: f32,
        face_movement: bool,
        move_vertically: bool,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        let mover = MoveController::new(
            MoveTarget::Point(destination.to_array()),
            self.config.per_tick(velocity),
            distance,
            face_movement,
            move_vertically,
        );
        self.add_motion(id, ControllerKind::Move(mover), user_arg)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn move_to_entity(
        &mut self,
        id: EntityId,
        target: EntityId,
        velocity: f32,
        distance: f32,
        face_movement: bool,
        move_vertically: bool,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        let mover = MoveController::new(
            MoveTarget::Entity(target),
            self.config.per_tick(velocity),
            distance,
            face_movement,
            move_vertically,
        );
        self.add_motion(id, ControllerKind::Move(mover), user_arg)
    }

    /// Follows `waypoints` in order; the arrival distance applies to the last one only.
    pub fn navigate(
        &mut self,
        id: EntityId,
        waypoints: Vec<Vec3>,
        velocity: f32,
        distance: f32,
        face_movement: bool,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        let mover = MoveController::new(
            MoveTarget::Path {
                waypoints: waypoints.iter().map(Vec3::to_array).collect(),
                next: 0,
            },
            self.config.per_tick(velocity),
            distance,
            face_movement,
            true,
        );
        self.add_motion(id, ControllerKind::Move(mover), user_arg)
    }

    /// `velocity` is in radians per second.
    pub fn add_yaw_rotator(
        &mut self,
        id: EntityId,
        target_yaw: f32,
        velocity: f32,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        let turn = TurnController::new(target_yaw, self.config.per_tick(velocity));
        self.add_motion(id, ControllerKind::Turn(turn), user_arg)
    }

    fn add_motion(
        &mut self,
        id: EntityId,
        kind: ControllerKind,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        Ok(self.live_real_mut(id)?.controllers.add_motion(kind, user_arg))
    }

    pub fn add_proximity(
        &mut self,
        id: EntityId,
        range_xz: f32,
        range_y: f32,
        user_arg: i32,
    ) -> Result<ControllerId, CellError> {
        self.live_real_mut(id)?
            .controllers
            .add_proximity(range_xz, range_y, user_arg)
    }

    /// Unknown or already released ids only log a warning.
    pub fn cancel_controller(
        &mut self,
        id: EntityId,
        controller: ControllerId,
    ) -> Result<(), CellError> {
        if !self.real_mut(id)?.controllers.cancel(controller) {
            log::warn!(
                "{}",
                CellError::ControllerNotFound {
                    entity: id,
                    controller
                }
            );
        }
        Ok(())
    }

    pub fn stop_move(&mut self, id: EntityId) -> Result<Vec<ControllerId>, CellError> {
        Ok(self.real_mut(id)?.controllers.stop_move())
    }

    /// Adds a per-second acceleration to the running controller of `kind` and returns its new
    /// per-second velocity, or None when no such controller runs.
    pub fn accelerate(
        &mut self,
        id: EntityId,
        kind: MotionKind,
        acceleration: f32,
    ) -> Result<Option<f32>, CellError> {
        let per_tick = self.config.per_tick(acceleration);
        let rate = self.config.tick_rate.max(1) as f32;
        Ok(self
            .live_real_mut(id)?
            .controllers
            .accelerate(kind, per_tick)
            .map(|velocity| velocity * rate))
    }

    pub(super) fn advance_controllers(&mut self) {
        for id in self.arena.real_ids() {
            let (space, mut registry) = match self.arena.get_mut(id) {
                Some(entity) if !entity.is_migrating() && entity.controllers.has_motion() => {
                    (entity.space_id, std::mem::take(&mut entity.controllers))
                }
                _ => continue,
            };
            let events = {
                let mut host = TickHost {
                    entity: id,
                    space,
                    arena: &mut self.arena,
                    spaces: &mut self.spaces,
                };
                registry.advance_motion(&mut host)
            };
            if let Some(entity) = self.arena.get_mut(id) {
                entity.controllers = registry;
            }
            for event in events {
                self.invoke_hook(id, event.into_hook());
            }
        }
    }

    pub(super) fn evaluate_proximity(&mut self) {
        for id in self.arena.real_ids() {
            let (space, mut registry) = match self.arena.get_mut(id) {
                Some(entity) if !entity.is_migrating() && entity.controllers.has_proximity() => {
                    (entity.space_id, std::mem::take(&mut entity.controllers))
                }
                _ => continue,
            };
            let events = {
                let host = TickHost {
                    entity: id,
                    space,
                    arena: &mut self.arena,
                    spaces: &mut self.spaces,
                };
                registry.evaluate_proximity(id, &host)
            };
            if let Some(entity) = self.arena.get_mut(id) {
                entity.controllers = registry;
            }
            for event in events {
                self.invoke_hook(id, event.into_hook());
            }
        }
    }

    /// Empties every trap of the entity so the next evaluation starts from its new place.
    pub(crate) fn reinstall_traps(&mut self, id: EntityId) {
        let events = match self.arena.get_mut(id) {
            Some(entity) => entity.controllers.reset_proximity(),
            None => return,
        };
        for event in events {
            self.invoke_hook(id, event.into_hook());
        }
    }
}
