mod movement;
mod proximity;
mod registry;
mod turn;

use glam::Vec3;

use crate::script::Hook;
use crate::types::{ControllerId, Direction3D, EntityId};

pub use movement::{MoveController, MoveTarget, StepOutcome};
pub use proximity::{ProximityController, TrapChanges};
pub use registry::{Controller, ControllerKind, ControllerRegistry, ControllerState, MotionKind};
pub use turn::TurnController;

/// The view of the world a controller is allowed while it runs.
pub trait ControllerHost {
    fn position(&self) -> Vec3;
    fn direction(&self) -> Direction3D;
    fn set_position_and_direction(&mut self, position: Vec3, direction: Direction3D);
    /// Position of another entity in the same space, if it still exists.
    fn entity_position(&self, id: EntityId) -> Option<Vec3>;
    fn entities_in_box(&self, center: Vec3, range_xz: f32, range_y: f32) -> Vec<EntityId>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControllerEvent {
    Moved {
        controller: ControllerId,
        user_arg: i32,
    },
    MoveOver {
        controller: ControllerId,
        user_arg: i32,
    },
    MoveFailure {
        controller: ControllerId,
        user_arg: i32,
    },
    TurnOver {
        controller: ControllerId,
        user_arg: i32,
    },
    EnterTrap {
        controller: ControllerId,
        other: EntityId,
        range_xz: f32,
        range_y: f32,
        user_arg: i32,
    },
    LeaveTrap {
        controller: ControllerId,
        other: EntityId,
        range_xz: f32,
        range_y: f32,
        user_arg: i32,
    },
}

impl ControllerEvent {
    pub fn into_hook(self) -> Hook {
        match self {
            Self::Moved { controller, user_arg } => Hook::OnMove { controller, user_arg },
            Self::MoveOver { controller, user_arg } => Hook::OnMoveOver { controller, user_arg },
            Self::MoveFailure { controller, user_arg } => Hook::OnMoveFailure { controller, user_arg },
            Self::TurnOver { controller, user_arg } => Hook::OnTurn { controller, user_arg },
            Self::EnterTrap {
                controller,
                other,
                range_xz,
                range_y,
                user_arg,
            } => Hook::OnEnterTrap {
                other,
                range_xz,
                range_y,
                controller,
                user_arg,
            },
            Self::LeaveTrap {
                controller,
                other,
                range_xz,
                range_y,
                user_arg,
            } => Hook::OnLeaveTrap {
                other,
                range_xz,
                range_y,
                controller,
                user_arg,
            },
        }
    }
}
