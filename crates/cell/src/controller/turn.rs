use rkyv::{Archive, Deserialize, Serialize};

use crate::types::normalize_angle;

use super::movement::StepOutcome;
use super::ControllerHost;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct TurnController {
    pub target_yaw: f32,
    /// Radians per tick.
    pub velocity: f32,
}

impl TurnController {
    pub fn new(target_yaw: f32, velocity: f32) -> Self {
        Self {
            target_yaw: normalize_angle(target_yaw),
            velocity: velocity.abs(),
        }
    }

    /// Rotates toward the target yaw along the shorter direction.
    pub fn step(&mut self, host: &mut dyn ControllerHost) -> StepOutcome {
        let mut direction = host.direction();
        let remaining = normalize_angle(self.target_yaw - direction.yaw);
        let position = host.position();
        if remaining.abs() <= self.velocity {
            direction.yaw = self.target_yaw;
            host.set_position_and_direction(position, direction);
            return StepOutcome::Arrived;
        }
        direction.yaw = normalize_angle(direction.yaw + self.velocity * remaining.signum());
        host.set_position_and_direction(position, direction);
        StepOutcome::Moving
    }
}
