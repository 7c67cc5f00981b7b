use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

use crate::types::{pitch_of, yaw_of, EntityId};

use super::ControllerHost;

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum MoveTarget {
    Point([f32; 3]),
    Entity(EntityId),
    Path { waypoints: Vec<[f32; 3]>, next: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Moving,
    Arrived,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct MoveController {
    pub target: MoveTarget,
    /// Distance covered per tick.
    pub velocity: f32,
    /// Stop this far short of the destination.
    pub distance: f32,
    pub face_movement: bool,
    pub move_vertically: bool,
}

impl MoveController {
    pub fn new(target: MoveTarget, velocity: f32, distance: f32, face_movement: bool, move_vertically: bool) -> Self {
        Self {
            target,
            velocity: velocity.max(0.0),
            distance: distance.max(0.0),
            face_movement,
            move_vertically,
        }
    }

    fn destination(&self, host: &dyn ControllerHost) -> Option<Vec3> {
        match &self.target {
            MoveTarget::Point(point) => Some(Vec3::from_array(*point)),
            MoveTarget::Entity(id) => host.entity_position(*id),
            MoveTarget::Path { waypoints, next } => {
                waypoints.get(*next as usize).map(|p| Vec3::from_array(*p))
            }
        }
    }

    fn on_final_leg(&self) -> bool {
        match &self.target {
            MoveTarget::Path { waypoints, next } => *next as usize + 1 >= waypoints.len(),
            _ => true,
        }
    }

    /// Advances one tick toward the destination.
    pub fn step(&mut self, host: &mut dyn ControllerHost) -> StepOutcome {
        let Some(destination) = self.destination(host) else {
            return StepOutcome::Failed;
        };
        let current = host.position();
        let mut direction = host.direction();

        let mut movement = destination - current;
        if !self.move_vertically {
            movement.y = 0.0;
        }

        let arrival_distance = if self.on_final_leg() { self.distance } else { 0.0 };
        let reached = movement.length() < self.velocity + arrival_distance;
        let next_position = if reached {
            let mut position = destination;
            if arrival_distance > 0.0 {
                position -= movement.normalize_or_zero() * arrival_distance;
            }
            if !self.move_vertically {
                position.y = current.y;
            }
            position
        } else {
            current + movement.normalize_or_zero() * self.velocity
        };

        if self.face_movement && (movement.x != 0.0 || movement.z != 0.0) {
            direction.yaw = yaw_of(movement);
            if self.move_vertically {
                direction.pitch = pitch_of(movement);
            }
        }
        host.set_position_and_direction(next_position, direction);

        if !reached {
            return StepOutcome::Moving;
        }
        match &mut self.target {
            MoveTarget::Path { waypoints, next } if (*next as usize + 1) < waypoints.len() => {
                *next += 1;
                StepOutcome::Moving
            }
            _ => StepOutcome::Arrived,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::tests::TestHost;

    #[test]
    fn moves_by_velocity_then_lands_short_of_destination() {
        let mut host = TestHost::at(Vec3::ZERO);
        let mut mover = MoveController::new(MoveTarget::Point([10.0, 5.0, 0.0]), 4.0, 1.0, true, false);

        assert_eq!(mover.step(&mut host), StepOutcome::Moving);
        assert!((host.position - Vec3::new(4.0, 0.0, 0.0)).length() < 1e-5);
        assert!((host.direction.yaw - std::f32::consts::FRAC_PI_2).abs() < 1e-5);

        assert_eq!(mover.step(&mut host), StepOutcome::Moving);
        // 2 remaining < 4 + 1: placed at the destination minus the arrival distance, height kept.
        assert_eq!(mover.step(&mut host), StepOutcome::Arrived);
        assert!((host.position - Vec3::new(9.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn vanished_target_entity_fails() {
        let mut host = TestHost::at(Vec3::ZERO);
        host.others.insert(7, Vec3::new(100.0, 0.0, 0.0));
        let mut mover = MoveController::new(MoveTarget::Entity(7), 1.0, 0.0, false, false);
        assert_eq!(mover.step(&mut host), StepOutcome::Moving);
        host.others.clear();
        assert_eq!(mover.step(&mut host), StepOutcome::Failed);
    }

    #[test]
    fn path_visits_each_waypoint() {
        let mut host = TestHost::at(Vec3::ZERO);
        let mut mover = MoveController::new(
            MoveTarget::Path {
                waypoints: vec![[1.0, 0.0, 0.0], [1.0, 0.0, 1.0]],
                next: 0,
            },
            5.0,
            0.0,
            false,
            false,
        );
        assert_eq!(mover.step(&mut host), StepOutcome::Moving);
        assert_eq!(host.position, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(mover.step(&mut host), StepOutcome::Arrived);
        assert_eq!(host.position, Vec3::new(1.0, 0.0, 1.0));
    }
}
