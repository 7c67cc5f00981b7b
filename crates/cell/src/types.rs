use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize};

pub type EntityId = u32;
pub type EntityTypeId = u16;
pub type ProcessId = u32;
pub type SpaceId = u32;
pub type ControllerId = u32;
pub type TimerId = u32;
pub type PropertyId = u16;
pub type MethodId = u16;
pub type CallId = u64;

pub const NO_ENTITY: EntityId = 0;

pub fn normalize_angle(angle: f32) -> f32 {
    let two_pi = std::f32::consts::TAU;
    let mut normalized = angle % two_pi;
    if normalized > std::f32::consts::PI {
        normalized -= two_pi;
    } else if normalized < -std::f32::consts::PI {
        normalized += two_pi;
    }
    normalized
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Direction3D {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl Direction3D {
    pub fn new(roll: f32, pitch: f32, yaw: f32) -> Self {
        Self { roll, pitch, yaw }
    }

    pub fn from_yaw(yaw: f32) -> Self {
        Self {
            roll: 0.0,
            pitch: 0.0,
            yaw: normalize_angle(yaw),
        }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.roll, self.pitch, self.yaw]
    }

    pub fn from_array(values: [f32; 3]) -> Self {
        Self::new(values[0], values[1], values[2])
    }
}

pub fn yaw_of(movement: Vec3) -> f32 {
    movement.x.atan2(movement.z)
}

pub fn pitch_of(movement: Vec3) -> f32 {
    let horizontal = (movement.x * movement.x + movement.z * movement.z).sqrt();
    -movement.y.atan2(horizontal)
}

/// Distance used by AOI and range queries: xz-plane only unless the y axis is tracked.
pub fn planar_distance(a: Vec3, b: Vec3, has_y: bool) -> f32 {
    if has_y {
        a.distance(b)
    } else {
        let dx = a.x - b.x;
        let dz = a.z - b.z;
        (dx * dx + dz * dz).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_normalization_wraps_into_pi_range() {
        assert!((normalize_angle(std::f32::consts::PI * 3.0).abs() - std::f32::consts::PI).abs() < 1e-4);
        assert!((normalize_angle(-0.5) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn planar_distance_ignores_height_without_y_axis() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(3.0, 100.0, 4.0);
        assert!((planar_distance(a, b, false) - 5.0).abs() < 1e-5);
        assert!(planar_distance(a, b, true) > 100.0);
    }
}
