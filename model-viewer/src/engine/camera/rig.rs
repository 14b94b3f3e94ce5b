use bevy::prelude::*;
use bevy::render::camera::PerspectiveProjection;
use viewer_constants::camera::{
    DEFAULT_FOV_DEGREES, INITIAL_CAMERA_POSITION, INITIAL_FAR, INITIAL_NEAR, ORBIT_PITCH_LIMIT,
    ZOOM_STEP,
};

/// Perspective camera plus orbit controller state.
///
/// `near`, `far`, `min_distance` and `max_distance` are derived by the camera
/// fitter after each successful load. User input only moves `position`
/// around `target`, within the distance limits.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraRig {
    pub position: Vec3,
    pub target: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
    pub min_distance: f32,
    pub max_distance: f32,
}

impl Default for CameraRig {
    fn default() -> Self {
        Self {
            position: Vec3::from_array(INITIAL_CAMERA_POSITION),
            target: Vec3::ZERO,
            fov_y: DEFAULT_FOV_DEGREES.to_radians(),
            aspect: 16.0 / 9.0,
            near: INITIAL_NEAR,
            far: INITIAL_FAR,
            min_distance: 0.0,
            max_distance: f32::INFINITY,
        }
    }
}

impl CameraRig {
    pub fn distance(&self) -> f32 {
        self.position.distance(self.target)
    }

    /// Unit view direction, looking down -Z when position and target coincide.
    pub fn view_direction(&self) -> Vec3 {
        (self.target - self.position)
            .try_normalize()
            .unwrap_or(Vec3::NEG_Z)
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if width > 0.0 && height > 0.0 {
            self.aspect = width / height;
        }
    }

    /// Rotate around the target by yaw and pitch deltas in radians.
    pub fn orbit(&mut self, yaw_delta: f32, pitch_delta: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }

        let yaw = offset.x.atan2(offset.z) + yaw_delta;
        let pitch = ((offset.y / radius).clamp(-1.0, 1.0).asin() + pitch_delta)
            .clamp(-ORBIT_PITCH_LIMIT, ORBIT_PITCH_LIMIT);

        self.position = self.target
            + radius
                * Vec3::new(
                    pitch.cos() * yaw.sin(),
                    pitch.sin(),
                    pitch.cos() * yaw.cos(),
                );
    }

    /// Dolly toward (positive) or away from (negative) the target by wheel
    /// lines, clamped to the orbit distance limits.
    pub fn zoom(&mut self, lines: f32) {
        let offset = self.position - self.target;
        let direction = offset.try_normalize().unwrap_or(Vec3::Z);
        let distance = offset.length() * (1.0 - ZOOM_STEP).powf(lines);
        let distance = distance.max(self.min_distance).min(self.max_distance);
        self.position = self.target + direction * distance;
    }

    pub fn transform(&self) -> Transform {
        let up = if self.view_direction().abs_diff_eq(Vec3::Y, 1e-4)
            || self.view_direction().abs_diff_eq(Vec3::NEG_Y, 1e-4)
        {
            Vec3::Z
        } else {
            Vec3::Y
        };
        Transform::from_translation(self.position).looking_at(self.target, up)
    }

    pub fn projection(&self) -> PerspectiveProjection {
        PerspectiveProjection {
            fov: self.fov_y,
            aspect_ratio: self.aspect,
            near: self.near,
            far: self.far,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn orbit_keeps_distance_to_target() {
        let mut rig = CameraRig {
            position: Vec3::new(0.0, 0.0, 10.0),
            ..default()
        };
        rig.orbit(std::f32::consts::FRAC_PI_2, 0.3);
        assert_relative_eq!(rig.distance(), 10.0, epsilon = 1e-4);
        assert!(rig.position.x > 0.0);
        assert!(rig.position.y > 0.0);
    }

    #[test]
    fn orbit_pitch_stops_short_of_the_pole() {
        let mut rig = CameraRig {
            position: Vec3::new(0.0, 0.0, 10.0),
            ..default()
        };
        rig.orbit(0.0, 10.0);
        assert!(rig.position.y < 10.0);
        assert_relative_eq!(rig.position.y, 10.0 * ORBIT_PITCH_LIMIT.sin(), epsilon = 1e-3);
    }

    #[test]
    fn zoom_respects_orbit_limits() {
        let mut rig = CameraRig {
            position: Vec3::new(0.0, 0.0, 200.0),
            min_distance: 100.0,
            max_distance: 800.0,
            ..default()
        };
        rig.zoom(100.0);
        assert_relative_eq!(rig.distance(), 100.0, epsilon = 1e-3);
        rig.zoom(-100.0);
        assert_relative_eq!(rig.distance(), 800.0, epsilon = 1e-2);
    }

    #[test]
    fn resize_updates_aspect() {
        let mut rig = CameraRig::default();
        rig.set_aspect(800.0, 400.0);
        assert_eq!(rig.aspect, 2.0);
        rig.set_aspect(800.0, 0.0);
        assert_eq!(rig.aspect, 2.0);
    }
}
