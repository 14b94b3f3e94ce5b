use bevy::prelude::*;
use viewer_constants::camera;

use crate::engine::assets::bounds::ModelBounds;
use crate::engine::camera::rig::CameraRig;

/// Inputs shared by both fit variants.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSettings {
    pub fov_degrees: f32,
    pub fit_offset: f32,
    pub near_clamp: f32,
    pub far_clamp: f32,
    pub orbit_min_distance: f32,
    pub orbit_max_distance: f32,
    /// Extent used in place of a smaller or empty box.
    pub min_extent: f32,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            fov_degrees: camera::DEFAULT_FOV_DEGREES,
            fit_offset: camera::FIT_OFFSET,
            near_clamp: camera::NEAR_CLAMP,
            far_clamp: camera::FAR_CLAMP,
            orbit_min_distance: camera::ORBIT_MIN_DISTANCE,
            orbit_max_distance: camera::ORBIT_MAX_DISTANCE,
            min_extent: camera::MIN_FIT_EXTENT,
        }
    }
}

/// Distance at which a box of `max_dimension` fills a `fov_degrees` frustum.
pub fn bounding_box_distance(max_dimension: f32, fov_degrees: f32, min_extent: f32) -> f32 {
    let half_fov = (fov_degrees * 0.5).to_radians();
    max_dimension.max(min_extent) / half_fov.tan()
}

/// Generic fit: builds a fresh rig looking at the box center from +Z with
/// fixed clip planes and orbit limits.
pub fn fit_bounding_box(bounds: &ModelBounds, aspect: f32, settings: &FitSettings) -> CameraRig {
    let center = bounds.center();
    let distance =
        bounding_box_distance(bounds.max_dimension(), settings.fov_degrees, settings.min_extent);

    CameraRig {
        position: center + Vec3::Z * distance,
        target: center,
        fov_y: settings.fov_degrees.to_radians(),
        aspect,
        near: settings.near_clamp,
        far: settings.far_clamp,
        min_distance: settings.orbit_min_distance,
        max_distance: settings.orbit_max_distance,
    }
}

/// Distance used by the content-aware fit for a box of `max_dimension`.
pub fn content_distance(
    max_dimension: f32,
    fov_degrees: f32,
    aspect: f32,
    settings: &FitSettings,
) -> f32 {
    let max_size = max_dimension.max(settings.min_extent);
    let fit_height_distance =
        max_size / (2.0 * (std::f32::consts::PI * fov_degrees / 360.0).tan());
    let fit_width_distance = if aspect > 0.0 {
        fit_height_distance / aspect
    } else {
        fit_height_distance
    };
    settings.fit_offset * fit_height_distance.max(fit_width_distance)
}

/// Archive fit: retargets the existing rig onto the box, keeps the current
/// view direction and derives clip planes and the maximum orbit distance
/// from the fitted distance.
pub fn fit_to_content(rig: &mut CameraRig, bounds: &ModelBounds, settings: &FitSettings) {
    let center = bounds.center();
    let fov_degrees = rig.fov_y.to_degrees();
    let distance = content_distance(bounds.max_dimension(), fov_degrees, rig.aspect, settings);
    let direction = rig.view_direction() * distance;

    rig.max_distance = 10.0 * distance;
    rig.min_distance = rig.min_distance.min(distance);
    rig.target = center;
    rig.near = distance / 100.0;
    rig.far = distance * 100.0;
    rig.position = rig.target - direction;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cube(size: f32) -> ModelBounds {
        ModelBounds::new(Vec3::splat(-size * 0.5), Vec3::splat(size * 0.5))
    }

    #[test]
    fn unit_cube_distance_matches_half_fov() {
        let distance = bounding_box_distance(1.0, 45.0, 1e-3);
        assert_relative_eq!(distance, 1.0 / 22.5f32.to_radians().tan(), epsilon = 1e-5);
        assert!(distance > 0.0);
    }

    #[test]
    fn bounding_box_distance_grows_with_extent() {
        let mut previous = 0.0;
        for size in [0.5, 1.0, 2.0, 10.0, 250.0] {
            let distance = bounding_box_distance(size, 45.0, 1e-3);
            assert!(distance > previous);
            previous = distance;
        }
    }

    #[test]
    fn bounding_box_fit_builds_a_fresh_rig() {
        let settings = FitSettings::default();
        let bounds = ModelBounds::new(Vec3::new(9.0, 0.0, -1.0), Vec3::new(11.0, 2.0, 1.0));
        let rig = fit_bounding_box(&bounds, 1.5, &settings);

        assert_eq!(rig.target, Vec3::new(10.0, 1.0, 0.0));
        assert_relative_eq!(rig.position.x, 10.0);
        assert!(rig.position.z > 0.0);
        assert_eq!(rig.near, 1.0);
        assert_eq!(rig.far, 5000.0);
        assert_eq!(rig.min_distance, 100.0);
        assert_eq!(rig.max_distance, 800.0);
        assert_eq!(rig.aspect, 1.5);
    }

    #[test]
    fn degenerate_boxes_still_get_a_positive_distance() {
        let settings = FitSettings::default();
        let point = ModelBounds::new(Vec3::ONE, Vec3::ONE);
        let rig = fit_bounding_box(&point, 1.0, &settings);
        assert!(rig.distance() > 0.0);

        let mut rig = CameraRig::default();
        fit_to_content(&mut rig, &ModelBounds::EMPTY, &settings);
        assert!(rig.distance() > 0.0);
        assert!(rig.near > 0.0 && rig.near < rig.far);
    }

    #[test]
    fn content_fit_derives_clip_planes_and_orbit_limit() {
        let settings = FitSettings::default();
        let mut rig = CameraRig {
            aspect: 1.0,
            ..default()
        };
        fit_to_content(&mut rig, &cube(10.0), &settings);

        let expected = 1.5 * 10.0 / (2.0 * 22.5f32.to_radians().tan());
        assert_relative_eq!(rig.distance(), expected, epsilon = 1e-3);
        assert!(0.0 < rig.near && rig.near < rig.far);
        assert_relative_eq!(rig.near, expected / 100.0, epsilon = 1e-5);
        assert_relative_eq!(rig.far, expected * 100.0, epsilon = 1e-1);
        assert_relative_eq!(rig.max_distance, expected * 10.0, epsilon = 1e-2);
        assert_eq!(rig.target, Vec3::ZERO);
    }

    #[test]
    fn content_fit_keeps_the_view_direction() {
        let settings = FitSettings::default();
        let mut rig = CameraRig {
            position: Vec3::new(0.0, 50.0, 350.0),
            target: Vec3::ZERO,
            ..default()
        };
        let before = rig.view_direction();
        let bounds = cube(4.0).union(&ModelBounds::new(Vec3::splat(20.0), Vec3::splat(22.0)));
        fit_to_content(&mut rig, &bounds, &settings);

        assert!(rig.view_direction().abs_diff_eq(before, 1e-4));
        assert_ne!(rig.target, Vec3::ZERO);
    }

    #[test]
    fn narrow_viewports_push_the_camera_back() {
        let settings = FitSettings::default();
        let wide = content_distance(10.0, 45.0, 2.0, &settings);
        let narrow = content_distance(10.0, 45.0, 0.5, &settings);
        assert!(narrow > wide);
    }
}
