use bevy::core_pipeline::tonemapping::Tonemapping;
use bevy::input::mouse::{MouseMotion, MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use viewer_constants::camera::{ORBIT_PITCH_SENSITIVITY, ORBIT_YAW_SENSITIVITY};

use crate::engine::camera::rig::CameraRig;
use crate::engine::core::session::ViewerSession;

#[derive(Component)]
pub struct ViewerCamera;

pub fn spawn_viewer_camera(commands: &mut Commands, rig: &CameraRig) {
    commands.spawn((
        Camera3d::default(),
        rig.transform(),
        Projection::Perspective(rig.projection()),
        Tonemapping::AcesFitted,
        ViewerCamera,
    ));
}

/// Left-drag orbits around the rig target, the wheel zooms within the
/// rig's orbit distance limits.
pub fn orbit_camera_controller(
    mut session: ResMut<ViewerSession>,
    mouse_button: Res<ButtonInput<MouseButton>>,
    mut mouse_motion: EventReader<MouseMotion>,
    mut scroll_events: EventReader<MouseWheel>,
) {
    let mouse_delta: Vec2 = mouse_motion.read().map(|m| m.delta).sum();

    if mouse_button.pressed(MouseButton::Left) && mouse_delta != Vec2::ZERO {
        session.rig.orbit(
            -mouse_delta.x * ORBIT_YAW_SENSITIVITY,
            mouse_delta.y * ORBIT_PITCH_SENSITIVITY,
        );
    }

    // Mouse wheel scroll accumulation (pixel and line scroll)
    let mut scroll_accum = 0.0;
    for ev in scroll_events.read() {
        scroll_accum += match ev.unit {
            MouseScrollUnit::Line => ev.y,
            MouseScrollUnit::Pixel => ev.y * 0.05,
        };
    }

    if scroll_accum.abs() > f32::EPSILON {
        session.rig.zoom(scroll_accum);
    }
}

/// Copy the rig onto the camera entity every frame.
pub fn apply_camera_rig(
    session: Res<ViewerSession>,
    mut cameras: Query<(&mut Transform, &mut Projection), With<ViewerCamera>>,
) {
    for (mut transform, mut projection) in &mut cameras {
        *transform = session.rig.transform();
        *projection = Projection::Perspective(session.rig.projection());
    }
}
