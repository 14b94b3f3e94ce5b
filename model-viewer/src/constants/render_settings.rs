use bevy::prelude::*;

pub const CLEAR_COLOR: Color = Color::WHITE;

/// Sky/ground ambient approximation of a white over dark-grey hemisphere light
pub const AMBIENT_COLOR: Color = Color::srgb(0.85, 0.85, 0.85);
pub const AMBIENT_BRIGHTNESS: f32 = 600.0;

pub const DIRECTIONAL_ILLUMINANCE: f32 = 8_000.0;
pub const DIRECTIONAL_LIGHT_POSITION: Vec3 = Vec3::new(0.0, 200.0, 100.0);

pub const GROUND_PLANE_SIZE: f32 = 2000.0;
pub const GRID_SIZE: f32 = 2000.0;
pub const GRID_DIVISIONS: u32 = 20;
pub const GRID_OPACITY: f32 = 0.2;
pub const GRID_COLOR: Color = Color::srgba(0.27, 0.27, 0.27, GRID_OPACITY);

/// Lifts the grid off the ground plane to avoid z-fighting
pub const GRID_HEIGHT_OFFSET: f32 = 0.01;

pub const FPS_TEXT_SIZE: f32 = 16.0;
pub const FPS_NOTIFICATION_INTERVAL_SECS: f32 = 0.5;
