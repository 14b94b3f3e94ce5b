use bevy::asset::AssetMetaCheck;
use bevy::diagnostic::FrameTimeDiagnosticsPlugin;
use bevy::prelude::*;
use bevy_common_assets::json::JsonAssetPlugin;
use std::sync::Arc;

use crate::constants::render_settings::CLEAR_COLOR;
use crate::engine::assets::config::ViewerConfig;
use crate::engine::camera::orbit_controller::{
    apply_camera_rig, orbit_camera_controller, spawn_viewer_camera,
};
use crate::engine::core::session::ViewerSession;
use crate::engine::core::window_config::create_window_config;
use crate::engine::loading::config_loader::{
    ConfigLoader, InitialSource, apply_loaded_config, start_config_loading,
};
use crate::engine::loading::fetch::PlatformFetcher;
use crate::engine::loading::systems::{
    LoadStateChanged, ViewerCommand, handle_viewer_commands, poll_active_load,
};
use crate::engine::render::render_loop::{
    advance_render_loop, end_render_frame, exit_on_stop, handle_window_resize,
};
use crate::engine::scene::environment::{
    EnvironmentLoader, poll_environment_loading, start_environment_loading,
};
use crate::engine::scene::grid::{create_ground, sync_grid_visibility};
use crate::engine::scene::lighting::spawn_lighting;
use crate::engine::scene::spawn::sync_scene_entities;
use crate::engine::systems::fps_tracking::{
    fps_notification_system, load_state_notification_system,
};
use crate::rpc::web_rpc::WebRpcPlugin;

#[cfg(not(target_arch = "wasm32"))]
use crate::engine::systems::fps_tracking::{create_native_overlays, fps_text_update_system};

pub fn create_app(initial: InitialSource) -> App {
    let mut app = App::new();

    app.add_plugins(create_default_plugins())
        .add_plugins(FrameTimeDiagnosticsPlugin::default())
        // Registers ViewerConfig as a loadable asset type from *.viewer.json files.
        .add_plugins(JsonAssetPlugin::<ViewerConfig>::new(&["viewer.json"]))
        .add_plugins(WebRpcPlugin)
        .insert_resource(ClearColor(CLEAR_COLOR));

    // Initialise resources early
    app.insert_resource(ViewerSession::new(
        ViewerConfig::default(),
        Arc::new(PlatformFetcher),
    ))
    .insert_resource(initial)
    .init_resource::<ConfigLoader>()
    .init_resource::<EnvironmentLoader>()
    .add_event::<ViewerCommand>()
    .add_event::<LoadStateChanged>();

    app.add_systems(Startup, (setup, start_config_loading).chain());

    // Loading first so a finished load is spawned and framed in the same frame.
    app.add_systems(
        Update,
        (
            apply_loaded_config,
            handle_viewer_commands,
            poll_active_load,
            advance_render_loop,
            sync_scene_entities,
            handle_window_resize,
            orbit_camera_controller,
            apply_camera_rig,
        )
            .chain(),
    )
    .add_systems(
        Update,
        (
            start_environment_loading,
            poll_environment_loading,
            sync_grid_visibility,
            load_state_notification_system,
            fps_notification_system,
        )
            .chain()
            .after(apply_camera_rig),
    )
    .add_systems(Last, (end_render_frame, exit_on_stop).chain());

    #[cfg(not(target_arch = "wasm32"))]
    {
        app.add_systems(Update, fps_text_update_system);
    }

    app
}

// Startup system that only handles basic initialisation
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    session: Res<ViewerSession>,
) {
    info!("=== MODEL VIEWER ===");

    spawn_viewer_camera(&mut commands, &session.rig);
    spawn_lighting(&mut commands);
    create_ground(
        &mut commands,
        &mut meshes,
        &mut materials,
        session.config().show_grid,
    );

    #[cfg(not(target_arch = "wasm32"))]
    {
        create_native_overlays(&mut commands);
    }
}

fn create_default_plugins() -> impl PluginGroup {
    let window_config = WindowPlugin {
        primary_window: Some(create_window_config()),
        ..default()
    };

    let asset_config = AssetPlugin {
        meta_check: AssetMetaCheck::Never,
        ..default()
    };

    DefaultPlugins.set(window_config).set(asset_config)
}
