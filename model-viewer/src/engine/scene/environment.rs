use bevy::asset::LoadState;
use bevy::prelude::*;

use crate::engine::camera::orbit_controller::ViewerCamera;
use crate::engine::core::session::ViewerSession;
use crate::engine::loading::config_loader::ConfigLoader;
use crate::error::ViewerError;

/// Image based lighting, published into the session once both cubemaps
/// have loaded. Failure is not fatal; the scene keeps its direct lights.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum EnvironmentState {
    #[default]
    Pending,
    Ready {
        diffuse: Handle<Image>,
        specular: Handle<Image>,
    },
    Unavailable(ViewerError),
}

impl EnvironmentState {
    pub fn is_pending(&self) -> bool {
        matches!(self, EnvironmentState::Pending)
    }
}

#[derive(Resource, Default)]
pub struct EnvironmentLoader {
    handles: Option<(Handle<Image>, Handle<Image>)>,
    intensity: f32,
    started: bool,
}

/// Start loading the configured cubemaps once the config has resolved.
pub fn start_environment_loading(
    mut loader: ResMut<EnvironmentLoader>,
    mut session: ResMut<ViewerSession>,
    config_loader: Res<ConfigLoader>,
    asset_server: Res<AssetServer>,
) {
    if loader.started || !config_loader.is_resolved() {
        return;
    }
    loader.started = true;

    let Some(environment) = session.config().environment.clone() else {
        session.environment = EnvironmentState::Unavailable(ViewerError::EnvironmentLoadFailure(
            "no environment configured".to_string(),
        ));
        return;
    };

    info!(
        "Loading environment maps: {} / {}",
        environment.diffuse_map, environment.specular_map
    );
    loader.intensity = environment.intensity;
    loader.handles = Some((
        asset_server.load(&environment.diffuse_map),
        asset_server.load(&environment.specular_map),
    ));
}

/// Publish the environment when both maps are in, or record why not.
pub fn poll_environment_loading(
    mut commands: Commands,
    mut loader: ResMut<EnvironmentLoader>,
    mut session: ResMut<ViewerSession>,
    asset_server: Res<AssetServer>,
    cameras: Query<Entity, With<ViewerCamera>>,
) {
    if !session.environment.is_pending() {
        return;
    }
    let Some((diffuse, specular)) = loader.handles.clone() else {
        return;
    };

    let states = [
        asset_server.get_load_state(&diffuse),
        asset_server.get_load_state(&specular),
    ];

    if let Some(Some(LoadState::Failed(error))) = states
        .iter()
        .find(|state| matches!(state, Some(LoadState::Failed(_))))
    {
        let error = ViewerError::EnvironmentLoadFailure(error.to_string());
        warn!("{}", error);
        session.environment = EnvironmentState::Unavailable(error);
        loader.handles = None;
        return;
    }

    if states
        .iter()
        .all(|state| matches!(state, Some(LoadState::Loaded)))
    {
        for camera in &cameras {
            commands.entity(camera).insert(EnvironmentMapLight {
                diffuse_map: diffuse.clone(),
                specular_map: specular.clone(),
                intensity: loader.intensity,
                ..default()
            });
        }
        info!("✓ Environment lighting ready");
        session.environment = EnvironmentState::Ready { diffuse, specular };
    }
}
