use bevy::asset::LoadState;
use bevy::prelude::*;
use viewer_constants::loading::DEFAULT_CONFIG_PATH;

use crate::engine::assets::config::ViewerConfig;
use crate::engine::assets::source::Source;
use crate::engine::core::session::ViewerSession;
use crate::engine::loading::systems::ViewerCommand;

/// Startup inputs that take precedence over the config file.
#[derive(Resource, Debug, Clone, Default)]
pub struct InitialSource {
    pub source: Option<String>,
    pub config_path: Option<String>,
}

#[derive(Resource, Default)]
pub struct ConfigLoader {
    handle: Option<Handle<ViewerConfig>>,
    resolved: bool,
}

impl ConfigLoader {
    /// True once the config was applied or given up on.
    pub fn is_resolved(&self) -> bool {
        self.resolved
    }
}

// Start the config load
pub fn start_config_loading(
    mut config_loader: ResMut<ConfigLoader>,
    initial: Res<InitialSource>,
    asset_server: Res<AssetServer>,
) {
    let path = initial
        .config_path
        .clone()
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    info!("Loading viewer config from: {}", path);
    config_loader.handle = Some(asset_server.load(&path));
}

// Apply the config when ready, then open the initial source
pub fn apply_loaded_config(
    mut config_loader: ResMut<ConfigLoader>,
    mut session: ResMut<ViewerSession>,
    mut viewer_commands: EventWriter<ViewerCommand>,
    initial: Res<InitialSource>,
    asset_server: Res<AssetServer>,
    configs: Res<Assets<ViewerConfig>>,
) {
    if config_loader.resolved {
        return;
    }
    let Some(handle) = config_loader.handle.clone() else {
        return;
    };

    if let Some(config) = configs.get(&handle) {
        info!("✓ Viewer config loaded");
        session.apply_config(config.clone());
    } else if let Some(LoadState::Failed(error)) = asset_server.get_load_state(&handle) {
        warn!("Viewer config unavailable, using defaults: {}", error);
    } else {
        return;
    }
    config_loader.resolved = true;

    let source = initial
        .source
        .clone()
        .or_else(|| session.config().default_source.clone());
    if let Some(location) = source {
        viewer_commands.write(ViewerCommand::Load(Source::url(location)));
    }
}
