use bevy::prelude::*;
use std::sync::Arc;

use crate::engine::assets::config::ViewerConfig;
use crate::engine::assets::source::Source;
use crate::engine::camera::fit::FitSettings;
use crate::engine::camera::rig::CameraRig;
use crate::engine::loading::coordinator::{LoadCoordinator, LoadEvent, LoadState, RequestOutcome};
use crate::engine::loading::fetch::SourceFetcher;
use crate::engine::loading::registry::LoaderRegistry;
use crate::engine::render::render_loop::{FrameReport, RenderLoop};
use crate::engine::scene::environment::EnvironmentState;
use crate::error::ViewerError;

/// Everything one viewer instance owns: load state and the active asset
/// set (through the coordinator), the camera rig, the render loop and the
/// environment lighting state.
#[derive(Resource)]
pub struct ViewerSession {
    pub coordinator: LoadCoordinator,
    pub rig: CameraRig,
    pub render_loop: RenderLoop,
    pub environment: EnvironmentState,
    config: ViewerConfig,
    fit: FitSettings,
    default_registry: bool,
}

impl ViewerSession {
    /// Session with the built-in loader for every supported format.
    pub fn new(config: ViewerConfig, fetcher: Arc<dyn SourceFetcher>) -> Self {
        let registry = LoaderRegistry::with_defaults(&config.archive_runtime_path);
        let mut session = Self::with_registry(config, registry, fetcher);
        session.default_registry = true;
        session
    }

    pub fn with_registry(
        config: ViewerConfig,
        registry: LoaderRegistry,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> Self {
        let coordinator =
            LoadCoordinator::new(registry, fetcher).with_timeout(config.load_timeout_secs);
        let rig = CameraRig {
            fov_y: config.fov_degrees.to_radians(),
            ..default()
        };

        Self {
            coordinator,
            rig,
            render_loop: RenderLoop::default(),
            environment: EnvironmentState::Pending,
            fit: config.fit_settings(),
            config,
            default_registry: false,
        }
    }

    pub fn config(&self) -> &ViewerConfig {
        &self.config
    }

    pub fn fit_settings(&self) -> &FitSettings {
        &self.fit
    }

    /// Swap in settings loaded after startup.
    pub fn apply_config(&mut self, config: ViewerConfig) {
        if self.default_registry && config.archive_runtime_path != self.config.archive_runtime_path
        {
            self.coordinator
                .set_registry(LoaderRegistry::with_defaults(&config.archive_runtime_path));
        }
        self.coordinator.set_timeout(config.load_timeout_secs);
        self.rig.fov_y = config.fov_degrees.to_radians();
        self.fit = config.fit_settings();
        self.config = config;
    }

    pub fn request_load(&mut self, source: Source, now: f64) -> RequestOutcome {
        self.coordinator.request_load(source, now)
    }

    pub fn poll_load(&mut self, now: f64) -> Option<LoadEvent> {
        self.coordinator.poll(now, &mut self.rig, &self.fit)
    }

    pub fn clear(&mut self) {
        self.coordinator.clear();
    }

    pub fn load_state(&self) -> LoadState {
        self.coordinator.state()
    }

    pub fn error(&self) -> Option<&ViewerError> {
        self.coordinator.error()
    }

    pub fn is_model_visible(&self) -> bool {
        self.coordinator.is_model_visible()
    }

    pub fn step(&mut self, now: f64) -> Option<FrameReport> {
        self.render_loop
            .step(now, self.coordinator.active_nodes_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::loading::fetch::MemoryFetcher;

    #[test]
    fn config_updates_fit_settings_and_projection() {
        let mut session = ViewerSession::new(ViewerConfig::default(), Arc::new(MemoryFetcher::new()));
        assert_eq!(session.load_state(), LoadState::Idle);
        assert!(!session.is_model_visible());

        session.apply_config(ViewerConfig {
            fov_degrees: 60.0,
            orbit_max_distance: 1200.0,
            ..default()
        });
        assert_eq!(session.fit_settings().orbit_max_distance, 1200.0);
        assert!((session.rig.fov_y - 60f32.to_radians()).abs() < 1e-6);
    }

    #[test]
    fn environment_starts_pending() {
        let session = ViewerSession::new(ViewerConfig::default(), Arc::new(MemoryFetcher::new()));
        assert!(matches!(session.environment, EnvironmentState::Pending));
    }
}
