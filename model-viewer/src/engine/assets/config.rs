use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use viewer_constants::{camera, loading};

use crate::engine::camera::fit::FitSettings;

/// Viewer settings loaded from `*.viewer.json`.
/// Every key is optional; anything absent keeps the compiled-in default.
#[derive(Asset, TypePath, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Asset opened at startup when no source is given on the command line.
    pub default_source: Option<String>,
    pub fov_degrees: f32,
    pub fit_offset: f32,
    pub near_clamp: f32,
    pub far_clamp: f32,
    pub orbit_min_distance: f32,
    pub orbit_max_distance: f32,
    /// Zero disables the timeout.
    pub load_timeout_secs: f64,
    pub archive_runtime_path: String,
    pub environment: Option<EnvironmentConfig>,
    pub show_grid: bool,
    pub show_fps: bool,
}

/// Prefiltered cubemaps used for image based lighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentConfig {
    pub diffuse_map: String,
    pub specular_map: String,
    #[serde(default = "default_environment_intensity")]
    pub intensity: f32,
}

fn default_environment_intensity() -> f32 {
    900.0
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            default_source: None,
            fov_degrees: camera::DEFAULT_FOV_DEGREES,
            fit_offset: camera::FIT_OFFSET,
            near_clamp: camera::NEAR_CLAMP,
            far_clamp: camera::FAR_CLAMP,
            orbit_min_distance: camera::ORBIT_MIN_DISTANCE,
            orbit_max_distance: camera::ORBIT_MAX_DISTANCE,
            load_timeout_secs: loading::LOAD_TIMEOUT_SECS,
            archive_runtime_path: loading::ARCHIVE_RUNTIME_PATH.to_string(),
            environment: None,
            show_grid: true,
            show_fps: true,
        }
    }
}

impl ViewerConfig {
    pub fn fit_settings(&self) -> FitSettings {
        FitSettings {
            fov_degrees: self.fov_degrees,
            fit_offset: self.fit_offset,
            near_clamp: self.near_clamp,
            far_clamp: self.far_clamp,
            orbit_min_distance: self.orbit_min_distance,
            orbit_max_distance: self.orbit_max_distance,
            min_extent: camera::MIN_FIT_EXTENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: ViewerConfig =
            serde_json::from_str(r#"{ "fit_offset": 2.0, "show_grid": false }"#).unwrap();
        assert_eq!(config.fit_offset, 2.0);
        assert!(!config.show_grid);
        assert_eq!(config.fov_degrees, camera::DEFAULT_FOV_DEGREES);
        assert_eq!(config.archive_runtime_path, loading::ARCHIVE_RUNTIME_PATH);
    }

    #[test]
    fn environment_intensity_has_a_default() {
        let config: ViewerConfig = serde_json::from_str(
            r#"{ "environment": { "diffuse_map": "d.ktx2", "specular_map": "s.ktx2" } }"#,
        )
        .unwrap();
        let environment = config.environment.unwrap();
        assert_eq!(environment.intensity, 900.0);
    }

    #[test]
    fn shipped_config_parses() {
        let raw = include_str!("../../../assets/default.viewer.json");
        let config: ViewerConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.orbit_min_distance, 100.0);
        assert_eq!(config.orbit_max_distance, 800.0);
    }
}
