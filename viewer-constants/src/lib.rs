//! Compiled-in defaults shared by the viewer and its configuration layer.

/// Camera projection, fitting and orbit defaults.
pub mod camera;

/// Load pipeline limits and archive runtime locations.
pub mod loading;
