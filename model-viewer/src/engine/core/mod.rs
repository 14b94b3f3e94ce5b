//! Core application setup and the viewer session.
//!
//! Builds the Bevy app for native and WASM targets and owns the per-viewer
//! state every system works against.

/// Application setup and plugin configuration for the Bevy engine.
///
/// Registers the config asset type, the RPC bridge and the loading,
/// render loop and camera systems in frame order.
pub mod app_setup;

/// Load coordinator, camera rig, render loop and environment state of one viewer.
pub mod session;

/// Platform-specific window configuration for native and WASM builds.
///
/// Configures canvas integration for web targets and vsync settings.
pub mod window_config;
