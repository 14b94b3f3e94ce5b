//! Asset identity and viewer configuration.
//!
//! Describes where a model comes from, which container format it uses,
//! how large it is once loaded, and the settings asset read at startup.

/// Axis-aligned bounds of loaded content in world coordinates.
pub mod bounds;

/// Viewer settings asset loaded from JSON through the asset server.
pub mod config;

/// Closed set of supported formats and the extension classifier.
///
/// Pure functions only; classification never touches the network.
pub mod format;

/// URL and in-memory byte sources plus relative resource resolution.
pub mod source;
