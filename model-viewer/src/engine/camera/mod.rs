//! Viewer camera: rig state, fitting and orbit input.
//!
//! The rig lives in the session; systems here copy it onto the camera
//! entity and feed mouse input into it.

/// Bounding-box and content-aware camera fits.
///
/// Derives placement, clip planes and orbit limits from the loaded content's
/// bounds. Only called after a successful load.
pub mod fit;

/// Camera entity setup and mouse orbit/zoom systems.
pub mod orbit_controller;

/// Perspective camera plus orbit controller state.
pub mod rig;
