//! Runtime diagnostics and frontend notifications.
//!
//! Tracks frame rate for the native overlay and pushes FPS and load state
//! updates to the embedding page over RPC.

/// FPS overlay, FPS notifications and load state notifications.
pub mod fps_tracking;
