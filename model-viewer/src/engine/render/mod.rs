//! Frame driving for the viewer.

/// Session-owned render loop, frame timing, resize and stop handling.
pub mod render_loop;
