//! Multi-format 3D model viewer built on Bevy.
//!
//! Loads FBX, glTF/GLB, PLY and USDZ models from a URL or in-memory bytes,
//! frames the camera on the result and renders it with orbit controls, a
//! ground grid and image based lighting. On the web the viewer is driven by
//! its host page over JSON-RPC.

pub mod constants;
pub mod engine;
pub mod error;
pub mod rpc;
