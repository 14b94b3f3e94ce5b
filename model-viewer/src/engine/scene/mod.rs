//! Scene content and furniture.
//!
//! Holds the normalized representation of loaded models, keyframe
//! animation helpers, and the ground, grid, lights and environment
//! surrounding the model.

/// Keyframe tracks, looping time and hierarchy composition for animated content.
pub mod animation;

/// Image based lighting state and cubemap loading systems.
pub mod environment;

/// Ground plane and line grid.
pub mod grid;

/// Ambient and directional scene lights.
pub mod lighting;

/// Scene nodes, primitives, containers and the animator contract.
pub mod node;

/// Mirrors the active asset set into Bevy entities.
///
/// Spawns new nodes, despawns disposed ones and writes animated transforms.
pub mod spawn;
