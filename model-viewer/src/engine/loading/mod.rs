//! Model loading pipeline.
//!
//! Requests flow from [`systems::ViewerCommand`] into the single-flight
//! [`coordinator::LoadCoordinator`], which resolves a loader from the
//! [`registry::LoaderRegistry`] and runs it on the IO task pool.

/// Viewer config asset loading and initial source selection.
pub mod config_loader;

/// Single-flight load state machine owning the active asset set.
///
/// Disposes previous content before each load, polls the loader task and
/// applies the camera fit on success.
pub mod coordinator;

/// Byte fetching for URLs, local paths and in-memory blobs.
pub mod fetch;

/// Format tag to loader lookup and the container attach adapter.
pub mod registry;

/// Bevy systems turning commands into loads and reporting state changes.
pub mod systems;
