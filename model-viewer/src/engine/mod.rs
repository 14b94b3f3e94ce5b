pub mod assets;
pub mod camera;
pub mod core;
pub mod loaders;
pub mod loading;
pub mod render;
pub mod scene;
pub mod systems;
