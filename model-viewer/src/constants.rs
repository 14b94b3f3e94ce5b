/// Scene furniture, lighting and overlay settings
pub mod render_settings;
