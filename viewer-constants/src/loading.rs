/// Seconds an in-flight load may run before it is cancelled
pub const LOAD_TIMEOUT_SECS: f64 = 60.0;

/// Fallback root for archive sublayers that are not packaged inside the archive
pub const ARCHIVE_RUNTIME_PATH: &str = "/wasm";

/// Sublayer nesting deeper than this is treated as a cycle
pub const MAX_SUBLAYER_DEPTH: usize = 8;

/// Default timeline rate for archives that do not author one
pub const DEFAULT_TIME_CODES_PER_SECOND: f64 = 24.0;

/// Configuration asset loaded at startup, relative to the asset root
pub const DEFAULT_CONFIG_PATH: &str = "default.viewer.json";
