/// Vertical field of view used by every fit, in degrees
pub const DEFAULT_FOV_DEGREES: f32 = 45.0;

/// Near plane applied by the bounding-box fit
pub const NEAR_CLAMP: f32 = 1.0;

/// Far plane applied by the bounding-box fit
pub const FAR_CLAMP: f32 = 5000.0;

/// Orbit distance limits installed by the bounding-box fit
pub const ORBIT_MIN_DISTANCE: f32 = 100.0;
pub const ORBIT_MAX_DISTANCE: f32 = 800.0;

/// Padding multiplier applied by the content-aware fit
pub const FIT_OFFSET: f32 = 1.5;

/// Smallest extent a fit will frame, keeps degenerate boxes at a positive distance
pub const MIN_FIT_EXTENT: f32 = 1.0e-3;

/// Startup camera placement before any content is loaded
pub const INITIAL_CAMERA_POSITION: [f32; 3] = [0.0, 50.0, 350.0];
pub const INITIAL_NEAR: f32 = 1.0;
pub const INITIAL_FAR: f32 = 2000.0;

/// Mouse sensitivities for the orbit controller (radians per pixel)
pub const ORBIT_YAW_SENSITIVITY: f32 = 0.0035;
pub const ORBIT_PITCH_SENSITIVITY: f32 = 0.0030;

/// Pitch stays just short of the poles so `looking_at` keeps a valid up vector
pub const ORBIT_PITCH_LIMIT: f32 = 1.55;

/// Fractional distance change per wheel line
pub const ZOOM_STEP: f32 = 0.1;
