use thiserror::Error;

use crate::engine::assets::format::FormatTag;

/// Failures surfaced to the viewer session.
///
/// Every variant is recorded on the load coordinator instead of being
/// propagated; the render loop keeps running whatever happens here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ViewerError {
    #[error("invalid source `{0}`: no file extension")]
    InvalidSource(String),

    #[error("unsupported format `.{extension}`")]
    UnsupportedFormat { extension: String },

    #[error("loader failed: {0}")]
    LoaderFailure(#[from] LoadError),

    #[error("environment map unavailable: {0}")]
    EnvironmentLoadFailure(String),
}

/// Failures raised inside a loader task.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("failed to fetch `{location}`: {reason}")]
    Fetch { location: String, reason: String },

    #[error("{format} parse error: {message}")]
    Parse { format: FormatTag, message: String },

    #[error("load timed out after {0:.1}s")]
    TimedOut(f64),

    #[error("{0}")]
    Other(String),
}

impl LoadError {
    pub fn fetch(location: impl Into<String>, reason: impl ToString) -> Self {
        Self::Fetch {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn parse(format: FormatTag, message: impl ToString) -> Self {
        Self::Parse {
            format,
            message: message.to_string(),
        }
    }
}
