use std::fmt;
use std::sync::Arc;

use crate::engine::assets::format::{FormatTag, classify};
use crate::error::ViewerError;

/// Where an asset's bytes come from.
#[derive(Clone, PartialEq, Eq)]
pub enum Source {
    /// URL or filesystem path, fetched when the load starts.
    Url(String),
    /// Named blob already in memory, e.g. bytes posted over the web bridge.
    Bytes { name: String, data: Arc<[u8]> },
}

impl Source {
    pub fn url(location: impl Into<String>) -> Self {
        Source::Url(location.into())
    }

    pub fn bytes(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        Source::Bytes {
            name: name.into(),
            data: data.into(),
        }
    }

    /// The string the format is derived from.
    pub fn identifier(&self) -> &str {
        match self {
            Source::Url(location) => location,
            Source::Bytes { name, .. } => name,
        }
    }

    pub fn format(&self) -> Result<FormatTag, ViewerError> {
        classify(self.identifier())
    }

    /// Resolve a resource referenced by this asset, such as a glTF buffer.
    ///
    /// Absolute URIs pass through. Relative ones resolve against the directory
    /// of a URL source; in-memory sources have no directory so the URI is
    /// returned unchanged.
    pub fn resolve_relative(&self, uri: &str) -> String {
        if uri.contains("://") || uri.starts_with('/') {
            return uri.to_string();
        }

        match self {
            Source::Url(location) => {
                let base = location.split(['?', '#']).next().unwrap_or(location);
                match base.rfind(['/', '\\']) {
                    Some(index) => join_path(&base[..index], uri),
                    None => uri.to_string(),
                }
            }
            Source::Bytes { .. } => uri.to_string(),
        }
    }
}

/// Join a relative path onto a directory, folding `.` and `..` segments.
pub fn join_path(directory: &str, relative: &str) -> String {
    let (prefix, rest) = match directory.find("://") {
        Some(index) => match directory[index + 3..].find('/') {
            Some(slash) => directory.split_at(index + 3 + slash),
            None => (directory, ""),
        },
        None => ("", directory),
    };

    let mut segments: Vec<&str> = rest.split(['/', '\\']).collect();
    let leading_root = rest.starts_with('/');
    segments.retain(|segment| !segment.is_empty());

    for part in relative.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            _ => segments.push(part),
        }
    }

    let joined = segments.join("/");
    if !prefix.is_empty() || leading_root {
        format!("{prefix}/{joined}")
    } else {
        joined
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(location) => f.debug_tuple("Url").field(location).finish(),
            Source::Bytes { name, data } => f
                .debug_struct("Bytes")
                .field("name", name)
                .field("len", &data.len())
                .finish(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.identifier())
    }
}
