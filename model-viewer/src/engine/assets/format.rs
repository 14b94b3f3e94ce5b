use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ViewerError;

/// Closed set of container formats the viewer can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Fbx,
    Gltf,
    Glb,
    Ply,
    /// USDZ package. Populates a caller-supplied container and stays alive
    /// as an animated instance.
    Usdz,
}

/// How the camera is framed once a node of this format is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitStrategy {
    BoundingBox,
    ContentAware,
}

impl FormatTag {
    pub const ALL: [FormatTag; 5] = [
        FormatTag::Fbx,
        FormatTag::Gltf,
        FormatTag::Glb,
        FormatTag::Ply,
        FormatTag::Usdz,
    ];

    /// Map a lowercase extension to its format tag.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension {
            "fbx" => Some(FormatTag::Fbx),
            "gltf" => Some(FormatTag::Gltf),
            "glb" => Some(FormatTag::Glb),
            "ply" => Some(FormatTag::Ply),
            "usdz" => Some(FormatTag::Usdz),
            _ => None,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            FormatTag::Fbx => "fbx",
            FormatTag::Gltf => "gltf",
            FormatTag::Glb => "glb",
            FormatTag::Ply => "ply",
            FormatTag::Usdz => "usdz",
        }
    }

    pub fn is_archive(self) -> bool {
        matches!(self, FormatTag::Usdz)
    }

    pub fn fit_strategy(self) -> FitStrategy {
        if self.is_archive() {
            FitStrategy::ContentAware
        } else {
            FitStrategy::BoundingBox
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Classify a URL, path or file name by the extension of its last segment.
///
/// Query strings and fragments are ignored and matching is case-insensitive.
/// A segment without an alphanumeric extension is an invalid source; an
/// extension outside [`FormatTag::ALL`] is unsupported.
pub fn classify(identifier: &str) -> Result<FormatTag, ViewerError> {
    let extension = file_extension(identifier)
        .ok_or_else(|| ViewerError::InvalidSource(identifier.to_string()))?;

    FormatTag::from_extension(&extension).ok_or(ViewerError::UnsupportedFormat { extension })
}

/// Lowercase extension of the final path segment, if there is one.
pub fn file_extension(identifier: &str) -> Option<String> {
    let path = identifier
        .split(['?', '#'])
        .next()
        .unwrap_or(identifier);
    let segment = path.rsplit(['/', '\\']).next().unwrap_or(path);
    let (_, extension) = segment.rsplit_once('.')?;

    if extension.is_empty() || !extension.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    Some(extension.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_every_supported_extension() {
        for tag in FormatTag::ALL {
            let name = format!("models/asset.{}", tag.extension());
            assert_eq!(classify(&name), Ok(tag));
        }
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        assert_eq!(classify("Robot.GLB"), Ok(FormatTag::Glb));
        assert_eq!(classify("scan.Ply"), Ok(FormatTag::Ply));
    }

    #[test]
    fn url_query_and_fragment_are_ignored() {
        assert_eq!(
            classify("https://cdn.example.com/a/b/plane.usdz?token=abc.def#view"),
            Ok(FormatTag::Usdz)
        );
    }

    #[test]
    fn missing_extension_is_invalid_source() {
        assert_eq!(
            classify("http://host/model"),
            Err(ViewerError::InvalidSource("http://host/model".into()))
        );
        assert!(matches!(classify("folder.v2/model"), Err(ViewerError::InvalidSource(_))));
        assert!(matches!(classify("trailing."), Err(ViewerError::InvalidSource(_))));
    }

    #[test]
    fn unknown_extension_is_unsupported() {
        assert_eq!(
            classify("asset.xyz"),
            Err(ViewerError::UnsupportedFormat {
                extension: "xyz".into()
            })
        );
    }

    #[test]
    fn only_archives_use_the_content_aware_fit() {
        for tag in FormatTag::ALL {
            let expected = if tag == FormatTag::Usdz {
                FitStrategy::ContentAware
            } else {
                FitStrategy::BoundingBox
            };
            assert_eq!(tag.fit_strategy(), expected);
        }
    }
}
