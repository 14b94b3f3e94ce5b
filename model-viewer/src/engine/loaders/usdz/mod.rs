//! USDZ packages.
//!
//! A package is an uncompressed zip whose first USD entry is the root layer.
//! Only text layers are read; binary crate layers are rejected. Sublayers
//! are looked up inside the package first and then under the runtime path
//! the loader was constructed with.

/// Layer composition and scene building.
pub mod archive;

/// Text layer tokenizer and parser.
pub mod usda;

use bevy::prelude::*;
use bevy::tasks::BoxedFuture;
use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use thiserror::Error;
use viewer_constants::loading::MAX_SUBLAYER_DEPTH;

use crate::engine::assets::format::FormatTag;
use crate::engine::assets::source::join_path;
use crate::engine::loading::fetch::LoadRequest;
use crate::engine::loading::registry::{LoadOutput, ModelLoader};
use crate::engine::scene::node::{NodeBehaviour, SceneContainer};
use crate::error::LoadError;
use archive::{build_scene, compose};
use usda::{Layer, UsdaError, parse_layer};

const CRATE_MAGIC: &[u8] = b"PXR-USDC";

#[derive(Debug, Error)]
pub enum UsdzError {
    #[error("not a zip package: {0}")]
    NotZip(String),
    #[error("package has no USD layer")]
    NoRootLayer,
    #[error("`{0}` is a binary crate layer, only text layers are supported")]
    BinaryLayer(String),
    #[error("`{0}` is not valid UTF-8")]
    InvalidUtf8(String),
    #[error("`{path}`: {source}")]
    Layer { path: String, source: UsdaError },
    #[error("{0}")]
    InvalidGeometry(String),
    #[error("package contains no renderable geometry")]
    NoGeometry,
}

impl From<UsdzError> for LoadError {
    fn from(error: UsdzError) -> Self {
        LoadError::parse(FormatTag::Usdz, error)
    }
}

/// Files of an unpacked package keyed by their path inside it.
struct Package {
    files: HashMap<String, Vec<u8>>,
    root: String,
}

impl Package {
    fn read(bytes: &[u8]) -> Result<Self, UsdzError> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| UsdzError::NotZip(e.to_string()))?;

        let mut files = HashMap::new();
        let mut root = None;
        for index in 0..archive.len() {
            let mut file = archive
                .by_index(index)
                .map_err(|e| UsdzError::NotZip(e.to_string()))?;
            if file.is_dir() {
                continue;
            }
            let name = file.name().trim_start_matches("./").to_string();
            let mut data = Vec::with_capacity(initial_capacity(file.size(), bytes.len()));
            file.read_to_end(&mut data)
                .map_err(|e| UsdzError::NotZip(e.to_string()))?;

            if root.is_none() && is_layer(&name) {
                root = Some(name.clone());
            }
            files.insert(name, data);
        }

        Ok(Self {
            files,
            root: root.ok_or(UsdzError::NoRootLayer)?,
        })
    }

    fn get(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }
}

/// Reservation for an entry whose header declares `declared` bytes. Stored
/// entries never exceed the archive; deflated ones grow as they inflate.
fn initial_capacity(declared: u64, archive_len: usize) -> usize {
    declared.min(archive_len as u64) as usize
}

fn is_layer(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".usda") || lower.ends_with(".usdc") || lower.ends_with(".usd")
}

fn directory_of(path: &str) -> &str {
    path.rfind('/').map_or("", |index| &path[..index])
}

fn decode_layer(path: &str, bytes: &[u8]) -> Result<Layer, UsdzError> {
    if path.to_ascii_lowercase().ends_with(".usdc") || bytes.starts_with(CRATE_MAGIC) {
        return Err(UsdzError::BinaryLayer(path.to_string()));
    }
    let text =
        std::str::from_utf8(bytes).map_err(|_| UsdzError::InvalidUtf8(path.to_string()))?;
    parse_layer(text).map_err(|source| UsdzError::Layer {
        path: path.to_string(),
        source,
    })
}

/// Loader for `.usdz` packages.
///
/// Fills the caller's container and always hands back an animated node;
/// packages without time samples simply never move.
#[derive(Debug, Clone)]
pub struct UsdzLoader {
    runtime_path: String,
}

impl UsdzLoader {
    pub fn new(runtime_path: &str) -> Self {
        Self {
            runtime_path: runtime_path.trim_end_matches('/').to_string(),
        }
    }

    /// Root layer followed by its sublayers, strongest first.
    async fn gather_layers(
        &self,
        request: &LoadRequest,
        package: &Package,
    ) -> Result<Vec<Layer>, UsdzError> {
        let root_bytes = package.get(&package.root).ok_or(UsdzError::NoRootLayer)?;
        let root = decode_layer(&package.root, root_bytes)?;

        let mut layers = Vec::new();
        let mut visited = HashSet::from([package.root.clone()]);
        let mut pending = vec![(package.root.clone(), root, 0usize)];

        while let Some((path, layer, depth)) = pending.pop() {
            let directory = directory_of(&path).to_string();
            let sub_layers = layer.metadata.sub_layers.clone();
            layers.push(layer);

            let mut children = Vec::new();
            for reference in &sub_layers {
                let key = join_path(&directory, reference);
                if depth + 1 > MAX_SUBLAYER_DEPTH {
                    warn!("Sublayer {} exceeds the nesting limit, skipped", key);
                    continue;
                }
                if !visited.insert(key.clone()) {
                    warn!("Sublayer {} is already part of the stack, skipped", key);
                    continue;
                }

                let bytes = match package.get(&key) {
                    Some(bytes) => bytes.to_vec(),
                    None => {
                        let location = join_path(&self.runtime_path, &key);
                        match request.fetch(&location).await {
                            Ok(bytes) => bytes,
                            Err(e) => {
                                warn!("Sublayer {} unavailable: {}", key, e);
                                continue;
                            }
                        }
                    }
                };
                children.push((key.clone(), decode_layer(&key, &bytes)?, depth + 1));
            }
            // Depth first, earlier sublayers stronger than later ones.
            pending.extend(children.into_iter().rev());
        }

        Ok(layers)
    }
}

impl ModelLoader for UsdzLoader {
    fn load_into<'a>(
        &'a self,
        request: LoadRequest,
        mut container: SceneContainer,
    ) -> BoxedFuture<'a, Result<LoadOutput, LoadError>> {
        Box::pin(async move {
            let bytes = request.bytes().await?;
            let package = Package::read(&bytes)?;
            let layers = self.gather_layers(&request, &package).await?;
            let layer_count = layers.len();

            let stage = compose(layers);
            let scene =
                build_scene(&stage, container.len()).map_err(UsdzError::InvalidGeometry)?;
            if scene.primitives.is_empty() {
                return Err(UsdzError::NoGeometry.into());
            }

            info!(
                "Archive {} composed from {} layer(s): {} primitive(s){}",
                request.source(),
                layer_count,
                scene.primitives.len(),
                if scene.instance.is_time_varying() { ", animated" } else { "" }
            );
            for primitive in scene.primitives {
                container.push(primitive);
            }
            Ok((container, NodeBehaviour::Animated(Box::new(scene.instance))))
        })
    }
}
