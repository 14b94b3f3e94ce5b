use bevy::prelude::*;
use bevy::tasks::BoxedFuture;
use std::collections::HashMap;
use std::sync::Arc;

use crate::engine::assets::format::FormatTag;
use crate::engine::loaders::{fbx::FbxParser, gltf::GltfParser, ply::PlyParser, usdz::UsdzLoader};
use crate::engine::loading::fetch::LoadRequest;
use crate::engine::scene::node::{NodeBehaviour, ParsedModel, SceneContainer};
use crate::error::{LoadError, ViewerError};

/// Filled container plus the lifecycle of the content placed in it.
pub type LoadOutput = (SceneContainer, NodeBehaviour);

/// Uniform contract the coordinator invokes: populate `container` from the
/// request's source.
pub trait ModelLoader: Send + Sync + 'static {
    fn load_into<'a>(
        &'a self,
        request: LoadRequest,
        container: SceneContainer,
    ) -> BoxedFuture<'a, Result<LoadOutput, LoadError>>;
}

/// Parser that builds a standalone model from a source.
pub trait NodeParser: Send + Sync + 'static {
    fn parse<'a>(&'a self, request: LoadRequest) -> BoxedFuture<'a, Result<ParsedModel, LoadError>>;
}

/// Adapts a [`NodeParser`] to the container contract by attaching the
/// freshly parsed model into the caller's container.
pub struct AttachToContainer<P>(pub P);

impl<P: NodeParser> ModelLoader for AttachToContainer<P> {
    fn load_into<'a>(
        &'a self,
        request: LoadRequest,
        mut container: SceneContainer,
    ) -> BoxedFuture<'a, Result<LoadOutput, LoadError>> {
        Box::pin(async move {
            let model = self.0.parse(request).await?;
            let behaviour = container.attach(model);
            Ok((container, behaviour))
        })
    }
}

/// Format tag to loader lookup.
#[derive(Default, Clone)]
pub struct LoaderRegistry {
    loaders: HashMap<FormatTag, Arc<dyn ModelLoader>>,
}

impl LoaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with a loader for every supported format.
    /// `archive_runtime_path` is where archive sublayers are looked up when
    /// the archive does not package them.
    pub fn with_defaults(archive_runtime_path: &str) -> Self {
        let mut registry = Self::new();
        registry.register_parser(FormatTag::Fbx, FbxParser);
        registry.register_parser(FormatTag::Gltf, GltfParser);
        registry.register_parser(FormatTag::Glb, GltfParser);
        registry.register_parser(FormatTag::Ply, PlyParser);
        registry.register(FormatTag::Usdz, UsdzLoader::new(archive_runtime_path));
        registry
    }

    pub fn register(&mut self, tag: FormatTag, loader: impl ModelLoader) {
        if self.loaders.insert(tag, Arc::new(loader)).is_some() {
            debug!("Replaced loader for .{}", tag);
        }
    }

    pub fn register_parser(&mut self, tag: FormatTag, parser: impl NodeParser) {
        self.register(tag, AttachToContainer(parser));
    }

    pub fn resolve(&self, tag: FormatTag) -> Result<Arc<dyn ModelLoader>, ViewerError> {
        self.loaders
            .get(&tag)
            .cloned()
            .ok_or_else(|| ViewerError::UnsupportedFormat {
                extension: tag.extension().to_string(),
            })
    }

    pub fn supports(&self, tag: FormatTag) -> bool {
        self.loaders.contains_key(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::assets::source::Source;
    use crate::engine::loading::fetch::MemoryFetcher;
    use crate::engine::scene::node::{MaterialDesc, Primitive};
    use bevy::tasks::block_on;

    struct CubeParser;

    impl NodeParser for CubeParser {
        fn parse<'a>(
            &'a self,
            _request: LoadRequest,
        ) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
            Box::pin(async {
                Ok(ParsedModel::new(vec![Primitive {
                    name: "cube".into(),
                    mesh: Mesh::from(Cuboid::new(1.0, 1.0, 1.0)),
                    material: MaterialDesc::default(),
                    transform: Transform::IDENTITY,
                }]))
            })
        }
    }

    #[test]
    fn every_supported_format_resolves() {
        let registry = LoaderRegistry::with_defaults("/runtime");
        for tag in FormatTag::ALL {
            assert!(registry.resolve(tag).is_ok(), "no loader for {tag}");
        }
    }

    #[test]
    fn unregistered_format_is_unsupported() {
        let mut registry = LoaderRegistry::new();
        registry.register_parser(FormatTag::Ply, CubeParser);
        assert!(registry.supports(FormatTag::Ply));
        assert_eq!(
            registry.resolve(FormatTag::Fbx).err(),
            Some(ViewerError::UnsupportedFormat {
                extension: "fbx".into()
            })
        );
    }

    #[test]
    fn parsers_are_attached_into_the_callers_container() {
        let mut registry = LoaderRegistry::new();
        registry.register_parser(FormatTag::Ply, CubeParser);
        let loader = registry.resolve(FormatTag::Ply).unwrap();

        let request = LoadRequest::new(Source::url("a.ply"), Arc::new(MemoryFetcher::new()));
        let (container, behaviour) =
            block_on(loader.load_into(request, SceneContainer::new(42))).unwrap();

        assert_eq!(container.generation(), 42);
        assert_eq!(container.len(), 1);
        assert!(matches!(behaviour, NodeBehaviour::Static));
    }
}
