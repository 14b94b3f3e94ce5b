use bevy::prelude::*;
use bevy::render::render_resource::Face;
use std::fmt;

use crate::engine::assets::bounds::{ModelBounds, mesh_bounds};
use crate::engine::assets::format::FormatTag;

pub type NodeId = u64;

/// Surface description kept on the CPU until the node is spawned.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialDesc {
    pub base_color: Color,
    pub metallic: f32,
    pub roughness: f32,
    pub double_sided: bool,
    pub unlit: bool,
}

impl Default for MaterialDesc {
    fn default() -> Self {
        Self {
            base_color: Color::srgb(0.8, 0.8, 0.8),
            metallic: 0.0,
            roughness: 0.7,
            double_sided: false,
            unlit: false,
        }
    }
}

impl MaterialDesc {
    pub fn with_color(base_color: Color) -> Self {
        Self {
            base_color,
            ..default()
        }
    }

    pub fn to_standard_material(&self) -> StandardMaterial {
        StandardMaterial {
            base_color: self.base_color,
            metallic: self.metallic,
            perceptual_roughness: self.roughness,
            double_sided: self.double_sided,
            cull_mode: if self.double_sided {
                None
            } else {
                Some(Face::Back)
            },
            unlit: self.unlit,
            ..default()
        }
    }
}

/// One renderable piece of a loaded model.
/// `transform` is relative to the model root.
#[derive(Debug, Clone)]
pub struct Primitive {
    pub name: String,
    pub mesh: Mesh,
    pub material: MaterialDesc,
    pub transform: Transform,
}

/// Per-frame driver for time-based content.
pub trait Animator: Send + Sync + 'static {
    /// Advance to `elapsed` seconds since the render loop started.
    fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]);

    /// Release animation state. Called at most once per node.
    fn dispose(&mut self) {}
}

pub enum NodeBehaviour {
    Static,
    Animated(Box<dyn Animator>),
}

impl fmt::Debug for NodeBehaviour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeBehaviour::Static => f.write_str("Static"),
            NodeBehaviour::Animated(_) => f.write_str("Animated"),
        }
    }
}

/// Output of a parser that builds a standalone model.
#[derive(Debug)]
pub struct ParsedModel {
    pub primitives: Vec<Primitive>,
    pub behaviour: NodeBehaviour,
}

impl ParsedModel {
    pub fn new(primitives: Vec<Primitive>) -> Self {
        Self {
            primitives,
            behaviour: NodeBehaviour::Static,
        }
    }

    pub fn animated(primitives: Vec<Primitive>, animator: impl Animator) -> Self {
        Self {
            primitives,
            behaviour: NodeBehaviour::Animated(Box::new(animator)),
        }
    }
}

/// Target group a loader fills. A fresh container is created for every
/// load and tagged with the content generation it belongs to.
#[derive(Debug, Default)]
pub struct SceneContainer {
    generation: u64,
    primitives: Vec<Primitive>,
}

impl SceneContainer {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            primitives: Vec::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn push(&mut self, primitive: Primitive) {
        self.primitives.push(primitive);
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn primitives_mut(&mut self) -> &mut [Primitive] {
        &mut self.primitives
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn bounds(&self) -> ModelBounds {
        self.primitives
            .iter()
            .fold(ModelBounds::EMPTY, |bounds, primitive| {
                bounds.union(&mesh_bounds(&primitive.mesh, &primitive.transform))
            })
    }

    /// Move a standalone model into this container.
    ///
    /// An animator built against the model's own primitive list is rebased
    /// so it only ever sees the slice it was created for.
    pub fn attach(&mut self, model: ParsedModel) -> NodeBehaviour {
        let base = self.primitives.len();
        let len = model.primitives.len();
        self.primitives.extend(model.primitives);

        match model.behaviour {
            NodeBehaviour::Animated(inner) if base > 0 => {
                NodeBehaviour::Animated(Box::new(Rebased { base, len, inner }))
            }
            behaviour => behaviour,
        }
    }
}

struct Rebased {
    base: usize,
    len: usize,
    inner: Box<dyn Animator>,
}

impl Animator for Rebased {
    fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
        let end = (self.base + self.len).min(primitives.len());
        if self.base < end {
            self.inner.update(elapsed, &mut primitives[self.base..end]);
        }
    }

    fn dispose(&mut self) {
        self.inner.dispose();
    }
}

/// Entities created for a node once it is in the world.
#[derive(Debug, Clone)]
pub struct SpawnedNode {
    pub root: Entity,
    pub primitives: Vec<Entity>,
}

/// A loaded model registered with the session.
#[derive(Debug)]
pub struct SceneNode {
    id: NodeId,
    format: FormatTag,
    container: SceneContainer,
    behaviour: NodeBehaviour,
    bounds: ModelBounds,
    disposed: bool,
    transforms_dirty: bool,
    spawned: Option<SpawnedNode>,
}

impl SceneNode {
    pub fn new(
        id: NodeId,
        format: FormatTag,
        container: SceneContainer,
        behaviour: NodeBehaviour,
    ) -> Self {
        let bounds = container.bounds();
        Self {
            id,
            format,
            container,
            behaviour,
            bounds,
            disposed: false,
            transforms_dirty: false,
            spawned: None,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.container.generation()
    }

    pub fn format(&self) -> FormatTag {
        self.format
    }

    pub fn container(&self) -> &SceneContainer {
        &self.container
    }

    /// Bounds of the content as loaded, before any animation ran.
    pub fn bounds(&self) -> ModelBounds {
        self.bounds
    }

    pub fn is_animated(&self) -> bool {
        matches!(self.behaviour, NodeBehaviour::Animated(_))
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Advance animated content. Returns whether anything moved.
    pub fn update(&mut self, elapsed: f64) -> bool {
        if self.disposed {
            return false;
        }
        match &mut self.behaviour {
            NodeBehaviour::Animated(animator) => {
                animator.update(elapsed, self.container.primitives_mut());
                self.transforms_dirty = true;
                true
            }
            NodeBehaviour::Static => false,
        }
    }

    /// Release the node. Returns `false` when it was already disposed.
    pub fn dispose(&mut self) -> bool {
        if self.disposed {
            return false;
        }
        self.disposed = true;
        if let NodeBehaviour::Animated(animator) = &mut self.behaviour {
            animator.dispose();
        }
        true
    }

    pub fn spawned(&self) -> Option<&SpawnedNode> {
        self.spawned.as_ref()
    }

    pub fn mark_spawned(&mut self, spawned: SpawnedNode) {
        self.spawned = Some(spawned);
        self.transforms_dirty = false;
    }

    pub fn take_spawned(&mut self) -> Option<SpawnedNode> {
        self.spawned.take()
    }

    pub fn take_transforms_dirty(&mut self) -> bool {
        std::mem::take(&mut self.transforms_dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Lift {
        disposed: Arc<AtomicUsize>,
    }

    impl Animator for Lift {
        fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
            for primitive in primitives {
                primitive.transform.translation.y = elapsed as f32;
            }
        }

        fn dispose(&mut self) {
            self.disposed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn cube(name: &str) -> Primitive {
        Primitive {
            name: name.to_string(),
            mesh: Mesh::from(Cuboid::new(1.0, 1.0, 1.0)),
            material: MaterialDesc::default(),
            transform: Transform::IDENTITY,
        }
    }

    #[test]
    fn dispose_runs_once_and_stops_updates() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let mut container = SceneContainer::new(3);
        let behaviour = container.attach(ParsedModel::animated(
            vec![cube("a")],
            Lift {
                disposed: disposed.clone(),
            },
        ));
        let mut node = SceneNode::new(1, FormatTag::Glb, container, behaviour);

        assert!(node.update(2.0));
        assert_eq!(node.container().primitives()[0].transform.translation.y, 2.0);

        assert!(node.dispose());
        assert!(!node.dispose());
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        assert!(!node.update(5.0));
        assert_eq!(node.container().primitives()[0].transform.translation.y, 2.0);
    }

    #[test]
    fn attached_animators_only_see_their_primitives() {
        let mut container = SceneContainer::new(1);
        container.push(cube("existing"));
        let behaviour = container.attach(ParsedModel::animated(
            vec![cube("moving")],
            Lift {
                disposed: Arc::new(AtomicUsize::new(0)),
            },
        ));
        let mut node = SceneNode::new(7, FormatTag::Gltf, container, behaviour);
        node.update(4.0);

        let primitives = node.container().primitives();
        assert_eq!(primitives[0].transform.translation.y, 0.0);
        assert_eq!(primitives[1].transform.translation.y, 4.0);
    }

    #[test]
    fn node_bounds_cover_every_primitive() {
        let mut container = SceneContainer::new(1);
        container.push(cube("left"));
        let mut right = cube("right");
        right.transform.translation.x = 4.0;
        container.push(right);

        let node = SceneNode::new(2, FormatTag::Fbx, container, NodeBehaviour::Static);
        assert_eq!(node.bounds().min.x, -0.5);
        assert_eq!(node.bounds().max.x, 4.5);
        assert!(!node.is_animated());
    }
}
