use bevy::prelude::*;

use crate::engine::core::session::ViewerSession;
use crate::engine::scene::node::{NodeId, SceneNode, SpawnedNode};

/// Root entity of a loaded model.
#[derive(Component, Debug, Clone, Copy)]
pub struct ModelRoot {
    pub node: NodeId,
}

/// One primitive of a loaded model, indexed into its node's container.
#[derive(Component, Debug, Clone, Copy)]
pub struct ModelPrimitive {
    pub node: NodeId,
    pub index: usize,
}

/// Mirror the session's active asset set into the world: despawn retired
/// nodes, spawn new ones and copy animated transforms onto their entities.
pub fn sync_scene_entities(
    mut commands: Commands,
    mut session: ResMut<ViewerSession>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
    mut primitives: Query<&mut Transform, With<ModelPrimitive>>,
) {
    for root in session.coordinator.take_retired() {
        commands.entity(root).despawn();
    }

    for node in session.coordinator.active_nodes_mut() {
        if node.is_disposed() {
            continue;
        }
        if node.spawned().is_none() {
            spawn_node(&mut commands, &mut meshes, &mut materials, node);
            continue;
        }
        if node.take_transforms_dirty() {
            write_transforms(node, &mut primitives);
        }
    }
}

fn spawn_node(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    node: &mut SceneNode,
) {
    let id = node.id();
    let root = commands
        .spawn((
            ModelRoot { node: id },
            Transform::IDENTITY,
            Visibility::Visible,
            Name::new(format!("model-{}", id)),
        ))
        .id();

    let entities = node
        .container()
        .primitives()
        .iter()
        .enumerate()
        .map(|(index, primitive)| {
            commands
                .spawn((
                    Mesh3d(meshes.add(primitive.mesh.clone())),
                    MeshMaterial3d(materials.add(primitive.material.to_standard_material())),
                    primitive.transform,
                    ModelPrimitive { node: id, index },
                    Name::new(primitive.name.clone()),
                    ChildOf(root),
                ))
                .id()
        })
        .collect();

    node.mark_spawned(SpawnedNode {
        root,
        primitives: entities,
    });
}

fn write_transforms(node: &SceneNode, primitives: &mut Query<&mut Transform, With<ModelPrimitive>>) {
    let Some(spawned) = node.spawned() else {
        return;
    };
    for (entity, primitive) in spawned.primitives.iter().zip(node.container().primitives()) {
        if let Ok(mut transform) = primitives.get_mut(*entity) {
            *transform = primitive.transform;
        }
    }
}
