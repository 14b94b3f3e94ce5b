//! Ground plane and reference grid under the model.
use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};
use bevy::render::view::NoFrustumCulling;

use crate::engine::core::session::ViewerSession;
use crate::constants::render_settings::{
    GRID_COLOR, GRID_DIVISIONS, GRID_HEIGHT_OFFSET, GRID_SIZE, GROUND_PLANE_SIZE,
};

#[derive(Component)]
pub struct GroundGrid;

#[derive(Component)]
pub struct GroundPlane;

/// Spawn the white ground plane and, when enabled, the grid lines on it.
pub fn create_ground(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    show_grid: bool,
) {
    let plane_material = materials.add(StandardMaterial {
        base_color: Color::WHITE,
        perceptual_roughness: 1.0,
        ..default()
    });
    commands.spawn((
        Mesh3d(meshes.add(Plane3d::default().mesh().size(GROUND_PLANE_SIZE, GROUND_PLANE_SIZE))),
        MeshMaterial3d(plane_material),
        Transform::IDENTITY,
        GroundPlane,
    ));

    if show_grid {
        create_ground_grid(commands, meshes, materials);
    }
}

pub fn create_ground_grid(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
) {
    let grid_material = materials.add(StandardMaterial {
        base_color: GRID_COLOR,
        alpha_mode: AlphaMode::Blend,
        unlit: true,
        ..default()
    });

    commands.spawn((
        Mesh3d(meshes.add(create_grid_mesh(GRID_SIZE, GRID_DIVISIONS))),
        MeshMaterial3d(grid_material),
        Visibility::Visible,
        NoFrustumCulling,
        Transform::from_xyz(0.0, GRID_HEIGHT_OFFSET, 0.0),
        GroundGrid,
    ));
}

/// Follow the `show_grid` setting once the config file has been applied.
pub fn sync_grid_visibility(
    session: Res<ViewerSession>,
    mut grids: Query<&mut Visibility, With<GroundGrid>>,
) {
    let wanted = if session.config().show_grid {
        Visibility::Visible
    } else {
        Visibility::Hidden
    };
    for mut visibility in &mut grids {
        visibility.set_if_neq(wanted);
    }
}

/// Square line grid centred on the origin in the XZ plane.
pub fn create_grid_mesh(size: f32, divisions: u32) -> Mesh {
    let divisions = divisions.max(1);
    let half = size * 0.5;
    let step = size / divisions as f32;

    let mut vertices = Vec::with_capacity(((divisions + 1) * 4) as usize);
    for i in 0..=divisions {
        let offset = -half + i as f32 * step;
        // Line running along Z at fixed X
        vertices.push([offset, 0.0, -half]);
        vertices.push([offset, 0.0, half]);
        // Line running along X at fixed Z
        vertices.push([-half, 0.0, offset]);
        vertices.push([half, 0.0, offset]);
    }
    let indices = (0..vertices.len() as u32).collect();

    let mut mesh = Mesh::new(PrimitiveTopology::LineList, RenderAssetUsages::RENDER_WORLD);
    mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, vertices);
    mesh.insert_indices(Indices::U32(indices));
    mesh
}
