//! Format loaders behind the registry.
//!
//! Each loader turns fetched bytes into CPU-side primitives in model space.
//! Nothing here touches the ECS; the coordinator decides when the result
//! becomes visible.

/// Binary FBX geometry, model hierarchy and local transforms.
pub mod fbx;

/// glTF 2.0 and GLB scenes, including embedded, data URI and sibling buffers.
///
/// Node animation clips are played back through an animator.
pub mod gltf;

/// ASCII and binary PLY meshes and point clouds.
pub mod ply;

/// USDZ archives composed from their USDA root layer and sublayers.
pub mod usdz;

use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};

/// Triangle mesh from positions and polygon indices, with flat normals.
pub(crate) fn flat_shaded_mesh(positions: Vec<[f32; 3]>, triangles: Vec<u32>) -> Mesh {
    let mut mesh = Mesh::new(PrimitiveTopology::TriangleList, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions)
        .with_inserted_indices(Indices::U32(triangles));
    mesh.duplicate_vertices();
    mesh.compute_flat_normals();
    mesh
}

/// Fan-triangulate one polygon given as vertex indices.
pub(crate) fn triangulate_fan(polygon: &[u32], out: &mut Vec<u32>) {
    if polygon.len() < 3 {
        return;
    }
    for i in 1..polygon.len() - 1 {
        out.extend_from_slice(&[polygon[0], polygon[i], polygon[i + 1]]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quads_become_two_triangles() {
        let mut out = Vec::new();
        triangulate_fan(&[0, 1, 2, 3], &mut out);
        assert_eq!(out, vec![0, 1, 2, 0, 2, 3]);

        triangulate_fan(&[4, 5], &mut out);
        assert_eq!(out.len(), 6);
    }
}
