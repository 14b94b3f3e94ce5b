use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::{Indices, PrimitiveTopology};
use bevy::tasks::BoxedFuture;
use gltf::animation::util::ReadOutputs;
use gltf::mesh::Mode;
use std::collections::HashSet;

use crate::engine::assets::format::FormatTag;
use crate::engine::loading::fetch::LoadRequest;
use crate::engine::loading::registry::NodeParser;
use crate::engine::scene::animation::{Interpolation, Track, compose_globals, wrap_time};
use crate::engine::scene::node::{Animator, MaterialDesc, ParsedModel, Primitive};
use crate::error::LoadError;

/// glTF 2.0 JSON and binary containers.
///
/// Buffers may live in the GLB binary chunk, in base64 data URIs or next to
/// the asset; the latter are fetched relative to the source. The default
/// scene is flattened into primitives in model space. When the document
/// has animations the first clip loops over the node hierarchy.
#[derive(Debug, Default, Clone, Copy)]
pub struct GltfParser;

impl NodeParser for GltfParser {
    fn parse<'a>(&'a self, request: LoadRequest) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
        Box::pin(async move {
            let format = request.source().format().unwrap_or(FormatTag::Gltf);
            let bytes = request.bytes().await?;
            let document =
                gltf::Gltf::from_slice(&bytes).map_err(|e| LoadError::parse(format, e))?;

            let mut buffers = Vec::with_capacity(document.buffers().len());
            for buffer in document.buffers() {
                let data = match buffer.source() {
                    gltf::buffer::Source::Bin => document
                        .blob
                        .clone()
                        .ok_or_else(|| LoadError::parse(format, "missing binary chunk"))?,
                    gltf::buffer::Source::Uri(uri) if uri.starts_with("data:") => {
                        decode_data_uri(uri).map_err(|e| LoadError::parse(format, e))?
                    }
                    gltf::buffer::Source::Uri(uri) => request.fetch_relative(uri).await?,
                };
                if data.len() < buffer.length() {
                    return Err(LoadError::parse(
                        format,
                        format!("buffer {} is shorter than declared", buffer.index()),
                    ));
                }
                buffers.push(data);
            }

            build_model(&document, &buffers).map_err(|e| LoadError::parse(format, e))
        })
    }
}

fn decode_data_uri(uri: &str) -> Result<Vec<u8>, String> {
    let (_, payload) = uri
        .split_once(";base64,")
        .ok_or_else(|| format!("unsupported data URI: {:.40}", uri))?;
    STANDARD.decode(payload).map_err(|e| e.to_string())
}

/// Scene nodes flattened so that every parent precedes its children.
struct NodeTable {
    gltf_index: Vec<usize>,
    parents: Vec<Option<usize>>,
    locals: Vec<(Vec3, Quat, Vec3)>,
}

impl NodeTable {
    /// Walks the hierarchy depth first. A node reached twice means the
    /// document is not a tree and is rejected.
    fn from_scene(scene: &gltf::Scene) -> Result<Self, String> {
        let mut table = Self {
            gltf_index: Vec::new(),
            parents: Vec::new(),
            locals: Vec::new(),
        };
        let mut seen = HashSet::new();
        let mut pending: Vec<(gltf::Node, Option<usize>)> =
            scene.nodes().map(|root| (root, None)).collect();
        pending.reverse();

        while let Some((node, parent)) = pending.pop() {
            if !seen.insert(node.index()) {
                return Err(format!(
                    "node {} appears more than once in the scene hierarchy",
                    node.index()
                ));
            }
            let (translation, rotation, scale) = node.transform().decomposed();
            let slot = table.gltf_index.len();
            table.gltf_index.push(node.index());
            table.parents.push(parent);
            table.locals.push((
                Vec3::from(translation),
                Quat::from_array(rotation),
                Vec3::from(scale),
            ));
            let first_child = pending.len();
            pending.extend(node.children().map(|child| (child, Some(slot))));
            pending[first_child..].reverse();
        }
        Ok(table)
    }

    fn slot_of(&self, gltf_index: usize) -> Option<usize> {
        self.gltf_index.iter().position(|&i| i == gltf_index)
    }

    fn globals(&self, locals: &[(Vec3, Quat, Vec3)]) -> Vec<Mat4> {
        let matrices: Vec<Mat4> = locals
            .iter()
            .map(|&(t, r, s)| Mat4::from_scale_rotation_translation(s, r, t))
            .collect();
        compose_globals(&self.parents, &matrices)
    }
}

fn build_model(document: &gltf::Gltf, buffers: &[Vec<u8>]) -> Result<ParsedModel, String> {
    let scene = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .ok_or("document has no scenes")?;
    let table = NodeTable::from_scene(&scene)?;
    let globals = table.globals(&table.locals);

    let mut primitives = Vec::new();
    let mut primitive_slots = Vec::new();

    for (slot, &gltf_index) in table.gltf_index.iter().enumerate() {
        let Some(node) = document.nodes().nth(gltf_index) else {
            continue;
        };
        let Some(mesh) = node.mesh() else {
            continue;
        };
        let base_name = mesh
            .name()
            .or(node.name())
            .map(str::to_string)
            .unwrap_or_else(|| format!("mesh-{}", mesh.index()));

        for primitive in mesh.primitives() {
            let Some(bevy_mesh) = read_primitive(&primitive, buffers)? else {
                continue;
            };
            primitives.push(Primitive {
                name: format!("{}#{}", base_name, primitive.index()),
                mesh: bevy_mesh,
                material: read_material(&primitive.material()),
                transform: Transform::from_matrix(globals[slot]),
            });
            primitive_slots.push(slot);
        }
    }

    if primitives.is_empty() {
        return Err("scene contains no renderable meshes".to_string());
    }

    let clip = document
        .animations()
        .next()
        .map(|animation| read_clip(&animation, &table, buffers))
        .transpose()?
        .flatten();

    Ok(match clip {
        Some(clip) => {
            debug!(
                "glTF clip: {} channel(s) over {:.2}s",
                clip.channels.len(),
                clip.end - clip.start
            );
            ParsedModel::animated(
                primitives,
                ClipAnimator {
                    parents: table.parents,
                    rest: table.locals,
                    primitive_slots,
                    clip,
                },
            )
        }
        None => ParsedModel::new(primitives),
    })
}

fn read_primitive(
    primitive: &gltf::Primitive,
    buffers: &[Vec<u8>],
) -> Result<Option<Mesh>, String> {
    let topology = match primitive.mode() {
        Mode::Points => PrimitiveTopology::PointList,
        Mode::Lines => PrimitiveTopology::LineList,
        Mode::LineStrip => PrimitiveTopology::LineStrip,
        Mode::Triangles => PrimitiveTopology::TriangleList,
        Mode::TriangleStrip => PrimitiveTopology::TriangleStrip,
        other => {
            warn!("Skipping glTF primitive with unsupported mode {:?}", other);
            return Ok(None);
        }
    };

    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
    let positions: Vec<[f32; 3]> = reader
        .read_positions()
        .ok_or("primitive has no POSITION attribute")?
        .collect();
    let vertex_count = positions.len();

    let mut mesh = Mesh::new(topology, RenderAssetUsages::default())
        .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, positions);

    if let Some(normals) = reader.read_normals() {
        mesh.insert_attribute(Mesh::ATTRIBUTE_NORMAL, normals.collect::<Vec<_>>());
    }
    if let Some(uvs) = reader.read_tex_coords(0) {
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs.into_f32().collect::<Vec<_>>());
    }
    if let Some(colours) = reader.read_colors(0) {
        mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, colours.into_rgba_f32().collect::<Vec<_>>());
    }
    if let Some(indices) = reader.read_indices() {
        let indices: Vec<u32> = indices.into_u32().collect();
        if let Some(&bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(format!("index {} out of range for {} vertices", bad, vertex_count));
        }
        mesh.insert_indices(Indices::U32(indices));
    }

    if topology == PrimitiveTopology::TriangleList && mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_none()
    {
        if mesh.indices().is_some() {
            mesh.compute_smooth_normals();
        } else {
            mesh.compute_flat_normals();
        }
    }

    Ok(Some(mesh))
}

fn read_material(material: &gltf::Material) -> MaterialDesc {
    let pbr = material.pbr_metallic_roughness();
    let [r, g, b, a] = pbr.base_color_factor();
    MaterialDesc {
        base_color: Color::linear_rgba(r, g, b, a),
        metallic: pbr.metallic_factor(),
        roughness: pbr.roughness_factor(),
        double_sided: material.double_sided(),
        unlit: false,
    }
}

enum ChannelTrack {
    Translation(Track<Vec3>),
    Rotation(Track<Quat>),
    Scale(Track<Vec3>),
}

struct Channel {
    slot: usize,
    track: ChannelTrack,
}

struct Clip {
    channels: Vec<Channel>,
    start: f32,
    end: f32,
}

/// Cubic spline outputs come as (in-tangent, value, out-tangent) triples;
/// keep the values and play them back linearly.
fn spline_values<T: Copy>(values: Vec<T>, cubic: bool) -> Vec<T> {
    if cubic {
        values.chunks_exact(3).map(|triple| triple[1]).collect()
    } else {
        values
    }
}

fn read_clip(
    animation: &gltf::Animation,
    table: &NodeTable,
    buffers: &[Vec<u8>],
) -> Result<Option<Clip>, String> {
    let mut channels = Vec::new();

    for channel in animation.channels() {
        let Some(slot) = table.slot_of(channel.target().node().index()) else {
            continue;
        };
        let reader = channel.reader(|buffer| buffers.get(buffer.index()).map(Vec::as_slice));
        let times: Vec<f32> = reader
            .read_inputs()
            .ok_or("animation channel has no input times")?
            .collect();
        let (interpolation, cubic) = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Step => (Interpolation::Step, false),
            gltf::animation::Interpolation::Linear => (Interpolation::Linear, false),
            gltf::animation::Interpolation::CubicSpline => (Interpolation::Linear, true),
        };

        let track = match reader.read_outputs() {
            Some(ReadOutputs::Translations(values)) => {
                let values = spline_values(values.map(Vec3::from).collect(), cubic);
                Track::new(times, values, interpolation).map(ChannelTrack::Translation)
            }
            Some(ReadOutputs::Rotations(values)) => {
                let values = spline_values(values.into_f32().map(Quat::from_array).collect(), cubic);
                Track::new(times, values, interpolation).map(ChannelTrack::Rotation)
            }
            Some(ReadOutputs::Scales(values)) => {
                let values = spline_values(values.map(Vec3::from).collect(), cubic);
                Track::new(times, values, interpolation).map(ChannelTrack::Scale)
            }
            _ => None,
        };

        if let Some(track) = track {
            channels.push(Channel { slot, track });
        }
    }

    if channels.is_empty() {
        return Ok(None);
    }

    let (start, end) = channels.iter().fold((f32::MAX, f32::MIN), |(lo, hi), channel| {
        let (s, e) = match &channel.track {
            ChannelTrack::Translation(track) | ChannelTrack::Scale(track) => {
                (track.start(), track.end())
            }
            ChannelTrack::Rotation(track) => (track.start(), track.end()),
        };
        (lo.min(s), hi.max(e))
    });

    Ok(Some(Clip {
        channels,
        start,
        end,
    }))
}

/// Loops one clip and rewrites every primitive's model-space transform.
struct ClipAnimator {
    parents: Vec<Option<usize>>,
    rest: Vec<(Vec3, Quat, Vec3)>,
    primitive_slots: Vec<usize>,
    clip: Clip,
}

impl Animator for ClipAnimator {
    fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
        let time = wrap_time(elapsed, self.clip.start as f64, self.clip.end as f64) as f32;

        let mut locals = self.rest.clone();
        for channel in &self.clip.channels {
            let local = &mut locals[channel.slot];
            match &channel.track {
                ChannelTrack::Translation(track) => local.0 = track.sample(time),
                ChannelTrack::Rotation(track) => local.1 = track.sample(time).normalize(),
                ChannelTrack::Scale(track) => local.2 = track.sample(time),
            }
        }

        let matrices: Vec<Mat4> = locals
            .iter()
            .map(|&(t, r, s)| Mat4::from_scale_rotation_translation(s, r, t))
            .collect();
        let globals = compose_globals(&self.parents, &matrices);

        for (primitive, &slot) in primitives.iter_mut().zip(&self.primitive_slots) {
            primitive.transform = Transform::from_matrix(globals[slot]);
        }
    }

    fn dispose(&mut self) {
        self.clip.channels.clear();
    }
}
