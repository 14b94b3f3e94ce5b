use bevy::prelude::*;
use bevy::tasks::BoxedFuture;
use flate2::read::ZlibDecoder;
use std::collections::{HashMap, HashSet};
use std::io::Read;
use thiserror::Error;

use crate::engine::assets::format::FormatTag;
use crate::engine::loaders::{flat_shaded_mesh, triangulate_fan};
use crate::engine::loading::fetch::LoadRequest;
use crate::engine::loading::registry::NodeParser;
use crate::engine::scene::node::{MaterialDesc, ParsedModel, Primitive};
use crate::error::LoadError;

const MAGIC: &[u8] = b"Kaydara FBX Binary  \0\x1a\0";
const HEADER_LEN: usize = 27;
const MIN_VERSION: u32 = 7100;
/// From this version record offsets are 64 bit.
const WIDE_OFFSETS_VERSION: u32 = 7500;

#[derive(Debug, Error, PartialEq)]
pub enum FbxError {
    #[error("not a binary FBX file (ASCII FBX is not supported)")]
    NotBinary,
    #[error("FBX version {0} is older than 7.1")]
    UnsupportedVersion(u32),
    #[error("unexpected end of data at byte {0}")]
    Truncated(usize),
    #[error("unknown property type `{0}` at byte {1}")]
    UnknownProperty(char, usize),
    #[error("corrupt record at byte {0}")]
    CorruptRecord(usize),
    #[error("array decompression failed: {0}")]
    Decompress(String),
    #[error("no mesh geometry found")]
    NoGeometry,
}

impl From<FbxError> for LoadError {
    fn from(error: FbxError) -> Self {
        LoadError::parse(FormatTag::Fbx, error)
    }
}

/// Autodesk FBX in the binary encoding, version 7.1 and later.
///
/// Mesh geometry is placed by the model hierarchy's local transforms;
/// diffuse colours come from connected materials.
#[derive(Debug, Default, Clone, Copy)]
pub struct FbxParser;

impl NodeParser for FbxParser {
    fn parse<'a>(&'a self, request: LoadRequest) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
        Box::pin(async move {
            let bytes = request.bytes().await?;
            let document = read_document(&bytes)?;
            Ok(build_model(&document)?)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Property {
    Bool(bool),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Raw(Vec<u8>),
    F32Array(Vec<f32>),
    F64Array(Vec<f64>),
    I32Array(Vec<i32>),
    I64Array(Vec<i64>),
    BoolArray(Vec<bool>),
}

impl Property {
    fn as_i64(&self) -> Option<i64> {
        match *self {
            Property::I16(v) => Some(v as i64),
            Property::I32(v) => Some(v as i64),
            Property::I64(v) => Some(v),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            Property::F32(v) => Some(v as f64),
            Property::F64(v) => Some(v),
            _ => self.as_i64().map(|v| v as f64),
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            Property::String(s) => Some(s),
            _ => None,
        }
    }

    fn to_f64_array(&self) -> Option<Vec<f64>> {
        match self {
            Property::F64Array(v) => Some(v.clone()),
            Property::F32Array(v) => Some(v.iter().map(|&x| x as f64).collect()),
            _ => None,
        }
    }

    fn to_i64_array(&self) -> Option<Vec<i64>> {
        match self {
            Property::I32Array(v) => Some(v.iter().map(|&x| x as i64).collect()),
            Property::I64Array(v) => Some(v.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Record {
    name: String,
    properties: Vec<Property>,
    children: Vec<Record>,
}

impl Record {
    fn child(&self, name: &str) -> Option<&Record> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn id(&self) -> Option<i64> {
        self.properties.first().and_then(Property::as_i64)
    }

    /// Object names are stored as `Name\0\x01Class`.
    fn object_name(&self) -> String {
        self.properties
            .get(1)
            .and_then(Property::as_str)
            .map(|s| s.split("\0\u{1}").next().unwrap_or(s).to_string())
            .unwrap_or_default()
    }

    /// Numeric components of a `Properties70` entry, e.g. `Lcl Translation`.
    fn property70(&self, key: &str) -> Option<Vec<f64>> {
        let entry = self
            .child("Properties70")?
            .children_named("P")
            .find(|p| p.properties.first().and_then(Property::as_str) == Some(key))?;
        Some(entry.properties.iter().skip(4).filter_map(Property::as_f64).collect())
    }

    fn vec3_property(&self, key: &str) -> Option<Vec3> {
        match self.property70(key)?.as_slice() {
            [x, y, z, ..] => Some(Vec3::new(*x as f32, *y as f32, *z as f32)),
            _ => None,
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    wide: bool,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FbxError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(FbxError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FbxError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, FbxError> {
        Ok(self.array::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32, FbxError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn offset(&mut self) -> Result<u64, FbxError> {
        if self.wide {
            Ok(u64::from_le_bytes(self.array()?))
        } else {
            Ok(self.u32()? as u64)
        }
    }

    /// Next record, or `None` at the null record closing a list.
    fn record(&mut self) -> Result<Option<Record>, FbxError> {
        let start = self.pos;
        let end = self.offset()? as usize;
        let property_count = self.offset()?;
        let _property_bytes = self.offset()?;
        let name_len = self.u8()? as usize;

        if end == 0 {
            return Ok(None);
        }
        if end <= start || end > self.data.len() {
            return Err(FbxError::CorruptRecord(start));
        }

        let name = String::from_utf8_lossy(self.take(name_len)?).into_owned();
        let mut properties = Vec::with_capacity(property_count.min(64) as usize);
        for _ in 0..property_count {
            properties.push(self.property()?);
        }

        let mut children = Vec::new();
        while self.pos < end {
            match self.record()? {
                Some(child) => children.push(child),
                None => break,
            }
        }
        self.pos = end;

        Ok(Some(Record {
            name,
            properties,
            children,
        }))
    }

    fn property(&mut self) -> Result<Property, FbxError> {
        let at = self.pos;
        let code = self.u8()? as char;
        Ok(match code {
            'C' => Property::Bool(self.u8()? != 0),
            'Y' => Property::I16(i16::from_le_bytes(self.array()?)),
            'I' => Property::I32(i32::from_le_bytes(self.array()?)),
            'L' => Property::I64(i64::from_le_bytes(self.array()?)),
            'F' => Property::F32(f32::from_le_bytes(self.array()?)),
            'D' => Property::F64(f64::from_le_bytes(self.array()?)),
            'S' => {
                let len = self.u32()? as usize;
                Property::String(String::from_utf8_lossy(self.take(len)?).into_owned())
            }
            'R' => {
                let len = self.u32()? as usize;
                Property::Raw(self.take(len)?.to_vec())
            }
            'f' => Property::F32Array(
                self.packed_array(4)?
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            'd' => Property::F64Array(
                self.packed_array(8)?
                    .chunks_exact(8)
                    .map(|c| f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            'i' => Property::I32Array(
                self.packed_array(4)?
                    .chunks_exact(4)
                    .map(|c| i32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            ),
            'l' => Property::I64Array(
                self.packed_array(8)?
                    .chunks_exact(8)
                    .map(|c| i64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                    .collect(),
            ),
            'b' => Property::BoolArray(self.packed_array(1)?.iter().map(|&b| b != 0).collect()),
            other => return Err(FbxError::UnknownProperty(other, at)),
        })
    }

    /// Array payload, inflated when stored with zlib.
    ///
    /// The declared element count is only trusted once the payload has
    /// been read; nothing is reserved up front.
    fn packed_array(&mut self, element_size: usize) -> Result<Vec<u8>, FbxError> {
        let at = self.pos;
        let count = self.u32()? as usize;
        let encoding = self.u32()?;
        let stored_len = self.u32()? as usize;
        let stored = self.take(stored_len)?;
        let expected = count
            .checked_mul(element_size)
            .ok_or(FbxError::CorruptRecord(at))?;

        let bytes = if encoding == 1 {
            let mut inflated = Vec::new();
            ZlibDecoder::new(stored)
                .take(expected as u64)
                .read_to_end(&mut inflated)
                .map_err(|e| FbxError::Decompress(e.to_string()))?;
            inflated
        } else {
            stored.to_vec()
        };

        if bytes.len() < expected {
            return Err(FbxError::Truncated(self.pos));
        }
        Ok(bytes)
    }
}

/// Top level records of a binary FBX file.
fn read_document(bytes: &[u8]) -> Result<Vec<Record>, FbxError> {
    if bytes.len() < HEADER_LEN || !bytes.starts_with(MAGIC) {
        return Err(FbxError::NotBinary);
    }
    let version = u32::from_le_bytes([bytes[23], bytes[24], bytes[25], bytes[26]]);
    if version < MIN_VERSION {
        return Err(FbxError::UnsupportedVersion(version));
    }

    let mut reader = Reader {
        data: bytes,
        pos: HEADER_LEN,
        wide: version >= WIDE_OFFSETS_VERSION,
    };
    let mut records = Vec::new();
    while reader.pos < bytes.len() {
        match reader.record()? {
            Some(record) => records.push(record),
            None => break,
        }
    }
    debug!("FBX {}: {} top level records", version, records.len());
    Ok(records)
}

struct Model<'a> {
    record: &'a Record,
    parent: Option<i64>,
}

fn local_matrix(model: &Record) -> Mat4 {
    let translation = model.vec3_property("Lcl Translation").unwrap_or(Vec3::ZERO);
    let rotation = model.vec3_property("Lcl Rotation").unwrap_or(Vec3::ZERO);
    let pre_rotation = model.vec3_property("PreRotation").unwrap_or(Vec3::ZERO);
    let scale = model.vec3_property("Lcl Scaling").unwrap_or(Vec3::ONE);

    let euler = |degrees: Vec3| {
        Mat4::from_euler(
            EulerRot::ZYX,
            degrees.z.to_radians(),
            degrees.y.to_radians(),
            degrees.x.to_radians(),
        )
    };

    Mat4::from_translation(translation) * euler(pre_rotation) * euler(rotation) * Mat4::from_scale(scale)
}

fn global_matrix(
    id: i64,
    models: &HashMap<i64, Model>,
    cache: &mut HashMap<i64, Mat4>,
    visiting: &mut HashSet<i64>,
) -> Mat4 {
    if let Some(matrix) = cache.get(&id) {
        return *matrix;
    }
    let Some(model) = models.get(&id) else {
        return Mat4::IDENTITY;
    };
    if !visiting.insert(id) {
        warn!("FBX model hierarchy contains a cycle at {}", id);
        return Mat4::IDENTITY;
    }

    let local = local_matrix(model.record);
    let global = match model.parent {
        Some(parent) => global_matrix(parent, models, cache, visiting) * local,
        None => local,
    };
    visiting.remove(&id);
    cache.insert(id, global);
    global
}

fn build_model(records: &[Record]) -> Result<ParsedModel, FbxError> {
    let objects = records
        .iter()
        .find(|r| r.name == "Objects")
        .ok_or(FbxError::NoGeometry)?;

    // child id -> parent ids, in file order
    let mut links: Vec<(i64, i64)> = Vec::new();
    if let Some(connections) = records.iter().find(|r| r.name == "Connections") {
        for c in connections.children_named("C") {
            let kind = c.properties.first().and_then(Property::as_str);
            let child = c.properties.get(1).and_then(Property::as_i64);
            let parent = c.properties.get(2).and_then(Property::as_i64);
            if let (Some("OO"), Some(child), Some(parent)) = (kind, child, parent) {
                links.push((child, parent));
            }
        }
    }

    let mut models: HashMap<i64, Model> = HashMap::new();
    for record in objects.children_named("Model") {
        if let Some(id) = record.id() {
            models.insert(id, Model { record, parent: None });
        }
    }
    for &(child, parent) in &links {
        if models.contains_key(&parent) {
            if let Some(model) = models.get_mut(&child) {
                model.parent.get_or_insert(parent);
            }
        }
    }

    let mut materials: HashMap<i64, MaterialDesc> = HashMap::new();
    for record in objects.children_named("Material") {
        let Some(id) = record.id() else { continue };
        let colour = record
            .vec3_property("DiffuseColor")
            .or_else(|| record.vec3_property("Diffuse"));
        let material = match colour {
            Some(c) => MaterialDesc::with_color(Color::srgb(c.x, c.y, c.z)),
            None => MaterialDesc::default(),
        };
        materials.insert(id, material);
    }

    let mut cache = HashMap::new();
    let mut primitives = Vec::new();

    for geometry in objects.children_named("Geometry") {
        let Some(geometry_id) = geometry.id() else { continue };
        let Some(vertices) = geometry.child("Vertices").and_then(|v| v.properties.first()?.to_f64_array())
        else {
            continue;
        };
        let Some(polygon_indices) = geometry
            .child("PolygonVertexIndex")
            .and_then(|v| v.properties.first()?.to_i64_array())
        else {
            continue;
        };

        let positions: Vec<[f32; 3]> = vertices
            .chunks_exact(3)
            .map(|v| [v[0] as f32, v[1] as f32, v[2] as f32])
            .collect();
        let triangles = polygons_to_triangles(&polygon_indices, positions.len());
        if triangles.is_empty() {
            continue;
        }
        let mesh = flat_shaded_mesh(positions, triangles);

        let owners: Vec<i64> = links
            .iter()
            .filter(|(child, parent)| *child == geometry_id && models.contains_key(parent))
            .map(|&(_, parent)| parent)
            .collect();

        if owners.is_empty() {
            primitives.push(Primitive {
                name: geometry.object_name(),
                mesh,
                material: MaterialDesc::default(),
                transform: Transform::IDENTITY,
            });
            continue;
        }

        for owner in owners {
            let material = links
                .iter()
                .find(|(child, parent)| *parent == owner && materials.contains_key(child))
                .and_then(|(child, _)| materials.get(child).cloned())
                .unwrap_or_default();
            let global = global_matrix(owner, &models, &mut cache, &mut HashSet::new());
            let name = models
                .get(&owner)
                .map(|m| m.record.object_name())
                .unwrap_or_default();
            primitives.push(Primitive {
                name,
                mesh: mesh.clone(),
                material,
                transform: Transform::from_matrix(global),
            });
        }
    }

    if primitives.is_empty() {
        return Err(FbxError::NoGeometry);
    }
    Ok(ParsedModel::new(primitives))
}

/// Polygon lists end each polygon with a bitwise-negated index.
fn polygons_to_triangles(indices: &[i64], vertex_count: usize) -> Vec<u32> {
    let mut triangles = Vec::new();
    let mut polygon: Vec<u32> = Vec::new();
    let mut skipped = 0usize;

    for &raw in indices {
        let (index, closes) = if raw < 0 { (!raw, true) } else { (raw, false) };
        if (index as usize) < vertex_count {
            polygon.push(index as u32);
        } else {
            skipped += 1;
        }
        if closes {
            triangulate_fan(&polygon, &mut triangles);
            polygon.clear();
        }
    }
    if skipped > 0 {
        warn!("FBX geometry skipped {} out of range indices", skipped);
    }
    triangles
}
