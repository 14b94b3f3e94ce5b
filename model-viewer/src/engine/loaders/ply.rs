use bevy::asset::RenderAssetUsages;
use bevy::prelude::*;
use bevy::render::mesh::PrimitiveTopology;
use bevy::tasks::BoxedFuture;
use thiserror::Error;

use crate::engine::assets::format::FormatTag;
use crate::engine::loaders::{flat_shaded_mesh, triangulate_fan};
use crate::engine::loading::fetch::LoadRequest;
use crate::engine::loading::registry::NodeParser;
use crate::engine::scene::node::{MaterialDesc, ParsedModel, Primitive};
use crate::error::LoadError;

/// Surface colour of PLY meshes, which carry no material of their own.
pub const PLY_COLOR: Color = Color::srgb(0.0, 156.0 / 255.0, 1.0);

#[derive(Debug, Error, PartialEq)]
pub enum PlyError {
    #[error("missing `ply` magic")]
    MissingMagic,
    #[error("header has no `end_header`")]
    UnterminatedHeader,
    #[error("unsupported format `{0}`")]
    UnsupportedFormat(String),
    #[error("malformed header line `{0}`")]
    MalformedHeader(String),
    #[error("unknown property type `{0}`")]
    UnknownType(String),
    #[error("no vertex element")]
    NoVertices,
    #[error("vertex element lacks x/y/z")]
    NoPositions,
    #[error("unexpected end of data in element `{0}`")]
    Truncated(String),
    #[error("invalid number `{0}`")]
    InvalidNumber(String),
    #[error("face references vertex {index} of {count}")]
    IndexOutOfRange { index: u32, count: usize },
    #[error("invalid vertex index `{0}`")]
    InvalidIndex(String),
}

impl From<PlyError> for LoadError {
    fn from(error: PlyError) -> Self {
        LoadError::parse(FormatTag::Ply, error)
    }
}

/// Stanford polygon files. Faces become a flat shaded mesh; files with
/// vertices only become a point cloud.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlyParser;

impl NodeParser for PlyParser {
    fn parse<'a>(&'a self, request: LoadRequest) -> BoxedFuture<'a, Result<ParsedModel, LoadError>> {
        Box::pin(async move {
            let bytes = request.bytes().await?;
            let name = request.source().identifier().to_string();
            Ok(parse_ply(&name, &bytes)?)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Ascii,
    BinaryLittleEndian,
    BinaryBigEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Result<Self, PlyError> {
        Ok(match name {
            "char" | "int8" => ScalarType::I8,
            "uchar" | "uint8" => ScalarType::U8,
            "short" | "int16" => ScalarType::I16,
            "ushort" | "uint16" => ScalarType::U16,
            "int" | "int32" => ScalarType::I32,
            "uint" | "uint32" => ScalarType::U32,
            "float" | "float32" => ScalarType::F32,
            "double" | "float64" => ScalarType::F64,
            other => return Err(PlyError::UnknownType(other.to_string())),
        })
    }

    fn size(self) -> usize {
        match self {
            ScalarType::I8 | ScalarType::U8 => 1,
            ScalarType::I16 | ScalarType::U16 => 2,
            ScalarType::I32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::F64 => 8,
        }
    }

    /// Integer colour channels are normalized by this.
    fn colour_scale(self) -> f64 {
        match self {
            ScalarType::U8 | ScalarType::I8 => 255.0,
            ScalarType::U16 | ScalarType::I16 => 65535.0,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone)]
enum PropertyKind {
    Scalar(ScalarType),
    List { count: ScalarType, item: ScalarType },
}

#[derive(Debug, Clone)]
struct PropertyDef {
    name: String,
    kind: PropertyKind,
}

#[derive(Debug, Clone)]
struct ElementDef {
    name: String,
    count: usize,
    properties: Vec<PropertyDef>,
}

impl ElementDef {
    fn index_of(&self, names: &[&str]) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| names.contains(&p.name.as_str()))
    }
}

#[derive(Debug)]
struct Header {
    encoding: Encoding,
    elements: Vec<ElementDef>,
    body_offset: usize,
}

fn parse_header(bytes: &[u8]) -> Result<Header, PlyError> {
    if !bytes.starts_with(b"ply") {
        return Err(PlyError::MissingMagic);
    }

    let marker = b"end_header";
    let end = bytes
        .windows(marker.len())
        .position(|window| window == marker)
        .ok_or(PlyError::UnterminatedHeader)?;
    let mut body_offset = end + marker.len();
    if bytes.get(body_offset) == Some(&b'\r') {
        body_offset += 1;
    }
    if bytes.get(body_offset) == Some(&b'\n') {
        body_offset += 1;
    }

    let text = String::from_utf8_lossy(&bytes[..end]);
    let mut encoding = None;
    let mut elements: Vec<ElementDef> = Vec::new();

    for line in text.lines().skip(1) {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            [] | ["comment", ..] | ["obj_info", ..] => {}
            ["format", kind, _version] => {
                encoding = Some(match *kind {
                    "ascii" => Encoding::Ascii,
                    "binary_little_endian" => Encoding::BinaryLittleEndian,
                    "binary_big_endian" => Encoding::BinaryBigEndian,
                    other => return Err(PlyError::UnsupportedFormat(other.to_string())),
                });
            }
            ["element", name, count] => {
                let count = count
                    .parse()
                    .map_err(|_| PlyError::MalformedHeader(line.to_string()))?;
                elements.push(ElementDef {
                    name: name.to_string(),
                    count,
                    properties: Vec::new(),
                });
            }
            ["property", "list", count, item, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| PlyError::MalformedHeader(line.to_string()))?;
                element.properties.push(PropertyDef {
                    name: name.to_string(),
                    kind: PropertyKind::List {
                        count: ScalarType::parse(count)?,
                        item: ScalarType::parse(item)?,
                    },
                });
            }
            ["property", ty, name] => {
                let element = elements
                    .last_mut()
                    .ok_or_else(|| PlyError::MalformedHeader(line.to_string()))?;
                element.properties.push(PropertyDef {
                    name: name.to_string(),
                    kind: PropertyKind::Scalar(ScalarType::parse(ty)?),
                });
            }
            _ => return Err(PlyError::MalformedHeader(line.to_string())),
        }
    }

    let encoding = encoding.ok_or_else(|| PlyError::MalformedHeader("missing format".into()))?;
    Ok(Header {
        encoding,
        elements,
        body_offset,
    })
}

/// Pulls scalar values out of the body in file order.
trait ValueReader {
    fn read(&mut self, ty: ScalarType) -> Option<Result<f64, PlyError>>;
}

struct AsciiReader<'a> {
    tokens: std::str::SplitAsciiWhitespace<'a>,
}

impl ValueReader for AsciiReader<'_> {
    fn read(&mut self, _ty: ScalarType) -> Option<Result<f64, PlyError>> {
        let token = self.tokens.next()?;
        Some(
            token
                .parse::<f64>()
                .map_err(|_| PlyError::InvalidNumber(token.to_string())),
        )
    }
}

struct BinaryReader<'a> {
    data: &'a [u8],
    offset: usize,
    big_endian: bool,
}

impl ValueReader for BinaryReader<'_> {
    fn read(&mut self, ty: ScalarType) -> Option<Result<f64, PlyError>> {
        let size = ty.size();
        let raw = self.data.get(self.offset..self.offset + size)?;
        self.offset += size;

        let mut buf = [0u8; 8];
        buf[..size].copy_from_slice(raw);
        if self.big_endian {
            buf[..size].reverse();
        }

        Some(Ok(match ty {
            ScalarType::I8 => buf[0] as i8 as f64,
            ScalarType::U8 => buf[0] as f64,
            ScalarType::I16 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::U16 => u16::from_le_bytes([buf[0], buf[1]]) as f64,
            ScalarType::I32 => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::U32 => u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::F32 => f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
            ScalarType::F64 => f64::from_le_bytes(buf),
        }))
    }
}

/// Vertex and face data pulled out of the elements this viewer understands.
#[derive(Debug, Default)]
struct PlyData {
    positions: Vec<[f32; 3]>,
    colours: Vec<[f32; 4]>,
    triangles: Vec<u32>,
}

fn read_body(header: &Header, reader: &mut dyn ValueReader) -> Result<PlyData, PlyError> {
    let mut data = PlyData::default();

    for element in &header.elements {
        let xyz = match element.name.as_str() {
            "vertex" => Some((
                element.index_of(&["x"]).ok_or(PlyError::NoPositions)?,
                element.index_of(&["y"]).ok_or(PlyError::NoPositions)?,
                element.index_of(&["z"]).ok_or(PlyError::NoPositions)?,
            )),
            _ => None,
        };
        let rgb = match (
            element.index_of(&["red", "r"]),
            element.index_of(&["green", "g"]),
            element.index_of(&["blue", "b"]),
        ) {
            (Some(r), Some(g), Some(b)) => Some((r, g, b)),
            _ => None,
        };
        let alpha = element.index_of(&["alpha", "a"]);
        let face_list = element.index_of(&["vertex_indices", "vertex_index"]);

        let mut scalars = vec![0.0f64; element.properties.len()];
        let mut polygon: Vec<u32> = Vec::new();

        for _ in 0..element.count {
            polygon.clear();
            for (index, property) in element.properties.iter().enumerate() {
                match property.kind {
                    PropertyKind::Scalar(ty) => {
                        scalars[index] = next_value(reader, ty, &element.name)?;
                    }
                    PropertyKind::List { count, item } => {
                        let len = next_value(reader, count, &element.name)?.max(0.0) as usize;
                        for _ in 0..len {
                            let value = next_value(reader, item, &element.name)?;
                            if Some(index) == face_list {
                                if value < 0.0 || value > u32::MAX as f64 {
                                    return Err(PlyError::InvalidIndex(value.to_string()));
                                }
                                polygon.push(value as u32);
                            }
                        }
                    }
                }
            }

            if let Some((x, y, z)) = xyz {
                data.positions
                    .push([scalars[x] as f32, scalars[y] as f32, scalars[z] as f32]);
                if let Some((r, g, b)) = rgb {
                    let channel = |i: usize| match element.properties[i].kind {
                        PropertyKind::Scalar(ty) => (scalars[i] / ty.colour_scale()) as f32,
                        PropertyKind::List { .. } => 1.0,
                    };
                    data.colours
                        .push([channel(r), channel(g), channel(b), alpha.map_or(1.0, channel)]);
                }
            }
            if element.name == "face" {
                triangulate_fan(&polygon, &mut data.triangles);
            }
        }
    }

    if !header.elements.iter().any(|e| e.name == "vertex") {
        return Err(PlyError::NoVertices);
    }
    if let Some(&index) = data
        .triangles
        .iter()
        .find(|&&index| index as usize >= data.positions.len())
    {
        return Err(PlyError::IndexOutOfRange {
            index,
            count: data.positions.len(),
        });
    }
    Ok(data)
}

fn next_value(
    reader: &mut dyn ValueReader,
    ty: ScalarType,
    element: &str,
) -> Result<f64, PlyError> {
    reader
        .read(ty)
        .unwrap_or_else(|| Err(PlyError::Truncated(element.to_string())))
}

fn parse_ply(name: &str, bytes: &[u8]) -> Result<ParsedModel, PlyError> {
    let header = parse_header(bytes)?;
    let body = &bytes[header.body_offset..];

    let data = match header.encoding {
        Encoding::Ascii => {
            let text = String::from_utf8_lossy(body);
            let mut reader = AsciiReader {
                tokens: text.split_ascii_whitespace(),
            };
            read_body(&header, &mut reader)?
        }
        Encoding::BinaryLittleEndian | Encoding::BinaryBigEndian => {
            let mut reader = BinaryReader {
                data: body,
                offset: 0,
                big_endian: header.encoding == Encoding::BinaryBigEndian,
            };
            read_body(&header, &mut reader)?
        }
    };

    debug!(
        "PLY {}: {} vertices, {} triangles",
        name,
        data.positions.len(),
        data.triangles.len() / 3
    );

    let primitive = if data.triangles.is_empty() {
        let has_colours = data.colours.len() == data.positions.len();
        let mut mesh = Mesh::new(PrimitiveTopology::PointList, RenderAssetUsages::default())
            .with_inserted_attribute(Mesh::ATTRIBUTE_POSITION, data.positions);
        let material = if has_colours {
            mesh.insert_attribute(Mesh::ATTRIBUTE_COLOR, data.colours);
            MaterialDesc {
                unlit: true,
                ..MaterialDesc::with_color(Color::WHITE)
            }
        } else {
            MaterialDesc {
                unlit: true,
                ..MaterialDesc::with_color(PLY_COLOR)
            }
        };
        Primitive {
            name: name.to_string(),
            mesh,
            material,
            transform: Transform::IDENTITY,
        }
    } else {
        Primitive {
            name: name.to_string(),
            mesh: flat_shaded_mesh(data.positions, data.triangles),
            material: MaterialDesc::with_color(PLY_COLOR),
            transform: Transform::IDENTITY,
        }
    };

    Ok(ParsedModel::new(vec![primitive]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::render::mesh::MeshAabb;
    use crate::engine::assets::source::Source;
    use crate::engine::loading::fetch::MemoryFetcher;
    use crate::engine::scene::node::NodeBehaviour;
    use bevy::tasks::block_on;
    use std::sync::Arc;

    const QUAD: &str = "ply
format ascii 1.0
comment unit quad
element vertex 4
property float x
property float y
property float z
element face 1
property list uchar int vertex_indices
end_header
0 0 0
1 0 0
1 1 0
0 1 0
4 0 1 2 3
";

    #[test]
    fn ascii_faces_become_flat_shaded_triangles() {
        let model = parse_ply("quad.ply", QUAD.as_bytes()).unwrap();
        assert!(matches!(model.behaviour, NodeBehaviour::Static));

        let primitive = &model.primitives[0];
        assert_eq!(primitive.mesh.primitive_topology(), PrimitiveTopology::TriangleList);
        assert_eq!(primitive.mesh.count_vertices(), 6);
        assert!(primitive.mesh.attribute(Mesh::ATTRIBUTE_NORMAL).is_some());
        assert_eq!(primitive.material.base_color, PLY_COLOR);
    }

    #[test]
    fn binary_little_endian_is_read() {
        let mut bytes = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\n\
property float x\nproperty float y\nproperty float z\n\
element face 1\nproperty list uchar uint vertex_indices\nend_header\n"
            .to_vec();
        for v in [[0.0f32, 0.0, 0.0], [2.0, 0.0, 0.0], [0.0, 3.0, 0.0]] {
            for c in v {
                bytes.extend_from_slice(&c.to_le_bytes());
            }
        }
        bytes.push(3);
        for i in [0u32, 1, 2] {
            bytes.extend_from_slice(&i.to_le_bytes());
        }

        let model = parse_ply("tri.ply", &bytes).unwrap();
        let bounds = model.primitives[0].mesh.compute_aabb().unwrap();
        assert_eq!(Vec3::from(bounds.max()), Vec3::new(2.0, 3.0, 0.0));
    }

    #[test]
    fn big_endian_doubles_are_read() {
        let mut bytes =
            b"ply\nformat binary_big_endian 1.0\nelement vertex 1\nproperty double x\nproperty double y\nproperty double z\nend_header\n"
                .to_vec();
        for c in [1.5f64, -2.0, 4.0] {
            bytes.extend_from_slice(&c.to_be_bytes());
        }
        let data = {
            let header = parse_header(&bytes).unwrap();
            let mut reader = BinaryReader {
                data: &bytes[header.body_offset..],
                offset: 0,
                big_endian: true,
            };
            read_body(&header, &mut reader).unwrap()
        };
        assert_eq!(data.positions, vec![[1.5, -2.0, 4.0]]);
    }

    #[test]
    fn vertex_only_files_become_coloured_points() {
        let text = "ply
format ascii 1.0
element vertex 2
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
end_header
0 0 0 255 0 0
1 1 1 0 255 0
";
        let model = parse_ply("scan.ply", text.as_bytes()).unwrap();
        let mesh = &model.primitives[0].mesh;
        assert_eq!(mesh.primitive_topology(), PrimitiveTopology::PointList);
        assert!(mesh.attribute(Mesh::ATTRIBUTE_COLOR).is_some());
        assert!(model.primitives[0].material.unlit);
    }

    #[test]
    fn malformed_files_are_rejected() {
        assert_eq!(parse_ply("a.ply", b"solid cube").err(), Some(PlyError::MissingMagic));
        assert_eq!(
            parse_ply("a.ply", b"ply\nformat ascii 1.0\n").err(),
            Some(PlyError::UnterminatedHeader)
        );

        let truncated = QUAD.replace("4 0 1 2 3\n", "4 0 1\n");
        assert_eq!(
            parse_ply("a.ply", truncated.as_bytes()).err(),
            Some(PlyError::Truncated("face".to_string()))
        );

        let out_of_range = QUAD.replace("4 0 1 2 3", "3 0 1 9");
        assert!(matches!(
            parse_ply("a.ply", out_of_range.as_bytes()),
            Err(PlyError::IndexOutOfRange { index: 9, .. })
        ));
    }

    #[test]
    fn malformed_binary_bodies_are_rejected() {
        let header = b"ply\nformat binary_little_endian 1.0\nelement vertex 3\n\
property float x\nproperty float y\nproperty float z\n\
element face 1\nproperty list uchar int vertex_indices\nend_header\n";
        let mut body = Vec::new();
        for c in [0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0] {
            body.extend_from_slice(&c.to_le_bytes());
        }
        let face = |indices: [i32; 3]| {
            let mut bytes = vec![3u8];
            for i in indices {
                bytes.extend_from_slice(&i.to_le_bytes());
            }
            bytes
        };
        let file = |tail: &[u8]| [header.as_slice(), body.as_slice(), tail].concat();

        let mut cut = face([0, 1, 2]);
        cut.truncate(6);
        assert_eq!(
            parse_ply("a.ply", &file(&cut)).err(),
            Some(PlyError::Truncated("face".to_string()))
        );
        assert!(matches!(
            parse_ply("a.ply", &file(&face([0, 1, 3]))),
            Err(PlyError::IndexOutOfRange { index: 3, count: 3 })
        ));
        assert_eq!(
            parse_ply("a.ply", &file(&face([0, -1, 2]))).err(),
            Some(PlyError::InvalidIndex("-1".to_string()))
        );
        assert_eq!(
            parse_ply("a.ply", &file(&body[..20])).err(),
            Some(PlyError::Truncated("vertex".to_string()))
        );
    }

    #[test]
    fn parser_reads_through_the_request() {
        let request = LoadRequest::new(
            Source::bytes("quad.ply", QUAD.as_bytes().to_vec()),
            Arc::new(MemoryFetcher::new()),
        );
        let model = block_on(PlyParser.parse(request)).unwrap();
        assert_eq!(model.primitives.len(), 1);
        assert_eq!(model.primitives[0].name, "quad.ply");

        let broken = LoadRequest::new(
            Source::bytes("bad.ply", b"nope".to_vec()),
            Arc::new(MemoryFetcher::new()),
        );
        assert!(matches!(
            block_on(PlyParser.parse(broken)),
            Err(LoadError::Parse {
                format: FormatTag::Ply,
                ..
            })
        ));
    }
}
