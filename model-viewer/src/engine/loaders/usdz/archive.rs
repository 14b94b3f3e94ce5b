use bevy::prelude::*;
use std::f32::consts::FRAC_PI_2;

use super::usda::{Attribute, Layer, LayerMetadata, Prim, Specifier, Value};
use crate::engine::loaders::{flat_shaded_mesh, triangulate_fan};
use crate::engine::scene::animation::{compose_globals, wrap_time};
use crate::engine::scene::node::{Animator, MaterialDesc, Primitive};

/// Layers flattened into one prim hierarchy.
#[derive(Debug, Clone, Default)]
pub struct Stage {
    pub metadata: LayerMetadata,
    pub prims: Vec<Prim>,
}

/// Flatten a layer stack ordered strongest first.
pub fn compose(layers: Vec<Layer>) -> Stage {
    let mut layers = layers.into_iter();
    let Some(root) = layers.next() else {
        return Stage::default();
    };

    let mut stage = Stage {
        metadata: root.metadata,
        prims: root.prims,
    };
    for weaker in layers {
        let metadata = &mut stage.metadata;
        metadata.up_axis = metadata.up_axis.take().or(weaker.metadata.up_axis);
        metadata.start_time_code = metadata.start_time_code.or(weaker.metadata.start_time_code);
        metadata.end_time_code = metadata.end_time_code.or(weaker.metadata.end_time_code);
        stage.prims = merge_prims(std::mem::take(&mut stage.prims), weaker.prims);
    }
    stage
}

/// Overlay same-named prims; prims only the weaker side defines are appended.
fn merge_prims(stronger: Vec<Prim>, weaker: Vec<Prim>) -> Vec<Prim> {
    let mut merged = stronger;
    for weak in weaker {
        match merged.iter_mut().find(|prim| prim.name == weak.name) {
            Some(strong) => merge_prim(strong, weak),
            None => merged.push(weak),
        }
    }
    merged
}

fn merge_prim(strong: &mut Prim, weak: Prim) {
    if strong.specifier == Specifier::Over {
        strong.specifier = weak.specifier;
    }
    strong.type_name = strong.type_name.take().or(weak.type_name);

    for (key, value) in weak.metadata {
        if strong.metadata(&key).is_none() {
            strong.metadata.push((key, value));
        }
    }
    for attribute in weak.attributes {
        match strong.attributes.iter_mut().find(|a| a.name == attribute.name) {
            Some(existing) => existing.merge(attribute),
            None => strong.attributes.push(attribute),
        }
    }
    strong.children = merge_prims(std::mem::take(&mut strong.children), weak.children);
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpKind {
    Translate,
    Scale,
    RotateAxis(usize),
    RotateEuler([usize; 3]),
    Orient,
    Transform,
}

#[derive(Debug, Clone)]
struct XformOp {
    kind: OpKind,
    attribute: Attribute,
    inverse: bool,
}

impl XformOp {
    fn parse(token: &str, prim: &Prim) -> Option<Self> {
        let (inverse, name) = match token.strip_prefix("!invert!") {
            Some(name) => (true, name),
            None => (false, token),
        };
        let op_type = name.strip_prefix("xformOp:")?.split(':').next()?;
        let kind = match op_type {
            "translate" => OpKind::Translate,
            "scale" => OpKind::Scale,
            "rotateX" => OpKind::RotateAxis(0),
            "rotateY" => OpKind::RotateAxis(1),
            "rotateZ" => OpKind::RotateAxis(2),
            "orient" => OpKind::Orient,
            "transform" => OpKind::Transform,
            rotate => {
                let order: Vec<usize> = rotate
                    .strip_prefix("rotate")?
                    .chars()
                    .map(|axis| match axis {
                        'X' => Some(0),
                        'Y' => Some(1),
                        'Z' => Some(2),
                        _ => None,
                    })
                    .collect::<Option<_>>()?;
                OpKind::RotateEuler(order.try_into().ok()?)
            }
        };
        Some(Self {
            kind,
            attribute: prim.attribute(name)?.clone(),
            inverse,
        })
    }

    fn matrix(&self, time: f64) -> Mat4 {
        let Some(v) = numbers_at(&self.attribute, time) else {
            return Mat4::IDENTITY;
        };
        let vec3 = |v: &[f64]| match v {
            [x, y, z, ..] => Some(Vec3::new(*x as f32, *y as f32, *z as f32)),
            _ => None,
        };

        let matrix = match self.kind {
            OpKind::Translate => vec3(&v).map(Mat4::from_translation),
            OpKind::Scale => match v.as_slice() {
                [s] => Some(Mat4::from_scale(Vec3::splat(*s as f32))),
                _ => vec3(&v).map(Mat4::from_scale),
            },
            OpKind::RotateAxis(axis) => v.first().map(|&angle| axis_rotation(axis, angle)),
            OpKind::RotateEuler([a, b, c]) => (v.len() >= 3).then(|| {
                axis_rotation(c, v[c]) * axis_rotation(b, v[b]) * axis_rotation(a, v[a])
            }),
            OpKind::Orient => match v.as_slice() {
                [w, x, y, z] => Some(Mat4::from_quat(
                    Quat::from_xyzw(*x as f32, *y as f32, *z as f32, *w as f32).normalize(),
                )),
                _ => None,
            },
            // Rows are authored with the translation last.
            OpKind::Transform => (v.len() == 16).then(|| {
                let mut rows = [[0.0f32; 4]; 4];
                for (i, value) in v.iter().enumerate() {
                    rows[i / 4][i % 4] = *value as f32;
                }
                Mat4::from_cols_array_2d(&rows)
            }),
        }
        .unwrap_or(Mat4::IDENTITY);

        if self.inverse { matrix.inverse() } else { matrix }
    }
}

fn axis_rotation(axis: usize, degrees: f64) -> Mat4 {
    let radians = (degrees as f32).to_radians();
    match axis {
        0 => Mat4::from_rotation_x(radians),
        1 => Mat4::from_rotation_y(radians),
        _ => Mat4::from_rotation_z(radians),
    }
}

/// Attribute value at a time code. Time samples win over the default and
/// are blended element-wise between keys.
fn numbers_at(attribute: &Attribute, time: f64) -> Option<Vec<f64>> {
    let samples = &attribute.samples;
    if samples.is_empty() {
        return attribute.default.as_ref().map(Value::numbers);
    }

    let next = samples.partition_point(|(key, _)| *key <= time);
    if next == 0 {
        return Some(samples[0].1.numbers());
    }
    if next >= samples.len() {
        return Some(samples[samples.len() - 1].1.numbers());
    }

    let (t0, v0) = &samples[next - 1];
    let (t1, v1) = &samples[next];
    let (a, b) = (v0.numbers(), v1.numbers());
    if a.len() != b.len() || t1 <= t0 {
        return Some(a);
    }
    let t = (time - t0) / (t1 - t0);
    Some(a.iter().zip(&b).map(|(a, b)| a + (b - a) * t).collect())
}

/// Value used for geometry, which is not animated.
fn static_numbers(prim: &Prim, name: &str) -> Option<Vec<f64>> {
    let attribute = prim.attribute(name)?;
    attribute
        .default
        .as_ref()
        .or_else(|| attribute.samples.first().map(|(_, value)| value))
        .map(Value::numbers)
}

fn token<'a>(prim: &'a Prim, name: &str) -> Option<&'a str> {
    prim.attribute(name)?.default.as_ref()?.as_str()
}

#[derive(Debug, Clone)]
struct XformNode {
    parent: Option<usize>,
    ops: Vec<XformOp>,
}

/// Renderable primitives of a stage plus the animator that poses them.
pub struct ArchiveScene {
    pub primitives: Vec<Primitive>,
    pub instance: ArchiveInstance,
}

/// Build primitives for every active, visible, defined prim.
///
/// `base` is where the primitives will start in the target container.
pub fn build_scene(stage: &Stage, base: usize) -> Result<ArchiveScene, String> {
    let mut builder = SceneBuilder::default();
    for prim in &stage.prims {
        builder.visit(prim, None, "")?;
    }

    let root = if stage.metadata.up_axis.as_deref() == Some("Z") {
        Mat4::from_rotation_x(-FRAC_PI_2)
    } else {
        Mat4::IDENTITY
    };

    let sample_times = builder
        .nodes
        .iter()
        .flat_map(|node| &node.ops)
        .flat_map(|op| op.attribute.samples.iter().map(|(time, _)| *time));
    let (first, last) = sample_times.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), t| {
        (lo.min(t), hi.max(t))
    });
    let start = stage
        .metadata
        .start_time_code
        .unwrap_or(if first.is_finite() { first } else { 0.0 });
    let end = stage
        .metadata
        .end_time_code
        .unwrap_or(if last.is_finite() { last } else { start });

    let (slots, mut primitives): (Vec<usize>, Vec<Primitive>) = builder.geometry.into_iter().unzip();
    let instance = ArchiveInstance {
        parents: builder.nodes.iter().map(|node| node.parent).collect(),
        nodes: builder.nodes,
        primitive_slots: slots,
        base,
        root,
        time_codes_per_second: stage.metadata.time_codes_per_second,
        start,
        end,
    };

    for (primitive, transform) in primitives.iter_mut().zip(instance.transforms_at(start)) {
        primitive.transform = transform;
    }
    Ok(ArchiveScene {
        primitives,
        instance,
    })
}

#[derive(Default)]
struct SceneBuilder {
    nodes: Vec<XformNode>,
    geometry: Vec<(usize, Primitive)>,
}

impl SceneBuilder {
    fn visit(&mut self, prim: &Prim, parent: Option<usize>, parent_path: &str) -> Result<(), String> {
        if prim.specifier != Specifier::Def
            || prim.metadata("active") == Some(&Value::Bool(false))
            || token(prim, "visibility") == Some("invisible")
        {
            return Ok(());
        }

        let path = format!("{}/{}", parent_path, prim.name);
        let mut ops = Vec::new();
        let mut resets = false;
        let order = prim
            .attribute("xformOpOrder")
            .and_then(|a| a.default.as_ref())
            .and_then(Value::as_list)
            .unwrap_or_default();
        for entry in order.iter().filter_map(Value::as_str) {
            if entry == "!resetXformStack!" {
                resets = true;
                ops.clear();
                continue;
            }
            match XformOp::parse(entry, prim) {
                Some(op) => ops.push(op),
                None => debug!("Ignoring xform op `{}` on {}", entry, path),
            }
        }

        let slot = self.nodes.len();
        self.nodes.push(XformNode {
            parent: if resets { None } else { parent },
            ops,
        });

        if let Some(mesh) = geometry(prim).map_err(|e| format!("{}: {}", path, e))? {
            self.geometry.push((
                slot,
                Primitive {
                    name: path.clone(),
                    mesh,
                    material: material(prim),
                    transform: Transform::IDENTITY,
                },
            ));
        }

        for child in &prim.children {
            self.visit(child, Some(slot), &path)?;
        }
        Ok(())
    }
}

fn geometry(prim: &Prim) -> Result<Option<Mesh>, String> {
    match prim.type_name.as_deref() {
        Some("Mesh") => polygon_mesh(prim),
        Some("Cube") => {
            let size = static_numbers(prim, "size")
                .and_then(|v| v.first().copied())
                .unwrap_or(2.0) as f32;
            Ok(Some(Mesh::from(Cuboid::new(size, size, size))))
        }
        Some("Sphere") => {
            let radius = static_numbers(prim, "radius")
                .and_then(|v| v.first().copied())
                .unwrap_or(1.0) as f32;
            Ok(Some(Mesh::from(Sphere::new(radius))))
        }
        _ => Ok(None),
    }
}

fn polygon_mesh(prim: &Prim) -> Result<Option<Mesh>, String> {
    let positions: Vec<[f32; 3]> = static_numbers(prim, "points")
        .unwrap_or_default()
        .chunks_exact(3)
        .map(|p| [p[0] as f32, p[1] as f32, p[2] as f32])
        .collect();
    let counts = static_numbers(prim, "faceVertexCounts").unwrap_or_default();
    let indices = static_numbers(prim, "faceVertexIndices").unwrap_or_default();

    let mut triangles = Vec::new();
    let mut cursor: usize = 0;
    let mut polygon = Vec::new();
    for count in counts {
        let count = whole_number(count)
            .ok_or_else(|| format!("invalid face vertex count {}", count))?;
        let end = cursor
            .checked_add(count)
            .filter(|&end| end <= indices.len())
            .ok_or("faceVertexIndices is shorter than faceVertexCounts")?;
        polygon.clear();
        for &index in &indices[cursor..end] {
            match whole_number(index) {
                Some(i) if i < positions.len() => polygon.push(i as u32),
                _ => {
                    return Err(format!(
                        "face index {} out of range for {} points",
                        index,
                        positions.len()
                    ));
                }
            }
        }
        triangulate_fan(&polygon, &mut triangles);
        cursor = end;
    }

    if triangles.is_empty() {
        return Ok(None);
    }
    if token(prim, "orientation") == Some("leftHanded") {
        for triangle in triangles.chunks_exact_mut(3) {
            triangle.swap(1, 2);
        }
    }
    Ok(Some(flat_shaded_mesh(positions, triangles)))
}

/// Non-negative integral value that fits a 32 bit index.
fn whole_number(value: f64) -> Option<usize> {
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u32::MAX as f64)
        .then_some(value as usize)
}

fn material(prim: &Prim) -> MaterialDesc {
    let mut material = match static_numbers(prim, "primvars:displayColor").as_deref() {
        Some([r, g, b, ..]) => MaterialDesc::with_color(Color::linear_rgb(*r as f32, *g as f32, *b as f32)),
        _ => MaterialDesc::default(),
    };
    material.double_sided = prim
        .attribute("doubleSided")
        .and_then(|a| a.default.as_ref())
        == Some(&Value::Bool(true));
    material
}

/// Poses an archive's primitives from its transform hierarchy, looping the
/// authored time range.
pub struct ArchiveInstance {
    nodes: Vec<XformNode>,
    parents: Vec<Option<usize>>,
    primitive_slots: Vec<usize>,
    base: usize,
    root: Mat4,
    time_codes_per_second: f64,
    start: f64,
    end: f64,
}

impl ArchiveInstance {
    pub fn is_time_varying(&self) -> bool {
        self.end > self.start
    }

    fn transforms_at(&self, time: f64) -> Vec<Transform> {
        let locals: Vec<Mat4> = self
            .nodes
            .iter()
            .map(|node| {
                node.ops
                    .iter()
                    .fold(Mat4::IDENTITY, |matrix, op| matrix * op.matrix(time))
            })
            .collect();
        let globals = compose_globals(&self.parents, &locals);
        self.primitive_slots
            .iter()
            .map(|&slot| Transform::from_matrix(self.root * globals[slot]))
            .collect()
    }
}

impl Animator for ArchiveInstance {
    fn update(&mut self, elapsed: f64, primitives: &mut [Primitive]) {
        if !self.is_time_varying() {
            return;
        }
        let time = wrap_time(elapsed * self.time_codes_per_second, self.start, self.end);
        let targets = primitives.iter_mut().skip(self.base);
        for (primitive, transform) in targets.zip(self.transforms_at(time)) {
            primitive.transform = transform;
        }
    }

    fn dispose(&mut self) {
        self.nodes.clear();
        self.parents.clear();
        self.primitive_slots.clear();
        self.end = self.start;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::render::mesh::MeshAabb;
    use crate::engine::loaders::usdz::usda::parse_layer;
    use approx::assert_relative_eq;

    fn stage(text: &str) -> Stage {
        compose(vec![parse_layer(text).unwrap()])
    }

    const TRIANGLE: &str = r#"
        int[] faceVertexCounts = [3]
        int[] faceVertexIndices = [0, 1, 2]
        point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
    "#;

    fn with_triangle(template: &str) -> String {
        template.replace("TRIANGLE", TRIANGLE)
    }

    #[test]
    fn xform_ops_apply_in_authored_order() {
        let text = with_triangle(
            r#"#usda 1.0
def Xform "Root" {
    double3 xformOp:translate = (10, 0, 0)
    float xformOp:rotateY = 90
    uniform token[] xformOpOrder = ["xformOp:translate", "xformOp:rotateY"]
    def Mesh "Tri" { TRIANGLE }
}
"#,
        );
        let scene = build_scene(&stage(&text), 0).unwrap();
        let transform = scene.primitives[0].transform;
        let point = transform.transform_point(Vec3::X);
        assert_relative_eq!(point.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(point.z, -1.0, epsilon = 1e-5);
        assert_eq!(scene.primitives[0].name, "/Root/Tri");
    }

    #[test]
    fn matrix_rows_and_inverted_ops() {
        let text = with_triangle(
            r#"#usda 1.0
def Mesh "Tri" {
    TRIANGLE
    matrix4d xformOp:transform = ((1, 0, 0, 0), (0, 1, 0, 0), (0, 0, 1, 0), (3, 4, 5, 1))
    double3 xformOp:translate:offset = (1, 1, 1)
    uniform token[] xformOpOrder = ["xformOp:transform", "!invert!xformOp:translate:offset"]
}
"#,
        );
        let scene = build_scene(&stage(&text), 0).unwrap();
        assert_eq!(
            scene.primitives[0].transform.translation,
            Vec3::new(2.0, 3.0, 4.0)
        );
    }

    #[test]
    fn euler_rotation_applies_first_axis_first() {
        let op = XformOp {
            kind: OpKind::RotateEuler([0, 1, 2]),
            attribute: Attribute {
                name: "xformOp:rotateXYZ".into(),
                type_name: "float3".into(),
                default: Some(Value::Tuple(vec![
                    Value::Number(90.0),
                    Value::Number(0.0),
                    Value::Number(90.0),
                ])),
                samples: Vec::new(),
            },
            inverse: false,
        };
        // X then Z: +Y goes to +Z, and stays there.
        let point = op.matrix(0.0).transform_point3(Vec3::Y);
        assert_relative_eq!(point.z, 1.0, epsilon = 1e-5);
        // +X is untouched by X, then goes to +Y.
        let point = op.matrix(0.0).transform_point3(Vec3::X);
        assert_relative_eq!(point.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn stronger_layers_win_and_over_only_prims_are_skipped() {
        let strong = parse_layer(
            r#"#usda 1.0
over "Root" {
    double3 xformOp:translate = (5, 0, 0)
}
over "Orphan" {
    def Cube "Lost" {}
}
"#,
        )
        .unwrap();
        let weak = parse_layer(&with_triangle(
            r#"#usda 1.0
(
    upAxis = "Y"
)
def Xform "Root" {
    double3 xformOp:translate = (1, 0, 0)
    uniform token[] xformOpOrder = ["xformOp:translate"]
    def Mesh "Tri" { TRIANGLE }
}
"#,
        ))
        .unwrap();

        let stage = compose(vec![strong, weak]);
        assert_eq!(stage.metadata.up_axis.as_deref(), Some("Y"));

        let scene = build_scene(&stage, 0).unwrap();
        assert_eq!(scene.primitives.len(), 1);
        assert_eq!(scene.primitives[0].transform.translation.x, 5.0);
    }

    #[test]
    fn inactive_invisible_and_class_prims_are_skipped() {
        let text = r#"#usda 1.0
def Cube "Shown" { double size = 4 }
def Cube "Hidden" { token visibility = "invisible" }
def Cube "Off" ( active = false ) {}
class Cube "Template" {}
"#;
        let scene = build_scene(&stage(text), 0).unwrap();
        assert_eq!(scene.primitives.len(), 1);
        let aabb = scene.primitives[0].mesh.compute_aabb().unwrap();
        assert_relative_eq!(aabb.half_extents.x, 2.0);
    }

    #[test]
    fn left_handed_meshes_flip_winding() {
        let right = build_scene(&stage(&with_triangle("#usda 1.0\ndef Mesh \"T\" { TRIANGLE }")), 0)
            .unwrap();
        let left = build_scene(
            &stage(&with_triangle(
                "#usda 1.0\ndef Mesh \"T\" { TRIANGLE\n uniform token orientation = \"leftHanded\" }",
            )),
            0,
        )
        .unwrap();

        let normal = |scene: &ArchiveScene| -> [f32; 3] {
            match scene.primitives[0].mesh.attribute(Mesh::ATTRIBUTE_NORMAL) {
                Some(bevy::render::mesh::VertexAttributeValues::Float32x3(n)) => n[0],
                _ => panic!("missing normals"),
            }
        };
        assert_relative_eq!(normal(&right)[2], 1.0);
        assert_relative_eq!(normal(&left)[2], -1.0);
    }

    #[test]
    fn out_of_range_face_indices_fail() {
        let text = r#"#usda 1.0
def Mesh "Bad" {
    int[] faceVertexCounts = [3]
    int[] faceVertexIndices = [0, 1, 7]
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
}
"#;
        let error = build_scene(&stage(text), 0).err().unwrap();
        assert!(error.starts_with("/Bad:"));
    }

    #[test]
    fn malformed_face_counts_fail() {
        for counts in ["[3, 1e30]", "[-3]", "[1.5]", "[3, 4]"] {
            let text = format!(
                r#"#usda 1.0
def Mesh "Bad" {{
    int[] faceVertexCounts = {counts}
    int[] faceVertexIndices = [0, 1, 2]
    point3f[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
}}
"#
            );
            let error = build_scene(&stage(&text), 0).err().unwrap();
            assert!(error.starts_with("/Bad:"), "{counts}: {error}");
        }
    }

    #[test]
    fn time_samples_loop_over_the_authored_range() {
        let text = with_triangle(
            r#"#usda 1.0
(
    timeCodesPerSecond = 10
)
def Mesh "Tri" {
    TRIANGLE
    double3 xformOp:translate.timeSamples = {
        0: (0, 0, 0),
        20: (4, 0, 0),
    }
    uniform token[] xformOpOrder = ["xformOp:translate"]
}
"#,
        );
        let mut scene = build_scene(&stage(&text), 0).unwrap();
        assert!(scene.instance.is_time_varying());
        assert_eq!(scene.primitives[0].transform.translation.x, 0.0);

        scene.instance.update(0.5, &mut scene.primitives);
        assert_relative_eq!(scene.primitives[0].transform.translation.x, 1.0);

        scene.instance.update(2.5, &mut scene.primitives);
        assert_relative_eq!(scene.primitives[0].transform.translation.x, 1.0);

        scene.instance.dispose();
        scene.instance.update(1.5, &mut scene.primitives);
        assert_relative_eq!(scene.primitives[0].transform.translation.x, 1.0);
    }

    #[test]
    fn z_up_stages_are_rotated_to_y_up() {
        let text = r#"#usda 1.0
(
    upAxis = "Z"
)
def Cube "Box" {
    double3 xformOp:translate = (0, 0, 3)
    uniform token[] xformOpOrder = ["xformOp:translate"]
}
"#;
        let scene = build_scene(&stage(text), 0).unwrap();
        let translation = scene.primitives[0].transform.translation;
        assert_relative_eq!(translation.y, 3.0, epsilon = 1e-5);
        assert_relative_eq!(translation.z, 0.0, epsilon = 1e-5);
    }
}
