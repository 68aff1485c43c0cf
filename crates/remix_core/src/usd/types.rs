//! USD layer data types.
//!
//! These mirror the text layout of a USDA layer: layer metadata, prim specs
//! with their specifier, metadata, properties and children. Nothing here is
//! composed; see `stage` for that.

use remix_math::{EulerRot, Mat4, Mat4Ext, Quat, Vec3};
use serde::{Deserialize, Serialize};

use super::value::Value;

/// Prim specifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Specifier {
    Def,
    Over,
    Class,
}

impl Specifier {
    pub fn keyword(&self) -> &'static str {
        match self {
            Specifier::Def => "def",
            Specifier::Over => "over",
            Specifier::Class => "class",
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "def" => Some(Specifier::Def),
            "over" => Some(Specifier::Over),
            "class" => Some(Specifier::Class),
            _ => None,
        }
    }
}

/// List-op qualifier in front of a metadata entry or relationship.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ListOp {
    #[default]
    Explicit,
    Prepend,
    Append,
    Add,
    Delete,
    Reorder,
}

impl ListOp {
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            ListOp::Explicit => None,
            ListOp::Prepend => Some("prepend"),
            ListOp::Append => Some("append"),
            ListOp::Add => Some("add"),
            ListOp::Delete => Some("delete"),
            ListOp::Reorder => Some("reorder"),
        }
    }

    pub fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "prepend" => Some(ListOp::Prepend),
            "append" => Some(ListOp::Append),
            "add" => Some(ListOp::Add),
            "delete" => Some(ListOp::Delete),
            "reorder" => Some(ListOp::Reorder),
            _ => None,
        }
    }
}

/// A `key = value` metadata entry, optionally list-op qualified.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetadataEntry {
    pub list_op: ListOp,
    pub key: String,
    pub value: Value,
}

impl MetadataEntry {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            list_op: ListOp::Explicit,
            key: key.into(),
            value,
        }
    }

    pub fn with_list_op(mut self, list_op: ListOp) -> Self {
        self.list_op = list_op;
        self
    }
}

/// Find the first metadata entry with `key` that is not a delete op.
pub fn find_metadata<'a>(entries: &'a [MetadataEntry], key: &str) -> Option<&'a MetadataEntry> {
    entries
        .iter()
        .find(|e| e.key == key && e.list_op != ListOp::Delete)
}

/// Replace every entry for `key` with a single explicit one.
pub fn set_metadata(entries: &mut Vec<MetadataEntry>, key: &str, value: Value) {
    entries.retain(|e| e.key != key);
    entries.push(MetadataEntry::new(key, value));
}

/// Attribute variability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variability {
    #[default]
    Varying,
    Uniform,
}

/// A USD attribute spec.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    /// Declared type, including `[]` for arrays
    pub type_name: String,
    pub custom: bool,
    pub variability: Variability,
    pub default: Option<Value>,
    /// `.connect` targets
    pub connections: Vec<String>,
    pub time_samples: Option<Vec<(f64, Value)>>,
    pub metadata: Vec<MetadataEntry>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_connection(mut self, target: impl Into<String>) -> Self {
        self.connections.push(target.into());
        self
    }

    pub fn uniform(mut self) -> Self {
        self.variability = Variability::Uniform;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        set_metadata(&mut self.metadata, key, value);
        self
    }

    /// Default value, falling back to the earliest time sample.
    pub fn value(&self) -> Option<&Value> {
        self.default.as_ref().or_else(|| {
            self.time_samples
                .as_ref()
                .and_then(|samples| samples.first())
                .map(|(_, v)| v)
        })
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        find_metadata(&self.metadata, key).map(|e| &e.value)
    }
}

/// A USD relationship spec.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub name: String,
    pub custom: bool,
    pub list_op: ListOp,
    pub targets: Vec<String>,
    pub metadata: Vec<MetadataEntry>,
}

impl Relationship {
    pub fn new(name: impl Into<String>, targets: Vec<String>) -> Self {
        Self {
            name: name.into(),
            targets,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        set_metadata(&mut self.metadata, key, value);
        self
    }
}

/// Either kind of property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Property {
    Attribute(Attribute),
    Relationship(Relationship),
}

impl Property {
    pub fn name(&self) -> &str {
        match self {
            Property::Attribute(a) => &a.name,
            Property::Relationship(r) => &r.name,
        }
    }
}

/// A prim spec as authored in one layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrimSpec {
    pub specifier: Specifier,
    pub type_name: Option<String>,
    pub name: String,
    pub doc: Option<String>,
    pub metadata: Vec<MetadataEntry>,
    pub properties: Vec<Property>,
    pub children: Vec<PrimSpec>,
    /// Blocks kept as source text (variant sets)
    pub raw_blocks: Vec<String>,
}

impl PrimSpec {
    pub fn new(specifier: Specifier, type_name: Option<&str>, name: impl Into<String>) -> Self {
        Self {
            specifier,
            type_name: type_name.map(str::to_string),
            name: name.into(),
            doc: None,
            metadata: Vec::new(),
            properties: Vec::new(),
            children: Vec::new(),
            raw_blocks: Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<&PrimSpec> {
        self.children.iter().find(|c| c.name == name)
    }

    pub fn child_mut(&mut self, name: &str) -> Option<&mut PrimSpec> {
        self.children.iter_mut().find(|c| c.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&Property> {
        self.properties.iter().find(|p| p.name() == name)
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.properties.iter().find_map(|p| match p {
            Property::Attribute(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.properties.iter_mut().find_map(|p| match p {
            Property::Attribute(a) if a.name == name => Some(a),
            _ => None,
        })
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        self.properties.iter().find_map(|p| match p {
            Property::Relationship(r) if r.name == name => Some(r),
            _ => None,
        })
    }

    /// Insert or replace a property by name, keeping its position.
    pub fn set_property(&mut self, property: Property) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.name() == property.name())
        {
            Some(existing) => *existing = property,
            None => self.properties.push(property),
        }
    }

    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.set_property(Property::Attribute(attribute));
    }

    pub fn set_relationship(&mut self, relationship: Relationship) {
        self.set_property(Property::Relationship(relationship));
    }

    pub fn remove_property(&mut self, name: &str) -> bool {
        let before = self.properties.len();
        self.properties.retain(|p| p.name() != name);
        before != self.properties.len()
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        find_metadata(&self.metadata, key).map(|e| &e.value)
    }

    /// Applied API schemas across every list-op form.
    pub fn api_schemas(&self) -> Vec<String> {
        let mut out = Vec::new();
        for entry in self.metadata.iter().filter(|e| e.key == "apiSchemas") {
            if entry.list_op == ListOp::Delete {
                continue;
            }
            for schema in entry.value.as_string_array().unwrap_or_default() {
                if !out.contains(&schema) {
                    out.push(schema);
                }
            }
        }
        out
    }

    /// Prepend an API schema unless already applied.
    pub fn add_api_schema(&mut self, schema: &str) {
        if self.api_schemas().iter().any(|s| s == schema) {
            return;
        }
        if let Some(entry) = self
            .metadata
            .iter_mut()
            .find(|e| e.key == "apiSchemas" && e.list_op != ListOp::Delete)
        {
            match &mut entry.value {
                Value::Array(items) => items.push(Value::String(schema.to_string())),
                other => {
                    let previous = std::mem::replace(other, Value::None);
                    *other = Value::Array(vec![previous, Value::String(schema.to_string())]);
                }
            }
        } else {
            self.metadata.push(
                MetadataEntry::new(
                    "apiSchemas",
                    Value::Array(vec![Value::String(schema.to_string())]),
                )
                .with_list_op(ListOp::Prepend),
            );
        }
    }
}

/// A parsed USDA layer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Layer {
    pub doc: Option<String>,
    pub metadata: Vec<MetadataEntry>,
    pub prims: Vec<PrimSpec>,
}

impl Layer {
    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        find_metadata(&self.metadata, key).map(|e| &e.value)
    }

    /// Sublayer asset paths, strongest first.
    pub fn sublayers(&self) -> Vec<String> {
        self.metadata_value("subLayers")
            .and_then(Value::as_string_array)
            .unwrap_or_default()
    }

    pub fn set_sublayers(&mut self, paths: &[String]) {
        let value = Value::Array(paths.iter().map(|p| Value::Asset(p.clone())).collect());
        match self.metadata.iter_mut().find(|e| e.key == "subLayers") {
            Some(entry) => entry.value = value,
            None => self.metadata.push(MetadataEntry::new("subLayers", value)),
        }
    }

    pub fn default_prim(&self) -> Option<&str> {
        self.metadata_value("defaultPrim").and_then(Value::as_str)
    }

    pub fn up_axis(&self) -> Option<&str> {
        self.metadata_value("upAxis").and_then(Value::as_str)
    }

    pub fn meters_per_unit(&self) -> Option<f64> {
        self.metadata_value("metersPerUnit").and_then(Value::as_f64)
    }

    /// Entry of the `customLayerData` dictionary.
    pub fn custom_layer_data(&self, key: &str) -> Option<&Value> {
        self.metadata_value("customLayerData")
            .and_then(|dict| dict.dict_get(key))
    }

    pub fn prim(&self, path: &str) -> Option<&PrimSpec> {
        let mut names = split_path(path);
        let first = names.next()?;
        let mut prim = self.prims.iter().find(|p| p.name == first)?;
        for name in names {
            prim = prim.child(name)?;
        }
        Some(prim)
    }

    pub fn prim_mut(&mut self, path: &str) -> Option<&mut PrimSpec> {
        let mut names = split_path(path);
        let first = names.next()?;
        let mut prim = self.prims.iter_mut().find(|p| p.name == first)?;
        for name in names {
            prim = prim.child_mut(name)?;
        }
        Some(prim)
    }

    /// Get the prim at `path`, creating missing ancestors as typeless `over`s
    /// and the leaf with `specifier`/`type_name`. Returns `None` for `/`.
    pub fn ensure_prim(
        &mut self,
        path: &str,
        specifier: Specifier,
        type_name: Option<&str>,
    ) -> Option<&mut PrimSpec> {
        let names: Vec<&str> = split_path(path).collect();
        if names.is_empty() {
            return None;
        }
        let last = names.len() - 1;
        let mut siblings = &mut self.prims;
        let mut index = 0;
        for (depth, name) in names.iter().enumerate() {
            index = match siblings.iter().position(|p| p.name == *name) {
                Some(i) => i,
                None => {
                    let spec = if depth == last {
                        PrimSpec::new(specifier, type_name, *name)
                    } else {
                        PrimSpec::new(Specifier::Over, None, *name)
                    };
                    siblings.push(spec);
                    siblings.len() - 1
                }
            };
            if depth < last {
                siblings = &mut siblings[index].children;
            }
        }
        siblings.get_mut(index)
    }

    /// Remove the prim at `path` with its subtree.
    pub fn remove_prim(&mut self, path: &str) -> Option<PrimSpec> {
        let (parent, name) = split_parent(path)?;
        let siblings = if parent == "/" {
            &mut self.prims
        } else {
            &mut self.prim_mut(parent)?.children
        };
        let index = siblings.iter().position(|p| p.name == name)?;
        Some(siblings.remove(index))
    }

    /// Visit every prim spec with its absolute path, parents first.
    pub fn walk(&self, mut visit: impl FnMut(&str, &PrimSpec)) {
        fn recurse(prim: &PrimSpec, parent: &str, visit: &mut dyn FnMut(&str, &PrimSpec)) {
            let path = join_path(parent, &prim.name);
            visit(&path, prim);
            for child in &prim.children {
                recurse(child, &path, visit);
            }
        }
        for prim in &self.prims {
            recurse(prim, "/", &mut visit);
        }
    }
}

/// Split `/A/B/C` into its names.
pub fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split a prim path into (parent, name). The parent of a root prim is `/`.
pub fn split_parent(path: &str) -> Option<(&str, &str)> {
    let trimmed = path.trim_end_matches('/');
    let idx = trimmed.rfind('/')?;
    let name = &trimmed[idx + 1..];
    if name.is_empty() {
        return None;
    }
    let parent = if idx == 0 { "/" } else { &trimmed[..idx] };
    Some((parent, name))
}

pub fn join_path(parent: &str, name: &str) -> String {
    if parent == "/" || parent.is_empty() {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Prim part of a property path (`/A/B.outputs:out` -> `/A/B`).
pub fn prim_of_property_path(path: &str) -> &str {
    let last_slash = path.rfind('/').unwrap_or(0);
    match path[last_slash..].find('.') {
        Some(dot) => &path[..last_slash + dot],
        None => path,
    }
}

/// Rebase `path` from the namespace rooted at `from` onto `to`.
///
/// Paths outside `from` are returned unchanged.
pub fn remap_path(path: &str, from: &str, to: &str) -> String {
    if path == from {
        return to.to_string();
    }
    if let Some(rest) = path.strip_prefix(from) {
        if rest.starts_with('/') || rest.starts_with('.') {
            return format!("{}{}", to, rest);
        }
    }
    path.to_string()
}

/// Sanitize a string into a valid prim name.
///
/// Invalid characters become `_`; a name starting with a digit gets a `_`
/// prefix.
pub fn sanitize_prim_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() {
        return "_".to_string();
    }
    if !out.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') {
        out.insert(0, '_');
    }
    out
}

/// A single transform operation.
#[derive(Clone, Debug, PartialEq)]
pub enum XformOp {
    Translate(Vec3),
    Scale(Vec3),
    RotateX(f32),
    RotateY(f32),
    RotateZ(f32),
    /// Euler rotation in degrees, applied in the order of the op name
    Rotate(EulerOrder, Vec3),
    Orient(Quat),
    Transform(Mat4),
}

/// Order of a three-axis rotate op (`rotateXYZ` rotates about X first).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EulerOrder {
    Xyz,
    Xzy,
    Yxz,
    Yzx,
    Zxy,
    Zyx,
}

impl XformOp {
    /// Decode an op from its attribute name (`xformOp:rotateXYZ:pivot`) and value.
    pub fn from_attribute(name: &str, value: &Value) -> Option<Self> {
        let kind = name.strip_prefix("xformOp:")?;
        let kind = kind.split(':').next()?;
        let op = match kind {
            "translate" => XformOp::Translate(value.as_vec3()?),
            "scale" => match value.as_vec3() {
                Some(v) => XformOp::Scale(v),
                None => XformOp::Scale(Vec3::splat(value.as_f32()?)),
            },
            "rotateX" => XformOp::RotateX(value.as_f32()?),
            "rotateY" => XformOp::RotateY(value.as_f32()?),
            "rotateZ" => XformOp::RotateZ(value.as_f32()?),
            "rotateXYZ" => XformOp::Rotate(EulerOrder::Xyz, value.as_vec3()?),
            "rotateXZY" => XformOp::Rotate(EulerOrder::Xzy, value.as_vec3()?),
            "rotateYXZ" => XformOp::Rotate(EulerOrder::Yxz, value.as_vec3()?),
            "rotateYZX" => XformOp::Rotate(EulerOrder::Yzx, value.as_vec3()?),
            "rotateZXY" => XformOp::Rotate(EulerOrder::Zxy, value.as_vec3()?),
            "rotateZYX" => XformOp::Rotate(EulerOrder::Zyx, value.as_vec3()?),
            "orient" => {
                // USD quaternion literals are (real, i, j, k)
                let q = value.as_f64_tuple()?;
                if q.len() != 4 {
                    return None;
                }
                XformOp::Orient(
                    Quat::from_xyzw(q[1] as f32, q[2] as f32, q[3] as f32, q[0] as f32)
                        .normalize(),
                )
            }
            "transform" => XformOp::Transform(Mat4::from_usd_rows(value.as_matrix()?)),
            _ => return None,
        };
        Some(op)
    }

    /// Convert this op to a 4x4 matrix.
    pub fn to_matrix(&self) -> Mat4 {
        match self {
            XformOp::Translate(t) => Mat4::from_translation(*t),
            XformOp::Scale(s) => Mat4::from_scale(*s),
            XformOp::RotateX(deg) => Mat4::from_rotation_x(deg.to_radians()),
            XformOp::RotateY(deg) => Mat4::from_rotation_y(deg.to_radians()),
            XformOp::RotateZ(deg) => Mat4::from_rotation_z(deg.to_radians()),
            XformOp::Rotate(order, deg) => {
                let (x, y, z) = (
                    deg.x.to_radians(),
                    deg.y.to_radians(),
                    deg.z.to_radians(),
                );
                // First named axis is applied first, so it sits rightmost.
                let (rot, a, b, c) = match order {
                    EulerOrder::Xyz => (EulerRot::ZYX, z, y, x),
                    EulerOrder::Xzy => (EulerRot::YZX, y, z, x),
                    EulerOrder::Yxz => (EulerRot::ZXY, z, x, y),
                    EulerOrder::Yzx => (EulerRot::XZY, x, z, y),
                    EulerOrder::Zxy => (EulerRot::YXZ, y, x, z),
                    EulerOrder::Zyx => (EulerRot::XYZ, x, y, z),
                };
                Mat4::from_quat(Quat::from_euler(rot, a, b, c))
            }
            XformOp::Orient(q) => Mat4::from_quat(*q),
            XformOp::Transform(m) => *m,
        }
    }
}

/// Combine a list of xformOps into a single matrix.
pub fn compose_xform_ops(ops: &[XformOp]) -> Mat4 {
    let mut result = Mat4::IDENTITY;
    for op in ops {
        result *= op.to_matrix();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_parent() {
        assert_eq!(split_parent("/A"), Some(("/", "A")));
        assert_eq!(split_parent("/A/B/C"), Some(("/A/B", "C")));
        assert_eq!(split_parent("/"), None);
    }

    #[test]
    fn test_property_path_prim() {
        assert_eq!(
            prim_of_property_path("/Looks/Mat/Shader.outputs:out"),
            "/Looks/Mat/Shader"
        );
        assert_eq!(prim_of_property_path("/Looks/Mat"), "/Looks/Mat");
    }

    #[test]
    fn test_remap_path() {
        assert_eq!(remap_path("/Src/Looks/M", "/Src", "/Dst"), "/Dst/Looks/M");
        assert_eq!(remap_path("/Src.outputs:x", "/Src", "/Dst"), "/Dst.outputs:x");
        assert_eq!(remap_path("/SrcOther", "/Src", "/Dst"), "/SrcOther");
    }

    #[test]
    fn test_sanitize_prim_name() {
        assert_eq!(sanitize_prim_name("mesh.001"), "mesh_001");
        assert_eq!(sanitize_prim_name("0ABC"), "_0ABC");
        assert_eq!(sanitize_prim_name("My Mesh-2"), "My_Mesh_2");
        assert_eq!(sanitize_prim_name(""), "_");
    }

    #[test]
    fn test_ensure_prim_creates_overs() {
        let mut layer = Layer::default();
        layer
            .ensure_prim("/RootNode/meshes/mesh_A", Specifier::Def, Some("Mesh"))
            .unwrap();
        assert!(layer.ensure_prim("/", Specifier::Def, None).is_none());
        let root = layer.prim("/RootNode").unwrap();
        assert_eq!(root.specifier, Specifier::Over);
        let mesh = layer.prim("/RootNode/meshes/mesh_A").unwrap();
        assert_eq!(mesh.specifier, Specifier::Def);
        assert_eq!(mesh.type_name.as_deref(), Some("Mesh"));

        // Existing prims are returned untouched
        layer.ensure_prim("/RootNode/meshes/mesh_A", Specifier::Over, None);
        assert_eq!(
            layer.prim("/RootNode/meshes/mesh_A").unwrap().specifier,
            Specifier::Def
        );
        assert!(layer.remove_prim("/RootNode/meshes/mesh_A").is_some());
        assert!(layer.prim("/RootNode/meshes/mesh_A").is_none());
    }

    #[test]
    fn test_api_schemas() {
        let mut prim = PrimSpec::new(Specifier::Def, Some("Mesh"), "m");
        prim.add_api_schema("MaterialBindingAPI");
        prim.add_api_schema("MaterialBindingAPI");
        assert_eq!(prim.api_schemas(), vec!["MaterialBindingAPI".to_string()]);
    }

    #[test]
    fn test_compose_translate_then_scale() {
        let ops = vec![
            XformOp::Translate(Vec3::new(1.0, 0.0, 0.0)),
            XformOp::Scale(Vec3::splat(2.0)),
        ];
        let m = compose_xform_ops(&ops);
        let p = m.transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!((p - Vec3::new(3.0, 0.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_rotate_xyz_applies_x_first() {
        let op = XformOp::Rotate(EulerOrder::Xyz, Vec3::new(90.0, 0.0, 90.0));
        // X then Z: +Y -> +Z (about X) -> +Z (about Z)
        let v = op.to_matrix().transform_vector3(Vec3::Y);
        assert!((v - Vec3::Z).length() < 1e-5, "{:?}", v);
        // +X -> +X (about X) -> +Y (about Z)
        let v = op.to_matrix().transform_vector3(Vec3::X);
        assert!((v - Vec3::Y).length() < 1e-5, "{:?}", v);
    }

    #[test]
    fn test_xform_op_from_attribute() {
        let op = XformOp::from_attribute(
            "xformOp:translate",
            &Value::Tuple(vec![Value::Int(1), Value::Int(2), Value::Int(3)]),
        );
        assert_eq!(op, Some(XformOp::Translate(Vec3::new(1.0, 2.0, 3.0))));
        assert_eq!(
            XformOp::from_attribute("xformOp:scale:pivot", &Value::Float(2.0)),
            Some(XformOp::Scale(Vec3::splat(2.0)))
        );
        assert!(XformOp::from_attribute("points", &Value::Int(0)).is_none());
    }
}
