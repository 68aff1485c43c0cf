//! Neutral scene model.
//!
//! A [`SceneModel`] is what a read produces and what an export consumes. It
//! is independent of any host editor: the host adapter turns it into native
//! objects and hands an edited copy back.

use std::collections::HashSet;
use std::path::PathBuf;

use remix_math::{Mat4, Mat4Ext, UpAxis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::camera::CameraData;
use crate::light::{LightData, LightShape};
use crate::material::MaterialNode;
use crate::mesh::{MeshData, MeshError};
use crate::usd::Value;

/// Structural problems found by [`SceneModel::validate`].
#[derive(Error, Debug, PartialEq)]
pub enum SceneError {
    #[error("Duplicate prim path {0}")]
    DuplicatePath(String),

    #[error("Invalid mesh {path}: {source}")]
    Mesh {
        path: String,
        #[source]
        source: MeshError,
    },
}

/// What a prim is, as far as Remix cares.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimKind {
    Mesh,
    Transform,
    Material,
    Scope,
    Light,
    Camera,
    Other(String),
}

impl PrimKind {
    /// Classify a USD type name. Typeless prims are scopes.
    pub fn from_type_name(type_name: Option<&str>) -> Self {
        match type_name {
            Some("Mesh") => PrimKind::Mesh,
            Some("Xform") => PrimKind::Transform,
            Some("Material") => PrimKind::Material,
            Some("Scope") | None => PrimKind::Scope,
            Some("Camera") => PrimKind::Camera,
            Some(other) if LightShape::from_type_name(other).is_some() => PrimKind::Light,
            Some(other) => PrimKind::Other(other.to_string()),
        }
    }
}

/// Binding of a mesh or subset to a material prim, by path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialBinding {
    pub material_path: String,
    /// Target prim is missing from the composed stage
    pub broken: bool,
}

impl MaterialBinding {
    pub fn new(material_path: impl Into<String>) -> Self {
        Self {
            material_path: material_path.into(),
            broken: false,
        }
    }
}

/// A prim in the neutral scene.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrimNode {
    pub path: String,
    pub name: String,
    pub kind: PrimKind,
    /// Authored USD type name
    pub type_name: Option<String>,
    /// Local transform
    pub transform: Mat4,
    pub children: Vec<PrimNode>,
    pub mesh: Option<MeshData>,
    pub material_binding: Option<MaterialBinding>,
    pub material: Option<MaterialNode>,
    pub light: Option<LightData>,
    pub camera: Option<CameraData>,
    /// Why a composition arc on this prim could not be resolved
    pub broken_reference: Option<String>,
    /// Asset referenced by a capture instance
    pub instance_of: Option<String>,
    /// `_remix_metadata` custom data
    pub remix_metadata: Option<Value>,
}

impl PrimNode {
    pub fn new(path: impl Into<String>, kind: PrimKind) -> Self {
        let path = path.into();
        let name = path.rsplit('/').next().unwrap_or_default().to_string();
        Self {
            path,
            name,
            kind,
            type_name: None,
            transform: Mat4::IDENTITY,
            children: Vec::new(),
            mesh: None,
            material_binding: None,
            material: None,
            light: None,
            camera: None,
            broken_reference: None,
            instance_of: None,
            remix_metadata: None,
        }
    }

    /// Visit this prim and its descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a PrimNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }

    /// The prim or any subset has a binding whose target is missing.
    pub fn has_broken_binding(&self) -> bool {
        let subsets_broken = self.mesh.as_ref().is_some_and(|m| {
            m.subsets
                .iter()
                .any(|s| s.binding.as_ref().is_some_and(|b| b.broken))
        });
        self.material_binding.as_ref().is_some_and(|b| b.broken) || subsets_broken
    }

    fn structurally_eq(&self, other: &PrimNode) -> bool {
        self.path == other.path
            && self.kind == other.kind
            && self.type_name == other.type_name
            && self.transform.approx_eq(&other.transform, 1e-5)
            && self.mesh == other.mesh
            && self.material_binding == other.material_binding
            && self.material == other.material
            && self.light == other.light
            && self.camera == other.camera
            && self.broken_reference == other.broken_reference
            && self.instance_of == other.instance_of
            && self.remix_metadata == other.remix_metadata
            && self.children.len() == other.children.len()
            && self
                .children
                .iter()
                .zip(&other.children)
                .all(|(a, b)| a.structurally_eq(b))
    }
}

/// Root container of a read.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneModel {
    pub name: String,
    /// Root document the scene was read from
    pub source: Option<PathBuf>,
    pub up_axis: UpAxis,
    pub meters_per_unit: f64,
    /// Local layer stack that was composed, strongest first
    pub layers: Vec<PathBuf>,
    pub roots: Vec<PrimNode>,
}

impl SceneModel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
            up_axis: UpAxis::Y,
            meters_per_unit: 0.01,
            layers: Vec::new(),
            roots: Vec::new(),
        }
    }

    /// Visit every prim, parents first.
    pub fn walk<'a>(&'a self, mut visit: impl FnMut(&'a PrimNode)) {
        for root in &self.roots {
            root.walk(&mut visit);
        }
    }

    pub fn prim_count(&self) -> usize {
        let mut count = 0;
        self.walk(|_| count += 1);
        count
    }

    pub fn mesh_count(&self) -> usize {
        let mut count = 0;
        self.walk(|p| {
            if p.mesh.is_some() {
                count += 1;
            }
        });
        count
    }

    pub fn light_count(&self) -> usize {
        let mut count = 0;
        self.walk(|p| {
            if p.light.is_some() {
                count += 1;
            }
        });
        count
    }

    pub fn cameras(&self) -> Vec<&PrimNode> {
        let mut cameras = Vec::new();
        self.walk(|p| {
            if p.camera.is_some() {
                cameras.push(p);
            }
        });
        cameras
    }

    pub fn find_prim(&self, path: &str) -> Option<&PrimNode> {
        fn find<'a>(nodes: &'a [PrimNode], path: &str) -> Option<&'a PrimNode> {
            for node in nodes {
                if node.path == path {
                    return Some(node);
                }
                if path.starts_with(&format!("{}/", node.path)) {
                    return find(&node.children, path);
                }
            }
            None
        }
        find(&self.roots, path)
    }

    pub fn find_prim_mut(&mut self, path: &str) -> Option<&mut PrimNode> {
        fn find<'a>(nodes: &'a mut [PrimNode], path: &str) -> Option<&'a mut PrimNode> {
            for node in nodes {
                if node.path == path {
                    return Some(node);
                }
                if path.starts_with(&format!("{}/", node.path)) {
                    return find(&mut node.children, path);
                }
            }
            None
        }
        find(&mut self.roots, path)
    }

    /// Check path uniqueness and mesh data.
    pub fn validate(&self) -> Result<(), SceneError> {
        let mut seen = HashSet::new();
        let mut result = Ok(());
        self.walk(|prim| {
            if result.is_err() {
                return;
            }
            if !seen.insert(prim.path.as_str()) {
                result = Err(SceneError::DuplicatePath(prim.path.clone()));
            } else if let Some(mesh) = &prim.mesh {
                if let Err(source) = mesh.validate() {
                    result = Err(SceneError::Mesh {
                        path: prim.path.clone(),
                        source,
                    });
                }
            }
        });
        result
    }

    /// Equal hierarchy, data and bindings. The source path is ignored and
    /// transforms compare approximately.
    pub fn structurally_eq(&self, other: &SceneModel) -> bool {
        self.up_axis == other.up_axis
            && (self.meters_per_unit - other.meters_per_unit).abs() < 1e-9
            && self.roots.len() == other.roots.len()
            && self
                .roots
                .iter()
                .zip(&other.roots)
                .all(|(a, b)| a.structurally_eq(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SceneModel {
        let mut root = PrimNode::new("/RootNode", PrimKind::Transform);
        let mut meshes = PrimNode::new("/RootNode/meshes", PrimKind::Scope);
        let mut mesh = PrimNode::new("/RootNode/meshes/mesh_0", PrimKind::Mesh);
        mesh.material_binding = Some(MaterialBinding::new("/RootNode/Looks/mat_0"));
        meshes.children.push(mesh);
        root.children.push(meshes);

        let mut scene = SceneModel::new("capture");
        scene.roots.push(root);
        scene
    }

    #[test]
    fn test_prim_kind_from_type() {
        assert_eq!(PrimKind::from_type_name(Some("Mesh")), PrimKind::Mesh);
        assert_eq!(PrimKind::from_type_name(Some("Xform")), PrimKind::Transform);
        assert_eq!(PrimKind::from_type_name(None), PrimKind::Scope);
        assert_eq!(PrimKind::from_type_name(Some("SphereLight")), PrimKind::Light);
        assert_eq!(PrimKind::from_type_name(Some("Camera")), PrimKind::Camera);
        assert_eq!(
            PrimKind::from_type_name(Some("Skeleton")),
            PrimKind::Other("Skeleton".into())
        );
    }

    #[test]
    fn test_light_and_camera_counts() {
        let mut scene = sample();
        let mut light = PrimNode::new("/RootNode/lights/light_0", PrimKind::Light);
        light.light = Some(LightData::new(LightShape::Sphere));
        let mut camera = PrimNode::new("/RootNode/Camera", PrimKind::Camera);
        camera.camera = Some(CameraData::default());
        scene.roots[0].children.push(light);
        scene.roots[0].children.push(camera);
        assert_eq!(scene.light_count(), 1);
        assert_eq!(scene.cameras()[0].path, "/RootNode/Camera");
        assert_eq!(scene.mesh_count(), 0);
    }

    #[test]
    fn test_find_prim() {
        let mut scene = sample();
        assert_eq!(scene.prim_count(), 3);
        let mesh = scene.find_prim("/RootNode/meshes/mesh_0").unwrap();
        assert_eq!(mesh.name, "mesh_0");
        assert!(scene.find_prim("/RootNode/mesh").is_none());

        scene.find_prim_mut("/RootNode/meshes").unwrap().name = "renamed".into();
        assert_eq!(scene.find_prim("/RootNode/meshes").unwrap().name, "renamed");
    }

    #[test]
    fn test_validate_duplicate_paths() {
        let mut scene = sample();
        assert!(scene.validate().is_ok());

        let dup = PrimNode::new("/RootNode/meshes/mesh_0", PrimKind::Mesh);
        scene.roots[0].children[0].children.push(dup);
        assert_eq!(
            scene.validate(),
            Err(SceneError::DuplicatePath("/RootNode/meshes/mesh_0".into()))
        );
    }

    #[test]
    fn test_structural_equality() {
        let a = sample();
        let mut b = sample();
        b.source = Some(PathBuf::from("other.usda"));
        assert!(a.structurally_eq(&b));

        b.roots[0].children[0].children[0].material_binding = None;
        assert!(!a.structurally_eq(&b));
    }

    #[test]
    fn test_json_interchange() {
        let scene = sample();
        let json = serde_json::to_string(&scene).unwrap();
        let back: SceneModel = serde_json::from_str(&json).unwrap();
        assert!(scene.structurally_eq(&back));
    }
}
