//! Neutral mesh representation.
//!
//! Topology is kept as USD authors it (face counts + face-vertex indices).
//! All-triangle meshes pass through untouched; meshes with quads or n-gons
//! are fan-triangulated once on import and keep a [`TriangleMap`] back to
//! the authored faces and corners.

use remix_math::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scene::MaterialBinding;

/// Errors found by [`MeshData::validate`].
#[derive(Error, Debug, PartialEq)]
pub enum MeshError {
    #[error("face vertex counts sum to {expected} but {actual} indices are present")]
    CountMismatch { expected: usize, actual: usize },

    #[error("index {index} out of range for {len} points")]
    IndexOutOfRange { index: u32, len: usize },

    #[error("primvar {name} has {actual} values, expected {expected}")]
    PrimvarSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("primvar {name} index {index} out of range for {len} values")]
    PrimvarIndex { name: String, index: u32, len: usize },

    #[error("subset {name} references face {face} of {count}")]
    SubsetFace { name: String, face: u32, count: usize },
}

/// Primvar interpolation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interpolation {
    Constant,
    Uniform,
    #[default]
    Vertex,
    Varying,
    FaceVarying,
}

impl Interpolation {
    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "constant" => Some(Interpolation::Constant),
            "uniform" => Some(Interpolation::Uniform),
            "vertex" => Some(Interpolation::Vertex),
            "varying" => Some(Interpolation::Varying),
            "faceVarying" => Some(Interpolation::FaceVarying),
            _ => None,
        }
    }

    pub fn as_token(&self) -> &'static str {
        match self {
            Interpolation::Constant => "constant",
            Interpolation::Uniform => "uniform",
            Interpolation::Vertex => "vertex",
            Interpolation::Varying => "varying",
            Interpolation::FaceVarying => "faceVarying",
        }
    }
}

/// A primvar's values, optional index buffer and interpolation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Primvar<T> {
    pub values: Vec<T>,
    pub indices: Option<Vec<u32>>,
    pub interpolation: Interpolation,
}

impl<T: Copy> Primvar<T> {
    pub fn new(values: Vec<T>, interpolation: Interpolation) -> Self {
        Self {
            values,
            indices: None,
            interpolation,
        }
    }

    /// Number of elements after indexing.
    pub fn element_count(&self) -> usize {
        self.indices
            .as_ref()
            .map_or(self.values.len(), |i| i.len())
    }

    /// Element `i` after indexing.
    pub fn get(&self, i: usize) -> Option<T> {
        match &self.indices {
            Some(indices) => self.values.get(*indices.get(i)? as usize).copied(),
            None => self.values.get(i).copied(),
        }
    }
}

/// A named UV set (`primvars:st`, `primvars:st1`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UvSet {
    pub name: String,
    pub primvar: Primvar<Vec2>,
}

/// A `GeomSubset` in the `materialBind` family.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FaceSubset {
    pub name: String,
    pub faces: Vec<u32>,
    pub binding: Option<MaterialBinding>,
}

/// Skeletal binding found on a mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SkinBinding {
    pub skeleton: Option<String>,
    pub joints: Vec<String>,
    /// Which properties or schemas gave the binding away
    pub evidence: Vec<String>,
}

/// Mapping from triangulated output back to authored faces.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TriangleMap {
    /// Authored face for each triangle
    pub source_faces: Vec<u32>,
    /// Authored face-vertex corner for each triangle corner
    pub source_corners: Vec<u32>,
    pub source_face_count: usize,
}

/// Mesh geometry and per-face material assignment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub normals: Option<Primvar<Vec3>>,
    pub uv_sets: Vec<UvSet>,
    pub face_vertex_counts: Vec<u32>,
    pub face_vertex_indices: Vec<u32>,
    pub subsets: Vec<FaceSubset>,
    /// Subset index per face; empty when the mesh has no subsets
    pub face_subsets: Vec<Option<u32>>,
    pub triangulation: Option<TriangleMap>,
    pub skin: Option<SkinBinding>,
    pub left_handed: bool,
    pub double_sided: bool,
}

impl MeshData {
    pub fn face_count(&self) -> usize {
        self.face_vertex_counts.len()
    }

    pub fn corner_count(&self) -> usize {
        self.face_vertex_indices.len()
    }

    pub fn is_triangulated(&self) -> bool {
        self.face_vertex_counts.iter().all(|&c| c == 3)
    }

    pub fn is_skinned(&self) -> bool {
        self.skin.is_some()
    }

    pub fn uv_set(&self, name: &str) -> Option<&UvSet> {
        self.uv_sets.iter().find(|uv| uv.name == name)
    }

    /// Triangle index buffer, fan-triangulating any polygons.
    pub fn triangle_indices(&self) -> Vec<u32> {
        let (indices, _) = fan_triangulate(&self.face_vertex_counts, &self.face_vertex_indices);
        indices
    }

    /// Check index ranges and primvar sizes.
    pub fn validate(&self) -> Result<(), MeshError> {
        let expected: usize = self.face_vertex_counts.iter().map(|&c| c as usize).sum();
        if expected != self.face_vertex_indices.len() {
            return Err(MeshError::CountMismatch {
                expected,
                actual: self.face_vertex_indices.len(),
            });
        }
        if let Some(&index) = self
            .face_vertex_indices
            .iter()
            .find(|&&i| i as usize >= self.positions.len())
        {
            return Err(MeshError::IndexOutOfRange {
                index,
                len: self.positions.len(),
            });
        }
        if let Some(normals) = &self.normals {
            self.check_primvar("normals", normals)?;
        }
        for uv in &self.uv_sets {
            self.check_primvar(&uv.name, &uv.primvar)?;
        }
        for subset in &self.subsets {
            if let Some(&face) = subset.faces.iter().find(|&&f| f as usize >= self.face_count()) {
                return Err(MeshError::SubsetFace {
                    name: subset.name.clone(),
                    face,
                    count: self.face_count(),
                });
            }
        }
        Ok(())
    }

    fn check_primvar<T: Copy>(&self, name: &str, primvar: &Primvar<T>) -> Result<(), MeshError> {
        let expected = match primvar.interpolation {
            Interpolation::Constant => 1,
            Interpolation::Uniform => self.face_count(),
            Interpolation::Vertex | Interpolation::Varying => self.positions.len(),
            Interpolation::FaceVarying => self.corner_count(),
        };
        let actual = primvar.element_count();
        if actual != expected {
            return Err(MeshError::PrimvarSize {
                name: name.to_string(),
                expected,
                actual,
            });
        }
        if let Some(indices) = &primvar.indices {
            if let Some(&index) = indices.iter().find(|&&i| i as usize >= primvar.values.len()) {
                return Err(MeshError::PrimvarIndex {
                    name: name.to_string(),
                    index,
                    len: primvar.values.len(),
                });
            }
        }
        Ok(())
    }

    /// Rebuild `face_subsets` from `subsets`. Later subsets win on overlap.
    pub fn rebuild_face_subsets(&mut self) {
        if self.subsets.is_empty() {
            self.face_subsets.clear();
            return;
        }
        let mut per_face = vec![None; self.face_count()];
        for (i, subset) in self.subsets.iter().enumerate() {
            for &face in &subset.faces {
                if let Some(slot) = per_face.get_mut(face as usize) {
                    *slot = Some(i as u32);
                }
            }
        }
        self.face_subsets = per_face;
    }

    /// Triangulate quads and n-gons in place.
    ///
    /// Does nothing for all-triangle meshes. Faces with fewer than three
    /// vertices are dropped; the number dropped is returned.
    pub fn triangulate(&mut self) -> usize {
        if self.is_triangulated() {
            return 0;
        }
        let (indices, map) = fan_triangulate(&self.face_vertex_counts, &self.face_vertex_indices);
        let dropped = self
            .face_vertex_counts
            .iter()
            .filter(|&&c| c < 3)
            .count();

        if let Some(normals) = &mut self.normals {
            remap_primvar(normals, &map);
        }
        for uv in &mut self.uv_sets {
            remap_primvar(&mut uv.primvar, &map);
        }
        for subset in &mut self.subsets {
            subset.faces = map
                .source_faces
                .iter()
                .enumerate()
                .filter(|(_, src)| subset.faces.contains(src))
                .map(|(tri, _)| tri as u32)
                .collect();
        }

        self.face_vertex_counts = vec![3; indices.len() / 3];
        self.face_vertex_indices = indices;
        self.triangulation = Some(map);
        self.rebuild_face_subsets();
        if dropped > 0 {
            log::warn!("Dropped {} degenerate faces during triangulation", dropped);
        }
        dropped
    }
}

/// Fan-triangulate polygon faces.
///
/// A face `[v0, v1, ... vn-1]` becomes `(v0, v1, v2), (v0, v2, v3), ...`,
/// keeping the authored winding. Faces with fewer than three vertices
/// produce no triangles.
pub fn fan_triangulate(counts: &[u32], indices: &[u32]) -> (Vec<u32>, TriangleMap) {
    let mut out = Vec::with_capacity(indices.len());
    let mut map = TriangleMap {
        source_face_count: counts.len(),
        ..Default::default()
    };
    let mut offset = 0usize;
    for (face, &count) in counts.iter().enumerate() {
        let count = count as usize;
        if count >= 3 && offset + count <= indices.len() {
            for i in 1..(count - 1) {
                for corner in [offset, offset + i, offset + i + 1] {
                    out.push(indices[corner]);
                    map.source_corners.push(corner as u32);
                }
                map.source_faces.push(face as u32);
            }
        }
        offset += count;
    }
    (out, map)
}

fn remap_primvar<T: Copy>(primvar: &mut Primvar<T>, map: &TriangleMap) {
    let lookup: &[u32] = match primvar.interpolation {
        Interpolation::FaceVarying => &map.source_corners,
        Interpolation::Uniform => &map.source_faces,
        _ => return,
    };
    match &mut primvar.indices {
        Some(indices) => {
            *indices = lookup
                .iter()
                .filter_map(|&src| indices.get(src as usize).copied())
                .collect();
        }
        None => {
            primvar.values = lookup
                .iter()
                .filter_map(|&src| primvar.values.get(src as usize).copied())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad_and_triangle() -> MeshData {
        MeshData {
            positions: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 1.0, 0.0),
                Vec3::new(0.0, 1.0, 0.0),
                Vec3::new(2.0, 0.0, 0.0),
            ],
            face_vertex_counts: vec![4, 3],
            face_vertex_indices: vec![0, 1, 2, 3, 1, 4, 2],
            uv_sets: vec![UvSet {
                name: "st".into(),
                primvar: Primvar::new(
                    (0..7).map(|i| Vec2::new(i as f32, 0.0)).collect(),
                    Interpolation::FaceVarying,
                ),
            }],
            subsets: vec![FaceSubset {
                name: "quad_only".into(),
                faces: vec![0],
                binding: None,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_triangle_mesh_untouched() {
        let mut mesh = MeshData {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            face_vertex_counts: vec![3],
            face_vertex_indices: vec![2, 0, 1],
            ..Default::default()
        };
        assert_eq!(mesh.triangulate(), 0);
        assert_eq!(mesh.face_vertex_indices, vec![2, 0, 1]);
        assert!(mesh.triangulation.is_none());
    }

    #[test]
    fn test_fan_triangulate_quad() {
        let (indices, map) = fan_triangulate(&[4], &[0, 1, 2, 3]);
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(map.source_faces, vec![0, 0]);
        assert_eq!(map.source_corners, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn test_fan_triangulate_is_deterministic() {
        let counts = [5, 3, 6];
        let indices: Vec<u32> = (0..14).collect();
        assert_eq!(
            fan_triangulate(&counts, &indices),
            fan_triangulate(&counts, &indices)
        );
    }

    #[test]
    fn test_triangulate_remaps_face_varying_and_subsets() {
        let mut mesh = quad_and_triangle();
        mesh.rebuild_face_subsets();
        mesh.validate().unwrap();

        mesh.triangulate();
        assert_eq!(mesh.face_vertex_counts, vec![3, 3, 3]);
        assert_eq!(mesh.face_vertex_indices, vec![0, 1, 2, 0, 2, 3, 1, 4, 2]);

        let map = mesh.triangulation.as_ref().unwrap();
        assert_eq!(map.source_faces, vec![0, 0, 1]);
        assert_eq!(map.source_face_count, 2);

        // Corner values follow their source corners
        let uv = &mesh.uv_sets[0].primvar;
        let xs: Vec<f32> = uv.values.iter().map(|v| v.x).collect();
        assert_eq!(xs, vec![0.0, 1.0, 2.0, 0.0, 2.0, 3.0, 4.0, 5.0, 6.0]);

        assert_eq!(mesh.subsets[0].faces, vec![0, 1]);
        assert_eq!(mesh.face_subsets, vec![Some(0), Some(0), None]);
        mesh.validate().unwrap();
    }

    #[test]
    fn test_indexed_primvar_remap() {
        let mut mesh = quad_and_triangle();
        mesh.uv_sets[0].primvar = Primvar {
            values: vec![Vec2::ZERO, Vec2::ONE],
            indices: Some(vec![0, 1, 1, 0, 1, 1, 0]),
            interpolation: Interpolation::FaceVarying,
        };
        mesh.triangulate();
        let uv = &mesh.uv_sets[0].primvar;
        assert_eq!(uv.indices.as_ref().unwrap(), &vec![0, 1, 1, 0, 1, 0, 1, 1, 0]);
        assert_eq!(uv.values.len(), 2);
        mesh.validate().unwrap();
    }

    #[test]
    fn test_degenerate_faces_dropped() {
        let mut mesh = MeshData {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            face_vertex_counts: vec![2, 3],
            face_vertex_indices: vec![0, 1, 0, 1, 2],
            ..Default::default()
        };
        assert_eq!(mesh.triangulate(), 1);
        assert_eq!(mesh.face_vertex_indices, vec![0, 1, 2]);
        assert_eq!(mesh.triangulation.unwrap().source_faces, vec![1]);
    }

    #[test]
    fn test_validate_catches_bad_data() {
        let mut mesh = quad_and_triangle();
        mesh.face_vertex_indices[0] = 99;
        assert_eq!(
            mesh.validate(),
            Err(MeshError::IndexOutOfRange { index: 99, len: 5 })
        );

        let mut mesh = quad_and_triangle();
        mesh.uv_sets[0].primvar.values.pop();
        assert!(matches!(mesh.validate(), Err(MeshError::PrimvarSize { .. })));

        let mut mesh = quad_and_triangle();
        mesh.uv_sets[0].primvar.interpolation = Interpolation::Vertex;
        assert!(matches!(mesh.validate(), Err(MeshError::PrimvarSize { expected: 5, .. })));

        let mut mesh = quad_and_triangle();
        mesh.face_vertex_counts = vec![4, 4];
        assert!(matches!(mesh.validate(), Err(MeshError::CountMismatch { .. })));

        let mut mesh = quad_and_triangle();
        mesh.subsets[0].faces = vec![7];
        assert!(matches!(mesh.validate(), Err(MeshError::SubsetFace { .. })));
    }
}
