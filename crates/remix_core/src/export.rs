//! Writing an edited [`SceneModel`] into one layer of a project.
//!
//! Only the target layer file is touched. Prims that other layers of the
//! stack already define are authored as `over`s, new prims as `def`s. Inside
//! an existing target spec only the properties the exporter owns are
//! replaced:
//!
//! - geometry and primvars of meshes, their `materialBind` subsets
//! - `xformOp:*` and `xformOpOrder`
//! - `material:binding`
//! - material outputs and the shader graph
//! - light inputs and extent, camera lens attributes
//!
//! Export runs in two steps so callers can convert textures without holding
//! locks: [`prepare_export`] builds the layer in memory and converts the
//! runtime textures into a staging directory, [`PreparedExport::commit`]
//! moves them next to the target and saves the layer. Dropping a prepared
//! export leaves the project untouched.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use remix_math::Mat4Ext;
use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;

use crate::batch::{CancellationToken, ItemFailure, OperationStatus, ProgressFn};
use crate::error::{Diagnostic, ErrorKind};
use crate::material::{capability_notes, to_remix, CapabilityNote, MaterialNode};
use crate::mesh::{MeshData, Primvar};
use crate::scene::{MaterialBinding, PrimKind, PrimNode, SceneError, SceneModel};
use crate::texture::{
    place_file, texture_stem, ConversionJob, TextureConverter, TextureError, TextureRole,
};
use crate::usd::{
    lexical_normalize, read_layer, relative_asset_path, sanitize_prim_name, save_usda, Attribute,
    Layer, MetadataEntry, PrimSpec, Property, Relationship, Specifier, StageError, StageOptions,
    Value,
};

/// Directory next to the target layer that receives runtime textures.
pub const TEXTURE_DIR: &str = "textures";

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Cannot read target layer: {0}")]
    Target(#[from] StageError),

    #[error("Scene cannot be exported: {0}")]
    Scene(#[from] SceneError),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to place texture {path}: {source}")]
    Texture {
        path: PathBuf,
        #[source]
        source: TextureError,
    },
}

impl ExportError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExportError::Target(e) => e.kind(),
            ExportError::Scene(_) => ErrorKind::MalformedDocument,
            ExportError::Io { .. } => ErrorKind::Io,
            ExportError::Texture { source, .. } => source.kind(),
        }
    }
}

pub type ExportResult<T> = Result<T, ExportError>;

/// Where an export goes.
#[derive(Clone, Debug)]
pub struct ExportTarget {
    /// Layer file that receives the edits
    pub layer: PathBuf,
    /// Other layers of the project; prims they define are authored as `over`
    pub stack: Vec<PathBuf>,
    pub options: StageOptions,
}

impl ExportTarget {
    pub fn new(layer: impl Into<PathBuf>) -> Self {
        Self {
            layer: layer.into(),
            stack: Vec::new(),
            options: StageOptions::default(),
        }
    }

    pub fn with_stack(mut self, stack: Vec<PathBuf>) -> Self {
        self.stack = stack;
        self
    }
}

/// Capability notes raised while translating one material.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MaterialNotes {
    pub material: String,
    pub notes: Vec<CapabilityNote>,
}

/// What an export wrote and what it could not.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ExportReport {
    pub target: PathBuf,
    pub written_prims: Vec<String>,
    pub failures: Vec<ItemFailure>,
    pub textures: Vec<PathBuf>,
    pub material_notes: Vec<MaterialNotes>,
    pub diagnostics: Vec<Diagnostic>,
    /// Nothing was saved
    pub cancelled: bool,
}

impl ExportReport {
    pub fn status(&self) -> OperationStatus {
        if self.cancelled || (self.written_prims.is_empty() && !self.failures.is_empty()) {
            OperationStatus::Failure
        } else if !self.failures.is_empty() {
            OperationStatus::PartialSuccess
        } else {
            OperationStatus::Success
        }
    }

    pub fn failure(&self, item: &str) -> Option<&ItemFailure> {
        self.failures.iter().find(|f| f.item == item)
    }
}

/// A target layer built in memory, ready to be saved.
#[derive(Debug)]
pub struct PreparedExport {
    layer: Layer,
    report: ExportReport,
    /// (staged file, final path) of each converted texture
    staged: Vec<(PathBuf, PathBuf)>,
    _staging: Option<TempDir>,
}

impl PreparedExport {
    pub fn report(&self) -> &ExportReport {
        &self.report
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    /// Move the staged textures into place and save the layer atomically.
    /// A cancelled export saves nothing.
    pub fn commit(self) -> ExportResult<ExportReport> {
        let report = self.report;
        if report.cancelled {
            log::info!("Export to {} cancelled", report.target.display());
            return Ok(report);
        }
        for (staged, dest) in &self.staged {
            place_file(staged, dest).map_err(|source| ExportError::Texture {
                path: dest.clone(),
                source,
            })?;
        }
        save_usda(&self.layer, &report.target).map_err(|source| ExportError::Io {
            path: report.target.clone(),
            source,
        })?;
        log::info!(
            "Exported {} prims and {} textures to {} ({} failed)",
            report.written_prims.len(),
            report.textures.len(),
            report.target.display(),
            report.failures.len()
        );
        Ok(report)
    }
}

/// Export `scene` into `target` in one go.
pub fn export_scene(
    scene: &SceneModel,
    target: &ExportTarget,
    converter: Option<&TextureConverter>,
    cancel: &CancellationToken,
    progress: Option<ProgressFn<'_>>,
) -> ExportResult<ExportReport> {
    prepare_export(scene, target, converter, cancel, progress)?.commit()
}

/// Build the target layer for `scene` and stage its runtime textures.
pub fn prepare_export(
    scene: &SceneModel,
    target: &ExportTarget,
    converter: Option<&TextureConverter>,
    cancel: &CancellationToken,
    progress: Option<ProgressFn<'_>>,
) -> ExportResult<PreparedExport> {
    scene.validate()?;
    let layer = if target.layer.is_file() {
        read_layer(&target.layer, &target.options)?
    } else {
        new_target_layer(scene)
    };

    let mut exporter = Exporter {
        layer,
        target_dir: absolute(&target.layer.parent().map(Path::to_path_buf).unwrap_or_default()),
        elsewhere: HashSet::new(),
        transformed: HashSet::new(),
        textures: HashMap::new(),
        staged: Vec::new(),
        staging: None,
        report: ExportReport {
            target: target.layer.clone(),
            ..Default::default()
        },
        cancel,
    };
    let others = target
        .stack
        .iter()
        .chain(scene.layers.iter())
        .filter(|p| !same_file(p, &target.layer));
    for other in others {
        exporter.index_layer(other, &target.options);
    }

    exporter.convert_textures(scene, &target.layer, converter, progress)?;
    if !exporter.report.cancelled {
        for root in &scene.roots {
            exporter.author_prim(root);
        }
    }
    Ok(PreparedExport {
        layer: exporter.layer,
        report: exporter.report,
        staged: exporter.staged,
        _staging: exporter.staging,
    })
}

struct Exporter<'a> {
    layer: Layer,
    /// Absolute directory of the target layer
    target_dir: PathBuf,
    /// Prim paths defined by layers other than the target
    elsewhere: HashSet<String>,
    /// Prim paths whose xform ops are authored by layers other than the target
    transformed: HashSet<String>,
    /// (editable raster, role) -> asset path written into the shader
    textures: HashMap<(PathBuf, TextureRole), String>,
    staged: Vec<(PathBuf, PathBuf)>,
    staging: Option<TempDir>,
    report: ExportReport,
    cancel: &'a CancellationToken,
}

impl Exporter<'_> {
    fn index_layer(&mut self, path: &Path, options: &StageOptions) {
        match read_layer(path, options) {
            Ok(layer) => layer.walk(|prim_path, prim| {
                self.elsewhere.insert(prim_path.to_string());
                if has_xform_ops(prim) {
                    self.transformed.insert(prim_path.to_string());
                }
            }),
            Err(e) => {
                log::warn!("Skipping layer {}: {}", path.display(), e);
                self.report.diagnostics.push(Diagnostic::warning(
                    ErrorKind::BrokenReference,
                    path.display().to_string(),
                    e.to_string(),
                ));
            }
        }
    }

    /// Encode every edited raster into a staging directory; commit moves
    /// the results into `textures/` next to the target.
    fn convert_textures(
        &mut self,
        scene: &SceneModel,
        target: &Path,
        converter: Option<&TextureConverter>,
        progress: Option<ProgressFn<'_>>,
    ) -> ExportResult<()> {
        let dest_dir = target
            .parent()
            .map(|p| p.join(TEXTURE_DIR))
            .unwrap_or_else(|| PathBuf::from(TEXTURE_DIR));

        let mut jobs = Vec::new();
        let mut expected = Vec::new();
        scene.walk(|prim| {
            let Some(material) = &prim.material else {
                return;
            };
            for texture in material.textures() {
                let Some(raster) = &texture.editable else {
                    continue;
                };
                let key = (raster.clone(), texture.role);
                if expected.iter().any(|(k, _)| *k == key) {
                    continue;
                }
                let stem = texture_stem(Path::new(&texture.asset));
                let dest = dest_dir.join(format!("{}{}.dds", stem, texture.role.suffix()));
                jobs.push(ConversionJob::ToRuntime {
                    raster: raster.clone(),
                    role: texture.role,
                    dest_dir: dest_dir.clone(),
                    stem,
                });
                expected.push((key, dest));
            }
        });
        if jobs.is_empty() {
            return Ok(());
        }

        let Some(converter) = converter else {
            for ((raster, _), _) in &expected {
                self.report.failures.push(ItemFailure::new(
                    raster.display().to_string(),
                    ErrorKind::ConversionFailure,
                    "no texture converter is configured",
                ));
            }
            return Ok(());
        };

        let staging = tempfile::Builder::new()
            .prefix("remix-export-")
            .tempdir()
            .map_err(|source| ExportError::Io {
                path: std::env::temp_dir(),
                source,
            })?;
        for job in &mut jobs {
            if let ConversionJob::ToRuntime { dest_dir, .. } = job {
                *dest_dir = staging.path().to_path_buf();
            }
        }

        let outcome = converter.convert_batch(&jobs, self.cancel, progress);
        self.report.cancelled |= outcome.cancelled;
        let written: HashSet<&PathBuf> = outcome.successes.iter().map(|(_, p)| p).collect();
        for (key, dest) in expected {
            let Some(file_name) = dest.file_name() else {
                continue;
            };
            let staged = staging.path().join(file_name);
            if !written.contains(&staged) {
                continue;
            }
            self.textures.insert(
                key,
                format!("./{}/{}", TEXTURE_DIR, file_name.to_string_lossy()),
            );
            self.report.textures.push(dest.clone());
            self.staged.push((staged, dest));
        }
        self.report.failures.extend(outcome.failures);
        self.staging = Some(staging);
        Ok(())
    }

    fn author_prim(&mut self, node: &PrimNode) {
        if self.cancel.is_cancelled() {
            self.report.cancelled = true;
            return;
        }
        if let Some(mesh) = node.mesh.as_ref().filter(|m| m.is_skinned()) {
            let evidence = mesh
                .skin
                .as_ref()
                .map(|s| s.evidence.join(", "))
                .unwrap_or_default();
            log::warn!("Not exporting skinned mesh {} ({})", node.path, evidence);
            self.report.failures.push(ItemFailure::new(
                node.path.clone(),
                ErrorKind::UnsupportedFeature,
                "skinned mesh",
            ));
            return;
        }

        let existing = self.layer.prim(&node.path).map(|p| p.specifier);
        let (specifier, type_name) = match existing {
            Some(specifier) => (specifier, None),
            None if self.elsewhere.contains(&node.path) => (Specifier::Over, None),
            None => (Specifier::Def, Some(type_name_of(node))),
        };
        let material = match &node.material {
            Some(material) => Some(self.material_spec(node, material)),
            None => None,
        };
        let inherited_ops = self.transformed.contains(&node.path);
        let Some(spec) = self
            .layer
            .ensure_prim(&node.path, specifier, type_name.as_deref())
        else {
            return;
        };

        write_transform(spec, node, inherited_ops);
        if let Some(binding) = &node.material_binding {
            write_binding(spec, binding);
        }
        if let Some(mesh) = &node.mesh {
            write_mesh(spec, mesh);
        }
        if let Some(light) = &node.light {
            light.write_to(spec);
        }
        if let Some(camera) = &node.camera {
            camera.write_to(spec);
        }
        if let Some(authored) = material {
            merge_material(spec, authored);
        }
        log::debug!("Authored {} as {}", node.path, specifier.keyword());
        self.report.written_prims.push(node.path.clone());

        // The shader graph is authored with its material
        if node.kind == PrimKind::Material {
            return;
        }
        for child in &node.children {
            self.author_prim(child);
        }
    }

    fn material_spec(&mut self, node: &PrimNode, material: &MaterialNode) -> PrimSpec {
        let mut material = material.clone();
        for texture in material.textures_mut() {
            let converted = texture
                .editable
                .as_ref()
                .and_then(|raster| self.textures.get(&(raster.clone(), texture.role)));
            if let Some(asset) = converted {
                texture.asset = asset.clone();
            } else if let Some(resolved) = &texture.resolved {
                texture.asset = rebase_asset(&texture.asset, resolved, &self.target_dir);
            }
        }

        let notes = capability_notes(&material, None);
        if !notes.is_empty() {
            for note in &notes {
                self.report.diagnostics.push(Diagnostic::info(
                    ErrorKind::UnsupportedFeature,
                    node.path.clone(),
                    note.feature.description(),
                ));
            }
            self.report.material_notes.push(MaterialNotes {
                material: node.path.clone(),
                notes,
            });
        }
        to_remix(&material, None).to_spec(&node.path)
    }
}

fn new_target_layer(scene: &SceneModel) -> Layer {
    Layer {
        metadata: vec![
            MetadataEntry::new("metersPerUnit", Value::Float(scene.meters_per_unit)),
            MetadataEntry::new("upAxis", Value::String(scene.up_axis.as_token().to_string())),
        ],
        ..Default::default()
    }
}

fn type_name_of(node: &PrimNode) -> String {
    if let Some(type_name) = &node.type_name {
        return type_name.clone();
    }
    match &node.kind {
        PrimKind::Mesh => "Mesh",
        PrimKind::Transform => "Xform",
        PrimKind::Material => "Material",
        PrimKind::Scope => "Scope",
        PrimKind::Light => node
            .light
            .as_ref()
            .map(|l| l.shape.type_name())
            .unwrap_or("SphereLight"),
        PrimKind::Camera => "Camera",
        PrimKind::Other(other) => other,
    }
    .to_string()
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}

/// Asset path of `resolved` as seen from a layer in `target_dir`. The
/// authored path is kept when it already points at the same file.
fn rebase_asset(authored: &str, resolved: &Path, target_dir: &Path) -> String {
    let resolved = lexical_normalize(&absolute(resolved));
    if lexical_normalize(&target_dir.join(authored)) == resolved {
        return authored.to_string();
    }
    let relative = relative_asset_path(target_dir, &resolved);
    if Path::new(&relative).is_absolute() || relative.starts_with("../") {
        relative
    } else {
        format!("./{}", relative)
    }
}

fn has_xform_ops(prim: &PrimSpec) -> bool {
    prim.properties
        .iter()
        .any(|p| p.name() == "xformOpOrder" || p.name().starts_with("xformOp:"))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

/// Replace the authored xform ops with a single matrix. Identity transforms
/// are only written over ops authored in the target or a weaker layer.
fn write_transform(spec: &mut PrimSpec, node: &PrimNode, inherited_ops: bool) {
    let had_ops = inherited_ops || has_xform_ops(spec);
    if node.transform.is_identity_approx() && !had_ops {
        return;
    }
    spec.properties.retain(|p| !p.name().starts_with("xformOp:"));
    spec.set_attribute(
        Attribute::new("xformOp:transform", "matrix4d")
            .with_value(Value::from_matrix(node.transform.to_usd_rows())),
    );
    spec.set_attribute(
        Attribute::new("xformOpOrder", "token[]")
            .uniform()
            .with_value(Value::token_array(&["xformOp:transform"])),
    );
}

fn write_binding(spec: &mut PrimSpec, binding: &MaterialBinding) {
    spec.add_api_schema("MaterialBindingAPI");
    spec.set_relationship(Relationship::new(
        "material:binding",
        vec![binding.material_path.clone()],
    ));
}

/// Names of the mesh properties the exporter replaces in `spec`.
fn owned_mesh_properties(spec: &PrimSpec) -> HashSet<String> {
    let mut owned: HashSet<String> = [
        "points",
        "faceVertexCounts",
        "faceVertexIndices",
        "normals",
        "primvars:normals",
        "extent",
        "orientation",
        "doubleSided",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    for property in &spec.properties {
        if let Property::Attribute(attr) = property {
            let is_uv = attr.type_name.starts_with("texCoord2") || attr.type_name.starts_with("float2");
            if attr.name.starts_with("primvars:") && is_uv {
                owned.insert(attr.name.clone());
            }
        }
    }
    let indices: Vec<String> = owned.iter().map(|name| format!("{}:indices", name)).collect();
    owned.extend(indices);
    owned
}

fn write_mesh(spec: &mut PrimSpec, mesh: &MeshData) {
    let owned = owned_mesh_properties(spec);
    spec.properties.retain(|p| !owned.contains(p.name()));

    spec.set_attribute(
        Attribute::new("points", "point3f[]").with_value(Value::from_vec3_array(&mesh.positions)),
    );
    spec.set_attribute(
        Attribute::new("faceVertexCounts", "int[]")
            .with_value(Value::from_int_array(mesh.face_vertex_counts.iter().map(|&c| c as i64))),
    );
    spec.set_attribute(
        Attribute::new("faceVertexIndices", "int[]")
            .with_value(Value::from_int_array(mesh.face_vertex_indices.iter().map(|&i| i as i64))),
    );
    if let Some((min, max)) = bounds(mesh) {
        spec.set_attribute(
            Attribute::new("extent", "float3[]").with_value(Value::from_vec3_array(&[min, max])),
        );
    }
    if let Some(normals) = &mesh.normals {
        let name = if normals.indices.is_some() {
            "primvars:normals"
        } else {
            "normals"
        };
        write_primvar(spec, name, "normal3f[]", Value::from_vec3_array(&normals.values), normals);
    }
    for uv in &mesh.uv_sets {
        let name = format!("primvars:{}", uv.name);
        write_primvar(
            spec,
            &name,
            "texCoord2f[]",
            Value::from_vec2_array(&uv.primvar.values),
            &uv.primvar,
        );
    }
    if mesh.left_handed {
        spec.set_attribute(
            Attribute::new("orientation", "token")
                .uniform()
                .with_value(Value::Token("leftHanded".to_string())),
        );
    }
    if mesh.double_sided {
        spec.set_attribute(
            Attribute::new("doubleSided", "bool")
                .uniform()
                .with_value(Value::Bool(true)),
        );
    }
    write_subsets(spec, mesh);
}

fn write_primvar<T>(spec: &mut PrimSpec, name: &str, type_name: &str, values: Value, primvar: &Primvar<T>) {
    spec.set_attribute(
        Attribute::new(name, type_name)
            .with_value(values)
            .with_metadata(
                "interpolation",
                Value::String(primvar.interpolation.as_token().to_string()),
            ),
    );
    if let Some(indices) = &primvar.indices {
        spec.set_attribute(
            Attribute::new(format!("{}:indices", name), "int[]")
                .with_value(Value::from_int_array(indices.iter().map(|&i| i as i64))),
        );
    }
}

/// Replace `materialBind` subsets with the mesh's current ones.
fn write_subsets(spec: &mut PrimSpec, mesh: &MeshData) {
    spec.children.retain(|child| {
        child.type_name.as_deref() != Some("GeomSubset")
            || child
                .attribute("familyName")
                .and_then(Attribute::value)
                .and_then(Value::as_str)
                != Some("materialBind")
    });
    for subset in &mesh.subsets {
        let mut child = PrimSpec::new(
            Specifier::Def,
            Some("GeomSubset"),
            sanitize_prim_name(&subset.name),
        );
        child.set_attribute(
            Attribute::new("elementType", "token")
                .uniform()
                .with_value(Value::Token("face".to_string())),
        );
        child.set_attribute(
            Attribute::new("familyName", "token")
                .uniform()
                .with_value(Value::Token("materialBind".to_string())),
        );
        child.set_attribute(
            Attribute::new("indices", "int[]")
                .with_value(Value::from_int_array(subset.faces.iter().map(|&f| f as i64))),
        );
        if let Some(binding) = &subset.binding {
            write_binding(&mut child, binding);
        }
        spec.children.push(child);
    }
}

/// Material outputs and the shader graph belong to the exporter; other
/// properties and metadata of an existing spec stay.
fn merge_material(spec: &mut PrimSpec, authored: PrimSpec) {
    spec.properties.retain(|p| !p.name().starts_with("outputs:"));
    for property in authored.properties {
        spec.set_property(property);
    }
    spec.children = authored.children;
}

fn bounds(mesh: &MeshData) -> Option<(remix_math::Vec3, remix_math::Vec3)> {
    let first = *mesh.positions.first()?;
    Some(
        mesh.positions
            .iter()
            .fold((first, first), |(min, max), p| (min.min(*p), max.max(*p))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::SkinBinding;
    use crate::reader::{read_scene, ReadOptions};
    use remix_math::{Mat4, Vec3};

    fn triangle(path: &str) -> PrimNode {
        let mut node = PrimNode::new(path, PrimKind::Mesh);
        node.type_name = Some("Mesh".to_string());
        node.mesh = Some(MeshData {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            face_vertex_counts: vec![3],
            face_vertex_indices: vec![0, 1, 2],
            ..Default::default()
        });
        node
    }

    fn scene_with(children: Vec<PrimNode>) -> SceneModel {
        let mut root = PrimNode::new("/RootNode", PrimKind::Transform);
        root.children = children;
        let mut scene = SceneModel::new("edit");
        scene.roots.push(root);
        scene
    }

    #[test]
    fn test_skinned_mesh_rejected_siblings_written() {
        let dir = tempfile::tempdir().unwrap();
        let target = ExportTarget::new(dir.path().join("mod.usda"));

        let mut skinned = triangle("/RootNode/body");
        if let Some(mesh) = skinned.mesh.as_mut() {
            mesh.skin = Some(SkinBinding {
                evidence: vec!["SkelBindingAPI".to_string()],
                ..Default::default()
            });
        }
        let scene = scene_with(vec![skinned, triangle("/RootNode/rock")]);

        let report = export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();
        assert_eq!(report.status(), OperationStatus::PartialSuccess);
        let failure = report.failure("/RootNode/body").unwrap();
        assert_eq!(failure.kind, ErrorKind::UnsupportedFeature);

        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        assert!(written.prim("/RootNode/body").is_none());
        let rock = written.prim("/RootNode/rock").unwrap();
        assert_eq!(rock.specifier, Specifier::Def);
        assert!(rock.attribute("points").is_some());
    }

    #[test]
    fn test_over_for_prims_defined_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.usda");
        std::fs::write(
            &capture,
            r#"#usda 1.0
def Xform "RootNode"
{
    def Mesh "rock"
    {
        float3[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
        int[] faceVertexCounts = [3]
        int[] faceVertexIndices = [0, 1, 2]
        custom string note = "capture only"
    }
}
"#,
        )
        .unwrap();
        let before = std::fs::read(&capture).unwrap();

        let mut scene = read_scene(&capture, &ReadOptions::default()).unwrap().scene;
        let rock = scene.find_prim_mut("/RootNode/rock").unwrap();
        rock.transform = Mat4::from_translation(Vec3::new(0.0, 2.0, 0.0));
        scene.roots[0].children.push(triangle("/RootNode/new_mesh"));

        let target = ExportTarget::new(dir.path().join("mod.usda"));
        let report = export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();
        assert_eq!(report.status(), OperationStatus::Success);
        assert_eq!(std::fs::read(&capture).unwrap(), before);

        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        assert_eq!(written.prim("/RootNode").unwrap().specifier, Specifier::Over);
        let rock = written.prim("/RootNode/rock").unwrap();
        assert_eq!(rock.specifier, Specifier::Over);
        assert!(rock.type_name.is_none());
        assert!(rock.attribute("xformOp:transform").is_some());
        assert!(rock.attribute("note").is_none());
        let new_mesh = written.prim("/RootNode/new_mesh").unwrap();
        assert_eq!(new_mesh.specifier, Specifier::Def);
        assert_eq!(new_mesh.type_name.as_deref(), Some("Mesh"));
    }

    #[test]
    fn test_existing_target_content_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let target_path = dir.path().join("mod.usda");
        std::fs::write(
            &target_path,
            r#"#usda 1.0
(
    upAxis = "Z"
)

def Xform "RootNode"
{
    def Mesh "rock"
    {
        float3[] points = [(9, 9, 9)]
        custom string artist_note = "keep me"
    }

    def Xform "lights"
    {
    }
}
"#,
        )
        .unwrap();

        let scene = scene_with(vec![triangle("/RootNode/rock")]);
        let target = ExportTarget::new(&target_path);
        export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();

        let written = read_layer(&target_path, &StageOptions::default()).unwrap();
        let rock = written.prim("/RootNode/rock").unwrap();
        assert_eq!(rock.specifier, Specifier::Def);
        assert!(rock.attribute("artist_note").is_some());
        let points = rock.attribute("points").and_then(Attribute::value).unwrap();
        assert_eq!(points.as_vec3_array().unwrap().len(), 3);
        assert!(written.prim("/RootNode/lights").is_some());
        assert_eq!(written.up_axis(), Some("Z"));
    }

    #[test]
    fn test_cancelled_export_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = ExportTarget::new(dir.path().join("mod.usda"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = export_scene(&scene_with(vec![]), &target, None, &cancel, None).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.status(), OperationStatus::Failure);
        assert!(!target.layer.exists());
    }

    const APERTURE_CAPTURE: &str = r#"#usda 1.0
def Xform "RootNode"
{
    def Mesh "rock"
    {
        float3[] points = [(0, 0, 0), (1, 0, 0), (0, 1, 0)]
        int[] faceVertexCounts = [3]
        int[] faceVertexIndices = [0, 1, 2]
        double3 xformOp:translate = (0, 0, 5)
        uniform token[] xformOpOrder = ["xformOp:translate"]
    }

    def Scope "Looks"
    {
        def Material "mat"
        {
            token outputs:mdl:surface.connect = </RootNode/Looks/mat/Shader.outputs:out>

            def Shader "Shader"
            {
                uniform token info:implementationSource = "sourceAsset"
                uniform asset info:mdl:sourceAsset = @AperturePBR_Opacity.mdl@
                uniform token info:mdl:sourceAsset:subIdentifier = "AperturePBR_Opacity"
                asset inputs:diffuse_texture = @./textures/albedo.dds@ (
                    colorSpace = "auto"
                )
                token outputs:out
            }
        }
    }
}
"#;

    fn write_capture(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, APERTURE_CAPTURE).unwrap();
    }

    fn diffuse_asset(layer: &Path) -> String {
        let written = read_layer(layer, &StageOptions::default()).unwrap();
        written
            .prim("/RootNode/Looks/mat/Shader")
            .unwrap()
            .attribute("inputs:diffuse_texture")
            .and_then(Attribute::value)
            .and_then(Value::as_str)
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_tokens_written_as_quoted_literals() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.usda");
        write_capture(&capture);
        let mut scene = read_scene(&capture, &ReadOptions::default()).unwrap().scene;
        scene.find_prim_mut("/RootNode/rock").unwrap().transform =
            Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));

        let target = ExportTarget::new(dir.path().join("mod.usda"));
        export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();

        let text = std::fs::read_to_string(&target.layer).unwrap();
        assert!(text.contains("uniform token info:implementationSource = \"sourceAsset\""));
        assert!(text.contains(
            "uniform token info:mdl:sourceAsset:subIdentifier = \"AperturePBR_Opacity\""
        ));
        assert!(text.contains("uniform token[] xformOpOrder = [\"xformOp:transform\"]"));
        assert!(!text.contains("= sourceAsset"));
    }

    #[test]
    fn test_identity_overrides_weaker_xform_ops() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.usda");
        write_capture(&capture);
        let mut scene = read_scene(&capture, &ReadOptions::default()).unwrap().scene;
        let rock = scene.find_prim_mut("/RootNode/rock").unwrap();
        assert!(!rock.transform.is_identity_approx());
        rock.transform = Mat4::IDENTITY;

        let target = ExportTarget::new(dir.path().join("mod.usda")).with_stack(vec![capture]);
        let report = export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();
        assert_eq!(report.status(), OperationStatus::Success);

        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        let rock = written.prim("/RootNode/rock").unwrap();
        assert!(rock.attribute("xformOp:transform").is_some());
        assert!(rock.attribute("xformOpOrder").is_some());

        let root = dir.path().join("root.usda");
        std::fs::write(
            &root,
            "#usda 1.0\n(\n    subLayers = [@./mod.usda@, @./capture.usda@]\n)\n",
        )
        .unwrap();
        let composed = read_scene(&root, &ReadOptions::default()).unwrap().scene;
        let rock = composed.find_prim("/RootNode/rock").unwrap();
        assert!(rock.transform.is_identity_approx());
    }

    #[test]
    fn test_identity_without_authored_ops_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let target = ExportTarget::new(dir.path().join("mod.usda"));
        export_scene(
            &scene_with(vec![triangle("/RootNode/rock")]),
            &target,
            None,
            &CancellationToken::new(),
            None,
        )
        .unwrap();
        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        let rock = written.prim("/RootNode/rock").unwrap();
        assert!(rock.attribute("xformOpOrder").is_none());
    }

    #[test]
    fn test_texture_paths_rebased_onto_target_directory() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture/capture.usda");
        write_capture(&capture);
        std::fs::create_dir_all(dir.path().join("capture/textures")).unwrap();
        std::fs::write(dir.path().join("capture/textures/albedo.dds"), b"dds").unwrap();
        let scene = read_scene(&capture, &ReadOptions::default()).unwrap().scene;

        let elsewhere = ExportTarget::new(dir.path().join("mod/mod.usda"));
        export_scene(&scene, &elsewhere, None, &CancellationToken::new(), None).unwrap();
        let asset = diffuse_asset(&elsewhere.layer);
        assert_eq!(asset, "../capture/textures/albedo.dds");
        assert!(dir.path().join("mod").join(&asset).is_file());

        // Next to the capture the authored path already resolves
        let beside = ExportTarget::new(dir.path().join("capture/mod.usda"));
        export_scene(&scene, &beside, None, &CancellationToken::new(), None).unwrap();
        assert_eq!(diffuse_asset(&beside.layer), "./textures/albedo.dds");
    }

    #[test]
    fn test_light_edit_exported_as_over() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.usda");
        std::fs::write(
            &capture,
            r#"#usda 1.0
def Xform "RootNode"
{
    def Scope "lights"
    {
        def SphereLight "light_0F00"
        {
            float inputs:intensity = 20
            float inputs:radius = 1
            custom string capture_note = "kept in capture"
        }
    }
}
"#,
        )
        .unwrap();
        let mut scene = read_scene(&capture, &ReadOptions::default()).unwrap().scene;
        let light = scene.find_prim_mut("/RootNode/lights/light_0F00").unwrap();
        let data = light.light.as_mut().unwrap();
        data.intensity = 80.0;
        data.color = Vec3::new(1.0, 0.0, 0.0);
        let mut added = PrimNode::new("/RootNode/lights/light_new", PrimKind::Light);
        added.light = Some(crate::light::LightData::new(crate::light::LightShape::Rect));
        scene.roots[0].children[0].children.push(added);

        let target = ExportTarget::new(dir.path().join("mod.usda"));
        let report = export_scene(&scene, &target, None, &CancellationToken::new(), None).unwrap();
        assert_eq!(report.status(), OperationStatus::Success);

        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        let light = written.prim("/RootNode/lights/light_0F00").unwrap();
        assert_eq!(light.specifier, Specifier::Over);
        assert!(light.attribute("capture_note").is_none());
        assert_eq!(
            light.attribute("inputs:intensity").and_then(Attribute::value),
            Some(&Value::from_f32(80.0))
        );
        let new_light = written.prim("/RootNode/lights/light_new").unwrap();
        assert_eq!(new_light.type_name.as_deref(), Some("RectLight"));

        let root = dir.path().join("root.usda");
        std::fs::write(
            &root,
            "#usda 1.0\n(\n    subLayers = [@./mod.usda@, @./capture.usda@]\n)\n",
        )
        .unwrap();
        let composed = read_scene(&root, &ReadOptions::default()).unwrap().scene;
        let light = composed.find_prim("/RootNode/lights/light_0F00").unwrap();
        let data = light.light.as_ref().unwrap();
        assert_eq!(data.intensity, 80.0);
        assert_eq!(data.color, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(data.radius, Some(1.0));
    }

    #[test]
    fn test_subsets_written_with_bindings() {
        let dir = tempfile::tempdir().unwrap();
        let target = ExportTarget::new(dir.path().join("mod.usda"));
        let mut node = triangle("/RootNode/rock");
        if let Some(mesh) = node.mesh.as_mut() {
            mesh.subsets.push(crate::mesh::FaceSubset {
                name: "top".to_string(),
                faces: vec![0],
                binding: Some(MaterialBinding::new("/RootNode/Looks/mat_top")),
            });
            mesh.rebuild_face_subsets();
        }
        export_scene(&scene_with(vec![node]), &target, None, &CancellationToken::new(), None)
            .unwrap();

        let written = read_layer(&target.layer, &StageOptions::default()).unwrap();
        let subset = written.prim("/RootNode/rock/top").unwrap();
        assert_eq!(subset.type_name.as_deref(), Some("GeomSubset"));
        assert_eq!(
            subset.relationship("material:binding").unwrap().targets,
            vec!["/RootNode/Looks/mat_top".to_string()]
        );
        assert!(subset.api_schemas().contains(&"MaterialBindingAPI".to_string()));
    }
}
