//! Reading capture and project stages into a [`SceneModel`].
//!
//! The stage is composed first (sublayers, references, payloads), then
//! walked once to build the neutral scene:
//!
//! - `Xform` ops are folded into each prim's local transform
//! - `Mesh` prims get [`MeshData`], triangulated when they hold polygons
//! - `GeomSubset` children in the `materialBind` family become subsets
//! - `Material` prims are matched and translated to [`MaterialNode`]s
//! - lights and cameras keep their UsdLux/UsdGeom parameters
//!
//! Missing references and material targets are reported as diagnostics;
//! the prims are kept and flagged.
//!
//! # Example
//!
//! ```ignore
//! use remix_core::reader::{read_scene, ReadOptions};
//!
//! let report = read_scene("capture.usda".as_ref(), &ReadOptions::default())?;
//! println!("{} meshes", report.scene.mesh_count());
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use remix_math::{Mat4, UpAxis};
use serde::Serialize;

use crate::batch::{run_batch, BatchOutcome, CancellationToken, ItemFailure, OperationStatus, ProgressFn};
use crate::camera::CameraData;
use crate::config::SessionConfig;
use crate::error::{Diagnostic, ErrorKind, RemixResult, Severity};
use crate::light::LightData;
use crate::material::{to_neutral, MaterialNode, RemixMaterial, TextureRef};
use crate::mesh::{FaceSubset, Interpolation, MeshData, Primvar, SkinBinding, UvSet};
use crate::scene::{MaterialBinding, PrimKind, PrimNode, SceneModel};
use crate::texture::{EditableTexture, TextureAsset, TextureConverter, TextureError};
use crate::usd::{
    compose_xform_ops, Attribute, ComposedPrim, Property, Stage, StageOptions, Value, XformOp,
};

/// Where Remix projects keep textures, relative to the authoring layer.
const TEXTURE_SEARCH_DIRS: &[&str] = &[
    "",
    "textures",
    "../assets",
    "../assets/textures",
    "../captures/textures",
];

const TEXTURE_EXTENSIONS: &[&str] = &["dds", "png", "jpg"];

/// Options for [`read_scene`].
#[derive(Clone)]
pub struct ReadOptions {
    pub stage: StageOptions,
    /// Extract referenced textures to editable rasters when set
    pub converter: Option<Arc<TextureConverter>>,
    /// Fan-triangulate polygon meshes
    pub triangulate: bool,
    /// Threads used by [`import_batch`]
    pub max_workers: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            stage: StageOptions::default(),
            converter: None,
            triangulate: true,
            max_workers: 4,
        }
    }
}

impl ReadOptions {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            stage: config.stage_options(),
            max_workers: config.max_workers,
            ..Default::default()
        }
    }

    pub fn with_converter(mut self, converter: Arc<TextureConverter>) -> Self {
        self.converter = Some(converter);
        self
    }
}

/// A read scene with the findings collected along the way.
#[derive(Clone, Debug, Serialize)]
pub struct ImportReport {
    pub scene: SceneModel,
    pub diagnostics: Vec<Diagnostic>,
}

impl ImportReport {
    /// `PartialSuccess` when any warning was raised.
    pub fn status(&self) -> OperationStatus {
        if self
            .diagnostics
            .iter()
            .any(|d| d.severity >= Severity::Warning)
        {
            OperationStatus::PartialSuccess
        } else {
            OperationStatus::Success
        }
    }
}

/// Read a USD document into a scene model.
///
/// Only an unreadable or malformed root layer fails the read.
pub fn read_scene(path: &Path, options: &ReadOptions) -> RemixResult<ImportReport> {
    let stage = Stage::open_with(path, &options.stage)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");

    let mut builder = SceneBuilder::new(&stage, options, name);
    for root in stage.roots.values() {
        let node = builder.process_prim(root);
        builder.scene.roots.push(node);
    }
    let mut report = builder.finish();

    let bases = search_bases(&stage);
    resolve_textures(&mut report, options.converter.as_deref(), &bases);

    log::info!(
        "Read {}: {} prims, {} meshes, {} diagnostics",
        path.display(),
        report.scene.prim_count(),
        report.scene.mesh_count(),
        report.diagnostics.len()
    );
    Ok(report)
}

/// Read several documents in parallel, each into its own scene.
///
/// A failing file is recorded and the rest continue. Warnings from
/// successful reads are collected in the outcome's diagnostics.
pub fn import_batch(
    paths: &[PathBuf],
    options: &ReadOptions,
    cancel: &CancellationToken,
    progress: Option<ProgressFn<'_>>,
) -> BatchOutcome<SceneModel> {
    let read = |path: &PathBuf| {
        read_scene(path, options).map_err(|e| {
            ItemFailure::new(path.display().to_string(), e.kind(), e.to_string())
        })
    };
    let label = |path: &PathBuf| path.display().to_string();

    let reports = match rayon::ThreadPoolBuilder::new()
        .num_threads(options.max_workers.max(1))
        .build()
    {
        Ok(pool) => pool.install(|| run_batch(paths, cancel, progress, label, read)),
        Err(e) => {
            log::warn!("Falling back to the global pool: {}", e);
            run_batch(paths, cancel, progress, label, read)
        }
    };

    let mut outcome = BatchOutcome {
        failures: reports.failures,
        cancelled: reports.cancelled,
        diagnostics: reports.diagnostics,
        successes: Vec::new(),
    };
    for (item, report) in reports.successes {
        outcome.diagnostics.extend(report.diagnostics);
        outcome.successes.push((item, report.scene));
    }
    log::info!(
        "Imported {} of {} captures",
        outcome.successes.len(),
        paths.len()
    );
    outcome
}

struct SceneBuilder<'a> {
    stage: &'a Stage,
    options: &'a ReadOptions,
    scene: SceneModel,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> SceneBuilder<'a> {
    fn new(stage: &'a Stage, options: &'a ReadOptions, name: &str) -> Self {
        let mut scene = SceneModel::new(name);
        scene.source = Some(stage.root_path.clone());
        scene.layers = stage.layers.iter().map(|l| l.path.clone()).collect();
        if let Some(axis) = stage.layer_metadata("upAxis").and_then(Value::as_str) {
            scene.up_axis = UpAxis::from_token(axis);
        }
        if let Some(mpu) = stage.layer_metadata("metersPerUnit").and_then(Value::as_f64) {
            scene.meters_per_unit = mpu;
        }
        Self {
            stage,
            options,
            scene,
            diagnostics: stage.diagnostics.clone(),
        }
    }

    fn process_prim(&mut self, prim: &ComposedPrim) -> PrimNode {
        let kind = PrimKind::from_type_name(prim.type_name.as_deref());
        let mut node = PrimNode::new(prim.path.clone(), kind.clone());
        node.type_name = prim.type_name.clone();
        node.transform = self.local_transform(prim);
        node.material_binding = self.binding(prim);

        if !prim.broken_arcs.is_empty() {
            let reasons: Vec<String> = prim
                .broken_arcs
                .iter()
                .map(|b| format!("{} ({})", b.asset, b.reason))
                .collect();
            node.broken_reference = Some(reasons.join("; "));
        }
        if is_capture_instance(&prim.path) {
            node.instance_of = prim
                .resolved_arcs
                .iter()
                .find_map(|arc| arc.asset.clone().or_else(|| arc.prim.clone()))
                .or_else(|| prim.broken_arcs.first().map(|b| b.asset.clone()));
        }
        node.remix_metadata = prim
            .metadata_value("customData")
            .and_then(|data| data.dict_get("_remix_metadata"))
            .cloned();

        match kind {
            PrimKind::Mesh => node.mesh = Some(self.process_mesh(prim)),
            PrimKind::Material => node.material = Some(self.process_material(prim)),
            PrimKind::Light => node.light = LightData::from_prim(prim),
            PrimKind::Camera => node.camera = CameraData::from_prim(prim),
            _ => {}
        }

        for child in prim.children.values() {
            // Subsets live in MeshData
            if node.mesh.is_some() && child.is_a("GeomSubset") {
                continue;
            }
            node.children.push(self.process_prim(child));
        }
        node
    }

    fn local_transform(&mut self, prim: &ComposedPrim) -> Mat4 {
        let Some(order) = prim.value("xformOpOrder").and_then(Value::as_string_array) else {
            return Mat4::IDENTITY;
        };
        let mut ops = Vec::with_capacity(order.len());
        for op_name in &order {
            if op_name == "!resetXformStack!" {
                continue;
            }
            let (name, invert) = match op_name.strip_prefix("!invert!") {
                Some(name) => (name, true),
                None => (op_name.as_str(), false),
            };
            match prim
                .value(name)
                .and_then(|value| XformOp::from_attribute(name, value))
            {
                Some(op) if invert => ops.push(XformOp::Transform(op.to_matrix().inverse())),
                Some(op) => ops.push(op),
                None => self.diagnostics.push(Diagnostic::warning(
                    ErrorKind::MalformedDocument,
                    prim.path.clone(),
                    format!("xform op {} is missing or unreadable", op_name),
                )),
            }
        }
        compose_xform_ops(&ops)
    }

    fn binding(&mut self, prim: &ComposedPrim) -> Option<MaterialBinding> {
        let target = prim.relationship("material:binding")?.targets.first()?;
        let mut binding = MaterialBinding::new(target.clone());
        if self.stage.prim(target).is_none() {
            binding.broken = true;
            self.diagnostics.push(Diagnostic::warning(
                ErrorKind::BrokenReference,
                prim.path.clone(),
                format!("material {} not found", target),
            ));
        }
        Some(binding)
    }

    fn process_mesh(&mut self, prim: &ComposedPrim) -> MeshData {
        let mut mesh = MeshData {
            positions: prim
                .value("points")
                .and_then(Value::as_vec3_array)
                .unwrap_or_default(),
            face_vertex_counts: self.index_array(prim, "faceVertexCounts"),
            face_vertex_indices: self.index_array(prim, "faceVertexIndices"),
            left_handed: prim.value("orientation").and_then(Value::as_str) == Some("leftHanded"),
            double_sided: prim
                .value("doubleSided")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            ..Default::default()
        };

        let normals_attr = prim
            .attribute("primvars:normals")
            .or_else(|| prim.attribute("normals"));
        if let Some(attr) = normals_attr {
            mesh.normals = read_primvar(prim, attr, &mesh, Value::as_vec3_array);
        }
        for property in prim.properties.values() {
            let Property::Attribute(attr) = property else {
                continue;
            };
            if is_uv_primvar(attr) {
                if let Some(primvar) = read_primvar(prim, attr, &mesh, Value::as_vec2_array) {
                    let name = attr.name.trim_start_matches("primvars:").to_string();
                    mesh.uv_sets.push(UvSet { name, primvar });
                }
            }
        }

        for child in prim.children.values().filter(|c| c.is_a("GeomSubset")) {
            if child.value("familyName").and_then(Value::as_str) != Some("materialBind") {
                continue;
            }
            let faces = self.index_array(child, "indices");
            let binding = self.binding(child);
            mesh.subsets.push(FaceSubset {
                name: child.name.clone(),
                faces,
                binding,
            });
        }
        mesh.rebuild_face_subsets();
        mesh.skin = detect_skin(prim);

        if let Err(e) = mesh.validate() {
            self.diagnostics.push(Diagnostic::warning(
                ErrorKind::MalformedDocument,
                prim.path.clone(),
                format!("invalid mesh data: {}", e),
            ));
            return mesh;
        }
        if self.options.triangulate && !mesh.is_triangulated() {
            let dropped = mesh.triangulate();
            if dropped > 0 {
                self.diagnostics.push(Diagnostic::warning(
                    ErrorKind::MalformedDocument,
                    prim.path.clone(),
                    format!("dropped {} faces with fewer than three vertices", dropped),
                ));
            }
        }
        mesh
    }

    fn index_array(&mut self, prim: &ComposedPrim, name: &str) -> Vec<u32> {
        let values = prim
            .value(name)
            .and_then(Value::as_int_array)
            .unwrap_or_default();
        match values.iter().map(|&i| u32::try_from(i)).collect() {
            Ok(indices) => indices,
            Err(_) => {
                self.diagnostics.push(Diagnostic::warning(
                    ErrorKind::MalformedDocument,
                    prim.path.clone(),
                    format!("{} has negative entries", name),
                ));
                Vec::new()
            }
        }
    }

    fn process_material(&mut self, prim: &ComposedPrim) -> MaterialNode {
        let material = RemixMaterial::from_prim(prim);
        let node = to_neutral(&material, &prim.name);
        for note in &node.capabilities {
            self.diagnostics.push(Diagnostic::info(
                ErrorKind::UnsupportedFeature,
                prim.path.clone(),
                note.feature.description(),
            ));
        }
        node
    }

    fn finish(self) -> ImportReport {
        ImportReport {
            scene: self.scene,
            diagnostics: self.diagnostics,
        }
    }
}

fn is_capture_instance(path: &str) -> bool {
    path.strip_prefix("/RootNode/instances/")
        .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
}

fn is_uv_primvar(attr: &Attribute) -> bool {
    attr.name.starts_with("primvars:")
        && !attr.name.ends_with(":indices")
        && (attr.type_name.starts_with("texCoord2") || attr.type_name.starts_with("float2"))
        && attr.type_name.ends_with("[]")
}

/// Read a primvar with its interpolation and `:indices`. Interpolation that
/// is not authored is inferred from the element count.
fn read_primvar<T: Copy>(
    prim: &ComposedPrim,
    attr: &Attribute,
    mesh: &MeshData,
    decode: fn(&Value) -> Option<Vec<T>>,
) -> Option<Primvar<T>> {
    let values = attr.value().and_then(decode)?;
    let indices: Option<Vec<u32>> = prim
        .value(&format!("{}:indices", attr.name))
        .and_then(Value::as_int_array)
        .map(|ints| ints.into_iter().filter_map(|i| u32::try_from(i).ok()).collect());
    let count = indices.as_ref().map_or(values.len(), Vec::len);

    let interpolation = attr
        .metadata_value("interpolation")
        .and_then(Value::as_str)
        .and_then(Interpolation::from_token)
        .unwrap_or(if count == mesh.corner_count() && count != mesh.positions.len() {
            Interpolation::FaceVarying
        } else if count == 1 {
            Interpolation::Constant
        } else {
            Interpolation::Vertex
        });

    let mut primvar = Primvar::new(values, interpolation);
    primvar.indices = indices;
    Some(primvar)
}

fn detect_skin(prim: &ComposedPrim) -> Option<SkinBinding> {
    let mut skin = SkinBinding::default();
    if prim.api_schemas().iter().any(|s| s == "SkelBindingAPI") {
        skin.evidence.push("SkelBindingAPI".to_string());
    }
    for name in prim.properties.keys() {
        if name.starts_with("skel:") || name.starts_with("primvars:skel:") {
            skin.evidence.push(name.clone());
        }
    }
    if skin.evidence.is_empty() {
        return None;
    }
    skin.skeleton = prim
        .relationship("skel:skeleton")
        .and_then(|r| r.targets.first().cloned());
    skin.joints = prim
        .value("skel:joints")
        .and_then(Value::as_string_array)
        .unwrap_or_default();
    Some(skin)
}

/// Directories texture paths may be relative to, strongest layer first.
fn search_bases(stage: &Stage) -> Vec<PathBuf> {
    let mut bases: Vec<PathBuf> = Vec::new();
    let layer_files = stage.layers.iter().map(|l| &l.path);
    for file in layer_files.chain(stage.referenced_files.iter()) {
        let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
        if !bases.contains(&dir) {
            bases.push(dir);
        }
    }
    bases
}

/// Find a texture on disk: next to each layer, then in the Remix texture
/// directories, trying `.dds`, `.png` and `.jpg` when the authored file is
/// missing.
pub fn resolve_texture(asset: &str, bases: &[PathBuf]) -> Option<PathBuf> {
    let asset = asset.trim_start_matches("./");
    if asset.is_empty() {
        return None;
    }
    let relative = Path::new(asset);
    if relative.is_absolute() {
        return relative.is_file().then(|| relative.to_path_buf());
    }
    let file_name = relative.file_name()?;

    let mut candidates = Vec::new();
    for base in bases {
        candidates.push(base.join(relative));
        for dir in TEXTURE_SEARCH_DIRS.iter().filter(|d| !d.is_empty()) {
            candidates.push(base.join(dir).join(file_name));
        }
    }
    if let Some(found) = candidates.iter().find(|c| c.is_file()) {
        return Some(found.clone());
    }
    candidates.iter().find_map(|candidate| {
        TEXTURE_EXTENSIONS
            .iter()
            .map(|ext| candidate.with_extension(ext))
            .find(|c| c.is_file())
    })
}

/// Resolve every material texture to a file. With a converter, also
/// extract editable rasters, caching per source file; a texture that cannot
/// be found is then reported.
fn resolve_textures(
    report: &mut ImportReport,
    converter: Option<&TextureConverter>,
    bases: &[PathBuf],
) {
    let mut done: HashMap<PathBuf, Result<EditableTexture, String>> = HashMap::new();
    let mut findings = Vec::new();

    let mut visit = |node: &mut PrimNode| {
        let path = node.path.clone();
        let Some(material) = node.material.as_mut() else {
            return;
        };
        for texture in material.textures_mut() {
            let resolved = resolve_texture(&texture.asset, bases);
            texture.resolved = resolved.clone();
            let Some(converter) = converter else {
                continue;
            };
            let Some(resolved) = resolved else {
                findings.push(Diagnostic::warning(
                    ErrorKind::BrokenReference,
                    path.clone(),
                    format!("texture {} not found", texture.asset),
                ));
                continue;
            };
            let result = done
                .entry(resolved.clone())
                .or_insert_with(|| editable_for(converter, texture, &resolved));
            match result {
                Ok(editable) => {
                    texture.editable = Some(editable.path.clone());
                    texture.has_alpha = Some(editable.has_alpha);
                }
                Err(message) => findings.push(Diagnostic::warning(
                    ErrorKind::ConversionFailure,
                    path.clone(),
                    message.clone(),
                )),
            }
        }
        if let Some(has_alpha) = material.albedo.texture.as_ref().and_then(|t| t.has_alpha) {
            material.resolve_alpha(has_alpha);
        }
    };
    for root in &mut report.scene.roots {
        walk_mut(root, &mut visit);
    }
    report.diagnostics.extend(findings);
}

fn editable_for(
    converter: &TextureConverter,
    texture: &TextureRef,
    resolved: &Path,
) -> Result<EditableTexture, String> {
    let convert = || -> Result<EditableTexture, TextureError> {
        let asset = TextureAsset::from_file(resolved, Some(texture.role))?;
        converter.to_editable(&asset)
    };
    convert().map_err(|e| format!("{} ({})", e, e.kind()))
}

fn walk_mut(node: &mut PrimNode, visit: &mut dyn FnMut(&mut PrimNode)) {
    visit(node);
    for child in &mut node.children {
        walk_mut(child, visit);
    }
}
