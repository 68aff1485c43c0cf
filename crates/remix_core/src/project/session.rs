//! Per-project session state.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::batch::{BatchOutcome, CancellationToken, ProgressFn};
use crate::config::SessionConfig;
use crate::error::RemixResult;
use crate::export::{prepare_export, ExportReport, ExportTarget};
use crate::reader::{import_batch, read_scene, ImportReport, ReadOptions};
use crate::scene::SceneModel;
use crate::texture::{content_hash, RepairOutcome, TextureConverter};

use super::{LayerManager, ProjectError, ProjectLayer, ProjectResult, ProjectState};

/// An open project with its texture pipeline.
///
/// Layer edits go through [`ProjectSession::edit_layers`] under a write
/// lock. At most one long-running task (import, export, texture repair)
/// runs at a time; starting a second one fails with a conflict.
pub struct ProjectSession {
    config: SessionConfig,
    layers: RwLock<LayerManager>,
    converter: Option<Arc<TextureConverter>>,
    running: Mutex<Option<&'static str>>,
}

/// Clears the running task on drop.
struct TaskGuard<'a> {
    running: &'a Mutex<Option<&'static str>>,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl ProjectSession {
    /// Open the project rooted at `root`, with texconv and the cache taken
    /// from `config`. A cache that cannot be opened leaves the session
    /// without texture conversion.
    pub fn open(root: &Path, config: SessionConfig) -> RemixResult<Self> {
        let converter = match TextureConverter::from_config(&config) {
            Ok(converter) => Some(Arc::new(converter)),
            Err(e) => {
                log::warn!("Texture conversion disabled: {}", e);
                None
            }
        };
        Self::open_with(root, config, converter)
    }

    pub fn open_with(
        root: &Path,
        config: SessionConfig,
        converter: Option<Arc<TextureConverter>>,
    ) -> RemixResult<Self> {
        let mut manager = LayerManager::new();
        manager.load(root)?;
        Ok(Self {
            config,
            layers: RwLock::new(manager),
            converter,
            running: Mutex::new(None),
        })
    }

    /// Create a new `mod.usda` at `root` and open it.
    pub fn create(root: &Path, game_name: Option<&str>, config: SessionConfig) -> RemixResult<Self> {
        LayerManager::new().create_project(root, game_name)?;
        Self::open(root, config)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn converter(&self) -> Option<&Arc<TextureConverter>> {
        self.converter.as_ref()
    }

    pub fn state(&self) -> ProjectState {
        self.read().state()
    }

    pub fn revision(&self) -> u64 {
        self.read().revision()
    }

    /// Snapshot of the layer list.
    pub fn layers(&self) -> Vec<ProjectLayer> {
        self.read().layers().to_vec()
    }

    pub fn target(&self) -> RemixResult<ProjectLayer> {
        Ok(self.read().target()?.clone())
    }

    /// Run a mutation of the layer list under the write lock.
    pub fn edit_layers<R>(
        &self,
        edit: impl FnOnce(&mut LayerManager) -> ProjectResult<R>,
    ) -> RemixResult<R> {
        let mut manager = self.write();
        Ok(edit(&mut manager)?)
    }

    /// Read the composed project stage.
    pub fn read_project(&self) -> RemixResult<ImportReport> {
        let root = self
            .read()
            .root_path()
            .map(Path::to_path_buf)
            .ok_or(ProjectError::NotLoaded)?;
        read_scene(&root, &self.read_options())
    }

    /// Read capture files in parallel, extracting their textures when a
    /// converter is available.
    pub fn import_captures(
        &self,
        paths: &[PathBuf],
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> RemixResult<BatchOutcome<SceneModel>> {
        let _task = self.begin_task("import")?;
        Ok(import_batch(paths, &self.read_options(), cancel, progress))
    }

    /// Export `scene` into the current target layer.
    ///
    /// Textures are converted into a staging directory without holding the
    /// project lock, and only placed next to the target on commit. Before the
    /// layer is saved the target, the project revision and the target file
    /// contents are checked against what they were when the export started;
    /// any difference aborts with a conflict and nothing is saved.
    pub fn export(
        &self,
        scene: &SceneModel,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> RemixResult<ExportReport> {
        let _task = self.begin_task("export")?;
        let (target, stack, revision) = {
            let manager = self.read();
            let target = manager.target()?.clone();
            let stack = manager
                .layers()
                .iter()
                .filter(|l| !l.is_target && !l.missing)
                .map(|l| l.path.clone())
                .collect::<Vec<_>>();
            (target, stack, manager.revision())
        };
        let fingerprint = file_fingerprint(&target.path)?;

        let export_target = ExportTarget {
            layer: target.path.clone(),
            stack,
            options: self.config.stage_options(),
        };
        let prepared = prepare_export(
            scene,
            &export_target,
            self.converter.as_deref(),
            cancel,
            progress,
        )?;

        let mut manager = self.write();
        let unchanged = manager.target().map(|t| t.id == target.id).unwrap_or(false)
            && manager.revision() == revision
            && file_fingerprint(&target.path)? == fingerprint;
        if !unchanged {
            log::warn!("Project changed while exporting to {}", target.id);
            return Err(ProjectError::Conflict("export".to_string()).into());
        }
        let report = prepared.commit()?;
        if !report.cancelled {
            manager.mark_dirty();
        }
        Ok(report)
    }

    /// Check every DDS under `root` (the project directory by default) and
    /// rebuild broken ones from rasters found next to them.
    pub fn repair_textures(
        &self,
        root: Option<&Path>,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> RemixResult<BatchOutcome<RepairOutcome>> {
        let _task = self.begin_task("texture repair")?;
        let converter = self.converter.as_ref().ok_or(ProjectError::NoConverter)?;
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => self.read().project_dir()?,
        };
        Ok(converter.repair_directory(&root, cancel, progress)?)
    }

    /// Close the project. Fails, returning the session, while layer
    /// changes are unsaved.
    pub fn close(self) -> Result<(), (Self, ProjectError)> {
        let result = self.write().close();
        match result {
            Ok(()) => Ok(()),
            Err(e) => Err((self, e)),
        }
    }

    fn read_options(&self) -> ReadOptions {
        let options = ReadOptions::from_config(&self.config);
        match &self.converter {
            Some(converter) => options.with_converter(converter.clone()),
            None => options,
        }
    }

    fn begin_task(&self, name: &'static str) -> ProjectResult<TaskGuard<'_>> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = *running {
            return Err(ProjectError::TaskInFlight(current.to_string()));
        }
        *running = Some(name);
        log::debug!("Started {}", name);
        Ok(TaskGuard {
            running: &self.running,
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, LayerManager> {
        self.layers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, LayerManager> {
        self.layers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Content hash of a layer file, `None` when it does not exist yet.
fn file_fingerprint(path: &Path) -> ProjectResult<Option<String>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(content_hash(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(ProjectError::io(path, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{OperationStatus, Progress};
    use crate::error::ErrorKind;
    use crate::material::{MaterialNode, TextureRef};
    use crate::mesh::MeshData;
    use crate::scene::{PrimKind, PrimNode};
    use crate::texture::dds::test_dds;
    use crate::texture::{ConversionCache, ConversionTarget, ConversionTool, TextureResult, TextureRole};
    use remix_math::Vec3;

    struct DdsTool;

    impl ConversionTool for DdsTool {
        fn convert(&self, input: &Path, out_dir: &Path, target: &ConversionTarget) -> TextureResult<PathBuf> {
            let stem = input.file_stem().unwrap().to_str().unwrap();
            let out = out_dir.join(format!("{}.{}", stem, target.extension()));
            std::fs::write(&out, test_dds(4, 4, 99, 1))?;
            Ok(out)
        }
    }

    fn session(dir: &Path) -> ProjectSession {
        let config = SessionConfig {
            cache_dir: dir.join("cache"),
            ..Default::default()
        };
        let cache = ConversionCache::open(dir.join("cache")).unwrap();
        let converter = TextureConverter::new(Arc::new(DdsTool), cache, 2).unwrap();
        let root = dir.join("project/mod.usda");
        std::fs::create_dir_all(root.parent().unwrap()).unwrap();
        LayerManager::new().create_project(&root, Some("Test")).unwrap();
        ProjectSession::open_with(&root, config, Some(Arc::new(converter))).unwrap()
    }

    /// A mesh and a material whose albedo has an edited raster.
    fn edited_scene(dir: &Path) -> SceneModel {
        let raster = dir.join("wall.png");
        std::fs::write(&raster, b"edited pixels").unwrap();

        let mut material = MaterialNode::new("mat_wall");
        let mut albedo = TextureRef::new("./textures/wall.a.rtex.dds", TextureRole::Albedo);
        albedo.editable = Some(raster);
        material.albedo.texture = Some(albedo);
        let mut mat = PrimNode::new("/RootNode/Looks/mat_wall", PrimKind::Material);
        mat.material = Some(material);

        let mut mesh = PrimNode::new("/RootNode/meshes/wall", PrimKind::Mesh);
        mesh.mesh = Some(MeshData {
            positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
            face_vertex_counts: vec![3],
            face_vertex_indices: vec![0, 1, 2],
            ..Default::default()
        });
        let mut looks = PrimNode::new("/RootNode/Looks", PrimKind::Scope);
        looks.children.push(mat);
        let mut meshes = PrimNode::new("/RootNode/meshes", PrimKind::Scope);
        meshes.children.push(mesh);
        let mut root = PrimNode::new("/RootNode", PrimKind::Transform);
        root.children = vec![looks, meshes];

        let mut scene = SceneModel::new("edit");
        scene.roots.push(root);
        scene
    }

    #[test]
    fn test_export_into_target_sublayer() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let id = session
            .edit_layers(|m| m.create_sublayer("replacements", None))
            .unwrap();
        session.edit_layers(|m| m.set_target_layer(&id)).unwrap();
        session.edit_layers(|m| m.flush()).unwrap();
        let root_before = std::fs::read(dir.path().join("project/mod.usda")).unwrap();

        let report = session
            .export(&edited_scene(dir.path()), &CancellationToken::new(), None)
            .unwrap();
        assert_eq!(report.status(), OperationStatus::Success);
        assert_eq!(session.state(), ProjectState::Dirty);

        let texture = dir.path().join("project/subUSDAs/textures/wall.a.rtex.dds");
        assert_eq!(report.textures, vec![texture.clone()]);
        assert!(texture.is_file());

        let layer = crate::usd::read_layer(
            &dir.path().join("project/subUSDAs/replacements.usda"),
            &Default::default(),
        )
        .unwrap();
        let shader = layer.prim("/RootNode/Looks/mat_wall/Shader").unwrap();
        let albedo = shader
            .attribute("inputs:diffuse_texture")
            .and_then(|a| a.value())
            .and_then(|v| v.as_str())
            .unwrap();
        assert_eq!(albedo, "./textures/wall.a.rtex.dds");
        assert_eq!(
            std::fs::read(dir.path().join("project/mod.usda")).unwrap(),
            root_before
        );
    }

    #[test]
    fn test_mutation_during_export_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let scene = edited_scene(dir.path());

        let progress = |_: Progress| {
            session.edit_layers(|m| m.create_sublayer("late", None)).unwrap();
        };
        let err = session
            .export(&scene, &CancellationToken::new(), Some(&progress))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentMutationConflict);
        // The mutation itself went through
        assert_eq!(session.layers().len(), 2);
        let root = crate::usd::read_layer(&dir.path().join("project/mod.usda"), &Default::default())
            .unwrap();
        assert!(root.prim("/RootNode").is_none());
        assert!(!dir.path().join("project/textures").exists());
    }

    #[test]
    fn test_conflicted_export_keeps_existing_textures() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let texture = dir.path().join("project/textures/wall.a.rtex.dds");
        std::fs::create_dir_all(texture.parent().unwrap()).unwrap();
        std::fs::write(&texture, b"shipped texture").unwrap();

        let progress = |_: Progress| {
            session.edit_layers(|m| m.create_sublayer("late", None)).unwrap();
        };
        let err = session
            .export(&edited_scene(dir.path()), &CancellationToken::new(), Some(&progress))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConcurrentMutationConflict);
        assert_eq!(std::fs::read(&texture).unwrap(), b"shipped texture");
        let entries = std::fs::read_dir(texture.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);

        // Without interference the same export replaces it
        session.edit_layers(|m| m.flush()).unwrap();
        session
            .export(&edited_scene(dir.path()), &CancellationToken::new(), None)
            .unwrap();
        assert_ne!(std::fs::read(&texture).unwrap(), b"shipped texture");
    }

    #[test]
    fn test_one_long_task_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        let scene = edited_scene(dir.path());

        let nested = Mutex::new(None);
        let progress = |_: Progress| {
            let result = session.repair_textures(None, &CancellationToken::new(), None);
            *nested.lock().unwrap() = Some(result.map(|_| ()).map_err(|e| e.kind()));
        };
        session
            .export(&scene, &CancellationToken::new(), Some(&progress))
            .unwrap();
        assert_eq!(
            nested.into_inner().unwrap(),
            Some(Err(ErrorKind::ConcurrentMutationConflict))
        );

        // The guard is released afterwards
        let outcome = session
            .repair_textures(None, &CancellationToken::new(), None)
            .unwrap();
        assert_eq!(outcome.status(), OperationStatus::Success);
    }

    #[test]
    fn test_close_rejected_while_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        session.edit_layers(|m| m.create_sublayer("a", None)).unwrap();

        let (session, err) = session.close().unwrap_err();
        assert!(matches!(err, ProjectError::CloseWhileDirty));
        session.edit_layers(|m| m.flush()).unwrap();
        assert!(session.close().is_ok());
    }
}
