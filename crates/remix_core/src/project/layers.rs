//! Sublayer list of a project root and its load/flush state machine.

use std::path::{Path, PathBuf};

use crate::usd::{
    lexical_normalize, parse_usda, relative_asset_path, save_usda, Layer, MetadataEntry, PrimSpec,
    Specifier, Value,
};

use super::{ProjectError, ProjectLayer, ProjectResult, ProjectState};

/// Id of the root layer.
pub const ROOT_LAYER_ID: &str = "root";

/// Directory, relative to the root layer, that holds replacement sublayers.
pub const SUBLAYER_DIR: &str = "subUSDAs";

/// An empty Remix replacement layer.
///
/// Carries the header the Remix toolkit writes for mod layers. Sublayers
/// also get an `over "RootNode"` so edits have somewhere to land.
pub fn replacement_layer(game_name: Option<&str>, with_root_node: bool) -> Layer {
    let mut custom = Value::Dictionary(Vec::new());
    custom.dict_set(
        "string",
        "lightspeed_game_name",
        Value::String(game_name.unwrap_or_default().to_string()),
    );
    custom.dict_set(
        "string",
        "lightspeed_layer_type",
        Value::String("replacement".to_string()),
    );

    let mut layer = Layer {
        metadata: vec![
            MetadataEntry::new("customLayerData", custom),
            MetadataEntry::new("endTimeCode", Value::Int(100)),
            MetadataEntry::new("metersPerUnit", Value::Int(1)),
            MetadataEntry::new("startTimeCode", Value::Int(0)),
            MetadataEntry::new("timeCodesPerSecond", Value::Int(24)),
            MetadataEntry::new("upAxis", Value::String("Z".to_string())),
        ],
        ..Default::default()
    };
    if with_root_node {
        layer
            .prims
            .push(PrimSpec::new(Specifier::Over, None, "RootNode"));
    }
    layer
}

/// Ordered layers of one project.
///
/// The first entry is always the root layer, followed by its sublayers from
/// strongest to weakest. Exactly one layer is the export target.
#[derive(Debug, Default)]
pub struct LayerManager {
    state: ProjectState,
    root_path: Option<PathBuf>,
    layers: Vec<ProjectLayer>,
    revision: u64,
}

impl LayerManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProjectState {
        self.state
    }

    /// Bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn root_path(&self) -> Option<&Path> {
        self.root_path.as_deref()
    }

    /// Directory of the root layer.
    pub fn project_dir(&self) -> ProjectResult<PathBuf> {
        let root = self.root_path.as_ref().ok_or(ProjectError::NotLoaded)?;
        Ok(parent_dir(root))
    }

    pub fn layers(&self) -> &[ProjectLayer] {
        &self.layers
    }

    pub fn layer(&self, id: &str) -> Option<&ProjectLayer> {
        let id = normalize_authored(id);
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn target(&self) -> ProjectResult<&ProjectLayer> {
        self.ensure_loaded()?;
        self.layers
            .iter()
            .find(|l| l.is_target)
            .ok_or(ProjectError::NotLoaded)
    }

    /// Open a project from its root layer. Any previous project must be
    /// closed first.
    pub fn load(&mut self, root: &Path) -> ProjectResult<()> {
        if self.state != ProjectState::Unloaded {
            return Err(ProjectError::AlreadyLoaded);
        }
        let layer = read_root(root)?;
        self.root_path = Some(root.to_path_buf());
        self.rebuild(&layer.sublayers(), None);
        self.state = ProjectState::Loaded;
        self.revision += 1;
        log::info!(
            "Loaded project {} with {} sublayers",
            root.display(),
            self.layers.len() - 1
        );
        Ok(())
    }

    /// Create a new, empty `mod.usda` at `path` and load it.
    pub fn create_project(&mut self, path: &Path, game_name: Option<&str>) -> ProjectResult<()> {
        if self.state != ProjectState::Unloaded {
            return Err(ProjectError::AlreadyLoaded);
        }
        if path.exists() {
            return Err(ProjectError::AlreadyExists(path.to_path_buf()));
        }
        save_usda(&replacement_layer(game_name, false), path)
            .map_err(|e| ProjectError::io(path, e))?;
        log::info!("Created project {}", path.display());
        self.load(path)
    }

    /// Forget the project. Rejected while there are unsaved changes.
    pub fn close(&mut self) -> ProjectResult<()> {
        if self.state == ProjectState::Dirty {
            return Err(ProjectError::CloseWhileDirty);
        }
        *self = Self {
            revision: self.revision + 1,
            ..Self::default()
        };
        Ok(())
    }

    pub fn set_target_layer(&mut self, id: &str) -> ProjectResult<()> {
        self.ensure_loaded()?;
        let id = normalize_authored(id);
        if !self.layers.iter().any(|l| l.id == id) {
            return Err(ProjectError::UnknownLayer(id));
        }
        for layer in &mut self.layers {
            layer.is_target = layer.id == id;
        }
        log::debug!("Export target is now {}", id);
        self.mark_dirty();
        Ok(())
    }

    /// Insert an existing (or yet to be written) layer file into the
    /// sublayer list. `position` counts sublayers, strongest first, and is
    /// clamped; `None` appends as the weakest. Returns the new layer id.
    pub fn add_sublayer(&mut self, path: &Path, position: Option<usize>) -> ProjectResult<String> {
        let dir = self.project_dir()?;
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            dir.join(path)
        };
        let authored = relative_asset_path(&dir, &absolute);
        let resolved = lexical_normalize(&absolute);
        let duplicate = self
            .layers
            .iter()
            .any(|l| l.id == authored || lexical_normalize(&l.path) == resolved);
        if duplicate {
            return Err(ProjectError::DuplicateLayer(authored));
        }

        let mut sublayers = self.authored_sublayers();
        let index = position.unwrap_or(sublayers.len()).min(sublayers.len());
        sublayers.insert(index, authored.clone());
        let target = self.target()?.id.clone();
        self.rebuild(&sublayers, Some(&target));
        self.mark_dirty();
        log::info!("Added sublayer {} at position {}", authored, index);
        Ok(authored)
    }

    /// Drop a sublayer from the list; the file stays on disk. Removing the
    /// export target retargets the root layer.
    pub fn remove_sublayer(&mut self, id: &str) -> ProjectResult<ProjectLayer> {
        let removed = self.sublayer(id)?.clone();
        let sublayers: Vec<String> = self
            .authored_sublayers()
            .into_iter()
            .filter(|a| normalize_authored(a) != removed.id)
            .collect();
        let target = if removed.is_target {
            ROOT_LAYER_ID.to_string()
        } else {
            self.target()?.id.clone()
        };
        self.rebuild(&sublayers, Some(&target));
        self.mark_dirty();
        log::info!("Removed sublayer {}", removed.id);
        Ok(removed)
    }

    /// Write a new replacement layer to `subUSDAs/<name>.usda` and add it.
    pub fn create_sublayer(&mut self, name: &str, position: Option<usize>) -> ProjectResult<String> {
        let dir = self.project_dir()?;
        let file_stem: String = name
            .trim()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        if file_stem.is_empty() || file_stem.chars().all(|c| c == '_') {
            return Err(ProjectError::InvalidName(name.to_string()));
        }
        let path = dir.join(SUBLAYER_DIR).join(format!("{}.usda", file_stem));
        if path.exists() {
            return Err(ProjectError::AlreadyExists(path));
        }

        let game_name = self
            .root_path
            .as_deref()
            .and_then(|root| read_root(root).ok())
            .and_then(|root| {
                root.custom_layer_data("lightspeed_game_name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            });
        save_usda(&replacement_layer(game_name.as_deref(), true), &path)
            .map_err(|e| ProjectError::io(&path, e))?;
        self.add_sublayer(&path, position)
    }

    /// Move a sublayer to `position` among the sublayers (clamped).
    pub fn move_sublayer(&mut self, id: &str, position: usize) -> ProjectResult<()> {
        let id = self.sublayer(id)?.id.clone();
        let mut sublayers = self.authored_sublayers();
        let Some(from) = sublayers.iter().position(|a| normalize_authored(a) == id) else {
            return Err(ProjectError::UnknownLayer(id));
        };
        let entry = sublayers.remove(from);
        let to = position.min(sublayers.len());
        sublayers.insert(to, entry);
        let target = self.target()?.id.clone();
        self.rebuild(&sublayers, Some(&target));
        self.mark_dirty();
        log::debug!("Moved sublayer {} from {} to {}", id, from, to);
        Ok(())
    }

    /// Write the sublayer list into the root layer file.
    ///
    /// The root is re-read from disk so opinions exported into it since the
    /// load are kept; only `subLayers` changes. Nothing is written unless
    /// the project is dirty.
    pub fn flush(&mut self) -> ProjectResult<()> {
        self.ensure_loaded()?;
        if self.state != ProjectState::Dirty {
            log::debug!("Nothing to flush ({})", self.state);
            return Ok(());
        }
        let root = self.root_path.clone().ok_or(ProjectError::NotLoaded)?;
        let mut layer = read_root(&root)?;
        let sublayers = self.authored_sublayers();
        if sublayers.is_empty() {
            layer.metadata.retain(|e| e.key != "subLayers");
        } else {
            layer.set_sublayers(&sublayers);
        }
        save_usda(&layer, &root).map_err(|e| ProjectError::io(&root, e))?;
        self.state = ProjectState::Saved;
        log::info!("Saved {} ({} sublayers)", root.display(), sublayers.len());
        Ok(())
    }

    /// Drop pending changes and re-read the root layer. The target is kept
    /// when the layer still exists.
    pub fn discard(&mut self) -> ProjectResult<()> {
        self.ensure_loaded()?;
        if self.state != ProjectState::Dirty {
            return Ok(());
        }
        self.state = ProjectState::Loaded;
        self.reread()
    }

    /// Re-read the root layer from disk. Rejected while dirty.
    pub fn reload(&mut self) -> ProjectResult<()> {
        self.ensure_loaded()?;
        if self.state == ProjectState::Dirty {
            return Err(ProjectError::ReloadWhileDirty);
        }
        self.reread()?;
        self.state = ProjectState::Loaded;
        Ok(())
    }

    /// Record a mutation made outside the layer list, such as an export
    /// write into the target layer.
    pub fn mark_dirty(&mut self) {
        if self.state != ProjectState::Unloaded {
            self.state = ProjectState::Dirty;
        }
        self.revision += 1;
    }

    /// Re-check which layer files exist.
    pub fn refresh_missing(&mut self) {
        for layer in &mut self.layers {
            layer.missing = !layer.path.is_file();
        }
    }

    fn reread(&mut self) -> ProjectResult<()> {
        let root = self.root_path.clone().ok_or(ProjectError::NotLoaded)?;
        let layer = read_root(&root)?;
        let target = self.target().ok().map(|l| l.id.clone());
        self.rebuild(&layer.sublayers(), target.as_deref());
        self.revision += 1;
        Ok(())
    }

    fn ensure_loaded(&self) -> ProjectResult<()> {
        match self.state {
            ProjectState::Unloaded => Err(ProjectError::NotLoaded),
            _ => Ok(()),
        }
    }

    fn sublayer(&self, id: &str) -> ProjectResult<&ProjectLayer> {
        self.ensure_loaded()?;
        let layer = self
            .layer(id)
            .ok_or_else(|| ProjectError::UnknownLayer(id.to_string()))?;
        if layer.is_root {
            return Err(ProjectError::RootImmutable);
        }
        Ok(layer)
    }

    fn authored_sublayers(&self) -> Vec<String> {
        self.layers
            .iter()
            .filter(|l| !l.is_root)
            .map(|l| l.authored_path.clone())
            .collect()
    }

    /// Rebuild the layer list from authored sublayer paths, keeping `target`
    /// when it is still present and falling back to the root.
    fn rebuild(&mut self, sublayers: &[String], target: Option<&str>) {
        let Some(root) = self.root_path.clone() else {
            return;
        };
        let dir = parent_dir(&root);
        let target = target
            .filter(|t| *t == ROOT_LAYER_ID || sublayers.iter().any(|a| normalize_authored(a) == *t))
            .unwrap_or(ROOT_LAYER_ID);

        let mut layers = vec![ProjectLayer {
            id: ROOT_LAYER_ID.to_string(),
            missing: !root.is_file(),
            path: root,
            authored_path: String::new(),
            order: 0,
            is_root: true,
            is_target: target == ROOT_LAYER_ID,
        }];
        for (i, authored) in sublayers.iter().enumerate() {
            let id = normalize_authored(authored);
            let path = dir.join(&id);
            layers.push(ProjectLayer {
                is_target: id == target,
                missing: !path.is_file(),
                id,
                path,
                authored_path: authored.clone(),
                order: i + 1,
                is_root: false,
            });
        }
        for layer in layers.iter().filter(|l| l.missing && !l.is_root) {
            log::warn!("Sublayer {} is missing on disk", layer.path.display());
        }
        self.layers = layers;
    }
}

fn read_root(path: &Path) -> ProjectResult<Layer> {
    let text = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ProjectError::MissingRoot(path.to_path_buf()),
        _ => ProjectError::io(path, e),
    })?;
    parse_usda(&text).map_err(|source| ProjectError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

/// `./subUSDAs\a.usda` -> `subUSDAs/a.usda`
fn normalize_authored(path: &str) -> String {
    let path = path.replace('\\', "/");
    path.trim_start_matches("./").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn project() -> (tempfile::TempDir, PathBuf, LayerManager) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mod.usda");
        let mut manager = LayerManager::new();
        manager.create_project(&root, Some("Portal")).unwrap();
        (dir, root, manager)
    }

    fn ids(manager: &LayerManager) -> Vec<&str> {
        manager.layers().iter().map(|l| l.id.as_str()).collect()
    }

    #[test]
    fn test_create_project_header() {
        let (_dir, root, manager) = project();
        assert_eq!(manager.state(), ProjectState::Loaded);
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID]);
        assert!(manager.target().unwrap().is_root);

        let layer = read_root(&root).unwrap();
        assert_eq!(layer.up_axis(), Some("Z"));
        assert_eq!(
            layer
                .custom_layer_data("lightspeed_layer_type")
                .and_then(Value::as_str),
            Some("replacement")
        );

        let mut again = LayerManager::new();
        assert!(matches!(
            again.create_project(&root, None),
            Err(ProjectError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_state_machine() {
        let (_dir, _root, mut manager) = project();
        let r0 = manager.revision();

        manager.create_sublayer("lights", None).unwrap();
        assert_eq!(manager.state(), ProjectState::Dirty);
        assert!(manager.revision() > r0);
        assert!(matches!(manager.reload(), Err(ProjectError::ReloadWhileDirty)));
        assert!(matches!(manager.close(), Err(ProjectError::CloseWhileDirty)));

        manager.flush().unwrap();
        assert_eq!(manager.state(), ProjectState::Saved);
        manager.reload().unwrap();
        assert_eq!(manager.state(), ProjectState::Loaded);
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID, "subUSDAs/lights.usda"]);

        manager.close().unwrap();
        assert_eq!(manager.state(), ProjectState::Unloaded);
        assert!(matches!(manager.flush(), Err(ProjectError::NotLoaded)));
    }

    #[test]
    fn test_load_rejected_while_loaded() {
        let (dir, root, mut manager) = project();
        assert!(matches!(manager.load(&root), Err(ProjectError::AlreadyLoaded)));

        manager.create_sublayer("a", None).unwrap();
        assert!(matches!(manager.load(&root), Err(ProjectError::AlreadyLoaded)));
        manager.flush().unwrap();
        assert_eq!(manager.state(), ProjectState::Saved);
        assert!(matches!(manager.load(&root), Err(ProjectError::AlreadyLoaded)));

        let other = dir.path().join("other.usda");
        assert!(matches!(
            manager.create_project(&other, None),
            Err(ProjectError::AlreadyLoaded)
        ));

        manager.close().unwrap();
        manager.load(&root).unwrap();
        assert_eq!(manager.state(), ProjectState::Loaded);
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID, "subUSDAs/a.usda"]);
    }

    #[test]
    fn test_flush_without_changes_is_noop() {
        let (_dir, root, mut manager) = project();
        let before = std::fs::read_to_string(&root).unwrap();
        std::fs::write(&root, format!("{}\n", before)).unwrap();

        manager.flush().unwrap();
        assert_eq!(manager.state(), ProjectState::Loaded);
        assert_eq!(std::fs::read_to_string(&root).unwrap(), format!("{}\n", before));

        manager.create_sublayer("a", None).unwrap();
        manager.flush().unwrap();
        manager.flush().unwrap();
        assert_eq!(manager.state(), ProjectState::Saved);
    }

    #[test]
    fn test_discard_restores_disk_state() {
        let (_dir, _root, mut manager) = project();
        manager.create_sublayer("a", None).unwrap();
        manager.flush().unwrap();
        manager.create_sublayer("b", Some(0)).unwrap();
        assert_eq!(manager.layers().len(), 3);

        manager.discard().unwrap();
        assert_eq!(manager.state(), ProjectState::Loaded);
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID, "subUSDAs/a.usda"]);
    }

    #[test]
    fn test_order_and_target() {
        let (dir, root, mut manager) = project();
        let a = manager.create_sublayer("a", None).unwrap();
        let b = manager.create_sublayer("b", None).unwrap();
        let c = manager.create_sublayer("c", Some(0)).unwrap();
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID, c.as_str(), a.as_str(), b.as_str()]);

        manager.move_sublayer(&c, 5).unwrap();
        assert_eq!(ids(&manager), vec![ROOT_LAYER_ID, a.as_str(), b.as_str(), c.as_str()]);
        assert_eq!(manager.layer(&c).unwrap().order, 3);
        assert!(matches!(
            manager.move_sublayer(ROOT_LAYER_ID, 0),
            Err(ProjectError::RootImmutable)
        ));

        manager.set_target_layer(&b).unwrap();
        assert_eq!(manager.target().unwrap().id, b);
        let removed = manager.remove_sublayer(&b).unwrap();
        assert!(removed.is_target);
        assert!(manager.target().unwrap().is_root);
        assert!(dir.path().join(&b).is_file());

        let outside = manager
            .add_sublayer(&dir.path().join("../shared/common.usda"), None)
            .unwrap();
        assert_eq!(outside, "../shared/common.usda");
        assert!(manager.layer(&outside).unwrap().missing);
        manager.remove_sublayer(&outside).unwrap();

        assert!(matches!(
            manager.add_sublayer(&dir.path().join("subUSDAs/a.usda"), None),
            Err(ProjectError::DuplicateLayer(_))
        ));
        assert!(matches!(
            manager.set_target_layer("nope.usda"),
            Err(ProjectError::UnknownLayer(_))
        ));

        manager.flush().unwrap();
        let written = read_root(&root).unwrap();
        assert_eq!(
            written.sublayers(),
            vec!["subUSDAs/a.usda".to_string(), "subUSDAs/c.usda".to_string()]
        );
    }

    #[test]
    fn test_flush_preserves_root_content() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mod.usda");
        std::fs::write(
            &root,
            r#"#usda 1.0
(
    upAxis = "Z"
    subLayers = [
        @./captures/capture.usda@
    ]
)

over "RootNode"
{
    over "meshes"
    {
    }
}
"#,
        )
        .unwrap();
        let mut manager = LayerManager::new();
        manager.load(&root).unwrap();
        assert_eq!(manager.layers()[1].id, "captures/capture.usda");
        assert!(manager.layers()[1].missing);

        manager.create_sublayer("extra", Some(0)).unwrap();
        manager.flush().unwrap();

        let written = read_root(&root).unwrap();
        assert_eq!(
            written.sublayers(),
            vec![
                "subUSDAs/extra.usda".to_string(),
                "./captures/capture.usda".to_string()
            ]
        );
        assert!(written.prim("/RootNode/meshes").is_some());
        assert_eq!(written.up_axis(), Some("Z"));
    }

    #[test]
    fn test_create_sublayer_rejects_bad_names() {
        let (_dir, _root, mut manager) = project();
        assert!(matches!(
            manager.create_sublayer("  ", None),
            Err(ProjectError::InvalidName(_))
        ));
        manager.create_sublayer("my layer", None).unwrap();
        assert!(manager.layer("subUSDAs/my_layer.usda").is_some());
        assert!(matches!(
            manager.create_sublayer("my layer", None),
            Err(ProjectError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_missing_root() {
        let mut manager = LayerManager::new();
        let err = manager.load(Path::new("/nonexistent/mod.usda")).unwrap_err();
        assert!(matches!(err, ProjectError::MissingRoot(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Project);
        assert_eq!(manager.state(), ProjectState::Unloaded);
    }
}
