//! Boundary to the host editor.
//!
//! The core never holds host objects. A host implements [`HostAdapter`] to
//! build its own scene from a [`SceneModel`] and to hand the edited model
//! back for export.

use std::path::{Path, PathBuf};

use crate::error::{RemixError, RemixResult};
use crate::scene::SceneModel;

pub trait HostAdapter {
    /// Build host objects from `scene`.
    fn apply_scene(&mut self, scene: &SceneModel) -> RemixResult<()>;

    /// Return the host's current state as a neutral scene.
    fn collect_edits(&mut self) -> RemixResult<SceneModel>;
}

/// Adapter that exchanges scenes as JSON files, for command line use and
/// for hosts that live in another process.
#[derive(Clone, Debug)]
pub struct JsonAdapter {
    path: PathBuf,
}

impl JsonAdapter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HostAdapter for JsonAdapter {
    fn apply_scene(&mut self, scene: &SceneModel) -> RemixResult<()> {
        let json = serde_json::to_string_pretty(scene).map_err(|e| self.malformed(e))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        log::debug!("Wrote scene {} to {}", scene.name, self.path.display());
        Ok(())
    }

    fn collect_edits(&mut self) -> RemixResult<SceneModel> {
        let text = std::fs::read_to_string(&self.path)?;
        serde_json::from_str(&text).map_err(|e| self.malformed(e))
    }
}

impl JsonAdapter {
    fn malformed(&self, err: serde_json::Error) -> RemixError {
        RemixError::MalformedDocument {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::scene::{MaterialBinding, PrimKind, PrimNode};
    use remix_math::{Mat4, Vec3};

    #[test]
    fn test_host_edits_come_back() {
        let dir = tempfile::tempdir().unwrap();
        let mut adapter = JsonAdapter::new(dir.path().join("scene.json"));

        let mut node = PrimNode::new("/RootNode/rock", PrimKind::Transform);
        node.material_binding = Some(MaterialBinding::new("/RootNode/Looks/mat"));
        let mut scene = SceneModel::new("capture");
        scene.roots.push(node);
        adapter.apply_scene(&scene).unwrap();

        // The host moves the prim
        let mut edited = adapter.collect_edits().unwrap();
        assert!(edited.structurally_eq(&scene));
        edited.roots[0].transform = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
        adapter.apply_scene(&edited).unwrap();

        let collected = adapter.collect_edits().unwrap();
        assert!(!collected.structurally_eq(&scene));
        assert_eq!(collected.roots[0].transform, edited.roots[0].transform);
    }

    #[test]
    fn test_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        std::fs::write(&path, "{\"name\": 3").unwrap();
        let err = JsonAdapter::new(&path).collect_edits().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedDocument);
    }
}
