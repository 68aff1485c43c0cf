//! Remix projects: a root `mod.usda` with an ordered list of sublayers, one
//! of which receives exported edits.
//!
//! [`LayerManager`] owns the layer list and its state machine;
//! [`ProjectSession`] wraps it for concurrent use together with the texture
//! pipeline and long-running tasks.

mod layers;
mod session;

pub use layers::{replacement_layer, LayerManager, ROOT_LAYER_ID, SUBLAYER_DIR};
pub use session::ProjectSession;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::usd::{ParseError, StageError};

/// Errors from project and layer management.
#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("No project is loaded")]
    NotLoaded,

    #[error("A project is already loaded; close it first")]
    AlreadyLoaded,

    #[error("Root layer {0} does not exist")]
    MissingRoot(PathBuf),

    #[error("{0} already exists")]
    AlreadyExists(PathBuf),

    #[error("Unknown layer {0}")]
    UnknownLayer(String),

    #[error("Layer {0} is already part of the project")]
    DuplicateLayer(String),

    #[error("The root layer cannot be removed or moved")]
    RootImmutable,

    #[error("Invalid layer name {0:?}")]
    InvalidName(String),

    #[error("Project has unsaved layer changes; flush or discard them before reloading")]
    ReloadWhileDirty,

    #[error("Project has unsaved layer changes; flush or discard them before closing")]
    CloseWhileDirty,

    #[error("Another task is already running: {0}")]
    TaskInFlight(String),

    #[error("Project changed during {0}")]
    Conflict(String),

    #[error("No texture converter is configured")]
    NoConverter,

    #[error("Malformed layer {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProjectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectError::TaskInFlight(_) | ProjectError::Conflict(_) => {
                ErrorKind::ConcurrentMutationConflict
            }
            ProjectError::Parse { .. } => ErrorKind::MalformedDocument,
            ProjectError::Stage(e) => e.kind(),
            ProjectError::Io { .. } => ErrorKind::Io,
            _ => ErrorKind::Project,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProjectError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type ProjectResult<T> = Result<T, ProjectError>;

/// Lifecycle of a loaded project.
///
/// `Unloaded -> Loaded -> Dirty -> Saved -> Loaded`. Mutations move
/// `Loaded` or `Saved` to `Dirty`; a flush moves `Dirty` to `Saved`.
/// Leaving `Dirty` any other way requires [`LayerManager::discard`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProjectState {
    #[default]
    Unloaded,
    Loaded,
    Dirty,
    Saved,
}

impl fmt::Display for ProjectState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProjectState::Unloaded => "unloaded",
            ProjectState::Loaded => "loaded",
            ProjectState::Dirty => "dirty",
            ProjectState::Saved => "saved",
        };
        f.write_str(name)
    }
}

/// One layer file of a project.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLayer {
    /// Stable identifier: [`ROOT_LAYER_ID`] or the authored sublayer path
    pub id: String,
    pub path: PathBuf,
    /// Path as written in the root layer's `subLayers`
    pub authored_path: String,
    /// Composition strength, 0 = root (strongest)
    pub order: usize,
    pub is_root: bool,
    pub is_target: bool,
    pub missing: bool,
}
