//! Remix Core - RTX Remix USD capture and mod bridge.
//!
//! This crate provides:
//!
//! - **USD layers**: USDA parsing/writing and layer stack composition
//! - **Scene model**: a neutral `SceneModel` read from capture and mod layers
//! - **Materials**: Aperture Opaque/Translucent <-> neutral PBR translation
//! - **Lights and cameras**: UsdLux light and UsdGeom camera parameters
//! - **Textures**: DDS <-> PNG conversion through texconv, with a content cache
//! - **Projects**: sublayer management, target layer export, per-project sessions
//!
//! # Example
//!
//! ```ignore
//! use remix_core::reader::{read_scene, ReadOptions};
//!
//! let report = read_scene("capture.usda".as_ref(), &ReadOptions::default())?;
//! println!("{} root prims, {} warnings",
//!     report.scene.roots.len(),
//!     report.diagnostics.len());
//! ```

pub mod adapter;
pub mod batch;
pub mod camera;
pub mod config;
pub mod error;
pub mod export;
pub mod light;
pub mod material;
pub mod mesh;
pub mod project;
pub mod reader;
pub mod scene;
pub mod texture;
pub mod tool;
pub mod usd;

// Re-export commonly used types
pub use adapter::{HostAdapter, JsonAdapter};
pub use batch::{BatchOutcome, CancellationToken, OperationStatus, Progress};
pub use camera::CameraData;
pub use config::SessionConfig;
pub use error::{Diagnostic, ErrorKind, RemixError, RemixResult, Severity};
pub use export::{export_scene, ExportReport};
pub use light::{LightData, LightShape};
pub use material::{MaterialNode, RemixMaterial, ShaderKind};
pub use mesh::MeshData;
pub use project::{LayerManager, ProjectLayer, ProjectSession, ProjectState};
pub use reader::{import_batch, read_scene, ImportReport, ReadOptions};
pub use scene::{MaterialBinding, PrimKind, PrimNode, SceneModel};
pub use texture::{TextureAsset, TextureConverter, TextureRole};
