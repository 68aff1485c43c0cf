//! Texture pipeline.
//!
//! Remix ships textures as block-compressed DDS files; editing happens on PNG
//! rasters. Conversion in both directions goes through an external
//! texconv-compatible tool, with results cached by content hash.
//!
//! ## Roles
//!
//! | Role | Runtime format | Suffix |
//! |------|----------------|--------|
//! | Albedo | `BC7_UNORM_SRGB` | `.a.rtex` |
//! | Normal | `BC5_UNORM` | `.n.rtex` |
//! | Roughness | `BC4_UNORM` | `.r.rtex` |
//! | Metallic | `BC4_UNORM` | `.m.rtex` |
//! | Emissive | `BC7_UNORM_SRGB` | `.e.rtex` |
//! | Opacity | `BC4_UNORM` | `.o.rtex` |
//! | Height | `BC4_UNORM` | `.h.rtex` |
//! | Transmittance | `BC7_UNORM_SRGB` | none |

mod cache;
mod converter;
pub(crate) mod dds;

pub use cache::{CacheEntry, ConversionCache};
pub use converter::{
    ConversionJob, ConversionTarget, ConversionTool, RepairOutcome, TexconvTool, TextureConverter,
};
pub use dds::{inspect_dds, DdsError, DdsFormat, DdsInfo};
pub(crate) use converter::place_file;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::error::ErrorKind;
use crate::tool::ToolError;

/// Errors that can occur in the texture pipeline.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid DDS data in {path}: {reason}")]
    InvalidData { path: PathBuf, reason: DdsError },

    #[error("Conversion tool failed on {path}: {source}")]
    Tool {
        path: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("Conversion of {input} produced no output at {expected}")]
    MissingOutput { input: PathBuf, expected: PathBuf },

    #[error("Converted output {path} is unusable: {message}")]
    BadOutput { path: PathBuf, message: String },

    #[error("Image decoding error in {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Texture not found: {0}")]
    NotFound(PathBuf),

    #[error("Conversion cache error: {0}")]
    Cache(String),
}

impl TextureError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TextureError::InvalidData { .. } => ErrorKind::InvalidTextureData,
            TextureError::Tool { .. }
            | TextureError::MissingOutput { .. }
            | TextureError::BadOutput { .. }
            | TextureError::Decode { .. } => ErrorKind::ConversionFailure,
            TextureError::NotFound(_) => ErrorKind::BrokenReference,
            TextureError::Io(_) | TextureError::Cache(_) => ErrorKind::Io,
        }
    }
}

pub type TextureResult<T> = Result<T, TextureError>;

/// What a texture is used for in a material.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureRole {
    Albedo,
    Normal,
    Roughness,
    Metallic,
    Emissive,
    Opacity,
    Height,
    Transmittance,
    #[default]
    Other,
}

impl TextureRole {
    pub const ALL: [TextureRole; 9] = [
        TextureRole::Albedo,
        TextureRole::Normal,
        TextureRole::Roughness,
        TextureRole::Metallic,
        TextureRole::Emissive,
        TextureRole::Opacity,
        TextureRole::Height,
        TextureRole::Transmittance,
        TextureRole::Other,
    ];

    /// DXGI format Remix expects for this role.
    pub fn runtime_format(&self) -> &'static str {
        match self {
            TextureRole::Normal => "BC5_UNORM",
            TextureRole::Roughness
            | TextureRole::Metallic
            | TextureRole::Opacity
            | TextureRole::Height => "BC4_UNORM",
            TextureRole::Albedo
            | TextureRole::Emissive
            | TextureRole::Transmittance
            | TextureRole::Other => "BC7_UNORM_SRGB",
        }
    }

    /// Remix file name suffix placed before `.dds`.
    pub fn suffix(&self) -> &'static str {
        match self {
            TextureRole::Albedo => ".a.rtex",
            TextureRole::Normal => ".n.rtex",
            TextureRole::Roughness => ".r.rtex",
            TextureRole::Metallic => ".m.rtex",
            TextureRole::Emissive => ".e.rtex",
            TextureRole::Opacity => ".o.rtex",
            TextureRole::Height => ".h.rtex",
            TextureRole::Transmittance | TextureRole::Other => "",
        }
    }

    /// Role of an Aperture shader texture input.
    pub fn from_input_name(input: &str) -> Self {
        match input.trim_start_matches("inputs:") {
            "diffuse_texture" => TextureRole::Albedo,
            "normalmap_texture" => TextureRole::Normal,
            "reflectionroughness_texture" => TextureRole::Roughness,
            "metallic_texture" => TextureRole::Metallic,
            "emissive_mask_texture" => TextureRole::Emissive,
            "opacity_texture" => TextureRole::Opacity,
            "height_texture" => TextureRole::Height,
            "transmittance_texture" => TextureRole::Transmittance,
            _ => TextureRole::Other,
        }
    }

    /// Guess a role from a file name, by Remix suffix first and then by
    /// common name fragments.
    pub fn infer(file_name: &str) -> Self {
        let lower = file_name.to_ascii_lowercase();
        if let Some(role) = Self::ALL
            .iter()
            .find(|r| !r.suffix().is_empty() && lower.contains(r.suffix()))
        {
            return *role;
        }
        const FRAGMENTS: &[(&str, TextureRole)] = &[
            ("_basecolor", TextureRole::Albedo),
            ("_albedo", TextureRole::Albedo),
            ("_diffuse", TextureRole::Albedo),
            ("_normal", TextureRole::Normal),
            ("_nrm", TextureRole::Normal),
            ("_roughness", TextureRole::Roughness),
            ("_rough", TextureRole::Roughness),
            ("_metallic", TextureRole::Metallic),
            ("_metal", TextureRole::Metallic),
            ("_emissive", TextureRole::Emissive),
            ("_emission", TextureRole::Emissive),
            ("_opacity", TextureRole::Opacity),
            ("_alpha", TextureRole::Opacity),
            ("_height", TextureRole::Height),
            ("_displacement", TextureRole::Height),
            ("_transmittance", TextureRole::Transmittance),
        ];
        FRAGMENTS
            .iter()
            .find(|(fragment, _)| lower.contains(fragment))
            .map(|(_, role)| *role)
            .unwrap_or_default()
    }

    pub fn name(&self) -> &'static str {
        match self {
            TextureRole::Albedo => "albedo",
            TextureRole::Normal => "normal",
            TextureRole::Roughness => "roughness",
            TextureRole::Metallic => "metallic",
            TextureRole::Emissive => "emissive",
            TextureRole::Opacity => "opacity",
            TextureRole::Height => "height",
            TextureRole::Transmittance => "transmittance",
            TextureRole::Other => "other",
        }
    }
}

/// Encoding of a payload file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadFormat {
    /// Block-compressed runtime texture
    Dds,
    /// Editable raster (PNG, or another image the tool reads)
    Raster,
}

impl PayloadFormat {
    /// Sniff the format from file contents, falling back to the extension.
    pub fn detect(path: &Path, bytes: &[u8]) -> Self {
        if bytes.starts_with(b"DDS ") {
            return PayloadFormat::Dds;
        }
        if bytes.starts_with(b"\x89PNG") {
            return PayloadFormat::Raster;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("dds") => PayloadFormat::Dds,
            _ => PayloadFormat::Raster,
        }
    }
}

/// A payload file on disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub format: PayloadFormat,
    pub path: PathBuf,
}

/// A texture identified by content hash and role.
///
/// `canonical` is authoritative; `derived` is a conversion cached alongside
/// it and is never read back as a source of truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextureAsset {
    /// SHA-256 of the canonical payload, lowercase hex
    pub hash: String,
    pub role: TextureRole,
    /// File stem used when naming outputs
    pub name: String,
    pub canonical: Payload,
    pub derived: Option<Payload>,
}

impl TextureAsset {
    /// Load a texture file as the canonical payload. The role is inferred
    /// from the file name when not given.
    pub fn from_file(path: &Path, role: Option<TextureRole>) -> TextureResult<Self> {
        if !path.is_file() {
            return Err(TextureError::NotFound(path.to_path_buf()));
        }
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        Ok(Self {
            hash: content_hash(&bytes),
            role: role.unwrap_or_else(|| TextureRole::infer(file_name)),
            name: texture_stem(path),
            canonical: Payload {
                format: PayloadFormat::detect(path, &bytes),
                path: path.to_path_buf(),
            },
            derived: None,
        })
    }

    pub fn is_compressed(&self) -> bool {
        self.canonical.format == PayloadFormat::Dds
    }
}

/// A PNG ready for editing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EditableTexture {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Any pixel has alpha below 255
    pub has_alpha: bool,
    /// Hash of the texture this was converted from
    pub source_hash: String,
}

/// SHA-256 of `bytes` as lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}

/// File stem without the extension or a Remix role suffix
/// (`rock.a.rtex.dds` -> `rock`).
pub fn texture_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("texture");
    TextureRole::ALL
        .iter()
        .filter(|r| !r.suffix().is_empty())
        .find_map(|r| stem.strip_suffix(r.suffix()))
        .unwrap_or(stem)
        .to_string()
}
