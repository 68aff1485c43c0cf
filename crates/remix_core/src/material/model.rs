//! Neutral PBR material description.

use std::path::PathBuf;

use indexmap::IndexMap;
use remix_math::Vec3;
use serde::{Deserialize, Serialize};

use super::{ShaderGraph, ShaderKind};
use crate::texture::TextureRole;
use crate::usd::Attribute;

/// Which part of a texture feeds a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TextureChannel {
    #[default]
    Color,
    Alpha,
}

/// A texture used by a material channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TextureRef {
    /// Asset path as authored
    pub asset: String,
    pub role: TextureRole,
    pub channel: TextureChannel,
    /// File found on disk for `asset`
    pub resolved: Option<PathBuf>,
    /// Editable raster extracted from `resolved`
    pub editable: Option<PathBuf>,
    /// Raster has non-opaque pixels; unknown until extracted
    pub has_alpha: Option<bool>,
}

impl TextureRef {
    pub fn new(asset: impl Into<String>, role: TextureRole) -> Self {
        Self {
            asset: asset.into(),
            role,
            channel: TextureChannel::Color,
            resolved: None,
            editable: None,
            has_alpha: None,
        }
    }

    fn alpha_of(&self) -> Self {
        Self {
            role: TextureRole::Opacity,
            channel: TextureChannel::Alpha,
            ..self.clone()
        }
    }
}

/// A constant with an optional texture overriding it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Channel<T> {
    pub value: T,
    pub texture: Option<TextureRef>,
}

impl<T> Channel<T> {
    pub fn constant(value: T) -> Self {
        Self {
            value,
            texture: None,
        }
    }
}

/// Aperture alpha test comparison, in shader enum order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaTest {
    #[default]
    Always,
    Never,
    Less,
    Equal,
    LessOrEqual,
    Greater,
    NotEqual,
    GreaterOrEqual,
}

impl AlphaTest {
    const ORDER: [AlphaTest; 8] = [
        AlphaTest::Always,
        AlphaTest::Never,
        AlphaTest::Less,
        AlphaTest::Equal,
        AlphaTest::LessOrEqual,
        AlphaTest::Greater,
        AlphaTest::NotEqual,
        AlphaTest::GreaterOrEqual,
    ];

    pub fn from_i64(value: i64) -> Option<Self> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::ORDER.get(i).copied())
    }

    pub fn as_i64(&self) -> i64 {
        Self::ORDER.iter().position(|t| t == self).unwrap_or(0) as i64
    }
}

/// How opacity is applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpacityMode {
    Opaque,
    Blend,
    Mask,
}

/// What was done with albedo alpha.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaHandling {
    /// No albedo texture, or its alpha is fully opaque
    #[default]
    NotApplicable,
    /// Albedo alpha feeds the opacity channel
    SplitToOpacity,
    /// Albedo alpha may or may not carry opacity
    Uncertain,
}

/// Aperture Translucent parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranslucentParams {
    pub transmittance: Channel<Vec3>,
    pub ior: f32,
    pub thin_walled: bool,
    pub thin_wall_thickness: f32,
    pub use_diffuse_layer: bool,
    pub measurement_distance: f32,
}

impl Default for TranslucentParams {
    fn default() -> Self {
        Self {
            transmittance: Channel::constant(Vec3::splat(0.97)),
            ior: 1.3,
            thin_walled: false,
            thin_wall_thickness: 0.001,
            use_diffuse_layer: false,
            measurement_distance: 1.0,
        }
    }
}

/// Remix features that are carried but not translated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capability {
    SpriteSheetAnimation,
    ThinFilm,
    FlagBits,
    /// Side-channel inputs not restored because the target shader differs
    DroppedForTarget,
    /// Opacity texture separate from albedo alpha
    SeparateOpacityTexture,
    UnrecognizedShader,
}

impl Capability {
    /// Capability an untranslated Aperture input belongs to.
    pub fn of_input(input: &str) -> Option<Self> {
        if input.starts_with("sprite_sheet_") {
            Some(Capability::SpriteSheetAnimation)
        } else if input == "enable_thin_film" || input.starts_with("thin_film_thickness") {
            Some(Capability::ThinFilm)
        } else if matches!(input, "preload_textures" | "ignore_material") {
            Some(Capability::FlagBits)
        } else {
            None
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Capability::SpriteSheetAnimation => "sprite sheet animation is not supported",
            Capability::ThinFilm => "thin film iridescence is not supported",
            Capability::FlagBits => "material flag bits are not supported",
            Capability::DroppedForTarget => "inputs dropped for a different target shader",
            Capability::SeparateOpacityTexture => "separate opacity texture; alpha handling uncertain",
            Capability::UnrecognizedShader => "unrecognized shader graph kept verbatim",
        }
    }
}

/// A capability finding with the inputs it concerns.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CapabilityNote {
    pub feature: Capability,
    pub inputs: Vec<String>,
}

impl CapabilityNote {
    pub fn new(feature: Capability) -> Self {
        Self {
            feature,
            inputs: Vec::new(),
        }
    }
}

/// The Remix graph a neutral material was read from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundTripSource {
    pub kind: ShaderKind,
    pub shader_name: String,
    /// Shader inputs as authored, keyed without `inputs:`
    pub inputs: IndexMap<String, Attribute>,
}

/// Editor-neutral material.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialNode {
    pub name: String,
    pub albedo: Channel<Vec3>,
    pub opacity: Channel<f32>,
    pub roughness: Channel<f32>,
    pub metallic: Channel<f32>,
    pub normal: Option<TextureRef>,
    /// 0 octahedral, 1 tangent space OpenGL, 2 tangent space DirectX
    pub normal_encoding: i64,
    pub height: Option<TextureRef>,
    pub displace_in: f32,
    pub emissive: Channel<Vec3>,
    pub emissive_intensity: f32,
    pub emission_enabled: bool,
    pub blend_enabled: bool,
    pub alpha_test: AlphaTest,
    pub alpha_cutoff: f32,
    pub translucent: Option<TranslucentParams>,
    /// Remix inputs preserved verbatim, keyed by input name
    pub unmapped: IndexMap<String, Attribute>,
    /// Shader graph did not match a known topology
    pub unrecognized: bool,
    pub raw_graph: Option<ShaderGraph>,
    pub capabilities: Vec<CapabilityNote>,
    pub alpha_handling: AlphaHandling,
    pub round_trip: Option<RoundTripSource>,
}

impl MaterialNode {
    /// A material with Aperture Opaque defaults.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            albedo: Channel::constant(Vec3::splat(0.2)),
            opacity: Channel::constant(1.0),
            roughness: Channel::constant(0.5),
            metallic: Channel::constant(0.0),
            normal: None,
            normal_encoding: 2,
            height: None,
            displace_in: 0.05,
            emissive: Channel::constant(Vec3::new(1.0, 0.1, 0.1)),
            emissive_intensity: 40.0,
            emission_enabled: false,
            blend_enabled: false,
            alpha_test: AlphaTest::Always,
            alpha_cutoff: 0.0,
            translucent: None,
            unmapped: IndexMap::new(),
            unrecognized: false,
            raw_graph: None,
            capabilities: Vec::new(),
            alpha_handling: AlphaHandling::NotApplicable,
            round_trip: None,
        }
    }

    pub fn opacity_mode(&self) -> OpacityMode {
        if self.blend_enabled {
            OpacityMode::Blend
        } else if self.alpha_test != AlphaTest::Always {
            OpacityMode::Mask
        } else {
            OpacityMode::Opaque
        }
    }

    pub fn set_opacity_mode(&mut self, mode: OpacityMode) {
        match mode {
            OpacityMode::Opaque => {
                self.blend_enabled = false;
                self.alpha_test = AlphaTest::Always;
            }
            OpacityMode::Blend => {
                self.blend_enabled = true;
                self.alpha_test = AlphaTest::Always;
            }
            OpacityMode::Mask => {
                self.blend_enabled = false;
                if self.alpha_test == AlphaTest::Always {
                    self.alpha_test = AlphaTest::GreaterOrEqual;
                }
                if self.alpha_cutoff <= 0.0 {
                    self.alpha_cutoff = 0.5;
                }
            }
        }
        self.decide_alpha();
    }

    /// Opacity comes from the albedo texture's alpha.
    pub fn opacity_from_albedo_alpha(&self) -> bool {
        match (&self.opacity.texture, &self.albedo.texture) {
            (Some(opacity), Some(albedo)) => {
                opacity.channel == TextureChannel::Alpha && opacity.asset == albedo.asset
            }
            _ => false,
        }
    }

    /// An opacity texture other than albedo alpha.
    pub fn has_separate_opacity_texture(&self) -> bool {
        self.opacity.texture.is_some() && !self.opacity_from_albedo_alpha()
    }

    /// Split albedo alpha into opacity when the material blends or alpha
    /// tests, otherwise mark the albedo alpha as uncertain.
    pub(crate) fn decide_alpha(&mut self) {
        let Some(albedo) = &self.albedo.texture else {
            self.alpha_handling = AlphaHandling::NotApplicable;
            return;
        };
        if self.has_separate_opacity_texture() {
            self.alpha_handling = AlphaHandling::Uncertain;
            return;
        }
        if self.opacity_mode() != OpacityMode::Opaque {
            self.opacity.texture = Some(albedo.alpha_of());
            self.alpha_handling = AlphaHandling::SplitToOpacity;
        } else if albedo.has_alpha == Some(false) {
            self.opacity.texture = None;
            self.alpha_handling = AlphaHandling::NotApplicable;
        } else {
            self.opacity.texture = None;
            self.alpha_handling = AlphaHandling::Uncertain;
        }
    }

    /// Settle alpha handling once the albedo raster has been inspected.
    pub fn resolve_alpha(&mut self, has_alpha: bool) {
        if let Some(albedo) = &mut self.albedo.texture {
            albedo.has_alpha = Some(has_alpha);
        }
        if let Some(opacity) = &mut self.opacity.texture {
            if opacity.channel == TextureChannel::Alpha {
                opacity.has_alpha = Some(has_alpha);
            }
        }
        self.decide_alpha();
    }

    /// Every texture the material references, opacity alpha aliases excluded.
    pub fn textures(&self) -> Vec<&TextureRef> {
        let alias = self.opacity_from_albedo_alpha();
        let mut out: Vec<&TextureRef> = Vec::new();
        out.extend(self.albedo.texture.as_ref());
        if !alias {
            out.extend(self.opacity.texture.as_ref());
        }
        out.extend(self.roughness.texture.as_ref());
        out.extend(self.metallic.texture.as_ref());
        out.extend(self.normal.as_ref());
        out.extend(self.height.as_ref());
        out.extend(self.emissive.texture.as_ref());
        if let Some(t) = &self.translucent {
            out.extend(t.transmittance.texture.as_ref());
        }
        out
    }

    /// Mutable access to every texture reference, aliases included.
    pub fn textures_mut(&mut self) -> Vec<&mut TextureRef> {
        let mut out: Vec<&mut TextureRef> = Vec::new();
        out.extend(self.albedo.texture.as_mut());
        out.extend(self.opacity.texture.as_mut());
        out.extend(self.roughness.texture.as_mut());
        out.extend(self.metallic.texture.as_mut());
        out.extend(self.normal.as_mut());
        out.extend(self.height.as_mut());
        out.extend(self.emissive.texture.as_mut());
        if let Some(t) = &mut self.translucent {
            out.extend(t.transmittance.texture.as_mut());
        }
        out
    }

    /// Attach `note`, merging with an existing note for the same feature.
    pub fn note(&mut self, feature: Capability, input: Option<&str>) {
        let index = match self.capabilities.iter().position(|n| n.feature == feature) {
            Some(i) => i,
            None => {
                self.capabilities.push(CapabilityNote::new(feature));
                self.capabilities.len() - 1
            }
        };
        if let Some(input) = input {
            let inputs = &mut self.capabilities[index].inputs;
            if !inputs.iter().any(|i| i == input) {
                inputs.push(input.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn textured() -> MaterialNode {
        let mut node = MaterialNode::new("mat");
        node.albedo.texture = Some(TextureRef::new("./textures/wall.a.rtex.dds", TextureRole::Albedo));
        node
    }

    #[test]
    fn test_alpha_test_order() {
        assert_eq!(AlphaTest::from_i64(0), Some(AlphaTest::Always));
        assert_eq!(AlphaTest::from_i64(7), Some(AlphaTest::GreaterOrEqual));
        assert_eq!(AlphaTest::from_i64(8), None);
        assert_eq!(AlphaTest::from_i64(-1), None);
        assert_eq!(AlphaTest::Greater.as_i64(), 5);
    }

    #[test]
    fn test_blend_splits_alpha() {
        let mut node = textured();
        node.set_opacity_mode(OpacityMode::Blend);
        assert_eq!(node.alpha_handling, AlphaHandling::SplitToOpacity);
        assert!(node.opacity_from_albedo_alpha());
        assert_eq!(node.textures().len(), 1);

        node.set_opacity_mode(OpacityMode::Opaque);
        assert_eq!(node.alpha_handling, AlphaHandling::Uncertain);
        assert!(node.opacity.texture.is_none());
    }

    #[test]
    fn test_mask_sets_cutoff() {
        let mut node = textured();
        node.set_opacity_mode(OpacityMode::Mask);
        assert_eq!(node.opacity_mode(), OpacityMode::Mask);
        assert_eq!(node.alpha_cutoff, 0.5);
        assert_eq!(node.alpha_handling, AlphaHandling::SplitToOpacity);
    }

    #[test]
    fn test_resolve_alpha() {
        let mut node = textured();
        node.decide_alpha();
        assert_eq!(node.alpha_handling, AlphaHandling::Uncertain);

        node.resolve_alpha(false);
        assert_eq!(node.alpha_handling, AlphaHandling::NotApplicable);
        node.resolve_alpha(true);
        assert_eq!(node.alpha_handling, AlphaHandling::Uncertain);

        // No albedo texture, nothing to decide
        let mut plain = MaterialNode::new("plain");
        plain.resolve_alpha(true);
        assert_eq!(plain.alpha_handling, AlphaHandling::NotApplicable);
    }

    #[test]
    fn test_separate_opacity_is_uncertain() {
        let mut node = textured();
        node.opacity.texture = Some(TextureRef::new("mask.png", TextureRole::Opacity));
        node.set_opacity_mode(OpacityMode::Blend);
        assert!(node.has_separate_opacity_texture());
        assert_eq!(node.alpha_handling, AlphaHandling::Uncertain);
        assert_eq!(node.textures().len(), 2);
    }

    #[test]
    fn test_capability_classification() {
        assert_eq!(
            Capability::of_input("sprite_sheet_fps"),
            Some(Capability::SpriteSheetAnimation)
        );
        assert_eq!(
            Capability::of_input("thin_film_thickness_constant"),
            Some(Capability::ThinFilm)
        );
        assert_eq!(Capability::of_input("ignore_material"), Some(Capability::FlagBits));
        assert_eq!(Capability::of_input("filter_mode"), None);

        let mut node = MaterialNode::new("m");
        node.note(Capability::ThinFilm, Some("enable_thin_film"));
        node.note(Capability::ThinFilm, Some("enable_thin_film"));
        node.note(Capability::ThinFilm, Some("thin_film_thickness_constant"));
        assert_eq!(node.capabilities.len(), 1);
        assert_eq!(node.capabilities[0].inputs.len(), 2);
    }
}
