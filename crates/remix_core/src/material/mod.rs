//! Remix materials.
//!
//! Remix authors materials as a `Material` prim whose surface output
//! connects to a single MDL `Shader` child using one of the Aperture PBR
//! modules. Graphs are matched structurally into [`RemixMaterial`]; anything
//! that does not match exactly is kept verbatim as
//! [`RemixMaterial::Unrecognized`] rather than guessed at.
//!
//! [`translator`] converts between these graphs and the editor-neutral
//! [`MaterialNode`].

mod model;
pub mod translator;

pub use model::{
    AlphaHandling, AlphaTest, Capability, CapabilityNote, Channel, MaterialNode, OpacityMode,
    RoundTripSource, TextureChannel, TextureRef, TranslucentParams,
};
pub use translator::{capability_notes, to_neutral, to_remix};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::usd::{
    join_path, prim_of_property_path, remap_path, split_parent, Attribute, ComposedPrim,
    PrimSpec, Property, Specifier, Value,
};

/// Aperture PBR shader modules.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderKind {
    ApertureOpaque,
    ApertureTranslucent,
}

impl ShaderKind {
    pub fn source_asset(&self) -> &'static str {
        match self {
            ShaderKind::ApertureOpaque => "AperturePBR_Opacity.mdl",
            ShaderKind::ApertureTranslucent => "AperturePBR_Translucent.mdl",
        }
    }

    pub fn sub_identifier(&self) -> &'static str {
        match self {
            ShaderKind::ApertureOpaque => "AperturePBR_Opacity",
            ShaderKind::ApertureTranslucent => "AperturePBR_Translucent",
        }
    }

    /// Match an `info:mdl:sourceAsset` path by file name.
    pub fn from_source_asset(asset: &str) -> Option<Self> {
        let file = asset.rsplit(['/', '\\']).next().unwrap_or(asset);
        [ShaderKind::ApertureOpaque, ShaderKind::ApertureTranslucent]
            .into_iter()
            .find(|kind| kind.source_asset() == file)
    }
}

/// A matched Aperture shader: its prim name and plain-valued inputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApertureGraph {
    pub shader_name: String,
    /// Inputs in authored order, keyed without `inputs:`
    pub inputs: IndexMap<String, Attribute>,
}

impl ApertureGraph {
    pub fn new(shader_name: impl Into<String>) -> Self {
        Self {
            shader_name: shader_name.into(),
            inputs: IndexMap::new(),
        }
    }

    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.get(name).and_then(Attribute::value)
    }
}

/// A material subtree kept as authored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShaderGraph {
    /// Path the material had when read
    pub source_path: String,
    pub material: PrimSpec,
}

/// A material graph classified by topology.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RemixMaterial {
    ApertureOpaque(ApertureGraph),
    ApertureTranslucent(ApertureGraph),
    Unrecognized(ShaderGraph),
}

impl RemixMaterial {
    pub fn from_prim(prim: &ComposedPrim) -> Self {
        Self::from_spec(&composed_to_spec(prim), &prim.path)
    }

    /// Classify the material prim `spec` located at `path`.
    pub fn from_spec(spec: &PrimSpec, path: &str) -> Self {
        match match_aperture(spec, path) {
            Some((ShaderKind::ApertureOpaque, graph)) => RemixMaterial::ApertureOpaque(graph),
            Some((ShaderKind::ApertureTranslucent, graph)) => {
                RemixMaterial::ApertureTranslucent(graph)
            }
            None => {
                log::debug!("Material {} has an unrecognized shader graph", path);
                RemixMaterial::Unrecognized(ShaderGraph {
                    source_path: path.to_string(),
                    material: spec.clone(),
                })
            }
        }
    }

    pub fn kind(&self) -> Option<ShaderKind> {
        match self {
            RemixMaterial::ApertureOpaque(_) => Some(ShaderKind::ApertureOpaque),
            RemixMaterial::ApertureTranslucent(_) => Some(ShaderKind::ApertureTranslucent),
            RemixMaterial::Unrecognized(_) => None,
        }
    }

    pub fn graph(&self) -> Option<&ApertureGraph> {
        match self {
            RemixMaterial::ApertureOpaque(g) | RemixMaterial::ApertureTranslucent(g) => Some(g),
            RemixMaterial::Unrecognized(_) => None,
        }
    }

    /// Author this material as a prim spec at `material_path`.
    pub fn to_spec(&self, material_path: &str) -> PrimSpec {
        let name = split_parent(material_path)
            .map(|(_, name)| name)
            .unwrap_or(material_path);
        match self {
            RemixMaterial::ApertureOpaque(graph) => {
                aperture_spec(ShaderKind::ApertureOpaque, graph, name, material_path)
            }
            RemixMaterial::ApertureTranslucent(graph) => {
                aperture_spec(ShaderKind::ApertureTranslucent, graph, name, material_path)
            }
            RemixMaterial::Unrecognized(raw) => {
                let mut spec = raw.material.clone();
                spec.name = name.to_string();
                rebase_spec(&mut spec, &raw.source_path, material_path);
                spec
            }
        }
    }
}

fn match_aperture(spec: &PrimSpec, path: &str) -> Option<(ShaderKind, ApertureGraph)> {
    let surface = spec
        .attribute("outputs:mdl:surface")
        .or_else(|| spec.attribute("outputs:surface"))?;
    let [target] = surface.connections.as_slice() else {
        return None;
    };
    let (parent, shader_name) = split_parent(prim_of_property_path(target))?;
    if parent != path || spec.children.len() != 1 {
        return None;
    }

    let shader = spec.child(shader_name)?;
    if shader.type_name.as_deref() != Some("Shader") || !shader.children.is_empty() {
        return None;
    }
    let source = shader.attribute("info:implementationSource")?.value()?.as_str()?;
    if source != "sourceAsset" {
        return None;
    }
    let asset = shader.attribute("info:mdl:sourceAsset")?.value()?.as_str()?;
    let kind = ShaderKind::from_source_asset(asset)?;

    let mut graph = ApertureGraph::new(shader_name);
    for property in &shader.properties {
        let Property::Attribute(attr) = property else {
            continue;
        };
        if let Some(input) = attr.name.strip_prefix("inputs:") {
            if !attr.connections.is_empty() {
                return None;
            }
            graph.inputs.insert(input.to_string(), attr.clone());
        }
    }
    Some((kind, graph))
}

fn aperture_spec(kind: ShaderKind, graph: &ApertureGraph, name: &str, material_path: &str) -> PrimSpec {
    let shader_output = format!("{}.outputs:out", join_path(material_path, &graph.shader_name));
    let mut material = PrimSpec::new(Specifier::Def, Some("Material"), name);
    for output in ["outputs:mdl:displacement", "outputs:mdl:surface", "outputs:mdl:volume"] {
        material.set_attribute(Attribute::new(output, "token").with_connection(shader_output.clone()));
    }

    let mut shader = PrimSpec::new(Specifier::Def, Some("Shader"), graph.shader_name.clone());
    shader.set_attribute(
        Attribute::new("info:implementationSource", "token")
            .uniform()
            .with_value(Value::Token("sourceAsset".into())),
    );
    shader.set_attribute(
        Attribute::new("info:mdl:sourceAsset", "asset")
            .uniform()
            .with_value(Value::Asset(kind.source_asset().into())),
    );
    shader.set_attribute(
        Attribute::new("info:mdl:sourceAsset:subIdentifier", "token")
            .uniform()
            .with_value(Value::Token(kind.sub_identifier().into())),
    );
    for attr in graph.inputs.values() {
        shader.set_attribute(attr.clone());
    }
    shader.set_attribute(Attribute::new("outputs:out", "token"));
    material.children.push(shader);
    material
}

/// Rewrite connection and relationship targets from `from` to `to`.
fn rebase_spec(spec: &mut PrimSpec, from: &str, to: &str) {
    if from == to {
        return;
    }
    for property in &mut spec.properties {
        match property {
            Property::Attribute(attr) => {
                for target in &mut attr.connections {
                    *target = remap_path(target, from, to);
                }
            }
            Property::Relationship(rel) => {
                for target in &mut rel.targets {
                    *target = remap_path(target, from, to);
                }
            }
        }
    }
    for child in &mut spec.children {
        rebase_spec(child, from, to);
    }
}

/// Flatten a composed prim back into a single spec.
pub(crate) fn composed_to_spec(prim: &ComposedPrim) -> PrimSpec {
    let mut spec = PrimSpec::new(prim.specifier, prim.type_name.as_deref(), prim.name.clone());
    spec.metadata = prim.metadata.clone();
    spec.properties = prim.properties.values().cloned().collect();
    spec.children = prim.children.values().map(composed_to_spec).collect();
    spec
}
