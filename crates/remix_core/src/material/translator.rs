//! Translation between Aperture shader graphs and [`MaterialNode`].
//!
//! Reading keeps every input: recognized inputs become neutral fields, the
//! rest land in [`MaterialNode::unmapped`] verbatim. Writing emits an input
//! when it was authored in the source graph or differs from the Aperture
//! default, so untouched materials come back with the same inputs they had.

use indexmap::IndexMap;
use remix_math::Vec3;

use super::model::{
    AlphaTest, Capability, CapabilityNote, MaterialNode, RoundTripSource, TextureRef,
    TranslucentParams,
};
use super::{ApertureGraph, RemixMaterial, ShaderKind};
use crate::texture::TextureRole;
use crate::usd::{Attribute, PrimSpec, Property, Value};

#[derive(Clone, Copy, Debug)]
enum DefaultValue {
    Asset,
    Color(f32, f32, f32),
    Float(f32),
    Int(i64),
    Bool(bool),
}

/// One Aperture shader input Remix defines a default for.
#[derive(Clone, Copy, Debug)]
struct InputDef {
    name: &'static str,
    type_name: &'static str,
    default: DefaultValue,
}

const fn def(name: &'static str, type_name: &'static str, default: DefaultValue) -> InputDef {
    InputDef {
        name,
        type_name,
        default,
    }
}

const OPAQUE_INPUTS: &[InputDef] = &[
    def("diffuse_texture", "asset", DefaultValue::Asset),
    def("diffuse_color_constant", "color3f", DefaultValue::Color(0.2, 0.2, 0.2)),
    def("opacity_constant", "float", DefaultValue::Float(1.0)),
    def("reflectionroughness_texture", "asset", DefaultValue::Asset),
    def("reflection_roughness_constant", "float", DefaultValue::Float(0.5)),
    def("metallic_texture", "asset", DefaultValue::Asset),
    def("metallic_constant", "float", DefaultValue::Float(0.0)),
    def("normalmap_texture", "asset", DefaultValue::Asset),
    def("encoding", "int", DefaultValue::Int(2)),
    def("height_texture", "asset", DefaultValue::Asset),
    def("displace_in", "float", DefaultValue::Float(0.05)),
    def("emissive_mask_texture", "asset", DefaultValue::Asset),
    def("emissive_color_constant", "color3f", DefaultValue::Color(1.0, 0.1, 0.1)),
    def("emissive_intensity", "float", DefaultValue::Float(40.0)),
    def("enable_emission", "bool", DefaultValue::Bool(false)),
    def("blend_enabled", "bool", DefaultValue::Bool(false)),
    def("alpha_test_type", "int", DefaultValue::Int(0)),
    def("alpha_test_reference_value", "float", DefaultValue::Float(0.0)),
    def("opacity_texture", "asset", DefaultValue::Asset),
];

const TRANSLUCENT_INPUTS: &[InputDef] = &[
    def("transmittance_texture", "asset", DefaultValue::Asset),
    def("transmittance_color", "color3f", DefaultValue::Color(0.97, 0.97, 0.97)),
    def("ior_constant", "float", DefaultValue::Float(1.3)),
    def("thin_walled", "bool", DefaultValue::Bool(false)),
    def("thin_wall_thickness", "float", DefaultValue::Float(0.001)),
    def("use_diffuse_layer", "bool", DefaultValue::Bool(false)),
    def("transmittance_measurement_distance", "float", DefaultValue::Float(1.0)),
    def("normalmap_texture", "asset", DefaultValue::Asset),
    def("encoding", "int", DefaultValue::Int(2)),
    def("emissive_mask_texture", "asset", DefaultValue::Asset),
    def("emissive_color_constant", "color3f", DefaultValue::Color(1.0, 0.1, 0.1)),
    def("emissive_intensity", "float", DefaultValue::Float(40.0)),
    def("enable_emission", "bool", DefaultValue::Bool(false)),
];

fn inputs_for(kind: ShaderKind) -> &'static [InputDef] {
    match kind {
        ShaderKind::ApertureOpaque => OPAQUE_INPUTS,
        ShaderKind::ApertureTranslucent => TRANSLUCENT_INPUTS,
    }
}

impl InputDef {
    fn default_value(&self) -> Option<Value> {
        match self.default {
            DefaultValue::Asset => None,
            DefaultValue::Color(r, g, b) => Some(Value::from_vec3(Vec3::new(r, g, b))),
            DefaultValue::Float(f) => Some(Value::from_f32(f)),
            DefaultValue::Int(i) => Some(Value::Int(i)),
            DefaultValue::Bool(b) => Some(Value::Bool(b)),
        }
    }

    /// Read an authored value into this input's canonical form.
    fn normalize(&self, value: &Value) -> Option<Value> {
        match self.default {
            DefaultValue::Asset => value
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| Value::Asset(s.to_string())),
            DefaultValue::Color(..) => value.as_vec3().map(Value::from_vec3),
            DefaultValue::Float(_) => value.as_f32().map(Value::from_f32),
            DefaultValue::Int(_) => value.as_i64().map(Value::Int),
            DefaultValue::Bool(_) => value.as_bool().map(Value::Bool),
        }
    }
}

/// Convert a Remix material into the neutral model.
pub fn to_neutral(material: &RemixMaterial, name: &str) -> MaterialNode {
    match material {
        RemixMaterial::ApertureOpaque(graph) => {
            aperture_to_neutral(ShaderKind::ApertureOpaque, graph, name)
        }
        RemixMaterial::ApertureTranslucent(graph) => {
            aperture_to_neutral(ShaderKind::ApertureTranslucent, graph, name)
        }
        RemixMaterial::Unrecognized(raw) => {
            let mut node = MaterialNode::new(name);
            node.unrecognized = true;
            collect_raw_inputs(&raw.material, &mut node.unmapped);
            node.note(Capability::UnrecognizedShader, None);
            node.raw_graph = Some(raw.clone());
            node
        }
    }
}

fn collect_raw_inputs(spec: &PrimSpec, out: &mut IndexMap<String, Attribute>) {
    for property in &spec.properties {
        if let Property::Attribute(attr) = property {
            if attr.name.starts_with("inputs:") {
                out.insert(format!("{}.{}", spec.name, attr.name), attr.clone());
            }
        }
    }
    for child in &spec.children {
        collect_raw_inputs(child, out);
    }
}

fn aperture_to_neutral(kind: ShaderKind, graph: &ApertureGraph, name: &str) -> MaterialNode {
    let mut node = MaterialNode::new(name);
    if kind == ShaderKind::ApertureTranslucent {
        node.translucent = Some(TranslucentParams::default());
    }
    let table = inputs_for(kind);

    for (input, attr) in &graph.inputs {
        let applied = table
            .iter()
            .find(|d| d.name == input.as_str())
            .and_then(|d| attr.value().and_then(|v| d.normalize(v)).map(|v| (d, v)))
            .is_some_and(|(d, v)| apply(&mut node, d.name, &v));
        if applied {
            continue;
        }
        if let Some(feature) = Capability::of_input(input) {
            node.note(feature, Some(input));
        }
        node.unmapped.insert(input.clone(), attr.clone());
    }

    node.decide_alpha();
    node.round_trip = Some(RoundTripSource {
        kind,
        shader_name: graph.shader_name.clone(),
        inputs: graph.inputs.clone(),
    });
    node
}

fn texture(value: &Value, role: TextureRole) -> Option<TextureRef> {
    value.as_str().map(|asset| TextureRef::new(asset, role))
}

/// Store a normalized input value on the node. False when the input has no
/// neutral field.
fn apply(node: &mut MaterialNode, input: &str, value: &Value) -> bool {
    let role = TextureRole::from_input_name(input);
    match input {
        "diffuse_texture" => node.albedo.texture = texture(value, role),
        "opacity_texture" => node.opacity.texture = texture(value, role),
        "reflectionroughness_texture" => node.roughness.texture = texture(value, role),
        "metallic_texture" => node.metallic.texture = texture(value, role),
        "normalmap_texture" => node.normal = texture(value, role),
        "height_texture" => node.height = texture(value, role),
        "emissive_mask_texture" => node.emissive.texture = texture(value, role),
        "transmittance_texture" => match &mut node.translucent {
            Some(t) => t.transmittance.texture = texture(value, role),
            None => return false,
        },
        _ => return apply_constant(node, input, value).is_some(),
    }
    true
}

fn apply_constant(node: &mut MaterialNode, input: &str, value: &Value) -> Option<()> {
    match input {
        "diffuse_color_constant" => node.albedo.value = value.as_vec3()?,
        "emissive_color_constant" => node.emissive.value = value.as_vec3()?,
        "opacity_constant" => node.opacity.value = value.as_f32()?,
        "reflection_roughness_constant" => node.roughness.value = value.as_f32()?,
        "metallic_constant" => node.metallic.value = value.as_f32()?,
        "encoding" => node.normal_encoding = value.as_i64()?,
        "displace_in" => node.displace_in = value.as_f32()?,
        "emissive_intensity" => node.emissive_intensity = value.as_f32()?,
        "enable_emission" => node.emission_enabled = value.as_bool()?,
        "blend_enabled" => node.blend_enabled = value.as_bool()?,
        "alpha_test_type" => node.alpha_test = AlphaTest::from_i64(value.as_i64()?)?,
        "alpha_test_reference_value" => node.alpha_cutoff = value.as_f32()?,
        _ => {
            let t = node.translucent.as_mut()?;
            match input {
                "transmittance_color" => t.transmittance.value = value.as_vec3()?,
                "ior_constant" => t.ior = value.as_f32()?,
                "thin_walled" => t.thin_walled = value.as_bool()?,
                "thin_wall_thickness" => t.thin_wall_thickness = value.as_f32()?,
                "use_diffuse_layer" => t.use_diffuse_layer = value.as_bool()?,
                "transmittance_measurement_distance" => t.measurement_distance = value.as_f32()?,
                _ => return None,
            }
        }
    }
    Some(())
}

/// Current value of a neutral field in the input's canonical form. `None`
/// for an unset texture.
fn neutral_value(node: &MaterialNode, input: &str) -> Option<Value> {
    let asset = |t: &Option<TextureRef>| t.as_ref().map(|t| Value::Asset(t.asset.clone()));
    let translucent = node.translucent.clone().unwrap_or_default();
    let value = match input {
        "diffuse_texture" => return asset(&node.albedo.texture),
        "opacity_texture" => {
            return if node.has_separate_opacity_texture() {
                asset(&node.opacity.texture)
            } else {
                None
            }
        }
        "reflectionroughness_texture" => return asset(&node.roughness.texture),
        "metallic_texture" => return asset(&node.metallic.texture),
        "normalmap_texture" => return asset(&node.normal),
        "height_texture" => return asset(&node.height),
        "emissive_mask_texture" => return asset(&node.emissive.texture),
        "transmittance_texture" => return asset(&translucent.transmittance.texture),
        "diffuse_color_constant" => Value::from_vec3(node.albedo.value),
        "emissive_color_constant" => Value::from_vec3(node.emissive.value),
        "transmittance_color" => Value::from_vec3(translucent.transmittance.value),
        "opacity_constant" => Value::from_f32(node.opacity.value),
        "reflection_roughness_constant" => Value::from_f32(node.roughness.value),
        "metallic_constant" => Value::from_f32(node.metallic.value),
        "displace_in" => Value::from_f32(node.displace_in),
        "emissive_intensity" => Value::from_f32(node.emissive_intensity),
        "alpha_test_reference_value" => Value::from_f32(node.alpha_cutoff),
        "ior_constant" => Value::from_f32(translucent.ior),
        "thin_wall_thickness" => Value::from_f32(translucent.thin_wall_thickness),
        "transmittance_measurement_distance" => Value::from_f32(translucent.measurement_distance),
        "encoding" => Value::Int(node.normal_encoding),
        "alpha_test_type" => Value::Int(node.alpha_test.as_i64()),
        "enable_emission" => Value::Bool(node.emission_enabled),
        "blend_enabled" => Value::Bool(node.blend_enabled),
        "thin_walled" => Value::Bool(translucent.thin_walled),
        "use_diffuse_layer" => Value::Bool(translucent.use_diffuse_layer),
        _ => return None,
    };
    Some(value)
}

/// Keep the authored encoding when the value is written back (`0` for a
/// bool stays an int).
fn coerce_like(template: Option<&Value>, value: Value) -> Value {
    match (template, value) {
        (Some(Value::Int(_)), Value::Bool(b)) => Value::Int(b as i64),
        (Some(Value::Float(_)), Value::Int(i)) => Value::Float(i as f64),
        (_, value) => value,
    }
}

/// Build a Remix material from the neutral model.
///
/// With `target` unset the source kind is kept, and unrecognized materials
/// come back as their raw graph. Forcing a target translates the neutral
/// fields into that shader; side-channel inputs only survive when the
/// target matches the source kind.
pub fn to_remix(node: &MaterialNode, target: Option<ShaderKind>) -> RemixMaterial {
    if target.is_none() && node.unrecognized {
        if let Some(raw) = &node.raw_graph {
            return RemixMaterial::Unrecognized(raw.clone());
        }
    }
    let kind = target.unwrap_or_else(|| default_kind(node));
    let source = node
        .round_trip
        .as_ref()
        .filter(|s| s.kind == kind && !node.unrecognized);

    let mut emitted: IndexMap<String, Attribute> = IndexMap::new();
    for def in inputs_for(kind) {
        if def.name == "opacity_texture" && !node.has_separate_opacity_texture() {
            if let Some(authored) = source.and_then(|s| s.inputs.get(def.name)) {
                emitted.insert(def.name.to_string(), authored.clone());
            }
            continue;
        }
        let value = neutral_value(node, def.name);
        let authored = source.and_then(|s| s.inputs.get(def.name));
        match (authored, value) {
            (Some(template), value) => {
                let original = template.value().and_then(|v| def.normalize(v));
                if original == value {
                    emitted.insert(def.name.to_string(), template.clone());
                } else if let Some(value) = value {
                    let mut attr = template.clone();
                    attr.default = Some(coerce_like(template.value(), value));
                    attr.time_samples = None;
                    emitted.insert(def.name.to_string(), attr);
                }
            }
            (None, Some(value)) if Some(&value) != def.default_value().as_ref() => {
                emitted.insert(def.name.to_string(), new_input(def, value));
            }
            _ => {}
        }
    }

    if let Some(source) = source {
        for (input, attr) in &node.unmapped {
            if !emitted.contains_key(input) {
                emitted.insert(input.clone(), attr.clone());
            }
        }
        // Authored order first, new inputs after
        let mut ordered: IndexMap<String, Attribute> = IndexMap::new();
        for name in source.inputs.keys() {
            if let Some(attr) = emitted.shift_remove(name) {
                ordered.insert(name.clone(), attr);
            }
        }
        ordered.extend(emitted);
        emitted = ordered;
    }

    let graph = ApertureGraph {
        shader_name: node
            .round_trip
            .as_ref()
            .map(|s| s.shader_name.clone())
            .unwrap_or_else(|| "Shader".to_string()),
        inputs: emitted,
    };
    match kind {
        ShaderKind::ApertureOpaque => RemixMaterial::ApertureOpaque(graph),
        ShaderKind::ApertureTranslucent => RemixMaterial::ApertureTranslucent(graph),
    }
}

fn default_kind(node: &MaterialNode) -> ShaderKind {
    match &node.round_trip {
        Some(source) => source.kind,
        None if node.translucent.is_some() => ShaderKind::ApertureTranslucent,
        None => ShaderKind::ApertureOpaque,
    }
}

fn new_input(def: &InputDef, value: Value) -> Attribute {
    let attr = Attribute::new(format!("inputs:{}", def.name), def.type_name).with_value(value);
    match def.default {
        DefaultValue::Asset => attr.with_metadata("colorSpace", Value::String("auto".into())),
        _ => attr,
    }
}

/// Capability findings for writing `node` as `target`.
pub fn capability_notes(node: &MaterialNode, target: Option<ShaderKind>) -> Vec<CapabilityNote> {
    let mut notes = node.capabilities.clone();
    let kind = target.unwrap_or_else(|| default_kind(node));
    let keeps_raw = target.is_none() && node.unrecognized && node.raw_graph.is_some();
    let source_matches = node
        .round_trip
        .as_ref()
        .is_some_and(|s| s.kind == kind && !node.unrecognized);

    if !keeps_raw && !source_matches && !node.unmapped.is_empty() {
        notes.push(CapabilityNote {
            feature: Capability::DroppedForTarget,
            inputs: node.unmapped.keys().cloned().collect(),
        });
    }
    if node.has_separate_opacity_texture() {
        let mut note = CapabilityNote::new(Capability::SeparateOpacityTexture);
        note.inputs.push("opacity_texture".to_string());
        notes.push(note);
    }
    notes
}
