//! USDA serialization of a [`Layer`].
//!
//! Output follows the layout USD itself emits: layer metadata block, blank
//! line between root prims, four-space indentation.

use std::path::Path;

use super::types::*;
use super::value::{escape_string, format_value, push_indent, Value};

/// Serialize a layer to USDA text.
pub fn write_usda(layer: &Layer) -> String {
    let mut builder = UsdaBuilder::new();
    builder.write_layer(layer);
    builder.output
}

/// Write a layer to disk through a temporary file in the same directory.
pub fn save_usda(layer: &Layer, path: &Path) -> std::io::Result<()> {
    let text = write_usda(layer);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "layer.usda".to_string());
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)
}

/// Builder for USDA output.
struct UsdaBuilder {
    output: String,
    indent: usize,
}

impl UsdaBuilder {
    fn new() -> Self {
        Self {
            output: String::new(),
            indent: 0,
        }
    }

    fn write_line(&mut self, line: &str) {
        if !line.is_empty() {
            push_indent(&mut self.output, self.indent);
        }
        self.output.push_str(line);
        self.output.push('\n');
    }

    fn write_layer(&mut self, layer: &Layer) {
        self.output.push_str("#usda 1.0\n");
        if layer.doc.is_some() || !layer.metadata.is_empty() {
            self.write_metadata_block(layer.doc.as_deref(), &layer.metadata);
        }
        for prim in &layer.prims {
            self.write_line("");
            self.write_prim(prim);
        }
    }

    fn write_metadata_block(&mut self, doc: Option<&str>, entries: &[MetadataEntry]) {
        self.write_line("(");
        self.indent += 1;
        if let Some(doc) = doc {
            self.write_line(&escape_string(doc));
        }
        for entry in entries {
            self.write_metadata_entry(entry);
        }
        self.indent -= 1;
        self.write_line(")");
    }

    fn write_metadata_entry(&mut self, entry: &MetadataEntry) {
        let prefix = entry
            .list_op
            .keyword()
            .map(|k| format!("{} ", k))
            .unwrap_or_default();
        let line = match &entry.value {
            // Long asset lists read better one per line
            Value::Array(items) if items.len() > 1 && items.iter().all(is_asset_like) => {
                let mut text = format!("{}{} = [\n", prefix, entry.key);
                for (i, item) in items.iter().enumerate() {
                    push_indent(&mut text, self.indent + 1);
                    text.push_str(&format_value(item, self.indent + 1));
                    if i + 1 < items.len() {
                        text.push(',');
                    }
                    text.push('\n');
                }
                push_indent(&mut text, self.indent);
                text.push(']');
                text
            }
            value => format!(
                "{}{} = {}",
                prefix,
                entry.key,
                format_value(value, self.indent)
            ),
        };
        self.write_line(&line);
    }

    fn write_prim(&mut self, prim: &PrimSpec) {
        let mut header = prim.specifier.keyword().to_string();
        if let Some(type_name) = &prim.type_name {
            header.push(' ');
            header.push_str(type_name);
        }
        header.push(' ');
        header.push_str(&escape_string(&prim.name));
        if prim.doc.is_some() || !prim.metadata.is_empty() {
            header.push_str(" (");
            self.write_line(&header);
            self.indent += 1;
            if let Some(doc) = &prim.doc {
                self.write_line(&escape_string(doc));
            }
            for entry in &prim.metadata {
                self.write_metadata_entry(entry);
            }
            self.indent -= 1;
            self.write_line(")");
        } else {
            self.write_line(&header);
        }

        self.write_line("{");
        self.indent += 1;
        for property in &prim.properties {
            match property {
                Property::Attribute(attr) => self.write_attribute(attr),
                Property::Relationship(rel) => self.write_relationship(rel),
            }
        }
        for raw in &prim.raw_blocks {
            if !prim.properties.is_empty() {
                self.write_line("");
            }
            for line in raw.lines() {
                self.write_line(line.trim_start());
            }
        }
        for (i, child) in prim.children.iter().enumerate() {
            if i > 0 || !prim.properties.is_empty() || !prim.raw_blocks.is_empty() {
                self.write_line("");
            }
            self.write_prim(child);
        }
        self.indent -= 1;
        self.write_line("}");
    }

    fn attribute_prefix(attr: &Attribute) -> String {
        let mut prefix = String::new();
        if attr.custom {
            prefix.push_str("custom ");
        }
        if attr.variability == Variability::Uniform {
            prefix.push_str("uniform ");
        }
        prefix.push_str(&attr.type_name);
        prefix.push(' ');
        prefix.push_str(&attr.name);
        prefix
    }

    fn write_attribute(&mut self, attr: &Attribute) {
        let prefix = Self::attribute_prefix(attr);
        let declare =
            attr.default.is_some() || (attr.connections.is_empty() && attr.time_samples.is_none());
        let has_metadata = !attr.metadata.is_empty();

        if declare || has_metadata {
            let mut line = prefix.clone();
            if let Some(value) = &attr.default {
                line.push_str(" = ");
                line.push_str(&format_value(value, self.indent));
            }
            if has_metadata {
                line.push_str(" (");
                self.write_line(&line);
                self.indent += 1;
                for entry in &attr.metadata {
                    self.write_metadata_entry(entry);
                }
                self.indent -= 1;
                self.write_line(")");
            } else {
                self.write_line(&line);
            }
        }

        if !attr.connections.is_empty() {
            let targets = if attr.connections.len() == 1 {
                format!("<{}>", attr.connections[0])
            } else {
                let joined: Vec<String> =
                    attr.connections.iter().map(|t| format!("<{}>", t)).collect();
                format!("[{}]", joined.join(", "))
            };
            self.write_line(&format!("{}.connect = {}", prefix, targets));
        }

        if let Some(samples) = &attr.time_samples {
            self.write_line(&format!("{}.timeSamples = {{", prefix));
            self.indent += 1;
            for (time, value) in samples {
                let line = format!(
                    "{}: {},",
                    format_value(&Value::Float(*time), self.indent),
                    format_value(value, self.indent)
                );
                self.write_line(&line);
            }
            self.indent -= 1;
            self.write_line("}");
        }
    }

    fn write_relationship(&mut self, rel: &Relationship) {
        let mut line = String::new();
        if let Some(op) = rel.list_op.keyword() {
            line.push_str(op);
            line.push(' ');
        }
        if rel.custom {
            line.push_str("custom ");
        }
        line.push_str("rel ");
        line.push_str(&rel.name);
        match rel.targets.len() {
            0 => {}
            1 => line.push_str(&format!(" = <{}>", rel.targets[0])),
            _ => {
                let joined: Vec<String> = rel.targets.iter().map(|t| format!("<{}>", t)).collect();
                line.push_str(&format!(" = [{}]", joined.join(", ")));
            }
        }
        if rel.metadata.is_empty() {
            self.write_line(&line);
            return;
        }
        line.push_str(" (");
        self.write_line(&line);
        self.indent += 1;
        for entry in &rel.metadata {
            self.write_metadata_entry(entry);
        }
        self.indent -= 1;
        self.write_line(")");
    }
}

fn is_asset_like(value: &Value) -> bool {
    matches!(value, Value::Asset(_) | Value::Reference { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usd::parse_usda;

    const SAMPLE: &str = r#"#usda 1.0
(
    "Remix mod"
    customLayerData = {
        string lightspeed_game_name = "Portal"
        dictionary cameraSettings = {
            double3 position = (1, 2, 3)
        }
    }
    defaultPrim = "RootNode"
    subLayers = [@./subUSDAs/a.usda@, @./subUSDAs/b.usda@]
    upAxis = "Z"
)

over "RootNode"
{
    def Material "Mat" (
        prepend apiSchemas = ["MaterialBindingAPI"]
    )
    {
        token outputs:mdl:surface.connect = </RootNode/Mat/Shader.outputs:out>

        def Shader "Shader"
        {
            uniform asset info:mdl:sourceAsset = @AperturePBR_Opacity.mdl@
            float inputs:metallic_constant = 0.25
            color3f inputs:tint = (1, 0.5, 0)
            color3f inputs:tint.connect = </RootNode/Mat/Tex.outputs:rgb>
            float3 xformOp:translate.timeSamples = {
                0: (0, 0, 0),
                24: (1, 1, 1),
            }
            texCoord2f[] primvars:st = [(0, 0), (1, 0)] (
                interpolation = "faceVarying"
            )
            rel material:binding = </RootNode/Mat> (
                bindMaterialAs = "strongerThanDescendants"
            )
            token outputs:out
        }
    }

    def "Untyped"
    {
        variantSet "v" = {
            "a" {
            }
        }
    }
}
"#;

    #[test]
    fn test_write_then_parse_is_stable() {
        let layer = parse_usda(SAMPLE).unwrap();
        let text = write_usda(&layer);
        let reparsed = parse_usda(&text).unwrap();
        assert_eq!(layer, reparsed);
        // Writing twice produces identical text
        assert_eq!(text, write_usda(&reparsed));
    }

    #[test]
    fn test_writer_layout() {
        let mut layer = Layer::default();
        layer.metadata.push(MetadataEntry::new("upAxis", Value::String("Z".into())));
        let prim = layer
            .ensure_prim("/RootNode/Mesh", Specifier::Def, Some("Mesh"))
            .unwrap();
        prim.set_attribute(
            Attribute::new("faceVertexCounts", "int[]").with_value(Value::from_int_array([3])),
        );
        let text = write_usda(&layer);
        assert!(text.starts_with("#usda 1.0\n(\n    upAxis = \"Z\"\n)\n"));
        assert!(text.contains("over \"RootNode\"\n{\n    def Mesh \"Mesh\"\n    {\n"));
        assert!(text.contains("        int[] faceVertexCounts = [3]\n"));
    }

    #[test]
    fn test_sublayers_one_per_line() {
        let mut layer = Layer::default();
        layer.set_sublayers(&["./a.usda".to_string(), "./b.usda".to_string()]);
        let text = write_usda(&layer);
        assert!(text.contains("subLayers = [\n        @./a.usda@,\n        @./b.usda@\n    ]"));
    }

    #[test]
    fn test_save_usda_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("mod.usda");
        let layer = parse_usda(SAMPLE).unwrap();
        save_usda(&layer, &path).unwrap();
        let back = parse_usda(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, layer);
    }
}
