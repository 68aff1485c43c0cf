//! Untyped USDA values.
//!
//! The parser keeps values in the shape they were authored in; typed access
//! happens at the use site through the `as_*` helpers, guided by the
//! attribute's declared type name.

use std::fmt::Write;

use remix_math::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// A value as it appears in USDA text.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Token(String),
    Asset(String),
    Path(String),
    /// `@asset@</Prim>` or `</Prim>` in reference/payload position.
    Reference {
        asset: Option<String>,
        prim: Option<String>,
    },
    Tuple(Vec<Value>),
    Array(Vec<Value>),
    Dictionary(Vec<DictEntry>),
}

/// One typed entry of a USDA dictionary (`string key = "value"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DictEntry {
    pub type_name: String,
    pub key: String,
    pub value: Value,
}

impl Value {
    /// Store an `f32` so that it prints back with its shortest decimal form.
    pub fn from_f32(value: f32) -> Self {
        Value::Float(value.to_string().parse().unwrap_or(value as f64))
    }

    pub fn from_vec2(v: Vec2) -> Self {
        Value::Tuple(vec![Value::from_f32(v.x), Value::from_f32(v.y)])
    }

    pub fn from_vec3(v: Vec3) -> Self {
        Value::Tuple(vec![
            Value::from_f32(v.x),
            Value::from_f32(v.y),
            Value::from_f32(v.z),
        ])
    }

    pub fn from_vec3_array(values: &[Vec3]) -> Self {
        Value::Array(values.iter().map(|v| Value::from_vec3(*v)).collect())
    }

    pub fn from_vec2_array(values: &[Vec2]) -> Self {
        Value::Array(values.iter().map(|v| Value::from_vec2(*v)).collect())
    }

    pub fn from_int_array<I: IntoIterator<Item = i64>>(values: I) -> Self {
        Value::Array(values.into_iter().map(Value::Int).collect())
    }

    pub fn from_matrix(rows: [[f64; 4]; 4]) -> Self {
        Value::Tuple(
            rows.iter()
                .map(|row| Value::Tuple(row.iter().map(|v| Value::Float(*v)).collect()))
                .collect(),
        )
    }

    pub fn token_array<S: AsRef<str>>(values: &[S]) -> Self {
        Value::Array(
            values
                .iter()
                .map(|s| Value::Token(s.as_ref().to_string()))
                .collect(),
        )
    }

    /// Quoted strings in a `token` or `token[]` attribute hold tokens.
    pub fn into_typed(self, type_name: &str) -> Self {
        if type_name.trim_end_matches("[]") != "token" {
            return self;
        }
        match self {
            Value::String(s) => Value::Token(s),
            Value::Array(items) => Value::Array(
                items
                    .into_iter()
                    .map(|item| item.into_typed(type_name))
                    .collect(),
            ),
            other => other,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        self.as_f64().map(|f| f as f32)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(i) => Some(*i != 0),
            Value::Float(f) => Some(*f != 0.0),
            _ => None,
        }
    }

    /// String-like payload of strings, tokens and asset paths.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Token(s) | Value::Asset(s) | Value::Path(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2> {
        match self {
            Value::Tuple(items) if items.len() == 2 => {
                Some(Vec2::new(items[0].as_f32()?, items[1].as_f32()?))
            }
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            Value::Tuple(items) if items.len() == 3 => Some(Vec3::new(
                items[0].as_f32()?,
                items[1].as_f32()?,
                items[2].as_f32()?,
            )),
            _ => None,
        }
    }

    /// Tuple of numbers, any arity.
    pub fn as_f64_tuple(&self) -> Option<Vec<f64>> {
        match self {
            Value::Tuple(items) => items.iter().map(Value::as_f64).collect(),
            _ => None,
        }
    }

    pub fn as_matrix(&self) -> Option<[[f64; 4]; 4]> {
        let Value::Tuple(rows) = self else {
            return None;
        };
        if rows.len() != 4 {
            return None;
        }
        let mut out = [[0.0; 4]; 4];
        for (r, row) in rows.iter().enumerate() {
            let values = row.as_f64_tuple()?;
            if values.len() != 4 {
                return None;
            }
            out[r].copy_from_slice(&values);
        }
        Some(out)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_vec3_array(&self) -> Option<Vec<Vec3>> {
        self.as_array()?.iter().map(Value::as_vec3).collect()
    }

    pub fn as_vec2_array(&self) -> Option<Vec<Vec2>> {
        self.as_array()?.iter().map(Value::as_vec2).collect()
    }

    pub fn as_int_array(&self) -> Option<Vec<i64>> {
        self.as_array()?.iter().map(Value::as_i64).collect()
    }

    pub fn as_string_array(&self) -> Option<Vec<String>> {
        match self {
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(str::to_string))
                .collect(),
            other => other.as_str().map(|s| vec![s.to_string()]),
        }
    }

    /// Look up a key in a dictionary value.
    pub fn dict_get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Dictionary(entries) => entries.iter().find(|e| e.key == key).map(|e| &e.value),
            _ => None,
        }
    }

    /// Insert or replace a dictionary entry. No-op on non-dictionaries.
    pub fn dict_set(&mut self, type_name: &str, key: &str, value: Value) {
        if let Value::Dictionary(entries) = self {
            if let Some(entry) = entries.iter_mut().find(|e| e.key == key) {
                entry.type_name = type_name.to_string();
                entry.value = value;
            } else {
                entries.push(DictEntry {
                    type_name: type_name.to_string(),
                    key: key.to_string(),
                    value,
                });
            }
        }
    }
}

/// Format a real number so that it parses back to the same `f64`.
pub fn format_real(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        let text = if value > 0.0 { "inf" } else { "-inf" };
        text.to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Escape a string for a double-quoted USDA literal.
pub fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Render a value inline. Dictionaries are laid out over several lines,
/// indented relative to `indent`.
pub fn format_value(value: &Value, indent: usize) -> String {
    let mut out = String::new();
    write_value(&mut out, value, indent);
    out
}

fn write_value(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::None => out.push_str("None"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{}", i);
        }
        Value::Float(f) => out.push_str(&format_real(*f)),
        Value::String(s) => out.push_str(&escape_string(s)),
        Value::Token(t) => out.push_str(&escape_string(t)),
        Value::Asset(a) => {
            let _ = write!(out, "@{}@", a);
        }
        Value::Path(p) => {
            let _ = write!(out, "<{}>", p);
        }
        Value::Reference { asset, prim } => {
            if let Some(asset) = asset {
                let _ = write!(out, "@{}@", asset);
            }
            if let Some(prim) = prim {
                let _ = write!(out, "<{}>", prim);
            }
        }
        Value::Tuple(items) => {
            out.push('(');
            write_list(out, items, indent);
            out.push(')');
        }
        Value::Array(items) => {
            out.push('[');
            write_list(out, items, indent);
            out.push(']');
        }
        Value::Dictionary(entries) => {
            if entries.is_empty() {
                out.push_str("{\n");
                push_indent(out, indent);
                out.push('}');
                return;
            }
            out.push_str("{\n");
            for entry in entries {
                push_indent(out, indent + 1);
                let key = if is_identifier(&entry.key) {
                    entry.key.clone()
                } else {
                    escape_string(&entry.key)
                };
                let _ = write!(out, "{} {} = ", entry.type_name, key);
                write_value(out, &entry.value, indent + 1);
                out.push('\n');
            }
            push_indent(out, indent);
            out.push('}');
        }
    }
}

fn write_list(out: &mut String, items: &[Value], indent: usize) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_value(out, item, indent);
    }
}

pub(crate) fn push_indent(out: &mut String, level: usize) {
    for _ in 0..level {
        out.push_str("    ");
    }
}

/// True when `s` can be written without quotes as a dictionary key.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
