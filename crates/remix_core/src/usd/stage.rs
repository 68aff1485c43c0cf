//! Layer stack composition.
//!
//! A [`Stage`] is the flattened view of a root layer: its sublayer stack is
//! merged strongest-over-weakest, then reference and payload arcs are
//! resolved by composing the referenced file's own stack underneath the
//! referencing prim. Missing arc targets never fail the open; the prim keeps
//! its local opinions and records a [`BrokenArc`].

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use thiserror::Error;

use crate::error::{Diagnostic, ErrorKind};
use crate::tool::{run_tool, ToolError};

use super::parser::{parse_usda, ParseError};
use super::types::*;
use super::value::Value;

/// Errors that can occur while opening a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed layer {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("Binary USD layer {0} needs a usdcat executable to be configured")]
    BinaryUnsupported(PathBuf),

    #[error("usdcat failed on {path}: {source}")]
    Bridge {
        path: PathBuf,
        #[source]
        source: ToolError,
    },

    #[error("Composition cycle through {0}")]
    Cycle(PathBuf),
}

impl StageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StageError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                ErrorKind::Project
            }
            StageError::Io { .. } => ErrorKind::Io,
            StageError::Parse { .. } | StageError::BinaryUnsupported(_) | StageError::Bridge { .. } => {
                ErrorKind::MalformedDocument
            }
            StageError::Cycle(_) => ErrorKind::BrokenReference,
        }
    }
}

/// Options controlling how layers are read.
#[derive(Clone, Debug)]
pub struct StageOptions {
    /// `usdcat` used to turn binary crate files into text
    pub usdcat: Option<PathBuf>,
    pub tool_timeout: Duration,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            usdcat: None,
            tool_timeout: Duration::from_secs(60),
        }
    }
}

const USDC_MAGIC: &[u8] = b"PXR-USDC";

/// Read and parse a single layer file.
pub fn read_layer(path: &Path, options: &StageOptions) -> Result<Layer, StageError> {
    let bytes = std::fs::read(path).map_err(|source| StageError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let text = if bytes.starts_with(USDC_MAGIC) {
        let usdcat = options
            .usdcat
            .as_deref()
            .ok_or_else(|| StageError::BinaryUnsupported(path.to_path_buf()))?;
        log::debug!("Converting binary layer {} via usdcat", path.display());
        let output = run_tool(usdcat, &[path.as_os_str()], options.tool_timeout).map_err(
            |source| StageError::Bridge {
                path: path.to_path_buf(),
                source,
            },
        )?;
        String::from_utf8_lossy(&output.stdout).into_owned()
    } else {
        String::from_utf8(bytes).map_err(|e| StageError::Parse {
            path: path.to_path_buf(),
            source: ParseError::Parse {
                line: 0,
                message: format!("not UTF-8 text: {}", e),
            },
        })?
    };

    parse_usda(&text).map_err(|source| StageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Kind of composition arc.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ArcKind {
    Sublayer,
    Reference,
    Payload,
}

/// A reference or payload authored on a prim.
#[derive(Clone, Debug, PartialEq)]
pub struct CompositionArc {
    pub kind: ArcKind,
    pub asset: Option<String>,
    pub prim: Option<String>,
    /// Directory of the layer that authored the arc
    pub anchor: PathBuf,
}

/// An arc whose target could not be composed.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct BrokenArc {
    pub kind: ArcKind,
    pub asset: String,
    pub reason: String,
}

/// A prim after composition.
#[derive(Clone, Debug, PartialEq)]
pub struct ComposedPrim {
    pub path: String,
    pub name: String,
    pub specifier: Specifier,
    pub type_name: Option<String>,
    pub metadata: Vec<MetadataEntry>,
    pub properties: IndexMap<String, Property>,
    pub children: IndexMap<String, ComposedPrim>,
    /// Arcs not yet resolved
    pub arcs: Vec<CompositionArc>,
    /// Arcs that were composed in, strongest first
    pub resolved_arcs: Vec<CompositionArc>,
    pub broken_arcs: Vec<BrokenArc>,
}

impl ComposedPrim {
    fn from_spec(spec: &PrimSpec, path: &str, anchor: &Path) -> Self {
        let mut arcs = Vec::new();
        let mut metadata = Vec::new();
        for entry in &spec.metadata {
            let kind = match entry.key.as_str() {
                "references" => ArcKind::Reference,
                "payload" => ArcKind::Payload,
                _ => {
                    metadata.push(entry.clone());
                    continue;
                }
            };
            if entry.list_op == ListOp::Delete {
                continue;
            }
            for (asset, prim) in arc_targets(&entry.value) {
                arcs.push(CompositionArc {
                    kind,
                    asset,
                    prim,
                    anchor: anchor.to_path_buf(),
                });
            }
        }

        let properties = spec
            .properties
            .iter()
            .map(|p| (p.name().to_string(), p.clone()))
            .collect();

        let children = spec
            .children
            .iter()
            .map(|child| {
                let child_path = join_path(path, &child.name);
                (child.name.clone(), ComposedPrim::from_spec(child, &child_path, anchor))
            })
            .collect();

        Self {
            path: path.to_string(),
            name: spec.name.clone(),
            specifier: spec.specifier,
            type_name: spec.type_name.clone(),
            metadata,
            properties,
            children,
            arcs,
            resolved_arcs: Vec::new(),
            broken_arcs: Vec::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        match self.properties.get(name) {
            Some(Property::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn relationship(&self, name: &str) -> Option<&Relationship> {
        match self.properties.get(name) {
            Some(Property::Relationship(r)) => Some(r),
            _ => None,
        }
    }

    /// Resolved value of an attribute (default or first time sample).
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.attribute(name).and_then(Attribute::value)
    }

    pub fn metadata_value(&self, key: &str) -> Option<&Value> {
        find_metadata(&self.metadata, key).map(|e| &e.value)
    }

    pub fn api_schemas(&self) -> Vec<String> {
        self.metadata
            .iter()
            .filter(|e| e.key == "apiSchemas" && e.list_op != ListOp::Delete)
            .flat_map(|e| e.value.as_string_array().unwrap_or_default())
            .collect()
    }

    pub fn is_a(&self, type_name: &str) -> bool {
        self.type_name.as_deref() == Some(type_name)
    }

    /// Layer opinions from `stronger` win over `self`.
    fn overlay(&mut self, stronger: ComposedPrim) {
        if stronger.specifier != Specifier::Over {
            self.specifier = stronger.specifier;
        }
        if stronger.type_name.is_some() {
            self.type_name = stronger.type_name;
        }

        for entry in stronger.metadata {
            if entry.key == "apiSchemas" {
                merge_list_metadata(&mut self.metadata, entry);
            } else {
                self.metadata.retain(|e| e.key != entry.key);
                self.metadata.push(entry);
            }
        }

        for kind in [ArcKind::Reference, ArcKind::Payload] {
            let incoming: Vec<CompositionArc> = stronger
                .arcs
                .iter()
                .filter(|a| a.kind == kind)
                .cloned()
                .collect();
            if incoming.is_empty() {
                continue;
            }
            let mut merged = incoming;
            merged.extend(self.arcs.iter().filter(|a| a.kind == kind).cloned());
            merged.dedup_by(|a, b| a.asset == b.asset && a.prim == b.prim);
            self.arcs.retain(|a| a.kind != kind);
            self.arcs.extend(merged);
        }

        for (name, property) in stronger.properties {
            match (self.properties.get_mut(&name), property) {
                (Some(Property::Attribute(weak)), Property::Attribute(strong)) => {
                    merge_attribute(weak, strong)
                }
                (Some(Property::Relationship(weak)), Property::Relationship(strong)) => {
                    merge_relationship(weak, strong)
                }
                (_, property) => {
                    self.properties.insert(name, property);
                }
            }
        }

        for (name, child) in stronger.children {
            match self.children.get_mut(&name) {
                Some(existing) => existing.overlay(child),
                None => {
                    self.children.insert(name, child);
                }
            }
        }

        self.resolved_arcs.extend(stronger.resolved_arcs);
        self.broken_arcs.extend(stronger.broken_arcs);
    }

    /// Move this subtree from `from` to `to`, rewriting internal targets.
    fn rebase(&mut self, from: &str, to: &str) {
        self.path = remap_path(&self.path, from, to);
        for property in self.properties.values_mut() {
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
        for arc in &mut self.arcs {
            if arc.asset.is_none() {
                if let Some(prim) = &mut arc.prim {
                    *prim = remap_path(prim, from, to);
                }
            }
        }
        for child in self.children.values_mut() {
            child.rebase(from, to);
        }
    }

    /// Visit this prim and its descendants, parents first.
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ComposedPrim)) {
        visit(self);
        for child in self.children.values() {
            child.walk(visit);
        }
    }
}

fn merge_list_metadata(entries: &mut Vec<MetadataEntry>, stronger: MetadataEntry) {
    if stronger.list_op == ListOp::Explicit {
        entries.retain(|e| e.key != stronger.key);
        entries.push(stronger);
        return;
    }
    let mut items = stronger.value.as_string_array().unwrap_or_default();
    if let Some(existing) = entries.iter_mut().find(|e| e.key == stronger.key) {
        for item in existing.value.as_string_array().unwrap_or_default() {
            if !items.contains(&item) {
                items.push(item);
            }
        }
        existing.value = Value::Array(items.into_iter().map(Value::String).collect());
        existing.list_op = ListOp::Prepend;
    } else {
        entries.push(stronger);
    }
}

fn merge_attribute(weak: &mut Attribute, strong: Attribute) {
    if !strong.type_name.is_empty() {
        weak.type_name = strong.type_name;
    }
    weak.custom |= strong.custom;
    if strong.variability == Variability::Uniform {
        weak.variability = Variability::Uniform;
    }
    if strong.default.is_some() {
        weak.default = strong.default;
        // A stronger default hides weaker samples
        weak.time_samples = None;
    }
    if !strong.connections.is_empty() {
        weak.connections = strong.connections;
    }
    if strong.time_samples.is_some() {
        weak.time_samples = strong.time_samples;
    }
    for entry in strong.metadata {
        weak.metadata.retain(|e| e.key != entry.key);
        weak.metadata.push(entry);
    }
}

fn merge_relationship(weak: &mut Relationship, strong: Relationship) {
    match strong.list_op {
        ListOp::Prepend | ListOp::Add => {
            let mut targets = strong.targets;
            for t in weak.targets.drain(..) {
                if !targets.contains(&t) {
                    targets.push(t);
                }
            }
            weak.targets = targets;
        }
        ListOp::Append => {
            for t in strong.targets {
                if !weak.targets.contains(&t) {
                    weak.targets.push(t);
                }
            }
        }
        ListOp::Delete => weak.targets.retain(|t| !strong.targets.contains(t)),
        ListOp::Explicit | ListOp::Reorder => weak.targets = strong.targets,
    }
    for entry in strong.metadata {
        weak.metadata.retain(|e| e.key != entry.key);
        weak.metadata.push(entry);
    }
}

/// (asset, prim) pairs named by a references/payload value.
fn arc_targets(value: &Value) -> Vec<(Option<String>, Option<String>)> {
    match value {
        Value::Asset(a) => vec![(Some(a.clone()), None)],
        Value::Path(p) => vec![(None, Some(p.clone()))],
        Value::Reference { asset, prim } => vec![(asset.clone(), prim.clone())],
        Value::Array(items) => items.iter().flat_map(arc_targets).collect(),
        _ => Vec::new(),
    }
}

/// A layer that took part in composition.
#[derive(Clone, Debug)]
pub struct StageLayer {
    pub path: PathBuf,
    pub layer: Layer,
}

/// A composed layer stack with its arcs resolved.
#[derive(Debug)]
struct ComposedStack {
    layers: Vec<StageLayer>,
    roots: IndexMap<String, ComposedPrim>,
}

impl ComposedStack {
    fn default_prim_path(&self) -> Option<String> {
        let root = self.layers.first()?;
        match root.layer.default_prim() {
            Some(name) => Some(format!("/{}", name.trim_start_matches('/'))),
            None => self.roots.keys().next().map(|n| format!("/{}", n)),
        }
    }
}

/// A fully composed stage.
#[derive(Debug)]
pub struct Stage {
    pub root_path: PathBuf,
    /// Local layer stack, strongest first
    pub layers: Vec<StageLayer>,
    pub roots: IndexMap<String, ComposedPrim>,
    /// Files brought in through references and payloads
    pub referenced_files: Vec<PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Stage {
    /// Open and compose `path` with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Stage, StageError> {
        Self::open_with(path, &StageOptions::default())
    }

    /// Open and compose `path`.
    ///
    /// Only a failure to read the root layer is an error; problems with
    /// sublayers and arcs become diagnostics.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &StageOptions) -> Result<Stage, StageError> {
        let root_path = path.as_ref().to_path_buf();
        let mut composer = Composer::new(options);
        let stack = composer.compose_file(&root_path)?;
        composer.cache.clear();
        let stack = Arc::try_unwrap(stack).unwrap_or_else(|shared| ComposedStack {
            layers: shared.layers.clone(),
            roots: shared.roots.clone(),
        });

        let stage = Stage {
            root_path,
            layers: stack.layers,
            roots: stack.roots,
            referenced_files: composer.referenced_files,
            diagnostics: composer.diagnostics,
        };
        log::info!(
            "Composed {} ({} layers, {} referenced files, {} diagnostics)",
            stage.root_path.display(),
            stage.layers.len(),
            stage.referenced_files.len(),
            stage.diagnostics.len()
        );
        Ok(stage)
    }

    pub fn root_layer(&self) -> Option<&Layer> {
        self.layers.first().map(|l| &l.layer)
    }

    /// Strongest layer-stack opinion for a layer metadata key.
    pub fn layer_metadata(&self, key: &str) -> Option<&Value> {
        self.layers.iter().find_map(|l| l.layer.metadata_value(key))
    }

    pub fn prim(&self, path: &str) -> Option<&ComposedPrim> {
        let mut names = split_path(path);
        let mut prim = self.roots.get(names.next()?)?;
        for name in names {
            prim = prim.children.get(name)?;
        }
        Some(prim)
    }

    /// Visit every prim, parents first.
    pub fn traverse<'a>(&'a self, mut visit: impl FnMut(&'a ComposedPrim)) {
        for root in self.roots.values() {
            root.walk(&mut visit);
        }
    }
}

const MAX_ARC_DEPTH: usize = 32;

struct Composer<'a> {
    options: &'a StageOptions,
    cache: HashMap<PathBuf, Arc<ComposedStack>>,
    in_progress: HashSet<PathBuf>,
    referenced_files: Vec<PathBuf>,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Composer<'a> {
    fn new(options: &'a StageOptions) -> Self {
        Self {
            options,
            cache: HashMap::new(),
            in_progress: HashSet::new(),
            referenced_files: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    fn compose_file(&mut self, path: &Path) -> Result<Arc<ComposedStack>, StageError> {
        let key = canonical(path);
        if let Some(stack) = self.cache.get(&key) {
            return Ok(stack.clone());
        }
        if !self.in_progress.insert(key.clone()) {
            return Err(StageError::Cycle(path.to_path_buf()));
        }

        let result = self.compose_file_uncached(path);
        self.in_progress.remove(&key);
        let stack = Arc::new(result?);
        self.cache.insert(key, stack.clone());
        Ok(stack)
    }

    fn compose_file_uncached(&mut self, path: &Path) -> Result<ComposedStack, StageError> {
        let root = read_layer(path, self.options)?;
        let mut layers = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(canonical(path));
        layers.push(StageLayer {
            path: path.to_path_buf(),
            layer: root,
        });
        self.collect_sublayers(0, &mut layers, &mut visited);

        // Weakest first so stronger layers overlay
        let mut local: IndexMap<String, ComposedPrim> = IndexMap::new();
        for stage_layer in layers.iter().rev() {
            let anchor = parent_dir(&stage_layer.path);
            for spec in &stage_layer.layer.prims {
                let path = join_path("/", &spec.name);
                let incoming = ComposedPrim::from_spec(spec, &path, &anchor);
                match local.get_mut(&spec.name) {
                    Some(existing) => existing.overlay(incoming),
                    None => {
                        local.insert(spec.name.clone(), incoming);
                    }
                }
            }
        }

        let mut roots = local.clone();
        for prim in roots.values_mut() {
            self.resolve_arcs(prim, &local, 0);
        }
        Ok(ComposedStack { layers, roots })
    }

    /// Append the sublayers of `layers[index]`, depth first.
    fn collect_sublayers(
        &mut self,
        index: usize,
        layers: &mut Vec<StageLayer>,
        visited: &mut HashSet<PathBuf>,
    ) {
        let owner = layers[index].path.clone();
        let anchor = parent_dir(&owner);
        for asset in layers[index].layer.sublayers() {
            let path = anchor.join(&asset);
            if !visited.insert(canonical(&path)) {
                self.diagnostics.push(Diagnostic::warning(
                    ErrorKind::BrokenReference,
                    owner.display().to_string(),
                    format!("sublayer cycle through {}", asset),
                ));
                continue;
            }
            match read_layer(&path, self.options) {
                Ok(layer) => {
                    log::debug!("Loaded sublayer {}", path.display());
                    layers.push(StageLayer { path, layer });
                    let new_index = layers.len() - 1;
                    self.collect_sublayers(new_index, layers, visited);
                }
                Err(err) => {
                    let kind = match err.kind() {
                        ErrorKind::MalformedDocument => ErrorKind::MalformedDocument,
                        _ => ErrorKind::BrokenReference,
                    };
                    self.diagnostics.push(Diagnostic::warning(
                        kind,
                        owner.display().to_string(),
                        format!("sublayer {} skipped: {}", asset, err),
                    ));
                }
            }
        }
    }

    fn resolve_arcs(
        &mut self,
        prim: &mut ComposedPrim,
        local: &IndexMap<String, ComposedPrim>,
        depth: usize,
    ) {
        if !prim.arcs.is_empty() {
            let arcs = std::mem::take(&mut prim.arcs);
            if depth >= MAX_ARC_DEPTH {
                for arc in arcs {
                    self.record_broken(prim, &arc, "arc nesting too deep".to_string());
                }
            } else {
                self.apply_arcs(prim, arcs, local, depth);
            }
        }
        for child in prim.children.values_mut() {
            self.resolve_arcs(child, local, depth);
        }
    }

    /// Compose arc targets underneath `prim`'s local opinions.
    fn apply_arcs(
        &mut self,
        prim: &mut ComposedPrim,
        arcs: Vec<CompositionArc>,
        local: &IndexMap<String, ComposedPrim>,
        depth: usize,
    ) {
        let mut composed: Option<ComposedPrim> = None;
        let mut resolved = Vec::new();
        // Weakest arc first
        for arc in arcs.iter().rev() {
            match self.fetch_arc_target(arc, local, depth) {
                Ok((mut target, source_path)) => {
                    target.rebase(&source_path, &prim.path);
                    target.name = prim.name.clone();
                    match &mut composed {
                        Some(base) => base.overlay(target),
                        None => composed = Some(target),
                    }
                    resolved.push(arc.clone());
                }
                Err(reason) => self.record_broken(prim, arc, reason),
            }
        }

        if let Some(base) = composed {
            let mut local_opinions = std::mem::replace(prim, base);
            local_opinions.arcs.clear();
            prim.overlay(local_opinions);
        }
        resolved.reverse();
        prim.resolved_arcs.extend(resolved);
    }

    /// Load the prim an arc points at. Returns the subtree and its source path.
    fn fetch_arc_target(
        &mut self,
        arc: &CompositionArc,
        local: &IndexMap<String, ComposedPrim>,
        depth: usize,
    ) -> Result<(ComposedPrim, String), String> {
        match &arc.asset {
            None => {
                let target_path = arc
                    .prim
                    .clone()
                    .ok_or_else(|| "reference without asset or prim path".to_string())?;
                let mut target = find_prim(local, &target_path)
                    .cloned()
                    .ok_or_else(|| format!("internal target {} not found", target_path))?;
                self.resolve_arcs(&mut target, local, depth + 1);
                Ok((target, target_path))
            }
            Some(asset) => {
                let path = arc.anchor.join(asset);
                if !path.exists() {
                    return Err(format!("{} not found", path.display()));
                }
                let stack = self.compose_file(&path).map_err(|e| e.to_string())?;
                if !self.referenced_files.contains(&path) {
                    self.referenced_files.push(path.clone());
                }
                let target_path = match &arc.prim {
                    Some(p) => p.clone(),
                    None => stack
                        .default_prim_path()
                        .ok_or_else(|| format!("{} has no prims", asset))?,
                };
                let target = find_prim(&stack.roots, &target_path)
                    .cloned()
                    .ok_or_else(|| format!("{} has no prim {}", asset, target_path))?;
                Ok((target, target_path))
            }
        }
    }

    fn record_broken(&mut self, prim: &mut ComposedPrim, arc: &CompositionArc, reason: String) {
        let asset = match (&arc.asset, &arc.prim) {
            (Some(a), Some(p)) => format!("@{}@<{}>", a, p),
            (Some(a), None) => format!("@{}@", a),
            (None, Some(p)) => format!("<{}>", p),
            (None, None) => String::new(),
        };
        self.diagnostics.push(Diagnostic::warning(
            ErrorKind::BrokenReference,
            prim.path.clone(),
            format!("{:?} {} unresolved: {}", arc.kind, asset, reason),
        ));
        prim.broken_arcs.push(BrokenArc {
            kind: arc.kind,
            asset,
            reason,
        });
    }
}

fn find_prim<'m>(roots: &'m IndexMap<String, ComposedPrim>, path: &str) -> Option<&'m ComposedPrim> {
    let mut names = split_path(path);
    let mut prim = roots.get(names.next()?)?;
    for name in names {
        prim = prim.children.get(name)?;
    }
    Some(prim)
}

fn parent_dir(path: &Path) -> PathBuf {
    path.parent().map(Path::to_path_buf).unwrap_or_default()
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Path of `file` as authored in a layer that lives in `dir`: relative with
/// forward slashes, absolute when the two share no root.
pub fn relative_asset_path(dir: &Path, file: &Path) -> String {
    let file = lexical_normalize(file);
    let dir = lexical_normalize(dir);
    let same_root = file.components().next() == dir.components().next();
    if !same_root {
        return file.to_string_lossy().replace('\\', "/");
    }
    let common = file
        .components()
        .zip(dir.components())
        .take_while(|(a, b)| a == b)
        .count();
    let ups = dir.components().count() - common;
    let mut parts: Vec<String> = vec!["..".to_string(); ups];
    parts.extend(
        file.components()
            .skip(common)
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

/// Resolve `.` and `..` without touching the filesystem.
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
