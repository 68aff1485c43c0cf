//! `remix` - command line front end for captures, mod projects and textures.
//!
//! Scenes cross the command line as JSON: `inspect --json` writes one,
//! `export` reads one back and authors it into the project's target layer.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use remix_core::batch::{Progress, ProgressFn};
use remix_core::texture::{texture_stem, ConversionCache, ConversionJob};
use remix_core::{
    import_batch, read_scene, BatchOutcome, CancellationToken, Diagnostic, HostAdapter,
    JsonAdapter, LayerManager, OperationStatus, ProjectSession, ReadOptions, SessionConfig,
    TextureConverter, TextureRole,
};

/// File next to `mod.usda` remembering the export target between runs.
const TARGET_FILE: &str = ".remix-target";

#[derive(Parser, Debug)]
#[command(name = "remix", version, about = "RTX Remix capture and mod tools")]
struct Cli {
    #[command(flatten)]
    settings: Settings,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct Settings {
    /// JSON session config
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// texconv-compatible executable
    #[arg(long, global = true)]
    texconv: Option<PathBuf>,

    #[arg(long, global = true)]
    usdcat: Option<PathBuf>,

    /// Conversion cache directory
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Concurrent tool invocations
    #[arg(long, global = true)]
    workers: Option<usize>,
}

impl Settings {
    /// Defaults, then the config file, then `REMIX_*` variables, then flags.
    fn resolve(&self) -> Result<SessionConfig> {
        let config = match &self.config {
            Some(path) => SessionConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => SessionConfig::default(),
        };
        let mut config = config
            .with_env()
            .context("Invalid REMIX_* environment override")?;
        if let Some(texconv) = &self.texconv {
            config.texconv = Some(texconv.clone());
        }
        if let Some(usdcat) = &self.usdcat {
            config.usdcat = Some(usdcat.clone());
        }
        if let Some(dir) = &self.cache_dir {
            config.cache_dir = dir.clone();
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers.max(1);
        }
        Ok(config)
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a capture or mod layer and summarize it
    Inspect {
        file: PathBuf,
        /// Write the scene as JSON
        #[arg(long)]
        json: Option<PathBuf>,
        /// Convert referenced textures to PNG
        #[arg(long)]
        extract_textures: bool,
    },
    /// Read several captures in parallel
    Import {
        #[arg(required = true)]
        captures: Vec<PathBuf>,
        /// Write each scene as `<dir>/<name>.json`
        #[arg(long)]
        out_dir: Option<PathBuf>,
        #[arg(long)]
        extract_textures: bool,
    },
    /// Create a project root layer
    NewProject {
        path: PathBuf,
        #[arg(long)]
        game: Option<String>,
    },
    /// List the project's layers, strongest first
    Layers { project: PathBuf },
    /// Choose the layer exports are written to
    SetTarget { project: PathBuf, layer: String },
    /// Add an existing layer file to the sublayer list
    AddSublayer {
        project: PathBuf,
        path: PathBuf,
        /// Sublayer index, 0 = strongest
        #[arg(long)]
        position: Option<usize>,
    },
    /// Create a new replacement layer under `subUSDAs/`
    CreateSublayer {
        project: PathBuf,
        name: String,
        #[arg(long)]
        position: Option<usize>,
        /// Also make it the export target
        #[arg(long)]
        target: bool,
    },
    RemoveSublayer { project: PathBuf, layer: String },
    /// Author an edited scene into the target layer
    Export {
        project: PathBuf,
        /// Scene JSON, as written by `inspect --json`
        scene: PathBuf,
        /// Target layer for this export only
        #[arg(long)]
        target: Option<String>,
    },
    Textures {
        #[command(subcommand)]
        action: TextureCommand,
    },
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
}

#[derive(Subcommand, Debug)]
enum TextureCommand {
    /// Decode textures to PNG in the cache
    ToPng {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Encode rasters to the runtime DDS format
    ToDds {
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        out_dir: PathBuf,
        /// Texture role; inferred from each file name when omitted
        #[arg(long, value_parser = parse_role)]
        role: Option<TextureRole>,
    },
    /// Validate DDS files and rebuild broken ones
    Repair {
        project: PathBuf,
        /// Directory to scan instead of the project directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum CacheCommand {
    /// Delete every cached conversion
    Clear,
}

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.settings.resolve()?;
    log::debug!("Session config: {:?}", config);

    match cli.command {
        Command::Inspect {
            file,
            json,
            extract_textures,
        } => inspect(&file, json.as_deref(), extract_textures, &config),
        Command::Import {
            captures,
            out_dir,
            extract_textures,
        } => import(&captures, out_dir.as_deref(), extract_textures, &config),
        Command::NewProject { path, game } => {
            LayerManager::new()
                .create_project(&path, game.as_deref())
                .with_context(|| format!("Failed to create project {}", path.display()))?;
            println!("Created {}", path.display());
            Ok(())
        }
        Command::Layers { project } => {
            let session = open_project(&project, config, false)?;
            print_layers(&session);
            Ok(())
        }
        Command::SetTarget { project, layer } => {
            let session = open_project(&project, config, false)?;
            session.edit_layers(|m| m.set_target_layer(&layer))?;
            save_target(&project, &session.target()?.id)?;
            print_layers(&session);
            Ok(())
        }
        Command::AddSublayer {
            project,
            path,
            position,
        } => {
            let session = open_project(&project, config, false)?;
            let id = session.edit_layers(|m| {
                let id = m.add_sublayer(&path, position)?;
                m.flush()?;
                Ok(id)
            })?;
            println!("Added {}", id);
            print_layers(&session);
            Ok(())
        }
        Command::CreateSublayer {
            project,
            name,
            position,
            target,
        } => {
            let session = open_project(&project, config, false)?;
            let id = session.edit_layers(|m| {
                let id = m.create_sublayer(&name, position)?;
                if target {
                    m.set_target_layer(&id)?;
                }
                m.flush()?;
                Ok(id)
            })?;
            if target {
                save_target(&project, &id)?;
            }
            println!("Created {}", id);
            print_layers(&session);
            Ok(())
        }
        Command::RemoveSublayer { project, layer } => {
            let session = open_project(&project, config, false)?;
            let removed = session.edit_layers(|m| {
                let removed = m.remove_sublayer(&layer)?;
                m.flush()?;
                Ok(removed)
            })?;
            if removed.is_target {
                save_target(&project, &session.target()?.id)?;
            }
            println!("Removed {}", removed.id);
            print_layers(&session);
            Ok(())
        }
        Command::Export {
            project,
            scene,
            target,
        } => export(&project, &scene, target.as_deref(), config),
        Command::Textures { action } => textures(action, config),
        Command::Cache {
            action: CacheCommand::Clear,
        } => {
            let cache = ConversionCache::open(&config.cache_dir)
                .with_context(|| format!("Failed to open cache {}", config.cache_dir.display()))?;
            let removed = cache.clear()?;
            println!("Removed {} cached conversions", removed);
            Ok(())
        }
    }
}

fn inspect(
    file: &Path,
    json: Option<&Path>,
    extract_textures: bool,
    config: &SessionConfig,
) -> Result<()> {
    let options = read_options(config, extract_textures)?;
    let report =
        read_scene(file, &options).with_context(|| format!("Failed to read {}", file.display()))?;
    let scene = &report.scene;

    println!("Scene: {}", scene.name);
    println!("  Up axis: {}", scene.up_axis.as_token());
    println!("  Meters per unit: {}", scene.meters_per_unit);
    println!("  Layers: {}", scene.layers.len());
    println!("  Prims: {}", scene.prim_count());
    println!("  Meshes: {}", scene.mesh_count());
    println!("  Lights: {}", scene.light_count());
    for camera in scene.cameras() {
        if let Some(data) = &camera.camera {
            println!(
                "  Camera {}: {:.1}mm, {:.1} deg vertical",
                camera.path,
                data.focal_length,
                data.fov_y().to_degrees()
            );
        }
    }
    print_diagnostics(&report.diagnostics);

    if let Some(json) = json {
        JsonAdapter::new(json).apply_scene(scene)?;
        println!("Wrote {}", json.display());
    }
    println!("Status: {:?}", report.status());
    Ok(())
}

fn import(
    captures: &[PathBuf],
    out_dir: Option<&Path>,
    extract_textures: bool,
    config: &SessionConfig,
) -> Result<()> {
    let options = read_options(config, extract_textures)?;
    let progress: ProgressFn<'_> = &log_progress;
    let outcome = import_batch(captures, &options, &CancellationToken::new(), Some(progress));

    for (item, scene) in &outcome.successes {
        println!("{}: {} prims, {} meshes", item, scene.prim_count(), scene.mesh_count());
        if let Some(dir) = out_dir {
            let path = dir.join(format!("{}.json", scene.name));
            JsonAdapter::new(&path).apply_scene(scene)?;
        }
    }
    finish(&outcome)
}

fn export(project: &Path, scene: &Path, target: Option<&str>, config: SessionConfig) -> Result<()> {
    let session = open_project(project, config, true)?;
    if let Some(target) = target {
        session.edit_layers(|m| m.set_target_layer(target))?;
    }
    let scene = JsonAdapter::new(scene)
        .collect_edits()
        .with_context(|| format!("Failed to read scene {}", scene.display()))?;

    let progress: ProgressFn<'_> = &log_progress;
    let report = session.export(&scene, &CancellationToken::new(), Some(progress))?;

    println!("Exported to {}", report.target.display());
    println!("  Prims written: {}", report.written_prims.len());
    println!("  Textures: {}", report.textures.len());
    for notes in &report.material_notes {
        for note in &notes.notes {
            println!("  {}: {} {}", notes.material, note.feature.description(), note.inputs.join(", "));
        }
    }
    for failure in &report.failures {
        println!("  FAILED {} [{}]: {}", failure.item, failure.kind, failure.message);
    }
    print_diagnostics(&report.diagnostics);

    match report.status() {
        OperationStatus::Failure => bail!("Export failed"),
        status => {
            println!("Status: {:?}", status);
            Ok(())
        }
    }
}

fn textures(action: TextureCommand, config: SessionConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let progress: ProgressFn<'_> = &log_progress;
    match action {
        TextureCommand::ToPng { files } => {
            let converter = converter(&config)?;
            let jobs: Vec<ConversionJob> = files
                .into_iter()
                .map(|source| ConversionJob::ToEditable { source })
                .collect();
            finish(&converter.convert_batch(&jobs, &cancel, Some(progress)))
        }
        TextureCommand::ToDds {
            files,
            out_dir,
            role,
        } => {
            let converter = converter(&config)?;
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            let jobs: Vec<ConversionJob> = files
                .into_iter()
                .map(|raster| {
                    let role = role.unwrap_or_else(|| {
                        TextureRole::infer(
                            raster.file_name().and_then(|n| n.to_str()).unwrap_or_default(),
                        )
                    });
                    ConversionJob::ToRuntime {
                        stem: texture_stem(&raster),
                        raster,
                        role,
                        dest_dir: out_dir.clone(),
                    }
                })
                .collect();
            finish(&converter.convert_batch(&jobs, &cancel, Some(progress)))
        }
        TextureCommand::Repair { project, dir } => {
            let session = open_project(&project, config, true)?;
            let outcome = session.repair_textures(dir.as_deref(), &cancel, Some(progress))?;
            finish(&outcome)
        }
    }
}

fn read_options(config: &SessionConfig, extract_textures: bool) -> Result<ReadOptions> {
    let options = ReadOptions::from_config(config);
    if extract_textures {
        Ok(options.with_converter(Arc::new(converter(config)?)))
    } else {
        Ok(options)
    }
}

fn converter(config: &SessionConfig) -> Result<TextureConverter> {
    TextureConverter::from_config(config).with_context(|| {
        format!(
            "Failed to set up texture conversion in {}",
            config.cache_dir.display()
        )
    })
}

/// Open a project and restore the export target saved by `set-target`.
fn open_project(root: &Path, config: SessionConfig, textures: bool) -> Result<ProjectSession> {
    let converter = if textures {
        Some(Arc::new(converter(&config)?))
    } else {
        None
    };
    let session = ProjectSession::open_with(root, config, converter)
        .with_context(|| format!("Failed to open project {}", root.display()))?;

    if let Some(id) = load_target(root)? {
        if let Err(e) = session.edit_layers(|m| m.set_target_layer(&id)) {
            log::warn!("Saved target {} is no longer usable: {}", id, e);
        }
    }
    Ok(session)
}

fn target_file(root: &Path) -> PathBuf {
    root.parent()
        .map(|dir| dir.join(TARGET_FILE))
        .unwrap_or_else(|| PathBuf::from(TARGET_FILE))
}

fn load_target(root: &Path) -> Result<Option<String>> {
    let path = target_file(root);
    if !path.is_file() {
        return Ok(None);
    }
    let id = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let id = id.trim();
    Ok((!id.is_empty()).then(|| id.to_string()))
}

fn save_target(root: &Path, id: &str) -> Result<()> {
    let path = target_file(root);
    std::fs::write(&path, format!("{}\n", id))
        .with_context(|| format!("Failed to write {}", path.display()))
}

fn parse_role(name: &str) -> Result<TextureRole, String> {
    TextureRole::ALL
        .iter()
        .copied()
        .find(|role| role.name() == name)
        .ok_or_else(|| {
            let names: Vec<&str> = TextureRole::ALL.iter().map(|r| r.name()).collect();
            format!("expected one of {}", names.join(", "))
        })
}

fn log_progress(progress: Progress) {
    log::info!(
        "[{}/{}] {}",
        progress.completed,
        progress.total,
        progress.item
    );
}

fn print_layers(session: &ProjectSession) {
    println!("Project ({})", session.state());
    for layer in session.layers() {
        println!(
            "  {}{} {}{}",
            if layer.is_target { "*" } else { " " },
            layer.order,
            layer.id,
            if layer.missing { " (missing)" } else { "" }
        );
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    println!("Diagnostics:");
    for diagnostic in diagnostics {
        println!("  {}", diagnostic);
    }
}

/// Print a batch summary; a batch where nothing succeeded is an error.
fn finish<T: std::fmt::Debug>(outcome: &BatchOutcome<T>) -> Result<()> {
    for (item, result) in &outcome.successes {
        log::debug!("{}: {:?}", item, result);
    }
    for failure in &outcome.failures {
        println!("FAILED {} [{}]: {}", failure.item, failure.kind, failure.message);
    }
    print_diagnostics(&outcome.diagnostics);
    println!(
        "{} succeeded, {} failed{}",
        outcome.successes.len(),
        outcome.failures.len(),
        if outcome.cancelled { ", cancelled" } else { "" }
    );
    match outcome.status() {
        OperationStatus::Failure => bail!("Nothing succeeded"),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_export_with_target() {
        let cli = Cli::parse_from([
            "remix",
            "--workers",
            "2",
            "export",
            "mod.usda",
            "scene.json",
            "--target",
            "subUSDAs/b.usda",
        ]);
        assert_eq!(cli.settings.workers, Some(2));
        match cli.command {
            Command::Export { target, .. } => assert_eq!(target.as_deref(), Some("subUSDAs/b.usda")),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_parse_role() {
        assert_eq!(parse_role("normal").unwrap(), TextureRole::Normal);
        assert!(parse_role("diffuse").is_err());
    }

    #[test]
    fn test_target_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("mod.usda");
        LayerManager::new().create_project(&root, None).unwrap();
        let config = SessionConfig::default();

        let session = open_project(&root, config.clone(), false).unwrap();
        let id = session
            .edit_layers(|m| {
                let id = m.create_sublayer("props", None)?;
                m.flush()?;
                Ok(id)
            })
            .unwrap();
        save_target(&root, &id).unwrap();

        let reopened = open_project(&root, config, false).unwrap();
        assert_eq!(reopened.target().unwrap().id, "subUSDAs/props.usda");
    }
}
