//! Texture conversion through an external tool.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use image::ImageFormat;

use crate::batch::{run_batch, BatchOutcome, CancellationToken, ItemFailure, ProgressFn};
use crate::config::SessionConfig;
use crate::error::{Diagnostic, ErrorKind};
use crate::tool::run_tool;

use super::cache::ConversionCache;
use super::dds::inspect_dds;
use super::{
    content_hash, texture_stem, EditableTexture, Payload, PayloadFormat, TextureAsset,
    TextureError, TextureResult, TextureRole,
};

/// Output requested from a conversion tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConversionTarget {
    Png,
    /// DDS in the named DXGI format
    Dds(String),
}

impl ConversionTarget {
    pub fn cache_key(&self) -> String {
        match self {
            ConversionTarget::Png => "png".to_string(),
            ConversionTarget::Dds(format) => format!("dds:{}", format),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ConversionTarget::Png => "png",
            ConversionTarget::Dds(_) => "dds",
        }
    }
}

/// An external format converter.
pub trait ConversionTool: Send + Sync {
    /// Convert `input` into `out_dir` and return the file written.
    fn convert(
        &self,
        input: &Path,
        out_dir: &Path,
        target: &ConversionTarget,
    ) -> TextureResult<PathBuf>;
}

/// texconv, or any executable with the same command line.
#[derive(Clone, Debug)]
pub struct TexconvTool {
    program: PathBuf,
    dds_timeout: Duration,
    png_timeout: Duration,
}

impl TexconvTool {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            dds_timeout: Duration::from_secs(60),
            png_timeout: Duration::from_secs(30),
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            program: config.texconv_program(),
            dds_timeout: Duration::from_secs(config.dds_timeout_secs),
            png_timeout: Duration::from_secs(config.png_timeout_secs),
        }
    }

    /// `<src> -o <dir> -ft png|dds [-f FMT -m 0] -y -nologo`
    pub fn arguments(input: &Path, out_dir: &Path, target: &ConversionTarget) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            input.into(),
            "-o".into(),
            out_dir.into(),
            "-ft".into(),
            target.extension().into(),
        ];
        if let ConversionTarget::Dds(format) = target {
            args.extend(["-f".into(), format.into(), "-m".into(), "0".into()]);
        }
        args.extend(["-y".into(), "-nologo".into()]);
        args
    }
}

impl ConversionTool for TexconvTool {
    fn convert(
        &self,
        input: &Path,
        out_dir: &Path,
        target: &ConversionTarget,
    ) -> TextureResult<PathBuf> {
        let timeout = match target {
            ConversionTarget::Png => self.png_timeout,
            ConversionTarget::Dds(_) => self.dds_timeout,
        };
        let args = Self::arguments(input, out_dir, target);
        run_tool(&self.program, &args, timeout).map_err(|source| TextureError::Tool {
            path: input.to_path_buf(),
            source,
        })?;

        let stem = input
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let expected = out_dir.join(format!("{}.{}", stem, target.extension()));
        if !expected.is_file() {
            return Err(TextureError::MissingOutput {
                input: input.to_path_buf(),
                expected,
            });
        }
        Ok(expected)
    }
}

/// One unit of a conversion batch.
#[derive(Clone, Debug, PartialEq)]
pub enum ConversionJob {
    /// Texture file to PNG in the cache
    ToEditable { source: PathBuf },
    /// Raster to `<dest_dir>/<stem><role suffix>.dds`
    ToRuntime {
        raster: PathBuf,
        role: TextureRole,
        dest_dir: PathBuf,
        stem: String,
    },
}

impl ConversionJob {
    fn label(&self) -> String {
        match self {
            ConversionJob::ToEditable { source } => source.display().to_string(),
            ConversionJob::ToRuntime { raster, .. } => raster.display().to_string(),
        }
    }
}

/// Result of checking one DDS file for repair.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum RepairOutcome {
    Valid,
    /// Re-encoded from a raster found next to it
    Regenerated { source: PathBuf },
    /// Broken with no raster to rebuild from
    NeedsManualReplacement { reason: String },
}

/// Cached, parallel texture conversion.
pub struct TextureConverter {
    tool: Arc<dyn ConversionTool>,
    cache: ConversionCache,
    pool: rayon::ThreadPool,
}

impl TextureConverter {
    pub fn new(
        tool: Arc<dyn ConversionTool>,
        cache: ConversionCache,
        max_workers: usize,
    ) -> TextureResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(max_workers.max(1))
            .thread_name(|i| format!("remix-texture-{}", i))
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self { tool, cache, pool })
    }

    /// texconv and the cache directory from `config`.
    pub fn from_config(config: &SessionConfig) -> TextureResult<Self> {
        let cache = ConversionCache::open(&config.cache_dir)?;
        Self::new(
            Arc::new(TexconvTool::from_config(config)),
            cache,
            config.max_workers,
        )
    }

    pub fn cache(&self) -> &ConversionCache {
        &self.cache
    }

    pub fn max_workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Decode `asset` into a PNG in the cache.
    ///
    /// Compressed input is validated first; a broken header is
    /// `InvalidData`, never handed to the tool.
    pub fn to_editable(&self, asset: &TextureAsset) -> TextureResult<EditableTexture> {
        let source = &asset.canonical.path;
        let bytes = std::fs::read(source)?;
        match asset.canonical.format {
            PayloadFormat::Raster if bytes.starts_with(b"\x89PNG") => {
                return describe_png(source, &bytes, &asset.hash);
            }
            PayloadFormat::Dds => {
                inspect_dds(&bytes).map_err(|reason| TextureError::InvalidData {
                    path: source.clone(),
                    reason,
                })?;
            }
            PayloadFormat::Raster => {}
        }

        let hash = content_hash(&bytes);
        self.cache.note_source(source, &hash)?;
        let target = ConversionTarget::Png;
        let (png, hit) =
            self.cache
                .get_or_insert_with(&hash, &target.cache_key(), "png", |dest| {
                    self.run_tool_into(source, &hash, &target, dest)?;
                    let produced = std::fs::read(dest)?;
                    describe_png(dest, &produced, &hash).map(|_| ()).inspect_err(|_| {
                        let _ = std::fs::remove_file(dest);
                    })
                })?;
        log::debug!(
            "{} -> {}{}",
            source.display(),
            png.display(),
            if hit { " (cached)" } else { "" }
        );
        let png_bytes = std::fs::read(&png)?;
        describe_png(&png, &png_bytes, &hash)
    }

    /// Encode a raster into the runtime format for `role`, or `target_format`
    /// when given. The returned asset's canonical payload is the cached DDS
    /// and its derived payload the raster.
    pub fn to_runtime_format(
        &self,
        raster: &Path,
        role: TextureRole,
        target_format: Option<&str>,
    ) -> TextureResult<TextureAsset> {
        if !raster.is_file() {
            return Err(TextureError::NotFound(raster.to_path_buf()));
        }
        let bytes = std::fs::read(raster)?;
        let hash = content_hash(&bytes);
        let target = ConversionTarget::Dds(
            target_format.unwrap_or(role.runtime_format()).to_string(),
        );
        self.cache.note_source(raster, &hash)?;

        let (dds, hit) =
            self.cache
                .get_or_insert_with(&hash, &target.cache_key(), "dds", |dest| {
                    self.run_tool_into(raster, &hash, &target, dest)?;
                    let produced = std::fs::read(dest)?;
                    inspect_dds(&produced).map(|_| ()).map_err(|reason| {
                        let _ = std::fs::remove_file(dest);
                        TextureError::BadOutput {
                            path: dest.to_path_buf(),
                            message: reason.to_string(),
                        }
                    })
                })?;
        log::debug!(
            "{} -> {}{}",
            raster.display(),
            target.cache_key(),
            if hit { " (cached)" } else { "" }
        );

        let dds_bytes = std::fs::read(&dds)?;
        Ok(TextureAsset {
            hash: content_hash(&dds_bytes),
            role,
            name: texture_stem(raster),
            canonical: Payload {
                format: PayloadFormat::Dds,
                path: dds,
            },
            derived: Some(Payload {
                format: PayloadFormat::Raster,
                path: raster.to_path_buf(),
            }),
        })
    }

    /// Convert a raster and place it at `<dest_dir>/<stem><role suffix>.dds`.
    pub fn write_runtime(
        &self,
        raster: &Path,
        role: TextureRole,
        dest_dir: &Path,
        stem: &str,
    ) -> TextureResult<PathBuf> {
        let asset = self.to_runtime_format(raster, role, None)?;
        let dest = dest_dir.join(format!("{}{}.dds", stem, role.suffix()));
        place_file(&asset.canonical.path, &dest)?;
        Ok(dest)
    }

    /// Run conversion jobs on the worker pool. Failures are per job.
    pub fn convert_batch(
        &self,
        jobs: &[ConversionJob],
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> BatchOutcome<PathBuf> {
        let outcome = self.pool.install(|| {
            run_batch(jobs, cancel, progress, ConversionJob::label, |job| {
                self.run_job(job)
                    .map_err(|e| ItemFailure::new(job.label(), e.kind(), e.to_string()))
            })
        });
        log::info!(
            "Converted {} of {} textures ({} failed{})",
            outcome.successes.len(),
            jobs.len(),
            outcome.failures.len(),
            if outcome.cancelled { ", cancelled" } else { "" }
        );
        outcome
    }

    fn run_job(&self, job: &ConversionJob) -> TextureResult<PathBuf> {
        match job {
            ConversionJob::ToEditable { source } => {
                let asset = TextureAsset::from_file(source, None)?;
                Ok(self.to_editable(&asset)?.path)
            }
            ConversionJob::ToRuntime {
                raster,
                role,
                dest_dir,
                stem,
            } => self.write_runtime(raster, *role, dest_dir, stem),
        }
    }

    /// Check a DDS file and rebuild it from `raster` (or a raster found next
    /// to it) when invalid.
    pub fn repair(&self, dds: &Path, raster: Option<&Path>) -> TextureResult<RepairOutcome> {
        let bytes = std::fs::read(dds)?;
        let reason = match inspect_dds(&bytes) {
            Ok(_) => return Ok(RepairOutcome::Valid),
            Err(reason) => reason,
        };
        log::warn!("Invalid texture {}: {}", dds.display(), reason);

        let source = match raster.map(Path::to_path_buf).or_else(|| find_raster_source(dds)) {
            Some(source) => source,
            None => {
                return Ok(RepairOutcome::NeedsManualReplacement {
                    reason: reason.to_string(),
                })
            }
        };
        let file_name = dds.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let role = TextureRole::infer(file_name);
        let asset = self.to_runtime_format(&source, role, None)?;
        place_file(&asset.canonical.path, dds)?;
        log::info!("Regenerated {} from {}", dds.display(), source.display());
        Ok(RepairOutcome::Regenerated { source })
    }

    /// Repair every `.dds` under `root`.
    pub fn repair_directory(
        &self,
        root: &Path,
        cancel: &CancellationToken,
        progress: Option<ProgressFn<'_>>,
    ) -> TextureResult<BatchOutcome<RepairOutcome>> {
        let mut files = Vec::new();
        collect_dds_files(root, &mut files)?;
        files.sort();

        let mut outcome = self.pool.install(|| {
            run_batch(
                &files,
                cancel,
                progress,
                |path| path.display().to_string(),
                |path| {
                    self.repair(path, None).map_err(|e| {
                        ItemFailure::new(path.display().to_string(), e.kind(), e.to_string())
                    })
                },
            )
        });
        for (item, result) in &outcome.successes {
            if let RepairOutcome::NeedsManualReplacement { reason } = result {
                outcome.diagnostics.push(Diagnostic::warning(
                    ErrorKind::InvalidTextureData,
                    item.clone(),
                    format!("needs manual replacement: {}", reason),
                ));
            }
        }
        log::info!(
            "Checked {} textures under {}",
            outcome.total(),
            root.display()
        );
        Ok(outcome)
    }

    fn run_tool_into(
        &self,
        input: &Path,
        hash: &str,
        target: &ConversionTarget,
        dest: &Path,
    ) -> TextureResult<()> {
        let work = self.cache.work_dir(hash, &target.cache_key());
        let out_dir = work.join("out");
        std::fs::create_dir_all(&out_dir)?;

        // Stage under the hash so the tool's output name is known
        let extension = input
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin");
        let staged = work.join(format!("{}.{}", hash, extension));
        let result = std::fs::copy(input, &staged)
            .map_err(TextureError::from)
            .and_then(|_| self.tool.convert(&staged, &out_dir, target))
            .and_then(|produced| place_file(&produced, dest));

        if let Err(e) = std::fs::remove_dir_all(&work) {
            log::debug!("Could not remove {}: {}", work.display(), e);
        }
        result
    }
}

fn describe_png(path: &Path, bytes: &[u8], source_hash: &str) -> TextureResult<EditableTexture> {
    let image = image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(|source| {
        TextureError::Decode {
            path: path.to_path_buf(),
            source,
        }
    })?;
    let has_alpha =
        image.color().has_alpha() && image.to_rgba8().pixels().any(|p| p.0[3] < u8::MAX);
    Ok(EditableTexture {
        path: path.to_path_buf(),
        width: image.width(),
        height: image.height(),
        has_alpha,
        source_hash: source_hash.to_string(),
    })
}

/// Copy `src` over `dest` through a temporary file in the same directory.
pub(crate) fn place_file(src: &Path, dest: &Path) -> TextureResult<()> {
    let dir = dest.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir)?;
    let name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("texture");
    let tmp = dir.join(format!(".{}.tmp", name));
    std::fs::copy(src, &tmp)?;
    std::fs::rename(&tmp, dest)?;
    Ok(())
}

/// A raster next to `dds` with the same stem, with or without the role suffix.
fn find_raster_source(dds: &Path) -> Option<PathBuf> {
    let dir = dds.parent()?;
    let full_stem = dds.file_stem()?.to_str()?;
    let bare_stem = texture_stem(dds);
    [full_stem, bare_stem.as_str()]
        .iter()
        .flat_map(|stem| {
            ["png", "tga", "jpg", "jpeg"]
                .iter()
                .map(move |ext| dir.join(format!("{}.{}", stem, ext)))
        })
        .find(|candidate| candidate.is_file())
}

fn collect_dds_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_dds_files(&path, out)?;
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("dds"))
        {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::dds::test_dds;
    use super::*;
    use crate::batch::OperationStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Writes a fixed payload for each target, counting invocations.
    #[derive(Default)]
    struct ScriptedTool {
        calls: AtomicUsize,
        broken_dds: bool,
        fail_on: Option<String>,
    }

    impl ConversionTool for ScriptedTool {
        fn convert(
            &self,
            input: &Path,
            out_dir: &Path,
            target: &ConversionTarget,
        ) -> TextureResult<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let stem = input.file_stem().unwrap().to_str().unwrap();
            let out = out_dir.join(format!("{}.{}", stem, target.extension()));
            if let Some(fail) = &self.fail_on {
                if std::fs::read(input)? == fail.as_bytes() {
                    return Err(TextureError::MissingOutput {
                        input: input.to_path_buf(),
                        expected: out,
                    });
                }
            }
            match target {
                ConversionTarget::Png => {
                    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([200, 10, 10, 128]));
                    img.save_with_format(&out, ImageFormat::Png).unwrap();
                }
                ConversionTarget::Dds(_) if self.broken_dds => std::fs::write(&out, b"DDS ")?,
                ConversionTarget::Dds(_) => std::fs::write(&out, test_dds(4, 4, 99, 1))?,
            }
            Ok(out)
        }
    }

    fn converter(tool: Arc<ScriptedTool>, dir: &Path) -> TextureConverter {
        let cache = ConversionCache::open(dir.join("cache")).unwrap();
        TextureConverter::new(tool, cache, 2).unwrap()
    }

    #[test]
    fn test_texconv_arguments() {
        let args = TexconvTool::arguments(
            Path::new("in.png"),
            Path::new("out"),
            &ConversionTarget::Dds("BC5_UNORM".into()),
        );
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            ["in.png", "-o", "out", "-ft", "dds", "-f", "BC5_UNORM", "-m", "0", "-y", "-nologo"]
        );

        let args = TexconvTool::arguments(Path::new("in.dds"), Path::new("out"), &ConversionTarget::Png);
        assert_eq!(args.len(), 7);
    }

    #[test]
    fn test_to_runtime_is_cached() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let conv = converter(tool.clone(), dir.path());
        let raster = dir.path().join("wall.png");
        std::fs::write(&raster, b"raster bytes").unwrap();

        let first = conv.to_runtime_format(&raster, TextureRole::Albedo, None).unwrap();
        let second = conv.to_runtime_format(&raster, TextureRole::Albedo, None).unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.canonical, second.canonical);
        assert_eq!(first.derived.unwrap().path, raster);

        // Different format is a different key
        conv.to_runtime_format(&raster, TextureRole::Albedo, Some("BC1_UNORM"))
            .unwrap();
        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_concurrent_requests_run_tool_once() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let conv = converter(tool.clone(), dir.path());
        let raster = dir.path().join("wall.png");
        std::fs::write(&raster, b"raster bytes").unwrap();

        std::thread::scope(|scope| {
            for _ in 0..6 {
                scope.spawn(|| {
                    conv.to_runtime_format(&raster, TextureRole::Normal, None)
                        .unwrap();
                });
            }
        });
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_bad_tool_output_is_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool {
            broken_dds: true,
            ..Default::default()
        });
        let conv = converter(tool, dir.path());
        let raster = dir.path().join("wall.png");
        std::fs::write(&raster, b"raster bytes").unwrap();

        let err = conv
            .to_runtime_format(&raster, TextureRole::Albedo, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConversionFailure);
        assert!(conv.cache().is_empty());
    }

    #[test]
    fn test_to_editable_validates_and_reports_alpha() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let conv = converter(tool.clone(), dir.path());

        let good = dir.path().join("good.a.rtex.dds");
        std::fs::write(&good, test_dds(8, 8, 99, 1)).unwrap();
        let asset = TextureAsset::from_file(&good, None).unwrap();
        let editable = conv.to_editable(&asset).unwrap();
        assert_eq!((editable.width, editable.height), (2, 2));
        assert!(editable.has_alpha);

        let bad = dir.path().join("bad.dds");
        std::fs::write(&bad, b"DDS not really").unwrap();
        let asset = TextureAsset::from_file(&bad, None).unwrap();
        let err = conv.to_editable(&asset).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTextureData);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_batch_isolates_failures() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool {
            fail_on: Some("poison".into()),
            ..Default::default()
        });
        let conv = converter(tool, dir.path());
        let out = dir.path().join("textures");

        let mut jobs = Vec::new();
        for (name, content) in [("a", "one"), ("b", "poison"), ("c", "three")] {
            let raster = dir.path().join(format!("{}.png", name));
            std::fs::write(&raster, content).unwrap();
            jobs.push(ConversionJob::ToRuntime {
                raster,
                role: TextureRole::Roughness,
                dest_dir: out.clone(),
                stem: name.to_string(),
            });
        }

        let outcome = conv.convert_batch(&jobs, &CancellationToken::new(), None);
        assert_eq!(outcome.status(), OperationStatus::PartialSuccess);
        assert_eq!(outcome.successes.len(), 2);
        assert_eq!(outcome.failures[0].kind, ErrorKind::ConversionFailure);
        assert!(out.join("a.r.rtex.dds").is_file());
        assert!(!out.join("b.r.rtex.dds").exists());
    }

    #[test]
    fn test_cancelled_batch_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let conv = converter(tool.clone(), dir.path());
        let token = CancellationToken::new();
        token.cancel();
        let jobs = vec![ConversionJob::ToEditable {
            source: dir.path().join("x.dds"),
        }];
        let outcome = conv.convert_batch(&jobs, &token, None);
        assert!(outcome.cancelled);
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_repair_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tool = Arc::new(ScriptedTool::default());
        let conv = converter(tool, dir.path());
        let textures = dir.path().join("mod/textures");
        std::fs::create_dir_all(textures.join("sub")).unwrap();

        std::fs::write(textures.join("ok.a.rtex.dds"), test_dds(4, 4, 99, 1)).unwrap();
        // Broken, with a raster to rebuild from
        std::fs::write(textures.join("wall.a.rtex.dds"), b"DDS broken").unwrap();
        std::fs::write(textures.join("wall.png"), b"raster").unwrap();
        // Broken, nothing to rebuild from
        std::fs::write(textures.join("sub/lost.n.rtex.dds"), vec![0u8; 200]).unwrap();

        let outcome = conv
            .repair_directory(&textures, &CancellationToken::new(), None)
            .unwrap();
        assert_eq!(outcome.total(), 3);

        let wall = textures.join("wall.a.rtex.dds");
        assert_eq!(
            outcome.get(&wall.display().to_string()),
            Some(&RepairOutcome::Regenerated {
                source: textures.join("wall.png")
            })
        );
        assert!(inspect_dds(&std::fs::read(&wall).unwrap()).is_ok());

        let lost = textures.join("sub/lost.n.rtex.dds");
        assert!(matches!(
            outcome.get(&lost.display().to_string()),
            Some(RepairOutcome::NeedsManualReplacement { .. })
        ));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.status(), OperationStatus::PartialSuccess);
    }

    #[cfg(unix)]
    #[test]
    fn test_texconv_tool_with_script() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        // Minimal texconv stand-in: copies <src> to <dir>/<stem>.<ft>
        let script = dir.path().join("texconv");
        std::fs::write(
            &script,
            "#!/bin/sh\nsrc=\"$1\"; out=\"$3\"; ft=\"$5\"\nname=$(basename \"$src\")\ncp \"$src\" \"$out/${name%.*}.$ft\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("tex.png");
        std::fs::write(&input, test_dds(4, 4, 80, 1)).unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();

        let tool = TexconvTool::new(&script);
        let produced = tool
            .convert(&input, &out, &ConversionTarget::Dds("BC4_UNORM".into()))
            .unwrap();
        assert_eq!(produced, out.join("tex.dds"));

        let missing = TexconvTool::new("/bin/true")
            .convert(&input, &out, &ConversionTarget::Png)
            .unwrap_err();
        assert!(matches!(missing, TextureError::MissingOutput { .. }));
    }
}
