//! Per-file pipelines and their orchestration.
//!
//! A run resolves its inputs, then drives one future per
//! file on the current (single-threaded) runtime. Each
//! future first takes a permit from the admission gate, so
//! at most `workers` files are in flight; the CPU-bound
//! steps go to a [`WorkerPool`] of the same size.
//! Completions are reported as they land, while results are
//! kept in input order for the final merge.
use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use log::{error, info, warn};
use serde::Serialize;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::{
    error::Error,
    merge,
    metadata::Metadata,
    pool::WorkerPool,
    report::{PdfBackend, ReportContext, Template},
    request::ProcessingRequest,
    tool::ThermalTool,
    transcode::{self, remove_quietly},
};

/// What a run produces per image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One merged PDF report.
    Report,
    /// Recolored images under `<output>/<palette>/`.
    Palette,
    /// Float32 temperature GeoTIFFs under `<output>/`.
    GeoTiff,
}

/// Where the source images come from.
#[derive(Debug, Clone)]
pub enum InputSet {
    /// Every `.jpg`/`.jpeg` in a directory, sorted by name.
    Directory(PathBuf),
    /// Explicit absolute paths; other extensions are skipped.
    Files(Vec<PathBuf>),
}

pub fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("jpg") || e.eq_ignore_ascii_case("jpeg"))
        .unwrap_or(false)
}

impl InputSet {
    pub fn resolve(&self) -> Result<Vec<PathBuf>> {
        match self {
            InputSet::Files(files) => {
                let mut out = vec![];
                for file in files {
                    if !file.is_absolute() {
                        bail!(Error::usage(format!(
                            "path in file list must be absolute: {}",
                            file.display()
                        )));
                    }
                    if is_jpeg(file) {
                        out.push(file.clone());
                    }
                }
                Ok(out)
            }
            InputSet::Directory(dir) => {
                let dir = if dir.is_absolute() {
                    dir.clone()
                } else {
                    std::env::current_dir()?.join(dir)
                };
                let entries = std::fs::read_dir(&dir).map_err(|e| {
                    Error::usage(format!("cannot read input directory {}: {}", dir.display(), e))
                })?;
                let mut out = vec![];
                for entry in entries {
                    let path = entry?.path();
                    if path.is_file() && is_jpeg(&path) {
                        out.push(path);
                    }
                }
                out.sort();
                Ok(out)
            }
        }
    }
}

/// One completed file, sent to the progress callback in
/// completion order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub total: usize,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Success {
        /// Per-file PDF (report mode only).
        report: Option<PathBuf>,
        image: PathBuf,
    },
    Failure {
        detail: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Merged report, or the placed images in input order.
    pub outputs: Vec<PathBuf>,
}

/// Files a task created so far; removed unless the task
/// hands them over with [`Scratch::keep`].
#[derive(Default)]
struct Scratch {
    paths: Vec<PathBuf>,
}

impl Scratch {
    fn track(&mut self, path: PathBuf) -> PathBuf {
        self.paths.push(path.clone());
        path
    }

    fn keep(mut self) {
        self.paths.clear();
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        for path in &self.paths {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("cannot remove {}: {}", path.display(), e),
            }
        }
    }
}

pub struct Generator {
    request: Arc<ProcessingRequest>,
    tool: ThermalTool,
    backend: PdfBackend,
    template: Template,
    gate: Semaphore,
    pool: WorkerPool,
}

impl Generator {
    pub fn new(request: ProcessingRequest, tool: ThermalTool, backend: PdfBackend) -> Result<Self> {
        request.validate()?;
        let template = match &request.paths.template {
            Some(path) => Template::load(path)?,
            None => Template::default(),
        };
        Ok(Generator {
            gate: Semaphore::new(request.workers),
            pool: WorkerPool::new(request.workers)?,
            request: Arc::new(request),
            tool,
            backend,
            template,
        })
    }

    /// Process every input of `inputs`. Consumes the
    /// generator; its worker pool shuts down when the run
    /// ends.
    pub async fn run<F>(self, mode: Mode, inputs: InputSet, mut on_progress: F) -> Result<RunSummary>
    where
        F: FnMut(&ProgressEvent),
    {
        let sources = inputs.resolve()?;
        let total = sources.len();
        if total == 0 {
            info!("no images to process");
            return Ok(RunSummary::default());
        }
        info!("processing {} images with {} workers", total, self.request.workers);

        let paths = &self.request.paths;
        tokio::fs::create_dir_all(&paths.temp_dir)
            .await
            .with_context(|| format!("cannot create {}", paths.temp_dir.display()))?;
        let output_dir = self.output_dir(mode);
        tokio::fs::create_dir_all(&output_dir)
            .await
            .with_context(|| format!("cannot create {}", output_dir.display()))?;

        let mut job: Vec<Option<TaskOutcome>> = vec![None; total];
        let this = &self;
        let mut pending: FuturesUnordered<_> = sources
            .iter()
            .enumerate()
            .map(|(idx, src)| async move { (idx, this.task(mode, src).await) })
            .collect();

        while let Some((idx, outcome)) = pending.next().await {
            let src = &sources[idx];
            let outcome = match (mode, outcome) {
                (Mode::Palette | Mode::GeoTiff, TaskOutcome::Success { image, .. }) => {
                    match self.place(mode, src, &image, &output_dir).await {
                        Ok(placed) => TaskOutcome::Success {
                            report: None,
                            image: placed,
                        },
                        Err(e) => {
                            remove_quietly(&image).await;
                            failed(src, e)
                        }
                    }
                }
                (_, outcome) => outcome,
            };

            let event = match &outcome {
                TaskOutcome::Success { image, .. } => ProgressEvent {
                    total,
                    success: true,
                    message: match mode {
                        Mode::Report => format!("done: {}", display_name(src)),
                        _ => format!("done: {}", image.display()),
                    },
                },
                TaskOutcome::Failure { detail } => ProgressEvent {
                    total,
                    success: false,
                    message: format!("failed: {} ({})", display_name(src), detail),
                },
            };
            on_progress(&event);
            job[idx] = Some(outcome);
        }
        drop(pending);

        let mut summary = RunSummary {
            total,
            ..Default::default()
        };
        let mut reports = vec![];
        let mut images = vec![];
        for outcome in job.into_iter().flatten() {
            match outcome {
                TaskOutcome::Success { report, image } => {
                    summary.succeeded += 1;
                    reports.extend(report);
                    images.push(image);
                }
                TaskOutcome::Failure { .. } => summary.failed += 1,
            }
        }

        match mode {
            Mode::Report if !reports.is_empty() => {
                let merged = merge::report_path(&output_dir);
                let target = merged.clone();
                let inputs = reports.clone();
                let result = self
                    .pool
                    .run(move || merge::merge_pdfs(&inputs, &target))
                    .await;
                for path in reports.iter().chain(&images) {
                    remove_quietly(path).await;
                }
                result?;
                info!("report written to {}", merged.display());
                summary.outputs.push(merged);
            }
            Mode::Report => {}
            _ => summary.outputs = images,
        }

        info!(
            "{} succeeded, {} failed of {}",
            summary.succeeded, summary.failed, summary.total
        );
        Ok(summary)
    }

    fn output_dir(&self, mode: Mode) -> PathBuf {
        let base = &self.request.paths.output_dir;
        match mode {
            Mode::Palette => base.join(self.request.rendering.palette.dir_name()),
            _ => base.clone(),
        }
    }

    async fn task(&self, mode: Mode, src: &Path) -> TaskOutcome {
        let _permit = match self.gate.acquire().await {
            Ok(permit) => permit,
            Err(e) => return failed(src, e.into()),
        };
        match self.process_file(mode, src).await {
            Ok(outcome) => outcome,
            Err(e) => failed(src, e),
        }
    }

    async fn process_file(&self, mode: Mode, src: &Path) -> Result<TaskOutcome> {
        let request = &self.request;
        let temp_dir = &request.paths.temp_dir;
        let id = Uuid::new_v4().simple().to_string();
        let mut scratch = Scratch::default();

        let bytes = tokio::fs::read(src)
            .await
            .with_context(|| format!("cannot read {}", src.display()))?;
        let meta = Metadata::from_bytes(bytes)?.ok_or(Error::NotThermal)?;
        let raw = scratch.track(temp_dir.join(format!("{}.raw", id)));

        if mode == Mode::GeoTiff {
            let dims = self
                .tool
                .measure_raster(src, &raw, &request.radiometric)
                .await?;
            let data = tokio::fs::read(&raw).await?;
            let gps = meta.gps;
            let payloads = meta.raw;
            let tif = self
                .pool
                .run(move || {
                    let raster = transcode::read_raster(&data, dims.width, dims.height)?;
                    transcode::encode_geotiff(&raster, gps, &payloads)
                })
                .await?;
            let image = scratch.track(temp_dir.join(format!("{}.tif", id)));
            tokio::fs::write(&image, tif).await?;
            remove_quietly(&raw).await;
            scratch.keep();
            return Ok(TaskOutcome::Success {
                report: None,
                image,
            });
        }

        let output = self.tool.process(src, &raw, request).await?;
        let rgb = tokio::fs::read(&raw).await?;
        let encoding = request.encoding;
        let payloads = match mode {
            Mode::Palette => Some(meta.raw.clone()),
            _ => None,
        };
        let (width, height) = (output.width, output.height);
        let encoded = self
            .pool
            .run(move || transcode::encode_rgb(&encoding, &rgb, width, height, payloads.as_ref()))
            .await?;
        let image = scratch.track(temp_dir.join(format!("{}.{}", id, encoding.extension())));
        tokio::fs::write(&image, encoded).await?;
        remove_quietly(&raw).await;

        if mode == Mode::Palette {
            scratch.keep();
            return Ok(TaskOutcome::Success {
                report: None,
                image,
            });
        }

        let defaults = self
            .tool
            .measure_defaults(src, &request.radiometric)
            .await?;
        let palette = request.rendering.palette.resolve(meta.palette);
        let palette_colors = palette.css_colors(&request.paths.lut_dir)?;
        let image_abs = tokio::fs::canonicalize(&image).await?;
        let html = self.template.render(
            &ReportContext {
                source: src,
                image: &image_abs,
                output: &output,
                palette,
                palette_colors,
                request,
                defaults: &defaults,
                meta: &meta,
            }
            .fields(),
        )?;

        let pdf = scratch.track(temp_dir.join(format!("{}.pdf", id)));
        self.backend.render(html, &pdf, &self.pool).await?;
        scratch.keep();
        Ok(TaskOutcome::Success {
            report: Some(pdf),
            image,
        })
    }

    /// Move a finished artifact to its final place, named
    /// after the source image.
    async fn place(&self, mode: Mode, src: &Path, artifact: &Path, dir: &Path) -> Result<PathBuf> {
        let stem = src
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "image".into());
        let ext = match mode {
            Mode::GeoTiff => "tif",
            _ => self.request.encoding.extension(),
        };
        let target = unique_path(dir, &stem, ext, self.request.overwrite);
        move_file(artifact, &target).await?;
        Ok(target)
    }
}

fn failed(src: &Path, e: anyhow::Error) -> TaskOutcome {
    error!("{}: {:#}", src.display(), e);
    TaskOutcome::Failure {
        detail: format!("{:#}", e),
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `<dir>/<stem>.<ext>`, or the first free
/// `<dir>/<stem>_<n>.<ext>` unless `overwrite` is set.
pub fn unique_path(dir: &Path, stem: &str, ext: &str, overwrite: bool) -> PathBuf {
    let mut path = dir.join(format!("{}.{}", stem, ext));
    let mut n = 1;
    while !overwrite && path.exists() {
        path = dir.join(format!("{}_{}.{}", stem, n, ext));
        n += 1;
    }
    path
}

/// Rename, falling back to copy and delete across
/// filesystems.
pub async fn move_file(from: &Path, to: &Path) -> Result<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to)
        .await
        .with_context(|| format!("cannot move {} to {}", from.display(), to.display()))?;
    remove_quietly(from).await;
    Ok(())
}
