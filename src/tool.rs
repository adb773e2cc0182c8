//! Invocations of the DJI thermal SDK command line tool
//! (`dji_irp`).
//!
//! The tool has two actions we care about: `measure`, which
//! writes per-pixel temperatures (and, as a side effect,
//! reports the radiometric defaults stored in the image)
//! and `process`, which renders a colorized RGB buffer.
//! Both write headerless raw files; dimensions are only
//! reported on stdout.
use std::{
    collections::BTreeMap,
    ffi::OsString,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::Regex;
use tokio::process::Command;

use crate::{
    error::Error,
    request::{Param, ProcessingRequest, Radiometric},
};

#[cfg(windows)]
const NULL_DEVICE: &str = "NUL";
#[cfg(not(windows))]
const NULL_DEVICE: &str = "/dev/null";

/// Radiometric values stored in the image, as reported by
/// the tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Defaults(BTreeMap<Param, f64>);

impl Defaults {
    pub fn get(&self, param: Param) -> Option<f64> {
        self.0.get(&param).copied()
    }

    /// Explicit value, else the image's default, else `0.0`.
    pub fn effective(&self, radiometric: &Radiometric, param: Param) -> f64 {
        radiometric
            .get(param)
            .or_else(|| self.get(param))
            .unwrap_or(0.)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessOutput {
    pub width: u32,
    pub height: u32,
    /// Adaptive color bar range in °C.
    pub range: Option<(f64, f64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeasureOutput {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct ThermalTool {
    exe: PathBuf,
}

impl ThermalTool {
    pub fn new<P: Into<PathBuf>>(exe: P) -> Self {
        ThermalTool { exe: exe.into() }
    }

    /// Check the executable is the DJI tool. Returns its
    /// version banner.
    pub async fn probe(&self) -> Result<String> {
        let output = Command::new(&self.exe)
            .arg("--version")
            .output()
            .await
            .with_context(|| format!("cannot run {}", self.exe.display()))?;
        let banner = String::from_utf8_lossy(&output.stderr);
        if !banner.starts_with("APP version") {
            bail!(Error::usage(format!(
                "{} does not look like the DJI thermal tool",
                self.exe.display()
            )));
        }
        Ok(banner.lines().next().unwrap_or_default().to_string())
    }

    /// Ask the tool for the radiometric values stored in
    /// `src`. Skipped when every value is set explicitly.
    pub async fn measure_defaults(&self, src: &Path, radiometric: &Radiometric) -> Result<Defaults> {
        if radiometric.all_set() {
            return Ok(Defaults::default());
        }
        let stdout = self.run(measure_defaults_args(src, radiometric), None).await?;
        Ok(parse_defaults(&stdout))
    }

    /// Render the colorized RGB buffer of `src` into `out`.
    pub async fn process(
        &self,
        src: &Path,
        out: &Path,
        request: &ProcessingRequest,
    ) -> Result<ProcessOutput> {
        let stdout = self.run(process_args(src, out, request), Some(out)).await?;
        let (width, height) = self.dimensions(&stdout)?;
        Ok(ProcessOutput {
            width,
            height,
            range: parse_range(&stdout),
        })
    }

    /// Write the float32 temperature raster of `src` into
    /// `out`.
    pub async fn measure_raster(
        &self,
        src: &Path,
        out: &Path,
        radiometric: &Radiometric,
    ) -> Result<MeasureOutput> {
        let stdout = self.run(raster_args(src, out, radiometric), Some(out)).await?;
        let (width, height) = self.dimensions(&stdout)?;
        Ok(MeasureOutput { width, height })
    }

    fn dimensions(&self, stdout: &str) -> Result<(u32, u32)> {
        parse_dimensions(stdout).with_context(|| {
            format!("{} did not report the image dimensions", self.name())
        })
    }

    fn name(&self) -> String {
        self.exe
            .file_name()
            .unwrap_or(self.exe.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    async fn run(&self, args: Vec<OsString>, out: Option<&Path>) -> Result<String> {
        debug!("{} {:?}", self.exe.display(), args);
        let output = Command::new(&self.exe)
            .args(&args)
            .output()
            .await
            .with_context(|| format!("cannot run {}", self.exe.display()))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("{} stdout: {}", self.name(), stdout.trim_end());

        if !output.status.success() {
            debug!(
                "{} stderr: {}",
                self.name(),
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
            bail!(Error::ToolFailed {
                tool: self.name(),
                status: output.status,
            });
        }
        if let Some(out) = out {
            if tokio::fs::metadata(out).await.is_err() {
                bail!(Error::MissingOutput(out.to_path_buf()));
            }
        }
        Ok(stdout)
    }
}

fn number(v: f64) -> String {
    if v.fract() == 0. {
        format!("{:.1}", v)
    } else {
        v.to_string()
    }
}

fn base_args(action: &str, src: &Path, out: &Path) -> Vec<OsString> {
    vec![
        "-a".into(),
        action.into(),
        "-s".into(),
        src.into(),
        "-o".into(),
        out.into(),
    ]
}

fn push_explicit(args: &mut Vec<OsString>, radiometric: &Radiometric) {
    for (param, value) in radiometric.explicit() {
        args.push(param.flag().into());
        args.push(number(value).into());
    }
}

/// `measure` into the null device. Unset parameters get a
/// filler value so the tool reports what it replaced.
pub fn measure_defaults_args(src: &Path, radiometric: &Radiometric) -> Vec<OsString> {
    let mut args = base_args("measure", src, Path::new(NULL_DEVICE));
    for param in Param::ALL {
        args.push(param.flag().into());
        match radiometric.get(param) {
            Some(v) => args.push(number(v).into()),
            None => args.push(param.filler().into()),
        }
    }
    args
}

pub fn process_args(src: &Path, out: &Path, request: &ProcessingRequest) -> Vec<OsString> {
    let mut args = base_args("process", src, out);
    args.push("--brightness".into());
    args.push(request.rendering.brightness.to_string().into());
    push_explicit(&mut args, &request.radiometric);
    if let Some(palette) = request.rendering.palette.explicit() {
        args.push("-p".into());
        args.push(palette.name().into());
    }
    args
}

pub fn raster_args(src: &Path, out: &Path, radiometric: &Radiometric) -> Vec<OsString> {
    let mut args = base_args("measure", src, out);
    args.push("--measurefmt".into());
    args.push("float32".into());
    push_explicit(&mut args, radiometric);
    args
}

/// `Change <name> from <A> to <B>` lines; `A` is the value
/// stored in the image.
pub fn parse_defaults(stdout: &str) -> Defaults {
    lazy_static! {
        static ref CHANGE: Regex =
            Regex::new(r"Change (\w+) from (-?[0-9.]+(?:[eE][-+]?[0-9]+)?) to").unwrap();
    }
    let map = CHANGE
        .captures_iter(stdout)
        .filter_map(|cap| {
            let param = Param::from_tool_name(&cap[1])?;
            let value = cap[2].parse().ok()?;
            Some((param, value))
        })
        .collect();
    Defaults(map)
}

pub fn parse_dimensions(stdout: &str) -> Option<(u32, u32)> {
    lazy_static! {
        static ref WIDTH: Regex = Regex::new(r"image\s+width\s*:\s*(\d+)").unwrap();
        static ref HEIGHT: Regex = Regex::new(r"image\s+height\s*:\s*(\d+)").unwrap();
    }
    let width = WIDTH.captures(stdout)?[1].parse().ok()?;
    let height = HEIGHT.captures(stdout)?[1].parse().ok()?;
    Some((width, height))
}

pub fn parse_range(stdout: &str) -> Option<(f64, f64)> {
    lazy_static! {
        static ref RANGE: Regex =
            Regex::new(r"adaptive range[^\[\n]*\[\s*([-+0-9.eE]+)\s*,\s*([-+0-9.eE]+)\s*\]")
                .unwrap();
    }
    let cap = RANGE.captures(stdout)?;
    Some((cap[1].parse().ok()?, cap[2].parse().ok()?))
}
