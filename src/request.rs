//! Run parameters shared read-only by every pipeline task.
//!
//! A [`ProcessingRequest`] is built once (from the command
//! line or a JSON [`RunConfig`]), validated, and then handed
//! to the [`Generator`](crate::pipeline::Generator) behind an
//! `Arc`.
use std::{fmt, fs::File, io::BufReader, path::Path, path::PathBuf, str::FromStr};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    error::Error,
    palette::{Palette, PaletteChoice},
};

/// Radiometric inputs of the temperature calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Param {
    Distance,
    Humidity,
    Emissivity,
    Ambient,
    Reflection,
}

impl Param {
    pub const ALL: [Param; 5] = [
        Param::Distance,
        Param::Humidity,
        Param::Emissivity,
        Param::Ambient,
        Param::Reflection,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Param::Distance => "distance",
            Param::Humidity => "humidity",
            Param::Emissivity => "emissivity",
            Param::Ambient => "ambient",
            Param::Reflection => "reflection",
        }
    }

    pub fn flag(self) -> &'static str {
        match self {
            Param::Distance => "--distance",
            Param::Humidity => "--humidity",
            Param::Emissivity => "--emissivity",
            Param::Ambient => "--ambient",
            Param::Reflection => "--reflection",
        }
    }

    /// Valid value passed for an unset parameter when probing
    /// the tool for its defaults. Chosen at the low end of each
    /// range so the tool reports a change.
    pub fn filler(self) -> &'static str {
        match self {
            Param::Distance => "1.0",
            Param::Humidity => "20.0",
            Param::Emissivity => "0.10",
            Param::Ambient => "0.0",
            Param::Reflection => "0.0",
        }
    }

    /// Inclusive physical range accepted by the tool.
    pub fn range(self) -> (f64, f64) {
        match self {
            Param::Distance => (1.0, 25.0),
            Param::Humidity => (20.0, 100.0),
            Param::Emissivity => (0.10, 1.00),
            Param::Ambient => (-40.0, 80.0),
            Param::Reflection => (-40.0, 500.0),
        }
    }

    /// Map a name printed by the tool (`ambient_temp`,
    /// `distance`, ...) back to a parameter.
    pub fn from_tool_name(name: &str) -> Option<Self> {
        let head = name.split('_').next().unwrap_or(name);
        Param::ALL.iter().copied().find(|p| p.name() == head)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Radiometric parameters; `None` means "use the camera's
/// value".
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Radiometric {
    pub distance: Option<f64>,
    pub humidity: Option<f64>,
    pub emissivity: Option<f64>,
    pub ambient: Option<f64>,
    pub reflection: Option<f64>,
}

impl Radiometric {
    pub fn get(&self, param: Param) -> Option<f64> {
        match param {
            Param::Distance => self.distance,
            Param::Humidity => self.humidity,
            Param::Emissivity => self.emissivity,
            Param::Ambient => self.ambient,
            Param::Reflection => self.reflection,
        }
    }

    pub fn set(&mut self, param: Param, value: Option<f64>) {
        let slot = match param {
            Param::Distance => &mut self.distance,
            Param::Humidity => &mut self.humidity,
            Param::Emissivity => &mut self.emissivity,
            Param::Ambient => &mut self.ambient,
            Param::Reflection => &mut self.reflection,
        };
        *slot = value;
    }

    pub fn all_set(&self) -> bool {
        self.unset().next().is_none()
    }

    pub fn unset(&self) -> impl Iterator<Item = Param> + '_ {
        Param::ALL.iter().copied().filter(move |p| self.get(*p).is_none())
    }

    pub fn explicit(&self) -> impl Iterator<Item = (Param, f64)> + '_ {
        Param::ALL
            .iter()
            .filter_map(move |p| self.get(*p).map(|v| (*p, v)))
    }

    pub fn validate(&self) -> Result<(), Error> {
        for (param, value) in self.explicit() {
            let (lo, hi) = param.range();
            if !(lo..=hi).contains(&value) {
                return Err(Error::usage(format!(
                    "{} = {} is outside [{}, {}]",
                    param, value, lo, hi
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rendering {
    pub palette: PaletteChoice,
    /// 0..=100
    pub brightness: u8,
    /// Color bar width in px, 1..=100
    pub colorbar_width: u32,
    pub colorbar_border: bool,
}

impl Default for Rendering {
    fn default() -> Self {
        Rendering {
            palette: PaletteChoice::UseCamera,
            brightness: 50,
            colorbar_width: 10,
            colorbar_border: false,
        }
    }
}

/// JPEG chroma subsampling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subsampling {
    S444,
    S422,
    S420,
}

impl FromStr for Subsampling {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "4:4:4" | "0" => Ok(Subsampling::S444),
            "4:2:2" | "1" => Ok(Subsampling::S422),
            "4:2:0" | "2" => Ok(Subsampling::S420),
            _ => Err(Error::usage(format!("unknown chroma subsampling `{}`", s))),
        }
    }
}

/// Container the recolored image is written in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    Png {
        /// 0 (fast) ..= 9 (small)
        compression: u8,
    },
    Jpeg {
        quality: u8,
        subsampling: Subsampling,
        /// Re-attach EXIF, XMP and vendor APPn segments of the
        /// source when converting palettes.
        keep_metadata: bool,
    },
}

impl Encoding {
    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Png { .. } => "png",
            Encoding::Jpeg { .. } => "jpeg",
        }
    }
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::Png { compression: 6 }
    }
}

/// Directories used by a run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkPaths {
    /// Scanned for `.jpg`/`.jpeg` when no explicit file list
    /// is given.
    pub input_dir: Option<PathBuf>,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub lut_dir: PathBuf,
    /// Report template; the built-in one when `None`.
    pub template: Option<PathBuf>,
}

impl Default for WorkPaths {
    fn default() -> Self {
        WorkPaths {
            input_dir: None,
            output_dir: PathBuf::from("reports"),
            temp_dir: PathBuf::from("temps"),
            lut_dir: PathBuf::from("luts"),
            template: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingRequest {
    pub radiometric: Radiometric,
    pub rendering: Rendering,
    pub encoding: Encoding,
    /// Admission gate and worker pool size, >= 1.
    pub workers: usize,
    pub paths: WorkPaths,
    /// Replace existing files in single-image modes instead
    /// of renaming.
    pub overwrite: bool,
}

impl Default for ProcessingRequest {
    fn default() -> Self {
        ProcessingRequest {
            radiometric: Radiometric::default(),
            rendering: Rendering::default(),
            encoding: Encoding::default(),
            workers: 4,
            paths: WorkPaths::default(),
            overwrite: false,
        }
    }
}

impl ProcessingRequest {
    pub fn validate(&self) -> Result<(), Error> {
        if self.workers == 0 {
            return Err(Error::usage("worker count must be at least 1"));
        }
        self.radiometric.validate()?;
        if self.rendering.brightness > 100 {
            return Err(Error::usage("brightness must be within 0..=100"));
        }
        if !(1..=100).contains(&self.rendering.colorbar_width) {
            return Err(Error::usage("color bar width must be within 1..=100"));
        }
        match self.encoding {
            Encoding::Png { compression } if compression > 9 => {
                Err(Error::usage("PNG compression must be within 0..=9"))
            }
            Encoding::Jpeg { quality, .. } if !(1..=100).contains(&quality) => {
                Err(Error::usage("JPEG quality must be within 1..=100"))
            }
            _ => Ok(()),
        }
    }
}

/// On-disk run settings: plain values plus a parallel set of
/// flags saying which ones override the camera.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub settings: Settings,
    pub overrides: Overrides,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub temp_dir: Option<PathBuf>,
    pub distance: f64,
    pub humidity: f64,
    pub emissivity: f64,
    pub ambient: f64,
    pub reflection: f64,
    pub brightness: u8,
    pub colorbar_width: u32,
    pub colorbar_border: bool,
    pub max_workers: usize,
    pub palette: Palette,
    pub img_format: String,
    pub png_compress: u8,
    pub jpeg_quality: u8,
    pub jpeg_subsampling: String,
    pub jpeg_keepdata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            temp_dir: None,
            distance: 5.0,
            humidity: 50.0,
            emissivity: 0.95,
            ambient: 25.0,
            reflection: 25.0,
            brightness: 50,
            colorbar_width: 10,
            colorbar_border: false,
            max_workers: 4,
            palette: Palette::IronRed,
            img_format: "png".into(),
            png_compress: 6,
            jpeg_quality: 95,
            jpeg_subsampling: "4:4:4".into(),
            jpeg_keepdata: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct Overrides {
    pub distance: bool,
    pub humidity: bool,
    pub emissivity: bool,
    pub ambient: bool,
    pub reflection: bool,
    pub palette: bool,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open config {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse config {}", path.display()))
    }

    /// Build a validated request. Only overridden values are
    /// set; the rest are discovered from each image.
    pub fn into_request(self, mut paths: WorkPaths) -> Result<ProcessingRequest> {
        let RunConfig { settings, overrides } = self;
        let pick = |flag: bool, value: f64| flag.then(|| value);

        let radiometric = Radiometric {
            distance: pick(overrides.distance, settings.distance),
            humidity: pick(overrides.humidity, settings.humidity),
            emissivity: pick(overrides.emissivity, settings.emissivity),
            ambient: pick(overrides.ambient, settings.ambient),
            reflection: pick(overrides.reflection, settings.reflection),
        };
        let palette = if overrides.palette {
            PaletteChoice::Explicit(settings.palette)
        } else {
            PaletteChoice::UseCamera
        };
        let encoding = match settings.img_format.as_str() {
            "png" => Encoding::Png {
                compression: settings.png_compress,
            },
            "jpeg" | "jpg" => Encoding::Jpeg {
                quality: settings.jpeg_quality,
                subsampling: settings.jpeg_subsampling.parse()?,
                keep_metadata: settings.jpeg_keepdata,
            },
            other => return Err(Error::usage(format!("unknown image format `{}`", other)).into()),
        };
        if let Some(temp_dir) = settings.temp_dir {
            paths.temp_dir = temp_dir;
        }

        let request = ProcessingRequest {
            radiometric,
            rendering: Rendering {
                palette,
                brightness: settings.brightness,
                colorbar_width: settings.colorbar_width,
                colorbar_border: settings.colorbar_border,
            },
            encoding,
            workers: settings.max_workers,
            paths,
            overwrite: false,
        };
        request.validate()?;
        Ok(request)
    }
}
