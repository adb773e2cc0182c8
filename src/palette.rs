//! Thermal color palettes and their lookup tables.
use std::{fmt, fs::File, io::BufReader, path::Path, str::FromStr};

use anyhow::{Context, Result};
use inflector::Inflector;
use itertools::Itertools;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Palettes known to the DJI thermal tool. The discriminant
/// is the LUT file id (`lut<id>.json`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Palette {
    WhiteHot = 0,
    Fulgurite = 1,
    IronRed = 2,
    HotIron = 3,
    Medical = 4,
    Arctic = 5,
    Rainbow1 = 6,
    Rainbow2 = 7,
    Tint = 8,
    BlackHot = 9,
}

impl Palette {
    pub const ALL: [Palette; 10] = [
        Palette::WhiteHot,
        Palette::Fulgurite,
        Palette::IronRed,
        Palette::HotIron,
        Palette::Medical,
        Palette::Arctic,
        Palette::Rainbow1,
        Palette::Rainbow2,
        Palette::Tint,
        Palette::BlackHot,
    ];

    /// Name understood by the tool's `-p` flag.
    pub fn name(self) -> &'static str {
        match self {
            Palette::WhiteHot => "white_hot",
            Palette::Fulgurite => "fulgurite",
            Palette::IronRed => "iron_red",
            Palette::HotIron => "hot_iron",
            Palette::Medical => "medical",
            Palette::Arctic => "arctic",
            Palette::Rainbow1 => "rainbow1",
            Palette::Rainbow2 => "rainbow2",
            Palette::Tint => "tint",
            Palette::BlackHot => "black_hot",
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Parse a camera `ImageDescription` value such as
    /// `IronRed` or `WhiteHot`.
    pub fn from_camera_description(desc: &str) -> Option<Self> {
        desc.trim().to_snake_case().parse().ok()
    }

    pub fn lut_path(self, lut_dir: &Path) -> std::path::PathBuf {
        lut_dir.join(format!("lut{}.json", self.id()))
    }

    /// Load the LUT and render it as a CSS color list, hottest
    /// first.
    pub fn css_colors(self, lut_dir: &Path) -> Result<String> {
        let lut = Lut::load(&self.lut_path(lut_dir))?;
        Ok(lut.css_colors())
    }
}

impl fmt::Display for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Palette {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Palette::ALL
            .iter()
            .copied()
            .find(|p| p.name() == s)
            .ok_or_else(|| Error::usage(format!("unknown palette `{}`", s)))
    }
}

impl Serialize for Palette {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Palette {
    fn deserialize<D: Deserializer<'de>>(de: D) -> Result<Self, D::Error> {
        use serde::de::Error;
        let name = <String as Deserialize>::deserialize(de)?;
        name.parse().map_err(D::Error::custom)
    }
}

/// Palette to render with: whatever the camera used, or an
/// explicit one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteChoice {
    UseCamera,
    Explicit(Palette),
}

impl PaletteChoice {
    /// Palette passed to the tool; `None` lets the tool keep
    /// the camera palette.
    pub fn explicit(self) -> Option<Palette> {
        match self {
            PaletteChoice::Explicit(p) => Some(p),
            PaletteChoice::UseCamera => None,
        }
    }

    /// Palette whose LUT describes the rendered image.
    /// Unknown camera palettes fall back to iron red.
    pub fn resolve(self, camera: Option<Palette>) -> Palette {
        match self {
            PaletteChoice::Explicit(p) => p,
            PaletteChoice::UseCamera => camera.unwrap_or(Palette::IronRed),
        }
    }

    /// Output sub-directory for palette conversion.
    pub fn dir_name(self) -> &'static str {
        match self {
            PaletteChoice::Explicit(p) => p.name(),
            PaletteChoice::UseCamera => "camera",
        }
    }
}

impl Default for PaletteChoice {
    fn default() -> Self {
        PaletteChoice::UseCamera
    }
}

impl FromStr for PaletteChoice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "camera" | "keep" => Ok(PaletteChoice::UseCamera),
            _ => s.parse().map(PaletteChoice::Explicit),
        }
    }
}

/// 256 RGB entries, coldest first.
#[derive(Debug, Clone, Deserialize)]
#[serde(transparent)]
pub struct Lut(Vec<[u8; 3]>);

impl Lut {
    pub const LEN: usize = 256;

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("cannot open LUT {}", path.display()))?;
        let lut: Lut = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("cannot parse LUT {}", path.display()))?;
        if lut.0.len() != Self::LEN {
            return Err(Error::format(format!(
                "LUT {} has {} entries, expected {}",
                path.display(),
                lut.0.len(),
                Self::LEN
            ))
            .into());
        }
        Ok(lut)
    }

    pub fn css_colors(&self) -> String {
        self.0
            .iter()
            .rev()
            .map(|[r, g, b]| format!("rgb({},{},{})", r, g, b))
            .join(", ")
    }
}
