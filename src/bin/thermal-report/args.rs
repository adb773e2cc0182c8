use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
};

use anyhow::Result;
use clap::{AppSettings, ArgMatches, SubCommand};
use thermal_report::{
    error::Error,
    request::{Param, RunConfig, Subsampling, WorkPaths},
    Encoding, InputSet, Mode, PaletteChoice, ProcessingRequest,
};
use thermal_report::{arg, args_parser, opt};

pub struct Args {
    pub mode: Mode,
    pub request: ProcessingRequest,
    pub inputs: InputSet,
    pub dji: Option<PathBuf>,
    pub weasyprint: Option<PathBuf>,
}

macro_rules! common_args {
    ($cmd:expr) => {
        $cmd.arg(
            arg!("paths")
                .multiple(true)
                .help("Source R-JPEGs (default: every .jpg/.jpeg in --input-dir)"),
        )
        .arg(opt!("input dir").short("i").help("Directory scanned for R-JPEGs"))
        .arg(opt!("output dir").short("o").help("Output directory (default: reports)"))
        .arg(opt!("temp dir").help("Scratch directory (default: temps)"))
        .arg(opt!("lut dir").help("Directory with lut<id>.json files (default: luts)"))
        .arg(opt!("config").short("c").help("JSON run configuration"))
        .arg(opt!("dji").help("Path to dji_irp (default: searched on PATH)"))
        .arg(opt!("workers").short("j").help("Files processed concurrently (default: 4)"))
        .arg(opt!("distance").help("Target distance in m, 1 - 25"))
        .arg(opt!("humidity").help("Relative humidity in %, 20 - 100"))
        .arg(opt!("emissivity").help("Emissivity, 0.10 - 1.00"))
        .arg(opt!("ambient").help("Ambient temperature in °C, -40 - 80"))
        .arg(opt!("reflection").help("Reflected temperature in °C, -40 - 500"))
    };
}

macro_rules! image_args {
    ($cmd:expr) => {
        $cmd.arg(
            opt!("palette")
                .short("p")
                .help("Palette name, or `camera` to keep the camera's (default)"),
        )
        .arg(opt!("brightness").help("Brightness, 0 - 100 (default: 50)"))
        .arg(
            opt!("format")
                .short("f")
                .possible_values(&["png", "jpeg"])
                .help("Image format (default: png)"),
        )
        .arg(opt!("png compression").help("PNG compression level, 0 - 9 (default: 6)"))
        .arg(opt!("jpeg quality").help("JPEG quality, 1 - 100 (default: 95)"))
        .arg(
            opt!("subsampling")
                .possible_values(&["4:4:4", "4:2:2", "4:2:0"])
                .help("JPEG chroma subsampling (default: 4:4:4)"),
        )
        .arg(
            opt!("strip metadata")
                .takes_value(false)
                .help("Do not copy EXIF, XMP and DJI segments into JPEGs"),
        )
    };
}

impl Args {
    pub fn from_cmd_line() -> Result<Args> {
        let matches = args_parser!("thermal-report")
            .setting(AppSettings::SubcommandRequiredElseHelp)
            .setting(AppSettings::AllowNegativeNumbers)
            .about("Batch process DJI thermal R-JPEGs.")
            .subcommand(
                image_args!(common_args!(SubCommand::with_name("report")))
                    .about("Render one PDF report page per image and merge them")
                    .arg(opt!("weasyprint").help("Path to weasyprint (default: searched on PATH)"))
                    .arg(opt!("template").help("HTML report template"))
                    .arg(opt!("colorbar width").help("Color bar width in px, 1 - 100 (default: 10)"))
                    .arg(
                        opt!("colorbar border")
                            .takes_value(false)
                            .help("Draw a border around the color bar"),
                    ),
            )
            .subcommand(
                image_args!(common_args!(SubCommand::with_name("palette")))
                    .about("Recolor images with another palette")
                    .arg(
                        opt!("overwrite")
                            .takes_value(false)
                            .help("Replace existing outputs instead of renaming"),
                    ),
            )
            .subcommand(
                common_args!(SubCommand::with_name("geotiff"))
                    .about("Write float32 temperature GeoTIFFs")
                    .arg(
                        opt!("overwrite")
                            .takes_value(false)
                            .help("Replace existing outputs instead of renaming"),
                    ),
            )
            .get_matches();

        let (mode, sub) = match matches.subcommand() {
            ("report", Some(sub)) => (Mode::Report, sub),
            ("palette", Some(sub)) => (Mode::Palette, sub),
            ("geotiff", Some(sub)) => (Mode::GeoTiff, sub),
            _ => unreachable!("subcommand is required"),
        };
        Args::from_matches(mode, sub)
    }

    fn from_matches(mode: Mode, m: &ArgMatches) -> Result<Args> {
        let mut paths = WorkPaths::default();
        if let Some(dir) = m.value_of("output dir") {
            paths.output_dir = dir.into();
        }
        if let Some(dir) = m.value_of("lut dir") {
            paths.lut_dir = dir.into();
        }
        paths.input_dir = m.value_of("input dir").map(PathBuf::from);
        paths.template = m.value_of("template").map(PathBuf::from);

        let mut request = match m.value_of("config") {
            Some(config) => RunConfig::load(Path::new(config))?.into_request(paths)?,
            None => ProcessingRequest {
                paths,
                ..Default::default()
            },
        };
        if let Some(dir) = m.value_of("temp dir") {
            request.paths.temp_dir = dir.into();
        }
        if let Some(workers) = value(m, "workers")? {
            request.workers = workers;
        }
        for param in Param::ALL {
            if let Some(v) = value(m, param.name())? {
                request.radiometric.set(param, Some(v));
            }
        }
        if let Some(palette) = value::<PaletteChoice>(m, "palette")? {
            request.rendering.palette = palette;
        }
        if let Some(brightness) = value(m, "brightness")? {
            request.rendering.brightness = brightness;
        }
        if let Some(width) = value(m, "colorbar width")? {
            request.rendering.colorbar_width = width;
        }
        if m.is_present("colorbar border") {
            request.rendering.colorbar_border = true;
        }
        request.encoding = encoding(m, request.encoding)?;
        request.overwrite = m.is_present("overwrite");
        request.validate()?;

        let inputs = match m.values_of("paths") {
            Some(files) => {
                let cwd = std::env::current_dir()?;
                InputSet::Files(files.map(|f| cwd.join(f)).collect())
            }
            None => InputSet::Directory(
                request
                    .paths
                    .input_dir
                    .clone()
                    .unwrap_or_else(|| PathBuf::from(".")),
            ),
        };

        Ok(Args {
            mode,
            request,
            inputs,
            dji: m.value_of("dji").map(PathBuf::from),
            weasyprint: m.value_of("weasyprint").map(PathBuf::from),
        })
    }
}

fn encoding(m: &ArgMatches, current: Encoding) -> Result<Encoding> {
    let (mut compression, mut quality, mut subsampling, mut keep) = match current {
        Encoding::Png { compression } => (compression, 95, Subsampling::S444, true),
        Encoding::Jpeg {
            quality,
            subsampling,
            keep_metadata,
        } => (6, quality, subsampling, keep_metadata),
    };
    compression = value(m, "png compression")?.unwrap_or(compression);
    quality = value(m, "jpeg quality")?.unwrap_or(quality);
    subsampling = value(m, "subsampling")?.unwrap_or(subsampling);
    keep &= !m.is_present("strip metadata");

    let jpeg = match m.value_of("format") {
        Some(format) => format == "jpeg",
        None => matches!(current, Encoding::Jpeg { .. }),
    };
    Ok(if jpeg {
        Encoding::Jpeg {
            quality,
            subsampling,
            keep_metadata: keep,
        }
    } else {
        Encoding::Png { compression }
    })
}

fn value<T>(m: &ArgMatches, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: Display,
{
    m.value_of(name)
        .map(|v| {
            v.parse()
                .map_err(|e| Error::usage(format!("invalid --{}: {}", name.replace(' ', "-"), e)).into())
        })
        .transpose()
}
