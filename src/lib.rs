//! Batch processing of DJI radiometric thermal R-JPEGs.
//!
//! The heavy lifting (radiometric decoding, PDF layout) is
//! done by two external collaborators: the DJI thermal SDK
//! command line tool (`dji_irp`) and an HTML to PDF
//! renderer (WeasyPrint, or any [`HtmlToPdf`]
//! implementation). This crate orchestrates them over many
//! images at once and produces one of:
//!
//! 1. a merged PDF report, one page per image, in input
//! order ([`Mode::Report`]);
//!
//! 2. recolored PNG/JPEG images; JPEGs keep the source's
//! EXIF, XMP and vendor APPn segments ([`Mode::Palette`]);
//!
//! 3. float32 temperature GeoTIFFs anchored at the drone's
//! GPS position ([`Mode::GeoTiff`]).
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn run() -> anyhow::Result<()> {
//! use thermal_report::{
//!     Generator, InputSet, Mode, PdfBackend, ProcessingRequest, ThermalTool,
//! };
//!
//! let request = ProcessingRequest::default();
//! let generator = Generator::new(
//!     request,
//!     ThermalTool::new("dji_irp"),
//!     PdfBackend::Command("weasyprint".into()),
//! )?;
//! let summary = generator
//!     .run(Mode::Report, InputSet::Directory("flight-01".into()), |event| {
//!         eprintln!("{}", event.message)
//!     })
//!     .await?;
//! eprintln!("{} of {} succeeded", summary.succeeded, summary.total);
//! # Ok(())
//! # }
//! ```
//!
//! [`Generator::run`] must be awaited on a tokio runtime
//! with process and fs support; a current-thread runtime is
//! enough since CPU-bound work runs on the generator's own
//! worker pool.

#[macro_use]
mod parse;
#[cfg(test)]
mod fixtures;

pub mod error;
pub mod segments;
pub mod metadata;
pub mod palette;
pub mod request;
pub mod tool;
pub mod transcode;
pub mod pool;
pub mod report;
pub mod merge;
pub mod pipeline;

pub mod cli;

pub use crate::error::Error;
pub use crate::metadata::Metadata;
pub use crate::palette::{Palette, PaletteChoice};
pub use crate::pipeline::{Generator, InputSet, Mode, ProgressEvent, RunSummary, TaskOutcome};
pub use crate::report::{HtmlToPdf, PdfBackend};
pub use crate::request::{Encoding, ProcessingRequest, Radiometric, RunConfig};
pub use crate::tool::ThermalTool;
