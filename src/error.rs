use std::{path::PathBuf, process::ExitStatus};

use thiserror::Error;

/// Failures the pipeline distinguishes between.
///
/// `Usage` aborts a run before any file is touched. Every other variant is
/// scoped to a single source image and ends up as a failed task.
#[derive(Debug, Error)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("invalid image container: {0}")]
    Format(String),

    #[error("not a thermal image (no DJI infrared XMP marker)")]
    NotThermal,

    #[error("`{tool}` exited with {status}")]
    ToolFailed { tool: String, status: ExitStatus },

    #[error("expected output {} was not produced", .0.display())]
    MissingOutput(PathBuf),

    #[error("encoding failed: {0}")]
    Encoding(String),
}

impl Error {
    pub fn usage(msg: impl Into<String>) -> Self {
        Error::Usage(msg.into())
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Error::Encoding(msg.into())
    }
}
