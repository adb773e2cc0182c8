//! Per-image HTML reports and their conversion to PDF.
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    process::Stdio,
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};
use tokio::{io::AsyncWriteExt, process::Command};

use crate::{
    error::Error,
    metadata::Metadata,
    palette::Palette,
    pool::WorkerPool,
    request::{Param, ProcessingRequest},
    tool::{Defaults, ProcessOutput},
};

const BUILTIN_TEMPLATE: &str = include_str!("../templates/report.html");
const NOT_AVAILABLE: &str = "N/A";

/// Something that turns an HTML document into a PDF file,
/// in process.
pub trait HtmlToPdf: Send + Sync {
    fn render(&self, html: &str, pdf: &Path) -> Result<()>;
}

/// How PDFs are produced; fixed for a whole run.
#[derive(Clone)]
pub enum PdfBackend {
    /// Called on the worker pool.
    Library(Arc<dyn HtmlToPdf>),
    /// `<exe> - <pdf>` with the HTML on stdin.
    Command(PathBuf),
}

impl fmt::Debug for PdfBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfBackend::Library(_) => f.write_str("Library"),
            PdfBackend::Command(exe) => f.debug_tuple("Command").field(exe).finish(),
        }
    }
}

impl PdfBackend {
    pub async fn render(&self, html: String, pdf: &Path, pool: &WorkerPool) -> Result<()> {
        match self {
            PdfBackend::Library(renderer) => {
                let renderer = renderer.clone();
                let target = pdf.to_path_buf();
                pool.run(move || renderer.render(&html, &target)).await?;
            }
            PdfBackend::Command(exe) => render_with_command(exe, &html, pdf).await?,
        }
        if tokio::fs::metadata(pdf).await.is_err() {
            bail!(Error::MissingOutput(pdf.to_path_buf()));
        }
        Ok(())
    }
}

async fn render_with_command(exe: &Path, html: &str, pdf: &Path) -> Result<()> {
    debug!("{} - {}", exe.display(), pdf.display());
    let mut child = Command::new(exe)
        .arg("-")
        .arg(pdf)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("cannot run {}", exe.display()))?;

    let mut stdin = child.stdin.take().context("renderer stdin unavailable")?;
    stdin
        .write_all(html.as_bytes())
        .await
        .context("piping HTML to renderer")?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        debug!(
            "renderer stderr: {}",
            String::from_utf8_lossy(&output.stderr).trim_end()
        );
        bail!(Error::ToolFailed {
            tool: exe
                .file_name()
                .unwrap_or(exe.as_os_str())
                .to_string_lossy()
                .into_owned(),
            status: output.status,
        });
    }
    Ok(())
}

/// Check `exe` is WeasyPrint; returns its version banner.
pub async fn probe_command(exe: &Path) -> Result<String> {
    let output = Command::new(exe)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("cannot run {}", exe.display()))?;
    let banner = String::from_utf8_lossy(&output.stdout);
    if !banner.starts_with("WeasyPrint version") {
        bail!(Error::usage(format!(
            "{} does not look like WeasyPrint",
            exe.display()
        )));
    }
    Ok(banner.trim_end().to_string())
}

/// HTML template with `{{ name }}` placeholders.
#[derive(Debug, Clone)]
pub struct Template {
    source: String,
}

impl Default for Template {
    fn default() -> Self {
        Template {
            source: BUILTIN_TEMPLATE.to_string(),
        }
    }
}

impl Template {
    pub fn new<S: Into<String>>(source: S) -> Self {
        Template {
            source: source.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read template {}", path.display()))?;
        Ok(Template { source })
    }

    /// Fill every placeholder with its HTML-escaped value.
    /// A placeholder without a value is an error.
    pub fn render(&self, fields: &BTreeMap<&'static str, String>) -> Result<String> {
        lazy_static! {
            static ref PLACEHOLDER: Regex = Regex::new(r"\{\{\s*(\w+)\s*\}\}").unwrap();
        }
        if let Some(cap) = PLACEHOLDER
            .captures_iter(&self.source)
            .find(|cap| !fields.contains_key(&cap[1]))
        {
            bail!(Error::encoding(format!("unknown template field `{}`", &cap[1])));
        }
        let html = PLACEHOLDER.replace_all(&self.source, |cap: &Captures| {
            fields.get(&cap[1]).map(|v| escape(v)).unwrap_or_default()
        });
        Ok(html.into_owned())
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// `file://` URI of an absolute path.
pub fn file_uri(path: &Path) -> String {
    let text = path.to_string_lossy().replace('\\', "/");
    let mut uri = String::from("file://");
    if !text.starts_with('/') {
        uri.push('/');
    }
    for b in text.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => {
                uri.push(b as char)
            }
            _ => uri.push_str(&format!("%{:02X}", b)),
        }
    }
    uri
}

/// Everything a report page shows about one image.
pub struct ReportContext<'a> {
    pub source: &'a Path,
    /// Rendered image, absolute.
    pub image: &'a Path,
    pub output: &'a ProcessOutput,
    pub palette: Palette,
    pub palette_colors: String,
    pub request: &'a ProcessingRequest,
    pub defaults: &'a Defaults,
    pub meta: &'a Metadata,
}

impl<'a> ReportContext<'a> {
    pub fn fields(&self) -> BTreeMap<&'static str, String> {
        fn or_na<T, F: FnOnce(&T) -> String>(value: Option<&T>, f: F) -> String {
            value.map_or_else(|| NOT_AVAILABLE.to_string(), f)
        }

        let radiometric = |param| {
            format!(
                "{:?}",
                self.defaults.effective(&self.request.radiometric, param)
            )
        };
        let (min, max) = match self.output.range {
            Some((min, max)) => (format!("{:.1}", min), format!("{:.1}", max)),
            None => (NOT_AVAILABLE.into(), NOT_AVAILABLE.into()),
        };
        let rendering = &self.request.rendering;
        let meta = self.meta;

        let mut f = BTreeMap::new();
        f.insert(
            "filename",
            self.source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        f.insert("image_path", file_uri(self.image));
        f.insert("min_temp", min);
        f.insert("max_temp", max);
        f.insert("palette_colors", self.palette_colors.clone());
        f.insert("palette", self.palette.name().to_string());
        f.insert("width", self.output.width.to_string());
        f.insert("height", self.output.height.to_string());
        for param in Param::ALL {
            f.insert(param.name(), radiometric(param));
        }
        f.insert("colorbar_width", rendering.colorbar_width.to_string());
        f.insert(
            "colorbar_border",
            if rendering.colorbar_border {
                "border: 1px solid #000;".to_string()
            } else {
                String::new()
            },
        );
        f.insert("model", or_na(meta.model.as_ref(), String::clone));
        f.insert("sn", or_na(meta.serial.as_ref(), String::clone));
        f.insert("focal_length", or_na(meta.focal_length.as_ref(), |v| v.to_string()));
        f.insert("aperture", or_na(meta.aperture.as_ref(), |v| format!("{:.1}", v)));
        f.insert("create_time", or_na(meta.create_time.as_ref(), String::clone));
        f.insert("gps", format!("{:.6}, {:.6}", meta.gps.lat, meta.gps.lon));
        f
    }
}
