#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use lopdf::{
    content::{Content, Operation},
    dictionary, Document, Object, Stream,
};
use tempfile::TempDir;
use thermal_report::{
    HtmlToPdf, Palette, PdfBackend, ProcessingRequest, ThermalTool,
};

#[path = "../../src/fixtures.rs"]
pub mod fixtures;

pub use fixtures::Fixture;

/// Stand-in for `dji_irp`. Writes a 4x2 buffer, prints what
/// the real tool prints, sleeps for sources named `*slow*`
/// and fails for `*broken*`. Overlapping calls are recorded
/// by touching the overlap marker, default lookups by
/// appending the source name to the defaults log.
const TOOL: &str = r#"#!/bin/sh
action=""; src=""; out=""
while [ $# -gt 0 ]; do
  case "$1" in
    --version) echo "APP version 1.7 (fake)" >&2; exit 0;;
    -a) action="$2"; shift 2;;
    -s) src="$2"; shift 2;;
    -o) out="$2"; shift 2;;
    *) shift 2;;
  esac
done
name=$(basename "$src")
if ! mkdir "@LOCK@" 2>/dev/null; then
  touch "@OVERLAP@"
  held=0
else
  held=1
fi
case "$name" in *slow*) sleep 0.4;; esac
release() { [ "$held" = 1 ] && rmdir "@LOCK@"; }
case "$name" in *broken*) release; echo "cannot decode $name" >&2; exit 1;; esac
if [ "$action" = "measure" ] && [ "$out" = "/dev/null" ]; then
  echo "$name" >> "@DEFAULTS_LOG@"
  echo "Change distance from 5.00 to 1.00"
  echo "Change humidity from 70.00 to 20.00"
  echo "Change emissivity from 0.95 to 0.10"
  echo "Change ambient_temperature from 25.00 to 0.00"
  echo "Change reflection_temperature from 23.00 to 0.00"
elif [ "$action" = "measure" ]; then
  head -c 32 /dev/zero > "$out"
  echo "image  width : 4"
  echo "image height : 2"
else
  head -c 24 /dev/zero | tr '\000' '\200' > "$out"
  echo "image  width : 4"
  echo "image height : 2"
  echo "Color bar adaptive range is [21.5, 35.25]"
fi
release
exit 0
"#;

pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let ws = Workspace { dir };
        fs::create_dir_all(ws.path("in"))?;
        fs::create_dir_all(ws.path("luts"))?;
        let lut: Vec<[u8; 3]> = (0..=255u8).map(|i| [i, i / 2, 255 - i]).collect();
        for palette in Palette::ALL {
            fs::write(
                palette.lut_path(&ws.path("luts")),
                serde_json::to_vec(&lut)?,
            )?;
        }
        Ok(ws)
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn source(&self, name: &str, fixture: Fixture) -> Result<PathBuf> {
        let path = self.path("in").join(name);
        fs::write(&path, fixture.jpeg())?;
        Ok(path)
    }

    pub fn tool(&self) -> Result<ThermalTool> {
        let script = TOOL
            .replace("@LOCK@", &self.path("tool.lock").display().to_string())
            .replace("@OVERLAP@", &self.path("overlap").display().to_string())
            .replace("@DEFAULTS_LOG@", &self.path("defaults.log").display().to_string());
        let exe = self.path("dji_irp");
        fs::write(&exe, script)?;
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))?;
        Ok(ThermalTool::new(exe))
    }

    /// Stand-in for `weasyprint`: consumes stdin and copies a
    /// prepared one-page PDF to its second argument.
    pub fn renderer_command(&self, text: &str) -> Result<PdfBackend> {
        let page = self.path("page.pdf");
        one_page_pdf(text, &page)?;
        let exe = self.path("weasyprint");
        fs::write(
            &exe,
            format!("#!/bin/sh\ncat > /dev/null\ncp \"{}\" \"$2\"\n", page.display()),
        )?;
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755))?;
        Ok(PdfBackend::Command(exe))
    }

    pub fn request(&self, workers: usize) -> ProcessingRequest {
        let mut request = ProcessingRequest {
            workers,
            ..Default::default()
        };
        request.paths.output_dir = self.path("out");
        request.paths.temp_dir = self.path("temps");
        request.paths.lut_dir = self.path("luts");
        request
    }

    /// Sources the tool was asked for default values of.
    pub fn default_lookups(&self) -> Result<Vec<String>> {
        match fs::read_to_string(self.path("defaults.log")) {
            Ok(log) => Ok(log.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(vec![]),
            Err(e) => Err(e.into()),
        }
    }

    pub fn overlap_detected(&self) -> bool {
        self.path("overlap").exists()
    }

    pub fn files_in(&self, rel: &str) -> Result<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(self.path(rel))?
            .map(|e| Ok(e?.path()))
            .collect::<Result<_>>()?;
        files.sort();
        Ok(files)
    }
}

/// In-process renderer writing one page that shows the
/// report title.
pub struct FakePdf;

impl HtmlToPdf for FakePdf {
    fn render(&self, html: &str, pdf: &Path) -> Result<()> {
        let start = html.find("<title>").context("no title")? + "<title>".len();
        let end = html[start..].find("</title>").context("unterminated title")?;
        one_page_pdf(&html[start..start + end], pdf)
    }
}

/// [`FakePdf`] that also keeps every HTML document it was
/// given.
#[derive(Default)]
pub struct RecordingPdf {
    pub documents: Mutex<Vec<String>>,
}

impl HtmlToPdf for RecordingPdf {
    fn render(&self, html: &str, pdf: &Path) -> Result<()> {
        self.documents.lock().unwrap().push(html.to_string());
        FakePdf.render(html, pdf)
    }
}

pub fn fake_backend() -> PdfBackend {
    PdfBackend::Library(Arc::new(FakePdf))
}

pub fn one_page_pdf(text: &str, path: &Path) -> Result<()> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let content = Content {
        operations: vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), 10.into()]),
            Operation::new("Td", vec![20.into(), 100.into()]),
            Operation::new("Tj", vec![Object::string_literal(text)]),
            Operation::new("ET", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        "MediaBox" => vec![0.into(), 0.into(), 400.into(), 200.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)?;
    Ok(())
}

pub fn page_texts(path: &Path) -> Result<Vec<String>> {
    let doc = Document::load(path)?;
    doc.get_pages()
        .into_iter()
        .map(|(_, id)| Ok(String::from_utf8_lossy(&doc.get_page_content(id)?).into_owned()))
        .collect()
}
