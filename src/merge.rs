//! Concatenate per-image PDFs into one report.
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

use crate::error::Error;

/// `DJI_Thermal_Report_<YYYY-MM-DD_HH-MM-SS>.pdf`
pub fn report_name(at: NaiveDateTime) -> String {
    format!("DJI_Thermal_Report_{}.pdf", at.format("%Y-%m-%d_%H-%M-%S"))
}

pub fn report_path(output_dir: &Path) -> PathBuf {
    output_dir.join(report_name(Local::now().naive_local()))
}

/// Page attributes a page may take from its ancestors in
/// the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Merge `inputs` into `output`, pages in input order.
///
/// Every page is re-parented to a fresh page tree root, so
/// attributes it inherited from its source tree are copied
/// onto the page first.
pub fn merge_pdfs(inputs: &[PathBuf], output: &Path) -> Result<()> {
    if inputs.is_empty() {
        return Err(Error::encoding("no PDFs to merge").into());
    }

    let mut merged = Document::with_version("1.5");
    let mut pages: Vec<(ObjectId, Dictionary)> = vec![];
    for path in inputs {
        let mut doc = Document::load(path)
            .with_context(|| format!("cannot load PDF {}", path.display()))?;
        doc.renumber_objects_with(merged.max_id + 1);
        merged.max_id = doc.max_id;

        for (_, id) in doc.get_pages() {
            let mut page = doc
                .get_dictionary(id)
                .with_context(|| format!("broken page in {}", path.display()))?
                .clone();
            inherit_attributes(&doc, &mut page)
                .with_context(|| format!("broken page tree in {}", path.display()))?;
            pages.push((id, page));
        }
        for (id, object) in doc.objects {
            match object.type_name().unwrap_or("") {
                "Catalog" | "Pages" | "Page" | "Outlines" | "Outline" => {}
                _ => {
                    merged.objects.insert(id, object);
                }
            }
        }
    }

    let pages_id = merged.new_object_id();
    let mut kids = Vec::with_capacity(pages.len());
    for (id, mut page) in pages {
        page.set("Parent", pages_id);
        merged.objects.insert(id, Object::Dictionary(page));
        kids.push(Object::Reference(id));
    }
    let count = kids.len() as i64;
    merged.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = merged.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    merged.trailer.set("Root", catalog_id);
    merged.renumber_objects();
    merged
        .save(output)
        .with_context(|| format!("cannot write {}", output.display()))?;
    Ok(())
}

/// Copy the [`INHERITABLE`] attributes a page lacks from
/// the nearest ancestor that has them.
fn inherit_attributes(doc: &Document, page: &mut Dictionary) -> Result<()> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;
    while let Some(id) = parent {
        depth += 1;
        if depth > 64 {
            return Err(Error::format("page tree too deep or cyclic").into());
        }
        let node = doc.get_dictionary(id)?;
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key, value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    Ok(())
}
