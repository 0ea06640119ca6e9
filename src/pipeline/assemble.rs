//! PDF assembly: page-level merge of artifacts, and single-page writes.
//!
//! ## Merge
//!
//! Each artifact is loaded with lopdf, its object ids are shifted past the
//! ones already collected, and its pages are appended in page order. Page
//! attributes that a page inherits from its `Pages` ancestors (MediaBox,
//! Resources, CropBox, Rotate) are copied onto the page itself so that the
//! page keeps its geometry once re-parented under the new page tree.
//!
//! An artifact that fails to load or has no pages is logged and skipped; the
//! others are still merged. Objects of an artifact are only committed once
//! all of its pages were read, so a half-broken file never leaves orphans.
//!
//! ## Atomic writes
//!
//! Every output goes to a `.tmp` sibling first and is renamed into place.
//! A failed or canceled write never leaves a truncated PDF at the target.

use super::encode::encode_page;
use super::normalize::RenderedPage;
use crate::config::Quality;
use crate::error::{Img2PdfError, ItemError};
use crate::session::CancelHandle;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Attributes a page may inherit from its ancestors.
const INHERITABLE: &[&[u8]] = &[b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// Object types that belong to a source document's structure and are
/// rebuilt for the merged document.
const STRUCTURAL_TYPES: &[&[u8]] = &[b"Catalog", b"Pages", b"Page", b"Outlines", b"Outline"];

/// Bound on `Parent` chain walks.
const MAX_TREE_DEPTH: usize = 64;

/// Result of a merge that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Pages in the written document.
    pub pages: usize,
    /// Artifacts whose pages were appended.
    pub appended: usize,
    /// Artifacts that were skipped, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// How a merge ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Written(MergeReport),
    /// Cancellation was observed; nothing was written.
    Canceled,
}

/// Stateless facade over the merge and write operations.
pub struct PdfAssembler;

impl PdfAssembler {
    /// Concatenate the pages of `artifacts`, in order, into `output`.
    pub fn merge(artifacts: &[PathBuf], output: &Path) -> Result<MergeReport, Img2PdfError> {
        match Self::merge_cancellable(artifacts, output, &CancelHandle::new())? {
            MergeOutcome::Written(report) => Ok(report),
            MergeOutcome::Canceled => Err(Img2PdfError::Internal(
                "merge canceled without a cancel request".into(),
            )),
        }
    }

    /// Like [`merge`](Self::merge), checking `cancel` before each artifact
    /// and once more before the output is written.
    pub fn merge_cancellable(
        artifacts: &[PathBuf],
        output: &Path,
        cancel: &CancelHandle,
    ) -> Result<MergeOutcome, Img2PdfError> {
        let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();
        let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
        let mut next_id: u32 = 1;
        let mut report = MergeReport::default();

        for path in artifacts {
            if cancel.is_canceled() {
                info!("Merge canceled after {} artifact(s)", report.appended);
                return Ok(MergeOutcome::Canceled);
            }

            match load_artifact(path, next_id) {
                Ok(loaded) => {
                    next_id = loaded.max_id + 1;
                    debug!("Appending {} page(s) from {}", loaded.pages.len(), path.display());
                    objects.extend(loaded.objects);
                    pages.extend(loaded.pages);
                    report.appended += 1;
                }
                Err(detail) => {
                    warn!("Skipping artifact {}: {}", path.display(), detail);
                    report.skipped.push((path.clone(), detail));
                }
            }
        }

        if pages.is_empty() {
            return Err(Img2PdfError::MergeFailed {
                path: output.to_path_buf(),
                detail: "no pages could be appended".into(),
            });
        }
        report.pages = pages.len();

        let mut merged = build_document(objects, pages, next_id);
        let mut bytes = Vec::new();
        merged
            .save_to(&mut bytes)
            .map_err(|e| Img2PdfError::MergeFailed {
                path: output.to_path_buf(),
                detail: e.to_string(),
            })?;

        if cancel.is_canceled() {
            info!("Merge canceled before writing {}", output.display());
            return Ok(MergeOutcome::Canceled);
        }

        write_atomic(output, &bytes).map_err(|e| Img2PdfError::OutputWriteFailed {
            path: output.to_path_buf(),
            source: e,
        })?;
        info!(
            "Merged {} page(s) from {} artifact(s) into {}",
            report.pages,
            report.appended,
            output.display()
        );
        Ok(MergeOutcome::Written(report))
    }

    /// Encode `page` at `quality` and write it as a one-page PDF at `output`.
    pub fn write_single(
        page: &RenderedPage,
        output: &Path,
        quality: Quality,
    ) -> Result<(), ItemError> {
        let bytes = encode_page(page, quality).map_err(|e| ItemError::WriteFailed {
            path: output.to_path_buf(),
            detail: e.to_string(),
        })?;
        write_atomic(output, &bytes).map_err(|e| ItemError::WriteFailed {
            path: output.to_path_buf(),
            detail: e.to_string(),
        })
    }

    /// Copy an existing artifact to `output`.
    pub fn copy_artifact(artifact: &Path, output: &Path) -> Result<(), ItemError> {
        let write_err = |e: io::Error| ItemError::WriteFailed {
            path: output.to_path_buf(),
            detail: e.to_string(),
        };
        let bytes = fs::read(artifact).map_err(write_err)?;
        write_atomic(output, &bytes).map_err(write_err)
    }
}

/// One source document, renumbered and ready to commit.
struct LoadedArtifact {
    objects: BTreeMap<ObjectId, Object>,
    pages: Vec<(ObjectId, Dictionary)>,
    max_id: u32,
}

fn load_artifact(path: &Path, first_id: u32) -> Result<LoadedArtifact, String> {
    let mut doc = Document::load(path).map_err(|e| e.to_string())?;
    doc.renumber_objects_with(first_id);

    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    if page_ids.is_empty() {
        return Err("document has no pages".into());
    }

    let mut pages = Vec::with_capacity(page_ids.len());
    for id in page_ids {
        let mut dict = doc
            .get_dictionary(id)
            .map_err(|e| format!("page object {:?}: {}", id, e))?
            .clone();
        for key in INHERITABLE {
            if !dict.has(key) {
                if let Some(value) = inherited_attribute(&doc, &dict, key) {
                    dict.set(key.to_vec(), value);
                }
            }
        }
        pages.push((id, dict));
    }

    let max_id = doc.max_id;
    let objects = doc
        .objects
        .into_iter()
        .filter(|(_, obj)| !is_structural(obj))
        .collect();

    Ok(LoadedArtifact {
        objects,
        pages,
        max_id,
    })
}

fn inherited_attribute(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(|p| p.as_reference()).ok();
    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_dictionary(parent?).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(|p| p.as_reference()).ok();
    }
    None
}

fn is_structural(obj: &Object) -> bool {
    let dict = match obj {
        Object::Dictionary(d) => d,
        Object::Stream(s) => &s.dict,
        _ => return false,
    };
    dict.get(b"Type")
        .and_then(|t| t.as_name())
        .map(|name| STRUCTURAL_TYPES.iter().any(|t| *t == name))
        .unwrap_or(false)
}

fn build_document(
    objects: BTreeMap<ObjectId, Object>,
    pages: Vec<(ObjectId, Dictionary)>,
    next_id: u32,
) -> Document {
    let mut doc = Document::with_version("1.5");
    doc.objects = objects;
    doc.max_id = next_id;

    let pages_id = doc.new_object_id();
    let kids: Vec<Object> = pages.iter().map(|(id, _)| Object::Reference(*id)).collect();
    let count = kids.len() as i64;

    for (id, mut dict) in pages {
        dict.set("Parent", pages_id);
        doc.objects.insert(id, Object::Dictionary(dict));
    }
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc
}

/// `<output>.tmp` next to `output`.
fn tmp_sibling(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "output.pdf".into());
    name.push(".tmp");
    output.with_file_name(name)
}

/// Write `bytes` to `output` via a temporary sibling and a rename.
pub(crate) fn write_atomic(output: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let tmp = tmp_sibling(output);
    let result = fs::write(&tmp, bytes).and_then(|_| fs::rename(&tmp, output));
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn page(w: u32, h: u32) -> RenderedPage {
        RenderedPage::new(RgbImage::from_pixel(w, h, Rgb([200, 50, 50])))
    }

    fn write_page(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        PdfAssembler::write_single(&page(w, h), &path, Quality::High).unwrap();
        path
    }

    fn media_widths(path: &Path) -> Vec<i64> {
        let doc = Document::load(path).unwrap();
        doc.get_pages()
            .into_values()
            .map(|id| {
                let dict = doc.get_dictionary(id).unwrap();
                let mb = dict.get(b"MediaBox").unwrap().as_array().unwrap();
                mb[2].as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn merge_preserves_artifact_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_page(dir.path(), "a.pdf", 10, 20);
        let b = write_page(dir.path(), "b.pdf", 30, 20);
        let c = write_page(dir.path(), "c.pdf", 50, 20);
        let out = dir.path().join("merged.pdf");

        let report = PdfAssembler::merge(&[c.clone(), a.clone(), b.clone()], &out).unwrap();
        assert_eq!(report.pages, 3);
        assert_eq!(report.appended, 3);
        assert_eq!(media_widths(&out), vec![50, 10, 30]);
    }

    #[test]
    fn merge_skips_broken_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_page(dir.path(), "a.pdf", 10, 10);
        let broken = dir.path().join("broken.pdf");
        fs::write(&broken, b"%PDF-1.5 nonsense").unwrap();
        let missing = dir.path().join("missing.pdf");
        let b = write_page(dir.path(), "b.pdf", 20, 10);
        let out = dir.path().join("merged.pdf");

        let report = PdfAssembler::merge(&[a, broken, missing, b], &out).unwrap();
        assert_eq!(report.pages, 2);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(media_widths(&out), vec![10, 20]);
    }

    #[test]
    fn merge_of_nothing_fails_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("merged.pdf");
        let err = PdfAssembler::merge(&[dir.path().join("nope.pdf")], &out).unwrap_err();
        assert!(matches!(err, Img2PdfError::MergeFailed { .. }));
        assert!(!out.exists());
    }

    #[test]
    fn canceled_merge_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_page(dir.path(), "a.pdf", 10, 10);
        let out = dir.path().join("merged.pdf");
        let cancel = CancelHandle::new();
        cancel.cancel();

        let outcome = PdfAssembler::merge_cancellable(&[a], &out, &cancel).unwrap();
        assert_eq!(outcome, MergeOutcome::Canceled);
        assert!(!out.exists());
        assert!(!tmp_sibling(&out).exists());
    }

    #[test]
    fn merged_pages_inherit_geometry_from_parent() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("inherit.pdf");

        // A page with no MediaBox of its own; the Pages node carries it.
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(lopdf::Stream::new(dictionary! {}, Vec::new()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 77.into(), 88.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog_id);
        doc.save(&src).unwrap();

        let out = dir.path().join("merged.pdf");
        PdfAssembler::merge(&[src], &out).unwrap();
        assert_eq!(media_widths(&out), vec![77]);
    }

    #[test]
    fn write_single_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/deeper/x.pdf");
        PdfAssembler::write_single(&page(8, 8), &out, Quality::Original).unwrap();
        assert!(out.is_file());
        assert!(!tmp_sibling(&out).exists());
    }

    #[test]
    fn tmp_sibling_appends_suffix() {
        assert_eq!(
            tmp_sibling(Path::new("/out/all.pdf")),
            PathBuf::from("/out/all.pdf.tmp")
        );
    }
}
