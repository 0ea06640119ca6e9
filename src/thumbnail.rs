//! Best-effort preview thumbnails for the item list.
//!
//! Previews are cosmetic. [`request_preview`] hands the decode to the
//! blocking pool and returns immediately; the caller may await the handle or
//! drop it. Every failure (missing file, corrupt data, HTML item) yields
//! `None` and a `debug!` line, never an error.

use crate::store::{SourceItem, SourceKind};
use image::imageops::FilterType;
use image::ImageReader;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;
use tracing::debug;

/// Bounding box of a preview, in pixels.
pub const PREVIEW_SIZE: u32 = 64;

/// A small RGBA rendition of an image item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preview {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Row-major RGBA8 pixels, `width * height * 4` bytes.
    pub pixels: Vec<u8>,
}

/// Start a preview for `item` on the blocking pool.
///
/// Must be called from within a Tokio runtime.
pub fn request_preview(item: &SourceItem) -> JoinHandle<Option<Preview>> {
    let item = item.clone();
    tokio::task::spawn_blocking(move || match item.kind() {
        SourceKind::Image => generate_preview(item.path()),
        SourceKind::Html => None,
    })
}

/// Decode `path` and shrink it into a [`PREVIEW_SIZE`] box, preserving
/// aspect ratio. Images already smaller than the box are not enlarged.
pub fn generate_preview(path: &Path) -> Option<Preview> {
    let img = match ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| e.to_string())
        .and_then(|r| r.decode().map_err(|e| e.to_string()))
    {
        Ok(img) => img,
        Err(e) => {
            debug!("No preview for {}: {}", path.display(), e);
            return None;
        }
    };

    let thumb = if img.width() > PREVIEW_SIZE || img.height() > PREVIEW_SIZE {
        img.resize(PREVIEW_SIZE, PREVIEW_SIZE, FilterType::Lanczos3)
    } else {
        img
    };
    let rgba = thumb.to_rgba8();

    Some(Preview {
        path: path.to_path_buf(),
        width: rgba.width(),
        height: rgba.height(),
        pixels: rgba.into_raw(),
    })
}
