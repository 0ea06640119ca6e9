//! Image normalisation: decode, flatten to RGB, optionally resize to page.
//!
//! The output of this stage is a [`RenderedPage`]: an opaque RGB bitmap whose
//! pixel size is also its page size in PDF points.

use crate::config::ConversionSettings;
use crate::error::ItemError;
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbImage};
use std::path::Path;
use tracing::{debug, instrument};

/// An RGB bitmap ready to become one PDF page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub image: RgbImage,
}

impl RenderedPage {
    pub fn new(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Decode the image at `path` and apply the colour and size policy of
/// `settings`.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn normalize(path: &Path, settings: &ConversionSettings) -> Result<RenderedPage, ItemError> {
    let img = decode(path)?;
    let rgb = flatten_on_white(img);

    let rgb = if settings.keep_original_size {
        rgb
    } else {
        resize_to_reference(rgb, settings.reference_length(), settings.force_portrait)
    };

    debug!("Normalised {} → {}x{}", path.display(), rgb.width(), rgb.height());
    Ok(RenderedPage::new(rgb))
}

fn decode(path: &Path) -> Result<DynamicImage, ItemError> {
    let decode_err = |detail: String| ItemError::DecodeFailed {
        path: path.to_path_buf(),
        detail,
    };
    ImageReader::open(path)
        .map_err(|e| decode_err(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_err(e.to_string()))?
        .decode()
        .map_err(|e| decode_err(e.to_string()))
}

/// Convert any colour model to 8-bit RGB, compositing transparent pixels
/// over white.
pub fn flatten_on_white(img: DynamicImage) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::new(w, h);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let a = a as u32;
        let blend = |c: u8| ((c as u32 * a + 255 * (255 - a) + 127) / 255) as u8;
        dst.0 = [blend(r), blend(g), blend(b)];
    }
    out
}

/// Target pixel size when pinning one edge to `reference`.
///
/// With `portrait` the height is pinned, otherwise the width. The other edge
/// scales proportionally, truncated, and never drops below one pixel.
pub fn target_dimensions(width: u32, height: u32, reference: u32, portrait: bool) -> (u32, u32) {
    if width == 0 || height == 0 {
        return (width, height);
    }
    let scale = |edge: u32, pinned: u32| -> u32 {
        let scaled = edge as u64 * reference as u64 / pinned as u64;
        scaled.clamp(1, u32::MAX as u64) as u32
    };
    if portrait {
        (scale(width, height), reference)
    } else {
        (reference, scale(height, width))
    }
}

fn resize_to_reference(img: RgbImage, reference: u32, portrait: bool) -> RgbImage {
    let (w, h) = target_dimensions(img.width(), img.height(), reference, portrait);
    if (w, h) == img.dimensions() {
        return img;
    }
    image::imageops::resize(&img, w, h, FilterType::Lanczos3)
}
