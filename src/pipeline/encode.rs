//! Page encoding: [`RenderedPage`] → single-page PDF bytes.
//!
//! The page is exactly the size of the bitmap (one pixel per point) and
//! holds one image XObject painted over the full MediaBox.
//!
//! `Quality::Original` embeds the raw RGB samples and lets lopdf Flate them,
//! so nothing is lost. Every other level embeds a baseline JPEG (DCTDecode)
//! produced by the `image` crate at that level.

use super::normalize::RenderedPage;
use crate::config::Quality;
use image::codecs::jpeg::JpegEncoder;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use thiserror::Error;
use tracing::debug;

/// Why a page could not be turned into PDF bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("page has zero size")]
    EmptyPage,

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] image::ImageError),

    #[error("PDF serialisation failed: {0}")]
    Pdf(String),
}

/// Encode one page as a complete single-page PDF.
pub fn encode_page(page: &RenderedPage, quality: Quality) -> Result<Vec<u8>, EncodeError> {
    let mut doc = page_document(page, quality)?;
    let mut out = Vec::new();
    doc.save_to(&mut out)
        .map_err(|e| EncodeError::Pdf(e.to_string()))?;
    debug!(
        "Encoded {}x{} page at {:?} → {} bytes",
        page.width(),
        page.height(),
        quality,
        out.len()
    );
    Ok(out)
}

/// Build the in-memory single-page document for `page`.
pub fn page_document(page: &RenderedPage, quality: Quality) -> Result<Document, EncodeError> {
    let (w, h) = (page.width() as i64, page.height() as i64);
    if w == 0 || h == 0 {
        return Err(EncodeError::EmptyPage);
    }

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => w,
        "Height" => h,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    let image_stream = match quality.level() {
        None => Stream::new(image_dict, page.image.as_raw().clone()),
        Some(level) => {
            let mut jpeg = Vec::new();
            JpegEncoder::new_with_quality(&mut jpeg, level).encode_image(&page.image)?;
            let mut dict = image_dict;
            dict.set("Filter", "DCTDecode");
            Stream::new(dict, jpeg).with_compression(false)
        }
    };
    let image_id = doc.add_object(image_stream);

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    Object::Integer(w),
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(h),
                    Object::Integer(0),
                    Object::Integer(0),
                ],
            ),
            Operation::new("Do", vec![Object::Name(b"Im0".to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_bytes = content
        .encode()
        .map_err(|e| EncodeError::Pdf(e.to_string()))?;
    let content_id = doc.add_object(Stream::new(dictionary! {}, content_bytes));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), Object::Integer(w), Object::Integer(h)],
        "Resources" => dictionary! {
            "XObject" => dictionary! { "Im0" => image_id },
        },
        "Contents" => content_id,
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
    doc.compress();

    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn page(w: u32, h: u32) -> RenderedPage {
        RenderedPage::new(RgbImage::from_pixel(w, h, Rgb([30, 120, 200])))
    }

    fn image_filter(doc: &Document) -> Option<Vec<u8>> {
        for obj in doc.objects.values() {
            if let Object::Stream(s) = obj {
                let is_image = s
                    .dict
                    .get(b"Subtype")
                    .and_then(|o| o.as_name())
                    .map(|n| n == b"Image")
                    .unwrap_or(false);
                if is_image {
                    return s
                        .dict
                        .get(b"Filter")
                        .and_then(|o| o.as_name())
                        .ok()
                        .map(|n| n.to_vec());
                }
            }
        }
        None
    }

    #[test]
    fn single_page_with_pixel_mediabox() {
        let bytes = encode_page(&page(40, 30), Quality::High).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);

        let page_id = pages[&1];
        let dict = doc.get_dictionary(page_id).unwrap();
        let mediabox = dict.get(b"MediaBox").unwrap().as_array().unwrap();
        let dims: Vec<i64> = mediabox.iter().map(|o| o.as_i64().unwrap()).collect();
        assert_eq!(dims, vec![0, 0, 40, 30]);
    }

    #[test]
    fn lossy_levels_embed_jpeg() {
        let bytes = encode_page(&page(16, 16), Quality::Low).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(image_filter(&doc).as_deref(), Some(&b"DCTDecode"[..]));
    }

    #[test]
    fn original_is_lossless_flate() {
        let bytes = encode_page(&page(16, 16), Quality::Original).unwrap();
        let doc = Document::load_mem(&bytes).unwrap();
        assert_eq!(image_filter(&doc).as_deref(), Some(&b"FlateDecode"[..]));
    }

    #[test]
    fn lower_quality_is_not_larger() {
        let mut img = RgbImage::new(64, 64);
        for (x, y, p) in img.enumerate_pixels_mut() {
            *p = Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8]);
        }
        let page = RenderedPage::new(img);
        let high = encode_page(&page, Quality::High).unwrap();
        let low = encode_page(&page, Quality::Low).unwrap();
        assert!(low.len() <= high.len());
    }

    #[test]
    fn zero_size_page_is_rejected() {
        let err = encode_page(&page(0, 10), Quality::High).unwrap_err();
        assert!(matches!(err, EncodeError::EmptyPage));
    }
}
