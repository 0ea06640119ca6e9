//! Configuration types for image/HTML-to-PDF conversion.
//!
//! Every knob of a run lives in [`ConversionSettings`], built via its
//! [`ConversionSettingsBuilder`]. A session clones the settings when it
//! starts, so later changes by the caller never reach a running job.

use crate::error::Img2PdfError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Target length, in PDF points, of the page edge that resizing pins.
///
/// 842 pt is the height of an A4 portrait page at 72 dpi.
pub const REFERENCE_LENGTH: u32 = 842;

/// Settings for one conversion run.
///
/// # Example
/// ```rust
/// use img2pdf::{ConversionSettings, OutputMode, Quality};
///
/// let settings = ConversionSettings::builder()
///     .mode(OutputMode::AllInOne)
///     .quality(Quality::High)
///     .output("/tmp/out/all.pdf")
///     .build()
///     .unwrap();
/// assert_eq!(settings.quality.level(), Some(95));
/// ```
#[derive(Debug, Clone)]
pub struct ConversionSettings {
    /// One PDF per item, or everything merged into one file. Default: AllInOne.
    pub mode: OutputMode,

    /// Lossy compression level for embedded page bitmaps. Default: Original.
    pub quality: Quality,

    /// When resizing, pin the page height (true) or the page width (false)
    /// to [`REFERENCE_LENGTH`]. Default: true.
    pub force_portrait: bool,

    /// Keep each image at its native pixel size. Default: true.
    ///
    /// When false, every image is resampled (Lanczos3) so that the pinned
    /// edge equals [`REFERENCE_LENGTH`] while preserving aspect ratio.
    pub keep_original_size: bool,

    /// Output location: the merged file for AllInOne, the target directory
    /// for OneByOne.
    pub output: PathBuf,

    /// Upper bound on how long a page may settle (fonts, async CSS, images)
    /// before it is captured. Default: 3 s.
    pub settle_timeout: Duration,

    /// Viewport used for HTML capture, in CSS pixels. Default: 1920×1080.
    pub browser_window: (u32, u32),

    /// Explicit browser executable. If None, the host is searched.
    pub browser_path: Option<PathBuf>,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            mode: OutputMode::default(),
            quality: Quality::default(),
            force_portrait: true,
            keep_original_size: true,
            output: PathBuf::from("output.pdf"),
            settle_timeout: Duration::from_secs(3),
            browser_window: (1920, 1080),
            browser_path: None,
        }
    }
}

impl ConversionSettings {
    /// Create a new builder for `ConversionSettings`.
    pub fn builder() -> ConversionSettingsBuilder {
        ConversionSettingsBuilder {
            settings: Self::default(),
        }
    }

    /// Target edge length used when `keep_original_size` is false.
    pub fn reference_length(&self) -> u32 {
        REFERENCE_LENGTH
    }
}

/// Builder for [`ConversionSettings`].
#[derive(Debug)]
pub struct ConversionSettingsBuilder {
    settings: ConversionSettings,
}

impl ConversionSettingsBuilder {
    pub fn mode(mut self, mode: OutputMode) -> Self {
        self.settings.mode = mode;
        self
    }

    pub fn quality(mut self, quality: Quality) -> Self {
        self.settings.quality = quality;
        self
    }

    pub fn force_portrait(mut self, v: bool) -> Self {
        self.settings.force_portrait = v;
        self
    }

    pub fn keep_original_size(mut self, v: bool) -> Self {
        self.settings.keep_original_size = v;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.output = path.into();
        self
    }

    pub fn settle_timeout(mut self, timeout: Duration) -> Self {
        self.settings.settle_timeout = timeout;
        self
    }

    pub fn browser_window(mut self, width: u32, height: u32) -> Self {
        self.settings.browser_window = (width, height);
        self
    }

    pub fn browser_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.browser_path = Some(path.into());
        self
    }

    /// Build the settings, validating constraints.
    pub fn build(self) -> Result<ConversionSettings, Img2PdfError> {
        let s = &self.settings;
        if s.output.as_os_str().is_empty() {
            return Err(Img2PdfError::InvalidConfig(
                "output path must not be empty".into(),
            ));
        }
        let (w, h) = s.browser_window;
        if w == 0 || h == 0 {
            return Err(Img2PdfError::InvalidConfig(format!(
                "browser window must be non-zero, got {}x{}",
                w, h
            )));
        }
        if s.settle_timeout > Duration::from_secs(120) {
            return Err(Img2PdfError::InvalidConfig(format!(
                "settle timeout must be at most 120s, got {:?}",
                s.settle_timeout
            )));
        }
        Ok(self.settings)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// How the run lays out its output files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// One `<stem>.pdf` per item inside the output directory.
    OneByOne,
    /// Every item concatenated, in order, into one PDF. (default)
    #[default]
    AllInOne,
}

/// Compression level requested for embedded page bitmaps.
///
/// | Variant | Level | Encoding |
/// |---------|-------|----------|
/// | Original | 100 | lossless (Flate), no explicit level |
/// | High | 95 | JPEG |
/// | Medium | 75 | JPEG |
/// | Low | 50 | JPEG |
///
/// `Original` means the same thing in both output modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Quality {
    #[default]
    Original,
    High,
    Medium,
    Low,
}

impl Quality {
    /// Numeric quality on the 0–100 scale.
    pub fn numeric(self) -> u8 {
        match self {
            Quality::Original => 100,
            Quality::High => 95,
            Quality::Medium => 75,
            Quality::Low => 50,
        }
    }

    /// Explicit lossy level to hand the encoder, or None for `Original`.
    pub fn level(self) -> Option<u8> {
        match self {
            Quality::Original => None,
            other => Some(other.numeric()),
        }
    }
}
