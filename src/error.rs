//! Error types for the img2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Img2PdfError`] — **Fatal**: the run as a whole is meaningless
//!   (nothing to convert, nothing succeeded, the merged file could not be
//!   written). Returned as `Err(Img2PdfError)` from run-level operations.
//!
//! * [`ItemError`] — **Non-fatal**: a single source item failed (corrupt
//!   image, page that would not load) but every other item is fine. Stored
//!   inside [`crate::output::ItemFailure`] so callers can inspect partial
//!   success rather than losing the whole job to one bad file.
//!
//! Cancellation is neither: a canceled run returns
//! `Ok(RunOutcome::Canceled { .. })`.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the img2pdf library.
///
/// Item-level failures use [`ItemError`] and are collected in the run
/// report rather than propagated here.
#[derive(Debug, Error)]
pub enum Img2PdfError {
    // ── Run admission ─────────────────────────────────────────────────────
    /// A run was requested with an empty item list.
    #[error("No images to convert.\nAdd at least one image or HTML file first.")]
    NoItems,

    /// Another conversion run is still active on this converter.
    #[error("A conversion is already running; wait for it to finish or cancel it")]
    AlreadyRunning,

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The output directory did not exist and could not be created.
    #[error("Cannot create output directory '{path}': {source}")]
    OutputDirFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Run outcome ───────────────────────────────────────────────────────
    /// Every item failed or was skipped; there is nothing to write.
    #[error("No valid files to convert ({total} attempted).\nFirst error: {first_error}")]
    NoValidItems { total: usize, first_error: String },

    /// The merged document could not be assembled or serialised.
    #[error("Failed to merge PDF into '{path}': {detail}")]
    MergeFailed { path: PathBuf, detail: String },

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single source item.
///
/// The run continues past any of these; it only fails when no item at all
/// produced output.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ItemError {
    /// The image could not be opened or decoded.
    #[error("'{path}': decode failed: {detail}")]
    DecodeFailed { path: PathBuf, detail: String },

    /// The HTML page failed to load or could not be captured.
    #[error("'{path}': HTML render failed: {detail}")]
    RenderFailed { path: PathBuf, detail: String },

    /// No compatible browser engine is available on this host.
    ///
    /// Fatal for the HTML items of a run, harmless for the image items.
    #[error("No compatible browser engine found: {detail}\nInstall Chrome, Chromium or Edge, or set IMG2PDF_BROWSER.")]
    NoEngine { detail: String },

    /// The per-item PDF could not be encoded or written.
    #[error("'{path}': write failed: {detail}")]
    WriteFailed { path: PathBuf, detail: String },
}

impl ItemError {
    /// `true` when the failure should stop all further HTML rendering.
    pub fn is_engine_missing(&self) -> bool {
        matches!(self, ItemError::NoEngine { .. })
    }
}
