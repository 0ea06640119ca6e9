//! # img2pdf
//!
//! Convert an ordered mix of images and HTML pages into PDF: one merged
//! document, or one file per item.
//!
//! ## Pipeline Overview
//!
//! ```text
//! ItemStore (ordered, de-duplicated)
//!  │
//!  ├─ 1. Snapshot  the run works on a frozen copy of the order
//!  ├─ 2. HTML      headless browser, one page at a time, calling context
//!  ├─ 3. Plan      per-item action: use artifact / normalise / skip
//!  ├─ 4. Images    decode, flatten on white, optional resize (spawn_blocking)
//!  └─ 5. Assemble  page-level merge into one PDF, or one PDF per item
//! ```
//!
//! A bad item never aborts the run: it is logged, reported and skipped.
//! The run only fails when nothing could be converted or the output could
//! not be written. Cancellation is cooperative and checked before every item.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use img2pdf::{convert, ConversionSettings, Quality};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConversionSettings::builder()
//!         .quality(Quality::High)
//!         .output("bundle.pdf")
//!         .build()?;
//!     let outcome = convert(["cover.html", "page-1.png", "page-2.jpg"], &settings).await?;
//!     if let Some(output) = outcome.completed() {
//!         eprintln!("{} page(s), {} failure(s)",
//!             output.stats.pages_written,
//!             output.failures.len());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `img2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! img2pdf = { version = "0.1", default-features = false }
//! ```
//!
//! ## HTML rendering
//!
//! HTML items need a Chromium-family browser (Chrome, Edge or Chromium).
//! It is found on `PATH` or in the usual install locations, or forced with
//! the `IMG2PDF_BROWSER` environment variable. Without one, HTML items are
//! skipped and images are still converted.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod sort;
pub mod store;
pub mod thumbnail;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ConversionSettings, ConversionSettingsBuilder, OutputMode, Quality, REFERENCE_LENGTH};
pub use convert::{collect_inputs, convert, convert_sync};
pub use error::{Img2PdfError, ItemError};
pub use output::{ConversionOutput, ConversionStats, ItemFailure, RunOutcome};
pub use pipeline::assemble::PdfAssembler;
pub use pipeline::html::{ChromeRenderer, SequentialRenderer};
pub use pipeline::normalize::RenderedPage;
pub use progress::{ConversionEvent, EventObserver, EventSink, ItemStage};
pub use session::{CancelHandle, ConversionSession, Converter, SessionState, TempArtifactSet};
pub use sort::{sort_async, sort_items, SortKey};
pub use store::{ItemStore, ReconcileError, SourceItem, SourceKind};
pub use thumbnail::{request_preview, Preview};
