//! One-call conversion entry points.
//!
//! These wrap [`ItemStore`], [`Converter`] and [`ChromeRenderer`] for the
//! common case: a list of files and folders in, PDF(s) out. Use the session
//! API directly when you need progress events, cancellation or a custom
//! [`SequentialRenderer`](crate::SequentialRenderer).

use crate::config::ConversionSettings;
use crate::error::Img2PdfError;
use crate::output::RunOutcome;
use crate::pipeline::html::ChromeRenderer;
use crate::progress::EventSink;
use crate::session::Converter;
use crate::store::ItemStore;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Build a store from `inputs`, expanding directories (non-recursive).
///
/// Unsupported files and unreadable directories are skipped with a warning.
pub fn collect_inputs<I, P>(inputs: I) -> ItemStore
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let mut store = ItemStore::new();
    for input in inputs {
        let path: PathBuf = input.into();
        if path.is_dir() {
            match store.add_folder(&path) {
                Ok(n) => debug!("Added {} item(s) from {}", n, path.display()),
                Err(e) => warn!("Cannot read folder {}: {}", path.display(), e),
            }
        } else if store.add([path.clone()]) == 0 && !store.contains(&path) {
            warn!("Ignoring unsupported file {}", path.display());
        }
    }
    store
}

/// Convert `inputs` (files or folders, in order) according to `settings`.
///
/// HTML documents are rendered with a headless browser on the calling task
/// before the rest of the work moves to the blocking pool. That pass blocks
/// the thread: on a multi-thread runtime it goes through
/// `block_in_place`, on a current-thread runtime it stalls every other task
/// until it is done.
///
/// # Errors
/// Returns `Err(Img2PdfError)` only when the run as a whole fails: no
/// items, nothing convertible, or the output could not be written.
/// Per-item failures are listed in the returned report.
///
/// # Example
/// ```rust,no_run
/// use img2pdf::{convert, ConversionSettings, OutputMode};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let settings = ConversionSettings::builder()
///     .mode(OutputMode::AllInOne)
///     .output("scans.pdf")
///     .build()?;
/// let outcome = convert(["scans/"], &settings).await?;
/// println!("{:?}", outcome);
/// # Ok(())
/// # }
/// ```
pub async fn convert<I, P>(inputs: I, settings: &ConversionSettings) -> Result<RunOutcome, Img2PdfError>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    let store = collect_inputs(inputs);
    let renderer = ChromeRenderer::from_settings(settings);
    Converter::new()
        .run(&store, settings.clone(), Box::new(renderer), EventSink::disabled())
        .await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<I, P>(inputs: I, settings: &ConversionSettings) -> Result<RunOutcome, Img2PdfError>
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    tokio::runtime::Runtime::new()
        .map_err(|e| Img2PdfError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert(inputs, settings))
}
