//! Run coordination: admission, the two execution phases, cancellation and
//! temporary-file cleanup.
//!
//! ## Phases
//!
//! ```text
//! Idle ─▶ RenderingHtml ─▶ BuildingPlan ─▶ MergingOrWriting ─▶ Completed
//!   │      (calling ctx)                   (blocking pool)   ├▶ Failed
//!   └──────────────────────────────────────────────────────── └▶ Canceled
//! ```
//!
//! 1. [`ConversionSession::render_html`] renders every HTML item, one by one,
//!    on the context that calls it. The browser handle never leaves that
//!    context. `RenderingHtml` is skipped when the run has no HTML items.
//! 2. [`ConversionSession::finish`] freezes the [`ConversionPlan`] and moves
//!    image normalisation plus assembly to `spawn_blocking`.
//!
//! The cancel flag is polled before every item in both phases. Whatever the
//! terminal state, the run's [`TempArtifactSet`] is cleaned exactly once.
//!
//! ## Example
//!
//! ```rust,no_run
//! use img2pdf::{ChromeRenderer, ConversionSettings, Converter, EventSink, ItemStore};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = ItemStore::new();
//! store.add(["cover.html", "scan-1.png", "scan-2.jpg"]);
//!
//! let settings = ConversionSettings::builder().output("book.pdf").build()?;
//! let renderer = ChromeRenderer::from_settings(&settings);
//!
//! let converter = Converter::new();
//! let mut session = converter.begin(&store, settings, Box::new(renderer), EventSink::disabled())?;
//! session.render_html();
//! let outcome = session.finish().await?;
//! println!("{:?}", outcome);
//! # Ok(())
//! # }
//! ```

use crate::config::{ConversionSettings, OutputMode};
use crate::error::{Img2PdfError, ItemError};
use crate::output::{ConversionOutput, ConversionStats, ItemFailure, RunOutcome};
use crate::pipeline::assemble::{MergeOutcome, PdfAssembler};
use crate::pipeline::html::SequentialRenderer;
use crate::pipeline::normalize::normalize;
use crate::pipeline::plan::{ConversionPlan, PlanAction, PlanEntry};
use crate::progress::{ConversionEvent, EventSink, ItemStage};
use crate::store::{ItemStore, SourceItem, SourceKind};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;
use tokio::runtime::RuntimeFlavor;
use tracing::{debug, error, info, warn};

// ── Cancellation ─────────────────────────────────────────────────────────

/// Shared cancel flag for one run. Cheap to clone; any clone may trip it.
///
/// Checked cooperatively at item boundaries; an item already in progress
/// runs to completion first.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

// ── State ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Idle,
    RenderingHtml,
    BuildingPlan,
    MergingOrWriting,
    Completed,
    Failed,
    Canceled,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Failed | SessionState::Canceled
        )
    }
}

// ── Temporary artifacts ──────────────────────────────────────────────────

/// Intermediate files of one run, inside a private temporary directory.
///
/// [`cleanup`](Self::cleanup) deletes every tracked file and the directory.
/// It is idempotent and also runs on drop, so no artifact outlives the set.
#[derive(Debug)]
pub struct TempArtifactSet {
    dir: Option<TempDir>,
    paths: Vec<PathBuf>,
}

impl TempArtifactSet {
    pub fn new() -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("img2pdf-run-").tempdir()?;
        debug!("Temp artifacts in {}", dir.path().display());
        Ok(Self {
            dir: Some(dir),
            paths: Vec::new(),
        })
    }

    /// Reserve and track a new artifact path for an item called `stem`.
    ///
    /// Names are unique within the set even for equal stems.
    pub fn allocate(&mut self, stem: &str) -> io::Result<PathBuf> {
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| io::Error::other("temporary artifacts already cleaned up"))?;
        let path = dir
            .path()
            .join(format!("{:04}-{}.pdf", self.paths.len() + 1, stem));
        self.paths.push(path.clone());
        Ok(path)
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_ref().map(|d| d.path())
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_cleaned(&self) -> bool {
        self.dir.is_none()
    }

    /// Delete every tracked artifact and the directory. Returns how many
    /// files were removed. Errors are logged, never returned.
    pub fn cleanup(&mut self) -> usize {
        let Some(dir) = self.dir.take() else {
            return 0;
        };
        let mut removed = 0;
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove {}: {}", path.display(), e),
            }
        }
        let dir_path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            warn!("Could not remove {}: {}", dir_path.display(), e);
        }
        debug!("Cleaned up {} temp artifact(s)", removed);
        removed
    }
}

impl Drop for TempArtifactSet {
    fn drop(&mut self) {
        self.cleanup();
    }
}

// ── Converter ────────────────────────────────────────────────────────────

/// Admits at most one active run at a time.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    active: Arc<AtomicBool>,
}

/// Clears the converter's active flag when the run ends or is dropped.
#[derive(Debug)]
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` while a session started by this converter has not ended.
    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Admit a run over a snapshot of `store`.
    ///
    /// Fails with [`Img2PdfError::NoItems`] on an empty store (nothing is
    /// created) and with [`Img2PdfError::AlreadyRunning`] while another
    /// session of this converter is alive. Emits `Started` on success.
    pub fn begin(
        &self,
        store: &ItemStore,
        settings: ConversionSettings,
        renderer: Box<dyn SequentialRenderer>,
        events: EventSink,
    ) -> Result<ConversionSession, Img2PdfError> {
        if store.is_empty() {
            return Err(Img2PdfError::NoItems);
        }
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Img2PdfError::AlreadyRunning);
        }
        let guard = ActiveGuard(Arc::clone(&self.active));

        let temp = TempArtifactSet::new()
            .map_err(|e| Img2PdfError::Internal(format!("cannot create temp directory: {}", e)))?;

        let items = store.snapshot();
        info!(
            "Starting conversion of {} item(s), mode {:?}, quality {:?}",
            items.len(),
            settings.mode,
            settings.quality
        );
        events.emit(ConversionEvent::Started { total: items.len() });

        Ok(ConversionSession {
            items,
            settings,
            renderer: Some(renderer),
            events,
            cancel: CancelHandle::new(),
            state: SessionState::Idle,
            temp: Some(temp),
            html_results: BTreeMap::new(),
            html_done: false,
            render_duration_ms: 0,
            started: Instant::now(),
            guard: Some(guard),
        })
    }

    /// Admit and drive a whole run: HTML pass on the current context, then
    /// the background phase.
    ///
    /// The HTML pass blocks the calling thread while the browser works. On a
    /// multi-thread runtime it runs inside [`tokio::task::block_in_place`],
    /// so other tasks keep moving. On a current-thread runtime nothing else
    /// runs until the last HTML item is done; drive
    /// [`ConversionSession::render_html`] yourself if that matters.
    pub async fn run(
        &self,
        store: &ItemStore,
        settings: ConversionSettings,
        renderer: Box<dyn SequentialRenderer>,
        events: EventSink,
    ) -> Result<RunOutcome, Img2PdfError> {
        let mut session = self.begin(store, settings, renderer, events)?;
        blocking_in_place(|| session.render_html());
        session.finish().await
    }
}

/// Run `f` on this thread, handing the worker's other tasks off first when
/// the runtime allows it.
fn blocking_in_place<R>(f: impl FnOnce() -> R) -> R {
    match tokio::runtime::Handle::try_current().map(|h| h.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

// ── Session ──────────────────────────────────────────────────────────────

/// One admitted run. Created by [`Converter::begin`].
pub struct ConversionSession {
    items: Vec<SourceItem>,
    settings: ConversionSettings,
    renderer: Option<Box<dyn SequentialRenderer>>,
    events: EventSink,
    cancel: CancelHandle,
    state: SessionState,
    temp: Option<TempArtifactSet>,
    html_results: BTreeMap<usize, Result<PathBuf, ItemError>>,
    html_done: bool,
    render_duration_ms: u64,
    started: Instant,
    guard: Option<ActiveGuard>,
}

impl std::fmt::Debug for ConversionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionSession")
            .field("items", &self.items.len())
            .field("state", &self.state)
            .field("canceled", &self.cancel.is_canceled())
            .finish()
    }
}

impl ConversionSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The order snapshot this run works on.
    pub fn items(&self) -> &[SourceItem] {
        &self.items
    }

    pub fn settings(&self) -> &ConversionSettings {
        &self.settings
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Directory holding this run's intermediate files, until cleanup.
    pub fn temp_dir(&self) -> Option<PathBuf> {
        self.temp
            .as_ref()
            .and_then(|t| t.dir())
            .map(Path::to_path_buf)
    }

    /// Phase 1: render every HTML item, in run order, on this context.
    ///
    /// Per-item failures are recorded and the pass continues. Once the
    /// renderer reports that no engine exists, the remaining HTML items are
    /// skipped without another attempt. The renderer is released when the
    /// pass ends. Calling this more than once is a no-op.
    pub fn render_html(&mut self) {
        if self.html_done {
            return;
        }
        self.html_done = true;

        let html_positions: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.kind() == SourceKind::Html)
            .map(|(i, _)| i)
            .collect();

        if html_positions.is_empty() {
            self.release_renderer();
            return;
        }

        self.state = SessionState::RenderingHtml;
        let start = Instant::now();
        let total = self.items.len();
        let mut engine_missing: Option<ItemError> = None;

        for position in html_positions {
            if self.cancel.is_canceled() {
                info!("Canceled during HTML rendering");
                break;
            }
            let item = self.items[position].clone();
            let label = item.label();
            self.events.item(position + 1, total, &label, ItemStage::Started);

            let result = match engine_missing {
                Some(ref e) => Err(e.clone()),
                None => self.render_one(item.path(), &item.stem()),
            };

            match result {
                Ok(artifact) => {
                    debug!("Rendered {} → {}", label, artifact.display());
                    self.events.item(position + 1, total, &label, ItemStage::Succeeded);
                    self.html_results.insert(position, Ok(artifact));
                }
                Err(e) => {
                    if e.is_engine_missing() && engine_missing.is_none() {
                        error!("{}", e);
                        engine_missing = Some(e.clone());
                    } else {
                        warn!("Skipping {}: {}", label, e);
                    }
                    self.events.log(format!("Skipped {}: {}", label, e));
                    self.events.item(position + 1, total, &label, ItemStage::Failed);
                    self.html_results.insert(position, Err(e));
                }
            }
        }

        self.render_duration_ms = start.elapsed().as_millis() as u64;
        self.release_renderer();
    }

    fn render_one(&mut self, html: &Path, stem: &str) -> Result<PathBuf, ItemError> {
        let out = self
            .temp
            .as_mut()
            .ok_or_else(|| io::Error::other("temporary artifacts unavailable"))
            .and_then(|t| t.allocate(stem))
            .map_err(|e| ItemError::WriteFailed {
                path: html.to_path_buf(),
                detail: e.to_string(),
            })?;
        let renderer = self.renderer.as_mut().ok_or_else(|| ItemError::NoEngine {
            detail: "renderer already released".into(),
        })?;
        renderer.render_to_pdf(html, &out)?;
        Ok(out)
    }

    fn release_renderer(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            renderer.release();
        }
    }

    /// Phase 2: build the plan and run normalisation plus assembly on the
    /// blocking pool.
    ///
    /// Runs [`render_html`](Self::render_html) first if it was not called.
    /// Returns `Ok(RunOutcome::Canceled)` when the cancel flag was observed,
    /// and `Err` when the run as a whole failed. Temporary artifacts are gone
    /// when this returns, in every case.
    pub async fn finish(&mut self) -> Result<RunOutcome, Img2PdfError> {
        if self.state.is_terminal() {
            return Err(Img2PdfError::Internal("session already finished".into()));
        }
        self.render_html();

        if self.cancel.is_canceled() {
            return Ok(self.end_canceled(Vec::new()));
        }

        self.state = SessionState::BuildingPlan;
        let plan = ConversionPlan::build(&self.items, &self.html_results);
        debug!("Plan: {} entries, {} runnable", plan.len(), plan.runnable().count());

        self.state = SessionState::MergingOrWriting;
        let mut temp = match self.temp.take() {
            Some(t) => t,
            None => {
                return self.end_failed(Img2PdfError::Internal(
                    "temporary artifacts unavailable".into(),
                ))
            }
        };
        let settings = self.settings.clone();
        let events = self.events.clone();
        let cancel = self.cancel.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let result = execute_plan(&plan, &settings, &mut temp, &events, &cancel);
            temp.cleanup();
            result
        })
        .await;

        let result = match joined {
            Ok(result) => result,
            Err(e) => Err(Img2PdfError::Internal(format!("Conversion task panicked: {}", e))),
        };

        match result {
            Ok(Phase2::Canceled { written }) => Ok(self.end_canceled(written)),
            Ok(Phase2::Done {
                outputs,
                pages,
                failures,
            }) => Ok(self.end_completed(outputs, pages, failures)),
            Err(e) => self.end_failed(e),
        }
    }

    fn phase1_failures(&self) -> Vec<ItemFailure> {
        self.html_results
            .iter()
            .filter_map(|(&position, r)| {
                r.as_ref().err().map(|e| ItemFailure {
                    index: position + 1,
                    path: self.items[position].path().to_path_buf(),
                    error: e.clone(),
                })
            })
            .collect()
    }

    fn end_completed(
        &mut self,
        outputs: Vec<PathBuf>,
        pages: usize,
        phase2_failures: Vec<ItemFailure>,
    ) -> RunOutcome {
        let mut failures = self.phase1_failures();
        failures.extend(phase2_failures);
        failures.sort_by_key(|f| f.index);

        let failed_positions: HashSet<usize> = failures.iter().map(|f| f.index).collect();
        let stats = ConversionStats {
            total_items: self.items.len(),
            succeeded: self.items.len() - failed_positions.len(),
            failed: failed_positions.len(),
            html_rendered: self.html_results.values().filter(|r| r.is_ok()).count(),
            pages_written: pages,
            render_duration_ms: self.render_duration_ms,
            total_duration_ms: self.started.elapsed().as_millis() as u64,
        };
        info!(
            "Conversion complete: {}/{} item(s), {} page(s) in {}ms",
            stats.succeeded, stats.total_items, stats.pages_written, stats.total_duration_ms
        );

        self.events.emit(ConversionEvent::Completed {
            outputs: outputs.clone(),
        });
        self.terminate(SessionState::Completed);
        RunOutcome::Completed(ConversionOutput {
            outputs,
            stats,
            failures,
        })
    }

    fn end_canceled(&mut self, written: Vec<PathBuf>) -> RunOutcome {
        info!("Conversion canceled ({} file(s) kept)", written.len());
        self.events.emit(ConversionEvent::Canceled);
        self.terminate(SessionState::Canceled);
        RunOutcome::Canceled { written }
    }

    fn end_failed(&mut self, e: Img2PdfError) -> Result<RunOutcome, Img2PdfError> {
        error!("Conversion failed: {}", e);
        self.events.emit(ConversionEvent::Failed {
            reason: e.to_string(),
        });
        self.terminate(SessionState::Failed);
        Err(e)
    }

    fn terminate(&mut self, state: SessionState) {
        self.release_renderer();
        if let Some(mut temp) = self.temp.take() {
            temp.cleanup();
        }
        self.state = state;
        self.guard.take();
    }
}

impl Drop for ConversionSession {
    fn drop(&mut self) {
        self.release_renderer();
    }
}

// ── Phase 2 (blocking pool) ──────────────────────────────────────────────

enum Phase2 {
    Done {
        outputs: Vec<PathBuf>,
        pages: usize,
        failures: Vec<ItemFailure>,
    },
    Canceled {
        written: Vec<PathBuf>,
    },
}

fn execute_plan(
    plan: &ConversionPlan,
    settings: &ConversionSettings,
    temp: &mut TempArtifactSet,
    events: &EventSink,
    cancel: &CancelHandle,
) -> Result<Phase2, Img2PdfError> {
    match settings.mode {
        OutputMode::AllInOne => merge_all(plan, settings, temp, events, cancel),
        OutputMode::OneByOne => write_each(plan, settings, events, cancel),
    }
}

fn record_failure(
    entry: &PlanEntry,
    total: usize,
    error: ItemError,
    events: &EventSink,
    failures: &mut Vec<ItemFailure>,
) {
    let label = entry.item.label();
    warn!("Skipping {}: {}", label, error);
    events.log(format!("Skipped {}: {}", label, error));
    events.item(entry.ordinal(), total, &label, ItemStage::Failed);
    failures.push(ItemFailure {
        index: entry.ordinal(),
        path: entry.item.path().to_path_buf(),
        error,
    });
}

fn no_valid_items(total: usize, plan: &ConversionPlan, failures: &[ItemFailure]) -> Img2PdfError {
    let first_error = failures
        .first()
        .map(|f| f.error.to_string())
        .or_else(|| {
            plan.entries().iter().find_map(|e| match &e.action {
                PlanAction::Skip(err) => Some(err.to_string()),
                _ => None,
            })
        })
        .unwrap_or_else(|| "no item produced output".to_string());
    Img2PdfError::NoValidItems { total, first_error }
}

fn ensure_dir(dir: &Path) -> Result<(), Img2PdfError> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| Img2PdfError::OutputDirFailed {
        path: dir.to_path_buf(),
        source: e,
    })
}

/// AllInOne: one temp PDF per image, then a page-level merge of every
/// artifact in plan order.
fn merge_all(
    plan: &ConversionPlan,
    settings: &ConversionSettings,
    temp: &mut TempArtifactSet,
    events: &EventSink,
    cancel: &CancelHandle,
) -> Result<Phase2, Img2PdfError> {
    let total = plan.len();
    let mut artifacts: Vec<PathBuf> = Vec::new();
    let mut owners: Vec<&PlanEntry> = Vec::new();
    let mut failures = Vec::new();

    for entry in plan.entries() {
        if cancel.is_canceled() {
            return Ok(Phase2::Canceled { written: vec![] });
        }
        match &entry.action {
            PlanAction::Skip(_) => {}
            PlanAction::UseArtifact(path) => {
                artifacts.push(path.clone());
                owners.push(entry);
            }
            PlanAction::Normalize => {
                let label = entry.item.label();
                events.item(entry.ordinal(), total, &label, ItemStage::Started);
                let result = normalize(entry.item.path(), settings).and_then(|page| {
                    let out = temp
                        .allocate(&entry.item.stem())
                        .map_err(|e| ItemError::WriteFailed {
                            path: entry.item.path().to_path_buf(),
                            detail: e.to_string(),
                        })?;
                    PdfAssembler::write_single(&page, &out, settings.quality)?;
                    Ok(out)
                });
                match result {
                    Ok(out) => {
                        events.item(entry.ordinal(), total, &label, ItemStage::Succeeded);
                        artifacts.push(out);
                        owners.push(entry);
                    }
                    Err(e) => record_failure(entry, total, e, events, &mut failures),
                }
            }
        }
    }

    if artifacts.is_empty() {
        return Err(no_valid_items(total, plan, &failures));
    }

    let output = &settings.output;
    if let Some(parent) = output.parent() {
        ensure_dir(parent)?;
    }

    match PdfAssembler::merge_cancellable(&artifacts, output, cancel)? {
        MergeOutcome::Canceled => Ok(Phase2::Canceled { written: vec![] }),
        MergeOutcome::Written(report) => {
            for (path, detail) in report.skipped {
                if let Some(pos) = artifacts.iter().position(|a| *a == path) {
                    let entry = owners[pos];
                    let error = ItemError::WriteFailed {
                        path: entry.item.path().to_path_buf(),
                        detail,
                    };
                    record_failure(entry, total, error, events, &mut failures);
                }
            }
            failures.sort_by_key(|f| f.index);
            Ok(Phase2::Done {
                outputs: vec![output.clone()],
                pages: report.pages,
                failures,
            })
        }
    }
}

/// OneByOne: `<output dir>/<stem>.pdf` per item. Files already written stay
/// in place if the run is canceled.
fn write_each(
    plan: &ConversionPlan,
    settings: &ConversionSettings,
    events: &EventSink,
    cancel: &CancelHandle,
) -> Result<Phase2, Img2PdfError> {
    let total = plan.len();
    let out_dir = &settings.output;
    ensure_dir(out_dir)?;

    let mut outputs: Vec<PathBuf> = Vec::new();
    let mut failures = Vec::new();
    let mut pages = 0;

    for entry in plan.entries() {
        if cancel.is_canceled() {
            return Ok(Phase2::Canceled { written: outputs });
        }
        if let PlanAction::Skip(_) = entry.action {
            continue;
        }

        let label = entry.item.label();
        events.item(entry.ordinal(), total, &label, ItemStage::Started);

        let target = out_dir.join(format!("{}.pdf", entry.item.stem()));
        let result = match &entry.action {
            PlanAction::UseArtifact(artifact) => PdfAssembler::copy_artifact(artifact, &target),
            _ => normalize(entry.item.path(), settings)
                .and_then(|page| PdfAssembler::write_single(&page, &target, settings.quality)),
        };

        match result {
            Ok(()) => {
                pages += 1;
                if outputs.contains(&target) {
                    warn!("{} overwrote an earlier output {}", label, target.display());
                    events.log(format!("Overwrote {} with {}", target.display(), label));
                } else {
                    outputs.push(target);
                }
                events.item(entry.ordinal(), total, &label, ItemStage::Succeeded);
            }
            Err(e) => record_failure(entry, total, e, events, &mut failures),
        }
    }

    if outputs.is_empty() {
        return Err(no_valid_items(total, plan, &failures));
    }
    Ok(Phase2::Done {
        outputs,
        pages,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Quality;
    use image::{Rgb, RgbImage};
    use std::sync::Mutex;

    /// Writes a blank page per document; fails for paths containing "bad".
    struct FakeRenderer {
        released: Arc<Mutex<usize>>,
        missing_engine: bool,
    }

    impl FakeRenderer {
        fn new() -> (Self, Arc<Mutex<usize>>) {
            let released = Arc::new(Mutex::new(0));
            (
                Self {
                    released: Arc::clone(&released),
                    missing_engine: false,
                },
                released,
            )
        }
    }

    impl SequentialRenderer for FakeRenderer {
        fn render_to_pdf(&mut self, html: &Path, out: &Path) -> Result<(), ItemError> {
            if self.missing_engine {
                return Err(ItemError::NoEngine {
                    detail: "fake".into(),
                });
            }
            let name = html.file_name().unwrap().to_string_lossy();
            if name.contains("bad") {
                return Err(ItemError::RenderFailed {
                    path: html.to_path_buf(),
                    detail: "fake failure".into(),
                });
            }
            let page = crate::pipeline::normalize::RenderedPage::new(RgbImage::new(20, 10));
            PdfAssembler::write_single(&page, out, Quality::High)
        }

        fn release(&mut self) {
            *self.released.lock().unwrap() += 1;
        }
    }

    fn png(dir: &Path, name: &str) -> PathBuf {
        let p = dir.join(name);
        RgbImage::from_pixel(8, 8, Rgb([1, 2, 3])).save(&p).unwrap();
        p
    }

    fn settings(mode: OutputMode, output: PathBuf) -> ConversionSettings {
        ConversionSettings::builder()
            .mode(mode)
            .output(output)
            .build()
            .unwrap()
    }

    #[test]
    fn temp_set_cleanup_is_idempotent() {
        let mut temp = TempArtifactSet::new().unwrap();
        let dir = temp.dir().unwrap().to_path_buf();
        let a = temp.allocate("a").unwrap();
        let b = temp.allocate("a").unwrap();
        assert_ne!(a, b);
        std::fs::write(&a, b"x").unwrap();

        assert_eq!(temp.cleanup(), 1);
        assert_eq!(temp.cleanup(), 0);
        assert!(temp.is_cleaned());
        assert!(!dir.exists());
        assert!(temp.allocate("c").is_err());
    }

    #[test]
    fn temp_set_cleans_on_drop() {
        let temp = TempArtifactSet::new().unwrap();
        let dir = temp.dir().unwrap().to_path_buf();
        drop(temp);
        assert!(!dir.exists());
    }

    #[test]
    fn cancel_handle_is_shared() {
        let a = CancelHandle::new();
        let b = a.clone();
        assert!(!a.is_canceled());
        b.cancel();
        assert!(a.is_canceled());
    }

    #[test]
    fn empty_store_is_rejected_without_state() {
        let converter = Converter::new();
        let (renderer, _) = FakeRenderer::new();
        let err = converter
            .begin(
                &ItemStore::new(),
                ConversionSettings::default(),
                Box::new(renderer),
                EventSink::disabled(),
            )
            .unwrap_err();
        assert!(matches!(err, Img2PdfError::NoItems));
        assert!(!converter.is_running());
    }

    #[test]
    fn second_run_is_rejected_while_active() {
        let mut store = ItemStore::new();
        store.add(["a.png"]);
        let converter = Converter::new();

        let (r1, _) = FakeRenderer::new();
        let session = converter
            .begin(&store, ConversionSettings::default(), Box::new(r1), EventSink::disabled())
            .unwrap();
        assert!(converter.is_running());

        let (r2, _) = FakeRenderer::new();
        let err = converter
            .begin(&store, ConversionSettings::default(), Box::new(r2), EventSink::disabled())
            .unwrap_err();
        assert!(matches!(err, Img2PdfError::AlreadyRunning));

        drop(session);
        assert!(!converter.is_running());
    }

    #[tokio::test]
    async fn html_phase_then_merge() {
        let dir = tempfile::tempdir().unwrap();
        let a = png(dir.path(), "a.png");
        let b = dir.path().join("b.html");
        std::fs::write(&b, "<p>b</p>").unwrap();

        let mut store = ItemStore::new();
        store.add([a, b]);
        let out = dir.path().join("out/all.pdf");
        let (renderer, released) = FakeRenderer::new();
        let (events, mut rx) = EventSink::channel();

        let converter = Converter::new();
        let mut session = converter
            .begin(
                &store,
                settings(OutputMode::AllInOne, out.clone()),
                Box::new(renderer),
                events,
            )
            .unwrap();
        let temp_dir = session.temp_dir().unwrap();

        session.render_html();
        assert_eq!(session.state(), SessionState::RenderingHtml);
        assert_eq!(*released.lock().unwrap(), 1);

        let outcome = session.finish().await.unwrap();
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!temp_dir.exists());
        assert!(!converter.is_running());
        assert_eq!(*released.lock().unwrap(), 1);

        let output = outcome.completed().unwrap();
        assert_eq!(output.outputs, vec![out.clone()]);
        assert_eq!(output.stats.pages_written, 2);
        assert_eq!(output.stats.html_rendered, 1);

        let doc = lopdf::Document::load(&out).unwrap();
        assert_eq!(doc.get_pages().len(), 2);

        let mut last = None;
        while let Ok(e) = rx.try_recv() {
            last = Some(e);
        }
        assert!(matches!(last, Some(ConversionEvent::Completed { .. })));
    }

    #[tokio::test]
    async fn missing_engine_skips_html_but_converts_images() {
        let dir = tempfile::tempdir().unwrap();
        let a = png(dir.path(), "a.png");
        let mut store = ItemStore::new();
        store.add([
            dir.path().join("x.html"),
            a,
            dir.path().join("y.html"),
        ]);
        let (mut renderer, _) = FakeRenderer::new();
        renderer.missing_engine = true;

        let out = dir.path().join("all.pdf");
        let outcome = Converter::new()
            .run(
                &store,
                settings(OutputMode::AllInOne, out.clone()),
                Box::new(renderer),
                EventSink::disabled(),
            )
            .await
            .unwrap();

        let output = outcome.completed().unwrap();
        assert_eq!(output.stats.pages_written, 1);
        assert_eq!(output.failures.len(), 2);
        assert!(output.failures.iter().all(|f| f.error.is_engine_missing()));
        assert_eq!(
            output.failures.iter().map(|f| f.index).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[tokio::test]
    async fn all_failed_is_no_valid_items() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.png");
        std::fs::write(&bad, b"nope").unwrap();
        let mut store = ItemStore::new();
        store.add([bad, dir.path().join("bad.html")]);
        let (renderer, _) = FakeRenderer::new();
        let (events, mut rx) = EventSink::channel();

        let out_dir = dir.path().join("split");
        let converter = Converter::new();
        let mut session = converter
            .begin(
                &store,
                settings(OutputMode::OneByOne, out_dir),
                Box::new(renderer),
                events,
            )
            .unwrap();
        let err = session.finish().await.unwrap_err();
        assert!(matches!(err, Img2PdfError::NoValidItems { total: 2, .. }));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(!converter.is_running());

        let mut last = None;
        while let Ok(e) = rx.try_recv() {
            last = Some(e);
        }
        assert!(matches!(last, Some(ConversionEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn cancel_during_html_phase_ends_canceled() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ItemStore::new();
        store.add([dir.path().join("a.html"), dir.path().join("b.html")]);
        let (renderer, released) = FakeRenderer::new();

        let converter = Converter::new();
        let mut session = converter
            .begin(
                &store,
                settings(OutputMode::AllInOne, dir.path().join("all.pdf")),
                Box::new(renderer),
                EventSink::disabled(),
            )
            .unwrap();
        let temp_dir = session.temp_dir().unwrap();
        session.cancel();
        session.render_html();
        let outcome = session.finish().await.unwrap();

        assert!(outcome.is_canceled());
        assert_eq!(session.state(), SessionState::Canceled);
        assert!(!temp_dir.exists());
        assert!(!dir.path().join("all.pdf").exists());
        assert_eq!(*released.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn finish_twice_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ItemStore::new();
        store.add([png(dir.path(), "a.png")]);
        let (renderer, _) = FakeRenderer::new();
        let mut session = Converter::new()
            .begin(
                &store,
                settings(OutputMode::OneByOne, dir.path().join("o")),
                Box::new(renderer),
                EventSink::disabled(),
            )
            .unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        session.finish().await.unwrap();
        assert!(session.finish().await.is_err());
    }

    /// Blocks on the runtime from inside the render call. That panics on a
    /// plain async worker and only works once the worker was handed off.
    struct BlocksOnRuntime;

    impl SequentialRenderer for BlocksOnRuntime {
        fn render_to_pdf(&mut self, _html: &Path, out: &Path) -> Result<(), ItemError> {
            tokio::runtime::Handle::current().block_on(tokio::task::yield_now());
            let page = crate::pipeline::normalize::RenderedPage::new(RgbImage::new(6, 4));
            PdfAssembler::write_single(&page, out, Quality::High)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn run_moves_html_pass_off_the_async_worker() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("page.html");
        std::fs::write(&html, "<p>x</p>").unwrap();
        let mut store = ItemStore::new();
        store.add([html, png(dir.path(), "p.png")]);

        let out = dir.path().join("all.pdf");
        let outcome = Converter::new()
            .run(
                &store,
                settings(OutputMode::AllInOne, out.clone()),
                Box::new(BlocksOnRuntime),
                EventSink::disabled(),
            )
            .await
            .unwrap();
        assert_eq!(outcome.completed().unwrap().stats.html_rendered, 1);
    }

    #[test]
    fn blocking_in_place_without_runtime_runs_inline() {
        assert_eq!(blocking_in_place(|| 7), 7);
    }

    #[tokio::test]
    async fn one_by_one_name_collision_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src_a = dir.path().join("one");
        let src_b = dir.path().join("two");
        std::fs::create_dir_all(&src_a).unwrap();
        std::fs::create_dir_all(&src_b).unwrap();
        let mut store = ItemStore::new();
        store.add([png(&src_a, "same.png"), png(&src_b, "same.png")]);
        let (renderer, _) = FakeRenderer::new();
        let (events, mut rx) = EventSink::channel();

        let out_dir = dir.path().join("out");
        let outcome = Converter::new()
            .run(
                &store,
                settings(OutputMode::OneByOne, out_dir.clone()),
                Box::new(renderer),
                events,
            )
            .await
            .unwrap();
        let output = outcome.completed().unwrap();
        assert_eq!(output.outputs, vec![out_dir.join("same.pdf")]);
        assert_eq!(output.stats.pages_written, 2);

        let mut logs = Vec::new();
        while let Ok(e) = rx.try_recv() {
            if let ConversionEvent::Log { message } = e {
                logs.push(message);
            }
        }
        assert!(logs.iter().any(|m| m.contains("Overwrote")));
    }
}
