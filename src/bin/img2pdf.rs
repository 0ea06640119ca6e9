//! CLI binary for img2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ConversionSettings`, renders the event stream and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use img2pdf::{
    collect_inputs, request_preview, sort_async, ChromeRenderer, ConversionEvent,
    ConversionSettings, Converter, EventSink, ItemStage, OutputMode, Quality, RunOutcome, SortKey,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::io;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Event rendering with indicatif ───────────────────────────────────────────

/// Drain the run's event stream into a progress bar until every sender is
/// gone. An item counts once, on its first success or failure, even when
/// both phases report it.
async fn render_events(mut rx: UnboundedReceiver<ConversionEvent>, quiet_logs: bool) {
    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS),
    );
    bar.set_prefix("Preparing");
    bar.enable_steady_tick(Duration::from_millis(80));

    let mut done: HashSet<usize> = HashSet::new();

    while let Some(event) = rx.recv().await {
        match event {
            ConversionEvent::Started { total } => {
                bar.set_style(
                    ProgressStyle::with_template(
                        "{spinner:.cyan} {prefix:.bold}  \
                         [{bar:42.green/238}] {pos:>3}/{len} items  \
                         ⏱ {elapsed_precise}  {msg}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  ")
                    .tick_strings(TICKS),
                );
                bar.set_length(total as u64);
                bar.set_prefix("Converting");
                bar.println(format!(
                    "{} {}",
                    cyan("◆"),
                    bold(&format!("Starting conversion of {total} item(s)…"))
                ));
            }
            ConversionEvent::ItemProgress {
                index,
                total,
                label,
                stage,
            } => match stage {
                ItemStage::Started => bar.set_message(label),
                ItemStage::Succeeded => {
                    if done.insert(index) {
                        bar.println(format!("  {} {:>3}/{:<3}  {}", green("✓"), index, total, label));
                        bar.inc(1);
                    }
                }
                ItemStage::Failed => {
                    if done.insert(index) {
                        bar.println(format!("  {} {:>3}/{:<3}  {}", red("✗"), index, total, label));
                        bar.inc(1);
                    }
                }
            },
            ConversionEvent::Log { message } => {
                if !quiet_logs {
                    bar.println(format!("    {}", dim(&message)));
                }
            }
            ConversionEvent::Completed { .. }
            | ConversionEvent::Failed { .. }
            | ConversionEvent::Canceled => bar.finish_and_clear(),
        }
    }
    bar.finish_and_clear();
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Merge everything into one PDF, in the order given
  img2pdf cover.html scans/ back.png -o book.pdf

  # One PDF per item into a folder
  img2pdf --mode one scans/ -o pdfs/

  # Sort by modification time, JPEG quality 75, pages resized to 842 pt
  img2pdf --sort mtime --quality medium --resize photos/ -o album.pdf

  # Landscape resize (width pinned instead of height)
  img2pdf --resize --landscape slides/ -o slides.pdf

  # Show the resolved item order without converting
  img2pdf --list --sort name scans/

  # JSON run report
  img2pdf --json scans/ -o out.pdf > report.json

QUALITY:
  original   lossless (Flate), no explicit level   (default)
  high       JPEG 95
  medium     JPEG 75
  low        JPEG 50

ENVIRONMENT VARIABLES:
  IMG2PDF_BROWSER   Path to a Chrome / Edge / Chromium executable
  RUST_LOG          Override the log filter (e.g. img2pdf=debug)

HTML items need a Chromium-family browser. Without one, they are skipped
and images are still converted. Press Ctrl-C to cancel a running job.
"#;

/// Convert images and HTML pages into PDF.
#[derive(Parser, Debug)]
#[command(
    name = "img2pdf",
    version,
    about = "Convert images and HTML pages into PDF",
    long_about = "Convert an ordered mix of images (png, jpg, bmp, gif, tiff, webp) and HTML \
pages into one merged PDF or one PDF per item. HTML is rendered with a headless Chrome, Edge \
or Chromium.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Input files or folders, in order. Folders are scanned (not recursively).
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Output PDF (mode all) or output folder (mode one).
    #[arg(short, long, env = "IMG2PDF_OUTPUT")]
    output: Option<PathBuf>,

    /// Output layout.
    #[arg(long, env = "IMG2PDF_MODE", value_enum, default_value = "all")]
    mode: ModeArg,

    /// Compression of embedded page images.
    #[arg(long, env = "IMG2PDF_QUALITY", value_enum, default_value = "original")]
    quality: QualityArg,

    /// Resize every image so its pinned edge is 842 pt.
    #[arg(long, env = "IMG2PDF_RESIZE")]
    resize: bool,

    /// Pin the page height when resizing (default).
    #[arg(long, conflicts_with = "landscape")]
    portrait: bool,

    /// Pin the page width when resizing.
    #[arg(long)]
    landscape: bool,

    /// Reorder items before converting.
    #[arg(long, env = "IMG2PDF_SORT", value_enum)]
    sort: Option<SortArg>,

    /// Browser executable for HTML items.
    #[arg(long, env = "IMG2PDF_BROWSER")]
    browser: Option<PathBuf>,

    /// Settle budget per HTML page, in milliseconds.
    #[arg(long, env = "IMG2PDF_SETTLE_MS", default_value_t = 3000,
          value_parser = clap::value_parser!(u64).range(0..=120_000))]
    settle_ms: u64,

    /// Print the resolved item order and exit.
    #[arg(long)]
    list: bool,

    /// Print the run report as JSON on stdout.
    #[arg(long, env = "IMG2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "IMG2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMG2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMG2PDF_QUIET")]
    quiet: bool,
}

impl Cli {
    /// `--portrait` wins; otherwise portrait unless `--landscape` is given.
    fn pins_height(&self) -> bool {
        self.portrait || !self.landscape
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    One,
    All,
}

impl From<ModeArg> for OutputMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::One => OutputMode::OneByOne,
            ModeArg::All => OutputMode::AllInOne,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum QualityArg {
    Original,
    High,
    Medium,
    Low,
}

impl From<QualityArg> for Quality {
    fn from(v: QualityArg) -> Self {
        match v {
            QualityArg::Original => Quality::Original,
            QualityArg::High => Quality::High,
            QualityArg::Medium => Quality::Medium,
            QualityArg::Low => Quality::Low,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SortArg {
    Name,
    Mtime,
    Ctime,
    Size,
}

impl From<SortArg> for SortKey {
    fn from(v: SortArg) -> Self {
        match v {
            SortArg::Name => SortKey::Name,
            SortArg::Mtime => SortKey::ModifiedTime,
            SortArg::Ctime => SortKey::CreatedTime,
            SortArg::Size => SortKey::Size,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs; verbose always wins.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !cli.list;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Collect and order items ──────────────────────────────────────────
    let mut store = collect_inputs(cli.inputs.iter().cloned());
    if store.is_empty() {
        anyhow::bail!("No images to convert: none of the inputs is a supported image or HTML file");
    }

    if let Some(key) = cli.sort {
        let sorted = sort_async(store.snapshot(), key.into())
            .await
            .context("Sorting failed")?;
        store
            .reconcile_order(sorted)
            .context("Sorted order no longer matches the item list")?;
    }

    if cli.list {
        print_list(&store).await;
        return Ok(());
    }

    // ── Build settings ───────────────────────────────────────────────────
    let settings = build_settings(&cli)?;

    let (events, rx) = if show_progress {
        let (sink, rx) = EventSink::channel();
        (sink, Some(rx))
    } else {
        (EventSink::disabled(), None)
    };
    let progress_task = rx.map(|rx| tokio::spawn(render_events(rx, cli.quiet)));

    // ── Run conversion ───────────────────────────────────────────────────
    let renderer = ChromeRenderer::from_settings(&settings);
    let converter = Converter::new();
    let mut session = converter
        .begin(&store, settings.clone(), Box::new(renderer), events)
        .context("Cannot start conversion")?;

    let cancel = session.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    // The browser pass runs on this thread; block_in_place lets the runtime
    // keep serving the Ctrl-C listener and the progress task meanwhile.
    tokio::task::block_in_place(|| session.render_html());
    let result = session.finish().await;
    drop(session);
    if let Some(task) = progress_task {
        let _ = task.await;
    }

    let outcome = result.context("Conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise report")?
        );
    }

    match outcome {
        RunOutcome::Canceled { written } => {
            if !cli.quiet {
                eprintln!("{} Canceled", cyan("⚠"));
                for path in &written {
                    eprintln!("   kept {}", path.display());
                }
            }
            std::process::exit(130);
        }
        RunOutcome::Completed(output) => {
            if !cli.quiet {
                let stats = &output.stats;
                eprintln!(
                    "{}  {}/{} items  {} page(s)  {}ms",
                    if stats.failed == 0 { green("✔") } else { cyan("⚠") },
                    stats.succeeded,
                    stats.total_items,
                    stats.pages_written,
                    stats.total_duration_ms,
                );
                for failure in &output.failures {
                    eprintln!("   {} {}", red("✗"), failure.error);
                }
                for path in &output.outputs {
                    eprintln!("   →  {}", bold(&path.display().to_string()));
                }
            }
        }
    }

    Ok(())
}

/// Map CLI args to `ConversionSettings`.
fn build_settings(cli: &Cli) -> Result<ConversionSettings> {
    let mode: OutputMode = cli.mode.into();
    let output = cli.output.clone().unwrap_or_else(|| match mode {
        OutputMode::AllInOne => PathBuf::from("output.pdf"),
        OutputMode::OneByOne => PathBuf::from("."),
    });

    let mut builder = ConversionSettings::builder()
        .mode(mode)
        .quality(cli.quality.into())
        .keep_original_size(!cli.resize)
        .force_portrait(cli.pins_height())
        .settle_timeout(Duration::from_millis(cli.settle_ms))
        .output(output);

    if let Some(ref browser) = cli.browser {
        builder = builder.browser_path(browser);
    }

    builder.build().context("Invalid configuration")
}

/// Print each item with its kind and preview size.
async fn print_list(store: &img2pdf::ItemStore) {
    let handles: Vec<_> = store.items().iter().map(request_preview).collect();
    for (i, (item, handle)) in store.items().iter().zip(handles).enumerate() {
        let preview = handle
            .await
            .ok()
            .flatten()
            .map(|p| format!("{}x{}", p.width, p.height))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>4}  {:<5}  {:>7}  {}",
            i + 1,
            format!("{:?}", item.kind()).to_lowercase(),
            preview,
            item.path().display()
        );
    }
}
