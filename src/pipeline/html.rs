//! HTML rendering through a headless Chromium-family browser.
//!
//! [`SequentialRenderer`] is the seam the session drives: one document at a
//! time, always from the same context, with an explicit [`release`] at the
//! end of the run. [`ChromeRenderer`] implements it over the DevTools
//! protocol: one browser process and one tab serve every document of a run.
//!
//! ```text
//! html path ──▶ file:// URL ──▶ navigate ──▶ wait until ready ──▶ PNG
//!           ──▶ flatten on white ──▶ single-page PDF (quality 95)
//! ```
//!
//! The browser is launched lazily on the first document, with a throwaway
//! profile directory, and shut down by [`release`].
//!
//! [`release`]: SequentialRenderer::release

use super::encode::encode_page;
use super::normalize::{flatten_on_white, RenderedPage};
use crate::config::{ConversionSettings, Quality};
use crate::error::ItemError;
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::env;
use std::ffi::OsStr;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Environment variable that forces a specific browser executable.
pub const BROWSER_ENV: &str = "IMG2PDF_BROWSER";

/// Quality used for the page bitmap of a rendered HTML document.
pub const HTML_ARTIFACT_QUALITY: Quality = Quality::High;

/// Extra time granted on top of the settle budget for navigation and the
/// capture itself.
const STARTUP_GRACE: Duration = Duration::from_secs(30);

/// The browser shuts itself down after this long without DevTools traffic.
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Evaluates to `true` once the document and its web fonts have loaded.
const READY_SCRIPT: &str =
    "document.readyState === 'complete' && (!document.fonts || document.fonts.status === 'loaded')";

/// Flags passed on top of the launcher's own defaults.
const EXTRA_ARGS: &[&str] = &["--hide-scrollbars", "--no-first-run", "--no-default-browser-check"];

/// Executable names searched on `PATH`, Chrome first, then Edge and Chromium.
const PATH_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chrome",
    "msedge",
    "microsoft-edge",
    "microsoft-edge-stable",
    "chromium",
    "chromium-browser",
];

#[cfg(target_os = "macos")]
const WELL_KNOWN_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
];

#[cfg(target_os = "windows")]
const WELL_KNOWN_PATHS: &[&str] = &[
    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
];

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
const WELL_KNOWN_PATHS: &[&str] = &[
    "/usr/bin/google-chrome",
    "/opt/google/chrome/chrome",
    "/usr/bin/microsoft-edge",
    "/usr/bin/chromium",
    "/snap/bin/chromium",
];

/// Everything in a path except unreserved characters and separators.
const PATH_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'/')
    .remove(b':')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// A renderer that turns one HTML document into a single-page PDF artifact.
///
/// Implementations may hold an expensive engine handle across calls. They
/// are only ever called sequentially from one context. `release` is called
/// once when the run ends, whatever the outcome; calling it again must be a
/// no-op.
pub trait SequentialRenderer: Send {
    /// Render `html` and write a PDF to `out`.
    fn render_to_pdf(&mut self, html: &Path, out: &Path) -> Result<(), ItemError>;

    /// Drop the engine handle.
    fn release(&mut self) {}
}

/// Browser options captured from [`ConversionSettings`].
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub window: (u32, u32),
    pub settle: Duration,
    pub executable: Option<PathBuf>,
}

impl From<&ConversionSettings> for BrowserOptions {
    fn from(s: &ConversionSettings) -> Self {
        Self {
            window: s.browser_window,
            settle: s.settle_timeout,
            executable: s.browser_path.clone(),
        }
    }
}

/// A live browser process, the tab every document is loaded into, and the
/// profile directory it writes to.
struct Engine {
    executable: PathBuf,
    browser: Browser,
    tab: Arc<Tab>,
    profile: TempDir,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("executable", &self.executable)
            .field("profile", &self.profile.path())
            .finish_non_exhaustive()
    }
}

/// [`SequentialRenderer`] backed by a headless Chrome/Edge/Chromium.
///
/// The browser starts on the first document and stays up until
/// [`release`](SequentialRenderer::release) (or drop), so a run with many
/// HTML items pays for one launch.
#[derive(Debug)]
pub struct ChromeRenderer {
    options: BrowserOptions,
    engine: Option<Engine>,
    captures: usize,
}

impl ChromeRenderer {
    pub fn new(options: BrowserOptions) -> Self {
        Self {
            options,
            engine: None,
            captures: 0,
        }
    }

    pub fn from_settings(settings: &ConversionSettings) -> Self {
        Self::new(BrowserOptions::from(settings))
    }

    /// `true` while a browser process is held.
    pub fn is_acquired(&self) -> bool {
        self.engine.is_some()
    }

    fn acquire(&mut self) -> Result<&Engine, ItemError> {
        if self.engine.is_none() {
            self.engine = Some(self.launch()?);
        }
        self.engine.as_ref().ok_or_else(|| ItemError::NoEngine {
            detail: "browser handle unavailable".into(),
        })
    }

    fn launch(&self) -> Result<Engine, ItemError> {
        let executable = find_browser(self.options.executable.as_deref()).ok_or_else(|| {
            ItemError::NoEngine {
                detail: match &self.options.executable {
                    Some(p) => format!("browser '{}' does not exist", p.display()),
                    None => format!(
                        "none of {} found on PATH or in the usual install locations",
                        PATH_CANDIDATES.join(", ")
                    ),
                },
            }
        })?;
        let profile = tempfile::Builder::new()
            .prefix("img2pdf-browser-")
            .tempdir()
            .map_err(|e| ItemError::NoEngine {
                detail: format!("cannot create browser profile directory: {}", e),
            })?;

        let started = Instant::now();
        let browser = Browser::new(launch_options(&self.options, &executable, profile.path()))
            .map_err(|e| ItemError::NoEngine {
                detail: format!("cannot start '{}': {}", executable.display(), e),
            })?;
        let tab = browser.new_tab().map_err(|e| ItemError::NoEngine {
            detail: format!("cannot open a tab in '{}': {}", executable.display(), e),
        })?;
        tab.set_default_timeout(self.options.settle + STARTUP_GRACE);

        info!(
            "Started browser {} in {}ms",
            executable.display(),
            started.elapsed().as_millis()
        );
        Ok(Engine {
            executable,
            browser,
            tab,
            profile,
        })
    }

    fn capture(&mut self, html: &Path) -> Result<RenderedPage, ItemError> {
        let render_err = |detail: String| ItemError::RenderFailed {
            path: html.to_path_buf(),
            detail,
        };

        let abs = html
            .canonicalize()
            .map_err(|e| render_err(format!("cannot resolve path: {}", e)))?;
        let url = file_url(&abs);
        let settle = self.options.settle;

        let tab = Arc::clone(&self.acquire()?.tab);
        self.captures += 1;

        debug!("Rendering {}", url);
        tab.navigate_to(&url)
            .map_err(|e| render_err(format!("cannot load page: {}", e)))?;
        tab.wait_until_navigated()
            .map_err(|e| render_err(format!("page did not finish loading: {}", e)))?;
        if !wait_until_ready(&tab, settle) {
            debug!("{} not ready after {:?}; capturing anyway", url, settle);
        }

        let png = tab
            .capture_screenshot(CaptureScreenshotFormatOption::Png, None, None, true)
            .map_err(|e| render_err(format!("screenshot failed: {}", e)))?;
        let decoded =
            image::load_from_memory(&png).map_err(|e| render_err(format!("bad screenshot: {}", e)))?;
        Ok(RenderedPage::new(flatten_on_white(decoded)))
    }
}

impl SequentialRenderer for ChromeRenderer {
    fn render_to_pdf(&mut self, html: &Path, out: &Path) -> Result<(), ItemError> {
        let page = self.capture(html)?;
        let bytes = encode_page(&page, HTML_ARTIFACT_QUALITY).map_err(|e| ItemError::WriteFailed {
            path: out.to_path_buf(),
            detail: e.to_string(),
        })?;
        std::fs::write(out, bytes).map_err(|e| ItemError::WriteFailed {
            path: out.to_path_buf(),
            detail: e.to_string(),
        })?;
        debug!(
            "Rendered {} → {}x{} page",
            html.display(),
            page.width(),
            page.height()
        );
        Ok(())
    }

    fn release(&mut self) {
        if let Some(engine) = self.engine.take() {
            let Engine {
                executable,
                browser,
                tab,
                profile,
            } = engine;
            if let Err(e) = tab.close(false) {
                debug!("Closing tab failed: {}", e);
            }
            drop(tab);
            // Dropping the handle terminates the browser process.
            drop(browser);

            let dir = profile.path().to_path_buf();
            if let Err(e) = profile.close() {
                warn!("Could not remove browser profile {}: {}", dir.display(), e);
            }
            info!(
                "Closed browser {} after {} capture(s)",
                executable.display(),
                self.captures
            );
        }
    }
}

impl Drop for ChromeRenderer {
    fn drop(&mut self) {
        self.release();
    }
}

/// Poll [`READY_SCRIPT`] until it holds or `settle` runs out.
///
/// If the page cannot be queried at all, the full settle time is waited
/// instead. Returns whether readiness was observed.
fn wait_until_ready(tab: &Tab, settle: Duration) -> bool {
    let deadline = Instant::now() + settle;
    loop {
        match tab.evaluate(READY_SCRIPT, false) {
            Ok(result) => {
                if matches!(result.value, Some(serde_json::Value::Bool(true))) {
                    return true;
                }
            }
            Err(e) => {
                debug!("Readiness check unavailable: {}", e);
                std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                return false;
            }
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Locate a browser executable.
///
/// An explicit path wins (and is the only candidate when given). Otherwise
/// [`BROWSER_ENV`] is consulted, then `PATH`, then the platform's usual
/// install locations.
pub fn find_browser(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return p.is_file().then(|| p.to_path_buf());
    }
    if let Some(p) = env::var_os(BROWSER_ENV).map(PathBuf::from) {
        if p.is_file() {
            return Some(p);
        }
        warn!("{} points to missing file {}", BROWSER_ENV, p.display());
    }
    PATH_CANDIDATES
        .iter()
        .find_map(|name| find_in_path(name))
        .or_else(|| {
            WELL_KNOWN_PATHS
                .iter()
                .map(PathBuf::from)
                .find(|p| p.is_file())
        })
}

fn find_in_path(tool: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    for dir in env::split_paths(&path_var) {
        let full = dir.join(tool);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{tool}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// `file://` URL for an absolute local path.
pub fn file_url(abs: &Path) -> String {
    let raw = abs.to_string_lossy().replace('\\', "/");
    let raw = raw.trim_start_matches("//?/");
    let encoded = utf8_percent_encode(raw, PATH_ESCAPE).to_string();
    if encoded.starts_with('/') {
        format!("file://{}", encoded)
    } else {
        format!("file:///{}", encoded)
    }
}

fn launch_options(
    options: &BrowserOptions,
    executable: &Path,
    profile: &Path,
) -> LaunchOptions<'static> {
    LaunchOptions {
        headless: true,
        sandbox: false,
        window_size: Some(options.window),
        path: Some(executable.to_path_buf()),
        user_data_dir: Some(profile.to_path_buf()),
        idle_browser_timeout: IDLE_TIMEOUT,
        args: EXTRA_ARGS.iter().map(OsStr::new).collect(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> BrowserOptions {
        BrowserOptions {
            window: (1920, 1080),
            settle: Duration::from_secs(3),
            executable: None,
        }
    }

    #[test]
    fn file_url_escapes_spaces() {
        let url = file_url(Path::new("/tmp/my pages/a#1.html"));
        assert_eq!(url, "file:///tmp/my%20pages/a%231.html");
    }

    #[test]
    fn file_url_handles_drive_letters() {
        let url = file_url(Path::new(r"C:\docs\index.html"));
        assert_eq!(url, "file:///C:/docs/index.html");
    }

    #[test]
    fn launch_options_carry_window_and_profile() {
        let launch = launch_options(
            &BrowserOptions {
                window: (800, 600),
                ..options()
            },
            Path::new("/usr/bin/chromium"),
            Path::new("/tmp/profile"),
        );
        assert!(launch.headless);
        assert!(!launch.sandbox);
        assert_eq!(launch.window_size, Some((800, 600)));
        assert_eq!(launch.path.as_deref(), Some(Path::new("/usr/bin/chromium")));
        assert_eq!(launch.user_data_dir.as_deref(), Some(Path::new("/tmp/profile")));
        assert_eq!(launch.idle_browser_timeout, IDLE_TIMEOUT);
        assert!(launch.args.contains(&OsStr::new("--hide-scrollbars")));
    }

    #[test]
    fn explicit_missing_browser_is_no_engine() {
        let dir = tempfile::tempdir().unwrap();
        let html = dir.path().join("a.html");
        std::fs::write(&html, "<p>hi</p>").unwrap();

        let mut renderer = ChromeRenderer::new(BrowserOptions {
            executable: Some(dir.path().join("no-such-browser")),
            ..options()
        });
        let err = renderer
            .render_to_pdf(&html, &dir.path().join("a.pdf"))
            .unwrap_err();
        assert!(err.is_engine_missing(), "got {err:?}");
        assert!(!renderer.is_acquired());
    }

    #[test]
    fn missing_html_is_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut renderer = ChromeRenderer::new(options());
        let err = renderer
            .render_to_pdf(&dir.path().join("gone.html"), &dir.path().join("gone.pdf"))
            .unwrap_err();
        assert!(matches!(err, ItemError::RenderFailed { .. }));
    }

    #[test]
    fn release_is_idempotent() {
        let mut renderer = ChromeRenderer::new(options());
        renderer.release();
        renderer.release();
        assert!(!renderer.is_acquired());
    }
}
