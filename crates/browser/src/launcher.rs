//! Chromium-family browser launch over the remote debugging port.
//!
//! Each live session gets its own browser process, profile directory and
//! page target. The page connection drives the page; the browser-level
//! connection is kept for teardown.

use async_trait::async_trait;
use aurademo_core::config::BrowserConfig;
use aurademo_core::{Error, Result};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::cdp::CdpClient;
use crate::driver::{BrowserBackend, ElementTarget, PageDriver};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Supported browser engines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BrowserEngine {
    Chrome,
    Chromium,
    Edge,
}

impl BrowserEngine {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "edge" | "msedge" => Self::Edge,
            "chromium" => Self::Chromium,
            _ => Self::Chrome,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Chrome => "chrome",
            Self::Chromium => "chromium",
            Self::Edge => "edge",
        }
    }
}

/// Launches one browser per call using the configured engine.
pub struct ChromeBackend {
    config: BrowserConfig,
    profile_dir: PathBuf,
}

impl ChromeBackend {
    pub fn new(config: BrowserConfig, profile_dir: PathBuf) -> Self {
        Self {
            config,
            profile_dir,
        }
    }

    fn resolve_binary(&self) -> Result<String> {
        if let Some(path) = self.config.executable.as_deref().filter(|p| !p.is_empty()) {
            return Ok(path.to_string());
        }
        let engine = BrowserEngine::from_str(&self.config.engine);
        find_browser_binary(engine).ok_or_else(|| {
            Error::BrowserLaunch(format!("{} not found. Please install it.", engine.name()))
        })
    }

    async fn connect_page(&self, child: &mut Child, debug_port: u16) -> Result<ChromePage> {
        let launch_timeout = Duration::from_secs(self.config.launch_timeout_secs);

        let browser_ws_url = wait_for_cdp_ready(debug_port, launch_timeout, child).await?;
        let (target_id, page_ws_url) = get_page_target(debug_port).await?;

        let browser = CdpClient::connect(&browser_ws_url).await?;
        let page = CdpClient::connect(&page_ws_url).await?;

        page.enable_domain("Page").await?;
        page.enable_domain("Runtime").await?;
        page.enable_domain("DOM").await?;
        if !self.config.headed {
            page.set_viewport(self.config.window_width, self.config.window_height)
                .await?;
        }

        info!(
            port = debug_port,
            target = %target_id,
            ws_url = %page_ws_url,
            "CDP connection established (page target)"
        );

        Ok(ChromePage {
            page: Some(page),
            browser: Some(browser),
            process: None,
            target_id,
        })
    }
}

#[async_trait]
impl BrowserBackend for ChromeBackend {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        let engine = BrowserEngine::from_str(&self.config.engine);
        let binary = self.resolve_binary()?;

        std::fs::create_dir_all(&self.profile_dir).map_err(|e| {
            Error::BrowserLaunch(format!(
                "failed to create profile dir {}: {}",
                self.profile_dir.display(),
                e
            ))
        })?;

        let debug_port = find_free_port().await?;
        let args = build_browser_args(&self.config, debug_port, &self.profile_dir);

        info!(
            port = debug_port,
            headed = self.config.headed,
            browser = engine.name(),
            binary = %binary,
            "Launching browser"
        );

        let mut child = Command::new(&binary)
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::BrowserLaunch(format!("failed to launch {}: {}", binary, e)))?;

        match self.connect_page(&mut child, debug_port).await {
            Ok(mut page) => {
                page.process = Some(child);
                Ok(Box::new(page))
            }
            Err(e) => {
                // Nothing else holds the process yet.
                if let Err(kill_err) = child.kill().await {
                    debug!(error = %kill_err, "browser process already gone");
                }
                Err(match e {
                    Error::BrowserLaunch(msg) => Error::BrowserLaunch(msg),
                    other => Error::BrowserLaunch(other.to_string()),
                })
            }
        }
    }
}

/// A launched browser with one active page target.
pub struct ChromePage {
    page: Option<CdpClient>,
    browser: Option<CdpClient>,
    process: Option<Child>,
    target_id: String,
}

impl ChromePage {
    fn page(&self) -> Result<&CdpClient> {
        self.page
            .as_ref()
            .ok_or_else(|| Error::Browser("page is closed".to_string()))
    }

    /// Find the element, scroll it into view and return its center. With
    /// `focus` the element is also focused and its current value cleared.
    async fn locate(
        &self,
        target: &ElementTarget,
        focus: bool,
        timeout: Duration,
    ) -> Result<(f64, f64)> {
        let script = locate_script(target, focus);
        let page = self.page()?;
        let started = Instant::now();

        loop {
            let value = page.evaluate_js(&script).await?;
            if let (Some(x), Some(y)) = (
                value.get("x").and_then(|v| v.as_f64()),
                value.get("y").and_then(|v| v.as_f64()),
            ) {
                return Ok((x, y));
            }
            if started.elapsed() >= timeout {
                return Err(Error::NotFound(format!(
                    "element {} not found within {}ms",
                    describe_target(target),
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()> {
        let page = self.page()?;
        let nav = page.navigate(url).await?;
        // Absent for same-document navigations, which commit immediately.
        let loader_id = nav
            .get("loaderId")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let started = Instant::now();
        loop {
            // Until the new loader commits, readyState belongs to the old document.
            let committed = match &loader_id {
                Some(id) => page.main_frame_loader_id().await?.as_deref() == Some(id.as_str()),
                None => true,
            };
            if committed {
                let state = page.evaluate_js("document.readyState").await?;
                if matches!(state.as_str(), Some("interactive") | Some("complete")) {
                    return Ok(());
                }
            }
            if started.elapsed() >= timeout {
                return Err(Error::Timeout(format!(
                    "{} did not reach DOMContentLoaded within {}ms",
                    url,
                    timeout.as_millis()
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn click(&self, target: &ElementTarget, timeout: Duration) -> Result<()> {
        let (x, y) = self.locate(target, false, timeout).await?;
        let page = self.page()?;
        page.dispatch_mouse_event("mouseMoved", x, y, "none", 0).await?;
        page.dispatch_mouse_event("mousePressed", x, y, "left", 1).await?;
        page.dispatch_mouse_event("mouseReleased", x, y, "left", 1).await?;
        Ok(())
    }

    async fn fill(&self, target: &ElementTarget, text: &str, timeout: Duration) -> Result<()> {
        self.locate(target, true, timeout).await?;
        let page = self.page()?;
        page.insert_text(text).await?;
        // Dispatch input/change for frameworks listening on the field
        page.evaluate_js(
            "(function() { var el = document.activeElement; if (!el) return false; \
             el.dispatchEvent(new Event('input', {bubbles: true})); \
             el.dispatchEvent(new Event('change', {bubbles: true})); return true; })()",
        )
        .await?;
        Ok(())
    }

    async fn hover(&self, target: &ElementTarget, timeout: Duration) -> Result<()> {
        let (x, y) = self.locate(target, false, timeout).await?;
        self.page()?
            .dispatch_mouse_event("mouseMoved", x, y, "none", 0)
            .await
    }

    async fn scroll_by(&self, dy: i64) -> Result<()> {
        self.page()?
            .evaluate_js(&format!("window.scrollBy(0, {})", dy))
            .await?;
        Ok(())
    }

    async fn screenshot_jpeg(&self, quality: u8) -> Result<String> {
        self.page()?.screenshot_jpeg(quality).await
    }

    async fn shutdown(&mut self) {
        // Context: the page target and its connection.
        if let Some(page) = self.page.take() {
            if let Some(browser) = self.browser.as_ref() {
                if let Err(e) = browser.close_target(&self.target_id).await {
                    debug!(error = %e, "closeTarget failed (may already be closed)");
                }
            }
            drop(page);
        }

        // Browser.
        if let Some(browser) = self.browser.take() {
            if let Err(e) = browser.close_browser().await {
                debug!(error = %e, "Browser.close failed (may already be closed)");
            }
        }

        // Engine process.
        if let Some(mut child) = self.process.take() {
            if let Err(e) = child.kill().await {
                debug!(error = %e, "browser process already exited");
            }
        }
    }
}

fn describe_target(target: &ElementTarget) -> String {
    match target {
        ElementTarget::Css(s) => format!("'{}'", s),
        ElementTarget::Text(s) => format!("with text '{}'", s),
        ElementTarget::ExactText(s) => format!("with exact text '{}'", s),
    }
}

/// Build the page-side lookup. Returns `{x, y}` or `null`.
///
/// Text lookups take the first visible match in document order, narrowed to
/// its innermost matching descendant, so a wrapper or a later duplicate
/// never wins over the element that carries the text.
fn locate_script(target: &ElementTarget, focus: bool) -> String {
    let (kind, needle) = match target {
        ElementTarget::Css(s) => ("css", s.as_str()),
        ElementTarget::Text(s) => ("text", s.as_str()),
        ElementTarget::ExactText(s) => ("exact", s.as_str()),
    };
    let needle = Value::String(needle.to_string()).to_string();

    format!(
        concat!(
            "(function(kind, needle, focus) {{",
            " function visible(el) {{ var r = el.getBoundingClientRect(); return r.width > 0 && r.height > 0; }}",
            " function norm(s) {{ return (s || '').replace(/\\s+/g, ' ').trim().toLowerCase(); }}",
            " var el = null;",
            " if (kind === 'css') {{ el = document.querySelector(needle); }}",
            " else {{",
            "  var want = norm(needle);",
            "  var walker = document.createTreeWalker(document.body, NodeFilter.SHOW_ELEMENT);",
            "  while (walker.nextNode()) {{",
            "   var n = walker.currentNode;",
            "   if (el && !el.contains(n)) break;",
            "   if (n.tagName === 'SCRIPT' || n.tagName === 'STYLE') continue;",
            "   var t = norm(n.innerText || n.textContent);",
            "   var hit = kind === 'exact' ? t === want : t.indexOf(want) !== -1;",
            "   if (hit && visible(n)) el = n;",
            "  }}",
            " }}",
            " if (!el) return null;",
            " el.scrollIntoView({{block: 'center', inline: 'center'}});",
            " if (focus) {{",
            "  el.focus();",
            "  if ('value' in el) {{ el.value = ''; }} else if (el.isContentEditable) {{ el.textContent = ''; }}",
            " }}",
            " var r = el.getBoundingClientRect();",
            " return {{x: r.left + r.width / 2, y: r.top + r.height / 2}};",
            "}})('{}', {}, {})"
        ),
        kind, needle, focus
    )
}

/// Browser command line for a Chromium-family engine.
fn build_browser_args(config: &BrowserConfig, debug_port: u16, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        format!("--remote-debugging-port={}", debug_port),
        format!("--user-data-dir={}", user_data_dir.display()),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-background-networking".to_string(),
        "--disable-extensions".to_string(),
        "--disable-sync".to_string(),
        "--disable-translate".to_string(),
        "--metrics-recording-only".to_string(),
        "--safebrowsing-disable-auto-update".to_string(),
        "--password-store=basic".to_string(),
    ];
    if !config.headed {
        args.push("--headless=new".to_string());
    }
    args.push(format!(
        "--window-size={},{}",
        config.window_width, config.window_height
    ));
    args.push("about:blank".to_string());
    args
}

/// Find a browser binary on the system for the given engine.
pub fn find_browser_binary(engine: BrowserEngine) -> Option<String> {
    let candidates = match engine {
        BrowserEngine::Chrome | BrowserEngine::Chromium => {
            if cfg!(target_os = "macos") {
                vec![
                    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
                    "/Applications/Chromium.app/Contents/MacOS/Chromium",
                    "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
                ]
            } else if cfg!(target_os = "linux") {
                if engine == BrowserEngine::Chromium {
                    vec!["chromium", "chromium-browser", "/usr/bin/chromium", "google-chrome"]
                } else {
                    vec![
                        "google-chrome", "google-chrome-stable",
                        "chromium", "chromium-browser",
                        "/usr/bin/google-chrome", "/usr/bin/chromium",
                    ]
                }
            } else {
                vec![
                    r"C:\Program Files\Google\Chrome\Application\chrome.exe",
                    r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
                ]
            }
        }
        BrowserEngine::Edge => {
            if cfg!(target_os = "macos") {
                vec!["/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge"]
            } else if cfg!(target_os = "linux") {
                vec!["microsoft-edge", "microsoft-edge-stable", "/usr/bin/microsoft-edge"]
            } else {
                vec![
                    r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
                    r"C:\Program Files\Microsoft\Edge\Application\msedge.exe",
                ]
            }
        }
    };

    for candidate in candidates {
        if Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
        if !candidate.contains('/') && !candidate.contains('\\') && which::which(candidate).is_ok() {
            return Some(candidate.to_string());
        }
    }
    None
}

/// Find a free TCP port.
async fn find_free_port() -> Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .map_err(|e| Error::BrowserLaunch(format!("failed to bind to find free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| Error::BrowserLaunch(format!("failed to get local addr: {}", e)))?
        .port();
    drop(listener);
    Ok(port)
}

/// Poll /json/version until the browser's debugging endpoint answers.
async fn wait_for_cdp_ready(port: u16, timeout: Duration, child: &mut Child) -> Result<String> {
    let start = Instant::now();
    let url = format!("http://127.0.0.1:{}/json/version", port);

    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(Error::BrowserLaunch(format!(
                "browser exited during startup ({})",
                status
            )));
        }
        if start.elapsed() > timeout {
            return Err(Error::BrowserLaunch(format!(
                "CDP not ready after {}s on port {}",
                timeout.as_secs(),
                port
            )));
        }

        if let Ok(resp) = reqwest::get(&url).await {
            if let Ok(body) = resp.json::<Value>().await {
                if let Some(ws_url) = body.get("webSocketDebuggerUrl").and_then(|v| v.as_str()) {
                    return Ok(ws_url.to_string());
                }
            }
        }

        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Resolve the first page target via /json/list.
/// Retries a few times since the page target may not appear immediately.
async fn get_page_target(port: u16) -> Result<(String, String)> {
    let url = format!("http://127.0.0.1:{}/json/list", port);

    for attempt in 0..10 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }

        let resp = match reqwest::get(&url).await {
            Ok(r) => r,
            Err(e) => {
                warn!(attempt, error = %e, "json/list request failed");
                continue;
            }
        };
        let targets: Vec<Value> = match resp.json().await {
            Ok(t) => t,
            Err(_) => continue,
        };

        if let Some(found) = select_page_target(&targets) {
            return Ok(found);
        }
    }

    Err(Error::BrowserLaunch("no page target found after retries".to_string()))
}

fn select_page_target(targets: &[Value]) -> Option<(String, String)> {
    targets.iter().find_map(|target| {
        if target.get("type").and_then(|v| v.as_str()) != Some("page") {
            return None;
        }
        let id = target.get("id").and_then(|v| v.as_str())?;
        let ws = target.get("webSocketDebuggerUrl").and_then(|v| v.as_str())?;
        Some((id.to_string(), ws.to_string()))
    })
}
