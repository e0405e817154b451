//! Action executor: one browser, one page, a string result for every action.
//!
//! Every action-level failure becomes a descriptive result string so the AI
//! always gets a turn-ending output it can talk about. Only `start()` can fail
//! in a way that ends the session.

use aurademo_core::config::BrowserConfig;
use aurademo_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::driver::{BrowserBackend, ElementTarget, PageDriver};
use crate::guardrails::{redact, GuardrailPolicy, GuardrailVerdict};

pub const BLOCKED_MESSAGE: &str = "Action blocked by security guardrails";

/// Browser actions the AI can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Navigate,
    Click,
    Type,
    Scroll,
    Hover,
}

impl ActionKind {
    /// Parse a wire action name. `goto` is the tool-schema name for
    /// navigation; `navigate` is accepted as an alias.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "goto" | "navigate" => Some(Self::Navigate),
            "click" => Some(Self::Click),
            "type" => Some(Self::Type),
            "scroll" => Some(Self::Scroll),
            "hover" => Some(Self::Hover),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Navigate => "goto",
            Self::Click => "click",
            Self::Type => "type",
            Self::Scroll => "scroll",
            Self::Hover => "hover",
        }
    }
}

/// Scroll direction is carried in the `selector` field of the tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl ScrollDirection {
    pub fn from_selector(selector: &str) -> Self {
        if selector.to_lowercase().contains("up") {
            Self::Up
        } else {
            Self::Down
        }
    }

    pub fn delta(&self, step: i64) -> i64 {
        match self {
            Self::Up => -step.abs(),
            Self::Down => step.abs(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

/// Prefix bare hosts with `https://`.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{}", raw.trim_start_matches('/'))
    }
}

pub struct ActionExecutor {
    backend: Arc<dyn BrowserBackend>,
    page: Option<Box<dyn PageDriver>>,
    policy: GuardrailPolicy,
    config: BrowserConfig,
}

impl ActionExecutor {
    pub fn new(backend: Arc<dyn BrowserBackend>, config: BrowserConfig) -> Self {
        Self {
            backend,
            page: None,
            policy: GuardrailPolicy::new(),
            config,
        }
    }

    pub fn is_started(&self) -> bool {
        self.page.is_some()
    }

    /// Acquire the browser. Fails with `Error::BrowserLaunch` when the
    /// engine cannot be started.
    pub async fn start(&mut self) -> Result<()> {
        if self.page.is_some() {
            return Err(Error::Browser("browser already started".to_string()));
        }
        info!("Starting action executor");
        let page = self.backend.launch().await?;
        self.page = Some(page);
        info!("Browser started");
        Ok(())
    }

    /// Execute one browser action and describe the outcome. Never fails.
    pub async fn perform_action(&self, kind: &str, selector: &str, value: Option<&str>) -> String {
        let description = value.unwrap_or("");
        info!(
            action = %kind,
            selector = %selector,
            value = %redact(description),
            "Executing action"
        );

        let Some(action) = ActionKind::parse(kind) else {
            return format!("Unknown action: {}", kind);
        };

        if let GuardrailVerdict::Blocked { reason } =
            self.policy.evaluate(action.as_str(), selector, description)
        {
            info!(action = %kind, reason = %reason, "Action refused by guardrails");
            return BLOCKED_MESSAGE.to_string();
        }

        match self.execute(action, selector, value).await {
            Ok(result) => result,
            Err(e) => {
                error!(action = %kind, error = %e, "Action failed");
                format!("Error executing {}: {}", kind, e)
            }
        }
    }

    async fn execute(&self, action: ActionKind, selector: &str, value: Option<&str>) -> Result<String> {
        let page = self
            .page
            .as_deref()
            .ok_or_else(|| Error::Browser("browser is not started".to_string()))?;
        let action_timeout = Duration::from_millis(self.config.action_timeout_ms);

        match action {
            ActionKind::Navigate => {
                // URL normally arrives in `value`; tolerate it in `selector`.
                let raw = value
                    .map(str::trim)
                    .filter(|v| !v.is_empty())
                    .unwrap_or_else(|| selector.trim());
                if raw.is_empty() {
                    return Err(Error::Browser("goto requires a URL in 'value'".to_string()));
                }
                let url = normalize_url(raw);
                if !self.policy.is_url_allowed(&url, &self.config.allowed_domains) {
                    return Err(Error::Browser(format!(
                        "navigation to {} is outside the allowed domains",
                        url
                    )));
                }
                page.goto(&url, Duration::from_millis(self.config.navigation_timeout_ms))
                    .await?;
                Ok(format!("Navigated to {}", url))
            }
            ActionKind::Click => {
                self.click(page, selector).await?;
                Ok(format!("Clicked {}", selector))
            }
            ActionKind::Type => {
                let text = value
                    .ok_or_else(|| Error::Browser("type requires text in 'value'".to_string()))?;
                page.fill(&ElementTarget::parse(selector), text, action_timeout)
                    .await?;
                Ok(format!("Typed '{}' into {}", redact(text), selector))
            }
            ActionKind::Scroll => {
                let direction = ScrollDirection::from_selector(selector);
                page.scroll_by(direction.delta(self.config.scroll_step_px))
                    .await?;
                Ok(format!("Scrolled {}", direction.as_str()))
            }
            ActionKind::Hover => {
                page.hover(&ElementTarget::parse(selector), action_timeout)
                    .await?;
                Ok(format!("Hovered over {}", selector))
            }
        }
    }

    /// Natural-language targets get a short text-match attempt before the
    /// selector is resolved directly.
    async fn click(&self, page: &dyn PageDriver, selector: &str) -> Result<()> {
        if !ElementTarget::is_structured(selector) {
            let text_target = ElementTarget::Text(selector.trim().to_string());
            let text_timeout = Duration::from_millis(self.config.text_match_timeout_ms);
            match page.click(&text_target, text_timeout).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!(selector = %selector, error = %e, "text match failed, resolving as selector"),
            }
        }
        page.click(
            &ElementTarget::parse(selector),
            Duration::from_millis(self.config.action_timeout_ms),
        )
        .await
    }

    /// Base64 JPEG of the viewport, or `None` before the browser is up.
    pub async fn capture_frame(&self) -> Result<Option<String>> {
        match self.page.as_deref() {
            None => Ok(None),
            Some(page) => page.screenshot_jpeg(self.config.jpeg_quality).await.map(Some),
        }
    }

    /// Release the browser. Safe after a failed or missing `start()` and
    /// on repeated calls.
    pub async fn stop(&mut self) {
        match self.page.take() {
            Some(mut page) => {
                info!("Stopping browser");
                page.shutdown().await;
            }
            None => debug!("No browser to stop"),
        }
    }
}
