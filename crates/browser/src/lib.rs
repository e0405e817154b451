//! Live browser control for a demo session.
//!
//! - `cdp`: Chrome DevTools Protocol client over WebSocket
//! - `launcher`: Chromium-family process launch and page-target discovery
//! - `driver`: the page operations the executor needs, behind a trait
//! - `guardrails`: prohibited-action checks and PII redaction
//! - `executor`: one browser, one page, string results for every action

pub mod cdp;
pub mod driver;
pub mod executor;
pub mod guardrails;
pub mod launcher;

pub use driver::{BrowserBackend, ElementTarget, PageDriver};
pub use executor::{ActionExecutor, ActionKind, BLOCKED_MESSAGE};
pub use guardrails::{redact, GuardrailPolicy, GuardrailVerdict};
pub use launcher::{BrowserEngine, ChromeBackend};
