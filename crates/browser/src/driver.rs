//! Page-level operations the executor relies on.

use async_trait::async_trait;
use aurademo_core::Result;
use std::time::Duration;

/// How an element is located on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementTarget {
    /// CSS selector resolved with `querySelector`.
    Css(String),
    /// Visible text, case-insensitive substring match.
    Text(String),
    /// Visible text, exact match after whitespace normalization.
    ExactText(String),
}

impl ElementTarget {
    /// Interpret a selector string. `text=Foo` is a text match and
    /// `text="Foo"` an exact one; everything else is CSS.
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        match selector.strip_prefix("text=") {
            Some(rest) => {
                let rest = rest.trim();
                let quoted = rest.len() >= 2
                    && ((rest.starts_with('"') && rest.ends_with('"'))
                        || (rest.starts_with('\'') && rest.ends_with('\'')));
                if quoted {
                    Self::ExactText(rest[1..rest.len() - 1].to_string())
                } else {
                    Self::Text(rest.to_string())
                }
            }
            None => Self::Css(selector.to_string()),
        }
    }

    /// True when the selector already names a precise target (text engine,
    /// id or class) rather than a natural-language description.
    pub fn is_structured(selector: &str) -> bool {
        let selector = selector.trim();
        selector.contains("text=") || selector.starts_with('#') || selector.starts_with('.')
    }
}

/// One live page. All methods take `&self`; callers serialize access.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigate and wait until the DOM is parseable.
    async fn goto(&self, url: &str, timeout: Duration) -> Result<()>;

    async fn click(&self, target: &ElementTarget, timeout: Duration) -> Result<()>;

    /// Replace the field's content with `text`.
    async fn fill(&self, target: &ElementTarget, text: &str, timeout: Duration) -> Result<()>;

    async fn hover(&self, target: &ElementTarget, timeout: Duration) -> Result<()>;

    /// Scroll the window vertically; negative is up.
    async fn scroll_by(&self, dy: i64) -> Result<()>;

    /// Base64-encoded JPEG of the current viewport.
    async fn screenshot_jpeg(&self, quality: u8) -> Result<String>;

    /// Release page, browser and process, in that order. Best-effort and
    /// safe to call more than once.
    async fn shutdown(&mut self);
}

/// Acquires a browser and hands back its active page.
#[async_trait]
pub trait BrowserBackend: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_targets() {
        assert_eq!(ElementTarget::parse("#submit"), ElementTarget::Css("#submit".into()));
        assert_eq!(ElementTarget::parse("text=Sign Up"), ElementTarget::Text("Sign Up".into()));
        assert_eq!(
            ElementTarget::parse("text=\"Sign Up\""),
            ElementTarget::ExactText("Sign Up".into())
        );
        assert_eq!(ElementTarget::parse("text='x'"), ElementTarget::ExactText("x".into()));
        assert_eq!(ElementTarget::parse("text=\""), ElementTarget::Text("\"".into()));
    }

    #[test]
    fn test_structured_selectors() {
        assert!(ElementTarget::is_structured("#signup"));
        assert!(ElementTarget::is_structured(".btn-primary"));
        assert!(ElementTarget::is_structured("text=Pricing"));
        assert!(!ElementTarget::is_structured("Pricing"));
        assert!(!ElementTarget::is_structured("button[type=submit]"));
    }
}
