//! Safety policy applied before browser actions and spoken output.
//!
//! - Prohibited phrases and selectors block destructive clicks
//! - PII (card numbers, SSNs, emails, phone numbers) is redacted from text
//! - Optional navigation allow-list

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::{info, warn};

pub const CARD_PLACEHOLDER: &str = "[CARD NUMBER REDACTED]";
pub const SSN_PLACEHOLDER: &str = "[SSN REDACTED]";
pub const PHONE_PLACEHOLDER: &str = "[PHONE REDACTED]";

const PROHIBITED_PHRASES: &[&str] = &[
    "delete account",
    "remove user",
    "cancel subscription",
    "terminate",
    "destroy",
    "drop database",
    "clear all data",
    "factory reset",
];

const PROHIBITED_SELECTORS: &[&str] = &[
    "[data-action='delete']",
    "[data-danger='true']",
    ".btn-danger.delete",
    "#delete-account-btn",
];

// Unanchored: a card number glued to letters or other digits still matches.
static CARD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}[\s-]?\d{4}[\s-]?\d{4}[\s-]?\d{4}").expect("card regex"));

static SSN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex"));

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b").expect("email regex")
});

static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").expect("phone regex"));

/// Outcome of checking one candidate action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailVerdict {
    Allowed,
    Blocked { reason: String },
}

impl GuardrailVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }
}

/// Fixed denylists of destructive-intent phrases and dangerous selectors.
#[derive(Debug, Clone, Default)]
pub struct GuardrailPolicy;

impl GuardrailPolicy {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate an action. Only clicks are policed; typing, scrolling,
    /// hovering and navigation are considered non-destructive.
    pub fn evaluate(&self, kind: &str, selector: &str, description: &str) -> GuardrailVerdict {
        if kind != "click" {
            return GuardrailVerdict::Allowed;
        }
        match self.find_violation(selector, description) {
            Some(reason) => GuardrailVerdict::Blocked { reason },
            None => GuardrailVerdict::Allowed,
        }
    }

    pub fn is_prohibited(&self, selector: &str, description: &str) -> bool {
        self.find_violation(selector, description).is_some()
    }

    fn find_violation(&self, selector: &str, description: &str) -> Option<String> {
        let combined = format!("{} {}", selector, description).to_lowercase();
        if let Some(phrase) = PROHIBITED_PHRASES.iter().find(|p| combined.contains(*p)) {
            warn!(keyword = %phrase, "BLOCKED: prohibited keyword detected");
            return Some(format!("prohibited keyword '{}'", phrase));
        }

        if let Some(pattern) = PROHIBITED_SELECTORS.iter().find(|p| selector.contains(*p)) {
            warn!(selector = %pattern, "BLOCKED: prohibited selector detected");
            return Some(format!("prohibited selector '{}'", pattern));
        }

        None
    }

    /// Navigation allow-list check. An empty list allows everything.
    pub fn is_url_allowed(&self, url: &str, allowed_domains: &[String]) -> bool {
        if allowed_domains.is_empty() {
            return true;
        }
        let allowed = allowed_domains
            .iter()
            .filter(|d| !d.trim().is_empty())
            .any(|d| url.contains(d.trim()));
        if !allowed {
            warn!(url = %url, "BLOCKED: navigation outside allowed domains");
        }
        allowed
    }
}

/// Replace PII with placeholders. Card numbers go first so a 16-digit run
/// is never split into phone-number matches.
pub fn redact(text: &str) -> String {
    let redacted = CARD_RE.replace_all(text, CARD_PLACEHOLDER);
    let redacted = SSN_RE.replace_all(&redacted, SSN_PLACEHOLDER);
    let redacted = EMAIL_RE.replace_all(&redacted, |caps: &Captures| format!("***@{}", &caps[1]));
    let redacted = PHONE_RE.replace_all(&redacted, PHONE_PLACEHOLDER).into_owned();

    if redacted != text {
        info!("PII redacted from text");
    }
    redacted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn has_digit_run(s: &str, n: usize) -> bool {
        let mut run = 0;
        for c in s.chars() {
            if c.is_ascii_digit() {
                run += 1;
                if run >= n {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    }

    #[test]
    fn test_card_numbers_redacted() {
        for input in [
            "pay with 4111 1111 1111 1111 today",
            "card:4111-1111-1111-1111",
            "4111111111111111",
            "cc4111 1111 1111 1111",
            "ref4111111111111111x",
        ] {
            let out = redact(input);
            assert!(out.contains(CARD_PLACEHOLDER), "{}", out);
            assert!(!has_digit_run(&out, 4), "{}", out);
        }
    }

    #[test]
    fn test_ssn_redacted() {
        assert_eq!(redact("ssn 123-45-6789"), format!("ssn {}", SSN_PLACEHOLDER));
    }

    #[test]
    fn test_email_keeps_domain() {
        assert_eq!(redact("mail jane.doe+x@example.co.uk now"), "mail ***@example.co.uk now");
        assert_eq!(redact("a@b.io and c.d@sub.domain.org"), "***@b.io and ***@sub.domain.org");
    }

    #[test]
    fn test_phone_redacted() {
        assert_eq!(redact("call 555-123-4567"), format!("call {}", PHONE_PLACEHOLDER));
        assert_eq!(redact("call 555.123.4567"), format!("call {}", PHONE_PLACEHOLDER));
        assert_eq!(redact("call 5551234567"), format!("call {}", PHONE_PLACEHOLDER));
    }

    #[test]
    fn test_redact_is_identity_on_clean_text() {
        for input in ["", "Hello there", "order #42 shipped", "version 1.2.3"] {
            assert_eq!(redact(input), input);
        }
    }

    #[test]
    fn test_prohibited_phrases_any_case_any_position() {
        let policy = GuardrailPolicy::new();
        for phrase in PROHIBITED_PHRASES {
            let upper = phrase.to_uppercase();
            assert!(policy.is_prohibited(&format!("button: {} now", upper), ""));
            assert!(policy.is_prohibited("#ok", &format!("this will {}", phrase)));
        }
    }

    #[test]
    fn test_prohibited_selectors() {
        let policy = GuardrailPolicy::new();
        assert!(policy.is_prohibited("button[data-danger='true']", ""));
        assert!(policy.is_prohibited("#delete-account-btn", ""));
        assert!(policy.is_prohibited("form .btn-danger.delete", ""));
    }

    #[test]
    fn test_benign_selectors_allowed() {
        let policy = GuardrailPolicy::new();
        for sel in ["#signup", "text=Pricing", ".btn-primary", "Start free trial", "a[href='/docs']"] {
            assert!(!policy.is_prohibited(sel, ""), "{}", sel);
        }
    }

    #[test]
    fn test_evaluate_only_polices_clicks() {
        let policy = GuardrailPolicy::new();
        assert!(policy.evaluate("click", "Delete Account", "").is_blocked());
        assert_eq!(policy.evaluate("type", "Delete Account", ""), GuardrailVerdict::Allowed);
        match policy.evaluate("click", "#x", "factory reset") {
            GuardrailVerdict::Blocked { reason } => assert!(reason.contains("factory reset")),
            GuardrailVerdict::Allowed => panic!("expected block"),
        }
    }

    #[test]
    fn test_url_allow_list() {
        let policy = GuardrailPolicy::new();
        assert!(policy.is_url_allowed("https://anything.test", &[]));
        let allowed = vec!["example.com".to_string()];
        assert!(policy.is_url_allowed("https://app.example.com/x", &allowed));
        assert!(!policy.is_url_allowed("https://evil.test", &allowed));
    }
}
