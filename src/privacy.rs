// Privacy controller - decides what captured content looks like before it
// ever reaches the queue or the store.
//
// Content is processed per class (prompts, responses, errors, metadata)
// according to a capture level. Raw user content never leaves this module
// unprocessed: `none` suppresses it, `metadata` reduces it to a structural
// summary, `sanitized` runs the redaction passes, `full` stores it as-is.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// How much of a piece of content survives capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureLevel {
    /// Suppress the content entirely
    None,
    /// Keep only a structural summary, never original substrings
    Metadata,
    /// Redact PII matches, keep the rest
    #[default]
    Sanitized,
    /// Store verbatim
    Full,
}

/// Which kind of content is being processed; each class can override the
/// default capture level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentClass {
    Prompts,
    Responses,
    Errors,
    Metadata,
}

/// User-supplied post-redaction hook. Runs on already-redacted text.
pub type SanitizerHook = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Privacy configuration for a client SDK instance
#[derive(Clone, Default)]
pub struct PrivacyConfig {
    /// Applied when no per-class override is set
    pub default_level: CaptureLevel,
    pub prompts: Option<CaptureLevel>,
    pub responses: Option<CaptureLevel>,
    pub errors: Option<CaptureLevel>,
    pub metadata: Option<CaptureLevel>,

    /// Extra redaction patterns (regex source strings), applied after the
    /// builtin pass
    pub custom_patterns: Vec<String>,

    /// Turns off the builtin PII patterns; custom patterns still run
    pub disable_builtin_detection: bool,

    /// Optional hook run after pattern redaction
    pub custom_sanitizer: Option<SanitizerHook>,

    /// Replace matches with `[HASH:xxxxxxxx]` instead of `[REDACTED]`.
    /// Requires `hash_salt` to be set; without a salt we fall back to
    /// plain redaction.
    pub hash_matches: bool,
    pub hash_salt: Option<String>,
}

impl fmt::Debug for PrivacyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyConfig")
            .field("default_level", &self.default_level)
            .field("prompts", &self.prompts)
            .field("responses", &self.responses)
            .field("errors", &self.errors)
            .field("metadata", &self.metadata)
            .field("custom_patterns", &self.custom_patterns)
            .field("disable_builtin_detection", &self.disable_builtin_detection)
            .field("custom_sanitizer", &self.custom_sanitizer.is_some())
            .field("hash_matches", &self.hash_matches)
            .field("hash_salt", &self.hash_salt.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Marker substituted for each redacted match
pub const REDACTED: &str = "[REDACTED]";

/// Builtin PII patterns, applied in this order per redaction pass.
/// Order matters: key=value secrets must run before the bare URL pattern
/// would swallow a token embedded in a query string.
const BUILTIN_PATTERNS: &[&str] = &[
    // Email addresses
    r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}",
    // US-style phone numbers
    r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}\b",
    // 16-digit card-like groups
    r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
    // SSN ###-##-####
    r"\b\d{3}-\d{2}-\d{4}\b",
    // IPv4 addresses
    r"\b(?:\d{1,3}\.){3}\d{1,3}\b",
    // api_key / token / secret key=value pairs
    r#"(?i)\b(?:api[_-]?key|token|secret)\b\s*[=:]\s*[^\s,;"']+"#,
    // URLs with scheme
    r"\bhttps?://[^\s]+",
];

/// Applies capture levels and redaction. Compile once, reuse everywhere -
/// regex compilation is not cheap and the controller sits on the hot path
/// of every tracked event.
pub struct PrivacyController {
    config: PrivacyConfig,
    builtin: Vec<Regex>,
    custom: Vec<Regex>,
}

impl fmt::Debug for PrivacyController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrivacyController")
            .field("config", &self.config)
            .field("custom_patterns", &self.custom.len())
            .finish()
    }
}

impl PrivacyController {
    /// Build a controller, compiling builtin and custom patterns.
    /// Invalid custom patterns are skipped with a warning rather than
    /// failing initialization.
    pub fn new(config: PrivacyConfig) -> Self {
        let builtin = BUILTIN_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("builtin PII pattern must compile"))
            .collect();

        let custom = config
            .custom_patterns
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Skipping invalid custom PII pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        Self { config, builtin, custom }
    }

    /// Effective capture level for a content class
    pub fn level_for(&self, class: ContentClass) -> CaptureLevel {
        let override_level = match class {
            ContentClass::Prompts => self.config.prompts,
            ContentClass::Responses => self.config.responses,
            ContentClass::Errors => self.config.errors,
            ContentClass::Metadata => self.config.metadata,
        };
        override_level.unwrap_or(self.config.default_level)
    }

    /// Process content for a class. Returns None when the content must be
    /// suppressed entirely.
    pub fn process(&self, content: &str, class: ContentClass) -> Option<String> {
        match self.level_for(class) {
            CaptureLevel::None => None,
            CaptureLevel::Metadata => Some(summarize(content)),
            CaptureLevel::Sanitized => Some(self.sanitize(content)),
            CaptureLevel::Full => Some(content.to_string()),
        }
    }

    /// Run the redaction passes: builtin patterns (if enabled), then custom
    /// patterns, then the user hook on the already-redacted text.
    fn sanitize(&self, content: &str) -> String {
        if content.is_empty() {
            return String::new();
        }

        let mut text = content.to_string();

        if !self.config.disable_builtin_detection {
            for re in &self.builtin {
                text = self.redact_matches(re, &text);
            }
        }
        for re in &self.custom {
            text = self.redact_matches(re, &text);
        }

        if let Some(hook) = &self.config.custom_sanitizer {
            text = hook(&text);
        }

        text
    }

    fn redact_matches(&self, re: &Regex, text: &str) -> String {
        let hashing = self.config.hash_matches && self.config.hash_salt.is_some();
        re.replace_all(text, |caps: &regex::Captures<'_>| {
            if hashing {
                let salt = self.config.hash_salt.as_deref().unwrap_or_default();
                hash_marker(&caps[0], salt)
            } else {
                REDACTED.to_string()
            }
        })
        .into_owned()
    }

    /// True when any active pattern (builtin if enabled, plus custom)
    /// matches the content
    pub fn contains_pii(&self, content: &str) -> bool {
        let builtin = !self.config.disable_builtin_detection
            && self.builtin.iter().any(|re| re.is_match(content));
        builtin || self.custom.iter().any(|re| re.is_match(content))
    }
}

impl Default for PrivacyController {
    fn default() -> Self {
        Self::new(PrivacyConfig::default())
    }
}

/// `[HASH:<first 8 hex chars of sha256(match || salt)>]`
fn hash_marker(matched: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(matched.as_bytes());
    hasher.update(salt.as_bytes());
    let digest = hasher.finalize();
    let hex: String = digest.iter().take(4).map(|b| format!("{:02x}", b)).collect();
    format!("[HASH:{}]", hex)
}

/// Structural summary used at the `metadata` capture level. Contains no
/// substrings of the original content.
fn summarize(content: &str) -> String {
    let length = content.chars().count();
    let word_count = content.split_whitespace().count();
    let has_digits = content.chars().any(|c| c.is_ascii_digit());
    let has_special_chars = content
        .chars()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());
    let sentence_estimate = content
        .chars()
        .filter(|c| matches!(c, '.' | '!' | '?'))
        .count()
        .max(usize::from(!content.trim().is_empty()));

    format!(
        "[CONTENT: {} chars, {} words, digits={}, special={}, ~{} sentences]",
        length, word_count, has_digits, has_special_chars, sentence_estimate
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sanitizing() -> PrivacyController {
        PrivacyController::new(PrivacyConfig::default())
    }

    fn with_level(level: CaptureLevel) -> PrivacyController {
        PrivacyController::new(PrivacyConfig {
            default_level: level,
            ..Default::default()
        })
    }

    #[test]
    fn test_none_suppresses_content() {
        let pc = with_level(CaptureLevel::None);
        assert_eq!(pc.process("secret prompt", ContentClass::Prompts), None);
    }

    #[test]
    fn test_full_passes_through() {
        let pc = with_level(CaptureLevel::Full);
        assert_eq!(
            pc.process("email me at a@b.com", ContentClass::Prompts).unwrap(),
            "email me at a@b.com"
        );
    }

    #[test]
    fn test_metadata_contains_no_original_substrings() {
        let pc = with_level(CaptureLevel::Metadata);
        let summary = pc.process("alice sent 4 messages!", ContentClass::Prompts).unwrap();
        assert!(!summary.contains("alice"));
        assert!(!summary.contains("messages"));
        assert!(summary.contains("22 chars"));
        assert!(summary.contains("4 words"));
        assert!(summary.contains("digits=true"));
        assert!(summary.contains("special=true"));
    }

    #[test]
    fn test_redacts_email() {
        let pc = sanitizing();
        assert_eq!(
            pc.process("email me at a@b.com", ContentClass::Prompts).unwrap(),
            "email me at [REDACTED]"
        );
    }

    #[test]
    fn test_redacts_phone() {
        let pc = sanitizing();
        let out = pc.process("call 555-867-5309 now", ContentClass::Prompts).unwrap();
        assert_eq!(out, "call [REDACTED] now");
    }

    #[test]
    fn test_redacts_card_number() {
        let pc = sanitizing();
        let out = pc
            .process("card 4111 1111 1111 1111 on file", ContentClass::Prompts)
            .unwrap();
        assert!(!out.contains("4111"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_redacts_ssn() {
        let pc = sanitizing();
        let out = pc.process("ssn is 123-45-6789", ContentClass::Prompts).unwrap();
        assert_eq!(out, "ssn is [REDACTED]");
    }

    #[test]
    fn test_redacts_ipv4() {
        let pc = sanitizing();
        let out = pc.process("host 192.168.0.1 down", ContentClass::Errors).unwrap();
        assert_eq!(out, "host [REDACTED] down");
    }

    #[test]
    fn test_redacts_secret_pairs() {
        let pc = sanitizing();
        let out = pc
            .process("set api_key=sk-abc123 then token: xyz", ContentClass::Prompts)
            .unwrap();
        assert!(!out.contains("sk-abc123"));
        assert!(!out.contains("xyz"));
    }

    #[test]
    fn test_redacts_urls() {
        let pc = sanitizing();
        let out = pc
            .process("see https://internal.example.com/path?q=1", ContentClass::Prompts)
            .unwrap();
        assert_eq!(out, "see [REDACTED]");
    }

    #[test]
    fn test_no_pii_unchanged_with_whitespace_preserved() {
        let pc = sanitizing();
        let input = "  hello   world  ";
        assert_eq!(pc.process(input, ContentClass::Prompts).unwrap(), input);
    }

    #[test]
    fn test_empty_input_returns_empty() {
        let pc = sanitizing();
        assert_eq!(pc.process("", ContentClass::Prompts).unwrap(), "");
    }

    #[test]
    fn test_builtin_detection_can_be_disabled() {
        let pc = PrivacyController::new(PrivacyConfig {
            disable_builtin_detection: true,
            ..Default::default()
        });
        let input = "email a@b.com";
        assert_eq!(pc.process(input, ContentClass::Prompts).unwrap(), input);
        assert!(!pc.contains_pii(input));
    }

    #[test]
    fn test_custom_patterns_apply_after_builtin() {
        let pc = PrivacyController::new(PrivacyConfig {
            custom_patterns: vec![r"\bACME-\d+\b".to_string()],
            ..Default::default()
        });
        let out = pc
            .process("ticket ACME-42 from a@b.com", ContentClass::Prompts)
            .unwrap();
        assert_eq!(out, "ticket [REDACTED] from [REDACTED]");
    }

    #[test]
    fn test_invalid_custom_pattern_skipped() {
        let pc = PrivacyController::new(PrivacyConfig {
            custom_patterns: vec!["(unclosed".to_string()],
            ..Default::default()
        });
        // Builtin patterns still work
        assert!(pc.contains_pii("a@b.com"));
    }

    #[test]
    fn test_custom_sanitizer_runs_on_redacted_text() {
        let pc = PrivacyController::new(PrivacyConfig {
            custom_sanitizer: Some(Arc::new(|text: &str| text.replace("hello", "goodbye"))),
            ..Default::default()
        });
        let out = pc.process("hello a@b.com", ContentClass::Prompts).unwrap();
        assert_eq!(out, "goodbye [REDACTED]");
    }

    #[test]
    fn test_hashing_replacement() {
        let pc = PrivacyController::new(PrivacyConfig {
            hash_matches: true,
            hash_salt: Some("pepper".to_string()),
            ..Default::default()
        });
        let out = pc.process("email a@b.com", ContentClass::Prompts).unwrap();
        assert!(out.starts_with("email [HASH:"));
        assert!(!out.contains("a@b.com"));
        // Deterministic for the same salt
        assert_eq!(out, pc.process("email a@b.com", ContentClass::Prompts).unwrap());
    }

    #[test]
    fn test_hashing_without_salt_falls_back_to_redaction() {
        let pc = PrivacyController::new(PrivacyConfig {
            hash_matches: true,
            hash_salt: None,
            ..Default::default()
        });
        let out = pc.process("email a@b.com", ContentClass::Prompts).unwrap();
        assert_eq!(out, "email [REDACTED]");
    }

    #[test]
    fn test_per_class_overrides() {
        let pc = PrivacyController::new(PrivacyConfig {
            default_level: CaptureLevel::Sanitized,
            responses: Some(CaptureLevel::None),
            ..Default::default()
        });
        assert!(pc.process("hi", ContentClass::Prompts).is_some());
        assert!(pc.process("hi", ContentClass::Responses).is_none());
    }

    #[test]
    fn test_contains_pii() {
        let pc = sanitizing();
        assert!(pc.contains_pii("reach me at a@b.com"));
        assert!(pc.contains_pii("ssn 123-45-6789"));
        assert!(!pc.contains_pii("plain text with no identifiers"));
    }
}
