//! Format detection
//!
//! Formats overlap in their character content (a marker response can contain
//! JSON, a JSON response can contain `//` comments), so the rules run in a
//! fixed order and the first match wins.

use super::{head, strip_code_fence, MARKER_PLAN_OPEN, PLAN_COMMENT};
use crate::config::DetectionConfig;
use crate::types::WireFormat;
use regex::Regex;
use std::sync::OnceLock;

fn loose_json_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*\{\s*"[^"\n]+"\s*:\s*""#).expect("valid regex"))
}

fn bare_header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*//[ \t]*[A-Za-z0-9_@.\-/]+\.[A-Za-z0-9]+[ \t]*\r?\n").expect("valid regex")
    })
}

/// Classify accumulated response text.
///
/// Returns [`WireFormat::Unknown`] for text shorter than
/// `config.min_chars`; callers retry on the next chunk.
pub fn detect_format(text: &str, config: &DetectionConfig) -> WireFormat {
    if text.chars().take(config.min_chars).count() < config.min_chars {
        return WireFormat::Unknown;
    }

    if text.contains("<!-- FILE:") || text.contains(MARKER_PLAN_OPEN) {
        return WireFormat::DelimiterMarker;
    }

    if text.contains(PLAN_COMMENT) {
        return WireFormat::LegacyCommentPlan;
    }

    let window = head(text, config.window_chars);
    let body = strip_code_fence(window);

    if body.trim_start().starts_with('{')
        && (window.contains("\"manifest\"") || window.contains("\"create\""))
    {
        return WireFormat::ManifestV2;
    }

    if loose_json_regex().is_match(body) {
        return WireFormat::LegacyCommentPlan;
    }

    if bare_header_regex().is_match(body) {
        return WireFormat::BareComment;
    }

    WireFormat::Unknown
}

/// Sticky detector for one stream.
///
/// Runs [`detect_format`] until it yields a verdict, then never runs again.
#[derive(Debug, Clone, Default)]
pub struct FormatDetector {
    verdict: WireFormat,
    attempts: usize,
}

impl FormatDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known format, skipping detection entirely
    pub fn fixed(format: WireFormat) -> Self {
        Self {
            verdict: format,
            attempts: 0,
        }
    }

    /// Classify `text` unless a verdict already exists.
    pub fn observe(&mut self, text: &str, config: &DetectionConfig) -> WireFormat {
        if self.verdict.is_known() {
            return self.verdict;
        }
        self.attempts += 1;
        self.verdict = detect_format(text, config);
        if self.verdict.is_known() {
            tracing::debug!(
                format = %self.verdict,
                attempts = self.attempts,
                chars = text.len(),
                "Wire format detected"
            );
        }
        self.verdict
    }

    pub fn verdict(&self) -> WireFormat {
        self.verdict
    }

    /// Number of times detection actually ran
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
