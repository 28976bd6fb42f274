//! Boundary scanning
//!
//! Given accumulated text and a planned path, works out how much of that
//! file's content has arrived and whether its closing delimiter has been
//! seen. One variant per content encoding:
//!
//! - JSON string values (legacy and v2 formats): escape-aware quote scan
//! - Delimiter markers: open marker to close marker
//! - Bare comment headers: header to next header
//!
//! Also hosts path discovery, the cheap per-chunk scan that only looks for
//! new file names.

mod bare;
mod json;
mod marker;

use crate::types::{FileStatus, WireFormat};
use crate::wire::{file_markers, header_regex, json_file_key_regex};

/// Where a file's content sits inside the response text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub status: FileStatus,
    /// Characters of content seen so far
    pub received_chars: usize,
    /// Byte range of the raw content seen so far
    pub span: Option<(usize, usize)>,
}

impl Boundary {
    pub fn pending() -> Self {
        Self {
            status: FileStatus::Pending,
            received_chars: 0,
            span: None,
        }
    }

    fn spanning(text: &str, status: FileStatus, start: usize, end: usize) -> Self {
        Self {
            status,
            received_chars: text[start..end].chars().count(),
            span: Some((start, end)),
        }
    }

    /// Raw (still encoded) content slice
    pub fn raw<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.span.map(|(start, end)| &text[start..end])
    }

    /// Progress estimate against an expected size.
    ///
    /// 100 is reserved for Complete; anything still arriving caps at 99.
    pub fn percent(&self, expected_lines: usize, chars_per_line: usize) -> u8 {
        if self.status == FileStatus::Complete {
            return 100;
        }
        let expected_chars = expected_lines.saturating_mul(chars_per_line);
        if expected_chars == 0 {
            return 0;
        }
        let pct = (self.received_chars as f64 / expected_chars as f64 * 100.0).round();
        pct.min(99.0) as u8
    }
}

/// Size hint used to turn received characters into a percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanHint {
    pub expected_lines: usize,
    pub chars_per_line: usize,
}

/// Scan result as exposed to progress consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanResult {
    pub received_chars: usize,
    pub percent: u8,
    pub status: FileStatus,
    pub boundary: Boundary,
}

/// Locate `path`'s content in `text`.
///
/// `at_end` tells formats without a per-file terminator (bare comments) that
/// no more text is coming.
pub fn locate(format: WireFormat, text: &str, path: &str, at_end: bool) -> Boundary {
    match format {
        WireFormat::LegacyCommentPlan | WireFormat::ManifestV2 => json::scan(text, path),
        WireFormat::DelimiterMarker => marker::scan(text, path),
        WireFormat::BareComment => bare::scan(text, path, at_end),
        WireFormat::Unknown => Boundary::pending(),
    }
}

/// Locate `path` and estimate its progress.
pub fn scan_file(
    format: WireFormat,
    text: &str,
    path: &str,
    hint: ScanHint,
    at_end: bool,
) -> ScanResult {
    let boundary = locate(format, text, path, at_end);
    ScanResult {
        received_chars: boundary.received_chars,
        percent: boundary.percent(hint.expected_lines, hint.chars_per_line),
        status: boundary.status,
        boundary,
    }
}

/// Decoded content for a located boundary.
///
/// Streaming content is returned as far as it can be decoded; `None` means
/// nothing usable (pending, or an undecodable JSON fragment).
pub fn file_content(format: WireFormat, text: &str, boundary: &Boundary) -> Option<String> {
    let raw = boundary.raw(text)?;
    let complete = boundary.status == FileStatus::Complete;
    match format {
        WireFormat::LegacyCommentPlan | WireFormat::ManifestV2 => json::decode(raw, complete),
        WireFormat::DelimiterMarker if !complete => {
            Some(marker::trim_partial_marker(raw).to_string())
        }
        WireFormat::DelimiterMarker | WireFormat::BareComment => Some(raw.to_string()),
        WireFormat::Unknown => None,
    }
}

/// Paths named in `text` from byte `from` on, in order of appearance.
///
/// `from` must be a line start so header anchors behave. For an unknown
/// format every convention is tried.
pub fn discover_paths(format: WireFormat, text: &str, from: usize) -> Vec<String> {
    let mut found = Vec::new();

    if format.is_json() || format == WireFormat::Unknown {
        for caps in json_file_key_regex().captures_iter(&text[from..]) {
            let Some(m) = caps.get(0) else { continue };
            let at = from + m.start();
            if at > 0 && text.as_bytes()[at - 1] == b'\\' {
                continue;
            }
            found.push(caps[1].to_string());
        }
    }

    if matches!(format, WireFormat::DelimiterMarker | WireFormat::Unknown) {
        found.extend(
            file_markers(text, from)
                .filter(|m| !m.closing)
                .filter_map(|m| m.path.map(str::to_string)),
        );
    }

    if matches!(format, WireFormat::BareComment | WireFormat::Unknown) {
        found.extend(
            header_regex()
                .captures_iter(&text[from..])
                .map(|caps| caps[1].to_string()),
        );
    }

    found
}

fn skip_newline(text: &str, at: usize) -> usize {
    let rest = &text[at..];
    if rest.starts_with("\r\n") {
        at + 2
    } else if rest.starts_with('\n') {
        at + 1
    } else {
        at
    }
}

fn trim_one_newline(text: &str, start: usize, end: usize) -> usize {
    let body = &text[start..end];
    if body.ends_with("\r\n") {
        end - 2
    } else if body.ends_with('\n') {
        end - 1
    } else {
        end
    }
}
