//! Wire formats: shared delimiters, detection, and encoding
//!
//! A model encodes a whole source tree as one text response using one of
//! four conventions (see [`WireFormat`](crate::types::WireFormat)). This
//! module holds the pieces every other stage needs to agree on: the literal
//! markers, the escape-aware balanced-object scanner used to pull a manifest
//! out of an unterminated document, and the file-header grammar.
//!
//! All scanners work on bytes. Every delimiter they look for is ASCII, and
//! ASCII bytes never occur inside a multi-byte UTF-8 sequence, so byte
//! offsets returned here are always valid `str` slice boundaries.

mod detect;
mod encode;

pub use detect::{detect_format, FormatDetector};
pub use encode::encode_response;

use regex::Regex;
use std::sync::OnceLock;

/// Token that introduces the manifest line in the legacy format
pub const PLAN_COMMENT: &str = "// PLAN:";

/// Opening marker of the manifest block in the delimiter format
pub const MARKER_PLAN_OPEN: &str = "<!-- PLAN -->";

/// Closing marker of the manifest block in the delimiter format
pub const MARKER_PLAN_CLOSE: &str = "<!-- /PLAN -->";

/// Extensions a path must end with to count as a file header or key
const PATH_EXTENSIONS: &str =
    "tsx|ts|jsx|js|mjs|cjs|css|scss|less|html|json|md|mdx|svg|vue|svelte|py|rs|go|toml|ya?ml|txt|sh|env";

/// `// path/to/file.ext` on a line of its own, newline included.
///
/// Capture 1 is the path.
pub(crate) fn header_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r"(?m)^[ \t]*//[ \t]*([A-Za-z0-9_@.\-/]+\.(?:{}))[ \t]*\r?\n",
            PATH_EXTENSIONS
        ))
        .expect("valid header regex")
    })
}

/// A JSON key `"path/to/file.ext": "` whose value is a string.
///
/// Capture 1 is the path.
pub(crate) fn json_file_key_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(&format!(
            r#""([A-Za-z0-9_@.\-/]+\.(?:{}))"\s*:\s*""#,
            PATH_EXTENSIONS
        ))
        .expect("valid key regex")
    })
}

/// A delimiter-format file marker found in text
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct FileMarker<'a> {
    /// Byte offset of `<!--`
    pub start: usize,
    /// Byte offset just past `-->`
    pub end: usize,
    /// Path named in the marker; `None` for a bare close
    pub path: Option<&'a str>,
    pub closing: bool,
}

/// Parse the `<!-- FILE: path -->` or `<!-- /FILE[: path] -->` marker at `start`.
pub(crate) fn parse_file_marker(text: &str, start: usize) -> Option<FileMarker<'_>> {
    let rest = text[start..].strip_prefix("<!--")?;
    let body_offset = text.len() - rest.len();
    let close_rel = rest.find("-->")?;
    let body = rest[..close_rel].trim();
    let end = body_offset + close_rel + 3;

    let (closing, body) = match body.strip_prefix('/') {
        Some(b) => (true, b.trim_start()),
        None => (false, body),
    };
    let after_keyword = body.strip_prefix("FILE")?;
    let path = match after_keyword.trim_start().strip_prefix(':') {
        Some(p) => {
            let p = p.trim();
            (!p.is_empty()).then_some(p)
        }
        None if after_keyword.trim().is_empty() => None,
        None => return None,
    };
    if !closing && path.is_none() {
        return None;
    }

    Some(FileMarker {
        start,
        end,
        path,
        closing,
    })
}

/// All delimiter-format file markers at or after `from`, in order.
pub(crate) fn file_markers(text: &str, from: usize) -> impl Iterator<Item = FileMarker<'_>> {
    text[from..]
        .match_indices("<!--")
        .filter_map(move |(i, _)| parse_file_marker(text, from + i))
}

/// Find the end of the JSON object opening at `open`.
///
/// Counts `{`/`}` outside string literals; inside a literal a backslash
/// escapes the next byte and is not itself counted. Returns the byte offset
/// just past the matching `}`, or `None` if the text ends first.
pub fn balanced_object_end(text: &str, open: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    if bytes.get(open) != Some(&b'{') {
        return None;
    }

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop a surrounding markdown code fence, if the text is wrapped in one.
///
/// An opening fence without a closing one (a truncated response) is still
/// removed.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim_start();
    let Some(after_ticks) = trimmed.strip_prefix("```") else {
        return text;
    };
    let body = match after_ticks.find('\n') {
        Some(nl) => &after_ticks[nl + 1..],
        None => return "",
    };
    let tail = body.trim_end();
    match tail.strip_suffix("```") {
        Some(inner) if !inner.contains("\n```") => inner,
        _ => body,
    }
}

/// First `max_chars` characters of `text`.
pub(crate) fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Largest char boundary at or below `idx`.
pub(crate) fn floor_char_boundary(text: &str, idx: usize) -> usize {
    let mut idx = idx.min(text.len());
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

/// Byte offset of the start of the line containing `idx`.
pub(crate) fn line_start(text: &str, idx: usize) -> usize {
    let idx = floor_char_boundary(text, idx);
    text[..idx].rfind('\n').map(|nl| nl + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_end_ignores_braces_in_strings() {
        let text = r#"{"a":"}{","b":{"c":"\"}"}} tail"#;
        let end = balanced_object_end(text, 0).unwrap();
        assert_eq!(&text[end..], " tail");
    }

    #[test]
    fn test_balanced_end_handles_escaped_backslash_before_quote() {
        let text = r#"{"a":"x\\"}"#;
        assert_eq!(balanced_object_end(text, 0), Some(text.len()));
    }

    #[test]
    fn test_balanced_end_unterminated() {
        assert_eq!(balanced_object_end(r#"{"create":["a.tsx"]"#, 0), None);
        assert_eq!(balanced_object_end("no brace", 0), None);
    }

    #[test]
    fn test_balanced_end_multibyte_content() {
        let text = "{\"a\":\"héllo 🌍 }\"}";
        assert_eq!(balanced_object_end(text, 0), Some(text.len()));
    }

    #[test]
    fn test_parse_file_markers() {
        let text = "x<!-- FILE: src/App.tsx -->body<!-- /FILE: src/App.tsx --><!-- /FILE -->";
        let markers: Vec<_> = file_markers(text, 0).collect();
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0].path, Some("src/App.tsx"));
        assert!(!markers[0].closing);
        assert_eq!(&text[markers[0].end..markers[1].start], "body");
        assert!(markers[1].closing);
        assert!(markers[2].closing);
        assert_eq!(markers[2].path, None);
    }

    #[test]
    fn test_unrelated_comment_is_not_a_marker() {
        assert!(parse_file_marker("<!-- FILENAME -->", 0).is_none());
        assert!(parse_file_marker("<!-- FILE: -->", 0).is_none());
        assert!(parse_file_marker("<!-- FILE: a.ts", 0).is_none());
    }

    #[test]
    fn test_strip_code_fence() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```\n"), "{\"a\":1}\n");
        assert_eq!(strip_code_fence("```json\n{\"a\":"), "{\"a\":");
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
    }

    #[test]
    fn test_header_regex_requires_newline_and_extension() {
        let re = header_regex();
        assert!(re.is_match("// src/App.tsx\n"));
        assert!(!re.is_match("// src/App.tsx"));
        assert!(!re.is_match("// render the list\n"));
        assert!(!re.is_match("const x = 1; // src/App.tsx\n"));
    }

    #[test]
    fn test_head_respects_char_boundaries() {
        assert_eq!(head("héllo", 2), "hé");
        assert_eq!(head("hi", 10), "hi");
    }
}
