//! Boundary scanning for JSON-string file contents.

use super::Boundary;
use crate::types::FileStatus;
use serde_json::Value;

/// Byte offset just past the opening quote of `path`'s string value.
///
/// Occurrences of the quoted path that are escaped (inside another file's
/// content) or not followed by `: "` (manifest arrays, size hints) are
/// skipped.
fn locate_value(text: &str, path: &str) -> Option<usize> {
    let needle = Value::String(path.to_string()).to_string();
    for (i, _) in text.match_indices(&needle) {
        if i > 0 && text.as_bytes()[i - 1] == b'\\' {
            continue;
        }
        let rest = text[i + needle.len()..].trim_start();
        let Some(after_colon) = rest.strip_prefix(':') else {
            continue;
        };
        if let Some(value) = after_colon.trim_start().strip_prefix('"') {
            return Some(text.len() - value.len());
        }
    }
    None
}

pub(super) fn scan(text: &str, path: &str) -> Boundary {
    let Some(start) = locate_value(text, path) else {
        return Boundary::pending();
    };

    let mut escaped = false;
    for (i, &b) in text.as_bytes().iter().enumerate().skip(start) {
        if escaped {
            escaped = false;
        } else if b == b'\\' {
            escaped = true;
        } else if b == b'"' {
            return Boundary::spanning(text, FileStatus::Complete, start, i);
        }
    }
    Boundary::spanning(text, FileStatus::Streaming, start, text.len())
}

/// Decode a raw JSON string body.
///
/// For an unterminated body, a dangling escape sequence at the very end is
/// dropped first, since its remaining characters never arrived.
pub(super) fn decode(raw: &str, complete: bool) -> Option<String> {
    let body = if complete { raw } else { trim_dangling_escape(raw) };
    serde_json::from_str::<String>(&format!("\"{}\"", body)).ok()
}

fn trailing_backslashes(s: &str) -> usize {
    s.bytes().rev().take_while(|b| *b == b'\\').count()
}

fn trim_dangling_escape(raw: &str) -> &str {
    if trailing_backslashes(raw) % 2 == 1 {
        return &raw[..raw.len() - 1];
    }
    if let Some(u) = raw.rfind("\\u") {
        let tail = &raw[u + 2..];
        if tail.len() < 4
            && tail.bytes().all(|b| b.is_ascii_hexdigit())
            && trailing_backslashes(&raw[..u]) % 2 == 0
        {
            return &raw[..u];
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skips_manifest_mentions() {
        let text = r#"{"create":["a.tsx"],"lines":{"a.tsx":3}}"a.tsx": "hi"#;
        let b = scan(text, "a.tsx");
        assert_eq!(b.status, FileStatus::Streaming);
        assert_eq!(b.received_chars, 2);
    }

    #[test]
    fn test_escaped_quote_does_not_close() {
        let text = r#""a.ts":"say \"hi\"" , "b.ts":"x"#;
        let b = scan(text, "a.ts");
        assert_eq!(b.status, FileStatus::Complete);
        assert_eq!(b.raw(text), Some(r#"say \"hi\""#));
    }

    #[test]
    fn test_escaped_backslash_then_quote_closes() {
        let text = r#""a.ts":"c:\\" "#;
        let b = scan(text, "a.ts");
        assert_eq!(b.status, FileStatus::Complete);
        assert_eq!(decode(b.raw(text).unwrap(), true).as_deref(), Some("c:\\"));
    }

    #[test]
    fn test_escaped_key_inside_content_is_ignored() {
        let text = r#""a.json":"{\"b.json\": \"x\"}""#;
        assert_eq!(scan(text, "b.json").status, FileStatus::Pending);
    }

    #[test]
    fn test_key_without_value_yet() {
        assert_eq!(scan(r#""a.ts": "#, "a.ts").status, FileStatus::Pending);
    }

    #[test]
    fn test_decode_partial() {
        assert_eq!(decode(r"line\n", false).as_deref(), Some("line\n"));
        assert_eq!(decode(r"line\", false).as_deref(), Some("line"));
        assert_eq!(decode(r"snow \u26", false).as_deref(), Some("snow "));
        assert_eq!(decode(r"path \\u26", false).as_deref(), Some(r"path \u26"));
    }
}
