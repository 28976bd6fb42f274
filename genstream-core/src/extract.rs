//! Structured extraction of a finished response
//!
//! Reads every file out of a complete response. Returns `None` when the
//! document is not structurally whole for its format: the outer JSON object
//! never balanced, some marker block never closed, or a length cutoff left
//! the last bare-comment section open. The Truncation Analyzer treats `None`
//! as "go look at files one by one".

use crate::plan::bare_headers;
use crate::scan::{file_content, locate};
use crate::types::{FileMap, FileStatus, FinishReason, WireFormat};
use crate::wire::{balanced_object_end, file_markers, strip_code_fence, PLAN_COMMENT};
use serde_json::{Map, Value};

/// Extract all files from a finished response in `format`.
///
/// Only bare-comment text depends on `finish`: its last section is whole
/// only when the stream stopped normally.
pub fn extract_files(format: WireFormat, text: &str, finish: FinishReason) -> Option<FileMap> {
    match format {
        WireFormat::ManifestV2 => extract_v2(text),
        WireFormat::LegacyCommentPlan => extract_legacy(text),
        WireFormat::DelimiterMarker => extract_marker(text),
        WireFormat::BareComment => extract_bare(text, finish == FinishReason::Stop),
        WireFormat::Unknown => None,
    }
}

fn string_entries(object: &Map<String, Value>) -> FileMap {
    object
        .iter()
        .filter_map(|(path, value)| value.as_str().map(|c| (path.clone(), c.to_string())))
        .collect()
}

fn parse_object_at(text: &str, open: usize) -> Option<Map<String, Value>> {
    let end = balanced_object_end(text, open)?;
    match serde_json::from_str::<Value>(&text[open..end]) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "Balanced object failed to parse");
            None
        }
    }
}

fn extract_v2(text: &str) -> Option<FileMap> {
    let body = strip_code_fence(text);
    let open = body.find('{')?;
    let doc = parse_object_at(body, open)?;
    match doc.get("files") {
        Some(Value::Object(files)) => Some(string_entries(files)),
        _ => None,
    }
}

fn extract_legacy(text: &str) -> Option<FileMap> {
    let body = strip_code_fence(text);
    let files_from = match body.find(PLAN_COMMENT) {
        Some(at) => {
            let plan_open = at + body[at..].find('{')?;
            balanced_object_end(body, plan_open)?
        }
        None => 0,
    };
    let open = files_from + body[files_from..].find('{')?;
    let files = parse_object_at(body, open)?;
    Some(string_entries(&files))
}

fn extract_marker(text: &str) -> Option<FileMap> {
    let mut files = FileMap::new();
    for open in file_markers(text, 0).filter(|m| !m.closing) {
        let Some(path) = open.path else { continue };
        let boundary = locate(WireFormat::DelimiterMarker, text, path, true);
        if boundary.status != FileStatus::Complete {
            return None;
        }
        let content = file_content(WireFormat::DelimiterMarker, text, &boundary)?;
        files.insert(path.to_string(), content);
    }
    (!files.is_empty()).then_some(files)
}

fn extract_bare(text: &str, at_end: bool) -> Option<FileMap> {
    let mut files = FileMap::new();
    for path in bare_headers(text) {
        let boundary = locate(WireFormat::BareComment, text, &path, at_end);
        if boundary.status == FileStatus::Streaming {
            return None;
        }
        if let Some(content) = file_content(WireFormat::BareComment, text, &boundary) {
            files.insert(path, content);
        }
    }
    (!files.is_empty()).then_some(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_response;

    fn sample() -> FileMap {
        let mut files = FileMap::new();
        files.insert(
            "src/App.tsx".to_string(),
            "import { useState } from 'react';\n\nexport default function App() {\n  const [n, setN] = useState(0);\n  return <button onClick={() => setN(n + 1)}>\"{n}\" \\ clicks</button>;\n}\n".to_string(),
        );
        files.insert("src/index.css".to_string(), "body { margin: 0; }".to_string());
        files.insert("src/emoji.ts".to_string(), "export const wave = '👋 héllo';\n".to_string());
        files
    }

    #[test]
    fn test_round_trip_every_format() {
        for format in [
            WireFormat::ManifestV2,
            WireFormat::LegacyCommentPlan,
            WireFormat::DelimiterMarker,
            WireFormat::BareComment,
        ] {
            let text = encode_response(format, &sample(), &[]);
            assert_eq!(
                extract_files(format, &text, FinishReason::Stop),
                Some(sample()),
                "format {}",
                format
            );
        }
    }

    #[test]
    fn test_truncated_json_is_not_whole() {
        let text = encode_response(WireFormat::ManifestV2, &sample(), &[]);
        let cut = &text[..text.len() - 10];
        assert_eq!(extract_files(WireFormat::ManifestV2, cut, FinishReason::Stop), None);
    }

    #[test]
    fn test_unclosed_marker_block_is_not_whole() {
        let text = "<!-- FILE: a.ts -->\nconst a = 1;\n<!-- /FILE: a.ts -->\n<!-- FILE: b.ts -->\nconst b";
        assert_eq!(extract_files(WireFormat::DelimiterMarker, text, FinishReason::Stop), None);
    }

    #[test]
    fn test_loose_legacy_without_plan() {
        let text = "{\"src/a.ts\": \"export const a = 1;\"}";
        let files = extract_files(WireFormat::LegacyCommentPlan, text, FinishReason::Stop).unwrap();
        assert_eq!(files["src/a.ts"], "export const a = 1;");
    }

    #[test]
    fn test_fenced_v2() {
        let text = format!("```json\n{}\n```\n", encode_response(WireFormat::ManifestV2, &sample(), &[]));
        assert_eq!(extract_files(WireFormat::ManifestV2, &text, FinishReason::Stop), Some(sample()));
    }

    #[test]
    fn test_bare_cut_off_is_not_whole() {
        let text = "// src/a.ts\nexport const a = 1;\n// src/b.ts\nexport const b";
        assert_eq!(extract_files(WireFormat::BareComment, text, FinishReason::Length), None);
        let files = extract_files(WireFormat::BareComment, text, FinishReason::Stop).unwrap();
        assert_eq!(files["src/b.ts"], "export const b");
    }
}
