//! Plan parsing
//!
//! Extracts the declared manifest from accumulated response text. Each wire
//! format locates its manifest differently, but all share one contract:
//! `None` means "not enough text yet", never an error.
//!
//! | Format | Manifest location |
//! |--------|-------------------|
//! | ManifestV2 | object under `"manifest"`, or the leading object itself |
//! | LegacyCommentPlan | object after `// PLAN:` |
//! | DelimiterMarker | object after `<!-- PLAN -->` |
//! | BareComment | inferred from `// path` headers |

mod manifest;

use crate::types::{FilePlan, WireFormat};
use crate::wire::{header_regex, strip_code_fence, MARKER_PLAN_OPEN, PLAN_COMMENT};
use manifest::{object_open_after, plan_from_object_at};

/// Parse the plan for `format` out of `text`, if it has fully arrived.
pub fn parse_plan(format: WireFormat, text: &str) -> Option<FilePlan> {
    match format {
        WireFormat::ManifestV2 => parse_v2(text),
        WireFormat::LegacyCommentPlan => parse_after_token(text, PLAN_COMMENT),
        WireFormat::DelimiterMarker => parse_after_token(text, MARKER_PLAN_OPEN),
        WireFormat::BareComment => parse_bare(text),
        WireFormat::Unknown => None,
    }
}

fn parse_v2(text: &str) -> Option<FilePlan> {
    let body = strip_code_fence(text);
    let open = match body.find("\"manifest\"") {
        Some(key) => {
            let after_key = key + "\"manifest\"".len();
            let colon = after_key + body[after_key..].find(':')?;
            object_open_after(body, colon + 1)?
        }
        None => object_open_after(body, 0)?,
    };
    plan_from_object_at(body, open)
}

fn parse_after_token(text: &str, token: &str) -> Option<FilePlan> {
    let at = text.find(token)?;
    let open = object_open_after(text, at + token.len())?;
    plan_from_object_at(text, open)
}

/// Every unique `// path` header, in order of appearance
pub fn bare_headers(text: &str) -> Vec<String> {
    let mut seen = indexmap::IndexSet::new();
    for caps in header_regex().captures_iter(text) {
        seen.insert(caps[1].to_string());
    }
    seen.into_iter().collect()
}

fn parse_bare(text: &str) -> Option<FilePlan> {
    let headers = bare_headers(text);
    if headers.is_empty() {
        return None;
    }
    Some(FilePlan::from_manifest(headers, vec![], vec![], None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FileMap;
    use crate::wire::encode_response;

    fn files() -> FileMap {
        let mut files = FileMap::new();
        files.insert("src/App.tsx".to_string(), "export default function App() {\n  return null;\n}\n".to_string());
        files.insert("src/main.tsx".to_string(), "import App from './App';\n".to_string());
        files
    }

    #[test]
    fn test_v2_plan_from_full_document() {
        let text = encode_response(WireFormat::ManifestV2, &files(), &["src/old.tsx".to_string()]);
        let plan = parse_plan(WireFormat::ManifestV2, &text).unwrap();
        assert_eq!(plan.to_create.len(), 2);
        assert!(plan.to_delete.contains("src/old.tsx"));
        assert_eq!(plan.total_count, 3);
        assert_eq!(plan.expected_lines("src/App.tsx", 100), 3);
    }

    #[test]
    fn test_plan_from_any_prefix_with_balanced_manifest() {
        for format in [
            WireFormat::ManifestV2,
            WireFormat::LegacyCommentPlan,
            WireFormat::DelimiterMarker,
        ] {
            let text = encode_response(format, &files(), &[]);
            let full = parse_plan(format, &text).unwrap();
            let mut found_at = None;
            for end in 0..=text.len() {
                if let Some(plan) = parse_plan(format, &text[..end]) {
                    assert_eq!(plan, full, "{} prefix {} disagrees", format, end);
                    found_at.get_or_insert(end);
                }
            }
            assert!(found_at.unwrap() < text.len(), "{} plan only at the very end", format);
        }
    }

    #[test]
    fn test_bare_manifest_followed_by_pairs() {
        let text = r#"{"create":["a.tsx"],"total":1}"a.tsx":"export default function A(){return null}"#;
        let plan = parse_plan(WireFormat::ManifestV2, text).unwrap();
        assert_eq!(plan.to_create.iter().collect::<Vec<_>>(), vec!["a.tsx"]);
        assert_eq!(plan.total_count, 1);
    }

    #[test]
    fn test_fenced_v2_plan() {
        let text = format!("```json\n{}\n```", encode_response(WireFormat::ManifestV2, &files(), &[]));
        assert!(parse_plan(WireFormat::ManifestV2, &text).is_some());
    }

    #[test]
    fn test_bare_plan_grows_with_headers() {
        let one = "// src/App.tsx\nexport default function App() {}\n";
        let plan = parse_plan(WireFormat::BareComment, one).unwrap();
        assert_eq!(plan.to_create.len(), 1);

        let two = format!("{}// src/main.tsx\nimport App from './App';\n// src/App.tsx\n", one);
        assert_eq!(bare_headers(&two), vec!["src/App.tsx", "src/main.tsx"]);
    }

    #[test]
    fn test_unknown_has_no_plan() {
        assert!(parse_plan(WireFormat::Unknown, "{\"create\":[\"a.ts\"]}").is_none());
    }
}
