//! Emergency extraction
//!
//! Last-resort recovery for responses that never followed a wire format:
//! conversational prose with fenced code, or loose `// path` sections. Only
//! blocks that look like real source survive; each one gets a path by the
//! first rule that yields one:
//!
//! 1. a `// path` header inside the block, or a path alone on the line
//!    right before it
//! 2. the last path mentioned in the prose leading up to the block
//! 3. the exported component or hook name
//! 4. `extracted_{n}` with an extension from the fence language
//!
//! Every path ends up under the configured source root.

use crate::config::EmergencyConfig;
use crate::plan::bare_headers;
use crate::scan::locate;
use crate::types::{FileMap, WireFormat};
use crate::wire::header_regex;
use regex::Regex;
use std::sync::OnceLock;

const CODE_PREFIXES: &[&str] = &[
    "import ",
    "import{",
    "export ",
    "const ",
    "let ",
    "var ",
    "function ",
    "class ",
    "interface ",
    "type ",
    "enum ",
    "async ",
    "'use ",
    "\"use ",
];

fn path_mention_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[\s`'(*\x22])((?:\.?/)?[A-Za-z0-9_@\-]+(?:/[A-Za-z0-9_@.\-]+)*\.(?:tsx|ts|jsx|js|css|scss|html|json|md|vue|svelte))\b")
            .expect("valid path mention regex")
    })
}

fn exported_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)^\s*export\s+(?:default\s+)?(?:async\s+)?(?:function\*?|class|const|let)\s+([A-Za-z_$][A-Za-z0-9_$]*)|^\s*export\s+default\s+([A-Z][A-Za-z0-9_$]*)\s*;?\s*$",
        )
        .expect("valid export regex")
    })
}

/// A candidate region of source text
#[derive(Debug, Clone)]
struct Block<'a> {
    /// Byte offset where the block (fence or header line) starts
    start: usize,
    /// Byte offset just past the block
    end: usize,
    lang: &'a str,
    body: &'a str,
    /// Path named by a bare header that introduced the block
    header: Option<String>,
}

/// Best-effort file recovery from unstructured text.
pub fn extract_emergency(text: &str, config: &EmergencyConfig) -> FileMap {
    let mut blocks = fenced_blocks(text);
    if blocks.is_empty() {
        blocks = header_sections(text);
    }

    let mut files = FileMap::new();
    let mut fallback_index = 0;
    let mut prose_from = 0;

    for block in &blocks {
        let prose = &text[prose_from.min(block.start)..block.start];
        prose_from = block.end;

        let (inline_header, body) = split_inline_header(block.body);
        if !looks_like_code(body) {
            continue;
        }
        let size = body.trim().chars().count();
        if size < config.min_block_chars {
            tracing::debug!(size, "Skipping short code block");
            continue;
        }

        let path = block
            .header
            .clone()
            .or(inline_header)
            .or_else(|| path_on_last_line(prose))
            .or_else(|| last_path_mention(prose))
            .or_else(|| path_from_export(body, block.lang))
            .unwrap_or_else(|| {
                fallback_index += 1;
                format!("extracted_{}.{}", fallback_index, extension_for(block.lang))
            });
        let path = under_source_root(&path, &config.source_root);

        tracing::info!(path = %path, chars = size, "Emergency extraction recovered block");
        let mut content = body.trim_matches('\n').to_string();
        content.push('\n');
        files.insert(path, content);
    }

    files
}

/// Fenced code regions. A fence still open at the end of the text runs to
/// the end.
fn fenced_blocks(text: &str) -> Vec<Block<'_>> {
    let mut blocks = Vec::new();
    let mut open: Option<(usize, &str, usize)> = None;
    let mut pos = 0;

    for line in text.split_inclusive('\n') {
        let line_end = pos + line.len();
        if let Some(info) = line.trim().strip_prefix("```") {
            match open.take() {
                None => open = Some((pos, info.trim(), line_end)),
                Some((start, lang, body_start)) => blocks.push(Block {
                    start,
                    end: line_end,
                    lang,
                    body: &text[body_start..pos],
                    header: None,
                }),
            }
        }
        pos = line_end;
    }

    if let Some((start, lang, body_start)) = open {
        blocks.push(Block {
            start,
            end: text.len(),
            lang,
            body: &text[body_start..],
            header: None,
        });
    }
    blocks
}

/// Sections introduced by `// path` header lines
fn header_sections(text: &str) -> Vec<Block<'_>> {
    bare_headers(text)
        .into_iter()
        .filter_map(|path| {
            let boundary = locate(WireFormat::BareComment, text, &path, true);
            let (start, end) = boundary.span?;
            let header_start = text[..start].trim_end().rfind('\n').map_or(0, |nl| nl + 1);
            Some(Block {
                start: header_start,
                end,
                lang: "",
                body: &text[start..end],
                header: Some(path),
            })
        })
        .collect()
}

/// A `// path` first line names the block; it is not part of the content.
fn split_inline_header(body: &str) -> (Option<String>, &str) {
    let leading = body.len() - body.trim_start_matches(['\n', '\r']).len();
    match header_regex().captures(&body[leading..]) {
        Some(caps) if caps.get(0).is_some_and(|m| m.start() == 0) => {
            let end = leading + caps.get(0).map_or(0, |m| m.end());
            (Some(caps[1].to_string()), &body[end..])
        }
        _ => (None, body),
    }
}

fn looks_like_code(body: &str) -> bool {
    body.lines()
        .map(str::trim_start)
        .find(|line| !line.is_empty() && !line.starts_with("//") && !line.starts_with("/*"))
        .is_some_and(|first| CODE_PREFIXES.iter().any(|p| first.starts_with(p)))
}

/// A path standing alone on the last prose line, like `src/App.tsx:`
fn path_on_last_line(prose: &str) -> Option<String> {
    let last = prose.lines().rev().find(|l| !l.trim().is_empty())?;
    let stripped = last
        .trim()
        .trim_start_matches("//")
        .trim_matches(|c: char| c.is_whitespace() || "`*:#".contains(c));
    let caps = path_mention_regex().captures(stripped)?;
    let m = caps.get(1)?;
    (m.start() == 0 && m.end() == stripped.len()).then(|| m.as_str().to_string())
}

fn last_path_mention(prose: &str) -> Option<String> {
    path_mention_regex()
        .captures_iter(prose)
        .last()
        .map(|caps| caps[1].to_string())
}

fn path_from_export(body: &str, lang: &str) -> Option<String> {
    let name = exported_name_regex().captures_iter(body).find_map(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().to_string())
    })?;

    let plain_js = matches!(lang, "js" | "jsx" | "javascript");
    let is_hook = name.len() > 3
        && name.starts_with("use")
        && name[3..].starts_with(|c: char| c.is_ascii_uppercase());

    if is_hook {
        Some(format!("hooks/{}.{}", name, if plain_js { "js" } else { "ts" }))
    } else if name == "App" {
        Some(format!("App.{}", if plain_js { "jsx" } else { "tsx" }))
    } else if name.starts_with(|c: char| c.is_ascii_uppercase()) {
        Some(format!(
            "components/{}.{}",
            name,
            if plain_js { "jsx" } else { "tsx" }
        ))
    } else {
        None
    }
}

fn extension_for(lang: &str) -> &'static str {
    match lang.to_ascii_lowercase().as_str() {
        "ts" | "typescript" => "ts",
        "js" | "javascript" => "js",
        "jsx" => "jsx",
        "css" => "css",
        "scss" => "scss",
        "html" => "html",
        "json" => "json",
        _ => "tsx",
    }
}

/// Normalize `path` to live under `root`.
pub(crate) fn under_source_root(path: &str, root: &str) -> String {
    let root = root.trim_matches('/');
    let path = path.trim_start_matches("./").trim_start_matches('/');
    if path.starts_with(&format!("{}/", root)) {
        path.to_string()
    } else {
        format!("{}/{}", root, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EmergencyConfig {
        EmergencyConfig::default()
    }

    fn app_component() -> String {
        let mut body = String::from(
            "export default function App() {\n  const items = ['one', 'two', 'three'];\n  return (\n    <ul>\n",
        );
        while body.len() < 480 {
            body.push_str("      <li className=\"item\">{items.length}</li>\n");
        }
        body.push_str("    </ul>\n  );\n}\n");
        body
    }

    #[test]
    fn test_prose_with_short_and_long_blocks() {
        let text = format!(
            "Sure! First install it:\n\n```sh\nnpm i react\n```\n\nThen replace your component with this:\n\n```tsx\n{}```\n\nLet me know if it works.",
            app_component()
        );
        let files = extract_emergency(&text, &config());
        assert_eq!(files.len(), 1);
        assert_eq!(files["src/App.tsx"], app_component());
    }

    #[test]
    fn test_short_code_block_rejected() {
        let text = "```ts\nconst a = 1;\n```";
        assert!(extract_emergency(text, &config()).is_empty());
    }

    #[test]
    fn test_inline_header_names_block() {
        let text = format!("```tsx\n// src/pages/Home.tsx\n{}```", app_component());
        let files = extract_emergency(&text, &config());
        assert_eq!(files["src/pages/Home.tsx"], app_component());
    }

    #[test]
    fn test_prose_path_mention() {
        let text = format!(
            "Put this in `components/List.tsx`, it renders the items:\n```tsx\n{}```",
            app_component()
        );
        let files = extract_emergency(&text, &config());
        assert!(files.contains_key("src/components/List.tsx"));
    }

    #[test]
    fn test_export_names() {
        let hook = "export function useCounter(start: number) {\n  const [n, setN] = useState(start);\n  return { n, inc: () => setN(n + 1) };\n}\n";
        assert_eq!(path_from_export(hook, "ts").as_deref(), Some("hooks/useCounter.ts"));

        let component = "export const Button = () => <button>ok</button>;";
        assert_eq!(
            path_from_export(component, "jsx").as_deref(),
            Some("components/Button.jsx")
        );
        assert_eq!(path_from_export("export const value = 1;", "ts"), None);
    }

    #[test]
    fn test_fallback_name_and_unterminated_fence() {
        let body = "const numbers = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10];\nconst doubled = numbers.map((n) => n * 2);\n";
        let text = format!("Here you go\n```ts\n{}", body);
        let files = extract_emergency(&text, &config());
        assert_eq!(files["src/extracted_1.ts"], body);
    }

    #[test]
    fn test_bare_sections_without_fences() {
        let text = format!("// App.tsx\n{}", app_component());
        let files = extract_emergency(&text, &config());
        assert_eq!(files["src/App.tsx"], app_component());
    }

    #[test]
    fn test_prose_block_is_not_code() {
        let text = format!("```\n{}\n```", "This is just a long explanation of what to do next. ".repeat(3));
        assert!(extract_emergency(&text, &config()).is_empty());
    }

    #[test]
    fn test_under_source_root() {
        assert_eq!(under_source_root("./App.tsx", "src"), "src/App.tsx");
        assert_eq!(under_source_root("src/App.tsx", "src"), "src/App.tsx");
        assert_eq!(under_source_root("/lib/x.ts", "src/"), "src/lib/x.ts");
    }
}
