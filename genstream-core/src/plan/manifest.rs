//! Tolerant manifest extraction
//!
//! The manifest usually arrives long before the rest of the document, so the
//! whole response is almost never valid JSON while we read it. Extraction
//! works on the manifest sub-object alone:
//!
//! 1. Find the balanced end of the object starting at the manifest's brace
//!    and parse just that slice (retrying once with trailing commas removed).
//! 2. If that fails, pull the `create` / `update` / `delete` arrays out
//!    individually with string matching.
//!
//! Step 2 only runs once the manifest is known to be over: either the
//! balanced slice existed but did not parse, or a `"files"` section has
//! started after it. Running it earlier would freeze a plan whose `update`
//! array simply has not arrived yet.

use crate::types::FilePlan;
use crate::wire::balanced_object_end;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::OnceLock;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct RawManifest {
    create: Vec<String>,
    update: Vec<String>,
    delete: Vec<String>,
    total: Option<usize>,
    lines: HashMap<String, usize>,
}

impl RawManifest {
    fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    fn into_plan(self) -> FilePlan {
        let mut plan = FilePlan::from_manifest(self.create, self.update, self.delete, self.total);
        plan.expected_line_counts = self.lines;
        plan
    }
}

fn trailing_comma_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",\s*([\]}])").expect("valid regex"))
}

fn array_regex(key: &str) -> Regex {
    Regex::new(&format!(r#""{}"\s*:\s*(\[[^\]]*\])"#, regex::escape(key))).expect("valid regex")
}

fn total_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""total"\s*:\s*(\d+)"#).expect("valid regex"))
}

fn lines_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#""lines"\s*:\s*(\{[^{}]*\})"#).expect("valid regex"))
}

fn strip_trailing_commas(json: &str) -> String {
    trailing_comma_regex().replace_all(json, "$1").into_owned()
}

fn parse_manifest_object(slice: &str) -> Option<RawManifest> {
    serde_json::from_str::<RawManifest>(slice)
        .or_else(|_| serde_json::from_str::<RawManifest>(&strip_trailing_commas(slice)))
        .ok()
        .filter(|m| !m.is_empty())
}

fn parse_array(region: &str, key: &str) -> Option<Vec<String>> {
    let caps = array_regex(key).captures(region)?;
    let raw = strip_trailing_commas(&caps[1]);
    serde_json::from_str::<Vec<String>>(&raw).ok()
}

/// Narrow extraction of the manifest arrays by pattern matching.
fn parse_manifest_loose(region: &str) -> Option<RawManifest> {
    let create = parse_array(region, "create");
    let update = parse_array(region, "update");
    if create.is_none() && update.is_none() {
        return None;
    }

    let manifest = RawManifest {
        create: create.unwrap_or_default(),
        update: update.unwrap_or_default(),
        delete: parse_array(region, "delete").unwrap_or_default(),
        total: total_regex()
            .captures(region)
            .and_then(|c| c[1].parse().ok()),
        lines: lines_regex()
            .captures(region)
            .and_then(|c| serde_json::from_str(&strip_trailing_commas(&c[1])).ok())
            .unwrap_or_default(),
    };
    (!manifest.is_empty()).then_some(manifest)
}

/// Extract a plan from the manifest object opening at byte `open`.
///
/// Returns `None` while the manifest is still arriving.
pub(crate) fn plan_from_object_at(text: &str, open: usize) -> Option<FilePlan> {
    match balanced_object_end(text, open) {
        Some(end) => {
            let slice = &text[open..end];
            let manifest = parse_manifest_object(slice).or_else(|| {
                tracing::debug!(len = slice.len(), "Manifest did not parse, trying loose extraction");
                parse_manifest_loose(slice)
            })?;
            Some(manifest.into_plan())
        }
        None => {
            let region = &text[open..];
            if region.contains("\"files\"") {
                parse_manifest_loose(region).map(RawManifest::into_plan)
            } else {
                None
            }
        }
    }
}

/// First `{` at or after `from`, skipping only whitespace.
pub(crate) fn object_open_after(text: &str, from: usize) -> Option<usize> {
    let rest = &text[from..];
    let trimmed = rest.trim_start();
    trimmed
        .starts_with('{')
        .then(|| from + (rest.len() - trimmed.len()))
}
