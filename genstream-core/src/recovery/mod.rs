//! Truncation analysis
//!
//! Runs once a stream has ended and decides what can be salvaged from its
//! text. The analysis escalates through progressively looser readings:
//!
//! | Step | Reading | Outcome |
//! |------|---------|---------|
//! | 1 | too short to be anything | `None` |
//! | 2 | structurally whole, nothing planned is missing | `Success` |
//! | 3 | file by file: closed files as-is, cut-off files repaired | `Continuation` / `Partial` / `Success` |
//! | 4 | unstructured fallback ([`extract_emergency`]) | `Partial` |
//! | 5 | nothing at all | `None` |
//!
//! Analysis is a pure function of its inputs, so running it twice on the
//! same frozen text and plan gives the same outcome. When a file could be
//! either malformed or merely cut off, it is treated as cut off. A length
//! cutoff leaves the last section of a format without per-file terminators
//! open, so it is repaired rather than accepted.

mod emergency;
mod repair;

pub use emergency::extract_emergency;
pub use repair::repair_truncated;

use crate::config::{Config, DetectionConfig};
use crate::extract::extract_files;
use crate::plan::parse_plan;
use crate::scan::{discover_paths, file_content, locate};
use crate::types::{
    FileMap, FilePlan, FileStatus, FinishReason, GenerationMeta, PathSet, PipelineWarning,
    RecoveryOutcome, WireFormat,
};
use crate::wire::detect_format;

/// Salvage what `text` holds.
///
/// `finish` is why the stream stopped. `existing` is the caller's current
/// project; it is only consulted to flag the risk of replacing real files
/// with an empty result.
pub fn analyze(
    text: &str,
    format: WireFormat,
    finish: FinishReason,
    plan: Option<&FilePlan>,
    existing: &FileMap,
    config: &Config,
) -> RecoveryOutcome {
    if text.trim().chars().count() < config.recovery.min_text_chars {
        tracing::debug!(chars = text.chars().count(), "Response too short to analyze");
        return RecoveryOutcome::None;
    }

    let format = settle_format(text, format, config);
    let parsed_plan;
    let plan = match plan {
        Some(plan) => Some(plan),
        None => {
            parsed_plan = parse_plan(format, text);
            parsed_plan.as_ref()
        }
    };

    if let Some(outcome) = structured(text, format, finish, plan, config) {
        return outcome;
    }

    let files = extract_emergency(text, &config.emergency);
    if !files.is_empty() {
        let missing = plan
            .map(|p| {
                p.to_create
                    .iter()
                    .filter(|path| !files.contains_key(*path))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        tracing::info!(files = files.len(), "Recovered files by emergency extraction");
        return RecoveryOutcome::Partial { files, missing };
    }

    if !existing.is_empty() {
        let warning = PipelineWarning::MergeConflictRisk {
            existing_files: existing.len(),
        };
        tracing::warn!(%warning, "Nothing recovered");
    } else {
        tracing::warn!(chars = text.chars().count(), "Nothing recovered");
    }
    RecoveryOutcome::None
}

/// Give a short or unclassified stream one more detection pass over the
/// finished text.
fn settle_format(text: &str, format: WireFormat, config: &Config) -> WireFormat {
    if format.is_known() {
        return format;
    }
    let relaxed = DetectionConfig {
        min_chars: 0,
        window_chars: config.detection.window_chars,
    };
    detect_format(text, &relaxed)
}

/// Steps 2 and 3; `None` means nothing was recovered structurally.
fn structured(
    text: &str,
    format: WireFormat,
    finish: FinishReason,
    plan: Option<&FilePlan>,
    config: &Config,
) -> Option<RecoveryOutcome> {
    if !format.is_known() {
        return None;
    }

    let at_end = finish == FinishReason::Stop;
    let extracted = extract_files(format, text, finish).filter(|files| !files.is_empty());
    if let Some(files) = &extracted {
        let nothing_missing = plan.map_or(true, |p| p.to_create.iter().all(|f| files.contains_key(f)));
        if nothing_missing {
            tracing::info!(format = %format, files = files.len(), "Response parsed intact");
            return Some(RecoveryOutcome::Success {
                files: files.clone(),
            });
        }
    }

    let mut candidates = PathSet::new();
    if let Some(plan) = plan {
        candidates.extend(plan.to_create.iter().cloned());
    }
    candidates.extend(discover_paths(format, text, 0));

    let mut files = extracted.unwrap_or_default();
    let mut repaired = Vec::new();
    let mut missing = Vec::new();

    for path in candidates.iter() {
        if files.contains_key(path) {
            continue;
        }
        let boundary = locate(format, text, path, at_end);
        let content = file_content(format, text, &boundary);
        match (boundary.status, content) {
            (FileStatus::Complete, Some(content)) => {
                files.insert(path.clone(), content);
            }
            (FileStatus::Streaming, Some(content)) => {
                match repair_truncated(&content, config.recovery.max_brace_repair) {
                    Some(fixed) => {
                        tracing::info!(path = %path, "Repaired truncated file");
                        files.insert(path.clone(), fixed);
                        repaired.push(path.clone());
                    }
                    None => {
                        tracing::debug!(path = %path, "Truncated file could not be repaired");
                        missing.push(path.clone());
                    }
                }
            }
            _ => missing.push(path.clone()),
        }
    }

    if files.is_empty() {
        return None;
    }

    // Only planned files count as missing; stray discoveries are best-effort
    if let Some(plan) = plan {
        missing.retain(|path| plan.to_create.contains(path));
    }

    if !missing.is_empty() {
        let meta = continuation_meta(plan, &files, &missing, config);
        tracing::info!(
            recovered = files.len(),
            remaining = missing.len(),
            "Response truncated, continuation needed"
        );
        return Some(RecoveryOutcome::Continuation { meta, files });
    }

    if !repaired.is_empty() {
        return Some(RecoveryOutcome::Partial {
            files,
            missing: Vec::new(),
        });
    }

    Some(RecoveryOutcome::Success { files })
}

fn continuation_meta(
    plan: Option<&FilePlan>,
    files: &FileMap,
    missing: &[String],
    config: &Config,
) -> GenerationMeta {
    let recovered: PathSet = files.keys().cloned().collect();
    let per_batch = recovered.len().max(1);
    let total_batches = (1 + missing.len().div_ceil(per_batch)).min(config.continuation.max_batches);

    GenerationMeta {
        total_planned: plan.map_or(files.len() + missing.len(), |p| p.total_count),
        files_this_batch: recovered.clone(),
        completed_files: recovered,
        remaining_files: missing.iter().cloned().collect(),
        batch_index: 0,
        total_batches,
        is_complete: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::encode_response;

    fn sample() -> FileMap {
        let mut files = FileMap::new();
        files.insert("src/a.tsx".to_string(), "export const A = () => null;\n".to_string());
        files.insert("src/b.tsx".to_string(), "export const B = () => null;\n".to_string());
        files
    }

    fn analyze_default(text: &str, format: WireFormat) -> RecoveryOutcome {
        let plan = parse_plan(format, text);
        analyze(
            text,
            format,
            FinishReason::Stop,
            plan.as_ref(),
            &FileMap::new(),
            &Config::default(),
        )
    }

    fn analyze_cut_off(text: &str, format: WireFormat) -> RecoveryOutcome {
        let plan = parse_plan(format, text);
        analyze(
            text,
            format,
            FinishReason::Length,
            plan.as_ref(),
            &FileMap::new(),
            &Config::default(),
        )
    }

    #[test]
    fn test_short_text_is_none() {
        assert_eq!(analyze_default("{\"a\":", WireFormat::Unknown), RecoveryOutcome::None);
    }

    #[test]
    fn test_intact_response_is_success() {
        for format in [WireFormat::ManifestV2, WireFormat::DelimiterMarker] {
            let text = encode_response(format, &sample(), &[]);
            assert_eq!(
                analyze_default(&text, format),
                RecoveryOutcome::Success { files: sample() }
            );
        }
    }

    #[test]
    fn test_scenario_truncated_single_file_is_repaired() {
        let text = r#"{"create":["a.tsx"],"total":1}"a.tsx":"export default function A(){return null}"#;
        let outcome = analyze_default(text, WireFormat::ManifestV2);
        match outcome {
            RecoveryOutcome::Partial { files, missing } => {
                assert_eq!(files["a.tsx"], "export default function A(){return null}\n");
                assert!(missing.is_empty());
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn test_cut_before_second_file_needs_continuation() {
        let full = encode_response(WireFormat::DelimiterMarker, &sample(), &[]);
        let cut = &full[..full.find("<!-- FILE: src/b.tsx").unwrap()];
        match analyze_default(cut, WireFormat::DelimiterMarker) {
            RecoveryOutcome::Continuation { meta, files } => {
                assert_eq!(files.len(), 1);
                assert!(files.contains_key("src/a.tsx"));
                assert_eq!(meta.remaining_files.iter().collect::<Vec<_>>(), vec!["src/b.tsx"]);
                assert_eq!(meta.total_planned, 2);
                assert!(!meta.is_complete);
            }
            other => panic!("expected continuation, got {:?}", other),
        }
    }

    #[test]
    fn test_unrepairable_file_stays_missing() {
        let mut files = sample();
        files.insert(
            "src/c.tsx".to_string(),
            "export function C() {\n  return [[[(((\n".to_string(),
        );
        let full = encode_response(WireFormat::LegacyCommentPlan, &files, &[]);
        let cut = &full[..full.rfind("\\n\"").unwrap()];
        match analyze_default(cut, WireFormat::LegacyCommentPlan) {
            RecoveryOutcome::Continuation { meta, files } => {
                assert_eq!(files.len(), 2);
                assert!(meta.remaining_files.contains("src/c.tsx"));
            }
            other => panic!("expected continuation, got {:?}", other),
        }
    }

    #[test]
    fn test_analysis_is_idempotent() {
        let full = encode_response(WireFormat::ManifestV2, &sample(), &[]);
        let cut = &full[..full.len() - 12];
        let plan = parse_plan(WireFormat::ManifestV2, cut);
        let first = analyze_cut_off(cut, WireFormat::ManifestV2);
        let second = analyze_cut_off(cut, WireFormat::ManifestV2);
        assert_eq!(first, second);
        assert_ne!(first, RecoveryOutcome::None);
    }

    #[test]
    fn test_unknown_format_falls_back_to_emergency() {
        let text = "Here is the component:\n```tsx\nexport default function App() {\n  return <main className=\"app\">Hello there</main>;\n}\n```\n";
        match analyze_default(text, WireFormat::Unknown) {
            RecoveryOutcome::Partial { files, missing } => {
                assert!(files.contains_key("src/App.tsx"));
                assert!(missing.is_empty());
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn test_nothing_recoverable_is_none() {
        let text = "I'm sorry, I can't help with generating that project right now.";
        let mut existing = FileMap::new();
        existing.insert("src/App.tsx".to_string(), "keep me".to_string());
        let outcome = analyze(
            text,
            WireFormat::Unknown,
            FinishReason::Stop,
            None,
            &existing,
            &Config::default(),
        );
        assert_eq!(outcome, RecoveryOutcome::None);
    }

    #[test]
    fn test_late_detection_of_short_stream() {
        let text = "// src/x.ts\nexport const x = 1;\n";
        match analyze_default(text, WireFormat::Unknown) {
            RecoveryOutcome::Success { files } => {
                assert_eq!(files["src/x.ts"], "export const x = 1;");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_length_cutoff_repairs_last_section() {
        let text = "// src/a.ts\nexport const a = 1;\n// src/b.ts\nexport function b() {\n  return compute(1, 2) + ano";
        match analyze_cut_off(text, WireFormat::BareComment) {
            RecoveryOutcome::Partial { files, missing } => {
                assert_eq!(files["src/a.ts"], "export const a = 1;");
                assert_eq!(files["src/b.ts"], "export function b() {\n  return compute(1, 2) + ano\n}\n");
                assert!(missing.is_empty());
            }
            other => panic!("expected partial, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_length_cutoff_unrepairable_needs_continuation() {
        let text = "// src/a.ts\nexport const a = 1;\n// src/b.ts\nexport const b = `never closed";
        match analyze_cut_off(text, WireFormat::BareComment) {
            RecoveryOutcome::Continuation { meta, files } => {
                assert_eq!(files.keys().collect::<Vec<_>>(), vec!["src/a.ts"]);
                assert_eq!(meta.remaining_files.iter().collect::<Vec<_>>(), vec!["src/b.ts"]);
            }
            other => panic!("expected continuation, got {:?}", other),
        }
    }

    #[test]
    fn test_bare_normal_end_accepts_last_section() {
        let text = "// src/a.ts\nexport const a = 1;\n// src/b.ts\nexport const b = 2;\n";
        match analyze_default(text, WireFormat::BareComment) {
            RecoveryOutcome::Success { files } => {
                assert_eq!(files["src/b.ts"], "export const b = 2;");
            }
            other => panic!("expected success, got {:?}", other),
        }
    }
}
