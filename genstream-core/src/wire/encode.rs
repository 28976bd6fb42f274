//! Rendering a file set in a given wire format.
//!
//! Used to build fixtures and to show the model, in a continuation prompt,
//! the exact shape it must keep answering in. Every format here is read back
//! byte-for-byte by [`crate::extract::extract_files`].

use super::{MARKER_PLAN_CLOSE, MARKER_PLAN_OPEN, PLAN_COMMENT};
use crate::types::{FileMap, WireFormat};
use serde_json::{Map, Value};

fn manifest_value(files: &FileMap, delete: &[String]) -> Value {
    let create: Vec<Value> = files.keys().cloned().map(Value::String).collect();
    let lines: Map<String, Value> = files
        .iter()
        .map(|(path, content)| (path.clone(), Value::from(content.lines().count())))
        .collect();

    let mut manifest = Map::new();
    manifest.insert("create".to_string(), Value::Array(create));
    manifest.insert("update".to_string(), Value::Array(vec![]));
    manifest.insert(
        "delete".to_string(),
        Value::Array(delete.iter().cloned().map(Value::String).collect()),
    );
    manifest.insert("total".to_string(), Value::from(files.len() + delete.len()));
    manifest.insert("lines".to_string(), Value::Object(lines));
    Value::Object(manifest)
}

fn files_value(files: &FileMap) -> Value {
    Value::Object(
        files
            .iter()
            .map(|(path, content)| (path.clone(), Value::String(content.clone())))
            .collect(),
    )
}

/// Encode `files` (plus paths to delete) as a complete response.
///
/// [`WireFormat::Unknown`] renders as [`WireFormat::ManifestV2`]. The bare
/// comment format has no manifest, so `delete` is dropped there.
pub fn encode_response(format: WireFormat, files: &FileMap, delete: &[String]) -> String {
    match format {
        WireFormat::ManifestV2 | WireFormat::Unknown => format!(
            "{{\"manifest\":{},\"files\":{}}}",
            manifest_value(files, delete),
            files_value(files)
        ),
        WireFormat::LegacyCommentPlan => format!(
            "{} {}\n{:#}\n",
            PLAN_COMMENT,
            manifest_value(files, delete),
            files_value(files)
        ),
        WireFormat::DelimiterMarker => {
            let mut out = format!(
                "{}\n{}\n{}\n",
                MARKER_PLAN_OPEN,
                manifest_value(files, delete),
                MARKER_PLAN_CLOSE
            );
            for (path, content) in files {
                out.push_str(&format!(
                    "<!-- FILE: {path} -->\n{content}\n<!-- /FILE: {path} -->\n"
                ));
            }
            out
        }
        WireFormat::BareComment => {
            let mut out = String::new();
            for (path, content) in files {
                out.push_str(&format!("// {path}\n{content}\n"));
            }
            out
        }
    }
}
