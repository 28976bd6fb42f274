//! Boundary scanning for `<!-- FILE: path -->` blocks.

use super::{skip_newline, trim_one_newline, Boundary};
use crate::types::FileStatus;
use crate::wire::file_markers;

pub(super) fn scan(text: &str, path: &str) -> Boundary {
    let Some(open) = file_markers(text, 0).find(|m| !m.closing && m.path == Some(path)) else {
        return Boundary::pending();
    };
    let start = skip_newline(text, open.end);

    // A close marker ends the block; so does the next file's open marker
    // when the model forgot to close this one.
    match file_markers(text, start).find(|m| m.closing || m.path != Some(path)) {
        Some(next) => {
            let end = trim_one_newline(text, start, next.start);
            Boundary::spanning(text, FileStatus::Complete, start, end)
        }
        None => Boundary::spanning(text, FileStatus::Streaming, start, text.len()),
    }
}

/// Drop a marker that has started arriving at the end of streaming content.
pub(super) fn trim_partial_marker(raw: &str) -> &str {
    match raw.rfind("<!--") {
        Some(at) if !raw[at..].contains("-->") => raw[..at].trim_end_matches(['\r', '\n']),
        _ => match raw.rfind('<') {
            Some(at) if "<!--".starts_with(&raw[at..]) => &raw[..at],
            _ => raw,
        },
    }
}
