//! Boundary scanning for `// path` header sections.

use super::{trim_one_newline, Boundary};
use crate::types::FileStatus;
use crate::wire::header_regex;

/// A section ends where the next header begins. The final section can only
/// be known complete once the stream has ended.
pub(super) fn scan(text: &str, path: &str, at_end: bool) -> Boundary {
    let Some(header) = header_regex()
        .captures_iter(text)
        .find(|caps| &caps[1] == path)
        .and_then(|caps| caps.get(0))
    else {
        return Boundary::pending();
    };
    let start = header.end();

    match header_regex().find_at(text, start) {
        Some(next) => {
            let end = trim_one_newline(text, start, next.start());
            Boundary::spanning(text, FileStatus::Complete, start, end)
        }
        None if at_end => {
            let end = trim_one_newline(text, start, text.len());
            Boundary::spanning(text, FileStatus::Complete, start, end)
        }
        None => Boundary::spanning(text, FileStatus::Streaming, start, text.len()),
    }
}
