//! Light repair of a file whose content was cut off mid-stream.

/// Try to turn truncated source text into something that balances.
///
/// Drops trailing whitespace and one dangling comma, then appends closers
/// for up to `max_closers` still-open `{`, `[` or `(`. Returns `None` when
/// the text ends inside a string literal, has a mismatched closer, needs
/// more closers than allowed, or is empty.
pub fn repair_truncated(content: &str, max_closers: usize) -> Option<String> {
    let trimmed = content.trim_end();
    let trimmed = trimmed.strip_suffix(',').unwrap_or(trimmed).trim_end();
    if trimmed.is_empty() {
        return None;
    }

    let open = open_delimiters(trimmed)?;
    if open.len() > max_closers {
        tracing::debug!(open = open.len(), max_closers, "Too many open delimiters to repair");
        return None;
    }

    let mut repaired = trimmed.to_string();
    for opener in open.iter().rev() {
        repaired.push('\n');
        repaired.push(closer_for(*opener));
    }
    repaired.push('\n');
    Some(repaired)
}

fn closer_for(opener: char) -> char {
    match opener {
        '{' => '}',
        '[' => ']',
        _ => ')',
    }
}

/// Stack of unclosed openers, or `None` if the text cannot be balanced by
/// appending.
fn open_delimiters(text: &str) -> Option<Vec<char>> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            } else if c == '\n' && q != '`' {
                // unterminated single-line literal; treat as closed
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '/' if chars.peek() == Some(&'/') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '{' | '[' | '(' => stack.push(c),
            '}' | ']' | ')' => {
                let opener = stack.pop()?;
                if closer_for(opener) != c {
                    return None;
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return None;
    }
    Some(stack)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balanced_content_is_accepted() {
        assert_eq!(
            repair_truncated("export default function A(){return null}", 3).as_deref(),
            Some("export default function A(){return null}\n")
        );
    }

    #[test]
    fn test_closes_open_blocks() {
        let cut = "export function f() {\n  const xs = [1, 2,";
        assert_eq!(
            repair_truncated(cut, 3).as_deref(),
            Some("export function f() {\n  const xs = [1, 2\n]\n}\n")
        );
    }

    #[test]
    fn test_repair_is_bounded() {
        let cut = "a({ b: [ c({";
        assert_eq!(repair_truncated(cut, 3), None);
        assert!(repair_truncated(cut, 5).is_some());
    }

    #[test]
    fn test_braces_inside_strings_and_comments_ignored() {
        let text = "const s = \"{[(\"; // {{{\nconst t = '}';\n";
        assert_eq!(open_delimiters(text), Some(vec![]));
    }

    #[test]
    fn test_unrepairable() {
        assert_eq!(repair_truncated("const s = `open template", 3), None);
        assert_eq!(repair_truncated("a(]", 3), None);
        assert_eq!(repair_truncated("  ,  ", 3), None);
    }
}
