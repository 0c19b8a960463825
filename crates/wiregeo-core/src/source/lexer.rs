//! Offset-preserving helpers over Java source text.
//!
//! Decompiled sources are scanned with a *masked* copy of the text in which
//! comments and the contents of string and character literals are blanked out
//! byte-for-byte. Structure (braces, parentheses, semicolons) is located in the
//! masked copy; the same byte ranges are then sliced from the original text.

/// Replaces comments and literal contents with ASCII spaces.
///
/// Newlines are preserved, as are the quote characters delimiting string and
/// character literals. The output has exactly the same byte length as the input,
/// so any range found in it is valid for the original text.
pub fn mask(source: &str) -> String {
    #[derive(Clone, Copy, PartialEq)]
    enum State {
        Code,
        LineComment,
        BlockComment,
        Str,
        TextBlock,
        Char,
    }

    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut state = State::Code;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            State::Code => match (b, next) {
                (b'/', Some(b'/')) => {
                    state = State::LineComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                (b'/', Some(b'*')) => {
                    state = State::BlockComment;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                (b'"', _) if bytes[i..].starts_with(b"\"\"\"") => {
                    state = State::TextBlock;
                    out.extend_from_slice(b"\"\"\"");
                    i += 3;
                    continue;
                }
                (b'"', _) => {
                    state = State::Str;
                    out.push(b'"');
                }
                (b'\'', _) => {
                    state = State::Char;
                    out.push(b'\'');
                }
                _ => out.push(b),
            },
            State::LineComment => {
                if b == b'\n' {
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = State::Code;
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
            State::Str | State::Char => {
                let quote = if state == State::Str { b'"' } else { b'\'' };
                if b == b'\\' && next.is_some() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                if b == quote {
                    state = State::Code;
                    out.push(quote);
                } else if b == b'\n' {
                    // Unterminated literal; recover at end of line.
                    state = State::Code;
                    out.push(b'\n');
                } else {
                    out.push(b' ');
                }
            }
            State::TextBlock => {
                if bytes[i..].starts_with(b"\"\"\"") {
                    state = State::Code;
                    out.extend_from_slice(b"\"\"\"");
                    i += 3;
                    continue;
                }
                if b == b'\\' && next.is_some() {
                    out.extend_from_slice(b"  ");
                    i += 2;
                    continue;
                }
                out.push(if b == b'\n' { b'\n' } else { b' ' });
            }
        }
        i += 1;
    }

    // Only ASCII bytes were written in place of any multi-byte sequence.
    String::from_utf8(out).unwrap_or_default()
}

/// Finds the index of the delimiter closing the one at `open_idx`.
///
/// `masked` must be masked text; nesting of the same delimiter pair is honoured.
pub fn find_matching(masked: &str, open_idx: usize, open: u8, close: u8) -> Option<usize> {
    let bytes = masked.as_bytes();
    if bytes.get(open_idx) != Some(&open) {
        return None;
    }
    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        if b == open {
            depth += 1;
        } else if b == close {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Returns true if every brace, parenthesis and bracket is balanced.
pub fn is_balanced(masked: &str) -> bool {
    let mut stack = Vec::new();
    for b in masked.bytes() {
        match b {
            b'{' | b'(' | b'[' => stack.push(b),
            b'}' | b')' | b']' => {
                let expected = match b {
                    b'}' => b'{',
                    b')' => b'(',
                    _ => b'[',
                };
                if stack.pop() != Some(expected) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty()
}

/// Splits `masked[range]` on `sep` at nesting depth zero and returns the byte
/// ranges of each trimmed, non-empty piece.
///
/// When `generics` is set, `<`/`>` also count as nesting, which is right for
/// parameter lists and wrong for arbitrary expressions.
pub fn split_top_level(
    masked: &str,
    range: std::ops::Range<usize>,
    sep: u8,
    generics: bool,
) -> Vec<std::ops::Range<usize>> {
    let bytes = masked.as_bytes();
    let mut pieces = Vec::new();
    let mut depth = 0i32;
    let mut start = range.start;

    for i in range.clone() {
        let b = bytes[i];
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'<' if generics => depth += 1,
            b'>' if generics => depth -= 1,
            _ if b == sep && depth == 0 => {
                push_trimmed(masked, start..i, &mut pieces);
                start = i + 1;
            }
            _ => {}
        }
    }
    push_trimmed(masked, start..range.end, &mut pieces);
    pieces
}

fn push_trimmed(
    masked: &str,
    range: std::ops::Range<usize>,
    pieces: &mut Vec<std::ops::Range<usize>>,
) {
    let trimmed = trim_range(masked, range);
    if !trimmed.is_empty() {
        pieces.push(trimmed);
    }
}

/// Narrows `range` to exclude leading and trailing ASCII whitespace.
pub fn trim_range(text: &str, range: std::ops::Range<usize>) -> std::ops::Range<usize> {
    let bytes = text.as_bytes();
    let mut start = range.start;
    let mut end = range.end;
    while start < end && bytes[start].is_ascii_whitespace() {
        start += 1;
    }
    while end > start && bytes[end - 1].is_ascii_whitespace() {
        end -= 1;
    }
    start..end
}

/// Collapses every run of whitespace into a single space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Returns true for bytes that may appear in a Java identifier.
pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_preserves_length_and_structure() {
        let src = "int a = 1; // { not code }\nString s = \"}{;\"; /* ( */ char c = '{';";
        let masked = mask(src);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("not code"));
        assert!(masked.contains("String s = \"   \";"));
        assert!(masked.contains("char c = ' ';"));
        assert!(is_balanced(&masked));
    }

    #[test]
    fn test_mask_multibyte_literal() {
        let src = "String s = \"héllo\"; int x;";
        let masked = mask(src);
        assert_eq!(masked.len(), src.len());
        assert!(masked.ends_with("int x;"));
    }

    #[test]
    fn test_mask_escaped_quote() {
        let src = r#"String s = "a\"b"; int y;"#;
        let masked = mask(src);
        assert!(masked.ends_with("int y;"));
        assert!(is_balanced(&masked));
    }

    #[test]
    fn test_find_matching() {
        let text = "f(a, g(b), c) { { } }";
        assert_eq!(find_matching(text, 1, b'(', b')'), Some(12));
        assert_eq!(find_matching(text, 14, b'{', b'}'), Some(20));
        assert_eq!(find_matching(text, 0, b'(', b')'), None);
    }

    #[test]
    fn test_split_top_level_generics() {
        let text = "Map<String, Integer> m, @Nullable int[] xs";
        let parts: Vec<&str> = split_top_level(text, 0..text.len(), b',', true)
            .into_iter()
            .map(|r| &text[r])
            .collect();
        assert_eq!(parts, vec!["Map<String, Integer> m", "@Nullable int[] xs"]);
    }

    #[test]
    fn test_is_balanced_detects_mismatch() {
        assert!(!is_balanced("class A { void f() { }"));
        assert!(!is_balanced("(]"));
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("Map<String,\n   Integer>"), "Map<String, Integer>");
    }
}
