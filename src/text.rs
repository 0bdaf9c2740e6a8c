//! UTF-8 safe text helpers shared by the conversation and speech layers.
//!
//! Service replies and captions are bounded in **bytes**, not characters, so
//! every truncation here cuts at the last code-point boundary that fits.

/// Truncate `s` to at most `max_bytes` bytes without splitting a code point.
///
/// ```rust
/// use tap_talk::text::clamp_utf8_bytes;
///
/// assert_eq!(clamp_utf8_bytes("hello", 3), "hel");
/// // "é" is two bytes; a 2-byte budget keeps "h" only.
/// assert_eq!(clamp_utf8_bytes("hé", 2), "h");
/// ```
pub fn clamp_utf8_bytes(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Collapse newlines, tabs and control characters into single spaces.
pub fn sanitize_one_line(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_space = false;
    for c in s.chars() {
        if c.is_control() || c.is_whitespace() {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
    }
    out.trim_end().to_string()
}

/// Short head of `s` for overlays and logs; appends `…` when truncated.
pub fn head(s: &str, max_bytes: usize) -> String {
    let clamped = clamp_utf8_bytes(s, max_bytes);
    if clamped.len() < s.len() {
        format!("{clamped}…")
    } else {
        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_short_text() {
        assert_eq!(clamp_utf8_bytes("abc", 10), "abc");
    }

    #[test]
    fn clamp_never_splits_multibyte() {
        // Each kana is three bytes.
        let s = "こんにちは";
        assert_eq!(clamp_utf8_bytes(s, 4), "こ");
        assert_eq!(clamp_utf8_bytes(s, 6), "こん");
        assert_eq!(clamp_utf8_bytes(s, 2), "");
    }

    #[test]
    fn clamp_is_deterministic_at_exact_boundary() {
        assert_eq!(clamp_utf8_bytes("abcdef", 6), "abcdef");
        assert_eq!(clamp_utf8_bytes("abcdef", 5), "abcde");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_one_line("a\n\n b\tc\r\n"), "a b c");
    }

    #[test]
    fn head_marks_truncation() {
        assert_eq!(head("abcdef", 3), "abc…");
        assert_eq!(head("ab", 3), "ab");
    }
}
