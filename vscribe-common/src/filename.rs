//! Filename sanitization for user-visible downloads
//!
//! Derived names (video titles in Content-Disposition, artifact file stems)
//! must be safe on every platform. Invalid and control characters become
//! underscores, Windows-hostile leading/trailing dots and spaces are
//! trimmed, and the result is bounded to 150 bytes of UTF-8. Unicode text
//! (Chinese, Japanese, Korean titles) passes through untouched.

/// Characters that are invalid in filenames on at least one platform
const INVALID_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum byte length of a sanitized name (UTF-8)
const MAX_BYTES: usize = 150;

/// Fallback when sanitization leaves nothing usable
const FALLBACK: &str = "untitled";

/// Sanitize a string for use as a filename.
///
/// The function is idempotent: applying it twice yields the same output as
/// applying it once.
pub fn sanitize_filename(input: &str) -> String {
    let mut result = String::with_capacity(input.len().min(MAX_BYTES));

    for c in input.chars() {
        if c.is_control() || INVALID_CHARS.contains(&c) {
            result.push('_');
        } else {
            result.push(c);
        }
    }

    // Leading/trailing whitespace and dots are hostile on Windows and
    // invisible everywhere else.
    let trimmed = result.trim().trim_matches('.').trim();

    let bounded = truncate_to_boundary(trimmed, MAX_BYTES);

    // Truncation may expose trailing whitespace or dots again.
    let bounded = bounded.trim().trim_matches('.').trim();

    if bounded.is_empty() {
        FALLBACK.to_string()
    } else {
        bounded.to_string()
    }
}

/// Truncate to at most `max_bytes` bytes without splitting a UTF-8 sequence.
fn truncate_to_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_invalid_characters() {
        assert_eq!(sanitize_filename("hello?world"), "hello_world");
        assert_eq!(sanitize_filename("a:b/c\\d"), "a_b_c_d");
        assert_eq!(sanitize_filename("tag<x>|y*"), "tag_x__y_");
    }

    #[test]
    fn strips_control_characters() {
        assert_eq!(sanitize_filename("line\nbreak"), "line_break");
        assert_eq!(sanitize_filename("bell\x07"), "bell_");
    }

    #[test]
    fn trims_whitespace_and_dots() {
        assert_eq!(sanitize_filename("  spaced out  "), "spaced out");
        assert_eq!(sanitize_filename("...dotted..."), "dotted");
        assert_eq!(sanitize_filename(" . mixed . "), "mixed");
    }

    #[test]
    fn empty_and_degenerate_inputs_fall_back() {
        assert_eq!(sanitize_filename(""), "untitled");
        assert_eq!(sanitize_filename("   "), "untitled");
        assert_eq!(sanitize_filename("..."), "untitled");
    }

    #[test]
    fn unicode_titles_survive() {
        assert_eq!(sanitize_filename("视频标题测试"), "视频标题测试");
        assert_eq!(sanitize_filename("日本語のタイトル"), "日本語のタイトル");
        assert_eq!(sanitize_filename("한국어 제목"), "한국어 제목");
    }

    #[test]
    fn truncates_to_byte_bound_on_char_boundary() {
        // 60 CJK characters = 180 bytes; must cut at a character boundary
        let long: String = "标".repeat(60);
        let out = sanitize_filename(&long);
        assert!(out.len() <= 150);
        assert!(out.chars().all(|c| c == '标'));
        assert_eq!(out.chars().count(), 50); // 150 / 3 bytes each

        let ascii: String = "a".repeat(400);
        assert_eq!(sanitize_filename(&ascii).len(), 150);
    }

    #[test]
    fn idempotent() {
        let inputs = [
            "hello?world",
            "  spaced  ",
            "视频/标题",
            "...dots...",
            "",
            "CON",
            &"标".repeat(80),
        ];
        for input in inputs {
            let once = sanitize_filename(input);
            let twice = sanitize_filename(&once);
            assert_eq!(once, twice, "not idempotent for {:?}", input);
        }
    }
}
