//! Overlapping-window chunking for long inputs
//!
//! Vendor context limits cap how much transcript fits into one request.
//! Inputs are split into character windows that overlap, each window is
//! processed independently, and the outputs are stitched by eliding the
//! duplicated overlap where it can be found again.

/// Target window size in characters
pub const WINDOW_CHARS: usize = 4_000;

/// Overlap carried between adjacent windows
pub const OVERLAP_CHARS: usize = 200;

/// Split `text` into windows of at most `window` characters, each starting
/// `window - overlap` characters after the previous one. Counts are in
/// characters, never bytes, so multi-byte text is never split mid-character.
pub fn split_windows(text: &str, window: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= window || window == 0 {
        return vec![text.to_string()];
    }

    let step = window.saturating_sub(overlap).max(1);
    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + window).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces
}

/// Stitch processed windows back together.
///
/// Each adjacent pair is merged by finding the longest suffix of the left
/// piece that is also a prefix of the right piece (the processed overlap) and
/// keeping it once. When processing changed the overlap beyond recognition,
/// the pieces are joined with a paragraph break instead; nothing is dropped.
pub fn stitch_pieces(pieces: &[String]) -> String {
    let mut iter = pieces.iter();
    let Some(first) = iter.next() else {
        return String::new();
    };

    let mut out = first.clone();
    for piece in iter {
        let elided = longest_overlap(&out, piece, OVERLAP_CHARS * 2);
        if elided > 0 {
            let tail: String = piece.chars().skip(elided).collect();
            out.push_str(&tail);
        } else {
            if !out.ends_with('\n') {
                out.push_str("\n\n");
            }
            out.push_str(piece);
        }
    }
    out
}

/// Length in characters of the longest suffix of `left` that is a prefix of
/// `right`, probing up to `max_probe` characters.
fn longest_overlap(left: &str, right: &str, max_probe: usize) -> usize {
    let left_chars: Vec<char> = left.chars().collect();
    let right_chars: Vec<char> = right.chars().collect();
    let probe = max_probe.min(left_chars.len()).min(right_chars.len());

    for len in (1..=probe).rev() {
        if left_chars[left_chars.len() - len..] == right_chars[..len] {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_input_is_one_window() {
        let pieces = split_windows("short text", WINDOW_CHARS, OVERLAP_CHARS);
        assert_eq!(pieces, vec!["short text".to_string()]);
    }

    #[test]
    fn windows_overlap_by_the_configured_amount() {
        let text: String = ('a'..='z').cycle().take(10_000).collect();
        let pieces = split_windows(&text, 4_000, 200);

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].chars().count(), 4_000);
        // Second window starts 3800 characters in: its first 200 characters
        // equal the last 200 of the first window.
        let tail: String = pieces[0].chars().skip(3_800).collect();
        let head: String = pieces[1].chars().take(200).collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn windows_cover_every_character() {
        let text: String = "汉".repeat(9_000);
        let pieces = split_windows(&text, 4_000, 200);
        let covered: usize = {
            // step = 3800; windows at 0, 3800, 7600 → last ends at 9000
            let last_start = 3_800 * (pieces.len() - 1);
            last_start + pieces.last().unwrap().chars().count()
        };
        assert_eq!(covered, 9_000);
    }

    #[test]
    fn stitch_elides_reproduced_overlap() {
        let a = "one two three four".to_string();
        let b = "three four five six".to_string();
        let stitched = stitch_pieces(&[a, b]);
        assert_eq!(stitched, "one two three four five six");
    }

    #[test]
    fn stitch_falls_back_to_paragraph_break() {
        let a = "completely rewritten opening".to_string();
        let b = "unrelated continuation".to_string();
        let stitched = stitch_pieces(&[a, b]);
        assert_eq!(stitched, "completely rewritten opening\n\nunrelated continuation");
    }

    #[test]
    fn stitch_handles_empty_and_single() {
        assert_eq!(stitch_pieces(&[]), "");
        assert_eq!(stitch_pieces(&["only".to_string()]), "only");
    }

    #[test]
    fn split_and_stitch_round_trips_identity_processing() {
        // Non-repeating content so the only detectable overlap is the real one.
        let text: String = (0..2_500).map(|i| format!("w{} ", i)).collect();
        assert!(text.chars().count() > 8_000);
        let pieces = split_windows(&text, 4_000, 200);
        assert!(pieces.len() > 1);
        // "Processing" that returns each window unchanged must reassemble the
        // exact input.
        assert_eq!(stitch_pieces(&pieces), text);
    }
}
