//! Text chunking and token estimation.
//!
//! Windows of up to `chunk_size` chars slide over the whitespace-
//! normalised text; a window that would split mid-word is pulled back to
//! the last space in its final 40%, and consecutive windows overlap by
//! `overlap` chars.

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_OVERLAP: usize = 150;

/// Split `text` into overlapping chunks. Chunks are trimmed and never
/// empty; each is at most `chunk_size` chars.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let normalised: Vec<char> = normalise_whitespace(text).chars().collect();
    if normalised.is_empty() {
        return Vec::new();
    }
    if normalised.len() <= chunk_size {
        return vec![normalised.into_iter().collect()];
    }

    let boundary_floor = (chunk_size as f64 * 0.6).floor() as usize;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < normalised.len() {
        let mut end = (start + chunk_size).min(normalised.len());

        // Prefer to break on a space, but only within the last 40% of the
        // window; otherwise keep the hard cut.
        if end < normalised.len() {
            let min_break = start + boundary_floor;
            if let Some(space_at) = (min_break..end).rev().find(|&i| normalised[i] == ' ') {
                end = space_at;
            }
        }

        let piece: String = normalised[start..end].iter().collect();
        let piece = piece.trim().to_owned();
        if !piece.is_empty() {
            chunks.push(piece);
        }

        if end >= normalised.len() {
            break;
        }
        start = end.saturating_sub(overlap);
    }
    chunks
}

/// Collapse all whitespace runs to single spaces and trim.
pub fn normalise_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rough token count: `max(1, ceil(words × 1.3))`.
pub fn estimate_tokens(text: &str) -> i64 {
    let words = text.split_whitespace().count();
    ((words as f64 * 1.3).ceil() as i64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("hello   world\n\nagain", 1_000, 150);
        assert_eq!(chunks, vec!["hello world again"]);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk_text("", 1_000, 150).is_empty());
        assert!(chunk_text("   \n\t ", 1_000, 150).is_empty());
    }

    #[test]
    fn long_text_splits_on_spaces_within_the_tail_window() {
        let text = "alpha beta gamma delta ".repeat(200);
        let chunks = chunk_text(&text, 1_000, 150);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1_000);
            assert!(!chunk.is_empty());
            // Word-boundary rule: a space exists in the last 40% of every
            // full window, so no chunk ends mid-word.
            assert!(!chunk.ends_with("alph"));
            assert!(chunk.ends_with("alpha") || chunk.ends_with("beta")
                || chunk.ends_with("gamma") || chunk.ends_with("delta"));
        }
    }

    #[test]
    fn unbroken_text_takes_hard_cuts() {
        let text = "x".repeat(2_500);
        let chunks = chunk_text(&text, 1_000, 150);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0].chars().count(), 1_000);
    }

    #[test]
    fn chunks_overlap_and_cover_the_text() {
        let text = "word ".repeat(600);
        let chunks = chunk_text(&text, 1_000, 150);
        let normalised = normalise_whitespace(&text);
        // Every chunk is a substring of the normalised input.
        for chunk in &chunks {
            assert!(normalised.contains(chunk.as_str()));
        }
        // The last chunk reaches the end of the text.
        assert!(normalised.ends_with(chunks.last().unwrap().as_str()));
    }

    #[test]
    fn token_estimate_rounds_up_with_a_floor_of_one() {
        assert_eq!(estimate_tokens(""), 1);
        assert_eq!(estimate_tokens("one"), 2); // ceil(1.3)
        assert_eq!(estimate_tokens("one two three"), 4); // ceil(3.9)
        assert_eq!(estimate_tokens("a b c d e f g h i j"), 13); // ceil(13.0)
    }
}
