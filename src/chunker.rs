//! Text chunking for ingestion.
//!
//! `RecursiveSplitter` slices a source document into overlapping windows of
//! at most `chunk_size` characters, preferring to break at the strongest
//! nearby boundary: paragraph break, then line break, then sentence
//! terminator, then word boundary, then a hard cut. Each produced piece
//! carries its byte range into the original text.

use std::ops::Range;

/// Splitting capability consumed by the KB builder. Implementations must be
/// deterministic for identical inputs.
pub trait Splitter: Send + Sync {
    fn split(&self, text: &str, size: usize, overlap: usize) -> Vec<SplitPiece>;
}

/// One chunk of source text plus its byte offsets in the origin document.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitPiece {
    pub content: String,
    pub range: Range<usize>,
}

/// Sentence terminators recognized as break points. CJK terminators are
/// boundaries on their own; Latin ones only when trailed by whitespace so
/// decimals like "3.14" survive.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？'];

#[derive(Debug, Clone, Copy, Default)]
pub struct RecursiveSplitter;

impl Splitter for RecursiveSplitter {
    fn split(&self, text: &str, size: usize, overlap: usize) -> Vec<SplitPiece> {
        split_recursive(text, size, overlap)
    }
}

fn split_recursive(text: &str, size: usize, overlap: usize) -> Vec<SplitPiece> {
    if text.is_empty() || size == 0 {
        return vec![];
    }

    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let total = chars.len();
    let byte_at = |char_pos: usize| -> usize {
        if char_pos >= total {
            text.len()
        } else {
            chars[char_pos].0
        }
    };

    let mut pieces = Vec::new();
    let mut pos = 0usize;

    while pos < total {
        let window_end = (pos + size).min(total);
        let cut = if window_end == total {
            total
        } else {
            find_break(&chars, pos, window_end)
        };

        let start_byte = byte_at(pos);
        let end_byte = byte_at(cut);
        let content = &text[start_byte..end_byte];
        if !content.chars().all(char::is_whitespace) {
            pieces.push(SplitPiece {
                content: content.to_string(),
                range: start_byte..end_byte,
            });
        }

        if cut == total {
            break;
        }

        // Back up for the overlap, but always make forward progress.
        let mut next = cut.saturating_sub(overlap);
        if next <= pos {
            next = cut;
        }
        pos = next;
    }

    pieces
}

/// Pick the cut position in `(pos, window_end]`, breaking after the last
/// occurrence of the highest-priority boundary found in the window.
fn find_break(chars: &[(usize, char)], pos: usize, window_end: usize) -> usize {
    // 0 = paragraph, 1 = line, 2 = sentence, 3 = word
    let mut best: [Option<usize>; 4] = [None; 4];

    for i in pos..window_end {
        let c = chars[i].1;
        if c == '\n' {
            if i > pos && chars[i - 1].1 == '\n' {
                best[0] = Some(i + 1);
            }
            best[1] = Some(i + 1);
        } else if SENTENCE_TERMINATORS.contains(&c) {
            let cjk = !c.is_ascii();
            let trailed = chars
                .get(i + 1)
                .map(|(_, next)| next.is_whitespace())
                .unwrap_or(true);
            if cjk || trailed {
                best[2] = Some(i + 1);
            }
        } else if c.is_whitespace() {
            best[3] = Some(i + 1);
        }
    }

    best.iter()
        .flatten()
        .next()
        .copied()
        .unwrap_or(window_end)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str, size: usize, overlap: usize) -> Vec<SplitPiece> {
        RecursiveSplitter.split(text, size, overlap)
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        assert!(split("", 100, 20).is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let pieces = split("hello world", 100, 20);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].content, "hello world");
        assert_eq!(pieces[0].range, 0..11);
    }

    #[test]
    fn test_ranges_map_back_to_source() {
        let text = "The quick brown fox jumps over the lazy dog. \
                    Pack my box with five dozen liquor jugs. \
                    How vexingly quick daft zebras jump.";
        for piece in split(text, 40, 10) {
            assert_eq!(&text[piece.range.clone()], piece.content);
        }
    }

    #[test]
    fn test_paragraph_break_preferred_over_word() {
        let text = "first paragraph here\n\nsecond paragraph follows with more words";
        let pieces = split(text, 40, 0);
        // Window covers the paragraph break, so the first cut lands there
        // even though later word boundaries fit the window too.
        assert_eq!(pieces[0].content, "first paragraph here\n\n");
    }

    #[test]
    fn test_sentence_break_without_newlines() {
        let text = "One sentence ends here. Another one keeps going for a while";
        let pieces = split(text, 30, 0);
        assert_eq!(pieces[0].content, "One sentence ends here.");
    }

    #[test]
    fn test_decimal_point_is_not_a_sentence_break() {
        let text = "pi is 3.14159 and that is well known around the world";
        let pieces = split(text, 12, 0);
        // Every cut is a word boundary; "3.14159" stays intact in one piece.
        assert!(pieces.iter().any(|p| p.content.contains("3.14159")));
    }

    #[test]
    fn test_overlap_repeats_tail_of_previous_chunk() {
        let text = "aaaa bbbb cccc dddd eeee ffff gggg hhhh iiii jjjj";
        let pieces = split(text, 20, 8);
        assert!(pieces.len() >= 2);
        // The second window starts inside the first one's byte range.
        assert!(pieces[1].range.start < pieces[0].range.end);
        assert_eq!(pieces[0].range.end - pieces[1].range.start, 8);
    }

    #[test]
    fn test_hard_cut_on_unbroken_text() {
        let text = "x".repeat(250);
        let pieces = split(&text, 100, 0);
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].content.len(), 100);
        assert_eq!(pieces[2].content.len(), 50);
    }

    #[test]
    fn test_multibyte_text_splits_on_char_boundaries() {
        let text = "这是第一句话。这是第二句话。这是第三句话，比较长一点。";
        let pieces = split(text, 10, 2);
        assert!(!pieces.is_empty());
        for piece in &pieces {
            assert_eq!(&text[piece.range.clone()], piece.content);
        }
        // CJK sentence terminator acts as a boundary.
        assert!(pieces[0].content.ends_with('。'));
    }

    #[test]
    fn test_deterministic() {
        let text = "Some repeated input text. With sentences! And\nnewlines\n\ntoo.";
        assert_eq!(split(text, 25, 5), split(text, 25, 5));
    }

    #[test]
    fn test_whitespace_only_input_dropped() {
        assert!(split("   \n\n   \t ", 100, 10).is_empty());
    }
}
