// Text segmentation for providers with input-size ceilings
//
// Splitting policy, in priority order: paragraph boundaries, sentence-ending
// punctuation (including the Devanagari danda and double danda), then word
// boundaries. A run with no boundary at all is force-split at the length
// limit and flagged, never rejected.

use tracing::warn;

/// Sentence-terminal characters recognized by the splitter. The danda (U+0964)
/// and double danda (U+0965) terminate verses in the source corpus.
const TERMINATORS: [char; 5] = ['.', '!', '?', '।', '॥'];

/// One bounded-length chunk of the source text.
///
/// Segments are exact, contiguous substrings: joining them in order
/// reconstructs the input byte for byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSegment {
    pub text: String,
    /// True when the segment was cut at the raw length limit because no
    /// paragraph, sentence, or word boundary fit inside the window.
    pub forced: bool,
}

/// Split `text` into ordered segments of at most `max_len` characters.
///
/// Deterministic: the same input and limit always produce the same output.
/// Text that already fits yields exactly one segment equal to the input.
/// Lengths are counted in characters, and cuts always land on character
/// boundaries, so multi-byte scripts are never torn mid-codepoint.
pub fn segment(text: &str, max_len: usize) -> Vec<TextSegment> {
    assert!(max_len > 0, "max_len must be > 0");

    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    if n <= max_len {
        return vec![TextSegment {
            text: text.to_string(),
            forced: false,
        }];
    }

    // Byte offset of every character boundary, so segments can be sliced
    // out of the original text instead of re-collected.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());

    let mut segments = Vec::new();
    let mut start = 0usize;

    while start < n {
        let window_end = start + max_len;
        if window_end >= n {
            segments.push(TextSegment {
                text: text[bounds[start]..bounds[n]].to_string(),
                forced: false,
            });
            break;
        }

        let (cut, forced) = find_cut(&chars, start, window_end);
        segments.push(TextSegment {
            text: text[bounds[start]..bounds[cut]].to_string(),
            forced,
        });
        if forced {
            warn!(
                start,
                max_len, "no split boundary within window, forcing split at length limit"
            );
        }
        start = cut;
    }

    segments
}

/// Pick the cut position (exclusive char index) for the window
/// `[start, window_end)`. Returns the cut and whether it was forced.
fn find_cut(chars: &[char], start: usize, window_end: usize) -> (usize, bool) {
    // Paragraph boundary: cut after the blank line.
    for i in (start..window_end - 1).rev() {
        if chars[i] == '\n' && chars[i + 1] == '\n' {
            return (i + 2, false);
        }
    }

    // Sentence boundary: cut right after a terminator that ends a sentence
    // (followed by whitespace or the end of input).
    for i in (start..window_end).rev() {
        if TERMINATORS.contains(&chars[i]) && chars.get(i + 1).map_or(true, |c| c.is_whitespace())
        {
            return (i + 1, false);
        }
    }

    // Word boundary: cut after the last whitespace in the window.
    for i in (start..window_end).rev() {
        if chars[i].is_whitespace() {
            return (i + 1, false);
        }
    }

    (window_end, true)
}
