//! Sentence segmentation for incremental synthesis.
//!
//! Splits model output into chunks at sentence and clause boundaries so
//! synthesis can start before the full response exists. Cut points prefer
//! strong punctuation and never land before a third of the chunk budget.

/// Cut separators in priority order.
const SEPARATORS: [&str; 6] = [". ", "! ", "? ", "; ", ", ", " "];

/// Splits `text` into chunks of at most `max_chars` characters.
pub fn segment_text(text: &str, max_chars: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= max_chars {
        return vec![trimmed.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = trimmed;
    loop {
        if remaining.chars().count() <= max_chars {
            if !remaining.is_empty() {
                chunks.push(remaining.to_string());
            }
            break;
        }

        let cut = best_cut(remaining, max_chars);
        let chunk = remaining[..cut].trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }
    chunks
}

/// Byte offset of the best cut point within the first `max_chars` characters.
fn best_cut(text: &str, max_chars: usize) -> usize {
    let window_end = char_floor(text, max_chars);
    let window = &text[..window_end];

    for sep in SEPARATORS {
        if let Some(idx) = window.rfind(sep) {
            // Too-early cuts produce choppy audio.
            if idx > window_end / 3 {
                return idx + sep.len();
            }
        }
    }
    window_end
}

/// Byte offset of the `n`-th character boundary (or the end of the string).
fn char_floor(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(i, _)| i)
        .unwrap_or(text.len())
}

/// Incremental segmenter fed token deltas.
///
/// Emits a sentence as soon as a terminator followed by whitespace lands in
/// the buffer, or when the buffer overruns the chunk budget. Call
/// [`SentenceSegmenter::flush`] once the stream ends to get the tail.
#[derive(Debug)]
pub struct SentenceSegmenter {
    buffer: String,
    max_chars: usize,
}

impl SentenceSegmenter {
    pub fn new(max_chars: usize) -> Self {
        Self {
            buffer: String::new(),
            max_chars,
        }
    }

    /// Feeds one token; returns any sentences it completed.
    pub fn push(&mut self, token: &str) -> Vec<String> {
        self.buffer.push_str(token);
        let mut completed = Vec::new();
        while let Some(at) = self.split_point() {
            let head = self.buffer[..at].trim().to_string();
            self.buffer = self.buffer[at..].trim_start().to_string();
            if !head.is_empty() {
                completed.push(head);
            }
        }
        completed
    }

    /// Flushes whatever remains as a final sentence.
    pub fn flush(&mut self) -> Option<String> {
        let rest = self.buffer.trim().to_string();
        self.buffer.clear();
        if rest.is_empty() { None } else { Some(rest) }
    }

    fn split_point(&self) -> Option<usize> {
        for (i, ch) in self.buffer.char_indices() {
            if matches!(ch, '.' | '!' | '?' | ';' | '\n') {
                let end = i + ch.len_utf8();
                // A terminator only closes a sentence once trailing
                // whitespace arrives ("3.14" and "Mr." stay whole).
                let closed = ch == '\n'
                    || self.buffer[end..].starts_with(|c: char| c.is_whitespace());
                if closed && !self.buffer[..i].trim().is_empty() {
                    return Some(end);
                }
            }
        }

        if self.buffer.chars().count() > self.max_chars {
            return Some(best_cut(&self.buffer, self.max_chars));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(segment_text("Hello world", 150), vec!["Hello world"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        assert!(segment_text("", 150).is_empty());
        assert!(segment_text("   ", 150).is_empty());
    }

    #[test]
    fn long_text_splits_at_sentence_boundaries() {
        let text = "First sentence here. Second sentence follows. Third one closes.";
        let chunks = segment_text(text, 30);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0], "First sentence here.");
        let rejoined = chunks.join(" ");
        assert!(rejoined.contains("Second sentence follows."));
    }

    #[test]
    fn cut_never_lands_too_early() {
        // The period sits at 4 chars, well under a third of the budget, so
        // the splitter must look for a later separator instead.
        let text = "Hm. A rather long clause that keeps going without strong punctuation marks";
        let chunks = segment_text(text, 40);
        assert!(chunks[0].len() > 40 / 3);
    }

    #[test]
    fn multibyte_text_never_splits_inside_a_char() {
        let text = "número uno está aquí, número dos también viene, número tres cierra la frase completa";
        let chunks = segment_text(text, 30);
        assert!(chunks.len() > 1);
        // No characters may be lost or mangled by the cuts.
        assert_eq!(chunks.join(" ").replace(' ', ""), text.replace(' ', ""));
    }

    #[test]
    fn streaming_emits_on_terminator() {
        let mut seg = SentenceSegmenter::new(150);
        assert!(seg.push("Hello wor").is_empty());
        assert!(seg.push("ld.").is_empty());
        let done = seg.push(" Next");
        assert_eq!(done, vec!["Hello world."]);
        assert_eq!(seg.flush(), Some("Next".to_string()));
    }

    #[test]
    fn streaming_keeps_decimals_whole() {
        let mut seg = SentenceSegmenter::new(150);
        assert!(seg.push("Pi is 3.").is_empty());
        assert!(seg.push("14159").is_empty());
        let done = seg.push(" and that is it. ");
        assert_eq!(done, vec!["Pi is 3.14159 and that is it."]);
    }

    #[test]
    fn streaming_flushes_tail() {
        let mut seg = SentenceSegmenter::new(150);
        seg.push("no terminator here");
        assert_eq!(seg.flush(), Some("no terminator here".to_string()));
        assert_eq!(seg.flush(), None);
    }

    #[test]
    fn streaming_cuts_overlong_buffer() {
        let mut seg = SentenceSegmenter::new(20);
        let out = seg.push("a word salad with no punctuation that just keeps running");
        assert!(!out.is_empty());
        assert!(out[0].chars().count() <= 20);
    }
}
