//! Filters model text before it reaches the synthesizer.
//!
//! Removes content that should not be read aloud: stage directions between
//! asterisks (`*waves*`), parenthesised asides, bracketed tags, and
//! characters no voice can pronounce. Display text and history keep the
//! original.

use once_cell::sync::Lazy;
use regex::Regex;

static ASTERISK_SPANS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*+[^*]*\*+").expect("valid asterisk pattern"));
static WHITESPACE_RUNS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("valid whitespace pattern"));

/// Applies all synthesis-text filters.
pub fn speech_filter(text: &str) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut result = ASTERISK_SPANS.replace_all(text, " ").into_owned();
    for (left, right) in [('(', ')'), ('[', ']'), ('<', '>')] {
        result = strip_nested(&result, left, right);
    }
    let result: String = result.chars().filter(|c| is_speakable(*c)).collect();
    WHITESPACE_RUNS.replace_all(result.trim(), " ").into_owned()
}

/// Removes text inside possibly-nested delimiter pairs.
fn strip_nested(text: &str, left: char, right: char) -> String {
    let mut depth = 0usize;
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        if ch == left {
            depth += 1;
        } else if ch == right {
            depth = depth.saturating_sub(1);
        } else if depth == 0 {
            out.push(ch);
        }
    }
    out
}

fn is_speakable(c: char) -> bool {
    c.is_alphanumeric()
        || c.is_whitespace()
        || matches!(
            c,
            '.' | ','
                | '!'
                | '?'
                | ';'
                | ':'
                | '\''
                | '"'
                | '-'
                | '…'
                | '¿'
                | '¡'
                | '%'
                | '&'
                | '$'
                | '€'
        )
}
