//! Text preparation shared by the content map and the resolver.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MatchPolicy;

static HEADING: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?m)^[ \t]{0,3}#{1,6}[ \t]+").ok());
static LIST_MARKER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*(?:[-*+]|\d+\.)[ \t]+").ok());
static BLOCKQUOTE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(?m)^[ \t]*>[ \t]?").ok());
static IMAGE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\([^)]*\)").ok());
static LINK: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]*\)").ok());
static BOLD: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\*\*([^*]+)\*\*|__([^_]+)__").ok());
static ITALIC: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\*([^*\s][^*]*)\*|\b_([^_]+)_\b").ok());
static INLINE_CODE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"`([^`]+)`").ok());
static HTML_TAG: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").ok());

fn replace(text: &str, pattern: &Lazy<Option<Regex>>, replacement: &str) -> String {
    match pattern.as_ref() {
        Some(re) => re.replace_all(text, replacement).into_owned(),
        None => text.to_string(),
    }
}

/// Drop markdown syntax, keeping the visible words.
pub fn strip_markdown(text: &str) -> String {
    let text = replace(text, &HEADING, "");
    let text = replace(&text, &LIST_MARKER, "");
    let text = replace(&text, &BLOCKQUOTE, "");
    let text = replace(&text, &IMAGE, "$1");
    let text = replace(&text, &LINK, "$1");
    let text = replace(&text, &BOLD, "$1$2");
    let text = replace(&text, &ITALIC, "$1$2");
    let text = replace(&text, &INLINE_CODE, "$1");
    replace(&text, &HTML_TAG, "")
}

/// Case-fold, strip punctuation, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .to_lowercase()
        .chars()
        .map(|ch| if ch.is_alphanumeric() || ch.is_whitespace() { ch } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Rejects fragments too short to show, and anything without a run of at
/// least three letters.
pub fn is_valid_content(text: &str, policy: &MatchPolicy) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < policy.min_valid_chars {
        return false;
    }

    let mut run = 0;
    for ch in trimmed.chars() {
        if ch.is_alphabetic() {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Distinct words longer than the policy minimum, from normalized text.
pub fn significant_words(normalized: &str, policy: &MatchPolicy) -> Vec<String> {
    let mut words: Vec<String> = Vec::new();
    for word in normalized.split_whitespace() {
        if word.chars().count() > policy.significant_word_min_len && !words.iter().any(|w| w == word) {
            words.push(word.to_string());
        }
    }
    words
}

/// Split a block into sentences on terminal punctuation followed by
/// whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let at_boundary = chars.peek().map_or(true, |next| next.is_whitespace());
            if at_boundary {
                let sentence = current.trim().to_string();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                current.clear();
            }
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// Split a page into paragraphs on blank lines.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }
    paragraphs
}
