use std::collections::HashMap;
use unicode_segmentation::UnicodeSegmentation;

const ABBREVIATIONS: &[&str] = &[
    "Mr.", "Mrs.", "Ms.", "Dr.", "Prof.", "Sr.", "Jr.", "vs.", "etc.", "i.e.", "e.g.", "Inc.",
    "Ltd.", "Corp.", "Co.", "No.", "Vol.", "Ch.", "Fig.", "Eq.", "Sec.", "approx.", "cf.", "al.",
];

/// Function words ignored by keyword scoring and grounding.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "nor", "for", "with", "this", "that", "these", "those", "from",
    "into", "onto", "will", "have", "has", "had", "can", "should", "must", "may", "might", "could",
    "would", "been", "being", "was", "were", "are", "is", "am", "be", "not", "but", "just", "only",
    "all", "some", "any", "each", "every", "either", "neither", "both", "more", "most", "less",
    "least", "very", "too", "also", "then", "than", "when", "where", "what", "which", "who",
    "whom", "whose", "how", "why", "because", "since", "while", "after", "before", "during",
    "between", "among", "through", "over", "under", "above", "below", "of", "in", "on", "at",
    "by", "to", "as", "it", "its", "if", "so", "do", "does", "did", "such", "there", "their",
    "they", "them", "he", "she", "we", "you", "our", "his", "her", "about", "against", "via",
];

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Sentence spans as byte ranges into `text`, trimmed of surrounding
/// whitespace. A boundary is a newline, or `.`, `!` or `?` followed by
/// whitespace or end of text, unless the sentence ends in a known
/// abbreviation.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut graphemes = text.grapheme_indices(true).peekable();

    while let Some((idx, grapheme)) = graphemes.next() {
        let end = idx + grapheme.len();
        let boundary = match grapheme {
            "\n" | "\r\n" => true,
            "." | "!" | "?" => match graphemes.peek() {
                None => true,
                Some((_, next)) => {
                    next.chars().all(char::is_whitespace)
                        && !ends_with_abbreviation(&text[start..end])
                }
            },
            _ => false,
        };

        if boundary {
            push_trimmed(text, start, end, &mut spans);
            start = end;
        }
    }

    push_trimmed(text, start, text.len(), &mut spans);
    spans
}

fn ends_with_abbreviation(sentence: &str) -> bool {
    sentence
        .split_whitespace()
        .last()
        .map(|word| ABBREVIATIONS.contains(&word))
        .unwrap_or(false)
}

pub(crate) fn push_trimmed(text: &str, start: usize, end: usize, spans: &mut Vec<(usize, usize)>) {
    let slice = &text[start..end];
    let trimmed = slice.trim();
    if trimmed.is_empty() {
        return;
    }
    let lead = slice.len() - slice.trim_start().len();
    spans.push((start + lead, start + lead + trimmed.len()));
}

/// Lowercased content tokens with stop words removed.
///
/// Hyphens and dots inside a token are kept so identifiers such as
/// `cve-2023-23397`, `t1059.001` and `spear-phishing` survive intact.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '-' || c == '.' || c == '_'))
        .map(|raw| raw.trim_matches(|c: char| c == '-' || c == '.' || c == '_'))
        .filter(|token| token.chars().count() >= 2 && !is_stop_word(token))
        .map(str::to_string)
        .collect()
}

pub fn term_frequencies(text: &str) -> HashMap<String, u32> {
    let mut counts = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_insert(0) += 1;
    }
    counts
}

/// Lowercased, whitespace-collapsed prefix of at most `prefix_chars` chars.
pub fn normalize_prefix(text: &str, prefix_chars: usize) -> String {
    let collapsed = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    collapsed.chars().take(prefix_chars).collect()
}

/// Largest char boundary at or below `index`.
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut index = index;
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
