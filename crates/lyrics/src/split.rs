use crate::SplitThresholds;

/// A split of one lyric line into its text and translation.
pub type Split = (String, String);

/// One translation-splitting heuristic. Returns `None` when it does not apply.
pub type Strategy = fn(&str, &SplitThresholds) -> Option<Split>;

/// Tried in order; the first match wins.
pub const STRATEGIES: &[Strategy] = &[explicit_delimiter, kana_then_han, mixed_han_foreign];

/// Highest priority first.
const DELIMITERS: &[&str] = &[" // ", " | ", "  ", " / "];

pub fn is_han(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

pub fn is_kana(c: char) -> bool {
    ('\u{3040}'..='\u{30ff}').contains(&c)
}

/// Latin letters, digits, Hangul, kana and Cyrillic.
pub fn is_foreign(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || ('\u{ac00}'..='\u{d7af}').contains(&c)
        || is_kana(c)
        || ('\u{0400}'..='\u{04ff}').contains(&c)
}

fn has_kana(text: &str) -> bool {
    text.chars().any(is_kana)
}

fn has_han(text: &str) -> bool {
    text.chars().any(is_han)
}

pub fn explicit_delimiter(text: &str, _thresholds: &SplitThresholds) -> Option<Split> {
    DELIMITERS.iter().find_map(|delimiter| {
        let (left, right) = text.split_once(delimiter)?;
        let (left, right) = (left.trim(), right.trim());
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some((left.to_string(), right.to_string()))
    })
}

/// Japanese followed by a Chinese rendering: the first whitespace boundary
/// with kana on the left and kana-free Han text on the right.
pub fn kana_then_han(text: &str, _thresholds: &SplitThresholds) -> Option<Split> {
    if !has_kana(text) {
        return None;
    }
    let parts: Vec<&str> = text.split_whitespace().collect();
    (1..parts.len()).find_map(|i| {
        let prefix = parts[..i].join(" ");
        let suffix = parts[i..].join(" ");
        (has_kana(&prefix) && !has_kana(&suffix) && has_han(&suffix)).then_some((prefix, suffix))
    })
}

/// A contiguous foreign span before or after the Han span. Short foreign
/// spans count as inline words and stay unsplit unless the line carries
/// more than `foreign_char_override` foreign characters.
pub fn mixed_han_foreign(text: &str, thresholds: &SplitThresholds) -> Option<Split> {
    let mut first_han = None;
    let mut last_han = None;
    let mut first_foreign = None;
    let mut last_foreign = None;
    let mut foreign_chars = 0usize;

    for (offset, c) in text.char_indices() {
        if is_han(c) {
            first_han.get_or_insert(offset);
            last_han = Some(offset);
        } else if is_foreign(c) {
            first_foreign.get_or_insert(offset);
            last_foreign = Some(offset);
            foreign_chars += 1;
        }
    }

    let (first_han, last_han, first_foreign, last_foreign) =
        (first_han?, last_han?, first_foreign?, last_foreign?);
    let spaced = text.contains("  ");
    let phrase = |foreign: &str, max_tokens: usize| {
        let inline = foreign.split_whitespace().count() <= max_tokens && !spaced;
        !inline || foreign_chars > thresholds.foreign_char_override
    };

    if last_foreign < first_han {
        let foreign = text[..first_han].trim();
        let han = text[first_han..].trim();
        if phrase(foreign, thresholds.leading_foreign_max_tokens) {
            return Some((foreign.to_string(), han.to_string()));
        }
    } else if last_han < first_foreign {
        let han = text[..first_foreign].trim();
        let foreign = text[first_foreign..].trim();
        if phrase(foreign, thresholds.trailing_foreign_max_tokens) {
            return Some((han.to_string(), foreign.to_string()));
        }
    }
    None
}
