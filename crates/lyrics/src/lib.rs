mod split;

use std::sync::LazyLock;

use common::LyricLine;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub use split::{
    explicit_delimiter, is_foreign, is_han, is_kana, kana_then_han, mixed_han_foreign, Split,
    Strategy, STRATEGIES,
};

static TIMESTAMP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d+):(\d{2})(?:[.:](\d{1,3}))?\]").unwrap());
static CREDIT_SEPARATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s{2,}| / | \| ").unwrap());

const CREDIT_KEYWORDS: &[&str] = &[
    "作词", "作曲", "编曲", "制作人", "监制",
    "录音", "混音", "母带", "演唱", "歌手",
    "Lyrics", "Lyricist", "Composer", "Arranger", "Producer",
    "Artist", "Vocals", "Words", "Music",
];

const HEADER_PREFIXES: &[&str] = &["title:", "artist:", "album:", "by:", "ti:", "ar:", "al:"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitThresholds {
    /// A leading foreign span with at most this many words is an inline word.
    pub leading_foreign_max_tokens: usize,
    /// Same, for a trailing foreign span.
    pub trailing_foreign_max_tokens: usize,
    /// More foreign characters than this always allows a script split.
    pub foreign_char_override: usize,
    /// Entries closer than this are a line and its translation.
    pub merge_window_ms: u64,
}

impl Default for SplitThresholds {
    fn default() -> Self {
        Self {
            leading_foreign_max_tokens: 3,
            trailing_foreign_max_tokens: 2,
            foreign_char_override: 5,
            merge_window_ms: 100,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LineKind {
    Credit,
    Header,
    Lyric,
}

#[derive(Debug)]
struct TimedEntry {
    millis: u64,
    text: String,
}

impl TimedEntry {
    fn seconds(&self) -> f64 {
        self.millis as f64 / 1000.0
    }
}

pub fn parse(text: &str) -> Vec<LyricLine> {
    parse_with(text, &SplitThresholds::default())
}

/// Parses LRC text into a timeline sorted by time. Lines without a leading
/// timestamp, or with nothing left after it, are dropped.
pub fn parse_with(text: &str, thresholds: &SplitThresholds) -> Vec<LyricLine> {
    let entries = timed_entries(text);
    let mut lines = Vec::with_capacity(entries.len());

    let mut index = 0;
    while index < entries.len() {
        let entry = &entries[index];
        let time = entry.seconds();
        match classify(&entry.text) {
            LineKind::Credit => {
                lines.extend(credit_parts(&entry.text).map(|part| LyricLine::new(time, part)));
            }
            LineKind::Header => lines.push(LyricLine::new(time, entry.text.as_str())),
            LineKind::Lyric => {
                if let Some((text, translation)) = split_line(&entry.text, thresholds) {
                    lines.push(LyricLine::with_translation(time, text, translation));
                } else if let Some(next) = translation_of(&entries, index, thresholds) {
                    lines.push(LyricLine::with_translation(
                        time,
                        entry.text.as_str(),
                        next.text.as_str(),
                    ));
                    index += 1;
                } else {
                    lines.push(LyricLine::new(time, entry.text.as_str()));
                }
            }
        }
        index += 1;
    }
    lines
}

/// Index of the line showing at `position` seconds: the last one whose time
/// is not after it.
pub fn active_line(lines: &[LyricLine], position: f64) -> Option<usize> {
    lines
        .partition_point(|line| line.time <= position)
        .checked_sub(1)
}

pub fn split_line(text: &str, thresholds: &SplitThresholds) -> Option<Split> {
    STRATEGIES
        .iter()
        .find_map(|strategy| strategy(text, thresholds))
}

pub fn is_metadata_line(text: &str) -> bool {
    classify(text) != LineKind::Lyric
}

fn classify(text: &str) -> LineKind {
    if CREDIT_KEYWORDS.iter().any(|keyword| text.contains(keyword)) {
        return LineKind::Credit;
    }
    if (text.contains('(') && text.contains(')')) || text.contains(" - ") || has_header_prefix(text)
    {
        return LineKind::Header;
    }
    LineKind::Lyric
}

fn has_header_prefix(text: &str) -> bool {
    HEADER_PREFIXES.iter().any(|prefix| {
        text.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    })
}

fn credit_parts(text: &str) -> Box<dyn Iterator<Item = &str> + '_> {
    if !text.contains("  ") && !text.contains(" / ") {
        return Box::new(std::iter::once(text));
    }
    Box::new(
        CREDIT_SEPARATOR
            .split(text)
            .map(str::trim)
            .filter(|part| !part.is_empty()),
    )
}

fn translation_of<'a>(
    entries: &'a [TimedEntry],
    index: usize,
    thresholds: &SplitThresholds,
) -> Option<&'a TimedEntry> {
    let current = entries.get(index)?;
    let next = entries.get(index + 1)?;
    let close = next.millis - current.millis < thresholds.merge_window_ms;
    (close && classify(&next.text) == LineKind::Lyric).then_some(next)
}

fn timed_entries(text: &str) -> Vec<TimedEntry> {
    let normalized = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut entries = Vec::new();
    for line in normalized.lines() {
        let (stamps, rest) = leading_timestamps(line);
        let rest = rest.trim();
        if stamps.is_empty() || rest.is_empty() {
            continue;
        }
        entries.extend(stamps.into_iter().map(|millis| TimedEntry {
            millis,
            text: rest.to_string(),
        }));
    }
    // Stable, so equal times keep their order of appearance.
    entries.sort_by_key(|entry| entry.millis);
    entries
}

fn leading_timestamps(line: &str) -> (Vec<u64>, &str) {
    let mut stamps = Vec::new();
    let mut rest = line.trim_start();
    while let Some(caps) = TIMESTAMP.captures(rest) {
        let Some(millis) = timestamp_millis(&caps) else {
            break;
        };
        stamps.push(millis);
        rest = rest[caps[0].len()..].trim_start();
    }
    (stamps, rest)
}

fn timestamp_millis(caps: &regex::Captures<'_>) -> Option<u64> {
    let minutes: u64 = caps[1].parse().ok()?;
    let seconds: u64 = caps[2].parse().ok()?;
    // One digit is tenths, two hundredths, three milliseconds.
    let fraction: u64 = match caps.get(3) {
        Some(digits) => format!("{:0<3}", digits.as_str()).parse().ok()?,
        None => 0,
    };
    minutes
        .checked_mul(60_000)?
        .checked_add(seconds * 1000 + fraction)
}
