//! Word lists behind the heuristic metrics.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

pub static FIRST_PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bI\b|(?i:\b(?:me|my|mine|myself|we|us|our|ours)\b)").unwrap());
pub static SECOND_PERSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:you|your|yours|yourself)\b").unwrap());
pub static THIRD_PERSON: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:he|him|his|she|her|hers|they|them|their|theirs)\b").unwrap()
});

pub static PAST_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:\w+ed|was|were|had|did)\b").unwrap());
pub static PRESENT_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:am|is|are|has|does)\b").unwrap());
pub static FUTURE_MARKERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:will|shall|won't)\b|\bgoing to\b").unwrap());

pub static COORDINATING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:and|but|or)\b").unwrap());
pub static SUBORDINATING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:because|although|though|if|when|while|since|unless|until)\b").unwrap()
});

/// Straight or curly double-quoted spans.
pub static QUOTED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|“[^”]*”"#).unwrap());

/// Words that start with a capital but never name an entity.
pub const ENTITY_STOPLIST: &[&str] = &[
    "I", "The", "A", "An", "And", "But", "Or", "He", "She", "They", "We", "It", "You", "His",
    "Her", "Their", "My", "Our", "This", "That", "Then", "When", "There",
];

const FUNCTION_KEYWORDS: &[(&str, &[&str])] = &[
    ("hook", &["began", "started", "first", "opening", "sudden", "suddenly"]),
    ("inciting", &["changed", "discovered", "realized", "noticed", "happened"]),
    ("rising", &["tried", "attempted", "struggled", "worked", "pushed"]),
    ("crisis", &["failed", "broke", "collapsed", "worst", "lost"]),
    ("climax", &["faced", "confronted", "decided", "chose", "fought"]),
    ("falling", &["aftermath", "after", "settled", "calmed", "subsided"]),
    ("resolution", &["ended", "finally", "concluded", "understood", "accepted"]),
    ("denouement", &["left", "departed", "finished", "last", "closed"]),
];

/// One whole-word, case-insensitive matcher per narrative function.
pub static FUNCTION_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FUNCTION_KEYWORDS
        .iter()
        .map(|(category, words)| {
            let pattern = format!(r"(?i)\b(?:{})\b", words.join("|"));
            (*category, Regex::new(&pattern).unwrap())
        })
        .collect()
});

/// Keyword matcher for a narrative function label. Labels such as "rising
/// action" match by contained category name.
pub fn function_pattern(function: &str) -> Option<&'static Regex> {
    let label = function.to_lowercase();
    FUNCTION_PATTERNS
        .iter()
        .find(|(category, _)| label.contains(category))
        .map(|(_, re)| re)
}

pub static POSITIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "love", "happy", "joy", "hope", "smile", "laugh", "good", "great", "wonderful",
        "beautiful", "pleasant", "bright", "warm", "kind", "gentle",
    ]
    .into_iter()
    .collect()
});

pub static NEGATIVE_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        "hate", "sad", "pain", "fear", "cry", "anger", "bad", "terrible", "awful", "ugly",
        "harsh", "dark", "cold", "cruel", "rough",
    ]
    .into_iter()
    .collect()
});
