//! Deterministic profanity masking.
//!
//! Whole-word, case-insensitive. Only the matched word is replaced, so the
//! surrounding punctuation and whitespace survive byte-for-byte.

use regex::{NoExpand, Regex};
use std::borrow::Cow;
use std::sync::LazyLock;

pub const PROFANITY_PLACEHOLDER: &str = "[bleep]";

const TERMS: &[&str] = &[
    "fuck", "fucking", "fucked", "fucker", "shit", "shitting", "shitty", "bitch", "bitching",
    "asshole", "bastard", "cunt", "damn", "damned", "hell", "ass", "crap",
];

static PROFANITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b(?:{})\b", TERMS.join("|"))).unwrap());

pub fn mask_profanity<'a>(text: &'a str, placeholder: &str) -> Cow<'a, str> {
    PROFANITY.replace_all(text, NoExpand(placeholder))
}

pub fn contains_profanity(text: &str) -> bool {
    PROFANITY.is_match(text)
}

/// Number of placeholder occurrences in already-masked text.
pub fn count_masked(text: &str, placeholder: &str) -> usize {
    if placeholder.is_empty() {
        return 0;
    }
    text.matches(placeholder).count()
}
