//! Parsers for free-form completion output.

use regex::Regex;
use std::sync::LazyLock;

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*(%|/\s*10\b)?").unwrap());

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").unwrap());

/// First number in `text` as a unit score. `85%` and `8.5/10` are rescaled;
/// anything else is clamped to [0, 1].
pub fn parse_score(text: &str, fallback: f64) -> f64 {
    let Some(caps) = NUMBER.captures(text) else {
        return fallback;
    };
    let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<f64>().ok()) else {
        return fallback;
    };
    let scaled = match caps.get(2).map(|m| m.as_str()) {
        Some("%") => value / 100.0,
        Some(_) => value / 10.0,
        None => value,
    };
    scaled.clamp(0.0, 1.0)
}

/// Body of the first fenced block, or the trimmed input when there is none.
pub fn extract_fenced_text(text: &str) -> String {
    FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_else(|| text.trim().to_string())
}
