//! Tokenization and small numeric helpers shared by the guard and metrics.

use regex::Regex;
use std::sync::LazyLock;

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());
static SENTENCE_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[.!?]+").unwrap());
static PARAGRAPH_BREAK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n[ \t\r]*\n\s*").unwrap());

/// Lowercased word tokens. Punctuation separates tokens and is dropped.
pub fn tokenize(text: &str) -> Vec<String> {
    WORD.find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

/// Whitespace-delimited word count, the unit for all length targets.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

pub fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_BREAK
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

pub fn paragraphs(text: &str) -> Vec<&str> {
    PARAGRAPH_BREAK
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

// -----------------------------------------------------------------------------
// Scoring helpers
// -----------------------------------------------------------------------------

/// Tolerance-band score for a deviation.
///
/// Inside the band the score falls linearly from 1.0 to `1 - inner_drop`;
/// past it the remainder halves every `1 / decay_rate` of excess deviation.
pub fn band_score(deviation: f64, tolerance: f64, inner_drop: f64, decay_rate: f64) -> f64 {
    let deviation = deviation.abs();
    if !deviation.is_finite() {
        return 0.0;
    }
    if tolerance > 0.0 && deviation <= tolerance {
        return (1.0 - (deviation / tolerance) * inner_drop).clamp(0.0, 1.0);
    }
    if deviation == 0.0 {
        return 1.0;
    }
    let excess = deviation - tolerance.max(0.0);
    ((1.0 - inner_drop) * 0.5_f64.powf(excess * decay_rate)).clamp(0.0, 1.0)
}

/// `|actual - target| / target`, or `None` when the target is not positive.
pub fn relative_deviation(actual: f64, target: f64) -> Option<f64> {
    (target > 0.0).then(|| (actual - target).abs() / target)
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    let m = mean(values);
    if m <= 0.0 {
        return 0.0;
    }
    variance(values).sqrt() / m
}

pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}
