//! Motif and imagery coverage.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use storyloom_common::text::{coefficient_of_variation, tokenize};
use storyloom_common::StorySpec;

const MOTIF_CAP: usize = 5;
const IMAGERY_CAP: usize = 4;
const WEIGHT_MOTIFS: f64 = 0.6;
const WEIGHT_IMAGERY: f64 = 0.4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermCoverage {
    pub score: f64,
    pub coverage: f64,
    pub overuse_penalty: f64,
    pub balance: f64,
    pub counts: BTreeMap<String, usize>,
    pub missing: Vec<String>,
    pub overused: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifDetail {
    pub score: f64,
    pub motifs: TermCoverage,
    pub imagery: TermCoverage,
}

pub fn motif_coverage(text: &str, spec: &StorySpec) -> MotifDetail {
    let motifs = term_coverage(text, &spec.content.motifs, MOTIF_CAP);
    let imagery = term_coverage(text, &spec.content.imagery_palette, IMAGERY_CAP);
    let score = (WEIGHT_MOTIFS * motifs.score + WEIGHT_IMAGERY * imagery.score).clamp(0.0, 1.0);
    MotifDetail {
        score,
        motifs,
        imagery,
    }
}

/// Whole-word, case-insensitive mention count.
pub fn count_mentions(text: &str, term: &str) -> usize {
    count_in_tokens(&tokenize(text), term)
}

/// Occurrences of `term`'s token sequence in already-tokenized text.
fn count_in_tokens(tokens: &[String], term: &str) -> usize {
    let needle = tokenize(term);
    if needle.is_empty() {
        return 0;
    }
    tokens.windows(needle.len()).filter(|w| *w == needle.as_slice()).count()
}

pub fn term_coverage(text: &str, terms: &[String], cap: usize) -> TermCoverage {
    if terms.is_empty() {
        return TermCoverage {
            score: 1.0,
            coverage: 1.0,
            overuse_penalty: 0.0,
            balance: 1.0,
            counts: BTreeMap::new(),
            missing: Vec::new(),
            overused: Vec::new(),
        };
    }

    let tokens = tokenize(text);
    let counts: BTreeMap<String, usize> = terms
        .iter()
        .map(|t| (t.clone(), count_in_tokens(&tokens, t)))
        .collect();

    let covered = counts.values().filter(|c| **c > 0).count();
    let coverage = covered as f64 / counts.len() as f64;

    let mut overuse_penalty = 0.0;
    let mut overused = Vec::new();
    for (term, count) in &counts {
        if *count > cap {
            overuse_penalty += ((count - cap) as f64 * 0.05).min(0.2);
            overused.push(term.clone());
        }
    }
    let overuse_penalty = f64::min(overuse_penalty, 1.0);

    let nonzero: Vec<f64> = counts
        .values()
        .filter(|c| **c > 0)
        .map(|c| *c as f64)
        .collect();
    let balance = if nonzero.len() <= 1 {
        0.5
    } else {
        (1.0 - coefficient_of_variation(&nonzero) / 2.0).clamp(0.0, 1.0)
    };

    let missing = counts
        .iter()
        .filter(|(_, c)| **c == 0)
        .map(|(t, _)| t.clone())
        .collect();

    let score = coverage * (1.0 - overuse_penalty * 0.5) * (0.8 + balance * 0.2);

    TermCoverage {
        score: score.clamp(0.0, 1.0),
        coverage,
        overuse_penalty,
        balance,
        counts,
        missing,
        overused,
    }
}
