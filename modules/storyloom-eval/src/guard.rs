//! Anti-plagiarism guard.

use serde::{Deserialize, Serialize};

use storyloom_common::spec::AntiPlagiarism;
use storyloom_common::GuardVerdict;

use crate::similarity::{
    hamming_distance, max_shared_ngram_tokens, ngram_overlap_tokens, TextProfile, OVERLAP_NGRAM,
    SHARED_NGRAM_SCAN,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GuardThresholds {
    pub max_ngram: usize,
    pub max_overlap_pct: f64,
    pub min_hamming: u32,
}

impl Default for GuardThresholds {
    fn default() -> Self {
        Self {
            max_ngram: 12,
            max_overlap_pct: 0.03,
            min_hamming: 18,
        }
    }
}

impl From<&AntiPlagiarism> for GuardThresholds {
    fn from(a: &AntiPlagiarism) -> Self {
        Self {
            max_ngram: a.max_ngram,
            max_overlap_pct: a.overlap_pct,
            min_hamming: a.simhash_hamming_min,
        }
    }
}

/// Check `text` against `exemplar`. Not symmetric: overlap is normalized by
/// the generated text's n-grams.
pub fn check_guard(text: &str, exemplar: &str, thresholds: &GuardThresholds) -> GuardVerdict {
    check_profiles(&TextProfile::new(text), &TextProfile::new(exemplar), thresholds)
}

pub fn check_profiles(
    text: &TextProfile,
    exemplar: &TextProfile,
    thresholds: &GuardThresholds,
) -> GuardVerdict {
    let scan = SHARED_NGRAM_SCAN.max(thresholds.max_ngram + 1);
    let max_shared = max_shared_ngram_tokens(&text.tokens, &exemplar.tokens, scan);
    let overlap_pct = ngram_overlap_tokens(&text.tokens, &exemplar.tokens, OVERLAP_NGRAM);
    let distance = hamming_distance(&text.fingerprint, &exemplar.fingerprint);

    let mut violations = Vec::new();

    // The scan always reaches past max_ngram, so a capped run still exceeds it.
    if max_shared > thresholds.max_ngram {
        violations.push(format!(
            "Shared n-gram run of {} tokens exceeds limit {}",
            max_shared, thresholds.max_ngram
        ));
    }
    if overlap_pct > thresholds.max_overlap_pct {
        violations.push(format!(
            "Overlap {:.3} exceeds threshold {}",
            overlap_pct, thresholds.max_overlap_pct
        ));
    }
    // Fingerprints of token-less text carry no information.
    let comparable = !text.is_empty() && !exemplar.is_empty();
    if comparable && distance < thresholds.min_hamming {
        violations.push(format!(
            "SimHash distance {} below threshold {}",
            distance, thresholds.min_hamming
        ));
    }

    GuardVerdict {
        passed: violations.is_empty(),
        max_shared_ngram: max_shared,
        overlap_pct,
        simhash_hamming_distance: distance,
        violations,
    }
}

/// Guard bound to one exemplar, tokenized once.
#[derive(Debug, Clone)]
pub struct Guard {
    exemplar: TextProfile,
    thresholds: GuardThresholds,
}

impl Guard {
    pub fn new(exemplar: &str, thresholds: GuardThresholds) -> Self {
        Self {
            exemplar: TextProfile::new(exemplar),
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &GuardThresholds {
        &self.thresholds
    }

    pub fn check(&self, text: &str) -> GuardVerdict {
        check_profiles(&TextProfile::new(text), &self.exemplar, &self.thresholds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXEMPLAR: &str = "My mother kept a jar of buttons on the windowsill, and every \
        winter she would pour them out across the kitchen table and sort them by color \
        while the radio murmured about storms that never quite arrived.";

    const FRESH: &str = "Grandfather repaired clocks in a narrow shop beside the canal. \
        Customers rarely came, yet each morning brass gears gleamed under his lamp.";

    #[test]
    fn identical_text_fails_all_three_checks() {
        let verdict = check_guard(EXEMPLAR, EXEMPLAR, &GuardThresholds::default());
        assert!(!verdict.passed);
        assert_eq!(verdict.max_shared_ngram, SHARED_NGRAM_SCAN);
        assert_eq!(verdict.overlap_pct, 1.0);
        assert_eq!(verdict.simhash_hamming_distance, 0);
        assert_eq!(verdict.violations.len(), 3);
    }

    #[test]
    fn fresh_text_passes() {
        let verdict = check_guard(FRESH, EXEMPLAR, &GuardThresholds::default());
        assert!(verdict.passed, "{:?}", verdict.violations);
        assert!(verdict.violations.is_empty());
        assert!(verdict.max_shared_ngram < 12);
    }

    #[test]
    fn empty_text_passes_against_any_exemplar() {
        let verdict = check_guard("", EXEMPLAR, &GuardThresholds::default());
        assert!(verdict.passed);
        assert_eq!(verdict.max_shared_ngram, 0);
        assert_eq!(verdict.overlap_pct, 0.0);
    }

    #[test]
    fn guard_is_deterministic() {
        let a = check_guard(FRESH, EXEMPLAR, &GuardThresholds::default());
        let b = check_guard(FRESH, EXEMPLAR, &GuardThresholds::default());
        assert_eq!(a, b);
    }

    #[test]
    fn partial_copy_trips_overlap_only() {
        let text = format!("{FRESH} She would pour them out across the kitchen table.");
        let thresholds = GuardThresholds {
            min_hamming: 0,
            ..GuardThresholds::default()
        };
        let verdict = check_guard(&text, EXEMPLAR, &thresholds);
        assert!(!verdict.passed);
        assert_eq!(verdict.max_shared_ngram, 9);
        assert_eq!(verdict.violations.len(), 1);
        assert!(verdict.violations[0].starts_with("Overlap"));
    }

    #[test]
    fn run_at_the_limit_passes_and_one_longer_fails() {
        let thresholds = GuardThresholds {
            max_ngram: 12,
            max_overlap_pct: 1.0,
            min_hamming: 0,
        };
        let words: Vec<&str> = EXEMPLAR.split_whitespace().collect();
        let filler = "Grandfather repaired clocks beside the canal";

        let at_limit = format!("{filler} {} {filler}", words[..12].join(" "));
        let verdict = check_guard(&at_limit, EXEMPLAR, &thresholds);
        assert_eq!(verdict.max_shared_ngram, 12);
        assert!(verdict.passed, "{:?}", verdict.violations);

        let over_limit = format!("{filler} {} {filler}", words[..13].join(" "));
        let verdict = check_guard(&over_limit, EXEMPLAR, &thresholds);
        assert_eq!(verdict.max_shared_ngram, 13);
        assert!(!verdict.passed);
        assert_eq!(
            verdict.violations,
            vec!["Shared n-gram run of 13 tokens exceeds limit 12".to_string()]
        );
    }

    #[test]
    fn bound_guard_matches_free_function() {
        let guard = Guard::new(EXEMPLAR, GuardThresholds::default());
        assert_eq!(
            guard.check(FRESH),
            check_guard(FRESH, EXEMPLAR, &GuardThresholds::default())
        );
    }

    #[test]
    fn thresholds_follow_spec_constraints() {
        let ap = AntiPlagiarism {
            max_ngram: 10,
            overlap_pct: 0.05,
            simhash_hamming_min: 20,
        };
        let t = GuardThresholds::from(&ap);
        assert_eq!(t.max_ngram, 10);
        assert_eq!(t.min_hamming, 20);
    }
}
