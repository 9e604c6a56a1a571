use storyloom_common::GuardVerdict;

const PENALTY_PER_VIOLATION: f64 = 0.3;

/// 1.0 for a clean guard, minus 0.3 per violation, floored at zero.
pub fn freshness(verdict: &GuardVerdict) -> f64 {
    if verdict.passed {
        return 1.0;
    }
    (1.0 - PENALTY_PER_VIOLATION * verdict.violation_count() as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_violations_leave_a_tenth() {
        let verdict = GuardVerdict {
            passed: false,
            max_shared_ngram: 12,
            overlap_pct: 1.0,
            simhash_hamming_distance: 0,
            violations: vec!["a".into(), "b".into(), "c".into()],
        };
        assert!((freshness(&verdict) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn clean_guard_is_fully_fresh() {
        assert_eq!(freshness(&GuardVerdict::clear()), 1.0);
    }
}
