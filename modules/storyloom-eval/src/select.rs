//! Candidate selection.

use std::cmp::Ordering;

use storyloom_common::{Candidate, EvalReport, SelectionError};

/// Ranking order: passing first, then overall, then freshness.
pub fn compare_reports(a: &EvalReport, b: &EvalReport) -> Ordering {
    a.pass_fail
        .cmp(&b.pass_fail)
        .then_with(|| a.overall.total_cmp(&b.overall))
        .then_with(|| a.scores.freshness.total_cmp(&b.scores.freshness))
}

/// Best item by [`compare_reports`]. Ties keep the earliest item.
pub fn select_best_by<T, F>(items: &[T], report: F) -> Result<&T, SelectionError>
where
    F: Fn(&T) -> &EvalReport,
{
    let mut iter = items.iter();
    let mut best = iter.next().ok_or(SelectionError::EmptyCandidateSet)?;
    for item in iter {
        if compare_reports(report(item), report(best)) == Ordering::Greater {
            best = item;
        }
    }
    Ok(best)
}

pub fn select_best(candidates: &[Candidate]) -> Result<&Candidate, SelectionError> {
    select_best_by(candidates, |c| &c.report)
}

pub fn select_best_id(candidates: &[Candidate]) -> Result<&str, SelectionError> {
    select_best(candidates).map(|c| c.id.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_common::{ComponentScores, GuardVerdict, LengthStats};

    fn report(pass: bool, overall: f64, freshness: f64) -> EvalReport {
        EvalReport {
            candidate_id: String::new(),
            overall,
            scores: ComponentScores {
                stylefit: 0.5,
                formfit: 0.5,
                coherence: 0.5,
                freshness,
                cadence: 0.5,
                motif_coverage: 0.5,
                dialogue_balance: 0.5,
            },
            guard: GuardVerdict::clear(),
            per_beat: Vec::new(),
            red_flags: Vec::new(),
            drift: Vec::new(),
            tuning_suggestions: Vec::new(),
            pass_fail: pass,
            length: LengthStats::default(),
            config_hash: String::new(),
            repro: None,
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        let empty: Vec<EvalReport> = Vec::new();
        assert_eq!(
            select_best_by(&empty, |r| r).unwrap_err(),
            SelectionError::EmptyCandidateSet
        );
    }

    #[test]
    fn passing_beats_higher_overall() {
        let reports = vec![report(false, 0.9, 1.0), report(true, 0.55, 1.0)];
        let best = select_best_by(&reports, |r| r).unwrap();
        assert!(best.pass_fail);
    }

    #[test]
    fn freshness_breaks_overall_ties() {
        let reports = vec![report(true, 0.7, 0.7), report(true, 0.7, 1.0)];
        let best = select_best_by(&reports, |r| r).unwrap();
        assert_eq!(best.scores.freshness, 1.0);
    }

    #[test]
    fn full_ties_keep_first() {
        let mut a = report(true, 0.7, 1.0);
        a.candidate_id = "a".into();
        let mut b = report(true, 0.7, 1.0);
        b.candidate_id = "b".into();
        let reports = vec![a, b];
        assert_eq!(select_best_by(&reports, |r| r).unwrap().candidate_id, "a");
    }
}
