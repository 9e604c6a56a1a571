//! Similarity, guard, scoring and selection. Pure and synchronous.

pub mod evaluate;
pub mod guard;
pub mod metrics;
pub mod select;
pub mod similarity;

pub use evaluate::{evaluate, overall_score, EvalInput, Evaluator, MetricDetails};
pub use guard::{check_guard, Guard, GuardThresholds};
pub use select::{compare_reports, select_best, select_best_by, select_best_id};
pub use similarity::{
    hamming_distance, max_shared_ngram, ngram_overlap_percentage, simhash, Fingerprint,
    TextProfile, SHARED_NGRAM_SCAN, SIMHASH_BITS,
};
