use serde::{Deserialize, Serialize};

use crate::report::{EvalReport, GuardVerdict};

/// One drafted beat. `guard_passed` is false when the retry budget ran out
/// (guard still failing, or every completion call errored).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatResult {
    pub beat_id: String,
    pub function: String,
    pub text: String,
    pub guard_passed: bool,
    pub retries: u32,
    #[serde(default)]
    pub guard: Option<GuardVerdict>,
    /// Last completion error, if the beat never produced text.
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub beats: Vec<BeatResult>,
    pub stitched: String,
    #[serde(default)]
    pub stitched_guard: Option<GuardVerdict>,
    pub repair_applied: bool,
    /// Post-repair, post-masking text.
    pub final_text: String,
    pub temperature: f64,
    pub top_p: f64,
    pub report: EvalReport,
}

impl Candidate {
    pub fn overall(&self) -> f64 {
        self.report.overall
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerHistoryEntry {
    pub iteration: usize,
    pub best_score: f64,
    pub candidate_id: String,
    pub pass_fail: bool,
    /// This iteration beat the running best.
    pub improved: bool,
    pub running_best: f64,
    pub no_improvement: u32,
}
