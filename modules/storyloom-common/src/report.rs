use serde::{Deserialize, Serialize};

use crate::config::Metric;

/// Minimum overall score for a passing report.
pub const PASS_THRESHOLD: f64 = 0.5;

// =============================================================================
// GuardVerdict
// =============================================================================

/// Anti-plagiarism verdict. `passed` holds exactly when `violations` is empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub passed: bool,
    pub max_shared_ngram: usize,
    pub overlap_pct: f64,
    pub simhash_hamming_distance: u32,
    pub violations: Vec<String>,
}

impl GuardVerdict {
    /// Verdict used when there is nothing to compare against.
    pub fn clear() -> Self {
        Self {
            passed: true,
            max_shared_ngram: 0,
            overlap_pct: 0.0,
            simhash_hamming_distance: 0,
            violations: Vec::new(),
        }
    }

    pub fn violation_count(&self) -> usize {
        self.violations.len()
    }
}

// =============================================================================
// EvalReport
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentScores {
    pub stylefit: f64,
    pub formfit: f64,
    pub coherence: f64,
    pub freshness: f64,
    pub cadence: f64,
    pub motif_coverage: f64,
    pub dialogue_balance: f64,
}

impl ComponentScores {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Stylefit => self.stylefit,
            Metric::Formfit => self.formfit,
            Metric::Coherence => self.coherence,
            Metric::Freshness => self.freshness,
            Metric::Cadence => self.cadence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerBeatScore {
    pub beat_id: String,
    pub target_words: usize,
    pub actual_words: usize,
    pub length_score: f64,
    pub function_score: f64,
    pub stylefit: f64,
    pub formfit: f64,
    pub notes: Vec<String>,
}

impl PerBeatScore {
    /// Signed word-count deviation from target.
    pub fn word_delta(&self) -> i64 {
        self.actual_words as i64 - self.target_words as i64
    }
}

/// Measured deviation of the text from a story spec target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftItem {
    pub field: String,
    pub target: f64,
    pub actual: f64,
    pub delta: f64,
}

impl DriftItem {
    pub fn new(field: impl Into<String>, target: f64, actual: f64) -> Self {
        Self {
            field: field.into(),
            target,
            actual,
            delta: actual - target,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TuningAction {
    Increase,
    Decrease,
}

impl TuningAction {
    pub fn sign(self) -> f64 {
        match self {
            TuningAction::Increase => 1.0,
            TuningAction::Decrease => -1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningSuggestion {
    /// Dotted parameter path, e.g. `voice.syntax.avg_sentence_len`.
    pub param: String,
    pub action: TuningAction,
    pub by: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LengthStats {
    pub words: usize,
    pub paragraphs: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repro {
    pub model: String,
    pub temperature: f64,
    #[serde(default)]
    pub git_commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalReport {
    pub candidate_id: String,
    pub overall: f64,
    pub scores: ComponentScores,
    pub guard: GuardVerdict,
    pub per_beat: Vec<PerBeatScore>,
    pub red_flags: Vec<String>,
    pub drift: Vec<DriftItem>,
    pub tuning_suggestions: Vec<TuningSuggestion>,
    pub pass_fail: bool,
    pub length: LengthStats,
    pub config_hash: String,
    #[serde(default)]
    pub repro: Option<Repro>,
}

/// The single pass/fail rule: a clean guard and an overall at or above
/// [`PASS_THRESHOLD`].
pub fn passes(guard: &GuardVerdict, overall: f64) -> bool {
    guard.passed && overall >= PASS_THRESHOLD
}
