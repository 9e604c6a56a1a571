//! Evaluation aggregator.
//!
//! Runs every sub-metric over a candidate text, combines the objective
//! metrics with normalized weights and derives red flags, drift items and
//! tuning suggestions.

use serde::{Deserialize, Serialize};
use tracing::debug;
use typed_builder::TypedBuilder;

use storyloom_common::report::passes;
use storyloom_common::text::{clamp_unit, paragraphs, word_count};
use storyloom_common::{
    ComponentScores, ConfigResult, DriftItem, EvalReport, GenerationConfig, GuardVerdict,
    LengthStats, Metric, ObjectiveWeights, PerBeatScore, Repro, StorySpec, TuningAction,
    TuningSuggestion, PASS_THRESHOLD,
};

use crate::guard::Guard;
use crate::metrics::{
    cadence, coherence, formfit, freshness, motif_coverage, stylefit, CadenceDetail,
    CoherenceDetail, FormfitDetail, MotifDetail, StylefitDetail,
};

const RULE_STYLE_SHARE: f64 = 0.4;
const LLM_STYLE_SHARE: f64 = 0.6;

/// Sub-scores under this value raise flags and suggestions.
const WEAK: f64 = 0.7;
const LOW_OVERALL: f64 = 0.6;
const BEAT_DRIFT_WORDS: i64 = 50;

#[derive(Debug, Clone, TypedBuilder)]
pub struct EvalInput<'a> {
    pub candidate_id: &'a str,
    pub text: &'a str,
    /// Per-beat texts in story spec order, when they still line up with
    /// the final text.
    #[builder(default)]
    pub beat_texts: Option<&'a [String]>,
    /// Model-judged style score in [0, 1].
    #[builder(default)]
    pub llm_stylefit: Option<f64>,
    #[builder(default)]
    pub repro: Option<Repro>,
}

/// Every sub-metric's diagnostics, for artifacts and debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDetails {
    pub stylefit: StylefitDetail,
    pub formfit: FormfitDetail,
    pub coherence: CoherenceDetail,
    pub motif: MotifDetail,
    pub cadence: CadenceDetail,
}

/// Evaluator bound to one story spec, config and optional exemplar.
pub struct Evaluator<'a> {
    spec: &'a StorySpec,
    config: &'a GenerationConfig,
    guard: Option<&'a Guard>,
    weights: ObjectiveWeights,
    config_hash: String,
}

impl<'a> Evaluator<'a> {
    /// Fails only on invalid objective weights.
    pub fn new(
        spec: &'a StorySpec,
        config: &'a GenerationConfig,
        guard: Option<&'a Guard>,
    ) -> ConfigResult<Self> {
        Ok(Self {
            spec,
            config,
            guard,
            weights: config.weights.normalized()?,
            config_hash: config.config_hash(),
        })
    }

    pub fn evaluate(&self, input: &EvalInput<'_>) -> EvalReport {
        self.evaluate_detailed(input).0
    }

    pub fn evaluate_detailed(&self, input: &EvalInput<'_>) -> (EvalReport, MetricDetails) {
        let text = input.text;
        let spec = self.spec;

        let verdict = match self.guard {
            Some(guard) => guard.check(text),
            None => GuardVerdict::clear(),
        };

        let style = stylefit(text, spec);
        let form = formfit(text, spec, input.beat_texts, self.config.length_tolerance);
        let coh = coherence(text);
        let motif = motif_coverage(text, spec);
        let pace = cadence(text, spec);

        let stylefit_score = match input.llm_stylefit {
            Some(llm) => RULE_STYLE_SHARE * style.score + LLM_STYLE_SHARE * clamp_unit(llm),
            None => style.score,
        };

        let scores = ComponentScores {
            stylefit: clamp_unit(stylefit_score),
            formfit: form.score,
            coherence: coh.score,
            freshness: freshness(&verdict),
            cadence: pace.score,
            motif_coverage: motif.score,
            dialogue_balance: style.dialogue,
        };

        let overall = overall_score(&scores, &self.weights);
        let per_beat = per_beat_scores(&form);

        let details = MetricDetails {
            stylefit: style,
            formfit: form,
            coherence: coh,
            motif,
            cadence: pace,
        };

        let red_flags = red_flags(spec, &verdict, &details, overall);
        let drift = drift_items(spec, text, &details);
        let tuning_suggestions = tuning_suggestions(spec, &details, &per_beat, &scores, overall);

        debug!(
            candidate = input.candidate_id,
            overall,
            guard_passed = verdict.passed,
            "candidate scored"
        );

        let report = EvalReport {
            candidate_id: input.candidate_id.to_string(),
            overall,
            pass_fail: passes(&verdict, overall),
            scores,
            guard: verdict,
            per_beat,
            red_flags,
            drift,
            tuning_suggestions,
            length: LengthStats {
                words: word_count(text),
                paragraphs: paragraphs(text).len(),
            },
            config_hash: self.config_hash.clone(),
            repro: input.repro.clone(),
        };
        (report, details)
    }
}

/// Convenience entry point for one-off evaluation.
pub fn evaluate(
    text: &str,
    spec: &StorySpec,
    config: &GenerationConfig,
    exemplar: Option<&str>,
) -> ConfigResult<EvalReport> {
    let guard = exemplar.map(|e| Guard::new(e, (&spec.constraints.anti_plagiarism).into()));
    let evaluator = Evaluator::new(spec, config, guard.as_ref())?;
    Ok(evaluator.evaluate(&EvalInput::builder().candidate_id("adhoc").text(text).build()))
}

/// Weighted sum over the objective metrics. `weights` must already be
/// normalized.
pub fn overall_score(scores: &ComponentScores, weights: &ObjectiveWeights) -> f64 {
    let total: f64 = Metric::ALL
        .iter()
        .map(|m| weights.get(*m) * clamp_unit(scores.get(*m)))
        .sum();
    clamp_unit(total)
}

fn per_beat_scores(form: &FormfitDetail) -> Vec<PerBeatScore> {
    form.beats
        .iter()
        .map(|b| {
            let mut notes = Vec::new();
            if b.length_score < WEAK {
                notes.push(format!(
                    "{} words against a target of {}",
                    b.actual_words, b.target_words
                ));
            }
            if b.function_score < WEAK {
                notes.push(format!("weak '{}' signal", b.function));
            }
            PerBeatScore {
                beat_id: b.beat_id.clone(),
                target_words: b.target_words,
                actual_words: b.actual_words,
                length_score: b.length_score,
                function_score: b.function_score,
                stylefit: (b.length_score + b.function_score) / 2.0,
                formfit: b.length_score,
                notes,
            }
        })
        .collect()
}

fn red_flags(
    spec: &StorySpec,
    verdict: &GuardVerdict,
    details: &MetricDetails,
    overall: f64,
) -> Vec<String> {
    let mut flags: Vec<String> = verdict
        .violations
        .iter()
        .map(|v| format!("Guard: {v}"))
        .collect();

    let style = &details.stylefit;
    if style.person < WEAK {
        flags.push(format!(
            "POV drift detected (expected {} person)",
            spec.voice.person.as_str()
        ));
    }
    if style.tense < WEAK {
        flags.push(format!(
            "Tense drift detected (expected {})",
            spec.voice.tense.as_str()
        ));
    }
    if style.dialogue < WEAK {
        flags.push(format!(
            "Dialogue ratio {:.2} far from target {:.2}",
            style.dialogue_ratio, spec.form.dialogue_ratio
        ));
    }
    if style.profanity_found {
        flags.push("Profanity present while the voice disallows it".to_string());
    }
    if details.formfit.beat_count_mismatch {
        flags.push("Text has fewer paragraphs than the form has beats".to_string());
    }
    flags.extend(details.coherence.issues.iter().cloned());
    if !details.motif.motifs.missing.is_empty() && details.motif.score < LOW_OVERALL {
        flags.push(format!(
            "Motifs missing: {}",
            details.motif.motifs.missing.join(", ")
        ));
    }
    if overall < PASS_THRESHOLD {
        flags.push(format!("Overall score {overall:.3} below pass threshold"));
    }
    flags
}

fn drift_items(spec: &StorySpec, text: &str, details: &MetricDetails) -> Vec<DriftItem> {
    let mut drift = vec![DriftItem::new(
        "form.dialogue_ratio",
        spec.form.dialogue_ratio,
        details.stylefit.dialogue_ratio,
    )];

    if details.stylefit.avg_sentence_len > 0.0 {
        drift.push(DriftItem::new(
            "voice.syntax.avg_sentence_len",
            spec.voice.syntax.avg_sentence_len,
            details.stylefit.avg_sentence_len,
        ));
    }

    drift.push(DriftItem::new(
        "form.scene_ratio.scene",
        spec.form.scene_ratio.scene,
        details.formfit.scene_ratio,
    ));

    let target_total = spec.form.total_target_words();
    if target_total > 0 {
        drift.push(DriftItem::new(
            "form.total_words",
            target_total as f64,
            word_count(text) as f64,
        ));
    }
    drift
}

fn tuning_suggestions(
    spec: &StorySpec,
    details: &MetricDetails,
    per_beat: &[PerBeatScore],
    scores: &ComponentScores,
    overall: f64,
) -> Vec<TuningSuggestion> {
    let mut out = Vec::new();

    for beat in per_beat {
        let delta = beat.word_delta();
        if beat.length_score < WEAK && beat.formfit < WEAK && delta.abs() > BEAT_DRIFT_WORDS {
            // The target is a lever: an overshooting beat gets a lower target.
            let action = if delta > 0 {
                TuningAction::Decrease
            } else {
                TuningAction::Increase
            };
            out.push(TuningSuggestion {
                param: format!("form.beats.{}.target_words", beat.beat_id),
                action,
                by: delta.unsigned_abs() as f64 * 0.5,
                reason: format!(
                    "beat ran {} words against a target of {}",
                    beat.actual_words, beat.target_words
                ),
            });
        }
    }

    let style = &details.stylefit;
    if style.sentence_length < WEAK && style.avg_sentence_len > 0.0 {
        let short = style.avg_sentence_len < spec.voice.syntax.avg_sentence_len;
        out.push(TuningSuggestion {
            param: "voice.syntax.avg_sentence_len".into(),
            action: if short {
                TuningAction::Increase
            } else {
                TuningAction::Decrease
            },
            by: 2.0,
            reason: format!(
                "sentences average {:.1} words against a target of {:.1}",
                style.avg_sentence_len, spec.voice.syntax.avg_sentence_len
            ),
        });
    }

    if style.dialogue < WEAK {
        let delta = style.dialogue_ratio - spec.form.dialogue_ratio;
        out.push(TuningSuggestion {
            param: "form.dialogue_ratio".into(),
            action: if delta > 0.0 {
                TuningAction::Decrease
            } else {
                TuningAction::Increase
            },
            by: (delta.abs() / 2.0).min(0.1),
            reason: format!(
                "dialogue share {:.2} against a target of {:.2}",
                style.dialogue_ratio, spec.form.dialogue_ratio
            ),
        });
    }

    if scores.freshness < LOW_OVERALL {
        out.push(TuningSuggestion {
            param: "generation.temperature".into(),
            action: TuningAction::Increase,
            by: 0.05,
            reason: "guard violations; sample more freely to move away from the exemplar".into(),
        });
    } else if overall < LOW_OVERALL {
        out.push(TuningSuggestion {
            param: "generation.temperature".into(),
            action: TuningAction::Decrease,
            by: 0.1,
            reason: format!("overall {overall:.3} is low; tighten sampling"),
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_common::Beat;

    fn spec_with_beats() -> StorySpec {
        let mut spec = StorySpec::default();
        spec.form.beats = vec![Beat::new("b1", "hook", 40), Beat::new("b2", "resolution", 40)];
        spec
    }

    fn all_scores(v: f64) -> ComponentScores {
        ComponentScores {
            stylefit: v,
            formfit: v,
            coherence: v,
            freshness: v,
            cadence: v,
            motif_coverage: v,
            dialogue_balance: v,
        }
    }

    #[test]
    fn overall_stays_in_unit_range() {
        let weights = ObjectiveWeights::default().normalized().unwrap();
        for v in [0.0, 0.25, 0.5, 1.0] {
            let overall = overall_score(&all_scores(v), &weights);
            assert!((overall - v).abs() < 1e-9);
        }
    }

    #[test]
    fn overall_uses_renormalized_weights() {
        let weights = ObjectiveWeights {
            stylefit: 2.0,
            formfit: 0.0,
            coherence: 0.0,
            freshness: 0.0,
            cadence: 2.0,
        }
        .normalized()
        .unwrap();
        let mut scores = all_scores(0.0);
        scores.stylefit = 1.0;
        assert!((overall_score(&scores, &weights) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn identical_text_gets_low_freshness_and_fails() {
        let text = "I remember the harbor at dawn, the gulls wheeling over the grey water \
            while my father untangled nets and hummed a song he never finished.";
        let report = evaluate(text, &spec_with_beats(), &GenerationConfig::default(), Some(text))
            .unwrap();
        assert!(!report.guard.passed);
        assert!((report.scores.freshness - 0.1).abs() < 1e-12);
        assert!(!report.pass_fail);
        assert!(report.red_flags.iter().any(|f| f.starts_with("Guard:")));
    }

    #[test]
    fn pass_fail_follows_guard_and_threshold() {
        let spec = spec_with_beats();
        let config = GenerationConfig::default();
        for text in ["", "I walked. I stopped.", "\"Hello,\" I said, and we began."] {
            let report = evaluate(text, &spec, &config, None).unwrap();
            assert_eq!(
                report.pass_fail,
                report.guard.passed && report.overall >= PASS_THRESHOLD
            );
            assert!((0.0..=1.0).contains(&report.overall));
        }
    }

    #[test]
    fn invalid_weights_are_rejected() {
        let mut config = GenerationConfig::default();
        config.weights.formfit = -1.0;
        assert!(evaluate("text", &StorySpec::default(), &config, None).is_err());
    }

    #[test]
    fn llm_style_score_is_blended() {
        let spec = StorySpec::default();
        let config = GenerationConfig::default();
        let evaluator = Evaluator::new(&spec, &config, None).unwrap();
        let text = "I walked to the pier and I waited.";

        let plain = evaluator.evaluate(&EvalInput::builder().candidate_id("c").text(text).build());
        let blended = evaluator.evaluate(
            &EvalInput::builder()
                .candidate_id("c")
                .text(text)
                .llm_stylefit(Some(1.0))
                .build(),
        );
        let expected = 0.4 * plain.scores.stylefit + 0.6;
        assert!((blended.scores.stylefit - expected).abs() < 1e-9);
    }

    #[test]
    fn long_beat_yields_decrease_suggestion() {
        let mut spec = StorySpec::default();
        spec.form.beats = vec![Beat::new("b1", "hook", 40)];
        let long_beat = vec!["stone"; 200].join(" ");
        let config = GenerationConfig::default();
        let evaluator = Evaluator::new(&spec, &config, None).unwrap();
        let report = evaluator.evaluate(
            &EvalInput::builder()
                .candidate_id("c")
                .text(&long_beat)
                .beat_texts(Some(std::slice::from_ref(&long_beat)))
                .build(),
        );
        let suggestion = report
            .tuning_suggestions
            .iter()
            .find(|s| s.param == "form.beats.b1.target_words")
            .unwrap();
        assert_eq!(suggestion.action, TuningAction::Decrease);
        assert_eq!(suggestion.by, 80.0);
        assert_eq!(report.per_beat[0].actual_words, 200);
    }

    #[test]
    fn drift_reports_dialogue_ratio() {
        let report = evaluate(
            "\"Go,\" she said. \"Now,\" he said.",
            &StorySpec::default(),
            &GenerationConfig::default(),
            None,
        )
        .unwrap();
        let drift = report
            .drift
            .iter()
            .find(|d| d.field == "form.dialogue_ratio")
            .unwrap();
        assert_eq!(drift.target, 0.25);
        assert!(drift.actual > 0.25);
        assert!(drift.delta > 0.0);
    }
}
