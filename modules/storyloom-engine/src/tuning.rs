//! Between-iteration mutation heuristics.
//!
//! Driven entirely by the latest iteration's best [`EvalReport`]. Every step
//! is limited to 5-15% of the current value and clamped to sane bounds, so a
//! single noisy report cannot swing the story spec far.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use storyloom_common::config::{Metric, TEMPERATURE_CEILING, TEMPERATURE_FLOOR};
use storyloom_common::{EvalReport, GenerationConfig, StorySpec};

const MIN_STEP: f64 = 0.05;
const MAX_STEP: f64 = 0.15;

const SENTENCE_LEN_BOUNDS: (f64, f64) = (6.0, 40.0);
const DIALOGUE_BOUNDS: (f64, f64) = (0.0, 0.8);
const DIALOGUE_PIVOT: f64 = (DIALOGUE_BOUNDS.0 + DIALOGUE_BOUNDS.1) / 2.0;
const BEAT_WORD_BOUNDS: (f64, f64) = (30.0, 3000.0);
const TEMPERATURE_BOUNDS: (f64, f64) = (0.1, 1.3);

/// Dialogue drift below this is noise.
const DIALOGUE_DRIFT: f64 = 0.02;
const LOW_SCORE: f64 = 0.6;
const WEAK_BEAT: f64 = 0.7;
const FRESHNESS_NUDGE: f64 = 0.05;
const WEIGHT_BOOST: f64 = 1.1;

const SENTENCE_LEN: &str = "voice.syntax.avg_sentence_len";
const DIALOGUE_RATIO: &str = "form.dialogue_ratio";
const TEMPERATURE: &str = "generation.temperature";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub param: String,
    pub from: f64,
    pub to: f64,
    pub reason: String,
}

/// Step of at most `|requested|` in the requested direction, bounded to
/// 5-15% of `current` and never smaller than `min_unit`.
pub fn bounded_step(current: f64, requested: f64, min_unit: f64) -> f64 {
    if requested == 0.0 || !requested.is_finite() {
        return 0.0;
    }
    let lo = (current.abs() * MIN_STEP).max(min_unit);
    let hi = (current.abs() * MAX_STEP).max(lo);
    requested.abs().clamp(lo, hi) * requested.signum()
}

fn beat_id_of(param: &str) -> Option<&str> {
    param
        .strip_prefix("form.beats.")?
        .strip_suffix(".target_words")
}

/// Next iteration's story spec plus the changes made.
pub fn mutate_spec(spec: &StorySpec, report: &EvalReport) -> (StorySpec, Vec<Mutation>) {
    let mut next = spec.clone();
    let mut mutations = Vec::new();
    let mut touched: HashSet<String> = HashSet::new();

    for suggestion in &report.tuning_suggestions {
        let requested = suggestion.action.sign() * suggestion.by;
        let param = suggestion.param.as_str();
        let applied = if param == SENTENCE_LEN {
            nudge_sentence_len(&mut next, requested, &suggestion.reason)
        } else if param == DIALOGUE_RATIO {
            nudge_dialogue(&mut next, requested, &suggestion.reason)
        } else if let Some(beat_id) = beat_id_of(param) {
            nudge_beat(&mut next, beat_id, requested, &suggestion.reason)
        } else {
            None
        };
        if let Some(mutation) = applied {
            touched.insert(mutation.param.clone());
            mutations.push(mutation);
        }
    }

    // Dialogue drift or a weak balance score, when no suggestion already
    // moved it.
    if !touched.contains(DIALOGUE_RATIO) {
        let drift = report
            .drift
            .iter()
            .find(|d| d.field == DIALOGUE_RATIO)
            .filter(|d| d.delta.abs() > DIALOGUE_DRIFT);
        let balance = report.scores.dialogue_balance;
        let nudge = match drift {
            Some(drift) if balance < LOW_SCORE => Some((
                -drift.delta,
                format!("dialogue balance {balance:.2} is low"),
            )),
            Some(drift) => Some((-drift.delta, format!("dialogue drift {:+.3}", drift.delta))),
            // No measured direction: ease the target toward the middle of its range.
            None if balance < LOW_SCORE => {
                let toward = if next.form.dialogue_ratio < DIALOGUE_PIVOT { 1.0 } else { -1.0 };
                Some((
                    toward * (LOW_SCORE - balance),
                    format!("dialogue balance {balance:.2} is low"),
                ))
            }
            None => None,
        };
        if let Some((requested, reason)) = nudge {
            if let Some(m) = nudge_dialogue(&mut next, requested, &reason) {
                touched.insert(m.param.clone());
                mutations.push(m);
            }
        }
    }

    // Weak beats under a weak overall form.
    if report.scores.formfit < LOW_SCORE {
        for beat in &report.per_beat {
            let param = format!("form.beats.{}.target_words", beat.beat_id);
            if beat.formfit >= WEAK_BEAT || touched.contains(&param) {
                continue;
            }
            let delta = beat.word_delta();
            if delta == 0 {
                continue;
            }
            let reason = format!(
                "formfit {:.2} with beat formfit {:.2}",
                report.scores.formfit, beat.formfit
            );
            if let Some(m) = nudge_beat(&mut next, &beat.beat_id, -(delta as f64) * 0.5, &reason) {
                touched.insert(m.param.clone());
                mutations.push(m);
            }
        }
    }

    (next, mutations)
}

fn nudge_sentence_len(spec: &mut StorySpec, requested: f64, reason: &str) -> Option<Mutation> {
    let from = spec.voice.syntax.avg_sentence_len;
    let to = (from + bounded_step(from, requested, 0.5))
        .clamp(SENTENCE_LEN_BOUNDS.0, SENTENCE_LEN_BOUNDS.1);
    spec.voice.syntax.avg_sentence_len = to;
    changed(SENTENCE_LEN, from, to, reason)
}

fn nudge_dialogue(spec: &mut StorySpec, requested: f64, reason: &str) -> Option<Mutation> {
    let from = spec.form.dialogue_ratio;
    let to = (from + bounded_step(from, requested, 0.01)).clamp(DIALOGUE_BOUNDS.0, DIALOGUE_BOUNDS.1);
    spec.form.dialogue_ratio = to;
    changed(DIALOGUE_RATIO, from, to, reason)
}

fn nudge_beat(
    spec: &mut StorySpec,
    beat_id: &str,
    requested: f64,
    reason: &str,
) -> Option<Mutation> {
    let beat = spec.form.beat_mut(beat_id)?;
    let from = beat.target_words as f64;
    let to = (from + bounded_step(from, requested, 5.0))
        .round()
        .clamp(BEAT_WORD_BOUNDS.0, BEAT_WORD_BOUNDS.1);
    beat.target_words = to as usize;
    changed(&format!("form.beats.{beat_id}.target_words"), from, to, reason)
}

fn changed(param: &str, from: f64, to: f64, reason: &str) -> Option<Mutation> {
    ((to - from).abs() > f64::EPSILON).then(|| Mutation {
        param: param.to_string(),
        from,
        to,
        reason: reason.to_string(),
    })
}

/// Next iteration's generation config plus the changes made.
pub fn mutate_config(config: &GenerationConfig, report: &EvalReport) -> (GenerationConfig, Vec<Mutation>) {
    let mut next = config.clone();
    let mut mutations = Vec::new();

    let suggested = report
        .tuning_suggestions
        .iter()
        .find(|s| s.param == TEMPERATURE)
        .map(|s| (s.action.sign() * s.by, s.reason.clone()));
    let shift = suggested.or_else(|| {
        (report.scores.freshness < LOW_SCORE).then(|| {
            (
                FRESHNESS_NUDGE,
                format!("freshness {:.2} is low", report.scores.freshness),
            )
        })
    });

    if let Some((by, reason)) = shift {
        let floor = TEMPERATURE_BOUNDS.0.max(TEMPERATURE_FLOOR);
        let ceiling = TEMPERATURE_BOUNDS.1.min(TEMPERATURE_CEILING);
        let from = config.temperature;
        let to = from.shifted(by, floor, ceiling);
        next.temperature = to;
        mutations.extend(changed("generation.temperature.min", from.min, to.min, &reason));
        mutations.extend(changed("generation.temperature.max", from.max, to.max, &reason));
    }

    let weak: Vec<Metric> = Metric::ALL
        .into_iter()
        .filter(|m| report.scores.get(*m) < LOW_SCORE)
        .collect();
    if !weak.is_empty() {
        let mut boosted = config.weights.clone();
        for metric in &weak {
            *boosted.get_mut(*metric) *= WEIGHT_BOOST;
        }
        if let Ok(normalized) = boosted.normalized() {
            for metric in &weak {
                mutations.extend(changed(
                    &format!("generation.weights.{metric}"),
                    config.weights.get(*metric),
                    normalized.get(*metric),
                    &format!("{metric} scored {:.2}", report.scores.get(*metric)),
                ));
            }
            next.weights = normalized;
        }
    }

    (next, mutations)
}
