//! Structural adherence: per-beat length, narrative-function signal and
//! scene/summary balance.

use serde::{Deserialize, Serialize};

use storyloom_common::text::{band_score, mean, paragraphs, relative_deviation, word_count};
use storyloom_common::{Beat, StorySpec};

use super::lexicon::function_pattern;

const WEIGHT_LENGTH: f64 = 0.40;
const WEIGHT_FUNCTION: f64 = 0.35;
const WEIGHT_SCENE: f64 = 0.25;

/// Score used for every beat when the text cannot be split into beats.
const MISMATCH_SCORE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeatFit {
    pub beat_id: String,
    pub function: String,
    pub target_words: usize,
    pub actual_words: usize,
    pub length_score: f64,
    pub function_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormfitDetail {
    pub score: f64,
    pub length: f64,
    pub function: f64,
    pub scene: f64,
    pub scene_ratio: f64,
    pub beat_count_mismatch: bool,
    pub beats: Vec<BeatFit>,
}

/// Score the text's form.
///
/// When `beat_texts` lines up with the story spec's beats it is used
/// directly; otherwise paragraphs are divided evenly across beats.
pub fn formfit(
    text: &str,
    spec: &StorySpec,
    beat_texts: Option<&[String]>,
    tolerance: f64,
) -> FormfitDetail {
    let beats = &spec.form.beats;

    let segments: Option<Vec<String>> = match beat_texts {
        Some(texts) if texts.len() == beats.len() => Some(texts.to_vec()),
        _ => segment_by_paragraphs(text, beats.len()),
    };

    let (beat_fits, mismatch) = match segments {
        Some(segments) => (
            beats
                .iter()
                .zip(segments.iter())
                .map(|(beat, segment)| fit_beat(beat, segment, tolerance))
                .collect::<Vec<_>>(),
            false,
        ),
        None => (
            beats
                .iter()
                .map(|beat| BeatFit {
                    beat_id: beat.id.clone(),
                    function: beat.function.clone(),
                    target_words: beat.target_words,
                    actual_words: 0,
                    length_score: MISMATCH_SCORE,
                    function_score: MISMATCH_SCORE,
                })
                .collect(),
            !beats.is_empty(),
        ),
    };

    let (length, function) = if beat_fits.is_empty() {
        (0.5, 0.5)
    } else {
        (
            mean(&beat_fits.iter().map(|b| b.length_score).collect::<Vec<_>>()),
            mean(&beat_fits.iter().map(|b| b.function_score).collect::<Vec<_>>()),
        )
    };

    let scene_ratio = estimate_scene_ratio(text);
    let scene = band_score(scene_ratio - spec.form.scene_ratio.scene, 0.15, 0.2, 4.0);

    let score = WEIGHT_LENGTH * length + WEIGHT_FUNCTION * function + WEIGHT_SCENE * scene;

    FormfitDetail {
        score: score.clamp(0.0, 1.0),
        length,
        function,
        scene,
        scene_ratio,
        beat_count_mismatch: mismatch,
        beats: beat_fits,
    }
}

fn fit_beat(beat: &Beat, segment: &str, tolerance: f64) -> BeatFit {
    let actual_words = word_count(segment);
    BeatFit {
        beat_id: beat.id.clone(),
        function: beat.function.clone(),
        target_words: beat.target_words,
        actual_words,
        length_score: beat_length_score(actual_words, beat.target_words, tolerance),
        function_score: function_alignment(segment, &beat.function),
    }
}

pub fn beat_length_score(actual: usize, target: usize, tolerance: f64) -> f64 {
    match relative_deviation(actual as f64, target as f64) {
        Some(dev) => band_score(dev, tolerance, 0.2, 3.0),
        None => 0.5,
    }
}

/// Keyword evidence for a narrative function: two or more hits is full
/// marks, unknown functions are neutral.
pub fn function_alignment(text: &str, function: &str) -> f64 {
    let Some(pattern) = function_pattern(function) else {
        return 0.5;
    };
    match pattern.find_iter(text).count() {
        0 => 0.4,
        1 => 0.8,
        _ => 1.0,
    }
}

/// Split paragraphs into `count` groups of equal size, the last group taking
/// the remainder. `None` when there are fewer paragraphs than groups.
pub fn segment_by_paragraphs(text: &str, count: usize) -> Option<Vec<String>> {
    if count == 0 {
        return Some(Vec::new());
    }
    let paras = paragraphs(text);
    if paras.len() < count {
        return None;
    }
    let per = (paras.len() / count).max(1);
    let mut groups = Vec::with_capacity(count);
    for i in 0..count {
        let start = i * per;
        let end = if i + 1 == count { paras.len() } else { start + per };
        groups.push(paras[start..end].join("\n\n"));
    }
    Some(groups)
}

/// Share of paragraphs longer than the average paragraph; long paragraphs
/// read as dramatized scene, short ones as summary.
pub fn estimate_scene_ratio(text: &str) -> f64 {
    let lengths: Vec<f64> = paragraphs(text)
        .iter()
        .map(|p| word_count(p) as f64)
        .collect();
    if lengths.is_empty() {
        return 0.5;
    }
    let avg = mean(&lengths);
    lengths.iter().filter(|l| **l > avg).count() as f64 / lengths.len() as f64
}
