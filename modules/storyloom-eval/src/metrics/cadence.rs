//! Pacing: paragraph-length mix, paragraph variance and valence smoothness.

use serde::{Deserialize, Serialize};

use storyloom_common::spec::Cadence;
use storyloom_common::text::{band_score, coefficient_of_variation, paragraphs, tokenize, word_count};
use storyloom_common::StorySpec;

use super::lexicon::{NEGATIVE_WORDS, POSITIVE_WORDS};

const SHORT_PARAGRAPH: usize = 30;
const LONG_PARAGRAPH: usize = 60;

const WEIGHT_MIX: f64 = 0.4;
const WEIGHT_VARIANCE: f64 = 0.3;
const WEIGHT_VALENCE: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CadenceDetail {
    pub score: f64,
    pub mix_match: f64,
    pub variance_match: f64,
    pub valence_smoothness: f64,
    /// Observed share of short / medium / long paragraphs.
    pub observed_mix: [f64; 3],
    pub expected_mix: [f64; 3],
    pub paragraph_cv: f64,
}

pub fn cadence(text: &str, spec: &StorySpec) -> CadenceDetail {
    let paras = paragraphs(text);
    let expected_mix = expected_mix(spec);

    if paras.is_empty() {
        return CadenceDetail {
            score: 0.5,
            mix_match: 0.5,
            variance_match: 0.5,
            valence_smoothness: 0.5,
            observed_mix: [0.0; 3],
            expected_mix,
            paragraph_cv: 0.0,
        };
    }

    let lengths: Vec<usize> = paras.iter().map(|p| word_count(p)).collect();
    let observed_mix = bucket_mix(&lengths);
    let mix_match = 1.0
        - observed_mix
            .iter()
            .zip(expected_mix.iter())
            .map(|(o, e)| (o - e).abs())
            .sum::<f64>()
            / 2.0;

    let as_f64: Vec<f64> = lengths.iter().map(|l| *l as f64).collect();
    let paragraph_cv = coefficient_of_variation(&as_f64);
    let variance_match = band_score(
        paragraph_cv - spec.form.paragraphing.variance,
        0.2,
        0.3,
        3.0,
    );

    let valence_smoothness = valence_smoothness(&paras);

    let score =
        WEIGHT_MIX * mix_match + WEIGHT_VARIANCE * variance_match + WEIGHT_VALENCE * valence_smoothness;

    CadenceDetail {
        score: score.clamp(0.0, 1.0),
        mix_match: mix_match.clamp(0.0, 1.0),
        variance_match,
        valence_smoothness,
        observed_mix,
        expected_mix,
        paragraph_cv,
    }
}

/// Beat cadence mixes weighted by each beat's target length.
pub fn expected_mix(spec: &StorySpec) -> [f64; 3] {
    let total: usize = spec.form.total_target_words();
    if total == 0 {
        return Cadence::Mixed.expected_mix();
    }
    let mut mix = [0.0; 3];
    for beat in &spec.form.beats {
        let weight = beat.target_words as f64 / total as f64;
        for (slot, share) in mix.iter_mut().zip(beat.cadence.expected_mix()) {
            *slot += weight * share;
        }
    }
    mix
}

fn bucket_mix(lengths: &[usize]) -> [f64; 3] {
    let mut counts = [0usize; 3];
    for len in lengths {
        let bucket = if *len < SHORT_PARAGRAPH {
            0
        } else if *len > LONG_PARAGRAPH {
            2
        } else {
            1
        };
        counts[bucket] += 1;
    }
    let n = lengths.len().max(1) as f64;
    counts.map(|c| c as f64 / n)
}

/// Net sentiment in [-1, 1] from the word lists.
pub fn paragraph_valence(paragraph: &str) -> f64 {
    let (mut pos, mut neg) = (0usize, 0usize);
    for token in tokenize(paragraph) {
        if POSITIVE_WORDS.contains(token.as_str()) {
            pos += 1;
        } else if NEGATIVE_WORDS.contains(token.as_str()) {
            neg += 1;
        }
    }
    if pos + neg == 0 {
        return 0.0;
    }
    (pos as f64 - neg as f64) / (pos + neg) as f64
}

pub fn valence_smoothness(paras: &[&str]) -> f64 {
    if paras.len() < 2 {
        return 1.0;
    }
    let valences: Vec<f64> = paras.iter().map(|p| paragraph_valence(p)).collect();
    let deltas: Vec<f64> = valences.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let avg = deltas.iter().sum::<f64>() / deltas.len() as f64;
    (1.0 - avg / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_common::Beat;

    fn words(n: usize) -> String {
        vec!["stone"; n].join(" ")
    }

    #[test]
    fn expected_mix_weights_by_target_words() {
        let mut spec = StorySpec::default();
        spec.form.beats = vec![
            Beat::new("a", "hook", 100).with_cadence(Cadence::Short),
            Beat::new("b", "climax", 300).with_cadence(Cadence::Long),
        ];
        let mix = expected_mix(&spec);
        assert!((mix[0] - (0.25 * 0.7 + 0.75 * 0.1)).abs() < 1e-12);
        assert!((mix.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_beats_falls_back_to_mixed() {
        assert_eq!(expected_mix(&StorySpec::default()), Cadence::Mixed.expected_mix());
    }

    #[test]
    fn all_long_paragraphs_against_long_cadence() {
        let mut spec = StorySpec::default();
        spec.form.beats = vec![Beat::new("a", "hook", 100).with_cadence(Cadence::Long)];
        let text = vec![words(80); 4].join("\n\n");
        let detail = cadence(&text, &spec);
        assert_eq!(detail.observed_mix, [0.0, 0.0, 1.0]);
        assert!((detail.mix_match - 0.7).abs() < 1e-12);
    }

    #[test]
    fn valence_swings_reduce_smoothness() {
        let calm = valence_smoothness(&["good warm day", "kind gentle night"]);
        let swing = valence_smoothness(&["good warm day", "cruel cold night"]);
        assert_eq!(calm, 1.0);
        assert_eq!(swing, 0.0);
        assert_eq!(valence_smoothness(&["only one"]), 1.0);
    }

    #[test]
    fn empty_text_is_neutral() {
        let detail = cadence("", &StorySpec::default());
        assert_eq!(detail.score, 0.5);
    }
}
