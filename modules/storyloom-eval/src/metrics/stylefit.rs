//! Voice match: person, tense, sentence length, clause linking, dialogue
//! share and profanity policy.

use serde::{Deserialize, Serialize};

use storyloom_common::profanity::contains_profanity;
use storyloom_common::spec::{Person, Tense};
use storyloom_common::text::{band_score, relative_deviation, sentences, word_count};
use storyloom_common::StorySpec;

use super::lexicon::{
    COORDINATING, FIRST_PERSON, FUTURE_MARKERS, PAST_MARKERS, PRESENT_MARKERS, QUOTED,
    SECOND_PERSON, SUBORDINATING, THIRD_PERSON,
};

const WEIGHT_PERSON: f64 = 0.20;
const WEIGHT_TENSE: f64 = 0.15;
const WEIGHT_SENTENCE: f64 = 0.25;
const WEIGHT_PARATAXIS: f64 = 0.15;
const WEIGHT_DIALOGUE: f64 = 0.15;
const WEIGHT_CLEAN: f64 = 0.10;

const NEUTRAL: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StylefitDetail {
    pub score: f64,
    pub person: f64,
    pub tense: f64,
    pub sentence_length: f64,
    pub parataxis: f64,
    pub dialogue: f64,
    pub clean_mode: f64,
    pub avg_sentence_len: f64,
    pub parataxis_ratio: f64,
    pub dialogue_ratio: f64,
    pub profanity_found: bool,
}

pub fn stylefit(text: &str, spec: &StorySpec) -> StylefitDetail {
    let voice = &spec.voice;

    let person = person_score(text, voice.person);
    let tense = tense_score(text, voice.tense);

    let avg_sentence_len = average_sentence_length(text);
    let sentence_length = sentence_length_score(avg_sentence_len, voice.syntax.avg_sentence_len);

    let parataxis_ratio = parataxis_ratio(text);
    let parataxis = match parataxis_ratio {
        Some(r) => band_score(r - voice.syntax.parataxis_vs_hypotaxis, 0.2, 0.3, 3.0),
        None => NEUTRAL,
    };

    let dialogue_ratio = dialogue_ratio(text);
    let dialogue = band_score(dialogue_ratio - spec.form.dialogue_ratio, 0.1, 0.2, 5.0);

    let profanity_found = !voice.profanity.allowed && contains_profanity(text);
    let clean_mode = if profanity_found { 0.0 } else { 1.0 };

    let score = WEIGHT_PERSON * person
        + WEIGHT_TENSE * tense
        + WEIGHT_SENTENCE * sentence_length
        + WEIGHT_PARATAXIS * parataxis
        + WEIGHT_DIALOGUE * dialogue
        + WEIGHT_CLEAN * clean_mode;

    StylefitDetail {
        score: score.clamp(0.0, 1.0),
        person,
        tense,
        sentence_length,
        parataxis,
        dialogue,
        clean_mode,
        avg_sentence_len,
        parataxis_ratio: parataxis_ratio.unwrap_or(NEUTRAL),
        dialogue_ratio,
        profanity_found,
    }
}

/// Share of person markers belonging to the expected person, boosted so a
/// clear majority scores 1.0.
pub fn person_score(text: &str, person: Person) -> f64 {
    let first = FIRST_PERSON.find_iter(text).count();
    let second = SECOND_PERSON.find_iter(text).count();
    let third = THIRD_PERSON.find_iter(text).count();
    let total = first + second + third;
    if total == 0 {
        return NEUTRAL;
    }
    let expected = match person {
        Person::First => first,
        Person::Second => second,
        Person::ThirdLimited | Person::ThirdOmniscient => third,
    };
    (expected as f64 / total as f64 * 1.5).min(1.0)
}

pub fn tense_score(text: &str, tense: Tense) -> f64 {
    let past = PAST_MARKERS.find_iter(text).count();
    let present = PRESENT_MARKERS.find_iter(text).count();
    let future = FUTURE_MARKERS.find_iter(text).count();
    let total = past + present + future;
    if total == 0 {
        return NEUTRAL;
    }
    let expected = match tense {
        Tense::Past => past,
        Tense::Present => present,
        Tense::Future => future,
    };
    (expected as f64 / total as f64 * 1.3).min(1.0)
}

pub fn average_sentence_length(text: &str) -> f64 {
    let lengths: Vec<usize> = sentences(text).iter().map(|s| word_count(s)).collect();
    if lengths.is_empty() {
        return 0.0;
    }
    lengths.iter().sum::<usize>() as f64 / lengths.len() as f64
}

pub fn sentence_length_score(actual: f64, target: f64) -> f64 {
    if actual <= 0.0 {
        return 0.0;
    }
    match relative_deviation(actual, target) {
        Some(dev) => band_score(dev, 0.3, 0.3, 5.0),
        None => NEUTRAL,
    }
}

/// Coordination share damped by comma density. `None` without conjunctions.
pub fn parataxis_ratio(text: &str) -> Option<f64> {
    let coordinating = COORDINATING.find_iter(text).count();
    let subordinating = SUBORDINATING.find_iter(text).count();
    let total = coordinating + subordinating;
    if total == 0 {
        return None;
    }
    let sentence_count = sentences(text).len().max(1);
    let comma_density = text.matches(',').count() as f64 / sentence_count as f64;
    let coord_ratio = coordinating as f64 / total as f64;
    Some(coord_ratio * (1.0 - (comma_density / 3.0).min(1.0)))
}

/// Fraction of words inside double quotes.
pub fn dialogue_ratio(text: &str) -> f64 {
    let total = word_count(text);
    if total == 0 {
        return 0.0;
    }
    let quoted: usize = QUOTED.find_iter(text).map(|m| word_count(m.as_str())).sum();
    (quoted as f64 / total as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> StorySpec {
        StorySpec::default()
    }

    #[test]
    fn first_person_text_scores_high_on_person() {
        let text = "I walked to the harbor. My coat was wet and I kept my hands in my pockets.";
        assert_eq!(person_score(text, Person::First), 1.0);
        assert!(person_score(text, Person::ThirdLimited) < 0.5);
    }

    #[test]
    fn no_markers_is_neutral() {
        assert_eq!(person_score("Rain. Wind. Salt.", Person::First), 0.5);
        assert_eq!(tense_score("Rain. Wind. Salt.", Tense::Past), 0.5);
    }

    #[test]
    fn past_tense_detection() {
        let text = "She walked home and opened the door. It was late.";
        assert_eq!(tense_score(text, Tense::Past), 1.0);
        assert!(tense_score(text, Tense::Present) < 0.5);
    }

    #[test]
    fn sentence_length_on_target_is_perfect() {
        assert_eq!(sentence_length_score(15.0, 15.0), 1.0);
        assert_eq!(sentence_length_score(0.0, 15.0), 0.0);
        let inside = sentence_length_score(18.0, 15.0);
        assert!(inside < 1.0 && inside >= 0.7);
        assert!(sentence_length_score(40.0, 15.0) < 0.1);
    }

    #[test]
    fn dialogue_ratio_counts_quoted_words() {
        let text = "\"Come here now,\" she said quietly to him.";
        let ratio = dialogue_ratio(text);
        assert!((ratio - 3.0 / 8.0).abs() < 1e-9);
        assert_eq!(dialogue_ratio(""), 0.0);
    }

    #[test]
    fn parataxis_needs_conjunctions() {
        assert!(parataxis_ratio("Rain fell. Wind rose.").is_none());
        let ratio = parataxis_ratio("Rain fell and wind rose and we ran.").unwrap();
        assert_eq!(ratio, 1.0);
    }

    #[test]
    fn profanity_zeroes_clean_mode() {
        let detail = stylefit("I said damn it and left.", &spec());
        assert!(detail.profanity_found);
        assert_eq!(detail.clean_mode, 0.0);

        let mut permissive = spec();
        permissive.voice.profanity.allowed = true;
        assert_eq!(stylefit("I said damn it and left.", &permissive).clean_mode, 1.0);
    }

    #[test]
    fn empty_text_degrades_gracefully() {
        let detail = stylefit("", &spec());
        assert!((0.0..=1.0).contains(&detail.score));
        assert_eq!(detail.sentence_length, 0.0);
        assert_eq!(detail.person, 0.5);
    }
}
