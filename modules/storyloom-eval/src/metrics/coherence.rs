//! Entity coherence from capitalized spans.
//!
//! Names are proper-noun runs that do not open a sentence. Penalties: two
//! different names sharing a first word close together (likely aliasing
//! confusion), and names whose mentions bunch into a narrow window. Major
//! names introduced late cost a multiplicative factor.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use storyloom_common::text::sentences;

use super::lexicon::ENTITY_STOPLIST;

const ALIAS_WINDOW: usize = 5;
const ALIAS_PENALTY: f64 = 0.1;
const SPIKE_MIN_MENTIONS: usize = 10;
const SPIKE_PENALTY: f64 = 0.15;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityMentions {
    pub mentions: usize,
    /// Word offsets into the text.
    pub positions: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoherenceDetail {
    pub score: f64,
    pub entities: BTreeMap<String, EntityMentions>,
    pub alias_penalty: f64,
    pub spike_penalty: f64,
    pub introduction: f64,
    pub issues: Vec<String>,
}

pub fn coherence(text: &str) -> CoherenceDetail {
    let (entities, total_words) = extract_entities(text);
    let mut issues = Vec::new();

    let alias_penalty = aliasing_penalty(&entities, &mut issues);
    let spike_penalty = name_spike_penalty(&entities, &mut issues);
    let introduction = introduction_score(&entities, total_words);

    let score = ((1.0 - alias_penalty - spike_penalty) * introduction).clamp(0.0, 1.0);

    CoherenceDetail {
        score,
        entities,
        alias_penalty,
        spike_penalty,
        introduction,
        issues,
    }
}

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

fn is_capitalized(word: &str) -> bool {
    word.chars().next().is_some_and(char::is_uppercase)
        && !ENTITY_STOPLIST.contains(&word)
}

/// Capitalized runs that do not start a sentence, keyed by full span.
pub fn extract_entities(text: &str) -> (BTreeMap<String, EntityMentions>, usize) {
    let mut entities: BTreeMap<String, EntityMentions> = BTreeMap::new();
    let mut offset = 0usize;

    for sentence in sentences(text) {
        let words: Vec<&str> = sentence.split_whitespace().collect();
        let mut span: Vec<&str> = Vec::new();
        let mut span_start = 0usize;

        let mut flush = |span: &mut Vec<&str>, start: usize| {
            if !span.is_empty() {
                let entry = entities.entry(span.join(" ")).or_default();
                entry.mentions += 1;
                entry.positions.push(start);
                span.clear();
            }
        };

        for (i, raw) in words.iter().enumerate() {
            let word = clean_word(raw);
            if i > 0 && !word.is_empty() && is_capitalized(word) {
                if span.is_empty() {
                    span_start = offset + i;
                }
                span.push(word);
                // Trailing punctuation closes the span.
                if raw.ends_with([',', ';', ':', '"', '\'']) {
                    flush(&mut span, span_start);
                }
            } else {
                flush(&mut span, span_start);
            }
        }
        flush(&mut span, span_start);
        offset += words.len();
    }

    (entities, offset)
}

fn aliasing_penalty(entities: &BTreeMap<String, EntityMentions>, issues: &mut Vec<String>) -> f64 {
    let mut by_alias: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in entities.keys() {
        let alias = name.split(' ').next().unwrap_or(name);
        by_alias.entry(alias).or_default().push(name);
    }

    let mut penalty = 0.0;
    for names in by_alias.values().filter(|names| names.len() > 1) {
        let mut close_pairs = 0usize;
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                let pa = &entities[*a].positions;
                let pb = &entities[*b].positions;
                close_pairs += pa
                    .iter()
                    .flat_map(|x| pb.iter().map(move |y| x.abs_diff(*y)))
                    .filter(|d| *d <= ALIAS_WINDOW)
                    .count();
            }
        }
        if close_pairs > 0 {
            penalty += ALIAS_PENALTY * close_pairs as f64;
            issues.push(format!(
                "Potential aliasing confusion: {}",
                names.join(" / ")
            ));
        }
    }
    penalty.min(1.0)
}

fn name_spike_penalty(
    entities: &BTreeMap<String, EntityMentions>,
    issues: &mut Vec<String>,
) -> f64 {
    let mut penalty = 0.0;
    for (name, e) in entities {
        if e.mentions < SPIKE_MIN_MENTIONS {
            continue;
        }
        let (Some(first), Some(last)) = (e.positions.first(), e.positions.last()) else {
            continue;
        };
        let span = last - first;
        if span < 2 * e.mentions {
            penalty += SPIKE_PENALTY;
            issues.push(format!(
                "Name spike: {name} mentioned {} times within {span} words",
                e.mentions
            ));
        }
    }
    penalty
}

/// Fraction of major entities (top half by mentions) first seen in the
/// opening third of the text.
fn introduction_score(entities: &BTreeMap<String, EntityMentions>, total_words: usize) -> f64 {
    if entities.is_empty() {
        return 1.0;
    }
    let mut ranked: Vec<(&String, &EntityMentions)> = entities.iter().collect();
    ranked.sort_by(|a, b| b.1.mentions.cmp(&a.1.mentions).then_with(|| a.0.cmp(b.0)));
    let majors = ranked.len().div_ceil(2);

    let cutoff = total_words / 3;
    let introduced: HashSet<&String> = ranked
        .iter()
        .take(majors)
        .filter(|(_, e)| e.positions.first().is_some_and(|p| *p <= cutoff))
        .map(|(name, _)| *name)
        .collect();

    introduced.len() as f64 / majors as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_non_initial_capitalized_spans() {
        let (entities, _) =
            extract_entities("Yesterday I met Anna Berg at the pier. Later Anna waved.");
        assert!(entities.contains_key("Anna Berg"));
        assert!(entities.contains_key("Anna"));
        assert!(!entities.contains_key("Yesterday"));
        assert!(!entities.contains_key("I"));
    }

    #[test]
    fn text_without_names_is_coherent() {
        let detail = coherence("the tide came in. the boats rose.");
        assert_eq!(detail.score, 1.0);
        assert!(detail.issues.is_empty());
    }

    #[test]
    fn close_aliases_are_penalized() {
        let detail = coherence("Then came Anna Berg, and Anna said nothing to Anna Lind.");
        assert!(detail.alias_penalty > 0.0);
        assert!(detail.issues[0].starts_with("Potential aliasing confusion"));
        assert!(detail.score < 1.0);
    }

    #[test]
    fn name_spike_is_flagged() {
        let text = std::iter::repeat("so Mara ran")
            .take(12)
            .collect::<Vec<_>>()
            .join(" ");
        let detail = coherence(&format!("{text}."));
        assert_eq!(detail.entities["Mara"].mentions, 12);
        assert_eq!(detail.spike_penalty, 0.0);

        let dense = std::iter::repeat("Mara")
            .take(12)
            .collect::<Vec<_>>()
            .join(" then ");
        let detail = coherence(&format!("Then {dense}."));
        assert!(detail.spike_penalty > 0.0);
    }

    #[test]
    fn late_introduction_lowers_score() {
        let filler = vec!["the wind moved"; 20].join(" ");
        let early = coherence(&format!("then Omar came. {filler}."));
        let late = coherence(&format!("{filler}. then Omar came."));
        assert_eq!(early.introduction, 1.0);
        assert_eq!(late.introduction, 0.0);
    }
}
