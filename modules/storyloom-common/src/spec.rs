//! The story spec: voice, form, content and constraints.
//!
//! A `StorySpec` is created once per story and cloned-and-mutated by the
//! optimizer between iterations. Every field has a serde default so partial
//! JSON files load cleanly; [`StorySpec::validate`] runs once after loading.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::profanity::PROFANITY_PLACEHOLDER;

// =============================================================================
// Enumerations
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Person {
    #[default]
    First,
    Second,
    #[serde(alias = "third")]
    ThirdLimited,
    ThirdOmniscient,
}

impl Person {
    pub fn is_third(self) -> bool {
        matches!(self, Person::ThirdLimited | Person::ThirdOmniscient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Person::First => "first",
            Person::Second => "second",
            Person::ThirdLimited => "third-limited",
            Person::ThirdOmniscient => "third-omniscient",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tense {
    #[default]
    Past,
    Present,
    Future,
}

impl Tense {
    pub fn as_str(self) -> &'static str {
        match self {
            Tense::Past => "past",
            Tense::Present => "present",
            Tense::Future => "future",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Distance {
    #[default]
    Intimate,
    Close,
    Medium,
    Far,
}

impl Distance {
    pub fn as_str(self) -> &'static str {
        match self {
            Distance::Intimate => "intimate",
            Distance::Close => "close",
            Distance::Medium => "medium",
            Distance::Far => "far",
        }
    }
}

/// Paragraph pacing label attached to each beat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    Short,
    #[default]
    Mixed,
    Long,
}

impl Cadence {
    /// Expected share of short / medium / long paragraphs.
    pub fn expected_mix(self) -> [f64; 3] {
        match self {
            Cadence::Short => [0.7, 0.2, 0.1],
            Cadence::Mixed => [0.3, 0.4, 0.3],
            Cadence::Long => [0.1, 0.2, 0.7],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Cadence::Short => "short",
            Cadence::Mixed => "mixed",
            Cadence::Long => "long",
        }
    }
}

// =============================================================================
// Voice
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Register {
    pub lyric: f64,
    pub deadpan: f64,
    pub irony: f64,
    pub tender: f64,
}

impl Default for Register {
    fn default() -> Self {
        Self {
            lyric: 0.3,
            deadpan: 0.7,
            irony: 0.5,
            tender: 0.6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Syntax {
    pub avg_sentence_len: f64,
    pub variance: f64,
    /// 1.0 is fully paratactic (coordinated clauses), 0.0 fully hypotactic.
    pub parataxis_vs_hypotaxis: f64,
    pub fragment_ok: bool,
}

impl Default for Syntax {
    fn default() -> Self {
        Self {
            avg_sentence_len: 15.0,
            variance: 0.6,
            parataxis_vs_hypotaxis: 0.7,
            fragment_ok: true,
        }
    }
}

impl Syntax {
    pub fn style_label(&self) -> &'static str {
        if self.parataxis_vs_hypotaxis > 0.7 {
            "paratactic (simple, coordinated clauses)"
        } else if self.parataxis_vs_hypotaxis < 0.3 {
            "hypotactic (complex, subordinated clauses)"
        } else {
            "balanced coordination and subordination"
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfanityPolicy {
    pub allowed: bool,
    pub substitution: String,
}

impl Default for ProfanityPolicy {
    fn default() -> Self {
        Self {
            allowed: false,
            substitution: PROFANITY_PLACEHOLDER.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Voice {
    pub person: Person,
    pub tense: Tense,
    pub distance: Distance,
    pub register: Register,
    pub syntax: Syntax,
    pub dialogue_style: String,
    pub profanity: ProfanityPolicy,
}

impl Default for Voice {
    fn default() -> Self {
        Self {
            person: Person::First,
            tense: Tense::Past,
            distance: Distance::Intimate,
            register: Register::default(),
            syntax: Syntax::default(),
            dialogue_style: "sparse, plain tags".to_string(),
            profanity: ProfanityPolicy::default(),
        }
    }
}

// =============================================================================
// Form
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: String,
    /// Narrative function: hook, inciting, rising, crisis, climax, falling,
    /// resolution, denouement, or free text.
    pub function: String,
    pub target_words: usize,
    #[serde(default)]
    pub cadence: Cadence,
    #[serde(default)]
    pub summary: String,
}

impl Beat {
    pub fn new(id: impl Into<String>, function: impl Into<String>, target_words: usize) -> Self {
        Self {
            id: id.into(),
            function: function.into(),
            target_words,
            cadence: Cadence::Mixed,
            summary: String::new(),
        }
    }

    pub fn with_cadence(mut self, cadence: Cadence) -> Self {
        self.cadence = cadence;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneRatio {
    pub scene: f64,
    pub summary: f64,
}

impl Default for SceneRatio {
    fn default() -> Self {
        Self {
            scene: 0.7,
            summary: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Paragraphing {
    pub avg_len_tokens: f64,
    /// Target coefficient of variation of paragraph lengths.
    pub variance: f64,
}

impl Default for Paragraphing {
    fn default() -> Self {
        Self {
            avg_len_tokens: 45.0,
            variance: 0.4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Form {
    pub beats: Vec<Beat>,
    pub dialogue_ratio: f64,
    pub scene_ratio: SceneRatio,
    pub paragraphing: Paragraphing,
}

impl Default for Form {
    fn default() -> Self {
        Self {
            beats: Vec::new(),
            dialogue_ratio: 0.25,
            scene_ratio: SceneRatio::default(),
            paragraphing: Paragraphing::default(),
        }
    }
}

impl Form {
    pub fn beat(&self, id: &str) -> Option<&Beat> {
        self.beats.iter().find(|b| b.id == id)
    }

    pub fn beat_mut(&mut self, id: &str) -> Option<&mut Beat> {
        self.beats.iter_mut().find(|b| b.id == id)
    }

    pub fn total_target_words(&self) -> usize {
        self.beats.iter().map(|b| b.target_words).sum()
    }
}

// =============================================================================
// Content
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Setting {
    pub place: String,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub goal: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Content {
    pub setting: Setting,
    pub characters: Vec<Character>,
    pub motifs: Vec<String>,
    pub imagery_palette: Vec<String>,
    pub props: Vec<String>,
}

// =============================================================================
// Constraints
// =============================================================================

/// Guard thresholds. The defaults must not change: prior artifacts were
/// judged against them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiPlagiarism {
    pub max_ngram: usize,
    pub overlap_pct: f64,
    pub simhash_hamming_min: u32,
}

impl Default for AntiPlagiarism {
    fn default() -> Self {
        Self {
            max_ngram: 12,
            overlap_pct: 0.03,
            simhash_hamming_min: 18,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LengthWords {
    pub min: usize,
    pub target: usize,
    pub max: usize,
}

impl Default for LengthWords {
    fn default() -> Self {
        Self {
            min: 1200,
            target: 2000,
            max: 2800,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    pub anti_plagiarism: AntiPlagiarism,
    pub length_words: LengthWords,
}

// =============================================================================
// StorySpec
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Meta {
    pub story_id: String,
    pub seed: u64,
    pub version: String,
}

impl Default for Meta {
    fn default() -> Self {
        Self {
            story_id: "story".to_string(),
            seed: 137,
            version: "1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorySpec {
    pub meta: Meta,
    pub voice: Voice,
    pub form: Form,
    pub content: Content,
    pub constraints: Constraints,
}

impl StorySpec {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Structural checks, run once after loading and after every mutation.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for beat in &self.form.beats {
            if beat.id.trim().is_empty() {
                return Err(ConfigError::invalid_value("form.beats.id", "beat id is empty"));
            }
            if !seen.insert(beat.id.as_str()) {
                return Err(ConfigError::invalid_value(
                    "form.beats.id",
                    format!("duplicate beat id '{}'", beat.id),
                ));
            }
        }

        check_unit("form.dialogue_ratio", self.form.dialogue_ratio)?;
        check_unit("form.scene_ratio.scene", self.form.scene_ratio.scene)?;
        check_unit(
            "voice.syntax.parataxis_vs_hypotaxis",
            self.voice.syntax.parataxis_vs_hypotaxis,
        )?;
        check_unit(
            "constraints.anti_plagiarism.overlap_pct",
            self.constraints.anti_plagiarism.overlap_pct,
        )?;

        if self.voice.syntax.avg_sentence_len <= 0.0 {
            return Err(ConfigError::invalid_value(
                "voice.syntax.avg_sentence_len",
                "must be positive",
            ));
        }
        if self.constraints.anti_plagiarism.max_ngram < 3 {
            return Err(ConfigError::invalid_value(
                "constraints.anti_plagiarism.max_ngram",
                "must be at least 3",
            ));
        }

        let len = &self.constraints.length_words;
        if !(len.min <= len.target && len.target <= len.max) {
            return Err(ConfigError::InvalidRange {
                field: "constraints.length_words".into(),
                min: len.min as f64,
                max: len.max as f64,
            });
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> ConfigResult<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::invalid_value(field, format!("{value} is outside [0, 1]")));
    }
    Ok(())
}
