//! Prompt templates for every completion call the engine makes.

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

use storyloom_common::{Beat, StorySpec};

use crate::config::PromptsSection;
use crate::template::{render, template_version, validate_template};

pub const BEAT_GENERATE: &str = "beat_generate";
pub const REPAIR_PASS: &str = "repair_pass";
pub const STYLEFIT_JUDGE: &str = "stylefit_judge";

const BEAT_VARS: &[&str] = &[
    "beat_id",
    "function",
    "summary",
    "target_words",
    "cadence",
    "person",
    "tense",
    "distance",
    "avg_sentence_len",
    "sentence_variance",
    "clause_style",
    "fragments",
    "lyric",
    "deadpan",
    "irony",
    "tender",
    "dialogue_ratio",
    "dialogue_style",
    "profanity",
    "place",
    "time",
    "characters",
    "motifs",
    "imagery",
    "props",
    "prior_context",
    "retry_hint",
];
const REPAIR_VARS: &[&str] = &[
    "violations",
    "person",
    "tense",
    "word_count",
    "max_ngram",
    "notes",
    "text",
];
const JUDGE_VARS: &[&str] = &[
    "person",
    "tense",
    "avg_sentence_len",
    "clause_style",
    "lyric",
    "deadpan",
    "irony",
    "tender",
    "text",
];

/// A loaded template and the version parsed from its marker.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    pub name: &'static str,
    pub version: String,
    body: String,
}

impl PromptTemplate {
    fn new(name: &'static str, body: String, allowed: &[&str]) -> Result<Self> {
        if body.trim().is_empty() {
            bail!("Prompt template is empty: {name}");
        }
        validate_template(&body, allowed)
            .with_context(|| format!("Template validation failed for {name} prompt"))?;
        Ok(Self {
            name,
            version: template_version(&body),
            body,
        })
    }

    fn render(&self, vars: &HashMap<&str, String>) -> RenderedPrompt {
        RenderedPrompt {
            component: self.name,
            version: self.version.clone(),
            text: render(&self.body, vars),
        }
    }
}

/// A prompt ready to send, tagged for cache keys and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub component: &'static str,
    pub version: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct PromptRegistry {
    beat_generate: PromptTemplate,
    repair_pass: PromptTemplate,
    stylefit_judge: PromptTemplate,
}

impl PromptRegistry {
    /// Templates compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Ok(Self {
            beat_generate: PromptTemplate::new(
                BEAT_GENERATE,
                include_str!("../prompts/beat_generate.md").to_string(),
                BEAT_VARS,
            )?,
            repair_pass: PromptTemplate::new(
                REPAIR_PASS,
                include_str!("../prompts/repair_pass.md").to_string(),
                REPAIR_VARS,
            )?,
            stylefit_judge: PromptTemplate::new(
                STYLEFIT_JUDGE,
                include_str!("../prompts/stylefit_judge.md").to_string(),
                JUDGE_VARS,
            )?,
        })
    }

    /// Built-in templates with any file overrides named in `[prompts]`,
    /// resolved relative to `config_dir`.
    pub fn load(section: &PromptsSection, config_dir: &Path) -> Result<Self> {
        let mut registry = Self::builtin()?;
        if let Some(path) = &section.beat_generate {
            registry.beat_generate = load_file(BEAT_GENERATE, path, config_dir, BEAT_VARS)?;
        }
        if let Some(path) = &section.repair_pass {
            registry.repair_pass = load_file(REPAIR_PASS, path, config_dir, REPAIR_VARS)?;
        }
        if let Some(path) = &section.stylefit_judge {
            registry.stylefit_judge = load_file(STYLEFIT_JUDGE, path, config_dir, JUDGE_VARS)?;
        }
        Ok(registry)
    }

    pub fn beat_prompt(
        &self,
        spec: &StorySpec,
        beat: &Beat,
        prior_context: &str,
        retry_hint: &str,
    ) -> RenderedPrompt {
        let voice = &spec.voice;
        let content = &spec.content;
        let mut vars = voice_vars(spec);
        vars.extend([
            ("beat_id", beat.id.clone()),
            ("function", beat.function.clone()),
            ("summary", or_none(&beat.summary)),
            ("target_words", beat.target_words.to_string()),
            ("cadence", beat.cadence.as_str().to_string()),
            ("distance", voice.distance.as_str().to_string()),
            ("sentence_variance", format!("{:.2}", voice.syntax.variance)),
            (
                "fragments",
                if voice.syntax.fragment_ok { "yes" } else { "no" }.to_string(),
            ),
            ("dialogue_ratio", format!("{:.2}", spec.form.dialogue_ratio)),
            ("dialogue_style", voice.dialogue_style.clone()),
            (
                "profanity",
                if voice.profanity.allowed {
                    "allowed".to_string()
                } else {
                    "not allowed".to_string()
                },
            ),
            ("place", or_none(&content.setting.place)),
            ("time", or_none(&content.setting.time)),
            ("characters", characters(spec)),
            ("motifs", or_none(&content.motifs.join(", "))),
            ("imagery", or_none(&content.imagery_palette.join(", "))),
            ("props", or_none(&content.props.join(", "))),
            (
                "prior_context",
                if prior_context.trim().is_empty() {
                    "(this is the opening beat)".to_string()
                } else {
                    prior_context.to_string()
                },
            ),
            ("retry_hint", retry_hint.to_string()),
        ]);
        self.beat_generate.render(&vars)
    }

    pub fn repair_prompt(
        &self,
        spec: &StorySpec,
        text: &str,
        violations: &[String],
        notes: &[String],
    ) -> RenderedPrompt {
        let vars = HashMap::from([
            ("violations", bullets(violations)),
            ("person", spec.voice.person.as_str().to_string()),
            ("tense", spec.voice.tense.as_str().to_string()),
            ("word_count", text.split_whitespace().count().to_string()),
            (
                "max_ngram",
                spec.constraints.anti_plagiarism.max_ngram.to_string(),
            ),
            ("notes", bullets(notes)),
            ("text", text.to_string()),
        ]);
        self.repair_pass.render(&vars)
    }

    pub fn stylefit_prompt(&self, spec: &StorySpec, text: &str) -> RenderedPrompt {
        let mut vars = voice_vars(spec);
        vars.insert("text", text.to_string());
        self.stylefit_judge.render(&vars)
    }
}

fn load_file(
    name: &'static str,
    relative: &Path,
    config_dir: &Path,
    allowed: &[&str],
) -> Result<PromptTemplate> {
    let full_path = config_dir.join(relative);
    let body = std::fs::read_to_string(&full_path).with_context(|| {
        format!("Failed to read {name} prompt file: {}", full_path.display())
    })?;
    PromptTemplate::new(name, body, allowed)
        .with_context(|| format!("Invalid {name} prompt: {}", full_path.display()))
}

fn voice_vars(spec: &StorySpec) -> HashMap<&'static str, String> {
    let voice = &spec.voice;
    HashMap::from([
        ("person", voice.person.as_str().to_string()),
        ("tense", voice.tense.as_str().to_string()),
        (
            "avg_sentence_len",
            format!("{:.0}", voice.syntax.avg_sentence_len),
        ),
        ("clause_style", voice.syntax.style_label().to_string()),
        ("lyric", format!("{:.2}", voice.register.lyric)),
        ("deadpan", format!("{:.2}", voice.register.deadpan)),
        ("irony", format!("{:.2}", voice.register.irony)),
        ("tender", format!("{:.2}", voice.register.tender)),
    ])
}

fn characters(spec: &StorySpec) -> String {
    let list: Vec<String> = spec
        .content
        .characters
        .iter()
        .map(|c| match (c.role.is_empty(), c.goal.is_empty()) {
            (true, _) => c.name.clone(),
            (false, true) => format!("{} ({})", c.name, c.role),
            (false, false) => format!("{} ({}, wants {})", c.name, c.role, c.goal),
        })
        .collect();
    or_none(&list.join("; "))
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|i| format!("- {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_none(value: &str) -> String {
    if value.trim().is_empty() {
        "(none)".to_string()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storyloom_common::Character;

    fn spec() -> StorySpec {
        let mut spec = StorySpec::default();
        spec.form.beats = vec![Beat::new("b1", "hook", 120).with_summary("A stranger arrives")];
        spec.content.motifs = vec!["salt".into(), "lamps".into()];
        spec.content.characters = vec![Character {
            name: "Ines".into(),
            role: "ferrywoman".into(),
            goal: String::new(),
        }];
        spec
    }

    #[test]
    fn builtin_templates_are_valid_and_versioned() {
        let registry = PromptRegistry::builtin().unwrap();
        assert_eq!(registry.beat_generate.version, "v1");
        assert_eq!(registry.repair_pass.version, "v1");
        assert_eq!(registry.stylefit_judge.version, "v1");
    }

    #[test]
    fn beat_prompt_fills_every_placeholder() {
        let registry = PromptRegistry::builtin().unwrap();
        let spec = spec();
        let prompt = registry.beat_prompt(&spec, &spec.form.beats[0], "", "");
        assert!(!prompt.text.contains("{{"));
        assert!(prompt.text.contains("Target words: 120"));
        assert!(prompt.text.contains("A stranger arrives"));
        assert!(prompt.text.contains("Ines (ferrywoman)"));
        assert!(prompt.text.contains("opening beat"));
        assert_eq!(prompt.component, BEAT_GENERATE);
    }

    #[test]
    fn repair_prompt_lists_violations_in_a_fence() {
        let registry = PromptRegistry::builtin().unwrap();
        let prompt = registry.repair_prompt(
            &spec(),
            "some draft text",
            &["Overlap 0.100 exceeds threshold 0.03".into()],
            &[],
        );
        assert!(prompt.text.contains("- Overlap 0.100"));
        assert!(prompt.text.contains("```text\nsome draft text\n```"));
    }

    #[test]
    fn judge_prompt_asks_for_a_number() {
        let registry = PromptRegistry::builtin().unwrap();
        let prompt = registry.stylefit_prompt(&spec(), "I went.");
        assert!(prompt.text.contains("single number"));
        assert!(prompt.text.contains("I went."));
    }

    #[test]
    fn file_override_is_validated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.md"), "Hello {{nobody}}").unwrap();
        let section = PromptsSection {
            repair_pass: Some("bad.md".into()),
            ..PromptsSection::default()
        };
        assert!(PromptRegistry::load(&section, dir.path()).is_err());

        std::fs::write(dir.path().join("good.md"), "**Version:** v2\nFix: {{text}}").unwrap();
        let section = PromptsSection {
            repair_pass: Some("good.md".into()),
            ..PromptsSection::default()
        };
        let registry = PromptRegistry::load(&section, dir.path()).unwrap();
        assert_eq!(registry.repair_pass.version, "v2");
    }
}
