use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

use storyloom_common::GenerationConfig;

/// TOML-backed configuration loaded from disk.
/// Secrets (API keys) stay as env vars.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub completion: CompletionSection,
    pub generation: GenerationConfig,
    pub optimizer: OptimizerSection,
    pub prompts: PromptsSection,
    pub output: OutputSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CompletionSection {
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub max_concurrency: usize,
}

impl Default for CompletionSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            timeout_secs: 60,
            max_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptimizerSection {
    pub max_iters: usize,
}

impl Default for OptimizerSection {
    fn default() -> Self {
        Self { max_iters: 5 }
    }
}

/// Template overrides, relative to the config file's directory.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PromptsSection {
    pub beat_generate: Option<PathBuf>,
    pub repair_pass: Option<PathBuf>,
    pub stylefit_judge: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub runs_dir: PathBuf,
    /// Persisted response cache, loaded at start and saved at exit.
    pub cache_file: Option<PathBuf>,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
            cache_file: None,
        }
    }
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    config
        .generation
        .validate()
        .with_context(|| format!("Invalid [generation] section in {}", path.display()))?;
    Ok(config)
}

/// Secrets and run metadata from the environment (and `.env`, if present).
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub openai_api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub git_commit: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self {
            openai_api_key: non_empty("OPENAI_API_KEY"),
            model: non_empty("STORYLOOM_MODEL"),
            base_url: non_empty("STORYLOOM_BASE_URL"),
            git_commit: non_empty("GIT_COMMIT"),
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    fn empty_file_uses_defaults() {
        let file = write_config("");
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.completion.model, "gpt-4o-mini");
        assert_eq!(config.optimizer.max_iters, 5);
        assert_eq!(config.generation, GenerationConfig::default());
        assert_eq!(config.output.runs_dir, PathBuf::from("runs"));
    }

    #[test]
    fn sections_override_defaults() {
        let file = write_config(
            r#"
[completion]
model = "local-model"
base_url = "http://localhost:8080/v1"
max_concurrency = 2

[generation]
num_candidates = 6
early_stop_delta = 0.02

[generation.weights]
stylefit = 0.5
formfit = 0.2
coherence = 0.2
freshness = 0.05
cadence = 0.05

[optimizer]
max_iters = 3

[prompts]
repair_pass = "prompts/repair.md"
"#,
        );
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.completion.model, "local-model");
        assert_eq!(config.completion.max_concurrency, 2);
        assert_eq!(config.completion.timeout_secs, 60);
        assert_eq!(config.generation.num_candidates, 6);
        assert_eq!(config.generation.weights.stylefit, 0.5);
        assert_eq!(config.optimizer.max_iters, 3);
        assert_eq!(
            config.prompts.repair_pass,
            Some(PathBuf::from("prompts/repair.md"))
        );
        assert!(config.prompts.beat_generate.is_none());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let file = write_config("[optimizer]\nmax_iters = 3\nearly_stop_delta = 0.1\n");
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn invalid_weights_fail_at_load() {
        let file = write_config(
            "[generation.weights]\nstylefit = -1.0\nformfit = 0.3\ncoherence = 0.3\nfreshness = 0.3\ncadence = 0.1\n",
        );
        let err = load_config(file.path()).unwrap_err();
        assert!(format!("{err:#}").contains("weights"));
    }
}
