use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ai_client::{MockCompletion, OpenAi, TextCompletion};
use storyloom_common::StorySpec;
use storyloom_eval::{check_guard, evaluate, Evaluator, Guard, GuardThresholds};
use storyloom_engine::config::{load_config, EnvConfig, FileConfig};
use storyloom_engine::{
    CancelFlag, CandidatePlan, CompletionGateway, DecisionLog, DecisionSink, FanoutSink,
    FsArtifactStore, Generator, IterationContext, JsonlDecisionSink, Optimizer,
    OptimizerSettings, PromptRegistry, ResponseCache, TracingDecisionSink,
};

const DEFAULT_CONFIG: &str = "./config/storyloom.toml";

#[derive(Parser)]
#[command(name = "storyloom", about = "Spec-driven short story drafting and optimization")]
struct Cli {
    /// Path to config TOML file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the optimization loop and write a run directory
    Optimize {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        exemplar: Option<PathBuf>,
        #[arg(long)]
        iters: Option<usize>,
        #[arg(long)]
        candidates: Option<usize>,
        /// Use the offline deterministic completion provider
        #[arg(long)]
        mock: bool,
    },
    /// Draft and evaluate a single candidate
    Draft {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        exemplar: Option<PathBuf>,
        #[arg(long)]
        mock: bool,
    },
    /// Score an existing text and print the report JSON
    Evaluate {
        #[arg(long)]
        spec: PathBuf,
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        exemplar: Option<PathBuf>,
    },
    /// Check a text against an exemplar and print the verdict JSON
    Guard {
        #[arg(long)]
        text: PathBuf,
        #[arg(long)]
        exemplar: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("storyloom=info".parse()?);
    if cli.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let (file_config, config_dir) = resolve_config(cli.config.as_deref())?;
    let env = EnvConfig::from_env();

    match cli.command {
        Command::Optimize {
            spec,
            exemplar,
            iters,
            candidates,
            mock,
        } => {
            run_optimize(
                file_config,
                &config_dir,
                &env,
                &spec,
                exemplar.as_deref(),
                iters,
                candidates,
                mock,
            )
            .await
        }
        Command::Draft {
            spec,
            exemplar,
            mock,
        } => run_draft(file_config, &config_dir, &env, &spec, exemplar.as_deref(), mock).await,
        Command::Evaluate {
            spec,
            text,
            exemplar,
        } => {
            let spec = read_spec(&spec)?;
            let text = read_text(&text)?;
            let exemplar = exemplar.as_deref().map(read_text).transpose()?;
            let report = evaluate(&text, &spec, &file_config.generation, exemplar.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Guard { text, exemplar } => {
            let text = read_text(&text)?;
            let exemplar = read_text(&exemplar)?;
            let verdict = check_guard(&text, &exemplar, &GuardThresholds::default());
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            Ok(())
        }
    }
}

/// Explicit `--config`, else the default path when it exists, else defaults.
fn resolve_config(path: Option<&Path>) -> Result<(FileConfig, PathBuf)> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None if Path::new(DEFAULT_CONFIG).exists() => PathBuf::from(DEFAULT_CONFIG),
        None => return Ok((FileConfig::default(), PathBuf::from("."))),
    };
    let config_path = path.canonicalize().with_context(|| {
        format!(
            "Config file not found: {}. Create one or omit --config",
            path.display()
        )
    })?;
    info!(config = %config_path.display(), "Loading config");
    let config = load_config(&config_path)?;
    let dir = config_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    Ok((config, dir))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn read_spec(path: &Path) -> Result<StorySpec> {
    let raw = read_text(path)?;
    let spec = StorySpec::from_json(&raw)
        .with_context(|| format!("Failed to parse story spec: {}", path.display()))?;
    spec.validate()
        .with_context(|| format!("Invalid story spec: {}", path.display()))?;
    Ok(spec)
}

fn completion_client(config: &FileConfig, env: &EnvConfig, mock: bool) -> Result<Arc<dyn TextCompletion>> {
    if mock {
        info!("Using mock completion provider");
        return Ok(Arc::new(MockCompletion::new()));
    }
    let Some(api_key) = env.openai_api_key.as_deref() else {
        bail!("OPENAI_API_KEY is not set; export it or pass --mock");
    };
    let model = env.model.as_deref().unwrap_or(&config.completion.model);
    let mut client = OpenAi::new(api_key, model)
        .with_timeout(Duration::from_secs(config.completion.timeout_secs));
    if let Some(url) = env.base_url.as_deref().or(config.completion.base_url.as_deref()) {
        client = client.with_base_url(url);
    }
    info!(model, "Using OpenAI-compatible completion provider");
    Ok(Arc::new(client))
}

fn load_cache(config: &FileConfig, config_dir: &Path) -> Result<(Arc<ResponseCache>, Option<PathBuf>)> {
    let path = config
        .output
        .cache_file
        .as_ref()
        .map(|p| config_dir.join(p));
    let cache = match &path {
        Some(p) => ResponseCache::load(p)?,
        None => ResponseCache::new(),
    };
    Ok((Arc::new(cache), path))
}

fn save_cache(cache: &ResponseCache, path: Option<&Path>) {
    if let Some(path) = path {
        match cache.save(path) {
            Ok(()) => info!(path = %path.display(), stats = %cache.stats(), "Response cache saved"),
            Err(e) => warn!(error = %e, "Failed to save response cache"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_optimize(
    mut config: FileConfig,
    config_dir: &Path,
    env: &EnvConfig,
    spec_path: &Path,
    exemplar_path: Option<&Path>,
    iters: Option<usize>,
    candidates: Option<usize>,
    mock: bool,
) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let exemplar = exemplar_path.map(read_text).transpose()?;
    if let Some(n) = candidates {
        config.generation.num_candidates = n;
    }
    config.generation.validate()?;

    let prompts = Arc::new(PromptRegistry::load(&config.prompts, config_dir)?);
    let (cache, cache_path) = load_cache(&config, config_dir)?;
    let gateway = Arc::new(
        CompletionGateway::new(completion_client(&config, env, mock)?)
            .with_cache(cache.clone())
            .with_timeout(Duration::from_secs(config.completion.timeout_secs)),
    );

    let run_id = storyloom_engine::optimizer::new_run_id();
    let runs_dir = config_dir.join(&config.output.runs_dir);
    let store = Arc::new(FsArtifactStore::new(&runs_dir));
    let jsonl = JsonlDecisionSink::create(&store.decisions_path(&run_id))
        .context("Failed to create decision log")?;
    let sink = FanoutSink::new(vec![
        Arc::new(TracingDecisionSink) as Arc<dyn DecisionSink>,
        Arc::new(jsonl),
    ]);

    let mut settings = OptimizerSettings::builder()
        .max_iters(iters.unwrap_or(config.optimizer.max_iters))
        .max_concurrency(config.completion.max_concurrency)
        .run_id(run_id.clone())
        .build();
    settings.git_commit = env.git_commit.clone();

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight candidates");
            on_signal.cancel();
        }
    });

    let optimizer = Optimizer::new(gateway.clone(), prompts, settings)
        .with_sink(Arc::new(sink))
        .with_artifacts(store.clone())
        .with_cancel(cancel);

    let outcome = optimizer
        .run(&spec, &config.generation, exemplar.as_deref())
        .await;
    save_cache(&cache, cache_path.as_deref());
    let outcome = outcome?;

    println!("{}", outcome.summary());
    if outcome.best.is_some() {
        println!("  Artifacts:   {}", store.run_dir(&run_id).display());
    }
    Ok(())
}

async fn run_draft(
    config: FileConfig,
    config_dir: &Path,
    env: &EnvConfig,
    spec_path: &Path,
    exemplar_path: Option<&Path>,
    mock: bool,
) -> Result<()> {
    let spec = read_spec(spec_path)?;
    let exemplar = exemplar_path.map(read_text).transpose()?;

    let prompts = PromptRegistry::load(&config.prompts, config_dir)?;
    let (cache, cache_path) = load_cache(&config, config_dir)?;
    let gateway = CompletionGateway::new(completion_client(&config, env, mock)?)
        .with_cache(cache.clone())
        .with_timeout(Duration::from_secs(config.completion.timeout_secs));

    let guard = exemplar.as_deref().map(|text| {
        Guard::new(text, GuardThresholds::from(&spec.constraints.anti_plagiarism))
    });
    let evaluator = Evaluator::new(&spec, &config.generation, guard.as_ref())?;
    let decisions = DecisionLog::new(Arc::new(TracingDecisionSink), "draft");
    let ctx = IterationContext {
        spec: &spec,
        config: &config.generation,
        guard: guard.as_ref(),
        evaluator: &evaluator,
        decisions: &decisions,
    };

    let plan = CandidatePlan::sweep(&config.generation, 1, 0);
    let candidate = Generator::new(&gateway, &prompts)
        .with_git_commit(env.git_commit.clone())
        .candidate(ctx, &plan)
        .await;
    save_cache(&cache, cache_path.as_deref());

    println!("{}\n", candidate.final_text);
    println!("{}", serde_json::to_string_pretty(&candidate.report)?);
    Ok(())
}
