//! Run artifacts on disk.
//!
//! Layout under `<root>/<run_id>/`:
//!
//! ```text
//! iter_<k>/cand_<id>/{beats.json, stitched.txt, final.txt, eval_report.json}
//! iter_<k>/summary.json
//! best_spec.json  best_config.json  best_draft.txt  best_report.json
//! optimization_summary.json
//! decisions.jsonl
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use storyloom_common::{Candidate, OptimizerHistoryEntry};

use crate::optimizer::{BestCandidate, OptimizationSummary};

pub const DECISIONS_FILE: &str = "decisions.jsonl";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save_iteration(
        &self,
        run_id: &str,
        iteration: usize,
        candidates: &[Candidate],
        selected: &str,
    ) -> Result<()>;

    async fn save_final(
        &self,
        run_id: &str,
        best: &BestCandidate,
        summary: &OptimizationSummary,
    ) -> Result<()>;
}

#[async_trait]
impl<T: ArtifactStore + ?Sized> ArtifactStore for Arc<T> {
    async fn save_iteration(
        &self,
        run_id: &str,
        iteration: usize,
        candidates: &[Candidate],
        selected: &str,
    ) -> Result<()> {
        (**self)
            .save_iteration(run_id, iteration, candidates, selected)
            .await
    }

    async fn save_final(
        &self,
        run_id: &str,
        best: &BestCandidate,
        summary: &OptimizationSummary,
    ) -> Result<()> {
        (**self).save_final(run_id, best, summary).await
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    pub fn iteration_dir(&self, run_id: &str, iteration: usize) -> PathBuf {
        self.run_dir(run_id).join(format!("iter_{iteration}"))
    }

    pub fn decisions_path(&self, run_id: &str) -> PathBuf {
        self.run_dir(run_id).join(DECISIONS_FILE)
    }
}

#[derive(Serialize)]
struct IterationSummary<'a> {
    iteration: usize,
    selected: &'a str,
    candidates: Vec<CandidateLine<'a>>,
}

#[derive(Serialize)]
struct CandidateLine<'a> {
    id: &'a str,
    overall: f64,
    pass_fail: bool,
    temperature: f64,
    top_p: f64,
    repair_applied: bool,
    words: usize,
}

#[derive(Serialize)]
struct HistoryFile<'a> {
    run_id: &'a str,
    history: &'a [OptimizerHistoryEntry],
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn save_iteration(
        &self,
        run_id: &str,
        iteration: usize,
        candidates: &[Candidate],
        selected: &str,
    ) -> Result<()> {
        let dir = self.iteration_dir(run_id, iteration);
        for candidate in candidates {
            let cand_dir = dir.join(format!("cand_{}", candidate.id));
            tokio::fs::create_dir_all(&cand_dir)
                .await
                .with_context(|| format!("Failed to create {}", cand_dir.display()))?;
            write_json(&cand_dir.join("beats.json"), &candidate.beats).await?;
            write_text(&cand_dir.join("stitched.txt"), &candidate.stitched).await?;
            write_text(&cand_dir.join("final.txt"), &candidate.final_text).await?;
            write_json(&cand_dir.join("eval_report.json"), &candidate.report).await?;
        }

        let summary = IterationSummary {
            iteration,
            selected,
            candidates: candidates
                .iter()
                .map(|c| CandidateLine {
                    id: &c.id,
                    overall: c.overall(),
                    pass_fail: c.report.pass_fail,
                    temperature: c.temperature,
                    top_p: c.top_p,
                    repair_applied: c.repair_applied,
                    words: c.report.length.words,
                })
                .collect(),
        };
        tokio::fs::create_dir_all(&dir).await?;
        write_json(&dir.join("summary.json"), &summary).await?;
        info!(path = %dir.display(), candidates = candidates.len(), "Iteration artifacts saved");
        Ok(())
    }

    async fn save_final(
        &self,
        run_id: &str,
        best: &BestCandidate,
        summary: &OptimizationSummary,
    ) -> Result<()> {
        let dir = self.run_dir(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        write_json(&dir.join("best_spec.json"), &best.spec).await?;
        write_json(&dir.join("best_config.json"), &best.config).await?;
        write_text(&dir.join("best_draft.txt"), &best.candidate.final_text).await?;
        write_json(&dir.join("best_report.json"), &best.candidate.report).await?;
        write_json(&dir.join("optimization_summary.json"), summary).await?;
        write_json(
            &dir.join("history.json"),
            &HistoryFile {
                run_id,
                history: &summary.history,
            },
        )
        .await?;
        info!(path = %dir.display(), best = best.candidate.id.as_str(), "Run artifacts saved");
        Ok(())
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_text(path, &json).await
}

async fn write_text(path: &Path, text: &str) -> Result<()> {
    tokio::fs::write(path, text)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
