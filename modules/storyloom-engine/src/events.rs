//! Decision log: one typed event per choice the engine makes.
//!
//! Events go to an injected [`DecisionSink`]. The run directory gets a JSONL
//! copy; tests collect them in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionEvent {
    pub ts: DateTime<Utc>,
    pub run_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<usize>,
    pub reasoning: String,
    #[serde(flatten)]
    pub kind: DecisionKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionKind {
    DraftAttempt {
        candidate: String,
        beat_id: String,
        attempt: u32,
        temperature: f64,
    },
    DraftFailed {
        candidate: String,
        beat_id: String,
        attempt: u32,
        error: String,
        retryable: bool,
    },
    GuardChecked {
        candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        beat_id: Option<String>,
        passed: bool,
        violations: Vec<String>,
    },
    BeatExhausted {
        candidate: String,
        beat_id: String,
        attempts: u32,
    },
    Repair {
        candidate: String,
        violations: usize,
        applied: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        passed_after: Option<bool>,
    },
    CandidateEvaluated {
        candidate: String,
        overall: f64,
        pass_fail: bool,
        freshness: f64,
    },
    Selected {
        candidate: String,
        overall: f64,
        pass_fail: bool,
    },
    IterationCompleted {
        best_score: f64,
        improved: bool,
        /// `None` on the first iteration, which has nothing to improve on.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        improvement: Option<f64>,
        no_improvement: u32,
    },
    EarlyStop {
        improvement: f64,
        no_improvement: u32,
    },
    Mutation {
        param: String,
        from: f64,
        to: f64,
    },
    Cancelled {
        completed_iterations: usize,
    },
}

impl DecisionKind {
    pub fn name(&self) -> &'static str {
        match self {
            DecisionKind::DraftAttempt { .. } => "draft_attempt",
            DecisionKind::DraftFailed { .. } => "draft_failed",
            DecisionKind::GuardChecked { .. } => "guard_checked",
            DecisionKind::BeatExhausted { .. } => "beat_exhausted",
            DecisionKind::Repair { .. } => "repair",
            DecisionKind::CandidateEvaluated { .. } => "candidate_evaluated",
            DecisionKind::Selected { .. } => "selected",
            DecisionKind::IterationCompleted { .. } => "iteration_completed",
            DecisionKind::EarlyStop { .. } => "early_stop",
            DecisionKind::Mutation { .. } => "mutation",
            DecisionKind::Cancelled { .. } => "cancelled",
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

pub trait DecisionSink: Send + Sync {
    fn record(&self, event: DecisionEvent);
}

impl<T: DecisionSink + ?Sized> DecisionSink for Arc<T> {
    fn record(&self, event: DecisionEvent) {
        (**self).record(event)
    }
}

/// Forwards events to `tracing` at info level.
pub struct TracingDecisionSink;

impl DecisionSink for TracingDecisionSink {
    fn record(&self, event: DecisionEvent) {
        let payload = serde_json::to_string(&event.kind).unwrap_or_default();
        info!(
            run_id = event.run_id.as_str(),
            iteration = event.iteration,
            decision = event.kind.name(),
            payload = payload.as_str(),
            "{}",
            event.reasoning
        );
    }
}

/// Collects events for assertions.
#[derive(Default)]
pub struct MemoryDecisionSink {
    events: Mutex<Vec<DecisionEvent>>,
}

impl MemoryDecisionSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DecisionEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.kind.name() == name)
            .count()
    }
}

impl DecisionSink for MemoryDecisionSink {
    fn record(&self, event: DecisionEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Appends one JSON object per line.
pub struct JsonlDecisionSink {
    writer: Mutex<BufWriter<File>>,
}

impl JsonlDecisionSink {
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl DecisionSink for JsonlDecisionSink {
    fn record(&self, event: DecisionEvent) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = serde_json::to_writer(&mut *writer, &event)
            .map_err(std::io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to write decision event");
        }
    }
}

/// Sends every event to each inner sink.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn DecisionSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn DecisionSink>>) -> Self {
        Self { sinks }
    }
}

impl DecisionSink for FanoutSink {
    fn record(&self, event: DecisionEvent) {
        for sink in &self.sinks {
            sink.record(event.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// DecisionLog
// ---------------------------------------------------------------------------

/// Stamps run and iteration onto events before handing them to the sink.
#[derive(Clone)]
pub struct DecisionLog {
    sink: Arc<dyn DecisionSink>,
    run_id: String,
    iteration: Option<usize>,
}

impl DecisionLog {
    pub fn new(sink: Arc<dyn DecisionSink>, run_id: impl Into<String>) -> Self {
        Self {
            sink,
            run_id: run_id.into(),
            iteration: None,
        }
    }

    /// Log that drops everything.
    pub fn disabled() -> Self {
        struct Discard;
        impl DecisionSink for Discard {
            fn record(&self, _event: DecisionEvent) {}
        }
        Self::new(Arc::new(Discard), "none")
    }

    pub fn for_iteration(&self, iteration: usize) -> Self {
        Self {
            sink: self.sink.clone(),
            run_id: self.run_id.clone(),
            iteration: Some(iteration),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, kind: DecisionKind, reasoning: impl Into<String>) {
        self.sink.record(DecisionEvent {
            ts: Utc::now(),
            run_id: self.run_id.clone(),
            iteration: self.iteration,
            reasoning: reasoning.into(),
            kind,
        });
    }
}
