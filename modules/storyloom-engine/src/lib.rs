//! Drafting, repair and optimization on top of the pure evaluation crate.

pub mod adapters;
pub mod artifacts;
pub mod assembler;
pub mod cache;
pub mod config;
pub mod drafter;
pub mod events;
pub mod gateway;
pub mod generation;
pub mod optimizer;
pub mod prompts;
pub mod template;
pub mod tuning;

pub use artifacts::{ArtifactStore, FsArtifactStore};
pub use assembler::{Assembly, CandidateAssembler, CandidatePlan};
pub use cache::{CacheKey, ResponseCache};
pub use drafter::{BeatDrafter, StoryMemory};
pub use events::{
    DecisionEvent, DecisionKind, DecisionLog, DecisionSink, FanoutSink, JsonlDecisionSink,
    MemoryDecisionSink, TracingDecisionSink,
};
pub use gateway::{CompletionGateway, UsageTotals};
pub use generation::{Generator, IterationContext};
pub use optimizer::{
    BestCandidate, CancelFlag, OptimizationOutcome, OptimizationSummary, Optimizer,
    OptimizerSettings, PlateauTracker, StopReason,
};
pub use prompts::PromptRegistry;
