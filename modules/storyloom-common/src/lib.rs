pub mod candidate;
pub mod config;
pub mod error;
pub mod profanity;
pub mod report;
pub mod spec;
pub mod text;

pub use candidate::*;
pub use config::{GenerationConfig, Metric, ObjectiveWeights, SamplingRange};
pub use error::{ConfigError, ConfigResult, SelectionError};
pub use profanity::{contains_profanity, count_masked, mask_profanity, PROFANITY_PLACEHOLDER};
pub use report::*;
pub use spec::*;
