//! Completion service boundary.
//!
//! Everything above this crate sees a single async `complete` call that takes
//! a prompt plus sampling hints and returns text. Providers and mocks both
//! implement [`TextCompletion`].

pub mod error;
pub mod mock;
pub mod openai;
pub mod traits;
pub mod util;

pub use error::{AiError, AiResult};
pub use mock::{FailingCompletion, MockCompletion};
pub use openai::OpenAi;
pub use traits::{Completion, CompletionRequest, TextCompletion, Usage};
