//! Independent sub-metrics. Each is a total function over arbitrary text and
//! returns a score in [0, 1] plus diagnostic detail.

pub mod cadence;
pub mod coherence;
pub mod formfit;
pub mod freshness;
pub mod lexicon;
pub mod motif;
pub mod stylefit;

pub use cadence::{cadence, CadenceDetail};
pub use coherence::{coherence, CoherenceDetail};
pub use formfit::{formfit, FormfitDetail};
pub use freshness::freshness;
pub use motif::{motif_coverage, MotifDetail};
pub use stylefit::{stylefit, StylefitDetail};
