//! Run-wide generation knobs shared across every candidate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{ConfigError, ConfigResult};

// =============================================================================
// Metrics and weights
// =============================================================================

/// Metrics that contribute to the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Stylefit,
    Formfit,
    Coherence,
    Freshness,
    Cadence,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Stylefit,
        Metric::Formfit,
        Metric::Coherence,
        Metric::Freshness,
        Metric::Cadence,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Stylefit => "stylefit",
            Metric::Formfit => "formfit",
            Metric::Coherence => "coherence",
            Metric::Freshness => "freshness",
            Metric::Cadence => "cadence",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ObjectiveWeights {
    pub stylefit: f64,
    pub formfit: f64,
    pub coherence: f64,
    pub freshness: f64,
    pub cadence: f64,
}

impl Default for ObjectiveWeights {
    fn default() -> Self {
        Self {
            stylefit: 0.3,
            formfit: 0.3,
            coherence: 0.25,
            freshness: 0.1,
            cadence: 0.05,
        }
    }
}

impl ObjectiveWeights {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Stylefit => self.stylefit,
            Metric::Formfit => self.formfit,
            Metric::Coherence => self.coherence,
            Metric::Freshness => self.freshness,
            Metric::Cadence => self.cadence,
        }
    }

    pub fn get_mut(&mut self, metric: Metric) -> &mut f64 {
        match metric {
            Metric::Stylefit => &mut self.stylefit,
            Metric::Formfit => &mut self.formfit,
            Metric::Coherence => &mut self.coherence,
            Metric::Freshness => &mut self.freshness,
            Metric::Cadence => &mut self.cadence,
        }
    }

    pub fn total(&self) -> f64 {
        Metric::ALL.iter().map(|m| self.get(*m)).sum()
    }

    /// Rejects negative or non-finite entries and a non-positive total.
    pub fn validate(&self) -> ConfigResult<()> {
        for metric in Metric::ALL {
            let w = self.get(metric);
            if !w.is_finite() || w < 0.0 {
                return Err(ConfigError::InvalidWeights(format!(
                    "{metric} weight is {w}"
                )));
            }
        }
        let total = self.total();
        if total <= 0.0 {
            return Err(ConfigError::InvalidWeights(format!(
                "weights sum to {total}"
            )));
        }
        Ok(())
    }

    /// Scaled copy summing to 1.0.
    pub fn normalized(&self) -> ConfigResult<Self> {
        self.validate()?;
        let total = self.total();
        let mut out = self.clone();
        for metric in Metric::ALL {
            *out.get_mut(metric) /= total;
        }
        Ok(out)
    }
}

// =============================================================================
// Sampling ranges
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingRange {
    pub min: f64,
    pub max: f64,
}

impl SamplingRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Linear sweep: slot `index` of `count` evenly spaced points.
    pub fn at(&self, index: usize, count: usize) -> f64 {
        if count <= 1 {
            return self.min;
        }
        let t = index.min(count - 1) as f64 / (count - 1) as f64;
        self.min + (self.max - self.min) * t
    }

    pub fn shifted(&self, by: f64, floor: f64, ceiling: f64) -> Self {
        Self {
            min: (self.min + by).clamp(floor, ceiling),
            max: (self.max + by).clamp(floor, ceiling),
        }
    }

    fn validate(&self, field: &str, floor: f64, ceiling: f64) -> ConfigResult<()> {
        let ok = self.min.is_finite()
            && self.max.is_finite()
            && self.min <= self.max
            && self.min >= floor
            && self.max <= ceiling;
        if !ok {
            return Err(ConfigError::InvalidRange {
                field: field.to_string(),
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }
}

// =============================================================================
// GenerationConfig
// =============================================================================

pub const TEMPERATURE_FLOOR: f64 = 0.0;
pub const TEMPERATURE_CEILING: f64 = 1.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GenerationConfig {
    pub seed: u64,
    pub num_candidates: usize,
    pub temperature: SamplingRange,
    pub top_p: SamplingRange,
    /// Relative tolerance for per-beat word counts.
    pub length_tolerance: f64,
    /// Additional draft attempts per beat after the first.
    pub max_retries: u32,
    /// Run one repair call when the stitched draft fails the guard.
    pub repair_enabled: bool,
    pub max_tokens: u32,
    pub early_stop_delta: f64,
    pub weights: ObjectiveWeights,
    /// Blend a model-judged style score into stylefit.
    pub llm_stylefit: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 137,
            num_candidates: 4,
            temperature: SamplingRange::new(0.7, 0.95),
            top_p: SamplingRange::new(0.85, 0.95),
            length_tolerance: 0.2,
            max_retries: 2,
            repair_enabled: true,
            max_tokens: 1024,
            early_stop_delta: 0.01,
            weights: ObjectiveWeights::default(),
            llm_stylefit: false,
        }
    }
}

impl GenerationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.weights.validate()?;
        self.temperature
            .validate("temperature", TEMPERATURE_FLOOR, TEMPERATURE_CEILING)?;
        self.top_p.validate("top_p", 0.0, 1.0)?;
        if self.num_candidates == 0 {
            return Err(ConfigError::invalid_value("num_candidates", "must be at least 1"));
        }
        if !(self.length_tolerance > 0.0 && self.length_tolerance < 1.0) {
            return Err(ConfigError::invalid_value(
                "length_tolerance",
                format!("{} is outside (0, 1)", self.length_tolerance),
            ));
        }
        if !(self.early_stop_delta >= 0.0 && self.early_stop_delta.is_finite()) {
            return Err(ConfigError::invalid_value(
                "early_stop_delta",
                "must be a non-negative number",
            ));
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::invalid_value("max_tokens", "must be positive"));
        }
        Ok(())
    }

    /// Short content hash recorded in every report.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(json.as_bytes());
        hex::encode(digest)[..16].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(GenerationConfig::default().validate().is_ok());
    }

    #[test]
    fn negative_weight_is_invalid() {
        let mut config = GenerationConfig::default();
        config.weights.coherence = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn zero_sum_weights_are_invalid() {
        let weights = ObjectiveWeights {
            stylefit: 0.0,
            formfit: 0.0,
            coherence: 0.0,
            freshness: 0.0,
            cadence: 0.0,
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::InvalidWeights(_))
        ));
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        let weights = ObjectiveWeights {
            stylefit: 2.0,
            formfit: 1.0,
            coherence: 1.0,
            freshness: 0.5,
            cadence: 0.5,
        };
        let normalized = weights.normalized().unwrap();
        assert!((normalized.total() - 1.0).abs() < 1e-12);
        assert!((normalized.stylefit - 0.4).abs() < 1e-12);
    }

    #[test]
    fn inverted_temperature_range_is_invalid() {
        let mut config = GenerationConfig::default();
        config.temperature = SamplingRange::new(0.9, 0.6);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { .. })
        ));
    }

    #[test]
    fn sweep_spans_the_range() {
        let range = SamplingRange::new(0.7, 0.9);
        assert_eq!(range.at(0, 3), 0.7);
        assert!((range.at(1, 3) - 0.8).abs() < 1e-12);
        assert!((range.at(2, 3) - 0.9).abs() < 1e-12);
        assert_eq!(range.at(0, 1), 0.7);
    }

    #[test]
    fn config_hash_tracks_content() {
        let a = GenerationConfig::default();
        let mut b = a.clone();
        assert_eq!(a.config_hash(), b.config_hash());
        b.seed = 1;
        assert_ne!(a.config_hash(), b.config_hash());
        assert_eq!(a.config_hash().len(), 16);
    }
}
