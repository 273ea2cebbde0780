// Data-driven search configuration.
//
// Every tunable constant of the search lives in `SearchConfig`, loaded from
// JSON. The algorithms never use magic numbers; they read from the config
// group they care about:
// - `derivation`: step/depth/node/time limits for full derivations
// - `mcts`: outer steps, inner iterations, UCT exploration constant
// - `mcmc`: iteration budget, chain temperatures, swap rate, cooling
// - `metric`: discrepancy weights and the edge threshold for distance fields
// - `render`: raster size and camera
//
// Every struct is `#[serde(default)]`, so a config file only needs to name the
// values it overrides (`{"mcts": {"max_iterations": 200}}` is a valid file).
//
// See also: `mcts.rs`, `mcmc.rs`, `metric.rs`, `render.rs` for the consumers.
//
// **Critical constraint: determinism.** Two runs with the same config, seed,
// grammar, and target produce identical results.

use crate::error::{Result, SearchError};
use crate::render::Camera;
use procbuild_grammar::DerivationLimits;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tree search parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MctsConfig {
    /// Outer steps: how many nonterminals to commit decisions for.
    pub max_derivation_steps: usize,
    /// Select/expand/simulate/backpropagate rounds per outer step.
    pub max_iterations: usize,
    /// UCT exploration constant `C`.
    pub exploration: f64,
    /// Score given to never-visited children so each is tried once first.
    pub unvisited_priority: f64,
    /// Tie-breaking jitter added to `unvisited_priority`, drawn from
    /// `[0, unvisited_jitter)`.
    pub unvisited_jitter: u64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            max_derivation_steps: 10,
            max_iterations: 20,
            exploration: 1.0,
            unvisited_priority: 10_000.0,
            unvisited_jitter: 1_000,
        }
    }
}

/// Replica-exchange sampler parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McmcConfig {
    pub iterations: usize,
    /// Starting temperature of the cold chain.
    pub low_temperature: f64,
    /// Starting temperature of the hot chain.
    pub high_temperature: f64,
    /// Per-iteration probability of attempting a temperature swap.
    pub swap_probability: f64,
    /// Each chain's temperature is divided by this after every proposal.
    pub cooling_factor: f64,
    /// Snapshot the best state every this many iterations (0 disables).
    pub snapshot_interval: usize,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            iterations: 1_000,
            low_temperature: 1.0,
            high_temperature: 10.0,
            swap_probability: 0.1,
            cooling_factor: 1.0001,
            snapshot_interval: 100,
        }
    }
}

/// Image discrepancy parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricConfig {
    /// Weight of target edges the candidate misses.
    pub alpha: f64,
    /// Weight of candidate edges the target doesn't have.
    pub beta: f64,
    /// Gray values strictly below this are edge pixels.
    pub edge_threshold: u8,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            alpha: 1_000.0,
            beta: 1_000.0,
            edge_threshold: 128,
        }
    }
}

/// Raster parameters for the built-in renderer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub camera: Camera,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 256,
            height: 256,
            camera: Camera::default(),
        }
    }
}

/// Top-level search configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub derivation: DerivationLimits,
    pub mcts: MctsConfig,
    pub mcmc: McmcConfig,
    pub metric: MetricConfig,
    pub render: RenderConfig,
    /// Fixed RNG seed; `None` seeds from the clock.
    pub seed: Option<u64>,
}

impl SearchConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: SearchConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Reject values the algorithms cannot work with.
    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(SearchError::Config(msg.to_string()));
        if self.render.width == 0 || self.render.height == 0 {
            return bad("render size must be non-zero");
        }
        if !(self.mcmc.low_temperature > 0.0 && self.mcmc.high_temperature > 0.0) {
            return bad("chain temperatures must be positive");
        }
        if !(self.mcmc.high_temperature > self.mcmc.low_temperature) {
            return bad("high_temperature must exceed low_temperature");
        }
        if !(0.0..=1.0).contains(&self.mcmc.swap_probability) {
            return bad("swap_probability must lie in [0, 1]");
        }
        if !(self.mcmc.cooling_factor >= 1.0) {
            return bad("cooling_factor must be at least 1");
        }
        if !(self.mcts.exploration >= 0.0) {
            return bad("exploration must be non-negative");
        }
        if !(self.metric.alpha >= 0.0 && self.metric.beta >= 0.0) {
            return bad("metric weights must be non-negative");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        SearchConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = SearchConfig::from_json(r#"{"mcts": {"max_iterations": 200}, "seed": 7}"#).unwrap();
        assert_eq!(config.mcts.max_iterations, 200);
        assert_eq!(config.mcts.max_derivation_steps, 10);
        assert_eq!(config.mcmc, McmcConfig::default());
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn json_roundtrip() {
        let config = SearchConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(SearchConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(SearchConfig::from_json(r#"{"mcmc": {"swap_probability": 1.5}}"#).is_err());
        assert!(SearchConfig::from_json(r#"{"mcmc": {"low_temperature": 0.0}}"#).is_err());
        assert!(SearchConfig::from_json(r#"{"render": {"width": 0}}"#).is_err());
        assert!(SearchConfig::from_json(r#"{"mcts": {"exploration": -1.0}}"#).is_err());
    }

    #[test]
    fn hot_chain_must_be_hotter() {
        let err = SearchConfig::from_json(r#"{"mcmc": {"low_temperature": 5.0, "high_temperature": 5.0}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("high_temperature"));
        assert!(SearchConfig::from_json(r#"{"mcmc": {"low_temperature": 20.0}}"#).is_err());
        assert!(SearchConfig::from_json(r#"{"mcmc": {"low_temperature": 2.0, "high_temperature": 3.0}}"#).is_ok());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(matches!(
            SearchConfig::from_json("{not json"),
            Err(SearchError::Json(_))
        ));
    }
}
