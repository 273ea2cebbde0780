// Procbuild Inverse Search
//
// Finds shape grammar parameters whose derived building best matches a
// target line drawing. Two search strategies share one evaluation pipeline:
// derive the grammar, render the faces, convert the raster to a distance
// field, and score it against the target's field.
//
// Architecture:
// - config.rs: `SearchConfig` (JSON, every tunable constant)
// - context.rs: `SearchContext` (seedable RNG + run counters)
// - metric.rs: Euclidean distance fields and the asymmetric edge discrepancy
// - render.rs: `Renderer` trait and the built-in `SoftwareRenderer`
// - evaluate.rs: `Evaluator` (rollouts, energies) and random buildings
// - mcts.rs: Monte Carlo tree search, one nonterminal decision per outer step
// - mcmc.rs: Two-chain replica-exchange sampler with simulated annealing
// - error.rs: `SearchError`
//
// The searches are single-threaded and deterministic given a seed.

pub mod config;
pub mod context;
pub mod error;
pub mod evaluate;
pub mod mcmc;
pub mod mcts;
pub mod metric;
pub mod render;

pub use config::SearchConfig;
pub use context::SearchContext;
pub use error::{Result, SearchError};
pub use evaluate::Evaluator;
pub use render::{Camera, RenderMode, Renderer, SoftwareRenderer};
