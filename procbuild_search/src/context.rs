// Search context: the seedable RNG and run counters every component shares.
//
// There is no process-wide random generator and no global timing state. A
// `SearchContext` is created once per search run and passed by `&mut` into
// every randomized or measured call: action sampling, random derivation,
// UCT tie-breaking, local-move proposals, swap decisions, and evaluation.
// Seeding it makes a whole run reproducible.
//
// See also: `procbuild_prng` for `SearchRng`, `evaluate.rs` which updates the
// counters.

use procbuild_prng::SearchRng;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Counters accumulated over a search run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchStats {
    /// Full derivations run (rollouts and energy evaluations).
    pub derivations: u64,
    /// Derivations that stopped on a budget or pruned deep nodes.
    pub truncated_derivations: u64,
    /// Rule applications across all full derivations.
    pub expansions: u64,
    pub renders: u64,
    pub derive_time: Duration,
    pub render_time: Duration,
    pub score_time: Duration,
}

impl SearchStats {
    pub fn total_time(&self) -> Duration {
        self.derive_time + self.render_time + self.score_time
    }
}

/// Per-run mutable context.
#[derive(Clone, Debug)]
pub struct SearchContext {
    pub rng: SearchRng,
    pub stats: SearchStats,
}

impl SearchContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SearchRng::new(seed),
            stats: SearchStats::default(),
        }
    }

    /// Seed from `seed` if given, else from the clock. Returns the context and
    /// the seed actually used so it can be reported.
    pub fn from_optional_seed(seed: Option<u64>) -> (Self, u64) {
        let seed = seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(0)
        });
        (Self::new(seed), seed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = SearchContext::new(11);
        let mut b = SearchContext::new(11);
        for _ in 0..10 {
            assert_eq!(a.rng.next_u64(), b.rng.next_u64());
        }
    }

    #[test]
    fn explicit_seed_is_reported() {
        let (_, seed) = SearchContext::from_optional_seed(Some(42));
        assert_eq!(seed, 42);
    }

    #[test]
    fn total_time_sums_phases() {
        let stats = SearchStats {
            derive_time: Duration::from_millis(3),
            render_time: Duration::from_millis(5),
            score_time: Duration::from_millis(7),
            ..Default::default()
        };
        assert_eq!(stats.total_time(), Duration::from_millis(15));
    }
}
