// Deterministic, portable pseudo-random number generator for inverse search.
//
// Implements xoshiro256++ (Blackman & Vigna, 2019) with SplitMix64 seeding.
// Hand-rolled with zero external dependencies beyond serde, so the output
// stream is identical across platforms and compiler versions.
//
// This crate is the single PRNG used across the workspace: random
// derivations in `procbuild_grammar`, and action sampling, UCT tie-breaking,
// local-move proposals and Metropolis acceptance in `procbuild_search`. No
// component reaches for a process-wide generator; every randomized call takes
// a `&mut SearchRng` threaded down from the caller's search context.
//
// **Critical constraint: determinism.** Given the same seed and the same
// sequence of calls, every method must produce identical output. Two search
// runs with the same seed, grammar and budgets must make identical choices.
// Do not introduce floating-point arithmetic into the core generator.

use serde::{Deserialize, Serialize};

/// Xoshiro256++ PRNG, the workspace's sole source of randomness.
///
/// Serializable so a search checkpoint can capture the exact stream position.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRng {
    s: [u64; 4],
}

impl SearchRng {
    /// Create a new PRNG seeded from a `u64`.
    ///
    /// Uses SplitMix64 to expand the seed into the 256-bit internal state.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Generate the next `u64` in the sequence.
    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Generate a uniform `f64` in [0, 1).
    ///
    /// Uses the upper 53 bits of a `u64` to fill the mantissa.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Generate a uniform random integer in `[low, high)`.
    ///
    /// Uses rejection sampling to avoid modulo bias.
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        // = (2^64 - range) % range
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Pick one of the ten discretization levels `0..=9` uniformly.
    pub fn level(&mut self) -> u8 {
        self.range_u64(0, 10) as u8
    }

    /// Return `true` with probability `p`.
    ///
    /// `p <= 0.0` always returns false, `p >= 1.0` always returns true.
    pub fn random_bool(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }
}

/// SplitMix64, used only for seeding xoshiro256++ from a single `u64`.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn determinism_same_seed_same_output() {
        let mut a = SearchRng::new(42);
        let mut b = SearchRng::new(42);
        for _ in 0..1000 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn different_seeds_different_output() {
        let mut a = SearchRng::new(42);
        let mut b = SearchRng::new(43);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn f64_in_unit_range() {
        let mut rng = SearchRng::new(12345);
        for _ in 0..10_000 {
            let v = rng.next_f64();
            assert!((0.0..1.0).contains(&v), "f64 out of range: {v}");
        }
    }

    #[test]
    fn range_u64_within_bounds() {
        let mut rng = SearchRng::new(999);
        for _ in 0..10_000 {
            let v = rng.range_u64(10, 20);
            assert!((10..20).contains(&v), "range_u64 out of range: {v}");
        }
    }

    #[test]
    fn level_covers_all_ten_levels() {
        let mut rng = SearchRng::new(3);
        let mut seen = [false; 10];
        for _ in 0..10_000 {
            let l = rng.level();
            assert!(l < 10, "level out of range: {l}");
            seen[l as usize] = true;
        }
        assert!(seen.iter().all(|&s| s), "every level should be reachable");
    }

    #[test]
    fn random_bool_distribution() {
        let mut rng = SearchRng::new(42);
        let n = 10_000;
        let true_count = (0..n).filter(|_| rng.random_bool(0.1)).count();
        let pct = true_count as f64 / n as f64;
        assert!(
            (0.07..0.13).contains(&pct),
            "random_bool(0.1) should be ~10%, got {:.1}%",
            pct * 100.0
        );
    }

    #[test]
    fn random_bool_extremes() {
        let mut rng = SearchRng::new(42);
        for _ in 0..100 {
            assert!(!rng.random_bool(0.0));
            assert!(rng.random_bool(1.0));
        }
    }

    #[test]
    fn serialization_resumes_stream() {
        let mut rng = SearchRng::new(42);
        for _ in 0..100 {
            rng.next_u64();
        }
        let json = serde_json::to_string(&rng).unwrap();
        let mut restored: SearchRng = serde_json::from_str(&json).unwrap();
        for _ in 0..100 {
            assert_eq!(rng.next_u64(), restored.next_u64());
        }
    }
}
