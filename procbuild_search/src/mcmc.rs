// Replica-exchange Metropolis sampler over full parameter assignments.
//
// Two chains start from the same grammar, each with its own uniform random
// level for every ranged attribute, at a low and a high temperature. The
// energy of an assignment is the image metric score of its full derivation
// (lower is better). Per iteration:
// - with probability `swap_probability`, attempt a replica exchange: swap the
//   two temperatures with probability
//     min(1, exp(-E2/T1 - E1/T2) / exp(-E1/T1 - E2/T2))
//   computed in log space as exp((E1 - E2) * (1/T1 - 1/T2));
// - otherwise each chain proposes a local move (every ranged attribute steps
//   its level by -1, 0 or +1 with equal probability, clipped to 0..=9),
//   scores it, records it if it beats the chain's best, accepts it with
//   probability min(1, exp((E - E') / T)), then cools `T /= cooling_factor`.
//
// Every `snapshot_interval` iterations the best of both chains is handed to
// the caller's snapshot callback. The sampler itself never writes files.
//
// See also: `evaluate.rs` for `Evaluator::energy_of()`.
//
// **Critical constraint: determinism.** The chains advance in lock-step on
// one thread and draw from the context RNG in a fixed order.

use crate::config::McmcConfig;
use crate::context::SearchContext;
use crate::error::Result;
use crate::evaluate::Evaluator;
use crate::render::Renderer;
use procbuild_grammar::Grammar;
use procbuild_grammar::grammar::LEVELS;
use procbuild_prng::SearchRng;

/// Probability of exchanging the temperatures of two chains.
pub fn swap_acceptance(e1: f64, t1: f64, e2: f64, t2: f64) -> f64 {
    let log_ratio = (e1 - e2) * (1.0 / t1 - 1.0 / t2);
    if log_ratio >= 0.0 { 1.0 } else { log_ratio.exp() }
}

/// Metropolis probability of moving from `energy` to `next` at temperature `t`.
pub fn metropolis_acceptance(energy: f64, next: f64, t: f64) -> f64 {
    let log_ratio = (energy - next) / t;
    if log_ratio >= 0.0 { 1.0 } else { log_ratio.exp() }
}

/// Step a level by -1, 0 or +1 with equal probability, clipped to `0..=9`.
pub fn step_level(index: u8, rng: &mut SearchRng) -> u8 {
    match rng.range_u64(0, 3) {
        0 => index.saturating_sub(1),
        2 => (index + 1).min(LEVELS - 1),
        _ => index,
    }
}

/// A neighbor of `grammar`: every ranged attribute moved by one local step.
pub fn propose_local_move(grammar: &Grammar, rng: &mut SearchRng) -> Grammar {
    let mut next = grammar.clone();
    for attr in next.attrs.values_mut() {
        if attr.has_range {
            let index = step_level(attr.level_index(), rng);
            attr.set_level(index);
        }
    }
    next
}

/// One Markov chain.
#[derive(Clone, Debug)]
pub struct Chain {
    pub grammar: Grammar,
    pub energy: f64,
    pub temperature: f64,
    pub best_grammar: Grammar,
    pub best_energy: f64,
    pub proposals: u64,
    pub accepted: u64,
}

impl Chain {
    pub fn new(grammar: Grammar, energy: f64, temperature: f64) -> Self {
        Self {
            best_grammar: grammar.clone(),
            best_energy: energy,
            grammar,
            energy,
            temperature,
            proposals: 0,
            accepted: 0,
        }
    }

    fn step<R: Renderer>(
        &mut self,
        evaluator: &mut Evaluator<R>,
        cooling_factor: f64,
        ctx: &mut SearchContext,
    ) -> Result<()> {
        let next = propose_local_move(&self.grammar, &mut ctx.rng);
        let next_energy = evaluator.energy_of(&next, ctx)?;
        self.proposals += 1;
        if next_energy < self.best_energy {
            self.best_energy = next_energy;
            self.best_grammar = next.clone();
        }
        let p = metropolis_acceptance(self.energy, next_energy, self.temperature);
        if ctx.rng.next_f64() < p {
            self.grammar = next;
            self.energy = next_energy;
            self.accepted += 1;
        }
        self.temperature /= cooling_factor;
        Ok(())
    }
}

/// Progress report handed to the snapshot callback.
#[derive(Debug)]
pub struct Snapshot<'a> {
    /// Iterations completed so far.
    pub iteration: usize,
    pub best_energy: f64,
    pub best_grammar: &'a Grammar,
    pub temperatures: [f64; 2],
}

/// Outcome of a sampler run.
#[derive(Clone, Debug)]
pub struct McmcResult {
    pub best_grammar: Grammar,
    pub best_energy: f64,
    pub iterations: usize,
    pub swaps_attempted: u64,
    pub swaps_accepted: u64,
    /// Accepted local moves per chain.
    pub accepted: [u64; 2],
    pub chains: [Chain; 2],
}

fn best_of(chains: &[Chain; 2]) -> &Chain {
    if chains[1].best_energy < chains[0].best_energy {
        &chains[1]
    } else {
        &chains[0]
    }
}

/// Run the two-chain replica-exchange sampler on `grammar`.
pub fn replica_exchange<R: Renderer>(
    grammar: &Grammar,
    evaluator: &mut Evaluator<R>,
    config: &McmcConfig,
    ctx: &mut SearchContext,
    mut on_snapshot: impl FnMut(&Snapshot),
) -> Result<McmcResult> {
    let mut init = |temperature: f64, ctx: &mut SearchContext| -> Result<Chain> {
        let mut g = grammar.clone();
        g.unfix_all();
        g.randomize_all_ranged(&mut ctx.rng);
        let energy = evaluator.energy_of(&g, ctx)?;
        Ok(Chain::new(g, energy, temperature))
    };
    let cold = init(config.low_temperature, ctx)?;
    let hot = init(config.high_temperature, ctx)?;
    let mut chains = [cold, hot];

    let mut swaps_attempted = 0;
    let mut swaps_accepted = 0;

    for iteration in 0..config.iterations {
        if ctx.rng.random_bool(config.swap_probability) {
            swaps_attempted += 1;
            let [a, b] = &chains;
            let p = swap_acceptance(a.energy, a.temperature, b.energy, b.temperature);
            if ctx.rng.next_f64() < p {
                let [a, b] = &mut chains;
                std::mem::swap(&mut a.temperature, &mut b.temperature);
                swaps_accepted += 1;
            }
        } else {
            for chain in &mut chains {
                chain.step(evaluator, config.cooling_factor, ctx)?;
            }
        }

        if config.snapshot_interval > 0 && (iteration + 1) % config.snapshot_interval == 0 {
            let best = best_of(&chains);
            on_snapshot(&Snapshot {
                iteration: iteration + 1,
                best_energy: best.best_energy,
                best_grammar: &best.best_grammar,
                temperatures: [chains[0].temperature, chains[1].temperature],
            });
        }
    }

    let best = best_of(&chains);
    Ok(McmcResult {
        best_grammar: best.best_grammar.clone(),
        best_energy: best.best_energy,
        iterations: config.iterations,
        swaps_attempted,
        swaps_accepted,
        accepted: [chains[0].accepted, chains[1].accepted],
        chains,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use procbuild_grammar::Attribute;

    #[test]
    fn equal_energies_always_swap() {
        assert_eq!(swap_acceptance(3.0, 1.0, 3.0, 10.0), 1.0);
    }

    #[test]
    fn swap_probability_matches_the_ratio() {
        let (e1, t1, e2, t2): (f64, f64, f64, f64) = (0.2, 1.0, 0.9, 10.0);
        let ratio = (-e2 / t1 - e1 / t2).exp() / (-e1 / t1 - e2 / t2).exp();
        let expected = ratio.min(1.0);
        assert!((swap_acceptance(e1, t1, e2, t2) - expected).abs() < 1e-12);
        // A hot chain that found lower energy always hands it down.
        assert_eq!(swap_acceptance(0.9, 1.0, 0.2, 10.0), 1.0);
    }

    #[test]
    fn metropolis_accepts_improvements() {
        assert_eq!(metropolis_acceptance(2.0, 1.0, 1.0), 1.0);
        assert!((metropolis_acceptance(1.0, 2.0, 2.0) - (-0.5f64).exp()).abs() < 1e-12);
    }

    #[test]
    fn steps_stay_within_levels() {
        let mut rng = SearchRng::new(12);
        for _ in 0..500 {
            assert!(step_level(0, &mut rng) <= 1);
            let up = step_level(9, &mut rng);
            assert!((8..=9).contains(&up));
        }
    }

    #[test]
    fn steps_reach_all_three_neighbors() {
        let mut rng = SearchRng::new(3);
        let mut seen = [false; 3];
        for _ in 0..200 {
            seen[(step_level(5, &mut rng) - 4) as usize] = true;
        }
        assert_eq!(seen, [true; 3]);
    }

    #[test]
    fn local_move_skips_constants() {
        let mut g = Grammar::default();
        g.insert_attr(Attribute::constant("ledge", 0.3));
        g.insert_attr(Attribute::ranged("h", 1.0, 10.0));
        let mut rng = SearchRng::new(5);
        for _ in 0..50 {
            let next = propose_local_move(&g, &mut rng);
            assert_eq!(next.attr("ledge").unwrap().value, 0.3);
            let h = next.attr("h").unwrap();
            assert!(h.level_index() <= 1);
            assert_eq!(h.value, h.level_value(h.level_index()));
        }
    }
}
