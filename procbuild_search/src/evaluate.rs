// The derive -> render -> score pipeline shared by both search algorithms.
//
// An `Evaluator` owns the rendering collaborator, the target's distance field,
// the metric weights, and the derivation limits. It answers two questions:
// - `rollout(state)`: how good is this partial derivation after a random
//   completion? (tree search; the state itself is left untouched)
// - `energy_of(grammar)`: how good is this full parameter assignment?
//   (replica-exchange sampler; derives from the axiom with values as they
//   stand)
// Both return the metric score (lower is better); callers convert to
// `exp(-score)` where they need a value.
//
// Every call updates the counters in the `SearchContext`: derivations,
// truncations, expansions, renders, and time spent per phase.
//
// See also: `metric.rs`, `render.rs`, `procbuild_grammar::derivation`.

use crate::config::MetricConfig;
use crate::context::SearchContext;
use crate::error::{Result, SearchError};
use crate::metric::{DistanceField, score};
use crate::render::{RenderMode, Renderer};
use image::GrayImage;
use procbuild_grammar::{DerivationLimits, DerivationOutcome, Face, Grammar, Shape, State};
use procbuild_prng::SearchRng;
use std::time::Instant;

/// Scores derivations against a fixed target image.
pub struct Evaluator<R: Renderer> {
    renderer: R,
    target: DistanceField,
    metric: MetricConfig,
    limits: DerivationLimits,
    axiom: Shape,
}

impl<R: Renderer> Evaluator<R> {
    /// Build an evaluator for `target`, which must match the renderer's size.
    pub fn new(renderer: R, target: &GrayImage, metric: MetricConfig, limits: DerivationLimits) -> Result<Self> {
        let (expected_width, expected_height) = renderer.dimensions();
        let (width, height) = target.dimensions();
        if (width, height) != (expected_width, expected_height) {
            return Err(SearchError::DimensionMismatch {
                expected_width,
                expected_height,
                width,
                height,
            });
        }
        let target = DistanceField::from_image(target, metric.edge_threshold);
        Ok(Self {
            renderer,
            target,
            metric,
            limits,
            axiom: Shape::axiom(),
        })
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn target(&self) -> &DistanceField {
        &self.target
    }

    pub fn limits(&self) -> &DerivationLimits {
        &self.limits
    }

    pub fn metric(&self) -> &MetricConfig {
        &self.metric
    }

    /// The shape every derivation starts from.
    pub fn axiom(&self) -> &Shape {
        &self.axiom
    }

    /// A fresh derivation state for `grammar`.
    pub fn initial_state(&self, grammar: &Grammar) -> State {
        State::new(self.axiom.clone(), grammar.clone())
    }

    /// Render and score a set of faces.
    pub fn score_faces(&mut self, faces: &[Face], ctx: &mut SearchContext) -> Result<f64> {
        let started = Instant::now();
        let img = self.renderer.render(faces, RenderMode::Line);
        ctx.stats.renders += 1;
        ctx.stats.render_time += started.elapsed();

        let started = Instant::now();
        let field = DistanceField::from_image(&img, self.metric.edge_threshold);
        let s = score(&field, &self.target, &self.metric);
        ctx.stats.score_time += started.elapsed();
        s
    }

    /// Score of a random completion of `state`. `state` is not modified.
    pub fn rollout(&mut self, state: &State, ctx: &mut SearchContext) -> Result<f64> {
        let mut sim = state.clone();
        let started = Instant::now();
        let outcome = sim.derive_random(&mut ctx.rng, &self.limits)?;
        record_derivation(ctx, &outcome, started);
        self.score_faces(&sim.faces(false), ctx)
    }

    /// Energy of a full parameter assignment: derive from the axiom with the
    /// grammar's current values, render, and score.
    pub fn energy_of(&mut self, grammar: &Grammar, ctx: &mut SearchContext) -> Result<f64> {
        let mut state = self.initial_state(grammar);
        let started = Instant::now();
        let outcome = state.derive_to_completion(&self.limits)?;
        record_derivation(ctx, &outcome, started);
        self.score_faces(&state.faces(false), ctx)
    }

    /// Render `state` for display. Pending leaves are drawn when
    /// `include_pending` is set, so partial derivations show their scopes.
    pub fn render_state(&mut self, state: &State, mode: RenderMode, include_pending: bool) -> GrayImage {
        self.renderer.render(&state.faces(include_pending), mode)
    }

    /// Render the full derivation of `grammar` with its current values.
    pub fn render_grammar(&mut self, grammar: &Grammar, mode: RenderMode) -> Result<GrayImage> {
        let mut state = self.initial_state(grammar);
        state.derive_to_completion(&self.limits)?;
        Ok(self.renderer.render(&state.faces(false), mode))
    }
}

fn record_derivation(ctx: &mut SearchContext, outcome: &DerivationOutcome, started: Instant) {
    ctx.stats.derive_time += started.elapsed();
    ctx.stats.derivations += 1;
    ctx.stats.expansions += outcome.expansions as u64;
    if outcome.is_truncated() {
        ctx.stats.truncated_derivations += 1;
    }
}

/// A random building: every ranged attribute gets a random level, then the
/// grammar is derived to completion from the axiom.
///
/// Returns the randomized grammar and the finished state.
pub fn random_building(
    grammar: &Grammar,
    rng: &mut SearchRng,
    limits: &DerivationLimits,
) -> Result<(Grammar, State, DerivationOutcome)> {
    let mut params = grammar.clone();
    params.unfix_all();
    params.randomize_all_ranged(rng);
    let mut state = State::new(Shape::axiom(), params.clone());
    let outcome = state.derive_to_completion(limits)?;
    Ok((params, state, outcome))
}
