// Monte Carlo tree search over derivation actions.
//
// One outer step decides the parameter values of one nonterminal: the front
// of the live derivation's queue. A `SearchTree` is rooted at the live state;
// each tree node holds a derivation `State`, the actions not yet tried at
// that state's front nonterminal, its realized children, and value
// statistics. Each iteration runs:
//
// 1. Select: from the root, while a node has no untried actions and has
//    children, descend into the non-value-fixed child with the highest UCT
//    score `best + C * sqrt(2 ln(parent visits) / child visits)`. Unvisited
//    children score `unvisited_priority` plus a random jitter so every child
//    is tried once before exploitation.
// 2. Expand: draw one untried action uniformly without replacement, clone the
//    node's state, apply the action, and link the resulting child.
// 3. Simulate: score a random completion of the new node's state, turned into
//    a value with `exp(-score)`.
// 4. Backpropagate: walk to the root updating visits, best value, and the
//    running mean/variance. A node with no untried actions whose children are
//    all value-fixed (vacuously, for a true leaf) becomes value-fixed itself.
//    Value fixation is one-way.
//
// The inner loop stops after `max_iterations`, when the root becomes
// value-fixed, or when the root has no untried actions and at most one live
// child. The outer driver then commits the root's best child (highest best
// value), discards the tree, and searches again from the child's state until
// the queue empties, no choice remains, or `max_derivation_steps` is reached.
//
// Action spaces grow as 10^k, so untried actions are never materialized: the
// `ActionPool` is a sparse Fisher-Yates shuffle that only records the
// positions it has swapped.
//
// See also: `evaluate.rs` for rollouts, `procbuild_grammar::action` for
// action decoding.
//
// **Critical constraint: determinism.** All random draws (action sampling,
// rollout values, UCT jitter) come from the `SearchContext` RNG in a fixed
// order, so a seed reproduces the whole search.

use crate::config::MctsConfig;
use crate::context::SearchContext;
use crate::error::Result;
use crate::evaluate::Evaluator;
use crate::metric::value_of;
use crate::render::Renderer;
use procbuild_grammar::{Grammar, State};
use procbuild_prng::SearchRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Action pool
// ---------------------------------------------------------------------------

/// Untried actions `[0, size)`, drawn uniformly without replacement.
#[derive(Clone, Debug, Default)]
pub struct ActionPool {
    remaining: u64,
    /// Positions whose value differs from the position itself.
    swapped: BTreeMap<u64, u64>,
}

impl ActionPool {
    pub fn new(size: u64) -> Self {
        Self {
            remaining: size,
            swapped: BTreeMap::new(),
        }
    }

    pub fn len(&self) -> u64 {
        self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.remaining == 0
    }

    fn value_at(&self, pos: u64) -> u64 {
        self.swapped.get(&pos).copied().unwrap_or(pos)
    }

    pub fn draw(&mut self, rng: &mut SearchRng) -> Option<u64> {
        if self.remaining == 0 {
            return None;
        }
        let last = self.remaining - 1;
        let pos = rng.range_u64(0, self.remaining);
        let picked = self.value_at(pos);
        let tail = self.value_at(last);
        if pos != last {
            self.swapped.insert(pos, tail);
        }
        self.swapped.remove(&last);
        self.remaining = last;
        Some(picked)
    }
}

// ---------------------------------------------------------------------------
// Running statistics
// ---------------------------------------------------------------------------

/// Welford's online mean and variance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn push(&mut self, x: f64) {
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance; 0 with fewer than two samples.
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Search tree
// ---------------------------------------------------------------------------

/// One node of the search tree.
#[derive(Clone, Debug)]
pub struct MctsNode {
    pub state: State,
    /// The action that produced this node from its parent.
    pub action: Option<u64>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
    pub visits: u64,
    pub best_value: f64,
    pub values: RunningStats,
    /// Subtree exhaustively evaluated; never reverts.
    pub value_fixed: bool,
    untried: ActionPool,
}

impl MctsNode {
    fn new(state: State, action: Option<u64>, parent: Option<usize>) -> Self {
        let size = state.front_action_space().map_or(0, |space| space.size());
        Self {
            state,
            action,
            parent,
            children: Vec::new(),
            visits: 0,
            best_value: 0.0,
            values: RunningStats::default(),
            value_fixed: false,
            untried: ActionPool::new(size),
        }
    }

    pub fn untried_count(&self) -> u64 {
        self.untried.len()
    }
}

/// Arena-backed search tree; index 0 is the root.
pub struct SearchTree {
    nodes: Vec<MctsNode>,
}

impl SearchTree {
    pub const ROOT: usize = 0;

    pub fn new(state: State) -> Self {
        Self {
            nodes: vec![MctsNode::new(state, None, None)],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn root(&self) -> &MctsNode {
        &self.nodes[Self::ROOT]
    }

    pub fn node(&self, id: usize) -> &MctsNode {
        &self.nodes[id]
    }

    pub fn nodes(&self) -> impl Iterator<Item = &MctsNode> {
        self.nodes.iter()
    }

    fn live_children(&self, id: usize) -> usize {
        self.nodes[id]
            .children
            .iter()
            .filter(|&&c| !self.nodes[c].value_fixed)
            .count()
    }

    /// True when further iterations cannot change the decision at the root.
    pub fn is_settled(&self) -> bool {
        let root = self.root();
        root.value_fixed || (root.untried.is_empty() && self.live_children(Self::ROOT) <= 1)
    }

    fn select(&self, config: &MctsConfig, rng: &mut SearchRng) -> usize {
        let mut id = Self::ROOT;
        loop {
            let node = &self.nodes[id];
            if !node.untried.is_empty() || node.children.is_empty() {
                return id;
            }
            let ln_parent = (node.visits.max(1) as f64).ln();
            let mut best: Option<(usize, f64)> = None;
            for &c in &node.children {
                let child = &self.nodes[c];
                if child.value_fixed {
                    continue;
                }
                let uct = if child.visits == 0 {
                    config.unvisited_priority + rng.range_u64(0, config.unvisited_jitter.max(1)) as f64
                } else {
                    child.best_value + config.exploration * (2.0 * ln_parent / child.visits as f64).sqrt()
                };
                if best.is_none_or(|(_, s)| uct > s) {
                    best = Some((c, uct));
                }
            }
            match best {
                Some((c, _)) => id = c,
                None => return id,
            }
        }
    }

    fn expand(&mut self, id: usize, max_nodes: usize, rng: &mut SearchRng) -> Result<usize> {
        let Some(action) = self.nodes[id].untried.draw(rng) else {
            return Ok(id);
        };
        let mut state = self.nodes[id].state.clone();
        state.apply_action_within(action, max_nodes)?;
        let child = self.nodes.len();
        self.nodes.push(MctsNode::new(state, Some(action), Some(id)));
        self.nodes[id].children.push(child);
        Ok(child)
    }

    fn backpropagate(&mut self, id: usize, value: f64) {
        let mut cursor = Some(id);
        while let Some(i) = cursor {
            let all_children_fixed = self.nodes[i]
                .children
                .iter()
                .all(|&c| self.nodes[c].value_fixed);
            let node = &mut self.nodes[i];
            node.visits += 1;
            node.values.push(value);
            if node.visits == 1 || value > node.best_value {
                node.best_value = value;
            }
            if node.untried.is_empty() && all_children_fixed {
                node.value_fixed = true;
            }
            cursor = node.parent;
        }
    }

    /// One select/expand/simulate/backpropagate round.
    pub fn iterate<R: Renderer>(
        &mut self,
        evaluator: &mut Evaluator<R>,
        config: &MctsConfig,
        ctx: &mut SearchContext,
    ) -> Result<()> {
        let selected = self.select(config, &mut ctx.rng);
        let leaf = self.expand(selected, evaluator.limits().max_nodes, &mut ctx.rng)?;
        let value = value_of(evaluator.rollout(&self.nodes[leaf].state, ctx)?);
        self.backpropagate(leaf, value);
        Ok(())
    }

    /// Iterate until settled or out of budget. Returns iterations run.
    pub fn search<R: Renderer>(
        &mut self,
        evaluator: &mut Evaluator<R>,
        config: &MctsConfig,
        ctx: &mut SearchContext,
    ) -> Result<usize> {
        let mut iterations = 0;
        while iterations < config.max_iterations && !self.is_settled() {
            self.iterate(evaluator, config, ctx)?;
            iterations += 1;
        }
        Ok(iterations)
    }

    /// The root child with the highest best value; earliest wins ties.
    pub fn best_child(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for &c in &self.root().children {
            if best.is_none_or(|b| self.nodes[c].best_value > self.nodes[b].best_value) {
                best = Some(c);
            }
        }
        best
    }

    fn into_state(mut self, id: usize) -> State {
        self.nodes.swap_remove(id).state
    }
}

// ---------------------------------------------------------------------------
// Outer driver
// ---------------------------------------------------------------------------

/// Statistics of one root child at decision time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub action: u64,
    pub visits: u64,
    pub best_value: f64,
}

/// What one outer step decided.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: usize,
    pub chosen_action: u64,
    /// Value of the committed child.
    pub best_value: f64,
    pub iterations: usize,
    /// Every root child, in creation order.
    pub children: Vec<ChildSummary>,
}

impl StepRecord {
    /// One `visits.txt` line: `action(#visits: N, #val: V)` per root child.
    pub fn visits_line(&self) -> String {
        self.children
            .iter()
            .map(|c| format!("{}(#visits: {}, #val: {})", c.action, c.visits, c.best_value))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of a full tree-search run.
#[derive(Debug)]
pub struct InverseResult {
    /// The live derivation after every committed decision. May still have
    /// pending nodes if the step budget ran out.
    pub state: State,
    pub steps: Vec<StepRecord>,
    /// Value of the last committed decision (0 if none was made).
    pub best_value: f64,
}

/// Resolve `grammar`'s free parameters one nonterminal at a time.
///
/// `on_step` sees each decision and the live state right after it is
/// committed, for progress logging and previews.
pub fn inverse_mcts<R: Renderer>(
    grammar: &Grammar,
    evaluator: &mut Evaluator<R>,
    config: &MctsConfig,
    ctx: &mut SearchContext,
    mut on_step: impl FnMut(&StepRecord, &State),
) -> Result<InverseResult> {
    let mut live = evaluator.initial_state(grammar);
    let mut steps = Vec::new();
    let mut best_value = 0.0;

    for step in 0..config.max_derivation_steps {
        if live.is_complete() {
            break;
        }
        let mut tree = SearchTree::new(live.clone());
        if tree.root().untried.is_empty() {
            break;
        }
        let iterations = tree.search(evaluator, config, ctx)?;
        let Some(best) = tree.best_child() else {
            break;
        };

        let children = tree
            .root()
            .children
            .iter()
            .map(|&c| {
                let child = tree.node(c);
                ChildSummary {
                    action: child.action.unwrap_or(0),
                    visits: child.visits,
                    best_value: child.best_value,
                }
            })
            .collect();
        let record = StepRecord {
            step,
            chosen_action: tree.node(best).action.unwrap_or(0),
            best_value: tree.node(best).best_value,
            iterations,
            children,
        };

        best_value = record.best_value;
        live = tree.into_state(best);
        on_step(&record, &live);
        steps.push(record);
    }

    Ok(InverseResult {
        state: live,
        steps,
        best_value,
    })
}
