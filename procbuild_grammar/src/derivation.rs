// The derivation engine: expanding a tree of nonterminals with grammar rules.
//
// A derivation tree is an arena of `Nonterminal` records addressed by
// `NodeId`. Each record owns its shape, a status, its depth, and the ids of
// its children; there are no parent links and no shared ownership, so cloning
// a tree is a plain deep copy and two search branches can never alias each
// other's nodes.
//
// `State` bundles a tree with a FIFO queue of pending node ids and the grammar
// snapshot those nodes will be expanded against. Expanding a node means
// looking up the rule for its shape name, running the rule's operators in
// order, and turning every emitted successor into a child node. Successors
// with no matching rule are classified as terminals on the spot; the rest are
// appended to the queue. If the operator chain runs to the end with a shape
// still in hand, that shape becomes a terminal leaf child (a rule like
// `Start -> extrude(h)` yields a box).
//
// Two modes drive expansion:
// - guided (`State::apply_action`): decode one action into fixed values for
//   the front node's free parameters, then expand exactly that node;
// - full (`derive_random` / `derive_to_completion`): optionally assign every
//   free attribute a random level first, then pop and expand until the queue
//   is empty or a `DerivationLimits` budget runs out.
//
// Budget exhaustion is a truncation, not an error. `DerivationOutcome` says
// which budget stopped the run so callers can tell a complete derivation from
// a cut-off one. The node budget is enforced inside a single expansion too: a
// rule whose operators would emit more successors than the tree has room for
// keeps only what fits and stops the run. Pending nodes left behind are abandoned: they are excluded
// from rendering unless a caller explicitly asks for a preview.
//
// Queue order: the canonical order is breadth-first over pending nodes, with
// children in emission order. FIFO expansion appends in exactly that order,
// and `State::clone()` rebuilds its queue by a BFS over the cloned tree, so a
// clone processes nonterminals in the same order as the original.
//
// See also: `action.rs` for action decoding, `operator.rs` for rule
// operators, `shape.rs` for terminal geometry.

use crate::action::ActionSpace;
use crate::error::Result;
use crate::grammar::Grammar;
use crate::shape::{Face, Shape};
use procbuild_prng::SearchRng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Index of a node in a `DerivationTree` arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const ROOT: NodeId = NodeId(0);

    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Where a node is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Waiting in the queue for its rule to be applied.
    Pending,
    /// Its rule has been applied; its children carry the geometry.
    Expanded,
    /// No rule matches; contributes its own shape as geometry.
    Terminal,
}

/// A derivation-tree node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Nonterminal {
    pub shape: Shape,
    pub status: NodeStatus,
    pub depth: u32,
    pub children: SmallVec<[NodeId; 4]>,
}

impl Nonterminal {
    /// True once a rule has been applied or the node is known terminal.
    pub fn visited(&self) -> bool {
        self.status != NodeStatus::Pending
    }
}

/// Arena-backed derivation tree. Node 0 is the root.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DerivationTree {
    nodes: Vec<Nonterminal>,
}

impl DerivationTree {
    pub fn new(root: Shape) -> Self {
        Self {
            nodes: vec![Nonterminal {
                shape: root,
                status: NodeStatus::Pending,
                depth: 0,
                children: SmallVec::new(),
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Nonterminal {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Nonterminal {
        &mut self.nodes[id.index()]
    }

    /// Append a child under `parent` and return its id.
    pub fn push_child(&mut self, parent: NodeId, shape: Shape, status: NodeStatus) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let depth = self.nodes[parent.index()].depth + 1;
        self.nodes.push(Nonterminal {
            shape,
            status,
            depth,
            children: SmallVec::new(),
        });
        self.nodes[parent.index()].children.push(id);
        id
    }

    /// All node ids in breadth-first order from the root.
    pub fn bfs(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut frontier = VecDeque::from([NodeId::ROOT]);
        while let Some(id) = frontier.pop_front() {
            order.push(id);
            frontier.extend(self.node(id).children.iter().copied());
        }
        order
    }

    /// Pending node ids in canonical (breadth-first) queue order.
    pub fn pending_in_order(&self) -> VecDeque<NodeId> {
        self.bfs()
            .into_iter()
            .filter(|&id| !self.node(id).visited())
            .collect()
    }

    /// Renderable geometry of every leaf terminal.
    ///
    /// Pending leaves are abandoned unless `include_pending` is set, which is
    /// only meant for previewing a partial derivation.
    pub fn collect_faces(&self, include_pending: bool) -> Vec<Face> {
        let mut faces = Vec::new();
        for node in &self.nodes {
            if !node.children.is_empty() {
                continue;
            }
            match node.status {
                NodeStatus::Terminal => node.shape.generate_faces(&mut faces),
                NodeStatus::Pending if include_pending => node.shape.generate_faces(&mut faces),
                _ => {}
            }
        }
        faces
    }

    /// Names of leaf terminals, in arena order. Mostly useful in tests.
    pub fn terminal_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter(|n| n.children.is_empty() && n.status == NodeStatus::Terminal)
            .map(|n| n.shape.name.as_str())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Limits and outcomes
// ---------------------------------------------------------------------------

/// Bounds on a full derivation. Runaway recursive grammars stop here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DerivationLimits {
    /// Maximum rule applications.
    pub max_steps: usize,
    /// Nodes deeper than this are never expanded.
    pub max_depth: u32,
    /// The tree never grows past this many nodes, even within one expansion.
    pub max_nodes: usize,
    /// Optional wall-clock budget in milliseconds.
    pub max_millis: Option<u64>,
}

impl Default for DerivationLimits {
    fn default() -> Self {
        Self {
            max_steps: 100,
            max_depth: 64,
            max_nodes: 20_000,
            max_millis: None,
        }
    }
}

impl DerivationLimits {
    /// No practical bound. Only for grammars known to terminate.
    pub fn unbounded() -> Self {
        Self {
            max_steps: usize::MAX,
            max_depth: u32::MAX,
            max_nodes: u32::MAX as usize,
            max_millis: None,
        }
    }
}

/// Why a full derivation stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The queue emptied.
    Completed,
    /// The queue emptied, but nodes deeper than `max_depth` were skipped.
    DepthBudget,
    StepBudget,
    NodeBudget,
    TimeBudget,
}

/// Summary of a full derivation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationOutcome {
    /// Rule applications performed.
    pub expansions: usize,
    pub stop: StopReason,
    /// Pending nodes left in the queue when the run stopped.
    pub abandoned: usize,
    /// Nodes skipped because they were deeper than `max_depth`.
    pub depth_pruned: usize,
}

impl DerivationOutcome {
    /// True when any part of the derivation was cut off.
    pub fn is_truncated(&self) -> bool {
        self.stop != StopReason::Completed || self.depth_pruned > 0
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// A derivation in progress: tree, pending queue, and grammar snapshot.
#[derive(Debug)]
pub struct State {
    pub tree: DerivationTree,
    pub queue: VecDeque<NodeId>,
    pub grammar: Grammar,
}

impl Clone for State {
    /// Deep-copies tree and grammar; the queue is rebuilt from the cloned tree
    /// in canonical breadth-first order.
    fn clone(&self) -> Self {
        let tree = self.tree.clone();
        let queue = tree.pending_in_order();
        Self {
            tree,
            queue,
            grammar: self.grammar.clone(),
        }
    }
}

impl State {
    /// A fresh derivation: `axiom` pending at the root.
    pub fn new(axiom: Shape, grammar: Grammar) -> Self {
        Self {
            tree: DerivationTree::new(axiom),
            queue: VecDeque::from([NodeId::ROOT]),
            grammar,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.queue.is_empty()
    }

    /// The node the next guided step will expand.
    pub fn front(&self) -> Option<NodeId> {
        self.queue.front().copied()
    }

    /// Action space of the front node, or `None` when the queue is empty or
    /// the front node is a terminal.
    pub fn front_action_space(&self) -> Option<ActionSpace> {
        let id = self.front()?;
        ActionSpace::for_shape(&self.grammar, &self.tree.node(id).shape.name)
    }

    /// Guided single step: pop the front node, decode `action` into fixed
    /// values for its rule's free parameters, and apply the rule once.
    ///
    /// The tree is held to the default node budget. Returns `false` when there
    /// was nothing to expand.
    pub fn apply_action(&mut self, action: u64) -> Result<bool> {
        self.apply_action_within(action, DerivationLimits::default().max_nodes)
    }

    /// `apply_action` with an explicit node budget. Successors that do not fit
    /// in `max_nodes` are dropped.
    pub fn apply_action_within(&mut self, action: u64, max_nodes: usize) -> Result<bool> {
        let Some(id) = self.queue.pop_front() else {
            return Ok(false);
        };
        if self.tree.node(id).visited() {
            return Ok(false);
        }
        if let Some(space) = ActionSpace::for_shape(&self.grammar, &self.tree.node(id).shape.name) {
            space.decode(&mut self.grammar, action);
        }
        expand_node(&mut self.tree, &mut self.queue, &self.grammar, id, max_nodes)?;
        Ok(true)
    }

    /// Full random derivation: give every still-free attribute a random level,
    /// then expand to completion within `limits`.
    pub fn derive_random(&mut self, rng: &mut SearchRng, limits: &DerivationLimits) -> Result<DerivationOutcome> {
        self.grammar.randomize_free(rng);
        self.derive_to_completion(limits)
    }

    /// Expand to completion within `limits` using attribute values as they
    /// stand.
    pub fn derive_to_completion(&mut self, limits: &DerivationLimits) -> Result<DerivationOutcome> {
        let started = Instant::now();
        let deadline = limits.max_millis.map(Duration::from_millis);
        let mut expansions = 0;
        let mut depth_pruned = 0;

        let drained = |depth_pruned: usize| {
            if depth_pruned > 0 {
                StopReason::DepthBudget
            } else {
                StopReason::Completed
            }
        };

        let stop = loop {
            if self.queue.is_empty() {
                break drained(depth_pruned);
            }
            if expansions >= limits.max_steps {
                break StopReason::StepBudget;
            }
            if self.tree.len() >= limits.max_nodes {
                break StopReason::NodeBudget;
            }
            if deadline.is_some_and(|d| started.elapsed() >= d) {
                break StopReason::TimeBudget;
            }

            let Some(id) = self.queue.pop_front() else {
                break drained(depth_pruned);
            };
            if self.tree.node(id).visited() {
                continue;
            }
            if self.tree.node(id).depth > limits.max_depth {
                depth_pruned += 1;
                continue;
            }
            match expand_node(&mut self.tree, &mut self.queue, &self.grammar, id, limits.max_nodes)? {
                Expansion::Terminal => {}
                Expansion::Expanded => expansions += 1,
                Expansion::Clipped => {
                    expansions += 1;
                    break StopReason::NodeBudget;
                }
            }
        };

        Ok(DerivationOutcome {
            expansions,
            stop,
            abandoned: self.queue.len(),
            depth_pruned,
        })
    }

    /// Geometry of the derivation so far. See `DerivationTree::collect_faces`.
    pub fn faces(&self, include_pending: bool) -> Vec<Face> {
        self.tree.collect_faces(include_pending)
    }
}

/// What `expand_node` did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expansion {
    /// No rule matched; the node is now a terminal.
    Terminal,
    Expanded,
    /// The rule ran out of node budget; some successors were dropped.
    Clipped,
}

/// Apply the matching rule to node `id`, appending children and enqueueing
/// the ones that still need a rule. The tree never grows past `max_nodes`.
fn expand_node(
    tree: &mut DerivationTree,
    queue: &mut VecDeque<NodeId>,
    grammar: &Grammar,
    id: NodeId,
    max_nodes: usize,
) -> Result<Expansion> {
    let Some(rule) = grammar.rule(&tree.node(id).shape.name) else {
        tree.node_mut(id).status = NodeStatus::Terminal;
        return Ok(Expansion::Terminal);
    };
    tree.node_mut(id).status = NodeStatus::Expanded;

    let mut current = Some(tree.node(id).shape.clone());
    let mut emitted = Vec::new();
    for op in &rule.operators {
        let Some(shape) = current.take() else {
            break;
        };
        let room = max_nodes.saturating_sub(tree.len());
        // One past the room, so an overflow is visible.
        current = op.apply_bounded(shape, grammar, &mut emitted, room.saturating_add(1))?;
        let clipped = emitted.len() > room;
        emitted.truncate(room);
        for child in emitted.drain(..) {
            if grammar.has_rule(&child.name) {
                let cid = tree.push_child(id, child, NodeStatus::Pending);
                queue.push_back(cid);
            } else {
                tree.push_child(id, child, NodeStatus::Terminal);
            }
        }
        if clipped {
            return Ok(Expansion::Clipped);
        }
    }
    if let Some(survivor) = current {
        if tree.len() >= max_nodes {
            return Ok(Expansion::Clipped);
        }
        tree.push_child(id, survivor, NodeStatus::Terminal);
    }
    Ok(Expansion::Expanded)
}
