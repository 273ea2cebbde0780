// Procbuild Shape Grammar
//
// A parametric shape grammar for procedural buildings, plus the derivation
// engine that expands it. A grammar is a set of named numeric attributes
// (optionally ranged, discretized into ten levels) and named production rules
// whose operators rewrite oriented box scopes into successor shapes. Deriving
// from the axiom yields a tree whose terminal leaves are renderable faces.
//
// Architecture:
// - grammar.rs: Attributes, rules, the `Grammar` container, JSON loading and
//   validation, random level assignment
// - expr.rs: Parameter expressions (`height * 0.5`, `scope.sx - 1`)
// - operator.rs: Shape operators (extrude, split, repeat, comp, ...)
// - shape.rs: Oriented scopes and face generation
// - geom.rs: Minimal column-major 4x4 matrix math
// - action.rs: Free parameters of a rule encoded as one base-10 integer
// - derivation.rs: Arena derivation tree, pending queue, guided and full
//   expansion with step/depth/node/time limits
// - error.rs: `GrammarError`
//
// **Critical constraint: determinism.** Given the same grammar, seed, and
// sequence of actions, derivation produces bit-identical trees. All
// randomness flows through `procbuild_prng::SearchRng`, and every collection
// that is iterated during derivation has a stable order.

pub mod action;
pub mod derivation;
pub mod error;
pub mod expr;
pub mod geom;
pub mod grammar;
pub mod operator;
pub mod shape;

pub use action::ActionSpace;
pub use derivation::{DerivationLimits, DerivationOutcome, NodeId, State, StopReason};
pub use error::{GrammarError, Result};
pub use grammar::{Attribute, Grammar, Rule};
pub use shape::{Face, Shape};
