// Action space: free parameters of a rule encoded as one integer.
//
// When the tree search reaches a pending nonterminal, the decision it has to
// make is "which discretized values do the free parameters of this rule
// get?". We enumerate the rule's operators in order, and each operator's
// parameter references in order; every reference that names a still-free
// attribute (ranged, not yet fixed) contributes one base-10 digit. An action
// is the integer whose digits, least significant first, are the chosen
// levels:
//
//   digit   = action % 10; action /= 10
//   value   = start + digit * (end - start) / 9
//
// A rule with k free parameters therefore has exactly 10^k actions (k = 0
// gives the single action 0). A shape name with no rule has no actions at all:
// it is a terminal.
//
// The encoding is destructive and order-dependent. The same integer means
// different things for different rules, and for the same rule under a
// different set of already-fixed attributes. Decoding must therefore run
// against the same grammar snapshot the space was computed from.
//
// An attribute referenced more than once in a rule is one parameter: only its
// first reference contributes a digit.
//
// See also: `operator.rs` for `Operator::params()` (the enumeration order),
// `derivation.rs` for `State::apply_action()`, which decodes then applies.

use crate::grammar::{Grammar, LEVELS};

/// Largest number of free parameters whose action space fits in a `u64`.
pub const MAX_FREE_PARAMETERS: usize = 19;

/// The free parameters of one rule under one grammar snapshot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActionSpace {
    /// Attribute names, in digit order (least significant first).
    pub free: Vec<String>,
}

impl ActionSpace {
    /// Compute the action space for the rule matching `shape_name`.
    ///
    /// Returns `None` when no rule matches (the shape is a terminal).
    pub fn for_shape(grammar: &Grammar, shape_name: &str) -> Option<Self> {
        let rule = grammar.rule(shape_name)?;
        let mut free: Vec<String> = Vec::new();
        for op in &rule.operators {
            for param in op.params() {
                let Some(name) = param.attribute_name() else {
                    continue;
                };
                let is_free = grammar.attr(name).is_some_and(|a| a.is_free());
                if is_free && !free.iter().any(|f| f == name) {
                    free.push(name.to_string());
                }
            }
        }
        Some(Self { free })
    }

    /// Number of actions: `10^k`.
    pub fn size(&self) -> u64 {
        // Bounded by `Grammar::validate()`; saturate rather than wrap.
        (LEVELS as u64)
            .checked_pow(self.free.len() as u32)
            .unwrap_or(u64::MAX)
    }

    /// Decode `action` into levels, assign them, and mark each attribute fixed.
    ///
    /// Returns the chosen level per free parameter, in digit order.
    pub fn decode(&self, grammar: &mut Grammar, action: u64) -> Vec<u8> {
        debug_assert!(action < self.size(), "action {action} outside space of {}", self.size());
        let mut rest = action;
        let mut levels = Vec::with_capacity(self.free.len());
        for name in &self.free {
            let digit = (rest % LEVELS as u64) as u8;
            rest /= LEVELS as u64;
            if let Some(attr) = grammar.attr_mut(name) {
                attr.set_level(digit);
                attr.fixed = true;
            }
            levels.push(digit);
        }
        levels
    }

    /// Inverse of `decode`: pack levels (digit order) into an action.
    pub fn encode(levels: &[u8]) -> u64 {
        levels
            .iter()
            .rev()
            .fold(0u64, |acc, &l| acc * LEVELS as u64 + l.min(LEVELS - 1) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Param;
    use crate::grammar::{Attribute, Rule};
    use crate::operator::{Axis, Operator, SizeMode, SplitPart};

    fn building() -> Grammar {
        let mut g = Grammar::default();
        g.insert_attr(Attribute::ranged("height", 1.0, 10.0));
        g.insert_attr(Attribute::ranged("floor_h", 2.0, 4.7));
        g.insert_attr(Attribute::ranged("ground_h", 3.0, 6.0));
        g.insert_attr(Attribute::constant("ledge", 0.2));
        g.insert_rule(Rule::new(
            "Start",
            vec![Operator::extrude_by("height"), Operator::copy("Lot")],
        ));
        g.insert_rule(Rule::new(
            "Facade",
            vec![Operator::Split {
                axis: Axis::Y,
                parts: vec![
                    SplitPart::new(Param::attr("ground_h"), SizeMode::Absolute, "Ground"),
                    SplitPart::new(Param::attr("ledge"), SizeMode::Absolute, "Ledge"),
                    SplitPart::new(Param::attr("floor_h"), SizeMode::Absolute, "Floor"),
                    SplitPart::new(Param::attr("floor_h"), SizeMode::Absolute, "Floor"),
                    SplitPart::new(Param::literal(1.0), SizeMode::Floating, "Top"),
                ],
            }],
        ));
        g
    }

    #[test]
    fn no_rule_means_no_action_space() {
        assert!(ActionSpace::for_shape(&building(), "Window").is_none());
    }

    #[test]
    fn size_is_ten_to_the_free_count() {
        let g = building();
        let start = ActionSpace::for_shape(&g, "Start").unwrap();
        assert_eq!(start.free, vec!["height"]);
        assert_eq!(start.size(), 10);

        // Constant `ledge` is skipped; repeated `floor_h` counts once.
        let facade = ActionSpace::for_shape(&g, "Facade").unwrap();
        assert_eq!(facade.free, vec!["ground_h", "floor_h"]);
        assert_eq!(facade.size(), 100);
    }

    #[test]
    fn zero_free_parameters_gives_single_action() {
        let mut g = building();
        g.attr_mut("height").unwrap().fixed = true;
        let start = ActionSpace::for_shape(&g, "Start").unwrap();
        assert!(start.free.is_empty());
        assert_eq!(start.size(), 1);
        assert!(start.decode(&mut g, 0).is_empty());
    }

    #[test]
    fn decode_assigns_digits_least_significant_first() {
        let mut g = building();
        let space = ActionSpace::for_shape(&g, "Facade").unwrap();
        let levels = space.decode(&mut g, 37);
        assert_eq!(levels, vec![7, 3]);
        let ground = g.attr("ground_h").unwrap();
        assert!(ground.fixed);
        assert!((ground.value - ground.level_value(7)).abs() < 1e-6);
        let floor = g.attr("floor_h").unwrap();
        assert!(floor.fixed);
        assert!((floor.value - 2.9).abs() < 1e-5);
        assert_eq!(ActionSpace::encode(&levels), 37);
    }

    #[test]
    fn decoding_is_idempotent_per_snapshot() {
        let g = building();
        let space = ActionSpace::for_shape(&g, "Facade").unwrap();
        let mut a = g.clone();
        let mut b = g.clone();
        space.decode(&mut a, 58);
        space.decode(&mut b, 58);
        assert_eq!(a, b);
    }

    #[test]
    fn fixing_shrinks_later_spaces() {
        let mut g = building();
        let space = ActionSpace::for_shape(&g, "Facade").unwrap();
        space.decode(&mut g, 0);
        let again = ActionSpace::for_shape(&g, "Facade").unwrap();
        assert_eq!(again.size(), 1);
    }
}
