// The in-memory grammar model: named attributes and named production rules.
//
// An `Attribute` is a numeric parameter with an optional declared range. When
// a range is declared the attribute is discretized into ten evenly spaced
// levels (`level_value(0) == start`, `level_value(9) == end`); every value the
// search ever assigns is one of those levels. The `fixed` flag records that a
// value has been committed during the current derivation run and may no
// longer be chosen.
//
// A `Rule` maps a nonterminal name to an ordered operator sequence and never
// changes after load. Attributes, by contrast, are mutated in place during
// derivation and by search proposals, which is why search code clones whole
// `Grammar` values as snapshots.
//
// Loading goes through `Grammar::from_json()`, which parses every parameter
// expression and then runs `validate()`. A grammar that fails validation is
// never handed to the derivation engine.
//
// See also: `operator.rs` for the operator variants, `expr.rs` for parameter
// expressions, `action.rs` for how free attributes become search actions.
//
// **Critical constraint: determinism.** Attributes and rules live in
// `BTreeMap`s so iteration order (and therefore RNG consumption order during
// randomization) is stable.

use crate::action::MAX_FREE_PARAMETERS;
use crate::error::{GrammarError, Result};
use crate::operator::Operator;
use procbuild_prng::SearchRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Number of discretization levels per ranged attribute.
pub const LEVELS: u8 = 10;

// ---------------------------------------------------------------------------
// Attribute
// ---------------------------------------------------------------------------

/// A named numeric grammar parameter.
///
/// In grammar sources `has_range` may be omitted: declaring either end of a
/// range makes the attribute ranged.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "AttributeSource")]
pub struct Attribute {
    pub name: String,
    pub range_start: f32,
    pub range_end: f32,
    pub value: f32,
    /// Set once a value has been committed during a derivation run.
    pub fixed: bool,
    /// Attributes without a declared range are constants.
    pub has_range: bool,
}

/// An attribute as written in a grammar source.
#[derive(Deserialize)]
struct AttributeSource {
    name: String,
    range_start: Option<f32>,
    range_end: Option<f32>,
    value: f32,
    #[serde(default)]
    fixed: bool,
    has_range: Option<bool>,
}

impl From<AttributeSource> for Attribute {
    fn from(src: AttributeSource) -> Self {
        let declared = src.range_start.is_some() || src.range_end.is_some();
        Self {
            name: src.name,
            range_start: src.range_start.unwrap_or_default(),
            range_end: src.range_end.unwrap_or_default(),
            value: src.value,
            fixed: src.fixed,
            has_range: src.has_range.unwrap_or(declared),
        }
    }
}

impl Attribute {
    /// A ranged attribute, initialized to its lowest level.
    pub fn ranged(name: &str, start: f32, end: f32) -> Self {
        Self {
            name: name.to_string(),
            range_start: start,
            range_end: end,
            value: start,
            fixed: false,
            has_range: true,
        }
    }

    /// A constant attribute with no range.
    pub fn constant(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            range_start: value,
            range_end: value,
            value,
            fixed: false,
            has_range: false,
        }
    }

    /// Whether the search may still choose this attribute's value.
    pub fn is_free(&self) -> bool {
        self.has_range && !self.fixed
    }

    /// Spacing between adjacent levels.
    pub fn unit(&self) -> f32 {
        (self.range_end - self.range_start) / (LEVELS - 1) as f32
    }

    /// The value of discretization level `index` (clamped to `0..=9`).
    pub fn level_value(&self, index: u8) -> f32 {
        let index = index.min(LEVELS - 1);
        self.range_start + index as f32 * self.unit()
    }

    /// The level nearest to the current value, clipped to `0..=9`.
    pub fn level_index(&self) -> u8 {
        let unit = self.unit();
        if unit == 0.0 {
            return 0;
        }
        let raw = ((self.value - self.range_start) / unit).round();
        raw.clamp(0.0, (LEVELS - 1) as f32) as u8
    }

    /// Set the value to a level, leaving `fixed` untouched.
    pub fn set_level(&mut self, index: u8) {
        self.value = self.level_value(index);
    }

    fn validate(&self) -> Result<()> {
        if !self.value.is_finite() || !self.range_start.is_finite() || !self.range_end.is_finite() {
            return Err(GrammarError::NonFinite {
                name: self.name.clone(),
            });
        }
        if !self.has_range {
            return Ok(());
        }
        if self.range_start > self.range_end {
            return Err(GrammarError::InvalidRange {
                name: self.name.clone(),
                start: self.range_start,
                end: self.range_end,
            });
        }
        // Small tolerance for values written with rounded decimals.
        let slack = (self.range_end - self.range_start).abs() * 1e-4 + 1e-6;
        if self.value < self.range_start - slack || self.value > self.range_end + slack {
            return Err(GrammarError::ValueOutOfRange {
                name: self.name.clone(),
                value: self.value,
                start: self.range_start,
                end: self.range_end,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Rule
// ---------------------------------------------------------------------------

/// A production rule: nonterminal name to an ordered operator sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    pub operators: Vec<Operator>,
}

impl Rule {
    pub fn new(name: &str, operators: Vec<Operator>) -> Self {
        Self {
            name: name.to_string(),
            operators,
        }
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

/// Named attributes plus named rules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Grammar {
    #[serde(default)]
    pub attrs: BTreeMap<String, Attribute>,
    #[serde(default)]
    pub rules: BTreeMap<String, Rule>,
}

impl Grammar {
    /// Parse and validate a grammar from its JSON description.
    pub fn from_json(json: &str) -> Result<Self> {
        let grammar: Grammar = serde_json::from_str(json)?;
        grammar.validate()?;
        Ok(grammar)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn insert_attr(&mut self, attr: Attribute) {
        self.attrs.insert(attr.name.clone(), attr);
    }

    pub fn insert_rule(&mut self, rule: Rule) {
        self.rules.insert(rule.name.clone(), rule);
    }

    pub fn attr(&self, name: &str) -> Option<&Attribute> {
        self.attrs.get(name)
    }

    pub fn attr_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attrs.get_mut(name)
    }

    pub fn rule(&self, name: &str) -> Option<&Rule> {
        self.rules.get(name)
    }

    pub fn has_rule(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Check everything that would make derivation ill-defined.
    ///
    /// - every attribute's range is ordered and its value finite and in range;
    /// - every attribute an expression reads exists;
    /// - every rule is keyed by its own name;
    /// - no rule has more free-parameter references than fit in an action index.
    pub fn validate(&self) -> Result<()> {
        for attr in self.attrs.values() {
            attr.validate()?;
        }
        for (key, rule) in &self.rules {
            if key != &rule.name {
                return Err(GrammarError::RuleNameMismatch {
                    key: key.clone(),
                    name: rule.name.clone(),
                });
            }
            let mut referenced = Vec::new();
            let mut ranged: Vec<&str> = Vec::new();
            for op in &rule.operators {
                for param in op.params() {
                    param.expr().attribute_names(&mut referenced);
                    if let Some(name) = param.attribute_name() {
                        if self.attrs.get(name).is_some_and(|a| a.has_range) && !ranged.contains(&name) {
                            ranged.push(name);
                        }
                    }
                }
            }
            let ranged_refs = ranged.len();
            if let Some(missing) = referenced.iter().find(|n| !self.attrs.contains_key(**n)) {
                return Err(GrammarError::UnknownAttribute {
                    name: missing.to_string(),
                    rule: rule.name.clone(),
                });
            }
            if ranged_refs > MAX_FREE_PARAMETERS {
                return Err(GrammarError::TooManyFreeParameters {
                    rule: rule.name.clone(),
                    count: ranged_refs,
                    max: MAX_FREE_PARAMETERS,
                });
            }
        }
        Ok(())
    }

    /// Assign every still-free attribute a uniformly random level.
    ///
    /// Fixed attributes and constants are left alone. Values are assigned but
    /// not marked fixed.
    pub fn randomize_free(&mut self, rng: &mut SearchRng) {
        for attr in self.attrs.values_mut() {
            if attr.is_free() {
                attr.set_level(rng.level());
            }
        }
    }

    /// Assign every ranged attribute a uniformly random level, fixed or not.
    pub fn randomize_all_ranged(&mut self, rng: &mut SearchRng) {
        for attr in self.attrs.values_mut() {
            if attr.has_range {
                attr.set_level(rng.level());
            }
        }
    }

    /// Clear every `fixed` flag, as at the start of a fresh derivation run.
    pub fn unfix_all(&mut self) {
        for attr in self.attrs.values_mut() {
            attr.fixed = false;
        }
    }

    /// Names and values of all ranged attributes, in name order.
    pub fn parameter_values(&self) -> Vec<(String, f32)> {
        self.attrs
            .values()
            .filter(|a| a.has_range)
            .map(|a| (a.name.clone(), a.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::Operator;

    #[test]
    fn levels_span_the_range() {
        let a = Attribute::ranged("h", 1.0, 10.0);
        assert_eq!(a.level_value(0), 1.0);
        assert_eq!(a.level_value(9), 10.0);
        assert_eq!(a.level_value(4), 5.0);
        // Out-of-range level indices clamp.
        assert_eq!(a.level_value(42), 10.0);
    }

    #[test]
    fn level_index_recovers_assigned_level() {
        let mut a = Attribute::ranged("w", 0.3, 2.7);
        for i in 0..10 {
            a.set_level(i);
            assert_eq!(a.level_index(), i);
        }
    }

    #[test]
    fn declared_range_implies_has_range() {
        let a: Attribute =
            serde_json::from_str(r#"{ "name": "h", "range_start": 1.0, "range_end": 10.0, "value": 3.0 }"#).unwrap();
        assert!(a.has_range);
        assert!(a.is_free());

        let c: Attribute = serde_json::from_str(r#"{ "name": "ledge", "value": 0.3 }"#).unwrap();
        assert!(!c.has_range);

        let explicit: Attribute = serde_json::from_str(
            r#"{ "name": "w", "range_start": 1.0, "range_end": 2.0, "value": 1.5, "has_range": false }"#,
        )
        .unwrap();
        assert!(!explicit.has_range);
    }

    #[test]
    fn inferred_range_is_validated() {
        let json = r#"{
            "attrs": { "h": { "name": "h", "range_start": 5.0, "range_end": 1.0, "value": 3.0 } },
            "rules": {}
        }"#;
        assert!(matches!(
            Grammar::from_json(json),
            Err(GrammarError::InvalidRange { .. })
        ));
    }

    #[test]
    fn degenerate_range_has_single_level() {
        let mut a = Attribute::ranged("d", 4.0, 4.0);
        a.set_level(7);
        assert_eq!(a.value, 4.0);
        assert_eq!(a.level_index(), 0);
    }

    #[test]
    fn constants_are_never_free() {
        let c = Attribute::constant("gap", 0.2);
        assert!(!c.is_free());
        let mut r = Attribute::ranged("h", 1.0, 2.0);
        assert!(r.is_free());
        r.fixed = true;
        assert!(!r.is_free());
    }

    #[test]
    fn randomize_free_skips_fixed_and_constants() {
        let mut g = Grammar::default();
        g.insert_attr(Attribute::constant("c", 0.25));
        let mut fixed = Attribute::ranged("f", 0.0, 9.0);
        fixed.value = 3.0;
        fixed.fixed = true;
        g.insert_attr(fixed);
        g.insert_attr(Attribute::ranged("h", 0.0, 9.0));

        let mut rng = SearchRng::new(11);
        for _ in 0..50 {
            g.randomize_free(&mut rng);
            assert_eq!(g.attr("c").unwrap().value, 0.25);
            assert_eq!(g.attr("f").unwrap().value, 3.0);
            let h = g.attr("h").unwrap().value;
            assert_eq!(h, h.round(), "h should sit on a level: {h}");
        }
    }

    #[test]
    fn validate_rejects_out_of_range_value() {
        let mut g = Grammar::default();
        let mut a = Attribute::ranged("h", 1.0, 10.0);
        a.value = 12.0;
        g.insert_attr(a);
        assert!(matches!(g.validate(), Err(GrammarError::ValueOutOfRange { .. })));
    }

    #[test]
    fn validate_rejects_inverted_range() {
        let mut g = Grammar::default();
        let mut a = Attribute::ranged("h", 10.0, 1.0);
        a.value = 5.0;
        g.insert_attr(a);
        assert!(matches!(g.validate(), Err(GrammarError::InvalidRange { .. })));
    }

    #[test]
    fn validate_rejects_unknown_attribute_reference() {
        let mut g = Grammar::default();
        g.insert_rule(Rule::new("Start", vec![Operator::extrude_by("height")]));
        match g.validate() {
            Err(GrammarError::UnknownAttribute { name, rule }) => {
                assert_eq!(name, "height");
                assert_eq!(rule, "Start");
            }
            other => panic!("expected UnknownAttribute, got {other:?}"),
        }
    }

    #[test]
    fn validate_rejects_oversized_action_space() {
        let mut g = Grammar::default();
        let mut ops = Vec::new();
        for i in 0..=MAX_FREE_PARAMETERS {
            let name = format!("p{i}");
            g.insert_attr(Attribute::ranged(&name, 0.0, 1.0));
            ops.push(Operator::extrude_by(&name));
        }
        g.insert_rule(Rule::new("Start", ops));
        assert!(matches!(
            g.validate(),
            Err(GrammarError::TooManyFreeParameters { .. })
        ));
    }

    #[test]
    fn loads_from_json() {
        let json = r#"{
            "attrs": {
                "height": { "name": "height", "range_start": 1.0, "range_end": 10.0,
                            "value": 1.0, "has_range": true },
                "inset": { "name": "inset", "value": 0.5 }
            },
            "rules": {
                "Start": { "name": "Start", "operators": [
                    { "op": "extrude", "height": "height" },
                    { "op": "comp", "top": "Roof", "side": "Facade" }
                ] }
            }
        }"#;
        let g = Grammar::from_json(json).unwrap();
        assert!(g.attr("height").unwrap().is_free());
        assert!(!g.attr("inset").unwrap().is_free());
        assert_eq!(g.rule("Start").unwrap().operators.len(), 2);

        // Serialized form loads back to the same grammar.
        let again = Grammar::from_json(&g.to_json().unwrap()).unwrap();
        assert_eq!(g, again);
    }

    #[test]
    fn malformed_json_is_a_source_error() {
        assert!(matches!(
            Grammar::from_json("{ \"attrs\": 3 }"),
            Err(GrammarError::Source(_))
        ));
    }
}
