// Error types for grammar loading, validation, and expression evaluation.
//
// Everything that makes a grammar unusable is reported here rather than
// coerced: a malformed source, an expression that doesn't parse, a range
// whose start exceeds its end, or a stored value outside its declared range.
// A nonterminal without a matching rule is NOT an error (it is a terminal),
// and neither is an operator that declines to produce a successor.
//
// See also: `grammar.rs` for `Grammar::validate()`, `expr.rs` for the
// expression parser that produces `Parse` errors.

use thiserror::Error;

/// Grammar errors.
#[derive(Debug, Error)]
pub enum GrammarError {
    #[error("Malformed grammar source: {0}")]
    Source(#[from] serde_json::Error),

    #[error("Cannot parse expression `{text}`: {reason}")]
    Parse { text: String, reason: String },

    #[error("Attribute `{name}` has an invalid range [{start}, {end}]")]
    InvalidRange { name: String, start: f32, end: f32 },

    #[error("Attribute `{name}` value {value} lies outside its range [{start}, {end}]")]
    ValueOutOfRange {
        name: String,
        value: f32,
        start: f32,
        end: f32,
    },

    #[error("Attribute `{name}` has a non-finite value")]
    NonFinite { name: String },

    #[error("Unknown attribute `{name}` referenced in rule `{rule}`")]
    UnknownAttribute { name: String, rule: String },

    #[error("Rule `{rule}` has {count} free parameters; at most {max} fit in an action index")]
    TooManyFreeParameters { rule: String, count: usize, max: usize },

    #[error("Rule name mismatch: keyed as `{key}` but named `{name}`")]
    RuleNameMismatch { key: String, name: String },

    #[error("Expression evaluation failed: {0}")]
    Eval(String),
}

/// Result type for grammar operations.
pub type Result<T> = std::result::Result<T, GrammarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_name_the_culprit() {
        let err = GrammarError::InvalidRange {
            name: "height".into(),
            start: 5.0,
            end: 1.0,
        };
        let msg = err.to_string();
        assert!(msg.contains("height"));
        assert!(msg.contains("[5, 1]"));

        let err = GrammarError::TooManyFreeParameters {
            rule: "Facade".into(),
            count: 21,
            max: 19,
        };
        assert!(err.to_string().contains("Facade"));
        assert!(err.to_string().contains("21"));
    }

    #[test]
    fn json_errors_convert() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: GrammarError = json_err.into();
        assert!(err.to_string().starts_with("Malformed grammar source"));
    }
}
