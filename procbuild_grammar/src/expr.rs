// Parameter references and the tiny arithmetic language behind them.
//
// Every operator parameter in a grammar is a `Param`: the source text as the
// author wrote it plus its parsed `Expr`. The text is kept because it is the
// identity the action space keys on: a parameter "names an attribute" only
// when its whole text is a bare attribute identifier (`height`, not
// `height * 2`). Expressions are parsed once at load time and evaluated each
// time an operator runs, against the attribute values current at that moment.
//
// Grammar of expressions (recursive descent, usual precedence):
//   expr   := term (('+' | '-') term)*
//   term   := unary (('*' | '/') unary)*
//   unary  := '-' unary | atom
//   atom   := number | ident | 'scope.sx' | 'scope.sy' | 'scope.sz' | '(' expr ')'
//
// See also: `grammar.rs` for attribute lookup during evaluation,
// `operator.rs` for where params are evaluated, `action.rs` for how
// attribute-naming params become free parameters.

use crate::error::{GrammarError, Result};
use crate::grammar::Grammar;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Binary arithmetic operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Parsed expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Number(f32),
    Attr(String),
    /// Current scope size along axis 0/1/2 (`scope.sx`, `scope.sy`, `scope.sz`).
    ScopeSize(usize),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    /// Evaluate against the grammar's current attribute values and the scope
    /// size of the shape being operated on.
    pub fn eval(&self, grammar: &Grammar, scope_size: [f32; 3]) -> Result<f32> {
        match self {
            Expr::Number(v) => Ok(*v),
            Expr::Attr(name) => grammar
                .attr(name)
                .map(|a| a.value)
                .ok_or_else(|| GrammarError::Eval(format!("unknown attribute `{name}`"))),
            Expr::ScopeSize(axis) => Ok(scope_size[*axis]),
            Expr::Neg(inner) => Ok(-inner.eval(grammar, scope_size)?),
            Expr::Binary(op, lhs, rhs) => {
                let a = lhs.eval(grammar, scope_size)?;
                let b = rhs.eval(grammar, scope_size)?;
                match op {
                    BinOp::Add => Ok(a + b),
                    BinOp::Sub => Ok(a - b),
                    BinOp::Mul => Ok(a * b),
                    BinOp::Div => {
                        if b == 0.0 {
                            Err(GrammarError::Eval(format!("division by zero in `{a} / {b}`")))
                        } else {
                            Ok(a / b)
                        }
                    }
                }
            }
        }
    }

    /// Collect every attribute identifier the expression reads.
    pub fn attribute_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Attr(name) => out.push(name),
            Expr::Neg(inner) => inner.attribute_names(out),
            Expr::Binary(_, lhs, rhs) => {
                lhs.attribute_names(out);
                rhs.attribute_names(out);
            }
            Expr::Number(_) | Expr::ScopeSize(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Param
// ---------------------------------------------------------------------------

/// A parameter reference as written in the grammar, with its parsed form.
#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    text: String,
    expr: Expr,
}

impl Param {
    pub fn parse(text: &str) -> Result<Self> {
        let expr = Parser::new(text).parse()?;
        Ok(Self {
            text: text.trim().to_string(),
            expr,
        })
    }

    /// A literal constant.
    pub fn literal(value: f32) -> Self {
        Self {
            text: value.to_string(),
            expr: Expr::Number(value),
        }
    }

    /// A bare reference to a named attribute.
    pub fn attr(name: &str) -> Self {
        Self {
            text: name.to_string(),
            expr: Expr::Attr(name.to_string()),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// The attribute this parameter names, if its whole text is a bare
    /// attribute identifier.
    pub fn attribute_name(&self) -> Option<&str> {
        match &self.expr {
            Expr::Attr(name) => Some(name),
            _ => None,
        }
    }

    pub fn eval(&self, grammar: &Grammar, scope_size: [f32; 3]) -> Result<f32> {
        self.expr.eval(grammar, scope_size)
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

// Serialize as the source text so grammars round-trip in readable form.
impl Serialize for Param {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Param {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(f32),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => Param::parse(&s).map_err(serde::de::Error::custom),
            Raw::Number(v) => Ok(Param::literal(v)),
        }
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Deepest nesting of parentheses and unary minus the parser accepts.
pub const MAX_NESTING: usize = 64;

struct Parser<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
            depth: 0,
        }
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(format!("nested deeper than {MAX_NESTING} levels")));
        }
        self.depth += 1;
        Ok(())
    }

    fn error(&self, reason: impl Into<String>) -> GrammarError {
        GrammarError::Parse {
            text: self.src.to_string(),
            reason: reason.into(),
        }
    }

    fn parse(mut self) -> Result<Expr> {
        let expr = self.expr()?;
        self.skip_ws();
        if self.pos < self.chars.len() {
            return Err(self.error(format!("unexpected `{}` at {}", self.chars[self.pos], self.pos)));
        }
        Ok(expr)
    }

    fn skip_ws(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_ws();
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<Expr> {
        let mut lhs = self.term()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '+' => BinOp::Add,
                '-' => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        while let Some(c) = self.peek() {
            let op = match c {
                '*' => BinOp::Mul,
                '/' => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        if self.peek() == Some('-') {
            self.pos += 1;
            self.enter()?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(match inner {
                Expr::Number(v) => Expr::Number(-v),
                other => Expr::Neg(Box::new(other)),
            });
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr> {
        match self.peek() {
            None => Err(self.error("unexpected end of expression")),
            Some('(') => {
                self.pos += 1;
                self.enter()?;
                let inner = self.expr()?;
                self.depth -= 1;
                if self.peek() != Some(')') {
                    return Err(self.error("missing `)`"));
                }
                self.pos += 1;
                Ok(inner)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.identifier(),
            Some(c) => Err(self.error(format!("unexpected `{c}` at {}", self.pos))),
        }
    }

    fn number(&mut self) -> Result<Expr> {
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_ascii_digit() || self.chars[self.pos] == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f32>()
            .map(Expr::Number)
            .map_err(|_| self.error(format!("bad number `{text}`")))
    }

    fn identifier(&mut self) -> Result<Expr> {
        let start = self.pos;
        while self.pos < self.chars.len()
            && (self.chars[self.pos].is_alphanumeric()
                || self.chars[self.pos] == '_'
                || self.chars[self.pos] == '.')
        {
            self.pos += 1;
        }
        let ident: String = self.chars[start..self.pos].iter().collect();
        match ident.as_str() {
            "scope.sx" => Ok(Expr::ScopeSize(0)),
            "scope.sy" => Ok(Expr::ScopeSize(1)),
            "scope.sz" => Ok(Expr::ScopeSize(2)),
            _ if ident.contains('.') => Err(self.error(format!("unknown qualified name `{ident}`"))),
            _ => Ok(Expr::Attr(ident)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::Attribute;

    fn grammar_with(attrs: &[(&str, f32)]) -> Grammar {
        let mut g = Grammar::default();
        for &(name, value) in attrs {
            g.insert_attr(Attribute::constant(name, value));
        }
        g
    }

    #[test]
    fn precedence_and_parentheses() {
        let g = Grammar::default();
        let p = Param::parse("1 + 2 * 3").unwrap();
        assert_eq!(p.eval(&g, [0.0; 3]).unwrap(), 7.0);
        let p = Param::parse("(1 + 2) * 3").unwrap();
        assert_eq!(p.eval(&g, [0.0; 3]).unwrap(), 9.0);
        let p = Param::parse("-2 - -3").unwrap();
        assert_eq!(p.eval(&g, [0.0; 3]).unwrap(), 1.0);
    }

    #[test]
    fn attributes_and_scope() {
        let g = grammar_with(&[("floor_h", 3.5)]);
        let p = Param::parse("scope.sz / floor_h").unwrap();
        assert_eq!(p.eval(&g, [0.0, 0.0, 7.0]).unwrap(), 2.0);
    }

    #[test]
    fn bare_identifier_names_an_attribute() {
        assert_eq!(Param::parse(" height ").unwrap().attribute_name(), Some("height"));
        assert_eq!(Param::parse("height * 2").unwrap().attribute_name(), None);
        assert_eq!(Param::parse("4.5").unwrap().attribute_name(), None);
    }

    #[test]
    fn collects_referenced_attributes() {
        let p = Param::parse("a + (b * -c) / 2").unwrap();
        let mut names = Vec::new();
        p.expr().attribute_names(&mut names);
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for bad in ["", "1 +", "(1 + 2", "3 $ 4", "scope.sw", "1..2"] {
            let err = Param::parse(bad).unwrap_err();
            assert!(matches!(err, GrammarError::Parse { .. }), "accepted `{bad}`");
        }
    }

    #[test]
    fn nesting_is_capped() {
        let ok = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert!(Param::parse(&ok).is_ok());

        let deep = format!("{}1{}", "(".repeat(100_000), ")".repeat(100_000));
        assert!(matches!(Param::parse(&deep), Err(GrammarError::Parse { .. })));
        let negated = format!("{}x", "-".repeat(100_000));
        assert!(matches!(Param::parse(&negated), Err(GrammarError::Parse { .. })));
    }

    #[test]
    fn division_by_zero_and_unknown_names_fail_at_eval() {
        let g = Grammar::default();
        assert!(matches!(
            Param::parse("1 / 0").unwrap().eval(&g, [0.0; 3]),
            Err(GrammarError::Eval(_))
        ));
        assert!(matches!(
            Param::parse("missing").unwrap().eval(&g, [0.0; 3]),
            Err(GrammarError::Eval(_))
        ));
    }

    #[test]
    fn deserializes_from_text_or_number() {
        let p: Param = serde_json::from_str("\"w * 0.5\"").unwrap();
        assert_eq!(p.text(), "w * 0.5");
        let p: Param = serde_json::from_str("2.5").unwrap();
        assert_eq!(p.expr(), &Expr::Number(2.5));
        assert!(serde_json::from_str::<Param>("\"1 +\"").is_err());
    }
}
