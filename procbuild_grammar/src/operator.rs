// Shape operators: the closed set of things a rule can do to a shape.
//
// `Operator` is a tagged enum. Each variant carries its own parameter
// references, and `apply()` dispatches on the variant: it evaluates the
// parameters against the grammar's current attribute values, then either
// returns the transformed "current" shape (so the next operator in the rule
// keeps working on it), or returns `None` after pushing successor shapes onto
// the output list. `None` is also how an operator declines (a split that does
// not fit, a comp on a flat shape): the rule stops applying operators to this
// node, but the derivation as a whole carries on.
//
// Parameter enumeration order (`params()`) is load-bearing: the action space
// in `action.rs` assigns one base-10 digit per free parameter in exactly this
// order, and decoding must walk the same order.
//
// See also: `shape.rs` for the geometric transforms, `expr.rs` for `Param`,
// `derivation.rs` for the loop that calls `apply()`.

use crate::error::{GrammarError, Result};
use crate::expr::Param;
use crate::grammar::Grammar;
use crate::shape::{FaceKind, Shape};
use serde::{Deserialize, Serialize};

/// Successor name that discards the part instead of emitting it.
pub const DISCARD_NAME: &str = "NIL";

/// Tolerance when checking whether split parts fit their scope.
const FIT_EPSILON: f32 = 1e-4;

/// Local scope axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// How a split part's size is interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeMode {
    /// Absolute length in scope units.
    #[default]
    Absolute,
    /// Fraction of the scope length.
    Relative,
    /// Weight for sharing whatever length the other parts leave over.
    Floating,
}

/// One part of a split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitPart {
    pub size: Param,
    #[serde(default)]
    pub mode: SizeMode,
    pub name: String,
}

impl SplitPart {
    pub fn new(size: Param, mode: SizeMode, name: &str) -> Self {
        Self {
            size,
            mode,
            name: name.to_string(),
        }
    }
}

fn zero() -> Param {
    Param::literal(0.0)
}

/// A shape operator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operator {
    /// Give a flat shape depth along local z.
    Extrude { height: Param },
    /// Cut the scope into parts along an axis; each part becomes a successor.
    Split { axis: Axis, parts: Vec<SplitPart> },
    /// Tile the scope along an axis with parts of (roughly) the given size.
    Repeat { axis: Axis, size: Param, name: String },
    Translate {
        #[serde(default = "zero")]
        x: Param,
        #[serde(default = "zero")]
        y: Param,
        #[serde(default = "zero")]
        z: Param,
    },
    /// Rotate about the scope origin, in degrees.
    Rotate {
        #[serde(default = "zero")]
        x: Param,
        #[serde(default = "zero")]
        y: Param,
        #[serde(default = "zero")]
        z: Param,
    },
    /// Set the scope size.
    Size { x: Param, y: Param, z: Param },
    /// Decompose a cuboid into named face successors.
    Comp {
        #[serde(default)]
        front: Option<String>,
        #[serde(default)]
        right: Option<String>,
        #[serde(default)]
        back: Option<String>,
        #[serde(default)]
        left: Option<String>,
        #[serde(default)]
        top: Option<String>,
        #[serde(default)]
        bottom: Option<String>,
        /// Fallback name for any side face not named explicitly.
        #[serde(default)]
        side: Option<String>,
    },
    /// Emit a renamed copy of the current shape.
    Copy { name: String },
    /// Set the current shape's RGB color (0..1).
    Color { rgb: [f32; 3] },
}

impl Operator {
    /// Extrude by the value of a named attribute.
    pub fn extrude_by(attr: &str) -> Self {
        Operator::Extrude {
            height: Param::attr(attr),
        }
    }

    pub fn copy(name: &str) -> Self {
        Operator::Copy {
            name: name.to_string(),
        }
    }

    /// Short lowercase name, as written in grammar sources.
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Extrude { .. } => "extrude",
            Operator::Split { .. } => "split",
            Operator::Repeat { .. } => "repeat",
            Operator::Translate { .. } => "translate",
            Operator::Rotate { .. } => "rotate",
            Operator::Size { .. } => "size",
            Operator::Comp { .. } => "comp",
            Operator::Copy { .. } => "copy",
            Operator::Color { .. } => "color",
        }
    }

    /// Parameter references in enumeration order.
    pub fn params(&self) -> Vec<&Param> {
        match self {
            Operator::Extrude { height } => vec![height],
            Operator::Split { parts, .. } => parts.iter().map(|p| &p.size).collect(),
            Operator::Repeat { size, .. } => vec![size],
            Operator::Translate { x, y, z }
            | Operator::Rotate { x, y, z }
            | Operator::Size { x, y, z } => vec![x, y, z],
            Operator::Comp { .. } | Operator::Copy { .. } | Operator::Color { .. } => Vec::new(),
        }
    }

    /// Apply to `shape`, pushing any successor shapes onto `out`.
    ///
    /// Returns the shape the next operator of the rule should work on, or
    /// `None` if this operator consumed the shape or declined to continue.
    pub fn apply(&self, shape: Shape, grammar: &Grammar, out: &mut Vec<Shape>) -> Result<Option<Shape>> {
        self.apply_bounded(shape, grammar, out, usize::MAX)
    }

    /// `apply`, but never lets `out` grow past `limit` shapes. Successors past
    /// the limit are not generated at all.
    pub fn apply_bounded(
        &self,
        shape: Shape,
        grammar: &Grammar,
        out: &mut Vec<Shape>,
        limit: usize,
    ) -> Result<Option<Shape>> {
        let size = shape.size;
        let eval3 = |x: &Param, y: &Param, z: &Param| -> Result<[f32; 3]> {
            Ok([
                x.eval(grammar, size)?,
                y.eval(grammar, size)?,
                z.eval(grammar, size)?,
            ])
        };

        match self {
            Operator::Extrude { height } => {
                let h = height.eval(grammar, size)?.max(0.0);
                Ok(Some(shape.extruded(h)))
            }
            Operator::Split { axis, parts } => {
                let total = size[axis.index()];
                let mut specs = Vec::with_capacity(parts.len());
                for part in parts {
                    specs.push((part.mode, part.size.eval(grammar, size)?));
                }
                let Some(lengths) = split_lengths(total, &specs) else {
                    return Ok(None);
                };
                let mut offset = 0.0;
                for (part, len) in parts.iter().zip(lengths) {
                    if part.name != DISCARD_NAME && len > 0.0 && out.len() < limit {
                        out.push(shape.sub_scope(axis.index(), offset, len, &part.name));
                    }
                    offset += len;
                }
                Ok(None)
            }
            Operator::Repeat { axis, size: tile, name } => {
                let total = size[axis.index()];
                let tile = tile.eval(grammar, size)?;
                if total <= 0.0 || tile <= 0.0 {
                    return Ok(None);
                }
                let ratio = total / tile;
                if !ratio.is_finite() {
                    return Err(GrammarError::Eval(format!(
                        "repeat of tile {tile} over length {total} has no finite count"
                    )));
                }
                let count = (ratio.floor() as usize).max(1);
                let len = total / count as f32;
                let room = limit.saturating_sub(out.len());
                for i in 0..count.min(room) {
                    out.push(shape.sub_scope(axis.index(), i as f32 * len, len, name));
                }
                Ok(None)
            }
            Operator::Translate { x, y, z } => Ok(Some(shape.translated(eval3(x, y, z)?))),
            Operator::Rotate { x, y, z } => Ok(Some(shape.rotated(eval3(x, y, z)?))),
            Operator::Size { x, y, z } => {
                let s = eval3(x, y, z)?.map(|v| v.max(0.0));
                Ok(Some(shape.resized(s)))
            }
            Operator::Comp {
                front,
                right,
                back,
                left,
                top,
                bottom,
                side,
            } => {
                if !shape.is_volume() {
                    return Ok(None);
                }
                for kind in FaceKind::ALL {
                    let explicit = match kind {
                        FaceKind::Front => front,
                        FaceKind::Right => right,
                        FaceKind::Back => back,
                        FaceKind::Left => left,
                        FaceKind::Top => top,
                        FaceKind::Bottom => bottom,
                    };
                    let name = explicit
                        .as_deref()
                        .or_else(|| if kind.is_side() { side.as_deref() } else { None });
                    if let Some(name) = name.filter(|n| *n != DISCARD_NAME && out.len() < limit) {
                        out.push(shape.face_shape(kind, name));
                    }
                }
                Ok(None)
            }
            Operator::Copy { name } => {
                if out.len() < limit {
                    out.push(shape.renamed(name));
                }
                Ok(None)
            }
            Operator::Color { rgb } => {
                let mut colored = shape;
                colored.color = rgb.map(|c| c.clamp(0.0, 1.0));
                Ok(Some(colored))
            }
        }
    }
}

/// Resolve split part specifications into concrete lengths.
///
/// Absolute and relative parts take their lengths first; floating parts share
/// the remainder in proportion to their weights. Returns `None` when the
/// absolute and relative parts alone exceed `total` (the split does not fit).
pub fn split_lengths(total: f32, specs: &[(SizeMode, f32)]) -> Option<Vec<f32>> {
    let mut claimed = 0.0;
    let mut floating_weight = 0.0;
    for &(mode, v) in specs {
        match mode {
            SizeMode::Absolute => claimed += v.max(0.0),
            SizeMode::Relative => claimed += v.max(0.0) * total,
            SizeMode::Floating => floating_weight += v.max(0.0),
        }
    }
    if claimed > total + FIT_EPSILON {
        return None;
    }
    let remainder = (total - claimed).max(0.0);
    Some(
        specs
            .iter()
            .map(|&(mode, v)| match mode {
                SizeMode::Absolute => v.max(0.0),
                SizeMode::Relative => v.max(0.0) * total,
                SizeMode::Floating if floating_weight > 0.0 => v.max(0.0) / floating_weight * remainder,
                SizeMode::Floating => 0.0,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::Mat4;
    use crate::grammar::Attribute;

    fn facade() -> Shape {
        Shape::new("Facade", Mat4::IDENTITY, [10.0, 9.0, 0.0])
    }

    #[test]
    fn split_mixes_absolute_relative_and_floating() {
        let lengths = split_lengths(
            10.0,
            &[
                (SizeMode::Absolute, 2.0),
                (SizeMode::Floating, 1.0),
                (SizeMode::Relative, 0.5),
                (SizeMode::Floating, 3.0),
            ],
        )
        .unwrap();
        assert_eq!(lengths, vec![2.0, 0.75, 5.0, 2.25]);
    }

    #[test]
    fn split_that_does_not_fit_declines() {
        assert!(split_lengths(5.0, &[(SizeMode::Absolute, 3.0), (SizeMode::Absolute, 3.0)]).is_none());

        let op = Operator::Split {
            axis: Axis::X,
            parts: vec![
                SplitPart::new(Param::literal(8.0), SizeMode::Absolute, "A"),
                SplitPart::new(Param::literal(8.0), SizeMode::Absolute, "B"),
            ],
        };
        let mut out = Vec::new();
        let result = op.apply(facade(), &Grammar::default(), &mut out).unwrap();
        assert!(result.is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn split_emits_named_parts_and_skips_discarded() {
        let op = Operator::Split {
            axis: Axis::Y,
            parts: vec![
                SplitPart::new(Param::literal(3.0), SizeMode::Absolute, "GroundFloor"),
                SplitPart::new(Param::literal(1.0), SizeMode::Floating, "Floors"),
                SplitPart::new(Param::literal(1.0), SizeMode::Absolute, DISCARD_NAME),
            ],
        };
        let mut out = Vec::new();
        assert!(op.apply(facade(), &Grammar::default(), &mut out).unwrap().is_none());
        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["GroundFloor", "Floors"]);
        assert_eq!(out[1].size[1], 5.0);
    }

    #[test]
    fn repeat_tiles_evenly() {
        let op = Operator::Repeat {
            axis: Axis::X,
            size: Param::literal(3.0),
            name: "Tile".into(),
        };
        let mut out = Vec::new();
        op.apply(facade(), &Grammar::default(), &mut out).unwrap();
        assert_eq!(out.len(), 3);
        for tile in &out {
            assert!((tile.size[0] - 10.0 / 3.0).abs() < 1e-5);
        }
    }

    #[test]
    fn bounded_repeat_stops_at_the_limit() {
        let op = Operator::Repeat {
            axis: Axis::X,
            size: Param::literal(0.0001),
            name: "Tile".into(),
        };
        let mut out = vec![facade()];
        op.apply_bounded(facade(), &Grammar::default(), &mut out, 8).unwrap();
        assert_eq!(out.len(), 8);
        // Tiles keep the width of the full tiling.
        assert!((out[1].size[0] - 0.0001).abs() < 1e-6);
    }

    #[test]
    fn repeat_without_a_finite_count_is_rejected() {
        let op = Operator::Repeat {
            axis: Axis::X,
            size: Param::literal(1e-40),
            name: "Tile".into(),
        };
        let mut out = Vec::new();
        let err = op.apply(facade(), &Grammar::default(), &mut out).unwrap_err();
        assert!(matches!(err, GrammarError::Eval(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn bounded_comp_and_copy_respect_the_limit() {
        let comp = Operator::Comp {
            front: None,
            right: None,
            back: None,
            left: None,
            top: Some("Roof".into()),
            bottom: Some("Floor".into()),
            side: Some("Facade".into()),
        };
        let mut out = Vec::new();
        comp.apply_bounded(Shape::axiom().extruded(2.0), &Grammar::default(), &mut out, 3)
            .unwrap();
        assert_eq!(out.len(), 3);
        Operator::copy("Again")
            .apply_bounded(facade(), &Grammar::default(), &mut out, 3)
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn extrude_reads_current_attribute_value() {
        let mut g = Grammar::default();
        let mut h = Attribute::ranged("h", 1.0, 10.0);
        h.set_level(4);
        g.insert_attr(h);
        let mut out = Vec::new();
        let shape = Operator::extrude_by("h")
            .apply(Shape::axiom(), &g, &mut out)
            .unwrap()
            .unwrap();
        assert_eq!(shape.size[2], 5.0);
        assert!(out.is_empty());
    }

    #[test]
    fn comp_names_faces_and_falls_back_to_side() {
        let op = Operator::Comp {
            front: Some("Entrance".into()),
            right: None,
            back: None,
            left: None,
            top: Some("Roof".into()),
            bottom: None,
            side: Some("Facade".into()),
        };
        let mut out = Vec::new();
        let cuboid = Shape::axiom().extruded(2.0);
        op.apply(cuboid, &Grammar::default(), &mut out).unwrap();
        let names: Vec<&str> = out.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Entrance", "Facade", "Facade", "Facade", "Roof"]);
    }

    #[test]
    fn comp_on_flat_shape_declines() {
        let op = Operator::Comp {
            front: None,
            right: None,
            back: None,
            left: None,
            top: Some("Roof".into()),
            bottom: None,
            side: None,
        };
        let mut out = Vec::new();
        assert!(op.apply(Shape::axiom(), &Grammar::default(), &mut out).unwrap().is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn params_follow_declaration_order() {
        let op = Operator::Split {
            axis: Axis::X,
            parts: vec![
                SplitPart::new(Param::attr("a"), SizeMode::Absolute, "A"),
                SplitPart::new(Param::literal(1.0), SizeMode::Floating, "B"),
                SplitPart::new(Param::attr("c"), SizeMode::Absolute, "C"),
            ],
        };
        let texts: Vec<&str> = op.params().iter().map(|p| p.text()).collect();
        assert_eq!(texts, vec!["a", "1", "c"]);
    }

    #[test]
    fn translate_defaults_missing_axes_to_zero() {
        let op: Operator = serde_json::from_str(r#"{ "op": "translate", "y": "2" }"#).unwrap();
        let mut out = Vec::new();
        let moved = op
            .apply(facade(), &Grammar::default(), &mut out)
            .unwrap()
            .unwrap();
        assert_eq!(moved.transform.transform_point([0.0; 3]), [0.0, 2.0, 0.0]);
    }
}
