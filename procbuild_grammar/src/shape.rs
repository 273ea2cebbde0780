// Shapes: the symbolic nodes a derivation manipulates.
//
// A `Shape` carries its nonterminal name, a scope (model transform + size),
// and a color. The scope's local frame has its origin at one corner; `size`
// extends along local +x, +y, +z. A shape with `size[2] == 0` is a flat
// rectangle; extruding gives it depth and makes it a cuboid.
//
// Shapes know how to (a) transform themselves for operators (extrude,
// translate, rotate, resize, split a sub-scope, decompose into faces) and
// (b) emit renderable `Face`s when they end up as terminals. They know
// nothing about rules; `operator.rs` decides which of these to call.
//
// Face decomposition of a cuboid (local frame, outward normals):
//   front  y = 0    spans x, z     normal -y
//   right  x = sx   spans y, z     normal +x
//   back   y = sy   spans -x, z    normal +y
//   left   x = 0    spans -y, z    normal -x
//   top    z = sz   spans x, y     normal +z
//   bottom z = 0    spans x, -y    normal -z
// Each face is itself a rectangle whose local +y is "up" for side faces, so
// a facade split along y splits it into floors.
//
// See also: `geom.rs` for the matrix math, `operator.rs` for the operators,
// `derivation.rs` for how terminal shapes are collected into faces.

use crate::geom::{Mat4, normalize};
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};

/// Name of the axiom shape every derivation starts from.
pub const AXIOM_NAME: &str = "Start";

/// Cuboid face selector used by the comp operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaceKind {
    Front,
    Right,
    Back,
    Left,
    Top,
    Bottom,
}

impl FaceKind {
    pub const ALL: [FaceKind; 6] = [
        FaceKind::Front,
        FaceKind::Right,
        FaceKind::Back,
        FaceKind::Left,
        FaceKind::Top,
        FaceKind::Bottom,
    ];

    pub fn is_side(self) -> bool {
        matches!(
            self,
            FaceKind::Front | FaceKind::Right | FaceKind::Back | FaceKind::Left
        )
    }
}

/// A renderable planar polygon in world space.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub vertices: Vec<[f32; 3]>,
    pub normal: [f32; 3],
    pub color: [f32; 3],
}

/// A symbolic node in a derivation: name plus oriented scope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub name: String,
    /// Local-to-world transform of the scope's corner frame.
    pub transform: Mat4,
    pub size: [f32; 3],
    pub color: [f32; 3],
}

impl Shape {
    pub fn new(name: &str, transform: Mat4, size: [f32; 3]) -> Self {
        Self {
            name: name.to_string(),
            transform,
            size,
            color: [1.0, 1.0, 1.0],
        }
    }

    /// The standard axiom: a unit rectangle named `Start` lying on the ground
    /// plane, centered on the origin, with local +z pointing up.
    pub fn axiom() -> Self {
        let transform = Mat4::rotation_x(-FRAC_PI_2).mul(&Mat4::translation([-0.5, -0.5, 0.0]));
        Self::new(AXIOM_NAME, transform, [1.0, 1.0, 0.0])
    }

    pub fn is_volume(&self) -> bool {
        self.size[2] > 0.0
    }

    /// A copy of this shape under a different name.
    pub fn renamed(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    pub fn extruded(&self, height: f32) -> Self {
        let mut out = self.clone();
        out.size[2] = height;
        out
    }

    pub fn translated(&self, delta: [f32; 3]) -> Self {
        let mut out = self.clone();
        out.transform = self.transform.mul(&Mat4::translation(delta));
        out
    }

    /// Rotate about the scope origin by the given angles in degrees, applied
    /// about local x, then y, then z.
    pub fn rotated(&self, degrees: [f32; 3]) -> Self {
        let [x, y, z] = degrees.map(f32::to_radians);
        let rot = Mat4::rotation_x(x)
            .mul(&Mat4::rotation_y(y))
            .mul(&Mat4::rotation_z(z));
        let mut out = self.clone();
        out.transform = self.transform.mul(&rot);
        out
    }

    pub fn resized(&self, size: [f32; 3]) -> Self {
        let mut out = self.clone();
        out.size = size;
        out
    }

    /// The sub-scope `[offset, offset + length)` along `axis`, named `name`.
    pub fn sub_scope(&self, axis: usize, offset: f32, length: f32, name: &str) -> Self {
        let mut delta = [0.0; 3];
        delta[axis] = offset;
        let mut out = self.translated(delta).renamed(name);
        out.size[axis] = length;
        out
    }

    /// One face of a cuboid scope as a flat rectangle named `name`.
    pub fn face_shape(&self, kind: FaceKind, name: &str) -> Self {
        let [sx, sy, sz] = self.size;
        let up = Mat4::rotation_x(FRAC_PI_2);
        let (local, size) = match kind {
            FaceKind::Front => (up, [sx, sz, 0.0]),
            FaceKind::Right => (
                Mat4::translation([sx, 0.0, 0.0])
                    .mul(&Mat4::rotation_z(FRAC_PI_2))
                    .mul(&up),
                [sy, sz, 0.0],
            ),
            FaceKind::Back => (
                Mat4::translation([sx, sy, 0.0])
                    .mul(&Mat4::rotation_z(PI))
                    .mul(&up),
                [sx, sz, 0.0],
            ),
            FaceKind::Left => (
                Mat4::translation([0.0, sy, 0.0])
                    .mul(&Mat4::rotation_z(-FRAC_PI_2))
                    .mul(&up),
                [sy, sz, 0.0],
            ),
            FaceKind::Top => (Mat4::translation([0.0, 0.0, sz]), [sx, sy, 0.0]),
            FaceKind::Bottom => (
                Mat4::translation([0.0, sy, 0.0]).mul(&Mat4::rotation_x(PI)),
                [sx, sy, 0.0],
            ),
        };
        Self {
            name: name.to_string(),
            transform: self.transform.mul(&local),
            size,
            color: self.color,
        }
    }

    /// Emit this shape's renderable geometry: one quad for a rectangle, six
    /// outward-facing quads for a cuboid. Degenerate rectangles emit nothing.
    pub fn generate_faces(&self, out: &mut Vec<Face>) {
        if self.is_volume() {
            for kind in FaceKind::ALL {
                self.face_shape(kind, &self.name).generate_faces(out);
            }
            return;
        }
        let [sx, sy, _] = self.size;
        if sx <= 0.0 || sy <= 0.0 {
            return;
        }
        let corners = [[0.0, 0.0, 0.0], [sx, 0.0, 0.0], [sx, sy, 0.0], [0.0, sy, 0.0]];
        out.push(Face {
            vertices: corners
                .iter()
                .map(|&c| self.transform.transform_point(c))
                .collect(),
            normal: normalize(self.transform.transform_vector([0.0, 0.0, 1.0])),
            color: self.color,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geom::{dot, sub};

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-4)
    }

    #[test]
    fn axiom_lies_on_ground_centered() {
        let mut faces = Vec::new();
        Shape::axiom().generate_faces(&mut faces);
        assert_eq!(faces.len(), 1);
        for v in &faces[0].vertices {
            assert!(v[1].abs() < 1e-5, "axiom should lie at y=0: {v:?}");
            assert!(v[0].abs() <= 0.5 + 1e-5 && v[2].abs() <= 0.5 + 1e-5);
        }
        assert!(approx(faces[0].normal, [0.0, 1.0, 0.0]));
    }

    #[test]
    fn extruded_axiom_grows_upward() {
        let cuboid = Shape::axiom().extruded(3.0);
        let top = cuboid.face_shape(FaceKind::Top, "Roof");
        let origin = top.transform.transform_point([0.0, 0.0, 0.0]);
        assert!((origin[1] - 3.0).abs() < 1e-5);
    }

    #[test]
    fn cuboid_faces_point_outward() {
        let cuboid = Shape::new("Box", Mat4::IDENTITY, [2.0, 3.0, 4.0]);
        let center = [1.0, 1.5, 2.0];
        let mut faces = Vec::new();
        cuboid.generate_faces(&mut faces);
        assert_eq!(faces.len(), 6);
        for face in &faces {
            let n = face.vertices.len() as f32;
            let mut c = [0.0; 3];
            for v in &face.vertices {
                for i in 0..3 {
                    c[i] += v[i] / n;
                }
            }
            assert!(
                dot(face.normal, sub(c, center)) > 0.0,
                "normal {:?} points inward at {:?}",
                face.normal,
                c
            );
        }
    }

    #[test]
    fn side_faces_are_upright() {
        let cuboid = Shape::new("Box", Mat4::IDENTITY, [2.0, 3.0, 4.0]);
        for kind in FaceKind::ALL.into_iter().filter(|k| k.is_side()) {
            let face = cuboid.face_shape(kind, "Facade");
            assert_eq!(face.size[1], 4.0, "{kind:?} height should be sz");
            let up = face.transform.transform_vector([0.0, 1.0, 0.0]);
            assert!(approx(up, [0.0, 0.0, 1.0]), "{kind:?} local y should be up");
        }
    }

    #[test]
    fn sub_scope_offsets_along_axis() {
        let s = Shape::new("Facade", Mat4::IDENTITY, [10.0, 6.0, 0.0]);
        let floor = s.sub_scope(1, 2.0, 3.0, "Floor");
        assert_eq!(floor.name, "Floor");
        assert_eq!(floor.size, [10.0, 3.0, 0.0]);
        assert!(approx(
            floor.transform.transform_point([0.0, 0.0, 0.0]),
            [0.0, 2.0, 0.0]
        ));
    }

    #[test]
    fn degenerate_rectangle_emits_nothing() {
        let mut faces = Vec::new();
        Shape::new("Sliver", Mat4::IDENTITY, [0.0, 2.0, 0.0]).generate_faces(&mut faces);
        assert!(faces.is_empty());
    }
}
