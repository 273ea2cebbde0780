// Minimal 3D affine math for shape scopes.
//
// Points and directions are plain `[f32; 3]` arrays; transforms are 4x4
// column-major matrices. Only the handful of operations the shape operators
// need are provided: composition, translation, axis rotations, and point /
// direction transforms. No projection lives here; that belongs to the
// renderer in `procbuild_search`.
//
// Rotations follow the right-hand rule with angles in radians.

use serde::{Deserialize, Serialize};

/// 4x4 column-major affine transform.
///
/// `m[col * 4 + row]`, so the translation lives in `m[12..15]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Mat4 {
    pub m: [f32; 16],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat4 {
    pub const IDENTITY: Mat4 = Mat4 {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    pub fn translation(t: [f32; 3]) -> Self {
        let mut out = Self::IDENTITY;
        out.m[12] = t[0];
        out.m[13] = t[1];
        out.m[14] = t[2];
        out
    }

    pub fn rotation_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[5] = c;
        out.m[6] = s;
        out.m[9] = -s;
        out.m[10] = c;
        out
    }

    pub fn rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[0] = c;
        out.m[2] = -s;
        out.m[8] = s;
        out.m[10] = c;
        out
    }

    pub fn rotation_z(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[0] = c;
        out.m[1] = s;
        out.m[4] = -s;
        out.m[5] = c;
        out
    }

    /// `self * rhs`: applies `rhs` first, then `self`.
    pub fn mul(&self, rhs: &Mat4) -> Mat4 {
        let mut out = [0.0f32; 16];
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.m[k * 4 + row] * rhs.m[col * 4 + k];
                }
                out[col * 4 + row] = sum;
            }
        }
        Mat4 { m: out }
    }

    pub fn transform_point(&self, p: [f32; 3]) -> [f32; 3] {
        let m = &self.m;
        [
            m[0] * p[0] + m[4] * p[1] + m[8] * p[2] + m[12],
            m[1] * p[0] + m[5] * p[1] + m[9] * p[2] + m[13],
            m[2] * p[0] + m[6] * p[1] + m[10] * p[2] + m[14],
        ]
    }

    /// Transform a direction (ignores translation).
    pub fn transform_vector(&self, v: [f32; 3]) -> [f32; 3] {
        let m = &self.m;
        [
            m[0] * v[0] + m[4] * v[1] + m[8] * v[2],
            m[1] * v[0] + m[5] * v[1] + m[9] * v[2],
            m[2] * v[0] + m[6] * v[1] + m[10] * v[2],
        ]
    }
}

pub fn sub(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn dot(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

pub fn cross(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Normalize, returning the zero vector unchanged.
pub fn normalize(v: [f32; 3]) -> [f32; 3] {
    let len = dot(v, v).sqrt();
    if len <= f32::EPSILON {
        return v;
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn approx(a: [f32; 3], b: [f32; 3]) -> bool {
        (0..3).all(|i| (a[i] - b[i]).abs() < 1e-5)
    }

    #[test]
    fn rotation_x_maps_y_to_z() {
        let r = Mat4::rotation_x(FRAC_PI_2);
        assert!(approx(r.transform_vector([0.0, 1.0, 0.0]), [0.0, 0.0, 1.0]));
        assert!(approx(r.transform_vector([0.0, 0.0, 1.0]), [0.0, -1.0, 0.0]));
    }

    #[test]
    fn rotation_z_maps_x_to_y() {
        let r = Mat4::rotation_z(FRAC_PI_2);
        assert!(approx(r.transform_vector([1.0, 0.0, 0.0]), [0.0, 1.0, 0.0]));
    }

    #[test]
    fn composition_applies_right_first() {
        // Rotate then translate.
        let m = Mat4::translation([5.0, 0.0, 0.0]).mul(&Mat4::rotation_z(FRAC_PI_2));
        assert!(approx(m.transform_point([1.0, 0.0, 0.0]), [5.0, 1.0, 0.0]));
    }

    #[test]
    fn vectors_ignore_translation() {
        let m = Mat4::translation([1.0, 2.0, 3.0]);
        assert!(approx(m.transform_vector([1.0, 0.0, 0.0]), [1.0, 0.0, 0.0]));
        assert!(approx(m.transform_point([0.0, 0.0, 0.0]), [1.0, 2.0, 3.0]));
    }

    #[test]
    fn cross_and_normalize() {
        let n = normalize(cross([2.0, 0.0, 0.0], [0.0, 3.0, 0.0]));
        assert!(approx(n, [0.0, 0.0, 1.0]));
        assert_eq!(normalize([0.0, 0.0, 0.0]), [0.0, 0.0, 0.0]);
    }
}
