// Image metric: distance fields and the asymmetric edge discrepancy.
//
// A rendered line drawing is thresholded into edge pixels (gray value below
// `edge_threshold`) and turned into a Euclidean distance field: each cell
// holds the distance in pixels to the nearest edge pixel, so edge pixels hold
// exactly 0. The transform is the exact two-pass separable squared EDT
// (lower envelope of parabolas along columns, then rows), O(width * height).
//
// Discrepancy between a candidate field `D` and target field `T`:
//
//   dist1 = sum of D over cells where T == 0   (target edges the candidate misses)
//   dist2 = sum of T over cells where D == 0   (candidate edges the target lacks)
//   Z     = rows * cols * (rows + cols) / 2
//   score = alpha * dist1 / Z + beta * dist2 / Z
//
// `score >= 0` always, and `score(D, D) == 0`. Tree search turns a score
// into a value with `exp(-score)`; the sampler uses the score as its energy.
//
// An image with no edge pixels at all gets the image diagonal in every cell,
// which is at least the distance to any edge that could have been drawn.

use crate::config::MetricConfig;
use crate::error::{Result, SearchError};
use image::GrayImage;

/// Large finite stand-in for "no edge here" in the squared transform.
const FAR: f64 = 1e20;

/// Per-pixel distance to the nearest edge pixel.
#[derive(Clone, Debug, PartialEq)]
pub struct DistanceField {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DistanceField {
    /// Build the field of `img`, treating pixels darker than `threshold` as
    /// edges.
    pub fn from_image(img: &GrayImage, threshold: u8) -> Self {
        let (width, height) = img.dimensions();
        let (w, h) = (width as usize, height as usize);
        let mut sq: Vec<f64> = img
            .pixels()
            .map(|p| if p.0[0] < threshold { 0.0 } else { FAR })
            .collect();

        if sq.iter().all(|&v| v != 0.0) {
            let diagonal = ((w * w + h * h) as f64).sqrt() as f32;
            return Self {
                width,
                height,
                data: vec![diagonal; w * h],
            };
        }

        let n = w.max(h);
        let mut f = vec![0.0; n];
        let mut d = vec![0.0; n];
        let mut v = vec![0usize; n];
        let mut z = vec![0.0; n + 1];

        for x in 0..w {
            for y in 0..h {
                f[y] = sq[y * w + x];
            }
            squared_edt_1d(&f[..h], &mut d[..h], &mut v, &mut z);
            for y in 0..h {
                sq[y * w + x] = d[y];
            }
        }
        for y in 0..h {
            let row = &mut sq[y * w..(y + 1) * w];
            f[..w].copy_from_slice(row);
            squared_edt_1d(&f[..w], &mut d[..w], &mut v, &mut z);
            row.copy_from_slice(&d[..w]);
        }

        Self {
            width,
            height,
            data: sq.into_iter().map(|s| s.sqrt() as f32).collect(),
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        self.data[(y * self.width + x) as usize]
    }

    pub fn edge_count(&self) -> usize {
        self.data.iter().filter(|&&d| d == 0.0).count()
    }

    pub fn values(&self) -> &[f32] {
        &self.data
    }
}

/// Felzenszwalb-Huttenlocher 1D squared distance transform of `f` into `out`.
/// `v` and `z` are scratch buffers of at least `f.len()` and `f.len() + 1`.
fn squared_edt_1d(f: &[f64], out: &mut [f64], v: &mut [usize], z: &mut [f64]) {
    let n = f.len();
    if n == 0 {
        return;
    }
    let intersect = |q: usize, p: usize| -> f64 {
        let (qf, pf) = (q as f64, p as f64);
        ((f[q] + qf * qf) - (f[p] + pf * pf)) / (2.0 * qf - 2.0 * pf)
    };

    let mut k = 0;
    v[0] = 0;
    z[0] = f64::NEG_INFINITY;
    z[1] = f64::INFINITY;
    for q in 1..n {
        let mut s = intersect(q, v[k]);
        // s is finite, so this stops at k == 0 at the latest.
        while s <= z[k] {
            k -= 1;
            s = intersect(q, v[k]);
        }
        k += 1;
        v[k] = q;
        z[k] = s;
        z[k + 1] = f64::INFINITY;
    }

    k = 0;
    for (q, slot) in out.iter_mut().enumerate() {
        while z[k + 1] < q as f64 {
            k += 1;
        }
        let dq = q as f64 - v[k] as f64;
        *slot = dq * dq + f[v[k]];
    }
}

/// Asymmetric discrepancy between a candidate field and the target field.
pub fn score(candidate: &DistanceField, target: &DistanceField, config: &MetricConfig) -> Result<f64> {
    if candidate.dimensions() != target.dimensions() {
        let (expected_width, expected_height) = target.dimensions();
        let (width, height) = candidate.dimensions();
        return Err(SearchError::DimensionMismatch {
            expected_width,
            expected_height,
            width,
            height,
        });
    }

    let mut dist1 = 0.0f64;
    let mut dist2 = 0.0f64;
    for (&d, &t) in candidate.data.iter().zip(&target.data) {
        if t == 0.0 {
            dist1 += d as f64;
        }
        if d == 0.0 {
            dist2 += t as f64;
        }
    }

    let (rows, cols) = (target.height as f64, target.width as f64);
    let z = rows * cols * (rows + cols) / 2.0;
    Ok(config.alpha * dist1 / z + config.beta * dist2 / z)
}

/// Tree-search value of a score: higher is better, in (0, 1].
pub fn value_of(score: f64) -> f64 {
    (-score).exp()
}
