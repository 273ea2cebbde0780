// Rendering collaborator: faces in, grayscale raster out.
//
// The search never looks at geometry directly; it hands the faces of a
// derivation to a `Renderer` and scores the image that comes back. The trait
// takes `&mut self`, so one renderer serves one render at a time and reuses
// its scratch buffers between calls.
//
// `SoftwareRenderer` is the built-in implementation: a perspective camera and
// a depth-buffered triangle rasterizer (quads are fanned into triangles).
// - `RenderMode::Line`: hidden-line drawing. Pass one fills the depth buffer
//   with every face; pass two walks each face's outline and draws the pixels
//   that pass the depth test, black on white. This is the image the metric
//   compares.
// - `RenderMode::Shaded`: Lambert-shaded gray fill for previews.
//
// Camera convention: world points are rotated about the world origin (pitch
// about x, then yaw about y), then translated by `-position`; the camera looks
// down -z. Depth is stored as inverse view distance, which interpolates
// linearly in screen space.
//
// See also: `metric.rs` for how line images become distance fields,
// `evaluate.rs` for the derive-render-score pipeline.

use crate::error::{Result, SearchError};
use procbuild_grammar::Face;
use procbuild_grammar::geom::{Mat4, dot, normalize};
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

/// Slack for the hidden-line depth test, relative to inverse depth.
const DEPTH_BIAS: f32 = 1e-3;

/// How faces are drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderMode {
    /// Visible face outlines, black on white.
    Line,
    /// Lambert-shaded fill.
    Shaded,
}

/// Turns faces into a raster image of fixed size.
pub trait Renderer {
    fn dimensions(&self) -> (u32, u32);
    fn render(&mut self, faces: &[Face], mode: RenderMode) -> GrayImage;
}

/// Perspective camera.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Camera {
    /// Rotation of the world about x, degrees.
    pub pitch_degrees: f32,
    /// Rotation of the world about y, degrees.
    pub yaw_degrees: f32,
    pub position: [f32; 3],
    /// Vertical field of view, degrees.
    pub fov_y_degrees: f32,
    pub near: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            pitch_degrees: 0.0,
            yaw_degrees: -40.0,
            position: [0.0, 10.0, 50.0],
            fov_y_degrees: 45.0,
            near: 0.1,
        }
    }
}

impl Camera {
    /// World-to-camera transform.
    pub fn view(&self) -> Mat4 {
        let [px, py, pz] = self.position;
        Mat4::translation([-px, -py, -pz])
            .mul(&Mat4::rotation_x(self.pitch_degrees.to_radians()))
            .mul(&Mat4::rotation_y(self.yaw_degrees.to_radians()))
    }
}

/// A projected vertex: pixel coordinates plus inverse depth.
#[derive(Clone, Copy, Debug)]
struct ScreenVertex {
    x: f32,
    y: f32,
    inv_depth: f32,
}

/// Built-in depth-buffered rasterizer.
pub struct SoftwareRenderer {
    width: u32,
    height: u32,
    camera: Camera,
    view: Mat4,
    /// Inverse depth per pixel; 0 means empty.
    depth: Vec<f32>,
}

impl SoftwareRenderer {
    pub fn new(width: u32, height: u32, camera: Camera) -> Self {
        let view = camera.view();
        Self {
            width,
            height,
            camera,
            view,
            depth: vec![0.0; (width * height) as usize],
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Project a face into screen space. `None` if any vertex is behind the
    /// near plane.
    fn project(&self, face: &Face) -> Option<Vec<ScreenVertex>> {
        let f = 1.0 / (self.camera.fov_y_degrees.to_radians() / 2.0).tan();
        let aspect = self.width as f32 / self.height as f32;
        face.vertices
            .iter()
            .map(|&v| {
                let [cx, cy, cz] = self.view.transform_point(v);
                let dist = -cz;
                if dist < self.camera.near {
                    return None;
                }
                let ndc_x = f / aspect * cx / dist;
                let ndc_y = f * cy / dist;
                Some(ScreenVertex {
                    x: (ndc_x + 1.0) * 0.5 * self.width as f32,
                    y: (1.0 - ndc_y) * 0.5 * self.height as f32,
                    inv_depth: 1.0 / dist,
                })
            })
            .collect()
    }

    /// Rasterize one triangle, calling `plot(pixel_index)` for every
    /// covered pixel center that is nearer than the depth buffer.
    fn fill_triangle(&mut self, tri: [ScreenVertex; 3], mut plot: impl FnMut(usize)) {
        let [a, b, c] = tri;
        let area = (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x);
        if area.abs() < 1e-8 {
            return;
        }
        let min_x = a.x.min(b.x).min(c.x).floor().max(0.0) as u32;
        let min_y = a.y.min(b.y).min(c.y).floor().max(0.0) as u32;
        let max_x = (a.x.max(b.x).max(c.x).ceil().max(0.0) as u32).min(self.width);
        let max_y = (a.y.max(b.y).max(c.y).ceil().max(0.0) as u32).min(self.height);

        for py in min_y..max_y {
            for px in min_x..max_x {
                let (x, y) = (px as f32 + 0.5, py as f32 + 0.5);
                let w0 = ((b.x - x) * (c.y - y) - (b.y - y) * (c.x - x)) / area;
                let w1 = ((c.x - x) * (a.y - y) - (c.y - y) * (a.x - x)) / area;
                let w2 = 1.0 - w0 - w1;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }
                let inv = w0 * a.inv_depth + w1 * b.inv_depth + w2 * c.inv_depth;
                let i = (py * self.width + px) as usize;
                if inv > self.depth[i] {
                    self.depth[i] = inv;
                    plot(i);
                }
            }
        }
    }

    fn fill_face(&mut self, verts: &[ScreenVertex], mut plot: impl FnMut(usize)) {
        for k in 1..verts.len().saturating_sub(1) {
            self.fill_triangle([verts[0], verts[k], verts[k + 1]], &mut plot);
        }
    }

    /// Draw the visible part of segment `a`-`b` into `img`.
    fn draw_segment(&self, img: &mut GrayImage, a: ScreenVertex, b: ScreenVertex) {
        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as u32;
        for s in 0..=steps {
            let t = s as f32 / steps as f32;
            let x = a.x + (b.x - a.x) * t;
            let y = a.y + (b.y - a.y) * t;
            if x < 0.0 || y < 0.0 {
                continue;
            }
            let (px, py) = (x as u32, y as u32);
            if px >= self.width || py >= self.height {
                continue;
            }
            let inv = a.inv_depth + (b.inv_depth - a.inv_depth) * t;
            let i = (py * self.width + px) as usize;
            if inv * (1.0 + DEPTH_BIAS) >= self.depth[i] {
                img.put_pixel(px, py, Luma([0]));
            }
        }
    }
}

impl Renderer for SoftwareRenderer {
    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn render(&mut self, faces: &[Face], mode: RenderMode) -> GrayImage {
        self.depth.fill(0.0);
        let mut img = GrayImage::from_pixel(self.width, self.height, Luma([255]));
        let projected: Vec<(usize, Vec<ScreenVertex>)> = faces
            .iter()
            .enumerate()
            .filter_map(|(i, face)| self.project(face).map(|p| (i, p)))
            .collect();

        match mode {
            RenderMode::Line => {
                for (_, verts) in &projected {
                    self.fill_face(verts, |_| {});
                }
                for (_, verts) in &projected {
                    for k in 0..verts.len() {
                        self.draw_segment(&mut img, verts[k], verts[(k + 1) % verts.len()]);
                    }
                }
            }
            RenderMode::Shaded => {
                let light = normalize([0.3, 0.8, 0.5]);
                let mut shades = vec![255u8; (self.width * self.height) as usize];
                for (i, verts) in &projected {
                    let face = &faces[*i];
                    let lambert = dot(face.normal, light).abs();
                    let [r, g, b] = face.color;
                    let luminance = 0.299 * r + 0.587 * g + 0.114 * b;
                    let shade = ((0.25 + 0.65 * lambert) * luminance * 255.0).clamp(0.0, 255.0) as u8;
                    self.fill_face(verts, |p| shades[p] = shade);
                }
                for (p, px) in img.pixels_mut().enumerate() {
                    px.0[0] = shades[p];
                }
            }
        }
        img
    }
}

/// A color preview: `target` faded to light gray with `drawing`'s dark
/// pixels overlaid in red.
pub fn compose_preview(target: &GrayImage, drawing: &GrayImage, threshold: u8) -> Result<RgbImage> {
    if target.dimensions() != drawing.dimensions() {
        let (expected_width, expected_height) = target.dimensions();
        let (width, height) = drawing.dimensions();
        return Err(SearchError::DimensionMismatch {
            expected_width,
            expected_height,
            width,
            height,
        });
    }
    let (w, h) = target.dimensions();
    Ok(RgbImage::from_fn(w, h, |x, y| {
        if drawing.get_pixel(x, y).0[0] < threshold {
            Rgb([220, 30, 30])
        } else {
            let g = 160 + target.get_pixel(x, y).0[0] / 3;
            Rgb([g, g, g])
        }
    }))
}
