//! Fast-Hessian interest point detector.
//!
//! Approximates the determinant of the Hessian with box filters evaluated on
//! the integral image, over a pyramid of filter sizes. Local maxima in a 3x3x3
//! neighbourhood above the threshold are refined to sub-pixel and sub-scale
//! accuracy with a quadratic fit.

use super::keypoint::Keypoint;
use crate::data::IntegralImage;
use nalgebra::{Matrix3, Vector3};

/// Finds keypoints on an integral image.
pub trait KeypointDetector: Send + Sync {
    fn detect(&self, image: &IntegralImage) -> Vec<Keypoint>;

    fn name(&self) -> &'static str;
}

const LAYERS_PER_OCTAVE: usize = 4;

#[derive(Debug, Clone)]
pub struct HessianDetector {
    pub octaves: usize,
    /// Sampling step of the first octave
    pub initial_step: usize,
    /// Minimum determinant response for buffers in 0..255
    pub threshold: f64,
}

impl Default for HessianDetector {
    fn default() -> Self {
        Self::new()
    }
}

struct ResponseLayer {
    width: usize,
    height: usize,
    step: usize,
    filter: usize,
    responses: Vec<f64>,
    laplacian: Vec<bool>,
}

impl ResponseLayer {
    fn at(&self, x: usize, y: usize) -> f64 {
        self.responses[y * self.width + x]
    }
}

impl HessianDetector {
    pub fn new() -> Self {
        Self {
            octaves: 4,
            initial_step: 1,
            threshold: 25.0,
        }
    }

    pub fn with_params(octaves: usize, threshold: f64) -> Self {
        Self {
            octaves,
            initial_step: 1,
            threshold,
        }
    }

    fn filter_size(octave: usize, layer: usize) -> usize {
        3 * ((1 << (octave + 1)) * (layer + 1) + 1)
    }

    fn build_layer(image: &IntegralImage, step: usize, filter: usize) -> ResponseLayer {
        let width = (image.width() as usize / step).max(1);
        let height = (image.height() as usize / step).max(1);
        let mut responses = vec![0.0; width * height];
        let mut laplacian = vec![false; width * height];

        let w = filter as i64;
        let b = (w - 1) / 2;
        let l = w / 3;
        let inv_area = 1.0 / (w * w) as f64;

        for y in 0..height {
            for x in 0..width {
                let r = (y * step) as i64;
                let c = (x * step) as i64;
                if r - b < 0 || c - b < 0 || r + b >= image.height() as i64 || c + b >= image.width() as i64 {
                    continue;
                }

                let dxx = image.box_sum(c - b, r - l + 1, c - b + w, r + l)
                    - 3.0 * image.box_sum(c - l / 2, r - l + 1, c - l / 2 + l, r + l);
                let dyy = image.box_sum(c - l + 1, r - b, c + l, r - b + w)
                    - 3.0 * image.box_sum(c - l + 1, r - l / 2, c + l, r - l / 2 + l);
                let dxy = image.box_sum(c + 1, r - l, c + 1 + l, r)
                    + image.box_sum(c - l, r + 1, c, r + 1 + l)
                    - image.box_sum(c - l, r - l, c, r)
                    - image.box_sum(c + 1, r + 1, c + 1 + l, r + 1 + l);

                let (dxx, dyy, dxy) = (dxx * inv_area, dyy * inv_area, dxy * inv_area);
                responses[y * width + x] = dxx * dyy - 0.81 * dxy * dxy;
                laplacian[y * width + x] = dxx + dyy >= 0.0;
            }
        }

        ResponseLayer {
            width,
            height,
            step,
            filter,
            responses,
            laplacian,
        }
    }

    /// Sample `layer` at the position of cell `(x, y)` of `reference`.
    fn sample(layer: &ResponseLayer, reference: &ResponseLayer, x: usize, y: usize) -> f64 {
        let scale = layer.width as f64 / reference.width as f64;
        let lx = ((x as f64 * scale) as usize).min(layer.width - 1);
        let ly = ((y as f64 * scale) as usize).min(layer.height - 1);
        layer.at(lx, ly)
    }

    fn is_extremum(&self, x: usize, y: usize, top: &ResponseLayer, mid: &ResponseLayer, bottom: &ResponseLayer) -> bool {
        let border = (top.filter + 1) / (2 * top.step) + 1;
        let (tx, ty) = (x * mid.step / top.step, y * mid.step / top.step);
        if tx <= border || ty <= border || tx + border >= top.width || ty + border >= top.height {
            return false;
        }

        let candidate = mid.at(x, y);
        if candidate < self.threshold {
            return false;
        }

        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx) as usize;
                let ny = (y as i64 + dy) as usize;
                if Self::sample(top, mid, nx, ny) >= candidate || Self::sample(bottom, mid, nx, ny) >= candidate {
                    return false;
                }
                if (dx != 0 || dy != 0) && mid.at(nx, ny) >= candidate {
                    return false;
                }
            }
        }
        true
    }

    /// Quadratic refinement in (x, y, scale). Returns offsets in cell units.
    fn interpolate(x: usize, y: usize, top: &ResponseLayer, mid: &ResponseLayer, bottom: &ResponseLayer) -> Option<Vector3<f64>> {
        let v = |layer: &ResponseLayer, dx: i64, dy: i64| {
            Self::sample(layer, mid, (x as i64 + dx) as usize, (y as i64 + dy) as usize)
        };
        let c = mid.at(x, y);

        let gradient = Vector3::new(
            (v(mid, 1, 0) - v(mid, -1, 0)) / 2.0,
            (v(mid, 0, 1) - v(mid, 0, -1)) / 2.0,
            (v(top, 0, 0) - v(bottom, 0, 0)) / 2.0,
        );

        let dxx = v(mid, 1, 0) + v(mid, -1, 0) - 2.0 * c;
        let dyy = v(mid, 0, 1) + v(mid, 0, -1) - 2.0 * c;
        let dss = v(top, 0, 0) + v(bottom, 0, 0) - 2.0 * c;
        let dxy = (v(mid, 1, 1) - v(mid, -1, 1) - v(mid, 1, -1) + v(mid, -1, -1)) / 4.0;
        let dxs = (v(top, 1, 0) - v(top, -1, 0) - v(bottom, 1, 0) + v(bottom, -1, 0)) / 4.0;
        let dys = (v(top, 0, 1) - v(top, 0, -1) - v(bottom, 0, 1) + v(bottom, 0, -1)) / 4.0;

        let hessian = Matrix3::new(dxx, dxy, dxs, dxy, dyy, dys, dxs, dys, dss);
        let offset = -(hessian.try_inverse()? * gradient);
        offset.iter().all(|o| o.abs() < 0.5).then_some(offset)
    }
}

impl KeypointDetector for HessianDetector {
    fn detect(&self, image: &IntegralImage) -> Vec<Keypoint> {
        let mut keypoints = Vec::new();

        for octave in 0..self.octaves {
            let step = self.initial_step << octave;
            if image.width() as usize / step < 3 || image.height() as usize / step < 3 {
                break;
            }
            let layers: Vec<ResponseLayer> = (0..LAYERS_PER_OCTAVE)
                .map(|layer| Self::build_layer(image, step, Self::filter_size(octave, layer)))
                .collect();

            for i in 1..LAYERS_PER_OCTAVE - 1 {
                let (bottom, mid, top) = (&layers[i - 1], &layers[i], &layers[i + 1]);
                let filter_step = (mid.filter - bottom.filter) as f64;

                for y in 0..mid.height {
                    for x in 0..mid.width {
                        if !self.is_extremum(x, y, top, mid, bottom) {
                            continue;
                        }
                        let Some(offset) = Self::interpolate(x, y, top, mid, bottom) else {
                            continue;
                        };
                        let px = (x as f64 + offset.x) * mid.step as f64;
                        let py = (y as f64 + offset.y) * mid.step as f64;
                        let size = mid.filter as f64 + offset.z * filter_step;
                        let mut kp = Keypoint::new(px, py, 1.2 / 9.0 * size, mid.at(x, y));
                        kp.laplacian = if mid.laplacian[y * mid.width + x] { 1 } else { -1 };
                        keypoints.push(kp);
                    }
                }
            }
        }

        tracing::trace!(count = keypoints.len(), "Hessian extrema");
        keypoints
    }

    fn name(&self) -> &'static str {
        "fast-hessian"
    }
}
