//! Stereographic detection canvas for wide lenses.
//!
//! Wide-angle and fisheye images are resampled onto a stereographic canvas
//! with a 250 degree field of view before detection. Only the region of
//! interest covering the source image is rendered; keypoints found there are
//! mapped back to source pixels through the same canvas.

use super::Lens;
use nalgebra::Vector3;

/// Canvas field of view in degrees
pub const CANVAS_HFOV: f64 = 250.0;

/// Sampling density used to find the source footprint on the canvas
const BORDER_SAMPLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Roi {
    pub left: i64,
    pub top: i64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StereographicCanvas {
    /// Full canvas size (square)
    pub size: f64,
    pub roi: Roi,
}

impl StereographicCanvas {
    fn focal_for(size: f64) -> f64 {
        (size / 2.0) / (2.0 * (CANVAS_HFOV.to_radians() / 4.0).tan())
    }

    fn focal(&self) -> f64 {
        Self::focal_for(self.size)
    }

    fn ray_to_canvas(size: f64, ray: &Vector3<f64>) -> Option<(f64, f64)> {
        let v = ray.normalize();
        let theta = v.z.clamp(-1.0, 1.0).acos();
        if theta >= (CANVAS_HFOV / 2.0).to_radians() {
            return None;
        }
        let r = Self::focal_for(size) * 2.0 * (theta / 2.0).tan();
        let planar = (v.x * v.x + v.y * v.y).sqrt();
        let (dx, dy) = if planar < 1e-12 {
            (0.0, 0.0)
        } else {
            (r * v.x / planar, r * v.y / planar)
        };
        Some((dx + size / 2.0, dy + size / 2.0))
    }

    /// Build a canvas whose region of interest covering `lens` measures about
    /// `detect_width x detect_height` pixels.
    pub fn fit(lens: &Lens, detect_width: u32, detect_height: u32) -> Option<Self> {
        let base = CANVAS_HFOV;
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);

        let w = lens.width as f64;
        let h = lens.height as f64;
        for i in 0..=BORDER_SAMPLES {
            let t = i as f64 / BORDER_SAMPLES as f64;
            for j in 0..=BORDER_SAMPLES {
                let s = j as f64 / BORDER_SAMPLES as f64;
                let Some(ray) = lens.image_to_ray(t * w, s * h) else {
                    continue;
                };
                if let Some((x, y)) = Self::ray_to_canvas(base, &ray) {
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }
        if min_x >= max_x || min_y >= max_y {
            return None;
        }

        let roi_w = max_x - min_x;
        let roi_h = max_y - min_y;
        let scale = (detect_width as f64 / roi_w).max(detect_height as f64 / roi_h);
        let size = base * scale;

        let left = (min_x * scale).floor() as i64;
        let top = (min_y * scale).floor() as i64;
        let right = (max_x * scale).ceil() as i64;
        let bottom = (max_y * scale).ceil() as i64;

        Some(Self {
            size,
            roi: Roi {
                left,
                top,
                width: (right - left).max(1) as u32,
                height: (bottom - top).max(1) as u32,
            },
        })
    }

    /// Camera ray for a pixel of the region of interest.
    pub fn roi_to_ray(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        let dx = x + self.roi.left as f64 - self.size / 2.0;
        let dy = y + self.roi.top as f64 - self.size / 2.0;
        let r = (dx * dx + dy * dy).sqrt();
        if r < 1e-12 {
            return Some(Vector3::new(0.0, 0.0, 1.0));
        }
        let theta = 2.0 * (r / (2.0 * self.focal())).atan();
        let s = theta.sin();
        Some(Vector3::new(s * dx / r, s * dy / r, theta.cos()))
    }

    /// Source pixel for a region-of-interest pixel.
    pub fn roi_to_source(&self, lens: &Lens, x: f64, y: f64) -> Option<(f64, f64)> {
        let ray = self.roi_to_ray(x, y)?;
        lens.ray_to_image(&ray)
    }

    /// Region-of-interest pixel for a source pixel.
    pub fn source_to_roi(&self, lens: &Lens, x: f64, y: f64) -> Option<(f64, f64)> {
        let ray = lens.image_to_ray(x, y)?;
        let (cx, cy) = Self::ray_to_canvas(self.size, &ray)?;
        Some((cx - self.roi.left as f64, cy - self.roi.top as f64))
    }
}
