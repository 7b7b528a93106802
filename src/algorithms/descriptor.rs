//! Haar-wavelet orientation and 64-dimensional descriptor.

use super::keypoint::Keypoint;
use crate::data::IntegralImage;
use std::f64::consts::PI;

/// Assigns orientations and descriptor vectors to detected keypoints.
pub trait KeypointDescriptor: Send + Sync {
    /// Descriptor length
    fn dims(&self) -> usize;

    /// Dominant orientations at the keypoint, in radians. Empty when the
    /// neighbourhood carries no gradient.
    fn orientations(&self, image: &IntegralImage, keypoint: &Keypoint) -> Vec<f64>;

    /// Fill `keypoint.descriptor` for its current orientation.
    fn describe(&self, image: &IntegralImage, keypoint: &mut Keypoint);
}

const ORIENTATION_BINS: usize = 36;
const PEAK_RATIO: f64 = 0.8;

#[derive(Debug, Clone)]
pub struct HaarDescriptor {
    /// Upper bound on orientations per keypoint
    pub max_orientations: usize,
}

impl Default for HaarDescriptor {
    fn default() -> Self {
        Self { max_orientations: 4 }
    }
}

fn gaussian(x: f64, y: f64, sigma: f64) -> f64 {
    (-(x * x + y * y) / (2.0 * sigma * sigma)).exp()
}

fn parabola_peak(left: f64, centre: f64, right: f64) -> f64 {
    let denom = left - 2.0 * centre + right;
    if denom.abs() < 1e-12 {
        0.0
    } else {
        0.5 * (left - right) / denom
    }
}

impl KeypointDescriptor for HaarDescriptor {
    fn dims(&self) -> usize {
        64
    }

    fn orientations(&self, image: &IntegralImage, keypoint: &Keypoint) -> Vec<f64> {
        let s = keypoint.scale.max(0.5);
        let size = (4.0 * s).round().max(2.0) as i64;
        let mut histogram = [0.0f64; ORIENTATION_BINS];

        for j in -6i64..=6 {
            for i in -6i64..=6 {
                if i * i + j * j >= 36 {
                    continue;
                }
                let x = (keypoint.x + i as f64 * s).round() as i64;
                let y = (keypoint.y + j as f64 * s).round() as i64;
                let weight = gaussian(i as f64, j as f64, 2.5);
                let dx = image.haar_x(x, y, size) * weight;
                let dy = image.haar_y(x, y, size) * weight;
                let magnitude = (dx * dx + dy * dy).sqrt();
                if magnitude < 1e-12 {
                    continue;
                }
                let angle = dy.atan2(dx).rem_euclid(2.0 * PI);
                let bin = ((angle / (2.0 * PI) * ORIENTATION_BINS as f64) as usize) % ORIENTATION_BINS;
                histogram[bin] += magnitude;
            }
        }

        // circular [1 2 1] smoothing
        let smoothed: Vec<f64> = (0..ORIENTATION_BINS)
            .map(|b| {
                let prev = histogram[(b + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
                let next = histogram[(b + 1) % ORIENTATION_BINS];
                0.25 * prev + 0.5 * histogram[b] + 0.25 * next
            })
            .collect();

        let max = smoothed.iter().cloned().fold(0.0, f64::max);
        if max <= 0.0 {
            return Vec::new();
        }

        let mut peaks: Vec<(f64, f64)> = (0..ORIENTATION_BINS)
            .filter_map(|b| {
                let prev = smoothed[(b + ORIENTATION_BINS - 1) % ORIENTATION_BINS];
                let next = smoothed[(b + 1) % ORIENTATION_BINS];
                let value = smoothed[b];
                if value < PEAK_RATIO * max || value <= prev || value < next {
                    return None;
                }
                let offset = parabola_peak(prev, value, next);
                let angle = (b as f64 + 0.5 + offset) / ORIENTATION_BINS as f64 * 2.0 * PI;
                Some((value, angle.rem_euclid(2.0 * PI)))
            })
            .collect();
        peaks.sort_by(|a, b| b.0.total_cmp(&a.0));
        peaks.truncate(self.max_orientations.max(1));
        peaks.into_iter().map(|(_, angle)| angle).collect()
    }

    fn describe(&self, image: &IntegralImage, keypoint: &mut Keypoint) {
        let s = keypoint.scale.max(0.5);
        let size = (2.0 * s).round().max(2.0) as i64;
        let (sin, cos) = keypoint.orientation.sin_cos();
        let mut descriptor = Vec::with_capacity(64);

        for sub_y in 0..4 {
            for sub_x in 0..4 {
                let (mut sum_dx, mut sum_dy, mut abs_dx, mut abs_dy) = (0.0, 0.0, 0.0, 0.0);
                for k in 0..5 {
                    for l in 0..5 {
                        // sample grid in keypoint frame, centred on the keypoint
                        let u = (sub_x * 5 + l) as f64 - 9.5;
                        let v = (sub_y * 5 + k) as f64 - 9.5;
                        let x = keypoint.x + s * (u * cos - v * sin);
                        let y = keypoint.y + s * (u * sin + v * cos);
                        let (xi, yi) = (x.round() as i64, y.round() as i64);
                        let rx = image.haar_x(xi, yi, size);
                        let ry = image.haar_y(xi, yi, size);
                        let weight = gaussian(u, v, 3.3);
                        let dx = weight * (rx * cos + ry * sin);
                        let dy = weight * (-rx * sin + ry * cos);
                        sum_dx += dx;
                        sum_dy += dy;
                        abs_dx += dx.abs();
                        abs_dy += dy.abs();
                    }
                }
                descriptor.extend_from_slice(&[sum_dx, sum_dy, abs_dx, abs_dy]);
            }
        }

        let norm = descriptor.iter().map(|v| v * v).sum::<f64>().sqrt();
        keypoint.descriptor = descriptor
            .into_iter()
            .map(|v| if norm > 1e-12 { (v / norm) as f32 } else { 0.0 })
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::GrayF32;
    use image::{ImageBuffer, Luma};

    fn integral(f: impl Fn(u32, u32) -> f32) -> IntegralImage {
        let img: GrayF32 = ImageBuffer::from_fn(96, 96, |x, y| Luma([f(x, y)]));
        IntegralImage::from_gray(&img)
    }

    #[test]
    fn test_vertical_edge_orientation_points_along_x() {
        let image = integral(|x, _| if x >= 48 { 200.0 } else { 20.0 });
        let kp = Keypoint::new(48.0, 48.0, 2.0, 1.0);
        let orientations = HaarDescriptor::default().orientations(&image, &kp);
        assert!(!orientations.is_empty());
        let angle = orientations[0];
        let distance = angle.min(2.0 * PI - angle);
        assert!(distance < 0.2, "angle {}", angle);
    }

    #[test]
    fn test_flat_region_has_no_orientation() {
        let image = integral(|_, _| 90.0);
        let kp = Keypoint::new(48.0, 48.0, 2.0, 1.0);
        assert!(HaarDescriptor::default().orientations(&image, &kp).is_empty());
    }

    #[test]
    fn test_descriptor_is_unit_length() {
        let image = integral(|x, y| ((x * 13 + y * 7) % 50) as f32 * 4.0);
        let mut kp = Keypoint::new(48.0, 48.0, 1.6, 1.0);
        kp.orientation = 0.7;
        HaarDescriptor::default().describe(&image, &mut kp);
        assert_eq!(kp.descriptor.len(), 64);
        let norm: f32 = kp.descriptor.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }
}
