//! Sky and cloud masking.
//!
//! The image is tiled into square cells of `2 * radius + 1` pixels. Each cell
//! is summarised into a few colour and texture features and handed to a
//! [`SkyClassifier`]; cells scoring at or above the threshold are cleared from
//! the validity mask so that moving clouds do not produce control points.

use image::{GrayImage, Luma, Rgb32FImage};

/// Summary of one grid cell, colours in 0..1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellFeatures {
    pub mean_rgb: [f32; 3],
    /// Mean of the per-pixel channel maximum
    pub brightness: f32,
    /// Mean HSV saturation
    pub saturation: f32,
    /// Mean absolute luminance gradient between neighbouring pixels
    pub gradient_energy: f32,
}

/// Scores a cell in 0..1, higher meaning more likely sky or cloud.
pub trait SkyClassifier: Send + Sync {
    fn score(&self, cell: &CellFeatures) -> f64;
}

/// Colour and texture heuristic: bright, smooth cells that are either blue or
/// nearly colourless.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSkyClassifier;

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl SkyClassifier for HeuristicSkyClassifier {
    fn score(&self, cell: &CellFeatures) -> f64 {
        let [r, g, b] = cell.mean_rgb.map(f64::from);
        let bright = sigmoid(12.0 * (cell.brightness as f64 - 0.55));
        let smooth = sigmoid(80.0 * (0.03 - cell.gradient_energy as f64));
        let blue = sigmoid(25.0 * (b - r.max(g) - 0.02));
        let grey = sigmoid(25.0 * (0.15 - cell.saturation as f64));
        bright * smooth * blue.max(grey)
    }
}

fn luminance(p: &image::Rgb<f32>) -> f32 {
    0.299 * p[0] + 0.587 * p[1] + 0.114 * p[2]
}

fn cell_features(image: &Rgb32FImage, x0: u32, y0: u32, x1: u32, y1: u32) -> CellFeatures {
    let mut sum = [0.0f64; 3];
    let mut brightness = 0.0f64;
    let mut saturation = 0.0f64;
    let mut gradient = 0.0f64;
    let mut gradient_samples = 0usize;
    let mut count = 0usize;

    for y in y0..y1 {
        for x in x0..x1 {
            let p = image.get_pixel(x, y);
            let max = p[0].max(p[1]).max(p[2]);
            let min = p[0].min(p[1]).min(p[2]);
            for c in 0..3 {
                sum[c] += p[c] as f64;
            }
            brightness += max as f64;
            if max > 1e-6 {
                saturation += ((max - min) / max) as f64;
            }
            if x + 1 < x1 {
                gradient += (luminance(image.get_pixel(x + 1, y)) - luminance(p)).abs() as f64;
                gradient_samples += 1;
            }
            if y + 1 < y1 {
                gradient += (luminance(image.get_pixel(x, y + 1)) - luminance(p)).abs() as f64;
                gradient_samples += 1;
            }
            count += 1;
        }
    }

    let n = count.max(1) as f64;
    CellFeatures {
        mean_rgb: [(sum[0] / n) as f32, (sum[1] / n) as f32, (sum[2] / n) as f32],
        brightness: (brightness / n) as f32,
        saturation: (saturation / n) as f32,
        gradient_energy: (gradient / gradient_samples.max(1) as f64) as f32,
    }
}

/// Build a mask with sky cells cleared. Returns the mask and the number of
/// cells removed.
pub fn sky_mask(
    image: &Rgb32FImage,
    radius: u32,
    threshold: f64,
    classifier: &dyn SkyClassifier,
) -> (GrayImage, usize) {
    let (width, height) = image.dimensions();
    let spacing = 2 * radius.max(1) + 1;
    let mut mask = GrayImage::from_pixel(width, height, Luma([255]));
    let mut removed = 0;

    for y0 in (0..height).step_by(spacing as usize) {
        for x0 in (0..width).step_by(spacing as usize) {
            let x1 = (x0 + spacing).min(width);
            let y1 = (y0 + spacing).min(height);
            let features = cell_features(image, x0, y0, x1, y1);
            if classifier.score(&features) >= threshold {
                removed += 1;
                for y in y0..y1 {
                    for x in x0..x1 {
                        mask.put_pixel(x, y, Luma([0]));
                    }
                }
            }
        }
    }

    (mask, removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_blue_sky_is_masked_and_texture_kept() {
        // top half flat sky, bottom half high-contrast checkerboard
        let img: Rgb32FImage = ImageBuffer::from_fn(40, 40, |x, y| {
            if y < 20 {
                Rgb([0.45, 0.65, 0.95])
            } else if (x / 2 + y / 2) % 2 == 0 {
                Rgb([0.9, 0.8, 0.7])
            } else {
                Rgb([0.1, 0.1, 0.1])
            }
        });
        let (mask, removed) = sky_mask(&img, 4, 0.5, &HeuristicSkyClassifier);
        assert!(removed > 0);
        assert_eq!(mask.get_pixel(5, 5)[0], 0);
        assert_eq!(mask.get_pixel(5, 35)[0], 255);
    }

    #[test]
    fn test_dark_ground_is_not_sky() {
        let cell = CellFeatures {
            mean_rgb: [0.2, 0.25, 0.1],
            brightness: 0.25,
            saturation: 0.6,
            gradient_energy: 0.1,
        };
        assert!(HeuristicSkyClassifier.score(&cell) < 0.1);
    }
}
