//! Validity masks and the distance map used by the first sieve.
//!
//! A mask pixel is valid (255) when it may carry a keypoint. Crop rectangles,
//! the circular fisheye ellipse, exclusion polygons, the alpha channel and the
//! sky classifier all clear pixels.

use image::{GrayImage, Luma};

/// Crop rectangle in source pixels, `right` and `bottom` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub left: i64,
    pub top: i64,
    pub right: i64,
    pub bottom: i64,
}

/// Per-image mask inputs taken from the project.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaskSpec {
    pub crop: Option<CropRect>,
    /// Crop describes the bounding box of an ellipse
    pub elliptic: bool,
    /// Exclusion polygons in source pixels
    pub polygons: Vec<Vec<(f64, f64)>>,
}

impl MaskSpec {
    pub fn is_empty(&self) -> bool {
        self.crop.is_none() && self.polygons.is_empty()
    }
}

fn inside_polygon(polygon: &[(f64, f64)], x: f64, y: f64) -> bool {
    let mut inside = false;
    let mut j = polygon.len().wrapping_sub(1);
    for i in 0..polygon.len() {
        let (xi, yi) = polygon[i];
        let (xj, yj) = polygon[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Build the validity mask of a `width x height` source image.
///
/// Returns `None` when every pixel is valid.
pub fn build_mask(width: u32, height: u32, alpha: Option<&GrayImage>, spec: &MaskSpec) -> Option<GrayImage> {
    if spec.is_empty() && alpha.is_none() {
        return None;
    }

    let mut mask = match alpha {
        Some(a) if a.dimensions() == (width, height) => a.clone(),
        _ => GrayImage::from_pixel(width, height, Luma([255])),
    };

    if let Some(crop) = spec.crop {
        let cx = (crop.left + crop.right) as f64 / 2.0;
        let cy = (crop.top + crop.bottom) as f64 / 2.0;
        let rx = ((crop.right - crop.left) as f64 / 2.0).max(1.0);
        let ry = ((crop.bottom - crop.top) as f64 / 2.0).max(1.0);
        for (x, y, p) in mask.enumerate_pixels_mut() {
            let (xi, yi) = (x as i64, y as i64);
            let outside = if spec.elliptic {
                let dx = (x as f64 + 0.5 - cx) / rx;
                let dy = (y as f64 + 0.5 - cy) / ry;
                dx * dx + dy * dy > 1.0
            } else {
                xi < crop.left || xi >= crop.right || yi < crop.top || yi >= crop.bottom
            };
            if outside {
                p[0] = 0;
            }
        }
    }

    for polygon in spec.polygons.iter().filter(|p| p.len() >= 3) {
        for (x, y, p) in mask.enumerate_pixels_mut() {
            if inside_polygon(polygon, x as f64 + 0.5, y as f64 + 0.5) {
                p[0] = 0;
            }
        }
    }

    Some(mask)
}

/// Clear `mask` wherever `other` is invalid.
pub fn intersect(mask: &mut GrayImage, other: &GrayImage) {
    for (p, q) in mask.pixels_mut().zip(other.pixels()) {
        if q[0] == 0 {
            p[0] = 0;
        }
    }
}

/// Chamfer distance from each pixel to the nearest invalid mask pixel.
#[derive(Debug, Clone)]
pub struct DistanceMap {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl DistanceMap {
    pub fn from_mask(mask: &GrayImage) -> Self {
        const ORTHO: f32 = 1.0;
        const DIAG: f32 = std::f32::consts::SQRT_2;
        let (width, height) = mask.dimensions();
        let (w, h) = (width as usize, height as usize);
        let far = (w + h) as f32;
        let mut data: Vec<f32> = mask
            .pixels()
            .map(|p| if p[0] == 0 { 0.0 } else { far })
            .collect();

        for y in 0..h {
            for x in 0..w {
                let mut d = data[y * w + x];
                if x > 0 {
                    d = d.min(data[y * w + x - 1] + ORTHO);
                }
                if y > 0 {
                    d = d.min(data[(y - 1) * w + x] + ORTHO);
                    if x > 0 {
                        d = d.min(data[(y - 1) * w + x - 1] + DIAG);
                    }
                    if x + 1 < w {
                        d = d.min(data[(y - 1) * w + x + 1] + DIAG);
                    }
                }
                data[y * w + x] = d;
            }
        }
        for y in (0..h).rev() {
            for x in (0..w).rev() {
                let mut d = data[y * w + x];
                if x + 1 < w {
                    d = d.min(data[y * w + x + 1] + ORTHO);
                }
                if y + 1 < h {
                    d = d.min(data[(y + 1) * w + x] + ORTHO);
                    if x + 1 < w {
                        d = d.min(data[(y + 1) * w + x + 1] + DIAG);
                    }
                    if x > 0 {
                        d = d.min(data[(y + 1) * w + x - 1] + DIAG);
                    }
                }
                data[y * w + x] = d;
            }
        }

        Self {
            width,
            height,
            data,
        }
    }

    /// Distance at the nearest pixel; zero outside the map.
    pub fn get(&self, x: f64, y: f64) -> f32 {
        if x < 0.0 || y < 0.0 {
            return 0.0;
        }
        let (xi, yi) = (x as u32, y as u32);
        if xi >= self.width || yi >= self.height {
            return 0.0;
        }
        self.data[yi as usize * self.width as usize + xi as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_inputs_means_no_mask() {
        assert!(build_mask(10, 10, None, &MaskSpec::default()).is_none());
    }

    #[test]
    fn test_rect_crop() {
        let spec = MaskSpec {
            crop: Some(CropRect { left: 2, top: 2, right: 8, bottom: 8 }),
            ..Default::default()
        };
        let mask = build_mask(10, 10, None, &spec).unwrap();
        assert_eq!(mask.get_pixel(1, 5)[0], 0);
        assert_eq!(mask.get_pixel(5, 5)[0], 255);
        assert_eq!(mask.get_pixel(8, 5)[0], 0);
    }

    #[test]
    fn test_elliptic_crop_clears_corners() {
        let spec = MaskSpec {
            crop: Some(CropRect { left: 0, top: 0, right: 20, bottom: 20 }),
            elliptic: true,
            ..Default::default()
        };
        let mask = build_mask(20, 20, None, &spec).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(10, 10)[0], 255);
    }

    #[test]
    fn test_polygon_excludes_area() {
        let spec = MaskSpec {
            polygons: vec![vec![(0.0, 0.0), (5.0, 0.0), (5.0, 5.0), (0.0, 5.0)]],
            ..Default::default()
        };
        let mask = build_mask(10, 10, None, &spec).unwrap();
        assert_eq!(mask.get_pixel(2, 2)[0], 0);
        assert_eq!(mask.get_pixel(7, 7)[0], 255);
    }

    #[test]
    fn test_distance_map_grows_from_invalid_pixels() {
        let mut mask = GrayImage::from_pixel(20, 1, Luma([255]));
        mask.put_pixel(0, 0, Luma([0]));
        let dist = DistanceMap::from_mask(&mask);
        assert_eq!(dist.get(0.0, 0.0), 0.0);
        assert!((dist.get(5.0, 0.0) - 5.0).abs() < 1e-6);
        assert_eq!(dist.get(-1.0, 0.0), 0.0);
    }
}
