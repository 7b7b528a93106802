use super::SubPanorama;

/// Samples per image side
pub const OVERLAP_SAMPLES: usize = 10;

/// Fraction of a regular grid over image `i` that lands inside image `j`.
pub fn image_overlap(pano: &SubPanorama, i: usize, j: usize) -> f64 {
    let src = &pano.images[i];
    let dst = &pano.images[j];
    let to_dst = dst.orientation.rotation().inverse();
    let mut inside = 0usize;

    for gy in 0..OVERLAP_SAMPLES {
        for gx in 0..OVERLAP_SAMPLES {
            let x = (gx as f64 + 0.5) / OVERLAP_SAMPLES as f64 * src.lens.width as f64;
            let y = (gy as f64 + 0.5) / OVERLAP_SAMPLES as f64 * src.lens.height as f64;
            let Some(world) = pano.world_ray(i, x, y) else {
                continue;
            };
            if let Some((u, v)) = dst.lens.ray_to_image(&(to_dst * world)) {
                if dst.lens.contains(u, v) {
                    inside += 1;
                }
            }
        }
    }

    inside as f64 / (OVERLAP_SAMPLES * OVERLAP_SAMPLES) as f64
}

/// Unordered pairs `(i, j)`, `i < j`, whose overlap in either direction is
/// positive.
pub fn overlapping_pairs(pano: &SubPanorama) -> Vec<(usize, usize)> {
    let n = pano.images.len();
    let mut pairs = Vec::new();
    for i in 0..n {
        for j in i + 1..n {
            let overlap = image_overlap(pano, i, j).max(image_overlap(pano, j, i));
            if overlap > 0.0 {
                pairs.push((i, j));
            }
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Lens, Orientation, Projection};
    use crate::optimizer::PanoImage;

    fn pano(yaws: &[f64]) -> SubPanorama {
        let lens = Lens::new(Projection::Rectilinear, 50.0, 500, 400);
        SubPanorama {
            images: yaws
                .iter()
                .map(|&yaw| PanoImage { lens, orientation: Orientation::new(yaw, 0.0, 0.0) })
                .collect(),
            control_points: Vec::new(),
        }
    }

    #[test]
    fn test_identical_images_fully_overlap() {
        let p = pano(&[0.0, 0.0]);
        assert!((image_overlap(&p, 0, 1) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_half_shifted_and_disjoint_images() {
        let p = pano(&[0.0, 25.0, 180.0]);
        let half = image_overlap(&p, 0, 1);
        assert!(half > 0.3 && half < 0.7, "overlap {}", half);
        assert_eq!(image_overlap(&p, 0, 2), 0.0);
        assert_eq!(overlapping_pairs(&p), vec![(0, 1)]);
    }
}
