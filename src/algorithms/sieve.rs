//! Bucketed spatial cap.
//!
//! Items are dropped into a `width x height` grid laid over an extent and each
//! bucket keeps at most `size` items, strongest first. Used on keypoints
//! before description and on verified matches before output.

use crate::config::SieveConfig;

/// Area the grid covers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl Extent {
    pub fn image(width: u32, height: u32) -> Self {
        Self {
            min_x: 0.0,
            min_y: 0.0,
            width: width as f64,
            height: height as f64,
        }
    }

    /// Bounding box of `points`, padded the way the match sieve expects.
    pub fn bounding(points: impl IntoIterator<Item = (f64, f64)>) -> Option<Self> {
        let mut iter = points.into_iter().peekable();
        iter.peek()?;
        let (mut min_x, mut min_y) = (f64::MAX, f64::MAX);
        let (mut max_x, mut max_y) = (f64::MIN, f64::MIN);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Self {
            min_x,
            min_y,
            width: max_x - min_x + 2.0,
            height: max_y - min_y + 2.0,
        })
    }

    fn bucket(&self, grid: &SieveConfig, x: f64, y: f64) -> usize {
        let bx = ((x - self.min_x) * grid.width as f64 / self.width).floor();
        let by = ((y - self.min_y) * grid.height as f64 / self.height).floor();
        let bx = (bx.max(0.0) as usize).min(grid.width - 1);
        let by = (by.max(0.0) as usize).min(grid.height - 1);
        by * grid.width + bx
    }
}

/// Keep the `grid.size` highest-scoring items of each bucket.
///
/// Output is bucket-major, each bucket in descending score order.
pub fn sieve<T>(
    items: Vec<T>,
    grid: &SieveConfig,
    extent: &Extent,
    position: impl Fn(&T) -> (f64, f64),
    score: impl Fn(&T) -> f64,
) -> Vec<T> {
    if grid.width == 0 || grid.height == 0 || grid.size == 0 {
        return Vec::new();
    }

    let mut buckets: Vec<Vec<T>> = (0..grid.width * grid.height).map(|_| Vec::new()).collect();
    for item in items {
        let (x, y) = position(&item);
        buckets[extent.bucket(grid, x, y)].push(item);
    }

    let mut out = Vec::new();
    for mut bucket in buckets {
        bucket.sort_by(|a, b| score(b).total_cmp(&score(a)));
        bucket.truncate(grid.size);
        out.extend(bucket);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: usize, height: usize, size: usize) -> SieveConfig {
        SieveConfig { width, height, size }
    }

    #[test]
    fn test_crowded_bucket_is_capped_by_score() {
        let items: Vec<(f64, f64, f64)> = (0..10).map(|i| (1.0, 1.0, i as f64)).collect();
        let kept = sieve(items, &grid(2, 2, 3), &Extent::image(100, 100), |p| (p.0, p.1), |p| p.2);
        let scores: Vec<f64> = kept.iter().map(|p| p.2).collect();
        assert_eq!(scores, vec![9.0, 8.0, 7.0]);
    }

    #[test]
    fn test_sparse_buckets_keep_everything() {
        let items = vec![(10.0, 10.0, 1.0), (90.0, 10.0, 0.5), (90.0, 90.0, 0.1)];
        let kept = sieve(items, &grid(2, 2, 1), &Extent::image(100, 100), |p| (p.0, p.1), |p| p.2);
        assert_eq!(kept.len(), 3);
    }

    #[test]
    fn test_out_of_extent_items_are_clamped() {
        let items = vec![(-5.0, 200.0, 1.0)];
        let kept = sieve(items, &grid(3, 3, 1), &Extent::image(100, 100), |p| (p.0, p.1), |p| p.2);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_bounding_extent_pads_by_two() {
        let extent = Extent::bounding(vec![(10.0, 20.0), (30.0, 25.0)]).unwrap();
        assert_eq!(extent.min_x, 10.0);
        assert_eq!(extent.width, 22.0);
        assert_eq!(extent.height, 7.0);
        assert!(Extent::bounding(Vec::<(f64, f64)>::new()).is_none());
    }
}
