//! Pair planning: which image pairs get matched.
//!
//! Every strategy shares one [`CheckedPairs`] set per run so that a pair is
//! scheduled at most once, whichever phase proposes it first.

pub mod graph;
pub mod multirow;

use crate::algorithms::ControlPoint;
use crate::optimizer::{overlapping_pairs, SubPanorama};
use std::collections::HashSet;

pub use graph::components;
pub use multirow::{StackLayout, LAYER_HFOV_FACTOR};

/// One pair of project images to match, `i1 < i2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MatchTask {
    pub i1: usize,
    pub i2: usize,
}

impl MatchTask {
    pub fn new(a: usize, b: usize) -> Self {
        Self {
            i1: a.min(b),
            i2: a.max(b),
        }
    }
}

/// Unordered image pairs already matched or scheduled.
#[derive(Debug, Clone, Default)]
pub struct CheckedPairs {
    pairs: HashSet<(usize, usize)>,
}

impl CheckedPairs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs already linked by point-pair control points.
    pub fn from_control_points(points: &[ControlPoint]) -> Self {
        let mut checked = Self::new();
        for cp in points {
            checked.insert(cp.image1, cp.image2);
        }
        checked
    }

    fn key(a: usize, b: usize) -> (usize, usize) {
        (a.min(b), a.max(b))
    }

    pub fn contains(&self, a: usize, b: usize) -> bool {
        self.pairs.contains(&Self::key(a, b))
    }

    /// Mark a pair. Returns false for self pairs and pairs already present.
    pub fn insert(&mut self, a: usize, b: usize) -> bool {
        a != b && self.pairs.insert(Self::key(a, b))
    }

    /// Task for the pair unless it was already checked.
    pub fn claim(&mut self, a: usize, b: usize) -> Option<MatchTask> {
        self.insert(a, b).then(|| MatchTask::new(a, b))
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Pairs each image with the next `window` images of `images`; `None`
/// pairs every image with every later one.
pub fn sequential_tasks(images: &[usize], window: Option<usize>, checked: &mut CheckedPairs) -> Vec<MatchTask> {
    let n = images.len();
    if n < 2 {
        return Vec::new();
    }
    let len = window.unwrap_or(n).min(n - 1);
    let mut tasks = Vec::new();
    for p in 0..n {
        let end = (p + 1 + len).min(n);
        for q in p + 1..end {
            if let Some(task) = checked.claim(images[p], images[q]) {
                tasks.push(task);
            }
        }
    }
    tasks
}

/// Pairs of `pano` that overlap under its current orientations. Positions in
/// `pano` map to project indices through `image_map`. Fields of view are
/// multiplied by `hfov_factor` (capped at 360 degrees) before testing.
pub fn overlap_tasks(
    pano: &SubPanorama,
    image_map: &[usize],
    hfov_factor: f64,
    checked: &mut CheckedPairs,
) -> Vec<MatchTask> {
    let mut widened = pano.clone();
    for image in &mut widened.images {
        image.lens.hfov = (image.lens.hfov * hfov_factor).min(360.0);
    }
    overlapping_pairs(&widened)
        .into_iter()
        .filter_map(|(i, j)| checked.claim(image_map[i], image_map[j]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Lens, Orientation, Projection};
    use crate::optimizer::PanoImage;

    #[test]
    fn test_all_pairs_and_linear_window() {
        let images: Vec<usize> = (0..5).collect();
        let mut checked = CheckedPairs::new();
        assert_eq!(sequential_tasks(&images, None, &mut checked).len(), 10);

        let mut checked = CheckedPairs::new();
        let tasks = sequential_tasks(&images, Some(2), &mut checked);
        assert_eq!(tasks.len(), 7);
        assert!(tasks.contains(&MatchTask::new(0, 2)));
        assert!(!tasks.contains(&MatchTask::new(0, 3)));

        // window clamps to the image count
        let mut checked = CheckedPairs::new();
        assert_eq!(sequential_tasks(&images, Some(50), &mut checked).len(), 10);
    }

    #[test]
    fn test_checked_pairs_are_not_rescheduled() {
        let mut checked = CheckedPairs::from_control_points(&[ControlPoint {
            image1: 2,
            x1: 0.0,
            y1: 0.0,
            image2: 1,
            x2: 0.0,
            y2: 0.0,
        }]);
        assert!(checked.contains(1, 2));
        assert!(checked.claim(0, 0).is_none());
        let tasks = sequential_tasks(&[0, 1, 2], Some(1), &mut checked);
        assert_eq!(tasks, vec![MatchTask::new(0, 1)]);
        assert_eq!(sequential_tasks(&[0, 1, 2], None, &mut checked), vec![MatchTask::new(0, 2)]);
    }

    #[test]
    fn test_overlap_tasks_use_widened_fov() {
        let lens = Lens::new(Projection::Rectilinear, 40.0, 400, 300);
        let pano = SubPanorama {
            images: [0.0, 42.0]
                .iter()
                .map(|&yaw| PanoImage { lens, orientation: Orientation::new(yaw, 0.0, 0.0) })
                .collect(),
            control_points: Vec::new(),
        };
        assert!(overlap_tasks(&pano, &[3, 7], 1.0, &mut CheckedPairs::new()).is_empty());
        assert_eq!(
            overlap_tasks(&pano, &[3, 7], LAYER_HFOV_FACTOR, &mut CheckedPairs::new()),
            vec![MatchTask::new(3, 7)]
        );
    }
}
