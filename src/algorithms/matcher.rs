//! Tentative correspondences between two analysed images.

use super::kdtree::KdForest;
use super::keypoint::Keypoint;
use crate::config::KdTreeConfig;
use std::collections::{HashMap, HashSet};

/// Keypoint `a` of the first image believed to match keypoint `b` of the
/// second. Positions are in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateMatch {
    pub a: usize,
    pub b: usize,
    pub a_pos: (f64, f64),
    pub b_pos: (f64, f64),
}

/// Query every keypoint of `a` against `b_index`.
///
/// A match is accepted when the best squared distance is at most
/// `ratio` times the second best. Keypoints of `b` claimed more than once
/// lose every claim.
pub fn match_keypoints(
    a: &[Keypoint],
    b: &[Keypoint],
    b_index: &KdForest,
    config: &KdTreeConfig,
) -> Vec<CandidateMatch> {
    let mut claims: HashMap<usize, usize> = HashMap::new();
    let mut ambiguous: HashSet<usize> = HashSet::new();

    for (ia, kp) in a.iter().enumerate() {
        if kp.descriptor.is_empty() {
            continue;
        }
        let neighbors = b_index.knn(&kp.descriptor, 2, config.search_steps);
        if neighbors.len() < 2 {
            continue;
        }
        if neighbors[0].dist_sq > config.second_dist_ratio * neighbors[1].dist_sq {
            continue;
        }

        let ib = neighbors[0].index;
        if ambiguous.contains(&ib) {
            continue;
        }
        if claims.remove(&ib).is_some() {
            ambiguous.insert(ib);
            continue;
        }
        claims.insert(ib, ia);
    }

    let mut matches: Vec<CandidateMatch> = claims
        .into_iter()
        .map(|(ib, ia)| CandidateMatch {
            a: ia,
            b: ib,
            a_pos: (a[ia].x, a[ia].y),
            b_pos: (b[ib].x, b[ib].y),
        })
        .collect();
    matches.sort_by_key(|m| m.a);
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn kp(x: f64, descriptor: Vec<f32>) -> Keypoint {
        let mut k = Keypoint::new(x, 0.0, 1.0, 1.0);
        k.descriptor = descriptor;
        k
    }

    fn index(points: &[Keypoint]) -> KdForest {
        KdForest::from_descriptors(
            points.iter().map(|k| k.descriptor.as_slice()),
            4,
            &mut StdRng::seed_from_u64(0),
        )
    }

    #[test]
    fn test_ratio_rejects_ambiguous_neighbours() {
        let b = vec![kp(0.0, vec![0.0, 0.0]), kp(1.0, vec![1.0, 0.0])];
        // equidistant from both
        let a = vec![kp(0.0, vec![0.5, 0.0])];
        let config = KdTreeConfig::default();
        assert!(match_keypoints(&a, &b, &index(&b), &config).is_empty());
    }

    #[test]
    fn test_distinct_match_accepted() {
        let b = vec![kp(5.0, vec![0.0, 0.0]), kp(6.0, vec![10.0, 0.0])];
        let a = vec![kp(1.0, vec![0.1, 0.0])];
        let matches = match_keypoints(&a, &b, &index(&b), &KdTreeConfig::default());
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].b, 0);
        assert_eq!(matches[0].b_pos, (5.0, 0.0));
    }

    #[test]
    fn test_double_claim_drops_both() {
        let b = vec![kp(0.0, vec![0.0, 0.0]), kp(1.0, vec![10.0, 0.0]), kp(2.0, vec![0.0, 10.0])];
        let a = vec![
            kp(0.0, vec![0.1, 0.0]),
            kp(1.0, vec![0.0, 0.1]),
            kp(2.0, vec![10.0, 0.1]),
        ];
        let matches = match_keypoints(&a, &b, &index(&b), &KdTreeConfig::default());
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].a, matches[0].b), (2, 1));
    }
}
