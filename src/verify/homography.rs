use super::Verifier;
use crate::algorithms::homography::{apply_homography, estimate_homography};
use crate::algorithms::CandidateMatch;
use crate::utils::{ransac, RansacEstimator};
use nalgebra::Matrix3;
use rand::rngs::StdRng;

/// Planar projective model between narrow images.
#[derive(Debug, Clone, Copy, Default)]
pub struct HomographyVerifier;

struct HomographyEstimator<'a> {
    candidates: &'a [CandidateMatch],
}

impl RansacEstimator for HomographyEstimator<'_> {
    type Model = Matrix3<f64>;

    fn sample_size(&self) -> usize {
        4
    }

    fn fit(&self, sample: &[usize]) -> Option<Matrix3<f64>> {
        let src: Vec<(f64, f64)> = sample.iter().map(|&i| self.candidates[i].a_pos).collect();
        let dst: Vec<(f64, f64)> = sample.iter().map(|&i| self.candidates[i].b_pos).collect();
        estimate_homography(&src, &dst)
    }

    fn error(&self, model: &Matrix3<f64>, index: usize) -> f64 {
        let m = &self.candidates[index];
        match apply_homography(model, m.a_pos) {
            Some((x, y)) => ((x - m.b_pos.0).powi(2) + (y - m.b_pos.1).powi(2)).sqrt(),
            None => f64::INFINITY,
        }
    }
}

impl Verifier for HomographyVerifier {
    fn name(&self) -> &'static str {
        "homography"
    }

    fn verify(&self, candidates: &[CandidateMatch], iterations: usize, threshold: f64, rng: &mut StdRng) -> Vec<usize> {
        let estimator = HomographyEstimator { candidates };
        ransac(&estimator, candidates.len(), iterations, threshold, rng)
            .map(|result| result.inliers)
            .unwrap_or_default()
    }
}
