use super::Verifier;
use crate::algorithms::CandidateMatch;
use crate::geometry::Lens;
use crate::optimizer::{CameraModel, PairGeometry, PanoOptimizer, PointPair, SharedOptimizer};
use crate::utils::{ransac, RansacEstimator};
use rand::rngs::StdRng;
use std::cell::RefCell;

/// Fits the pair as a two-image panorama through the shared optimizer.
pub struct CameraModelVerifier<'a> {
    lens1: Lens,
    lens2: Lens,
    model: CameraModel,
    optimizer: &'a SharedOptimizer,
}

impl<'a> CameraModelVerifier<'a> {
    pub fn new(lens1: Lens, lens2: Lens, model: CameraModel, optimizer: &'a SharedOptimizer) -> Self {
        Self {
            lens1,
            lens2,
            model,
            optimizer,
        }
    }
}

struct CameraEstimator<'a, 'o> {
    candidates: &'a [CandidateMatch],
    lens1: Lens,
    lens2: Lens,
    model: CameraModel,
    optimizer: RefCell<&'o mut Box<dyn PanoOptimizer>>,
}

impl RansacEstimator for CameraEstimator<'_, '_> {
    type Model = PairGeometry;

    fn sample_size(&self) -> usize {
        self.model.sample_size()
    }

    fn fit(&self, sample: &[usize]) -> Option<PairGeometry> {
        let points: Vec<PointPair> = sample
            .iter()
            .map(|&i| (self.candidates[i].a_pos, self.candidates[i].b_pos))
            .collect();
        self.optimizer
            .borrow_mut()
            .fit_pair(&self.lens1, &self.lens2, &points, self.model)
    }

    fn error(&self, model: &PairGeometry, index: usize) -> f64 {
        let m = &self.candidates[index];
        model.residual(m.a_pos, m.b_pos).unwrap_or(f64::INFINITY)
    }
}

impl Verifier for CameraModelVerifier<'_> {
    fn name(&self) -> &'static str {
        self.model.name()
    }

    fn verify(&self, candidates: &[CandidateMatch], iterations: usize, threshold: f64, rng: &mut StdRng) -> Vec<usize> {
        // held for the whole RANSAC run
        let mut guard = self.optimizer.lock();
        let estimator = CameraEstimator {
            candidates,
            lens1: self.lens1,
            lens2: self.lens2,
            model: self.model,
            optimizer: RefCell::new(&mut *guard),
        };
        ransac(&estimator, candidates.len(), iterations, threshold, rng)
            .map(|result| result.inliers)
            .unwrap_or_default()
    }
}
