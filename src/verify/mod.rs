//! Geometric verification of tentative matches.
//!
//! A pair is verified either with a planar homography (both images narrow)
//! or with a camera model fitted through the shared optimizer. The rejection
//! policy around RANSAC is the same for both.

pub mod camera;
pub mod homography;

use crate::algorithms::CandidateMatch;
use crate::config::{RansacConfig, RansacMode, NARROW_HFOV};
use crate::geometry::Lens;
use crate::optimizer::{CameraModel, SharedOptimizer};
use rand::rngs::StdRng;
use thiserror::Error;

pub use camera::CameraModelVerifier;
pub use homography::HomographyVerifier;

/// Fewest candidates any model is fitted to
pub const MIN_MODEL_MATCHES: usize = 6;

/// Widening of the RANSAC distance when either image was remapped
pub const REMAP_DISTANCE_FACTOR: f64 = 5.0;

/// Common contract of the verification strategies.
pub trait Verifier {
    fn name(&self) -> &'static str;

    /// Indices into `candidates` consistent with the best model found.
    fn verify(&self, candidates: &[CandidateMatch], iterations: usize, threshold: f64, rng: &mut StdRng) -> Vec<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Homography,
    Camera(CameraModel),
}

/// Resolve the configured mode for a pair with the given fields of view.
pub fn select_strategy(mode: RansacMode, hfov1: f64, hfov2: f64) -> Strategy {
    match mode {
        RansacMode::Hom => Strategy::Homography,
        RansacMode::Rpy => Strategy::Camera(CameraModel::Rpy),
        RansacMode::Rpyv => Strategy::Camera(CameraModel::Rpyv),
        RansacMode::Rpyvb => Strategy::Camera(CameraModel::Rpyvb),
        RansacMode::Auto => {
            if hfov1 < NARROW_HFOV && hfov2 < NARROW_HFOV {
                Strategy::Homography
            } else {
                Strategy::Camera(CameraModel::Rpy)
            }
        }
    }
}

/// Why a pair's matches were discarded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("{found} candidate matches, {required} required")]
    BelowMinimum { found: usize, required: usize },
    #[error("{found} candidate matches, too few to fit a model")]
    TooFewForModel { found: usize },
    #[error("only {inliers} of {total} matches are inliers")]
    MajorityOutliers { inliers: usize, total: usize },
    #[error("{inliers} inliers, {required} required")]
    TooFewInliers { inliers: usize, required: usize },
}

/// Checks before RANSAC runs.
pub fn check_candidates(found: usize, min_matches: usize) -> Result<(), Rejection> {
    if found < min_matches {
        return Err(Rejection::BelowMinimum {
            found,
            required: min_matches,
        });
    }
    if found < MIN_MODEL_MATCHES {
        return Err(Rejection::TooFewForModel { found });
    }
    Ok(())
}

/// Checks after RANSAC: at least half of the candidates and at least
/// `min_matches` must survive.
pub fn check_inliers(inliers: usize, total: usize, min_matches: usize) -> Result<(), Rejection> {
    if 2 * inliers < total {
        return Err(Rejection::MajorityOutliers { inliers, total });
    }
    if inliers < min_matches {
        return Err(Rejection::TooFewInliers {
            inliers,
            required: min_matches,
        });
    }
    Ok(())
}

/// Per-pair inputs of verification.
pub struct PairContext<'a> {
    pub lens1: &'a Lens,
    pub lens2: &'a Lens,
    /// Either image was detected on the remap canvas
    pub remapped: bool,
    pub config: &'a RansacConfig,
    pub optimizer: &'a SharedOptimizer,
}

/// Surviving matches of a verified pair.
#[derive(Debug, Clone)]
pub struct Verified {
    pub strategy: &'static str,
    pub inliers: Vec<CandidateMatch>,
}

/// Apply the rejection policy and the selected RANSAC strategy.
pub fn verify_pair(
    candidates: &[CandidateMatch],
    context: &PairContext<'_>,
    rng: &mut StdRng,
) -> Result<Verified, Rejection> {
    let config = context.config;
    check_candidates(candidates.len(), config.min_matches)?;

    let threshold = if context.remapped {
        config.distance * REMAP_DISTANCE_FACTOR
    } else {
        config.distance
    };

    let strategy = select_strategy(config.mode, context.lens1.hfov, context.lens2.hfov);
    let (name, indices) = match strategy {
        Strategy::Homography => {
            let verifier = HomographyVerifier;
            (verifier.name(), verifier.verify(candidates, config.iterations, threshold, rng))
        }
        Strategy::Camera(model) => {
            let verifier = CameraModelVerifier::new(*context.lens1, *context.lens2, model, context.optimizer);
            (verifier.name(), verifier.verify(candidates, config.iterations, threshold, rng))
        }
    };

    check_inliers(indices.len(), candidates.len(), config.min_matches)?;

    Ok(Verified {
        strategy: name,
        inliers: indices.into_iter().map(|i| candidates[i]).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_selects_by_field_of_view() {
        assert_eq!(select_strategy(RansacMode::Auto, 50.0, 64.9), Strategy::Homography);
        assert_eq!(
            select_strategy(RansacMode::Auto, 50.0, 65.0),
            Strategy::Camera(CameraModel::Rpy)
        );
        assert_eq!(select_strategy(RansacMode::Hom, 120.0, 120.0), Strategy::Homography);
        assert_eq!(
            select_strategy(RansacMode::Rpyvb, 20.0, 20.0),
            Strategy::Camera(CameraModel::Rpyvb)
        );
    }

    #[test]
    fn test_candidate_boundaries() {
        assert_eq!(
            check_candidates(5, 6),
            Err(Rejection::BelowMinimum { found: 5, required: 6 })
        );
        assert_eq!(check_candidates(5, 3), Err(Rejection::TooFewForModel { found: 5 }));
        assert!(check_candidates(6, 6).is_ok());
    }

    #[test]
    fn test_inlier_boundaries() {
        assert!(check_inliers(10, 20, 6).is_ok());
        assert_eq!(
            check_inliers(9, 20, 6),
            Err(Rejection::MajorityOutliers { inliers: 9, total: 20 })
        );
        assert_eq!(
            check_inliers(5, 8, 6),
            Err(Rejection::TooFewInliers { inliers: 5, required: 6 })
        );
    }
}
