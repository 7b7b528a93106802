use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// Model family fitted by [`ransac`]. Data is addressed by index.
pub trait RansacEstimator {
    type Model;

    /// Minimal number of data points needed by `fit`
    fn sample_size(&self) -> usize;

    fn fit(&self, sample: &[usize]) -> Option<Self::Model>;

    /// Residual of data point `index` under `model`, in pixels
    fn error(&self, model: &Self::Model, index: usize) -> f64;
}

/// Best consensus found
#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub model: M,
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

fn consensus<E: RansacEstimator>(estimator: &E, model: &E::Model, count: usize, threshold: f64) -> Vec<usize> {
    (0..count)
        .filter(|&i| estimator.error(model, i) <= threshold)
        .collect()
}

/// Classic RANSAC over `count` data points.
///
/// Draws `iterations` minimal samples from `rng`, keeps the model with the
/// largest consensus set and finally refits on that set. Returns `None` when
/// there are fewer points than a minimal sample or no sample could be fitted.
pub fn ransac<E: RansacEstimator>(
    estimator: &E,
    count: usize,
    iterations: usize,
    threshold: f64,
    rng: &mut StdRng,
) -> Option<RansacResult<E::Model>> {
    let sample_size = estimator.sample_size();
    if count < sample_size || sample_size == 0 {
        return None;
    }

    let indices: Vec<usize> = (0..count).collect();
    let mut best: Option<(E::Model, Vec<usize>)> = None;
    let mut performed = 0;

    for _ in 0..iterations {
        performed += 1;
        let sample: Vec<usize> = indices.choose_multiple(rng, sample_size).cloned().collect();
        let Some(model) = estimator.fit(&sample) else {
            continue;
        };
        let inliers = consensus(estimator, &model, count, threshold);
        let better = best.as_ref().map_or(true, |(_, b)| inliers.len() > b.len());
        if better {
            let all = inliers.len() == count;
            best = Some((model, inliers));
            if all {
                break;
            }
        }
    }

    let (model, inliers) = best?;

    // refit on the consensus set, keep it only if it does not lose support
    if inliers.len() > sample_size {
        if let Some(refined) = estimator.fit(&inliers) {
            let refined_inliers = consensus(estimator, &refined, count, threshold);
            if refined_inliers.len() >= inliers.len() {
                return Some(RansacResult {
                    model: refined,
                    inliers: refined_inliers,
                    iterations: performed,
                });
            }
        }
    }

    Some(RansacResult {
        model,
        inliers,
        iterations: performed,
    })
}
