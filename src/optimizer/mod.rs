//! Panorama geometry estimation.
//!
//! The detector needs geometry twice: camera-model RANSAC fits the relative
//! rotation (and optionally field of view and distortion) of an image pair,
//! and multi-row planning aligns the row representatives to predict which
//! further pairs overlap. Both go through [`PanoOptimizer`]. Implementations
//! are not required to be reentrant; [`SharedOptimizer`] serializes every call
//! for the lifetime of a run.

pub mod overlap;

use crate::algorithms::ControlPoint;
use crate::geometry::{Lens, Orientation};
use nalgebra::{Matrix3, Rotation3, Vector3};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

pub use overlap::{image_overlap, overlapping_pairs};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanoImage {
    pub lens: Lens,
    pub orientation: Orientation,
}

/// Small panorama built from a subset of project images. Control points
/// refer to positions in `images`.
#[derive(Debug, Clone, Default)]
pub struct SubPanorama {
    pub images: Vec<PanoImage>,
    pub control_points: Vec<ControlPoint>,
}

impl SubPanorama {
    /// World-frame ray through pixel `(x, y)` of image `i`.
    pub fn world_ray(&self, i: usize, x: f64, y: f64) -> Option<Vector3<f64>> {
        let image = &self.images[i];
        let ray = image.lens.image_to_ray(x, y)?;
        Some(image.orientation.rotation() * ray)
    }

    /// Root-mean-square angle between control point rays, in degrees.
    pub fn rms_error(&self) -> f64 {
        let mut sum = 0.0;
        let mut n = 0usize;
        for cp in &self.control_points {
            let (Some(a), Some(b)) = (
                self.world_ray(cp.image1, cp.x1, cp.y1),
                self.world_ray(cp.image2, cp.x2, cp.y2),
            ) else {
                continue;
            };
            let angle = a.normalize().dot(&b.normalize()).clamp(-1.0, 1.0).acos().to_degrees();
            sum += angle * angle;
            n += 1;
        }
        if n == 0 {
            0.0
        } else {
            (sum / n as f64).sqrt()
        }
    }
}

/// Which orientation parameters the optimizer may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrientationVars {
    /// Yaw, pitch and roll of every image except the anchor
    All,
    /// Yaw and pitch; the anchor keeps its yaw and only moves in pitch
    YawPitch,
}

#[derive(Debug, Clone, Copy)]
pub struct OptimizeRequest {
    pub anchor: usize,
    pub vars: OrientationVars,
    pub iterations: usize,
}

impl Default for OptimizeRequest {
    fn default() -> Self {
        Self {
            anchor: 0,
            vars: OrientationVars::All,
            iterations: 20,
        }
    }
}

/// Camera model estimated by camera-model RANSAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    /// Roll, pitch, yaw
    Rpy,
    /// Plus field of view
    Rpyv,
    /// Plus radial distortion `b`
    Rpyvb,
}

impl CameraModel {
    pub fn sample_size(self) -> usize {
        match self {
            CameraModel::Rpy => 2,
            CameraModel::Rpyv => 3,
            CameraModel::Rpyvb => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CameraModel::Rpy => "rpy",
            CameraModel::Rpyv => "rpyv",
            CameraModel::Rpyvb => "rpyvb",
        }
    }
}

/// Relative geometry of an image pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairGeometry {
    /// Maps camera-2 rays into the camera-1 frame
    pub rotation: Rotation3<f64>,
    pub lens1: Lens,
    pub lens2: Lens,
}

impl PairGeometry {
    /// Larger of the two reprojection distances, in pixels.
    pub fn residual(&self, p1: (f64, f64), p2: (f64, f64)) -> Option<f64> {
        let r1 = self.lens1.image_to_ray(p1.0, p1.1)?;
        let r2 = self.lens2.image_to_ray(p2.0, p2.1)?;
        let q1 = self.lens1.ray_to_image(&(self.rotation * r2))?;
        let q2 = self.lens2.ray_to_image(&(self.rotation.inverse() * r1))?;
        let d1 = ((q1.0 - p1.0).powi(2) + (q1.1 - p1.1).powi(2)).sqrt();
        let d2 = ((q2.0 - p2.0).powi(2) + (q2.1 - p2.1).powi(2)).sqrt();
        Some(d1.max(d2))
    }
}

/// Point pair in pixels of image 1 and image 2.
pub type PointPair = ((f64, f64), (f64, f64));

pub trait PanoOptimizer: Send {
    fn name(&self) -> &'static str;

    /// Initialise orientations along a spanning tree of the control point
    /// graph, starting at the anchor.
    fn pairwise(&mut self, pano: &mut SubPanorama, request: &OptimizeRequest);

    /// Refine orientations against all control points. Returns the final
    /// RMS error in degrees.
    fn optimize(&mut self, pano: &mut SubPanorama, request: &OptimizeRequest) -> f64;

    /// Fit the relative geometry of two images from point pairs.
    fn fit_pair(&mut self, lens1: &Lens, lens2: &Lens, points: &[PointPair], model: CameraModel) -> Option<PairGeometry>;
}

/// Process-wide serialization point for optimizer calls.
#[derive(Clone)]
pub struct SharedOptimizer {
    inner: Arc<Mutex<Box<dyn PanoOptimizer>>>,
}

impl SharedOptimizer {
    pub fn new(optimizer: impl PanoOptimizer + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(optimizer))),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn PanoOptimizer>> {
        // a panicked holder leaves no partial state worth rejecting
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for SharedOptimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedOptimizer").finish_non_exhaustive()
    }
}

/// Rotation `R` minimising `sum |R * from_i - to_i|^2` over unit vectors.
pub fn kabsch(from: &[Vector3<f64>], to: &[Vector3<f64>]) -> Option<Rotation3<f64>> {
    if from.len() < 2 || from.len() != to.len() {
        return None;
    }
    let mut h = Matrix3::zeros();
    for (a, b) in from.iter().zip(to) {
        h += a.normalize() * b.normalize().transpose();
    }
    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let v = v_t.transpose();
    let d = (v * u.transpose()).determinant().signum();
    let correction = Matrix3::from_diagonal(&Vector3::new(1.0, 1.0, d));
    let r = v * correction * u.transpose();
    r.iter().all(|x| x.is_finite()).then(|| Rotation3::from_matrix_unchecked(r))
}

fn golden_section(f: impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, iterations: usize) -> f64 {
    let ratio = (5f64.sqrt() - 1.0) / 2.0;
    let mut c = hi - ratio * (hi - lo);
    let mut d = lo + ratio * (hi - lo);
    let (mut fc, mut fd) = (f(c), f(d));
    for _ in 0..iterations {
        if fc < fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - ratio * (hi - lo);
            fc = f(c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + ratio * (hi - lo);
            fd = f(d);
        }
    }
    (lo + hi) / 2.0
}

/// Built-in optimizer estimating rotations on unit rays.
#[derive(Debug, Clone, Default)]
pub struct RotationOptimizer;

impl RotationOptimizer {
    fn constrain(current: Orientation, proposed: Orientation, is_anchor: bool, vars: OrientationVars) -> Orientation {
        match (vars, is_anchor) {
            (OrientationVars::All, true) => current,
            (OrientationVars::All, false) => proposed,
            (OrientationVars::YawPitch, true) => Orientation {
                pitch: proposed.pitch,
                ..current
            },
            (OrientationVars::YawPitch, false) => Orientation {
                yaw: proposed.yaw,
                pitch: proposed.pitch,
                roll: current.roll,
            },
        }
    }

    fn pair_rays(
        pano: &SubPanorama,
        child: usize,
        parent: usize,
    ) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
        let mut from = Vec::new();
        let mut to = Vec::new();
        for cp in &pano.control_points {
            let (c, p) = if cp.image1 == child && cp.image2 == parent {
                ((cp.x1, cp.y1), (cp.x2, cp.y2))
            } else if cp.image2 == child && cp.image1 == parent {
                ((cp.x2, cp.y2), (cp.x1, cp.y1))
            } else {
                continue;
            };
            if let (Some(rc), Some(rp)) = (
                pano.images[child].lens.image_to_ray(c.0, c.1),
                pano.images[parent].lens.image_to_ray(p.0, p.1),
            ) {
                from.push(rc);
                to.push(rp);
            }
        }
        (from, to)
    }

    fn pair_cost(lens1: &Lens, lens2: &Lens, points: &[PointPair]) -> (f64, Option<Rotation3<f64>>) {
        let mut from = Vec::with_capacity(points.len());
        let mut to = Vec::with_capacity(points.len());
        for (p1, p2) in points {
            let (Some(r1), Some(r2)) = (lens1.image_to_ray(p1.0, p1.1), lens2.image_to_ray(p2.0, p2.1)) else {
                return (f64::MAX, None);
            };
            from.push(r2);
            to.push(r1);
        }
        let Some(rotation) = kabsch(&from, &to) else {
            return (f64::MAX, None);
        };
        let geometry = PairGeometry {
            rotation,
            lens1: *lens1,
            lens2: *lens2,
        };
        let cost = points
            .iter()
            .map(|(p1, p2)| geometry.residual(*p1, *p2).map_or(1e6, |r| r * r))
            .sum();
        (cost, Some(rotation))
    }
}

impl PanoOptimizer for RotationOptimizer {
    fn name(&self) -> &'static str {
        "rotation"
    }

    fn pairwise(&mut self, pano: &mut SubPanorama, request: &OptimizeRequest) {
        let n = pano.images.len();
        if request.anchor >= n {
            return;
        }
        let mut adjacency: HashMap<usize, Vec<usize>> = HashMap::new();
        for cp in &pano.control_points {
            if cp.image1 != cp.image2 {
                adjacency.entry(cp.image1).or_default().push(cp.image2);
                adjacency.entry(cp.image2).or_default().push(cp.image1);
            }
        }
        for neighbours in adjacency.values_mut() {
            neighbours.sort_unstable();
            neighbours.dedup();
        }

        let mut visited = vec![false; n];
        visited[request.anchor] = true;
        let mut queue = VecDeque::from([request.anchor]);
        while let Some(parent) = queue.pop_front() {
            let Some(children) = adjacency.get(&parent) else {
                continue;
            };
            for &child in children {
                if visited[child] {
                    continue;
                }
                let (from, to) = Self::pair_rays(pano, child, parent);
                let Some(relative) = kabsch(&from, &to) else {
                    continue;
                };
                visited[child] = true;
                let world = pano.images[parent].orientation.rotation() * relative;
                let current = pano.images[child].orientation;
                pano.images[child].orientation =
                    Self::constrain(current, Orientation::from_rotation(&world), false, request.vars);
                queue.push_back(child);
            }
        }
    }

    fn optimize(&mut self, pano: &mut SubPanorama, request: &OptimizeRequest) -> f64 {
        for _ in 0..request.iterations {
            for i in 0..pano.images.len() {
                let mut from = Vec::new();
                let mut to = Vec::new();
                for cp in &pano.control_points {
                    let (own, other, other_pos) = if cp.image1 == i && cp.image2 != i {
                        ((cp.x1, cp.y1), cp.image2, (cp.x2, cp.y2))
                    } else if cp.image2 == i && cp.image1 != i {
                        ((cp.x2, cp.y2), cp.image1, (cp.x1, cp.y1))
                    } else {
                        continue;
                    };
                    if let (Some(r), Some(w)) = (
                        pano.images[i].lens.image_to_ray(own.0, own.1),
                        pano.world_ray(other, other_pos.0, other_pos.1),
                    ) {
                        from.push(r);
                        to.push(w);
                    }
                }
                let Some(rotation) = kabsch(&from, &to) else {
                    continue;
                };
                let current = pano.images[i].orientation;
                pano.images[i].orientation = Self::constrain(
                    current,
                    Orientation::from_rotation(&rotation),
                    i == request.anchor,
                    request.vars,
                );
            }
        }
        pano.rms_error()
    }

    fn fit_pair(&mut self, lens1: &Lens, lens2: &Lens, points: &[PointPair], model: CameraModel) -> Option<PairGeometry> {
        if points.len() < model.sample_size() {
            return None;
        }
        let mut l1 = *lens1;
        let mut l2 = *lens2;

        if model != CameraModel::Rpy {
            let rounds = if model == CameraModel::Rpyvb { 2 } else { 1 };
            for _ in 0..rounds {
                let (h1, h2) = (l1.hfov, l2.hfov);
                let scale = golden_section(
                    |k| {
                        let a = Lens { hfov: (h1 * k).min(360.0), ..l1 };
                        let b = Lens { hfov: (h2 * k).min(360.0), ..l2 };
                        Self::pair_cost(&a, &b, points).0
                    },
                    0.7,
                    1.3,
                    30,
                );
                l1.hfov = (h1 * scale).min(360.0);
                l2.hfov = (h2 * scale).min(360.0);

                if model == CameraModel::Rpyvb {
                    let b = golden_section(
                        |b| {
                            let a = Lens { b, ..l1 };
                            let c = Lens { b, ..l2 };
                            Self::pair_cost(&a, &c, points).0
                        },
                        -0.15,
                        0.15,
                        30,
                    );
                    l1.b = b;
                    l2.b = b;
                }
            }
        }

        let (_, rotation) = Self::pair_cost(&l1, &l2, points);
        Some(PairGeometry {
            rotation: rotation?,
            lens1: l1,
            lens2: l2,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Projection;

    fn project(lens: &Lens, orientation: &Orientation, world: &Vector3<f64>) -> Option<(f64, f64)> {
        lens.ray_to_image(&(orientation.rotation().inverse() * world))
    }

    fn synthetic_pano() -> (SubPanorama, Vec<Orientation>) {
        let lens = Lens::new(Projection::Rectilinear, 60.0, 600, 400);
        let truth = vec![
            Orientation::new(0.0, 0.0, 0.0),
            Orientation::new(30.0, 2.0, 0.0),
            Orientation::new(60.0, -3.0, 0.0),
        ];
        let mut cps = Vec::new();
        for (a, b) in [(0usize, 1usize), (1, 2)] {
            let mid = (truth[a].yaw + truth[b].yaw) / 2.0;
            for k in 0..8 {
                let yaw = (mid - 6.0 + k as f64 * 1.7).to_radians();
                let pitch = (-8.0 + k as f64 * 2.3).to_radians();
                let world = Vector3::new(pitch.cos() * yaw.sin(), -pitch.sin(), pitch.cos() * yaw.cos());
                if let (Some(p), Some(q)) = (project(&lens, &truth[a], &world), project(&lens, &truth[b], &world)) {
                    cps.push(ControlPoint { image1: a, x1: p.0, y1: p.1, image2: b, x2: q.0, y2: q.1 });
                }
            }
        }
        let images = vec![PanoImage { lens, orientation: Orientation::default() }; 3];
        (SubPanorama { images, control_points: cps }, truth)
    }

    #[test]
    fn test_kabsch_recovers_rotation() {
        let r = Orientation::new(20.0, -10.0, 5.0).rotation();
        let from: Vec<Vector3<f64>> = vec![
            Vector3::new(0.0, 0.0, 1.0),
            Vector3::new(0.3, 0.1, 1.0).normalize(),
            Vector3::new(-0.2, 0.4, 1.0).normalize(),
        ];
        let to: Vec<Vector3<f64>> = from.iter().map(|v| r * v).collect();
        let est = kabsch(&from, &to).unwrap();
        assert!(est.angle_to(&r) < 1e-9);
    }

    #[test]
    fn test_pairwise_then_optimize_recovers_chain() {
        let (mut pano, truth) = synthetic_pano();
        let mut optimizer = RotationOptimizer;
        let request = OptimizeRequest::default();
        optimizer.pairwise(&mut pano, &request);
        let rms = optimizer.optimize(&mut pano, &request);
        assert!(rms < 1e-6, "rms {}", rms);
        for (image, expected) in pano.images.iter().zip(&truth) {
            assert!((image.orientation.yaw - expected.yaw).abs() < 1e-6);
            assert!((image.orientation.pitch - expected.pitch).abs() < 1e-6);
        }
    }

    #[test]
    fn test_fit_pair_residuals_vanish_for_exact_points() {
        let (pano, _) = synthetic_pano();
        let lens = pano.images[0].lens;
        let points: Vec<PointPair> = pano
            .control_points
            .iter()
            .filter(|cp| cp.image1 == 0)
            .map(|cp| ((cp.x1, cp.y1), (cp.x2, cp.y2)))
            .collect();
        let shared = SharedOptimizer::new(RotationOptimizer);
        let geometry = shared.lock().fit_pair(&lens, &lens, &points, CameraModel::Rpy).unwrap();
        for (p1, p2) in &points {
            assert!(geometry.residual(*p1, *p2).unwrap() < 1e-6);
        }
        assert!(shared.lock().fit_pair(&lens, &lens, &points[..1], CameraModel::Rpy).is_none());
    }
}
