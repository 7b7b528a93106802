//! The two per-task stages: image analysis and pair matching.

use super::types::{ImageRecord, PairOutcome, PairStatus};
use super::PipelineStage;
use crate::algorithms::{
    match_keypoints, sieve, CandidateMatch, ControlPoint, Extent, KdForest, Keypoint, KeypointDescriptor,
    KeypointDetector,
};
use crate::config::DetectorConfig;
use crate::data::{self, loader, DistanceMap, ImageSource, SkyMasking};
use crate::error::DetectError;
use crate::logging::{ImageSpan, PairSpan};
use crate::optimizer::SharedOptimizer;
use crate::planner::MatchTask;
use crate::project::read_keyfile;
use crate::verify::{verify_pair, PairContext};
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::marker::PhantomData;
use tracing::{debug, warn};
use uuid::Uuid;

/// Keypoints closer to the mask border than this many scales are dropped
const BORDER_SCALES: f64 = 8.0;

/// Distinct random stream per image or pair, derived from the run seed.
pub fn task_rng(seed: u64, a: usize, b: usize) -> StdRng {
    let mixed = seed
        ^ (a as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15)
        ^ (b as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
    StdRng::seed_from_u64(mixed)
}

/// Detects, sieves and describes keypoints of one image, maps them to
/// source pixels and builds the search index. Images with a usable key file
/// skip straight to the index.
pub struct AnalyseStage<'a, 'r> {
    pub config: &'a DetectorConfig,
    pub detector: &'a dyn KeypointDetector,
    pub descriptor: &'a dyn KeypointDescriptor,
    pub source: &'a dyn ImageSource,
    pub sky: Option<SkyMasking<'a>>,
    pub correlation_id: Option<Uuid>,
    records: PhantomData<fn(&'r mut ImageRecord)>,
}

impl<'a, 'r> AnalyseStage<'a, 'r> {
    pub fn new(
        config: &'a DetectorConfig,
        detector: &'a dyn KeypointDetector,
        descriptor: &'a dyn KeypointDescriptor,
        source: &'a dyn ImageSource,
        sky: Option<SkyMasking<'a>>,
        correlation_id: Option<Uuid>,
    ) -> Self {
        Self {
            config,
            detector,
            descriptor,
            source,
            sky,
            correlation_id,
            records: PhantomData,
        }
    }

    /// Keypoints from the record's key file, if it exists and fits the image.
    fn load_keyfile(&self, record: &ImageRecord) -> Option<(Vec<Keypoint>, usize)> {
        if !record.has_keyfile {
            return None;
        }
        match read_keyfile(&record.keyfile) {
            Ok(file) if (file.width, file.height) == (record.lens.width, record.lens.height) => {
                Some((file.keypoints, file.dims))
            }
            Ok(file) => {
                warn!(
                    image = record.index,
                    keyfile = %record.keyfile.display(),
                    width = file.width,
                    height = file.height,
                    "Key file size does not match the image, detecting again"
                );
                None
            }
            Err(e) => {
                warn!(image = record.index, error = %e, "Ignoring unreadable key file");
                None
            }
        }
    }

    fn detect(&self, record: &ImageRecord, span: &ImageSpan) -> Result<Vec<Keypoint>> {
        let geometry = record.detection_geometry(self.config.downscale);
        let prepared = data::prepare(self.source, &record.path, &geometry, self.sky.as_ref())?;
        if let Err(e) = loader::validate_image_size(&prepared.buffer) {
            warn!(image = record.index, error = %e, "Detection buffer too small");
            return Ok(Vec::new());
        }

        let detected = self.detector.detect(&prepared.integral);
        span.record_detection(detected.len());

        let before = detected.len();
        let kept = sieve_keypoints(detected, record, prepared.distance.as_ref(), self.config);
        span.record_sieve(before, kept.len());

        let mut described = Vec::with_capacity(kept.len());
        for kp in &kept {
            for angle in self.descriptor.orientations(&prepared.integral, kp) {
                let mut oriented = kp.with_orientation(angle);
                self.descriptor.describe(&prepared.integral, &mut oriented);
                described.push(oriented);
            }
        }
        span.record_descriptors(described.len(), self.descriptor.dims());

        Ok(remap_back(described, record, self.config.downscale))
    }
}

/// Pass-one sieve over detection-buffer keypoints.
fn sieve_keypoints(
    keypoints: Vec<Keypoint>,
    record: &ImageRecord,
    distance: Option<&DistanceMap>,
    config: &DetectorConfig,
) -> Vec<Keypoint> {
    let inside: Vec<Keypoint> = match distance {
        Some(map) => keypoints
            .into_iter()
            .filter(|kp| map.get(kp.x, kp.y) as f64 > kp.scale * BORDER_SCALES)
            .collect(),
        None => keypoints,
    };
    let extent = Extent::image(record.detect_width, record.detect_height);
    sieve(inside, &config.sieve1, &extent, |kp| (kp.x, kp.y), |kp| kp.score)
}

/// Move keypoints from detection-buffer pixels to source pixels. Keypoints
/// that do not land inside the source image are dropped.
pub fn remap_back(keypoints: Vec<Keypoint>, record: &ImageRecord, downscale: bool) -> Vec<Keypoint> {
    let factor = if downscale { 2.0 } else { 1.0 };
    keypoints
        .into_iter()
        .filter_map(|mut kp| {
            let (x, y) = match &record.canvas {
                Some(canvas) => {
                    let (x, y) = canvas.roi_to_source(&record.lens, kp.x, kp.y)?;
                    // canvas pixels are not halved; scale follows the local magnification
                    if let Some((sx, sy)) = canvas.roi_to_source(&record.lens, kp.x + kp.scale, kp.y) {
                        kp.scale = (sx - x).hypot(sy - y);
                    }
                    (x, y)
                }
                None => {
                    kp.scale *= factor;
                    (kp.x * factor, kp.y * factor)
                }
            };
            kp.x = x;
            kp.y = y;
            record.lens.contains(x, y).then_some(kp)
        })
        .collect()
}

impl<'r> PipelineStage for AnalyseStage<'_, 'r> {
    type Input = &'r mut ImageRecord;
    type Output = ();

    fn execute(&self, record: &'r mut ImageRecord) -> Result<()> {
        let span = ImageSpan::new(record.index, &record.file_name(), self.correlation_id);
        let _guard = span.enter();

        let (keypoints, dims) = match self.load_keyfile(record) {
            Some(cached) => {
                debug!(image = record.index, keypoints = cached.0.len(), "Keypoints loaded from key file");
                cached
            }
            None => {
                record.has_keyfile = false;
                match self.detect(record, &span) {
                    Ok(kps) => (kps, self.descriptor.dims()),
                    Err(e) => {
                        record.load_fail = true;
                        span.record_result(false, &format!("{:#}", e));
                        return Err(DetectError::ImageLoad {
                            index: record.index,
                            path: record.path.clone(),
                            reason: format!("{:#}", e),
                        }
                        .into());
                    }
                }
            }
        };

        record.dims = dims;
        record.forest = if keypoints.is_empty() {
            None
        } else {
            let mut rng = task_rng(self.config.seed, record.index, record.index);
            Some(KdForest::from_descriptors(
                keypoints.iter().map(|kp| kp.descriptor.as_slice()),
                self.config.kdtree.trees,
                &mut rng,
            ))
        };
        record.keypoints = keypoints;
        span.record_result(true, &format!("{} keypoints", record.keypoints.len()));
        Ok(())
    }

    fn stage_name(&self) -> &str {
        "analyse"
    }
}

/// Matches one pair, verifies the candidates and declusters the survivors.
pub struct MatchStage<'a> {
    pub records: &'a [ImageRecord],
    pub config: &'a DetectorConfig,
    pub optimizer: &'a SharedOptimizer,
    pub correlation_id: Option<Uuid>,
    pub name: &'static str,
}

impl MatchStage<'_> {
    fn sieve_matches(&self, inliers: Vec<CandidateMatch>, first: &ImageRecord) -> Vec<CandidateMatch> {
        if inliers.len() < 2 {
            return inliers;
        }
        let Some(extent) = Extent::bounding(inliers.iter().map(|m| m.a_pos)) else {
            return inliers;
        };
        sieve(inliers, &self.config.sieve2, &extent, |m| m.a_pos, |m| first.keypoints[m.a].score)
    }
}

impl PipelineStage for MatchStage<'_> {
    type Input = MatchTask;
    type Output = PairOutcome;

    fn execute(&self, task: MatchTask) -> Result<PairOutcome> {
        let span = PairSpan::new(task.i1, task.i2, self.correlation_id);
        let _guard = span.enter();

        let first = &self.records[task.i1];
        let second = &self.records[task.i2];
        let Some(forest) = second.forest.as_ref() else {
            span.record_skip("no keypoints");
            return Ok(PairOutcome::empty(task, PairStatus::NoKeypoints));
        };
        if first.keypoints.is_empty() {
            span.record_skip("no keypoints");
            return Ok(PairOutcome::empty(task, PairStatus::NoKeypoints));
        }

        let candidates = match_keypoints(&first.keypoints, &second.keypoints, forest, &self.config.kdtree);
        span.record_matching(first.keypoints.len(), candidates.len());

        let context = PairContext {
            lens1: &first.lens,
            lens2: &second.lens,
            remapped: first.needs_remap || second.needs_remap,
            config: &self.config.ransac,
            optimizer: self.optimizer,
        };
        let mut rng = task_rng(self.config.seed, task.i1, task.i2);
        let verified = match verify_pair(&candidates, &context, &mut rng) {
            Ok(verified) => verified,
            Err(rejection) => {
                let reason = rejection.to_string();
                span.record_skip(&reason);
                return Ok(PairOutcome {
                    candidates: candidates.len(),
                    ..PairOutcome::empty(task, PairStatus::Rejected(reason))
                });
            }
        };
        span.record_ransac(verified.strategy, candidates.len(), verified.inliers.len());

        let inliers = verified.inliers.len();
        let kept = self.sieve_matches(verified.inliers, first);
        let control_points: Vec<ControlPoint> = kept
            .iter()
            .map(|m| ControlPoint {
                image1: task.i1,
                x1: m.a_pos.0,
                y1: m.a_pos.1,
                image2: task.i2,
                x2: m.b_pos.0,
                y2: m.b_pos.1,
            })
            .collect();
        span.record_result(control_points.len());

        Ok(PairOutcome {
            task,
            candidates: candidates.len(),
            inliers,
            control_points,
            status: PairStatus::Matched,
        })
    }

    fn stage_name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Projection;
    use crate::project::ImageEntry;
    use std::path::PathBuf;

    fn record(width: u32, height: u32, projection: Projection, hfov: f64, downscale: bool) -> ImageRecord {
        let entry = ImageEntry {
            filename: PathBuf::from("/nonexistent/img.jpg"),
            width,
            height,
            projection,
            hfov,
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            translation: [0.0; 3],
            exposure: 0.0,
            b: 0.0,
            stack: None,
            crop: None,
            yaw_link: None,
            masks: Vec::new(),
        };
        ImageRecord::new(0, &entry, downscale, None)
    }

    #[test]
    fn test_downscaled_keypoints_double() {
        let rec = record(200, 100, Projection::Rectilinear, 50.0, true);
        let kps = remap_back(vec![Keypoint::new(10.25, 20.5, 1.5, 1.0), Keypoint::new(99.9, 60.0, 1.0, 1.0)], &rec, true);
        assert_eq!(kps.len(), 1);
        assert_eq!((kps[0].x, kps[0].y, kps[0].scale), (20.5, 41.0, 3.0));
    }

    #[test]
    fn test_remapped_keypoints_land_in_source() {
        let rec = record(800, 600, Projection::FullFrameFisheye, 160.0, true);
        let canvas = rec.canvas.clone().unwrap();
        let mut kps = Vec::new();
        for gy in 0..20 {
            for gx in 0..20 {
                let x = (gx as f64 + 0.5) / 20.0 * canvas.roi.width as f64;
                let y = (gy as f64 + 0.5) / 20.0 * canvas.roi.height as f64;
                kps.push(Keypoint::new(x, y, 2.0, 1.0));
            }
        }
        let mapped = remap_back(kps.clone(), &rec, true);
        assert!(!mapped.is_empty());
        for kp in &mapped {
            assert!(rec.lens.contains(kp.x, kp.y));
        }
        // the canvas is never halved, so the downscale flag must not touch it
        assert_eq!(mapped, remap_back(kps, &rec, false));
    }

    #[test]
    fn test_remapped_scale_follows_canvas_magnification() {
        let rec = record(800, 600, Projection::FullFrameFisheye, 160.0, true);
        let canvas = rec.canvas.clone().unwrap();
        let (cx, cy) = (canvas.roi.width as f64 / 2.0, canvas.roi.height as f64 / 2.0);
        let mapped = remap_back(vec![Keypoint::new(cx, cy, 2.0, 1.0)], &rec, true);
        assert_eq!(mapped.len(), 1);

        let (x, y) = canvas.roi_to_source(&rec.lens, cx, cy).unwrap();
        let (sx, sy) = canvas.roi_to_source(&rec.lens, cx + 2.0, cy).unwrap();
        assert!((mapped[0].scale - (sx - x).hypot(sy - y)).abs() < 1e-9);
    }

    #[test]
    fn test_task_rng_differs_per_pair() {
        use rand::Rng;
        let a: u64 = task_rng(1, 0, 1).gen();
        let b: u64 = task_rng(1, 1, 2).gen();
        let c: u64 = task_rng(1, 0, 1).gen();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }
}
