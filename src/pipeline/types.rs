use crate::algorithms::{ControlPoint, KdForest, Keypoint};
use crate::config::NARROW_HFOV;
use crate::data::{DetectionGeometry, MaskSpec};
use crate::geometry::{Lens, Projection, StereographicCanvas};
use crate::planner::MatchTask;
use crate::project::{keyfile_path, ImageEntry};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-image state carried through analysis and matching.
///
/// Created from the project before analysis; the analysis stage fills in
/// keypoints and the search index, after which the record is only read.
#[derive(Debug)]
pub struct ImageRecord {
    pub index: usize,
    pub path: PathBuf,
    pub lens: Lens,
    pub mask: MaskSpec,
    /// Detection runs on a stereographic remap of the image
    pub needs_remap: bool,
    pub canvas: Option<StereographicCanvas>,
    pub detect_width: u32,
    pub detect_height: u32,
    pub keyfile: PathBuf,
    /// Keypoints were (or will be) read from `keyfile`
    pub has_keyfile: bool,
    pub keypoints: Vec<Keypoint>,
    /// Descriptor length
    pub dims: usize,
    pub forest: Option<KdForest>,
    pub load_fail: bool,
}

/// Wide lenses are remapped, unless they are already stereographic.
pub fn needs_remap(lens: &Lens) -> bool {
    lens.hfov >= NARROW_HFOV && lens.projection != Projection::Stereographic
}

impl ImageRecord {
    pub fn new(index: usize, entry: &ImageEntry, downscale: bool, keypath: Option<&Path>) -> Self {
        let lens = entry.lens();
        let mut remap = needs_remap(&lens);
        let (mut width, mut height) = if remap {
            let side = lens.width.max(lens.height);
            (side, side)
        } else {
            (lens.width, lens.height)
        };
        if downscale {
            width >>= 1;
            height >>= 1;
        }

        let mut canvas = None;
        if remap {
            match StereographicCanvas::fit(&lens, width, height) {
                Some(fitted) => {
                    width = fitted.roi.width;
                    height = fitted.roi.height;
                    canvas = Some(fitted);
                }
                None => {
                    tracing::warn!(image = index, "Lens cannot be remapped, detecting on the source image");
                    remap = false;
                    width = if downscale { lens.width >> 1 } else { lens.width };
                    height = if downscale { lens.height >> 1 } else { lens.height };
                }
            }
        }

        let keyfile = keyfile_path(&entry.filename, keypath);
        Self {
            index,
            path: entry.filename.clone(),
            lens,
            mask: entry.mask_spec(),
            needs_remap: remap,
            canvas,
            detect_width: width,
            detect_height: height,
            has_keyfile: keyfile.exists(),
            keyfile,
            keypoints: Vec::new(),
            dims: 0,
            forest: None,
            load_fail: false,
        }
    }

    pub fn detection_geometry(&self, downscale: bool) -> DetectionGeometry {
        DetectionGeometry {
            lens: self.lens,
            mask: self.mask.clone(),
            canvas: self.canvas.clone(),
            downscale,
        }
    }

    pub fn detect_area(&self) -> u64 {
        self.detect_width as u64 * self.detect_height as u64
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Why a pair produced no control points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PairStatus {
    Matched,
    /// One of the images has no keypoints or no index
    NoKeypoints,
    Rejected(String),
}

/// Result of matching one pair.
#[derive(Debug, Clone)]
pub struct PairOutcome {
    pub task: MatchTask,
    pub candidates: usize,
    pub inliers: usize,
    pub control_points: Vec<ControlPoint>,
    pub status: PairStatus,
}

impl PairOutcome {
    pub fn empty(task: MatchTask, status: PairStatus) -> Self {
        Self {
            task,
            candidates: 0,
            inliers: 0,
            control_points: Vec::new(),
            status,
        }
    }
}

/// Numbers reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub images_analysed: usize,
    pub keyfiles_loaded: usize,
    pub keyfiles_written: usize,
    pub pairs_matched: usize,
    pub pairs_rejected: usize,
    pub control_points_added: usize,
    pub duplicates_removed: usize,
}
