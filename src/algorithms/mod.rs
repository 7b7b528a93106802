// Keypoint detection, description, declustering and matching
pub mod descriptor;
pub mod hessian;
pub mod homography;
pub mod kdtree;
pub mod keypoint;
pub mod matcher;
pub mod sieve;

pub use descriptor::{HaarDescriptor, KeypointDescriptor};
pub use hessian::{HessianDetector, KeypointDetector};
pub use kdtree::{KdForest, Neighbor};
pub use keypoint::{ControlPoint, Keypoint};
pub use matcher::{match_keypoints, CandidateMatch};
pub use sieve::{sieve, Extent};
