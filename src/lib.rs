pub mod algorithms;
pub mod config;
pub mod data;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod optimizer;
pub mod pipeline;
pub mod planner;
pub mod project;
pub mod utils;
pub mod verify;

pub use algorithms::{ControlPoint, HaarDescriptor, HessianDetector, Keypoint, KeypointDescriptor, KeypointDetector};
pub use config::{DetectorConfig, MatchingStrategy, RansacMode};
pub use error::DetectError;
pub use pipeline::{PanoDetector, PanoDetectorBuilder, RunSummary};
pub use project::Project;

pub type Result<T> = anyhow::Result<T>;
