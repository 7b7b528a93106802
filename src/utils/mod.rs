pub mod ransac;

pub use ransac::{ransac, RansacEstimator, RansacResult};
