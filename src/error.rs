use std::path::PathBuf;
use thiserror::Error;

/// Failures the detector distinguishes between. Insufficient matches and
/// RANSAC rejections are not errors; they only show up in pair outcomes.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("image {index} ({}) failed to load: {reason}", path.display())]
    ImageLoad {
        index: usize,
        path: PathBuf,
        reason: String,
    },

    #[error("{} image(s) failed to load: {:?}", .0.len(), .0)]
    LoadFailures(Vec<usize>),

    #[error("invalid configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    #[error("cannot access {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("project line {line}: {reason}")]
    Project { line: usize, reason: String },

    #[error("key file {}: {reason}", path.display())]
    Keyfile { path: PathBuf, reason: String },
}

impl DetectError {
    pub fn keyfile(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Keyfile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn project(line: usize, reason: impl Into<String>) -> Self {
        Self::Project {
            line,
            reason: reason.into(),
        }
    }
}
