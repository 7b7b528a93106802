//! Logging configuration
//!
//! Per-component log levels and output destinations for the detector.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output
    pub console_output: bool,

    /// Directory for JSON log files (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Level for per-image analysis
    pub image_level: String,

    /// Level for pair matching and verification
    pub matching_level: String,

    /// Level for planning and scheduling
    pub pipeline_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "info".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            image_level: "info".to_string(),
            matching_level: "info".to_string(),
            pipeline_level: "info".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Map the `-v` counter of the command line onto a configuration.
    pub fn from_verbosity(verbose: u8, quiet: bool) -> Self {
        let level = if quiet {
            "error"
        } else {
            match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            }
        };
        Self {
            global_level: level.to_string(),
            image_level: level.to_string(),
            matching_level: level.to_string(),
            pipeline_level: level.to_string(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("image_level", &self.image_level),
            ("matching_level", &self.matching_level),
            ("pipeline_level", &self.pipeline_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    pub fn get_component_level(&self, component: &str) -> &str {
        match component {
            "data" | "algorithms" | "image" => &self.image_level,
            "matching" | "verify" | "optimizer" => &self.matching_level,
            "pipeline" | "planner" => &self.pipeline_level,
            _ => &self.global_level,
        }
    }

    /// Filter directive string for `tracing_subscriber::EnvFilter`.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        let mut directives = vec![format!("{}={}", krate, self.global_level)];
        for module in ["data", "algorithms", "verify", "optimizer", "planner", "pipeline"] {
            directives.push(format!(
                "{}::{}={}",
                krate,
                module,
                self.get_component_level(module)
            ));
        }
        directives.join(",")
    }
}
