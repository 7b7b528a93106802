use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Horizontal field of view (degrees) below which a lens counts as narrow.
pub const NARROW_HFOV: f64 = 65.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Halve the image size before detection
    pub downscale: bool,
    /// Worker threads; `None` picks the number of cores
    pub cores: Option<usize>,
    /// Seed of the per-run random source used by RANSAC
    pub seed: u64,
    pub sieve1: SieveConfig,
    pub sieve2: SieveConfig,
    pub kdtree: KdTreeConfig,
    pub ransac: RansacConfig,
    pub matching: MatchingConfig,
    pub celeste: CelesteConfig,
    pub cache: CacheConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SieveConfig {
    pub width: usize,
    pub height: usize,
    pub size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdTreeConfig {
    /// Leaf checks allowed per query
    pub search_steps: usize,
    /// Randomized trees built per image
    pub trees: usize,
    /// Accept a match only if best <= ratio * second best
    pub second_dist_ratio: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RansacMode {
    #[default]
    Auto,
    #[serde(alias = "homography")]
    Hom,
    Rpy,
    Rpyv,
    Rpyvb,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacConfig {
    pub mode: RansacMode,
    pub iterations: usize,
    /// Inlier distance in pixels
    pub distance: f64,
    pub min_matches: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchingStrategy {
    #[default]
    AllPairs,
    Linear,
    MultiRow,
    Prealigned,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub strategy: MatchingStrategy,
    /// Window length for the linear strategy
    pub linear_window: usize,
    /// Two image test mode
    pub test: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CelesteConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub radius: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CacheConfig {
    /// Write key files after analysis and read them on the next run
    pub enabled: bool,
    /// Directory for key files; next to the images when unset
    pub keypath: Option<PathBuf>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            downscale: true,
            cores: None,
            seed: 0x5eed,
            sieve1: SieveConfig {
                width: 10,
                height: 10,
                size: 100,
            },
            sieve2: SieveConfig {
                width: 5,
                height: 5,
                size: 1,
            },
            kdtree: KdTreeConfig::default(),
            ransac: RansacConfig::default(),
            matching: MatchingConfig::default(),
            celeste: CelesteConfig::default(),
            cache: CacheConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SieveConfig {
    fn default() -> Self {
        Self {
            width: 10,
            height: 10,
            size: 100,
        }
    }
}

impl Default for KdTreeConfig {
    fn default() -> Self {
        Self {
            search_steps: 200,
            trees: 4,
            second_dist_ratio: 0.25,
        }
    }
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            mode: RansacMode::Auto,
            iterations: 1000,
            distance: 50.0,
            min_matches: 6,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            strategy: MatchingStrategy::AllPairs,
            linear_window: 1,
            test: false,
        }
    }
}

impl Default for CelesteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 0.5,
            radius: 20,
        }
    }
}

impl DetectorConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path)?;

        if content.trim_start().starts_with('{') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(toml::from_str(&content)?)
        }
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P, format: ConfigFormat) -> crate::Result<()> {
        let content = match format {
            ConfigFormat::Json => serde_json::to_string_pretty(self)?,
            ConfigFormat::Toml => toml::to_string_pretty(self)?,
        };

        fs::write(path, content)?;
        Ok(())
    }

    /// Worker count, honouring an explicit setting.
    pub fn effective_cores(&self) -> usize {
        self.cores.unwrap_or_else(num_cpus::get).max(1)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        for (name, sieve) in [("sieve1", &self.sieve1), ("sieve2", &self.sieve2)] {
            if sieve.width == 0 || sieve.height == 0 {
                errors.push(format!("{} grid must be at least 1x1", name));
            }
            if sieve.size == 0 {
                errors.push(format!("{} bucket size must be positive", name));
            }
        }

        if self.kdtree.search_steps == 0 {
            errors.push("kd-tree search steps must be positive".to_string());
        }
        if self.kdtree.trees == 0 {
            errors.push("kd-tree count must be positive".to_string());
        }
        if !(self.kdtree.second_dist_ratio > 0.0 && self.kdtree.second_dist_ratio <= 1.0) {
            errors.push("second distance ratio must be in (0, 1]".to_string());
        }

        if self.ransac.iterations == 0 {
            errors.push("RANSAC iterations must be positive".to_string());
        }
        if self.ransac.distance <= 0.0 {
            errors.push("RANSAC distance must be positive".to_string());
        }

        if self.matching.strategy == MatchingStrategy::Linear && self.matching.linear_window < 1 {
            errors.push("linear match length must be at least 1".to_string());
        }
        if self.matching.test && self.matching.strategy != MatchingStrategy::AllPairs {
            errors.push("test mode only works with the all-pairs strategy".to_string());
        }

        if self.cores == Some(0) {
            errors.push("number of cores must be positive".to_string());
        }

        if self.celeste.enabled {
            if !(0.0..=1.0).contains(&self.celeste.threshold) {
                errors.push("celeste threshold must be within [0, 1]".to_string());
            }
            if self.celeste.radius < 2 {
                errors.push("celeste radius must be at least 2".to_string());
            }
        }

        if let Err(e) = self.logging.validate() {
            errors.push(e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Checks that need the project, run before anything is scheduled.
    pub fn validate_for_project(&self, image_count: usize) -> Result<(), Vec<String>> {
        let mut errors = self.validate().err().unwrap_or_default();

        if self.matching.test && image_count != 2 {
            errors.push(format!(
                "test mode needs exactly 2 images, project has {}",
                image_count
            ));
        }
        if image_count < 2 {
            errors.push("project needs at least 2 images".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}
