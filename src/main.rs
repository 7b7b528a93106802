use anyhow::Context;
use clap::Parser;
use cpfind::config::{ConfigFormat, DetectorConfig, MatchingStrategy, RansacMode};
use cpfind::logging::{init_logging, LoggingConfig};
use cpfind::{DetectError, PanoDetectorBuilder, Project};
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "cpfind")]
#[command(about = "Automatic control point detection for panorama projects")]
#[command(version)]
struct Cli {
    /// Input project file
    #[arg(required_unless_present = "dump_config")]
    input: Option<PathBuf>,

    /// Output project file
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors
    #[arg(short, long)]
    quiet: bool,

    /// Configuration file (TOML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to this file
    #[arg(long)]
    dump_config: Option<PathBuf>,

    /// Generate the key file of this image only (repeatable)
    #[arg(short = 'k', long = "writekeyfile", value_name = "IMAGE")]
    keyfiles: Vec<usize>,

    /// Generate key files of all images
    #[arg(long, conflicts_with = "keyfiles")]
    kall: bool,

    /// Delete the key files of all images and exit
    #[arg(long, conflicts_with_all = ["keyfiles", "kall"])]
    clean: bool,

    /// Read key files when present and write missing ones
    #[arg(long)]
    cache: bool,

    /// Directory for key files
    #[arg(long)]
    keypath: Option<PathBuf>,

    /// Match exactly two images, for tuning parameters
    #[arg(long)]
    test: bool,

    /// Multi-row matching strategy
    #[arg(long, conflicts_with_all = ["linearmatch", "prealigned"])]
    multirow: bool,

    /// Match only consecutive images
    #[arg(long, conflicts_with = "prealigned")]
    linearmatch: bool,

    /// Number of following images matched with --linearmatch
    #[arg(long, value_name = "N")]
    linearmatchlen: Option<usize>,

    /// Match overlapping pairs of an already aligned project
    #[arg(long)]
    prealigned: bool,

    /// RANSAC model: auto, hom, rpy, rpyv or rpyvb
    #[arg(long, value_parser = parse_ransac_mode)]
    ransacmode: Option<RansacMode>,

    #[arg(long)]
    ransaciter: Option<usize>,

    /// RANSAC inlier distance in pixels
    #[arg(long)]
    ransacdist: Option<f64>,

    /// Fewest matches a pair must keep
    #[arg(long)]
    minmatches: Option<usize>,

    #[arg(long)]
    sieve1width: Option<usize>,

    #[arg(long)]
    sieve1height: Option<usize>,

    #[arg(long)]
    sieve1size: Option<usize>,

    #[arg(long)]
    sieve2width: Option<usize>,

    #[arg(long)]
    sieve2height: Option<usize>,

    #[arg(long)]
    sieve2size: Option<usize>,

    #[arg(long)]
    kdtreesteps: Option<usize>,

    #[arg(long)]
    kdtreeseconddist: Option<f32>,

    /// Detect on full resolution images
    #[arg(long)]
    fullscale: bool,

    /// Mask sky and clouds before detection
    #[arg(long)]
    celeste: bool,

    #[arg(long)]
    celestethreshold: Option<f64>,

    #[arg(long)]
    celesteradius: Option<u32>,

    /// Worker threads
    #[arg(short = 'n', long)]
    threads: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,
}

fn parse_ransac_mode(value: &str) -> Result<RansacMode, String> {
    match value.to_ascii_lowercase().as_str() {
        "auto" => Ok(RansacMode::Auto),
        "hom" | "homography" => Ok(RansacMode::Hom),
        "rpy" => Ok(RansacMode::Rpy),
        "rpyv" => Ok(RansacMode::Rpyv),
        "rpyvb" => Ok(RansacMode::Rpyvb),
        other => Err(format!("unknown RANSAC mode '{}'", other)),
    }
}

impl Cli {
    fn build_config(&self) -> anyhow::Result<DetectorConfig> {
        let mut config = match &self.config {
            Some(path) => DetectorConfig::load_from_file(path)
                .with_context(|| format!("reading configuration {}", path.display()))?,
            None => DetectorConfig::default(),
        };

        if self.verbose > 0 || self.quiet {
            config.logging = LoggingConfig {
                log_directory: config.logging.log_directory.clone(),
                ..LoggingConfig::from_verbosity(self.verbose, self.quiet)
            };
        }

        if self.fullscale {
            config.downscale = false;
        }
        if self.cache {
            config.cache.enabled = true;
        }
        if let Some(keypath) = &self.keypath {
            config.cache.keypath = Some(keypath.clone());
        }
        if self.test {
            config.matching.test = true;
        }

        if self.multirow {
            config.matching.strategy = MatchingStrategy::MultiRow;
        } else if self.prealigned {
            config.matching.strategy = MatchingStrategy::Prealigned;
        } else if self.linearmatch || self.linearmatchlen.is_some() {
            config.matching.strategy = MatchingStrategy::Linear;
        }
        if let Some(len) = self.linearmatchlen {
            config.matching.linear_window = len;
        }

        if let Some(mode) = self.ransacmode {
            config.ransac.mode = mode;
        }
        if let Some(iterations) = self.ransaciter {
            config.ransac.iterations = iterations;
        }
        if let Some(distance) = self.ransacdist {
            config.ransac.distance = distance;
        }
        if let Some(min) = self.minmatches {
            config.ransac.min_matches = min;
        }

        let sieves = [
            (&mut config.sieve1, self.sieve1width, self.sieve1height, self.sieve1size),
            (&mut config.sieve2, self.sieve2width, self.sieve2height, self.sieve2size),
        ];
        for (sieve, width, height, size) in sieves {
            sieve.width = width.unwrap_or(sieve.width);
            sieve.height = height.unwrap_or(sieve.height);
            sieve.size = size.unwrap_or(sieve.size);
        }

        if let Some(steps) = self.kdtreesteps {
            config.kdtree.search_steps = steps;
        }
        if let Some(ratio) = self.kdtreeseconddist {
            config.kdtree.second_dist_ratio = ratio;
        }

        if self.celeste {
            config.celeste.enabled = true;
        }
        if let Some(threshold) = self.celestethreshold {
            config.celeste.threshold = threshold;
        }
        if let Some(radius) = self.celesteradius {
            config.celeste.radius = radius;
        }

        if let Some(threads) = self.threads {
            config.cores = Some(threads);
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.build_config()?;

    let _guard = init_logging(&config.logging)?;

    if let Some(path) = &cli.dump_config {
        config.save_to_file(path, ConfigFormat::from_path(path))?;
        info!(file = %path.display(), "Configuration written");
    }
    let Some(input) = cli.input.as_deref() else {
        return Ok(());
    };

    let mut project = Project::load(input)?;
    info!(file = %input.display(), images = project.images.len(), "Project loaded");
    let detector = PanoDetectorBuilder::new(config).build();

    if cli.clean {
        let removed = detector.clean_keyfiles(&project);
        println!("Removed {} key files", removed);
        return Ok(());
    }

    if cli.kall || !cli.keyfiles.is_empty() {
        if cli.output.is_some() {
            warn!("Only key files are written, the output project is ignored");
        }
        let indices: Vec<usize> = if cli.kall {
            (0..project.images.len()).collect()
        } else {
            cli.keyfiles.clone()
        };
        let summary = detector.write_keyfiles(&project, &indices)?;
        detector.metrics().log_summary();
        println!("Wrote {} key files", summary.keyfiles_written);
        return Ok(());
    }

    let Some(output) = cli.output.as_deref() else {
        return Err(DetectError::Config(vec!["no output project given (-o)".to_string()]).into());
    };

    let summary = detector.detect(&mut project)?;
    project.save(output)?;
    detector.metrics().log_summary();

    println!(
        "Found {} control points in {} of {} tested pairs, written to {}",
        summary.control_points_added,
        summary.pairs_matched,
        summary.pairs_matched + summary.pairs_rejected,
        output.display()
    );

    Ok(())
}
