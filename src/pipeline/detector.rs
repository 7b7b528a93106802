//! Run flow of one control point detection.
//!
//! Analysis of every scheduled image finishes before any pair is matched; a
//! single image that fails to load fails the whole run at that barrier. The
//! multi-row strategy adds two more barriers between its matching phases.

use super::scheduler::{memory_capped_cores, total_memory, Scheduler};
use super::stage::{AnalyseStage, MatchStage};
use super::types::{ImageRecord, PairStatus, RunSummary};
use crate::algorithms::{ControlPoint, KeypointDescriptor, KeypointDetector};
use crate::config::{DetectorConfig, MatchingStrategy};
use crate::data::{ImageSource, SkyClassifier, SkyMasking};
use crate::error::DetectError;
use crate::logging::{new_correlation_id, StageMetrics};
use crate::optimizer::{PanoImage, SharedOptimizer, SubPanorama};
use crate::planner::{overlap_tasks, sequential_tasks, CheckedPairs, MatchTask, StackLayout};
use crate::project::{keyfile_path, write_keyfile, Project};
use crate::Result;
use std::collections::BTreeSet;
use std::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Automatic control point detector. Build one with
/// [`PanoDetectorBuilder`](super::PanoDetectorBuilder).
pub struct PanoDetector {
    pub(super) config: DetectorConfig,
    pub(super) detector: Box<dyn KeypointDetector>,
    pub(super) descriptor: Box<dyn KeypointDescriptor>,
    pub(super) source: Box<dyn ImageSource>,
    pub(super) sky: Box<dyn SkyClassifier>,
    pub(super) optimizer: SharedOptimizer,
    pub(super) metrics: StageMetrics,
}

impl PanoDetector {
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Find control points for `project` and merge them into it.
    ///
    /// Existing duplicate control points are removed first. Nothing is
    /// written to disk apart from key files when caching is enabled.
    pub fn detect(&self, project: &mut Project) -> Result<RunSummary> {
        self.config
            .validate_for_project(project.images.len())
            .map_err(DetectError::Config)?;
        let correlation_id = new_correlation_id();
        info!(
            %correlation_id,
            images = project.images.len(),
            strategy = ?self.config.matching.strategy,
            "Starting control point detection"
        );

        let mut summary = RunSummary {
            duplicates_removed: project.dedupe_control_points(),
            ..Default::default()
        };

        let mut records = self.records(project);
        let layout = (self.config.matching.strategy == MatchingStrategy::MultiRow)
            .then(|| StackLayout::build(&project.images));
        let analysed: BTreeSet<usize> = match &layout {
            Some(layout) => layout.analysis_set(),
            None => (0..records.len()).collect(),
        };

        let scheduler = self.scheduler(&records, &analysed, correlation_id)?;
        self.analyse(&scheduler, &mut records, &analysed, correlation_id)?;
        summary.images_analysed = analysed.len();
        summary.keyfiles_loaded = analysed.iter().filter(|&&i| records[i].has_keyfile).count();
        if self.config.cache.enabled {
            summary.keyfiles_written = self.persist_keyfiles(&records, &analysed);
        }

        let found = self.plan_and_match(&scheduler, &records, project, layout.as_ref(), correlation_id, &mut summary);
        drop(records);

        summary.control_points_added = project.merge_control_points(&found);
        info!(
            %correlation_id,
            pairs_matched = summary.pairs_matched,
            pairs_rejected = summary.pairs_rejected,
            control_points = summary.control_points_added,
            "Control point detection finished"
        );
        Ok(summary)
    }

    /// Analyse only the images at `indices` and write their key files.
    /// Existing key files of those images are replaced.
    pub fn write_keyfiles(&self, project: &Project, indices: &[usize]) -> Result<RunSummary> {
        let count = project.images.len();
        let mut errors = self.config.validate().err().unwrap_or_default();
        errors.extend(
            indices
                .iter()
                .filter(|&&i| i >= count)
                .map(|i| format!("key file index {} is outside the project ({} images)", i, count)),
        );
        if !errors.is_empty() {
            return Err(DetectError::Config(errors).into());
        }

        let correlation_id = new_correlation_id();
        let subset: BTreeSet<usize> = indices.iter().copied().collect();
        let mut records = self.records(project);
        for &i in &subset {
            records[i].has_keyfile = false;
        }

        let scheduler = self.scheduler(&records, &subset, correlation_id)?;
        self.analyse(&scheduler, &mut records, &subset, correlation_id)?;
        Ok(RunSummary {
            images_analysed: subset.len(),
            keyfiles_written: self.persist_keyfiles(&records, &subset),
            ..Default::default()
        })
    }

    /// Delete the key files of every project image, and the key directory
    /// when it is left empty. Returns how many files were removed.
    pub fn clean_keyfiles(&self, project: &Project) -> usize {
        let keypath = self.config.cache.keypath.as_deref();
        let mut removed = 0;
        for entry in &project.images {
            let path = keyfile_path(&entry.filename, keypath);
            if !path.exists() {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => removed += 1,
                Err(e) => warn!(keyfile = %path.display(), error = %e, "Cannot remove key file"),
            }
        }

        if let Some(dir) = keypath {
            let empty = fs::read_dir(dir).map(|mut d| d.next().is_none()).unwrap_or(false);
            if empty {
                if let Err(e) = fs::remove_dir(dir) {
                    warn!(keypath = %dir.display(), error = %e, "Cannot remove key directory");
                }
            }
        }
        info!(removed, "Key files cleaned");
        removed
    }

    fn records(&self, project: &Project) -> Vec<ImageRecord> {
        let keypath = self.config.cache.keypath.as_deref();
        project
            .images
            .iter()
            .enumerate()
            .map(|(i, entry)| ImageRecord::new(i, entry, self.config.downscale, keypath))
            .collect()
    }

    fn scheduler(&self, records: &[ImageRecord], analysed: &BTreeSet<usize>, correlation_id: Uuid) -> Result<Scheduler> {
        let threads = match self.config.cores {
            Some(cores) => cores,
            None => {
                let detecting = analysed.iter().map(|&i| &records[i]).filter(|r| !r.has_keyfile);
                let (max_area, with_remap) = detecting.fold((0u64, false), |(area, remap), r| {
                    (area.max(r.detect_area()), remap || r.needs_remap)
                });
                memory_capped_cores(num_cpus::get(), max_area, with_remap, total_memory())
            }
        };
        Scheduler::new(threads, self.metrics.clone(), Some(correlation_id))
    }

    fn sky_masking(&self) -> Option<SkyMasking<'_>> {
        let celeste = &self.config.celeste;
        celeste.enabled.then(|| SkyMasking {
            classifier: self.sky.as_ref(),
            radius: celeste.radius,
            threshold: celeste.threshold,
        })
    }

    fn analyse(
        &self,
        scheduler: &Scheduler,
        records: &mut [ImageRecord],
        subset: &BTreeSet<usize>,
        correlation_id: Uuid,
    ) -> Result<()> {
        info!(images = subset.len(), threads = scheduler.threads(), "Analysing images");
        let stage = AnalyseStage::new(
            &self.config,
            self.detector.as_ref(),
            self.descriptor.as_ref(),
            self.source.as_ref(),
            self.sky_masking(),
            Some(correlation_id),
        );
        let inputs: Vec<&mut ImageRecord> = records.iter_mut().filter(|r| subset.contains(&r.index)).collect();
        scheduler.run_batch(&stage, inputs);

        let failed: Vec<usize> = records.iter().filter(|r| r.load_fail).map(|r| r.index).collect();
        if !failed.is_empty() {
            return Err(DetectError::LoadFailures(failed).into());
        }
        Ok(())
    }

    /// Write key files of freshly detected images. Failures are reported and
    /// skipped.
    fn persist_keyfiles(&self, records: &[ImageRecord], subset: &BTreeSet<usize>) -> usize {
        if let Some(dir) = &self.config.cache.keypath {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(keypath = %dir.display(), error = %e, "Cannot create key directory");
            }
        }

        let mut written = 0;
        for record in subset.iter().map(|&i| &records[i]).filter(|r| !r.has_keyfile) {
            let result = write_keyfile(
                &record.keyfile,
                &record.keypoints,
                record.dims,
                &record.file_name(),
                record.lens.width,
                record.lens.height,
            );
            match result {
                Ok(()) => written += 1,
                Err(e) => warn!(image = record.index, error = %e, "Key file not written"),
            }
        }
        written
    }

    fn plan_and_match(
        &self,
        scheduler: &Scheduler,
        records: &[ImageRecord],
        project: &Project,
        layout: Option<&StackLayout>,
        correlation_id: Uuid,
        summary: &mut RunSummary,
    ) -> Vec<ControlPoint> {
        let all: Vec<usize> = (0..records.len()).collect();
        let mut run = |tasks: Vec<MatchTask>, name: &'static str| {
            self.run_matches(scheduler, records, tasks, name, correlation_id, summary)
        };

        match (self.config.matching.strategy, layout) {
            (MatchingStrategy::MultiRow, Some(layout)) => {
                let mut checked = CheckedPairs::new();
                let mut tasks = layout.stack_tasks(&mut checked);
                tasks.extend(layout.layer_chain(&mut checked));
                let mut found = run(tasks, "match-stacks");

                let known = |found: &[ControlPoint]| -> Vec<ControlPoint> {
                    project.control_points.iter().chain(found).copied().collect()
                };
                let bridges = layout.bridge_tasks(&known(&found), &mut checked);
                if !bridges.is_empty() {
                    info!(tasks = bridges.len(), "Connecting separate layer groups");
                }
                found.extend(run(bridges, "match-bridges"));

                let overlap = layout.final_tasks(&project.images, &known(&found), &self.optimizer, &mut checked);
                found.extend(run(overlap, "match-overlap"));
                found
            }
            (MatchingStrategy::Prealigned, _) => {
                let mut checked = CheckedPairs::from_control_points(&project.control_points);
                let pano = SubPanorama {
                    images: project
                        .images
                        .iter()
                        .map(|e| PanoImage {
                            lens: e.lens(),
                            orientation: e.orientation(),
                        })
                        .collect(),
                    control_points: Vec::new(),
                };
                run(overlap_tasks(&pano, &all, 1.0, &mut checked), "match")
            }
            (MatchingStrategy::Linear, _) => {
                let window = Some(self.config.matching.linear_window);
                run(sequential_tasks(&all, window, &mut CheckedPairs::new()), "match")
            }
            _ => run(sequential_tasks(&all, None, &mut CheckedPairs::new()), "match"),
        }
    }

    fn run_matches(
        &self,
        scheduler: &Scheduler,
        records: &[ImageRecord],
        tasks: Vec<MatchTask>,
        name: &'static str,
        correlation_id: Uuid,
        summary: &mut RunSummary,
    ) -> Vec<ControlPoint> {
        if tasks.is_empty() {
            return Vec::new();
        }
        let stage = MatchStage {
            records,
            config: &self.config,
            optimizer: &self.optimizer,
            correlation_id: Some(correlation_id),
            name,
        };

        let mut found = Vec::new();
        for result in scheduler.run_batch(&stage, tasks) {
            match result {
                Ok(outcome) => match outcome.status {
                    PairStatus::Matched => {
                        summary.pairs_matched += 1;
                        found.extend(outcome.control_points);
                    }
                    PairStatus::NoKeypoints => {}
                    PairStatus::Rejected(_) => summary.pairs_rejected += 1,
                },
                Err(_) => summary.pairs_rejected += 1,
            }
        }
        found
    }
}
