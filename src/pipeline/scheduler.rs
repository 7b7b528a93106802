//! Bounded worker pool executing stage batches.
//!
//! Each call to [`Scheduler::run_batch`] returns only when every task of the
//! batch has finished, which gives the barrier between analysis, matching
//! and the multi-row phases.

use super::PipelineStage;
use crate::logging::{StageMetrics, StageSpan};
use crate::Result;
use anyhow::Context;
use rayon::prelude::*;
use rayon::ThreadPool;
use std::fs;
use tracing::{info, warn};
use uuid::Uuid;

/// Bytes needed per detection pixel, per worker
const BYTES_PER_PIXEL: u64 = 50;
const BYTES_PER_PIXEL_REMAP: u64 = 75;

pub struct Scheduler {
    pool: ThreadPool,
    metrics: StageMetrics,
    correlation_id: Option<Uuid>,
}

impl Scheduler {
    pub fn new(threads: usize, metrics: StageMetrics, correlation_id: Option<Uuid>) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("cpfind-worker-{}", i))
            .build()
            .context("building worker pool")?;
        Ok(Self {
            pool,
            metrics,
            correlation_id,
        })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    pub fn metrics(&self) -> &StageMetrics {
        &self.metrics
    }

    /// Run `stage` over every input and wait for all of them. Results keep
    /// the order of `inputs`.
    pub fn run_batch<S: PipelineStage>(&self, stage: &S, inputs: Vec<S::Input>) -> Vec<Result<S::Output>> {
        let name = stage.stage_name().to_string();
        let span = StageSpan::new(&name, inputs.len(), self.correlation_id);
        let tasks = inputs.len();

        let results: Vec<Result<S::Output>> = {
            let _guard = span.enter();
            self.pool
                .install(|| inputs.into_par_iter().map(|input| stage.execute(input)).collect())
        };

        let failed = results.iter().filter(|r| r.is_err()).count();
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            warn!(stage = %name, error = %format!("{:#}", err), "Task failed");
        }
        let duration = span.record_completion(failed);
        self.metrics.record(&name, tasks, failed, duration, self.correlation_id);
        results
    }
}

/// Total physical memory in bytes, where the platform reports it.
pub fn total_memory() -> Option<u64> {
    let text = fs::read_to_string("/proc/meminfo").ok()?;
    let line = text.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kib: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kib * 1024)
}

/// Lower `cores` when `total_memory` cannot hold that many detection
/// buffers of `max_area` pixels at once. Never returns less than one.
pub fn memory_capped_cores(cores: usize, max_area: u64, with_remap: bool, total_memory: Option<u64>) -> usize {
    let (Some(total), true) = (total_memory, max_area > 0) else {
        return cores.max(1);
    };
    let per_worker = max_area * if with_remap { BYTES_PER_PIXEL_REMAP } else { BYTES_PER_PIXEL };
    let limit = (total / per_worker).max(1) as usize;
    if limit < cores {
        info!(requested = cores, limit, "Available memory limits the worker count");
        limit
    } else {
        cores.max(1)
    }
}
