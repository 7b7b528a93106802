//! Stage timing collection
//!
//! Each scheduler batch reports its wall-clock time and task counts here; the
//! binary prints a summary at the end of a run.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

/// One finished scheduler batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    pub stage: String,
    pub tasks: usize,
    pub failed: usize,
    pub duration_ms: f64,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Aggregate over all batches with the same stage name
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageStats {
    pub stage: String,
    pub batches: usize,
    pub tasks: usize,
    pub failed: usize,
    pub total_ms: f64,
    pub max_ms: f64,
}

/// Thread-safe timing collector, cheap to clone
#[derive(Debug, Clone, Default)]
pub struct StageMetrics {
    timings: Arc<Mutex<Vec<StageTiming>>>,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &self,
        stage: &str,
        tasks: usize,
        failed: usize,
        duration: Duration,
        correlation_id: Option<Uuid>,
    ) {
        let timing = StageTiming {
            stage: stage.to_string(),
            tasks,
            failed,
            duration_ms: duration.as_secs_f64() * 1000.0,
            finished_at: chrono::Utc::now(),
            correlation_id,
        };

        if let Ok(mut timings) = self.timings.lock() {
            timings.push(timing);
        }
    }

    pub fn timings(&self) -> Vec<StageTiming> {
        self.timings
            .lock()
            .map(|t| t.clone())
            .unwrap_or_default()
    }

    /// Per-stage totals in order of first appearance
    pub fn summary(&self) -> Vec<StageStats> {
        let mut stats: Vec<StageStats> = Vec::new();
        for timing in self.timings() {
            match stats.iter_mut().find(|s| s.stage == timing.stage) {
                Some(entry) => {
                    entry.batches += 1;
                    entry.tasks += timing.tasks;
                    entry.failed += timing.failed;
                    entry.total_ms += timing.duration_ms;
                    entry.max_ms = entry.max_ms.max(timing.duration_ms);
                }
                None => stats.push(StageStats {
                    stage: timing.stage.clone(),
                    batches: 1,
                    tasks: timing.tasks,
                    failed: timing.failed,
                    total_ms: timing.duration_ms,
                    max_ms: timing.duration_ms,
                }),
            }
        }
        stats
    }

    pub fn total_duration_ms(&self) -> f64 {
        self.timings().iter().map(|t| t.duration_ms).sum()
    }

    pub fn export_to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.summary())
    }

    /// Log the summary through `tracing`
    pub fn log_summary(&self) {
        for stats in self.summary() {
            tracing::info!(
                stage = %stats.stage,
                batches = stats.batches,
                tasks = stats.tasks,
                failed = stats.failed,
                total_ms = stats.total_ms,
                "Stage summary"
            );
        }
    }
}
