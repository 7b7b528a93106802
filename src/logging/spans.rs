//! Structured spans for hierarchical logging
//!
//! One span per analysed image, one per matched pair and one per scheduler
//! batch. Every span carries the run correlation id when one is set.

use std::time::Instant;
use tracing::{field, span, Level, Span};
use uuid::Uuid;

/// Span covering the analysis of one image
pub struct ImageSpan {
    span: Span,
    start_time: Instant,
}

impl ImageSpan {
    pub fn new(index: usize, file: &str, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "image",
            image = index,
            file = file,
            correlation_id = field::Empty,
            keypoints = field::Empty,
            retained = field::Empty,
            descriptors = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_detection(&self, keypoints: usize) {
        self.span.record("keypoints", keypoints);
        tracing::debug!(parent: &self.span, keypoints, "Keypoints detected");
    }

    pub fn record_sieve(&self, before: usize, after: usize) {
        self.span.record("retained", after);
        tracing::debug!(parent: &self.span, before, after, "Keypoints sieved");
    }

    pub fn record_descriptors(&self, descriptors: usize, dims: usize) {
        self.span.record("descriptors", descriptors);
        tracing::debug!(parent: &self.span, descriptors, dims, "Descriptors computed");
    }

    pub fn record_result(&self, success: bool, description: &str) {
        let duration = self.start_time.elapsed();
        if success {
            tracing::info!(
                parent: &self.span,
                execution_time_ms = duration.as_millis() as u64,
                description,
                "Image analysed"
            );
        } else {
            tracing::error!(
                parent: &self.span,
                execution_time_ms = duration.as_millis() as u64,
                description,
                "Image analysis failed"
            );
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span covering matching and verification of one image pair
pub struct PairSpan {
    span: Span,
    start_time: Instant,
}

impl PairSpan {
    pub fn new(i1: usize, i2: usize, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "pair",
            i1 = i1,
            i2 = i2,
            correlation_id = field::Empty,
            candidates = field::Empty,
            inliers = field::Empty,
            control_points = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
        }
    }

    pub fn record_matching(&self, queried: usize, candidates: usize) {
        self.span.record("candidates", candidates);
        tracing::debug!(parent: &self.span, queried, candidates, "Tentative matches found");
    }

    pub fn record_ransac(&self, model: &str, candidates: usize, inliers: usize) {
        self.span.record("inliers", inliers);
        tracing::debug!(parent: &self.span, model, candidates, inliers, "RANSAC finished");
    }

    pub fn record_skip(&self, reason: &str) {
        tracing::info!(parent: &self.span, reason, "Pair matches discarded");
    }

    pub fn record_result(&self, control_points: usize) {
        let duration = self.start_time.elapsed();
        self.span.record("control_points", control_points);
        tracing::info!(
            parent: &self.span,
            control_points,
            execution_time_ms = duration.as_millis() as u64,
            "Pair matched"
        );
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

/// Span covering one scheduler batch
pub struct StageSpan {
    span: Span,
    start_time: Instant,
    stage_name: String,
}

impl StageSpan {
    pub fn new(stage_name: &str, tasks: usize, correlation_id: Option<Uuid>) -> Self {
        let span = span!(
            Level::INFO,
            "stage",
            stage = stage_name,
            tasks = tasks,
            correlation_id = field::Empty,
            failed = field::Empty,
        );
        if let Some(id) = correlation_id {
            span.record("correlation_id", field::display(id));
        }

        Self {
            span,
            start_time: Instant::now(),
            stage_name: stage_name.to_string(),
        }
    }

    pub fn record_completion(&self, failed: usize) -> std::time::Duration {
        let duration = self.start_time.elapsed();
        self.span.record("failed", failed);
        tracing::info!(
            parent: &self.span,
            stage = %self.stage_name,
            failed,
            execution_time_ms = duration.as_millis() as u64,
            "Stage completed"
        );
        duration
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_span() {
        let span = ImageSpan::new(3, "a.jpg", Some(Uuid::new_v4()));
        let _enter = span.enter();
        span.record_detection(1500);
        span.record_sieve(1500, 900);
        span.record_descriptors(950, 64);
        span.record_result(true, "950 keypoints");
    }

    #[test]
    fn test_pair_and_stage_spans() {
        let stage = StageSpan::new("match", 2, None);
        let _stage = stage.enter();
        let pair = PairSpan::new(0, 1, None);
        pair.record_matching(300, 40);
        pair.record_ransac("homography", 40, 31);
        pair.record_result(12);
        let elapsed = stage.record_completion(0);
        assert!(elapsed.as_secs() < 60);
    }
}
