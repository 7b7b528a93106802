use super::detector::PanoDetector;
use crate::algorithms::{HaarDescriptor, HessianDetector, KeypointDescriptor, KeypointDetector};
use crate::config::DetectorConfig;
use crate::data::{FileImageSource, HeuristicSkyClassifier, ImageSource, SkyClassifier};
use crate::logging::StageMetrics;
use crate::optimizer::{PanoOptimizer, RotationOptimizer, SharedOptimizer};

/// Builder for a [`PanoDetector`]. Every collaborator has a built-in
/// default and can be replaced.
pub struct PanoDetectorBuilder {
    config: DetectorConfig,
    detector: Option<Box<dyn KeypointDetector>>,
    descriptor: Option<Box<dyn KeypointDescriptor>>,
    source: Option<Box<dyn ImageSource>>,
    sky: Option<Box<dyn SkyClassifier>>,
    optimizer: Option<SharedOptimizer>,
    metrics: Option<StageMetrics>,
}

impl PanoDetectorBuilder {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            detector: None,
            descriptor: None,
            source: None,
            sky: None,
            optimizer: None,
            metrics: None,
        }
    }

    pub fn detector(mut self, detector: impl KeypointDetector + 'static) -> Self {
        self.detector = Some(Box::new(detector));
        self
    }

    pub fn descriptor(mut self, descriptor: impl KeypointDescriptor + 'static) -> Self {
        self.descriptor = Some(Box::new(descriptor));
        self
    }

    pub fn image_source(mut self, source: impl ImageSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn sky_classifier(mut self, classifier: impl SkyClassifier + 'static) -> Self {
        self.sky = Some(Box::new(classifier));
        self
    }

    pub fn optimizer(mut self, optimizer: impl PanoOptimizer + 'static) -> Self {
        self.optimizer = Some(SharedOptimizer::new(optimizer));
        self
    }

    /// Collect stage timings into an existing collector
    pub fn metrics(mut self, metrics: StageMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> PanoDetector {
        PanoDetector {
            config: self.config,
            detector: self.detector.unwrap_or_else(|| Box::new(HessianDetector::new())),
            descriptor: self.descriptor.unwrap_or_else(|| Box::new(HaarDescriptor::default())),
            source: self.source.unwrap_or_else(|| Box::new(FileImageSource)),
            sky: self.sky.unwrap_or_else(|| Box::new(HeuristicSkyClassifier)),
            optimizer: self.optimizer.unwrap_or_else(|| SharedOptimizer::new(RotationOptimizer)),
            metrics: self.metrics.unwrap_or_default(),
        }
    }
}
