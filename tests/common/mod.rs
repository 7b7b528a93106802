#![allow(dead_code)]

use cpfind::algorithms::{Keypoint, KeypointDescriptor, KeypointDetector};
use cpfind::data::IntegralImage;
use cpfind::{DetectorConfig, PanoDetector, PanoDetectorBuilder};
use image::{GrayImage, Luma};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const IMAGE_WIDTH: u32 = 200;
pub const IMAGE_HEIGHT: u32 = 150;
/// Horizontal offset between consecutive views of the scene
pub const VIEW_STEP: u32 = 60;
const MARKER_SPACING: u32 = 20;
const PATCH_RADIUS: i64 = 3;
const MARKER_VALUE: u8 = 255;

/// Finds single saturated pixels. Counts how often it runs.
#[derive(Clone, Default)]
pub struct MarkerDetector {
    pub calls: Arc<AtomicUsize>,
}

impl MarkerDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeypointDetector for MarkerDetector {
    fn detect(&self, image: &IntegralImage) -> Vec<Keypoint> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut found = Vec::new();
        for y in 0..image.height() as i64 {
            for x in 0..image.width() as i64 {
                if image.box_sum(x, y, x + 1, y + 1) > 250.0 {
                    found.push(Keypoint::new(x as f64, y as f64, 1.0, 1.0));
                }
            }
        }
        found
    }

    fn name(&self) -> &'static str {
        "marker"
    }
}

/// Raw 7x7 neighbourhood around the keypoint, centre excluded.
#[derive(Clone, Copy, Default)]
pub struct PatchDescriptor;

impl KeypointDescriptor for PatchDescriptor {
    fn dims(&self) -> usize {
        48
    }

    fn orientations(&self, _image: &IntegralImage, _keypoint: &Keypoint) -> Vec<f64> {
        vec![0.0]
    }

    fn describe(&self, image: &IntegralImage, keypoint: &mut Keypoint) {
        let (cx, cy) = (keypoint.x.round() as i64, keypoint.y.round() as i64);
        let mut descriptor = Vec::with_capacity(48);
        for dy in -PATCH_RADIUS..=PATCH_RADIUS {
            for dx in -PATCH_RADIUS..=PATCH_RADIUS {
                if (dx, dy) != (0, 0) {
                    let (x, y) = (cx + dx, cy + dy);
                    descriptor.push(image.box_sum(x, y, x + 1, y + 1) as f32);
                }
            }
        }
        keypoint.descriptor = descriptor;
    }
}

fn patch_value(id: u64, dx: i64, dy: i64) -> u8 {
    let k = ((dy + PATCH_RADIUS) * 7 + dx + PATCH_RADIUS) as u64;
    let h = (id * 7919 + k).wrapping_mul(2_654_435_761) >> 7;
    (20 + h % 200) as u8
}

/// View `view` of a wide scene of uniquely textured markers. Consecutive
/// views are shifted by [`VIEW_STEP`] pixels.
pub fn marker_view(view: u32) -> GrayImage {
    let mut image = GrayImage::new(IMAGE_WIDTH, IMAGE_HEIGHT);
    let origin = (view * VIEW_STEP) as i64;
    let mut gy = 0u64;
    let mut wy = MARKER_SPACING / 2;
    while wy + 4 <= IMAGE_HEIGHT {
        let mut gx = 0u64;
        let mut wx = MARKER_SPACING / 2;
        while wx < 800 {
            let x = wx as i64 - origin;
            let id = gy * 1000 + gx;
            if x >= 4 && x + 4 < IMAGE_WIDTH as i64 {
                for dy in -PATCH_RADIUS..=PATCH_RADIUS {
                    for dx in -PATCH_RADIUS..=PATCH_RADIUS {
                        let value = if (dx, dy) == (0, 0) {
                            MARKER_VALUE
                        } else {
                            patch_value(id, dx, dy)
                        };
                        image.put_pixel((x + dx) as u32, (wy as i64 + dy) as u32, Luma([value]));
                    }
                }
            }
            wx += MARKER_SPACING;
            gx += 1;
        }
        wy += MARKER_SPACING;
        gy += 1;
    }
    image
}

/// One image line of a project.
pub struct ViewSpec {
    pub file: String,
    pub hfov: f64,
    pub yaw: f64,
    pub exposure: f64,
    pub stack: Option<usize>,
}

impl ViewSpec {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            hfov: 50.0,
            yaw: 0.0,
            exposure: 0.0,
            stack: None,
        }
    }
}

pub fn image_line(spec: &ViewSpec) -> String {
    let stack = spec.stack.map(|j| format!(" j{}", j)).unwrap_or_default();
    format!(
        "i w{} h{} f0 v{} y{} p0 r0 Eev{}{} n\"{}\"",
        IMAGE_WIDTH, IMAGE_HEIGHT, spec.hfov, spec.yaw, spec.exposure, stack, spec.file
    )
}

/// Write project text referring to `views` into `dir`.
pub fn write_project(dir: &Path, views: &[ViewSpec], extra: &[&str]) -> PathBuf {
    let mut text = String::from("# hugin project file\np f2 w3000 h1500 v360 n\"TIFF_m c:LZW\"\nm i0\n\n");
    for spec in views {
        text.push_str(&image_line(spec));
        text.push('\n');
    }
    for line in extra {
        text.push_str(line);
        text.push('\n');
    }
    let path = dir.join("project.pto");
    fs::write(&path, text).unwrap();
    path
}

/// Save views `0..count` of the marker scene as `view<N>.png`.
pub fn write_views(dir: &Path, count: u32) -> Vec<ViewSpec> {
    (0..count)
        .map(|v| {
            let file = format!("view{}.png", v);
            marker_view(v).save(dir.join(&file)).unwrap();
            ViewSpec::new(&file)
        })
        .collect()
}

/// Full resolution, single thread, homography verification.
pub fn marker_config() -> DetectorConfig {
    let mut config = DetectorConfig::default();
    config.downscale = false;
    config.cores = Some(2);
    config
}

pub fn marker_detector(config: DetectorConfig, detector: &MarkerDetector) -> PanoDetector {
    PanoDetectorBuilder::new(config)
        .detector(detector.clone())
        .descriptor(PatchDescriptor)
        .build()
}
