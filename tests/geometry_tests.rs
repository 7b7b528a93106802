mod common;

use common::PatchDescriptor;
use cpfind::algorithms::{Keypoint, KeypointDetector};
use cpfind::data::IntegralImage;
use cpfind::project::{keyfile_path, read_keyfile};
use cpfind::{DetectorConfig, PanoDetectorBuilder, Project};
use image::{GrayImage, Luma};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// One keypoint at the intensity-weighted centroid of the buffer.
struct CentroidDetector;

impl KeypointDetector for CentroidDetector {
    fn detect(&self, image: &IntegralImage) -> Vec<Keypoint> {
        let (mut sum, mut sx, mut sy) = (0.0, 0.0, 0.0);
        for y in 0..image.height() as i64 {
            for x in 0..image.width() as i64 {
                let v = image.box_sum(x, y, x + 1, y + 1);
                sum += v;
                sx += v * x as f64;
                sy += v * y as f64;
            }
        }
        if sum <= 0.0 {
            return Vec::new();
        }
        vec![Keypoint::new(sx / sum, sy / sum, 1.0, 1.0)]
    }

    fn name(&self) -> &'static str {
        "centroid"
    }
}

fn write_single_image_project(dir: &Path, file: &str, line: &str) -> Project {
    let path = dir.join("single.pto");
    fs::write(&path, format!("p f2 w3000 h1500 v360\n{} n\"{}\"\n", line, file)).unwrap();
    Project::load(&path).unwrap()
}

fn centroid_at(dir: &Path, project: &Project, downscale: bool) -> (f64, f64) {
    let keys = dir.join(if downscale { "half" } else { "full" });
    let mut config = DetectorConfig::default();
    config.downscale = downscale;
    config.cache.keypath = Some(keys.clone());
    PanoDetectorBuilder::new(config)
        .detector(CentroidDetector)
        .descriptor(PatchDescriptor)
        .build()
        .write_keyfiles(project, &[0])
        .unwrap();

    let file = read_keyfile(&keyfile_path(&project.images[0].filename, Some(&keys))).unwrap();
    assert_eq!(file.keypoints.len(), 1);
    (file.keypoints[0].x, file.keypoints[0].y)
}

#[test]
fn test_downscaled_detection_maps_back_within_a_pixel() {
    let dir = TempDir::new().unwrap();
    for (left, top) in [(40u32, 60u32), (41, 33), (70, 71)] {
        let image = GrayImage::from_fn(120, 100, |x, y| {
            let inside = (left..left + 8).contains(&x) && (top..top + 8).contains(&y);
            Luma([if inside { 255 } else { 0 }])
        });
        image.save(dir.path().join("square.png")).unwrap();
        let project = write_single_image_project(dir.path(), "square.png", "i w120 h100 f0 v40 y0 p0 r0");

        let full = centroid_at(dir.path(), &project, false);
        let half = centroid_at(dir.path(), &project, true);
        assert!((full.0 - half.0).abs() <= 1.0, "x {} vs {}", full.0, half.0);
        assert!((full.1 - half.1).abs() <= 1.0, "y {} vs {}", full.1, half.1);
    }
}

#[test]
fn test_remapped_keypoints_stay_inside_the_image() {
    let dir = TempDir::new().unwrap();
    let texture = GrayImage::from_fn(400, 300, |x, y| {
        let (fx, fy) = (x as f64, y as f64);
        let v = 128.0 + 60.0 * (fx * 0.31).sin() * (fy * 0.23).cos() + 50.0 * ((fx + 2.0 * fy) * 0.11).sin();
        Luma([v.clamp(0.0, 255.0) as u8])
    });
    texture.save(dir.path().join("fisheye.png")).unwrap();
    let project = write_single_image_project(dir.path(), "fisheye.png", "i w400 h300 f3 v170 y0 p0 r0");

    let keys = dir.path().join("keys");
    let mut config = DetectorConfig::default();
    config.cache.keypath = Some(keys.clone());
    let summary = PanoDetectorBuilder::new(config)
        .build()
        .write_keyfiles(&project, &[0])
        .unwrap();
    assert_eq!(summary.keyfiles_written, 1);

    let file = read_keyfile(&keyfile_path(&project.images[0].filename, Some(&keys))).unwrap();
    assert_eq!((file.width, file.height), (400, 300));
    assert_eq!(file.dims, 64);
    assert!(!file.keypoints.is_empty());
    for kp in &file.keypoints {
        assert!(kp.x >= 0.0 && kp.x < 400.0 && kp.y >= 0.0 && kp.y < 300.0, "({}, {})", kp.x, kp.y);
    }
}
