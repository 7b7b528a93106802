//! Per-image keypoint cache.
//!
//! Text format: keypoint count, descriptor length, one line per keypoint
//! `y x scale orientation score d0 .. dN-1`, then the image file name and
//! `width height` of the source image.

use crate::algorithms::Keypoint;
use crate::error::DetectError;
use std::fs;
use std::path::{Path, PathBuf};

/// Keypoints read back from a key file.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyFile {
    pub dims: usize,
    pub keypoints: Vec<Keypoint>,
    pub image_name: String,
    pub width: u32,
    pub height: u32,
}

/// Cache location for `image`: `<keypath>/<stem>.key`, or the image path
/// with its extension replaced.
pub fn keyfile_path(image: &Path, keypath: Option<&Path>) -> PathBuf {
    match keypath {
        Some(dir) => {
            let stem = image.file_stem().unwrap_or_default();
            let mut path = dir.join(stem);
            path.set_extension("key");
            path
        }
        None => image.with_extension("key"),
    }
}

pub fn write_keyfile(
    path: &Path,
    keypoints: &[Keypoint],
    dims: usize,
    image_name: &str,
    width: u32,
    height: u32,
) -> Result<(), DetectError> {
    let mut lines = Vec::with_capacity(keypoints.len() + 4);
    lines.push(keypoints.len().to_string());
    lines.push(dims.to_string());
    for kp in keypoints {
        let mut line = format!("{} {} {} {} {}", kp.y, kp.x, kp.scale, kp.orientation, kp.score);
        for v in &kp.descriptor {
            line.push_str(&format!(" {}", v));
        }
        lines.push(line);
    }
    lines.push(image_name.to_string());
    lines.push(format!("{} {}", width, height));
    let mut out = lines.join("\n");
    out.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| DetectError::Persistence {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    fs::write(path, out).map_err(|source| DetectError::Persistence {
        path: path.to_path_buf(),
        source,
    })
}

pub fn read_keyfile(path: &Path) -> Result<KeyFile, DetectError> {
    let text = fs::read_to_string(path).map_err(|source| DetectError::Persistence {
        path: path.to_path_buf(),
        source,
    })?;
    parse_keyfile(&text).map_err(|reason| DetectError::keyfile(path, reason))
}

fn parse_keyfile(text: &str) -> Result<KeyFile, String> {
    let mut lines = text.lines();
    let mut header = |what: &str| -> Result<usize, String> {
        lines
            .next()
            .and_then(|l| l.trim().parse().ok())
            .ok_or_else(|| format!("missing {}", what))
    };
    let count = header("keypoint count")?;
    let dims = header("descriptor length")?;

    let mut keypoints = Vec::with_capacity(count);
    for n in 0..count {
        let line = lines.next().ok_or_else(|| format!("keypoint {} missing", n))?;
        let values: Vec<f64> = line
            .split_whitespace()
            .map(|t| t.parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|e| format!("keypoint {}: {}", n, e))?;
        if values.len() != 5 + dims {
            return Err(format!(
                "keypoint {}: expected {} values, found {}",
                n,
                5 + dims,
                values.len()
            ));
        }
        let mut kp = Keypoint::new(values[1], values[0], values[2], values[4]);
        kp.orientation = values[3];
        kp.descriptor = values[5..].iter().map(|&v| v as f32).collect();
        keypoints.push(kp);
    }

    let image_name = lines.next().unwrap_or_default().trim().to_string();
    let mut size = lines
        .next()
        .unwrap_or_default()
        .split_whitespace()
        .map(|t| t.parse::<u32>());
    let (width, height) = match (size.next(), size.next()) {
        (Some(Ok(w)), Some(Ok(h))) => (w, h),
        _ => return Err("missing image size".to_string()),
    };

    Ok(KeyFile {
        dims,
        keypoints,
        image_name,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_keyfile_path_variants() {
        let image = Path::new("/photos/set/IMG_0001.JPG");
        assert_eq!(keyfile_path(image, None), PathBuf::from("/photos/set/IMG_0001.key"));
        assert_eq!(
            keyfile_path(image, Some(Path::new("/cache"))),
            PathBuf::from("/cache/IMG_0001.key")
        );
    }

    #[test]
    fn test_written_file_reads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sub").join("a.key");
        let mut kp = Keypoint::new(12.5, 40.25, 2.0, 310.0);
        kp.orientation = 1.25;
        kp.descriptor = vec![0.5, -0.25, 0.125];

        write_keyfile(&path, &[kp.clone()], 3, "a.jpg", 640, 480).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("1\n3\n40.25 12.5 2 1.25 310 0.5 -0.25 0.125\n"));

        let loaded = read_keyfile(&path).unwrap();
        assert_eq!(loaded.keypoints, vec![kp]);
        assert_eq!((loaded.width, loaded.height), (640, 480));
        assert_eq!(loaded.image_name, "a.jpg");
    }

    #[test]
    fn test_featureless_image_reads_back_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.key");
        write_keyfile(&path, &[], 64, "blank.png", 200, 150).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "0\n64\nblank.png\n200 150\n");

        let loaded = read_keyfile(&path).unwrap();
        assert!(loaded.keypoints.is_empty());
        assert_eq!(loaded.dims, 64);
        assert_eq!((loaded.width, loaded.height), (200, 150));
    }

    #[test]
    fn test_malformed_files_are_rejected() {
        assert!(parse_keyfile("").is_err());
        assert!(parse_keyfile("0\n64\nimg.jpg\n").is_err());
        assert!(parse_keyfile("1\n2\n1 2 3 4 5 6\nimg.jpg\n10 10\n").is_err());
        assert!(parse_keyfile("1\n0\n1 2 3 4 5\nimg.jpg\n").is_err());
    }
}
