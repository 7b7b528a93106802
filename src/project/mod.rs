//! Project files: image list, lens and orientation parameters, masks and
//! control points, in the line-oriented PTO format.

pub mod keyfile;

use crate::algorithms::ControlPoint;
use crate::data::{CropRect, MaskSpec};
use crate::error::DetectError;
use crate::geometry::{Lens, Orientation, Projection};
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

pub use keyfile::{keyfile_path, read_keyfile, write_keyfile, KeyFile};

pub const OUTPUT_HEADER: &str = "# pto project file generated by cpfind";

/// Per-image parameters read from an `i` line.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageEntry {
    pub filename: PathBuf,
    pub width: u32,
    pub height: u32,
    pub projection: Projection,
    pub hfov: f64,
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
    pub translation: [f64; 3],
    /// Exposure value
    pub exposure: f64,
    pub b: f64,
    pub stack: Option<usize>,
    pub crop: Option<CropRect>,
    /// Image whose yaw this image shares
    pub yaw_link: Option<usize>,
    pub masks: Vec<Vec<(f64, f64)>>,
}

impl ImageEntry {
    pub fn lens(&self) -> Lens {
        Lens {
            projection: self.projection,
            hfov: self.hfov,
            width: self.width,
            height: self.height,
            b: self.b,
        }
    }

    pub fn orientation(&self) -> Orientation {
        Orientation::new(self.yaw, self.pitch, self.roll)
    }

    pub fn mask_spec(&self) -> MaskSpec {
        MaskSpec {
            crop: self.crop,
            elliptic: self.projection == Projection::CircularFisheye,
            polygons: self.masks.clone(),
        }
    }
}

/// One parsed project. Lines other than control points are kept verbatim.
#[derive(Debug, Clone, Default)]
pub struct Project {
    pub images: Vec<ImageEntry>,
    pub control_points: Vec<ControlPoint>,
    lines: Vec<String>,
}

fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            c if c.is_whitespace() && !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn split_token(token: &str) -> (&str, &str) {
    let end = token
        .char_indices()
        .find(|(_, c)| !c.is_ascii_alphabetic())
        .map_or(token.len(), |(i, _)| i);
    token.split_at(end)
}

fn unquote(value: &str) -> &str {
    value.trim_start_matches('"').trim_end_matches('"')
}

/// Plain value or a link to another image's value.
enum Param {
    Value(f64),
    Link(usize),
}

fn parse_param(value: &str, line: usize, key: &str) -> Result<Param, DetectError> {
    if let Some(target) = value.strip_prefix('=') {
        return target
            .parse()
            .map(Param::Link)
            .map_err(|_| DetectError::project(line, format!("bad link for {}: {}", key, value)));
    }
    value
        .parse()
        .map(Param::Value)
        .map_err(|_| DetectError::project(line, format!("bad value for {}: {}", key, value)))
}

#[derive(Default)]
struct RawImage {
    params: Vec<(String, Param)>,
    filename: Option<String>,
    crop: Option<CropRect>,
    line: usize,
}

impl Project {
    /// Parse project text. Relative image names are resolved against
    /// `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, DetectError> {
        let mut raw_images: Vec<RawImage> = Vec::new();
        let mut control_points = Vec::new();
        let mut masks: Vec<(usize, Vec<(f64, f64)>)> = Vec::new();
        let mut lines = Vec::new();

        for (number, line) in text.lines().enumerate() {
            let number = number + 1;
            let trimmed = line.trim();
            match trimmed.chars().next() {
                Some('i') => {
                    raw_images.push(Self::parse_image(trimmed, number)?);
                    lines.push(line.to_string());
                }
                // line and vertical/horizontal points pass through untouched
                Some('c') if trimmed.starts_with("c ") && Self::is_point_pair(trimmed) => {
                    control_points.push(Self::parse_control_point(trimmed, number)?);
                }
                Some('k') if trimmed.starts_with("k ") => {
                    if let Some(mask) = Self::parse_mask(trimmed, number)? {
                        masks.push(mask);
                    }
                    lines.push(line.to_string());
                }
                Some('#') if trimmed.starts_with("# hugin project file") || trimmed == OUTPUT_HEADER => {}
                _ => lines.push(line.to_string()),
            }
        }

        let mut images = Self::resolve_images(&raw_images, base_dir)?;
        for (image, polygon) in masks {
            match images.get_mut(image) {
                Some(entry) => entry.masks.push(polygon),
                None => tracing::warn!(image, "Mask refers to a missing image"),
            }
        }

        let count = images.len();
        if let Some(cp) = control_points
            .iter()
            .find(|cp: &&ControlPoint| cp.image1 >= count || cp.image2 >= count)
        {
            return Err(DetectError::project(
                0,
                format!("control point refers to image {}", cp.image1.max(cp.image2)),
            ));
        }

        Ok(Self {
            images,
            control_points,
            lines,
        })
    }

    pub fn load(path: &Path) -> crate::Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading project {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(Self::parse(&text, base_dir)?)
    }

    fn parse_image(line: &str, number: usize) -> Result<RawImage, DetectError> {
        let mut raw = RawImage {
            line: number,
            ..Default::default()
        };
        for token in tokenize(line).into_iter().skip(1) {
            let (key, value) = split_token(&token);
            match key {
                "n" => raw.filename = Some(unquote(value).to_string()),
                "S" => {
                    let parts: Vec<i64> = value.split(',').filter_map(|p| p.trim().parse().ok()).collect();
                    if let [left, right, top, bottom] = parts[..] {
                        if right > left && bottom > top {
                            raw.crop = Some(CropRect { left, top, right, bottom });
                        }
                    }
                }
                "w" | "h" | "f" | "v" | "y" | "p" | "r" | "TrX" | "TrY" | "TrZ" | "Eev" | "j" | "b" => {
                    if !value.is_empty() {
                        raw.params.push((key.to_string(), parse_param(value, number, key)?));
                    }
                }
                _ => {}
            }
        }
        if raw.filename.is_none() {
            return Err(DetectError::project(number, "image line without file name"));
        }
        Ok(raw)
    }

    fn resolve_images(raw_images: &[RawImage], base_dir: &Path) -> Result<Vec<ImageEntry>, DetectError> {
        fn lookup(raw: &[RawImage], index: usize, key: &str, depth: usize) -> Option<f64> {
            if depth > raw.len() {
                return None;
            }
            let image = raw.get(index)?;
            match image.params.iter().find(|(k, _)| k == key).map(|(_, p)| p) {
                Some(Param::Value(v)) => Some(*v),
                Some(Param::Link(target)) => lookup(raw, *target, key, depth + 1),
                None => None,
            }
        }

        let mut images = Vec::with_capacity(raw_images.len());
        for (index, raw) in raw_images.iter().enumerate() {
            let get = |key: &str| lookup(raw_images, index, key, 0);
            let required = |key: &str| {
                get(key).ok_or_else(|| DetectError::project(raw.line, format!("missing parameter {}", key)))
            };

            let code = get("f").unwrap_or(0.0) as u32;
            let projection = Projection::from_code(code)
                .ok_or_else(|| DetectError::project(raw.line, format!("unsupported projection f{}", code)))?;
            let name = raw.filename.clone().unwrap_or_default();
            let path = PathBuf::from(&name);
            let filename = if path.is_absolute() { path } else { base_dir.join(path) };
            let yaw_link = raw.params.iter().find_map(|(k, p)| match (k.as_str(), p) {
                ("y", Param::Link(target)) => Some(*target),
                _ => None,
            });

            images.push(ImageEntry {
                filename,
                width: required("w")? as u32,
                height: required("h")? as u32,
                projection,
                hfov: required("v")?,
                yaw: get("y").unwrap_or(0.0),
                pitch: get("p").unwrap_or(0.0),
                roll: get("r").unwrap_or(0.0),
                translation: [
                    get("TrX").unwrap_or(0.0),
                    get("TrY").unwrap_or(0.0),
                    get("TrZ").unwrap_or(0.0),
                ],
                exposure: get("Eev").unwrap_or(0.0),
                b: get("b").unwrap_or(0.0),
                stack: get("j").map(|j| j as usize),
                crop: raw.crop,
                yaw_link,
                masks: Vec::new(),
            });
        }
        Ok(images)
    }

    fn is_point_pair(line: &str) -> bool {
        tokenize(line)
            .iter()
            .map(|token| split_token(token))
            .find(|(key, _)| *key == "t")
            .map_or(true, |(_, value)| value == "0")
    }

    fn parse_control_point(line: &str, number: usize) -> Result<ControlPoint, DetectError> {
        let mut cp = ControlPoint {
            image1: 0,
            x1: 0.0,
            y1: 0.0,
            image2: 0,
            x2: 0.0,
            y2: 0.0,
        };
        let mut seen = 0u8;
        for token in tokenize(line).into_iter().skip(1) {
            let (key, value) = split_token(&token);
            let bad = || DetectError::project(number, format!("bad control point field {}", token));
            match key {
                "n" => cp.image1 = value.parse().map_err(|_| bad())?,
                "N" => cp.image2 = value.parse().map_err(|_| bad())?,
                "x" => cp.x1 = value.parse().map_err(|_| bad())?,
                "y" => cp.y1 = value.parse().map_err(|_| bad())?,
                "X" => cp.x2 = value.parse().map_err(|_| bad())?,
                "Y" => cp.y2 = value.parse().map_err(|_| bad())?,
                _ => continue,
            }
            seen += 1;
        }
        if seen < 6 {
            return Err(DetectError::project(number, "incomplete control point"));
        }
        Ok(cp)
    }

    /// Exclusion polygon from a `k` line, `None` for inclusion masks.
    fn parse_mask(line: &str, number: usize) -> Result<Option<(usize, Vec<(f64, f64)>)>, DetectError> {
        let mut image = None;
        let mut kind = 0u32;
        let mut coords = Vec::new();
        for token in tokenize(line).into_iter().skip(1) {
            let (key, value) = split_token(&token);
            match key {
                "i" => image = value.parse().ok(),
                "t" => kind = value.parse().unwrap_or(0),
                "p" => {
                    coords = unquote(value)
                        .split_whitespace()
                        .map(|v| v.parse::<f64>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| DetectError::project(number, "bad mask polygon"))?;
                }
                _ => {}
            }
        }
        let image = image.ok_or_else(|| DetectError::project(number, "mask without image"))?;
        // 0, 2 and 4 exclude; 1 and 3 include
        if kind % 2 == 1 {
            return Ok(None);
        }
        let polygon = coords.chunks_exact(2).map(|c| (c[0], c[1])).collect();
        Ok(Some((image, polygon)))
    }

    /// Append `points` that are not already present. Returns how many were
    /// added.
    pub fn merge_control_points(&mut self, points: &[ControlPoint]) -> usize {
        let mut added = 0;
        for cp in points {
            if !self.control_points.iter().any(|existing| existing.same_as(cp)) {
                self.control_points.push(*cp);
                added += 1;
            }
        }
        added
    }

    /// Drop duplicate control points already present in the input.
    pub fn dedupe_control_points(&mut self) -> usize {
        let before = self.control_points.len();
        let mut kept: Vec<ControlPoint> = Vec::with_capacity(before);
        for cp in self.control_points.drain(..) {
            if !kept.iter().any(|k| k.same_as(&cp)) {
                kept.push(cp);
            }
        }
        self.control_points = kept;
        before - self.control_points.len()
    }

    pub fn to_pto(&self) -> String {
        let points = self.control_points.iter().map(|cp| {
            format!(
                "c n{} N{} x{} y{} X{} Y{} t0",
                cp.image1, cp.image2, cp.x1, cp.y1, cp.x2, cp.y2
            )
        });
        let mut out = std::iter::once(OUTPUT_HEADER.to_string())
            .chain(self.lines.iter().cloned())
            .chain(points)
            .collect::<Vec<_>>()
            .join("\n");
        out.push('\n');
        out
    }

    pub fn save(&self, path: &Path) -> Result<(), DetectError> {
        fs::write(path, self.to_pto()).map_err(|source| DetectError::Persistence {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"# hugin project file
p f2 w3000 h1500 v360 n"TIFF_m c:LZW"
m i0

i w640 h480 f0 v50 Ra0 y0 p0 r0 TrX0 TrY0 TrZ0 Eev12 j0 b-0.01 n"a b.jpg"
i w640 h480 f0 v=0 y=0 p0 r0 TrX0 TrY0 TrZ0 Eev10 j0 b=0 n"b.jpg"
i w800 h800 f2 v180 y90 p-5 r0 Eev12 j1 S100,700,100,700 n"/abs/fish.jpg"
k i2 t0 p"0 0 50 0 50 50"
k i2 t1 p"0 0 10 0 10 10"
c n0 N1 x10 y20 X30 Y40 t0
c n1 N0 x30 y40 X10 Y20 t0
"#;

    #[test]
    fn test_parse_images_with_links() {
        let project = Project::parse(SAMPLE, Path::new("/base")).unwrap();
        assert_eq!(project.images.len(), 3);
        let b = &project.images[1];
        assert_eq!(b.hfov, 50.0);
        assert_eq!(b.b, -0.01);
        assert_eq!(b.yaw_link, Some(0));
        assert_eq!(b.exposure, 10.0);
        assert_eq!(b.stack, Some(0));
        assert_eq!(project.images[0].filename, PathBuf::from("/base/a b.jpg"));

        let fish = &project.images[2];
        assert_eq!(fish.projection, Projection::CircularFisheye);
        assert_eq!(fish.filename, PathBuf::from("/abs/fish.jpg"));
        assert_eq!(fish.crop, Some(CropRect { left: 100, top: 100, right: 700, bottom: 700 }));
        assert_eq!(fish.masks.len(), 1);
        assert!(fish.mask_spec().elliptic);
    }

    #[test]
    fn test_output_dedupes_and_keeps_other_lines() {
        let mut project = Project::parse(SAMPLE, Path::new("/base")).unwrap();
        assert_eq!(project.dedupe_control_points(), 1);
        let added = project.merge_control_points(&[
            ControlPoint { image1: 1, x1: 30.0, y1: 40.0, image2: 0, x2: 10.0, y2: 20.0 },
            ControlPoint { image1: 0, x1: 1.5, y1: 2.5, image2: 2, x2: 3.0, y2: 4.0 },
        ]);
        assert_eq!(added, 1);

        let out = project.to_pto();
        assert!(out.starts_with(OUTPUT_HEADER));
        assert!(!out.contains("# hugin project file"));
        assert!(out.contains("k i2 t0 p\"0 0 50 0 50 50\""));
        assert!(out.contains("c n0 N2 x1.5 y2.5 X3 Y4 t0"));
        assert_eq!(out.matches("\nc ").count(), 2);
        assert!(out.ends_with(" t0\n"));

        let again = Project::parse(&out, Path::new("/base")).unwrap();
        assert_eq!(again.control_points.len(), 2);
        assert_eq!(again.images, project.images);
    }

    #[test]
    fn test_line_control_points_are_preserved() {
        let text = "i w10 h10 v50 n\"a.jpg\"\ni w10 h10 v50 n\"b.jpg\"\nc n0 N1 x1 y1 X5 Y9 t1\n";
        let project = Project::parse(text, Path::new(".")).unwrap();
        assert!(project.control_points.is_empty());
        assert!(project.to_pto().contains("c n0 N1 x1 y1 X5 Y9 t1"));
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = Project::parse("i w10 h10 v50\n", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("line 1"));
        let err = Project::parse("i w10 h10 f7 v50 n\"a.jpg\"\n", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("f7"));
        let err = Project::parse("i w10 h10 v50 n\"a.jpg\"\nc n0 N3 x1 y1 X1 Y1 t0\n", Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("image 3"));
    }
}
