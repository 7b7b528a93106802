//! Image preprocessing: decode, mask, optionally remap or downscale, and build
//! the integral image the detector runs on.

pub mod celeste;
pub mod integral;
pub mod loader;
pub mod mask;
pub mod transformer;

use crate::geometry::{Lens, StereographicCanvas};
use image::{GrayImage, ImageBuffer, Luma};
use std::path::Path;

pub use celeste::{sky_mask, CellFeatures, HeuristicSkyClassifier, SkyClassifier};
pub use integral::IntegralImage;
pub use loader::{FileImageSource, ImageSource, LoadedImage};
pub use mask::{build_mask, CropRect, DistanceMap, MaskSpec};
pub use transformer::{bilinear_interpolate, downscale_half, remap_to_canvas};

/// Single channel float buffer, values in 0..255.
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Detection geometry of one image.
#[derive(Debug, Clone)]
pub struct DetectionGeometry {
    pub lens: Lens,
    pub mask: MaskSpec,
    /// Present when the image is resampled onto the stereographic canvas
    pub canvas: Option<StereographicCanvas>,
    pub downscale: bool,
}

/// Sky masking parameters for one run.
pub struct SkyMasking<'a> {
    pub classifier: &'a dyn SkyClassifier,
    pub radius: u32,
    pub threshold: f64,
}

/// Everything the detector needs from one image.
pub struct PreparedImage {
    pub buffer: GrayF32,
    pub mask: Option<GrayImage>,
    pub distance: Option<DistanceMap>,
    pub integral: IntegralImage,
}

impl PreparedImage {
    pub fn width(&self) -> u32 {
        self.buffer.width()
    }

    pub fn height(&self) -> u32 {
        self.buffer.height()
    }
}

/// Load `path` and turn it into a detection buffer.
pub fn prepare(
    source: &dyn ImageSource,
    path: &Path,
    geometry: &DetectionGeometry,
    sky: Option<&SkyMasking<'_>>,
) -> crate::Result<PreparedImage> {
    let loaded = source.load(path)?;
    let (width, height) = loaded.gray.dimensions();
    if (width, height) != (geometry.lens.width, geometry.lens.height) {
        tracing::warn!(
            file = %path.display(),
            width,
            height,
            expected_width = geometry.lens.width,
            expected_height = geometry.lens.height,
            "Image size differs from project"
        );
    }

    let mut mask = build_mask(width, height, loaded.alpha.as_ref(), &geometry.mask);

    if let (Some(sky), Some(color)) = (sky, loaded.color.as_ref()) {
        let (cloud, removed) = sky_mask(color, sky.radius, sky.threshold, sky.classifier);
        if removed > 0 {
            tracing::debug!(file = %path.display(), cells = removed, "Sky cells masked");
            match mask.as_mut() {
                Some(m) => mask::intersect(m, &cloud),
                None => mask = Some(cloud),
            }
        }
    }

    let (buffer, mask) = match &geometry.canvas {
        Some(canvas) => {
            let (buffer, canvas_mask) = remap_to_canvas(&loaded.gray, mask.as_ref(), &geometry.lens, canvas);
            (buffer, Some(canvas_mask))
        }
        None if geometry.downscale => (
            downscale_half(&loaded.gray),
            mask.as_ref().map(transformer::downscale_mask_half),
        ),
        None => (loaded.gray, mask),
    };

    let distance = mask.as_ref().map(DistanceMap::from_mask);
    let integral = IntegralImage::from_gray(&buffer);

    Ok(PreparedImage {
        buffer,
        mask,
        distance,
        integral,
    })
}
