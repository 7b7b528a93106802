use super::GrayF32;
use anyhow::Context;
use image::{ColorType, DynamicImage, GrayImage, ImageBuffer, Luma, Rgb32FImage};
use std::path::Path;

/// Decoded source image in detection units.
pub struct LoadedImage {
    /// Luminance scaled to 0..255
    pub gray: GrayF32,
    /// Colour channels in 0..1, kept for the sky classifier
    pub color: Option<Rgb32FImage>,
    /// 255 where the alpha channel is non-zero
    pub alpha: Option<GrayImage>,
}

/// Turns a file path into a normalized grayscale buffer.
pub trait ImageSource: Send + Sync {
    fn load(&self, path: &Path) -> crate::Result<LoadedImage>;
}

/// Decoder backed by the `image` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileImageSource;

impl ImageSource for FileImageSource {
    fn load(&self, path: &Path) -> crate::Result<LoadedImage> {
        if !path.exists() {
            return Err(anyhow::anyhow!(
                "Image file does not exist: {}",
                path.display()
            ));
        }
        let img = image::open(path).with_context(|| format!("decoding {}", path.display()))?;
        let loaded = normalize(&img);
        validate_image_size(&loaded.gray)?;
        Ok(loaded)
    }
}

fn is_eight_bit(color: ColorType) -> bool {
    matches!(
        color,
        ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8
    )
}

/// Convert any decoded image to luminance in 0..255. Images with more than
/// 8 bits per channel are range-stretched from their own min/max.
pub fn normalize(img: &DynamicImage) -> LoadedImage {
    let color_type = img.color();
    let rgba = img.to_rgba32f();
    let (width, height) = rgba.dimensions();

    let mut gray: GrayF32 = ImageBuffer::new(width, height);
    for (x, y, p) in rgba.enumerate_pixels() {
        let [r, g, b, _] = p.0;
        gray.put_pixel(x, y, Luma([0.299 * r + 0.587 * g + 0.114 * b]));
    }

    if is_eight_bit(color_type) {
        for v in gray.iter_mut() {
            *v *= 255.0;
        }
    } else {
        let (min, max) = gray
            .iter()
            .fold((f32::MAX, f32::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let range = max - min;
        for v in gray.iter_mut() {
            *v = if range > f32::EPSILON {
                (*v - min) / range * 255.0
            } else {
                0.0
            };
        }
    }

    let alpha = color_type.has_alpha().then(|| {
        GrayImage::from_fn(width, height, |x, y| {
            Luma([if rgba.get_pixel(x, y)[3] > 0.0 { 255 } else { 0 }])
        })
    });

    let color = color_type.has_color().then(|| img.to_rgb32f());

    LoadedImage { gray, color, alpha }
}

/// Validate that image has reasonable dimensions
pub fn validate_image_size(image: &GrayF32) -> crate::Result<()> {
    validate_image_size_with_limits(image, 8, 1 << 16)
}

pub fn validate_image_size_with_limits(
    image: &GrayF32,
    min_size: u32,
    max_size: u32,
) -> crate::Result<()> {
    let (width, height) = image.dimensions();

    if width < min_size || height < min_size {
        return Err(anyhow::anyhow!(
            "Image too small: {}x{}, minimum: {}x{}",
            width,
            height,
            min_size,
            min_size
        ));
    }

    if width > max_size || height > max_size {
        return Err(anyhow::anyhow!(
            "Image too large: {}x{}, maximum: {}x{}",
            width,
            height,
            max_size,
            max_size
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, LumaA, Rgb};
    use tempfile::TempDir;

    #[test]
    fn test_eight_bit_gray_keeps_range() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(16, 16, |x, _| Luma([(x * 10) as u8])));
        let loaded = normalize(&img);
        assert!((loaded.gray.get_pixel(3, 0)[0] - 30.0).abs() < 0.01);
        assert!(loaded.alpha.is_none());
        assert!(loaded.color.is_none());
    }

    #[test]
    fn test_sixteen_bit_is_stretched() {
        let img: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(16, 16, |x, _| Luma([1000 + x as u16 * 100]));
        let loaded = normalize(&DynamicImage::ImageLuma16(img));
        assert!(loaded.gray.get_pixel(0, 0)[0].abs() < 0.01);
        assert!((loaded.gray.get_pixel(15, 0)[0] - 255.0).abs() < 0.01);
    }

    #[test]
    fn test_alpha_becomes_mask() {
        let img: ImageBuffer<LumaA<u8>, Vec<u8>> =
            ImageBuffer::from_fn(10, 10, |x, _| LumaA([100, if x < 5 { 0 } else { 255 }]));
        let loaded = normalize(&DynamicImage::ImageLumaA8(img));
        let alpha = loaded.alpha.unwrap();
        assert_eq!(alpha.get_pixel(2, 2)[0], 0);
        assert_eq!(alpha.get_pixel(7, 2)[0], 255);
    }

    #[test]
    fn test_color_is_kept() {
        let img = ImageBuffer::from_fn(12, 12, |_, _| Rgb([10u8, 20, 200]));
        let loaded = normalize(&DynamicImage::ImageRgb8(img));
        assert!(loaded.color.is_some());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(FileImageSource.load(&dir.path().join("none.png")).is_err());
    }

    #[test]
    fn test_tiny_image_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tiny.png");
        GrayImage::new(4, 4).save(&path).unwrap();
        assert!(FileImageSource.load(&path).is_err());
    }
}
