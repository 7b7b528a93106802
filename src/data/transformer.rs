//! Resampling of detection buffers: half-resolution downscale and rendering
//! of wide lenses onto the stereographic canvas.

use super::GrayF32;
use crate::geometry::{Lens, StereographicCanvas};
use image::{GrayImage, ImageBuffer, Luma};

/// Average 2x2 blocks. Odd trailing rows and columns are dropped.
pub fn downscale_half(image: &GrayF32) -> GrayF32 {
    let width = (image.width() / 2).max(1);
    let height = (image.height() / 2).max(1);
    ImageBuffer::from_fn(width, height, |x, y| {
        let x0 = (2 * x).min(image.width() - 1);
        let y0 = (2 * y).min(image.height() - 1);
        let x1 = (x0 + 1).min(image.width() - 1);
        let y1 = (y0 + 1).min(image.height() - 1);
        let sum = image.get_pixel(x0, y0)[0]
            + image.get_pixel(x1, y0)[0]
            + image.get_pixel(x0, y1)[0]
            + image.get_pixel(x1, y1)[0];
        Luma([sum / 4.0])
    })
}

/// Halve a validity mask. A block stays valid only if all four pixels are.
pub fn downscale_mask_half(mask: &GrayImage) -> GrayImage {
    let width = (mask.width() / 2).max(1);
    let height = (mask.height() / 2).max(1);
    GrayImage::from_fn(width, height, |x, y| {
        let x0 = (2 * x).min(mask.width() - 1);
        let y0 = (2 * y).min(mask.height() - 1);
        let x1 = (x0 + 1).min(mask.width() - 1);
        let y1 = (y0 + 1).min(mask.height() - 1);
        let valid = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)]
            .iter()
            .all(|&(px, py)| mask.get_pixel(px, py)[0] > 0);
        Luma([if valid { 255 } else { 0 }])
    })
}

/// Bilinear sample, `None` outside the image.
pub fn bilinear_interpolate(image: &GrayF32, x: f64, y: f64) -> Option<f32> {
    let width = image.width();
    let height = image.height();

    if x < 0.0 || y < 0.0 || x > (width - 1) as f64 || y > (height - 1) as f64 {
        return None;
    }

    let x1 = x.floor() as u32;
    let y1 = y.floor() as u32;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);

    let fx = (x - x1 as f64) as f32;
    let fy = (y - y1 as f64) as f32;

    let p11 = image.get_pixel(x1, y1)[0];
    let p12 = image.get_pixel(x1, y2)[0];
    let p21 = image.get_pixel(x2, y1)[0];
    let p22 = image.get_pixel(x2, y2)[0];

    Some(
        p11 * (1.0 - fx) * (1.0 - fy)
            + p21 * fx * (1.0 - fy)
            + p12 * (1.0 - fx) * fy
            + p22 * fx * fy,
    )
}

/// Render the canvas region of interest from the source buffer.
///
/// Returns the canvas buffer and a mask that is zero wherever the canvas
/// pixel has no valid source pixel behind it.
pub fn remap_to_canvas(
    source: &GrayF32,
    source_mask: Option<&GrayImage>,
    lens: &Lens,
    canvas: &StereographicCanvas,
) -> (GrayF32, GrayImage) {
    let width = canvas.roi.width;
    let height = canvas.roi.height;
    let mut buffer: GrayF32 = ImageBuffer::new(width, height);
    let mut mask = GrayImage::new(width, height);

    // lens dimensions may differ from the decoded buffer when the project is stale
    let sx = source.width() as f64 / lens.width as f64;
    let sy = source.height() as f64 / lens.height as f64;

    for y in 0..height {
        for x in 0..width {
            let Some((u, v)) = canvas.roi_to_source(lens, x as f64, y as f64) else {
                continue;
            };
            let (u, v) = (u * sx, v * sy);
            let Some(value) = bilinear_interpolate(source, u, v) else {
                continue;
            };
            if let Some(m) = source_mask {
                if m.get_pixel(u.round() as u32, v.round() as u32)[0] == 0 {
                    continue;
                }
            }
            buffer.put_pixel(x, y, Luma([value]));
            mask.put_pixel(x, y, Luma([255]));
        }
    }

    (buffer, mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Projection;

    #[test]
    fn test_downscale_averages_blocks() {
        let img: GrayF32 = ImageBuffer::from_fn(5, 4, |x, y| Luma([(x + 10 * y) as f32]));
        let half = downscale_half(&img);
        assert_eq!(half.dimensions(), (2, 2));
        // (0 + 1 + 10 + 11) / 4
        assert!((half.get_pixel(0, 0)[0] - 5.5).abs() < 1e-6);
    }

    #[test]
    fn test_mask_downscale_is_conservative() {
        let mut mask = GrayImage::from_pixel(4, 4, Luma([255]));
        mask.put_pixel(3, 0, Luma([0]));
        let half = downscale_mask_half(&mask);
        assert_eq!(half.get_pixel(0, 0)[0], 255);
        assert_eq!(half.get_pixel(1, 0)[0], 0);
    }

    #[test]
    fn test_bilinear_midpoint() {
        let img: GrayF32 = ImageBuffer::from_fn(2, 2, |x, _| Luma([x as f32 * 100.0]));
        assert!((bilinear_interpolate(&img, 0.5, 0.5).unwrap() - 50.0).abs() < 1e-4);
        assert!(bilinear_interpolate(&img, -0.1, 0.0).is_none());
        assert!(bilinear_interpolate(&img, 1.5, 0.0).is_none());
    }

    #[test]
    fn test_remap_covers_canvas_centre() {
        let lens = Lens::new(Projection::FullFrameFisheye, 120.0, 200, 150);
        let canvas = StereographicCanvas::fit(&lens, 100, 100).unwrap();
        let source: GrayF32 = ImageBuffer::from_pixel(200, 150, Luma([80.0]));
        let (buffer, mask) = remap_to_canvas(&source, None, &lens, &canvas);
        assert_eq!(buffer.dimensions(), (canvas.roi.width, canvas.roi.height));
        let (cx, cy) = (canvas.roi.width / 2, canvas.roi.height / 2);
        assert_eq!(mask.get_pixel(cx, cy)[0], 255);
        assert!((buffer.get_pixel(cx, cy)[0] - 80.0).abs() < 1e-3);
    }
}
