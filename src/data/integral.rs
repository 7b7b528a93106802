use super::GrayF32;

/// Summed-area table with a zero guard row and column.
#[derive(Debug, Clone)]
pub struct IntegralImage {
    width: u32,
    height: u32,
    data: Vec<f64>,
}

impl IntegralImage {
    pub fn from_gray(image: &GrayF32) -> Self {
        let (width, height) = image.dimensions();
        let stride = width as usize + 1;
        let mut data = vec![0.0; stride * (height as usize + 1)];
        for y in 0..height as usize {
            let mut row = 0.0;
            for x in 0..width as usize {
                row += image.get_pixel(x as u32, y as u32)[0] as f64;
                data[(y + 1) * stride + x + 1] = data[y * stride + x + 1] + row;
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn at(&self, x: i64, y: i64) -> f64 {
        let x = x.clamp(0, self.width as i64) as usize;
        let y = y.clamp(0, self.height as i64) as usize;
        self.data[y * (self.width as usize + 1) + x]
    }

    /// Sum over the half-open box `[x0, x1) x [y0, y1)`, clipped to the image.
    pub fn box_sum(&self, x0: i64, y0: i64, x1: i64, y1: i64) -> f64 {
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        self.at(x1, y1) - self.at(x0, y1) - self.at(x1, y0) + self.at(x0, y0)
    }

    /// Horizontal Haar response of side `size` centred on `(x, y)`.
    pub fn haar_x(&self, x: i64, y: i64, size: i64) -> f64 {
        let half = size / 2;
        self.box_sum(x, y - half, x + half, y + half) - self.box_sum(x - half, y - half, x, y + half)
    }

    /// Vertical Haar response of side `size` centred on `(x, y)`.
    pub fn haar_y(&self, x: i64, y: i64, size: i64) -> f64 {
        let half = size / 2;
        self.box_sum(x - half, y, x + half, y + half) - self.box_sum(x - half, y - half, x + half, y)
    }
}
