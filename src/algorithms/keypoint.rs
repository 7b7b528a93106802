/// Oriented interest point with its descriptor.
///
/// Coordinates are in detection-buffer pixels until the remap-back step, and
/// in original image pixels afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Keypoint {
    pub x: f64,
    pub y: f64,
    pub scale: f64,
    /// Radians
    pub orientation: f64,
    /// Detector response, larger is stronger
    pub score: f64,
    /// Sign of the Hessian trace
    pub laplacian: i8,
    pub descriptor: Vec<f32>,
}

impl Keypoint {
    pub fn new(x: f64, y: f64, scale: f64, score: f64) -> Self {
        Self {
            x,
            y,
            scale,
            orientation: 0.0,
            score,
            laplacian: 0,
            descriptor: Vec::new(),
        }
    }

    /// Copy sharing position and scale with a different orientation.
    pub fn with_orientation(&self, orientation: f64) -> Self {
        Self {
            orientation,
            descriptor: Vec::new(),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlPoint {
    pub image1: usize,
    pub x1: f64,
    pub y1: f64,
    pub image2: usize,
    pub x2: f64,
    pub y2: f64,
}

impl ControlPoint {
    /// Same pair and coordinates, in either image order.
    pub fn same_as(&self, other: &ControlPoint) -> bool {
        const EPS: f64 = 1e-6;
        let close = |a: f64, b: f64| (a - b).abs() < EPS;
        let forward = self.image1 == other.image1
            && self.image2 == other.image2
            && close(self.x1, other.x1)
            && close(self.y1, other.y1)
            && close(self.x2, other.x2)
            && close(self.y2, other.y2);
        let reverse = self.image1 == other.image2
            && self.image2 == other.image1
            && close(self.x1, other.x2)
            && close(self.y1, other.y2)
            && close(self.x2, other.x1)
            && close(self.y2, other.y1);
        forward || reverse
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orientation_copy_drops_descriptor() {
        let mut kp = Keypoint::new(1.0, 2.0, 3.0, 4.0);
        kp.descriptor = vec![1.0; 4];
        let other = kp.with_orientation(1.5);
        assert_eq!(other.x, 1.0);
        assert_eq!(other.orientation, 1.5);
        assert!(other.descriptor.is_empty());
    }

    #[test]
    fn test_control_point_identity_ignores_order() {
        let a = ControlPoint { image1: 0, x1: 1.0, y1: 2.0, image2: 1, x2: 3.0, y2: 4.0 };
        let b = ControlPoint { image1: 1, x1: 3.0, y1: 4.0, image2: 0, x2: 1.0, y2: 2.0 };
        assert!(a.same_as(&b));
        let c = ControlPoint { x2: 3.5, ..a };
        assert!(!a.same_as(&c));
    }
}
