//! Lens projections and camera orientation.
//!
//! Camera frame: x right, y down, z along the optical axis. A ray is a unit
//! vector in that frame; the world frame is the camera frame rotated by
//! yaw (about y), pitch (about x) and roll (about z).

pub mod remap;

use nalgebra::{Rotation3, Vector3};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

pub use remap::{Roi, StereographicCanvas};

/// Source image projections, numbered as in project files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    Rectilinear,
    Cylindrical,
    CircularFisheye,
    FullFrameFisheye,
    Equirectangular,
    Orthographic,
    Stereographic,
    Equisolid,
}

impl Projection {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Projection::Rectilinear,
            1 => Projection::Cylindrical,
            2 => Projection::CircularFisheye,
            3 => Projection::FullFrameFisheye,
            4 => Projection::Equirectangular,
            8 => Projection::Orthographic,
            10 => Projection::Stereographic,
            19 => Projection::Equisolid,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            Projection::Rectilinear => 0,
            Projection::Cylindrical => 1,
            Projection::CircularFisheye => 2,
            Projection::FullFrameFisheye => 3,
            Projection::Equirectangular => 4,
            Projection::Orthographic => 8,
            Projection::Stereographic => 10,
            Projection::Equisolid => 19,
        }
    }

    fn is_radial(self) -> bool {
        !matches!(self, Projection::Cylindrical | Projection::Equirectangular)
    }

    /// Image radius (in focal lengths) for an off-axis angle.
    fn theta_to_r(self, theta: f64) -> Option<f64> {
        match self {
            Projection::Rectilinear => (theta < PI / 2.0 - 1e-9).then(|| theta.tan()),
            Projection::CircularFisheye | Projection::FullFrameFisheye => Some(theta),
            Projection::Orthographic => (theta <= PI / 2.0).then(|| theta.sin()),
            Projection::Stereographic => (theta < PI - 1e-9).then(|| 2.0 * (theta / 2.0).tan()),
            Projection::Equisolid => Some(2.0 * (theta / 2.0).sin()),
            Projection::Cylindrical | Projection::Equirectangular => None,
        }
    }

    fn r_to_theta(self, r: f64) -> Option<f64> {
        match self {
            Projection::Rectilinear => Some(r.atan()),
            Projection::CircularFisheye | Projection::FullFrameFisheye => (r <= PI).then_some(r),
            Projection::Orthographic => (r <= 1.0).then(|| r.asin()),
            Projection::Stereographic => Some(2.0 * (r / 2.0).atan()),
            Projection::Equisolid => (r <= 2.0).then(|| 2.0 * (r / 2.0).asin()),
            Projection::Cylindrical | Projection::Equirectangular => None,
        }
    }
}

/// Intrinsics of one source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lens {
    pub projection: Projection,
    /// Horizontal field of view in degrees
    pub hfov: f64,
    pub width: u32,
    pub height: u32,
    /// Radial distortion coefficient, `r_src = r * (b * r^2 + 1 - b)`
    pub b: f64,
}

impl Lens {
    pub fn new(projection: Projection, hfov: f64, width: u32, height: u32) -> Self {
        Self {
            projection,
            hfov,
            width,
            height,
            b: 0.0,
        }
    }

    /// Focal length in pixels.
    pub fn focal(&self) -> f64 {
        let half_width = self.width as f64 / 2.0;
        let half_angle = (self.hfov.to_radians() / 2.0).min(PI);
        let r = match self.projection {
            Projection::Cylindrical | Projection::Equirectangular => half_angle,
            p => p.theta_to_r(half_angle).unwrap_or(half_angle),
        };
        if r.abs() < 1e-12 {
            half_width
        } else {
            half_width / r
        }
    }

    fn centre(&self) -> (f64, f64) {
        (self.width as f64 / 2.0, self.height as f64 / 2.0)
    }

    fn distortion_norm(&self) -> f64 {
        self.width.min(self.height) as f64 / 2.0
    }

    fn distort(&self, r: f64) -> f64 {
        if self.b == 0.0 {
            return r;
        }
        let rn = r / self.distortion_norm();
        r * (self.b * rn * rn + 1.0 - self.b)
    }

    /// Inverse of `distort` by Newton iterations.
    fn undistort(&self, rd: f64) -> f64 {
        if self.b == 0.0 {
            return rd;
        }
        let n = self.distortion_norm();
        let mut r = rd;
        for _ in 0..20 {
            let rn = r / n;
            let f = r * (self.b * rn * rn + 1.0 - self.b) - rd;
            let df = 3.0 * self.b * rn * rn + 1.0 - self.b;
            if df.abs() < 1e-12 {
                break;
            }
            let step = f / df;
            r -= step;
            if step.abs() < 1e-9 {
                break;
            }
        }
        r
    }

    /// Camera-frame unit ray through pixel `(x, y)`.
    pub fn image_to_ray(&self, x: f64, y: f64) -> Option<Vector3<f64>> {
        let (cx, cy) = self.centre();
        let mut dx = x - cx;
        let mut dy = y - cy;
        let rd = (dx * dx + dy * dy).sqrt();
        if rd > 1e-12 && self.b != 0.0 {
            let ru = self.undistort(rd);
            dx *= ru / rd;
            dy *= ru / rd;
        }
        let f = self.focal();

        if self.projection.is_radial() {
            let r = (dx * dx + dy * dy).sqrt();
            if r < 1e-12 {
                return Some(Vector3::new(0.0, 0.0, 1.0));
            }
            let theta = self.projection.r_to_theta(r / f)?;
            let s = theta.sin();
            Some(Vector3::new(s * dx / r, s * dy / r, theta.cos()))
        } else {
            let lon = dx / f;
            let lat = match self.projection {
                Projection::Cylindrical => (dy / f).atan(),
                _ => dy / f,
            };
            if lat.abs() > PI / 2.0 || lon.abs() > PI {
                return None;
            }
            Some(Vector3::new(
                lat.cos() * lon.sin(),
                lat.sin(),
                lat.cos() * lon.cos(),
            ))
        }
    }

    /// Pixel hit by a camera-frame ray, if the projection can represent it.
    pub fn ray_to_image(&self, ray: &Vector3<f64>) -> Option<(f64, f64)> {
        let (cx, cy) = self.centre();
        let f = self.focal();
        let v = ray.normalize();

        let (mut dx, mut dy) = if self.projection.is_radial() {
            let theta = v.z.clamp(-1.0, 1.0).acos();
            let r = f * self.projection.theta_to_r(theta)?;
            let planar = (v.x * v.x + v.y * v.y).sqrt();
            if planar < 1e-12 {
                (0.0, 0.0)
            } else {
                (r * v.x / planar, r * v.y / planar)
            }
        } else {
            let lon = v.x.atan2(v.z);
            let lat = v.y.clamp(-1.0, 1.0).asin();
            let y = match self.projection {
                Projection::Cylindrical => {
                    if lat.abs() >= PI / 2.0 - 1e-9 {
                        return None;
                    }
                    lat.tan()
                }
                _ => lat,
            };
            (f * lon, f * y)
        };

        if self.b != 0.0 {
            let r = (dx * dx + dy * dy).sqrt();
            if r > 1e-12 {
                let rd = self.distort(r);
                dx *= rd / r;
                dy *= rd / r;
            }
        }
        Some((dx + cx, dy + cy))
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= 0.0 && y >= 0.0 && x < self.width as f64 && y < self.height as f64
    }
}

/// Camera orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub yaw: f64,
    pub pitch: f64,
    pub roll: f64,
}

impl Orientation {
    pub fn new(yaw: f64, pitch: f64, roll: f64) -> Self {
        Self { yaw, pitch, roll }
    }

    /// Camera-to-world rotation.
    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::from_axis_angle(&Vector3::y_axis(), self.yaw.to_radians())
            * Rotation3::from_axis_angle(&Vector3::x_axis(), self.pitch.to_radians())
            * Rotation3::from_axis_angle(&Vector3::z_axis(), self.roll.to_radians())
    }

    pub fn from_rotation(rotation: &Rotation3<f64>) -> Self {
        let forward = rotation * Vector3::new(0.0, 0.0, 1.0);
        let pitch = (-forward.y).clamp(-1.0, 1.0).asin();
        let yaw = forward.x.atan2(forward.z);
        let unrolled = Rotation3::from_axis_angle(&Vector3::x_axis(), -pitch)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), -yaw)
            * rotation;
        let m = unrolled.matrix();
        let roll = m[(1, 0)].atan2(m[(0, 0)]);
        Self {
            yaw: yaw.to_degrees(),
            pitch: pitch.to_degrees(),
            roll: roll.to_degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, eps: f64) {
        assert!((a - b).abs() < eps, "{} vs {}", a, b);
    }

    #[test]
    fn test_projection_codes() {
        for code in [0, 1, 2, 3, 4, 8, 10, 19] {
            assert_eq!(Projection::from_code(code).unwrap().code(), code);
        }
        assert!(Projection::from_code(7).is_none());
    }

    #[test]
    fn test_rectilinear_edge_maps_to_half_hfov() {
        let lens = Lens::new(Projection::Rectilinear, 90.0, 1000, 800);
        let ray = lens.image_to_ray(1000.0, 400.0).unwrap();
        assert_close(ray.x.atan2(ray.z).to_degrees(), 45.0, 1e-9);
    }

    #[test]
    fn test_pixel_ray_round_trip_for_every_projection() {
        for projection in [
            Projection::Rectilinear,
            Projection::Cylindrical,
            Projection::CircularFisheye,
            Projection::FullFrameFisheye,
            Projection::Equirectangular,
            Projection::Stereographic,
            Projection::Equisolid,
        ] {
            let mut lens = Lens::new(projection, 100.0, 640, 480);
            lens.b = -0.02;
            for &(x, y) in &[(10.0, 20.0), (320.0, 240.0), (600.5, 470.25)] {
                let ray = lens.image_to_ray(x, y).unwrap();
                let (bx, by) = lens.ray_to_image(&ray).unwrap();
                assert_close(bx, x, 1e-6);
                assert_close(by, y, 1e-6);
            }
        }
    }

    #[test]
    fn test_orientation_conventions() {
        // positive yaw looks right, positive pitch looks up
        let forward = Vector3::new(0.0, 0.0, 1.0);
        let right = Orientation::new(90.0, 0.0, 0.0).rotation() * forward;
        assert_close(right.x, 1.0, 1e-12);
        let up = Orientation::new(0.0, 30.0, 0.0).rotation() * forward;
        assert!(up.y < 0.0);
    }

    #[test]
    fn test_orientation_rotation_round_trip() {
        let o = Orientation::new(-35.0, 20.0, 7.5);
        let back = Orientation::from_rotation(&o.rotation());
        assert_close(back.yaw, o.yaw, 1e-9);
        assert_close(back.pitch, o.pitch, 1e-9);
        assert_close(back.roll, o.roll, 1e-9);
    }
}
