//! Implements the a/b/c radial lens model popularised by panorama stitchers.
//!
//! The radius is measured from the principal point in pixels and normalized by
//! half of the shorter image side. An undistorted radius `R` is mapped to the
//! distorted radius `R · (a·R³ + b·R² + c·R + d)` with `d = 1 − a − b − c`, so
//! the scale is exactly 1 at `R = 1` whatever the coefficients.

use crate::camera::{
    invert_fixed_point, validation, CameraModel, CameraModelError, Intrinsics, KalibrCamera,
    Resolution, Undistortion, UndistortionSettings,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbcModel {
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl AbcModel {
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        a: f64,
        b: f64,
        c: f64,
    ) -> Result<Self, CameraModelError> {
        let model = AbcModel {
            intrinsics,
            resolution,
            a,
            b,
            c,
        };
        model.validate_params()?;
        Ok(model)
    }

    pub(crate) fn from_kalibr(file: KalibrCamera) -> Result<Self, CameraModelError> {
        match file.distortion.as_slice() {
            [a, b, c] => Self::new(file.intrinsics, file.resolution, *a, *b, *c),
            other => Err(CameraModelError::InvalidParams(format!(
                "ABC model requires 3 distortion parameters [a, b, c], found {}",
                other.len()
            ))),
        }
    }

    fn half_short_side(&self) -> f64 {
        self.resolution.width.min(self.resolution.height) as f64 / 2.0
    }

    /// Normalized radius of a point given in normalized camera coordinates.
    fn radius(&self, point: &Vector2<f64>) -> f64 {
        (point.x * self.intrinsics.fx).hypot(point.y * self.intrinsics.fy) / self.half_short_side()
    }

    fn scale(&self, radius: f64) -> f64 {
        let d = 1.0 - self.a - self.b - self.c;
        ((self.a * radius + self.b) * radius + self.c) * radius + d
    }
}

impl CameraModel for AbcModel {
    fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        point * self.scale(self.radius(point))
    }

    fn undistort(
        &self,
        distorted: &Vector2<f64>,
        settings: &UndistortionSettings,
    ) -> Undistortion {
        invert_fixed_point(
            &self.intrinsics,
            distorted,
            settings,
            |p| self.distort(p),
            |p| {
                let scale = self.scale(self.radius(p));
                if scale.abs() < f64::EPSILON {
                    return None;
                }
                Some(distorted / scale)
            },
        )
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        Self::from_kalibr(KalibrCamera::read(path)?)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        KalibrCamera {
            camera_model: "abc".to_string(),
            intrinsics: self.intrinsics,
            resolution: self.resolution,
            distortion: self.get_distortion(),
            tangential_scale: Vec::new(),
        }
        .write(path)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_image(&self.intrinsics, &self.resolution)?;
        validation::validate_coefficients("abc", &[self.a, self.b, self.c])
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        vec![self.a, self.b, self.c]
    }
}
