//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct for an ideal camera without
//! lens distortion. Back-projection is exact, so the undistortion step never
//! iterates.

use crate::camera::{
    validation, CameraModel, CameraModelError, Intrinsics, KalibrCamera, Resolution,
    Undistortion, UndistortionSettings,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Represents a Pinhole camera model.
///
/// # Examples
///
/// ```rust
/// use geomapper::camera::pinhole::PinholeModel;
/// use geomapper::camera::{CameraModel, Intrinsics, Resolution};
/// use nalgebra::Vector2;
///
/// let model = PinholeModel::new(
///     Intrinsics { fx: 500.0, fy: 500.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
/// )
/// .unwrap();
///
/// let ray = model.unproject(&Vector2::new(320.0, 240.0)).unwrap();
/// assert!((ray.z - 1.0).abs() < 1e-12);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] and validates its parameters.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidResolution`]
    /// * [`CameraModelError::PrincipalPointOutsideImage`]
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };
        model.validate_params()?;
        Ok(model)
    }

    pub(crate) fn from_kalibr(file: KalibrCamera) -> Result<Self, CameraModelError> {
        if !file.distortion.iter().all(|c| *c == 0.0) {
            return Err(CameraModelError::InvalidParams(
                "Pinhole model does not take distortion coefficients".to_string(),
            ));
        }
        Self::new(file.intrinsics, file.resolution)
    }
}

impl CameraModel for PinholeModel {
    fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        *point
    }

    fn undistort(
        &self,
        distorted: &Vector2<f64>,
        _settings: &UndistortionSettings,
    ) -> Undistortion {
        Undistortion::exact(*distorted)
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        Self::from_kalibr(KalibrCamera::read(path)?)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        KalibrCamera {
            camera_model: "pinhole".to_string(),
            intrinsics: self.intrinsics,
            resolution: self.resolution,
            distortion: Vec::new(),
            tangential_scale: Vec::new(),
        }
        .write(path)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_image(&self.intrinsics, &self.resolution)
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_distortion(&self) -> Vec<f64> {
        Vec::new()
    }
}
