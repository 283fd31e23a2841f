//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This module provides the [`RadTanModel`] struct, a Brown-Conrady lens model
//! with an arbitrary number of radial terms and the usual two tangential terms,
//! optionally scaled by further tangential coefficients. It adheres to the
//! [`CameraModel`] trait defined in the parent `camera` module ([`crate::camera`]).

use crate::camera::{
    invert_fixed_point, validation, CameraModel, CameraModelError, Intrinsics, KalibrCamera,
    Resolution, Undistortion, UndistortionSettings,
};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// For undistorted normalized coordinates `(x, y)` with `r² = x² + y²`:
///
/// * radial factor: `1 + k1·r² + k2·r⁴ + … + kn·r²ⁿ`
/// * tangential offset: `(2·p1·x·y + p2·(r² + 2x²), p1·(r² + 2y²) + 2·p2·x·y)`,
///   multiplied by `1 + p3·r² + p4·r⁴ + …` when more than two tangential
///   coefficients are given.
///
/// # Examples
///
/// ```rust
/// use geomapper::camera::rad_tan::RadTanModel;
/// use geomapper::camera::{CameraModel, Intrinsics, Resolution};
///
/// let model = RadTanModel::new(
///     Intrinsics { fx: 460.0, fy: 460.0, cx: 320.0, cy: 240.0 },
///     Resolution { width: 640, height: 480 },
///     vec![-0.28, 0.07],
///     vec![0.0002, 0.00002],
/// )
/// .unwrap();
///
/// assert_eq!(model.get_distortion(), vec![-0.28, 0.07, 0.0002, 0.00002]);
/// ```
#[derive(Clone, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// Radial coefficients `k1..kn`.
    #[serde(default)]
    pub radial: Vec<f64>,
    /// Tangential coefficients `p1..pn`. Either empty or at least `p1, p2`.
    #[serde(default)]
    pub tangential: Vec<f64>,
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`] and validates its parameters.
    ///
    /// # Errors
    ///
    /// Returns a [`CameraModelError`] for invalid intrinsics or resolution, for
    /// non-finite coefficients, or when exactly one tangential coefficient is given.
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        radial: Vec<f64>,
        tangential: Vec<f64>,
    ) -> Result<Self, CameraModelError> {
        let model = RadTanModel {
            intrinsics,
            resolution,
            radial,
            tangential,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Builds the model from a `cam0` file whose `distortion` list is laid out
    /// as `[k1, k2, p1, p2, k3, …, kn]`.
    pub(crate) fn from_kalibr(file: KalibrCamera) -> Result<Self, CameraModelError> {
        let d = &file.distortion;
        if d.len() < 4 {
            return Err(CameraModelError::InvalidParams(format!(
                "RadTan model requires at least 4 distortion parameters [k1, k2, p1, p2], found {}",
                d.len()
            )));
        }
        let mut radial = vec![d[0], d[1]];
        radial.extend_from_slice(&d[4..]);
        let mut tangential = vec![d[2], d[3]];
        tangential.extend_from_slice(&file.tangential_scale);

        Self::new(file.intrinsics, file.resolution, radial, tangential)
    }

    fn p1_p2(&self) -> (f64, f64) {
        match self.tangential.as_slice() {
            [p1, p2, ..] => (*p1, *p2),
            _ => (0.0, 0.0),
        }
    }

    fn radial_factor(&self, r2: f64) -> f64 {
        1.0 + r2 * horner(&self.radial, r2)
    }

    fn tangential_factor(&self, r2: f64) -> f64 {
        let extra = self.tangential.get(2..).unwrap_or(&[]);
        1.0 + r2 * horner(extra, r2)
    }

    fn tangential_offset(&self, x: f64, y: f64) -> Vector2<f64> {
        let (p1, p2) = self.p1_p2();
        let r2 = x * x + y * y;
        let scale = self.tangential_factor(r2);
        Vector2::new(
            (2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x)) * scale,
            (p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y) * scale,
        )
    }
}

/// `c0 + c1·t + c2·t² + …`
fn horner(coefficients: &[f64], t: f64) -> f64 {
    coefficients.iter().rev().fold(0.0, |acc, c| acc * t + c)
}

/// Provides a debug string representation for [`RadTanModel`].
impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} radial: {:?} tangential: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.radial,
            self.tangential,
        )
    }
}

impl CameraModel for RadTanModel {
    fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let r2 = point.norm_squared();
        point * self.radial_factor(r2) + self.tangential_offset(point.x, point.y)
    }

    /// Inverts the lens model with the classic fixed-point scheme
    /// `p ← (p_d − tangential(p)) / radial(p)`.
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
                let radial = self.radial_factor(p.norm_squared());
                if radial.abs() < f64::EPSILON {
                    return None;
                }
                Some((distorted - self.tangential_offset(p.x, p.y)) / radial)
            },
        )
    }

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        Self::from_kalibr(KalibrCamera::read(path)?)
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        KalibrCamera {
            camera_model: "rad_tan".to_string(),
            intrinsics: self.intrinsics,
            resolution: self.resolution,
            distortion: self.get_distortion(),
            tangential_scale: self.tangential.get(2..).unwrap_or(&[]).to_vec(),
        }
        .write(path)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        validation::validate_image(&self.intrinsics, &self.resolution)?;
        validation::validate_coefficients("radial", &self.radial)?;
        validation::validate_coefficients("tangential", &self.tangential)?;
        if self.tangential.len() == 1 {
            return Err(CameraModelError::InvalidParams(
                "RadTan model requires both p1 and p2 when tangential distortion is set"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    /// Returns `[k1, k2, p1, p2, k3, …, kn]`; missing leading terms are zero.
    fn get_distortion(&self) -> Vec<f64> {
        let k = |i: usize| self.radial.get(i).copied().unwrap_or(0.0);
        let (p1, p2) = self.p1_p2();
        let mut distortion = vec![k(0), k(1), p1, p2];
        distortion.extend(self.radial.iter().skip(2));
        distortion
    }
}
