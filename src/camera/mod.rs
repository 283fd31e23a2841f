//! Camera models used to turn detection pixels into viewing rays.
//!
//! Every model implements the [`CameraModel`] trait, which bundles the
//! forward lens model ([`CameraModel::distort`]), its bounded iterative
//! inverse ([`CameraModel::undistort`]) and the pinhole back-projection that
//! produces a unit ray in the camera frame ([`CameraModel::pixel_to_ray`]).
//!
//! The camera frame follows the usual computer-vision convention: `+x`
//! points to the image right, `+y` to the image bottom and `+z` forward
//! along the optical axis.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::{fs, io::Write};
use yaml_rust::{Yaml, YamlLoader};

pub mod abc;
pub mod pinhole;
pub mod rad_tan;

pub use abc::AbcModel;
pub use pinhole::PinholeModel;
pub use rad_tan::RadTanModel;

/// Hard upper bound for [`UndistortionSettings::max_iterations`].
pub const MAX_ITERATIONS_CAP: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Principal point ({cx}, {cy}) lies outside the {width}x{height} image")]
    PrincipalPointOutsideImage {
        cx: f64,
        cy: f64,
        width: u32,
        height: u32,
    },
    #[error("Resolution must be non-zero, got {width}x{height}")]
    InvalidResolution { width: u32, height: u32 },
    #[error("Pixel ({x}, {y}) does not map to a forward-looking ray")]
    DegenerateRay { x: f64, y: f64 },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CameraModelError {
    fn from(err: serde_yaml::Error) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

/// Stopping criteria for the iterative inversion of a lens model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UndistortionSettings {
    /// Maximum reprojection residual, in pixels, accepted as converged.
    pub tolerance_px: f64,
    /// Iteration cap. Never larger than [`MAX_ITERATIONS_CAP`] after validation.
    pub max_iterations: u32,
}

impl Default for UndistortionSettings {
    fn default() -> Self {
        Self {
            tolerance_px: 1e-3,
            max_iterations: 20,
        }
    }
}

impl UndistortionSettings {
    pub fn validate(&self) -> Result<(), CameraModelError> {
        if !(self.tolerance_px.is_finite() && self.tolerance_px > 0.0) {
            return Err(CameraModelError::InvalidParams(format!(
                "undistortion tolerance must be positive, got {}",
                self.tolerance_px
            )));
        }
        if self.max_iterations == 0 || self.max_iterations > MAX_ITERATIONS_CAP {
            return Err(CameraModelError::InvalidParams(format!(
                "undistortion max_iterations must be in 1..={}, got {}",
                MAX_ITERATIONS_CAP, self.max_iterations
            )));
        }
        Ok(())
    }
}

/// Outcome of inverting a lens model for a single normalized point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Undistortion {
    /// Undistorted normalized image coordinates.
    pub point: Vector2<f64>,
    /// `false` when the iteration cap was hit and `point` is the best
    /// approximation seen so far.
    pub converged: bool,
    pub iterations: u32,
    /// Distance in pixels between `distort(point)` and the input.
    pub residual_px: f64,
}

impl Undistortion {
    /// Identity result for models without distortion.
    pub fn exact(point: Vector2<f64>) -> Self {
        Self {
            point,
            converged: true,
            iterations: 0,
            residual_px: 0.0,
        }
    }
}

/// Unit viewing ray for one pixel, expressed in the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraRay {
    pub direction: Vector3<f64>,
    pub converged: bool,
    pub iterations: u32,
    pub residual_px: f64,
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Apply the lens model to undistorted normalized coordinates.
    fn distort(&self, point: &Vector2<f64>) -> Vector2<f64>;

    /// Invert [`CameraModel::distort`] for distorted normalized coordinates.
    ///
    /// Implementations must stop after `settings.max_iterations` steps and
    /// report non-convergence through [`Undistortion::converged`] instead of
    /// failing.
    fn undistort(&self, distorted: &Vector2<f64>, settings: &UndistortionSettings)
        -> Undistortion;

    /// Load camera parameters from a YAML file
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    /// Save camera parameters to a YAML file
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_resolution(&self) -> Resolution;

    /// Distortion coefficients in the order used by the YAML `distortion` list.
    fn get_distortion(&self) -> Vec<f64>;

    /// Project a 3D point in camera coordinates to pixel coordinates.
    ///
    /// No image bounds check is performed; detections may touch or cross the
    /// frame border.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let intrinsics = self.get_intrinsics();
        let distorted = self.distort(&Vector2::new(
            point_3d.x / point_3d.z,
            point_3d.y / point_3d.z,
        ));
        Ok(Vector2::new(
            intrinsics.fx * distorted.x + intrinsics.cx,
            intrinsics.fy * distorted.y + intrinsics.cy,
        ))
    }

    /// Back-project a pixel to a unit ray in the camera frame.
    ///
    /// Pixels outside the image are accepted. A ray that is not finite or has
    /// no forward component is rejected with [`CameraModelError::DegenerateRay`].
    fn pixel_to_ray(
        &self,
        pixel: &Vector2<f64>,
        settings: &UndistortionSettings,
    ) -> Result<CameraRay, CameraModelError> {
        let intrinsics = self.get_intrinsics();
        let distorted = Vector2::new(
            (pixel.x - intrinsics.cx) / intrinsics.fx,
            (pixel.y - intrinsics.cy) / intrinsics.fy,
        );
        let undistortion = self.undistort(&distorted, settings);

        let ray = Vector3::new(undistortion.point.x, undistortion.point.y, 1.0);
        let norm = ray.norm();
        if !norm.is_finite() || norm < f64::EPSILON {
            return Err(CameraModelError::DegenerateRay {
                x: pixel.x,
                y: pixel.y,
            });
        }
        let direction = ray / norm;
        if direction.z <= 0.0 {
            return Err(CameraModelError::DegenerateRay {
                x: pixel.x,
                y: pixel.y,
            });
        }

        Ok(CameraRay {
            direction,
            converged: undistortion.converged,
            iterations: undistortion.iterations,
            residual_px: undistortion.residual_px,
        })
    }

    /// Unproject 2D image coordinates to a unit 3D ray with default settings.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        self.pixel_to_ray(point_2d, &UndistortionSettings::default())
            .map(|ray| ray.direction)
    }
}

/// Any of the supported camera models, selected at configuration time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "snake_case")]
pub enum CameraModelEnum {
    Pinhole(PinholeModel),
    RadTan(RadTanModel),
    Abc(AbcModel),
}

impl CameraModelEnum {
    pub fn name(&self) -> &'static str {
        match self {
            CameraModelEnum::Pinhole(_) => "pinhole",
            CameraModelEnum::RadTan(_) => "rad_tan",
            CameraModelEnum::Abc(_) => "abc",
        }
    }

    /// Builds the model named by `camera_model` from the `cam0` layout.
    pub(crate) fn from_kalibr(file: KalibrCamera) -> Result<Self, CameraModelError> {
        match file.camera_model.as_str() {
            "pinhole" => PinholeModel::from_kalibr(file).map(CameraModelEnum::Pinhole),
            "rad_tan" | "radtan" => RadTanModel::from_kalibr(file).map(CameraModelEnum::RadTan),
            "abc" => AbcModel::from_kalibr(file).map(CameraModelEnum::Abc),
            other => Err(CameraModelError::InvalidParams(format!(
                "Unsupported camera model '{other}'"
            ))),
        }
    }

    fn as_model(&self) -> &dyn CameraModel {
        match self {
            CameraModelEnum::Pinhole(model) => model,
            CameraModelEnum::RadTan(model) => model,
            CameraModelEnum::Abc(model) => model,
        }
    }
}

impl CameraModel for CameraModelEnum {
    fn distort(&self, point: &Vector2<f64>) -> Vector2<f64> {
        self.as_model().distort(point)
    }

    fn undistort(
        &self,
        distorted: &Vector2<f64>,
        settings: &UndistortionSettings,
    ) -> Undistortion {
        self.as_model().undistort(distorted, settings)
    }

    /// Loads whichever model the file's `camera_model` entry names.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let file = KalibrCamera::read(path)?;
        Self::from_kalibr(file).map_err(|err| match err {
            CameraModelError::InvalidParams(msg) => {
                CameraModelError::InvalidParams(format!("{msg} in {path}"))
            }
            other => other,
        })
    }

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        self.as_model().save_to_yaml(path)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        self.as_model().validate_params()
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.as_model().get_intrinsics()
    }

    fn get_resolution(&self) -> Resolution {
        self.as_model().get_resolution()
    }

    fn get_distortion(&self) -> Vec<f64> {
        self.as_model().get_distortion()
    }
}

/// Reprojection distance in pixels between two normalized points.
pub(crate) fn residual_px(intrinsics: &Intrinsics, a: &Vector2<f64>, b: &Vector2<f64>) -> f64 {
    ((a.x - b.x) * intrinsics.fx).hypot((a.y - b.y) * intrinsics.fy)
}

/// Bounded fixed-point inversion shared by the distorting models.
///
/// Starts from the distorted point, applies `step` until the reprojection
/// residual drops below the tolerance, and otherwise returns the iterate with
/// the smallest residual (the distorted point itself if nothing improved).
pub(crate) fn invert_fixed_point<D, S>(
    intrinsics: &Intrinsics,
    distorted: &Vector2<f64>,
    settings: &UndistortionSettings,
    distort: D,
    step: S,
) -> Undistortion
where
    D: Fn(&Vector2<f64>) -> Vector2<f64>,
    S: Fn(&Vector2<f64>) -> Option<Vector2<f64>>,
{
    let mut point = *distorted;
    let mut best = Undistortion {
        point,
        converged: false,
        iterations: 0,
        residual_px: residual_px(intrinsics, &distort(&point), distorted),
    };
    if best.residual_px <= settings.tolerance_px {
        best.converged = true;
        return best;
    }

    for iteration in 1..=settings.max_iterations {
        point = match step(&point) {
            Some(next) if next.x.is_finite() && next.y.is_finite() => next,
            _ => break,
        };
        let residual = residual_px(intrinsics, &distort(&point), distorted);
        if !residual.is_finite() {
            break;
        }
        if residual < best.residual_px {
            best = Undistortion {
                point,
                converged: false,
                iterations: iteration,
                residual_px: residual,
            };
        }
        if residual <= settings.tolerance_px {
            best.converged = true;
            return best;
        }
    }

    best
}

/// Contents of a `cam0` camera file.
#[derive(Debug, Clone)]
pub(crate) struct KalibrCamera {
    pub camera_model: String,
    pub intrinsics: Intrinsics,
    pub resolution: Resolution,
    pub distortion: Vec<f64>,
    pub tangential_scale: Vec<f64>,
}

impl KalibrCamera {
    pub fn read(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, CameraModelError> {
        let docs = YamlLoader::load_from_str(contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;
        let cam = &doc["cam0"];

        let camera_model = cam["camera_model"]
            .as_str()
            .ok_or_else(|| CameraModelError::InvalidParams("Missing camera_model".to_string()))?
            .to_string();

        let intrinsics_yaml = float_list(&cam["intrinsics"], "intrinsics")?;
        if intrinsics_yaml.len() != 4 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 4 intrinsics [fx, fy, cx, cy], found {}",
                intrinsics_yaml.len()
            )));
        }
        let intrinsics = Intrinsics {
            fx: intrinsics_yaml[0],
            fy: intrinsics_yaml[1],
            cx: intrinsics_yaml[2],
            cy: intrinsics_yaml[3],
        };

        let resolution_yaml = cam["resolution"]
            .as_vec()
            .ok_or_else(|| CameraModelError::InvalidParams("Invalid resolution".to_string()))?;
        if resolution_yaml.len() != 2 {
            return Err(CameraModelError::InvalidParams(
                "Resolution must be [width, height]".to_string(),
            ));
        }
        let dimension = |value: &Yaml, name: &str| -> Result<u32, CameraModelError> {
            value
                .as_i64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| CameraModelError::InvalidParams(format!("Invalid {name}")))
        };
        let resolution = Resolution {
            width: dimension(&resolution_yaml[0], "width")?,
            height: dimension(&resolution_yaml[1], "height")?,
        };

        let distortion = match &cam["distortion"] {
            Yaml::BadValue => Vec::new(),
            node => float_list(node, "distortion")?,
        };
        let tangential_scale = match &cam["tangential_scale"] {
            Yaml::BadValue => Vec::new(),
            node => float_list(node, "tangential_scale")?,
        };

        Ok(Self {
            camera_model,
            intrinsics,
            resolution,
            distortion,
            tangential_scale,
        })
    }

    pub fn write(&self, path: &str) -> Result<(), CameraModelError> {
        let mut cam0 = serde_yaml::Mapping::new();
        cam0.insert("camera_model".into(), self.camera_model.clone().into());
        cam0.insert(
            "intrinsics".into(),
            serde_yaml::to_value(vec![
                self.intrinsics.fx,
                self.intrinsics.fy,
                self.intrinsics.cx,
                self.intrinsics.cy,
            ])?,
        );
        cam0.insert(
            "distortion".into(),
            serde_yaml::to_value(&self.distortion)?,
        );
        if !self.tangential_scale.is_empty() {
            cam0.insert(
                "tangential_scale".into(),
                serde_yaml::to_value(&self.tangential_scale)?,
            );
        }
        cam0.insert(
            "resolution".into(),
            serde_yaml::to_value(vec![self.resolution.width, self.resolution.height])?,
        );

        let mut root = serde_yaml::Mapping::new();
        root.insert("cam0".into(), serde_yaml::Value::Mapping(cam0));
        let yaml_string = serde_yaml::to_string(&root)?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }
}

fn float_list(node: &Yaml, name: &str) -> Result<Vec<f64>, CameraModelError> {
    let items = node
        .as_vec()
        .ok_or_else(|| CameraModelError::InvalidParams(format!("Invalid {name}")))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            // yaml-rust keeps `0` and `1` as integers
            item.as_f64()
                .or_else(|| item.as_i64().map(|v| v as f64))
                .ok_or_else(|| {
                    CameraModelError::InvalidParams(format!("Invalid {name} entry at index {i}"))
                })
        })
        .collect()
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0)
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    /// Checks the resolution and that the principal point lies on the sensor.
    pub fn validate_image(
        intrinsics: &Intrinsics,
        resolution: &Resolution,
    ) -> Result<(), CameraModelError> {
        if resolution.width == 0 || resolution.height == 0 {
            return Err(CameraModelError::InvalidResolution {
                width: resolution.width,
                height: resolution.height,
            });
        }
        let inside_x = (0.0..=resolution.width as f64).contains(&intrinsics.cx);
        let inside_y = (0.0..=resolution.height as f64).contains(&intrinsics.cy);
        if !inside_x || !inside_y {
            return Err(CameraModelError::PrincipalPointOutsideImage {
                cx: intrinsics.cx,
                cy: intrinsics.cy,
                width: resolution.width,
                height: resolution.height,
            });
        }
        Ok(())
    }

    pub fn validate_coefficients(name: &str, coefficients: &[f64]) -> Result<(), CameraModelError> {
        if let Some(i) = coefficients.iter().position(|c| !c.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "{name} coefficient at index {i} is not finite"
            )));
        }
        Ok(())
    }
}
