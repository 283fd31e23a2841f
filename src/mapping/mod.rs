//! The geo-mapping engine.
//!
//! [`GeoMappingEngine`] turns the pixel anchor of a detection into a geodetic
//! position. It only holds immutable settings; the camera model, pose and mode
//! are passed to every call, so one engine can be shared between threads and
//! each call is a pure function of its arguments.

use crate::camera::{CameraModel, CameraModelError, UndistortionSettings};
use crate::geometry::{
    CameraPose, GeoPoint, GeodeticConversion, GeometryError, GroundIntersector, LocalTangentFrame,
    PixelPoint,
};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub mod area;

pub use area::MappingArea;

/// How detections of a camera stream receive their geo-coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    /// Every detection gets the camera location.
    Copy,
    /// Every detection is projected onto the ground plane.
    Map,
}

/// Per-detection mapping failures. None of them invalidates the message.
#[derive(thiserror::Error, Debug)]
pub enum MappingError {
    #[error("Viewing ray does not intersect the ground plane")]
    NoGroundIntersection,
    #[error("Pixel ({x}, {y}) does not map to a forward-looking ray")]
    DegenerateRay { x: f64, y: f64 },
    #[error("Camera altitude is unknown and no camera height is configured")]
    MissingAltitude,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Camera(CameraModelError),
}

impl From<CameraModelError> for MappingError {
    fn from(err: CameraModelError) -> Self {
        match err {
            CameraModelError::DegenerateRay { x, y } => MappingError::DegenerateRay { x, y },
            other => MappingError::Camera(other),
        }
    }
}

/// Where the ground plane sits relative to the camera.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundPlaneSettings {
    /// Height of the camera above the ground. When unset the pose altitude is
    /// used, i.e. the ground is assumed to lie at altitude zero.
    pub camera_height_m: Option<f64>,
    /// Height above ground of the point an anchor represents, e.g. the centre
    /// of a vehicle. Raises the intersection plane by this amount.
    pub object_center_elevation_m: f64,
}

impl GroundPlaneSettings {
    /// ENU `up` coordinate of the intersection plane for a pose.
    pub fn plane_up(&self, pose: &CameraPose) -> Result<f64, MappingError> {
        let height = self
            .camera_height_m
            .or(pose.location.altitude)
            .ok_or(MappingError::MissingAltitude)?;
        Ok(self.object_center_elevation_m - height)
    }
}

/// Immutable settings of a [`GeoMappingEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EngineSettings {
    pub undistortion: UndistortionSettings,
    pub conversion: GeodeticConversion,
    pub ground: GroundPlaneSettings,
}

/// A mapped anchor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MappedPoint {
    pub geo: GeoPoint,
    /// `false` when lens undistortion hit its iteration cap and an approximate
    /// ray was used.
    pub converged: bool,
    /// Slant range from the camera to the ground point; `None` in copy mode.
    pub range_m: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GeoMappingEngine {
    settings: EngineSettings,
    intersector: GroundIntersector,
}

impl GeoMappingEngine {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            intersector: GroundIntersector,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Maps one pixel anchor to a geodetic position.
    ///
    /// In [`MappingMode::Copy`] the camera location is returned verbatim and
    /// `camera` and `pixel` are ignored. In [`MappingMode::Map`] the pixel is
    /// back-projected, rotated into the ENU frame at the camera, intersected
    /// with the ground plane and converted to latitude/longitude.
    ///
    /// ```rust
    /// use geomapper::camera::{Intrinsics, PinholeModel, Resolution};
    /// use geomapper::geometry::{CameraPose, GeoPoint, Orientation};
    /// use geomapper::mapping::{EngineSettings, GeoMappingEngine, MappingMode};
    /// use nalgebra::Vector2;
    ///
    /// let camera = PinholeModel::new(
    ///     Intrinsics { fx: 1000.0, fy: 1000.0, cx: 960.0, cy: 540.0 },
    ///     Resolution { width: 1920, height: 1080 },
    /// )
    /// .unwrap();
    /// let pose = CameraPose::new(
    ///     GeoPoint::new(50.0, 10.0, Some(100.0)).unwrap(),
    ///     Orientation::default(),
    /// );
    ///
    /// let engine = GeoMappingEngine::new(EngineSettings::default());
    /// let mapped = engine
    ///     .map_detection_anchor(MappingMode::Map, &pose, &camera, &Vector2::new(960.0, 540.0))
    ///     .unwrap();
    /// assert!((mapped.geo.latitude - 50.0).abs() < 1e-9);
    /// assert!((mapped.geo.longitude - 10.0).abs() < 1e-9);
    /// ```
    pub fn map_detection_anchor<C>(
        &self,
        mode: MappingMode,
        pose: &CameraPose,
        camera: &C,
        pixel: &PixelPoint,
    ) -> Result<MappedPoint, MappingError>
    where
        C: CameraModel + ?Sized,
    {
        match mode {
            MappingMode::Copy => Ok(MappedPoint {
                geo: pose.location,
                converged: true,
                range_m: None,
            }),
            MappingMode::Map => self.project_to_ground(pose, camera, pixel),
        }
    }

    /// Maps a list of anchors, keeping their order.
    pub fn map_anchors<C>(
        &self,
        mode: MappingMode,
        pose: &CameraPose,
        camera: &C,
        pixels: &[PixelPoint],
    ) -> Vec<Result<MappedPoint, MappingError>>
    where
        C: CameraModel + ?Sized,
    {
        pixels
            .iter()
            .map(|pixel| self.map_detection_anchor(mode, pose, camera, pixel))
            .collect()
    }

    fn project_to_ground<C>(
        &self,
        pose: &CameraPose,
        camera: &C,
        pixel: &PixelPoint,
    ) -> Result<MappedPoint, MappingError>
    where
        C: CameraModel + ?Sized,
    {
        let plane_up = self.settings.ground.plane_up(pose)?;

        let ray = camera.pixel_to_ray(pixel, &self.settings.undistortion)?;

        let direction = pose.camera_to_world_direction(&ray.direction);
        let hit = self
            .intersector
            .intersect(&Vector3::zeros(), &direction, plane_up)?;

        let frame = LocalTangentFrame::new(pose.location, self.settings.conversion);
        let geo = frame.enu_to_geo(&hit.point)?;

        Ok(MappedPoint {
            geo,
            converged: ray.converged,
            range_m: Some(hit.range),
        })
    }
}
