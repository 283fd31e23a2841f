//! Stage configuration.
//!
//! The configuration is a YAML document deserialized into [`GeoMapperConfig`].
//! Every camera stream is either copied (`mode: copy`) or mapped
//! (`mode: map`). A mapped camera describes its lens inline through a
//! [`LensSpec`] or points to a `cam0` camera file with `intrinsics_path`.
//!
//! ```yaml
//! log_level: info
//! object_center_elevation_m: 0.8
//! cameras:
//!   - mode: copy
//!     stream_id: entrance
//!   - mode: map
//!     stream_id: crossing
//!     heading_deg: 135
//!     tilt_deg: 60
//!     intrinsics:
//!       model: pinhole
//!       resolution: { width: 1920, height: 1080 }
//!       focal_length_mm: 4.0
//!       sensor_size_mm: { width: 6.17 }
//! ```

use crate::camera::{
    CameraModel, CameraModelEnum, CameraModelError, Intrinsics, KalibrCamera, Resolution,
    UndistortionSettings,
};
use crate::geometry::{GeodeticConversion, Orientation};
use crate::mapping::{
    EngineSettings, GeoMappingEngine, GroundPlaneSettings, MappingArea, MappingMode,
};
use crate::pipeline::{AnchorPoint, MapStream, StreamMapping};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid camera '{stream_id}': {source}")]
    Camera {
        stream_id: String,
        #[source]
        source: CameraModelError,
    },
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoMapperConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Height above ground of the point a detection anchor stands for.
    #[serde(default)]
    pub object_center_elevation_m: f64,
    #[serde(default)]
    pub geodetic_conversion: GeodeticConversion,
    #[serde(default)]
    pub undistortion: UndistortionSettings,
    #[serde(default)]
    pub anchor: AnchorPoint,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CameraConfig {
    Copy { stream_id: String },
    Map(MapCameraConfig),
}

impl CameraConfig {
    pub fn stream_id(&self) -> &str {
        match self {
            CameraConfig::Copy { stream_id } => stream_id,
            CameraConfig::Map(map) => &map.stream_id,
        }
    }

    pub fn mode(&self) -> MappingMode {
        match self {
            CameraConfig::Copy { .. } => MappingMode::Copy,
            CameraConfig::Map(_) => MappingMode::Map,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapCameraConfig {
    pub stream_id: String,
    /// Inline lens description. Mutually exclusive with `intrinsics_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics: Option<LensSpec>,
    /// Path to a `cam0` camera file, relative paths are taken from the
    /// directory of the configuration file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intrinsics_path: Option<PathBuf>,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub tilt_deg: f64,
    #[serde(default)]
    pub roll_deg: f64,
    /// Overrides the camera altitude as height above the ground plane.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_height_m: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping_area: Option<MappingArea>,
    #[serde(default)]
    pub remove_unmapped_detections: bool,
}

impl MapCameraConfig {
    pub fn orientation(&self) -> Orientation {
        Orientation::new(self.heading_deg, self.tilt_deg, self.roll_deg)
    }

    /// Builds and validates the camera model of this stream.
    pub fn camera(&self) -> Result<CameraModelEnum, CameraModelError> {
        match (&self.intrinsics, &self.intrinsics_path) {
            (Some(lens), None) => lens.to_camera(),
            (None, Some(path)) => CameraModelEnum::load_from_yaml(&path.to_string_lossy()),
            (Some(_), Some(_)) => Err(CameraModelError::InvalidParams(
                "intrinsics and intrinsics_path are mutually exclusive".to_string(),
            )),
            (None, None) => Err(CameraModelError::InvalidParams(
                "one of intrinsics or intrinsics_path is required".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensModel {
    Pinhole,
    RadTan,
    Abc,
}

impl LensModel {
    fn name(&self) -> &'static str {
        match self {
            LensModel::Pinhole => "pinhole",
            LensModel::RadTan => "rad_tan",
            LensModel::Abc => "abc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPx {
    pub fx: f64,
    pub fy: f64,
}

/// Physical sensor size. A missing height is derived from the image aspect
/// ratio, i.e. square pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorSize {
    pub width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
}

/// Full horizontal (`x`) and vertical (`y`) view angles. When only one is
/// given the pixels are assumed square.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ViewAngle {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrincipalPoint {
    pub cx: f64,
    pub cy: f64,
}

/// Inline lens description.
///
/// The focal length is given in exactly one way: in pixels (`focal_px`), as
/// `focal_length_mm` with `sensor_size_mm`, or through `view_angle_deg`.
/// `distortion` uses the same layout as camera files: empty for `pinhole`,
/// `[k1, k2, p1, p2, k3, …]` for `rad_tan` and `[a, b, c]` for `abc`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LensSpec {
    pub model: LensModel,
    pub resolution: Resolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_px: Option<FocalPx>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focal_length_mm: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensor_size_mm: Option<SensorSize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_angle_deg: Option<ViewAngle>,
    /// Defaults to the image centre.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_point: Option<PrincipalPoint>,
    #[serde(default)]
    pub distortion: Vec<f64>,
}

impl LensSpec {
    /// Resolves focal length and principal point in pixels.
    pub fn intrinsics(&self) -> Result<Intrinsics, CameraModelError> {
        let Resolution { width, height } = self.resolution;
        if width == 0 || height == 0 {
            return Err(CameraModelError::InvalidResolution { width, height });
        }
        let (w, h) = (f64::from(width), f64::from(height));

        let (fx, fy) = match (
            &self.focal_px,
            self.focal_length_mm,
            &self.view_angle_deg,
        ) {
            (Some(focal), None, None) => (focal.fx, focal.fy),
            (None, Some(focal_mm), None) => {
                let sensor = self.sensor_size_mm.ok_or_else(|| {
                    CameraModelError::InvalidParams(
                        "focal_length_mm requires sensor_size_mm".to_string(),
                    )
                })?;
                let sensor_height = sensor.height.unwrap_or(sensor.width * h / w);
                if !(sensor.width > 0.0 && sensor_height > 0.0) {
                    return Err(CameraModelError::InvalidParams(format!(
                        "sensor size must be positive, got {} x {} mm",
                        sensor.width, sensor_height
                    )));
                }
                (focal_mm * w / sensor.width, focal_mm * h / sensor_height)
            }
            (None, None, Some(angle)) => {
                let focal = |fov_deg: f64, extent: f64| {
                    if fov_deg > 0.0 && fov_deg < 180.0 {
                        Ok(extent / 2.0 / (fov_deg.to_radians() / 2.0).tan())
                    } else {
                        Err(CameraModelError::InvalidParams(format!(
                            "view angle must be in (0, 180) degrees, got {fov_deg}"
                        )))
                    }
                };
                match (angle.x, angle.y) {
                    (Some(x), Some(y)) => (focal(x, w)?, focal(y, h)?),
                    (Some(x), None) => {
                        let f = focal(x, w)?;
                        (f, f)
                    }
                    (None, Some(y)) => {
                        let f = focal(y, h)?;
                        (f, f)
                    }
                    (None, None) => {
                        return Err(CameraModelError::InvalidParams(
                            "view_angle_deg needs x or y".to_string(),
                        ))
                    }
                }
            }
            _ => {
                return Err(CameraModelError::InvalidParams(
                    "exactly one of focal_px, focal_length_mm or view_angle_deg is required"
                        .to_string(),
                ))
            }
        };

        let (cx, cy) = self
            .principal_point
            .map_or((w / 2.0, h / 2.0), |pp| (pp.cx, pp.cy));

        Ok(Intrinsics { fx, fy, cx, cy })
    }

    pub fn to_camera(&self) -> Result<CameraModelEnum, CameraModelError> {
        CameraModelEnum::from_kalibr(KalibrCamera {
            camera_model: self.model.name().to_string(),
            intrinsics: self.intrinsics()?,
            resolution: self.resolution,
            distortion: self.distortion.clone(),
            tangential_scale: Vec::new(),
        })
    }
}

impl GeoMapperConfig {
    /// Reads a configuration file. Relative `intrinsics_path` entries are
    /// resolved against the directory of `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&contents)?;
        if let Some(dir) = path.parent() {
            for camera in config.cameras.iter_mut() {
                if let CameraConfig::Map(MapCameraConfig {
                    intrinsics_path: Some(intrinsics_path),
                    ..
                }) = camera
                {
                    if intrinsics_path.is_relative() {
                        *intrinsics_path = dir.join(intrinsics_path.as_path());
                    }
                }
            }
        }
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn log_level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.log_level)))
    }

    /// Checks the whole configuration, building every camera model.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve_streams().map(|_| ())
    }

    /// Validates the configuration and builds the per-stream mapping setup.
    pub fn resolve_streams(&self) -> Result<Vec<(String, StreamMapping)>, ConfigError> {
        self.log_level_filter()?;
        if !self.object_center_elevation_m.is_finite() {
            return Err(ConfigError::Invalid(
                "object_center_elevation_m must be finite".to_string(),
            ));
        }
        self.undistortion
            .validate()
            .map_err(|err| ConfigError::Invalid(err.to_string()))?;
        if self.cameras.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one camera must be configured".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        let mut streams = Vec::with_capacity(self.cameras.len());
        for camera in &self.cameras {
            let stream_id = camera.stream_id();
            if !seen.insert(stream_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate stream_id '{stream_id}'"
                )));
            }
            let stream = match camera {
                CameraConfig::Copy { .. } => StreamMapping::Copy,
                CameraConfig::Map(map) => StreamMapping::Map(Box::new(self.map_stream(map)?)),
            };
            streams.push((stream_id.to_string(), stream));
        }
        Ok(streams)
    }

    fn map_stream(&self, map: &MapCameraConfig) -> Result<MapStream, ConfigError> {
        let invalid = |source: CameraModelError| ConfigError::Camera {
            stream_id: map.stream_id.clone(),
            source,
        };

        let orientation = map.orientation();
        if !orientation.is_finite() {
            return Err(invalid(CameraModelError::InvalidParams(
                "orientation angles must be finite".to_string(),
            )));
        }
        if let Some(height) = map.camera_height_m {
            if !(height.is_finite() && height > 0.0) {
                return Err(invalid(CameraModelError::InvalidParams(format!(
                    "camera_height_m must be positive, got {height}"
                ))));
            }
        }
        let camera = map.camera().map_err(invalid)?;
        camera.validate_params().map_err(invalid)?;

        let engine = GeoMappingEngine::new(EngineSettings {
            undistortion: self.undistortion,
            conversion: self.geodetic_conversion,
            ground: GroundPlaneSettings {
                camera_height_m: map.camera_height_m,
                object_center_elevation_m: self.object_center_elevation_m,
            },
        });

        Ok(MapStream {
            engine,
            camera,
            orientation,
            mapping_area: map.mapping_area.clone(),
            remove_unmapped_detections: map.remove_unmapped_detections,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn lens(yaml: &str) -> LensSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_empty_cameras_rejected() {
        let config = GeoMapperConfig::from_yaml_str("cameras: []\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_cameras_is_parse_error() {
        assert!(matches!(
            GeoMapperConfig::from_yaml_str("log_level: info\n"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_copy_camera_defaults() {
        let config = GeoMapperConfig::from_yaml_str(
            "cameras:\n  - mode: copy\n    stream_id: stream1\n",
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.anchor, AnchorPoint::Centroid);
        assert_eq!(config.geodetic_conversion, GeodeticConversion::LocalCurvature);
        assert_eq!(config.undistortion, UndistortionSettings::default());
        assert_eq!(config.cameras[0].mode(), MappingMode::Copy);
    }

    #[test]
    fn test_duplicate_stream_ids_rejected() {
        let config = GeoMapperConfig::from_yaml_str(
            "cameras:\n  - mode: copy\n    stream_id: a\n  - mode: copy\n    stream_id: a\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let config = GeoMapperConfig::from_yaml_str(
            "log_level: chatty\ncameras:\n  - mode: copy\n    stream_id: a\n",
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_undistortion_cap_rejected() {
        let config = GeoMapperConfig::from_yaml_str(
            "undistortion:\n  max_iterations: 5000\ncameras:\n  - mode: copy\n    stream_id: a\n",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_map_camera_needs_intrinsics() {
        let config = GeoMapperConfig::from_yaml_str(
            "cameras:\n  - mode: map\n    stream_id: stream1\n    heading_deg: 180\n",
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Camera { ref stream_id, .. }) if stream_id == "stream1"
        ));
    }

    #[test]
    fn test_bad_intrinsics_rejected() {
        let config = GeoMapperConfig::from_yaml_str(
            "cameras:\n  - mode: map\n    stream_id: s\n    intrinsics:\n      model: pinhole\n      resolution: { width: 640, height: 480 }\n      focal_px: { fx: -1.0, fy: 500.0 }\n",
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Camera {
                source: CameraModelError::FocalLengthMustBePositive,
                ..
            })
        ));
    }

    #[test]
    fn test_focal_from_millimetres() {
        let spec = lens(
            "model: pinhole\nresolution: { width: 1920, height: 1080 }\nfocal_length_mm: 4.0\nsensor_size_mm: { width: 6.4 }\n",
        );
        let intrinsics = spec.intrinsics().unwrap();
        assert_relative_eq!(intrinsics.fx, 1200.0, epsilon = 1e-9);
        assert_relative_eq!(intrinsics.fy, 1200.0, epsilon = 1e-9);
        assert_eq!((intrinsics.cx, intrinsics.cy), (960.0, 540.0));
    }

    #[test]
    fn test_focal_from_view_angle() {
        let spec = lens(
            "model: pinhole\nresolution: { width: 2000, height: 1000 }\nview_angle_deg: { x: 90 }\n",
        );
        let intrinsics = spec.intrinsics().unwrap();
        assert_relative_eq!(intrinsics.fx, 1000.0, epsilon = 1e-9);
        assert_relative_eq!(intrinsics.fy, 1000.0, epsilon = 1e-9);

        let spec = lens(
            "model: pinhole\nresolution: { width: 2000, height: 1000 }\nview_angle_deg: { y: 200 }\n",
        );
        assert!(spec.intrinsics().is_err());
    }

    #[test]
    fn test_focal_sources_are_exclusive() {
        let spec = lens(
            "model: pinhole\nresolution: { width: 640, height: 480 }\nfocal_px: { fx: 500, fy: 500 }\nview_angle_deg: { x: 60 }\n",
        );
        assert!(matches!(
            spec.intrinsics(),
            Err(CameraModelError::InvalidParams(_))
        ));
        let spec = lens("model: pinhole\nresolution: { width: 640, height: 480 }\n");
        assert!(spec.intrinsics().is_err());
    }

    #[test]
    fn test_lens_models() {
        let rad_tan = lens(
            "model: rad_tan\nresolution: { width: 752, height: 480 }\nfocal_px: { fx: 458.654, fy: 457.296 }\nprincipal_point: { cx: 367.215, cy: 248.375 }\ndistortion: [-0.28340811, 0.07395907, 0.00019359, 1.76187114e-05]\n",
        )
        .to_camera()
        .unwrap();
        assert_eq!(rad_tan.name(), "rad_tan");
        assert_eq!(rad_tan.get_intrinsics().cx, 367.215);

        let abc = lens(
            "model: abc\nresolution: { width: 1920, height: 1080 }\nfocal_px: { fx: 1400, fy: 1400 }\ndistortion: [0.0, -0.02, 0.01]\n",
        )
        .to_camera()
        .unwrap();
        assert_eq!(abc.name(), "abc");
        assert_eq!(abc.get_distortion(), vec![0.0, -0.02, 0.01]);

        let broken = lens(
            "model: abc\nresolution: { width: 1920, height: 1080 }\nfocal_px: { fx: 1400, fy: 1400 }\ndistortion: [0.1]\n",
        );
        assert!(broken.to_camera().is_err());
    }

    #[test]
    fn test_load_sample_config() {
        let config = GeoMapperConfig::load("samples/geomapper.yaml").unwrap();
        let streams = config.resolve_streams().unwrap();
        assert_eq!(streams.len(), 3);
        assert_eq!(config.log_level_filter().unwrap(), LevelFilter::Info);

        let ids: Vec<_> = streams.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["entrance", "crossing", "yard"]);
        assert!(matches!(streams[0].1, StreamMapping::Copy));
        match &streams[1].1 {
            StreamMapping::Map(stream) => {
                assert_eq!(stream.camera.name(), "pinhole");
                assert_eq!(stream.orientation, Orientation::new(135.0, 60.0, 0.0));
                assert!(stream.mapping_area.is_some());
                assert!(stream.remove_unmapped_detections);
                assert_eq!(stream.engine.settings().ground.object_center_elevation_m, 0.8);
            }
            StreamMapping::Copy => panic!("crossing should be mapped"),
        }
        match &streams[2].1 {
            StreamMapping::Map(stream) => {
                assert_eq!(stream.camera.name(), "rad_tan");
                assert_eq!(stream.engine.settings().ground.camera_height_m, Some(6.5));
            }
            StreamMapping::Copy => panic!("yard should be mapped"),
        }
    }
}
