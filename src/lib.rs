//! Geo-mapper Library
//!
//! Maps object detections given in camera pixel coordinates to geographic
//! coordinates, using the camera location and orientation at capture time and
//! the optical model of the camera.
//!
//! - [`camera`]: pinhole, radial-tangential and a/b/c lens models
//! - [`geometry`]: geodetic points, camera pose, local ENU frame and ground
//!   plane intersection
//! - [`mapping`]: the stateless [`GeoMappingEngine`] (copy and map modes)
//! - [`pipeline`]: [`DetectionMapper`], which applies the engine to whole
//!   detection messages
//! - [`config`]: YAML stage configuration

pub mod camera;
pub mod config;
pub mod geometry;
pub mod mapping;
pub mod pipeline;

// Re-export commonly used types
pub use camera::{
    AbcModel, CameraModel, CameraModelEnum, CameraModelError, Intrinsics, PinholeModel,
    RadTanModel, Resolution, UndistortionSettings,
};
pub use config::{ConfigError, GeoMapperConfig};
pub use geometry::{CameraPose, GeoPoint, GeodeticConversion, Orientation};
pub use mapping::{GeoMappingEngine, MappedPoint, MappingError, MappingMode};
pub use pipeline::{AnchorPoint, DetectionMapper, DropReason, MappingReport, Outcome, SaeMessage};
