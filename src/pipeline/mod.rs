//! Per-message orchestration around the [`GeoMappingEngine`].
//!
//! [`DetectionMapper::process`] checks a message, looks up the camera
//! configured for its source stream and writes a geo-coordinate onto every
//! detection it can map. Messages that cannot be processed at all are
//! dropped with a [`DropReason`]; failures of single detections never drop
//! the message.

use crate::camera::{CameraModel, CameraModelEnum, Resolution};
use crate::config::{ConfigError, GeoMapperConfig};
use crate::geometry::{CameraPose, GeoPoint, Orientation, PixelPoint};
use crate::mapping::{GeoMappingEngine, MappingArea, MappingMode};
use log::{debug, warn};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub mod message;

pub use message::{
    BoundingBox, Detection, Frame, OrientationOverride, SaeMessage, Shape, SAE_MESSAGE_TYPE,
};

/// Which point of a bounding box stands for the detected object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPoint {
    /// Middle of the bottom edge, where an upright object touches the ground.
    BottomCenter,
    #[default]
    Centroid,
    TopCenter,
}

impl AnchorPoint {
    /// Anchor pixel of a normalized bounding box on an image of `resolution`.
    pub fn pixel(&self, bbox: &BoundingBox, resolution: Resolution) -> PixelPoint {
        let x = (bbox.min_x + bbox.max_x) / 2.0;
        let y = match self {
            AnchorPoint::BottomCenter => bbox.max_y,
            AnchorPoint::Centroid => (bbox.min_y + bbox.max_y) / 2.0,
            AnchorPoint::TopCenter => bbox.min_y,
        };
        Vector2::new(
            x * f64::from(resolution.width),
            y * f64::from(resolution.height),
        )
    }
}

/// Why a whole message was not forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    UnexpectedMessageType(String),
    MissingCameraLocation { source_id: String },
    InvalidCameraLocation { source_id: String },
    UnknownStream { source_id: String },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::UnexpectedMessageType(t) => write!(f, "unexpected message type '{t}'"),
            DropReason::MissingCameraLocation { source_id } => {
                write!(f, "camera location is not set (source_id={source_id})")
            }
            DropReason::InvalidCameraLocation { source_id } => {
                write!(f, "camera location is not finite (source_id={source_id})")
            }
            DropReason::UnknownStream { source_id } => write!(
                f,
                "no camera configured for source_id={source_id}, possible stream_id/source_id mismatch"
            ),
        }
    }
}

/// Per-message detection counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MappingReport {
    /// Detections that received a geo-coordinate.
    pub mapped: usize,
    /// Detections left without a geo-coordinate, removed ones included.
    pub unmapped: usize,
    /// Unmapped detections taken out of the message.
    pub removed: usize,
    /// Mapped detections whose lens undistortion hit the iteration cap.
    pub non_converged: usize,
}

impl MappingReport {
    pub fn merge(&mut self, other: &MappingReport) {
        self.mapped += other.mapped;
        self.unmapped += other.unmapped;
        self.removed += other.removed;
        self.non_converged += other.non_converged;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Forwarded(SaeMessage, MappingReport),
    Dropped(DropReason),
}

/// A camera stream that projects detections onto the ground.
#[derive(Debug, Clone)]
pub struct MapStream {
    pub engine: GeoMappingEngine,
    pub camera: CameraModelEnum,
    /// Used when the message frame carries no orientation.
    pub orientation: Orientation,
    pub mapping_area: Option<MappingArea>,
    pub remove_unmapped_detections: bool,
}

#[derive(Debug, Clone)]
pub enum StreamMapping {
    Copy,
    Map(Box<MapStream>),
}

/// Maps the detections of incoming messages, one configured camera per
/// source stream.
#[derive(Debug, Clone, Default)]
pub struct DetectionMapper {
    anchor: AnchorPoint,
    streams: HashMap<String, StreamMapping>,
}

impl DetectionMapper {
    pub fn new(anchor: AnchorPoint) -> Self {
        Self {
            anchor,
            streams: HashMap::new(),
        }
    }

    /// Builds a mapper with every camera of a validated configuration.
    pub fn from_config(config: &GeoMapperConfig) -> Result<Self, ConfigError> {
        let mut mapper = Self::new(config.anchor);
        for (stream_id, stream) in config.resolve_streams()? {
            mapper = mapper.with_stream(stream_id, stream);
        }
        Ok(mapper)
    }

    pub fn with_stream(mut self, stream_id: impl Into<String>, stream: StreamMapping) -> Self {
        self.streams.insert(stream_id.into(), stream);
        self
    }

    pub fn anchor(&self) -> AnchorPoint {
        self.anchor
    }

    pub fn stream_ids(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Processes one message.
    ///
    /// Checks are applied in this order: message type, presence of a camera
    /// location, empty detection list (forwarded unchanged), known source
    /// stream. The camera location is normalized with [`GeoPoint::new`]
    /// before either mode uses it. Detection order is preserved in the output.
    pub fn process(&self, mut message: SaeMessage) -> Outcome {
        if message.message_type != SAE_MESSAGE_TYPE {
            return self.drop_message(DropReason::UnexpectedMessageType(
                message.message_type.clone(),
            ));
        }

        let source_id = &message.frame.source_id;
        let Some(location) = message.frame.camera_location else {
            return self.drop_message(DropReason::MissingCameraLocation {
                source_id: source_id.clone(),
            });
        };

        if message.detections.is_empty() {
            return Outcome::Forwarded(message, MappingReport::default());
        }

        let Some(stream) = self.streams.get(source_id) else {
            return self.drop_message(DropReason::UnknownStream {
                source_id: source_id.clone(),
            });
        };

        let Ok(location) = GeoPoint::new(location.latitude, location.longitude, location.altitude)
        else {
            return self.drop_message(DropReason::InvalidCameraLocation {
                source_id: source_id.clone(),
            });
        };

        let report = match stream {
            StreamMapping::Copy => copy_location(&location, &mut message.detections),
            StreamMapping::Map(stream) => {
                let orientation = message
                    .frame
                    .camera_orientation
                    .map_or(stream.orientation, |o| o.resolve(stream.orientation));
                let pose = CameraPose::new(location, orientation);
                self.map_detections(stream, &pose, &mut message)
            }
        };

        Outcome::Forwarded(message, report)
    }

    fn map_detections(
        &self,
        stream: &MapStream,
        pose: &CameraPose,
        message: &mut SaeMessage,
    ) -> MappingReport {
        let resolution = stream.camera.get_resolution();
        let detections = std::mem::take(&mut message.detections);
        let mut report = MappingReport::default();
        let mut retained = Vec::with_capacity(detections.len());

        for mut detection in detections {
            let pixel = self.anchor.pixel(&detection.bounding_box, resolution);
            let mapped = match stream.engine.map_detection_anchor(
                MappingMode::Map,
                pose,
                &stream.camera,
                &pixel,
            ) {
                Ok(mapped) => {
                    let inside = stream
                        .mapping_area
                        .as_ref()
                        .map_or(true, |area| area.contains(&mapped.geo));
                    if inside {
                        if !mapped.converged {
                            report.non_converged += 1;
                            warn!(
                                "Lens undistortion did not converge for pixel ({:.1}, {:.1}) of {}, using best approximation",
                                pixel.x, pixel.y, message.frame.source_id
                            );
                        }
                        Some(mapped.geo)
                    } else {
                        debug!(
                            "SKIPPED: cls {}, lat {}, lon {} outside mapping area",
                            detection.class_id, mapped.geo.latitude, mapped.geo.longitude
                        );
                        None
                    }
                }
                Err(err) => {
                    debug!(
                        "Detection of class {} at pixel ({:.1}, {:.1}) not mapped: {}",
                        detection.class_id, pixel.x, pixel.y, err
                    );
                    None
                }
            };

            detection.geo_coordinate = mapped;
            match mapped {
                Some(geo) => {
                    debug!(
                        "cls {}, lat {}, lon {}",
                        detection.class_id, geo.latitude, geo.longitude
                    );
                    report.mapped += 1;
                    retained.push(detection);
                }
                None => {
                    report.unmapped += 1;
                    if stream.remove_unmapped_detections {
                        report.removed += 1;
                    } else {
                        retained.push(detection);
                    }
                }
            }
        }

        message.detections = retained;
        report
    }

    fn drop_message(&self, reason: DropReason) -> Outcome {
        warn!("Discarding message: {reason}");
        Outcome::Dropped(reason)
    }
}

fn copy_location(location: &GeoPoint, detections: &mut [Detection]) -> MappingReport {
    for detection in detections.iter_mut() {
        detection.geo_coordinate = Some(*location);
    }
    MappingReport {
        mapped: detections.len(),
        ..MappingReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, PinholeModel, RadTanModel, UndistortionSettings};
    use crate::mapping::{EngineSettings, GroundPlaneSettings};
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn camera() -> CameraModelEnum {
        CameraModelEnum::Pinhole(
            PinholeModel::new(
                Intrinsics {
                    fx: 1000.0,
                    fy: 1000.0,
                    cx: 960.0,
                    cy: 540.0,
                },
                Resolution {
                    width: 1920,
                    height: 1080,
                },
            )
            .unwrap(),
        )
    }

    fn map_stream(tilt_deg: f64) -> MapStream {
        MapStream {
            engine: GeoMappingEngine::new(EngineSettings::default()),
            camera: camera(),
            orientation: Orientation::new(0.0, tilt_deg, 0.0),
            mapping_area: None,
            remove_unmapped_detections: false,
        }
    }

    fn mapper(stream: MapStream) -> DetectionMapper {
        DetectionMapper::new(AnchorPoint::Centroid)
            .with_stream("map-cam", StreamMapping::Map(Box::new(stream)))
            .with_stream("copy-cam", StreamMapping::Copy)
    }

    fn bbox_value(cx: f64, cy: f64) -> serde_json::Value {
        json!({"min_x": cx - 0.05, "min_y": cy - 0.05, "max_x": cx + 0.05, "max_y": cy + 0.05})
    }

    fn message(source_id: &str, centers: &[(f64, f64)]) -> SaeMessage {
        let detections: Vec<_> = centers
            .iter()
            .enumerate()
            .map(|(i, (x, y))| {
                json!({
                    "bounding_box": bbox_value(*x, *y),
                    "confidence": 0.8,
                    "class_id": i,
                    "object_id": format!("{i:02x}"),
                })
            })
            .collect();
        serde_json::from_value(json!({
            "type": "SAE",
            "frame": {
                "source_id": source_id,
                "timestamp_utc_ms": 1_700_000_000_000i64,
                "shape": {"width": 1920, "height": 1080},
                "camera_location": {"latitude": 50.0, "longitude": 10.0, "altitude": 100.0},
            },
            "detections": detections,
        }))
        .unwrap()
    }

    fn forwarded(outcome: Outcome) -> (SaeMessage, MappingReport) {
        match outcome {
            Outcome::Forwarded(msg, report) => (msg, report),
            Outcome::Dropped(reason) => panic!("message dropped: {reason}"),
        }
    }

    #[test]
    fn test_anchor_points() {
        let bbox = BoundingBox {
            min_x: 0.25,
            min_y: 0.5,
            max_x: 0.75,
            max_y: 1.0,
        };
        let resolution = Resolution {
            width: 200,
            height: 100,
        };
        assert_eq!(
            AnchorPoint::Centroid.pixel(&bbox, resolution),
            Vector2::new(100.0, 75.0)
        );
        assert_eq!(
            AnchorPoint::BottomCenter.pixel(&bbox, resolution),
            Vector2::new(100.0, 100.0)
        );
        assert_eq!(
            AnchorPoint::TopCenter.pixel(&bbox, resolution),
            Vector2::new(100.0, 50.0)
        );
        assert_eq!(AnchorPoint::default(), AnchorPoint::Centroid);
    }

    #[test]
    fn test_copy_mode_assigns_camera_location() {
        let msg = message("copy-cam", &[(0.1, 0.1), (0.9, 0.9)]);
        let (out, report) = forwarded(mapper(map_stream(0.0)).process(msg));
        assert_eq!(report.mapped, 2);
        for detection in &out.detections {
            let geo = detection.geo_coordinate.unwrap();
            assert_eq!(geo.latitude, 50.0);
            assert_eq!(geo.longitude, 10.0);
        }
    }

    #[test]
    fn test_camera_location_wrapped_in_both_modes() {
        for source in ["copy-cam", "map-cam"] {
            let mut msg = message(source, &[(0.5, 0.5)]);
            msg.frame.camera_location = Some(GeoPoint {
                latitude: 95.0,
                longitude: 190.0,
                altitude: Some(100.0),
            });
            let (out, report) = forwarded(mapper(map_stream(0.0)).process(msg));
            assert_eq!(report.mapped, 1);
            let geo = out.detections[0].geo_coordinate.unwrap();
            assert_abs_diff_eq!(geo.latitude, 85.0, epsilon = 1e-9);
            assert_abs_diff_eq!(geo.longitude, 10.0, epsilon = 1e-9);
        }

        let mut msg = message("copy-cam", &[(0.5, 0.5)]);
        msg.frame.camera_location = Some(GeoPoint {
            latitude: f64::NAN,
            longitude: 10.0,
            altitude: None,
        });
        assert_eq!(
            mapper(map_stream(0.0)).process(msg),
            Outcome::Dropped(DropReason::InvalidCameraLocation {
                source_id: "copy-cam".to_string()
            })
        );
    }

    #[test]
    fn test_map_mode_centre_detection_below_camera() {
        let msg = message("map-cam", &[(0.5, 0.5)]);
        let (out, report) = forwarded(mapper(map_stream(0.0)).process(msg));
        assert_eq!(report.mapped, 1);
        let geo = out.detections[0].geo_coordinate.unwrap();
        assert_abs_diff_eq!(geo.latitude, 50.0, epsilon = 1e-9);
        assert_abs_diff_eq!(geo.longitude, 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_missing_camera_location_drops_message() {
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        msg.frame.camera_location = None;
        assert_eq!(
            mapper(map_stream(0.0)).process(msg),
            Outcome::Dropped(DropReason::MissingCameraLocation {
                source_id: "map-cam".to_string()
            })
        );
    }

    #[test]
    fn test_unexpected_type_and_unknown_stream_are_dropped() {
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        msg.message_type = "POSITION".to_string();
        assert!(matches!(
            mapper(map_stream(0.0)).process(msg),
            Outcome::Dropped(DropReason::UnexpectedMessageType(_))
        ));

        let msg = message("other-cam", &[(0.5, 0.5)]);
        assert!(matches!(
            mapper(map_stream(0.0)).process(msg),
            Outcome::Dropped(DropReason::UnknownStream { .. })
        ));
    }

    #[test]
    fn test_empty_detection_list_passes_through() {
        for source in ["map-cam", "copy-cam", "other-cam"] {
            let msg = message(source, &[]);
            let (out, report) = forwarded(mapper(map_stream(0.0)).process(msg.clone()));
            assert_eq!(out, msg);
            assert_eq!(report, MappingReport::default());
        }
    }

    #[test]
    fn test_unmapped_detection_kept_without_coordinate() {
        // horizon-looking camera: the top half of the image is sky
        let msg = message("map-cam", &[(0.5, 0.9), (0.5, 0.1), (0.5, 0.7)]);
        let (out, report) = forwarded(mapper(map_stream(90.0)).process(msg));
        assert_eq!(out.detections.len(), 3);
        assert!(out.detections[0].geo_coordinate.is_some());
        assert!(out.detections[1].geo_coordinate.is_none());
        assert!(out.detections[2].geo_coordinate.is_some());
        let ids: Vec<_> = out.detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(
            report,
            MappingReport {
                mapped: 2,
                unmapped: 1,
                removed: 0,
                non_converged: 0
            }
        );
    }

    #[test]
    fn test_unmapped_detection_removed_when_configured() {
        let stream = MapStream {
            remove_unmapped_detections: true,
            ..map_stream(90.0)
        };
        let msg = message("map-cam", &[(0.5, 0.9), (0.5, 0.1), (0.5, 0.7)]);
        let (out, report) = forwarded(mapper(stream).process(msg));
        let ids: Vec<_> = out.detections.iter().map(|d| d.class_id).collect();
        assert_eq!(ids, vec![0, 2]);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_mapping_area_filters_detections() {
        // nadir camera 100 m up, 1000 px focal: 0.1 of the image width is ~19 m
        let area = MappingArea::new(vec![vec![
            [9.9999, 49.9999],
            [10.0001, 49.9999],
            [10.0001, 50.0001],
            [9.9999, 50.0001],
        ]])
        .unwrap();
        let stream = MapStream {
            mapping_area: Some(area),
            remove_unmapped_detections: true,
            ..map_stream(0.0)
        };
        let msg = message("map-cam", &[(0.5, 0.5), (0.9, 0.5)]);
        let (out, report) = forwarded(mapper(stream).process(msg));
        assert_eq!(out.detections.len(), 1);
        assert_eq!(out.detections[0].class_id, 0);
        assert_eq!(report.mapped, 1);
        assert_eq!(report.removed, 1);
    }

    #[test]
    fn test_frame_orientation_overrides_config() {
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        msg.frame.camera_orientation = Some(Orientation::new(90.0, 45.0, 0.0).into());
        let (out, _) = forwarded(mapper(map_stream(0.0)).process(msg));
        let geo = out.detections[0].geo_coordinate.unwrap();
        assert!(geo.longitude > 10.0);
        assert_abs_diff_eq!(geo.latitude, 50.0, epsilon = 1e-6);
    }

    #[test]
    fn test_partial_frame_orientation_keeps_stream_tilt() {
        // stream tilted 45 degrees, the frame only turns the heading to east
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        msg.frame.camera_orientation = Some(OrientationOverride {
            heading_deg: Some(90.0),
            ..OrientationOverride::default()
        });
        let (out, _) = forwarded(mapper(map_stream(45.0)).process(msg));
        let geo = out.detections[0].geo_coordinate.unwrap();

        let mut full = message("map-cam", &[(0.5, 0.5)]);
        full.frame.camera_orientation = Some(Orientation::new(90.0, 45.0, 0.0).into());
        let (expected, _) = forwarded(mapper(map_stream(0.0)).process(full));
        let expected = expected.detections[0].geo_coordinate.unwrap();

        // 100 m up at 45 degrees lands about 100 m east, not below the camera
        assert!(geo.longitude > 10.001);
        assert_abs_diff_eq!(geo.latitude, expected.latitude, epsilon = 1e-12);
        assert_abs_diff_eq!(geo.longitude, expected.longitude, epsilon = 1e-12);
    }

    #[test]
    fn test_non_convergence_counted_for_kept_detections_only() {
        let camera = RadTanModel::new(
            Intrinsics {
                fx: 461.629,
                fy: 460.152,
                cx: 362.680,
                cy: 246.049,
            },
            Resolution {
                width: 752,
                height: 480,
            },
            vec![-0.28340811, 0.07395907],
            vec![0.00019359, 1.76187114e-05],
        )
        .unwrap();
        let stream = MapStream {
            engine: GeoMappingEngine::new(EngineSettings {
                undistortion: UndistortionSettings {
                    tolerance_px: 1e-12,
                    max_iterations: 1,
                },
                ..EngineSettings::default()
            }),
            camera: CameraModelEnum::RadTan(camera),
            ..map_stream(0.0)
        };
        // anchor near the image corner, far outside the small area below
        let corner = (20.0 / 752.0, 20.0 / 480.0);

        let (out, report) = forwarded(mapper(stream.clone()).process(message("map-cam", &[corner])));
        assert!(out.detections[0].geo_coordinate.is_some());
        assert_eq!(report.mapped, 1);
        assert_eq!(report.non_converged, 1);

        let area = MappingArea::new(vec![vec![
            [9.9999, 49.9999],
            [10.0001, 49.9999],
            [10.0001, 50.0001],
            [9.9999, 50.0001],
        ]])
        .unwrap();
        let stream = MapStream {
            mapping_area: Some(area),
            ..stream
        };
        let (out, report) = forwarded(mapper(stream).process(message("map-cam", &[corner])));
        assert!(out.detections[0].geo_coordinate.is_none());
        assert_eq!(
            report,
            MappingReport {
                mapped: 0,
                unmapped: 1,
                removed: 0,
                non_converged: 0
            }
        );
    }

    #[test]
    fn test_camera_height_from_stream_engine() {
        let stream = MapStream {
            engine: GeoMappingEngine::new(EngineSettings {
                ground: GroundPlaneSettings {
                    camera_height_m: Some(5.0),
                    object_center_elevation_m: 0.0,
                },
                ..EngineSettings::default()
            }),
            ..map_stream(0.0)
        };
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        if let Some(location) = msg.frame.camera_location.as_mut() {
            location.altitude = None;
        }
        let (out, report) = forwarded(mapper(stream).process(msg));
        assert_eq!(report.mapped, 1);
        let geo = out.detections[0].geo_coordinate.unwrap();
        assert_eq!(geo.altitude, None);
    }

    #[test]
    fn test_unknown_fields_preserved_after_mapping() {
        let mut msg = message("map-cam", &[(0.5, 0.5)]);
        msg.extra.insert("metrics".to_string(), json!({"latency": 3}));
        msg.detections[0]
            .extra
            .insert("track".to_string(), json!({"age": 7}));
        let (out, _) = forwarded(mapper(map_stream(0.0)).process(msg.clone()));
        assert_eq!(out.extra, msg.extra);
        assert_eq!(out.frame, msg.frame);
        assert_eq!(out.detections[0].extra["track"]["age"], 7);
        assert_eq!(out.detections[0].confidence, 0.8);
        assert_eq!(out.detections[0].object_id.as_deref(), Some("00"));
    }
}
