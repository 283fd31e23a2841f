//! JSON form of the messages passing through the stage.
//!
//! Only the fields the mapper reads or writes are typed. Everything else is
//! collected into the `extra` maps and written back untouched.

use crate::geometry::{GeoPoint, Orientation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Message type accepted by [`DetectionMapper`](crate::pipeline::DetectionMapper).
pub const SAE_MESSAGE_TYPE: &str = "SAE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaeMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    pub frame: Frame,
    #[serde(default)]
    pub detections: Vec<Detection>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub source_id: String,
    #[serde(default)]
    pub timestamp_utc_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<Shape>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_location: Option<GeoPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_orientation: Option<OrientationOverride>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Camera orientation carried by a frame. Angles left out fall back to the
/// orientation configured for the stream.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OrientationOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tilt_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll_deg: Option<f64>,
}

impl OrientationOverride {
    pub fn resolve(&self, fallback: Orientation) -> Orientation {
        Orientation::new(
            self.heading_deg.unwrap_or(fallback.heading_deg),
            self.tilt_deg.unwrap_or(fallback.tilt_deg),
            self.roll_deg.unwrap_or(fallback.roll_deg),
        )
    }
}

impl From<Orientation> for OrientationOverride {
    fn from(orientation: Orientation) -> Self {
        Self {
            heading_deg: Some(orientation.heading_deg),
            tilt_deg: Some(orientation.tilt_deg),
            roll_deg: Some(orientation.roll_deg),
        }
    }
}

/// Frame dimensions as reported by the producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub width: u32,
    pub height: u32,
}

/// Axis-aligned box in image coordinates normalized to `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub class_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geo_coordinate: Option<GeoPoint>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
