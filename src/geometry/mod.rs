//! Geodetic and local Cartesian geometry used by the mapping engine.
//!
//! * [`GeoPoint`] is a WGS84 position with an optional altitude.
//! * [`pose`] holds the camera orientation convention and the rotation from
//!   the camera frame into the local East-North-Up frame.
//! * [`frame`] converts between ENU offsets and geodetic coordinates.
//! * [`ground`] intersects viewing rays with a horizontal ground plane.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

pub mod frame;
pub mod ground;
pub mod pose;

pub use frame::{GeodeticConversion, LocalTangentFrame};
pub use ground::{GroundHit, GroundIntersector};
pub use pose::{CameraPose, Orientation};

/// Pixel coordinates, origin at the top-left corner, `x` right, `y` down.
pub type PixelPoint = Vector2<f64>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("Coordinate is not finite: latitude {latitude}, longitude {longitude}")]
    NonFiniteCoordinate { latitude: f64, longitude: f64 },
}

/// A WGS84 position in degrees, altitude in meters above the ellipsoid.
///
/// Constructed through [`GeoPoint::new`] the latitude lies in `[-90, 90]` and
/// the longitude in `[-180, 180)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}

impl GeoPoint {
    /// Creates a point, wrapping the longitude and reflecting latitudes that
    /// run past a pole back onto the globe.
    ///
    /// ```rust
    /// use geomapper::geometry::GeoPoint;
    ///
    /// let p = GeoPoint::new(95.0, 10.0, None).unwrap();
    /// assert_eq!(p.latitude, 85.0);
    /// assert_eq!(p.longitude, -170.0);
    /// ```
    pub fn new(latitude: f64, longitude: f64, altitude: Option<f64>) -> Result<Self, GeometryError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(GeometryError::NonFiniteCoordinate {
                latitude,
                longitude,
            });
        }

        // fold latitude into [-180, 180) first, then reflect over the poles
        let mut lat = wrap_degrees(latitude);
        let mut lon = longitude;
        if lat > 90.0 {
            lat = 180.0 - lat;
            lon += 180.0;
        } else if lat < -90.0 {
            lat = -180.0 - lat;
            lon += 180.0;
        }

        Ok(Self {
            latitude: lat,
            longitude: wrap_degrees(lon),
            altitude: altitude.filter(|a| a.is_finite()),
        })
    }
}

/// Wraps an angle in degrees into `[-180, 180)`.
pub fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}
