//! Local East-North-Up frame anchored at the camera location.
//!
//! The default [`GeodeticConversion::LocalCurvature`] converts metric offsets
//! with the WGS84 meridian and prime-vertical radii of curvature at the
//! origin. It is a bounded-range approximation: the horizontal error stays
//! well below a metre for offsets of a few kilometres and grows with distance,
//! so it must not be used for global transforms. [`GeodeticConversion::Ecef`]
//! goes through earth-centred coordinates and is exact at any range.

use crate::geometry::{wrap_degrees, GeoPoint, GeometryError};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis in meters.
pub const WGS84_A: f64 = 6_378_137.0;
/// WGS84 flattening.
pub const WGS84_F: f64 = 1.0 / 298.257_223_563;
/// WGS84 first eccentricity squared.
pub const WGS84_E2: f64 = WGS84_F * (2.0 - WGS84_F);

const ECEF_LATITUDE_ITERATIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeodeticConversion {
    #[default]
    LocalCurvature,
    Ecef,
}

/// ENU frame whose origin is a geodetic point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalTangentFrame {
    origin: GeoPoint,
    conversion: GeodeticConversion,
}

impl LocalTangentFrame {
    pub fn new(origin: GeoPoint, conversion: GeodeticConversion) -> Self {
        Self { origin, conversion }
    }

    /// Converts an ENU offset from the origin to a geodetic point.
    ///
    /// The result altitude is `None` when the origin has no altitude. Otherwise
    /// it is `origin.altitude + up` for the local-curvature conversion and the
    /// ellipsoidal height of the offset point for the ECEF conversion.
    pub fn enu_to_geo(&self, enu: &Vector3<f64>) -> Result<GeoPoint, GeometryError> {
        let altitude = self.origin.altitude.map(|h| h + enu.z);
        match self.conversion {
            GeodeticConversion::LocalCurvature => {
                let (m, n) = radii_of_curvature(self.origin.latitude.to_radians());
                let h = self.origin.altitude.unwrap_or(0.0);
                let cos_lat = self.origin.latitude.to_radians().cos();

                let d_lat = (enu.y / (m + h)).to_degrees();
                let d_lon = (enu.x / ((n + h) * cos_lat)).to_degrees();
                GeoPoint::new(
                    self.origin.latitude + d_lat,
                    self.origin.longitude + d_lon,
                    altitude,
                )
            }
            GeodeticConversion::Ecef => {
                let origin_ecef = geodetic_to_ecef(&self.origin);
                let ecef = origin_ecef + enu_to_ecef_rotation(&self.origin) * enu;
                let (latitude, longitude, height) = ecef_to_geodetic(&ecef);
                GeoPoint::new(latitude, longitude, altitude.map(|_| height))
            }
        }
    }

    /// Converts a geodetic point to an ENU offset from the origin.
    ///
    /// The up component is the altitude difference when both points carry an
    /// altitude and zero otherwise.
    pub fn geo_to_enu(&self, point: &GeoPoint) -> Vector3<f64> {
        let up = match (self.origin.altitude, point.altitude) {
            (Some(origin), Some(target)) => target - origin,
            _ => 0.0,
        };
        match self.conversion {
            GeodeticConversion::LocalCurvature => {
                let (m, n) = radii_of_curvature(self.origin.latitude.to_radians());
                let h = self.origin.altitude.unwrap_or(0.0);
                let cos_lat = self.origin.latitude.to_radians().cos();

                let north = (point.latitude - self.origin.latitude).to_radians() * (m + h);
                let east = wrap_degrees(point.longitude - self.origin.longitude).to_radians()
                    * (n + h)
                    * cos_lat;
                Vector3::new(east, north, up)
            }
            GeodeticConversion::Ecef => {
                let target = GeoPoint {
                    altitude: Some(self.origin.altitude.unwrap_or(0.0) + up),
                    ..*point
                };
                let delta = geodetic_to_ecef(&target) - geodetic_to_ecef(&self.origin);
                enu_to_ecef_rotation(&self.origin).transpose() * delta
            }
        }
    }
}

/// Meridian (`M`) and prime-vertical (`N`) radii of curvature at a latitude.
fn radii_of_curvature(latitude_rad: f64) -> (f64, f64) {
    let sin_lat = latitude_rad.sin();
    let w2 = 1.0 - WGS84_E2 * sin_lat * sin_lat;
    let n = WGS84_A / w2.sqrt();
    let m = WGS84_A * (1.0 - WGS84_E2) / (w2 * w2.sqrt());
    (m, n)
}

fn geodetic_to_ecef(point: &GeoPoint) -> Vector3<f64> {
    let lat = point.latitude.to_radians();
    let lon = point.longitude.to_radians();
    let h = point.altitude.unwrap_or(0.0);
    let (_, n) = radii_of_curvature(lat);
    Vector3::new(
        (n + h) * lat.cos() * lon.cos(),
        (n + h) * lat.cos() * lon.sin(),
        (n * (1.0 - WGS84_E2) + h) * lat.sin(),
    )
}

/// Returns latitude and longitude in degrees and height in meters.
fn ecef_to_geodetic(ecef: &Vector3<f64>) -> (f64, f64, f64) {
    let p = ecef.x.hypot(ecef.y);
    let longitude = ecef.y.atan2(ecef.x);
    let mut latitude = ecef.z.atan2(p * (1.0 - WGS84_E2));
    let mut height = 0.0;

    for _ in 0..ECEF_LATITUDE_ITERATIONS {
        let (_, n) = radii_of_curvature(latitude);
        let cos_lat = latitude.cos();
        height = if cos_lat.abs() > 1e-10 {
            p / cos_lat - n
        } else {
            ecef.z.abs() - n * (1.0 - WGS84_E2)
        };
        latitude = ecef.z.atan2(p * (1.0 - WGS84_E2 * n / (n + height)));
    }

    (latitude.to_degrees(), longitude.to_degrees(), height)
}

/// Columns are the east, north and up unit vectors expressed in ECEF.
fn enu_to_ecef_rotation(origin: &GeoPoint) -> Matrix3<f64> {
    let (sin_lat, cos_lat) = origin.latitude.to_radians().sin_cos();
    let (sin_lon, cos_lon) = origin.longitude.to_radians().sin_cos();
    Matrix3::new(
        -sin_lon, -sin_lat * cos_lon, cos_lat * cos_lon, //
        cos_lon, -sin_lat * sin_lon, cos_lat * sin_lon, //
        0.0, cos_lat, sin_lat,
    )
}
