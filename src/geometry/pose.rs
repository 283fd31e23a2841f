//! Camera pose: where the camera is and which way it looks.
//!
//! Orientation convention (angles in degrees):
//!
//! * `heading`: yaw of the optical axis, clockwise from true north.
//! * `tilt`: pitch measured from nadir. `0` looks straight down and `90` looks
//!   at the horizon.
//! * `roll`: rotation about the optical axis; positive banks the camera
//!   clockwise as seen from behind, so image content turns counter-clockwise.
//!
//! The camera-to-ENU rotation is composed intrinsically as
//! heading → tilt → roll on top of a base rotation that maps the camera frame
//! (`x` right, `y` down, `z` forward) to (east, south, down).

use crate::geometry::GeoPoint;
use nalgebra::{Matrix3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Orientation {
    pub heading_deg: f64,
    pub tilt_deg: f64,
    pub roll_deg: f64,
}

impl Orientation {
    pub fn new(heading_deg: f64, tilt_deg: f64, roll_deg: f64) -> Self {
        Self {
            heading_deg,
            tilt_deg,
            roll_deg,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.heading_deg.is_finite() && self.tilt_deg.is_finite() && self.roll_deg.is_finite()
    }

    /// Rotation taking camera-frame directions into the local ENU frame.
    pub fn camera_to_enu(&self) -> Rotation3<f64> {
        // camera x -> east, y -> south, z -> down
        let base = Rotation3::from_matrix_unchecked(Matrix3::new(
            1.0, 0.0, 0.0, //
            0.0, -1.0, 0.0, //
            0.0, 0.0, -1.0,
        ));
        let heading =
            Rotation3::from_axis_angle(&Vector3::z_axis(), -self.heading_deg.to_radians());
        let tilt = Rotation3::from_axis_angle(&Vector3::x_axis(), self.tilt_deg.to_radians());
        let roll = Rotation3::from_axis_angle(&Vector3::z_axis(), self.roll_deg.to_radians());

        heading * tilt * base * roll
    }
}

/// Camera location and orientation at capture time of one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub location: GeoPoint,
    pub orientation: Orientation,
}

impl CameraPose {
    pub fn new(location: GeoPoint, orientation: Orientation) -> Self {
        Self {
            location,
            orientation,
        }
    }

    /// Rotates a camera-frame direction into the ENU frame at the camera.
    pub fn camera_to_world_direction(&self, direction: &Vector3<f64>) -> Vector3<f64> {
        self.orientation.camera_to_enu() * direction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn pose(orientation: Orientation) -> CameraPose {
        CameraPose::new(GeoPoint::new(50.0, 10.0, Some(100.0)).unwrap(), orientation)
    }

    #[test]
    fn test_zero_orientation_looks_down() {
        let pose = pose(Orientation::default());
        let forward = pose.camera_to_world_direction(&Vector3::z());
        assert_relative_eq!(forward, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);

        // image right is east, image up is north
        let right = pose.camera_to_world_direction(&Vector3::x());
        assert_relative_eq!(right, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
        let image_up = pose.camera_to_world_direction(&-Vector3::y());
        assert_relative_eq!(image_up, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_tilt_ninety_looks_north_at_horizon() {
        let pose = pose(Orientation::new(0.0, 90.0, 0.0));
        let forward = pose.camera_to_world_direction(&Vector3::z());
        assert_relative_eq!(forward, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        let image_down = pose.camera_to_world_direction(&Vector3::y());
        assert_relative_eq!(image_down, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-12);
    }

    #[test]
    fn test_heading_is_clockwise_from_north() {
        let east = pose(Orientation::new(90.0, 90.0, 0.0));
        let forward = east.camera_to_world_direction(&Vector3::z());
        assert_relative_eq!(forward, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);

        let west = pose(Orientation::new(-90.0, 45.0, 0.0));
        let forward = west.camera_to_world_direction(&Vector3::z());
        let s = std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(forward, Vector3::new(-s, 0.0, -s), epsilon = 1e-12);
    }

    #[test]
    fn test_roll_keeps_optical_axis() {
        let rolled = pose(Orientation::new(30.0, 60.0, 25.0));
        let unrolled = CameraPose::new(rolled.location, Orientation::new(30.0, 60.0, 0.0));
        assert_relative_eq!(
            rolled.camera_to_world_direction(&Vector3::z()),
            unrolled.camera_to_world_direction(&Vector3::z()),
            epsilon = 1e-12
        );

        // positive roll on a nadir camera swings image right from east towards south
        let nadir = CameraPose::new(rolled.location, Orientation::new(0.0, 0.0, 90.0));
        let right = nadir.camera_to_world_direction(&Vector3::x());
        assert_relative_eq!(right, Vector3::new(0.0, -1.0, 0.0), epsilon = 1e-12);
    }
}
