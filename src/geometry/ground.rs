//! Ray casting onto a horizontal ground plane in the local ENU frame.

use crate::mapping::MappingError;
use nalgebra::Vector3;

/// Rays whose unit direction points less than this far below the horizon are
/// treated as level.
pub const LEVEL_TOLERANCE: f64 = 1e-9;

/// Intersection of a viewing ray with the ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GroundHit {
    /// ENU position of the hit.
    pub point: Vector3<f64>,
    /// Ray parameter `t`; equals the slant range for a unit direction.
    pub range: f64,
}

/// Intersects rays with the plane `up = plane_up`, normal along ENU up.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GroundIntersector;

impl GroundIntersector {
    /// `direction` is expected to be a unit vector.
    ///
    /// Returns [`MappingError::NoGroundIntersection`] when the ray is level or
    /// points upwards, or when the plane lies behind the ray origin.
    pub fn intersect(
        &self,
        origin: &Vector3<f64>,
        direction: &Vector3<f64>,
        plane_up: f64,
    ) -> Result<GroundHit, MappingError> {
        if direction.z.is_nan() || direction.z >= -LEVEL_TOLERANCE {
            return Err(MappingError::NoGroundIntersection);
        }
        let t = (plane_up - origin.z) / direction.z;
        if !t.is_finite() || t <= 0.0 {
            return Err(MappingError::NoGroundIntersection);
        }
        Ok(GroundHit {
            point: origin + direction * t,
            range: t,
        })
    }
}
