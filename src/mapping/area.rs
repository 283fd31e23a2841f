//! Geographic area outside of which mapped detections are discarded.
//!
//! Areas are configured as GeoJSON polygons, vertices given as
//! `[longitude, latitude]`. The first ring is the outer boundary, any further
//! rings are holes. Containment uses the even-odd rule in plain degree space.

use crate::geometry::GeoPoint;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GeoJsonPolygon", into = "GeoJsonPolygon")]
pub struct MappingArea {
    rings: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
enum GeoJsonPolygon {
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

impl TryFrom<GeoJsonPolygon> for MappingArea {
    type Error = String;

    fn try_from(value: GeoJsonPolygon) -> Result<Self, Self::Error> {
        let GeoJsonPolygon::Polygon { coordinates } = value;
        MappingArea::new(coordinates)
    }
}

impl From<MappingArea> for GeoJsonPolygon {
    fn from(area: MappingArea) -> Self {
        GeoJsonPolygon::Polygon {
            coordinates: area.rings,
        }
    }
}

impl MappingArea {
    /// Builds an area from `[lon, lat]` rings. A closing vertex equal to the
    /// first one is optional.
    pub fn new(rings: Vec<Vec<[f64; 2]>>) -> Result<Self, String> {
        if rings.is_empty() {
            return Err("mapping area needs an outer ring".to_string());
        }
        for (i, ring) in rings.iter().enumerate() {
            let distinct = match (ring.first(), ring.last()) {
                (Some(first), Some(last)) if first == last => ring.len() - 1,
                _ => ring.len(),
            };
            if distinct < 3 {
                return Err(format!("mapping area ring {i} has fewer than 3 vertices"));
            }
            if ring.iter().flatten().any(|c| !c.is_finite()) {
                return Err(format!("mapping area ring {i} has non-finite coordinates"));
            }
        }
        Ok(Self { rings })
    }

    /// `true` if the point lies inside the outer ring and outside all holes.
    pub fn contains(&self, point: &GeoPoint) -> bool {
        let inside_ring = |ring: &[[f64; 2]]| {
            let (x, y) = (point.longitude, point.latitude);
            let mut inside = false;
            let mut j = ring.len() - 1;
            for i in 0..ring.len() {
                let [xi, yi] = ring[i];
                let [xj, yj] = ring[j];
                if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
                    inside = !inside;
                }
                j = i;
            }
            inside
        };

        match self.rings.split_first() {
            Some((outer, holes)) => inside_ring(outer) && !holes.iter().any(|h| inside_ring(h)),
            None => false,
        }
    }
}
