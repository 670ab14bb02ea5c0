//! Coordinate formatting and bounding-box expansion for task fan-out.

use serde::{Deserialize, Serialize};

/// Meters per degree of latitude, good enough for grid stepping.
const METERS_PER_DEGREE: f64 = 111_320.0;

/// Geographic bounding box for full-coverage jobs.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

/// Stringify a coordinate pair as `"%f,%f"`; an unset center (both zero)
/// yields the empty string.
pub fn format_coordinates(lat: f64, lon: f64) -> String {
    if lat == 0.0 && lon == 0.0 {
        return String::new();
    }
    format!("{lat:.6},{lon:.6}")
}

/// Expand a bounding box into a grid of points stepped by the search
/// radius. Always yields at least the box center.
pub fn grid_points(bbox: &BoundingBox, radius_meters: i32) -> Vec<(f64, f64)> {
    let radius = f64::from(radius_meters.max(1));
    let lat_step = (radius * 2.0) / METERS_PER_DEGREE;
    let mid_lat = (bbox.min_lat + bbox.max_lat) / 2.0;
    let lon_scale = mid_lat.to_radians().cos().abs().max(0.01);
    let lon_step = lat_step / lon_scale;

    let mut points = Vec::new();
    let mut lat = bbox.min_lat;
    while lat <= bbox.max_lat {
        let mut lon = bbox.min_lon;
        while lon <= bbox.max_lon {
            points.push((lat, lon));
            lon += lon_step;
        }
        lat += lat_step;
    }

    if points.is_empty() {
        points.push((mid_lat, (bbox.min_lon + bbox.max_lon) / 2.0));
    }
    points
}
