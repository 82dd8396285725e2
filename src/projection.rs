//! Spherical Web-Mercator projection
//!
//! Converts between geographic degrees and planar meters on a sphere of
//! radius 6378137 m, plus the tile-pyramid helpers used for zoom inference.

use std::f64::consts::PI;

use crate::error::{MapError, Result};
use crate::geo::{GeoPoint, PlanarPoint};

/// Sphere radius (meters)
pub const EARTH_RADIUS: f64 = 6_378_137.0;

/// Half the projected world width (meters)
pub const ORIGIN_SHIFT: f64 = PI * EARTH_RADIUS;

const TILE_SIZE: f64 = 256.0;
const MAX_ZOOM: i32 = 30;

/// Project a geographic point to Web-Mercator meters.
///
/// Fails with `InvalidCoordinate` when the result is not finite, which
/// happens at (or numerically next to) the poles.
pub fn lat_lon_to_meters(p: GeoPoint) -> Result<PlanarPoint> {
    // tan(pi/2) is finite in f64, so the north pole needs an explicit check
    if !(p.lat.abs() < 90.0) {
        return Err(MapError::InvalidCoordinate {
            lat: p.lat,
            lon: p.lon,
        });
    }
    let x = p.lon * EARTH_RADIUS * PI / 180.0;
    let y = ((90.0 + p.lat) * PI / 360.0).tan().ln() * EARTH_RADIUS;
    if !x.is_finite() || !y.is_finite() {
        return Err(MapError::InvalidCoordinate {
            lat: p.lat,
            lon: p.lon,
        });
    }
    Ok(PlanarPoint::new(x, y))
}

/// Exact inverse of [`lat_lon_to_meters`]
pub fn meters_to_lat_lon(m: PlanarPoint) -> GeoPoint {
    let lat = (2.0 * (m.y / EARTH_RADIUS).exp().atan() - PI / 2.0) * 180.0 / PI;
    let lon = m.x / EARTH_RADIUS * 180.0 / PI;
    GeoPoint::new(lat, lon)
}

/// Ground resolution (meters per pixel) of a 256px tile pyramid at `zoom`
pub fn resolution(zoom: i32) -> f64 {
    2.0 * ORIGIN_SHIFT / (TILE_SIZE * 2f64.powi(zoom))
}

/// Deepest zoom level whose resolution is still finer than `pixel_size`
pub fn zoom_for_pixel_size(pixel_size: f64) -> Option<i32> {
    (0..MAX_ZOOM)
        .find(|&z| pixel_size > resolution(z))
        .map(|z| (z - 1).max(0))
}

/// Convert tile-pyramid pixel coordinates at `zoom` to meters
pub fn pixels_to_meters(px: f64, py: f64, zoom: i32) -> PlanarPoint {
    let res = resolution(zoom);
    PlanarPoint::new(px * res - ORIGIN_SHIFT, py * res - ORIGIN_SHIFT)
}
