//! Pixel <-> geographic calibration of a single image
//!
//! A [`CalibrationTransform`] binds one [`CornerSet`] to one image size and
//! an optional header offset (pixels prepended above the image). It is
//! immutable and cheap to rebuild, so callers construct one per request.

use crate::error::{MapError, Result};
use crate::geo::{CornerSet, GeoPoint, PlanarPoint};
use crate::projection::{lat_lon_to_meters, meters_to_lat_lon};
use crate::transform::Homography;

#[derive(Debug, Clone)]
pub struct CalibrationTransform {
    width: u32,
    height: u32,
    header_offset: f64,
    corners: CornerSet,
    /// Web-Mercator meters -> pixels
    to_pixels: Homography,
    /// Pixels -> Web-Mercator meters
    to_meters: Homography,
}

impl CalibrationTransform {
    /// Build the transform pair for a `width` x `height` image whose pixel
    /// corners sit at `corners`, shifted down by `header_offset` pixels.
    pub fn new(width: u32, height: u32, corners: &CornerSet, header_offset: f64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(MapError::calibration(format!(
                "image size {}x{} is empty",
                width, height
            )));
        }
        let [m0, m1, m2, m3] = corners.to_array().map(lat_lon_to_meters);
        let meters = [m0?, m1?, m2?, m3?];
        let pixels = pixel_rect(width, height, header_offset);

        let to_pixels = Homography::from_quads(meters, pixels)?;
        let to_meters = Homography::from_quads(pixels, meters)?;

        Ok(Self {
            width,
            height,
            header_offset,
            corners: *corners,
            to_pixels,
            to_meters,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn header_offset(&self) -> f64 {
        self.header_offset
    }

    pub fn corners(&self) -> &CornerSet {
        &self.corners
    }

    /// Geographic point -> pixel position
    pub fn forward(&self, p: GeoPoint) -> Result<PlanarPoint> {
        let meters = lat_lon_to_meters(p)?;
        let px = self.to_pixels.project(meters);
        if !px.x.is_finite() || !px.y.is_finite() {
            return Err(MapError::InvalidCoordinate {
                lat: p.lat,
                lon: p.lon,
            });
        }
        Ok(px)
    }

    /// Pixel position -> geographic point
    pub fn backward(&self, p: PlanarPoint) -> Result<GeoPoint> {
        let meters = self.to_meters.project(p);
        let geo = meters_to_lat_lon(meters);
        if !geo.is_finite() {
            return Err(MapError::calibration(format!(
                "pixel ({}, {}) lies on the horizon of the calibration",
                p.x, p.y
            )));
        }
        Ok(geo)
    }

    /// Average ground resolution in meters per pixel, measured along both
    /// diagonals of the calibrated quad.
    pub fn resolution(&self) -> Result<f64> {
        let c = self.corners.to_array();
        let mut meters = [PlanarPoint::new(0.0, 0.0); 4];
        let mut pixels = [PlanarPoint::new(0.0, 0.0); 4];
        for i in 0..4 {
            meters[i] = lat_lon_to_meters(c[i])?;
            pixels[i] = self.to_pixels.project(meters[i]);
        }

        let res_a = meters[0].distance(&meters[2]) / pixels[0].distance(&pixels[2]);
        let res_b = meters[1].distance(&meters[3]) / pixels[1].distance(&pixels[3]);
        let res = (res_a + res_b) / 2.0;
        if !res.is_finite() || res <= 0.0 {
            return Err(MapError::calibration(format!(
                "cannot estimate resolution ({})",
                res
            )));
        }
        Ok(res)
    }
}

/// Pixel corners of the image, clockwise from the top left
fn pixel_rect(width: u32, height: u32, header_offset: f64) -> [PlanarPoint; 4] {
    let (w, h) = (width as f64, height as f64);
    [
        PlanarPoint::new(0.0, header_offset),
        PlanarPoint::new(w, header_offset),
        PlanarPoint::new(w, h + header_offset),
        PlanarPoint::new(0.0, h + header_offset),
    ]
}
