//! Geographic and planar point types, corner sets and routes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MapError, Result};

/// Diameter of the spherical earth used for great-circle distances (meters)
const EARTH_DIAMETER_M: f64 = 12_756_274.0;

/// A geographic coordinate in degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Great-circle (haversine) distance in meters
    pub fn distance(&self, other: &GeoPoint) -> f64 {
        let c = std::f64::consts::PI / 180.0;
        let dlat = self.lat - other.lat;
        let dlon = self.lon - other.lon;
        let a = (c * dlat / 2.0).sin().powi(2)
            + (c * self.lat).cos() * (c * other.lat).cos() * (c * dlon / 2.0).sin().powi(2);
        EARTH_DIAMETER_M * a.sqrt().atan2((1.0 - a).sqrt())
    }
}

/// A planar point: Web-Mercator meters or image pixels depending on context
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlanarPoint {
    pub x: f64,
    pub y: f64,
}

impl PlanarPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &PlanarPoint) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// The geographic coordinates of an image's four pixel corners
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CornerSet {
    pub top_left: GeoPoint,
    pub top_right: GeoPoint,
    pub bottom_right: GeoPoint,
    pub bottom_left: GeoPoint,
}

impl CornerSet {
    pub fn new(
        top_left: GeoPoint,
        top_right: GeoPoint,
        bottom_right: GeoPoint,
        bottom_left: GeoPoint,
    ) -> Self {
        Self {
            top_left,
            top_right,
            bottom_right,
            bottom_left,
        }
    }

    /// Corners in clockwise order starting at the top left
    pub fn to_array(&self) -> [GeoPoint; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_right,
            self.bottom_left,
        ]
    }

    pub fn from_array(corners: [GeoPoint; 4]) -> Self {
        Self::new(corners[0], corners[1], corners[2], corners[3])
    }

    /// The eight coordinates as `[lat, lon, lat, lon, ...]` (TL, TR, BR, BL)
    pub fn to_values(&self) -> [f64; 8] {
        let c = self.to_array();
        [
            c[0].lat, c[0].lon, c[1].lat, c[1].lon, c[2].lat, c[2].lon, c[3].lat, c[3].lon,
        ]
    }

    /// Build from eight values, validating coordinate ranges
    pub fn from_values(values: &[f64]) -> Result<Self> {
        if values.len() != 8 {
            return Err(MapError::corners(format!(
                "expected 8 values, got {}",
                values.len()
            )));
        }
        let mut corners = [GeoPoint::new(0.0, 0.0); 4];
        for (i, pair) in values.chunks_exact(2).enumerate() {
            let (lat, lon) = (pair[0], pair[1]);
            if !(-90.0..=90.0).contains(&lat) {
                return Err(MapError::corners(format!("latitude {} out of range", lat)));
            }
            if !(-180.0..=180.0).contains(&lon) {
                return Err(MapError::corners(format!("longitude {} out of range", lon)));
            }
            corners[i] = GeoPoint::new(lat, lon);
        }
        Ok(Self::from_array(corners))
    }

    /// Same corners with every value rounded to 5 decimal places
    pub fn rounded(&self) -> Self {
        let round5 = |v: f64| {
            let r = (v * 1e5).round() / 1e5;
            // avoid printing "-0"
            if r == 0.0 {
                0.0
            } else {
                r
            }
        };
        let c = self.to_array();
        Self::from_array(c.map(|p| GeoPoint::new(round5(p.lat), round5(p.lon))))
    }

    /// Join the eight values with `separator`
    pub fn join(&self, separator: &str) -> String {
        self.to_values()
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(separator)
    }
}

/// Check a single corner value token: `-?\d{1,3}(\.\d+)?`
pub(crate) fn is_coordinate_token(token: &str) -> bool {
    let digits = token.strip_prefix('-').unwrap_or(token);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let int_ok = (1..=3).contains(&int_part.len()) && int_part.bytes().all(|b| b.is_ascii_digit());
    let frac_ok = frac_part.map_or(true, |f| !f.is_empty() && f.bytes().all(|b| b.is_ascii_digit()));
    int_ok && frac_ok
}

impl FromStr for CornerSet {
    type Err = MapError;

    /// Parse `"lat,lon,lat,lon,lat,lon,lat,lon"` (TL, TR, BR, BL)
    fn from_str(s: &str) -> Result<Self> {
        let tokens: Vec<&str> = s.trim().split(',').map(str::trim).collect();
        if tokens.len() != 8 {
            return Err(MapError::corners(
                "corners coordinates must have 8 float values separated by commas",
            ));
        }
        let mut values = Vec::with_capacity(8);
        for token in tokens {
            if !is_coordinate_token(token) {
                return Err(MapError::corners(format!("not a coordinate: {:?}", token)));
            }
            let value = token
                .parse::<f64>()
                .map_err(|e| MapError::corners(format!("{:?}: {}", token, e)))?;
            values.push(value);
        }
        Self::from_values(&values)
    }
}

impl fmt::Display for CornerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.join(","))
    }
}

/// One sample of a route. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(from = "RoutePointWire")]
pub struct RoutePoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    pub lat: f64,
    pub lon: f64,
}

/// Accepted JSON shapes for a route sample: `{time?, lat, lon}` or
/// `{time?, latLon: [lat, lon]}`
#[derive(Deserialize)]
#[serde(untagged)]
enum RoutePointWire {
    Flat {
        #[serde(default)]
        time: Option<i64>,
        lat: f64,
        lon: f64,
    },
    Pair {
        #[serde(default)]
        time: Option<i64>,
        #[serde(rename = "latLon", alias = "latlon")]
        lat_lon: [f64; 2],
    },
}

impl From<RoutePointWire> for RoutePoint {
    fn from(wire: RoutePointWire) -> Self {
        match wire {
            RoutePointWire::Flat { time, lat, lon } => Self::new(time, lat, lon),
            RoutePointWire::Pair { time, lat_lon } => Self::new(time, lat_lon[0], lat_lon[1]),
        }
    }
}

impl RoutePoint {
    pub fn new(time: Option<i64>, lat: f64, lon: f64) -> Self {
        Self { time, lat, lon }
    }

    pub fn timed(time: i64, lat: f64, lon: f64) -> Self {
        Self::new(Some(time), lat, lon)
    }

    pub fn untimed(lat: f64, lon: f64) -> Self {
        Self::new(None, lat, lon)
    }

    pub fn geo(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }
}

/// An ordered, validated sequence of route points.
///
/// Either every point carries a timestamp or none does.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct Route {
    points: Vec<RoutePoint>,
}

impl Route {
    pub fn new(points: Vec<RoutePoint>) -> Result<Self> {
        for (i, p) in points.iter().enumerate() {
            if !p.geo().is_finite() {
                return Err(MapError::route(format!("point {} has non-finite coordinates", i)));
            }
        }
        let timed = points.iter().filter(|p| p.time.is_some()).count();
        if timed != 0 && timed != points.len() {
            return Err(MapError::route(format!(
                "{} of {} points carry a timestamp",
                timed,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[RoutePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_timed(&self) -> bool {
        self.points.first().is_some_and(|p| p.time.is_some())
    }

    pub fn start_time(&self) -> Option<i64> {
        self.points.first().and_then(|p| p.time)
    }

    /// Elapsed track time in milliseconds, if timed
    pub fn duration_ms(&self) -> Option<i64> {
        let first = self.points.first()?.time?;
        let last = self.points.last()?.time?;
        Some(last - first)
    }

    /// Total great-circle length in meters
    pub fn distance(&self) -> f64 {
        self.points
            .windows(2)
            .map(|w| w[0].geo().distance(&w[1].geo()))
            .sum()
    }
}

impl<'de> Deserialize<'de> for Route {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let points = Vec::<RoutePoint>::deserialize(deserializer)?;
        Route::new(points).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square() -> CornerSet {
        CornerSet::new(
            GeoPoint::new(45.01, 6.0),
            GeoPoint::new(45.01, 6.01),
            GeoPoint::new(45.0, 6.01),
            GeoPoint::new(45.0, 6.0),
        )
    }

    #[test]
    fn test_distance_one_degree_latitude() {
        let a = GeoPoint::new(0.0, 0.0);
        let b = GeoPoint::new(1.0, 0.0);
        let d = a.distance(&b);
        assert!((d - 111_319.49).abs() < 1.0, "got {}", d);
        assert_eq!(a.distance(&a), 0.0);
    }

    #[test]
    fn test_corners_parse_and_print() {
        let corners: CornerSet = "45.01,6,45.01,6.01,45,6.01,45,6".parse().unwrap();
        assert_eq!(corners, square());
        assert_eq!(corners.to_string(), "45.01,6,45.01,6.01,45,6.01,45,6");
    }

    #[test]
    fn test_corners_parse_rejects_bad_input() {
        assert!("1,2,3".parse::<CornerSet>().is_err());
        assert!("91,0,0,0,0,0,0,0".parse::<CornerSet>().is_err());
        assert!("0,181,0,0,0,0,0,0".parse::<CornerSet>().is_err());
        assert!("0,1e3,0,0,0,0,0,0".parse::<CornerSet>().is_err());
        assert!("0,1.,0,0,0,0,0,0".parse::<CornerSet>().is_err());
        assert!("-12.5,-0.25,0,0,0,0,0,0".parse::<CornerSet>().is_ok());
    }

    #[test]
    fn test_rounded_drops_negative_zero() {
        let corners = CornerSet::from_values(&[
            -0.000001, 1.123456, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ])
        .unwrap()
        .rounded();
        assert_eq!(corners.join("_"), "0_1.12346_0_0_0_0_0_0");
    }

    #[test]
    fn test_route_rejects_partial_timestamps() {
        let points = vec![RoutePoint::timed(0, 1.0, 1.0), RoutePoint::untimed(1.0, 1.0)];
        assert!(matches!(Route::new(points), Err(MapError::InvalidRoute(_))));
    }

    #[test]
    fn test_route_rejects_non_finite() {
        let points = vec![RoutePoint::untimed(f64::NAN, 1.0)];
        assert!(Route::new(points).is_err());
    }

    #[test]
    fn test_route_duration_and_distance() {
        let route = Route::new(vec![
            RoutePoint::timed(1_000, 0.0, 0.0),
            RoutePoint::timed(61_000, 0.0, 0.001),
        ])
        .unwrap();
        assert!(route.is_timed());
        assert_eq!(route.duration_ms(), Some(60_000));
        assert!((route.distance() - 111.32).abs() < 0.1);

        let untimed = Route::new(vec![RoutePoint::untimed(0.0, 0.0)]).unwrap();
        assert!(!untimed.is_timed());
        assert_eq!(untimed.duration_ms(), None);
    }

    #[test]
    fn test_route_deserialize_validates() {
        let route: Route =
            serde_json::from_str(r#"[{"time": 5, "lat": 1.0, "lon": 2.0}]"#).unwrap();
        assert_eq!(route.len(), 1);
        let bad = serde_json::from_str::<Route>(
            r#"[{"time": 5, "lat": 1.0, "lon": 2.0}, {"lat": 1.0, "lon": 2.0}]"#,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_route_accepts_lat_lon_pairs() {
        let route: Route = serde_json::from_str(
            r#"[{"time": 5, "latLon": [1.0, 2.0]}, {"time": 6, "latlon": [3.0, 4.0]}, {"time": 7, "lat": 5.0, "lon": 6.0}]"#,
        )
        .unwrap();
        assert_eq!(route.points()[0], RoutePoint::timed(5, 1.0, 2.0));
        assert_eq!(route.points()[1], RoutePoint::timed(6, 3.0, 4.0));
        assert_eq!(route.points()[2], RoutePoint::timed(7, 5.0, 6.0));
        assert!(serde_json::from_str::<Route>(r#"[{"time": 5}]"#).is_err());
    }
}
