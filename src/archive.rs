//! Time-indexed position store used for playback
//!
//! Samples are kept sorted ascending by timestamp; inserting a sample whose
//! timestamp already exists replaces the stored one. Lookups are binary
//! searches, and queries between two samples interpolate linearly.

use serde::{Deserialize, Serialize};

use crate::error::{MapError, Result};
use crate::geo::{GeoPoint, Route, RoutePoint};

/// One timed GPS sample
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Position {
    pub timestamp_ms: i64,
    pub lat: f64,
    pub lon: f64,
    #[serde(default)]
    pub accuracy: f64,
}

impl Position {
    pub fn new(timestamp_ms: i64, lat: f64, lon: f64, accuracy: f64) -> Self {
        Self {
            timestamp_ms,
            lat,
            lon,
            accuracy,
        }
    }

    pub fn geo(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lon)
    }

    /// Great-circle distance in meters
    pub fn distance(&self, other: &Position) -> f64 {
        self.geo().distance(&other.geo())
    }

    /// Average speed between two samples in meters per millisecond
    pub fn speed(&self, other: &Position) -> f64 {
        self.distance(other) / (self.timestamp_ms - other.timestamp_ms).abs() as f64
    }

    /// Linear interpolation toward `other` at `timestamp_ms`
    pub fn toward_at(&self, other: &Position, timestamp_ms: i64) -> Position {
        let span = (other.timestamp_ms - self.timestamp_ms) as f64;
        let r = if span == 0.0 {
            0.0
        } else {
            (timestamp_ms - self.timestamp_ms) as f64 / span
        };
        let mix = |a: f64, b: f64| b * r + a * (1.0 - r);
        Position {
            timestamp_ms,
            lat: mix(self.lat, other.lat),
            lon: mix(self.lon, other.lon),
            accuracy: mix(self.accuracy, other.accuracy),
        }
    }
}

/// Positions sorted ascending by timestamp, unique per timestamp
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionArchive {
    positions: Vec<Position>,
}

impl PositionArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a timed route; untimed routes cannot be archived
    pub fn from_route(route: &Route) -> Result<Self> {
        if !route.is_empty() && !route.is_timed() {
            return Err(MapError::route("route has no timestamps"));
        }
        let mut archive = Self::new();
        for p in route.points() {
            archive.add_route_point(p);
        }
        Ok(archive)
    }

    /// Index of the first sample with timestamp >= `t`
    fn location_of(&self, t: i64) -> usize {
        self.positions.partition_point(|p| p.timestamp_ms < t)
    }

    /// Index just past the last sample with timestamp <= `t`
    fn location_after(&self, t: i64) -> usize {
        self.positions.partition_point(|p| p.timestamp_ms <= t)
    }

    /// Insert keeping order; a sample with an existing timestamp overwrites it
    pub fn add(&mut self, pos: Position) -> &mut Self {
        let index = self.location_of(pos.timestamp_ms);
        if self
            .positions
            .get(index)
            .is_some_and(|p| p.timestamp_ms == pos.timestamp_ms)
        {
            self.positions[index] = pos;
        } else {
            self.positions.insert(index, pos);
        }
        self
    }

    /// Add a route sample; returns false (and stores nothing) when untimed
    pub fn add_route_point(&mut self, p: &RoutePoint) -> bool {
        match p.time {
            Some(t) => {
                self.add(Position::new(t, p.lat, p.lon, 0.0));
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get_by_index(&self, i: usize) -> Option<&Position> {
        self.positions.get(i)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn first(&self) -> Option<&Position> {
        self.positions.first()
    }

    pub fn last(&self) -> Option<&Position> {
        self.positions.last()
    }

    /// Position at time `t`: exact sample, linear interpolation between the
    /// two bracketing samples, or the nearest end sample when out of range.
    pub fn get_by_time(&self, t: i64) -> Result<Position> {
        let (first, last) = match (self.positions.first(), self.positions.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err(MapError::EmptyArchive),
        };
        let index = self.location_of(t);
        if index == 0 {
            return Ok(*first);
        }
        if index >= self.positions.len() {
            return Ok(*last);
        }
        let pos = &self.positions[index];
        if pos.timestamp_ms == t {
            Ok(*pos)
        } else {
            Ok(self.positions[index - 1].toward_at(pos, t))
        }
    }

    /// New archive covering `[t1, t2]`: interpolated boundary samples at
    /// both ends plus every stored sample strictly between them.
    pub fn extract_interval(&self, t1: i64, t2: i64) -> Result<PositionArchive> {
        let (t1, t2) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        let mut result = PositionArchive::new();
        result.add(self.get_by_time(t1)?);

        let start = self.location_after(t1);
        let end = self.location_of(t2);
        if start < end {
            for p in &self.positions[start..end] {
                result.add(*p);
            }
        }

        result.add(self.get_by_time(t2)?);
        Ok(result)
    }

    /// True if at least one stored sample lies in `[t1, t2]`
    pub fn has_point_in_interval(&self, t1: i64, t2: i64) -> bool {
        let (t1, t2) = if t1 <= t2 { (t1, t2) } else { (t2, t1) };
        self.location_of(t1) != self.location_after(t2)
    }

    /// Remove every sample in `[start, end]` together with the first sample
    /// after `end`, whose segment overlaps the interval; returns the count
    pub fn erase_interval(&mut self, start: i64, end: i64) -> usize {
        let (start, end) = if start <= end { (start, end) } else { (end, start) };
        let Some(last) = self.positions.len().checked_sub(1) else {
            return 0;
        };
        let from = self.location_of(start);
        let through = self.location_after(end).min(last);
        if from > through {
            return 0;
        }
        self.positions.drain(from..=through).count()
    }

    /// Time between the first and last sample
    pub fn duration_ms(&self) -> i64 {
        match (self.positions.first(), self.positions.last()) {
            (Some(f), Some(l)) => l.timestamp_ms - f.timestamp_ms,
            _ => 0,
        }
    }

    /// Time elapsed since the first sample, as of `now_ms`
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        self.positions
            .first()
            .map_or(0, |f| now_ms - f.timestamp_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(t: i64, lat: f64, lon: f64) -> Position {
        Position::new(t, lat, lon, 0.0)
    }

    fn timestamps(a: &PositionArchive) -> Vec<i64> {
        a.positions().iter().map(|p| p.timestamp_ms).collect()
    }

    fn sample_archive() -> PositionArchive {
        let mut a = PositionArchive::new();
        for (t, lat) in [(0, 0.0), (10_000, 1.0), (20_000, 2.0), (30_000, 3.0)] {
            a.add(pos(t, lat, lat * 2.0));
        }
        a
    }

    #[test]
    fn test_add_keeps_order_and_dedupes() {
        let mut a = PositionArchive::new();
        for t in [50, 10, 30, 20, 40, 10, 50, 0] {
            a.add(pos(t, t as f64, 0.0));
        }
        assert_eq!(timestamps(&a), vec![0, 10, 20, 30, 40, 50]);

        let count = a.len();
        a.add(pos(30, 99.0, 0.0));
        assert_eq!(a.len(), count);
        assert_eq!(a.get_by_time(30).unwrap().lat, 99.0);
    }

    #[test]
    fn test_untimed_samples_are_rejected() {
        let mut a = PositionArchive::new();
        assert!(!a.add_route_point(&RoutePoint::untimed(1.0, 2.0)));
        assert!(a.is_empty());

        let route = Route::new(vec![RoutePoint::untimed(1.0, 2.0)]).unwrap();
        assert!(PositionArchive::from_route(&route).is_err());
    }

    #[test]
    fn test_get_by_time() {
        let a = sample_archive();
        assert_eq!(a.get_by_time(10_000).unwrap(), pos(10_000, 1.0, 2.0));

        let mid = a.get_by_time(15_000).unwrap();
        assert_eq!(mid.timestamp_ms, 15_000);
        assert!((mid.lat - 1.5).abs() < 1e-12);
        assert!((mid.lon - 3.0).abs() < 1e-12);

        let q = a.get_by_time(22_500).unwrap();
        assert!((q.lat - 2.25).abs() < 1e-12);

        assert_eq!(a.get_by_time(-5).unwrap(), pos(0, 0.0, 0.0));
        assert_eq!(a.get_by_time(99_000).unwrap(), pos(30_000, 3.0, 6.0));
    }

    #[test]
    fn test_empty_archive_queries_fail() {
        let a = PositionArchive::new();
        assert!(matches!(a.get_by_time(0), Err(MapError::EmptyArchive)));
        assert!(matches!(a.extract_interval(0, 10), Err(MapError::EmptyArchive)));
        assert!(!a.has_point_in_interval(0, 10));
        assert_eq!(a.duration_ms(), 0);
    }

    #[test]
    fn test_extract_interval_interpolates_edges() {
        let a = sample_archive();
        let tail = a.extract_interval(5_000, 25_000).unwrap();
        assert_eq!(timestamps(&tail), vec![5_000, 10_000, 20_000, 25_000]);
        assert!((tail.positions()[0].lat - 0.5).abs() < 1e-12);
        assert!((tail.positions()[3].lat - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_extract_interval_aligned_edges() {
        let a = sample_archive();
        let tail = a.extract_interval(10_000, 30_000).unwrap();
        assert_eq!(timestamps(&tail), vec![10_000, 20_000, 30_000]);
    }

    #[test]
    fn test_extract_interval_outside_range_clamps() {
        let a = sample_archive();
        let before = a.extract_interval(-60_000, -1_000).unwrap();
        assert_eq!(timestamps(&before), vec![0]);

        let overlapping = a.extract_interval(-60_000, 15_000).unwrap();
        assert_eq!(timestamps(&overlapping), vec![0, 10_000, 15_000]);
    }

    #[test]
    fn test_has_point_in_interval() {
        let a = sample_archive();
        assert!(a.has_point_in_interval(5_000, 15_000));
        assert!(!a.has_point_in_interval(11_000, 19_000));
        assert!(a.has_point_in_interval(25_000, 30_000));
        assert!(a.has_point_in_interval(30_000, 40_000));
        assert!(!a.has_point_in_interval(31_000, 40_000));
    }

    #[test]
    fn test_erase_interval_takes_following_sample() {
        let mut a = sample_archive();
        assert_eq!(a.erase_interval(5_000, 15_000), 2);
        assert_eq!(timestamps(&a), vec![0, 30_000]);

        let mut a = sample_archive();
        assert_eq!(a.erase_interval(20_000, 10_000), 3);
        assert_eq!(timestamps(&a), vec![0]);
    }

    #[test]
    fn test_erase_interval_at_edges() {
        let mut a = sample_archive();
        assert_eq!(a.erase_interval(25_000, 40_000), 1);
        assert_eq!(timestamps(&a), vec![0, 10_000, 20_000]);
        assert_eq!(a.erase_interval(31_000, 40_000), 0);
        assert_eq!(a.erase_interval(-10, 100_000), 3);
        assert!(a.is_empty());
        assert_eq!(a.erase_interval(0, 10), 0);
    }

    #[test]
    fn test_duration_and_age() {
        let a = sample_archive();
        assert_eq!(a.duration_ms(), 30_000);
        assert_eq!(a.age_ms(40_000), 40_000);
    }

    #[test]
    fn test_position_speed() {
        let a = pos(0, 0.0, 0.0);
        let b = pos(10_000, 0.0, 0.001);
        // 111.32 m in 10 s
        assert!((a.speed(&b) * 1000.0 - 11.132).abs() < 0.01);
    }
}
