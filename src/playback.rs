//! Replay of a timed route over a calibrated map
//!
//! A session maps a progress percentage onto the archive's time span and
//! produces, per frame, the current marker and the recent tail polyline in
//! image pixels.

use serde::{Deserialize, Serialize};

use crate::archive::PositionArchive;
use crate::calibration::CalibrationTransform;
use crate::error::{MapError, Result};
use crate::geo::{PlanarPoint, Route};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PlaybackOptions {
    /// Track time covered by the tail polyline
    pub tail_length_ms: i64,
    /// The marker is hidden when no real sample is this recent
    pub marker_gap_ms: i64,
    pub fps: u32,
    /// Track seconds played per real second
    pub speed: f64,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            tail_length_ms: 60_000,
            marker_gap_ms: 30_000,
            fps: 15,
            speed: 8.0,
        }
    }
}

/// What to draw for one instant of the replay
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PlaybackFrame {
    pub time_ms: i64,
    pub progress: f64,
    pub marker: Option<PlanarPoint>,
    pub tail: Vec<PlanarPoint>,
}

#[derive(Debug, Clone)]
pub struct PlaybackSession {
    archive: PositionArchive,
    transform: CalibrationTransform,
    options: PlaybackOptions,
    progress: f64,
}

impl PlaybackSession {
    pub fn new(
        archive: PositionArchive,
        transform: CalibrationTransform,
        options: PlaybackOptions,
    ) -> Result<Self> {
        if archive.is_empty() {
            return Err(MapError::EmptyArchive);
        }
        Ok(Self {
            archive,
            transform,
            options,
            progress: 0.0,
        })
    }

    pub fn from_route(
        route: &Route,
        transform: CalibrationTransform,
        options: PlaybackOptions,
    ) -> Result<Self> {
        Self::new(PositionArchive::from_route(route)?, transform, options)
    }

    pub fn archive(&self) -> &PositionArchive {
        &self.archive
    }

    pub fn options(&self) -> &PlaybackOptions {
        &self.options
    }

    /// Progress through the track, 0 to 100
    pub fn progress(&self) -> f64 {
        self.progress
    }

    pub fn set_progress(&mut self, progress: f64) {
        self.progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
    }

    pub fn is_finished(&self) -> bool {
        self.progress >= 100.0
    }

    fn span(&self) -> (i64, i64) {
        match (self.archive.first(), self.archive.last()) {
            (Some(f), Some(l)) => (f.timestamp_ms, l.timestamp_ms),
            _ => (0, 0),
        }
    }

    /// Track time at the current progress
    pub fn current_time(&self) -> i64 {
        let (first, last) = self.span();
        first + ((last - first) as f64 * self.progress / 100.0).round() as i64
    }

    /// Milliseconds played since the first sample
    pub fn elapsed_ms(&self) -> i64 {
        self.current_time() - self.span().0
    }

    /// Move forward by one frame (`speed / fps` track seconds); returns true
    /// once the end of the track is reached.
    pub fn advance(&mut self) -> bool {
        let (first, last) = self.span();
        let duration = (last - first) as f64;
        if duration <= 0.0 {
            self.progress = 100.0;
            return true;
        }
        let step_ms = self.options.speed / self.options.fps.max(1) as f64 * 1000.0;
        let now = first as f64 + duration * self.progress / 100.0 + step_ms;
        self.progress = ((now - first as f64) / duration * 100.0).min(100.0);
        self.is_finished()
    }

    pub fn slower(&mut self) {
        self.options.speed = (self.options.speed / 2.0).max(1.0);
    }

    pub fn faster(&mut self) {
        self.options.speed *= 2.0;
    }

    /// Marker and tail at the current time
    pub fn frame(&self) -> Result<PlaybackFrame> {
        let now = self.current_time();

        let marker = if self
            .archive
            .has_point_in_interval(now - self.options.marker_gap_ms, now)
        {
            let pos = self.archive.get_by_time(now)?;
            Some(self.transform.forward(pos.geo())?)
        } else {
            None
        };

        let tail_start = now - self.options.tail_length_ms;
        let tail = if self.archive.has_point_in_interval(tail_start, now) {
            self.archive
                .extract_interval(tail_start, now)?
                .positions()
                .iter()
                .map(|p| self.transform.forward(p.geo()))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        Ok(PlaybackFrame {
            time_ms: now,
            progress: self.progress,
            marker,
            tail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{CornerSet, GeoPoint, RoutePoint};

    fn transform() -> CalibrationTransform {
        let corners = CornerSet::new(
            GeoPoint::new(1.0, 0.0),
            GeoPoint::new(1.0, 1.0),
            GeoPoint::new(0.0, 1.0),
            GeoPoint::new(0.0, 0.0),
        );
        CalibrationTransform::new(1000, 1000, &corners, 0.0).unwrap()
    }

    /// Samples every 10 s for 100 s, then a 200 s gap, then one more sample
    fn gappy_route() -> Route {
        let mut points: Vec<RoutePoint> = (0..=10)
            .map(|i| RoutePoint::timed(i * 10_000, 0.5, 0.05 * i as f64))
            .collect();
        points.push(RoutePoint::timed(300_000, 0.5, 0.9));
        Route::new(points).unwrap()
    }

    fn session() -> PlaybackSession {
        PlaybackSession::from_route(&gappy_route(), transform(), PlaybackOptions::default()).unwrap()
    }

    #[test]
    fn test_progress_maps_to_time() {
        let mut s = session();
        assert_eq!(s.current_time(), 0);
        s.set_progress(50.0);
        assert_eq!(s.current_time(), 150_000);
        s.set_progress(250.0);
        assert_eq!(s.progress(), 100.0);
        assert_eq!(s.current_time(), 300_000);
    }

    #[test]
    fn test_advance_steps_by_speed_over_fps() {
        let mut s = session();
        let finished = s.advance();
        assert!(!finished);
        // 8 / 15 s per frame
        assert!((s.current_time() - 533).abs() <= 1, "got {}", s.current_time());

        s.faster();
        assert_eq!(s.options().speed, 16.0);
        s.slower();
        s.slower();
        s.slower();
        s.slower();
        assert_eq!(s.options().speed, 1.0);

        s.set_progress(99.99);
        assert!(s.advance());
        assert_eq!(s.progress(), 100.0);
    }

    #[test]
    fn test_frame_inside_dense_section() {
        let mut s = session();
        s.set_progress(25.0); // 75 s
        let frame = s.frame().unwrap();
        assert_eq!(frame.time_ms, 75_000);
        let marker = frame.marker.unwrap();
        assert!((marker.y - 500.0).abs() < 1.0);
        // 15 s .. 75 s: two interpolated edges and 6 real samples
        assert_eq!(frame.tail.len(), 8);
        assert_eq!(*frame.tail.last().unwrap(), marker);
    }

    #[test]
    fn test_frame_hides_marker_and_tail_in_gap() {
        let mut s = session();
        // 150 s: last real sample at 100 s, 50 s ago
        s.set_progress(50.0);
        let frame = s.frame().unwrap();
        assert!(frame.marker.is_none());
        assert!(!frame.tail.is_empty());

        // 200 s: nothing within the last 60 s
        s.set_progress(200.0 / 3.0);
        let frame = s.frame().unwrap();
        assert!(frame.marker.is_none());
        assert!(frame.tail.is_empty());
    }

    #[test]
    fn test_single_sample_route() {
        let route = Route::new(vec![RoutePoint::timed(5_000, 0.5, 0.5)]).unwrap();
        let mut s = PlaybackSession::from_route(&route, transform(), PlaybackOptions::default()).unwrap();
        assert!(s.advance());
        let frame = s.frame().unwrap();
        assert_eq!(frame.time_ms, 5_000);
        assert!(frame.marker.is_some());
    }

    #[test]
    fn test_empty_route_is_rejected() {
        let err = PlaybackSession::from_route(&Route::empty(), transform(), PlaybackOptions::default());
        assert!(matches!(err, Err(MapError::EmptyArchive)));
    }
}
