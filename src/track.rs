//! Per-point speed extraction for route coloring

use crate::geo::Route;

/// Default half width of the speed smoothing window, in samples
pub const DEFAULT_SPEED_WINDOW: usize = 10;

/// Speed used before any valid window has been seen (km/h)
const SEED_SPEED_KMH: f64 = 1.0;

/// One smoothed speed (km/h) per route point.
///
/// Each value is the great-circle distance covered across a window of
/// `half_window` samples either side of the point (clamped at the ends),
/// divided by the window's elapsed time. Windows with no elapsed time, and
/// routes without timestamps, repeat the previous value.
pub fn extract_speed(route: &Route, half_window: usize) -> Vec<f64> {
    let points = route.points();
    let n = points.len();
    let mut speeds = Vec::with_capacity(n);
    let mut prev_speed = SEED_SPEED_KMH;

    for i in 0..n {
        let lo = i.saturating_sub(half_window);
        let hi = (i + half_window).min(n - 1);

        let distance: f64 = points[lo..=hi]
            .windows(2)
            .map(|w| w[0].geo().distance(&w[1].geo()))
            .sum();

        let speed = match (points[lo].time, points[hi].time) {
            // meters per millisecond -> km/h
            (Some(t0), Some(t1)) => distance / (t1 - t0) as f64 * 3600.0,
            _ => f64::NAN,
        };
        let speed = if speed.is_finite() { speed } else { prev_speed };

        speeds.push(speed);
        prev_speed = speed;
    }
    speeds
}
