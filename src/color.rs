//! Speed palette and per-route color scaling
//!
//! The palette is a fixed red -> yellow -> green gradient pre-sampled into
//! 256 buckets. Values are mapped into it relative to the route's own speed
//! distribution (mean +/- one standard deviation), so slow and fast routes
//! both use the full range of colors.

use image::Rgb;

/// Number of discrete palette buckets
pub const PALETTE_SIZE: usize = 256;

/// Upper clamp for normalized values, keeps the last bucket reachable
const MAX_RELATIVE: f64 = 0.999;

/// Gradient stops as (offset, color)
const SPEED_STOPS: [(f64, [u8; 3]); 3] = [
    (0.0, [0xff, 0x00, 0x00]),
    (0.5, [0xff, 0xff, 0x00]),
    (1.0, [0x00, 0x88, 0x00]),
];

/// A gradient sampled into [`PALETTE_SIZE`] buckets
#[derive(Debug, Clone)]
pub struct Palette {
    buckets: Vec<Rgb<u8>>,
}

impl Default for Palette {
    fn default() -> Self {
        Self::from_stops(&SPEED_STOPS)
    }
}

impl Palette {
    /// Sample a multi-stop gradient at the center of each bucket
    pub fn from_stops(stops: &[(f64, [u8; 3])]) -> Self {
        let buckets = (0..PALETTE_SIZE)
            .map(|i| gradient_at(stops, (i as f64 + 0.5) / PALETTE_SIZE as f64))
            .collect();
        Self { buckets }
    }

    /// Color for a relative position in [0, 1]
    pub fn color_for_percent(&self, relative: f64) -> Rgb<u8> {
        let index = if relative.is_finite() {
            ((relative * PALETTE_SIZE as f64).floor().max(0.0) as usize).min(PALETTE_SIZE - 1)
        } else {
            0
        };
        self.buckets[index]
    }

    pub fn buckets(&self) -> &[Rgb<u8>] {
        &self.buckets
    }
}

/// Linear interpolation between gradient stops; clamps outside the stops
pub fn gradient_at(stops: &[(f64, [u8; 3])], t: f64) -> Rgb<u8> {
    let Some(&(first_off, first)) = stops.first() else {
        return Rgb([0, 0, 0]);
    };
    if t <= first_off {
        return Rgb(first);
    }
    for pair in stops.windows(2) {
        let (o0, c0) = pair[0];
        let (o1, c1) = pair[1];
        if t <= o1 {
            let f = if o1 > o0 { (t - o0) / (o1 - o0) } else { 1.0 };
            return lerp_rgb(Rgb(c0), Rgb(c1), f);
        }
    }
    Rgb(stops[stops.len() - 1].1)
}

/// Component-wise linear interpolation, `f` clamped to [0, 1]
pub fn lerp_rgb(a: Rgb<u8>, b: Rgb<u8>, f: f64) -> Rgb<u8> {
    let f = f.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * f).round() as u8;
    Rgb([mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])])
}

/// Maps speeds to palette colors relative to a route's speed distribution
#[derive(Debug, Clone)]
pub struct SpeedScale {
    pub min: f64,
    pub max: f64,
    palette: Palette,
}

impl SpeedScale {
    /// Scale spanning mean +/- one (population) standard deviation
    pub fn from_speeds(speeds: &[f64]) -> Self {
        let (min, max) = if speeds.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            let n = speeds.len() as f64;
            let avg = speeds.iter().sum::<f64>() / n;
            let variance = speeds.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / n;
            let std_dev = variance.sqrt();
            (avg - std_dev, avg + std_dev)
        };
        Self {
            min,
            max,
            palette: Palette::default(),
        }
    }

    pub fn median(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Position of `speed` within the scale, clamped to [0, 0.999].
    /// Non-finite results (flat or empty scale) map to 0.
    pub fn normalize(&self, speed: f64) -> f64 {
        let relative = ((speed - self.min) / (self.max - self.min)).clamp(0.0, MAX_RELATIVE);
        if relative.is_nan() {
            0.0
        } else {
            relative
        }
    }

    pub fn color(&self, speed: f64) -> Rgb<u8> {
        self.palette.color_for_percent(self.normalize(speed))
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }
}
