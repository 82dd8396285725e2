//! Route rendering onto a calibrated map image
//!
//! [`draw_route`] is a pure function from (image, corners, route, options)
//! to a new raster. Internally it builds an opaque base canvas and two
//! offscreen layers (speed-colored path, black outline plus time ticks)
//! that are composited in a fixed order, then optionally stacks the
//! informational header on top.

use image::imageops::{self, FilterType};
use image::{Rgb, Rgba, RgbaImage};
use std::borrow::Cow;
use std::time::Instant;
use tracing::debug;

use crate::calibration::CalibrationTransform;
use crate::color::SpeedScale;
use crate::error::{MapError, Result};
use crate::geo::{CornerSet, PlanarPoint, Route};
use crate::header::{draw_header, HeaderFont, HeaderStats, HeaderStyle};
use crate::layers::{composite, BlendMode, Layer, Paint};
use crate::track::{extract_speed, DEFAULT_SPEED_WINDOW};

/// Upper bound on downscale passes; each pass shrinks the image
const MAX_DOWNSCALE_PASSES: usize = 8;

const OUTLINE_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// Rendering switches and styling parameters
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub include_header: bool,
    pub include_route: bool,
    /// Largest allowed render dimension before the source is downscaled
    pub max_dimension: u32,
    /// Path width at one meter per pixel
    pub stroke_width: f64,
    /// Outline ring width at one meter per pixel
    pub outline_width: f64,
    /// Visual tuning factor: the measured meters-per-pixel is divided by it
    /// before widths are scaled, so the default 1.702 draws strokes and dots
    /// about 1.7 times wider than their nominal size
    pub resolution_scale: f64,
    /// Half width of the speed smoothing window, in samples
    pub speed_window: usize,
    /// Track time between tick dots
    pub tick_interval_ms: i64,
    /// Every n-th tick dot is drawn enlarged
    pub major_tick_every: usize,
    pub route_opacity: f32,
    pub outline_opacity: f32,
    pub header_height: u32,
    pub branding: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            include_header: false,
            include_route: true,
            max_dimension: 3000,
            stroke_width: 4.0,
            outline_width: 2.0,
            resolution_scale: 1.702,
            speed_window: DEFAULT_SPEED_WINDOW,
            tick_interval_ms: 10_000,
            major_tick_every: 6,
            route_opacity: 0.45,
            outline_opacity: 0.7,
            header_height: 70,
            branding: "mapdump.com".to_string(),
        }
    }
}

/// Integer pixel rectangle holding the image and every route point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderBounds {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl RenderBounds {
    /// Start from the transform's image rectangle and widen it to cover
    /// every projected point. Never narrower than the image.
    pub fn compute(transform: &CalibrationTransform, points: &[PlanarPoint]) -> Self {
        let offset = transform.header_offset();
        let mut min_x = 0.0_f64;
        let mut max_x = transform.width() as f64;
        let mut min_y = offset;
        let mut max_y = transform.height() as f64 + offset;
        for p in points {
            min_x = min_x.min(p.x);
            max_x = max_x.max(p.x);
            min_y = min_y.min(p.y);
            max_y = max_y.max(p.y);
        }
        Self {
            min_x: min_x.floor(),
            max_x: max_x.ceil(),
            min_y: min_y.floor(),
            max_y: max_y.ceil(),
        }
    }

    pub fn width(&self) -> u32 {
        (self.max_x - self.min_x) as u32
    }

    pub fn height(&self) -> u32 {
        (self.max_y - self.min_y) as u32
    }

    /// Longer side in pixels, without integer saturation
    pub fn largest_side(&self) -> f64 {
        (self.max_x - self.min_x).max(self.max_y - self.min_y)
    }

    /// Same bounds with a banner of `height` pixels stacked on top
    pub fn with_header(&self, height: u32) -> Self {
        Self {
            min_y: self.min_y - height as f64,
            ..*self
        }
    }

    /// Corners clockwise from the top left
    pub fn corners(&self) -> [PlanarPoint; 4] {
        [
            PlanarPoint::new(self.min_x, self.min_y),
            PlanarPoint::new(self.max_x, self.min_y),
            PlanarPoint::new(self.max_x, self.max_y),
            PlanarPoint::new(self.min_x, self.max_y),
        ]
    }
}

/// Result of [`draw_route`]
#[derive(Debug, Clone)]
pub struct RenderedMap {
    pub image: RgbaImage,
    /// Bounds of `image` in the (possibly downscaled) source pixel space
    pub bounds: RenderBounds,
    /// Factor applied to the source image, 1.0 when not downscaled
    pub downscale: f64,
}

/// Project every route point into the image's pixel space
fn project_route(transform: &CalibrationTransform, route: &Route) -> Result<Vec<PlanarPoint>> {
    route
        .points()
        .iter()
        .map(|p| transform.forward(p.geo()))
        .collect()
}

/// Scale an image by `ratio`, never below one pixel per side
pub fn scale_image(image: &RgbaImage, ratio: f64) -> RgbaImage {
    let w = ((image.width() as f64 * ratio).floor() as u32).max(1);
    let h = ((image.height() as f64 * ratio).floor() as u32).max(1);
    imageops::resize(image, w, h, FilterType::Triangle)
}

/// Composite `route` over `image` calibrated by `corners`
pub fn draw_route(
    image: &RgbaImage,
    corners: &CornerSet,
    route: &Route,
    options: &RenderOptions,
    font: Option<&HeaderFont>,
) -> Result<RenderedMap> {
    let started = Instant::now();
    let mut source: Cow<RgbaImage> = Cow::Borrowed(image);
    let mut downscale = 1.0;

    let (transform, points, bounds) = {
        let mut pass = 0;
        loop {
            let transform = CalibrationTransform::new(source.width(), source.height(), corners, 0.0)?;
            let points = project_route(&transform, route)?;
            let bounds = RenderBounds::compute(&transform, &points);
            let largest = bounds.largest_side();
            if largest <= options.max_dimension as f64 || pass >= MAX_DOWNSCALE_PASSES {
                break (transform, points, bounds);
            }

            let ratio = options.max_dimension as f64 / largest;
            let scaled = scale_image(&source, ratio);
            if scaled.dimensions() == source.dimensions() {
                break (transform, points, bounds);
            }
            debug!(
                "Render bounds {:.0}x{:.0} exceed {}, scaling source {}x{} by {:.4}",
                bounds.max_x - bounds.min_x,
                bounds.max_y - bounds.min_y,
                options.max_dimension,
                source.width(),
                source.height(),
                ratio
            );
            downscale *= scaled.width() as f64 / source.width() as f64;
            source = Cow::Owned(scaled);
            pass += 1;
        }
    };

    // The source cannot shrink below one pixel, so a route far outside the
    // map can keep the bounds over the limit
    let largest = bounds.largest_side();
    if largest > options.max_dimension as f64 {
        return Err(MapError::route(format!(
            "route spans {:.0} px at {:.4} scale, over the {} px render limit",
            largest, downscale, options.max_dimension
        )));
    }

    let resolution = transform.resolution()? / options.resolution_scale;
    let outline_width = options.outline_width / resolution;
    let weight = options.stroke_width / resolution;

    let (width, height) = (bounds.width(), bounds.height());
    let mut canvas = RgbaImage::from_pixel(width, height, BACKGROUND);
    imageops::overlay(&mut canvas, &*source, -bounds.min_x as i64, -bounds.min_y as i64);

    let speeds = extract_speed(route, options.speed_window);
    let scale = SpeedScale::from_speeds(&speeds);

    if options.include_route && !route.is_empty() {
        let shifted: Vec<PlanarPoint> = points
            .iter()
            .map(|p| PlanarPoint::new(p.x - bounds.min_x, p.y - bounds.min_y))
            .collect();

        let mut path = Layer::new("route", width, height, options.route_opacity)?;
        let mut outline = Layer::new("outline", width, height, options.outline_opacity)?;

        let outline_path = decimate(&shifted, weight);
        outline.stroke_polyline(
            &outline_path,
            weight + 2.0 * outline_width,
            OUTLINE_COLOR,
            BlendMode::SourceOver,
        );
        outline.stroke_polyline(&outline_path, weight, OUTLINE_COLOR, BlendMode::DestinationOut);

        for j in 1..shifted.len() {
            let paint = Paint::Linear {
                from: scale.color(speeds[j - 1]),
                to: scale.color(speeds[j]),
            };
            path.stroke_segment(shifted[j - 1], shifted[j], weight, paint, BlendMode::SourceOver);
        }

        if route.is_timed() {
            draw_time_ticks(&mut outline, route, &shifted, resolution, options);
        }

        composite(&mut canvas, vec![path, outline])?;
    }

    let (image, bounds) = if options.include_header {
        let stats = if options.include_route {
            header_stats(route, &scale)
        } else {
            None
        };
        let style = HeaderStyle {
            height: options.header_height,
            branding: &options.branding,
            font,
        };
        (
            draw_header(&canvas, stats.as_ref(), &style),
            bounds.with_header(options.header_height),
        )
    } else {
        (canvas, bounds)
    };

    debug!(
        "Rendered {} points into {}x{} in {:?}",
        route.len(),
        image.width(),
        image.height(),
        started.elapsed()
    );

    Ok(RenderedMap {
        image,
        bounds,
        downscale,
    })
}

/// Geographic footprint of the raster [`draw_route`] produces for an image
/// of `size` pixels, in TL, TR, BR, BL order.
pub fn get_corners(
    size: (u32, u32),
    corners: &CornerSet,
    route: &Route,
    options: &RenderOptions,
) -> Result<CornerSet> {
    let transform = CalibrationTransform::new(size.0, size.1, corners, 0.0)?;
    let points = project_route(&transform, route)?;
    let mut bounds = RenderBounds::compute(&transform, &points);
    if options.include_header {
        bounds = bounds.with_header(options.header_height);
    }
    let c = bounds.corners();
    Ok(CornerSet::new(
        transform.backward(c[0])?,
        transform.backward(c[1])?,
        transform.backward(c[2])?,
        transform.backward(c[3])?,
    ))
}

/// Drop points closer than `min_dist` (on the rounded pixel grid) to the
/// previously kept point.
fn decimate(points: &[PlanarPoint], min_dist: f64) -> Vec<PlanarPoint> {
    let mut kept: Vec<PlanarPoint> = Vec::with_capacity(points.len());
    for p in points {
        let far_enough = kept.last().map_or(true, |prev| {
            let (dx, dy) = (prev.x.round() - p.x.round(), prev.y.round() - p.y.round());
            (dx * dx + dy * dy).sqrt() > min_dist
        });
        if far_enough {
            kept.push(*p);
        }
    }
    kept
}

/// A dot every `tick_interval_ms` of track time, every n-th one enlarged
fn draw_time_ticks(
    layer: &mut Layer,
    route: &Route,
    shifted: &[PlanarPoint],
    resolution: f64,
    options: &RenderOptions,
) {
    let Some(start) = route.start_time() else {
        return;
    };
    let interval = options.tick_interval_ms.max(1);
    let major_every = options.major_tick_every.max(1);
    let stroke = 1.0 / resolution;

    let mut prev_t = start - 2 * interval;
    let mut count = 0usize;
    for (p, pt) in route.points().iter().zip(shifted) {
        let Some(t) = p.time else { continue };
        if t >= prev_t + interval {
            let radius = (if count % major_every == 0 { 3.0 } else { 1.0 }) / resolution;
            layer.fill_circle(*pt, radius + stroke / 2.0, OUTLINE_COLOR, BlendMode::SourceOver);
            prev_t = t;
            count += 1;
        }
    }
}

fn header_stats(route: &Route, scale: &SpeedScale) -> Option<HeaderStats> {
    if route.is_empty() || !route.is_timed() {
        return None;
    }
    Some(HeaderStats {
        scale: scale.clone(),
        distance_m: route.distance(),
        duration_ms: route.duration_ms()?,
        start_ms: route.start_time()?,
    })
}
