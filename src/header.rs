//! Informational banner drawn above a rendered route
//!
//! The banner carries a speed legend, total distance, elapsed time, start
//! time and branding text at fixed pixel offsets. Text needs a TrueType
//! font; without one the banner and legend bar are still drawn.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut};
use imageproc::rect::Rect;
use rusttype::{point, Font, Scale};
use std::path::Path;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::color::{lerp_rgb, SpeedScale};
use crate::error::{MapError, Result};

const BACKGROUND: Rgba<u8> = Rgba([0x22, 0x22, 0x22, 0xff]);
const TEXT_COLOR: Rgba<u8> = Rgba([0xff, 0xff, 0xff, 0xff]);

const PALETTE_X: f32 = 40.0;
const PALETTE_Y: f32 = 30.0;
const PALETTE_WIDTH: f32 = 180.0;
const LEGEND_THICKNESS: f32 = 16.0;
const LABEL_SIZE: f32 = 15.0;
const BRANDING_SIZE: f32 = 60.0;

/// A TrueType font used for banner text
pub struct HeaderFont {
    font: Font<'static>,
}

impl std::fmt::Debug for HeaderFont {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderFont").finish_non_exhaustive()
    }
}

impl HeaderFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = Font::try_from_vec(bytes)
            .ok_or_else(|| MapError::loader("font data is not a valid TrueType font"))?;
        Ok(Self { font })
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(bytes)
    }

    fn text_width(&self, text: &str, size: f32) -> f32 {
        let scale = Scale::uniform(size);
        self.font
            .layout(text, scale, point(0.0, 0.0))
            .last()
            .map(|g| g.position().x + g.unpositioned().h_metrics().advance_width)
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Left,
    Center,
}

/// Route statistics shown in the banner (timed routes only)
#[derive(Debug, Clone)]
pub struct HeaderStats {
    pub scale: SpeedScale,
    pub distance_m: f64,
    pub duration_ms: i64,
    pub start_ms: i64,
}

/// Banner layout options
#[derive(Debug, Clone)]
pub struct HeaderStyle<'a> {
    pub height: u32,
    pub branding: &'a str,
    pub font: Option<&'a HeaderFont>,
}

/// Stack a banner of `style.height` pixels on top of `canvas`
pub fn draw_header(canvas: &RgbaImage, stats: Option<&HeaderStats>, style: &HeaderStyle) -> RgbaImage {
    let width = canvas.width();
    let header_h = style.height;
    let mut out = RgbaImage::new(width, canvas.height() + header_h);
    if header_h > 0 {
        draw_filled_rect_mut(&mut out, Rect::at(0, 0).of_size(width, header_h), BACKGROUND);
    }
    image::imageops::replace(&mut out, canvas, 0, header_h as i64);

    if style.font.is_none() {
        tracing::debug!("No header font configured, drawing banner without text");
    }

    if let Some(stats) = stats {
        draw_legend(&mut out, &stats.scale);
        if let Some(font) = style.font {
            let label_y = PALETTE_Y + LEGEND_THICKNESS / 2.0 + 15.0;
            let labels = [
                (PALETTE_X, stats.scale.min),
                (PALETTE_X + PALETTE_WIDTH / 2.0, stats.scale.median()),
                (PALETTE_X + PALETTE_WIDTH, stats.scale.max),
            ];
            for (x, speed) in labels {
                draw_label(&mut out, font, &format_speed(speed), x, label_y, LABEL_SIZE, Align::Center);
            }

            let info_x = PALETTE_X + PALETTE_WIDTH + 35.0;
            draw_label(
                &mut out,
                font,
                &format_distance(stats.distance_m),
                info_x,
                PALETTE_Y,
                LABEL_SIZE,
                Align::Left,
            );
            draw_label(
                &mut out,
                font,
                &format_duration(stats.duration_ms),
                info_x + 80.0,
                PALETTE_Y,
                LABEL_SIZE,
                Align::Left,
            );
            match format_start_time(stats.start_ms) {
                Ok(start) => draw_label(
                    &mut out,
                    font,
                    &start,
                    info_x,
                    PALETTE_Y + 20.0,
                    LABEL_SIZE,
                    Align::Left,
                ),
                Err(e) => tracing::warn!("Could not format start time {}: {}", stats.start_ms, e),
            }
        }
    }

    if let Some(font) = style.font {
        draw_label(
            &mut out,
            font,
            style.branding,
            width as f32 - 400.0,
            header_h as f32 - 17.0,
            BRANDING_SIZE,
            Align::Left,
        );
    }
    out
}

/// Horizontal gradient bar through the palette's low, mid and high colors
fn draw_legend(img: &mut RgbaImage, scale: &SpeedScale) {
    let palette = scale.palette();
    let stops = [
        palette.color_for_percent(0.0),
        palette.color_for_percent(0.5),
        palette.color_for_percent(1.0),
    ];
    let top = (PALETTE_Y - LEGEND_THICKNESS / 2.0) as u32;
    let bottom = (PALETTE_Y + LEGEND_THICKNESS / 2.0) as u32;
    let left = PALETTE_X as u32;
    let right = (PALETTE_X + PALETTE_WIDTH) as u32;

    for x in left..right.min(img.width()) {
        let t = (x - left) as f64 / PALETTE_WIDTH as f64;
        let c = if t < 0.5 {
            lerp_rgb(stops[0], stops[1], t * 2.0)
        } else {
            lerp_rgb(stops[1], stops[2], (t - 0.5) * 2.0)
        };
        for y in top..bottom.min(img.height()) {
            img.put_pixel(x, y, Rgba([c[0], c[1], c[2], 0xff]));
        }
    }

    let mid = PALETTE_X + PALETTE_WIDTH / 2.0;
    draw_line_segment_mut(
        img,
        (mid, PALETTE_Y - LEGEND_THICKNESS / 2.0),
        (mid, PALETTE_Y + LEGEND_THICKNESS / 2.0),
        BACKGROUND,
    );
}

/// Draw `text` with its baseline at `baseline`
fn draw_label(
    img: &mut RgbaImage,
    font: &HeaderFont,
    text: &str,
    x: f32,
    baseline: f32,
    size: f32,
    align: Align,
) {
    let scale = Scale::uniform(size);
    let ascent = font.font.v_metrics(scale).ascent;
    let x = match align {
        Align::Left => x,
        Align::Center => x - font.text_width(text, size) / 2.0,
    };
    draw_text_mut(
        img,
        TEXT_COLOR,
        x.round() as i32,
        (baseline - ascent).round() as i32,
        scale,
        &font.font,
        text,
    );
}

/// Compact elapsed time: `45s`, `3m05s`, `1h02m03s`
pub fn format_duration(ms: i64) -> String {
    let total = ms.max(0) / 1000;
    let (h, m, s) = (total / 3600, (total / 60) % 60, total % 60);
    if h > 0 {
        format!("{}h{:02}m{:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m{:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

/// Pace from seconds per kilometer, e.g. `5m30s/km`
pub fn format_pace(secs_per_km: f64) -> String {
    format!("{}/km", format_duration((secs_per_km * 1000.0) as i64))
}

pub fn format_speed(kmh: f64) -> String {
    format!("{:.2}km/h", kmh)
}

pub fn format_distance(meters: f64) -> String {
    format!("{:.3}km", meters / 1e3)
}

/// Start timestamp in UTC, e.g. `Tuesday, March 5, 2024 07:04:09 UTC`
pub fn format_start_time(ms: i64) -> Result<String> {
    let dt = OffsetDateTime::from_unix_timestamp_nanos(ms as i128 * 1_000_000)
        .map_err(|e| MapError::route(format!("timestamp {} out of range: {}", ms, e)))?;
    let format = format_description!(
        "[weekday], [month repr:long] [day padding:none], [year] [hour]:[minute]:[second] UTC"
    );
    Ok(dt.format(&format)?)
}
