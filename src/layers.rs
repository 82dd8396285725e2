//! Layered raster compositing
//!
//! Route drawing happens on named offscreen layers, each with its own
//! opacity, which are composited over the base image in a fixed order.
//! Shapes are rasterized by `vello_cpu`; strokes use round caps and joins.
//! Rasterized layer pixels are premultiplied RGBA.

use image::{Rgb, RgbaImage};
use vello_cpu::kurbo::{self, BezPath, Cap, Join, Shape};
use vello_cpu::peniko::{self, Compose, Mix};

use crate::error::{MapError, Result};
use crate::geo::PlanarPoint;

/// Flattening tolerance for circles, in pixels
const CIRCLE_TOLERANCE: f64 = 0.1;

/// How a drawing operation combines with what is already on the layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// Paint over existing content
    SourceOver,
    /// Erase existing content where the shape covers it
    DestinationOut,
}

/// Fill style for strokes
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Paint {
    Solid(Rgb<u8>),
    /// Linear gradient running from the segment start to its end
    Linear { from: Rgb<u8>, to: Rgb<u8> },
}

fn color(c: Rgb<u8>) -> peniko::Color {
    peniko::Color::from_rgba8(c[0], c[1], c[2], 255)
}

fn point(p: PlanarPoint) -> kurbo::Point {
    kurbo::Point::new(p.x, p.y)
}

fn is_finite(p: &PlanarPoint) -> bool {
    p.x.is_finite() && p.y.is_finite()
}

fn round_stroke(width: f64) -> kurbo::Stroke {
    kurbo::Stroke::new(width)
        .with_caps(Cap::Round)
        .with_join(Join::Round)
}

/// An offscreen drawing surface
pub struct Layer {
    name: &'static str,
    width: u16,
    height: u16,
    ctx: vello_cpu::RenderContext,
    opacity: f32,
}

impl Layer {
    /// A fully transparent layer
    pub fn new(name: &'static str, width: u32, height: u32, opacity: f32) -> Result<Self> {
        let w: u16 = width
            .try_into()
            .map_err(|_| MapError::render(format!("layer {} width {} exceeds u16", name, width)))?;
        let h: u16 = height
            .try_into()
            .map_err(|_| MapError::render(format!("layer {} height {} exceeds u16", name, height)))?;
        Ok(Self {
            name,
            width: w,
            height: h,
            ctx: vello_cpu::RenderContext::new(w, h),
            opacity: opacity.clamp(0.0, 1.0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (u32::from(self.width), u32::from(self.height))
    }

    /// Run `draw` with `mode` applied to everything it paints
    fn with_mode(&mut self, mode: BlendMode, draw: impl FnOnce(&mut vello_cpu::RenderContext)) {
        match mode {
            BlendMode::SourceOver => draw(&mut self.ctx),
            BlendMode::DestinationOut => {
                self.ctx
                    .push_blend_layer(peniko::BlendMode::new(Mix::Normal, Compose::DestOut));
                draw(&mut self.ctx);
                self.ctx.pop_layer();
            }
        }
    }

    /// Stroke a single segment of the given `width`
    pub fn stroke_segment(
        &mut self,
        a: PlanarPoint,
        b: PlanarPoint,
        width: f64,
        paint: Paint,
        mode: BlendMode,
    ) {
        if !(is_finite(&a) && is_finite(&b)) || width <= 0.0 {
            return;
        }
        if a == b {
            let c = match paint {
                Paint::Solid(c) => c,
                Paint::Linear { from, .. } => from,
            };
            self.fill_circle(a, width / 2.0, c, mode);
            return;
        }

        let mut path = BezPath::new();
        path.move_to(point(a));
        path.line_to(point(b));
        self.with_mode(mode, |ctx| {
            match paint {
                Paint::Solid(c) => ctx.set_paint(color(c)),
                Paint::Linear { from, to } => ctx.set_paint(
                    peniko::Gradient::new_linear(point(a), point(b))
                        .with_stops([color(from), color(to)]),
                ),
            }
            ctx.set_stroke(round_stroke(width));
            ctx.stroke_path(&path);
        });
    }

    /// Stroke a polyline with one solid color
    pub fn stroke_polyline(
        &mut self,
        points: &[PlanarPoint],
        width: f64,
        c: Rgb<u8>,
        mode: BlendMode,
    ) {
        let points: Vec<PlanarPoint> = points.iter().copied().filter(is_finite).collect();
        match points.as_slice() {
            [] => {}
            [p] => self.fill_circle(*p, width / 2.0, c, mode),
            [first, rest @ ..] => {
                if width <= 0.0 {
                    return;
                }
                let mut path = BezPath::new();
                path.move_to(point(*first));
                for p in rest {
                    path.line_to(point(*p));
                }
                self.with_mode(mode, |ctx| {
                    ctx.set_paint(color(c));
                    ctx.set_stroke(round_stroke(width));
                    ctx.stroke_path(&path);
                });
            }
        }
    }

    pub fn fill_circle(&mut self, center: PlanarPoint, radius: f64, c: Rgb<u8>, mode: BlendMode) {
        if !is_finite(&center) || radius.is_nan() || radius <= 0.0 {
            return;
        }
        let path = kurbo::Circle::new(point(center), radius).to_path(CIRCLE_TOLERANCE);
        self.with_mode(mode, |ctx| {
            ctx.set_paint(color(c));
            ctx.fill_path(&path);
        });
    }

    /// Render everything drawn so far into premultiplied RGBA pixels
    pub fn rasterize(mut self) -> Result<RgbaImage> {
        let mut pixmap = vello_cpu::Pixmap::new(self.width, self.height);
        self.ctx.flush();
        self.ctx.render_to_pixmap(&mut pixmap);
        RgbaImage::from_raw(
            u32::from(self.width),
            u32::from(self.height),
            pixmap.data_as_u8_slice().to_vec(),
        )
        .ok_or_else(|| MapError::render(format!("layer {} pixmap size mismatch", self.name)))
    }
}

/// Composite `layers` over an opaque `base`, in order
pub fn composite(base: &mut RgbaImage, layers: Vec<Layer>) -> Result<()> {
    for layer in layers {
        if layer.dimensions() != base.dimensions() {
            tracing::warn!(
                "Skipping layer {}: size {:?} does not match base {:?}",
                layer.name,
                layer.dimensions(),
                base.dimensions()
            );
            continue;
        }
        let op = layer.opacity;
        if op <= 0.0 {
            continue;
        }
        let name = layer.name;
        let pixels = layer.rasterize()?;
        for (dst, src) in base.pixels_mut().zip(pixels.pixels()) {
            if src[3] == 0 {
                continue;
            }
            let inv = 1.0 - src[3] as f32 / 255.0 * op;
            for i in 0..4 {
                let v = src[i] as f32 * op + dst[i] as f32 * inv;
                dst[i] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
        tracing::trace!("Composited layer {} at opacity {}", name, op);
    }
    Ok(())
}
