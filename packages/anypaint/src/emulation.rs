//! Software paint engine used when the backend cannot express a brush, a
//! composition mode or a perspective transform.
//!
//! The painter mirrors the engine's session state (hints, composition,
//! opacity, brush origin, brush, pen, clip, transform) and rasterizes into
//! an in-memory pixmap that the engine later draws back onto the target.

use kurbo::{Affine, Point, Rect};
use peniko::Extend;
use tiny_skia::{BlendMode, FillRule, Mask, Paint, Pixmap, Shader};

use crate::brush::pattern_image;
use crate::clip::ClipHistory;
use crate::image::BgraImage;
use crate::skia;
use crate::types::{
    Brush, BrushStyle, ClipOperation, CompositionMode, Gradient, GradientKind, GradientStop, Pen,
    RenderHints, Transform, VectorPath,
};

pub fn blend_mode(mode: CompositionMode) -> BlendMode {
    match mode {
        CompositionMode::SourceOver => BlendMode::SourceOver,
        CompositionMode::DestinationOver => BlendMode::DestinationOver,
        CompositionMode::Clear => BlendMode::Clear,
        CompositionMode::Source => BlendMode::Source,
        CompositionMode::Destination => BlendMode::Destination,
        CompositionMode::SourceIn => BlendMode::SourceIn,
        CompositionMode::DestinationIn => BlendMode::DestinationIn,
        CompositionMode::SourceOut => BlendMode::SourceOut,
        CompositionMode::DestinationOut => BlendMode::DestinationOut,
        CompositionMode::SourceAtop => BlendMode::SourceAtop,
        CompositionMode::DestinationAtop => BlendMode::DestinationAtop,
        CompositionMode::Xor => BlendMode::Xor,
        CompositionMode::Plus => BlendMode::Plus,
        CompositionMode::Multiply => BlendMode::Multiply,
        CompositionMode::Screen => BlendMode::Screen,
        CompositionMode::Overlay => BlendMode::Overlay,
        CompositionMode::Darken => BlendMode::Darken,
        CompositionMode::Lighten => BlendMode::Lighten,
        CompositionMode::ColorDodge => BlendMode::ColorDodge,
        CompositionMode::ColorBurn => BlendMode::ColorBurn,
        CompositionMode::HardLight => BlendMode::HardLight,
        CompositionMode::SoftLight => BlendMode::SoftLight,
        CompositionMode::Difference => BlendMode::Difference,
        CompositionMode::Exclusion => BlendMode::Exclusion,
    }
}

/// Premultiplied RGBA of the gradient at `t`, interpolated between the
/// surrounding stops in premultiplied space.
pub(crate) fn sample_stops(stops: &[GradientStop], t: f32) -> [f32; 4] {
    let premul = |s: &GradientStop| {
        let [r, g, b, a] = s.color.components;
        [r * a, g * a, b * a, a]
    };
    let Some(first) = stops.first() else {
        return [0.0; 4];
    };
    if t <= first.offset {
        return premul(first);
    }
    for pair in stops.windows(2) {
        let (s0, s1) = (&pair[0], &pair[1]);
        if t <= s1.offset {
            let span = s1.offset - s0.offset;
            let f = if span > 0.0 { (t - s0.offset) / span } else { 1.0 };
            let (c0, c1) = (premul(s0), premul(s1));
            return std::array::from_fn(|i| c0[i] + (c1[i] - c0[i]) * f);
        }
    }
    stops.last().map(premul).unwrap_or([0.0; 4])
}

/// Applies a spread mode to a raw gradient parameter.
fn spread_t(t: f32, spread: Extend) -> f32 {
    match spread {
        Extend::Pad => t.clamp(0.0, 1.0),
        Extend::Repeat => t.rem_euclid(1.0),
        Extend::Reflect => {
            let m = t.rem_euclid(2.0);
            if m > 1.0 { 2.0 - m } else { m }
        }
    }
}

/// Renders an angular gradient into a device-sized pixmap. `to_user` maps
/// device pixels into gradient space.
fn conical_pixmap(
    width: u32,
    height: u32,
    gradient: &Gradient,
    center: Point,
    angle: f64,
    to_user: Affine,
) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(width, height)?;
    let data = pixmap.data_mut();
    for y in 0..height {
        for x in 0..width {
            let p = to_user * Point::new(x as f64 + 0.5, y as f64 + 0.5);
            let deg = (-(p.y - center.y)).atan2(p.x - center.x).to_degrees();
            let t = ((deg - angle).rem_euclid(360.0) / 360.0) as f32;
            let c = sample_stops(&gradient.stops, spread_t(t, gradient.spread));
            let i = (y as usize * width as usize + x as usize) * 4;
            for k in 0..4 {
                data[i + k] = (c[k].clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        }
    }
    Some(pixmap)
}

pub struct SoftwarePainter {
    pixmap: Pixmap,
    hints: RenderHints,
    composition: CompositionMode,
    opacity: f32,
    brush_origin: Point,
    brush: Brush,
    pen: Pen,
    transform: Transform,
    clip: Option<Mask>,
    clip_empty: bool,
}

impl SoftwarePainter {
    /// Painter over a fully transparent surface.
    pub fn transparent(width: u32, height: u32) -> Option<Self> {
        Some(Self::with_pixmap(Pixmap::new(width, height)?))
    }

    /// Painter seeded with `image`.
    pub fn from_image(image: &BgraImage) -> Option<Self> {
        Some(Self::with_pixmap(skia::bgra_to_pixmap(image)?))
    }

    fn with_pixmap(pixmap: Pixmap) -> Self {
        Self {
            pixmap,
            hints: RenderHints::default(),
            composition: CompositionMode::SourceOver,
            opacity: 1.0,
            brush_origin: Point::ZERO,
            brush: Brush::none(),
            pen: Pen::default(),
            transform: Transform::IDENTITY,
            clip: None,
            clip_empty: false,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub fn image(&self) -> BgraImage {
        skia::pixmap_to_bgra(&self.pixmap)
    }

    pub fn set_render_hints(&mut self, hints: RenderHints) {
        self.hints = hints;
    }

    pub fn set_composition_mode(&mut self, mode: CompositionMode) {
        self.composition = mode;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_brush_origin(&mut self, origin: Point) {
        self.brush_origin = origin;
    }

    pub fn set_brush(&mut self, brush: Brush) {
        self.brush = brush;
    }

    pub fn set_pen(&mut self, pen: Pen) {
        self.pen = pen;
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    fn anti_alias(&self) -> bool {
        self.hints.contains(RenderHints::ANTIALIASING)
    }

    /// Rebuilds the clip from a recorded history, each entry under its own
    /// transform.
    pub fn replay_clips(&mut self, history: &ClipHistory) {
        self.clip = None;
        self.clip_empty = false;
        for record in history.records() {
            match record.op {
                ClipOperation::NoClip => {
                    self.clip = None;
                    self.clip_empty = false;
                }
                ClipOperation::ReplaceClip => {
                    self.clip = None;
                    self.clip_empty = false;
                    self.intersect_clip(&record.path, &record.transform);
                }
                ClipOperation::IntersectClip => self.intersect_clip(&record.path, &record.transform),
            }
        }
    }

    fn intersect_clip(&mut self, path: &VectorPath, transform: &Transform) {
        let Some(mut coverage) = Mask::new(self.width(), self.height()) else {
            return;
        };
        let device = path.transformed(transform);
        match skia::path(&device) {
            Some(p) => coverage.fill_path(
                &p,
                skia::fill_rule(path.fill_rule()),
                self.anti_alias(),
                tiny_skia::Transform::identity(),
            ),
            None => self.clip_empty = true,
        }
        if let Some(existing) = &self.clip {
            for (c, e) in coverage.data_mut().iter_mut().zip(existing.data()) {
                *c = ((*c as u16 * *e as u16 + 127) / 255) as u8;
            }
        }
        self.clip = Some(coverage);
    }

    pub fn clear_clip(&mut self) {
        self.clip = None;
        self.clip_empty = false;
    }

    /// Fill with the current brush, then stroke with the current pen.
    pub fn draw_path(&mut self, path: &VectorPath) {
        let brush = self.brush.clone();
        let pen = self.pen.clone();
        self.fill(path, &brush);
        self.stroke(path, &pen);
    }

    pub fn fill(&mut self, path: &VectorPath, brush: &Brush) {
        if brush.is_empty() || self.clip_empty {
            return;
        }
        let device_space = !self.transform.is_affine() || is_conical(brush);
        let (sk_path, transform) = if device_space {
            (skia::path(&path.transformed(&self.transform)), Affine::IDENTITY)
        } else {
            (skia::path(path), self.transform.to_affine().unwrap_or(Affine::IDENTITY))
        };
        let Some(sk_path) = sk_path else {
            return;
        };
        let holder = self.shader_source(brush);
        let Some(shader) = self.shader(brush, &holder, device_space) else {
            return;
        };
        let paint = self.paint(shader);
        self.pixmap.fill_path(
            &sk_path,
            &paint,
            skia::fill_rule(path.fill_rule()),
            skia::transform(transform),
            self.clip.as_ref(),
        );
    }

    pub fn stroke(&mut self, path: &VectorPath, pen: &Pen) {
        if pen.is_empty() || self.clip_empty {
            return;
        }
        let mut stroke = tiny_skia::Stroke {
            width: pen.width as f32,
            miter_limit: pen.miter_limit as f32,
            line_cap: skia::cap(pen.cap),
            line_join: skia::join(pen.join),
            dash: None,
        };
        if pen.is_dashed() {
            let unit = pen.width.max(1.0);
            let mut intervals: Vec<f32> =
                pen.dash_pattern().iter().map(|d| (d * unit) as f32).collect();
            if intervals.len() % 2 == 1 {
                intervals.extend_from_within(..);
            }
            stroke.dash = tiny_skia::StrokeDash::new(intervals, (pen.dash_offset * unit) as f32);
        }
        let device_space =
            !self.transform.is_affine() || pen.cosmetic || is_conical(&pen.brush);
        let (sk_path, transform) = if device_space {
            (skia::path(&path.transformed(&self.transform)), Affine::IDENTITY)
        } else {
            (skia::path(path), self.transform.to_affine().unwrap_or(Affine::IDENTITY))
        };
        let Some(sk_path) = sk_path else {
            return;
        };
        let holder = self.shader_source(&pen.brush);
        let Some(shader) = self.shader(&pen.brush, &holder, device_space) else {
            return;
        };
        let paint = self.paint(shader);
        self.pixmap.stroke_path(
            &sk_path,
            &paint,
            &stroke,
            skia::transform(transform),
            self.clip.as_ref(),
        );
    }

    /// Draws `source` (or the `src` part of it) scaled into `dest`.
    pub fn draw_image(&mut self, dest: Rect, image: &BgraImage, src: Rect) {
        let src = if src.area() > 0.0 {
            src
        } else {
            Rect::new(0.0, 0.0, image.width() as f64, image.height() as f64)
        };
        if src.width() <= 0.0 || src.height() <= 0.0 {
            return;
        }
        let placement = Affine::translate(dest.origin().to_vec2())
            * Affine::scale_non_uniform(dest.width() / src.width(), dest.height() / src.height())
            * Affine::translate(-src.origin().to_vec2());
        let brush = Brush::texture(std::rc::Rc::new(image.clone())).with_transform(placement);
        self.fill_texture_rect(dest, &brush);
    }

    fn fill_texture_rect(&mut self, dest: Rect, brush: &Brush) {
        let path = VectorPath::rect(dest);
        let BrushStyle::Texture(image) = &brush.style else {
            return;
        };
        let Some(pixmap) = skia::bgra_to_pixmap(image) else {
            return;
        };
        let quality = if self.hints.contains(RenderHints::SMOOTH_PIXMAP_TRANSFORM) {
            tiny_skia::FilterQuality::Bilinear
        } else {
            tiny_skia::FilterQuality::Nearest
        };
        let (sk_path, transform) = match self.transform.to_affine() {
            Some(world) => (skia::path(&path), world),
            None => (skia::path(&path.transformed(&self.transform)), Affine::IDENTITY),
        };
        let Some(sk_path) = sk_path else {
            return;
        };
        let shader = tiny_skia::Pattern::new(
            pixmap.as_ref(),
            tiny_skia::SpreadMode::Pad,
            quality,
            1.0,
            skia::transform(brush.transform),
        );
        let mut paint = self.paint(shader);
        paint.anti_alias = !self.transform.is_scale_translate();
        self.pixmap.fill_path(
            &sk_path,
            &paint,
            FillRule::Winding,
            skia::transform(transform),
            self.clip.as_ref(),
        );
    }

    fn paint<'a>(&self, mut shader: Shader<'a>) -> Paint<'a> {
        if self.opacity < 1.0 {
            shader.apply_opacity(self.opacity);
        }
        let mut paint = Paint::default();
        paint.shader = shader;
        paint.blend_mode = blend_mode(self.composition);
        paint.anti_alias = self.anti_alias();
        paint
    }

    fn shader_source(&self, brush: &Brush) -> Option<Pixmap> {
        match &brush.style {
            BrushStyle::Pattern { pattern, color } => {
                skia::bgra_to_pixmap(&pattern_image(*pattern, *color))
            }
            BrushStyle::Texture(image) => skia::bgra_to_pixmap(image),
            BrushStyle::Gradient(gradient) => match gradient.kind {
                GradientKind::Conical { center, angle } => {
                    let to_device = self.transform.to_affine().unwrap_or(Affine::IDENTITY)
                        * Affine::translate(self.brush_origin.to_vec2())
                        * brush.transform;
                    conical_pixmap(
                        self.width(),
                        self.height(),
                        gradient,
                        center,
                        angle,
                        to_device.inverse(),
                    )
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// Shader for `brush`. In device space the world transform is not
    /// applied to the shader.
    fn shader<'a>(&self, brush: &Brush, source: &'a Option<Pixmap>, device_space: bool) -> Option<Shader<'a>> {
        let local = Affine::translate(self.brush_origin.to_vec2()) * brush.transform;
        let ts = if device_space && !is_conical(brush) {
            self.transform.to_affine().unwrap_or(Affine::IDENTITY) * local
        } else {
            local
        };
        let ts = skia::transform(ts);
        match &brush.style {
            BrushStyle::NoBrush => None,
            BrushStyle::Solid(c) => Some(Shader::SolidColor(skia::color(*c))),
            BrushStyle::Pattern { .. } | BrushStyle::Texture(_) => Some(tiny_skia::Pattern::new(
                source.as_ref()?.as_ref(),
                tiny_skia::SpreadMode::Repeat,
                tiny_skia::FilterQuality::Nearest,
                1.0,
                ts,
            )),
            BrushStyle::Gradient(gradient) => match gradient.kind {
                GradientKind::Linear { start, end } => tiny_skia::LinearGradient::new(
                    skia::point(start),
                    skia::point(end),
                    skia::stops(&gradient.stops),
                    skia::spread(gradient.spread),
                    ts,
                ),
                GradientKind::Radial {
                    center,
                    radius,
                    focal,
                } => tiny_skia::RadialGradient::new(
                    skia::point(focal),
                    skia::point(center),
                    radius as f32,
                    skia::stops(&gradient.stops),
                    skia::spread(gradient.spread),
                    ts,
                ),
                GradientKind::Conical { .. } => Some(tiny_skia::Pattern::new(
                    source.as_ref()?.as_ref(),
                    tiny_skia::SpreadMode::Pad,
                    tiny_skia::FilterQuality::Nearest,
                    1.0,
                    tiny_skia::Transform::identity(),
                )),
            },
        }
    }
}

fn is_conical(brush: &Brush) -> bool {
    matches!(
        &brush.style,
        BrushStyle::Gradient(Gradient {
            kind: GradientKind::Conical { .. },
            ..
        })
    )
}
