//! CPU implementation of the backend traits on top of tiny-skia.
//!
//! It follows the hardware contracts closely enough to test the engine
//! without a GPU: frame protocol violations are reported at `end_draw`,
//! bitmaps cannot be read back while they are the target of an open frame,
//! and aliased rectangles and axis-aligned clips cover exactly the pixels
//! whose centers they contain.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use kurbo::{Affine, Point, Rect, Vec2};
use peniko::{Color, Fill};
use rustc_hash::FxHashMap;
use tiny_skia::{FillRule, Mask, Paint, PathBuilder, Pixmap, Shader};

use crate::backend::{
    AntialiasMode, Backend, BitmapBrushProperties, DashStyle, DrawContext, ExtendMode, GeometrySink,
    GlyphRun, InterpolationMode, LayerParameters, PrimitiveBlend, StrokeStyleProperties,
    StrokeTransformType, TextAntialiasMode,
};
use crate::error::{BackendError, FrameError};
use crate::image::BgraImage;
use crate::skia;
use crate::types::{FontDefinition, GradientStop, VectorPath};

/// Error code reported for calls made in the wrong frame state.
pub const WRONG_STATE: i32 = 0x8899_9001_u32 as i32;

#[derive(Clone)]
pub struct SoftBitmap(Rc<SoftBitmapData>);

struct SoftBitmapData {
    pixmap: RefCell<Pixmap>,
    in_frame: Cell<bool>,
}

impl SoftBitmap {
    fn new(pixmap: Pixmap) -> Self {
        SoftBitmap(Rc::new(SoftBitmapData {
            pixmap: RefCell::new(pixmap),
            in_frame: Cell::new(false),
        }))
    }

    fn ptr_eq(&self, other: &SoftBitmap) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn snapshot(&self) -> Pixmap {
        self.0.pixmap.borrow().clone()
    }
}

#[derive(Clone)]
pub struct SoftGeometry {
    path: Option<Rc<tiny_skia::Path>>,
    fill: FillRule,
}

impl SoftGeometry {
    pub fn is_empty(&self) -> bool {
        self.path.is_none()
    }

    pub fn bounds(&self) -> Rect {
        match &self.path {
            Some(p) => {
                let b = p.bounds();
                Rect::new(
                    b.left() as f64,
                    b.top() as f64,
                    b.right() as f64,
                    b.bottom() as f64,
                )
            }
            None => Rect::ZERO,
        }
    }
}

pub struct SoftSink {
    builder: PathBuilder,
    fill: FillRule,
    in_figure: bool,
}

impl GeometrySink for SoftSink {
    type Geometry = SoftGeometry;

    fn begin_figure(&mut self, start: Point, _filled: bool) {
        self.builder.move_to(start.x as f32, start.y as f32);
        self.in_figure = true;
    }

    fn add_line(&mut self, to: Point) {
        self.builder.line_to(to.x as f32, to.y as f32);
    }

    fn add_bezier(&mut self, c1: Point, c2: Point, end: Point) {
        self.builder.cubic_to(
            c1.x as f32,
            c1.y as f32,
            c2.x as f32,
            c2.y as f32,
            end.x as f32,
            end.y as f32,
        );
    }

    fn end_figure(&mut self, closed: bool) {
        if closed {
            self.builder.close();
        }
        self.in_figure = false;
    }

    fn close(self) -> Result<SoftGeometry, BackendError> {
        if self.in_figure {
            return Err(BackendError::Unsupported("closing a sink with an open figure"));
        }
        Ok(SoftGeometry {
            path: self.builder.finish().map(Rc::new),
            fill: self.fill,
        })
    }
}

#[derive(Clone)]
pub struct SoftBrush(Rc<SoftBrushData>);

struct SoftBrushData {
    kind: BrushKind,
    transform: Cell<Affine>,
    opacity: Cell<f32>,
}

enum BrushKind {
    Solid(Color),
    Bitmap {
        bitmap: SoftBitmap,
        props: BitmapBrushProperties,
    },
    Linear {
        start: Point,
        end: Point,
        stops: Vec<GradientStop>,
    },
    Radial {
        center: Point,
        origin_offset: Vec2,
        radius_x: f64,
        radius_y: f64,
        stops: Vec<GradientStop>,
    },
}

impl SoftBrush {
    fn new(kind: BrushKind) -> Self {
        SoftBrush(Rc::new(SoftBrushData {
            kind,
            transform: Cell::new(Affine::IDENTITY),
            opacity: Cell::new(1.0),
        }))
    }

    /// Solid color of the brush, if it is one.
    pub fn solid_color(&self) -> Option<Color> {
        match &self.0.kind {
            BrushKind::Solid(c) => Some(*c),
            _ => None,
        }
    }

    pub fn transform(&self) -> Affine {
        self.0.transform.get()
    }

    pub fn is_bitmap(&self) -> bool {
        matches!(self.0.kind, BrushKind::Bitmap { .. })
    }
}

/// Pixmap a bitmap brush samples from. Owned so drawing into the same
/// bitmap does not alias the source.
struct ShaderSource(Option<Pixmap>);

impl SoftBrush {
    fn source(&self) -> ShaderSource {
        match &self.0.kind {
            BrushKind::Bitmap { bitmap, .. } => ShaderSource(Some(bitmap.snapshot())),
            _ => ShaderSource(None),
        }
    }

    fn shader<'a>(&self, source: &'a ShaderSource) -> Option<Shader<'a>> {
        let transform = skia::transform(self.0.transform.get());
        let mut shader = match &self.0.kind {
            BrushKind::Solid(c) => Shader::SolidColor(skia::color(*c)),
            BrushKind::Bitmap { props, .. } => {
                let pixmap = source.0.as_ref()?;
                let spread = match (props.extend_x, props.extend_y) {
                    (ExtendMode::Clamp, ExtendMode::Clamp) => tiny_skia::SpreadMode::Pad,
                    (ExtendMode::Mirror, _) | (_, ExtendMode::Mirror) => {
                        tiny_skia::SpreadMode::Reflect
                    }
                    _ => tiny_skia::SpreadMode::Repeat,
                };
                let quality = match props.interpolation {
                    InterpolationMode::NearestNeighbor => tiny_skia::FilterQuality::Nearest,
                    InterpolationMode::Linear => tiny_skia::FilterQuality::Bilinear,
                };
                tiny_skia::Pattern::new(pixmap.as_ref(), spread, quality, 1.0, transform)
            }
            BrushKind::Linear { start, end, stops } => tiny_skia::LinearGradient::new(
                skia::point(*start),
                skia::point(*end),
                skia::stops(stops),
                tiny_skia::SpreadMode::Pad,
                transform,
            )?,
            BrushKind::Radial {
                center,
                origin_offset,
                radius_x,
                radius_y,
                stops,
            } => {
                // Elliptical gradients are circles under a scale about the
                // center.
                let r = radius_x.max(f64::EPSILON);
                let squash = Affine::translate(center.to_vec2())
                    * Affine::scale_non_uniform(1.0, radius_y / r)
                    * Affine::translate(-center.to_vec2());
                let focal = *center + Vec2::new(origin_offset.x, origin_offset.y * r / radius_y.max(f64::EPSILON));
                tiny_skia::RadialGradient::new(
                    skia::point(focal),
                    skia::point(*center),
                    r as f32,
                    skia::stops(stops),
                    tiny_skia::SpreadMode::Pad,
                    skia::transform(self.0.transform.get() * squash),
                )?
            }
        };
        let opacity = self.0.opacity.get();
        if opacity < 1.0 {
            shader.apply_opacity(opacity);
        }
        Some(shader)
    }
}

#[derive(Clone)]
pub struct SoftStrokeStyle(Rc<(StrokeStyleProperties, Vec<f32>)>);

impl SoftStrokeStyle {
    pub fn properties(&self) -> &StrokeStyleProperties {
        &self.0.0
    }

    pub fn dashes(&self) -> &[f32] {
        &self.0.1
    }
}

/// Outline font: glyph outlines in em units, origin on the baseline, y down.
#[derive(Debug, Default)]
pub struct SoftFont {
    pub family: String,
    pub glyphs: FxHashMap<u16, VectorPath>,
}

pub type SoftFontFace = Rc<SoftFont>;

pub struct SoftBackend {
    fonts: RefCell<FxHashMap<String, SoftFontFace>>,
    dpi: f32,
}

impl Default for SoftBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBackend {
    pub fn new() -> Self {
        Self {
            fonts: RefCell::new(FxHashMap::default()),
            dpi: 96.0,
        }
    }

    /// Makes `family` resolvable. Lookup is case-insensitive.
    pub fn register_font(&self, family: &str, glyphs: FxHashMap<u16, VectorPath>) {
        self.fonts.borrow_mut().insert(
            family.to_ascii_lowercase(),
            Rc::new(SoftFont {
                family: family.to_string(),
                glyphs,
            }),
        );
    }
}

impl Backend for SoftBackend {
    type Bitmap = SoftBitmap;
    type Geometry = SoftGeometry;
    type Brush = SoftBrush;
    type StrokeStyle = SoftStrokeStyle;
    type FontFace = SoftFontFace;
    type DrawContext = SoftContext;
    type GeometrySink = SoftSink;

    fn create_draw_context(&self) -> Result<SoftContext, BackendError> {
        Ok(SoftContext::new())
    }

    fn create_bitmap(
        &self,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        pitch: u32,
    ) -> Result<SoftBitmap, BackendError> {
        let invalid = BackendError::InvalidSize { width, height };
        let pixmap = match data {
            Some(bytes) => {
                let image = BgraImage::from_bgra_premultiplied(width, height, pitch as usize, bytes)
                    .ok_or(invalid.clone())?;
                skia::bgra_to_pixmap(&image).ok_or(invalid)?
            }
            None => Pixmap::new(width, height).ok_or(invalid)?,
        };
        Ok(SoftBitmap::new(pixmap))
    }

    fn bitmap_size(&self, bitmap: &SoftBitmap) -> (u32, u32) {
        let pixmap = bitmap.0.pixmap.borrow();
        (pixmap.width(), pixmap.height())
    }

    fn same_bitmap(&self, a: &SoftBitmap, b: &SoftBitmap) -> bool {
        a.ptr_eq(b)
    }

    fn read_bitmap(&self, bitmap: &SoftBitmap) -> Result<BgraImage, BackendError> {
        if bitmap.0.in_frame.get() {
            return Err(BackendError::FrameOpen);
        }
        Ok(skia::pixmap_to_bgra(&bitmap.0.pixmap.borrow()))
    }

    fn create_path_geometry(&self, fill_rule: Fill) -> Result<SoftSink, BackendError> {
        Ok(SoftSink {
            builder: PathBuilder::new(),
            fill: skia::fill_rule(fill_rule),
            in_figure: false,
        })
    }

    fn create_rect_union(&self, rects: &[Rect]) -> Result<SoftGeometry, BackendError> {
        let mut pb = PathBuilder::new();
        for r in rects {
            if let Some(rect) =
                tiny_skia::Rect::from_ltrb(r.x0 as f32, r.y0 as f32, r.x1 as f32, r.y1 as f32)
            {
                pb.push_rect(rect);
            }
        }
        Ok(SoftGeometry {
            path: pb.finish().map(Rc::new),
            fill: FillRule::Winding,
        })
    }

    fn create_stroke_style(
        &self,
        props: &StrokeStyleProperties,
        dashes: &[f32],
    ) -> Result<SoftStrokeStyle, BackendError> {
        if props.dash_style == DashStyle::Custom && dashes.iter().all(|d| *d <= 0.0) {
            return Err(BackendError::Unsupported("empty dash array"));
        }
        Ok(SoftStrokeStyle(Rc::new((*props, dashes.to_vec()))))
    }

    fn resolve_font_face(&self, font: &FontDefinition) -> Result<SoftFontFace, BackendError> {
        self.fonts
            .borrow()
            .get(&font.family.to_ascii_lowercase())
            .cloned()
            .ok_or(BackendError::Unsupported("font family"))
    }

    fn dpi(&self) -> f32 {
        self.dpi
    }
}

/// Error code for unbalanced clip pushes and pops.
pub const PUSH_POP_UNBALANCED: i32 = 0x8899_0016_u32 as i32;
/// Error code for drawing a bitmap onto itself.
pub const BITMAP_BOUND_AS_TARGET: i32 = 0x8899_0025_u32 as i32;

struct ClipLayer {
    axis_aligned: bool,
    /// Coverage after intersecting with every clip below; `None` when the
    /// context had no target at push time.
    mask: Option<Mask>,
}

pub struct SoftContext {
    target: RefCell<Option<SoftBitmap>>,
    transform: Cell<Affine>,
    antialias: Cell<AntialiasMode>,
    text_antialias: Cell<TextAntialiasMode>,
    blend: Cell<PrimitiveBlend>,
    clips: RefCell<Vec<ClipLayer>>,
    frame_open: Cell<bool>,
    error: Cell<Option<FrameError>>,
    begin_calls: Cell<u32>,
    end_calls: Cell<u32>,
    draw_calls: Cell<u64>,
}

impl SoftContext {
    fn new() -> Self {
        Self {
            target: RefCell::new(None),
            transform: Cell::new(Affine::IDENTITY),
            antialias: Cell::new(AntialiasMode::PerPrimitive),
            text_antialias: Cell::new(TextAntialiasMode::ClearType),
            blend: Cell::new(PrimitiveBlend::SourceOver),
            clips: RefCell::new(Vec::new()),
            frame_open: Cell::new(false),
            error: Cell::new(None),
            begin_calls: Cell::new(0),
            end_calls: Cell::new(0),
            draw_calls: Cell::new(0),
        }
    }

    /// Number of `begin_draw` calls that reached this context.
    pub fn begin_calls(&self) -> u32 {
        self.begin_calls.get()
    }

    pub fn end_calls(&self) -> u32 {
        self.end_calls.get()
    }

    /// Drawing calls issued so far, including rejected ones.
    pub fn draw_calls(&self) -> u64 {
        self.draw_calls.get()
    }

    pub fn clip_depth(&self) -> usize {
        self.clips.borrow().len()
    }

    pub fn is_frame_open(&self) -> bool {
        self.frame_open.get()
    }

    pub fn antialias_mode(&self) -> AntialiasMode {
        self.antialias.get()
    }

    pub fn text_antialias_mode(&self) -> TextAntialiasMode {
        self.text_antialias.get()
    }

    pub fn primitive_blend(&self) -> PrimitiveBlend {
        self.blend.get()
    }

    fn fail(&self, code: i32) {
        if self.error.get().is_none() {
            self.error.set(Some(FrameError {
                code,
                tag1: self.draw_calls.get(),
                tag2: 0,
            }));
        }
    }

    fn aliased(&self) -> bool {
        self.antialias.get() == AntialiasMode::Aliased
    }

    fn blend_mode(&self) -> tiny_skia::BlendMode {
        match self.blend.get() {
            PrimitiveBlend::SourceOver => tiny_skia::BlendMode::SourceOver,
            PrimitiveBlend::Copy => tiny_skia::BlendMode::Source,
        }
    }

    fn target_size(&self) -> Option<(u32, u32)> {
        let target = self.target.borrow();
        let pixmap = target.as_ref()?.0.pixmap.borrow();
        Some((pixmap.width(), pixmap.height()))
    }

    /// Runs `f` on the target with the effective clip mask. Records a frame
    /// error instead when no frame is open.
    fn draw(&self, f: impl FnOnce(&mut Pixmap, Option<&Mask>)) {
        self.draw_calls.set(self.draw_calls.get() + 1);
        if !self.frame_open.get() {
            self.fail(WRONG_STATE);
            return;
        }
        let target = self.target.borrow();
        let Some(target) = target.as_ref() else {
            return;
        };
        let mut pixmap = target.0.pixmap.borrow_mut();
        let clips = self.clips.borrow();
        let mask = clips.last().and_then(|c| c.mask.as_ref());
        f(&mut pixmap, mask);
    }

    fn paint<'a>(&self, brush: &SoftBrush, source: &'a ShaderSource, anti_alias: bool) -> Option<Paint<'a>> {
        let mut paint = Paint::default();
        paint.shader = brush.shader(source)?;
        paint.blend_mode = self.blend_mode();
        paint.anti_alias = anti_alias;
        Some(paint)
    }

    /// Stroke settings plus the transform the path must be stroked under.
    fn stroke(&self, width: f32, style: Option<&SoftStrokeStyle>) -> (tiny_skia::Stroke, tiny_skia::Transform, bool) {
        let mut stroke = tiny_skia::Stroke {
            width,
            ..Default::default()
        };
        let mut device_space = false;
        if let Some(style) = style {
            let props = style.properties();
            let dashed = props.dash_style == DashStyle::Custom;
            stroke.line_cap = skia::cap(if dashed { props.dash_cap } else { props.start_cap });
            stroke.line_join = skia::join(props.line_join);
            stroke.miter_limit = (props.miter_limit / 2.0).max(1.0);
            match props.transform_type {
                StrokeTransformType::Normal => {}
                StrokeTransformType::Fixed => device_space = true,
                StrokeTransformType::Hairline => stroke.width = 0.0,
            }
            if dashed {
                let unit = width.max(1.0);
                let mut intervals: Vec<f32> = style.dashes().iter().map(|d| d * unit).collect();
                if intervals.len() % 2 == 1 {
                    intervals.extend_from_within(..);
                }
                stroke.dash = tiny_skia::StrokeDash::new(intervals, props.dash_offset * unit);
            }
        }
        (stroke, skia::transform(self.transform.get()), device_space)
    }

    fn stroke_path(&self, path: &tiny_skia::Path, brush: &SoftBrush, width: f32, style: Option<&SoftStrokeStyle>) {
        let source = brush.source();
        let Some(paint) = self.paint(brush, &source, !self.aliased()) else {
            return;
        };
        let (stroke, transform, device_space) = self.stroke(width, style);
        self.draw(|pixmap, mask| {
            if device_space {
                if let Some(mapped) = path.clone().transform(transform) {
                    pixmap.stroke_path(&mapped, &paint, &stroke, tiny_skia::Transform::identity(), mask);
                }
            } else {
                pixmap.stroke_path(path, &paint, &stroke, transform, mask);
            }
        });
    }

    fn fill_path(&self, path: &tiny_skia::Path, fill: FillRule, brush: &SoftBrush, transform: Affine, anti_alias: bool) {
        let source = brush.source();
        let Some(paint) = self.paint(brush, &source, anti_alias) else {
            return;
        };
        self.draw(|pixmap, mask| {
            pixmap.fill_path(path, &paint, fill, skia::transform(transform), mask);
        });
    }

    fn push_clip(&self, axis_aligned: bool, coverage: Option<Mask>) {
        let mut clips = self.clips.borrow_mut();
        let mask = match (coverage, clips.last().and_then(|c| c.mask.as_ref())) {
            (Some(mut new), Some(below)) => {
                for (n, b) in new.data_mut().iter_mut().zip(below.data()) {
                    *n = ((*n as u16 * *b as u16 + 127) / 255) as u8;
                }
                Some(new)
            }
            (coverage, _) => coverage,
        };
        clips.push(ClipLayer { axis_aligned, mask });
    }

    fn pop_clip(&self, axis_aligned: bool) {
        match self.clips.borrow_mut().pop() {
            Some(layer) if layer.axis_aligned == axis_aligned => {}
            _ => self.fail(PUSH_POP_UNBALANCED),
        }
    }
}

/// Integer pixel span whose centers lie in `[lo, hi)`.
fn pixel_span(lo: f64, hi: f64, limit: u32) -> (u32, u32) {
    let a = (lo - 0.5).ceil().clamp(0.0, limit as f64) as u32;
    let b = (hi - 0.5).ceil().clamp(0.0, limit as f64) as u32;
    (a, b.max(a))
}

/// Coverage mask of an axis-aligned device rectangle.
fn rect_mask(rect: Rect, width: u32, height: u32, aliased: bool) -> Option<Mask> {
    let mut mask = Mask::new(width, height)?;
    let r = rect.abs();
    let data = mask.data_mut();
    if aliased {
        let (x0, x1) = pixel_span(r.x0, r.x1, width);
        let (y0, y1) = pixel_span(r.y0, r.y1, height);
        for y in y0..y1 {
            let row = y as usize * width as usize;
            data[row + x0 as usize..row + x1 as usize].fill(255);
        }
    } else {
        let overlap = |lo: f64, hi: f64, i: u32| (hi.min(i as f64 + 1.0) - lo.max(i as f64)).clamp(0.0, 1.0);
        for y in 0..height {
            let cy = overlap(r.y0, r.y1, y);
            if cy == 0.0 {
                continue;
            }
            for x in 0..width {
                let c = overlap(r.x0, r.x1, x) * cy;
                data[y as usize * width as usize + x as usize] = (c * 255.0).round() as u8;
            }
        }
    }
    Some(mask)
}

fn is_scale_translate(t: Affine) -> bool {
    let [_, b, c, _, _, _] = t.as_coeffs();
    b == 0.0 && c == 0.0
}

impl DrawContext<SoftBackend> for SoftContext {
    fn begin_draw(&self) {
        self.begin_calls.set(self.begin_calls.get() + 1);
        if self.frame_open.get() {
            self.fail(WRONG_STATE);
            return;
        }
        self.frame_open.set(true);
        if let Some(target) = self.target.borrow().as_ref() {
            target.0.in_frame.set(true);
        }
    }

    fn end_draw(&self) -> Result<(), FrameError> {
        self.end_calls.set(self.end_calls.get() + 1);
        if !self.frame_open.get() {
            return Err(FrameError {
                code: WRONG_STATE,
                tag1: 0,
                tag2: 0,
            });
        }
        self.frame_open.set(false);
        if let Some(target) = self.target.borrow().as_ref() {
            target.0.in_frame.set(false);
        }
        if !self.clips.borrow().is_empty() {
            self.clips.borrow_mut().clear();
            self.fail(PUSH_POP_UNBALANCED);
        }
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn set_target(&self, target: Option<&SoftBitmap>) {
        let open = self.frame_open.get();
        if let Some(old) = self.target.borrow().as_ref() {
            old.0.in_frame.set(false);
        }
        if let Some(new) = target {
            new.0.in_frame.set(open);
        }
        *self.target.borrow_mut() = target.cloned();
    }

    fn clear(&self, color: Color) {
        let mut paint = Paint::default();
        paint.set_color(skia::color(color));
        paint.blend_mode = tiny_skia::BlendMode::Source;
        self.draw(|pixmap, mask| match mask {
            None => pixmap.fill(skia::color(color)),
            Some(mask) => {
                if let Some(rect) =
                    tiny_skia::Rect::from_xywh(0.0, 0.0, pixmap.width() as f32, pixmap.height() as f32)
                {
                    pixmap.fill_rect(rect, &paint, tiny_skia::Transform::identity(), Some(mask));
                }
            }
        });
    }

    fn set_transform(&self, transform: Affine) {
        self.transform.set(transform);
    }

    fn transform(&self) -> Affine {
        self.transform.get()
    }

    fn set_antialias_mode(&self, mode: AntialiasMode) {
        self.antialias.set(mode);
    }

    fn set_text_antialias_mode(&self, mode: TextAntialiasMode) {
        self.text_antialias.set(mode);
    }

    fn set_primitive_blend(&self, blend: PrimitiveBlend) {
        self.blend.set(blend);
    }

    fn create_solid_brush(&self, color: Color) -> Result<SoftBrush, BackendError> {
        Ok(SoftBrush::new(BrushKind::Solid(color)))
    }

    fn create_bitmap_brush(
        &self,
        bitmap: &SoftBitmap,
        props: &BitmapBrushProperties,
    ) -> Result<SoftBrush, BackendError> {
        Ok(SoftBrush::new(BrushKind::Bitmap {
            bitmap: bitmap.clone(),
            props: *props,
        }))
    }

    fn create_linear_gradient_brush(
        &self,
        start: Point,
        end: Point,
        stops: &[GradientStop],
    ) -> Result<SoftBrush, BackendError> {
        Ok(SoftBrush::new(BrushKind::Linear {
            start,
            end,
            stops: stops.to_vec(),
        }))
    }

    fn create_radial_gradient_brush(
        &self,
        center: Point,
        origin_offset: Vec2,
        radius_x: f64,
        radius_y: f64,
        stops: &[GradientStop],
    ) -> Result<SoftBrush, BackendError> {
        Ok(SoftBrush::new(BrushKind::Radial {
            center,
            origin_offset,
            radius_x,
            radius_y,
            stops: stops.to_vec(),
        }))
    }

    fn set_brush_transform(&self, brush: &SoftBrush, transform: Affine) {
        brush.0.transform.set(transform);
    }

    fn set_brush_opacity(&self, brush: &SoftBrush, opacity: f32) {
        brush.0.opacity.set(opacity.clamp(0.0, 1.0));
    }

    fn fill_geometry(&self, geometry: &SoftGeometry, brush: &SoftBrush) {
        match &geometry.path {
            Some(path) => self.fill_path(path, geometry.fill, brush, self.transform.get(), !self.aliased()),
            None => self.draw(|_, _| {}),
        }
    }

    fn draw_geometry(
        &self,
        geometry: &SoftGeometry,
        brush: &SoftBrush,
        width: f32,
        style: Option<&SoftStrokeStyle>,
    ) {
        match &geometry.path {
            Some(path) => self.stroke_path(path, brush, width, style),
            None => self.draw(|_, _| {}),
        }
    }

    fn fill_rectangle(&self, rect: Rect, brush: &SoftBrush) {
        let transform = self.transform.get();
        if !is_scale_translate(transform) {
            if let Some(path) = skia::rect_path(rect) {
                self.fill_path(&path, FillRule::Winding, brush, transform, !self.aliased());
            }
            return;
        }
        let device = transform.transform_rect_bbox(rect.abs());
        let aliased = self.aliased();
        let source = brush.source();
        let Some(paint) = self.paint(brush, &source, !aliased) else {
            return;
        };
        // The shader lives in user space; map the device rectangle back.
        let user = skia::transform(transform);
        self.draw(|pixmap, mask| {
            let snapped = if aliased {
                let (x0, x1) = pixel_span(device.x0, device.x1, pixmap.width());
                let (y0, y1) = pixel_span(device.y0, device.y1, pixmap.height());
                tiny_skia::Rect::from_ltrb(x0 as f32, y0 as f32, x1 as f32, y1 as f32)
            } else {
                tiny_skia::Rect::from_ltrb(
                    device.x0 as f32,
                    device.y0 as f32,
                    device.x1 as f32,
                    device.y1 as f32,
                )
            };
            let Some(device_rect) = snapped else {
                return;
            };
            let mut paint = paint;
            paint.shader.transform(user);
            pixmap.fill_rect(device_rect, &paint, tiny_skia::Transform::identity(), mask);
        });
    }

    fn draw_rectangle(
        &self,
        rect: Rect,
        brush: &SoftBrush,
        width: f32,
        style: Option<&SoftStrokeStyle>,
    ) {
        let mut pb = PathBuilder::new();
        let r = rect.abs();
        pb.move_to(r.x0 as f32, r.y0 as f32);
        pb.line_to(r.x1 as f32, r.y0 as f32);
        pb.line_to(r.x1 as f32, r.y1 as f32);
        pb.line_to(r.x0 as f32, r.y1 as f32);
        pb.close();
        if let Some(path) = pb.finish() {
            self.stroke_path(&path, brush, width, style);
        }
    }

    fn fill_ellipse(&self, center: Point, radius_x: f64, radius_y: f64, brush: &SoftBrush) {
        if let Some(path) = ellipse_path(center, radius_x, radius_y) {
            self.fill_path(&path, FillRule::Winding, brush, self.transform.get(), !self.aliased());
        }
    }

    fn draw_ellipse(
        &self,
        center: Point,
        radius_x: f64,
        radius_y: f64,
        brush: &SoftBrush,
        width: f32,
        style: Option<&SoftStrokeStyle>,
    ) {
        if let Some(path) = ellipse_path(center, radius_x, radius_y) {
            self.stroke_path(&path, brush, width, style);
        }
    }

    fn draw_line(
        &self,
        p0: Point,
        p1: Point,
        brush: &SoftBrush,
        width: f32,
        style: Option<&SoftStrokeStyle>,
    ) {
        let mut pb = PathBuilder::new();
        pb.move_to(p0.x as f32, p0.y as f32);
        pb.line_to(p1.x as f32, p1.y as f32);
        match pb.finish() {
            Some(path) => self.stroke_path(&path, brush, width, style),
            None => self.draw(|_, _| {}),
        }
    }

    fn draw_bitmap(
        &self,
        bitmap: &SoftBitmap,
        dest: Rect,
        opacity: f32,
        mode: InterpolationMode,
        source: Option<Rect>,
    ) {
        if self
            .target
            .borrow()
            .as_ref()
            .is_some_and(|t| t.ptr_eq(bitmap))
        {
            self.draw_calls.set(self.draw_calls.get() + 1);
            self.fail(BITMAP_BOUND_AS_TARGET);
            return;
        }
        let pixmap = bitmap.snapshot();
        let src = source.unwrap_or(Rect::new(
            0.0,
            0.0,
            pixmap.width() as f64,
            pixmap.height() as f64,
        ));
        if src.width() <= 0.0 || src.height() <= 0.0 {
            return;
        }
        let dest = dest.abs();
        let placement = Affine::translate(dest.origin().to_vec2())
            * Affine::scale_non_uniform(dest.width() / src.width(), dest.height() / src.height())
            * Affine::translate(-src.origin().to_vec2());
        let quality = match mode {
            InterpolationMode::NearestNeighbor => tiny_skia::FilterQuality::Nearest,
            InterpolationMode::Linear => tiny_skia::FilterQuality::Bilinear,
        };
        let mut paint = Paint::default();
        paint.shader = tiny_skia::Pattern::new(
            pixmap.as_ref(),
            tiny_skia::SpreadMode::Pad,
            quality,
            opacity.clamp(0.0, 1.0),
            skia::transform(placement),
        );
        paint.blend_mode = self.blend_mode();
        let transform = self.transform.get();
        paint.anti_alias = !is_scale_translate(transform);
        let Some(rect) = tiny_skia::Rect::from_ltrb(
            dest.x0 as f32,
            dest.y0 as f32,
            dest.x1 as f32,
            dest.y1 as f32,
        ) else {
            return;
        };
        self.draw(|target, mask| {
            target.fill_rect(rect, &paint, skia::transform(transform), mask);
        });
    }

    fn draw_glyph_run(&self, origin: Point, run: &GlyphRun<'_, SoftFontFace>, brush: &SoftBrush) {
        let anti_alias = self.text_antialias.get() != TextAntialiasMode::Aliased;
        let rtl = run.bidi_level % 2 == 1;
        let em = run.em_size as f64;
        let mut pen = 0.0f64;
        let mut drawn = false;
        for (i, glyph) in run.indices.iter().enumerate() {
            let advance = run.advances.get(i).copied().unwrap_or(0.0) as f64;
            let offset = run.offsets.get(i).copied().unwrap_or(Vec2::ZERO);
            let x = if rtl { origin.x - pen - advance } else { origin.x + pen };
            pen += advance;
            let Some(outline) = run.font_face.glyphs.get(glyph) else {
                continue;
            };
            let Some(path) = skia::path(outline) else {
                continue;
            };
            let placement = self.transform.get()
                * Affine::translate((x + offset.x, origin.y + offset.y))
                * Affine::scale(em);
            self.fill_path(&path, FillRule::Winding, brush, placement, anti_alias);
            drawn = true;
        }
        if !drawn {
            self.draw(|_, _| {});
        }
    }

    fn push_axis_aligned_clip(&self, rect: Rect, mode: AntialiasMode) {
        let coverage = self.target_size().and_then(|(w, h)| {
            let device = self.transform.get().transform_rect_bbox(rect.abs());
            rect_mask(device, w, h, mode == AntialiasMode::Aliased)
        });
        self.push_clip(true, coverage);
    }

    fn pop_axis_aligned_clip(&self) {
        self.pop_clip(true);
    }

    fn push_layer(&self, params: &LayerParameters<'_, SoftGeometry>) {
        let coverage = self.target_size().and_then(|(w, h)| {
            let mut mask = Mask::new(w, h)?;
            if let Some(path) = &params.geometric_mask.path {
                let transform = self.transform.get() * params.mask_transform;
                mask.fill_path(
                    path,
                    params.geometric_mask.fill,
                    params.mask_antialias == AntialiasMode::PerPrimitive,
                    skia::transform(transform),
                );
            }
            if let Some(bounds) = params.content_bounds {
                let device = self.transform.get().transform_rect_bbox(bounds.abs());
                if let Some(limit) = rect_mask(device, w, h, true) {
                    for (m, l) in mask.data_mut().iter_mut().zip(limit.data()) {
                        *m = ((*m as u16 * *l as u16 + 127) / 255) as u8;
                    }
                }
            }
            if params.opacity < 1.0 {
                let scale = params.opacity.clamp(0.0, 1.0);
                for m in mask.data_mut() {
                    *m = (*m as f32 * scale).round() as u8;
                }
            }
            Some(mask)
        });
        self.push_clip(false, coverage);
    }

    fn pop_layer(&self) {
        self.pop_clip(false);
    }
}

fn ellipse_path(center: Point, radius_x: f64, radius_y: f64) -> Option<tiny_skia::Path> {
    let oval = tiny_skia::Rect::from_ltrb(
        (center.x - radius_x) as f32,
        (center.y - radius_y) as f32,
        (center.x + radius_x) as f32,
        (center.y + radius_y) as f32,
    )?;
    PathBuilder::from_oval(oval)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Color = Color::from_rgba8(255, 0, 0, 255);

    fn target(backend: &SoftBackend, w: u32, h: u32) -> (SoftContext, SoftBitmap) {
        let ctx = backend.create_draw_context().unwrap();
        let bitmap = backend.create_bitmap(w, h, None, 0).unwrap();
        ctx.set_target(Some(&bitmap));
        (ctx, bitmap)
    }

    fn is_red(image: &BgraImage, x: u32, y: u32) -> bool {
        image.pixel(x, y) == Some([0, 0, 255, 255])
    }

    #[test]
    fn aliased_rect_covers_pixel_centers() {
        let backend = SoftBackend::new();
        let (ctx, bitmap) = target(&backend, 12, 12);
        ctx.set_antialias_mode(AntialiasMode::Aliased);
        ctx.begin_draw();
        let brush = ctx.create_solid_brush(RED).unwrap();
        ctx.fill_rectangle(Rect::new(0.5, 0.5, 10.5, 10.5), &brush);
        ctx.end_draw().unwrap();
        let image = backend.read_bitmap(&bitmap).unwrap();
        assert!(is_red(&image, 0, 0));
        assert!(is_red(&image, 9, 9));
        assert!(!is_red(&image, 10, 10));
    }

    #[test]
    fn drawing_outside_frame_fails_at_end() {
        let backend = SoftBackend::new();
        let (ctx, _bitmap) = target(&backend, 4, 4);
        let brush = ctx.create_solid_brush(RED).unwrap();
        ctx.fill_rectangle(Rect::new(0.0, 0.0, 1.0, 1.0), &brush);
        ctx.begin_draw();
        let err = ctx.end_draw().unwrap_err();
        assert_eq!(err.code, WRONG_STATE);
        assert_eq!(err.tag1, 1);
        assert!(ctx.end_draw().is_err());
    }

    #[test]
    fn readback_is_refused_during_frame() {
        let backend = SoftBackend::new();
        let (ctx, bitmap) = target(&backend, 2, 2);
        ctx.begin_draw();
        assert_eq!(backend.read_bitmap(&bitmap), Err(BackendError::FrameOpen));
        ctx.end_draw().unwrap();
        assert!(backend.read_bitmap(&bitmap).is_ok());
    }

    #[test]
    fn axis_aligned_clip_limits_fill() {
        let backend = SoftBackend::new();
        let (ctx, bitmap) = target(&backend, 10, 10);
        ctx.set_antialias_mode(AntialiasMode::Aliased);
        ctx.begin_draw();
        ctx.push_axis_aligned_clip(Rect::new(0.0, 0.0, 5.0, 5.0), AntialiasMode::Aliased);
        let brush = ctx.create_solid_brush(RED).unwrap();
        ctx.fill_rectangle(Rect::new(0.0, 0.0, 10.0, 10.0), &brush);
        ctx.pop_axis_aligned_clip();
        ctx.end_draw().unwrap();
        let image = backend.read_bitmap(&bitmap).unwrap();
        assert!(is_red(&image, 4, 4));
        assert!(!is_red(&image, 5, 5));
        assert!(!is_red(&image, 0, 7));
    }

    #[test]
    fn unbalanced_pop_is_reported() {
        let backend = SoftBackend::new();
        let (ctx, _bitmap) = target(&backend, 2, 2);
        ctx.begin_draw();
        ctx.push_axis_aligned_clip(Rect::new(0.0, 0.0, 1.0, 1.0), AntialiasMode::Aliased);
        ctx.pop_layer();
        assert_eq!(ctx.end_draw().unwrap_err().code, PUSH_POP_UNBALANCED);
    }

    #[test]
    fn bitmap_cannot_draw_onto_itself() {
        let backend = SoftBackend::new();
        let (ctx, bitmap) = target(&backend, 2, 2);
        ctx.begin_draw();
        ctx.draw_bitmap(&bitmap, Rect::new(0.0, 0.0, 2.0, 2.0), 1.0, InterpolationMode::Linear, None);
        assert_eq!(ctx.end_draw().unwrap_err().code, BITMAP_BOUND_AS_TARGET);
    }

    #[test]
    fn dashed_line_leaves_gaps() {
        let backend = SoftBackend::new();
        let (ctx, bitmap) = target(&backend, 12, 3);
        ctx.set_antialias_mode(AntialiasMode::Aliased);
        let style = backend
            .create_stroke_style(
                &StrokeStyleProperties {
                    dash_style: DashStyle::Custom,
                    ..Default::default()
                },
                &[4.0, 2.0],
            )
            .unwrap();
        ctx.begin_draw();
        let brush = ctx.create_solid_brush(RED).unwrap();
        ctx.draw_line(Point::new(0.0, 1.5), Point::new(12.0, 1.5), &brush, 1.0, Some(&style));
        ctx.end_draw().unwrap();
        let image = backend.read_bitmap(&bitmap).unwrap();
        assert!(is_red(&image, 1, 1));
        assert!(!is_red(&image, 5, 1));
        assert!(is_red(&image, 7, 1));
    }

    #[test]
    fn unregistered_font_is_unsupported() {
        let backend = SoftBackend::new();
        assert!(backend.resolve_font_face(&FontDefinition::new("Arial")).is_err());
        backend.register_font("Arial", FxHashMap::default());
        assert!(backend.resolve_font_face(&FontDefinition::new("arial")).is_ok());
    }
}
