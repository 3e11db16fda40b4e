//! The hardware 2D API the engine drives.
//!
//! A [`Backend`] is the factory/device level object (bitmaps, geometries,
//! stroke styles, font faces). A [`DrawContext`] is a device context: it
//! brackets drawing with `begin_draw`/`end_draw` and owns all per-frame state
//! (target, transform, clips, blend). The engine never reaches for a global
//! device; every component receives the backend it should use.

use kurbo::{Affine, Cap, Join, Point, Rect, Vec2};
use peniko::{Color, Fill};

use crate::error::{BackendError, FrameError};
use crate::image::BgraImage;
use crate::types::{FontDefinition, GradientStop};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AntialiasMode {
    PerPrimitive,
    Aliased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextAntialiasMode {
    ClearType,
    Grayscale,
    Aliased,
}

/// Blend applied by the device context to every primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveBlend {
    SourceOver,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterpolationMode {
    NearestNeighbor,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendMode {
    Clamp,
    Wrap,
    Mirror,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmapBrushProperties {
    pub extend_x: ExtendMode,
    pub extend_y: ExtendMode,
    pub interpolation: InterpolationMode,
}

impl BitmapBrushProperties {
    pub const TILED: BitmapBrushProperties = BitmapBrushProperties {
        extend_x: ExtendMode::Wrap,
        extend_y: ExtendMode::Wrap,
        interpolation: InterpolationMode::NearestNeighbor,
    };
}

/// How the stroke width reacts to the world transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrokeTransformType {
    /// Width scales with the world transform.
    Normal,
    /// Width is in device pixels, geometry is still transformed.
    Fixed,
    /// One device pixel regardless of transform.
    Hairline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DashStyle {
    Solid,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeStyleProperties {
    pub start_cap: Cap,
    pub end_cap: Cap,
    pub dash_cap: Cap,
    pub line_join: Join,
    pub miter_limit: f32,
    pub dash_style: DashStyle,
    /// In units of stroke width.
    pub dash_offset: f32,
    pub transform_type: StrokeTransformType,
}

impl Default for StrokeStyleProperties {
    fn default() -> Self {
        Self {
            start_cap: Cap::Butt,
            end_cap: Cap::Butt,
            dash_cap: Cap::Butt,
            line_join: Join::Miter,
            miter_limit: 10.0,
            dash_style: DashStyle::Solid,
            dash_offset: 0.0,
            transform_type: StrokeTransformType::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LayerOptions {
    None,
    /// Layer content starts as a copy of the background; allows the opaque
    /// fast path but loses destination alpha.
    InitializeFromBackground,
}

pub struct LayerParameters<'a, G> {
    /// `None` means infinite bounds.
    pub content_bounds: Option<Rect>,
    pub geometric_mask: &'a G,
    pub mask_antialias: AntialiasMode,
    pub mask_transform: Affine,
    pub opacity: f32,
    pub options: LayerOptions,
}

pub struct GlyphRun<'a, F> {
    pub font_face: &'a F,
    pub em_size: f32,
    pub indices: &'a [u16],
    pub advances: &'a [f32],
    pub offsets: &'a [Vec2],
    /// Odd levels are right-to-left.
    pub bidi_level: u32,
}

/// Receives the figures of a path geometry being built.
pub trait GeometrySink {
    type Geometry;

    fn begin_figure(&mut self, start: Point, filled: bool);
    fn add_line(&mut self, to: Point);
    fn add_bezier(&mut self, c1: Point, c2: Point, end: Point);
    fn end_figure(&mut self, closed: bool);
    /// Finalizes the geometry. No figure may be open.
    fn close(self) -> Result<Self::Geometry, BackendError>;
}

pub trait Backend: Sized + 'static {
    type Bitmap: Clone;
    type Geometry: Clone;
    type Brush: Clone;
    type StrokeStyle: Clone;
    type FontFace: Clone;
    type DrawContext: DrawContext<Self>;
    type GeometrySink: GeometrySink<Geometry = Self::Geometry>;

    fn create_draw_context(&self) -> Result<Self::DrawContext, BackendError>;

    /// Creates a drawable premultiplied BGRA bitmap, optionally seeded with
    /// `data` laid out with `pitch` bytes per row.
    fn create_bitmap(
        &self,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        pitch: u32,
    ) -> Result<Self::Bitmap, BackendError>;

    fn bitmap_size(&self, bitmap: &Self::Bitmap) -> (u32, u32);

    /// True if both handles refer to the same hardware image.
    fn same_bitmap(&self, a: &Self::Bitmap, b: &Self::Bitmap) -> bool;

    /// Copies the bitmap into CPU memory. Fails while the bitmap is the
    /// target of an open frame.
    fn read_bitmap(&self, bitmap: &Self::Bitmap) -> Result<BgraImage, BackendError>;

    fn create_path_geometry(&self, fill_rule: Fill) -> Result<Self::GeometrySink, BackendError>;

    /// Union of axis-aligned rectangles as one geometry.
    fn create_rect_union(&self, rects: &[Rect]) -> Result<Self::Geometry, BackendError>;

    fn create_stroke_style(
        &self,
        props: &StrokeStyleProperties,
        dashes: &[f32],
    ) -> Result<Self::StrokeStyle, BackendError>;

    /// Resolves a font face for an already alias-substituted definition.
    fn resolve_font_face(&self, font: &FontDefinition) -> Result<Self::FontFace, BackendError>;

    fn dpi(&self) -> f32 {
        96.0
    }
}

pub trait DrawContext<B: Backend> {
    fn begin_draw(&self);
    fn end_draw(&self) -> Result<(), FrameError>;
    fn set_target(&self, target: Option<&B::Bitmap>);

    fn clear(&self, color: Color);
    fn set_transform(&self, transform: Affine);
    fn transform(&self) -> Affine;
    fn set_antialias_mode(&self, mode: AntialiasMode);
    fn set_text_antialias_mode(&self, mode: TextAntialiasMode);
    fn set_primitive_blend(&self, blend: PrimitiveBlend);

    fn create_solid_brush(&self, color: Color) -> Result<B::Brush, BackendError>;
    fn create_bitmap_brush(
        &self,
        bitmap: &B::Bitmap,
        props: &BitmapBrushProperties,
    ) -> Result<B::Brush, BackendError>;
    fn create_linear_gradient_brush(
        &self,
        start: Point,
        end: Point,
        stops: &[GradientStop],
    ) -> Result<B::Brush, BackendError>;
    fn create_radial_gradient_brush(
        &self,
        center: Point,
        origin_offset: Vec2,
        radius_x: f64,
        radius_y: f64,
        stops: &[GradientStop],
    ) -> Result<B::Brush, BackendError>;
    fn set_brush_transform(&self, brush: &B::Brush, transform: Affine);
    fn set_brush_opacity(&self, brush: &B::Brush, opacity: f32);

    fn fill_geometry(&self, geometry: &B::Geometry, brush: &B::Brush);
    fn draw_geometry(
        &self,
        geometry: &B::Geometry,
        brush: &B::Brush,
        width: f32,
        style: Option<&B::StrokeStyle>,
    );
    fn fill_rectangle(&self, rect: Rect, brush: &B::Brush);
    fn draw_rectangle(
        &self,
        rect: Rect,
        brush: &B::Brush,
        width: f32,
        style: Option<&B::StrokeStyle>,
    );
    fn fill_ellipse(&self, center: Point, radius_x: f64, radius_y: f64, brush: &B::Brush);
    fn draw_ellipse(
        &self,
        center: Point,
        radius_x: f64,
        radius_y: f64,
        brush: &B::Brush,
        width: f32,
        style: Option<&B::StrokeStyle>,
    );
    fn draw_line(
        &self,
        p0: Point,
        p1: Point,
        brush: &B::Brush,
        width: f32,
        style: Option<&B::StrokeStyle>,
    );
    fn draw_bitmap(
        &self,
        bitmap: &B::Bitmap,
        dest: Rect,
        opacity: f32,
        mode: InterpolationMode,
        source: Option<Rect>,
    );
    fn draw_glyph_run(&self, origin: Point, run: &GlyphRun<'_, B::FontFace>, brush: &B::Brush);

    fn push_axis_aligned_clip(&self, rect: Rect, mode: AntialiasMode);
    fn pop_axis_aligned_clip(&self);
    fn push_layer(&self, params: &LayerParameters<'_, B::Geometry>);
    fn pop_layer(&self);
}
