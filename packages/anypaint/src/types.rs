//! Backend independent description of what gets painted: paths, pens,
//! brushes, transforms, clip operations and text runs.

use std::rc::{Rc, Weak};

use bitflags::bitflags;
use kurbo::{Affine, Cap, Join, Point, Rect, Vec2};
use peniko::{Color, Extend, Fill};
use smallvec::SmallVec;

use crate::image::BgraImage;

/// Projective 3x3 transform using the row-vector convention
/// `[x y 1] * M`. Affine transforms keep `m13 = m23 = 0` and `m33 = 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub m11: f64,
    pub m12: f64,
    pub m13: f64,
    pub m21: f64,
    pub m22: f64,
    pub m23: f64,
    pub m31: f64,
    pub m32: f64,
    pub m33: f64,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Affine> for Transform {
    fn from(affine: Affine) -> Self {
        Self::from_affine(affine)
    }
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        m11: 1.0,
        m12: 0.0,
        m13: 0.0,
        m21: 0.0,
        m22: 1.0,
        m23: 0.0,
        m31: 0.0,
        m32: 0.0,
        m33: 1.0,
    };

    pub fn from_affine(affine: Affine) -> Self {
        let [a, b, c, d, e, f] = affine.as_coeffs();
        Transform {
            m11: a,
            m12: b,
            m13: 0.0,
            m21: c,
            m22: d,
            m23: 0.0,
            m31: e,
            m32: f,
            m33: 1.0,
        }
    }

    pub fn translate(dx: f64, dy: f64) -> Self {
        Self::from_affine(Affine::translate((dx, dy)))
    }

    pub fn scale(sx: f64, sy: f64) -> Self {
        Self::from_affine(Affine::scale_non_uniform(sx, sy))
    }

    pub fn is_affine(&self) -> bool {
        self.m13 == 0.0 && self.m23 == 0.0 && self.m33 == 1.0
    }

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// True when the transform is at most a translation combined with a scale.
    pub fn is_scale_translate(&self) -> bool {
        self.is_affine() && self.m12 == 0.0 && self.m21 == 0.0
    }

    /// Affine part, or `None` for perspective transforms.
    pub fn to_affine(&self) -> Option<Affine> {
        self.is_affine().then(|| {
            Affine::new([self.m11, self.m12, self.m21, self.m22, self.m31, self.m32])
        })
    }

    pub fn map_point(&self, p: Point) -> Point {
        let x = self.m11 * p.x + self.m21 * p.y + self.m31;
        let y = self.m12 * p.x + self.m22 * p.y + self.m32;
        if self.is_affine() {
            return Point::new(x, y);
        }
        let mut w = self.m13 * p.x + self.m23 * p.y + self.m33;
        if w.abs() < 1e-9 {
            w = 1e-9_f64.copysign(w);
        }
        Point::new(x / w, y / w)
    }

    /// `self` applied first, then `other`.
    pub fn then(&self, other: &Transform) -> Transform {
        let a = self;
        let b = other;
        Transform {
            m11: a.m11 * b.m11 + a.m12 * b.m21 + a.m13 * b.m31,
            m12: a.m11 * b.m12 + a.m12 * b.m22 + a.m13 * b.m32,
            m13: a.m11 * b.m13 + a.m12 * b.m23 + a.m13 * b.m33,
            m21: a.m21 * b.m11 + a.m22 * b.m21 + a.m23 * b.m31,
            m22: a.m21 * b.m12 + a.m22 * b.m22 + a.m23 * b.m32,
            m23: a.m21 * b.m13 + a.m22 * b.m23 + a.m23 * b.m33,
            m31: a.m31 * b.m11 + a.m32 * b.m21 + a.m33 * b.m31,
            m32: a.m31 * b.m12 + a.m32 * b.m22 + a.m33 * b.m32,
            m33: a.m31 * b.m13 + a.m32 * b.m23 + a.m33 * b.m33,
        }
    }
}

/// Tag of a point record in a [`VectorPath`]. `CurveTo` is followed by two
/// `CurveData` records; the three points form one cubic segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    MoveTo,
    LineTo,
    CurveTo,
    CurveData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeHint {
    Generic,
    Rect,
    Ellipse,
    Polygon,
}

/// Identity of a path for caching purposes. Clones of a path share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PathId(usize);

/// Immutable vector path: point records with optional element tags.
///
/// A path without tags is a plain point list: the first point starts a
/// figure and every following point is a line end.
#[derive(Debug, Clone)]
pub struct VectorPath {
    points: Rc<[Point]>,
    elements: Option<Rc<[ElementKind]>>,
    fill_rule: Fill,
    implicit_close: bool,
    hint: ShapeHint,
    token: Rc<()>,
}

impl VectorPath {
    pub fn builder() -> VectorPathBuilder {
        VectorPathBuilder::default()
    }

    /// Point-list path. `closed` sets the implicit-close flag.
    pub fn polygon(points: &[Point], closed: bool, fill_rule: Fill) -> Self {
        Self::from_parts(points.to_vec(), None, fill_rule, closed, ShapeHint::Polygon)
    }

    pub fn rect(rect: Rect) -> Self {
        let r = rect;
        let points = vec![
            Point::new(r.x0, r.y0),
            Point::new(r.x1, r.y0),
            Point::new(r.x1, r.y1),
            Point::new(r.x0, r.y1),
        ];
        Self::from_parts(points, None, Fill::NonZero, true, ShapeHint::Rect)
    }

    /// Ellipse inscribed in `rect`, as four cubic segments.
    pub fn ellipse(rect: Rect) -> Self {
        const KAPPA: f64 = 0.552_284_749_8;
        let c = rect.center();
        let rx = rect.width() / 2.0;
        let ry = rect.height() / 2.0;
        let (kx, ky) = (rx * KAPPA, ry * KAPPA);
        let mut b = Self::builder();
        b.move_to(Point::new(c.x + rx, c.y));
        b.curve_to(
            Point::new(c.x + rx, c.y + ky),
            Point::new(c.x + kx, c.y + ry),
            Point::new(c.x, c.y + ry),
        );
        b.curve_to(
            Point::new(c.x - kx, c.y + ry),
            Point::new(c.x - rx, c.y + ky),
            Point::new(c.x - rx, c.y),
        );
        b.curve_to(
            Point::new(c.x - rx, c.y - ky),
            Point::new(c.x - kx, c.y - ry),
            Point::new(c.x, c.y - ry),
        );
        b.curve_to(
            Point::new(c.x + kx, c.y - ry),
            Point::new(c.x + rx, c.y - ky),
            Point::new(c.x + rx, c.y),
        );
        let mut path = b.finish(Fill::NonZero);
        path.hint = ShapeHint::Ellipse;
        path
    }

    fn from_parts(
        points: Vec<Point>,
        elements: Option<Vec<ElementKind>>,
        fill_rule: Fill,
        implicit_close: bool,
        hint: ShapeHint,
    ) -> Self {
        VectorPath {
            points: points.into(),
            elements: elements.map(Into::into),
            fill_rule,
            implicit_close,
            hint,
            token: Rc::new(()),
        }
    }

    pub fn id(&self) -> PathId {
        PathId(Rc::as_ptr(&self.token) as usize)
    }

    pub(crate) fn liveness(&self) -> Weak<()> {
        Rc::downgrade(&self.token)
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn elements(&self) -> Option<&[ElementKind]> {
        self.elements.as_deref()
    }

    pub fn fill_rule(&self) -> Fill {
        self.fill_rule
    }

    pub fn has_implicit_close(&self) -> bool {
        self.implicit_close
    }

    pub fn hint(&self) -> ShapeHint {
        self.hint
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn has_curves(&self) -> bool {
        self.elements()
            .is_some_and(|e| e.iter().any(|k| *k == ElementKind::CurveTo))
    }

    /// Single figure made only of line segments.
    pub fn is_polyline(&self) -> bool {
        match self.elements() {
            None => true,
            Some(e) => {
                !e.is_empty()
                    && e[0] == ElementKind::MoveTo
                    && e[1..].iter().all(|k| *k == ElementKind::LineTo)
            }
        }
    }

    pub fn bounding_rect(&self) -> Rect {
        let mut iter = self.points.iter();
        let Some(first) = iter.next() else {
            return Rect::ZERO;
        };
        iter.fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p))
    }

    /// Axis-aligned rectangle described by this path, if it is one.
    pub fn as_axis_aligned_rect(&self) -> Option<Rect> {
        if self.has_curves() {
            return None;
        }
        let pts = &self.points[..];
        let pts = match pts.len() {
            4 => pts,
            5 if pts[0] == pts[4] => &pts[..4],
            _ => return None,
        };
        let horizontal_first = pts[0].y == pts[1].y
            && pts[1].x == pts[2].x
            && pts[2].y == pts[3].y
            && pts[3].x == pts[0].x;
        let vertical_first = pts[0].x == pts[1].x
            && pts[1].y == pts[2].y
            && pts[2].x == pts[3].x
            && pts[3].y == pts[0].y;
        (horizontal_first || vertical_first).then(|| Rect::from_points(pts[0], pts[2]))
    }

    /// Path with every point mapped through `transform`. Curves are flattened
    /// first when the transform is projective.
    pub fn transformed(&self, transform: &Transform) -> VectorPath {
        if transform.is_affine() || !self.has_curves() {
            let points = self.points.iter().map(|p| transform.map_point(*p)).collect();
            return Self::from_parts(
                points,
                self.elements.as_ref().map(|e| e.to_vec()),
                self.fill_rule,
                self.implicit_close,
                ShapeHint::Generic,
            );
        }
        let flat = self.flattened(16);
        flat.transformed(transform)
    }

    /// Replace every cubic segment by `steps` line segments.
    pub fn flattened(&self, steps: usize) -> VectorPath {
        let Some(elements) = self.elements() else {
            return self.clone();
        };
        let mut points = Vec::with_capacity(self.points.len());
        let mut kinds = Vec::with_capacity(self.points.len());
        let mut i = 0;
        while i < elements.len() {
            match elements[i] {
                ElementKind::CurveTo if i + 2 < elements.len() && i > 0 => {
                    let p0 = points.last().copied().unwrap_or(self.points[i - 1]);
                    let (p1, p2, p3) = (self.points[i], self.points[i + 1], self.points[i + 2]);
                    for s in 1..=steps {
                        let t = s as f64 / steps as f64;
                        let mt = 1.0 - t;
                        let v = p0.to_vec2() * (mt * mt * mt)
                            + p1.to_vec2() * (3.0 * mt * mt * t)
                            + p2.to_vec2() * (3.0 * mt * t * t)
                            + p3.to_vec2() * (t * t * t);
                        points.push(v.to_point());
                        kinds.push(ElementKind::LineTo);
                    }
                    i += 3;
                }
                ElementKind::MoveTo => {
                    points.push(self.points[i]);
                    kinds.push(ElementKind::MoveTo);
                    i += 1;
                }
                _ => {
                    points.push(self.points[i]);
                    kinds.push(ElementKind::LineTo);
                    i += 1;
                }
            }
        }
        Self::from_parts(
            points,
            Some(kinds),
            self.fill_rule,
            self.implicit_close,
            ShapeHint::Generic,
        )
    }

    /// Path translated by `offset`.
    pub fn translated(&self, offset: Vec2) -> VectorPath {
        self.transformed(&Transform::translate(offset.x, offset.y))
    }
}

#[derive(Debug, Default)]
pub struct VectorPathBuilder {
    points: Vec<Point>,
    elements: Vec<ElementKind>,
    subpath_start: Option<Point>,
}

impl VectorPathBuilder {
    pub fn move_to(&mut self, p: Point) -> &mut Self {
        self.points.push(p);
        self.elements.push(ElementKind::MoveTo);
        self.subpath_start = Some(p);
        self
    }

    pub fn line_to(&mut self, p: Point) -> &mut Self {
        if self.subpath_start.is_none() {
            return self.move_to(p);
        }
        self.points.push(p);
        self.elements.push(ElementKind::LineTo);
        self
    }

    pub fn curve_to(&mut self, c1: Point, c2: Point, end: Point) -> &mut Self {
        if self.subpath_start.is_none() {
            self.move_to(c1);
        }
        self.points.extend([c1, c2, end]);
        self.elements.extend([
            ElementKind::CurveTo,
            ElementKind::CurveData,
            ElementKind::CurveData,
        ]);
        self
    }

    /// Closes the current figure with an explicit line back to its start.
    pub fn close(&mut self) -> &mut Self {
        if let (Some(start), Some(last)) = (self.subpath_start, self.points.last()) {
            if *last != start {
                self.points.push(start);
                self.elements.push(ElementKind::LineTo);
            }
        }
        self
    }

    pub fn finish(self, fill_rule: Fill) -> VectorPath {
        VectorPath::from_parts(
            self.points,
            Some(self.elements),
            fill_rule,
            false,
            ShapeHint::Generic,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenStyle {
    NoPen,
    Solid,
    Dash,
    Dot,
    DashDot,
    DashDotDot,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pen {
    pub style: PenStyle,
    pub width: f64,
    pub cap: Cap,
    pub join: Join,
    pub miter_limit: f64,
    /// Dash pattern in units of pen width, used by [`PenStyle::Custom`].
    pub custom_dashes: Vec<f64>,
    pub dash_offset: f64,
    pub brush: Brush,
    pub cosmetic: bool,
}

impl Default for Pen {
    fn default() -> Self {
        Self {
            style: PenStyle::Solid,
            width: 1.0,
            cap: Cap::Square,
            join: Join::Bevel,
            miter_limit: 2.0,
            custom_dashes: Vec::new(),
            dash_offset: 0.0,
            brush: Brush::solid(Color::BLACK),
            cosmetic: false,
        }
    }
}

impl Pen {
    pub fn new(color: Color, width: f64) -> Self {
        Self {
            width,
            brush: Brush::solid(color),
            ..Default::default()
        }
    }

    pub fn none() -> Self {
        Self {
            style: PenStyle::NoPen,
            brush: Brush::none(),
            ..Default::default()
        }
    }

    pub fn with_style(mut self, style: PenStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_cap(mut self, cap: Cap) -> Self {
        self.cap = cap;
        self
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.join = join;
        self
    }

    pub fn with_miter_limit(mut self, limit: f64) -> Self {
        self.miter_limit = limit;
        self
    }

    pub fn with_dashes(mut self, dashes: &[f64]) -> Self {
        self.style = PenStyle::Custom;
        self.custom_dashes = dashes.to_vec();
        self
    }

    pub fn is_empty(&self) -> bool {
        self.style == PenStyle::NoPen || self.brush.is_empty()
    }

    /// Dash pattern in units of pen width. Empty for solid pens and for
    /// custom patterns without a positive entry, which stroke solid.
    pub fn dash_pattern(&self) -> SmallVec<[f64; 8]> {
        let pattern: &[f64] = match self.style {
            PenStyle::NoPen | PenStyle::Solid => &[],
            PenStyle::Dash => &[4.0, 2.0],
            PenStyle::Dot => &[1.0, 2.0],
            PenStyle::DashDot => &[4.0, 2.0, 1.0, 2.0],
            PenStyle::DashDotDot => &[4.0, 2.0, 1.0, 2.0, 1.0, 2.0],
            PenStyle::Custom => &self.custom_dashes,
        };
        if !pattern.iter().any(|d| *d > 0.0) {
            return SmallVec::new();
        }
        pattern.iter().copied().collect()
    }

    pub fn is_dashed(&self) -> bool {
        !self.dash_pattern().is_empty()
    }

    pub fn color(&self) -> Color {
        match &self.brush.style {
            BrushStyle::Solid(c) | BrushStyle::Pattern { color: c, .. } => *c,
            _ => Color::BLACK,
        }
    }
}

/// 8x8 two-color fill patterns. Each row is a bit mask, most significant
/// bit leftmost; set bits take the brush color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternStyle {
    Dense1,
    Dense2,
    Dense3,
    Dense4,
    Dense5,
    Dense6,
    Dense7,
    Horizontal,
    Vertical,
    Cross,
    BDiag,
    FDiag,
    DiagCross,
}

impl PatternStyle {
    pub fn rows(self) -> [u8; 8] {
        match self {
            PatternStyle::Dense1 => [0xff, 0xbb, 0xff, 0xff, 0xff, 0xbb, 0xff, 0xff],
            PatternStyle::Dense2 => [0x77, 0xff, 0xdd, 0xff, 0x77, 0xff, 0xdd, 0xff],
            PatternStyle::Dense3 => [0x55, 0xbb, 0x55, 0xee, 0x55, 0xbb, 0x55, 0xee],
            PatternStyle::Dense4 => [0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55, 0xaa, 0x55],
            PatternStyle::Dense5 => [0xaa, 0x44, 0xaa, 0x11, 0xaa, 0x44, 0xaa, 0x11],
            PatternStyle::Dense6 => [0x88, 0x00, 0x22, 0x00, 0x88, 0x00, 0x22, 0x00],
            PatternStyle::Dense7 => [0x00, 0x44, 0x00, 0x00, 0x00, 0x44, 0x00, 0x00],
            PatternStyle::Horizontal => [0x00, 0x00, 0x00, 0xff, 0x00, 0x00, 0x00, 0x00],
            PatternStyle::Vertical => [0x08; 8],
            PatternStyle::Cross => [0x08, 0x08, 0x08, 0xff, 0x08, 0x08, 0x08, 0x08],
            PatternStyle::BDiag => [0x01, 0x02, 0x04, 0x08, 0x10, 0x20, 0x40, 0x80],
            PatternStyle::FDiag => [0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01],
            PatternStyle::DiagCross => [0x81, 0x42, 0x24, 0x18, 0x18, 0x24, 0x42, 0x81],
        }
    }

    pub fn is_set(self, x: u32, y: u32) -> bool {
        let row = self.rows()[(y % 8) as usize];
        row & (0x80 >> (x % 8)) != 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GradientStop {
    pub offset: f32,
    pub color: Color,
}

impl PartialEq for GradientStop {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.color.components == other.color.components
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradientKind {
    Linear { start: Point, end: Point },
    Radial { center: Point, radius: f64, focal: Point },
    /// Angular sweep around `center` starting at `angle` degrees.
    Conical { center: Point, angle: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Gradient {
    pub kind: GradientKind,
    pub stops: SmallVec<[GradientStop; 4]>,
    pub spread: Extend,
}

impl Gradient {
    pub fn new(kind: GradientKind, stops: &[(f32, Color)]) -> Self {
        Self {
            kind,
            stops: stops
                .iter()
                .map(|(offset, color)| GradientStop {
                    offset: *offset,
                    color: *color,
                })
                .collect(),
            spread: Extend::Pad,
        }
    }

    pub fn with_spread(mut self, spread: Extend) -> Self {
        self.spread = spread;
        self
    }
}

#[derive(Debug, Clone)]
pub enum BrushStyle {
    NoBrush,
    Solid(Color),
    Pattern { pattern: PatternStyle, color: Color },
    Gradient(Gradient),
    Texture(Rc<BgraImage>),
}

impl PartialEq for BrushStyle {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (BrushStyle::NoBrush, BrushStyle::NoBrush) => true,
            (BrushStyle::Solid(a), BrushStyle::Solid(b)) => a.components == b.components,
            (
                BrushStyle::Pattern { pattern: pa, color: ca },
                BrushStyle::Pattern { pattern: pb, color: cb },
            ) => pa == pb && ca.components == cb.components,
            (BrushStyle::Gradient(a), BrushStyle::Gradient(b)) => a == b,
            (BrushStyle::Texture(a), BrushStyle::Texture(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Brush {
    pub style: BrushStyle,
    pub transform: Affine,
}

impl Default for Brush {
    fn default() -> Self {
        Self::none()
    }
}

impl From<Color> for Brush {
    fn from(color: Color) -> Self {
        Brush::solid(color)
    }
}

impl Brush {
    pub fn none() -> Self {
        Self {
            style: BrushStyle::NoBrush,
            transform: Affine::IDENTITY,
        }
    }

    pub fn solid(color: Color) -> Self {
        Self {
            style: BrushStyle::Solid(color),
            transform: Affine::IDENTITY,
        }
    }

    pub fn pattern(pattern: PatternStyle, color: Color) -> Self {
        Self {
            style: BrushStyle::Pattern { pattern, color },
            transform: Affine::IDENTITY,
        }
    }

    pub fn gradient(gradient: Gradient) -> Self {
        Self {
            style: BrushStyle::Gradient(gradient),
            transform: Affine::IDENTITY,
        }
    }

    pub fn texture(image: Rc<BgraImage>) -> Self {
        Self {
            style: BrushStyle::Texture(image),
            transform: Affine::IDENTITY,
        }
    }

    pub fn with_transform(mut self, transform: Affine) -> Self {
        self.transform = transform;
        self
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.style, BrushStyle::NoBrush)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompositionMode {
    #[default]
    SourceOver,
    DestinationOver,
    Clear,
    Source,
    Destination,
    SourceIn,
    DestinationIn,
    SourceOut,
    DestinationOut,
    SourceAtop,
    DestinationAtop,
    Xor,
    Plus,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderHints: u8 {
        const ANTIALIASING = 1;
        const TEXT_ANTIALIASING = 1 << 1;
        const SMOOTH_PIXMAP_TRANSFORM = 1 << 2;
        const HIGH_QUALITY_ANTIALIASING = 1 << 3;
    }
}

impl Default for RenderHints {
    fn default() -> Self {
        RenderHints::TEXT_ANTIALIASING
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClipOperation {
    NoClip,
    ReplaceClip,
    IntersectClip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    OddEven,
    Winding,
    Polyline,
}

/// Set of rectangles, e.g. the visible area of a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    rects: Vec<Rect>,
}

impl Region {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: Rect) -> Self {
        Self { rects: vec![rect] }
    }

    pub fn from_rects(rects: impl IntoIterator<Item = Rect>) -> Self {
        Self {
            rects: rects.into_iter().filter(|r| r.area() > 0.0).collect(),
        }
    }

    pub fn rects(&self) -> &[Rect] {
        &self.rects
    }

    pub fn rect_count(&self) -> usize {
        self.rects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn bounding_rect(&self) -> Rect {
        let mut iter = self.rects.iter();
        match iter.next() {
            Some(first) => iter.fold(*first, |acc, r| acc.union(*r)),
            None => Rect::ZERO,
        }
    }

    /// Union of the rectangles as one winding path.
    pub fn to_path(&self) -> VectorPath {
        let mut b = VectorPath::builder();
        for r in &self.rects {
            b.move_to(Point::new(r.x0, r.y0))
                .line_to(Point::new(r.x1, r.y0))
                .line_to(Point::new(r.x1, r.y1))
                .line_to(Point::new(r.x0, r.y1))
                .close();
        }
        b.finish(Fill::NonZero)
    }
}

/// Font request used as the font-face cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FontDefinition {
    pub family: String,
    pub weight: u16,
    pub italic: bool,
    /// 1..=9, 5 is normal.
    pub stretch: u8,
}

impl Default for FontDefinition {
    fn default() -> Self {
        Self {
            family: String::new(),
            weight: 400,
            italic: false,
            stretch: 5,
        }
    }
}

impl FontDefinition {
    pub fn new(family: &str) -> Self {
        Self {
            family: family.to_string(),
            ..Default::default()
        }
    }
}

/// A shaped glyph run handed over by the font engine.
#[derive(Debug, Clone, Default)]
pub struct TextItem {
    pub font: FontDefinition,
    pub em_size: f32,
    pub glyphs: Vec<u16>,
    pub advances: Vec<f32>,
    pub offsets: Vec<Vec2>,
    /// Baseline origin of the first glyph.
    pub origin: Point,
    pub rtl: bool,
    /// Glyph outlines in pixels relative to each glyph origin, used when the
    /// run cannot be drawn as a hardware glyph run. May be empty.
    pub outlines: Vec<VectorPath>,
}

impl TextItem {
    /// Pen position of every glyph, honoring advances, offsets and direction.
    pub fn glyph_positions(&self) -> Vec<Point> {
        let mut pen_x = 0.0f64;
        let dir = if self.rtl { -1.0 } else { 1.0 };
        self.glyphs
            .iter()
            .enumerate()
            .map(|(i, _)| {
                let offset = self.offsets.get(i).copied().unwrap_or(Vec2::ZERO);
                let pos = Point::new(
                    self.origin.x + dir * pen_x + offset.x,
                    self.origin.y + offset.y,
                );
                pen_x += self.advances.get(i).copied().unwrap_or(0.0) as f64;
                pos
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_path_is_detected_as_axis_aligned() {
        let path = VectorPath::rect(Rect::new(1.0, 2.0, 5.0, 7.0));
        assert_eq!(path.as_axis_aligned_rect(), Some(Rect::new(1.0, 2.0, 5.0, 7.0)));
        let skewed = VectorPath::polygon(
            &[
                Point::new(0.0, 0.0),
                Point::new(4.0, 1.0),
                Point::new(4.0, 4.0),
                Point::new(0.0, 4.0),
            ],
            true,
            Fill::NonZero,
        );
        assert_eq!(skewed.as_axis_aligned_rect(), None);
    }

    #[test]
    fn clones_share_identity_but_new_paths_do_not() {
        let a = VectorPath::rect(Rect::new(0.0, 0.0, 1.0, 1.0));
        let b = a.clone();
        let c = VectorPath::rect(Rect::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(a.id(), b.id());
        assert_ne!(a.id(), c.id());
    }

    #[test]
    fn builder_close_adds_line_to_start() {
        let mut b = VectorPath::builder();
        b.move_to(Point::new(0.0, 0.0))
            .line_to(Point::new(3.0, 0.0))
            .line_to(Point::new(3.0, 3.0))
            .close();
        let path = b.finish(Fill::EvenOdd);
        assert_eq!(path.points().last(), Some(&Point::new(0.0, 0.0)));
        assert!(path.is_polyline());
        assert!(!path.has_curves());
    }

    #[test]
    fn projective_transform_divides_by_w() {
        let t = Transform {
            m13: 0.5,
            ..Transform::IDENTITY
        };
        assert!(!t.is_affine());
        let p = t.map_point(Point::new(2.0, 4.0));
        assert!((p.x - 1.0).abs() < 1e-9 && (p.y - 2.0).abs() < 1e-9);
    }

    #[test]
    fn transform_composition_applies_left_first() {
        let t = Transform::translate(10.0, 0.0).then(&Transform::scale(2.0, 2.0));
        assert_eq!(t.map_point(Point::new(1.0, 1.0)), Point::new(22.0, 2.0));
    }

    #[test]
    fn predefined_dash_patterns() {
        let pen = Pen::default().with_style(PenStyle::DashDot);
        assert_eq!(pen.dash_pattern().as_slice(), &[4.0, 2.0, 1.0, 2.0]);
        assert!(Pen::default().dash_pattern().is_empty());
    }

    #[test]
    fn custom_pattern_without_dashes_is_solid() {
        assert!(!Pen::default().with_dashes(&[]).is_dashed());
        assert!(!Pen::default().with_dashes(&[0.0, 0.0]).is_dashed());
        assert!(Pen::default().with_dashes(&[0.0, 3.0]).is_dashed());
    }

    #[test]
    fn glyph_positions_follow_advances() {
        let item = TextItem {
            glyphs: vec![1, 2, 3],
            advances: vec![5.0, 6.0, 7.0],
            origin: Point::new(10.0, 20.0),
            ..Default::default()
        };
        let xs: Vec<f64> = item.glyph_positions().iter().map(|p| p.x).collect();
        assert_eq!(xs, vec![10.0, 15.0, 21.0]);
    }
}
