//! Pen state: resolved brush, stroke style and the pre-rendered dash tile.

use std::rc::Rc;

use kurbo::{Affine, Cap, Point};
use peniko::Color;
use smallvec::SmallVec;

use crate::backend::{
    AntialiasMode, Backend, BitmapBrushProperties, DashStyle, DrawContext, ExtendMode,
    InterpolationMode, StrokeStyleProperties, StrokeTransformType,
};
use crate::bitmap::Bitmap;
use crate::brush::{BrushFactory, ResolvedBrush};
use crate::device_context::DeviceContextGuard;
use crate::types::{Pen, PenStyle};

/// Stroke style fields and dash array for `pen`. Dashes are in units of the
/// stroke width, so the backend scales them by the pen width.
pub fn stroke_properties(pen: &Pen) -> (StrokeStyleProperties, SmallVec<[f32; 8]>) {
    let mut props = StrokeStyleProperties {
        start_cap: pen.cap,
        end_cap: pen.cap,
        dash_cap: pen.cap,
        line_join: pen.join,
        // The hardware measures the miter from the stroke edge, the pen
        // from the stroke center.
        miter_limit: (pen.miter_limit * 2.0) as f32,
        dash_style: DashStyle::Solid,
        dash_offset: pen.dash_offset as f32,
        transform_type: if pen.width == 0.0 {
            StrokeTransformType::Hairline
        } else if pen.cosmetic {
            StrokeTransformType::Fixed
        } else {
            StrokeTransformType::Normal
        },
    };
    let pattern = pen.dash_pattern();
    if pattern.is_empty() {
        return (props, SmallVec::new());
    }
    if matches!(pen.style, PenStyle::Dot | PenStyle::DashDot | PenStyle::DashDotDot)
        && pen.width <= 1.0
    {
        props.start_cap = Cap::Butt;
        props.end_cap = Cap::Butt;
        props.dash_cap = Cap::Butt;
    }
    props.dash_style = DashStyle::Custom;
    (props, pattern.iter().map(|d| *d as f32).collect())
}

pub struct PenState<B: Backend> {
    pub brush: ResolvedBrush<B>,
    pub stroke_style: Option<B::StrokeStyle>,
    /// One dash period drawn into a tile that wraps horizontally.
    pub dash_brush: Option<B::Brush>,
    /// Width of the dash tile in pixels.
    pub dash_length: f64,
}

impl<B: Backend> Default for PenState<B> {
    fn default() -> Self {
        Self {
            brush: ResolvedBrush::default(),
            stroke_style: None,
            dash_brush: None,
            dash_length: 0.0,
        }
    }
}

impl<B: Backend> PenState<B> {
    pub fn needs_emulation(&self) -> bool {
        self.brush.needs_emulation
    }

    fn is_resolved(&self) -> bool {
        self.brush.brush.is_some() || self.brush.needs_emulation
    }
}

pub struct PenFactory<B: Backend> {
    backend: Rc<B>,
    brushes: BrushFactory<B>,
    pen: Option<Pen>,
    state: PenState<B>,
}

impl<B: Backend> PenFactory<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self {
            brushes: BrushFactory::new(backend.clone()),
            backend,
            pen: None,
            state: PenState::default(),
        }
    }

    pub fn pen(&self) -> Option<&Pen> {
        self.pen.as_ref()
    }

    pub fn state(&self) -> &PenState<B> {
        &self.state
    }

    /// Forces the next `update_pen` to rebuild.
    pub fn invalidate(&mut self) {
        self.pen = None;
        self.state = PenState::default();
    }

    pub fn update_pen(
        &mut self,
        dc: &B::DrawContext,
        pen: &Pen,
        antialias: AntialiasMode,
        dash_tiles: bool,
    ) -> &PenState<B> {
        if self.pen.as_ref() == Some(pen) && self.state.is_resolved() {
            return &self.state;
        }
        self.pen = Some(pen.clone());
        self.state = PenState::default();
        if pen.style == PenStyle::NoPen {
            return &self.state;
        }

        self.state.brush = self.brushes.to_hardware_brush(dc, &pen.brush);
        let Some(brush) = self.state.brush.brush.clone() else {
            return &self.state;
        };

        let (props, dashes) = stroke_properties(pen);
        match self.backend.create_stroke_style(&props, &dashes) {
            Ok(style) => self.state.stroke_style = Some(style),
            Err(err) => {
                tracing::warn!("CreateStrokeStyle failed: {err}");
                return &self.state;
            }
        }

        if dash_tiles && props.dash_style == DashStyle::Custom {
            let pen_width = pen.width.max(1.0);
            let period: f64 = dashes.iter().map(|d| *d as f64 * pen_width).sum();
            if period > 0.0 {
                if let Some(tile) = self.render_dash_tile(&brush, pen_width, period, antialias) {
                    self.state.dash_brush = Some(tile);
                    self.state.dash_length = period.ceil();
                }
            }
        }
        &self.state
    }

    fn render_dash_tile(
        &self,
        brush: &B::Brush,
        pen_width: f64,
        period: f64,
        antialias: AntialiasMode,
    ) -> Option<B::Brush> {
        let style = self.state.stroke_style.as_ref()?;
        let (w, h) = (period.ceil() as u32, pen_width.ceil() as u32);
        let bitmap = match Bitmap::with_size(self.backend.clone(), w, h) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                tracing::warn!("dash tile allocation failed: {err}");
                return None;
            }
        };
        let dc = bitmap.device_context();
        let guard = DeviceContextGuard::new(dc);
        let ctx = dc.get();
        ctx.set_antialias_mode(antialias);
        ctx.set_transform(Affine::IDENTITY);
        ctx.clear(Color::TRANSPARENT);
        let offset_x = (w as f64 - period) / 2.0;
        let offset_y = h as f64 / 2.0;
        ctx.draw_line(
            Point::new(offset_x, offset_y),
            Point::new(offset_x + period, offset_y),
            brush,
            pen_width as f32,
            Some(style),
        );
        if !guard.finish() {
            return None;
        }
        let image = bitmap.hardware()?;
        let props = BitmapBrushProperties {
            extend_x: ExtendMode::Wrap,
            extend_y: ExtendMode::Clamp,
            interpolation: InterpolationMode::Linear,
        };
        match ctx.create_bitmap_brush(&image, &props) {
            Ok(tile) => Some(tile),
            Err(err) => {
                tracing::warn!("CreateBitmapBrush for dash tile failed: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;
    use kurbo::Join;

    fn factory() -> (PenFactory<SoftBackend>, <SoftBackend as Backend>::DrawContext) {
        let backend = Rc::new(SoftBackend::new());
        let dc = backend.create_draw_context().unwrap();
        (PenFactory::new(backend), dc)
    }

    #[test]
    fn miter_limit_is_doubled_and_caps_mapped() {
        let pen = Pen::new(Color::BLACK, 3.0)
            .with_cap(Cap::Round)
            .with_join(Join::Miter)
            .with_miter_limit(4.0);
        let (props, dashes) = stroke_properties(&pen);
        assert_eq!(props.miter_limit, 8.0);
        assert_eq!(props.start_cap, Cap::Round);
        assert_eq!(props.line_join, Join::Miter);
        assert_eq!(props.dash_style, DashStyle::Solid);
        assert!(dashes.is_empty());
    }

    #[test]
    fn transform_type_follows_width_and_cosmetic() {
        let hairline = Pen::new(Color::BLACK, 0.0);
        assert_eq!(stroke_properties(&hairline).0.transform_type, StrokeTransformType::Hairline);
        let mut cosmetic = Pen::new(Color::BLACK, 2.0);
        cosmetic.cosmetic = true;
        assert_eq!(stroke_properties(&cosmetic).0.transform_type, StrokeTransformType::Fixed);
        let normal = Pen::new(Color::BLACK, 2.0);
        assert_eq!(stroke_properties(&normal).0.transform_type, StrokeTransformType::Normal);
    }

    #[test]
    fn thin_dots_get_flat_caps() {
        let pen = Pen::new(Color::BLACK, 1.0).with_style(PenStyle::Dot).with_cap(Cap::Round);
        let (props, dashes) = stroke_properties(&pen);
        assert_eq!(props.dash_cap, Cap::Butt);
        assert_eq!(props.dash_style, DashStyle::Custom);
        assert_eq!(dashes.as_slice(), &[1.0, 2.0]);

        let wide = Pen::new(Color::BLACK, 2.0).with_style(PenStyle::Dot).with_cap(Cap::Round);
        assert_eq!(stroke_properties(&wide).0.dash_cap, Cap::Round);
    }

    #[test]
    fn empty_custom_dashes_stroke_solid() {
        let (mut factory, dc) = factory();
        let pen = Pen::new(Color::BLACK, 2.0).with_dashes(&[]);
        let (props, dashes) = stroke_properties(&pen);
        assert_eq!(props.dash_style, DashStyle::Solid);
        assert!(dashes.is_empty());

        let state = factory.update_pen(&dc, &pen, AntialiasMode::Aliased, true);
        assert!(state.stroke_style.is_some());
        assert!(state.dash_brush.is_none());
    }

    #[test]
    fn dashed_pen_builds_tile() {
        let (mut factory, dc) = factory();
        let pen = Pen::new(Color::BLACK, 2.0).with_style(PenStyle::Dash);
        let state = factory.update_pen(&dc, &pen, AntialiasMode::Aliased, true);
        assert!(state.stroke_style.is_some());
        assert!(state.dash_brush.is_some());
        assert_eq!(state.dash_length, 12.0);

        let state = factory.update_pen(&dc, &pen, AntialiasMode::Aliased, false);
        assert!(state.dash_brush.is_some(), "unchanged pen keeps cached state");
        factory.invalidate();
        let state = factory.update_pen(&dc, &pen, AntialiasMode::Aliased, false);
        assert!(state.dash_brush.is_none());
    }

    #[test]
    fn no_pen_resolves_nothing() {
        let (mut factory, dc) = factory();
        let state = factory.update_pen(&dc, &Pen::none(), AntialiasMode::Aliased, true);
        assert!(state.brush.brush.is_none());
        assert!(state.stroke_style.is_none());
    }
}
