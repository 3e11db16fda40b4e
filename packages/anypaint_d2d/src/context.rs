use std::cell::{Cell, RefCell};
use std::mem::ManuallyDrop;

use anypaint::backend::{
    AntialiasMode, BitmapBrushProperties, DrawContext, GlyphRun, InterpolationMode, LayerOptions,
    LayerParameters, PrimitiveBlend, TextAntialiasMode,
};
use anypaint::{BackendError, FrameError, GradientStop};
use kurbo::{Affine, Point, Rect, Vec2};
use peniko::Color;
use windows::Foundation::Numerics::Matrix3x2;
use windows::Win32::Graphics::Direct2D::Common::*;
use windows::Win32::Graphics::Direct2D::*;
use windows::Win32::Graphics::DirectWrite::*;
use windows::core::Interface;

use crate::convert::{self, creation_error};
use crate::{D2DBackend, OpenTargets};

/// An `ID2D1DeviceContext` bound to at most one target bitmap.
pub struct D2DContext {
    ctx: ID2D1DeviceContext,
    target: RefCell<Option<ID2D1Bitmap1>>,
    in_frame: Cell<bool>,
    open_targets: OpenTargets,
}

impl D2DContext {
    pub(crate) fn new(ctx: ID2D1DeviceContext, open_targets: OpenTargets) -> Self {
        Self {
            ctx,
            target: RefCell::new(None),
            in_frame: Cell::new(false),
            open_targets,
        }
    }

    pub fn raw(&self) -> &ID2D1DeviceContext {
        &self.ctx
    }

    fn target_key(&self) -> Option<usize> {
        self.target.borrow().as_ref().map(|t| t.as_raw() as usize)
    }

    fn gradient_stops(&self, stops: &[GradientStop]) -> Result<ID2D1GradientStopCollection1, BackendError> {
        let stops: Vec<D2D1_GRADIENT_STOP> = stops
            .iter()
            .map(|stop| D2D1_GRADIENT_STOP {
                position: stop.offset,
                color: convert::color(stop.color),
            })
            .collect();
        unsafe {
            self.ctx
                .CreateGradientStopCollection(
                    &stops,
                    D2D1_COLOR_SPACE_SRGB,
                    D2D1_COLOR_SPACE_SRGB,
                    D2D1_BUFFER_PRECISION_8BPC_UNORM,
                    D2D1_EXTEND_MODE_CLAMP,
                    D2D1_COLOR_INTERPOLATION_MODE_PREMULTIPLIED,
                )
                .map_err(creation_error("CreateGradientStopCollection"))
        }
    }
}

fn ellipse(center: Point, radius_x: f64, radius_y: f64) -> D2D1_ELLIPSE {
    D2D1_ELLIPSE {
        point: convert::point(center),
        radiusX: radius_x as f32,
        radiusY: radius_y as f32,
    }
}

impl DrawContext<D2DBackend> for D2DContext {
    fn begin_draw(&self) {
        if let Some(key) = self.target_key() {
            self.open_targets.borrow_mut().insert(key);
        }
        self.in_frame.set(true);
        unsafe { self.ctx.BeginDraw() };
    }

    fn end_draw(&self) -> Result<(), FrameError> {
        if let Some(key) = self.target_key() {
            self.open_targets.borrow_mut().remove(&key);
        }
        self.in_frame.set(false);
        let (mut tag1, mut tag2) = (0u64, 0u64);
        unsafe { self.ctx.EndDraw(Some(&mut tag1), Some(&mut tag2)) }.map_err(|err| FrameError {
            code: err.code().0,
            tag1,
            tag2,
        })
    }

    fn set_target(&self, target: Option<&ID2D1Bitmap1>) {
        let in_frame = self.in_frame.get();
        if in_frame {
            if let Some(key) = self.target_key() {
                self.open_targets.borrow_mut().remove(&key);
            }
        }
        unsafe {
            match target {
                Some(bitmap) => self.ctx.SetTarget(bitmap),
                None => self.ctx.SetTarget(None::<&ID2D1Image>),
            }
        }
        *self.target.borrow_mut() = target.cloned();
        if in_frame {
            if let Some(key) = self.target_key() {
                self.open_targets.borrow_mut().insert(key);
            }
        }
    }

    fn clear(&self, color: Color) {
        unsafe { self.ctx.Clear(Some(&convert::color(color))) };
    }

    fn set_transform(&self, transform: Affine) {
        unsafe { self.ctx.SetTransform(&convert::matrix(transform)) };
    }

    fn transform(&self) -> Affine {
        let mut m = Matrix3x2::default();
        unsafe { self.ctx.GetTransform(&mut m) };
        convert::affine(&m)
    }

    fn set_antialias_mode(&self, mode: AntialiasMode) {
        unsafe { self.ctx.SetAntialiasMode(convert::antialias(mode)) };
    }

    fn set_text_antialias_mode(&self, mode: TextAntialiasMode) {
        unsafe { self.ctx.SetTextAntialiasMode(convert::text_antialias(mode)) };
    }

    fn set_primitive_blend(&self, blend: PrimitiveBlend) {
        unsafe { self.ctx.SetPrimitiveBlend(convert::primitive_blend(blend)) };
    }

    fn create_solid_brush(&self, color: Color) -> Result<ID2D1Brush, BackendError> {
        let brush = unsafe {
            self.ctx
                .CreateSolidColorBrush(&convert::color(color), None)
                .map_err(creation_error("CreateSolidColorBrush"))?
        };
        Ok(brush.into())
    }

    fn create_bitmap_brush(
        &self,
        bitmap: &ID2D1Bitmap1,
        props: &BitmapBrushProperties,
    ) -> Result<ID2D1Brush, BackendError> {
        let props = D2D1_BITMAP_BRUSH_PROPERTIES1 {
            extendModeX: convert::extend(props.extend_x),
            extendModeY: convert::extend(props.extend_y),
            interpolationMode: convert::interpolation(props.interpolation),
        };
        let brush = unsafe {
            self.ctx
                .CreateBitmapBrush(bitmap, Some(&props), None)
                .map_err(creation_error("CreateBitmapBrush"))?
        };
        Ok(brush.into())
    }

    fn create_linear_gradient_brush(
        &self,
        start: Point,
        end: Point,
        stops: &[GradientStop],
    ) -> Result<ID2D1Brush, BackendError> {
        let collection = self.gradient_stops(stops)?;
        let props = D2D1_LINEAR_GRADIENT_BRUSH_PROPERTIES {
            startPoint: convert::point(start),
            endPoint: convert::point(end),
        };
        let brush = unsafe {
            self.ctx
                .CreateLinearGradientBrush(&props, None, &collection)
                .map_err(creation_error("CreateLinearGradientBrush"))?
        };
        Ok(brush.into())
    }

    fn create_radial_gradient_brush(
        &self,
        center: Point,
        origin_offset: Vec2,
        radius_x: f64,
        radius_y: f64,
        stops: &[GradientStop],
    ) -> Result<ID2D1Brush, BackendError> {
        let collection = self.gradient_stops(stops)?;
        let props = D2D1_RADIAL_GRADIENT_BRUSH_PROPERTIES {
            center: convert::point(center),
            gradientOriginOffset: convert::point(origin_offset.to_point()),
            radiusX: radius_x as f32,
            radiusY: radius_y as f32,
        };
        let brush = unsafe {
            self.ctx
                .CreateRadialGradientBrush(&props, None, &collection)
                .map_err(creation_error("CreateRadialGradientBrush"))?
        };
        Ok(brush.into())
    }

    fn set_brush_transform(&self, brush: &ID2D1Brush, transform: Affine) {
        unsafe { brush.SetTransform(&convert::matrix(transform)) };
    }

    fn set_brush_opacity(&self, brush: &ID2D1Brush, opacity: f32) {
        unsafe { brush.SetOpacity(opacity) };
    }

    fn fill_geometry(&self, geometry: &ID2D1Geometry, brush: &ID2D1Brush) {
        unsafe { self.ctx.FillGeometry(geometry, brush, None::<&ID2D1Brush>) };
    }

    fn draw_geometry(
        &self,
        geometry: &ID2D1Geometry,
        brush: &ID2D1Brush,
        width: f32,
        style: Option<&ID2D1StrokeStyle>,
    ) {
        unsafe { self.ctx.DrawGeometry(geometry, brush, width, style) };
    }

    fn fill_rectangle(&self, rect: Rect, brush: &ID2D1Brush) {
        unsafe { self.ctx.FillRectangle(&convert::rect(rect), brush) };
    }

    fn draw_rectangle(
        &self,
        rect: Rect,
        brush: &ID2D1Brush,
        width: f32,
        style: Option<&ID2D1StrokeStyle>,
    ) {
        unsafe { self.ctx.DrawRectangle(&convert::rect(rect), brush, width, style) };
    }

    fn fill_ellipse(&self, center: Point, radius_x: f64, radius_y: f64, brush: &ID2D1Brush) {
        unsafe { self.ctx.FillEllipse(&ellipse(center, radius_x, radius_y), brush) };
    }

    fn draw_ellipse(
        &self,
        center: Point,
        radius_x: f64,
        radius_y: f64,
        brush: &ID2D1Brush,
        width: f32,
        style: Option<&ID2D1StrokeStyle>,
    ) {
        unsafe {
            self.ctx
                .DrawEllipse(&ellipse(center, radius_x, radius_y), brush, width, style)
        };
    }

    fn draw_line(
        &self,
        p0: Point,
        p1: Point,
        brush: &ID2D1Brush,
        width: f32,
        style: Option<&ID2D1StrokeStyle>,
    ) {
        unsafe {
            self.ctx
                .DrawLine(convert::point(p0), convert::point(p1), brush, width, style)
        };
    }

    fn draw_bitmap(
        &self,
        bitmap: &ID2D1Bitmap1,
        dest: Rect,
        opacity: f32,
        mode: InterpolationMode,
        source: Option<Rect>,
    ) {
        let dest = convert::rect(dest);
        let source = source.map(convert::rect);
        unsafe {
            self.ctx.DrawBitmap(
                bitmap,
                Some(&dest),
                opacity,
                convert::interpolation(mode),
                source.as_ref().map(|s| s as *const _),
                None,
            )
        };
    }

    fn draw_glyph_run(&self, origin: Point, run: &GlyphRun<'_, IDWriteFontFace>, brush: &ID2D1Brush) {
        let count = run.indices.len().min(run.advances.len());
        if count == 0 {
            return;
        }
        // DirectWrite offsets point up the ascender.
        let offsets: Vec<DWRITE_GLYPH_OFFSET> = run
            .offsets
            .iter()
            .take(count)
            .map(|o| DWRITE_GLYPH_OFFSET {
                advanceOffset: o.x as f32,
                ascenderOffset: -o.y as f32,
            })
            .collect();
        let glyph_run = DWRITE_GLYPH_RUN {
            fontFace: ManuallyDrop::new(Some(run.font_face.clone())),
            fontEmSize: run.em_size,
            glyphCount: count as u32,
            glyphIndices: run.indices.as_ptr(),
            glyphAdvances: run.advances.as_ptr(),
            glyphOffsets: if offsets.len() == count {
                offsets.as_ptr()
            } else {
                std::ptr::null()
            },
            isSideways: false.into(),
            bidiLevel: run.bidi_level,
        };
        unsafe {
            self.ctx.DrawGlyphRun(
                convert::point(origin),
                &glyph_run,
                None,
                brush,
                DWRITE_MEASURING_MODE_NATURAL,
            )
        };
        drop(ManuallyDrop::into_inner(glyph_run.fontFace));
    }

    fn push_axis_aligned_clip(&self, rect: Rect, mode: AntialiasMode) {
        unsafe {
            self.ctx
                .PushAxisAlignedClip(&convert::rect(rect), convert::antialias(mode))
        };
    }

    fn pop_axis_aligned_clip(&self) {
        unsafe { self.ctx.PopAxisAlignedClip() };
    }

    fn push_layer(&self, params: &LayerParameters<'_, ID2D1Geometry>) {
        let layer = D2D1_LAYER_PARAMETERS1 {
            contentBounds: params.content_bounds.map_or(convert::INFINITE_RECT, convert::rect),
            geometricMask: ManuallyDrop::new(Some(params.geometric_mask.clone())),
            maskAntialiasMode: convert::antialias(params.mask_antialias),
            maskTransform: convert::matrix(params.mask_transform),
            opacity: params.opacity,
            opacityBrush: ManuallyDrop::new(None),
            layerOptions: match params.options {
                LayerOptions::None => D2D1_LAYER_OPTIONS1_NONE,
                LayerOptions::InitializeFromBackground => D2D1_LAYER_OPTIONS1_INITIALIZE_FROM_BACKGROUND,
            },
        };
        unsafe { self.ctx.PushLayer(&layer, None::<&ID2D1Layer>) };
        drop(ManuallyDrop::into_inner(layer.geometricMask));
    }

    fn pop_layer(&self) {
        unsafe { self.ctx.PopLayer() };
    }
}
