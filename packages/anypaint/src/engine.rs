//! The paint engine: turns paths, pens, brushes, text and clips into calls
//! on a [`Backend`] draw context, with a software fallback for whatever the
//! backend cannot express.
//!
//! A session runs from [`PaintEngine::begin`] to [`PaintEngine::end`] on one
//! target [`Bitmap`]. Brushes, pens and path geometries are resolved lazily
//! and cached. Operations the backend cannot draw are rasterized by a
//! [`SoftwarePainter`] into a fallback image that is drawn back onto the
//! target, either right away or, once an unsupported composition mode was
//! requested, at the end of the session.

use std::rc::Rc;

use kurbo::{Affine, Line, Point, Rect};
use peniko::Fill;

use crate::backend::{
    AntialiasMode, Backend, DrawContext, GlyphRun, InterpolationMode, PrimitiveBlend,
    TextAntialiasMode,
};
use crate::bitmap::Bitmap;
use crate::brush::{BrushFactory, ResolvedBrush};
use crate::clip::{ClipEntry, ClipHistory, ClipStack, pop_entry, push_layer_clip};
use crate::config::EngineConfig;
use crate::dash_stroke::{dash_tiles_apply, stroke_polyline};
use crate::emulation::SoftwarePainter;
use crate::font_cache::FontFaceCache;
use crate::geometry::{ALIASING_OFFSET, GeometryCache};
use crate::image::{BgraImage, MonoImage};
use crate::pen::PenFactory;
use crate::types::{
    Brush, ClipOperation, CompositionMode, Pen, PolygonMode, Region, RenderHints, TextItem,
    Transform, VectorPath,
};

macro_rules! vlog {
    ($engine:expr, $($arg:tt)*) => {
        if $engine.config.verbose {
            tracing::debug!($($arg)*);
        }
    };
}

/// Logical state of a paint session. Swapped wholesale by
/// [`PaintEngine::set_state`], e.g. to restore a saved state.
#[derive(Debug, Clone)]
pub struct PaintState {
    pub pen: Pen,
    pub brush: Brush,
    pub brush_origin: Point,
    pub opacity: f32,
    pub composition: CompositionMode,
    pub hints: RenderHints,
    pub transform: Transform,
    pub clip_enabled: bool,
    /// Clip operations applied so far, each with the transform it was
    /// issued under.
    pub clip: ClipHistory,
}

impl Default for PaintState {
    fn default() -> Self {
        Self {
            pen: Pen::default(),
            brush: Brush::none(),
            brush_origin: Point::ZERO,
            opacity: 1.0,
            composition: CompositionMode::SourceOver,
            hints: RenderHints::default(),
            transform: Transform::IDENTITY,
            clip_enabled: true,
            clip: ClipHistory::default(),
        }
    }
}

/// Counters accumulated over the engine's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub hardware_fills: u64,
    pub hardware_strokes: u64,
    pub emulated_ops: u64,
    pub fallback_flushes: u64,
    pub join_patches: u64,
    pub dash_segments: u64,
    pub glyph_runs: u64,
    pub text_fallbacks: u64,
}

/// Source of [`PaintEngine::draw_pixmap`].
pub enum PixmapSource<'a, B: Backend> {
    Bitmap(&'a Bitmap<B>),
    /// 1-bit mask drawn in the pen color.
    Mono(&'a MonoImage),
}

pub struct PaintEngine<B: Backend> {
    backend: Rc<B>,
    config: EngineConfig,
    target: Option<Rc<Bitmap<B>>>,
    state: PaintState,
    brushes: BrushFactory<B>,
    brush_cache: Option<(Brush, ResolvedBrush<B>)>,
    pens: PenFactory<B>,
    clips: ClipStack<B>,
    system_region: Region,
    system_clip: Option<ClipEntry<B::Geometry>>,
    geometries: GeometryCache<B::Geometry>,
    fonts: FontFaceCache<B>,
    fallback: Option<SoftwarePainter>,
    emulating_composition: bool,
    suspended: bool,
    stats: EngineStats,
}

impl<B: Backend> PaintEngine<B> {
    pub fn new(backend: Rc<B>, config: EngineConfig) -> Self {
        Self {
            brushes: BrushFactory::new(backend.clone()),
            pens: PenFactory::new(backend.clone()),
            backend,
            config,
            target: None,
            state: PaintState::default(),
            brush_cache: None,
            clips: ClipStack::new(),
            system_region: Region::new(),
            system_clip: None,
            geometries: GeometryCache::new(),
            fonts: FontFaceCache::new(),
            fallback: None,
            emulating_composition: false,
            suspended: false,
            stats: EngineStats::default(),
        }
    }

    pub fn backend(&self) -> &Rc<B> {
        &self.backend
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn state(&self) -> &PaintState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn target(&self) -> Option<&Rc<Bitmap<B>>> {
        self.target.as_ref()
    }

    pub fn translucent_target(&self) -> bool {
        self.config.translucent_target
    }

    /// True once an unsupported composition mode was requested in the
    /// current session.
    pub fn is_emulating_composition(&self) -> bool {
        self.emulating_composition
    }

    pub fn clip_depth(&self) -> usize {
        self.clips.len()
    }

    pub fn cached_geometries(&self) -> usize {
        self.geometries.len()
    }

    pub fn cached_font_faces(&self) -> usize {
        self.fonts.len()
    }

    pub fn antialias_mode(&self) -> AntialiasMode {
        if self.state.hints.contains(RenderHints::ANTIALIASING) {
            AntialiasMode::PerPrimitive
        } else {
            AntialiasMode::Aliased
        }
    }

    pub fn interpolation_mode(&self) -> InterpolationMode {
        if self.state.hints.contains(RenderHints::SMOOTH_PIXMAP_TRANSFORM) {
            InterpolationMode::Linear
        } else {
            InterpolationMode::NearestNeighbor
        }
    }

    pub fn text_antialias_mode(&self) -> TextAntialiasMode {
        if !self.state.hints.contains(RenderHints::TEXT_ANTIALIASING) {
            TextAntialiasMode::Aliased
        } else if self.config.translucent_target {
            TextAntialiasMode::Grayscale
        } else {
            TextAntialiasMode::ClearType
        }
    }

    fn aliased(&self) -> bool {
        self.antialias_mode() == AntialiasMode::Aliased
    }

    fn context_transform(&self) -> Affine {
        self.state.transform.to_affine().unwrap_or(Affine::IDENTITY)
    }

    /// The target of an active, non-suspended session.
    fn active_target(&self) -> Option<Rc<Bitmap<B>>> {
        if self.suspended {
            tracing::warn!("paint engine used while suspended");
            return None;
        }
        let target = self.target.clone();
        if target.is_none() {
            tracing::warn!("paint engine used outside begin/end");
        }
        target
    }

    /// Everything goes through the fallback once the composition mode is
    /// emulated or the transform has perspective.
    fn must_emulate(&self) -> bool {
        self.emulating_composition || !self.state.transform.is_affine()
    }
}

// Session.
impl<B: Backend> PaintEngine<B> {
    /// Starts a session on `target` with a default [`PaintState`].
    /// `system_clip` is the paintable area; an empty region leaves the whole
    /// target paintable.
    pub fn begin(&mut self, target: Rc<Bitmap<B>>, system_clip: &Region) -> bool {
        if self.target.is_some() {
            tracing::warn!("PaintEngine::begin called on an active engine");
            return false;
        }
        if target.is_null() {
            tracing::warn!("PaintEngine::begin called with a null target");
            return false;
        }
        let dc = target.device_context();
        dc.begin();
        dc.get().set_transform(Affine::IDENTITY);

        self.system_region = system_clip.clone();
        self.system_clip = self.push_system_clip(&target);
        self.emulating_composition = false;
        self.fallback = None;
        self.brush_cache = None;
        self.pens.invalidate();
        self.state = PaintState::default();
        self.target = Some(target.clone());
        self.apply_state(&target);
        vlog!(self, rects = self.system_region.rect_count(), "paint session started");
        true
    }

    /// Ends the session and the hardware frame. Returns false if the frame
    /// failed.
    pub fn end(&mut self) -> bool {
        if self.suspended {
            self.resume();
        }
        let Some(target) = self.target.clone() else {
            tracing::warn!("PaintEngine::end called without begin");
            return false;
        };
        if let Some(painter) = self.fallback.take() {
            if self.emulating_composition {
                self.blit_fallback(&target, &painter.image(), false);
            }
        }
        let dc = target.device_context();
        let ctx = dc.get();
        self.clips.clear(ctx);
        if let Some(entry) = self.system_clip.take() {
            pop_entry::<B>(ctx, &entry);
        }
        self.target = None;
        self.emulating_composition = false;
        self.geometries.purge();
        let ok = dc.end();
        vlog!(self, ok, stats = ?self.stats, "paint session ended");
        ok
    }

    fn push_system_clip(&self, target: &Bitmap<B>) -> Option<ClipEntry<B::Geometry>> {
        let ctx = target.device_context().get();
        let region = &self.system_region;
        if region.rect_count() > 1 {
            return match self.backend.create_rect_union(region.rects()) {
                Ok(geometry) => {
                    push_layer_clip::<B>(
                        ctx,
                        &geometry,
                        AntialiasMode::Aliased,
                        self.config.translucent_target,
                    );
                    Some(ClipEntry::Layer(geometry))
                }
                Err(err) => {
                    tracing::warn!("system clip union failed: {err}");
                    None
                }
            };
        }
        let bounds = if region.is_empty() {
            target.rect()
        } else {
            target.rect().intersect(region.bounding_rect())
        };
        ctx.push_axis_aligned_clip(bounds, AntialiasMode::Aliased);
        Some(ClipEntry::AxisAligned)
    }

    /// Ends the hardware frame without ending the session, e.g. for a pixel
    /// readback. Clips are popped and re-pushed by [`PaintEngine::resume`].
    pub fn suspend(&mut self) -> bool {
        if self.suspended {
            return false;
        }
        let Some(target) = self.target.clone() else {
            return false;
        };
        let dc = target.device_context();
        self.clips.clear(dc.get());
        if let Some(entry) = self.system_clip.take() {
            pop_entry::<B>(dc.get(), &entry);
        }
        dc.suspend();
        self.suspended = true;
        true
    }

    pub fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        let Some(target) = self.target.clone() else {
            return;
        };
        let dc = target.device_context();
        dc.resume();
        dc.get().set_transform(Affine::IDENTITY);
        self.system_clip = self.push_system_clip(&target);
        self.apply_state(&target);
    }

    /// CPU copy of the target as it is now.
    fn read_target(&mut self, target: &Bitmap<B>) -> BgraImage {
        let _suspender = PaintEngineSuspender::new(self);
        target.to_image(Rect::ZERO)
    }
}

/// Suspends an active session for the lifetime of the value.
pub struct PaintEngineSuspender<'a, B: Backend> {
    engine: &'a mut PaintEngine<B>,
}

impl<'a, B: Backend> PaintEngineSuspender<'a, B> {
    pub fn new(engine: &'a mut PaintEngine<B>) -> Self {
        engine.suspend();
        Self { engine }
    }

    pub fn engine(&self) -> &PaintEngine<B> {
        self.engine
    }
}

impl<B: Backend> Drop for PaintEngineSuspender<'_, B> {
    fn drop(&mut self) {
        self.engine.resume();
    }
}

// State.
impl<B: Backend> PaintEngine<B> {
    /// Replaces the whole logical state and re-pushes everything derived
    /// from it, clips included.
    pub fn set_state(&mut self, state: PaintState) {
        self.state = state;
        if let Some(target) = self.target.clone() {
            if !self.suspended {
                self.apply_state(&target);
            }
        }
    }

    fn apply_state(&mut self, target: &Bitmap<B>) {
        let ctx = target.device_context().get();
        self.apply_hints(ctx);
        self.apply_composition(ctx);
        self.clips.clear(ctx);
        if self.state.clip_enabled {
            let mode = self.antialias_mode();
            self.clips.replay(
                &self.backend,
                ctx,
                &self.state.clip,
                mode,
                self.config.translucent_target,
            );
        }
        ctx.set_transform(self.context_transform());
    }

    fn apply_hints(&self, ctx: &B::DrawContext) {
        ctx.set_antialias_mode(self.antialias_mode());
        ctx.set_text_antialias_mode(self.text_antialias_mode());
    }

    fn primitive_blend(&self) -> PrimitiveBlend {
        match self.state.composition {
            CompositionMode::SourceOver => PrimitiveBlend::SourceOver,
            _ => PrimitiveBlend::Copy,
        }
    }

    fn apply_composition(&mut self, ctx: &B::DrawContext) {
        let mode = self.state.composition;
        if !matches!(mode, CompositionMode::Source | CompositionMode::SourceOver)
            && !self.emulating_composition
        {
            vlog!(self, ?mode, "composition mode emulated for the rest of the session");
            self.emulating_composition = true;
        }
        ctx.set_primitive_blend(self.primitive_blend());
    }

    pub fn set_pen(&mut self, pen: Pen) {
        self.state.pen = pen;
    }

    pub fn set_brush(&mut self, brush: Brush) {
        self.state.brush = brush;
    }

    pub fn set_brush_origin(&mut self, origin: Point) {
        self.state.brush_origin = origin;
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.state.opacity = opacity.clamp(0.0, 1.0);
    }

    pub fn set_composition_mode(&mut self, mode: CompositionMode) {
        self.state.composition = mode;
        if let Some(target) = self.target.clone() {
            self.apply_composition(target.device_context().get());
        }
    }

    /// Dash tiles and layer clips are rasterized in the antialias mode they
    /// were created with, so both are rebuilt when that mode changes.
    pub fn set_render_hints(&mut self, hints: RenderHints) {
        let previous = self.antialias_mode();
        self.state.hints = hints;
        let Some(target) = self.target.clone() else {
            return;
        };
        let ctx = target.device_context().get();
        self.apply_hints(ctx);
        let mode = self.antialias_mode();
        if mode == previous {
            return;
        }
        self.pens.invalidate();
        if self.suspended || !self.state.clip_enabled || self.clips.is_empty() {
            return;
        }
        self.clips.clear(ctx);
        self.clips.replay(
            &self.backend,
            ctx,
            &self.state.clip,
            mode,
            self.config.translucent_target,
        );
        ctx.set_transform(self.context_transform());
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.state.transform = transform;
        if let Some(target) = &self.target {
            target.device_context().get().set_transform(self.context_transform());
        }
    }

    /// Disabling pops every clip; enabling replays the recorded history if
    /// nothing is pushed.
    pub fn set_clip_enabled(&mut self, enabled: bool) {
        self.state.clip_enabled = enabled;
        let Some(target) = self.target.clone() else {
            return;
        };
        let ctx = target.device_context().get();
        if !enabled {
            self.clips.clear(ctx);
        } else if self.clips.is_empty() {
            let mode = self.antialias_mode();
            self.clips.replay(
                &self.backend,
                ctx,
                &self.state.clip,
                mode,
                self.config.translucent_target,
            );
            ctx.set_transform(self.context_transform());
        }
    }

    pub fn clip_path(&mut self, path: &VectorPath, op: ClipOperation) {
        let transform = self.state.transform;
        self.state.clip.record(op, path, transform);
        if !self.state.clip_enabled {
            return;
        }
        let Some(target) = self.active_target() else {
            return;
        };
        let mode = self.antialias_mode();
        self.clips.clip(
            &self.backend,
            target.device_context().get(),
            path,
            op,
            &transform,
            mode,
            self.config.translucent_target,
        );
    }

    pub fn clip_rect(&mut self, rect: Rect, op: ClipOperation) {
        self.clip_path(&VectorPath::rect(rect), op);
    }

    pub fn clip_region(&mut self, region: &Region, op: ClipOperation) {
        self.clip_path(&region.to_path(), op);
    }
}

// Software fallback.
impl<B: Backend> PaintEngine<B> {
    /// Runs `op` on the fallback painter, set up with the current state and
    /// clips. Unless composition is emulated, the result is drawn onto the
    /// target immediately.
    fn emulate(&mut self, target: &Rc<Bitmap<B>>, op: impl FnOnce(&mut SoftwarePainter)) {
        if self.fallback.is_none() {
            let (width, height) = target.size();
            let painter = if self.emulating_composition {
                let image = self.read_target(target);
                if image.is_null() {
                    SoftwarePainter::transparent(width, height)
                } else {
                    SoftwarePainter::from_image(&image)
                }
            } else {
                SoftwarePainter::transparent(width, height)
            };
            let Some(painter) = painter else {
                tracing::warn!(width, height, "fallback surface allocation failed");
                return;
            };
            vlog!(self, width, height, "fallback surface created");
            self.fallback = Some(painter);
        }
        let state = &self.state;
        let Some(painter) = self.fallback.as_mut() else {
            return;
        };
        painter.set_render_hints(state.hints);
        painter.set_composition_mode(state.composition);
        painter.set_opacity(state.opacity);
        painter.set_brush_origin(state.brush_origin);
        painter.set_brush(state.brush.clone());
        painter.set_pen(state.pen.clone());
        if state.clip_enabled {
            painter.replay_clips(&state.clip);
        } else {
            painter.clear_clip();
        }
        painter.set_transform(state.transform);
        op(painter);
        self.stats.emulated_ops += 1;

        if !self.emulating_composition {
            if let Some(painter) = self.fallback.take() {
                self.blit_fallback(target, &painter.image(), true);
            }
        }
    }

    /// Draws `image` over the whole target with clips and transform
    /// suspended. `restore` puts them back afterwards.
    fn blit_fallback(&mut self, target: &Bitmap<B>, image: &BgraImage, restore: bool) {
        let upload = match Bitmap::new(self.backend.clone()) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                tracing::warn!("fallback upload bitmap failed: {err}");
                return;
            }
        };
        if !upload.from_bgra(image) {
            return;
        }
        let Some(pixels) = upload.hardware() else {
            return;
        };
        let ctx = target.device_context().get();
        self.clips.clear(ctx);
        ctx.set_transform(Affine::IDENTITY);
        ctx.set_primitive_blend(if self.emulating_composition {
            PrimitiveBlend::Copy
        } else {
            PrimitiveBlend::SourceOver
        });
        ctx.draw_bitmap(
            &pixels,
            target.rect(),
            1.0,
            InterpolationMode::NearestNeighbor,
            None,
        );
        ctx.set_primitive_blend(self.primitive_blend());
        self.stats.fallback_flushes += 1;
        vlog!(self, flushes = self.stats.fallback_flushes, "fallback surface flushed");

        if restore {
            if self.state.clip_enabled {
                let mode = self.antialias_mode();
                self.clips.replay(
                    &self.backend,
                    ctx,
                    &self.state.clip,
                    mode,
                    self.config.translucent_target,
                );
            }
            ctx.set_transform(self.context_transform());
        }
    }

    /// Backend brush for `brush` with the brush origin and opacity applied.
    fn resolve_brush(&mut self, ctx: &B::DrawContext, brush: &Brush) -> ResolvedBrush<B> {
        let origin = self.state.brush_origin;
        let effective = if origin == Point::ZERO {
            brush.clone()
        } else {
            brush
                .clone()
                .with_transform(Affine::translate(origin.to_vec2()) * brush.transform)
        };
        let resolved = match &self.brush_cache {
            Some((cached, resolved)) if *cached == effective => resolved.clone(),
            _ => {
                let resolved = self.brushes.to_hardware_brush(ctx, &effective);
                self.brush_cache = Some((effective, resolved.clone()));
                resolved
            }
        };
        if let Some(hw) = &resolved.brush {
            ctx.set_brush_opacity(hw, self.state.opacity);
        }
        resolved
    }
}

// Paths.
impl<B: Backend> PaintEngine<B> {
    /// Fills with the current brush, then strokes with the current pen.
    pub fn draw_path(&mut self, path: &VectorPath) {
        let brush = self.state.brush.clone();
        if !brush.is_empty() {
            self.fill(path, &brush);
        }
        let pen = self.state.pen.clone();
        if !pen.is_empty() && !pen.brush.is_empty() {
            self.stroke(path, &pen);
        }
    }

    pub fn fill(&mut self, path: &VectorPath, brush: &Brush) {
        if brush.is_empty() || path.is_empty() {
            return;
        }
        let Some(target) = self.active_target() else {
            return;
        };
        if self.must_emulate() {
            self.emulate(&target, |p| p.fill(path, brush));
            return;
        }
        let ctx = target.device_context().get();
        let resolved = self.resolve_brush(ctx, brush);
        if resolved.needs_emulation {
            self.emulate(&target, |p| p.fill(path, brush));
            return;
        }
        let Some(hw) = resolved.brush else {
            return;
        };
        let aliased = self.aliased();
        let Some(geometry) = self.geometries.get_or_build(&*self.backend, path, aliased) else {
            return;
        };
        ctx.fill_geometry(&geometry, &hw);
        self.stats.hardware_fills += 1;
    }

    pub fn stroke(&mut self, path: &VectorPath, pen: &Pen) {
        if pen.is_empty() || path.is_empty() {
            return;
        }
        let Some(target) = self.active_target() else {
            return;
        };
        if self.must_emulate() {
            self.emulate(&target, |p| p.stroke(path, pen));
            return;
        }
        let ctx = target.device_context().get();
        let aliased = self.aliased();
        let mode = self.antialias_mode();
        let dash_tiles = self.config.dash_tile_optimization;
        if self.pens.update_pen(ctx, pen, mode, dash_tiles).needs_emulation() {
            self.emulate(&target, |p| p.stroke(path, pen));
            return;
        }
        let state = self.pens.state();
        let Some(brush) = state.brush.brush.as_ref() else {
            return;
        };
        ctx.set_brush_opacity(brush, self.state.opacity);
        if let Some(dash) = &state.dash_brush {
            ctx.set_brush_opacity(dash, self.state.opacity);
        }

        if dash_tiles && dash_tiles_apply(path, state, self.state.hints) {
            let dashed = stroke_polyline(&*self.backend, ctx, path, pen, state, aliased);
            self.stats.dash_segments += dashed.segments;
            self.stats.join_patches += dashed.join_patches;
            self.stats.hardware_strokes += 1;
            return;
        }

        // A pen whose stroke style could not be created draws nothing.
        let Some(style) = state.stroke_style.as_ref() else {
            return;
        };
        let Some(geometry) = self.geometries.get_or_build(&*self.backend, path, aliased) else {
            return;
        };
        ctx.draw_geometry(&geometry, brush, pen.width as f32, Some(style));
        self.stats.hardware_strokes += 1;
    }
}

// Shapes.
impl<B: Backend> PaintEngine<B> {
    pub fn fill_rect(&mut self, rect: Rect, brush: &Brush) {
        if brush.is_empty() {
            return;
        }
        let Some(target) = self.active_target() else {
            return;
        };
        let ctx = target.device_context().get();
        let resolved = if self.must_emulate() {
            None
        } else {
            Some(self.resolve_brush(ctx, brush))
        };
        let hw = match resolved {
            Some(ResolvedBrush {
                brush: Some(hw),
                needs_emulation: false,
            }) => hw,
            Some(ResolvedBrush {
                needs_emulation: false,
                ..
            }) => return,
            _ => {
                let path = VectorPath::rect(rect);
                self.emulate(&target, |p| p.fill(&path, brush));
                return;
            }
        };
        let rect = if self.aliased() {
            rect + ALIASING_OFFSET
        } else {
            rect
        };
        ctx.fill_rectangle(rect, &hw);
        self.stats.hardware_fills += 1;
    }

    /// Fills and outlines each rectangle with the current brush and pen.
    pub fn draw_rects(&mut self, rects: &[Rect]) {
        let brush = self.state.brush.clone();
        let pen = self.state.pen.clone();
        for rect in rects {
            if !brush.is_empty() {
                self.fill_rect(*rect, &brush);
            }
            if !pen.is_empty() && !pen.brush.is_empty() {
                self.stroke_rect(*rect, &pen);
            }
        }
    }

    fn stroke_rect(&mut self, rect: Rect, pen: &Pen) {
        let Some(target) = self.active_target() else {
            return;
        };
        if self.must_emulate() {
            self.stroke(&VectorPath::rect(rect), pen);
            return;
        }
        let ctx = target.device_context().get();
        let mode = self.antialias_mode();
        let dash_tiles = self.config.dash_tile_optimization;
        let state = self.pens.update_pen(ctx, pen, mode, dash_tiles);
        if state.needs_emulation() || state.dash_brush.is_some() {
            self.stroke(&VectorPath::rect(rect), pen);
            return;
        }
        let state = self.pens.state();
        let (Some(brush), Some(style)) = (state.brush.brush.as_ref(), state.stroke_style.as_ref())
        else {
            return;
        };
        ctx.set_brush_opacity(brush, self.state.opacity);
        let rect = if mode == AntialiasMode::Aliased {
            rect + ALIASING_OFFSET
        } else {
            rect
        };
        ctx.draw_rectangle(rect, brush, pen.width as f32, Some(style));
        self.stats.hardware_strokes += 1;
    }

    /// Ellipse inscribed in `rect`, filled and outlined with the current
    /// brush and pen.
    pub fn draw_ellipse(&mut self, rect: Rect) {
        let Some(target) = self.active_target() else {
            return;
        };
        let ctx = target.device_context().get();
        let center = if self.aliased() {
            rect.center() + ALIASING_OFFSET
        } else {
            rect.center()
        };
        let (rx, ry) = (rect.width().abs() / 2.0, rect.height().abs() / 2.0);

        let brush = self.state.brush.clone();
        if !brush.is_empty() {
            let resolved = if self.must_emulate() {
                ResolvedBrush {
                    brush: None,
                    needs_emulation: true,
                }
            } else {
                self.resolve_brush(ctx, &brush)
            };
            match resolved {
                ResolvedBrush { brush: Some(hw), .. } => {
                    ctx.fill_ellipse(center, rx, ry, &hw);
                    self.stats.hardware_fills += 1;
                }
                ResolvedBrush { needs_emulation: true, .. } => {
                    self.fill(&VectorPath::ellipse(rect), &brush)
                }
                // Unresolvable brush: the outline is still drawn.
                _ => vlog!(self, "ellipse fill skipped"),
            }
        }

        let pen = self.state.pen.clone();
        if pen.is_empty() || pen.brush.is_empty() {
            return;
        }
        if self.must_emulate() {
            self.stroke(&VectorPath::ellipse(rect), &pen);
            return;
        }
        let mode = self.antialias_mode();
        let dash_tiles = self.config.dash_tile_optimization;
        if self.pens.update_pen(ctx, &pen, mode, dash_tiles).needs_emulation() {
            self.stroke(&VectorPath::ellipse(rect), &pen);
            return;
        }
        let state = self.pens.state();
        let (Some(brush), Some(style)) = (state.brush.brush.clone(), state.stroke_style.clone())
        else {
            self.stroke(&VectorPath::ellipse(rect), &pen);
            return;
        };
        ctx.set_brush_opacity(&brush, self.state.opacity);
        ctx.draw_ellipse(center, rx, ry, &brush, pen.width as f32, Some(&style));
        self.stats.hardware_strokes += 1;
    }

    pub fn draw_polygon(&mut self, points: &[Point], mode: PolygonMode) {
        let fill_rule = match mode {
            PolygonMode::OddEven => Fill::EvenOdd,
            PolygonMode::Winding | PolygonMode::Polyline => Fill::NonZero,
        };
        if mode == PolygonMode::Polyline {
            let path = VectorPath::polygon(points, false, fill_rule);
            let pen = self.state.pen.clone();
            self.stroke(&path, &pen);
        } else {
            self.draw_path(&VectorPath::polygon(points, true, fill_rule));
        }
    }

    pub fn draw_lines(&mut self, lines: &[Line]) {
        let pen = self.state.pen.clone();
        for line in lines {
            let path = VectorPath::polygon(&[line.p0, line.p1], false, Fill::NonZero);
            self.stroke(&path, &pen);
        }
    }
}

// Images and text.
impl<B: Backend> PaintEngine<B> {
    /// Draws `src` of `source` scaled into `dest`. An empty `src` means the
    /// whole source.
    pub fn draw_pixmap(&mut self, dest: Rect, source: PixmapSource<'_, B>, src: Rect) {
        let bitmap = match source {
            PixmapSource::Mono(mask) => {
                let image = mask.to_bgra(self.state.pen.color());
                self.draw_image(dest, &image, src);
                return;
            }
            PixmapSource::Bitmap(bitmap) => bitmap,
        };
        let Some(target) = self.active_target() else {
            return;
        };
        let Some(pixels) = bitmap.hardware() else {
            return;
        };
        let onto_itself = bitmap.same_image(&target);

        if self.must_emulate() {
            let image = if onto_itself {
                self.current_target_pixels(&target)
            } else {
                bitmap.to_image(Rect::ZERO)
            };
            self.emulate(&target, |p| p.draw_image(dest, &image, src));
            return;
        }

        let ctx = target.device_context().get();
        let source_rect = (src.area() > 0.0).then_some(src);
        let (opacity, interpolation) = (self.state.opacity, self.interpolation_mode());
        if !onto_itself {
            ctx.draw_bitmap(&pixels, dest, opacity, interpolation, source_rect);
            return;
        }

        // The target cannot be bound as its own source: draw from a copy.
        let region = source_rect.unwrap_or(bitmap.rect());
        let copy = self.read_target(&target).sub_image(region);
        let intermediate = match Bitmap::new(self.backend.clone()) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                tracing::warn!("intermediate bitmap failed: {err}");
                return;
            }
        };
        if !intermediate.from_bgra(&copy) {
            return;
        }
        if let Some(pixels) = intermediate.hardware() {
            ctx.draw_bitmap(&pixels, dest, opacity, interpolation, None);
        }
    }

    /// Uploads `image` and draws it like a bitmap.
    pub fn draw_image(&mut self, dest: Rect, image: &BgraImage, src: Rect) {
        let Some(target) = self.active_target() else {
            return;
        };
        if self.must_emulate() {
            self.emulate(&target, |p| p.draw_image(dest, image, src));
            return;
        }
        let upload = match Bitmap::new(self.backend.clone()) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                tracing::warn!("image upload bitmap failed: {err}");
                return;
            }
        };
        if upload.from_bgra(image) {
            self.draw_pixmap(dest, PixmapSource::Bitmap(&upload), src);
        }
    }

    fn current_target_pixels(&mut self, target: &Bitmap<B>) -> BgraImage {
        match &self.fallback {
            Some(painter) => painter.image(),
            None => self.read_target(target),
        }
    }

    /// Draws a shaped run in the pen's brush, as one glyph run when the font
    /// resolves, else glyph by glyph from the outlines carried by `item`.
    pub fn draw_text_item(&mut self, item: &TextItem) {
        let pen = self.state.pen.clone();
        if pen.is_empty() || item.glyphs.is_empty() {
            return;
        }
        let Some(target) = self.active_target() else {
            return;
        };
        let ctx = target.device_context().get();
        let mut face = None;
        if !self.must_emulate() {
            let mode = self.antialias_mode();
            let dash_tiles = self.config.dash_tile_optimization;
            if !self.pens.update_pen(ctx, &pen, mode, dash_tiles).needs_emulation() {
                face = self.fonts.face_for(&self.backend, &self.config, &item.font);
            }
        }
        let brush = self.pens.state().brush.brush.clone();
        let (Some(face), Some(brush)) = (face, brush) else {
            self.draw_text_outlines(item, &pen);
            return;
        };
        ctx.set_text_antialias_mode(self.text_antialias_mode());
        ctx.set_brush_opacity(&brush, self.state.opacity);
        let run = GlyphRun {
            font_face: &face,
            em_size: item.em_size,
            indices: &item.glyphs,
            advances: &item.advances,
            offsets: &item.offsets,
            bidi_level: u32::from(item.rtl),
        };
        ctx.draw_glyph_run(item.origin, &run, &brush);
        self.stats.glyph_runs += 1;
    }

    fn draw_text_outlines(&mut self, item: &TextItem, pen: &Pen) {
        if item.outlines.iter().all(|outline| outline.is_empty()) {
            tracing::warn!(
                family = %item.font.family,
                "no font face and no glyph outlines, text dropped"
            );
            return;
        }
        vlog!(self, family = %item.font.family, "text drawn from outlines");
        self.stats.text_fallbacks += 1;
        let positions = item.glyph_positions();
        for (i, (pos, outline)) in positions.iter().zip(&item.outlines).enumerate() {
            let advance = item.advances.get(i).copied().unwrap_or(0.0) as f64;
            let x = if item.rtl { pos.x - advance } else { pos.x };
            let path = outline.translated(kurbo::Vec2::new(x, pos.y));
            self.fill(&path, &pen.brush);
        }
    }
}
