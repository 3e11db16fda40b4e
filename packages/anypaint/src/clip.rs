//! Hardware clip stack plus the logical history used to rebuild it.

use kurbo::{Affine, Rect};

use crate::backend::{AntialiasMode, Backend, DrawContext, LayerOptions, LayerParameters};
use crate::geometry::{BuilderOptions, build_geometry};
use crate::types::{ClipOperation, Transform, VectorPath};

/// What was pushed on the hardware, so it can be popped with the matching
/// call.
pub enum ClipEntry<G> {
    AxisAligned,
    Layer(G),
}

impl<G> ClipEntry<G> {
    pub fn is_axis_aligned(&self) -> bool {
        matches!(self, ClipEntry::AxisAligned)
    }
}

/// Pushes a layer masked by `geometry` with infinite bounds.
pub(crate) fn push_layer_clip<B: Backend>(
    ctx: &B::DrawContext,
    geometry: &B::Geometry,
    mode: AntialiasMode,
    translucent_target: bool,
) {
    ctx.push_layer(&LayerParameters {
        content_bounds: None,
        geometric_mask: geometry,
        mask_antialias: mode,
        mask_transform: Affine::IDENTITY,
        opacity: 1.0,
        options: if translucent_target {
            LayerOptions::None
        } else {
            LayerOptions::InitializeFromBackground
        },
    });
}

pub(crate) fn pop_entry<B: Backend>(ctx: &B::DrawContext, entry: &ClipEntry<B::Geometry>) {
    match entry {
        ClipEntry::AxisAligned => ctx.pop_axis_aligned_clip(),
        ClipEntry::Layer(_) => ctx.pop_layer(),
    }
}

pub struct ClipStack<B: Backend> {
    entries: Vec<ClipEntry<B::Geometry>>,
}

impl<B: Backend> Default for ClipStack<B> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<B: Backend> ClipStack<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ClipEntry<B::Geometry>] {
        &self.entries
    }

    /// Pushes `path` in the coordinate space of `transform`, which must be
    /// the context's current transform when affine.
    pub fn push(
        &mut self,
        backend: &B,
        ctx: &B::DrawContext,
        path: &VectorPath,
        transform: &Transform,
        mode: AntialiasMode,
        translucent_target: bool,
    ) {
        if !transform.is_affine() {
            let previous = ctx.transform();
            ctx.set_transform(Affine::IDENTITY);
            let mapped = path.transformed(transform);
            self.push(backend, ctx, &mapped, &Transform::IDENTITY, mode, translucent_target);
            ctx.set_transform(previous);
            return;
        }

        if path.is_empty() {
            ctx.push_axis_aligned_clip(Rect::ZERO, mode);
            self.entries.push(ClipEntry::AxisAligned);
            return;
        }

        if transform.is_scale_translate() {
            if let Some(rect) = path.as_axis_aligned_rect() {
                ctx.push_axis_aligned_clip(rect.abs(), mode);
                self.entries.push(ClipEntry::AxisAligned);
                return;
            }
        }

        let options = if mode == AntialiasMode::Aliased {
            BuilderOptions::aliased()
        } else {
            BuilderOptions::default()
        };
        match build_geometry(backend, path, options) {
            Some(geometry) => {
                push_layer_clip::<B>(ctx, &geometry, mode, translucent_target);
                self.entries.push(ClipEntry::Layer(geometry));
            }
            None => tracing::warn!("clip geometry could not be built, clip ignored"),
        }
    }

    pub fn clip(
        &mut self,
        backend: &B,
        ctx: &B::DrawContext,
        path: &VectorPath,
        op: ClipOperation,
        transform: &Transform,
        mode: AntialiasMode,
        translucent_target: bool,
    ) {
        match op {
            ClipOperation::NoClip => self.clear(ctx),
            ClipOperation::ReplaceClip => {
                self.clear(ctx);
                self.push(backend, ctx, path, transform, mode, translucent_target);
            }
            ClipOperation::IntersectClip => {
                self.push(backend, ctx, path, transform, mode, translucent_target)
            }
        }
    }

    /// Pops every entry in reverse push order.
    pub fn clear(&mut self, ctx: &B::DrawContext) {
        while let Some(entry) = self.entries.pop() {
            pop_entry::<B>(ctx, &entry);
        }
    }

    /// Replays `history` onto an empty stack, each record under its own
    /// transform. Leaves the context transform at identity.
    pub fn replay(
        &mut self,
        backend: &B,
        ctx: &B::DrawContext,
        history: &ClipHistory,
        mode: AntialiasMode,
        translucent_target: bool,
    ) {
        for record in history.records() {
            ctx.set_transform(record.transform.to_affine().unwrap_or(Affine::IDENTITY));
            self.clip(
                backend,
                ctx,
                &record.path,
                record.op,
                &record.transform,
                mode,
                translucent_target,
            );
        }
        ctx.set_transform(Affine::IDENTITY);
    }
}

#[derive(Debug, Clone)]
pub struct ClipRecord {
    pub op: ClipOperation,
    pub path: VectorPath,
    pub transform: Transform,
}

/// Logical sequence of clip operations of a paint session, independent of
/// what is currently pushed on the hardware.
#[derive(Debug, Clone, Default)]
pub struct ClipHistory {
    records: Vec<ClipRecord>,
}

impl ClipHistory {
    pub fn record(&mut self, op: ClipOperation, path: &VectorPath, transform: Transform) {
        match op {
            ClipOperation::NoClip => self.records.clear(),
            ClipOperation::ReplaceClip => {
                self.records.clear();
                self.records.push(ClipRecord {
                    op,
                    path: path.clone(),
                    transform,
                });
            }
            ClipOperation::IntersectClip => self.records.push(ClipRecord {
                op,
                path: path.clone(),
                transform,
            }),
        }
    }

    pub fn records(&self) -> &[ClipRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
