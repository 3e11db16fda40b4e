//! Dashed polyline stroking with one line draw per segment.
//!
//! The dash pattern lives in a pre-rendered tile brush (see
//! [`PenFactory`](crate::pen::PenFactory)). Each segment rotates the tile
//! onto its direction and continues the pattern phase of the previous
//! segment. Corners are patched with a small triangle drawn with the plain
//! pen brush so that the dash gaps do not open up the joins.

use kurbo::{Affine, Join, Point, Rect, Vec2};
use peniko::Fill;

use crate::backend::{Backend, DrawContext};
use crate::geometry::{
    BuilderOptions, PathGeometryBuilder, POSITIVE_SLOPE_SHIFT, adjust_for_aliasing,
    is_positively_sloped,
};
use crate::pen::PenState;
use crate::types::{Pen, RenderHints, VectorPath};

/// Counters of one dashed stroke.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DashStrokeStats {
    pub segments: u64,
    pub join_patches: u64,
}

/// Whether `path` can be stroked with the dash tile of `state`.
pub fn dash_tiles_apply<B: Backend>(path: &VectorPath, state: &PenState<B>, hints: RenderHints) -> bool {
    state.dash_brush.is_some()
        && path.is_polyline()
        && !path.has_curves()
        && !hints.contains(RenderHints::HIGH_QUALITY_ANTIALIASING)
}

/// Join patching is only dropped for open paths whose miter join has no
/// miter length at all.
pub fn skip_join(pen: &Pen, is_polygon: bool) -> bool {
    !is_polygon && pen.join == Join::Miter && pen.miter_limit.abs() < 1e-12
}

/// Brush placement mapping the horizontal dash tile onto `p1 -> p2`, shifted
/// along the line by `dash_offset` and centered on the stroke.
pub fn tile_transform(p1: Point, p2: Point, pen_width: f64, dash_offset: f64) -> Affine {
    let half = pen_width / 2.0;
    let angle = (p2.y - p1.y).atan2(p2.x - p1.x);
    let (sin, cos) = angle.sin_cos();
    let origin = Vec2::new(
        p1.x + dash_offset * cos + sin * half,
        p1.y + dash_offset * sin - cos * half,
    );
    Affine::translate(origin) * Affine::rotate(angle)
}

/// Phase at which the next segment has to start so the pattern continues.
pub fn next_dash_offset(dash_length: f64, segment_length: f64, dash_offset: f64) -> f64 {
    dash_length - (segment_length - dash_offset).rem_euclid(dash_length)
}

fn point_at(p1: Point, p2: Point, t: f64) -> Point {
    p1.lerp(p2, t)
}

/// Line end points after the aliasing adjustments.
fn adjust_segment(p1: Point, p2: Point, aliased: bool) -> (Point, Point) {
    if !aliased {
        return (p1, p2);
    }
    let (mut a, mut b) = (p1, p2);
    if is_positively_sloped(a, b) {
        a.y -= POSITIVE_SLOPE_SHIFT;
        b.y -= POSITIVE_SLOPE_SHIFT;
    }
    (adjust_for_aliasing(a, true), adjust_for_aliasing(b, true))
}

/// Strokes the polyline `path` with `pen`. The caller checks
/// [`dash_tiles_apply`] first; without a dash brush every segment is drawn
/// with the plain brush.
pub fn stroke_polyline<B: Backend>(
    backend: &B,
    ctx: &B::DrawContext,
    path: &VectorPath,
    pen: &Pen,
    state: &PenState<B>,
    aliased: bool,
) -> DashStrokeStats {
    let mut stats = DashStrokeStats::default();
    let Some(plain) = state.brush.brush.as_ref() else {
        return stats;
    };
    let style = state.stroke_style.as_ref();
    let width = pen.width;
    let points = path.points();
    if points.len() < 2 {
        return stats;
    }
    let implicit_close = path.has_implicit_close() && points.first() != points.last();
    let is_polygon = path.has_implicit_close();
    let skip = skip_join(pen, is_polygon);

    let mut pairs: Vec<(Point, Point)> = points.windows(2).map(|w| (w[0], w[1])).collect();
    if implicit_close {
        pairs.push((points[points.len() - 1], points[0]));
    }
    let last = pairs.len() - 1;

    let mut dash_offset = 0.0;
    let mut joint_start = Point::ZERO;
    let mut first_segment: Option<(Point, Point, f64)> = None;

    for (i, &(from, to)) in pairs.iter().enumerate() {
        if from == to && width <= 1.0 {
            let side = width.max(1.0);
            let origin = adjust_for_aliasing(from, aliased);
            ctx.fill_rectangle(Rect::from_origin_size(origin, (side, side)), plain);
            continue;
        }

        let (p1, p2) = adjust_segment(from, to, aliased);
        let length = (p2 - p1).hypot();

        let brush = match state.dash_brush.as_ref() {
            Some(dash) if state.dash_length > 0.0 => {
                ctx.set_brush_transform(dash, tile_transform(p1, p2, width, dash_offset));
                dash_offset = next_dash_offset(state.dash_length, length, dash_offset);
                stats.segments += 1;
                dash
            }
            _ => plain,
        };
        ctx.draw_line(p1, p2, brush, width as f32, style);

        if skip {
            continue;
        }

        let patch = if state.dash_brush.is_some() && length > 0.0 {
            ((state.dash_length - dash_offset) / length).clamp(0.0, 1.0)
        } else {
            width
        };
        if first_segment.is_none() {
            first_segment = Some((p1, p2, patch));
        }

        if i > 0 {
            draw_join_patch(backend, ctx, [joint_start, p1, point_at(p1, p2, patch)], pen, state);
            stats.join_patches += 1;
        }
        joint_start = point_at(p1, p2, 1.0 - patch);

        if implicit_close && i == last {
            if let Some((f1, f2, first_patch)) = first_segment {
                draw_join_patch(backend, ctx, [joint_start, f1, point_at(f1, f2, first_patch)], pen, state);
                stats.join_patches += 1;
            }
        }
    }
    stats
}

fn draw_join_patch<B: Backend>(
    backend: &B,
    ctx: &B::DrawContext,
    triangle: [Point; 3],
    pen: &Pen,
    state: &PenState<B>,
) {
    let Some(brush) = state.brush.brush.as_ref() else {
        return;
    };
    let mut builder = PathGeometryBuilder::new(BuilderOptions::default());
    if !builder.begin_with(backend, Fill::NonZero) {
        return;
    }
    builder.move_to(triangle[0]);
    builder.line_to(triangle[1]);
    builder.line_to(triangle[2]);
    builder.line_to(triangle[0]);
    let Some(geometry) = builder.close() else {
        return;
    };
    ctx.fill_geometry(&geometry, brush);
    ctx.draw_geometry(&geometry, brush, pen.width as f32, state.stroke_style.as_ref());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AntialiasMode;
    use crate::bitmap::Bitmap;
    use crate::device_context::DeviceContextGuard;
    use crate::pen::PenFactory;
    use crate::soft::SoftBackend;
    use crate::types::PenStyle;
    use peniko::Color;
    use std::rc::Rc;

    const BLACK: Color = Color::from_rgba8(0, 0, 0, 255);

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn dash_offset_carries_over_segments() {
        assert_eq!(next_dash_offset(6.0, 10.0, 0.0), 2.0);
        assert_eq!(next_dash_offset(6.0, 12.0, 0.0), 6.0);
        assert_eq!(next_dash_offset(6.0, 4.0, 2.0), 4.0);
    }

    #[test]
    fn tile_transform_follows_segment_direction() {
        let t = tile_transform(pt(0.0, 0.0), pt(10.0, 0.0), 2.0, 0.0);
        assert_eq!(t * pt(0.0, 0.0), pt(0.0, -1.0));
        let t = tile_transform(pt(0.0, 0.0), pt(0.0, 10.0), 2.0, 3.0);
        let p = t * pt(1.0, 0.0);
        assert!((p.x - 1.0).abs() < 1e-9 && (p.y - 4.0).abs() < 1e-9);
    }

    #[test]
    fn join_skip_needs_open_path_and_zero_miter() {
        let pen = Pen::new(BLACK, 1.0).with_join(Join::Miter).with_miter_limit(0.0);
        assert!(skip_join(&pen, false));
        assert!(!skip_join(&pen, true));
        assert!(!skip_join(&pen.clone().with_miter_limit(2.0), false));
        assert!(!skip_join(&pen.with_join(Join::Round), false));
    }

    fn stroke(path: &VectorPath, pen: &Pen) -> DashStrokeStats {
        let backend = Rc::new(SoftBackend::new());
        let target = Bitmap::with_size(backend.clone(), 32, 32).unwrap();
        let mut pens = PenFactory::new(backend.clone());
        let dc = target.device_context();
        let guard = DeviceContextGuard::new(dc);
        let state = pens.update_pen(dc.get(), pen, AntialiasMode::Aliased, true);
        assert!(dash_tiles_apply(path, state, RenderHints::default()));
        let stats = stroke_polyline(&*backend, dc.get(), path, pen, state, true);
        assert!(guard.finish());
        stats
    }

    #[test]
    fn closed_polygon_patches_every_vertex() {
        let square = VectorPath::polygon(
            &[pt(2.0, 2.0), pt(20.0, 2.0), pt(20.0, 20.0), pt(2.0, 20.0)],
            true,
            Fill::NonZero,
        );
        let pen = Pen::new(BLACK, 1.0).with_style(PenStyle::Dash);
        let stats = stroke(&square, &pen);
        assert_eq!(stats.segments, 4);
        assert_eq!(stats.join_patches, 4);
    }

    #[test]
    fn open_polyline_with_zero_miter_skips_patches() {
        let line = VectorPath::polygon(
            &[pt(2.0, 2.0), pt(20.0, 2.0), pt(20.0, 20.0)],
            false,
            Fill::NonZero,
        );
        let pen = Pen::new(BLACK, 1.0)
            .with_style(PenStyle::Dash)
            .with_join(Join::Miter)
            .with_miter_limit(0.0);
        let stats = stroke(&line, &pen);
        assert_eq!(stats.segments, 2);
        assert_eq!(stats.join_patches, 0);

        let bevel = pen.with_join(Join::Bevel);
        assert_eq!(stroke(&line, &bevel).join_patches, 1);
    }

    #[test]
    fn curves_do_not_use_dash_tiles() {
        let backend = Rc::new(SoftBackend::new());
        let target = Bitmap::with_size(backend.clone(), 8, 8).unwrap();
        let mut pens = PenFactory::new(backend);
        let pen = Pen::new(BLACK, 1.0).with_style(PenStyle::Dash);
        let state = pens.update_pen(target.device_context().get(), &pen, AntialiasMode::Aliased, true);
        let ellipse = VectorPath::ellipse(Rect::new(0.0, 0.0, 8.0, 8.0));
        assert!(!dash_tiles_apply(&ellipse, state, RenderHints::default()));
        let hq = RenderHints::HIGH_QUALITY_ANTIALIASING;
        let line = VectorPath::polygon(&[pt(0.0, 0.0), pt(4.0, 0.0)], false, Fill::NonZero);
        assert!(!dash_tiles_apply(&line, state, hq));
    }
}
