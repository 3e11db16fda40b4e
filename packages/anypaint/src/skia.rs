//! Conversions between engine types and tiny-skia.

use kurbo::{Affine, Cap, Join, Point, Rect};
use peniko::{Color, Extend, Fill};
use tiny_skia::{FillRule, LineCap, LineJoin, PathBuilder, Pixmap, SpreadMode};

use crate::image::BgraImage;
use crate::types::{ElementKind, GradientStop, VectorPath};

pub(crate) fn transform(affine: Affine) -> tiny_skia::Transform {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    tiny_skia::Transform::from_row(a as f32, b as f32, c as f32, d as f32, e as f32, f as f32)
}

pub(crate) fn color(color: Color) -> tiny_skia::Color {
    let [r, g, b, a] = color.components;
    tiny_skia::Color::from_rgba(
        r.clamp(0.0, 1.0),
        g.clamp(0.0, 1.0),
        b.clamp(0.0, 1.0),
        a.clamp(0.0, 1.0),
    )
    .unwrap_or(tiny_skia::Color::BLACK)
}

pub(crate) fn fill_rule(fill: Fill) -> FillRule {
    match fill {
        Fill::NonZero => FillRule::Winding,
        Fill::EvenOdd => FillRule::EvenOdd,
    }
}

pub(crate) fn cap(cap: Cap) -> LineCap {
    match cap {
        Cap::Butt => LineCap::Butt,
        Cap::Square => LineCap::Square,
        Cap::Round => LineCap::Round,
    }
}

pub(crate) fn join(join: Join) -> LineJoin {
    match join {
        Join::Bevel => LineJoin::Bevel,
        Join::Miter => LineJoin::Miter,
        Join::Round => LineJoin::Round,
    }
}

pub(crate) fn spread(extend: Extend) -> SpreadMode {
    match extend {
        Extend::Pad => SpreadMode::Pad,
        Extend::Repeat => SpreadMode::Repeat,
        Extend::Reflect => SpreadMode::Reflect,
    }
}

pub(crate) fn stops(stops: &[GradientStop]) -> Vec<tiny_skia::GradientStop> {
    stops
        .iter()
        .map(|s| tiny_skia::GradientStop::new(s.offset, color(s.color)))
        .collect()
}

pub(crate) fn point(p: Point) -> tiny_skia::Point {
    tiny_skia::Point::from_xy(p.x as f32, p.y as f32)
}

pub(crate) fn rect_path(rect: Rect) -> Option<tiny_skia::Path> {
    let r = rect.abs();
    tiny_skia::Rect::from_ltrb(r.x0 as f32, r.y0 as f32, r.x1 as f32, r.y1 as f32)
        .map(PathBuilder::from_rect)
}

/// Builds a tiny-skia path. Implicitly closed paths get their last figure
/// closed.
pub(crate) fn path(path: &VectorPath) -> Option<tiny_skia::Path> {
    let points = path.points();
    let first = *points.first()?;
    let mut pb = PathBuilder::new();
    match path.elements() {
        None => {
            pb.move_to(first.x as f32, first.y as f32);
            for p in &points[1..] {
                pb.line_to(p.x as f32, p.y as f32);
            }
        }
        Some(elements) => {
            let mut i = 0;
            while i < elements.len() {
                let p = points[i];
                match elements[i] {
                    ElementKind::MoveTo => pb.move_to(p.x as f32, p.y as f32),
                    ElementKind::CurveTo if i + 2 < elements.len() => {
                        let (c2, end) = (points[i + 1], points[i + 2]);
                        pb.cubic_to(
                            p.x as f32,
                            p.y as f32,
                            c2.x as f32,
                            c2.y as f32,
                            end.x as f32,
                            end.y as f32,
                        );
                        i += 3;
                        continue;
                    }
                    _ => pb.line_to(p.x as f32, p.y as f32),
                }
                i += 1;
            }
        }
    }
    if path.has_implicit_close() {
        pb.close();
    }
    pb.finish()
}

/// tiny-skia stores premultiplied RGBA; the engine uses premultiplied BGRA.
pub(crate) fn pixmap_to_bgra(pixmap: &Pixmap) -> BgraImage {
    let mut image = BgraImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in image
        .data_mut()
        .chunks_exact_mut(4)
        .zip(pixmap.data().chunks_exact(4))
    {
        dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
    }
    image
}

pub(crate) fn bgra_to_pixmap(image: &BgraImage) -> Option<Pixmap> {
    let mut pixmap = Pixmap::new(image.width(), image.height())?;
    for (dst, src) in pixmap
        .data_mut()
        .chunks_exact_mut(4)
        .zip(image.data().chunks_exact(4))
    {
        dst.copy_from_slice(&[src[2], src[1], src[0], src[3]]);
    }
    Some(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_maps_like_tiny_skia() {
        let a = Affine::translate((3.0, 4.0)) * Affine::scale(2.0);
        let mut p = [tiny_skia::Point::from_xy(1.0, 1.0)];
        transform(a).map_points(&mut p);
        let k = a * Point::new(1.0, 1.0);
        assert_eq!((p[0].x as f64, p[0].y as f64), (k.x, k.y));
    }

    #[test]
    fn pixmap_swizzle_round_trips() {
        let mut image = BgraImage::new(1, 1);
        image.set_pixel(0, 0, [1, 2, 3, 4]);
        let pixmap = bgra_to_pixmap(&image).unwrap();
        assert_eq!(pixmap.data(), &[3, 2, 1, 4]);
        assert_eq!(pixmap_to_bgra(&pixmap), image);
    }
}
