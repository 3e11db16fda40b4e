//! Conversion of [`VectorPath`]s into backend path geometries, with the
//! pixel-snapping adjustments used for aliased rendering.

use std::rc::Weak;

use kurbo::{Point, Vec2};
use peniko::Fill;
use rustc_hash::FxHashMap;

use crate::backend::{Backend, GeometrySink};
use crate::types::{ElementKind, PathId, VectorPath};

/// Offset that moves integer coordinates onto pixel centers so one pixel
/// wide aliased strokes cover exactly one row or column.
pub const ALIASING_OFFSET: Vec2 = Vec2::new(0.5, 0.5);

/// Vertical shift of the duplicated stroke emitted for positively sloped
/// lines.
pub const POSITIVE_SLOPE_SHIFT: f64 = 1.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderOptions {
    /// Offset every emitted coordinate by [`ALIASING_OFFSET`].
    pub aliasing_offset: bool,
    /// Replace positively sloped lines by a copy shifted up one pixel.
    pub adjust_positive_slope: bool,
}

impl BuilderOptions {
    pub fn aliased() -> Self {
        Self {
            aliasing_offset: true,
            adjust_positive_slope: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    NotStarted,
    Open,
    Closed,
}

/// Screen-space positive slope (y grows downwards).
pub fn is_positively_sloped(p1: Point, p2: Point) -> bool {
    (p2.x > p1.x && p2.y < p1.y) || (p1.x > p2.x && p1.y < p2.y)
}

/// Applies the aliasing offset when enabled.
pub fn adjust_for_aliasing(p: Point, aliased: bool) -> Point {
    if aliased { p + ALIASING_OFFSET } else { p }
}

pub struct PathGeometryBuilder<S: GeometrySink> {
    sink: Option<S>,
    state: BuilderState,
    options: BuilderOptions,
    in_figure: bool,
    previous: Point,
}

impl<S: GeometrySink> PathGeometryBuilder<S> {
    pub fn new(options: BuilderOptions) -> Self {
        Self {
            sink: None,
            state: BuilderState::NotStarted,
            options,
            in_figure: false,
            previous: Point::ZERO,
        }
    }

    pub fn state(&self) -> BuilderState {
        self.state
    }

    pub fn in_figure(&self) -> bool {
        self.in_figure
    }

    /// Starts building into `sink`. Only valid once.
    pub fn begin(&mut self, sink: S) -> bool {
        if self.state != BuilderState::NotStarted {
            return false;
        }
        self.sink = Some(sink);
        self.state = BuilderState::Open;
        true
    }

    /// Allocates a sink from `backend`; logs and returns false on failure.
    pub fn begin_with<B>(&mut self, backend: &B, fill_rule: Fill) -> bool
    where
        B: Backend<GeometrySink = S>,
    {
        match backend.create_path_geometry(fill_rule) {
            Ok(sink) => self.begin(sink),
            Err(err) => {
                tracing::warn!("CreatePathGeometry failed: {err}");
                false
            }
        }
    }

    fn adjusted(&self, p: Point) -> Point {
        adjust_for_aliasing(p, self.options.aliasing_offset)
    }

    pub fn move_to(&mut self, p: Point) {
        let start = self.adjusted(p);
        let in_figure = self.in_figure;
        let Some(sink) = self.sink.as_mut() else {
            return;
        };
        if in_figure {
            sink.end_figure(false);
        }
        sink.begin_figure(start, true);
        self.in_figure = true;
        self.previous = p;
    }

    pub fn line_to(&mut self, p: Point) {
        if self.options.adjust_positive_slope && is_positively_sloped(self.previous, p) {
            let shift = Vec2::new(0.0, POSITIVE_SLOPE_SHIFT);
            let from = self.adjusted(self.previous - shift);
            let to = self.adjusted(p - shift);
            let in_figure = self.in_figure;
            if let Some(sink) = self.sink.as_mut() {
                if in_figure {
                    sink.end_figure(false);
                }
                sink.begin_figure(from, true);
                sink.add_line(to);
                sink.end_figure(false);
                self.in_figure = false;
            }
            self.move_to(p);
            return;
        }
        let to = self.adjusted(p);
        if let Some(sink) = self.sink.as_mut() {
            sink.add_line(to);
        }
        self.previous = p;
    }

    pub fn curve_to(&mut self, c1: Point, c2: Point, end: Point) {
        let (a, b, c) = (self.adjusted(c1), self.adjusted(c2), self.adjusted(end));
        if let Some(sink) = self.sink.as_mut() {
            sink.add_bezier(a, b, c);
        }
        self.previous = end;
    }

    /// Ends any open figure without closing it and finalizes the geometry.
    pub fn close(&mut self) -> Option<S::Geometry> {
        if self.state != BuilderState::Open {
            return None;
        }
        self.state = BuilderState::Closed;
        let mut sink = self.sink.take()?;
        if self.in_figure {
            sink.end_figure(false);
            self.in_figure = false;
        }
        match sink.close() {
            Ok(geometry) => Some(geometry),
            Err(err) => {
                tracing::warn!("geometry sink close failed: {err}");
                None
            }
        }
    }

    /// Walks `path` into the builder. Curve records consume three points;
    /// untagged paths are one figure of lines. A path flagged as implicitly
    /// closed that ends inside a figure gets a final line to its first point.
    pub fn append_path(&mut self, path: &VectorPath) {
        let points = path.points();
        let Some(first) = points.first().copied() else {
            return;
        };
        match path.elements() {
            None => {
                self.move_to(first);
                for p in &points[1..] {
                    self.line_to(*p);
                }
            }
            Some(elements) => {
                let mut i = 0;
                while i < elements.len() {
                    match elements[i] {
                        ElementKind::MoveTo => self.move_to(points[i]),
                        ElementKind::CurveTo if i + 2 < elements.len() => {
                            self.curve_to(points[i], points[i + 1], points[i + 2]);
                            i += 3;
                            continue;
                        }
                        _ => self.line_to(points[i]),
                    }
                    i += 1;
                }
            }
        }
        if path.has_implicit_close() && self.in_figure {
            self.line_to(first);
        }
    }
}

/// Builds a complete geometry for `path`. Returns `None` (after logging) if
/// the backend fails.
pub fn build_geometry<B: Backend>(
    backend: &B,
    path: &VectorPath,
    options: BuilderOptions,
) -> Option<B::Geometry> {
    let mut builder = PathGeometryBuilder::new(options);
    if !builder.begin_with(backend, path.fill_rule()) {
        return None;
    }
    builder.append_path(path);
    builder.close()
}

struct CacheEntry<G> {
    liveness: Weak<()>,
    aliased: Option<G>,
    antialiased: Option<G>,
}

/// Geometries keyed by source path identity, one slot per aliasing mode.
/// Entries live as long as their source path.
pub struct GeometryCache<G> {
    entries: FxHashMap<PathId, CacheEntry<G>>,
}

impl<G> Default for GeometryCache<G> {
    fn default() -> Self {
        Self {
            entries: FxHashMap::default(),
        }
    }
}

impl<G: Clone> GeometryCache<G> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &VectorPath, aliased: bool) -> Option<G> {
        let entry = self.entries.get(&path.id())?;
        if !Weak::ptr_eq(&entry.liveness, &path.liveness()) {
            return None;
        }
        if aliased {
            entry.aliased.clone()
        } else {
            entry.antialiased.clone()
        }
    }

    pub fn insert(&mut self, path: &VectorPath, aliased: bool, geometry: G) {
        let entry = self.entries.entry(path.id()).or_insert_with(|| CacheEntry {
            liveness: path.liveness(),
            aliased: None,
            antialiased: None,
        });
        if aliased {
            entry.aliased = Some(geometry);
        } else {
            entry.antialiased = Some(geometry);
        }
    }

    /// Fetches or builds the geometry for `path` in the given aliasing mode.
    pub fn get_or_build<B>(&mut self, backend: &B, path: &VectorPath, aliased: bool) -> Option<G>
    where
        B: Backend<Geometry = G>,
    {
        if let Some(geometry) = self.get(path, aliased) {
            return Some(geometry);
        }
        let options = if aliased {
            BuilderOptions::aliased()
        } else {
            BuilderOptions::default()
        };
        let geometry = build_geometry(backend, path, options)?;
        self.insert(path, aliased, geometry.clone());
        Some(geometry)
    }

    /// Drops entries whose source path no longer exists.
    pub fn purge(&mut self) {
        self.entries.retain(|_, e| e.liveness.strong_count() > 0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::BackendError;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum Op {
        Begin(Point),
        Line(Point),
        Bezier(Point, Point, Point),
        End(bool),
    }

    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub ops: Vec<Op>,
    }

    impl GeometrySink for RecordingSink {
        type Geometry = Vec<Op>;

        fn begin_figure(&mut self, start: Point, _filled: bool) {
            self.ops.push(Op::Begin(start));
        }

        fn add_line(&mut self, to: Point) {
            self.ops.push(Op::Line(to));
        }

        fn add_bezier(&mut self, c1: Point, c2: Point, end: Point) {
            self.ops.push(Op::Bezier(c1, c2, end));
        }

        fn end_figure(&mut self, closed: bool) {
            self.ops.push(Op::End(closed));
        }

        fn close(self) -> Result<Vec<Op>, BackendError> {
            Ok(self.ops)
        }
    }

    fn record(path: &VectorPath, options: BuilderOptions) -> Vec<Op> {
        let mut builder = PathGeometryBuilder::new(options);
        assert!(builder.begin(RecordingSink::default()));
        builder.append_path(path);
        builder.close().unwrap()
    }

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn positive_slope_line_is_shifted_duplicate() {
        let path = VectorPath::polygon(&[pt(0.0, 10.0), pt(10.0, 0.0)], false, Fill::NonZero);
        let options = BuilderOptions {
            aliasing_offset: false,
            adjust_positive_slope: true,
        };
        assert_eq!(
            record(&path, options),
            vec![
                Op::Begin(pt(0.0, 10.0)),
                Op::End(false),
                Op::Begin(pt(0.0, 9.0)),
                Op::Line(pt(10.0, -1.0)),
                Op::End(false),
                Op::Begin(pt(10.0, 0.0)),
                Op::End(false),
            ]
        );
    }

    #[test]
    fn non_positive_slope_is_drawn_directly() {
        let path = VectorPath::polygon(&[pt(0.0, 0.0), pt(10.0, 10.0)], false, Fill::NonZero);
        assert_eq!(
            record(&path, BuilderOptions::aliased()),
            vec![
                Op::Begin(pt(0.5, 0.5)),
                Op::Line(pt(10.5, 10.5)),
                Op::End(false),
            ]
        );
    }

    #[test]
    fn implicit_close_adds_line_to_first_point() {
        let path = VectorPath::polygon(
            &[pt(0.0, 0.0), pt(4.0, 0.0), pt(4.0, 4.0)],
            true,
            Fill::NonZero,
        );
        let ops = record(&path, BuilderOptions::default());
        assert_eq!(ops[ops.len() - 2], Op::Line(pt(0.0, 0.0)));
        assert_eq!(ops.last(), Some(&Op::End(false)));
    }

    #[test]
    fn curves_consume_three_points() {
        let mut b = VectorPath::builder();
        b.move_to(pt(0.0, 0.0))
            .curve_to(pt(1.0, 0.0), pt(2.0, 1.0), pt(2.0, 2.0))
            .line_to(pt(0.0, 2.0));
        let ops = record(&b.finish(Fill::NonZero), BuilderOptions::default());
        assert_eq!(
            ops,
            vec![
                Op::Begin(pt(0.0, 0.0)),
                Op::Bezier(pt(1.0, 0.0), pt(2.0, 1.0), pt(2.0, 2.0)),
                Op::Line(pt(0.0, 2.0)),
                Op::End(false),
            ]
        );
    }

    #[test]
    fn move_to_ends_previous_figure() {
        let mut b = VectorPath::builder();
        b.move_to(pt(0.0, 0.0)).line_to(pt(1.0, 1.0)).move_to(pt(5.0, 5.0));
        let ops = record(&b.finish(Fill::NonZero), BuilderOptions::default());
        assert_eq!(ops[2], Op::End(false));
        assert_eq!(ops[3], Op::Begin(pt(5.0, 5.0)));
    }

    #[test]
    fn builder_state_machine() {
        let mut builder = PathGeometryBuilder::<RecordingSink>::new(BuilderOptions::default());
        assert_eq!(builder.state(), BuilderState::NotStarted);
        assert!(builder.close().is_none());
        assert!(builder.begin(RecordingSink::default()));
        assert!(!builder.begin(RecordingSink::default()));
        assert_eq!(builder.state(), BuilderState::Open);
        assert!(builder.close().is_some());
        assert_eq!(builder.state(), BuilderState::Closed);
        assert!(builder.close().is_none());
    }

    #[test]
    fn aliasing_offset_is_applied_once_per_build() {
        let points = [pt(1.0, 1.0), pt(13.0, 3.0), pt(4.0, 14.0)];
        let path = VectorPath::polygon(&points, true, Fill::NonZero);
        let first = record(&path, BuilderOptions::aliased());
        assert_eq!(first.first(), Some(&Op::Begin(pt(1.5, 1.5))));
        assert_eq!(record(&path, BuilderOptions::aliased()), first);
        let same_points = VectorPath::polygon(&points, true, Fill::NonZero);
        assert_eq!(record(&same_points, BuilderOptions::aliased()), first);
    }

    #[test]
    fn cache_slots_are_separate_and_purged_with_path() {
        let mut cache = GeometryCache::new();
        let path = VectorPath::rect(kurbo::Rect::new(0.0, 0.0, 2.0, 2.0));
        cache.insert(&path, true, 1u32);
        assert_eq!(cache.get(&path, true), Some(1));
        assert_eq!(cache.get(&path, false), None);
        cache.insert(&path, false, 2u32);
        assert_eq!(cache.get(&path.clone(), false), Some(2));
        cache.purge();
        assert_eq!(cache.len(), 1);
        drop(path);
        cache.purge();
        assert!(cache.is_empty());
    }
}
