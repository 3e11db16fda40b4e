use std::rc::Rc;

use anypaint::kurbo::{Affine, Join, Point, Rect};
use anypaint::peniko::{Color, Extend};
use anypaint::soft::SoftBackend;
use anypaint::{
    BgraImage, Bitmap, Brush, ClipOperation, CompositionMode, EngineConfig, FontDefinition,
    Gradient, GradientKind, MonoImage, PaintEngine, PaintEngineSuspender, PatternStyle, Pen,
    PenStyle, PixmapSource, PolygonMode, Region, RenderHints, TextItem, Transform, VectorPath,
};
use rustc_hash::FxHashMap;

const RED: Color = Color::from_rgba8(255, 0, 0, 255);
const BLUE: Color = Color::from_rgba8(0, 0, 255, 255);
const WHITE: Color = Color::from_rgba8(255, 255, 255, 255);

const RED_PX: [u8; 4] = [0, 0, 255, 255];
const BLUE_PX: [u8; 4] = [255, 0, 0, 255];
const WHITE_PX: [u8; 4] = [255, 255, 255, 255];

struct Fixture {
    backend: Rc<SoftBackend>,
    target: Rc<Bitmap<SoftBackend>>,
    engine: PaintEngine<SoftBackend>,
}

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn fixture(width: u32, height: u32) -> Fixture {
    init_logging();
    let backend = Rc::new(SoftBackend::new());
    let target = Rc::new(Bitmap::with_size(backend.clone(), width, height).unwrap());
    let config = EngineConfig {
        verbose: true,
        ..EngineConfig::default()
    };
    let engine = PaintEngine::new(backend.clone(), config);
    Fixture {
        backend,
        target,
        engine,
    }
}

impl Fixture {
    fn begin(&mut self) {
        assert!(self.engine.begin(self.target.clone(), &Region::new()));
    }

    fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.target.to_image(Rect::ZERO).pixel(x, y).unwrap()
    }
}

#[test]
fn aliased_fill_rect_covers_exactly_the_rect() {
    let mut f = fixture(20, 20);
    f.begin();
    f.engine.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &Brush::solid(RED));
    assert!(f.engine.end());

    assert_eq!(f.pixel(5, 5), RED_PX);
    assert_eq!(f.pixel(9, 9), RED_PX);
    assert_ne!(f.pixel(10, 10), RED_PX);
    assert_eq!(f.engine.stats().hardware_fills, 1);
}

#[test]
fn replace_clip_limits_fill() {
    let mut f = fixture(12, 12);
    f.target.fill(WHITE);
    f.begin();
    f.engine.clip_rect(Rect::new(0.0, 0.0, 5.0, 5.0), ClipOperation::ReplaceClip);
    f.engine.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &Brush::solid(BLUE));
    assert!(f.engine.end());

    assert_eq!(f.pixel(0, 0), BLUE_PX);
    assert_eq!(f.pixel(4, 4), BLUE_PX);
    assert_eq!(f.pixel(5, 5), WHITE_PX);
    assert_eq!(f.pixel(8, 2), WHITE_PX);
}

#[test]
fn unsupported_composition_degrades_whole_session() {
    let mut f = fixture(16, 16);
    f.begin();
    f.engine.set_composition_mode(CompositionMode::Source);
    assert!(!f.engine.is_emulating_composition());
    f.engine.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), &Brush::solid(RED));
    assert_eq!(f.engine.stats().hardware_fills, 1);

    f.engine.set_composition_mode(CompositionMode::Xor);
    f.engine.set_composition_mode(CompositionMode::Source);
    assert!(f.engine.is_emulating_composition());
    f.engine.fill_rect(Rect::new(8.0, 8.0, 12.0, 12.0), &Brush::solid(RED));
    let stats = f.engine.stats();
    assert_eq!(stats.hardware_fills, 1);
    assert_eq!(stats.emulated_ops, 1);
    assert_eq!(stats.fallback_flushes, 0, "flushed only at end");

    assert!(f.engine.end());
    assert!(f.engine.stats().fallback_flushes >= 1);
    assert!(!f.engine.is_emulating_composition());
    assert_eq!(f.pixel(1, 1), RED_PX, "hardware drawing survives the flush");
    assert_eq!(f.pixel(10, 10), RED_PX);
}

#[test]
fn extended_gradient_is_emulated_and_flushed_immediately() {
    let mut f = fixture(16, 16);
    f.begin();
    let radial = Gradient::new(
        GradientKind::Radial {
            center: Point::new(8.0, 8.0),
            radius: 4.0,
            focal: Point::new(8.0, 8.0),
        },
        &[(0.0, RED), (1.0, BLUE)],
    );
    let path = VectorPath::rect(Rect::new(0.0, 0.0, 16.0, 16.0));

    f.engine.fill(&path, &Brush::gradient(radial.clone()));
    assert_eq!(f.engine.stats().hardware_fills, 1);

    f.engine.fill(&path, &Brush::gradient(radial.with_spread(Extend::Reflect)));
    let stats = f.engine.stats();
    assert_eq!(stats.emulated_ops, 1);
    assert_eq!(stats.fallback_flushes, 1);
    assert!(f.engine.end());
    assert_eq!(f.pixel(8, 8)[3], 255);
}

#[test]
fn conical_gradient_always_emulated() {
    let mut f = fixture(8, 8);
    f.begin();
    let conical = Gradient::new(
        GradientKind::Conical {
            center: Point::new(4.0, 4.0),
            angle: 0.0,
        },
        &[(0.0, RED), (1.0, BLUE)],
    );
    f.engine
        .fill(&VectorPath::rect(Rect::new(0.0, 0.0, 8.0, 8.0)), &Brush::gradient(conical));
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().emulated_ops, 1);
    assert_eq!(f.engine.stats().hardware_fills, 0);
}

#[test]
fn dashed_polygon_patches_every_join() {
    let mut f = fixture(32, 32);
    f.begin();
    f.engine.set_pen(Pen::new(RED, 1.0).with_style(PenStyle::Dash));
    let square = [
        Point::new(2.0, 2.0),
        Point::new(24.0, 2.0),
        Point::new(24.0, 24.0),
        Point::new(2.0, 24.0),
    ];
    f.engine.draw_polygon(&square, PolygonMode::Winding);
    assert!(f.engine.end());
    let stats = f.engine.stats();
    assert_eq!(stats.dash_segments, 4);
    assert_eq!(stats.join_patches, 4);
    assert_eq!(stats.hardware_strokes, 1);
}

#[test]
fn open_polyline_with_zero_miter_skips_joins() {
    let mut f = fixture(32, 32);
    f.begin();
    f.engine.set_pen(
        Pen::new(RED, 1.0)
            .with_style(PenStyle::Dash)
            .with_join(Join::Miter)
            .with_miter_limit(0.0),
    );
    let points = [Point::new(2.0, 2.0), Point::new(24.0, 2.0), Point::new(24.0, 24.0)];
    f.engine.draw_polygon(&points, PolygonMode::Polyline);
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().join_patches, 0);
    assert_eq!(f.engine.stats().dash_segments, 2);
}

#[test]
fn dash_tiles_can_be_disabled() {
    let backend = Rc::new(SoftBackend::new());
    let target = Rc::new(Bitmap::with_size(backend.clone(), 32, 32).unwrap());
    let config = EngineConfig {
        dash_tile_optimization: false,
        ..EngineConfig::default()
    };
    let mut engine = PaintEngine::new(backend, config);
    assert!(engine.begin(target, &Region::new()));
    engine.set_pen(Pen::new(RED, 1.0).with_style(PenStyle::Dash));
    engine.draw_lines(&[anypaint::kurbo::Line::new((0.0, 4.0), (30.0, 4.0))]);
    assert!(engine.end());
    assert_eq!(engine.stats().dash_segments, 0);
    assert_eq!(engine.stats().hardware_strokes, 1);
}

#[test]
fn suspender_brackets_readback() {
    let mut f = fixture(8, 8);
    f.begin();
    f.engine.fill_rect(Rect::new(0.0, 0.0, 8.0, 8.0), &Brush::solid(RED));
    {
        let suspender = PaintEngineSuspender::new(&mut f.engine);
        assert!(suspender.engine().is_active());
        let image = f.target.to_image(Rect::ZERO);
        assert_eq!(image.pixel(3, 3), Some(RED_PX));
    }
    f.engine.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), &Brush::solid(BLUE));
    assert!(f.engine.end());

    let ctx = f.target.device_context().get();
    assert_eq!(ctx.begin_calls(), 2);
    assert_eq!(ctx.end_calls(), 2);
    assert_eq!(f.target.device_context().ref_count(), 0);
    assert_eq!(f.pixel(0, 0), BLUE_PX);
}

#[test]
fn drawing_a_bitmap_onto_itself_goes_through_a_copy() {
    let mut f = fixture(20, 10);
    f.target.fill(WHITE);
    f.begin();
    f.engine.fill_rect(Rect::new(0.0, 0.0, 10.0, 10.0), &Brush::solid(RED));
    let target = f.target.clone();
    f.engine.draw_pixmap(
        Rect::new(10.0, 0.0, 20.0, 10.0),
        PixmapSource::Bitmap(&target),
        Rect::new(0.0, 0.0, 10.0, 10.0),
    );
    assert!(f.engine.end(), "no bitmap may be its own source");
    assert_eq!(f.pixel(15, 5), RED_PX);
}

#[test]
fn mono_pixmap_uses_pen_color() {
    let mut f = fixture(8, 8);
    f.begin();
    f.engine.set_pen(Pen::new(BLUE, 1.0));
    let mut mask = MonoImage::new(4, 4);
    mask.set(1, 1, true);
    f.engine
        .draw_pixmap(Rect::new(0.0, 0.0, 4.0, 4.0), PixmapSource::Mono(&mask), Rect::ZERO);
    assert!(f.engine.end());
    assert_eq!(f.pixel(1, 1), BLUE_PX);
    assert_eq!(f.pixel(2, 2)[3], 0);
}

fn square_glyph() -> FxHashMap<u16, VectorPath> {
    let mut glyphs = FxHashMap::default();
    glyphs.insert(1, VectorPath::rect(Rect::new(0.0, -1.0, 1.0, 0.0)));
    glyphs
}

fn text_item(family: &str) -> TextItem {
    TextItem {
        font: FontDefinition::new(family),
        em_size: 4.0,
        glyphs: vec![1],
        advances: vec![4.0],
        offsets: Vec::new(),
        origin: Point::new(2.0, 6.0),
        rtl: false,
        outlines: vec![VectorPath::rect(Rect::new(0.0, -4.0, 4.0, 0.0))],
    }
}

#[test]
fn text_uses_glyph_runs_when_the_font_resolves() {
    let mut f = fixture(10, 10);
    f.backend.register_font("Boxes", square_glyph());
    f.begin();
    f.engine.set_pen(Pen::new(RED, 1.0));
    f.engine.draw_text_item(&text_item("Boxes"));
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().glyph_runs, 1);
    assert_eq!(f.engine.stats().text_fallbacks, 0);
    assert_eq!(f.engine.cached_font_faces(), 1);
    assert_eq!(f.pixel(4, 4), RED_PX);
}

#[test]
fn unknown_fonts_fall_back_to_outlines() {
    let mut f = fixture(10, 10);
    f.begin();
    f.engine.set_pen(Pen::new(RED, 1.0));
    f.engine.draw_text_item(&text_item("Missing"));
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().glyph_runs, 0);
    assert_eq!(f.engine.stats().text_fallbacks, 1);
    assert_eq!(f.pixel(4, 4), RED_PX);
}

#[test]
fn perspective_transform_is_emulated() {
    let mut f = fixture(16, 16);
    f.begin();
    f.engine.set_transform(Transform {
        m13: 0.01,
        ..Transform::IDENTITY
    });
    f.engine.fill(&VectorPath::rect(Rect::new(0.0, 0.0, 8.0, 8.0)), &Brush::solid(RED));
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().emulated_ops, 1);
    assert_eq!(f.pixel(2, 2), RED_PX);
}

#[test]
fn clip_toggle_replays_history() {
    let mut f = fixture(16, 16);
    f.begin();
    f.engine.clip_rect(Rect::new(0.0, 0.0, 10.0, 10.0), ClipOperation::IntersectClip);
    f.engine.set_transform(Transform::from_affine(Affine::rotate(0.2)));
    f.engine.clip_rect(Rect::new(0.0, 0.0, 8.0, 8.0), ClipOperation::IntersectClip);
    assert_eq!(f.engine.clip_depth(), 2);
    f.engine.set_clip_enabled(false);
    assert_eq!(f.engine.clip_depth(), 0);
    f.engine.set_clip_enabled(true);
    assert_eq!(f.engine.clip_depth(), 2);
    assert!(f.engine.end());
}

#[test]
fn saved_state_restores_clip_and_brush() {
    let mut f = fixture(16, 16);
    f.begin();
    let saved = f.engine.state().clone();
    f.engine.set_brush(Brush::solid(RED));
    f.engine.clip_rect(Rect::new(0.0, 0.0, 4.0, 4.0), ClipOperation::ReplaceClip);
    assert_eq!(f.engine.clip_depth(), 1);
    f.engine.set_state(saved);
    assert_eq!(f.engine.clip_depth(), 0);
    assert!(f.engine.state().brush.is_empty());
    assert!(f.engine.end());
}

#[test]
fn multi_rect_system_clip_masks_drawing() {
    let mut f = fixture(12, 4);
    f.target.fill(WHITE);
    let region = Region::from_rects([Rect::new(0.0, 0.0, 4.0, 4.0), Rect::new(8.0, 0.0, 12.0, 4.0)]);
    assert!(f.engine.begin(f.target.clone(), &region));
    f.engine.fill_rect(Rect::new(0.0, 0.0, 12.0, 4.0), &Brush::solid(RED));
    assert!(f.engine.end());
    assert_eq!(f.pixel(1, 1), RED_PX);
    assert_eq!(f.pixel(6, 1), WHITE_PX);
    assert_eq!(f.pixel(10, 1), RED_PX);
}

#[test]
fn antialiasing_hint_selects_modes() {
    let mut f = fixture(4, 4);
    f.begin();
    let ctx = f.target.device_context().get();
    assert_eq!(ctx.antialias_mode(), anypaint::backend::AntialiasMode::Aliased);
    f.engine.set_render_hints(RenderHints::ANTIALIASING | RenderHints::SMOOTH_PIXMAP_TRANSFORM);
    assert_eq!(ctx.antialias_mode(), anypaint::backend::AntialiasMode::PerPrimitive);
    assert_eq!(ctx.text_antialias_mode(), anypaint::backend::TextAntialiasMode::Aliased);
    assert_eq!(f.engine.interpolation_mode(), anypaint::backend::InterpolationMode::Linear);
    assert!(f.engine.end());
}

#[test]
fn misuse_is_reported_not_fatal() {
    let mut f = fixture(4, 4);
    assert!(!f.engine.end());
    f.engine.fill_rect(Rect::new(0.0, 0.0, 2.0, 2.0), &Brush::solid(RED));
    let backend = f.backend.clone();
    let null_target = Rc::new(Bitmap::new(backend).unwrap());
    assert!(!f.engine.begin(null_target, &Region::new()));
    f.begin();
    assert!(!f.engine.begin(f.target.clone(), &Region::new()));
    assert!(f.engine.end());
}

#[test]
fn geometry_cache_is_purged_with_its_paths() {
    let mut f = fixture(8, 8);
    f.begin();
    let path = VectorPath::polygon(
        &[Point::new(0.0, 0.0), Point::new(6.0, 0.0), Point::new(0.0, 6.0)],
        true,
        anypaint::peniko::Fill::NonZero,
    );
    f.engine.fill(&path, &Brush::solid(RED));
    f.engine.fill(&path, &Brush::solid(BLUE));
    assert_eq!(f.engine.cached_geometries(), 1);
    drop(path);
    assert!(f.engine.end());
    assert_eq!(f.engine.cached_geometries(), 0);
}

#[test]
fn each_session_starts_from_default_state() {
    let mut f = fixture(16, 16);
    f.target.fill(WHITE);
    f.begin();
    f.engine.set_transform(Transform::translate(10.0, 10.0));
    f.engine.set_composition_mode(CompositionMode::Xor);
    f.engine.set_brush(Brush::solid(BLUE));
    f.engine.set_opacity(0.5);
    f.engine.set_render_hints(RenderHints::ANTIALIASING);
    assert!(f.engine.is_emulating_composition());
    assert!(f.engine.end());

    f.begin();
    assert!(!f.engine.is_emulating_composition());
    let state = f.engine.state();
    assert_eq!(state.transform, Transform::IDENTITY);
    assert_eq!(state.composition, CompositionMode::SourceOver);
    assert_eq!(state.opacity, 1.0);
    assert_eq!(state.hints, RenderHints::default());
    assert!(state.brush.is_empty());
    assert_eq!(
        f.target.device_context().get().antialias_mode(),
        anypaint::backend::AntialiasMode::Aliased
    );
    f.engine.fill_rect(Rect::new(0.0, 0.0, 4.0, 4.0), &Brush::solid(RED));
    assert!(f.engine.end());

    assert_eq!(f.engine.stats().emulated_ops, 0);
    assert_eq!(f.pixel(1, 1), RED_PX);
    assert_eq!(f.pixel(11, 11), WHITE_PX);
}

#[test]
fn ellipse_outline_survives_an_unusable_fill_brush() {
    let mut f = fixture(16, 16);
    f.begin();
    // A zero-sized texture cannot be uploaded, so the fill brush fails.
    f.engine.set_brush(Brush::texture(Rc::new(BgraImage::new(0, 0))));
    f.engine.set_pen(Pen::new(RED, 1.0));
    f.engine.draw_ellipse(Rect::new(2.0, 2.0, 14.0, 14.0));
    assert!(f.engine.end());

    let stats = f.engine.stats();
    assert_eq!(stats.hardware_fills, 0);
    assert_eq!(stats.hardware_strokes, 1);
    assert_eq!(f.pixel(8, 8)[3], 0, "no fill");
    assert!(
        (0..6).any(|x| f.pixel(x, 8) == RED_PX),
        "left edge of the outline is drawn"
    );
}

#[test]
fn pen_with_reflected_gradient_is_stroked_in_software() {
    let mut f = fixture(16, 16);
    f.begin();
    let gradient = Gradient::new(
        GradientKind::Linear {
            start: Point::new(0.0, 0.0),
            end: Point::new(4.0, 0.0),
        },
        &[(0.0, RED), (1.0, BLUE)],
    )
    .with_spread(Extend::Reflect);
    let mut pen = Pen::new(RED, 4.0);
    pen.brush = Brush::gradient(gradient);
    f.engine.set_pen(pen);
    f.engine.draw_lines(&[anypaint::kurbo::Line::new((0.0, 8.0), (16.0, 8.0))]);
    assert!(f.engine.end());

    let stats = f.engine.stats();
    assert_eq!(stats.emulated_ops, 1);
    assert_eq!(stats.hardware_strokes, 0);
    assert_eq!(stats.fallback_flushes, 1);

    // BGRA: index 0 is blue, 2 is red. Past the gradient end the colors
    // run backwards, so x = 7.5 is close to the start color again.
    let near_end = f.pixel(4, 8);
    let reflected = f.pixel(7, 8);
    assert_eq!(near_end[3], 255);
    assert_eq!(reflected[3], 255);
    assert!(near_end[0] > near_end[2]);
    assert!(reflected[2] > reflected[0]);
    assert_eq!(f.pixel(8, 2)[3], 0);
}

#[test]
fn pattern_brush_follows_brush_origin() {
    let mut f = fixture(16, 8);
    f.target.fill(WHITE);
    f.begin();
    let stripes = Brush::pattern(PatternStyle::Vertical, RED);
    f.engine.fill_rect(Rect::new(0.0, 0.0, 16.0, 4.0), &stripes);
    f.engine.set_brush_origin(Point::new(2.0, 0.0));
    f.engine.fill_rect(Rect::new(0.0, 4.0, 16.0, 8.0), &stripes);
    assert!(f.engine.end());

    // The vertical pattern sets column 4 of every 8.
    assert_eq!(f.pixel(4, 1), RED_PX);
    assert_eq!(f.pixel(12, 1), RED_PX);
    assert_eq!(f.pixel(3, 1), WHITE_PX);
    assert_eq!(f.pixel(6, 1), WHITE_PX);

    assert_eq!(f.pixel(6, 5), RED_PX);
    assert_eq!(f.pixel(14, 5), RED_PX);
    assert_eq!(f.pixel(4, 5), WHITE_PX);
}

#[test]
fn texture_brush_applies_origin_and_opacity() {
    let mut f = fixture(4, 4);
    let mut texture = BgraImage::new(2, 1);
    texture.set_pixel(0, 0, BLUE_PX);
    let brush = Brush::texture(Rc::new(texture));
    f.begin();
    f.engine.fill_rect(Rect::new(0.0, 0.0, 4.0, 2.0), &brush);
    f.engine.set_brush_origin(Point::new(1.0, 0.0));
    f.engine.set_opacity(0.5);
    f.engine.fill_rect(Rect::new(0.0, 2.0, 4.0, 4.0), &brush);
    assert!(f.engine.end());

    assert_eq!(f.pixel(0, 0), BLUE_PX);
    assert_eq!(f.pixel(1, 0)[3], 0);
    assert_eq!(f.pixel(2, 1), BLUE_PX);

    assert_eq!(f.pixel(0, 2)[3], 0);
    let half = f.pixel(1, 2);
    assert!((120..=135).contains(&half[3]), "alpha {}", half[3]);
    assert_eq!(half[0], half[3]);
    assert_eq!(half[2], 0);
}

fn triangle() -> VectorPath {
    VectorPath::polygon(
        &[Point::new(1.0, 1.0), Point::new(13.0, 3.0), Point::new(4.0, 14.0)],
        true,
        anypaint::peniko::Fill::NonZero,
    )
}

fn render_aliased(paths: &[&VectorPath]) -> (BgraImage, usize) {
    let mut f = fixture(16, 16);
    f.begin();
    for path in paths {
        f.engine.fill(path, &Brush::solid(RED));
    }
    let cached = f.engine.cached_geometries();
    assert!(f.engine.end());
    (f.target.to_image(Rect::ZERO), cached)
}

#[test]
fn aliased_geometry_is_the_same_every_build() {
    let path = triangle();
    let (once, cached) = render_aliased(&[&path]);
    assert_eq!(cached, 1);
    let (twice, cached) = render_aliased(&[&path, &path]);
    assert_eq!(cached, 1, "second fill reuses the geometry");
    let rebuilt = triangle();
    let (fresh, _) = render_aliased(&[&rebuilt]);

    assert_eq!(once, twice);
    assert_eq!(once, fresh);
    let red = (0..16)
        .flat_map(|y| (0..16).map(move |x| (x, y)))
        .filter(|&(x, y)| once.pixel(x, y) == Some(RED_PX))
        .count();
    assert!(red > 0);
}

#[test]
fn antialias_change_rebuilds_layer_clips() {
    let mut f = fixture(16, 16);
    f.begin();
    let corner = VectorPath::polygon(
        &[Point::new(0.0, 0.0), Point::new(16.0, 0.0), Point::new(0.0, 16.0)],
        true,
        anypaint::peniko::Fill::NonZero,
    );
    f.engine.clip_path(&corner, ClipOperation::ReplaceClip);
    f.engine.set_render_hints(RenderHints::ANTIALIASING);
    assert_eq!(f.engine.clip_depth(), 1);
    f.engine.fill_rect(Rect::new(0.0, 0.0, 16.0, 16.0), &Brush::solid(RED));
    assert!(f.engine.end());

    let image = f.target.to_image(Rect::ZERO);
    let blended = (0..16)
        .flat_map(|y| (0..16).map(move |x| (x, y)))
        .filter(|&(x, y)| image.pixel(x, y).is_some_and(|p| p[3] > 0 && p[3] < 255))
        .count();
    assert!(blended > 0, "the diagonal clip edge is antialiased");
    assert_eq!(image.pixel(2, 2), Some(RED_PX));
    assert_eq!(image.pixel(14, 14).map(|p| p[3]), Some(0));
}

#[test]
fn dashed_pen_keeps_working_after_hint_change() {
    let mut f = fixture(32, 8);
    f.begin();
    f.engine.set_pen(Pen::new(RED, 1.0).with_style(PenStyle::Dash));
    let line = [anypaint::kurbo::Line::new((0.0, 4.0), (30.0, 4.0))];
    f.engine.draw_lines(&line);
    f.engine.set_render_hints(RenderHints::ANTIALIASING);
    f.engine.draw_lines(&line);
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().dash_segments, 2);
    assert_eq!(f.engine.stats().hardware_strokes, 2);
}

#[test]
fn text_with_nothing_to_draw_is_not_counted_as_fallback() {
    let mut f = fixture(10, 10);
    f.begin();
    f.engine.set_pen(Pen::new(RED, 1.0));
    let item = TextItem {
        outlines: Vec::new(),
        ..text_item("Missing")
    };
    f.engine.draw_text_item(&item);
    assert!(f.engine.end());
    assert_eq!(f.engine.stats().text_fallbacks, 0);
    assert_eq!(f.engine.stats().glyph_runs, 0);
    assert_eq!(f.pixel(4, 4)[3], 0);
}
