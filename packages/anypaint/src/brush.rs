//! Maps abstract brushes onto backend brushes, or flags them for software
//! emulation when the backend has no matching primitive.

use std::rc::Rc;

use kurbo::Affine;
use peniko::Extend;

use crate::backend::{Backend, BitmapBrushProperties, DrawContext};
use crate::error::BackendError;
use crate::image::{BgraImage, premultiplied_bgra};
use crate::types::{Brush, BrushStyle, Gradient, GradientKind, PatternStyle};

/// Result of resolving a brush. `brush` is `None` when emulation is needed
/// or creation failed.
pub struct ResolvedBrush<B: Backend> {
    pub brush: Option<B::Brush>,
    pub needs_emulation: bool,
}

impl<B: Backend> Clone for ResolvedBrush<B> {
    fn clone(&self) -> Self {
        Self {
            brush: self.brush.clone(),
            needs_emulation: self.needs_emulation,
        }
    }
}

impl<B: Backend> Default for ResolvedBrush<B> {
    fn default() -> Self {
        Self {
            brush: None,
            needs_emulation: false,
        }
    }
}

impl<B: Backend> ResolvedBrush<B> {
    fn emulated() -> Self {
        Self {
            brush: None,
            needs_emulation: true,
        }
    }

    fn from_result(result: Result<B::Brush, BackendError>, call: &str) -> Self {
        match result {
            Ok(brush) => Self {
                brush: Some(brush),
                needs_emulation: false,
            },
            Err(err) => {
                tracing::warn!("{call} failed: {err}");
                Self::default()
            }
        }
    }
}

/// True if the backend cannot draw `gradient` natively.
pub fn gradient_needs_emulation(gradient: &Gradient) -> bool {
    match gradient.kind {
        GradientKind::Conical { .. } => true,
        GradientKind::Linear { .. } | GradientKind::Radial { .. } => gradient.spread != Extend::Pad,
    }
}

/// Expands an 8x8 pattern into BGRA: brush color where set, transparent
/// elsewhere.
pub fn pattern_image(pattern: PatternStyle, color: peniko::Color) -> BgraImage {
    let fg = premultiplied_bgra(color);
    let mut image = BgraImage::new(8, 8);
    for y in 0..8 {
        for x in 0..8 {
            if pattern.is_set(x, y) {
                image.set_pixel(x, y, fg);
            }
        }
    }
    image
}

pub struct BrushFactory<B: Backend> {
    backend: Rc<B>,
}

impl<B: Backend> BrushFactory<B> {
    pub fn new(backend: Rc<B>) -> Self {
        Self { backend }
    }

    pub fn to_hardware_brush(&self, dc: &B::DrawContext, brush: &Brush) -> ResolvedBrush<B> {
        let resolved = match &brush.style {
            BrushStyle::NoBrush => return ResolvedBrush::default(),
            BrushStyle::Solid(color) => {
                ResolvedBrush::from_result(dc.create_solid_brush(*color), "CreateSolidColorBrush")
            }
            BrushStyle::Pattern { pattern, color } => {
                self.tiled_brush(dc, &pattern_image(*pattern, *color))
            }
            BrushStyle::Gradient(gradient) => {
                if gradient_needs_emulation(gradient) {
                    return ResolvedBrush::emulated();
                }
                match gradient.kind {
                    GradientKind::Linear { start, end } => ResolvedBrush::from_result(
                        dc.create_linear_gradient_brush(start, end, &gradient.stops),
                        "CreateLinearGradientBrush",
                    ),
                    GradientKind::Radial {
                        center,
                        radius,
                        focal,
                    } => ResolvedBrush::from_result(
                        dc.create_radial_gradient_brush(
                            center,
                            focal - center,
                            radius,
                            radius,
                            &gradient.stops,
                        ),
                        "CreateRadialGradientBrush",
                    ),
                    GradientKind::Conical { .. } => ResolvedBrush::emulated(),
                }
            }
            BrushStyle::Texture(image) => self.tiled_brush(dc, image),
        };
        if let Some(hw) = &resolved.brush {
            if brush.transform != Affine::IDENTITY {
                dc.set_brush_transform(hw, brush.transform);
            }
        }
        resolved
    }

    fn tiled_brush(&self, dc: &B::DrawContext, image: &BgraImage) -> ResolvedBrush<B> {
        let bitmap = match self.backend.create_bitmap(
            image.width(),
            image.height(),
            Some(image.data()),
            image.pitch() as u32,
        ) {
            Ok(bitmap) => bitmap,
            Err(err) => {
                tracing::warn!("CreateBitmap for brush failed: {err}");
                return ResolvedBrush::default();
            }
        };
        ResolvedBrush::from_result(
            dc.create_bitmap_brush(&bitmap, &BitmapBrushProperties::TILED),
            "CreateBitmapBrush",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;
    use crate::types::Gradient;
    use kurbo::Point;
    use peniko::Color;

    fn radial() -> Gradient {
        Gradient::new(
            GradientKind::Radial {
                center: Point::new(5.0, 5.0),
                radius: 5.0,
                focal: Point::new(5.0, 5.0),
            },
            &[(0.0, Color::WHITE), (1.0, Color::BLACK)],
        )
    }

    fn factory() -> (BrushFactory<SoftBackend>, <SoftBackend as Backend>::DrawContext) {
        let backend = Rc::new(SoftBackend::new());
        let dc = backend.create_draw_context().unwrap();
        (BrushFactory::new(backend), dc)
    }

    #[test]
    fn gradient_classification() {
        assert!(!gradient_needs_emulation(&radial()));
        assert!(gradient_needs_emulation(&radial().with_spread(Extend::Reflect)));
        assert!(gradient_needs_emulation(&radial().with_spread(Extend::Repeat)));
        for spread in [Extend::Pad, Extend::Repeat, Extend::Reflect] {
            let conical = Gradient::new(
                GradientKind::Conical {
                    center: Point::ZERO,
                    angle: 0.0,
                },
                &[(0.0, Color::WHITE)],
            )
            .with_spread(spread);
            assert!(gradient_needs_emulation(&conical));
        }
    }

    #[test]
    fn resolved_brushes() {
        let (factory, dc) = factory();
        let solid = factory.to_hardware_brush(&dc, &Brush::solid(Color::WHITE));
        assert!(solid.brush.is_some() && !solid.needs_emulation);

        let pad = factory.to_hardware_brush(&dc, &Brush::gradient(radial()));
        assert!(pad.brush.is_some() && !pad.needs_emulation);

        let reflect =
            factory.to_hardware_brush(&dc, &Brush::gradient(radial().with_spread(Extend::Reflect)));
        assert!(reflect.brush.is_none() && reflect.needs_emulation);

        let pattern = factory.to_hardware_brush(&dc, &Brush::pattern(PatternStyle::Cross, Color::BLACK));
        assert!(pattern.brush.is_some());

        let none = factory.to_hardware_brush(&dc, &Brush::none());
        assert!(none.brush.is_none() && !none.needs_emulation);
    }

    #[test]
    fn pattern_expands_to_two_colors() {
        let image = pattern_image(PatternStyle::Horizontal, Color::from_rgba8(255, 0, 0, 255));
        assert_eq!(image.pixel(0, 3), Some([0, 0, 255, 255]));
        assert_eq!(image.pixel(0, 0), Some([0, 0, 0, 0]));
    }
}
