//! Conversions between anypaint/kurbo values and Direct2D structures.

use anypaint::backend::{
    AntialiasMode, DashStyle, ExtendMode, InterpolationMode, PrimitiveBlend, StrokeStyleProperties,
    StrokeTransformType, TextAntialiasMode,
};
use anypaint::BackendError;
use kurbo::{Affine, Cap, Join, Point, Rect};
use peniko::{Color, Fill};
use windows::Foundation::Numerics::Matrix3x2;
use windows::Win32::Graphics::Direct2D::Common::*;
use windows::Win32::Graphics::Direct2D::*;

pub(crate) fn creation_error(call: &'static str) -> impl FnOnce(windows::core::Error) -> BackendError {
    move |err| BackendError::creation(call, err.code().0)
}

pub(crate) fn point(p: Point) -> D2D_POINT_2F {
    D2D_POINT_2F {
        x: p.x as f32,
        y: p.y as f32,
    }
}

pub(crate) fn rect(r: Rect) -> D2D_RECT_F {
    D2D_RECT_F {
        left: r.x0 as f32,
        top: r.y0 as f32,
        right: r.x1 as f32,
        bottom: r.y1 as f32,
    }
}

pub(crate) const INFINITE_RECT: D2D_RECT_F = D2D_RECT_F {
    left: -f32::MAX,
    top: -f32::MAX,
    right: f32::MAX,
    bottom: f32::MAX,
};

/// Straight-alpha sRGB color.
pub(crate) fn color(c: Color) -> D2D1_COLOR_F {
    let [r, g, b, a] = c.components;
    D2D1_COLOR_F { r, g, b, a }
}

pub(crate) fn matrix(affine: Affine) -> Matrix3x2 {
    let [a, b, c, d, e, f] = affine.as_coeffs();
    Matrix3x2 {
        M11: a as f32,
        M12: b as f32,
        M21: c as f32,
        M22: d as f32,
        M31: e as f32,
        M32: f as f32,
    }
}

pub(crate) fn affine(m: &Matrix3x2) -> Affine {
    Affine::new([
        m.M11 as f64,
        m.M12 as f64,
        m.M21 as f64,
        m.M22 as f64,
        m.M31 as f64,
        m.M32 as f64,
    ])
}

pub(crate) fn fill_mode(rule: Fill) -> D2D1_FILL_MODE {
    match rule {
        Fill::NonZero => D2D1_FILL_MODE_WINDING,
        Fill::EvenOdd => D2D1_FILL_MODE_ALTERNATE,
    }
}

pub(crate) fn antialias(mode: AntialiasMode) -> D2D1_ANTIALIAS_MODE {
    match mode {
        AntialiasMode::PerPrimitive => D2D1_ANTIALIAS_MODE_PER_PRIMITIVE,
        AntialiasMode::Aliased => D2D1_ANTIALIAS_MODE_ALIASED,
    }
}

pub(crate) fn text_antialias(mode: TextAntialiasMode) -> D2D1_TEXT_ANTIALIAS_MODE {
    match mode {
        TextAntialiasMode::ClearType => D2D1_TEXT_ANTIALIAS_MODE_CLEARTYPE,
        TextAntialiasMode::Grayscale => D2D1_TEXT_ANTIALIAS_MODE_GRAYSCALE,
        TextAntialiasMode::Aliased => D2D1_TEXT_ANTIALIAS_MODE_ALIASED,
    }
}

pub(crate) fn primitive_blend(blend: PrimitiveBlend) -> D2D1_PRIMITIVE_BLEND {
    match blend {
        PrimitiveBlend::SourceOver => D2D1_PRIMITIVE_BLEND_SOURCE_OVER,
        PrimitiveBlend::Copy => D2D1_PRIMITIVE_BLEND_COPY,
    }
}

pub(crate) fn interpolation(mode: InterpolationMode) -> D2D1_INTERPOLATION_MODE {
    match mode {
        InterpolationMode::NearestNeighbor => D2D1_INTERPOLATION_MODE_NEAREST_NEIGHBOR,
        InterpolationMode::Linear => D2D1_INTERPOLATION_MODE_LINEAR,
    }
}

pub(crate) fn extend(mode: ExtendMode) -> D2D1_EXTEND_MODE {
    match mode {
        ExtendMode::Clamp => D2D1_EXTEND_MODE_CLAMP,
        ExtendMode::Wrap => D2D1_EXTEND_MODE_WRAP,
        ExtendMode::Mirror => D2D1_EXTEND_MODE_MIRROR,
    }
}

fn cap(cap: Cap) -> D2D1_CAP_STYLE {
    match cap {
        Cap::Butt => D2D1_CAP_STYLE_FLAT,
        Cap::Square => D2D1_CAP_STYLE_SQUARE,
        Cap::Round => D2D1_CAP_STYLE_ROUND,
    }
}

fn join(join: Join) -> D2D1_LINE_JOIN {
    match join {
        Join::Miter => D2D1_LINE_JOIN_MITER_OR_BEVEL,
        Join::Bevel => D2D1_LINE_JOIN_BEVEL,
        Join::Round => D2D1_LINE_JOIN_ROUND,
    }
}

pub(crate) fn stroke_style(props: &StrokeStyleProperties) -> D2D1_STROKE_STYLE_PROPERTIES1 {
    D2D1_STROKE_STYLE_PROPERTIES1 {
        startCap: cap(props.start_cap),
        endCap: cap(props.end_cap),
        dashCap: cap(props.dash_cap),
        lineJoin: join(props.line_join),
        miterLimit: props.miter_limit,
        dashStyle: match props.dash_style {
            DashStyle::Solid => D2D1_DASH_STYLE_SOLID,
            DashStyle::Custom => D2D1_DASH_STYLE_CUSTOM,
        },
        dashOffset: props.dash_offset,
        transformType: match props.transform_type {
            StrokeTransformType::Normal => D2D1_STROKE_TRANSFORM_TYPE_NORMAL,
            StrokeTransformType::Fixed => D2D1_STROKE_TRANSFORM_TYPE_FIXED,
            StrokeTransformType::Hairline => D2D1_STROKE_TRANSFORM_TYPE_HAIRLINE,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_round_trips_affine() {
        let t = Affine::new([2.0, 0.5, -0.5, 3.0, 10.0, -4.0]);
        assert_eq!(affine(&matrix(t)), t);
    }

    #[test]
    fn miter_join_falls_back_to_bevel() {
        let props = StrokeStyleProperties {
            line_join: Join::Miter,
            ..StrokeStyleProperties::default()
        };
        assert_eq!(stroke_style(&props).lineJoin, D2D1_LINE_JOIN_MITER_OR_BEVEL);
    }
}
