//! A 2D paint engine for hardware-accelerated immediate-mode APIs.
//!
//! The engine translates an abstract drawing API (paths, pens, brushes,
//! glyph runs, clips, composition modes) into calls on a [`Backend`]: a
//! device-level factory plus a [`DrawContext`] that records drawing between
//! `begin_draw` and `end_draw`. Features the backend has no primitive for
//! (extended gradients, conical gradients, composition modes other than
//! copy and source-over, perspective transforms) are rasterized in software
//! with `tiny-skia` and drawn back onto the target.
//!
//! Pipeline of a session:
//! 1. [`PaintEngine::begin`] opens the target's frame and installs the system clip
//! 2. drawing calls resolve brushes, pens and geometries and issue hardware calls
//! 3. [`PaintEngine::end`] flushes any pending software surface and closes the frame
//!
//! [`soft::SoftBackend`] implements the backend traits on the CPU and is
//! what the tests draw with. The Direct2D backend lives in `anypaint_d2d`.

pub mod backend;
pub mod bitmap;
pub mod brush;
pub mod clip;
pub mod config;
pub mod dash_stroke;
pub mod device_context;
pub mod emulation;
pub mod engine;
pub mod error;
pub mod font_cache;
pub mod geometry;
pub mod image;
pub mod pen;
pub mod soft;
pub mod types;

mod skia;

pub use crate::backend::{Backend, DrawContext, GeometrySink};
pub use crate::bitmap::Bitmap;
pub use crate::config::EngineConfig;
pub use crate::device_context::{DeviceContext, DeviceContextGuard, DeviceContextSuspender};
pub use crate::engine::{EngineStats, PaintEngine, PaintEngineSuspender, PaintState, PixmapSource};
pub use crate::error::{BackendError, FrameError};
pub use crate::image::{BgraImage, MonoImage};
pub use crate::types::{
    Brush, BrushStyle, ClipOperation, CompositionMode, FontDefinition, Gradient, GradientKind,
    GradientStop, Pen, PenStyle, PatternStyle, PolygonMode, Region, RenderHints, TextItem,
    Transform, VectorPath,
};

pub use kurbo;
pub use peniko;
