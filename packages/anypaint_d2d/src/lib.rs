//! Direct2D backend for anypaint.
//!
//! [`D2DBackend`] owns a Direct3D 11 device (hardware, with a WARP
//! fallback), the Direct2D device created on top of it and a shared
//! DirectWrite factory. Each [`D2DContext`] is an `ID2D1DeviceContext` of
//! that device, so bitmaps, brushes and geometries can be shared between
//! all contexts of one backend.
//!
//! Logging goes through `tracing`. Set `ANYPAINT_VERBOSE=1` to trace every
//! resource creation.
#![cfg(windows)]

mod context;
mod convert;

use std::cell::RefCell;
use std::rc::Rc;

use anypaint::backend::{Backend, GeometrySink, StrokeStyleProperties};
use anypaint::{BackendError, BgraImage, FontDefinition};
use kurbo::{Point, Rect};
use peniko::Fill;
use rustc_hash::FxHashSet;
use windows::Win32::Foundation::{BOOL, HMODULE};
use windows::Win32::Graphics::Direct2D::Common::*;
use windows::Win32::Graphics::Direct2D::*;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::DirectWrite::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::{IDXGIAdapter, IDXGIDevice, IDXGISurface, IDXGISwapChain1};
use windows::core::{HSTRING, Interface};

pub use crate::context::D2DContext;
use crate::convert::creation_error;

macro_rules! vlog {
    ($backend:expr, $($arg:tt)*) => {
        if $backend.verbose {
            tracing::debug!($($arg)*);
        }
    };
}

/// Raw pointers of the bitmaps currently bound as the target of an open
/// frame. Shared by a backend and all of its contexts.
pub(crate) type OpenTargets = Rc<RefCell<FxHashSet<usize>>>;

pub struct D2DBackend {
    factory: ID2D1Factory1,
    device: ID2D1Device,
    /// Context used for resource creation and readback, never for drawing.
    resources: ID2D1DeviceContext,
    dwrite: IDWriteFactory,
    open_targets: OpenTargets,
    verbose: bool,
}

impl D2DBackend {
    /// Backend on a new hardware Direct3D 11 device, or WARP if no hardware
    /// device can be created.
    pub fn new() -> Result<Self, BackendError> {
        Self::from_d3d_device(&create_d3d_device()?)
    }

    /// Backend sharing the device that renders into `swap_chain`.
    pub fn from_swap_chain(swap_chain: &IDXGISwapChain1) -> Result<Self, BackendError> {
        let device = unsafe {
            let buffer: ID3D11Texture2D = swap_chain
                .GetBuffer(0)
                .map_err(creation_error("IDXGISwapChain1::GetBuffer"))?;
            buffer
                .GetDevice()
                .map_err(creation_error("ID3D11Resource::GetDevice"))?
        };
        Self::from_d3d_device(&device)
    }

    /// The device needs `D3D11_CREATE_DEVICE_BGRA_SUPPORT`.
    pub fn from_d3d_device(d3d: &ID3D11Device) -> Result<Self, BackendError> {
        unsafe {
            let dxgi: IDXGIDevice = d3d.cast().map_err(creation_error("IDXGIDevice cast"))?;
            let factory = D2D1CreateFactory::<ID2D1Factory1>(D2D1_FACTORY_TYPE_SINGLE_THREADED, None)
                .map_err(creation_error("D2D1CreateFactory"))?;
            let device = factory
                .CreateDevice(&dxgi)
                .map_err(creation_error("ID2D1Factory1::CreateDevice"))?;
            let resources = device
                .CreateDeviceContext(D2D1_DEVICE_CONTEXT_OPTIONS_NONE)
                .map_err(creation_error("ID2D1Device::CreateDeviceContext"))?;
            let dwrite = DWriteCreateFactory::<IDWriteFactory>(DWRITE_FACTORY_TYPE_SHARED)
                .map_err(creation_error("DWriteCreateFactory"))?;
            let verbose = std::env::var("ANYPAINT_VERBOSE")
                .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
            Ok(Self {
                factory,
                device,
                resources,
                dwrite,
                open_targets: Rc::default(),
                verbose,
            })
        }
    }

    /// Target bitmap over the back buffer of `swap_chain`. Release it before
    /// resizing the swap chain buffers.
    pub fn swap_chain_bitmap(&self, swap_chain: &IDXGISwapChain1) -> Result<ID2D1Bitmap1, BackendError> {
        let props = Self::bitmap_properties(D2D1_BITMAP_OPTIONS_TARGET | D2D1_BITMAP_OPTIONS_CANNOT_DRAW);
        unsafe {
            let surface: IDXGISurface = swap_chain
                .GetBuffer(0)
                .map_err(creation_error("IDXGISwapChain1::GetBuffer"))?;
            self.resources
                .CreateBitmapFromDxgiSurface(&surface, Some(&props))
                .map_err(creation_error("CreateBitmapFromDxgiSurface"))
        }
    }

    pub fn factory(&self) -> &ID2D1Factory1 {
        &self.factory
    }

    pub fn device(&self) -> &ID2D1Device {
        &self.device
    }

    fn bitmap_properties(options: D2D1_BITMAP_OPTIONS) -> D2D1_BITMAP_PROPERTIES1 {
        D2D1_BITMAP_PROPERTIES1 {
            pixelFormat: D2D1_PIXEL_FORMAT {
                format: DXGI_FORMAT_B8G8R8A8_UNORM,
                alphaMode: D2D1_ALPHA_MODE_PREMULTIPLIED,
            },
            dpiX: 96.0,
            dpiY: 96.0,
            bitmapOptions: options,
            colorContext: std::mem::ManuallyDrop::new(None),
        }
    }

    fn path_geometry(&self) -> Result<(ID2D1PathGeometry1, ID2D1GeometrySink), BackendError> {
        unsafe {
            let geometry = self
                .factory
                .CreatePathGeometry()
                .map_err(creation_error("ID2D1Factory1::CreatePathGeometry"))?;
            let sink = geometry
                .Open()
                .map_err(creation_error("ID2D1PathGeometry::Open"))?;
            Ok((geometry, sink))
        }
    }
}

fn create_d3d_device() -> Result<ID3D11Device, BackendError> {
    let mut last = BackendError::Unsupported("Direct3D 11");
    for driver in [D3D_DRIVER_TYPE_HARDWARE, D3D_DRIVER_TYPE_WARP] {
        let mut device: Option<ID3D11Device> = None;
        let result = unsafe {
            D3D11CreateDevice(
                None::<&IDXGIAdapter>,
                driver,
                HMODULE::default(),
                D3D11_CREATE_DEVICE_BGRA_SUPPORT,
                None,
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                None,
            )
        };
        match (result, device) {
            (Ok(()), Some(device)) => return Ok(device),
            (Err(err), _) => {
                tracing::warn!(?driver, "D3D11CreateDevice failed: {err}");
                last = BackendError::creation("D3D11CreateDevice", err.code().0);
            }
            (Ok(()), None) => {}
        }
    }
    Err(last)
}

impl Backend for D2DBackend {
    type Bitmap = ID2D1Bitmap1;
    type Geometry = ID2D1Geometry;
    type Brush = ID2D1Brush;
    type StrokeStyle = ID2D1StrokeStyle;
    type FontFace = IDWriteFontFace;
    type DrawContext = D2DContext;
    type GeometrySink = D2DGeometrySink;

    fn create_draw_context(&self) -> Result<D2DContext, BackendError> {
        let ctx = unsafe {
            self.device
                .CreateDeviceContext(D2D1_DEVICE_CONTEXT_OPTIONS_NONE)
                .map_err(creation_error("ID2D1Device::CreateDeviceContext"))?
        };
        vlog!(self, "device context created");
        Ok(D2DContext::new(ctx, self.open_targets.clone()))
    }

    fn create_bitmap(
        &self,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        pitch: u32,
    ) -> Result<ID2D1Bitmap1, BackendError> {
        if width == 0 || height == 0 {
            return Err(BackendError::InvalidSize { width, height });
        }
        let props = Self::bitmap_properties(D2D1_BITMAP_OPTIONS_TARGET);
        let bitmap = unsafe {
            self.resources
                .CreateBitmap(
                    D2D_SIZE_U { width, height },
                    data.map(|d| d.as_ptr().cast()),
                    pitch,
                    &props,
                )
                .map_err(creation_error("ID2D1DeviceContext::CreateBitmap"))?
        };
        vlog!(self, width, height, "bitmap created");
        Ok(bitmap)
    }

    fn bitmap_size(&self, bitmap: &ID2D1Bitmap1) -> (u32, u32) {
        let size = unsafe { bitmap.GetPixelSize() };
        (size.width, size.height)
    }

    fn same_bitmap(&self, a: &ID2D1Bitmap1, b: &ID2D1Bitmap1) -> bool {
        a == b
    }

    fn read_bitmap(&self, bitmap: &ID2D1Bitmap1) -> Result<BgraImage, BackendError> {
        if self.open_targets.borrow().contains(&(bitmap.as_raw() as usize)) {
            return Err(BackendError::FrameOpen);
        }
        let (width, height) = self.bitmap_size(bitmap);
        let props = Self::bitmap_properties(D2D1_BITMAP_OPTIONS_CPU_READ | D2D1_BITMAP_OPTIONS_CANNOT_DRAW);
        unsafe {
            let staging = self
                .resources
                .CreateBitmap(D2D_SIZE_U { width, height }, None, 0, &props)
                .map_err(creation_error("staging CreateBitmap"))?;
            staging
                .CopyFromBitmap(None, bitmap, None)
                .map_err(creation_error("ID2D1Bitmap::CopyFromBitmap"))?;
            let mapped = staging
                .Map(D2D1_MAP_OPTIONS_READ)
                .map_err(creation_error("ID2D1Bitmap1::Map"))?;
            let len = mapped.pitch as usize * height as usize;
            let bytes = std::slice::from_raw_parts(mapped.bits, len);
            let image = BgraImage::from_bgra_premultiplied(width, height, mapped.pitch as usize, bytes);
            if let Err(err) = staging.Unmap() {
                tracing::warn!("ID2D1Bitmap1::Unmap failed: {err}");
            }
            image.ok_or(BackendError::InvalidSize { width, height })
        }
    }

    fn create_path_geometry(&self, fill_rule: Fill) -> Result<D2DGeometrySink, BackendError> {
        let (geometry, sink) = self.path_geometry()?;
        unsafe { sink.SetFillMode(convert::fill_mode(fill_rule)) };
        Ok(D2DGeometrySink {
            geometry,
            sink,
            figure_open: false,
        })
    }

    /// The rectangles as figures of one winding path: their union is the
    /// covered area whether or not they overlap.
    fn create_rect_union(&self, rects: &[Rect]) -> Result<ID2D1Geometry, BackendError> {
        let mut sink = self.create_path_geometry(Fill::NonZero)?;
        for r in rects {
            sink.begin_figure(Point::new(r.x0, r.y0), true);
            sink.add_line(Point::new(r.x1, r.y0));
            sink.add_line(Point::new(r.x1, r.y1));
            sink.add_line(Point::new(r.x0, r.y1));
            sink.end_figure(true);
        }
        sink.close()
    }

    fn create_stroke_style(
        &self,
        props: &StrokeStyleProperties,
        dashes: &[f32],
    ) -> Result<ID2D1StrokeStyle, BackendError> {
        let d2d_props = convert::stroke_style(props);
        let dashes = (!dashes.is_empty()).then_some(dashes);
        let style = unsafe {
            self.factory
                .CreateStrokeStyle(&d2d_props, dashes)
                .map_err(creation_error("ID2D1Factory1::CreateStrokeStyle"))?
        };
        Ok(style.into())
    }

    fn resolve_font_face(&self, font: &FontDefinition) -> Result<IDWriteFontFace, BackendError> {
        unsafe {
            let mut collection: Option<IDWriteFontCollection> = None;
            self.dwrite
                .GetSystemFontCollection(&mut collection, false)
                .map_err(creation_error("IDWriteFactory::GetSystemFontCollection"))?;
            let collection = collection.ok_or(BackendError::Unsupported("system font collection"))?;

            let mut index = 0u32;
            let mut exists = BOOL::default();
            collection
                .FindFamilyName(&HSTRING::from(font.family.as_str()), &mut index, &mut exists)
                .map_err(creation_error("IDWriteFontCollection::FindFamilyName"))?;
            if !exists.as_bool() {
                return Err(BackendError::Unsupported("font family"));
            }
            let family = collection
                .GetFontFamily(index)
                .map_err(creation_error("IDWriteFontCollection::GetFontFamily"))?;
            let style = if font.italic {
                DWRITE_FONT_STYLE_ITALIC
            } else {
                DWRITE_FONT_STYLE_NORMAL
            };
            let matched = family
                .GetFirstMatchingFont(
                    DWRITE_FONT_WEIGHT(i32::from(font.weight)),
                    DWRITE_FONT_STRETCH(i32::from(font.stretch)),
                    style,
                )
                .map_err(creation_error("IDWriteFontFamily::GetFirstMatchingFont"))?;
            let face = matched
                .CreateFontFace()
                .map_err(creation_error("IDWriteFont::CreateFontFace"))?;
            vlog!(self, family = %font.family, weight = font.weight, "font face resolved");
            Ok(face)
        }
    }
}

/// Records the figures of an `ID2D1PathGeometry1`.
pub struct D2DGeometrySink {
    geometry: ID2D1PathGeometry1,
    sink: ID2D1GeometrySink,
    figure_open: bool,
}

impl GeometrySink for D2DGeometrySink {
    type Geometry = ID2D1Geometry;

    fn begin_figure(&mut self, start: Point, filled: bool) {
        let begin = if filled {
            D2D1_FIGURE_BEGIN_FILLED
        } else {
            D2D1_FIGURE_BEGIN_HOLLOW
        };
        unsafe { self.sink.BeginFigure(convert::point(start), begin) };
        self.figure_open = true;
    }

    fn add_line(&mut self, to: Point) {
        unsafe { self.sink.AddLine(convert::point(to)) };
    }

    fn add_bezier(&mut self, c1: Point, c2: Point, end: Point) {
        let segment = D2D1_BEZIER_SEGMENT {
            point1: convert::point(c1),
            point2: convert::point(c2),
            point3: convert::point(end),
        };
        unsafe { self.sink.AddBezier(&segment) };
    }

    fn end_figure(&mut self, closed: bool) {
        let end = if closed {
            D2D1_FIGURE_END_CLOSED
        } else {
            D2D1_FIGURE_END_OPEN
        };
        unsafe { self.sink.EndFigure(end) };
        self.figure_open = false;
    }

    fn close(self) -> Result<ID2D1Geometry, BackendError> {
        if self.figure_open {
            unsafe { self.sink.EndFigure(D2D1_FIGURE_END_OPEN) };
            tracing::warn!("geometry closed with an open figure");
        }
        unsafe {
            self.sink
                .Close()
                .map_err(creation_error("ID2D1GeometrySink::Close"))?;
        }
        Ok(self.geometry.into())
    }
}
