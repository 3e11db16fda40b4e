//! A hardware image bound as the target of its own device context.

use std::cell::RefCell;
use std::rc::Rc;

use kurbo::Rect;
use peniko::Color;

use crate::backend::{Backend, DrawContext};
use crate::device_context::{DeviceContext, DeviceContextGuard};
use crate::error::BackendError;
use crate::image::BgraImage;

pub struct Bitmap<B: Backend> {
    dc: DeviceContext<B>,
    image: RefCell<Option<B::Bitmap>>,
}

impl<B: Backend> Bitmap<B> {
    /// Empty bitmap with its own device context. Call [`Bitmap::resize`] to
    /// allocate pixels.
    pub fn new(backend: Rc<B>) -> Result<Self, BackendError> {
        Ok(Self::with_context(DeviceContext::new(backend)?))
    }

    /// Bitmap drawing through an externally owned context.
    pub fn with_context(dc: DeviceContext<B>) -> Self {
        Self {
            dc,
            image: RefCell::new(None),
        }
    }

    /// Convenience for `new` followed by `resize`.
    pub fn with_size(backend: Rc<B>, width: u32, height: u32) -> Result<Self, BackendError> {
        let bitmap = Self::new(backend)?;
        bitmap.try_resize(width, height, None, 0)?;
        Ok(bitmap)
    }

    pub fn device_context(&self) -> &DeviceContext<B> {
        &self.dc
    }

    pub fn backend(&self) -> &Rc<B> {
        self.dc.backend()
    }

    /// Current hardware image, `None` until the first successful resize.
    pub fn hardware(&self) -> Option<B::Bitmap> {
        self.image.borrow().clone()
    }

    pub fn is_null(&self) -> bool {
        self.image.borrow().is_none()
    }

    /// Reallocates the image, optionally seeded with premultiplied BGRA
    /// `data` at `pitch` bytes per row. Returns false and logs on failure,
    /// leaving the bitmap null.
    pub fn resize(&self, width: u32, height: u32, data: Option<&[u8]>, pitch: u32) -> bool {
        match self.try_resize(width, height, data, pitch) {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!(width, height, "bitmap resize failed: {err}");
                false
            }
        }
    }

    fn try_resize(
        &self,
        width: u32,
        height: u32,
        data: Option<&[u8]>,
        pitch: u32,
    ) -> Result<(), BackendError> {
        self.dc.get().set_target(None);
        self.image.borrow_mut().take();
        let image = self
            .backend()
            .create_bitmap(width, height, data, pitch)?;
        self.dc.get().set_target(Some(&image));
        *self.image.borrow_mut() = Some(image);
        Ok(())
    }

    /// Converts any decoded image to premultiplied BGRA and uploads it.
    pub fn from_image(&self, image: &image::DynamicImage) -> bool {
        self.from_bgra(&BgraImage::from_image(image))
    }

    pub fn from_bgra(&self, image: &BgraImage) -> bool {
        self.resize(
            image.width(),
            image.height(),
            Some(image.data()),
            image.pitch() as u32,
        )
    }

    /// Clears the whole bitmap to `color` in a frame of its own. Returns
    /// false if the frame failed.
    pub fn fill(&self, color: Color) -> bool {
        let guard = DeviceContextGuard::new(&self.dc);
        self.dc.get().clear(color);
        guard.finish()
    }

    /// CPU copy of `rect`, or of the whole image when `rect` is empty.
    /// Returns a null image and logs on failure.
    pub fn to_image(&self, rect: Rect) -> BgraImage {
        let Some(image) = self.hardware() else {
            return BgraImage::default();
        };
        match self.backend().read_bitmap(&image) {
            Ok(pixels) => pixels.sub_image(rect),
            Err(err) => {
                tracing::warn!("bitmap readback failed: {err}");
                BgraImage::default()
            }
        }
    }

    pub fn size(&self) -> (u32, u32) {
        match self.image.borrow().as_ref() {
            Some(image) => self.backend().bitmap_size(image),
            None => (0, 0),
        }
    }

    pub fn rect(&self) -> Rect {
        let (w, h) = self.size();
        Rect::new(0.0, 0.0, w as f64, h as f64)
    }

    /// True if both wrappers hold the same hardware image.
    pub fn same_image(&self, other: &Bitmap<B>) -> bool {
        match (self.image.borrow().as_ref(), other.image.borrow().as_ref()) {
            (Some(a), Some(b)) => self.backend().same_bitmap(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soft::SoftBackend;

    fn backend() -> Rc<SoftBackend> {
        Rc::new(SoftBackend::new())
    }

    #[test]
    fn round_trip_keeps_size_and_pixels() {
        let mut src = image::RgbaImage::new(3, 2);
        src.put_pixel(1, 1, image::Rgba([10, 20, 30, 255]));
        src.put_pixel(2, 0, image::Rgba([200, 0, 0, 128]));
        let bitmap = Bitmap::new(backend()).unwrap();
        assert!(bitmap.from_image(&image::DynamicImage::ImageRgba8(src.clone())));
        assert_eq!(bitmap.size(), (3, 2));
        let out = bitmap.to_image(Rect::ZERO);
        assert_eq!(out.size(), (3, 2));
        assert_eq!(out.pixel(1, 1), Some([30, 20, 10, 255]));
        assert_eq!(out, BgraImage::from_image(&image::DynamicImage::ImageRgba8(src)));
    }

    #[test]
    fn fill_clears_whole_image() {
        let bitmap = Bitmap::with_size(backend(), 4, 4).unwrap();
        assert!(bitmap.fill(Color::from_rgba8(0, 0, 255, 255)));
        let out = bitmap.to_image(Rect::new(1.0, 1.0, 3.0, 3.0));
        assert_eq!(out.size(), (2, 2));
        assert_eq!(out.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(bitmap.device_context().ref_count(), 0);
    }

    #[test]
    fn fill_reports_a_failed_frame() {
        let bitmap = Bitmap::with_size(backend(), 2, 2).unwrap();
        // Drawing outside a frame is reported by the next frame's end.
        bitmap.device_context().get().clear(Color::WHITE);
        assert!(!bitmap.fill(Color::BLACK));
        assert!(bitmap.device_context().last_error().is_some());
        assert!(bitmap.fill(Color::BLACK));
    }

    #[test]
    fn readback_fails_while_frame_is_open() {
        let bitmap = Bitmap::with_size(backend(), 2, 2).unwrap();
        bitmap.device_context().begin();
        assert!(bitmap.to_image(Rect::ZERO).is_null());
        bitmap.device_context().suspend();
        assert_eq!(bitmap.to_image(Rect::ZERO).size(), (2, 2));
        bitmap.device_context().resume();
        assert!(bitmap.device_context().end());
    }

    #[test]
    fn failed_resize_leaves_bitmap_null() {
        let bitmap = Bitmap::with_size(backend(), 2, 2).unwrap();
        assert!(!bitmap.resize(0, 0, None, 0));
        assert!(bitmap.is_null());
        assert_eq!(bitmap.size(), (0, 0));
    }

    #[test]
    fn distinct_bitmaps_are_not_the_same_image() {
        let a = Bitmap::with_size(backend(), 1, 1).unwrap();
        let b = Bitmap::with_size(a.backend().clone(), 1, 1).unwrap();
        assert!(a.same_image(&a));
        assert!(!a.same_image(&b));
    }
}
