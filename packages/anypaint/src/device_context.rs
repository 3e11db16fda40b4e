//! Reference-counted frame bracketing around a draw context.
//!
//! The hardware API forbids opening a frame twice and cannot report whether
//! one is open, so the counter here is the only source of truth. Nested users
//! share one hardware frame; only the outermost `begin`/`end` pair reaches the
//! hardware.

use std::cell::Cell;
use std::rc::Rc;

use crate::backend::{Backend, DrawContext};
use crate::error::{BackendError, FrameError};

pub struct DeviceContext<B: Backend> {
    backend: Rc<B>,
    context: B::DrawContext,
    ref_count: Cell<u32>,
    last_error: Cell<Option<FrameError>>,
}

impl<B: Backend> DeviceContext<B> {
    /// Creates a context owned exclusively by its caller.
    pub fn new(backend: Rc<B>) -> Result<Self, BackendError> {
        let context = backend.create_draw_context()?;
        Ok(Self::wrap(backend, context))
    }

    /// Wraps an externally created context, e.g. a window back buffer.
    pub fn wrap(backend: Rc<B>, context: B::DrawContext) -> Self {
        Self {
            backend,
            context,
            ref_count: Cell::new(0),
            last_error: Cell::new(None),
        }
    }

    pub fn backend(&self) -> &Rc<B> {
        &self.backend
    }

    pub fn get(&self) -> &B::DrawContext {
        &self.context
    }

    pub fn ref_count(&self) -> u32 {
        self.ref_count.get()
    }

    pub fn is_active(&self) -> bool {
        self.ref_count.get() > 0
    }

    /// Error reported by the most recent failed frame, if any.
    pub fn last_error(&self) -> Option<FrameError> {
        self.last_error.get()
    }

    pub fn begin(&self) {
        let count = self.ref_count.get();
        self.ref_count.set(count + 1);
        if count == 0 {
            self.context.begin_draw();
        }
    }

    /// Returns false if the hardware frame finished with an error, or if
    /// there was no matching `begin`.
    pub fn end(&self) -> bool {
        match self.ref_count.get() {
            0 => {
                tracing::warn!("DeviceContext::end called without matching begin");
                false
            }
            1 => {
                self.ref_count.set(0);
                self.finish_frame("EndDraw")
            }
            n => {
                self.ref_count.set(n - 1);
                true
            }
        }
    }

    /// Closes the hardware frame without touching the counter.
    pub fn suspend(&self) {
        if self.is_active() {
            self.finish_frame("EndDraw (suspend)");
        }
    }

    pub fn resume(&self) {
        if self.is_active() {
            self.context.begin_draw();
        }
    }

    fn finish_frame(&self, call: &str) -> bool {
        match self.context.end_draw() {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(
                    code = err.code,
                    tag1 = err.tag1,
                    tag2 = err.tag2,
                    "{call} failed"
                );
                self.last_error.set(Some(err));
                false
            }
        }
    }
}

/// Scoped `begin`/`end` pair. Use [`DeviceContextGuard::finish`] to observe
/// the result; dropping the guard ends the frame and discards it.
pub struct DeviceContextGuard<'a, B: Backend> {
    dc: &'a DeviceContext<B>,
    done: bool,
}

impl<'a, B: Backend> DeviceContextGuard<'a, B> {
    pub fn new(dc: &'a DeviceContext<B>) -> Self {
        dc.begin();
        Self { dc, done: false }
    }

    pub fn finish(mut self) -> bool {
        self.done = true;
        self.dc.end()
    }
}

impl<B: Backend> Drop for DeviceContextGuard<'_, B> {
    fn drop(&mut self) {
        if !self.done {
            self.dc.end();
        }
    }
}

/// Interrupts an open frame for the lifetime of the value, e.g. around a
/// pixel readback.
pub struct DeviceContextSuspender<'a, B: Backend> {
    dc: &'a DeviceContext<B>,
}

impl<'a, B: Backend> DeviceContextSuspender<'a, B> {
    pub fn new(dc: &'a DeviceContext<B>) -> Self {
        dc.suspend();
        Self { dc }
    }
}

impl<B: Backend> Drop for DeviceContextSuspender<'_, B> {
    fn drop(&mut self) {
        self.dc.resume();
    }
}
