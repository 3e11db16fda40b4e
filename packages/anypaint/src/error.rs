use thiserror::Error;

/// Failure reported by a backend while creating or accessing a resource.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("{call} failed with code {code:#010x}")]
    CreationFailed { call: &'static str, code: i32 },
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
    #[error("operation requires the draw frame to be closed")]
    FrameOpen,
    #[error("invalid bitmap size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },
}

impl BackendError {
    pub fn creation(call: &'static str, code: i32) -> Self {
        BackendError::CreationFailed { call, code }
    }
}

/// Failure reported when a hardware frame is finished.
///
/// `tag1`/`tag2` identify the draw call that put the context into the error
/// state, or are zero when the backend could not attribute the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("end of frame failed with code {code:#010x} (tags {tag1:#x}, {tag2:#x})")]
pub struct FrameError {
    pub code: i32,
    pub tag1: u64,
    pub tag2: u64,
}
