//! Screen capture collaborators.
//!
//! The protocol core never touches the platform capture API directly: it
//! asks a [`FrameSource`] for one compressed frame per client request, via
//! the worker handle in [`capture`].

pub mod capture;

use anyhow::Result;

/// Default JPEG quality (1-100) for streamed frames. Raise for sharper
/// frames, lower for less bandwidth per request.
pub const DEFAULT_JPEG_QUALITY: u8 = 50;

/// One captured, compressed frame.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub width: u32,
    pub height: u32,
    pub jpeg: Vec<u8>,
}

/// Capture collaborator: produces one compressed frame per call.
///
/// Implementations may block and may be tied to the thread they were created
/// on; they always run inside the dedicated capture worker thread.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<CapturedFrame>;
}
