//! scrap-backed display capture and the shared capture worker.
//!
//! One OS thread owns the platform capturer and serves every session's
//! frame requests in arrival order. The single thread is load-bearing twice:
//! scrap's `Capturer` is not `Send` on X11, and the platform capture call is
//! not assumed safe under concurrent invocation, so all sessions funnel
//! through this one worker.

use anyhow::{anyhow, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, RgbImage};
use scrap::{Capturer, Display};
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::{CapturedFrame, FrameSource};

type FrameReply = oneshot::Sender<Result<CapturedFrame>>;

/// Handle for requesting frames from the capture worker. Cheap to clone;
/// every session holds one.
#[derive(Clone)]
pub struct ScreenGrabber {
    tx: mpsc::Sender<FrameReply>,
}

impl ScreenGrabber {
    /// Start the capture worker against the primary display.
    pub fn primary_display(quality: u8) -> Result<Self> {
        // Fail fast if there is no display. The capturer itself is created
        // inside the worker thread, where it will live.
        Display::primary().map_err(|e| anyhow!("no display found: {e}"))?;
        Ok(Self::spawn_with(move || {
            DisplayCapture::open(quality).map(|c| Box::new(c) as Box<dyn FrameSource>)
        }))
    }

    /// Spawn a worker thread whose frame source is built by `factory` on the
    /// worker thread itself (the source need not be `Send`).
    pub fn spawn_with<F>(factory: F) -> Self
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<FrameReply>(16);

        std::thread::spawn(move || {
            let mut source = match factory() {
                Ok(source) => source,
                Err(e) => {
                    warn!("capture source failed to start: {e:#}");
                    let reason = e.to_string();
                    while let Some(reply) = rx.blocking_recv() {
                        let _ = reply.send(Err(anyhow!("capture unavailable: {reason}")));
                    }
                    return;
                }
            };

            while let Some(reply) = rx.blocking_recv() {
                let _ = reply.send(source.next_frame());
            }
        });

        Self { tx }
    }

    /// Capture one frame. Concurrent callers are served strictly one at a
    /// time, in the order their requests arrive.
    pub async fn grab(&self) -> Result<CapturedFrame> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(reply_tx)
            .await
            .map_err(|_| anyhow!("capture worker stopped"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("capture worker dropped the request"))?
    }
}

/// Captures the primary display via scrap and JPEG-compresses at a fixed
/// quality. Frames keep their native resolution so the reported dimensions
/// match the coordinate space input injection operates in.
pub struct DisplayCapture {
    capturer: Capturer,
    width: usize,
    height: usize,
    quality: u8,
}

impl DisplayCapture {
    /// Open the primary display. Must run on the thread that will capture.
    pub fn open(quality: u8) -> Result<Self> {
        let display = Display::primary().map_err(|e| anyhow!("no display found: {e}"))?;
        let width = display.width();
        let height = display.height();
        let capturer =
            Capturer::new(display).map_err(|e| anyhow!("failed to start capture: {e}"))?;
        Ok(Self {
            capturer,
            width,
            height,
            quality,
        })
    }
}

impl FrameSource for DisplayCapture {
    fn next_frame(&mut self) -> Result<CapturedFrame> {
        // scrap reports WouldBlock until the compositor has a frame ready
        let frame = loop {
            match self.capturer.frame() {
                Ok(frame) => break frame.to_vec(),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(e) => return Err(anyhow!("screen capture failed: {e}")),
            }
        };

        // scrap hands back BGRA rows whose stride may include padding
        let stride = frame.len() / self.height;
        let rgb = bgra_to_rgb(&frame, self.width, self.height, stride);
        let jpeg = jpeg_encode(&rgb, self.width as u32, self.height as u32, self.quality)?;

        Ok(CapturedFrame {
            width: self.width as u32,
            height: self.height as u32,
            jpeg,
        })
    }
}

fn bgra_to_rgb(bgra: &[u8], width: usize, height: usize, stride: usize) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(width * height * 3);

    for y in 0..height {
        let row = y * stride;
        for x in 0..width {
            let px = row + x * 4;
            if px + 2 < bgra.len() {
                rgb.push(bgra[px + 2]); // R (BGRA → R is at +2)
                rgb.push(bgra[px + 1]); // G
                rgb.push(bgra[px]); // B
            } else {
                rgb.extend_from_slice(&[0, 0, 0]);
            }
        }
    }

    rgb
}

fn jpeg_encode(rgb: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let encoder = JpegEncoder::new_with_quality(&mut buf, quality);

    let img: RgbImage = ImageBuffer::from_raw(width, height, rgb.to_vec())
        .ok_or_else(|| anyhow!("invalid image dimensions"))?;

    img.write_with_encoder(encoder)
        .map_err(|e| anyhow!("JPEG encode failed: {e}"))?;

    Ok(buf.into_inner())
}
