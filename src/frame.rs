//! Frames and frame sources.
//!
//! - `Frame`: immutable raster handed to every backend of a frame. Pixel data
//!   is reference-counted so concurrent backends can share it without copying.
//! - `FrameSource`: anything that yields frames (webcam, network camera,
//!   externally pushed frames). The core is agnostic to which.
//! - `SyntheticSource`: deterministic generated frames for the daemon's
//!   `stub://` source and for tests.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Bgr,
    Rgb,
}

/// A single raster frame.
#[derive(Clone, Debug)]
pub struct Frame {
    data: Arc<[u8]>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time in epoch seconds.
    pub timestamp: f64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} bytes for a {}x{} frame, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            format,
            timestamp: now_epoch_secs(),
        })
    }

    /// A zero-filled frame of the given size. Useful when backends ignore pixels.
    pub fn blank(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * 3;
        Self {
            data: vec![0u8; len].into(),
            width,
            height,
            format: PixelFormat::Bgr,
            timestamp: now_epoch_secs(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }
}

/// Anything yielding raster frames.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Frame>;

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Generated frames with a slowly shifting gradient.
pub struct SyntheticSource {
    width: u32,
    height: u32,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.width as usize * self.height as usize * 3;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + self.frame_count + self.scene_state as u64) % 256) as u8;
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        Frame::new(pixels, self.width, self.height, PixelFormat::Bgr)
    }
}

/// Current wall-clock time in epoch seconds.
pub fn now_epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_rejects_mismatched_buffer() {
        assert!(Frame::new(vec![0u8; 10], 4, 4, PixelFormat::Rgb).is_err());
        let frame = Frame::new(vec![0u8; 48], 4, 4, PixelFormat::Rgb).unwrap();
        assert_eq!(frame.pixels().len(), 48);
    }

    #[test]
    fn synthetic_source_counts_frames() {
        let mut source = SyntheticSource::new(8, 6);
        let frame = source.next_frame().unwrap();
        assert_eq!((frame.width, frame.height), (8, 6));
        source.next_frame().unwrap();
        assert_eq!(source.frames_captured(), 2);
    }
}
