//! Captured frames
//!
//! A [`Frame`] owns a pooled pixel buffer for as long as it lives; dropping
//! it returns the buffer to the capture pool.

use sightline_core::PooledBuffer;
use std::time::Instant;

/// What a frame source reports after filling a buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureInfo {
    pub width: u32,
    pub height: u32,
    /// Bytes per pixel of the filled buffer
    pub channels: u32,
    /// Offset of the captured region inside the screen (pixels)
    pub roi_offset: (f32, f32),
    pub captured_at: Instant,
}

impl CaptureInfo {
    pub fn new(width: u32, height: u32, channels: u32) -> Self {
        Self {
            width,
            height,
            channels,
            roi_offset: (0.0, 0.0),
            captured_at: Instant::now(),
        }
    }

    pub fn with_roi_offset(mut self, x: f32, y: f32) -> Self {
        self.roi_offset = (x, y);
        self
    }

    /// Bytes covered by the image.
    pub fn byte_len(&self) -> usize {
        self.width as usize * self.height as usize * self.channels as usize
    }
}

/// One captured image travelling from capture to detect.
pub struct Frame {
    buffer: PooledBuffer<Vec<u8>>,
    sequence: u64,
    info: CaptureInfo,
}

impl Frame {
    pub fn new(buffer: PooledBuffer<Vec<u8>>, sequence: u64, info: CaptureInfo) -> Self {
        Self {
            buffer,
            sequence,
            info,
        }
    }

    /// Monotonic capture sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn info(&self) -> &CaptureInfo {
        &self.info
    }

    pub fn captured_at(&self) -> Instant {
        self.info.captured_at
    }

    pub fn roi_offset(&self) -> (f32, f32) {
        self.info.roi_offset
    }

    /// Image bytes, trimmed to what the source reported.
    pub fn pixels(&self) -> &[u8] {
        let len = self.info.byte_len().min(self.buffer.len());
        &self.buffer[..len]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.info.width)
            .field("height", &self.info.height)
            .field("slot", &self.buffer.slot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sightline_core::ResourcePool;

    #[test]
    fn test_dropping_frame_returns_buffer() {
        let pool = ResourcePool::with_capacity(1, |_| vec![0u8; 16]).unwrap();
        let frame = Frame::new(
            pool.acquire_for_write().unwrap(),
            1,
            CaptureInfo::new(2, 2, 3),
        );
        assert_eq!(frame.pixels().len(), 12);
        assert!(pool.acquire_for_write().is_none());

        drop(frame);
        assert!(pool.acquire_for_write().is_some());
    }
}
