//! Frame data structures for captured video content

use image::RgbImage;
use std::time::Instant;

/// A decoded video frame
///
/// Published frames are shared as `Arc<Frame>` and never mutated.
#[derive(Debug)]
pub struct Frame {
    /// Publication counter, starting at 1 for the first frame
    pub seq: u64,
    /// Timestamp when the frame was decoded
    pub captured_at: Instant,
    /// RGB pixel data
    pub image: RgbImage,
}

impl Frame {
    /// Create a new frame stamped with the current time
    pub fn new(seq: u64, image: RgbImage) -> Self {
        Self {
            seq,
            captured_at: Instant::now(),
            image,
        }
    }

    /// Get frame dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}
