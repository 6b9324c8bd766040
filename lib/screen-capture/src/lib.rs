mod capture;

pub use capture::*;

use std::time::Duration;

/// A source that fills caller-owned buffers with tightly packed RGB frames.
pub trait FrameCapture {
    type Error: std::error::Error;

    /// Region of the display this source samples.
    fn region(&self) -> Rectangle;

    /// Overwrite `buffer` with the latest frame.
    ///
    /// `buffer` must hold at least `region().frame_len()` bytes.
    fn capture_into(&mut self, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Duration of the most recent successful capture, if there was one.
    fn last_capture_time(&self) -> Option<Duration>;
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn pixel_count(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width as usize * self.height as usize
        }
    }

    /// Bytes needed to hold one RGB frame of this region.
    pub fn frame_len(&self) -> usize {
        self.pixel_count() * 3
    }

    /// Whether `other` lies fully inside `self`.
    pub fn contains(&self, other: &Rectangle) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;

        other.x >= self.x
            && other.y >= self.y
            && other.x as i64 + other.width as i64 <= right
            && other.y as i64 + other.height as i64 <= bottom
    }
}

impl std::fmt::Display for Rectangle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}
