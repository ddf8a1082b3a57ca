//! In-memory LED state: the per-LED color buffer and the global brightness.

use smart_leds::RGB8;

pub const BLACK: RGB8 = RGB8::new(0, 0, 0);

/// Largest strip the controller will drive.
pub const MAX_LEDS: usize = 10;

pub const MIN_BRIGHTNESS: u8 = 1;
pub const MAX_BRIGHTNESS: u8 = 31;

/// The per-LED colors awaiting render. Index is the physical LED position.
///
/// The length is fixed when the frame is created and never changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pixels: Vec<RGB8>,
}

impl Frame {
    /// Create an all-black frame. Returns `None` unless `1 <= len <= MAX_LEDS`.
    pub fn new(len: usize) -> Option<Self> {
        if len == 0 || len > MAX_LEDS {
            return None;
        }
        Some(Self {
            pixels: vec![BLACK; len],
        })
    }

    pub fn len(&self) -> usize {
        self.pixels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<RGB8> {
        self.pixels.get(index).copied()
    }

    /// Returns `false` without touching the frame if `index` is out of range.
    pub fn set(&mut self, index: usize, color: RGB8) -> bool {
        match self.pixels.get_mut(index) {
            Some(pixel) => {
                *pixel = color;
                true
            }
            None => false,
        }
    }

    pub fn fill(&mut self, color: RGB8) {
        self.pixels.fill(color);
    }

    pub fn pixels(&self) -> &[RGB8] {
        &self.pixels
    }

    pub fn is_black(&self) -> bool {
        self.pixels.iter().all(|p| *p == BLACK)
    }
}

/// Global brightness on the APA102 scale, 1 (dimmest) to 31 (full).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Brightness(u8);

impl Brightness {
    pub const FULL: Brightness = Brightness(MAX_BRIGHTNESS);

    pub fn new(level: u8) -> Option<Self> {
        (MIN_BRIGHTNESS..=MAX_BRIGHTNESS)
            .contains(&level)
            .then_some(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }

    /// Scale a single 8-bit channel, rounding to nearest.
    pub fn scale_channel(self, value: u8) -> u8 {
        let max = MAX_BRIGHTNESS as u32;
        ((value as u32 * self.0 as u32 + max / 2) / max) as u8
    }

    pub fn scale(self, color: RGB8) -> RGB8 {
        RGB8::new(
            self.scale_channel(color.r),
            self.scale_channel(color.g),
            self.scale_channel(color.b),
        )
    }
}

impl Default for Brightness {
    fn default() -> Self {
        Self::FULL
    }
}
