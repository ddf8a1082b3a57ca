//! APA102 frame encoding.
//!
//! A frame is 32 zero bits, then one 32-bit word per LED (`0b111` + 5-bit
//! brightness, then blue, green, red), then enough one bits to clock the
//! data through every LED's shift register.

use std::iter;

use crate::frame::{Brightness, Frame};

pub const SPI_CLOCK_HZ: u32 = 8_000_000;

const START_FRAME: [u8; 4] = [0x00; 4];
const LED_START: u8 = 0b1110_0000;
const BRIGHTNESS_MASK: u8 = 0b0001_1111;

/// Each LED delays the clock by half a cycle, so the end frame needs at least
/// one extra clock edge per two LEDs.
pub fn end_frame_len(led_count: usize) -> usize {
    led_count.div_ceil(16).max(4)
}

pub fn encode(frame: &Frame, brightness: Brightness, out: &mut Vec<u8>) {
    let header = LED_START | (brightness.level() & BRIGHTNESS_MASK);
    out.extend_from_slice(&START_FRAME);
    for pixel in frame.pixels() {
        out.extend_from_slice(&[header, pixel.b, pixel.g, pixel.r]);
    }
    out.extend(iter::repeat_n(0xFF, end_frame_len(frame.len())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use smart_leds::RGB8;

    #[test]
    fn test_end_frame_len() {
        assert_eq!(end_frame_len(1), 4);
        assert_eq!(end_frame_len(10), 4);
        assert_eq!(end_frame_len(64), 4);
        assert_eq!(end_frame_len(65), 5);
    }

    #[test]
    fn test_encode_layout() {
        let mut frame = Frame::new(2).unwrap();
        frame.set(0, RGB8::new(0x11, 0x22, 0x33));
        frame.set(1, RGB8::new(0xAA, 0xBB, 0xCC));
        let mut out = Vec::new();
        encode(&frame, Brightness::new(7).unwrap(), &mut out);
        assert_eq!(
            out,
            vec![
                0x00, 0x00, 0x00, 0x00, //
                0xE7, 0x33, 0x22, 0x11, //
                0xE7, 0xCC, 0xBB, 0xAA, //
                0xFF, 0xFF, 0xFF, 0xFF,
            ]
        );
    }

    #[test]
    fn test_brightness_is_per_pixel_not_prescaled() {
        let mut frame = Frame::new(1).unwrap();
        frame.set(0, RGB8::new(255, 128, 1));
        let mut out = Vec::new();
        encode(&frame, Brightness::new(1).unwrap(), &mut out);
        assert_eq!(&out[4..8], &[0xE1, 1, 128, 255]);
    }
}
