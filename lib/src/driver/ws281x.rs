//! WS281x bit-stream encoders.
//!
//! A WS281x bit is a 1.25µs period whose high time encodes the value: about
//! 0.3µs for a 0 and about 0.9µs for a 1. Colors go out green, red, blue,
//! most significant bit first, and the strip latches after the line is held
//! low for the reset interval.
//!
//! Both encoders produce that waveform by oversampling: each protocol bit is
//! expanded into a few output bits clocked out by the peripheral.

use std::iter;

use crate::frame::{Brightness, Frame};

/// Hold-low time after a frame. The datasheets ask for 50µs; newer WS2812B
/// revisions need 280µs.
pub const RESET_US: u32 = 300;

/// SPI clock for the direct-SPI encoding: 4 SPI bits per protocol bit.
pub const SPI_CLOCK_HZ: u32 = 3_200_000;

/// Two protocol bits per SPI byte. `0 -> 1000`, `1 -> 1110`.
const SPI_LOOKUP: [u8; 4] = [0x88, 0x8E, 0xE8, 0xEE];

pub const SPI_RESET_BYTES: usize = (RESET_US as u64 * SPI_CLOCK_HZ as u64 / 8 / 1_000_000) as usize;

/// PWM serializer clock: 3 PWM bits per protocol bit.
pub const PWM_CLOCK_HZ: u32 = 2_400_000;

const PWM_ONE: u32 = 0b110;
const PWM_ZERO: u32 = 0b100;
const PWM_SYMBOL_BITS: u32 = 3;

pub const PWM_RESET_BITS: u32 = (RESET_US as u64 * PWM_CLOCK_HZ as u64 / 1_000_000) as u32;

fn wire_bytes(frame: &Frame, brightness: Brightness) -> impl Iterator<Item = u8> + '_ {
    frame.pixels().iter().flat_map(move |pixel| {
        let c = brightness.scale(*pixel);
        [c.g, c.r, c.b]
    })
}

/// Encode as an SPI byte stream followed by the reset tail.
pub fn encode_spi(frame: &Frame, brightness: Brightness, out: &mut Vec<u8>) {
    for byte in wire_bytes(frame, brightness) {
        for shift in [6, 4, 2, 0] {
            out.push(SPI_LOOKUP[((byte >> shift) & 0b11) as usize]);
        }
    }
    out.extend(iter::repeat_n(0, SPI_RESET_BYTES));
}

/// Packs bits MSB-first into 32-bit words, the unit the PWM FIFO takes.
struct WordWriter<'a> {
    out: &'a mut Vec<u8>,
    word: u32,
    bits: u32,
}

impl<'a> WordWriter<'a> {
    fn new(out: &'a mut Vec<u8>) -> Self {
        Self {
            out,
            word: 0,
            bits: 0,
        }
    }

    fn push(&mut self, value: u32, width: u32) {
        for i in (0..width).rev() {
            self.word = (self.word << 1) | ((value >> i) & 1);
            self.bits += 1;
            if self.bits == 32 {
                self.out.extend_from_slice(&self.word.to_be_bytes());
                self.word = 0;
                self.bits = 0;
            }
        }
    }

    fn finish(self) {
        if self.bits > 0 {
            let word = self.word << (32 - self.bits);
            self.out.extend_from_slice(&word.to_be_bytes());
        }
    }
}

/// Encode as PWM serializer words (big-endian bytes), ending low for at least
/// the reset interval. The output length is always a multiple of 4.
pub fn encode_pwm(frame: &Frame, brightness: Brightness, out: &mut Vec<u8>) {
    let mut writer = WordWriter::new(out);
    for byte in wire_bytes(frame, brightness) {
        for i in (0..8).rev() {
            let symbol = if (byte >> i) & 1 == 1 { PWM_ONE } else { PWM_ZERO };
            writer.push(symbol, PWM_SYMBOL_BITS);
        }
    }
    for _ in 0..PWM_RESET_BITS {
        writer.push(0, 1);
    }
    writer.finish();
}
