//! WS281x output through the legacy BCM283x/BCM2711 PWM serializer.
//!
//! The PWM block runs in serializer mode: every 32-bit word pushed into its
//! FIFO is shifted out MSB first at the PWM clock. The GPIO, clock manager and
//! PWM register blocks are mapped from `/dev/mem`, so this needs root.

use std::fs::{File, OpenOptions};
use std::num::NonZeroUsize;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::ptr::NonNull;
use std::time::{Duration, Instant};
use std::{io, thread};

use log::debug;
use nix::sys::mman::{MapFlags, ProtFlags, mmap, munmap};

use crate::detect::{PinFunction, PwmPin};
use crate::driver::{DriverError, Transport, ws281x};

const BLOCK_SIZE: NonZeroUsize = NonZeroUsize::new(4096).unwrap();

const GPIO_OFFSET: u64 = 0x0020_0000;
const CLOCK_OFFSET: u64 = 0x0010_1000;
const PWM_OFFSET: u64 = 0x0020_C000;

// PWM registers
const PWM_CTL: usize = 0x00;
const PWM_STA: usize = 0x04;
const PWM_RNG1: usize = 0x10;
const PWM_FIF1: usize = 0x18;
const PWM_RNG2: usize = 0x20;

const CTL_PWEN1: u32 = 1 << 0;
const CTL_MODE1: u32 = 1 << 1;
const CTL_USEF1: u32 = 1 << 5;
const CTL_CLRF1: u32 = 1 << 6;
const CTL_PWEN2: u32 = 1 << 8;
const CTL_MODE2: u32 = 1 << 9;
const CTL_USEF2: u32 = 1 << 13;

const STA_FULL1: u32 = 1 << 0;
const STA_EMPT1: u32 = 1 << 1;
const STA_WERR1: u32 = 1 << 2;
const STA_RERR1: u32 = 1 << 3;
const STA_GAPO1: u32 = 1 << 4;
const STA_GAPO2: u32 = 1 << 5;
const STA_BERR: u32 = 1 << 8;
const STA_ERRORS: u32 = STA_WERR1 | STA_RERR1 | STA_GAPO1 | STA_GAPO2 | STA_BERR;

// Clock manager, PWM clock
const CM_PWMCTL: usize = 0xA0;
const CM_PWMDIV: usize = 0xA4;
const CM_PASSWORD: u32 = 0x5A00_0000;
const CM_SRC_OSC: u32 = 1;
const CM_ENAB: u32 = 1 << 4;
const CM_BUSY: u32 = 1 << 7;

const FIFO_TIMEOUT: Duration = Duration::from_millis(50);
const CLOCK_TIMEOUT: Duration = Duration::from_millis(10);

/// One 4KiB window of peripheral registers.
struct RegisterBlock {
    base: NonNull<u32>,
}

// The mapping is process-wide and only touched through &mut PwmFifo.
unsafe impl Send for RegisterBlock {}

impl RegisterBlock {
    fn map(mem: &File, address: u64) -> Result<Self, DriverError> {
        let offset = libc::off_t::try_from(address).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("peripheral address {address:#x} does not fit in off_t"),
            )
        })?;
        // SAFETY: mapping a fresh shared window of /dev/mem; nothing else in
        // this process aliases it.
        let base = unsafe {
            mmap(
                None,
                BLOCK_SIZE,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                mem,
                offset,
            )
        }
        .map_err(io::Error::from)?;
        Ok(Self { base: base.cast() })
    }

    fn read(&self, offset: usize) -> u32 {
        debug_assert!(offset < BLOCK_SIZE.get());
        // SAFETY: offset is a register within the mapped block.
        unsafe { self.base.as_ptr().add(offset / 4).read_volatile() }
    }

    fn write(&self, offset: usize, value: u32) {
        debug_assert!(offset < BLOCK_SIZE.get());
        // SAFETY: offset is a register within the mapped block.
        unsafe { self.base.as_ptr().add(offset / 4).write_volatile(value) }
    }

    fn wait_until(
        &self,
        offset: usize,
        timeout: Duration,
        done: impl Fn(u32) -> bool,
    ) -> Result<(), DriverError> {
        let deadline = Instant::now() + timeout;
        while !done(self.read(offset)) {
            if Instant::now() >= deadline {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("register {offset:#x} did not settle"),
                )
                .into());
            }
            std::hint::spin_loop();
        }
        Ok(())
    }
}

impl Drop for RegisterBlock {
    fn drop(&mut self) {
        // SAFETY: base/len are exactly what mmap returned.
        let _ = unsafe { munmap(self.base.cast(), BLOCK_SIZE.get()) };
    }
}

/// GPFSEL register offset and bit shift for a pin.
fn function_select(gpio: u8) -> (usize, u32) {
    let register = (gpio / 10) as usize * 4;
    let shift = (gpio % 10) as u32 * 3;
    (register, shift)
}

fn function_bits(function: PinFunction) -> u32 {
    match function {
        PinFunction::Alt0 => 0b100,
        PinFunction::Alt5 => 0b010,
    }
}

fn clock_divisor(oscillator_hz: u32) -> u32 {
    oscillator_hz / ws281x::PWM_CLOCK_HZ
}

/// Enable serializer mode fed from the FIFO for one channel.
fn channel_enable_bits(channel: u8) -> u32 {
    match channel {
        0 => CTL_PWEN1 | CTL_MODE1 | CTL_USEF1,
        _ => CTL_PWEN2 | CTL_MODE2 | CTL_USEF2,
    }
}

fn range_register(channel: u8) -> usize {
    match channel {
        0 => PWM_RNG1,
        _ => PWM_RNG2,
    }
}

pub struct PwmFifo {
    pwm: RegisterBlock,
    // Held so the clock and pin mux stay mapped for the driver's lifetime.
    _clock: RegisterBlock,
    _gpio: RegisterBlock,
}

impl PwmFifo {
    pub fn open(
        mem_path: &Path,
        pin: PwmPin,
        peripheral_base: u64,
        oscillator_hz: u32,
    ) -> Result<Self, DriverError> {
        let mem = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(mem_path)
            .map_err(|source| DriverError::Open {
                path: mem_path.display().to_string(),
                source,
            })?;

        let gpio = RegisterBlock::map(&mem, peripheral_base + GPIO_OFFSET)?;
        let clock = RegisterBlock::map(&mem, peripheral_base + CLOCK_OFFSET)?;
        let pwm = RegisterBlock::map(&mem, peripheral_base + PWM_OFFSET)?;

        // Stop PWM before touching its clock.
        pwm.write(PWM_CTL, 0);
        thread::sleep(Duration::from_micros(10));

        clock.write(CM_PWMCTL, CM_PASSWORD | CM_SRC_OSC);
        clock.wait_until(CM_PWMCTL, CLOCK_TIMEOUT, |v| v & CM_BUSY == 0)?;
        let divisor = clock_divisor(oscillator_hz);
        clock.write(CM_PWMDIV, CM_PASSWORD | (divisor << 12));
        clock.write(CM_PWMCTL, CM_PASSWORD | CM_SRC_OSC | CM_ENAB);
        clock.wait_until(CM_PWMCTL, CLOCK_TIMEOUT, |v| v & CM_BUSY != 0)?;
        debug!("PWM clock {oscillator_hz}Hz / {divisor}");

        let (fsel, shift) = function_select(pin.gpio);
        let value = gpio.read(fsel) & !(0b111 << shift);
        gpio.write(fsel, value | (function_bits(pin.function) << shift));

        pwm.write(range_register(pin.channel), 32);
        pwm.write(PWM_STA, STA_ERRORS);
        pwm.write(PWM_CTL, CTL_CLRF1);
        thread::sleep(Duration::from_micros(10));
        pwm.write(PWM_CTL, channel_enable_bits(pin.channel));
        debug!(
            "PWM channel {} enabled on GPIO{}",
            pin.channel + 1,
            pin.gpio
        );

        Ok(Self {
            pwm,
            _clock: clock,
            _gpio: gpio,
        })
    }
}

impl Transport for PwmFifo {
    fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        let status = self.pwm.read(PWM_STA);
        if status & STA_ERRORS != 0 {
            debug!("clearing PWM status errors {status:#x}");
            self.pwm.write(PWM_STA, STA_ERRORS);
        }
        for chunk in data.chunks(4) {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            self.pwm
                .wait_until(PWM_STA, FIFO_TIMEOUT, |v| v & STA_FULL1 == 0)?;
            self.pwm.write(PWM_FIF1, u32::from_be_bytes(word));
        }
        self.pwm
            .wait_until(PWM_STA, FIFO_TIMEOUT, |v| v & STA_EMPT1 != 0)
    }
}

impl Drop for PwmFifo {
    fn drop(&mut self) {
        self.pwm.write(PWM_CTL, 0);
    }
}
