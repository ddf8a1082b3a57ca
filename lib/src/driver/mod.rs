//! The LED driver: an in-memory [`Frame`] plus one of three wire encodings,
//! pushed to hardware through a [`Transport`].
//!
//! Only [`LedDriver::render`] performs I/O. Everything else mutates the frame.

use std::path::Path;

use log::{info, warn};
use smart_leds::RGB8;
use thiserror::Error;

use crate::detect::{HardwareProfile, Output, SystemProbe};
use crate::frame::{BLACK, Brightness, Frame};

pub mod apa102;
pub mod gpio;
pub mod memory;
pub mod pwm;
pub mod spidev;
pub mod ws281x;

pub use gpio::PowerPin;
pub use memory::MemoryTransport;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("LED index {index} out of range for {len} LEDs")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("LED count must be between 1 and 10, got {0}")]
    InvalidLedCount(usize),
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        source: std::io::Error,
    },
    #[error("LED write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Physical output for an encoded frame.
///
/// A transport is opened once and owned by the driver for the lifetime of the
/// process. `write` sends one complete frame and returns once the hardware has
/// accepted it.
pub trait Transport: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), DriverError>;
}

/// The wire format the frame is serialized to on every render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// WS281x bit-stream through the PWM serializer.
    Ws281xPwm,
    /// WS281x bit-stream generated as SPI bytes.
    Ws281xSpi,
    /// APA102 frames over SPI, brightness embedded per pixel.
    Apa102,
}

impl Encoding {
    pub fn encode(self, frame: &Frame, brightness: Brightness, out: &mut Vec<u8>) {
        match self {
            Encoding::Ws281xPwm => ws281x::encode_pwm(frame, brightness, out),
            Encoding::Ws281xSpi => ws281x::encode_spi(frame, brightness, out),
            Encoding::Apa102 => apa102::encode(frame, brightness, out),
        }
    }
}

pub struct LedDriver {
    frame: Frame,
    brightness: Brightness,
    encoding: Encoding,
    transport: Box<dyn Transport>,
    power: Option<PowerPin>,
    buffer: Vec<u8>,
}

impl LedDriver {
    pub fn new(
        encoding: Encoding,
        led_count: usize,
        brightness: Brightness,
        transport: Box<dyn Transport>,
    ) -> Result<Self, DriverError> {
        let frame = Frame::new(led_count).ok_or(DriverError::InvalidLedCount(led_count))?;
        Ok(Self {
            frame,
            brightness,
            encoding,
            transport,
            power: None,
            buffer: Vec::new(),
        })
    }

    /// Open the hardware selected by `profile`.
    pub fn open(
        profile: &HardwareProfile,
        probe: &SystemProbe,
        led_count: usize,
        brightness: Brightness,
    ) -> Result<Self, DriverError> {
        match &profile.output {
            Output::PwmGpio {
                pin,
                peripheral_base,
                oscillator_hz,
            } => {
                let fifo = pwm::PwmFifo::open(
                    &probe.path("dev/mem"),
                    *pin,
                    *peripheral_base,
                    *oscillator_hz,
                )?;
                info!("driving {led_count} WS281x LEDs on GPIO{} via PWM", pin.gpio);
                Self::new(Encoding::Ws281xPwm, led_count, brightness, Box::new(fifo))
            }
            Output::DirectSpi { bus, device } => {
                let spi =
                    spidev::SpiDevice::open(&probe.spidev_path(*bus, *device), ws281x::SPI_CLOCK_HZ)?;
                info!("driving {led_count} WS281x LEDs via spidev{bus}.{device}");
                Self::new(Encoding::Ws281xSpi, led_count, brightness, Box::new(spi))
            }
            Output::Apa102Spi {
                bus,
                device,
                power_pin,
            } => {
                let spi =
                    spidev::SpiDevice::open(&probe.spidev_path(*bus, *device), apa102::SPI_CLOCK_HZ)?;
                info!("driving {led_count} APA102 LEDs via spidev{bus}.{device}");
                let mut driver = Self::new(Encoding::Apa102, led_count, brightness, Box::new(spi))?;
                if let Some(pin) = power_pin {
                    driver.power = power_on(&probe.path("sys/class/gpio"), *pin);
                }
                Ok(driver)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.frame.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.is_empty()
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn brightness(&self) -> Brightness {
        self.brightness
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    pub fn set_pixel(&mut self, index: usize, color: RGB8) -> Result<(), DriverError> {
        if self.frame.set(index, color) {
            Ok(())
        } else {
            Err(DriverError::IndexOutOfRange {
                index,
                len: self.frame.len(),
            })
        }
    }

    pub fn set_all(&mut self, color: RGB8) {
        self.frame.fill(color);
    }

    pub fn clear(&mut self) {
        self.set_all(BLACK);
    }

    /// Encode the frame at the configured brightness and push it out.
    pub fn render(&mut self) -> Result<(), DriverError> {
        self.buffer.clear();
        self.encoding
            .encode(&self.frame, self.brightness, &mut self.buffer);
        self.transport.write(&self.buffer)
    }

    /// Blank the LEDs and cut their power. Used once on process exit.
    pub fn shutdown(&mut self) {
        self.clear();
        if let Err(e) = self.render() {
            warn!("failed to blank LEDs on shutdown: {e}");
        }
        if let Some(power) = self.power.take()
            && let Err(e) = power.set(false)
        {
            warn!("failed to switch off LED power: {e}");
        }
    }
}

/// Enable LED power on `pin`. Failures only warn: the LEDs may already be
/// powered, and SPI output works regardless.
fn power_on(sysfs: &Path, pin: u8) -> Option<PowerPin> {
    let power = match PowerPin::export(sysfs, pin) {
        Ok(power) => power,
        Err(e) => {
            warn!("LED power control on GPIO{pin} disabled: {e}");
            return None;
        }
    };
    if let Err(e) = power.set(true) {
        warn!("failed to switch on LED power on GPIO{pin}: {e}");
    }
    Some(power)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn driver(encoding: Encoding, count: usize) -> (LedDriver, MemoryTransport) {
        let transport = MemoryTransport::new();
        let driver = LedDriver::new(
            encoding,
            count,
            Brightness::FULL,
            Box::new(transport.clone()),
        )
        .unwrap();
        (driver, transport)
    }

    #[test]
    fn test_power_on_failures_only_warn() {
        let sysfs = tempfile::tempdir().unwrap();
        assert!(power_on(sysfs.path(), 12).is_none());

        // exported, but the value attribute can't be written
        let gpio = sysfs.path().join("gpio12");
        fs::create_dir_all(gpio.join("value")).unwrap();
        let power = power_on(sysfs.path(), 12).unwrap();
        assert_eq!(power.pin(), 12);
        assert_eq!(fs::read_to_string(gpio.join("direction")).unwrap(), "out");
    }

    #[test]
    fn test_power_on_drives_pin_low() {
        let sysfs = tempfile::tempdir().unwrap();
        fs::create_dir(sysfs.path().join("gpio12")).unwrap();
        assert!(power_on(sysfs.path(), 12).is_some());
        assert_eq!(
            fs::read_to_string(sysfs.path().join("gpio12/value")).unwrap(),
            "0"
        );
    }

    #[test]
    fn test_invalid_led_count() {
        let result = LedDriver::new(
            Encoding::Ws281xSpi,
            11,
            Brightness::FULL,
            Box::new(MemoryTransport::new()),
        );
        assert!(matches!(result, Err(DriverError::InvalidLedCount(11))));
    }

    #[test]
    fn test_set_pixel_out_of_range_is_error() {
        let (mut driver, _) = driver(Encoding::Ws281xSpi, 3);
        let err = driver.set_pixel(3, RGB8::new(255, 0, 0)).unwrap_err();
        assert!(matches!(err, DriverError::IndexOutOfRange { index: 3, len: 3 }));
        assert!(driver.frame().is_black());
    }

    #[test]
    fn test_mutations_do_not_render() {
        let (mut driver, transport) = driver(Encoding::Apa102, 2);
        driver.set_pixel(0, RGB8::new(1, 2, 3)).unwrap();
        driver.set_all(RGB8::new(4, 5, 6));
        driver.clear();
        assert_eq!(transport.write_count(), 0);
        driver.render().unwrap();
        assert_eq!(transport.write_count(), 1);
    }

    #[test]
    fn test_render_failure_surfaces_as_io() {
        let (mut driver, transport) = driver(Encoding::Ws281xPwm, 1);
        transport.set_failing(true);
        assert!(matches!(driver.render(), Err(DriverError::Io(_))));
        transport.set_failing(false);
        assert!(driver.render().is_ok());
    }

    #[test]
    fn test_shutdown_blanks_frame() {
        let (mut driver, transport) = driver(Encoding::Apa102, 2);
        driver.set_all(RGB8::new(255, 255, 255));
        driver.render().unwrap();
        driver.shutdown();
        assert!(driver.frame().is_black());
        let last = transport.last_write().unwrap();
        let mut black = Vec::new();
        apa102::encode(driver.frame(), Brightness::FULL, &mut black);
        assert_eq!(last, black);
    }
}
