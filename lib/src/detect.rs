//! Host capability detection.
//!
//! Runs once at startup and decides which LED output mechanism the process
//! will use for its lifetime. Detection only reads identification files and
//! checks for device nodes; it never opens hardware.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, info};
use thiserror::Error;

const MODEL_PATH: &str = "proc/device-tree/model";
const MEM_PATH: &str = "dev/mem";

/// SPI wiring used for WS281x strips driven straight off MOSI.
pub const WS281X_SPI_BUS: u8 = 0;
pub const WS281X_SPI_DEVICE: u8 = 0;
/// The ReSpeaker 2-mic HAT wires its APA102 LEDs to CE1.
pub const APA102_SPI_BUS: u8 = 0;
pub const APA102_SPI_DEVICE: u8 = 1;

#[derive(Error, Debug, PartialEq)]
pub enum DetectError {
    #[error("no usable LED output: SPI is disabled and {0} is unavailable")]
    NoUsableOutput(String),
    #[error("SPI device {0} not found (is SPI enabled in config.txt?)")]
    SpiUnavailable(String),
    #[error("GPIO registers unavailable: {0} not found")]
    GpioUnavailable(String),
    #[error("GPIO{0} cannot drive WS281x via PWM (use 12, 13, 18 or 19)")]
    UnsupportedPwmPin(u8),
}

/// The output mechanisms this crate can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    PwmGpio,
    DirectSpi,
    Apa102Spi,
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::PwmGpio => "pwm-gpio",
            OutputKind::DirectSpi => "direct-spi",
            OutputKind::Apa102Spi => "apa102-spi",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardFamily {
    /// A BCM283x/BCM2711 board with the legacy PWM block reachable via /dev/mem.
    Legacy {
        peripheral_base: u64,
        oscillator_hz: u32,
    },
    /// Raspberry Pi 5 and friends: peripherals live behind RP1, no legacy PWM.
    Rp1,
    Unknown,
}

impl BoardFamily {
    pub fn from_model(model: &str) -> Self {
        const BCM2711: BoardFamily = BoardFamily::Legacy {
            peripheral_base: 0xFE00_0000,
            oscillator_hz: 54_000_000,
        };
        const BCM2836: BoardFamily = BoardFamily::Legacy {
            peripheral_base: 0x3F00_0000,
            oscillator_hz: 19_200_000,
        };
        const BCM2835: BoardFamily = BoardFamily::Legacy {
            peripheral_base: 0x2000_0000,
            oscillator_hz: 19_200_000,
        };

        if !model.starts_with("Raspberry Pi") {
            return BoardFamily::Unknown;
        }
        let has = |needle: &str| model.contains(needle);
        if has("Raspberry Pi 5") || has("Compute Module 5") {
            BoardFamily::Rp1
        } else if has("Raspberry Pi 4") || has("Raspberry Pi 400") || has("Compute Module 4") {
            BCM2711
        } else if has("Raspberry Pi 3")
            || has("Raspberry Pi 2")
            || has("Zero 2")
            || has("Compute Module 3")
        {
            BCM2836
        } else {
            BCM2835
        }
    }

    pub fn has_legacy_pwm(&self) -> bool {
        matches!(self, BoardFamily::Legacy { .. })
    }
}

/// Which PWM channel a data pin is wired to, and the pin mux setting that
/// routes it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmPin {
    pub gpio: u8,
    pub channel: u8,
    pub function: PinFunction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinFunction {
    Alt0,
    Alt5,
}

impl PwmPin {
    pub fn for_gpio(gpio: u8) -> Option<Self> {
        let (channel, function) = match gpio {
            12 => (0, PinFunction::Alt0),
            13 => (1, PinFunction::Alt0),
            18 => (0, PinFunction::Alt5),
            19 => (1, PinFunction::Alt5),
            _ => return None,
        };
        Some(Self {
            gpio,
            channel,
            function,
        })
    }
}

/// The selected mechanism together with the bus/pin it will use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    PwmGpio {
        pin: PwmPin,
        peripheral_base: u64,
        oscillator_hz: u32,
    },
    DirectSpi {
        bus: u8,
        device: u8,
    },
    Apa102Spi {
        bus: u8,
        device: u8,
        power_pin: Option<u8>,
    },
}

impl Output {
    pub fn kind(&self) -> OutputKind {
        match self {
            Output::PwmGpio { .. } => OutputKind::PwmGpio,
            Output::DirectSpi { .. } => OutputKind::DirectSpi,
            Output::Apa102Spi { .. } => OutputKind::Apa102Spi,
        }
    }
}

/// What the operator asked for on the command line / config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputRequest {
    /// Use the ReSpeaker HAT's APA102 LEDs.
    pub apa102: bool,
    /// WS281x data pin, only meaningful for PWM output.
    pub data_pin: u8,
    /// APA102 power enable pin (active low).
    pub power_pin: Option<u8>,
}

impl Default for OutputRequest {
    fn default() -> Self {
        Self {
            apa102: false,
            data_pin: 18,
            power_pin: Some(12),
        }
    }
}

/// Interfaces found on the host, independent of what was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interfaces {
    pub ws281x_spi: bool,
    pub apa102_spi: bool,
    pub gpio_mem: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareProfile {
    pub model: Option<String>,
    pub family: BoardFamily,
    pub interfaces: Interfaces,
    pub output: Output,
}

impl HardwareProfile {
    /// Every mechanism whose prerequisites are present on this host.
    pub fn usable(&self) -> Vec<OutputKind> {
        let mut usable = Vec::new();
        if self.family.has_legacy_pwm() && self.interfaces.gpio_mem {
            usable.push(OutputKind::PwmGpio);
        }
        if self.interfaces.ws281x_spi {
            usable.push(OutputKind::DirectSpi);
        }
        if self.interfaces.apa102_spi {
            usable.push(OutputKind::Apa102Spi);
        }
        usable
    }
}

/// Reads host identification relative to a filesystem root, so detection can
/// be exercised against a fake tree.
#[derive(Debug, Clone)]
pub struct SystemProbe {
    root: PathBuf,
}

impl SystemProbe {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn host() -> Self {
        Self::new("/")
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    pub fn spidev_path(&self, bus: u8, device: u8) -> PathBuf {
        self.path(&format!("dev/spidev{bus}.{device}"))
    }

    pub fn model(&self) -> Option<String> {
        let raw = std::fs::read(self.path(MODEL_PATH)).ok()?;
        let model = String::from_utf8_lossy(&raw)
            .trim_end_matches('\0')
            .trim()
            .to_string();
        (!model.is_empty()).then_some(model)
    }

    pub fn interfaces(&self) -> Interfaces {
        Interfaces {
            ws281x_spi: self.spidev_path(WS281X_SPI_BUS, WS281X_SPI_DEVICE).exists(),
            apa102_spi: self.spidev_path(APA102_SPI_BUS, APA102_SPI_DEVICE).exists(),
            gpio_mem: self.path(MEM_PATH).exists(),
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

/// Inspect the host and pick exactly one output mechanism.
///
/// Preference: APA102 when explicitly requested, direct SPI on boards without
/// legacy PWM, PWM otherwise. A missing prerequisite for the chosen mechanism
/// is an error; there is no fallback.
pub fn detect(probe: &SystemProbe, request: &OutputRequest) -> Result<HardwareProfile, DetectError> {
    let model = probe.model();
    let family = model
        .as_deref()
        .map(BoardFamily::from_model)
        .unwrap_or(BoardFamily::Unknown);
    let interfaces = probe.interfaces();
    debug!("board model {model:?}, family {family:?}, interfaces {interfaces:?}");

    if !interfaces.ws281x_spi && !interfaces.apa102_spi && !interfaces.gpio_mem {
        return Err(DetectError::NoUsableOutput(display(&probe.path(MEM_PATH))));
    }

    let output = if request.apa102 {
        if !interfaces.apa102_spi {
            return Err(DetectError::SpiUnavailable(display(
                &probe.spidev_path(APA102_SPI_BUS, APA102_SPI_DEVICE),
            )));
        }
        Output::Apa102Spi {
            bus: APA102_SPI_BUS,
            device: APA102_SPI_DEVICE,
            power_pin: request.power_pin,
        }
    } else {
        match family {
            BoardFamily::Legacy {
                peripheral_base,
                oscillator_hz,
            } => {
                let pin = PwmPin::for_gpio(request.data_pin)
                    .ok_or(DetectError::UnsupportedPwmPin(request.data_pin))?;
                if !interfaces.gpio_mem {
                    return Err(DetectError::GpioUnavailable(display(&probe.path(MEM_PATH))));
                }
                Output::PwmGpio {
                    pin,
                    peripheral_base,
                    oscillator_hz,
                }
            }
            BoardFamily::Rp1 | BoardFamily::Unknown => {
                if !interfaces.ws281x_spi {
                    return Err(DetectError::SpiUnavailable(display(
                        &probe.spidev_path(WS281X_SPI_BUS, WS281X_SPI_DEVICE),
                    )));
                }
                Output::DirectSpi {
                    bus: WS281X_SPI_BUS,
                    device: WS281X_SPI_DEVICE,
                }
            }
        }
    };

    info!(
        "detected {}: using {} output",
        model.as_deref().unwrap_or("unknown board"),
        output.kind()
    );

    Ok(HardwareProfile {
        model,
        family,
        interfaces,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fake_host(model: Option<&str>, files: &[&str]) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        if let Some(model) = model {
            let path = dir.path().join(MODEL_PATH);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, format!("{model}\0")).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("dev")).unwrap();
        for file in files {
            std::fs::write(dir.path().join(file), "").unwrap();
        }
        dir
    }

    #[test]
    fn test_board_family_from_model() {
        assert_eq!(
            BoardFamily::from_model("Raspberry Pi 5 Model B Rev 1.0"),
            BoardFamily::Rp1
        );
        assert_eq!(
            BoardFamily::from_model("Raspberry Pi 4 Model B Rev 1.4"),
            BoardFamily::Legacy {
                peripheral_base: 0xFE00_0000,
                oscillator_hz: 54_000_000
            }
        );
        assert_eq!(
            BoardFamily::from_model("Raspberry Pi Zero 2 W Rev 1.0"),
            BoardFamily::Legacy {
                peripheral_base: 0x3F00_0000,
                oscillator_hz: 19_200_000
            }
        );
        assert_eq!(
            BoardFamily::from_model("Raspberry Pi Zero W Rev 1.1"),
            BoardFamily::Legacy {
                peripheral_base: 0x2000_0000,
                oscillator_hz: 19_200_000
            }
        );
        assert_eq!(BoardFamily::from_model("Pine64 PinePhone"), BoardFamily::Unknown);
    }

    #[test]
    fn test_model_strips_trailing_nul() {
        let host = fake_host(Some("Raspberry Pi 3 Model B Plus Rev 1.3"), &[]);
        let probe = SystemProbe::new(host.path());
        assert_eq!(
            probe.model().as_deref(),
            Some("Raspberry Pi 3 Model B Plus Rev 1.3")
        );
    }

    #[test]
    fn test_pi5_selects_direct_spi() {
        let host = fake_host(Some("Raspberry Pi 5 Model B Rev 1.0"), &["dev/spidev0.0"]);
        let profile = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap();
        assert_eq!(profile.output, Output::DirectSpi { bus: 0, device: 0 });
        assert_eq!(profile.usable(), vec![OutputKind::DirectSpi]);
    }

    #[test]
    fn test_pi5_without_spi_is_fatal() {
        let host = fake_host(Some("Raspberry Pi 5 Model B Rev 1.0"), &["dev/mem"]);
        let err = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap_err();
        assert!(matches!(err, DetectError::SpiUnavailable(path) if path.ends_with("spidev0.0")));
    }

    #[test]
    fn test_legacy_pi_selects_pwm() {
        let host = fake_host(
            Some("Raspberry Pi 4 Model B Rev 1.4"),
            &["dev/mem", "dev/spidev0.0"],
        );
        let profile = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap();
        assert_eq!(
            profile.output,
            Output::PwmGpio {
                pin: PwmPin {
                    gpio: 18,
                    channel: 0,
                    function: PinFunction::Alt5
                },
                peripheral_base: 0xFE00_0000,
                oscillator_hz: 54_000_000,
            }
        );
        assert_eq!(
            profile.usable(),
            vec![OutputKind::PwmGpio, OutputKind::DirectSpi]
        );
    }

    #[test]
    fn test_legacy_pi_without_gpio_is_fatal() {
        let host = fake_host(Some("Raspberry Pi 3 Model B Rev 1.2"), &["dev/spidev0.0"]);
        let err = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap_err();
        assert!(matches!(err, DetectError::GpioUnavailable(_)));
    }

    #[test]
    fn test_pwm_rejects_non_pwm_pin() {
        let host = fake_host(Some("Raspberry Pi 4 Model B Rev 1.4"), &["dev/mem"]);
        let request = OutputRequest {
            data_pin: 17,
            ..OutputRequest::default()
        };
        let err = detect(&SystemProbe::new(host.path()), &request).unwrap_err();
        assert_eq!(err, DetectError::UnsupportedPwmPin(17));
    }

    #[test]
    fn test_apa102_request_wins() {
        let host = fake_host(
            Some("Raspberry Pi 4 Model B Rev 1.4"),
            &["dev/mem", "dev/spidev0.0", "dev/spidev0.1"],
        );
        let request = OutputRequest {
            apa102: true,
            ..OutputRequest::default()
        };
        let profile = detect(&SystemProbe::new(host.path()), &request).unwrap();
        assert_eq!(
            profile.output,
            Output::Apa102Spi {
                bus: 0,
                device: 1,
                power_pin: Some(12)
            }
        );
    }

    #[test]
    fn test_apa102_request_without_spi_is_fatal() {
        let host = fake_host(Some("Raspberry Pi 4 Model B Rev 1.4"), &["dev/mem"]);
        let request = OutputRequest {
            apa102: true,
            ..OutputRequest::default()
        };
        let err = detect(&SystemProbe::new(host.path()), &request).unwrap_err();
        assert!(matches!(err, DetectError::SpiUnavailable(path) if path.ends_with("spidev0.1")));
    }

    #[test]
    fn test_no_spi_and_no_gpio_fails() {
        let host = fake_host(Some("Raspberry Pi 4 Model B Rev 1.4"), &[]);
        let err = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap_err();
        assert!(matches!(err, DetectError::NoUsableOutput(_)));
    }

    #[test]
    fn test_unknown_board_uses_spi() {
        let host = fake_host(None, &["dev/spidev0.0"]);
        let profile = detect(&SystemProbe::new(host.path()), &OutputRequest::default()).unwrap();
        assert_eq!(profile.family, BoardFamily::Unknown);
        assert_eq!(profile.output.kind(), OutputKind::DirectSpi);
    }
}
