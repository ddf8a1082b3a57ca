use std::path::Path;

use clap::Args;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wyoming_leds::detect::OutputRequest;
use wyoming_leds::effect::{EffectTable, Palette, Timing};
use wyoming_leds::frame::{Brightness, MAX_BRIGHTNESS, MAX_LEDS};

use crate::server::ListenUri;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("led_count must be between 1 and 10, got {0}")]
    LedCount(usize),
    #[error("led_brightness must be between 1 and 31, got {0}")]
    Brightness(u8),
    #[error("invalid uri {0:?}: expected tcp://host:port or unix:///path")]
    Uri(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub uri: String,
    pub debug: bool,
    pub led_count: usize,
    pub led_brightness: u8,
    /// WS281x data pin. Only used with PWM output.
    pub led_pin: u8,
    pub respeaker: bool,
    /// ReSpeaker LED power enable pin, active low.
    pub respeaker_pin: u8,
    pub colors: Palette,
    pub timing: Timing,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            uri: "tcp://0.0.0.0:10500".to_string(),
            debug: false,
            led_count: 3,
            led_brightness: MAX_BRIGHTNESS,
            led_pin: 18,
            respeaker: false,
            respeaker_pin: 12,
            colors: Palette::default(),
            timing: Timing::default(),
        }
    }
}

/// LED options shared by the daemon and `ledctl`. Anything given here wins
/// over the config file.
#[derive(Args, Debug, Default, Clone)]
pub struct LedArgs {
    /// Number of LEDs to control (1-10)
    #[arg(long)]
    pub led_count: Option<usize>,

    /// LED brightness (1-31)
    #[arg(long)]
    pub led_brightness: Option<u8>,

    /// GPIO pin for WS281x data (12, 13, 18 or 19 for PWM output)
    #[arg(long)]
    pub led_pin: Option<u8>,

    /// Use the ReSpeaker HAT's APA102 LEDs
    #[arg(long)]
    pub respeaker: bool,

    /// GPIO pin that powers the ReSpeaker LEDs
    #[arg(long)]
    pub respeaker_pin: Option<u8>,
}

impl LedArgs {
    pub fn apply(&self, config: &mut Config) {
        if let Some(count) = self.led_count {
            config.led_count = count;
        }
        if let Some(brightness) = self.led_brightness {
            config.led_brightness = brightness;
        }
        if let Some(pin) = self.led_pin {
            config.led_pin = pin;
        }
        if self.respeaker {
            config.respeaker = true;
        }
        if let Some(pin) = self.respeaker_pin {
            config.respeaker_pin = pin;
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_LEDS).contains(&self.led_count) {
            return Err(ConfigError::LedCount(self.led_count));
        }
        self.brightness()?;
        self.listen_uri()?;
        Ok(())
    }

    pub fn brightness(&self) -> Result<Brightness, ConfigError> {
        Brightness::new(self.led_brightness).ok_or(ConfigError::Brightness(self.led_brightness))
    }

    pub fn listen_uri(&self) -> Result<ListenUri, ConfigError> {
        self.uri.parse()
    }

    pub fn output_request(&self) -> OutputRequest {
        OutputRequest {
            apa102: self.respeaker,
            data_pin: self.led_pin,
            power_pin: Some(self.respeaker_pin),
        }
    }

    pub fn effect_table(&self) -> EffectTable {
        EffectTable::new(&self.colors, &self.timing)
    }
}

/// Load a TOML config. A missing file yields `None` so the caller can fall
/// back to defaults; any other failure is an error.
pub fn parse_config<P>(path: P) -> Result<Option<Config>, ConfigError>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.display().to_string(),
                source,
            });
        }
    };
    Ok(Some(toml::from_str(&text)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.output_request(), OutputRequest::default());
    }

    #[test]
    fn test_parse_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
uri = "unix:///run/wyoming-leds.sock"
led_count = 10
respeaker = true

[colors]
wake = [0, 128, 255]

[timing]
flash_count = 5
"#,
        )
        .unwrap();

        let config = parse_config(&path).unwrap().unwrap();
        assert_eq!(config.led_count, 10);
        assert!(config.respeaker);
        assert_eq!(config.led_brightness, 31);
        assert_eq!(config.colors.wake, [0, 128, 255]);
        assert_eq!(config.colors.listening, Palette::default().listening);
        assert_eq!(config.timing.flash_count, 5);
        assert_eq!(config.timing.wake_ms, 1000);
        config.validate().unwrap();
    }

    #[test]
    fn test_missing_config_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_config(dir.path().join("nope.toml")).unwrap().is_none());
    }

    #[test]
    fn test_bad_toml_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "led_count = \"three\"").unwrap();
        assert!(matches!(parse_config(&path), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = Config {
            led_count: 4,
            led_pin: 12,
            ..Config::default()
        };
        let args = LedArgs {
            led_count: Some(7),
            respeaker: true,
            respeaker_pin: Some(5),
            ..LedArgs::default()
        };
        args.apply(&mut config);
        assert_eq!(config.led_count, 7);
        assert_eq!(config.led_pin, 12);
        assert_eq!(
            config.output_request(),
            OutputRequest {
                apa102: true,
                data_pin: 12,
                power_pin: Some(5),
            }
        );
    }

    #[test]
    fn test_validate_ranges() {
        let too_many = Config {
            led_count: 11,
            ..Config::default()
        };
        assert!(matches!(too_many.validate(), Err(ConfigError::LedCount(11))));

        let none = Config {
            led_count: 0,
            ..Config::default()
        };
        assert!(matches!(none.validate(), Err(ConfigError::LedCount(0))));

        let dark = Config {
            led_brightness: 0,
            ..Config::default()
        };
        assert!(matches!(dark.validate(), Err(ConfigError::Brightness(0))));

        let bright = Config {
            led_brightness: 32,
            ..Config::default()
        };
        assert!(matches!(bright.validate(), Err(ConfigError::Brightness(32))));

        let bad_uri = Config {
            uri: "http://localhost".to_string(),
            ..Config::default()
        };
        assert!(matches!(bad_uri.validate(), Err(ConfigError::Uri(_))));
    }
}
