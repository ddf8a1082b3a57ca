use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info};

use crate::driver::DriverError;

const EXPORT_RETRIES: u32 = 10;
const EXPORT_RETRY_DELAY: Duration = Duration::from_millis(20);

/// An active-low LED power enable line, driven through sysfs GPIO.
#[derive(Debug)]
pub struct PowerPin {
    dir: PathBuf,
    pin: u8,
}

/// The sysfs number of the SoC's first GPIO. Newer kernels no longer start
/// the main pinctrl chip at 0.
fn chip_base(sysfs: &Path) -> u32 {
    let Ok(entries) = fs::read_dir(sysfs) else {
        return 0;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_chip = entry.file_name().to_string_lossy().starts_with("gpiochip");
        if !is_chip {
            continue;
        }
        let label = fs::read_to_string(path.join("label")).unwrap_or_default();
        if !label.trim().starts_with("pinctrl-") {
            continue;
        }
        if let Some(base) = fs::read_to_string(path.join("base"))
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return base;
        }
    }
    0
}

fn write_attr(path: &Path, value: &str) -> Result<(), DriverError> {
    fs::write(path, value).map_err(|source| DriverError::Open {
        path: path.display().to_string(),
        source,
    })
}

impl PowerPin {
    /// Export `pin` and configure it as an output. The pin is left in
    /// whatever state it had; call [`PowerPin::set`] to drive it.
    pub fn export(sysfs: &Path, pin: u8) -> Result<Self, DriverError> {
        let number = chip_base(sysfs) + u32::from(pin);
        let dir = sysfs.join(format!("gpio{number}"));
        if !dir.exists() {
            write_attr(&sysfs.join("export"), &number.to_string())?;
        }

        // udev fixes up permissions on the new attributes asynchronously.
        let direction = dir.join("direction");
        let mut attempt = 0;
        loop {
            match write_attr(&direction, "out") {
                Ok(()) => break,
                Err(e) if attempt + 1 >= EXPORT_RETRIES => return Err(e),
                Err(e) => {
                    debug!("GPIO{pin} not ready yet: {e}");
                    attempt += 1;
                    thread::sleep(EXPORT_RETRY_DELAY);
                }
            }
        }
        info!("exported LED power pin GPIO{pin} as gpio{number}");
        Ok(Self { dir, pin })
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Switch LED power. The line is active low.
    pub fn set(&self, on: bool) -> Result<(), DriverError> {
        write_attr(&self.dir.join("value"), if on { "0" } else { "1" })
    }
}
