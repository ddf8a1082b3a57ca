use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;

use log::debug;

use crate::driver::{DriverError, Transport};

const SPI_IOC_MAGIC: u8 = b'k';
const SPI_MODE_0: u8 = 0;

nix::ioctl_write_ptr!(spi_write_mode, SPI_IOC_MAGIC, 1, u8);
nix::ioctl_write_ptr!(spi_write_bits_per_word, SPI_IOC_MAGIC, 3, u8);
nix::ioctl_write_ptr!(spi_write_max_speed_hz, SPI_IOC_MAGIC, 4, u32);

/// A Linux spidev node configured for mode 0, 8-bit words.
///
/// Each frame goes out as a single `write`, which spidev turns into one
/// transfer with chip select held for its whole length.
pub struct SpiDevice {
    file: File,
}

impl SpiDevice {
    pub fn open(path: &Path, speed_hz: u32) -> Result<Self, DriverError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| DriverError::Open {
                path: path.display().to_string(),
                source,
            })?;

        let fd = file.as_raw_fd();
        let bits_per_word: u8 = 8;
        // SAFETY: fd is a valid open spidev descriptor and every argument
        // points at a live value of the size the ioctl expects.
        unsafe {
            spi_write_mode(fd, &SPI_MODE_0).map_err(std::io::Error::from)?;
            spi_write_bits_per_word(fd, &bits_per_word).map_err(std::io::Error::from)?;
            spi_write_max_speed_hz(fd, &speed_hz).map_err(std::io::Error::from)?;
        }
        debug!("opened {} at {speed_hz}Hz", path.display());

        Ok(Self { file })
    }
}

impl Transport for SpiDevice {
    fn write(&mut self, data: &[u8]) -> Result<(), DriverError> {
        self.file.write_all(data)?;
        Ok(())
    }
}
