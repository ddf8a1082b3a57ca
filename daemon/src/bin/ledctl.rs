//! Set the LEDs by hand, using the same detection and config as the daemon.
//!
//! Stop the daemon first; both need exclusive use of the LED hardware.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use wyoming_leds::RGB8;
use wyoming_leds::detect::SystemProbe;
use wyoming_leds_daemon::config::{LedArgs, parse_config};
use wyoming_leds_daemon::open_driver;

#[derive(Parser, Debug)]
#[command(version, about = "LED controller for Raspberry Pi")]
struct Cli {
    /// Path to the daemon's TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log DEBUG messages
    #[arg(long)]
    debug: bool,

    #[command(flatten)]
    leds: LedArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Set one LED to a color
    Set {
        /// LED index, starting at 0
        led: usize,
        r: u8,
        g: u8,
        b: u8,
    },
    /// Set every LED to a color
    All { r: u8, g: u8, b: u8 },
    /// Turn every LED off
    Clear,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => parse_config(path)?.unwrap_or_default(),
        None => Default::default(),
    };
    cli.leds.apply(&mut config);

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    wyoming_leds::init_logging(level);

    config.validate().context("invalid configuration")?;
    let mut driver = open_driver(&config, &SystemProbe::host())?;

    match cli.command {
        Command::Set { led, r, g, b } => driver
            .set_pixel(led, RGB8::new(r, g, b))
            .with_context(|| format!("can't set LED {led}"))?,
        Command::All { r, g, b } => driver.set_all(RGB8::new(r, g, b)),
        Command::Clear => driver.clear(),
    }
    driver.render().context("failed to update LEDs")?;
    info!("{:?} applied", cli.command);
    Ok(())
}
