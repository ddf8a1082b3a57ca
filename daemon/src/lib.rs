pub mod config;
pub mod server;

use anyhow::{Context, Result};
use log::info;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wyoming_leds::controller::{EffectController, run_controller};
use wyoming_leds::detect::{SystemProbe, detect};
use wyoming_leds::driver::{Encoding, LedDriver, MemoryTransport};
use wyoming_leds::event::EventKind;

use crate::config::Config;

/// Detect the LED hardware and open the driver it calls for.
pub fn open_driver(config: &Config, probe: &SystemProbe) -> Result<LedDriver> {
    let profile = detect(probe, &config.output_request())
        .context("no usable LED output on this host")?;
    LedDriver::open(&profile, probe, config.led_count, config.brightness()?)
        .with_context(|| format!("failed to open {} LED output", profile.output.kind()))
}

/// A driver that renders into memory, for running without LED hardware.
pub fn dry_run_driver(config: &Config) -> Result<LedDriver> {
    let encoding = if config.respeaker {
        Encoding::Apa102
    } else {
        Encoding::Ws281xSpi
    };
    info!("dry run: rendering {encoding:?} frames to memory");
    Ok(LedDriver::new(
        encoding,
        config.led_count,
        config.brightness()?,
        Box::new(MemoryTransport::new()),
    )?)
}

pub fn run_effect_controller(
    task_tracker: &TaskTracker,
    controller: EffectController,
    events: mpsc::Receiver<EventKind>,
    shutdown_token: CancellationToken,
) {
    task_tracker.spawn(run_controller(controller, events, shutdown_token));
}
