use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use tokio::select;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use wyoming_leds::controller::EffectController;
use wyoming_leds::detect::SystemProbe;
use wyoming_leds_daemon::config::{LedArgs, parse_config};
use wyoming_leds_daemon::server::{EventListener, run_event_server};
use wyoming_leds_daemon::{dry_run_driver, open_driver, run_effect_controller};

/// Events buffered between the listener and the controller.
const EVENT_QUEUE_DEPTH: usize = 32;

#[derive(Parser, Debug)]
#[command(version, about = "Wyoming LED service for Raspberry Pi")]
struct Args {
    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// unix:// or tcp:// address to listen on
    #[arg(long)]
    uri: Option<String>,

    /// Log DEBUG messages
    #[arg(long)]
    debug: bool,

    /// Render to memory instead of LED hardware
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    leds: LedArgs,
}

fn run_shutdown_handler(task_tracker: &TaskTracker, shutdown_token: CancellationToken) {
    task_tracker.spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                shutdown_token.cancel();
                return;
            }
        };
        select! {
            _ = shutdown_token.cancelled() => return,
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!("failed to wait for SIGINT: {e}");
                }
                info!("received SIGINT, shutting down");
            }
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
        shutdown_token.cancel();
    });
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let file_config = match &args.config {
        Some(path) => parse_config(path)?,
        None => None,
    };
    let config_missing = args.config.is_some() && file_config.is_none();
    let mut config = file_config.unwrap_or_default();
    if let Some(uri) = &args.uri {
        config.uri = uri.clone();
    }
    config.debug |= args.debug;
    args.leds.apply(&mut config);

    let level = if config.debug {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    wyoming_leds::init_logging(level);
    if config_missing
        && let Some(path) = &args.config
    {
        warn!("config file {} not found, using defaults", path.display());
    }

    config.validate().context("invalid configuration")?;
    let uri = config.listen_uri()?;
    let driver = if args.dry_run {
        dry_run_driver(&config)?
    } else {
        open_driver(&config, &SystemProbe::host())?
    };
    let controller = EffectController::new(driver, config.effect_table());

    let listener = EventListener::bind(&uri)
        .await
        .with_context(|| format!("failed to listen on {uri}"))?;

    let task_tracker = TaskTracker::new();
    let shutdown_token = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

    run_effect_controller(&task_tracker, controller, event_rx, shutdown_token.clone());
    run_event_server(&task_tracker, listener, event_tx, shutdown_token.clone());
    run_shutdown_handler(&task_tracker, shutdown_token.clone());

    task_tracker.close();
    task_tracker.wait().await;

    info!("LEDs off, exiting");
    Ok(())
}
