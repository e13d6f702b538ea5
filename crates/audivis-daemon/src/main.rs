//! Audivis Daemon - virtual USB microphone feeder.
//!
//! Brings up a virtual microphone behind the virtual USB hub driver and
//! streams raw PCM into it from stdin or a file until the source ends or
//! the process is asked to stop.

use anyhow::{Context, Result, bail};
use audivis_core::DeviceStatus;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;
mod service;
mod signals;
mod source;

use runtime::MicRuntime;

fn init_logging(config: &config::DaemonConfig) -> Result<()> {
    let level = &config.log_level;
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("audivis_daemon={level}").parse()?)
        .add_directive(format!("audivis_vusb={level}").parse()?)
        .add_directive(format!("audivis_core={level}").parse()?);

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn log_status(status: &DeviceStatus) {
    match status {
        DeviceStatus::Attached { device_id } => info!(device = %device_id, "Attached to existing virtual device"),
        DeviceStatus::Created { device_id } => info!(device = %device_id, "Created virtual device"),
        DeviceStatus::PluggedIn { device_id } => info!(device = %device_id, "Virtual microphone is live"),
        DeviceStatus::Streaming { device_id } => info!(device = %device_id, "Audio is flowing"),
        DeviceStatus::SourceExhausted => info!("PCM source exhausted"),
        DeviceStatus::Unplugged { device_id } => info!(device = %device_id, "Virtual microphone unplugged"),
        DeviceStatus::Failed { reason } => error!(reason = %reason, "Virtual microphone failed"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::load_config()?;
    init_logging(&config.daemon)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting Audivis daemon");
    info!(
        device = %config.device.device_id,
        source = %config.stream.source,
        "Configuration loaded"
    );

    let mut shutdown_rx = signals::setup_signal_handlers();
    let (runtime, mut status_rx) = MicRuntime::spawn(config)?;

    let mut failure = None;
    loop {
        tokio::select! {
            status = status_rx.recv() => {
                let Some(status) = status else {
                    info!("Device runtime finished");
                    break;
                };
                log_status(&status);
                if let DeviceStatus::Failed { reason } = status {
                    failure = Some(reason);
                }
            }

            Some(signal) = shutdown_rx.recv() => {
                info!(%signal, "Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down...");
    tokio::task::spawn_blocking(move || runtime.shutdown())
        .await
        .context("Device runtime did not shut down cleanly")?;

    // Drain what the runtime reported while unplugging
    while let Ok(status) = status_rx.try_recv() {
        log_status(&status);
    }

    if let Some(reason) = failure {
        warn!("Audivis daemon stopped after a failure");
        bail!(reason);
    }
    info!("Audivis daemon stopped");
    Ok(())
}
