//! Dedicated thread that owns the hub and feeds the virtual microphone.
//!
//! Driver requests block, so they never run on the async runtime. The
//! thread reports lifecycle changes to the main loop over a tokio channel
//! and stops when the shutdown flag is raised or the source runs dry.

use std::io::{ErrorKind, Read};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use audivis_core::{DeviceStatus, PumpStats, StatusObserver};
use audivis_vusb::{ControlChannel, Hub};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::service::{MicService, load_descriptor};
use crate::source::PcmSource;

/// Granularity of interruptible sleeps.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Handle to the device thread.
pub struct MicRuntime {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl MicRuntime {
    /// Spawn the device thread.
    ///
    /// # Errors
    /// Fails when the OS refuses to spawn the thread.
    pub fn spawn(config: Config) -> Result<(Self, mpsc::Receiver<DeviceStatus>)> {
        let (status_tx, status_rx) = mpsc::channel(32);
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&shutdown);

        let handle = thread::Builder::new()
            .name("vusb-runtime".to_string())
            .spawn(move || {
                let observer = |status: DeviceStatus| {
                    let _ = status_tx.blocking_send(status);
                };
                if let Err(e) = run(&config, &flag, &observer) {
                    error!(error = %format!("{e:#}"), "Virtual microphone runtime failed");
                    observer.notify(DeviceStatus::Failed { reason: format!("{e:#}") });
                }
            })
            .context("Failed to spawn vusb runtime thread")?;

        Ok((Self { shutdown, handle: Some(handle) }, status_rx))
    }

    /// Ask the thread to stop and wait for it to unplug the device.
    pub fn shutdown(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            error!("vusb runtime thread panicked");
        }
    }
}

fn run(config: &Config, shutdown: &AtomicBool, observer: &impl StatusObserver) -> Result<()> {
    let descriptor = load_descriptor(&config.device)?;
    let source = PcmSource::open(&config.stream)?;
    info!(source = %source.describe(), "PCM source opened");

    let hub = Hub::open()?;
    let stats = stream(&hub, config, &descriptor, source, shutdown, observer)?;
    info!(
        frames_submitted = stats.frames_submitted,
        backpressure_events = stats.backpressure_events,
        "Virtual microphone stopped"
    );
    Ok(())
}

/// Sleep for `duration`, waking early on shutdown. Returns `false` when
/// shutdown was requested.
fn sleep_unless_shutdown(duration: Duration, shutdown: &AtomicBool) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if shutdown.load(Ordering::Relaxed) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

/// Bring the microphone up on `hub` and feed it from `source` until the
/// source is exhausted or shutdown is requested.
///
/// Source bytes are only read once every complete frame has been accepted,
/// so at most one read chunk is buffered.
///
/// # Errors
/// Fails on bring-up errors, hard driver errors and source read errors.
/// The device is unplugged in every case.
pub fn stream<C: ControlChannel, R: Read>(
    hub: &Hub<C>,
    config: &Config,
    descriptor: &[u8],
    mut source: R,
    shutdown: &AtomicBool,
    observer: &impl StatusObserver,
) -> Result<PumpStats> {
    let mut service = MicService::bring_up(hub, &config.device, descriptor, observer)
        .context("Failed to bring up virtual microphone")?;

    let stream_config = &config.stream;
    let mut chunk = vec![0u8; stream_config.read_chunk];
    let mut exhausted = false;

    if sleep_unless_shutdown(stream_config.startup_delay(), shutdown) {
        while !shutdown.load(Ordering::Relaxed) {
            if !exhausted && service.pending_frames() == 0 {
                match source.read(&mut chunk) {
                    Ok(0) => {
                        exhausted = true;
                        debug!(leftover = service.pending_bytes(), "PCM source exhausted");
                        observer.notify(DeviceStatus::SourceExhausted);
                    }
                    Ok(n) => service.push(&chunk[..n]),
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e).context("Failed to read PCM source"),
                }
            }

            let report = service.deliver(observer).context("Audio submission failed")?;
            if report.backpressure.is_some() {
                sleep_unless_shutdown(stream_config.retry_delay(), shutdown);
            } else if exhausted && service.pending_frames() == 0 {
                break;
            }
        }
    }

    let stats = service.stats();
    service.shutdown(observer).context("Failed to unplug virtual microphone")?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use audivis_core::{DeviceId, FRAME_BYTES};
    use audivis_vusb::ControlCode;
    use audivis_vusb::mock::{MediaReply, MockChannel};
    use std::cell::RefCell;
    use std::io::Cursor;

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.stream.startup_delay_ms = 0;
        config.stream.retry_delay_ms = 0;
        config
    }

    #[test]
    fn test_streams_source_to_end() {
        let hub = Hub::with_channel(MockChannel::new().with_device(DeviceId(1)));
        let seen = RefCell::new(Vec::new());
        let observer = |s: DeviceStatus| seen.borrow_mut().push(s);
        let shutdown = AtomicBool::new(false);

        let pcm = vec![3u8; FRAME_BYTES * 5 + 100];
        let stats = stream(&hub, &fast_config(), &[], Cursor::new(pcm), &shutdown, &observer).unwrap();

        assert_eq!(stats.frames_submitted, 5);
        assert_eq!(hub.channel().requests_for(ControlCode::SUBMIT_AUDIO).len(), 5);
        let device_id = DeviceId(1);
        assert_eq!(
            *seen.borrow(),
            vec![
                DeviceStatus::Attached { device_id },
                DeviceStatus::PluggedIn { device_id },
                DeviceStatus::Streaming { device_id },
                DeviceStatus::SourceExhausted,
                DeviceStatus::Unplugged { device_id },
            ]
        );
    }

    #[test]
    fn test_backpressure_retries_same_frame() {
        let hub = Hub::with_channel(MockChannel::new().with_device(DeviceId(1)));
        hub.channel().push_media_reply(MediaReply::NoMoreItems);
        hub.channel().push_media_reply(MediaReply::Slots(3));
        let observer = |_: DeviceStatus| {};
        let shutdown = AtomicBool::new(false);

        let mut pcm = vec![1u8; FRAME_BYTES];
        pcm.extend_from_slice(&[2u8; FRAME_BYTES]);
        let stats = stream(&hub, &fast_config(), &[], Cursor::new(pcm), &shutdown, &observer).unwrap();

        assert_eq!(stats.frames_submitted, 2);
        assert_eq!(stats.backpressure_events, 2);

        // One aborted submission, then both frames in order
        let submissions = hub.channel().requests_for(ControlCode::SUBMIT_AUDIO);
        assert_eq!(submissions.len(), 3);
        let payload = |buf: &Vec<u8>| buf[buf.len() - FRAME_BYTES];
        assert_eq!(payload(&submissions[1]), 1);
        assert_eq!(payload(&submissions[2]), 2);
    }

    #[test]
    fn test_shutdown_before_streaming_still_unplugs() {
        let hub = Hub::with_channel(MockChannel::new().with_device(DeviceId(1)));
        let observer = |_: DeviceStatus| {};
        let shutdown = AtomicBool::new(true);

        let stats = stream(&hub, &Config::default(), &[], Cursor::new(vec![0u8; FRAME_BYTES]), &shutdown, &observer)
            .unwrap();

        assert_eq!(stats.frames_submitted, 0);
        let plug = hub.channel().requests_for(ControlCode::PLUG_STATE);
        assert_eq!(plug.len(), 2);
        assert_eq!(plug[1][8], 0);
    }

    #[test]
    fn test_hard_error_stops_stream() {
        let hub = Hub::with_channel(MockChannel::new().with_device(DeviceId(1)));
        hub.channel().fail_code(ControlCode::SUBMIT_AUDIO, 1167);
        let observer = |_: DeviceStatus| {};
        let shutdown = AtomicBool::new(false);

        let err = stream(&hub, &fast_config(), &[], Cursor::new(vec![0u8; FRAME_BYTES]), &shutdown, &observer)
            .unwrap_err();
        assert!(format!("{err:#}").contains("Audio submission failed"));
        // Dropping the service unplugged the device
        let plug = hub.channel().requests_for(ControlCode::PLUG_STATE);
        assert_eq!(plug.last().map(|r| r[8]), Some(0));
    }

    #[test]
    fn test_sleep_wakes_on_shutdown() {
        let shutdown = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless_shutdown(Duration::from_secs(10), &shutdown));
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(sleep_unless_shutdown(Duration::ZERO, &AtomicBool::new(false)));
    }
}
