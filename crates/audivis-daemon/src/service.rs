//! Virtual microphone bring-up and frame delivery.

use anyhow::{Context, Result};
use audivis_core::{DeviceStatus, DrainReport, FramePump, PumpStats, StatusObserver};
use audivis_vusb::{ControlChannel, Hub, Provenance, VirtualDevice, VusbResult, default_microphone_descriptor};
use tracing::{info, warn};

use crate::config::DeviceConfig;

/// Create request to use for a new device: the configured file, or the
/// built-in microphone.
///
/// # Errors
/// Fails when the configured descriptor file cannot be read.
pub fn load_descriptor(config: &DeviceConfig) -> Result<Vec<u8>> {
    match &config.descriptor_path {
        Some(path) => std::fs::read(path).with_context(|| format!("Failed to read device descriptor: {path:?}")),
        None => Ok(default_microphone_descriptor()),
    }
}

/// A plugged-in virtual microphone and its pending PCM.
///
/// The device is unplugged when the service is shut down or dropped,
/// unless `unplug_on_exit` is off.
pub struct MicService<'h, C: ControlChannel> {
    device: VirtualDevice<'h, C>,
    pump: FramePump,
    unplug_on_exit: bool,
    streaming: bool,
}

impl<'h, C: ControlChannel> MicService<'h, C> {
    /// Attach to the configured device, or create one from `descriptor`,
    /// then configure its endpoints and plug it in.
    ///
    /// # Errors
    /// Propagates the first failing driver request.
    pub fn bring_up(
        hub: &'h Hub<C>,
        config: &DeviceConfig,
        descriptor: &[u8],
        observer: &impl StatusObserver,
    ) -> VusbResult<Self> {
        let (mut device, provenance) = hub.open_or_create(config.device_id, descriptor)?;
        let device_id = device.id();
        match provenance {
            Provenance::Attached => observer.notify(DeviceStatus::Attached { device_id }),
            Provenance::Created => observer.notify(DeviceStatus::Created { device_id }),
        }

        device.configure_endpoints(&config.endpoints)?;
        device.configure_endpoint_types(&config.endpoint_types)?;
        device.plug_in()?;
        info!(device = %device_id, ?provenance, "Virtual microphone plugged in");
        observer.notify(DeviceStatus::PluggedIn { device_id });

        Ok(Self { device, pump: FramePump::new(), unplug_on_exit: config.unplug_on_exit, streaming: false })
    }

    #[must_use]
    pub fn device(&self) -> &VirtualDevice<'h, C> {
        &self.device
    }

    /// Queue PCM bytes for delivery.
    pub fn push(&mut self, bytes: &[u8]) {
        self.pump.push(bytes);
    }

    #[must_use]
    pub fn pending_frames(&self) -> usize {
        self.pump.pending_frames()
    }

    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pump.pending_bytes()
    }

    #[must_use]
    pub fn stats(&self) -> PumpStats {
        self.pump.stats()
    }

    /// Deliver queued frames until the driver pushes back.
    ///
    /// # Errors
    /// Propagates hard driver failures.
    pub fn deliver(&mut self, observer: &impl StatusObserver) -> VusbResult<DrainReport> {
        let report = self.pump.drain(&mut self.device)?;
        if report.submitted > 0 && !self.streaming {
            self.streaming = true;
            observer.notify(DeviceStatus::Streaming { device_id: self.device.id() });
        }
        Ok(report)
    }

    /// Unplug (when configured to) and close the device.
    ///
    /// # Errors
    /// Returns the unplug failure; the device is closed either way.
    pub fn shutdown(mut self, observer: &impl StatusObserver) -> VusbResult<()> {
        let unplugged = self.finish();
        if let Ok(true) = unplugged {
            observer.notify(DeviceStatus::Unplugged { device_id: self.device.id() });
        }
        unplugged.map(|_| ())
    }

    fn finish(&mut self) -> VusbResult<bool> {
        if self.device.state().is_closed() {
            return Ok(false);
        }
        let result = if self.unplug_on_exit && self.device.state().is_plugged_in() {
            self.device.unplug().map(|()| true)
        } else {
            Ok(false)
        };
        self.device.close();
        result
    }
}

impl<C: ControlChannel> Drop for MicService<'_, C> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!(device = %self.device.id(), error = %e, "Failed to unplug virtual microphone");
        }
    }
}
