//! The device registry: one open handle to the virtual USB hub driver.

use std::fmt;

use audivis_core::{DeviceId, EndpointAddress};
use tracing::{debug, info, warn};

use crate::channel::{ControlChannel, ControlCode};
use crate::descriptor::CREATE_HEADER_LEN;
use crate::device::VirtualDevice;
use crate::error::{VusbError, VusbResult};
use crate::{naming, protocol};

/// How [`Hub::open_or_create`] obtained its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// The device already existed in the driver
    Attached,
    /// The driver created a new device
    Created,
}

/// Owner of the driver control channel.
///
/// Devices borrow the hub, so the channel stays open for as long as any
/// device handle is alive. Dropping the hub closes the channel.
pub struct Hub<C: ControlChannel> {
    channel: C,
}

impl<C: ControlChannel> Hub<C> {
    /// Wrap an already open channel.
    #[must_use]
    pub fn with_channel(channel: C) -> Self {
        Self { channel }
    }

    /// The underlying channel.
    #[must_use]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    /// Ask the driver to create a device from a create request (see
    /// [`descriptor::create_request`](crate::descriptor::create_request)).
    ///
    /// # Errors
    /// Fails when the request is shorter than its header, when the driver
    /// rejects it, or when the device's notification events cannot be
    /// created.
    pub fn create_device(&self, descriptor: &[u8]) -> VusbResult<VirtualDevice<'_, C>> {
        if descriptor.len() < CREATE_HEADER_LEN {
            return Err(VusbError::DescriptorTooShort { actual: descriptor.len(), minimum: CREATE_HEADER_LEN });
        }

        let mut buf = descriptor.to_vec();
        self.channel.request_inout(ControlCode::CREATE_DEVICE, &mut buf)?;
        let id = protocol::decode_created_device_id(&buf)
            .ok_or(VusbError::DescriptorTooShort { actual: buf.len(), minimum: CREATE_HEADER_LEN })?;

        let control = self.channel.create_event(Some(&naming::control_event_name(id)))?;
        let cancel = self.channel.create_event(Some(&naming::cancel_event_name(id)))?;

        info!(device = %id, "Virtual device created");
        Ok(VirtualDevice::new(&self.channel, id, Some(control), Some(cancel)))
    }

    /// Attach to a device the driver already knows about. No request is
    /// sent, so this never fails; use [`device_exists`](Self::device_exists)
    /// to check first.
    ///
    /// Notification events that cannot be created under their global name
    /// are replaced by anonymous ones, or left out.
    pub fn open_device(&self, id: DeviceId) -> VirtualDevice<'_, C> {
        let control = self.device_event(&naming::control_event_name(id));
        let cancel = self.device_event(&naming::cancel_event_name(id));
        debug!(device = %id, "Attached to virtual device");
        VirtualDevice::new(&self.channel, id, control, cancel)
    }

    fn device_event(&self, name: &str) -> Option<C::Event> {
        match self.channel.create_event(Some(name)) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(name, error = %e, "Named event unavailable, using an anonymous one");
                self.channel
                    .create_event(None)
                    .inspect_err(|e| warn!(error = %e, "Failed to create anonymous event"))
                    .ok()
            }
        }
    }

    /// Check whether `id` names a live device by configuring the audio
    /// endpoint on it. Any failure reads as absent.
    pub fn device_exists(&self, id: DeviceId) -> bool {
        let mut device = self.open_device(id);
        match device.configure_endpoints(&[EndpointAddress::AUDIO_IN]) {
            Ok(()) => true,
            Err(e) => {
                debug!(device = %id, error = %e, "Device existence check failed");
                false
            }
        }
    }

    /// Attach to `id` if it exists, otherwise create a device from
    /// `descriptor`.
    ///
    /// # Errors
    /// Propagates [`create_device`](Self::create_device) failures.
    pub fn open_or_create(&self, id: DeviceId, descriptor: &[u8]) -> VusbResult<(VirtualDevice<'_, C>, Provenance)> {
        if self.device_exists(id) {
            return Ok((self.open_device(id), Provenance::Attached));
        }
        let device = self.create_device(descriptor)?;
        Ok((device, Provenance::Created))
    }

    /// Close the driver channel.
    pub fn close(self) {
        debug!("Closing virtual USB hub");
    }
}

impl<C: ControlChannel + fmt::Debug> fmt::Debug for Hub<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hub").field("channel", &self.channel).finish()
    }
}
