//! Device identifiers, endpoint addresses and endpoint types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum number of entries in one endpoint configuration request; the
/// request carries the count in a single byte.
pub const MAX_ENDPOINTS: usize = u8::MAX as usize;

/// Driver-assigned identifier of a virtual device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Raw value as carried on the wire.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}", self.0)
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

/// Transfer direction of an endpoint, relative to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// 8-bit USB endpoint address. The high bit selects the IN direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    /// Streaming endpoint of the virtual microphone (IN, number 1).
    pub const AUDIO_IN: Self = Self(0x81);

    const DIRECTION_IN: u8 = 0x80;

    /// Raw address byte.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Endpoint direction.
    #[must_use]
    pub const fn direction(self) -> Direction {
        if self.0 & Self::DIRECTION_IN != 0 { Direction::In } else { Direction::Out }
    }

    /// Whether this is an IN (device to host) endpoint.
    #[must_use]
    pub const fn is_in(self) -> bool {
        matches!(self.direction(), Direction::In)
    }

    /// Endpoint number without the direction bit.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0 & 0x0F
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

impl From<u8> for EndpointAddress {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}

/// Driver-defined transfer type, associated positionally with a configured
/// endpoint. The values are opaque to this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointType(pub i32);

impl EndpointType {
    /// Type used for the microphone's streaming endpoint.
    pub const AUDIO_STREAM: Self = Self(2);

    /// Raw value as carried on the wire.
    #[must_use]
    pub const fn get(self) -> i32 {
        self.0
    }
}

impl From<i32> for EndpointType {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

/// Check an endpoint address list before it is encoded.
///
/// # Errors
/// Returns an error if the list is empty or longer than [`MAX_ENDPOINTS`].
pub fn validate_endpoints(endpoints: &[EndpointAddress]) -> Result<()> {
    if endpoints.is_empty() {
        return Err(Error::EmptyEndpointList);
    }
    check_count(endpoints.len())
}

/// Check an endpoint type list before it is encoded.
///
/// # Errors
/// Returns an error if the list is empty or longer than [`MAX_ENDPOINTS`].
pub fn validate_endpoint_types(types: &[EndpointType]) -> Result<()> {
    if types.is_empty() {
        return Err(Error::EmptyEndpointTypeList);
    }
    check_count(types.len())
}

fn check_count(count: usize) -> Result<()> {
    if count > MAX_ENDPOINTS {
        return Err(Error::TooManyEntries { count, limit: MAX_ENDPOINTS });
    }
    Ok(())
}
