//! Placeholder channel for platforms without the hub driver.

use std::convert::Infallible;

use crate::channel::{ControlChannel, ControlCode};
use crate::error::{VusbError, VusbResult};

/// A channel that can never be opened.
#[derive(Debug)]
pub enum UnsupportedChannel {}

impl UnsupportedChannel {
    /// # Errors
    /// Always returns [`VusbError::Registry`].
    pub fn open() -> VusbResult<Self> {
        Err(VusbError::Registry(format!("virtual USB hub is not available on {}", std::env::consts::OS)))
    }
}

impl ControlChannel for UnsupportedChannel {
    type Event = Infallible;

    fn request(&self, _code: ControlCode, _input: &[u8]) -> VusbResult<()> {
        match *self {}
    }

    fn request_inout(&self, _code: ControlCode, _buf: &mut [u8]) -> VusbResult<usize> {
        match *self {}
    }

    fn create_event(&self, _name: Option<&str>) -> VusbResult<Infallible> {
        match *self {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_open_reports_registry_error() {
        assert_matches!(UnsupportedChannel::open(), Err(VusbError::Registry(_)));
    }
}
