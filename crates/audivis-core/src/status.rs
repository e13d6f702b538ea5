//! Device lifecycle notifications.
//!
//! The device runtime reports availability changes through a
//! [`StatusObserver`]; the daemon forwards them into its event loop.

use serde::{Deserialize, Serialize};

use crate::endpoint::DeviceId;

/// A change in virtual device availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "data")]
pub enum DeviceStatus {
    /// Attached to a device that already existed in the driver
    Attached { device_id: DeviceId },
    /// A new device was created by the driver
    Created { device_id: DeviceId },
    /// Endpoints configured and device plugged in
    PluggedIn { device_id: DeviceId },
    /// The first frame was accepted by the driver
    Streaming { device_id: DeviceId },
    /// The PCM source reached its end
    SourceExhausted,
    /// Device unplugged from the host
    Unplugged { device_id: DeviceId },
    /// Bring-up or streaming failed
    Failed { reason: String },
}

/// Receiver of [`DeviceStatus`] notifications.
pub trait StatusObserver {
    fn notify(&self, status: DeviceStatus);
}

impl<F> StatusObserver for F
where
    F: Fn(DeviceStatus),
{
    fn notify(&self, status: DeviceStatus) {
        self(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_closure_observer_receives_events() {
        let seen = RefCell::new(Vec::new());
        let observer = |status: DeviceStatus| seen.borrow_mut().push(status);

        observer.notify(DeviceStatus::Created { device_id: DeviceId(3) });
        observer.notify(DeviceStatus::SourceExhausted);

        assert_eq!(
            *seen.borrow(),
            vec![DeviceStatus::Created { device_id: DeviceId(3) }, DeviceStatus::SourceExhausted]
        );
    }
}
