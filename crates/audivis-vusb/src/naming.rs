//! Names of the global notification events the driver looks up.
//!
//! Device ids are rendered as at least four upper-case hex digits, endpoint
//! addresses as two.

use audivis_core::{DeviceId, EndpointAddress};

const PREFIX: &str = r"Global\Pcvudhc";

/// Event signaled when a control-endpoint request is available.
#[must_use]
pub fn control_event_name(device_id: DeviceId) -> String {
    format!("{PREFIX}ControlEndpointRequestAvailableNotification{:04X}", device_id.get())
}

/// Device-level event that shares the IN-endpoint name stem. The driver
/// uses it to cancel outstanding requests.
#[must_use]
pub fn cancel_event_name(device_id: DeviceId) -> String {
    format!("{PREFIX}InEndpointRequestAvailableNotification{:04X}", device_id.get())
}

/// Per-endpoint request notification. The stem follows the endpoint's
/// direction.
#[must_use]
pub fn endpoint_event_name(device_id: DeviceId, endpoint: EndpointAddress) -> String {
    let stem = if endpoint.is_in() { "In" } else { "Out" };
    format!(
        "{PREFIX}{stem}EndpointRequestAvailableNotification{:04X}{:02X}",
        device_id.get(),
        endpoint.get()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_event_names() {
        assert_eq!(
            control_event_name(DeviceId(1)),
            r"Global\PcvudhcControlEndpointRequestAvailableNotification0001"
        );
        assert_eq!(
            cancel_event_name(DeviceId(0x2A)),
            r"Global\PcvudhcInEndpointRequestAvailableNotification002A"
        );
    }

    #[test]
    fn test_endpoint_event_names_follow_direction() {
        assert_eq!(
            endpoint_event_name(DeviceId(1), EndpointAddress(0x81)),
            r"Global\PcvudhcInEndpointRequestAvailableNotification000181"
        );
        assert_eq!(
            endpoint_event_name(DeviceId(1), EndpointAddress(0x02)),
            r"Global\PcvudhcOutEndpointRequestAvailableNotification000102"
        );
    }

    #[test]
    fn test_wide_device_ids_are_not_truncated() {
        assert!(control_event_name(DeviceId(0x1_0000)).ends_with("10000"));
    }
}
