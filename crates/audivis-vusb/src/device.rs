//! A virtual device living behind the hub.

use std::fmt;

use audivis_core::{
    AudioFrame, BackpressureReason, DeviceId, DeviceState, EndpointAddress, EndpointType, FrameSink, Submission,
    Transition,
};
use tracing::{debug, info, trace, warn};

use crate::channel::{ControlChannel, ControlCode};
use crate::error::{VusbError, VusbResult};
use crate::{naming, protocol};

/// Handle to one virtual device.
///
/// The device borrows the hub's channel, so it cannot outlive the hub. All
/// operations are synchronous control requests; audio submissions take
/// `&mut self` and are therefore serialized per device.
pub struct VirtualDevice<'h, C: ControlChannel> {
    channel: &'h C,
    id: DeviceId,
    state: DeviceState,
    endpoints: Vec<EndpointAddress>,
    control_event: Option<C::Event>,
    cancel_event: Option<C::Event>,
}

impl<'h, C: ControlChannel> VirtualDevice<'h, C> {
    pub(crate) fn new(
        channel: &'h C,
        id: DeviceId,
        control_event: Option<C::Event>,
        cancel_event: Option<C::Event>,
    ) -> Self {
        Self { channel, id, state: DeviceState::default(), endpoints: Vec::new(), control_event, cancel_event }
    }

    /// Driver-assigned device id.
    #[must_use]
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Endpoints from the last successful configuration.
    #[must_use]
    pub fn endpoints(&self) -> &[EndpointAddress] {
        &self.endpoints
    }

    /// Whether both device-level notification events are held.
    #[must_use]
    pub fn has_events(&self) -> bool {
        self.control_event.is_some() && self.cancel_event.is_some()
    }

    fn begin(&self, transition: Transition) -> VusbResult<DeviceState> {
        if self.state.is_closed() {
            return Err(VusbError::DeviceClosed(self.id));
        }
        Ok(self.state.next(transition)?)
    }

    /// Declare the device's endpoint addresses.
    ///
    /// A notification event is created for each endpoint once the driver
    /// accepted the list; failing to create one is logged and ignored.
    ///
    /// # Errors
    /// Returns a validation error for an empty or oversized list, or when
    /// the device is plugged in or closed, and a control error when the
    /// driver rejects the request.
    pub fn configure_endpoints(&mut self, endpoints: &[EndpointAddress]) -> VusbResult<()> {
        let next = self.begin(Transition::ConfigureEndpoints)?;
        let request = protocol::encode_configure_endpoints(self.id, endpoints)?;

        self.channel.request(ControlCode::CONFIGURE_ENDPOINTS, &request)?;

        for &endpoint in endpoints {
            self.announce_endpoint(endpoint);
        }
        self.endpoints = endpoints.to_vec();
        self.state = next;
        debug!(device = %self.id, count = endpoints.len(), "Endpoints configured");
        Ok(())
    }

    fn announce_endpoint(&self, endpoint: EndpointAddress) {
        let name = naming::endpoint_event_name(self.id, endpoint);
        // Not retained
        if let Err(e) = self.channel.create_event(Some(&name)) {
            warn!(device = %self.id, %endpoint, error = %e, "Failed to create endpoint notification event");
        }
    }

    /// Declare the transfer type of each configured endpoint, in the same
    /// order as [`configure_endpoints`](Self::configure_endpoints).
    ///
    /// # Errors
    /// Returns a validation error for an empty list, a list whose length
    /// differs from the configured endpoints, or a call made before the
    /// endpoints were configured, and a control error when the driver
    /// rejects the request.
    pub fn configure_endpoint_types(&mut self, types: &[EndpointType]) -> VusbResult<()> {
        let next = self.begin(Transition::ConfigureEndpointTypes)?;
        let request = protocol::encode_configure_endpoint_types(self.id, types)?;
        if types.len() != self.endpoints.len() {
            return Err(audivis_core::Error::EndpointTypeMismatch {
                endpoints: self.endpoints.len(),
                types: types.len(),
            }
            .into());
        }

        self.channel.request(ControlCode::CONFIGURE_ENDPOINT_TYPES, &request)?;

        self.state = next;
        debug!(device = %self.id, count = types.len(), "Endpoint types configured");
        Ok(())
    }

    /// Make the device visible to the host OS.
    ///
    /// # Errors
    /// Fails when no endpoints are configured, when the device is closed,
    /// or when the driver rejects the request.
    pub fn plug_in(&mut self) -> VusbResult<()> {
        self.set_plug_state(true)
    }

    /// Detach the device from the host OS. Configuration is kept.
    ///
    /// # Errors
    /// Fails when the device is closed or the driver rejects the request.
    pub fn unplug(&mut self) -> VusbResult<()> {
        self.set_plug_state(false)
    }

    fn set_plug_state(&mut self, plugged_in: bool) -> VusbResult<()> {
        let transition = if plugged_in { Transition::PlugIn } else { Transition::Unplug };
        let next = self.begin(transition)?;

        let record = protocol::encode_plug_state(self.id, plugged_in);
        self.channel.request(ControlCode::PLUG_STATE, &record)?;

        self.state = next;
        info!(device = %self.id, plugged_in, "Plug state changed");
        Ok(())
    }

    /// Submit one frame of raw PCM bytes.
    ///
    /// # Errors
    /// Returns a validation error without touching the driver unless `data`
    /// is exactly one frame long. Otherwise as [`submit_frame`](Self::submit_frame).
    pub fn submit_audio_data(&mut self, data: &[u8]) -> VusbResult<Submission> {
        let frame = AudioFrame::from_slice(data)?;
        self.submit_frame(&frame)
    }

    /// Submit one frame.
    ///
    /// The driver is first asked how many packet slots are free. An empty
    /// queue yields [`BackpressureReason::QueueFull`] and nothing is sent.
    /// Otherwise the submission is always sent to complete the pending
    /// request, but it only carries the frame when at least ten slots are
    /// free; with fewer the result is
    /// [`BackpressureReason::InsufficientSlots`] and the caller retries.
    ///
    /// # Errors
    /// Fails when the device is not plugged in or is closed, when the
    /// driver offers more slots than were requested, or when either request
    /// is rejected for a reason other than an empty queue.
    pub fn submit_frame(&mut self, frame: &AudioFrame) -> VusbResult<Submission> {
        self.begin(Transition::SubmitAudio)?;

        let mut query = protocol::encode_media_query(self.id);
        match self.channel.request_inout(ControlCode::QUERY_MEDIA, &mut query) {
            Ok(_) => {}
            Err(e) if e.is_no_more_items() => {
                trace!(device = %self.id, "Driver queue full");
                return Ok(Submission::Backpressure(BackpressureReason::QueueFull));
            }
            Err(e) => return Err(e),
        }

        let media = protocol::decode_media_query(&query);
        if media.exceeds_request() {
            warn!(device = %self.id, slots = media.available_slots, "Driver offered more slots than requested");
            return Err(VusbError::SlotOverflow { reported: media.available_slots, requested: protocol::FRAME_SLOTS });
        }
        let submission = protocol::encode_audio_submission(self.id, media, frame);
        self.channel.request(ControlCode::SUBMIT_AUDIO, &submission)?;

        if !media.has_room_for_frame() {
            trace!(device = %self.id, slots = media.available_slots, "Not enough packet slots");
            return Ok(Submission::Backpressure(BackpressureReason::InsufficientSlots {
                available: media.available_slots,
            }));
        }
        Ok(Submission::Accepted)
    }

    /// Release the device's notification events. Every later call fails
    /// with [`VusbError::DeviceClosed`]. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.control_event = None;
        self.cancel_event = None;
        self.state = DeviceState::Closed;
        debug!(device = %self.id, "Device closed");
    }
}

impl<C: ControlChannel> FrameSink for VirtualDevice<'_, C> {
    type Error = VusbError;

    fn submit_frame(&mut self, frame: &AudioFrame) -> VusbResult<Submission> {
        VirtualDevice::submit_frame(self, frame)
    }
}

impl<C: ControlChannel> fmt::Debug for VirtualDevice<'_, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDevice")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("endpoints", &self.endpoints)
            .field("has_events", &self.has_events())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Hub;
    use crate::mock::{MediaReply, MockChannel};
    use crate::protocol::{ERROR_NO_MORE_ITEMS, STATUS_UNSUCCESSFUL};
    use assert_matches::assert_matches;
    use audivis_core::FRAME_BYTES;
    use proptest::prelude::*;

    fn plugged_in(hub: &Hub<MockChannel>) -> VirtualDevice<'_, MockChannel> {
        let mut device = hub.open_device(DeviceId(1));
        device.configure_endpoints(&[EndpointAddress::AUDIO_IN]).unwrap();
        device.configure_endpoint_types(&[EndpointType::AUDIO_STREAM]).unwrap();
        device.plug_in().unwrap();
        hub.channel().clear_requests();
        device
    }

    fn hub() -> Hub<MockChannel> {
        Hub::with_channel(MockChannel::new().with_device(DeviceId(1)))
    }

    #[test]
    fn test_configure_endpoints_sends_one_request() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        device.configure_endpoints(&[EndpointAddress(0x81)]).unwrap();

        let sent = hub.channel().requests_for(ControlCode::CONFIGURE_ENDPOINTS);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 10);
        assert_eq!(sent[0][8], 1);
        assert_eq!(sent[0][9], 0x81);
        assert_eq!(device.state(), DeviceState::EndpointsSet);
        assert_eq!(device.endpoints(), &[EndpointAddress(0x81)]);
    }

    #[test]
    fn test_configure_endpoints_announces_each_endpoint() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        let before = hub.channel().live_events();
        device.configure_endpoints(&[EndpointAddress(0x81), EndpointAddress(0x02)]).unwrap();

        let names = hub.channel().event_names();
        assert!(names.iter().any(|n| n.ends_with("InEndpointRequestAvailableNotification000181")));
        assert!(names.iter().any(|n| n.ends_with("OutEndpointRequestAvailableNotification000102")));
        // Endpoint events are not held
        assert_eq!(hub.channel().live_events(), before);
    }

    #[test]
    fn test_endpoint_event_failure_is_not_fatal() {
        let hub = hub();
        hub.channel().fail_events_named(r"Global\PcvudhcOutEndpoint");
        let mut device = hub.open_device(DeviceId(1));
        assert!(device.configure_endpoints(&[EndpointAddress(0x02)]).is_ok());
    }

    #[test]
    fn test_empty_endpoint_list_issues_no_request() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        assert_matches!(
            device.configure_endpoints(&[]),
            Err(VusbError::Validation(audivis_core::Error::EmptyEndpointList))
        );
        assert!(hub.channel().requests().is_empty());
        assert_eq!(device.state(), DeviceState::Unconfigured);
    }

    #[test]
    fn test_driver_rejection_keeps_state() {
        let hub = hub();
        hub.channel().fail_code(ControlCode::CONFIGURE_ENDPOINTS, 31);
        let mut device = hub.open_device(DeviceId(1));

        let err = device.configure_endpoints(&[EndpointAddress::AUDIO_IN]).unwrap_err();
        assert_matches!(err, VusbError::Control { code: ControlCode::CONFIGURE_ENDPOINTS, os_error: 31 });
        assert_eq!(device.state(), DeviceState::Unconfigured);
        assert!(device.endpoints().is_empty());
    }

    #[test]
    fn test_endpoint_types_must_match_endpoints() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        device.configure_endpoints(&[EndpointAddress::AUDIO_IN]).unwrap();

        let err = device.configure_endpoint_types(&[EndpointType(2), EndpointType(2)]).unwrap_err();
        assert_matches!(
            err,
            VusbError::Validation(audivis_core::Error::EndpointTypeMismatch { endpoints: 1, types: 2 })
        );
        assert!(hub.channel().requests_for(ControlCode::CONFIGURE_ENDPOINT_TYPES).is_empty());
    }

    #[test]
    fn test_endpoint_type_request_layout() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        device.configure_endpoints(&[EndpointAddress::AUDIO_IN]).unwrap();
        device.configure_endpoint_types(&[EndpointType::AUDIO_STREAM]).unwrap();

        let sent = hub.channel().requests_for(ControlCode::CONFIGURE_ENDPOINT_TYPES);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].len(), 13);
        assert_eq!(sent[0][8], 1);
        assert_eq!(i32::from_ne_bytes(sent[0][9..13].try_into().unwrap()), 2);
        assert_eq!(device.state(), DeviceState::TypesSet);
    }

    #[test]
    fn test_plug_round_trip() {
        let hub = hub();
        let mut device = plugged_in(&hub);

        device.unplug().unwrap();
        assert_eq!(device.state(), DeviceState::Unplugged);
        device.plug_in().unwrap();
        assert_eq!(device.state(), DeviceState::PluggedIn);

        let records = hub.channel().requests_for(ControlCode::PLUG_STATE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].len(), 16);
        assert_eq!(records[0][8], 0);
        assert_eq!(records[1][8], 1);
        // Identical apart from the flag
        assert_eq!(records[0][..8], records[1][..8]);
        assert_eq!(records[0][9..], records[1][9..]);
    }

    #[test]
    fn test_plug_in_without_endpoints_fails() {
        let hub = hub();
        let mut device = hub.open_device(DeviceId(1));
        assert_matches!(
            device.plug_in(),
            Err(VusbError::Validation(audivis_core::Error::InvalidTransition { .. }))
        );
        assert!(hub.channel().requests().is_empty());
    }

    #[test]
    fn test_submission_with_room_is_accepted() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::Slots(10));

        let result = device.submit_audio_data(&[0x11; FRAME_BYTES]).unwrap();
        assert_eq!(result, Submission::Accepted);

        let requests = hub.channel().requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].code, ControlCode::QUERY_MEDIA);
        assert_eq!(requests[1].code, ControlCode::SUBMIT_AUDIO);
        let submission = &requests[1].input;
        assert_eq!(submission.len(), 12 * 10 + 1001);
        assert!(submission[161..].iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_submission_echoes_query_tag() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        device.submit_frame(&AudioFrame::silence()).unwrap();

        let tag = hub.channel().last_media_tag().unwrap();
        let submission = hub.channel().requests_for(ControlCode::SUBMIT_AUDIO).pop().unwrap();
        assert_eq!(u32::from_ne_bytes(submission[9..13].try_into().unwrap()), tag);
    }

    #[test]
    fn test_wrong_frame_length_issues_no_request() {
        let hub = hub();
        let mut device = plugged_in(&hub);

        for len in [0, 959, 961, 1920] {
            let data = vec![0u8; len];
            assert_matches!(
                device.submit_audio_data(&data),
                Err(VusbError::Validation(audivis_core::Error::InvalidFrameLength { expected: 960, .. }))
            );
        }
        assert!(hub.channel().requests().is_empty());
    }

    #[test]
    fn test_empty_queue_is_backpressure() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::NoMoreItems);

        let result = device.submit_frame(&AudioFrame::silence()).unwrap();
        assert_eq!(result, Submission::Backpressure(BackpressureReason::QueueFull));
        // Nothing submitted
        assert!(hub.channel().requests_for(ControlCode::SUBMIT_AUDIO).is_empty());
    }

    #[test]
    fn test_query_failure_is_an_error() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::Fail(1167));

        assert_matches!(
            device.submit_frame(&AudioFrame::silence()),
            Err(VusbError::Control { code: ControlCode::QUERY_MEDIA, os_error: 1167 })
        );
    }

    #[test]
    fn test_insufficient_slots_completes_request_without_payload() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::Slots(4));

        let result = device.submit_frame(&AudioFrame::from([0x22; FRAME_BYTES])).unwrap();
        assert_eq!(result, Submission::Backpressure(BackpressureReason::InsufficientSlots { available: 4 }));

        let submission = hub.channel().requests_for(ControlCode::SUBMIT_AUDIO).pop().unwrap();
        assert_eq!(submission.len(), 12 * 4 + 1001);
        assert_eq!(u32::from_ne_bytes(submission[13..17].try_into().unwrap()), STATUS_UNSUCCESSFUL);
        assert!(!submission.contains(&0x22));
    }

    #[test]
    fn test_oversized_slot_count_is_rejected() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::Slots(1_000_000));

        assert_matches!(
            device.submit_frame(&AudioFrame::silence()),
            Err(VusbError::SlotOverflow { reported: 1_000_000, requested: 10 })
        );
        assert!(hub.channel().requests_for(ControlCode::SUBMIT_AUDIO).is_empty());
        assert_eq!(device.state(), DeviceState::PluggedIn);

        hub.channel().push_media_reply(MediaReply::Slots(11));
        assert_matches!(device.submit_frame(&AudioFrame::silence()), Err(VusbError::SlotOverflow { reported: 11, .. }));
    }

    #[test]
    fn test_submit_requires_plugged_in() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        device.unplug().unwrap();
        hub.channel().clear_requests();

        assert_matches!(
            device.submit_frame(&AudioFrame::silence()),
            Err(VusbError::Validation(audivis_core::Error::InvalidTransition { .. }))
        );
        assert!(hub.channel().requests().is_empty());
    }

    #[test]
    fn test_close_releases_events_and_rejects_calls() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        assert!(device.has_events());
        let live = hub.channel().live_events();

        device.close();
        assert!(!device.has_events());
        assert_eq!(hub.channel().live_events(), live - 2);
        device.close();

        assert_matches!(device.unplug(), Err(VusbError::DeviceClosed(DeviceId(1))));
        assert_matches!(device.submit_audio_data(&[0; FRAME_BYTES]), Err(VusbError::DeviceClosed(_)));
        assert!(hub.channel().requests().is_empty());
    }

    #[test]
    fn test_frame_pump_drives_device() {
        let hub = hub();
        let mut device = plugged_in(&hub);
        hub.channel().push_media_reply(MediaReply::Slots(10));
        hub.channel().push_media_reply(MediaReply::NoMoreItems);

        let mut pump = audivis_core::FramePump::new();
        pump.push(&[0u8; FRAME_BYTES * 2]);
        let report = pump.drain(&mut device).unwrap();

        assert_eq!(report.submitted, 1);
        assert_eq!(report.backpressure, Some(BackpressureReason::QueueFull));
        assert_eq!(pump.pending_frames(), 1);
    }

    #[test]
    fn test_no_more_items_code() {
        let err = VusbError::Control { code: ControlCode::QUERY_MEDIA, os_error: ERROR_NO_MORE_ITEMS };
        assert!(err.is_no_more_items());
        assert_eq!(err.os_error(), Some(259));
    }

    proptest! {
        #[test]
        fn prop_zero_slots_never_accepted(fill in any::<u8>()) {
            let hub = hub();
            let mut device = plugged_in(&hub);
            hub.channel().push_media_reply(MediaReply::Slots(0));

            let result = device.submit_audio_data(&[fill; FRAME_BYTES]).unwrap();
            prop_assert!(!result.is_accepted());
        }

        #[test]
        fn prop_endpoint_lists_configure(
            addresses in proptest::collection::vec(any::<u8>(), 1..=16),
            raw_type in any::<i32>(),
        ) {
            let hub = hub();
            let mut device = hub.open_device(DeviceId(1));
            let endpoints: Vec<EndpointAddress> = addresses.iter().copied().map(EndpointAddress).collect();
            let types = vec![EndpointType(raw_type); endpoints.len()];

            prop_assert!(device.configure_endpoints(&endpoints).is_ok());
            prop_assert!(device.configure_endpoint_types(&types).is_ok());
            prop_assert_eq!(device.state(), DeviceState::TypesSet);

            let sent = hub.channel().requests_for(ControlCode::CONFIGURE_ENDPOINTS);
            prop_assert_eq!(sent.len(), 1);
            prop_assert_eq!(sent[0].len(), 9 + endpoints.len());
            let sent = hub.channel().requests_for(ControlCode::CONFIGURE_ENDPOINT_TYPES);
            prop_assert_eq!(sent.len(), 1);
            prop_assert_eq!(sent[0].len(), 9 + 4 * endpoints.len());
        }
    }
}
