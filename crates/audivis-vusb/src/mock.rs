//! In-memory control channel that records requests and plays back scripted
//! driver replies. Built for tests only; other crates enable it through the
//! `test-util` feature.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use audivis_core::DeviceId;
use parking_lot::Mutex;

use crate::channel::{ControlChannel, ControlCode};
use crate::error::{VusbError, VusbResult};
use crate::protocol::{ERROR_NO_MORE_ITEMS, FRAME_SLOTS};

/// OS error for requests addressed to an unknown device.
pub const ERROR_NO_SUCH_DEVICE: u32 = 433;

const TAG_BASE: u32 = 0xA000_0000;

/// One request seen by the mock, with the input as sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub code: ControlCode,
    pub input: Vec<u8>,
}

/// Scripted answer to a media query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaReply {
    /// Report this many free packet slots
    Slots(u32),
    /// Fail with the empty-queue error
    NoMoreItems,
    /// Fail with an arbitrary OS error
    Fail(u32),
}

#[derive(Debug)]
struct State {
    requests: Vec<RecordedRequest>,
    devices: HashSet<u32>,
    next_device_id: u32,
    media_replies: VecDeque<MediaReply>,
    failures: HashMap<ControlCode, u32>,
    failing_event_prefixes: Vec<String>,
    event_names: Vec<String>,
    anonymous_events: usize,
    last_tag: Option<u32>,
    closed: bool,
}

/// Recording [`ControlChannel`].
///
/// Created devices and devices registered with [`with_device`] exist;
/// requests for any other device id fail with [`ERROR_NO_SUCH_DEVICE`].
/// Media queries report ten free slots unless a reply is scripted.
///
/// [`with_device`]: MockChannel::with_device
#[derive(Debug)]
pub struct MockChannel {
    state: Mutex<State>,
    live_events: Arc<AtomicUsize>,
}

/// Event handed out by [`MockChannel`]; counts itself while alive.
#[derive(Debug)]
pub struct MockEvent {
    live: Arc<AtomicUsize>,
}

impl Drop for MockEvent {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for MockChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChannel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                requests: Vec::new(),
                devices: HashSet::new(),
                next_device_id: 1,
                media_replies: VecDeque::new(),
                failures: HashMap::new(),
                failing_event_prefixes: Vec::new(),
                event_names: Vec::new(),
                anonymous_events: 0,
                last_tag: None,
                closed: false,
            }),
            live_events: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Register a device that already exists in the driver.
    #[must_use]
    pub fn with_device(self, id: DeviceId) -> Self {
        self.state.lock().devices.insert(id.get());
        self
    }

    /// Id handed out by the next create request.
    #[must_use]
    pub fn with_next_device_id(self, id: DeviceId) -> Self {
        self.state.lock().next_device_id = id.get();
        self
    }

    /// Queue the answer to a future media query.
    pub fn push_media_reply(&self, reply: MediaReply) {
        self.state.lock().media_replies.push_back(reply);
    }

    /// Fail every later request with `code`.
    pub fn fail_code(&self, code: ControlCode, os_error: u32) {
        self.state.lock().failures.insert(code, os_error);
    }

    /// Refuse to create named events starting with `prefix`.
    pub fn fail_events_named(&self, prefix: &str) {
        self.state.lock().failing_event_prefixes.push(prefix.to_string());
    }

    /// Invalidate the handle; later requests fail.
    pub fn close(&self) {
        self.state.lock().closed = true;
    }

    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Inputs of all requests with `code`, oldest first.
    #[must_use]
    pub fn requests_for(&self, code: ControlCode) -> Vec<Vec<u8>> {
        self.state.lock().requests.iter().filter(|r| r.code == code).map(|r| r.input.clone()).collect()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Names of all named events created so far.
    #[must_use]
    pub fn event_names(&self) -> Vec<String> {
        self.state.lock().event_names.clone()
    }

    #[must_use]
    pub fn anonymous_events(&self) -> usize {
        self.state.lock().anonymous_events
    }

    /// Events created and not yet dropped.
    #[must_use]
    pub fn live_events(&self) -> usize {
        self.live_events.load(Ordering::SeqCst)
    }

    /// Tag written into the most recent successful media query.
    #[must_use]
    pub fn last_media_tag(&self) -> Option<u32> {
        self.state.lock().last_tag
    }

    fn dispatch(&self, code: ControlCode, buf: &mut [u8]) -> VusbResult<usize> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(VusbError::InvalidHandle { code });
        }
        state.requests.push(RecordedRequest { code, input: buf.to_vec() });

        if let Some(&os_error) = state.failures.get(&code) {
            return Err(VusbError::Control { code, os_error });
        }

        if code == ControlCode::CREATE_DEVICE {
            let id = state.next_device_id;
            state.next_device_id += 1;
            state.devices.insert(id);
            if let Some(slot) = buf.get_mut(4..8) {
                slot.copy_from_slice(&id.to_ne_bytes());
            }
            return Ok(buf.len());
        }

        let device = buf.get(4..8).map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]));
        if !device.is_some_and(|id| state.devices.contains(&id)) {
            return Err(VusbError::Control { code, os_error: ERROR_NO_SUCH_DEVICE });
        }

        if code == ControlCode::QUERY_MEDIA {
            let reply = state.media_replies.pop_front().unwrap_or(MediaReply::Slots(FRAME_SLOTS));
            let slots = match reply {
                MediaReply::Slots(slots) => slots,
                MediaReply::NoMoreItems => return Err(VusbError::Control { code, os_error: ERROR_NO_MORE_ITEMS }),
                MediaReply::Fail(os_error) => return Err(VusbError::Control { code, os_error }),
            };
            let tag = TAG_BASE + u32::try_from(state.requests.len()).unwrap_or(0);
            state.last_tag = Some(tag);
            if buf.len() >= 29 {
                buf[9..13].copy_from_slice(&tag.to_ne_bytes());
                buf[25..29].copy_from_slice(&slots.to_ne_bytes());
            }
        }

        Ok(buf.len())
    }
}

impl ControlChannel for MockChannel {
    type Event = MockEvent;

    fn request(&self, code: ControlCode, input: &[u8]) -> VusbResult<()> {
        let mut copy = input.to_vec();
        self.dispatch(code, &mut copy).map(|_| ())
    }

    fn request_inout(&self, code: ControlCode, buf: &mut [u8]) -> VusbResult<usize> {
        self.dispatch(code, buf)
    }

    fn create_event(&self, name: Option<&str>) -> VusbResult<MockEvent> {
        let mut state = self.state.lock();
        match name {
            Some(name) => {
                if state.failing_event_prefixes.iter().any(|p| name.starts_with(p.as_str())) {
                    return Err(VusbError::Event { name: name.to_string(), os_error: 5 });
                }
                state.event_names.push(name.to_string());
            }
            None => state.anonymous_events += 1,
        }
        self.live_events.fetch_add(1, Ordering::SeqCst);
        Ok(MockEvent { live: Arc::clone(&self.live_events) })
    }
}
