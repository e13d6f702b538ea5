//! Wire layouts of the hub driver's control requests.
//!
//! All records are packed and use native byte order. Encoders produce the
//! exact buffers handed to the driver; nothing here performs I/O.
//!
//! ```text
//! endpoints      total:u32 device:u32 count:u8 address:u8[count]
//! endpoint types total:u32 device:u32 count:u8 type:i32[count]
//! plug state     16:i32 device:i32 plugged:u8 0:u8 0:i16 3:i32
//! media query    149 bytes, in/out; tag:u32 @9, slots:u32 @25
//! audio submit   41-byte header, 12-byte descriptor per slot, payload
//! ```

use audivis_core::endpoint::{validate_endpoint_types, validate_endpoints};
use audivis_core::{AudioFrame, DeviceId, EndpointAddress, EndpointType, FRAME_BYTES};

/// OS error the driver returns from a media query when nothing is queued.
pub const ERROR_NO_MORE_ITEMS: u32 = 259;

const TOTAL_SIZE_OFFSET: usize = 0;
const DEVICE_ID_OFFSET: usize = 4;

/// Size of the endpoint and endpoint-type request headers.
pub const ENDPOINT_HEADER_LEN: usize = 9;
const ENDPOINT_COUNT_OFFSET: usize = 8;

/// Size of a plug-state record.
pub const PLUG_STATE_LEN: usize = 16;
const PLUG_FLAG_OFFSET: usize = 8;
const PLUG_TRAILER_OFFSET: usize = 12;
const PLUG_TRAILER: i32 = 3;

/// Size of the media query buffer.
pub const MEDIA_QUERY_LEN: usize = 149;
const ENDPOINT_OFFSET: usize = 8;
const TAG_OFFSET: usize = 9;
const SLOTS_OFFSET: usize = 25;

/// Packet slots requested per query; one frame needs this many.
pub const FRAME_SLOTS: u32 = 10;

/// Bytes of payload described by one packet descriptor.
pub const PACKET_BYTES: usize = 96;

const STATUS_OFFSET: usize = 13;
const INFO_OFFSET: usize = 17;
const TIMING_OFFSET: usize = 21;
const SUBMIT_SLOTS_OFFSET: usize = 33;
const PAYLOAD_LEN_OFFSET: usize = 37;
const DESCRIPTOR_TABLE_OFFSET: usize = 41;
const DESCRIPTOR_LEN: usize = 12;
const SUBMIT_FIXED_LEN: usize = DESCRIPTOR_TABLE_OFFSET + FRAME_BYTES;

/// Fixed timing value carried by every submission.
const SUBMIT_TIMING: u64 = 10_000;

/// NTSTATUS codes placed in a submission that carries no payload.
pub const STATUS_UNSUCCESSFUL: u32 = 0xC000_0001;
pub const STATUS_INFO_LENGTH_MISMATCH: u32 = 0xC000_0004;

/// Offset of the device id a create request gets back from the driver.
pub const CREATED_ID_OFFSET: usize = DEVICE_ID_OFFSET;

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

fn put_i32(buf: &mut [u8], at: usize, value: i32) {
    buf[at..at + 4].copy_from_slice(&value.to_ne_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> Option<u32> {
    let bytes = buf.get(at..at + 4)?;
    Some(u32::from_ne_bytes(bytes.try_into().ok()?))
}

fn size_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn header(len: usize, device_id: DeviceId) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    put_u32(&mut buf, TOTAL_SIZE_OFFSET, size_u32(len));
    put_u32(&mut buf, DEVICE_ID_OFFSET, device_id.get());
    buf
}

/// Encode a configure-endpoints request.
///
/// # Errors
/// Returns an error if the list is empty or has more than 255 entries.
pub fn encode_configure_endpoints(
    device_id: DeviceId,
    endpoints: &[EndpointAddress],
) -> audivis_core::Result<Vec<u8>> {
    validate_endpoints(endpoints)?;

    let mut buf = header(ENDPOINT_HEADER_LEN + endpoints.len(), device_id);
    // Validated above, so the count fits the byte
    buf[ENDPOINT_COUNT_OFFSET] = endpoints.len() as u8;
    for (slot, endpoint) in buf[ENDPOINT_HEADER_LEN..].iter_mut().zip(endpoints) {
        *slot = endpoint.get();
    }
    Ok(buf)
}

/// Encode a configure-endpoint-types request.
///
/// # Errors
/// Returns an error if the list is empty or has more than 255 entries.
pub fn encode_configure_endpoint_types(
    device_id: DeviceId,
    types: &[EndpointType],
) -> audivis_core::Result<Vec<u8>> {
    validate_endpoint_types(types)?;

    let mut buf = header(ENDPOINT_HEADER_LEN + 4 * types.len(), device_id);
    buf[ENDPOINT_COUNT_OFFSET] = types.len() as u8;
    for (i, ty) in types.iter().enumerate() {
        put_i32(&mut buf, ENDPOINT_HEADER_LEN + 4 * i, ty.get());
    }
    Ok(buf)
}

/// Encode a plug-state record.
#[must_use]
pub fn encode_plug_state(device_id: DeviceId, plugged_in: bool) -> [u8; PLUG_STATE_LEN] {
    let mut buf = [0u8; PLUG_STATE_LEN];
    put_i32(&mut buf, TOTAL_SIZE_OFFSET, PLUG_STATE_LEN as i32);
    put_u32(&mut buf, DEVICE_ID_OFFSET, device_id.get());
    buf[PLUG_FLAG_OFFSET] = u8::from(plugged_in);
    put_i32(&mut buf, PLUG_TRAILER_OFFSET, PLUG_TRAILER);
    buf
}

/// Encode a media query for the microphone's streaming endpoint.
#[must_use]
pub fn encode_media_query(device_id: DeviceId) -> [u8; MEDIA_QUERY_LEN] {
    let mut buf = [0u8; MEDIA_QUERY_LEN];
    put_u32(&mut buf, TOTAL_SIZE_OFFSET, MEDIA_QUERY_LEN as u32);
    put_u32(&mut buf, DEVICE_ID_OFFSET, device_id.get());
    buf[ENDPOINT_OFFSET] = EndpointAddress::AUDIO_IN.get();
    put_u32(&mut buf, SLOTS_OFFSET, FRAME_SLOTS);
    buf
}

/// What the driver wrote back into a media query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaQueryResult {
    /// Opaque request tag, echoed in the submission
    pub tag: u32,
    /// Packet slots the driver can take right now
    pub available_slots: u32,
}

impl MediaQueryResult {
    /// Whether enough slots are free to carry one whole frame.
    #[must_use]
    pub const fn has_room_for_frame(&self) -> bool {
        self.available_slots >= FRAME_SLOTS
    }

    /// Whether the driver offered more slots than a query asks for.
    #[must_use]
    pub const fn exceeds_request(&self) -> bool {
        self.available_slots > FRAME_SLOTS
    }
}

/// Read the driver's reply out of a completed media query.
#[must_use]
pub fn decode_media_query(buf: &[u8; MEDIA_QUERY_LEN]) -> MediaQueryResult {
    let read = |at: usize| u32::from_ne_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    MediaQueryResult { tag: read(TAG_OFFSET), available_slots: read(SLOTS_OFFSET) }
}

/// One entry of the submission's packet descriptor table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketDescriptor {
    /// Byte offset into the payload
    pub offset: u32,
    /// Bytes covered by this packet
    pub length: u32,
}

/// Split a payload of `payload_len` bytes into at most [`FRAME_SLOTS`]
/// packets of [`PACKET_BYTES`], the last one clamped to what remains.
#[must_use]
pub fn packet_descriptors(payload_len: usize) -> Vec<PacketDescriptor> {
    (0..FRAME_SLOTS as usize)
        .map(|i| i * PACKET_BYTES)
        .take_while(|&offset| offset < payload_len)
        .map(|offset| PacketDescriptor {
            offset: size_u32(offset),
            length: size_u32(PACKET_BYTES.min(payload_len - offset)),
        })
        .collect()
}

/// Total size of a submission buffer for `slots` packet slots.
#[must_use]
pub fn submit_buffer_len(slots: u32) -> usize {
    DESCRIPTOR_LEN * slots as usize + SUBMIT_FIXED_LEN
}

/// Encode an audio submission answering `query`.
///
/// `query` must not offer more than [`FRAME_SLOTS`] slots; callers reject
/// such replies before encoding. When the driver offered fewer than [`FRAME_SLOTS`] slots the buffer
/// carries failure status codes instead of the payload; the driver still
/// expects it to complete the pending request.
#[must_use]
pub fn encode_audio_submission(device_id: DeviceId, query: MediaQueryResult, frame: &AudioFrame) -> Vec<u8> {
    let len = submit_buffer_len(query.available_slots);
    let mut buf = header(len, device_id);

    buf[ENDPOINT_OFFSET] = EndpointAddress::AUDIO_IN.get();
    put_u32(&mut buf, TAG_OFFSET, query.tag);
    buf[TIMING_OFFSET..TIMING_OFFSET + 8].copy_from_slice(&SUBMIT_TIMING.to_ne_bytes());
    put_u32(&mut buf, SUBMIT_SLOTS_OFFSET, query.available_slots);
    put_u32(&mut buf, PAYLOAD_LEN_OFFSET, FRAME_BYTES as u32);

    if !query.has_room_for_frame() {
        put_u32(&mut buf, STATUS_OFFSET, STATUS_UNSUCCESSFUL);
        put_u32(&mut buf, INFO_OFFSET, STATUS_INFO_LENGTH_MISMATCH);
        return buf;
    }

    for (i, packet) in packet_descriptors(FRAME_BYTES).into_iter().enumerate() {
        let at = DESCRIPTOR_TABLE_OFFSET + DESCRIPTOR_LEN * i;
        put_u32(&mut buf, at, packet.offset);
        put_u32(&mut buf, at + 4, packet.length);
    }

    let payload = DESCRIPTOR_TABLE_OFFSET + DESCRIPTOR_LEN * query.available_slots as usize;
    buf[payload..payload + FRAME_BYTES].copy_from_slice(frame.as_bytes());
    buf
}

/// Device id the driver wrote into a completed create request.
#[must_use]
pub fn decode_created_device_id(buf: &[u8]) -> Option<DeviceId> {
    get_u32(buf, CREATED_ID_OFFSET).map(DeviceId)
}
