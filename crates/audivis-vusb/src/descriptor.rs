//! Create-device request carrying a USB Audio Class 1 microphone.
//!
//! The request is an 8-byte header (total size, device id placeholder)
//! followed by the device descriptor and the full configuration
//! descriptor. The driver fills in the device id when it answers.

use audivis_core::frame::{BYTES_PER_SAMPLE, CHANNELS, SAMPLE_RATE_HZ};
use audivis_core::{EndpointAddress, FRAME_BYTES};

/// pid.codes test identifiers
const VENDOR_ID: u16 = 0x1209;
const PRODUCT_ID: u16 = 0x0001;

/// Header preceding the USB descriptors in a create request.
pub const CREATE_HEADER_LEN: usize = 8;

const DEVICE: u8 = 0x01;
const CONFIGURATION: u8 = 0x02;
const INTERFACE: u8 = 0x04;
const ENDPOINT: u8 = 0x05;
const CS_INTERFACE: u8 = 0x24;
const CS_ENDPOINT: u8 = 0x25;

const USB_AUDIO_CLASS: u8 = 0x01;
const AUDIOCONTROL_SUBCLASS: u8 = 0x01;
const AUDIOSTREAMING_SUBCLASS: u8 = 0x02;

const HEADER_SUBTYPE: u8 = 0x01;
const INPUT_TERMINAL: u8 = 0x02;
const OUTPUT_TERMINAL: u8 = 0x03;
const AS_GENERAL: u8 = 0x01;
const FORMAT_TYPE: u8 = 0x02;
const FORMAT_TYPE_I: u8 = 0x01;

const INPUT_UNIT_ID: u8 = 0x01;
const OUTPUT_UNIT_ID: u8 = 0x02;
const TERMINAL_MICROPHONE: u16 = 0x0201;
const TERMINAL_USB_STREAMING: u16 = 0x0101;
const PCM: u16 = 0x0001;

const CONFIG_LEN: usize = 9;
const AC_HEADER_BODY_LEN: usize = 7;

/// One 1 ms packet of PCM.
const MAX_PACKET_SIZE: u16 = (FRAME_BYTES / 10) as u16;

/// Appends length-prefixed descriptors.
#[derive(Default)]
struct DescriptorWriter {
    buf: Vec<u8>,
}

impl DescriptorWriter {
    fn descriptor(&mut self, descriptor_type: u8, body: &[u8]) {
        // bLength covers the two header bytes
        self.buf.push((body.len() + 2) as u8);
        self.buf.push(descriptor_type);
        self.buf.extend_from_slice(body);
    }

    fn len(&self) -> usize {
        self.buf.len()
    }
}

fn le16(value: u16) -> [u8; 2] {
    value.to_le_bytes()
}

fn device_descriptor() -> Vec<u8> {
    let mut w = DescriptorWriter::default();
    let [usb_lo, usb_hi] = le16(0x0200);
    let [vid_lo, vid_hi] = le16(VENDOR_ID);
    let [pid_lo, pid_hi] = le16(PRODUCT_ID);
    let [dev_lo, dev_hi] = le16(0x0100);
    w.descriptor(
        DEVICE,
        &[
            usb_lo, usb_hi, // bcdUSB 2.0
            0x00,   // bDeviceClass (per interface)
            0x00,   // bDeviceSubClass
            0x00,   // bDeviceProtocol
            64,     // bMaxPacketSize0
            vid_lo, vid_hi, // idVendor
            pid_lo, pid_hi, // idProduct
            dev_lo, dev_hi, // bcdDevice
            0x00,   // iManufacturer (none)
            0x00,   // iProduct (none)
            0x00,   // iSerialNumber (none)
            0x01,   // bNumConfigurations
        ],
    );
    w.buf
}

fn audio_control_interface(w: &mut DescriptorWriter) {
    w.descriptor(INTERFACE, &[0x00, 0x00, 0x00, USB_AUDIO_CLASS, AUDIOCONTROL_SUBCLASS, 0x00, 0x00]);

    let [mic_lo, mic_hi] = le16(TERMINAL_MICROPHONE);
    let input_terminal = [
        INPUT_TERMINAL,
        INPUT_UNIT_ID,
        mic_lo,
        mic_hi,
        0x00,            // bAssocTerminal (none)
        CHANNELS as u8,  // bNrChannels
        0x00,
        0x00,            // wChannelConfig (mono, no position)
        0x00,            // iChannelNames
        0x00,            // iTerminal
    ];
    let [usb_lo, usb_hi] = le16(TERMINAL_USB_STREAMING);
    let output_terminal = [OUTPUT_TERMINAL, OUTPUT_UNIT_ID, usb_lo, usb_hi, 0x00, INPUT_UNIT_ID, 0x00];

    let class_total = [AC_HEADER_BODY_LEN, input_terminal.len(), output_terminal.len()]
        .iter()
        .map(|body| body + 2)
        .sum::<usize>() as u16;
    let [adc_lo, adc_hi] = le16(0x0100);
    let [total_lo, total_hi] = le16(class_total);

    w.descriptor(
        CS_INTERFACE,
        &[
            HEADER_SUBTYPE,
            adc_lo,
            adc_hi, // bcdADC 1.0
            total_lo,
            total_hi, // wTotalLength
            0x01,     // bInCollection
            0x01,     // baInterfaceNr (streaming interface)
        ],
    );
    w.descriptor(CS_INTERFACE, &input_terminal);
    w.descriptor(CS_INTERFACE, &output_terminal);
}

fn audio_streaming_interface(w: &mut DescriptorWriter) {
    // Zero-bandwidth alternate setting
    w.descriptor(INTERFACE, &[0x01, 0x00, 0x00, USB_AUDIO_CLASS, AUDIOSTREAMING_SUBCLASS, 0x00, 0x00]);
    // Operational alternate setting with one endpoint
    w.descriptor(INTERFACE, &[0x01, 0x01, 0x01, USB_AUDIO_CLASS, AUDIOSTREAMING_SUBCLASS, 0x00, 0x00]);

    let [pcm_lo, pcm_hi] = le16(PCM);
    w.descriptor(CS_INTERFACE, &[AS_GENERAL, OUTPUT_UNIT_ID, 0x01, pcm_lo, pcm_hi]);

    let rate = SAMPLE_RATE_HZ.to_le_bytes();
    w.descriptor(
        CS_INTERFACE,
        &[
            FORMAT_TYPE,
            FORMAT_TYPE_I,
            CHANNELS as u8,
            BYTES_PER_SAMPLE as u8,       // bSubframeSize
            (BYTES_PER_SAMPLE * 8) as u8, // bBitResolution
            0x01,                         // bSamFreqType (one discrete rate)
            rate[0],
            rate[1],
            rate[2],
        ],
    );

    let [mps_lo, mps_hi] = le16(MAX_PACKET_SIZE);
    w.descriptor(
        ENDPOINT,
        &[
            EndpointAddress::AUDIO_IN.get(),
            0x01, // bmAttributes (isochronous, no synchronization)
            mps_lo,
            mps_hi,
            0x01, // bInterval (every frame)
            0x00, // bRefresh
            0x00, // bSynchAddress
        ],
    );
    w.descriptor(CS_ENDPOINT, &[AS_GENERAL, 0x00, 0x00, 0x00, 0x00]);
}

fn configuration_descriptor() -> Vec<u8> {
    let mut body = DescriptorWriter::default();
    audio_control_interface(&mut body);
    audio_streaming_interface(&mut body);

    let [total_lo, total_hi] = le16((CONFIG_LEN + body.len()) as u16);

    let mut w = DescriptorWriter::default();
    w.descriptor(
        CONFIGURATION,
        &[
            total_lo, total_hi, // wTotalLength
            0x02,     // bNumInterfaces
            0x01,     // bConfigurationValue
            0x00,     // iConfiguration
            0x80,     // bmAttributes (bus powered)
            50,       // bMaxPower (100 mA)
        ],
    );
    w.buf.extend_from_slice(&body.buf);
    w.buf
}

/// Wrap raw USB descriptors in a create-device request.
#[must_use]
pub fn create_request(usb_descriptors: &[u8]) -> Vec<u8> {
    let total = CREATE_HEADER_LEN + usb_descriptors.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&u32::try_from(total).unwrap_or(u32::MAX).to_ne_bytes());
    buf.extend_from_slice(&0u32.to_ne_bytes());
    buf.extend_from_slice(usb_descriptors);
    buf
}

/// Create-device request for a mono 48 kHz 16-bit microphone streaming on
/// endpoint 0x81.
#[must_use]
pub fn default_microphone_descriptor() -> Vec<u8> {
    let mut descriptors = device_descriptor();
    descriptors.extend_from_slice(&configuration_descriptor());
    create_request(&descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walk length-prefixed descriptors, returning (type, bytes) pairs.
    fn split(mut bytes: &[u8]) -> Vec<(u8, &[u8])> {
        let mut out = Vec::new();
        while !bytes.is_empty() {
            let len = bytes[0] as usize;
            assert!(len >= 2 && len <= bytes.len(), "malformed descriptor");
            out.push((bytes[1], &bytes[..len]));
            bytes = &bytes[len..];
        }
        out
    }

    #[test]
    fn test_header_carries_total_size() {
        let request = default_microphone_descriptor();
        let total = u32::from_ne_bytes(request[0..4].try_into().unwrap());
        assert_eq!(total as usize, request.len());
        assert_eq!(&request[4..8], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_descriptor_chain_is_well_formed() {
        let request = default_microphone_descriptor();
        let descriptors = split(&request[CREATE_HEADER_LEN..]);

        assert_eq!(descriptors[0].0, DEVICE);
        assert_eq!(descriptors[0].1.len(), 18);

        let (ty, config) = descriptors[1];
        assert_eq!(ty, CONFIGURATION);
        let total = u16::from_le_bytes([config[2], config[3]]) as usize;
        assert_eq!(total, request.len() - CREATE_HEADER_LEN - 18);
    }

    #[test]
    fn test_streaming_endpoint_matches_frame_format() {
        let request = default_microphone_descriptor();
        let descriptors = split(&request[CREATE_HEADER_LEN..]);

        let endpoints: Vec<&[u8]> =
            descriptors.iter().filter(|(ty, _)| *ty == ENDPOINT).map(|(_, d)| *d).collect();
        assert_eq!(endpoints.len(), 1);
        let endpoint = endpoints[0];
        assert_eq!(endpoint[2], 0x81);
        // Ten packets per frame
        assert_eq!(u16::from_le_bytes([endpoint[4], endpoint[5]]) as usize * 10, FRAME_BYTES);

        let format = descriptors
            .iter()
            .find(|(ty, d)| *ty == CS_INTERFACE && d[2] == FORMAT_TYPE && d.len() == 11)
            .map(|(_, d)| *d)
            .unwrap();
        assert_eq!(format[4], 1, "mono");
        assert_eq!(format[6], 16, "16-bit");
        assert_eq!(u32::from_le_bytes([format[8], format[9], format[10], 0]), 48_000);
    }

    #[test]
    fn test_create_request_wraps_arbitrary_descriptors() {
        let request = create_request(&[1, 2, 3]);
        assert_eq!(request.len(), 11);
        assert_eq!(u32::from_ne_bytes(request[0..4].try_into().unwrap()), 11);
        assert_eq!(&request[8..], &[1, 2, 3]);
    }
}
