//! # CRSF Frame Encoder
//!
//! Builds CRSF frames, including packed RC channel frames.

use super::protocol::*;
use crate::error::DecodeError;

/// Encode a frame of any type into wire bytes
///
/// # Errors
///
/// Returns [`DecodeError::PayloadTooLarge`] if `payload` exceeds 62 bytes
///
/// # Examples
///
/// ```
/// use fc_link::crsf::encoder::encode_frame;
///
/// let bytes = encode_frame(0xC8, 0x14, &[0u8; 10]).unwrap();
/// assert_eq!(bytes[1], 12); // type + payload + crc
/// ```
pub fn encode_frame(device_address: u8, frame_type: u8, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    CrsfFrame::new(device_address, frame_type, payload.to_vec()).map(|frame| frame.to_bytes())
}

/// Encode raw RC channels into a complete CRSF frame
///
/// # Arguments
///
/// * `device_address` - Frame start byte (usually `0xC8`)
/// * `channels` - Array of 16 raw channel values (11-bit: 0-2047)
///
/// # Returns
///
/// * `Vec<u8>` - Complete CRSF frame (26 bytes: address + length + type + 22-byte payload + crc)
///
/// # Examples
///
/// ```
/// use fc_link::crsf::encoder::encode_rc_channels_frame;
///
/// let frame = encode_rc_channels_frame(0xC8, &[992u16; 16]);
/// assert_eq!(frame.len(), 26);
/// ```
pub fn encode_rc_channels_frame(device_address: u8, channels: &RcChannels) -> Vec<u8> {
    let payload = encode_rc_channels_payload(channels);
    let crc = frame_crc(CRSF_FRAMETYPE_RC_CHANNELS_PACKED, &payload);

    let mut frame = Vec::with_capacity(CRSF_FRAME_HEADER_BYTES + CRSF_RC_CHANNELS_FRAME_LENGTH as usize);
    frame.push(device_address);
    frame.push(CRSF_RC_CHANNELS_FRAME_LENGTH);
    frame.push(CRSF_FRAMETYPE_RC_CHANNELS_PACKED);
    frame.extend_from_slice(&payload);
    frame.push(crc);
    frame
}

/// Pack 16 raw channels (11 bits each) into the 22-byte payload.
///
/// Channels form one continuous LSB-first bitstream:
/// ```text
/// Byte 0: Ch1[0:7]
/// Byte 1: Ch1[8:10] | Ch2[0:4]
/// Byte 2: Ch2[5:10] | Ch3[0:1]
/// ...
/// ```
/// Values above 2047 are clamped.
pub fn encode_rc_channels_payload(channels: &RcChannels) -> [u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] {
    let mut payload = [0u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE];
    let mut out = payload.iter_mut();
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;

    for &channel in channels.iter() {
        acc |= (clamp_channel_value(channel) as u32) << bits;
        bits += 11;

        while bits >= 8 {
            if let Some(byte) = out.next() {
                *byte = acc as u8;
            }
            acc >>= 8;
            bits -= 8;
        }
    }

    payload
}

/// Clamp a raw channel value to the 11-bit range (0-2047)
pub fn clamp_channel_value(value: u16) -> u16 {
    value.min(CRSF_CHANNEL_VALUE_MAX)
}
