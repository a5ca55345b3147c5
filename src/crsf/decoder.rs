//! # CRSF Packet Decoder
//!
//! Validates complete frames and decodes RC channel and telemetry payloads
//! (Link Statistics, Battery, GPS).

use super::protocol::*;
use crate::error::{DecodeError, FramingError};

/// Microsecond span covered by raw values `0..=1984`
const CHANNEL_US_SPAN: u32 = (CHANNEL_US_MAX - CHANNEL_US_MIN) as u32;

/// Raw value mapped to [`CHANNEL_US_MAX`]
const CHANNEL_RAW_SPAN: u32 = 1984;

/// Bits per packed channel
const CHANNEL_BITS: u32 = 11;

const CHANNEL_MASK: u32 = (1 << CHANNEL_BITS) - 1;

/// Decode a complete CRSF frame
///
/// # Arguments
///
/// * `frame` - Complete CRSF frame bytes (address, length, type, payload, crc)
/// * `device_address` - Address the frame must start with
///
/// # Errors
///
/// Returns:
/// - [`FramingError::Desync`] if the first byte is not `device_address`
/// - [`FramingError::LengthInvalid`] if the length byte is out of range
/// - [`FramingError::Truncated`] if fewer bytes than announced are present
/// - [`FramingError::Crc`] if the CRC check fails
pub fn decode_frame(frame: &[u8], device_address: u8) -> Result<CrsfFrame, FramingError> {
    let (&address, rest) = frame.split_first().ok_or(FramingError::Truncated {
        expected: CRSF_FRAME_HEADER_BYTES,
        actual: 0,
    })?;

    if address != device_address {
        return Err(FramingError::Desync(address));
    }

    let &length_byte = rest.first().ok_or(FramingError::Truncated {
        expected: CRSF_FRAME_HEADER_BYTES,
        actual: frame.len(),
    })?;

    let length = length_byte as usize;
    if length_byte < CRSF_MIN_LENGTH_BYTE || length > CRSF_MAX_FRAME_SIZE {
        return Err(FramingError::LengthInvalid(length_byte));
    }

    let total = CRSF_FRAME_HEADER_BYTES + length;
    if frame.len() < total {
        return Err(FramingError::Truncated {
            expected: total,
            actual: frame.len(),
        });
    }

    // [type, payload...] sits between the length byte and the crc
    let covered = &frame[CRSF_FRAME_HEADER_BYTES..total - 1];
    let received_crc = frame[total - 1];
    let frame_type = covered[0];
    let payload = &covered[1..];

    let calculated_crc = frame_crc(frame_type, payload);
    if calculated_crc != received_crc {
        return Err(FramingError::Crc {
            expected: calculated_crc,
            actual: received_crc,
        });
    }

    Ok(CrsfFrame {
        device_address: address,
        frame_type,
        payload: payload.to_vec(),
        crc: received_crc,
    })
}

/// Unpack 16 raw 11-bit channel values from an RC channels payload.
///
/// Bytes are shifted into an accumulator above the bits already held; every
/// time 11 or more bits are buffered, the low 11 bits become the next channel
/// and the accumulator shifts right by 11.
pub fn unpack_raw_channels(payload: &[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE]) -> RcChannels {
    let mut raw = [0u16; CRSF_NUM_CHANNELS];
    let mut slots = raw.iter_mut();
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;

    for &byte in payload {
        acc |= (byte as u32) << bits;
        bits += 8;

        while bits >= CHANNEL_BITS {
            if let Some(slot) = slots.next() {
                *slot = (acc & CHANNEL_MASK) as u16;
            }
            acc >>= CHANNEL_BITS;
            bits -= CHANNEL_BITS;
        }
    }

    raw
}

/// Map a raw channel value to microseconds: `988 + floor(raw * 1024 / 1984)`.
///
/// Not clamped: raw values above 1984 map above 2012 µs.
pub fn raw_to_us(raw: u16) -> u16 {
    (CHANNEL_US_MIN as u32 + raw as u32 * CHANNEL_US_SPAN / CHANNEL_RAW_SPAN) as u16
}

/// Decode an RC channels payload into 16 microsecond values
///
/// # Errors
///
/// Returns [`DecodeError::InvalidPayloadLength`] unless `payload` is exactly 22 bytes
///
/// # Examples
///
/// ```
/// use fc_link::crsf::decoder::decode_rc_channels;
/// use fc_link::crsf::encoder::encode_rc_channels_payload;
///
/// let payload = encode_rc_channels_payload(&[992u16; 16]);
/// assert_eq!(decode_rc_channels(&payload).unwrap(), [1500u16; 16]);
/// ```
pub fn decode_rc_channels(payload: &[u8]) -> Result<[u16; CRSF_NUM_CHANNELS], DecodeError> {
    let packed: &[u8; CRSF_RC_CHANNELS_PAYLOAD_SIZE] =
        payload
            .try_into()
            .map_err(|_| DecodeError::InvalidPayloadLength {
                expected: CRSF_RC_CHANNELS_PAYLOAD_SIZE,
                actual: payload.len(),
            })?;

    Ok(unpack_raw_channels(packed).map(raw_to_us))
}

fn require_len(payload: &[u8], expected: usize) -> Result<(), DecodeError> {
    if payload.len() < expected {
        return Err(DecodeError::InvalidPayloadLength {
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

/// Decode Link Statistics telemetry packet (10 bytes)
pub fn decode_link_statistics(payload: &[u8]) -> Result<LinkStatistics, DecodeError> {
    require_len(payload, CRSF_LINK_STATS_PAYLOAD_SIZE)?;

    Ok(LinkStatistics {
        uplink_rssi_1: payload[0],
        uplink_rssi_2: payload[1],
        uplink_lq: payload[2],
        uplink_snr: payload[3] as i8,
        active_antenna: payload[4],
        rf_mode: payload[5],
        uplink_tx_power: payload[6],
        downlink_rssi: payload[7],
        downlink_lq: payload[8],
        downlink_snr: payload[9] as i8,
    })
}

/// Decode Battery Sensor telemetry packet (8 bytes, big-endian fields)
pub fn decode_battery_sensor(payload: &[u8]) -> Result<BatterySensor, DecodeError> {
    require_len(payload, CRSF_BATTERY_SENSOR_PAYLOAD_SIZE)?;

    // Centivolts, deciamps, 24-bit mAh
    let voltage = u16::from_be_bytes([payload[0], payload[1]]) as f32 / 100.0;
    let current = u16::from_be_bytes([payload[2], payload[3]]) as f32 / 10.0;
    let capacity_used = u32::from_be_bytes([0, payload[4], payload[5], payload[6]]);

    Ok(BatterySensor {
        voltage,
        current,
        capacity_used,
        remaining_percent: payload[7],
    })
}

/// Decode GPS telemetry packet (15 bytes, big-endian fields)
pub fn decode_gps(payload: &[u8]) -> Result<GpsData, DecodeError> {
    require_len(payload, CRSF_GPS_PAYLOAD_SIZE)?;

    // Degrees × 10^7
    let lat_raw = i32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    let lon_raw = i32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);

    // km/h × 10, degrees × 100, meters + 1000
    let speed_raw = u16::from_be_bytes([payload[8], payload[9]]);
    let heading_raw = u16::from_be_bytes([payload[10], payload[11]]);
    let altitude_raw = u16::from_be_bytes([payload[12], payload[13]]);

    Ok(GpsData {
        latitude: lat_raw as f64 / 10_000_000.0,
        longitude: lon_raw as f64 / 10_000_000.0,
        ground_speed: speed_raw as f32 / 10.0,
        heading: heading_raw as f32 / 100.0,
        altitude: (altitude_raw as i32 - 1000) as i16,
        satellites: payload[14],
    })
}
