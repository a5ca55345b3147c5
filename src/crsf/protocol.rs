//! # CRSF Protocol Constants and Types
//!
//! Core protocol definitions for CRSF (Crossfire) communication.
//!
//! Wire layout: `address(1) length(1) type(1) payload(length - 2) crc(1)`,
//! where `length` counts type + payload + crc.

use serde::Serialize;
use tokio::time::Instant;

use super::crc::crc8_dvb_s2;
use crate::error::DecodeError;

/// Flight controller address, the default frame start byte
pub const CRSF_ADDRESS_FLIGHT_CONTROLLER: u8 = 0xC8;

/// Receiver address
pub const CRSF_ADDRESS_CRSF_RECEIVER: u8 = 0xEE;

/// RC Channels packet type
pub const CRSF_FRAMETYPE_RC_CHANNELS_PACKED: u8 = 0x16;

/// Link Statistics packet type
pub const CRSF_FRAMETYPE_LINK_STATISTICS: u8 = 0x14;

/// Battery Sensor packet type
pub const CRSF_FRAMETYPE_BATTERY_SENSOR: u8 = 0x08;

/// GPS packet type
pub const CRSF_FRAMETYPE_GPS: u8 = 0x02;

/// Address and length bytes preceding the counted part of a frame
pub const CRSF_FRAME_HEADER_BYTES: usize = 2;

/// Largest accepted length byte (type, payload and crc)
pub const CRSF_MAX_FRAME_SIZE: usize = 64;

/// Maximum CRSF payload size
/// The length byte counts type(1) + payload(N) + crc(1)
pub const CRSF_MAX_PAYLOAD_SIZE: usize = CRSF_MAX_FRAME_SIZE - 2;

/// Smallest valid length byte (type + crc, empty payload)
pub const CRSF_MIN_LENGTH_BYTE: u8 = 2;

/// RC channels payload size (22 bytes for 16 channels × 11 bits)
pub const CRSF_RC_CHANNELS_PAYLOAD_SIZE: usize = 22;

/// RC channels frame length (type + payload + crc)
pub const CRSF_RC_CHANNELS_FRAME_LENGTH: u8 = 0x18; // 24 bytes

/// Number of RC channels
pub const CRSF_NUM_CHANNELS: usize = 16;

/// Raw channel value range (11-bit: 0-2047)
pub const CRSF_CHANNEL_VALUE_MIN: u16 = 0;
pub const CRSF_CHANNEL_VALUE_MAX: u16 = 2047;

/// Raw value that maps to the 1500 µs stick center
pub const CRSF_CHANNEL_VALUE_CENTER: u16 = 992;

/// Nominal microsecond range of a decoded channel
pub const CHANNEL_US_MIN: u16 = 988;
pub const CHANNEL_US_MAX: u16 = 2012;

/// Channel value reported before any frame arrives
pub const CHANNEL_US_DEFAULT: u16 = 1500;

/// Link Statistics payload size
pub const CRSF_LINK_STATS_PAYLOAD_SIZE: usize = 10;

/// Battery Sensor payload size
pub const CRSF_BATTERY_SENSOR_PAYLOAD_SIZE: usize = 8;

/// GPS payload size
pub const CRSF_GPS_PAYLOAD_SIZE: usize = 15;

/// Raw RC channels array type (16 channels, 11-bit values)
pub type RcChannels = [u16; CRSF_NUM_CHANNELS];

/// Smoothed channel values in microseconds, with the time of the last
/// structurally valid frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSet {
    /// Channel values in microseconds (index 0 is channel 1)
    pub channels: [u16; CRSF_NUM_CHANNELS],

    /// When the last valid CRSF frame was completed
    pub updated_at: Instant,
}

impl ChannelSet {
    /// All channels at [`CHANNEL_US_DEFAULT`], stamped `now`.
    pub fn centered(now: Instant) -> Self {
        Self {
            channels: [CHANNEL_US_DEFAULT; CRSF_NUM_CHANNELS],
            updated_at: now,
        }
    }
}

/// Link statistics telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStatistics {
    /// Uplink RSSI (antenna 1) in -dBm
    pub uplink_rssi_1: u8,

    /// Uplink RSSI (antenna 2) in -dBm (diversity)
    pub uplink_rssi_2: u8,

    /// Uplink link quality (0-100%)
    pub uplink_lq: u8,

    /// Uplink SNR in dB
    pub uplink_snr: i8,

    /// Active antenna (0 or 1)
    pub active_antenna: u8,

    /// RF mode / packet rate
    pub rf_mode: u8,

    /// Uplink TX power (encoded)
    pub uplink_tx_power: u8,

    /// Downlink RSSI in -dBm
    pub downlink_rssi: u8,

    /// Downlink link quality (0-100%)
    pub downlink_lq: u8,

    /// Downlink SNR in dB
    pub downlink_snr: i8,
}

/// Battery sensor telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatterySensor {
    /// Battery voltage in volts
    pub voltage: f32,

    /// Current draw in amperes
    pub current: f32,

    /// Capacity used in mAh
    pub capacity_used: u32,

    /// Battery remaining percentage (0-100%)
    pub remaining_percent: u8,
}

/// GPS telemetry data
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsData {
    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Ground speed in km/h
    pub ground_speed: f32,

    /// Heading in degrees
    pub heading: f32,

    /// Altitude in meters
    pub altitude: i16,

    /// Number of satellites
    pub satellites: u8,
}

/// CRSF frame structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrsfFrame {
    /// Destination address (frame start byte)
    pub device_address: u8,

    /// Frame type
    pub frame_type: u8,

    /// Payload data
    pub payload: Vec<u8>,

    /// CRC8 over type + payload
    pub crc: u8,
}

impl CrsfFrame {
    /// Create a new CRSF frame, computing its CRC
    ///
    /// # Arguments
    ///
    /// * `device_address` - Address byte the frame starts with
    /// * `frame_type` - Frame type byte
    /// * `payload` - Payload data (max 62 bytes)
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::PayloadTooLarge`] if payload exceeds
    /// `CRSF_MAX_PAYLOAD_SIZE` (62 bytes)
    pub fn new(device_address: u8, frame_type: u8, payload: Vec<u8>) -> Result<Self, DecodeError> {
        if payload.len() > CRSF_MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge {
                len: payload.len(),
                max: CRSF_MAX_PAYLOAD_SIZE,
            });
        }

        let crc = frame_crc(frame_type, &payload);

        Ok(Self {
            device_address,
            frame_type,
            payload,
            crc,
        })
    }

    /// Get frame length byte (type + payload + crc)
    ///
    /// This is guaranteed not to overflow since payload is validated to be ≤ 62 bytes
    pub fn length(&self) -> u8 {
        (1 + self.payload.len() + 1) as u8
    }

    /// Serialize to wire bytes: address, length, type, payload, crc
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(CRSF_FRAME_HEADER_BYTES + self.length() as usize);
        bytes.push(self.device_address);
        bytes.push(self.length());
        bytes.push(self.frame_type);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.crc);
        bytes
    }
}

/// CRC8 over `[frame_type, payload...]`
pub(crate) fn frame_crc(frame_type: u8, payload: &[u8]) -> u8 {
    let mut covered = Vec::with_capacity(1 + payload.len());
    covered.push(frame_type);
    covered.extend_from_slice(payload);
    crc8_dvb_s2(&covered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(CRSF_ADDRESS_FLIGHT_CONTROLLER, 0xC8);
        assert_eq!(CRSF_FRAMETYPE_RC_CHANNELS_PACKED, 0x16);
        assert_eq!(CRSF_FRAMETYPE_LINK_STATISTICS, 0x14);
        assert_eq!(CRSF_NUM_CHANNELS, 16);
        assert_eq!(CRSF_MAX_PAYLOAD_SIZE, 62);
    }

    #[test]
    fn test_crsf_frame() {
        let frame = CrsfFrame::new(
            CRSF_ADDRESS_FLIGHT_CONTROLLER,
            CRSF_FRAMETYPE_RC_CHANNELS_PACKED,
            vec![0u8; 22],
        )
        .unwrap();
        assert_eq!(frame.frame_type, 0x16);
        assert_eq!(frame.payload.len(), 22);
        assert_eq!(frame.length(), CRSF_RC_CHANNELS_FRAME_LENGTH);
    }

    #[test]
    fn test_crc_excludes_address_and_length() {
        let payload = vec![1u8, 2, 3];
        let frame = CrsfFrame::new(0xC8, 0x7F, payload.clone()).unwrap();
        let other_address = CrsfFrame::new(0xEE, 0x7F, payload).unwrap();

        assert_eq!(frame.crc, crc8_dvb_s2(&[0x7F, 1, 2, 3]));
        assert_eq!(frame.crc, other_address.crc);
    }

    #[test]
    fn test_to_bytes_layout() {
        let frame = CrsfFrame::new(0xC8, 0x14, vec![0xAA, 0xBB]).unwrap();
        let bytes = frame.to_bytes();

        assert_eq!(bytes, vec![0xC8, 4, 0x14, 0xAA, 0xBB, frame.crc]);
        assert_eq!(bytes[1] as usize, frame.payload.len() + 2);
    }

    #[test]
    fn test_crsf_frame_payload_too_large() {
        let result = CrsfFrame::new(0xC8, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 63]);
        assert_eq!(
            result,
            Err(DecodeError::PayloadTooLarge { len: 63, max: 62 })
        );
    }

    #[test]
    fn test_crsf_frame_max_payload() {
        let frame = CrsfFrame::new(0xC8, CRSF_FRAMETYPE_RC_CHANNELS_PACKED, vec![0u8; 62]).unwrap();
        assert_eq!(frame.payload.len(), 62);
        assert_eq!(frame.length() as usize, CRSF_MAX_FRAME_SIZE);
        assert_eq!(frame.to_bytes().len(), CRSF_FRAME_HEADER_BYTES + CRSF_MAX_FRAME_SIZE);
    }
}
