//! # MSP Protocol Constants and Types
//!
//! MSP v1 frames: `'$' 'M' <direction> length command payload checksum`.
//!
//! Typed payloads cover the commands used for status polling and RC override.
//! Interpreting the flag field beyond the armed bit is left to callers.

use super::checksum;
use crate::error::DecodeError;

/// Frame preamble shared by every MSP v1 frame
pub const MSP_PREAMBLE: [u8; 2] = [b'$', b'M'];

/// Header bytes (`$`, `M`, direction) plus length and command
pub const MSP_HEADER_SIZE: usize = 5;

/// Largest payload an 8-bit length field can carry
pub const MSP_MAX_PAYLOAD_SIZE: usize = 255;

/// Cycle time, I2C errors, sensors, flags, config
pub const MSP_STATUS_PAYLOAD_SIZE: usize = 11;

/// Roll, pitch, yaw
pub const MSP_ATTITUDE_PAYLOAD_SIZE: usize = 6;

/// Altitude, vario
pub const MSP_ALTITUDE_PAYLOAD_SIZE: usize = 6;

/// Accelerometer, gyro and magnetometer, three i16 axes each
pub const MSP_RAW_IMU_PAYLOAD_SIZE: usize = 18;

/// Channels that fit in one `MSP_SET_RAW_RC` payload
pub const MSP_MAX_RAW_RC_CHANNELS: usize = MSP_MAX_PAYLOAD_SIZE / 2;

/// Command codes
pub mod commands {
    /// Status flags, sensors and cycle time
    pub const MSP_STATUS: u8 = 101;
    /// Raw accelerometer, gyro and magnetometer readings
    pub const MSP_RAW_IMU: u8 = 102;
    /// Roll/pitch/yaw attitude
    pub const MSP_ATTITUDE: u8 = 108;
    /// Barometric altitude and vario
    pub const MSP_ALTITUDE: u8 = 109;
    /// Raw RC channel override
    pub const MSP_SET_RAW_RC: u8 = 200;
    /// Arming flag
    pub const MSP_SET_ARMING: u8 = 214;
}

/// Frame direction, encoded as the third header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to device (`<`)
    Request,
    /// Device to host (`>`)
    Response,
    /// Device could not process the request (`!`)
    Error,
}

impl Direction {
    /// Header byte for this direction
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Request => b'<',
            Self::Response => b'>',
            Self::Error => b'!',
        }
    }

    /// Direction for a header byte, if it is one
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            b'<' => Some(Self::Request),
            b'>' => Some(Self::Response),
            b'!' => Some(Self::Error),
            _ => None,
        }
    }
}

/// A complete MSP v1 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MspFrame {
    /// Command code
    pub command: u8,

    /// Payload data (0-255 bytes)
    pub payload: Vec<u8>,

    /// Request, response or error
    pub direction: Direction,
}

impl MspFrame {
    /// Create a frame
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::PayloadTooLarge`] if payload exceeds 255 bytes
    pub fn new(direction: Direction, command: u8, payload: Vec<u8>) -> Result<Self, DecodeError> {
        if payload.len() > MSP_MAX_PAYLOAD_SIZE {
            return Err(DecodeError::PayloadTooLarge {
                len: payload.len(),
                max: MSP_MAX_PAYLOAD_SIZE,
            });
        }

        Ok(Self {
            command,
            payload,
            direction,
        })
    }

    /// Length byte; always equals the payload length
    pub fn length(&self) -> u8 {
        self.payload.len() as u8
    }

    /// Checksum over length, command and payload
    pub fn checksum(&self) -> u8 {
        checksum::compute(self.length(), self.command, &self.payload)
    }

    /// Serialize to wire bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(MSP_HEADER_SIZE + self.payload.len() + 1);
        bytes.extend_from_slice(&MSP_PREAMBLE);
        bytes.push(self.direction.as_byte());
        bytes.push(self.length());
        bytes.push(self.command);
        bytes.extend_from_slice(&self.payload);
        bytes.push(self.checksum());
        bytes
    }
}

/// `MSP_STATUS` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MspStatus {
    /// Main loop cycle time in µs
    pub cycle_time: u16,
    /// I2C error counter
    pub i2c_errors: u16,
    /// Detected sensor bitmask
    pub sensors: u16,
    /// Active box/mode flags; bit 0 is armed
    pub flags: u32,
    /// Current config profile
    pub config: u8,
}

impl MspStatus {
    /// Parse the first 11 bytes of an `MSP_STATUS` payload (little-endian).
    ///
    /// Firmwares append extra fields after these; they are ignored.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MSP_STATUS_PAYLOAD_SIZE {
            return Err(DecodeError::InvalidPayloadLength {
                expected: MSP_STATUS_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }

        Ok(Self {
            cycle_time: u16::from_le_bytes([payload[0], payload[1]]),
            i2c_errors: u16::from_le_bytes([payload[2], payload[3]]),
            sensors: u16::from_le_bytes([payload[4], payload[5]]),
            flags: u32::from_le_bytes([payload[6], payload[7], payload[8], payload[9]]),
            config: payload[10],
        })
    }

    /// Bit 0 of the flag field
    pub fn armed(&self) -> bool {
        self.flags & 0x01 != 0
    }
}

/// `MSP_ATTITUDE` reply
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attitude {
    /// Roll in degrees
    pub roll: f32,
    /// Pitch in degrees
    pub pitch: f32,
    /// Heading in degrees
    pub yaw: i16,
}

impl Attitude {
    /// Parse an `MSP_ATTITUDE` payload; roll and pitch arrive in tenths of a degree.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MSP_ATTITUDE_PAYLOAD_SIZE {
            return Err(DecodeError::InvalidPayloadLength {
                expected: MSP_ATTITUDE_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }

        Ok(Self {
            roll: i16::from_le_bytes([payload[0], payload[1]]) as f32 / 10.0,
            pitch: i16::from_le_bytes([payload[2], payload[3]]) as f32 / 10.0,
            yaw: i16::from_le_bytes([payload[4], payload[5]]),
        })
    }
}

/// `MSP_ALTITUDE` reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Altitude {
    /// Estimated altitude in centimeters
    pub altitude_cm: i32,
    /// Vertical speed in cm/s
    pub vario: i16,
}

impl Altitude {
    /// Parse an `MSP_ALTITUDE` payload: i32 centimeters then i16 cm/s.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MSP_ALTITUDE_PAYLOAD_SIZE {
            return Err(DecodeError::InvalidPayloadLength {
                expected: MSP_ALTITUDE_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }

        Ok(Self {
            altitude_cm: i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]),
            vario: i16::from_le_bytes([payload[4], payload[5]]),
        })
    }

    /// Altitude in meters
    pub fn meters(&self) -> f32 {
        self.altitude_cm as f32 / 100.0
    }
}

/// `MSP_RAW_IMU` reply, in sensor units (X, Y, Z)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawImu {
    /// Accelerometer
    pub acc: [i16; 3],
    /// Gyro rates
    pub gyro: [i16; 3],
    /// Magnetometer
    pub mag: [i16; 3],
}

impl RawImu {
    /// Parse an `MSP_RAW_IMU` payload: nine little-endian i16 values.
    pub fn parse(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.len() < MSP_RAW_IMU_PAYLOAD_SIZE {
            return Err(DecodeError::InvalidPayloadLength {
                expected: MSP_RAW_IMU_PAYLOAD_SIZE,
                actual: payload.len(),
            });
        }

        let axis = |i: usize| i16::from_le_bytes([payload[i * 2], payload[i * 2 + 1]]);
        let triple = |first: usize| [axis(first), axis(first + 1), axis(first + 2)];

        Ok(Self {
            acc: triple(0),
            gyro: triple(3),
            mag: triple(6),
        })
    }
}

/// Encode channel values (µs) as an `MSP_SET_RAW_RC` payload, two bytes
/// little-endian per channel.
///
/// # Errors
///
/// Returns [`DecodeError::PayloadTooLarge`] for more than 127 channels
pub fn encode_raw_rc(channels: &[u16]) -> Result<Vec<u8>, DecodeError> {
    if channels.len() > MSP_MAX_RAW_RC_CHANNELS {
        return Err(DecodeError::PayloadTooLarge {
            len: channels.len() * 2,
            max: MSP_MAX_PAYLOAD_SIZE,
        });
    }

    Ok(channels.iter().flat_map(|ch| ch.to_le_bytes()).collect())
}
