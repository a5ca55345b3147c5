//! # CRSF Stream Parser
//!
//! Finds and validates CRSF frames in an unsynchronized byte stream.
//!
//! ```text
//! append(bytes) ──► [ buffer ] ──► process() ──► ParsedEvent...
//!                      │
//!                      └─ garbage / bad length / bad CRC: drop one byte, rescan
//! ```
//!
//! A candidate that fails validation only costs its leading address byte, so a
//! valid frame hidden inside a corrupted one is still found.

use bytes::{Buf, BytesMut};
use tracing::{debug, trace};

use super::decoder::decode_frame;
use super::protocol::*;
use crate::error::FramingError;

/// Parser settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserConfig {
    /// Address byte every accepted frame starts with
    pub device_address: u8,

    /// Largest accepted length byte (type through crc)
    pub max_frame_size: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            device_address: CRSF_ADDRESS_FLIGHT_CONTROLLER,
            max_frame_size: CRSF_MAX_FRAME_SIZE,
        }
    }
}

/// A validated frame, tagged by its frame type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedEvent {
    /// `0x16` packed RC channels
    RcChannels(CrsfFrame),
    /// `0x14` link statistics
    LinkStatistics(CrsfFrame),
    /// `0x08` battery sensor
    BatterySensor(CrsfFrame),
    /// `0x02` GPS
    Gps(CrsfFrame),
    /// Any other frame type, passed through untouched
    Raw(CrsfFrame),
}

impl ParsedEvent {
    fn from_frame(frame: CrsfFrame) -> Self {
        match frame.frame_type {
            CRSF_FRAMETYPE_RC_CHANNELS_PACKED => Self::RcChannels(frame),
            CRSF_FRAMETYPE_LINK_STATISTICS => Self::LinkStatistics(frame),
            CRSF_FRAMETYPE_BATTERY_SENSOR => Self::BatterySensor(frame),
            CRSF_FRAMETYPE_GPS => Self::Gps(frame),
            _ => Self::Raw(frame),
        }
    }

    /// The underlying frame
    pub fn frame(&self) -> &CrsfFrame {
        match self {
            Self::RcChannels(frame)
            | Self::LinkStatistics(frame)
            | Self::BatterySensor(frame)
            | Self::Gps(frame)
            | Self::Raw(frame) => frame,
        }
    }
}

/// Counters for recovered corruption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Frames that passed validation
    pub frames: u64,
    /// Bytes dropped while resynchronizing
    pub bytes_discarded: u64,
    /// Candidates rejected by CRC
    pub crc_errors: u64,
    /// Candidates rejected by their length byte
    pub invalid_lengths: u64,
}

/// Buffering CRSF frame parser
#[derive(Debug)]
pub struct CrsfFrameParser {
    buffer: BytesMut,
    config: ParserConfig,
    stats: ParserStats,
}

impl Default for CrsfFrameParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl CrsfFrameParser {
    /// Creates a parser with an empty buffer.
    ///
    /// `max_frame_size` is capped at [`CRSF_MAX_FRAME_SIZE`].
    pub fn new(config: ParserConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity((CRSF_FRAME_HEADER_BYTES + CRSF_MAX_FRAME_SIZE) * 2),
            config: ParserConfig {
                max_frame_size: config.max_frame_size.min(CRSF_MAX_FRAME_SIZE),
                ..config
            },
            stats: ParserStats::default(),
        }
    }

    /// Append incoming bytes to the buffer
    pub fn append(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Corruption counters since creation
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Iterate over the frames currently available in the buffer.
    ///
    /// The iterator stops when the buffer holds no complete candidate; an
    /// incomplete frame stays buffered untouched until more bytes are appended
    /// and `process` is called again.
    pub fn process(&mut self) -> Process<'_> {
        Process { parser: self }
    }

    fn discard_leading(&mut self) {
        self.buffer.advance(1);
        self.stats.bytes_discarded += 1;
    }

    fn next_event(&mut self) -> Option<ParsedEvent> {
        let address = self.config.device_address;

        loop {
            if self.buffer.len() < CRSF_FRAME_HEADER_BYTES {
                return None;
            }

            if self.buffer[0] != address {
                trace!("Dropping non-address byte 0x{:02X}", self.buffer[0]);
                self.discard_leading();
                continue;
            }

            let length_byte = self.buffer[1];
            let total = CRSF_FRAME_HEADER_BYTES + length_byte as usize;
            if length_byte < CRSF_MIN_LENGTH_BYTE || length_byte as usize > self.config.max_frame_size {
                debug!("{}", FramingError::LengthInvalid(length_byte));
                self.stats.invalid_lengths += 1;
                self.discard_leading();
                continue;
            }

            if self.buffer.len() < total {
                return None;
            }

            match decode_frame(&self.buffer[..total], address) {
                Ok(frame) => {
                    self.buffer.advance(total);
                    self.stats.frames += 1;
                    return Some(ParsedEvent::from_frame(frame));
                }
                Err(err) => {
                    debug!("Discarding CRSF candidate: {}", err);
                    if matches!(err, FramingError::Crc { .. }) {
                        self.stats.crc_errors += 1;
                    }
                    self.discard_leading();
                }
            }
        }
    }
}

/// Iterator returned by [`CrsfFrameParser::process`]
pub struct Process<'a> {
    parser: &'a mut CrsfFrameParser,
}

impl Iterator for Process<'_> {
    type Item = ParsedEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_event()
    }
}
