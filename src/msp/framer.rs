//! # MSP Framer
//!
//! Encodes requests and decodes responses.
//!
//! Response decoding is a byte-driven state machine:
//!
//! ```text
//! SeekHeader ──"$M>"/"$M!"──► ReadLength ──► ReadCommand ──► ReadPayload ──► ReadChecksum
//!     ▲                                                                         │
//!     └──────────────── checksum mismatch (frame discarded) ◄───────────────────┤
//!                                                                               ▼
//!                                                                             Done
//! ```
//!
//! Bytes that do not continue a header are skipped one at a time and kept, in
//! stream order, for [`MspFramer::take_passthrough`]: they usually belong to
//! the CRSF stream sharing the link. A bad checksum throws away that frame only
//! and scanning resumes, so a corrupted reply followed by a good one still
//! succeeds within the same deadline.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use super::checksum;
use super::protocol::*;
use crate::error::{DecodeError, FramingError, MspError};
use crate::serial::port_trait::Transport;

/// Delay between empty reads while waiting for a response
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Encode a request frame: `"$M<" length command payload checksum`
///
/// # Errors
///
/// Returns [`DecodeError::PayloadTooLarge`] if `payload` exceeds 255 bytes
///
/// # Examples
///
/// ```
/// use fc_link::msp::framer::encode_request;
///
/// let bytes = encode_request(101, &[]).unwrap();
/// assert_eq!(bytes, b"$M<\x00\x65\x65".to_vec());
/// ```
pub fn encode_request(command: u8, payload: &[u8]) -> Result<Vec<u8>, DecodeError> {
    MspFrame::new(Direction::Request, command, payload.to_vec()).map(|frame| frame.to_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DecodeState {
    /// Number of header bytes matched so far (0-2)
    SeekHeader { matched: u8 },
    ReadLength,
    ReadCommand,
    ReadPayload,
    ReadChecksum,
}

/// Counters for discarded input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MspStats {
    /// Frames that passed the checksum
    pub frames: u64,
    /// Bytes dropped while looking for a header
    pub bytes_discarded: u64,
    /// Frames rejected by checksum
    pub checksum_errors: u64,
}

/// MSP response decoder context.
///
/// Feed bytes with [`push_bytes`](Self::push_bytes), or let
/// [`decode_response`](Self::decode_response) pull them from a transport.
#[derive(Debug)]
pub struct MspFramer {
    state: DecodeState,
    direction: Direction,
    length: u8,
    command: u8,
    payload: Vec<u8>,
    /// Bytes read past the end of the last decoded frame, not yet scanned
    pending: Vec<u8>,
    /// Bytes skipped while seeking a header
    passthrough: Vec<u8>,
    /// Bytes discarded since the last `reset`
    discarded: usize,
    stats: MspStats,
    poll_interval: Duration,
}

impl Default for MspFramer {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl MspFramer {
    /// Creates a framer waiting for a header
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            state: DecodeState::SeekHeader { matched: 0 },
            direction: Direction::Response,
            length: 0,
            command: 0,
            payload: Vec::with_capacity(MSP_MAX_PAYLOAD_SIZE),
            pending: Vec::new(),
            passthrough: Vec::new(),
            discarded: 0,
            stats: MspStats::default(),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Return to `SeekHeader`, dropping any partial frame.
    ///
    /// Pending and skipped bytes are kept.
    pub fn reset(&mut self) {
        self.state = DecodeState::SeekHeader { matched: 0 };
        self.payload.clear();
        self.discarded = 0;
    }

    /// Whether a frame is partially decoded
    pub fn in_frame(&self) -> bool {
        !matches!(self.state, DecodeState::SeekHeader { .. })
    }

    /// Discard counters since creation
    pub fn stats(&self) -> MspStats {
        self.stats
    }

    /// Take the bytes that followed the last decoded frame in the same read.
    ///
    /// Until taken, the next [`decode_response`](Self::decode_response) scans
    /// them before reading from the transport.
    pub fn take_leftover(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }

    /// Take the non-MSP bytes skipped while seeking a header, oldest first
    pub fn take_passthrough(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.passthrough)
    }

    fn discard(&mut self, count: usize) {
        self.discarded += count;
        self.stats.bytes_discarded += count as u64;
    }

    fn skip(&mut self, bytes: &[u8]) {
        self.discard(bytes.len());
        self.passthrough.extend_from_slice(bytes);
    }

    /// Feed bytes into the state machine.
    ///
    /// Returns the first completed response (direction `Response` or `Error`)
    /// and the number of bytes consumed; bytes after the frame are not touched.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> (Option<MspFrame>, usize) {
        for (index, &byte) in bytes.iter().enumerate() {
            if let Some(frame) = self.step(byte) {
                return (Some(frame), index + 1);
            }
        }
        (None, bytes.len())
    }

    fn step(&mut self, byte: u8) -> Option<MspFrame> {
        match self.state {
            DecodeState::SeekHeader { matched: 0 } => {
                if byte == MSP_PREAMBLE[0] {
                    self.state = DecodeState::SeekHeader { matched: 1 };
                } else {
                    self.skip(&[byte]);
                }
            }
            DecodeState::SeekHeader { matched: 1 } => {
                if byte == MSP_PREAMBLE[1] {
                    self.state = DecodeState::SeekHeader { matched: 2 };
                } else {
                    self.restart_header(byte, 1);
                }
            }
            DecodeState::SeekHeader { .. } => match Direction::from_byte(byte) {
                Some(direction @ (Direction::Response | Direction::Error)) => {
                    self.direction = direction;
                    self.state = DecodeState::ReadLength;
                }
                _ => self.restart_header(byte, 2),
            },
            DecodeState::ReadLength => {
                self.length = byte;
                self.state = DecodeState::ReadCommand;
            }
            DecodeState::ReadCommand => {
                self.command = byte;
                self.payload.clear();
                self.state = if self.length == 0 {
                    DecodeState::ReadChecksum
                } else {
                    DecodeState::ReadPayload
                };
            }
            DecodeState::ReadPayload => {
                self.payload.push(byte);
                if self.payload.len() == self.length as usize {
                    self.state = DecodeState::ReadChecksum;
                }
            }
            DecodeState::ReadChecksum => {
                self.state = DecodeState::SeekHeader { matched: 0 };

                if !checksum::validate(self.length, self.command, &self.payload, byte) {
                    let err = FramingError::Checksum {
                        expected: checksum::compute(self.length, self.command, &self.payload),
                        actual: byte,
                    };
                    debug!("Discarding MSP frame for command {}: {}", self.command, err);
                    self.stats.checksum_errors += 1;
                    self.discard(MSP_HEADER_SIZE + self.payload.len() + 1);
                    self.payload.clear();
                    return None;
                }

                self.stats.frames += 1;
                return Some(MspFrame {
                    command: self.command,
                    payload: std::mem::take(&mut self.payload),
                    direction: self.direction,
                });
            }
        }
        None
    }

    /// A header broke off after `matched` bytes; `byte` may start a new one.
    fn restart_header(&mut self, byte: u8, matched: usize) {
        self.skip(&MSP_PREAMBLE[..matched]);
        if byte == MSP_PREAMBLE[0] {
            self.state = DecodeState::SeekHeader { matched: 1 };
        } else {
            self.skip(&[byte]);
            self.state = DecodeState::SeekHeader { matched: 0 };
        }
    }

    /// Read from `source` until a validated response arrives or `timeout` elapses.
    ///
    /// Starts from `SeekHeader` and always leaves the machine there. Leftover
    /// bytes from the previous call are scanned before `source` is read. Bytes
    /// that follow the decoded frame in the same read are kept for
    /// [`take_leftover`](Self::take_leftover).
    ///
    /// # Errors
    ///
    /// - [`MspError::Transport`] if a read fails
    /// - [`MspError::Desync`] if bytes arrived but none formed a valid frame
    /// - [`MspError::Timeout`] if nothing (or only an unfinished frame) arrived
    pub async fn decode_response<T>(&mut self, source: &mut T, timeout: Duration) -> Result<MspFrame, MspError>
    where
        T: Transport + ?Sized,
    {
        self.reset();
        let deadline = Instant::now() + timeout;

        loop {
            let chunk = if self.pending.is_empty() {
                match source.read_available().await {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        self.reset();
                        return Err(MspError::Transport(e));
                    }
                }
            } else {
                std::mem::take(&mut self.pending)
            };

            if !chunk.is_empty() {
                trace!("MSP scanning {} bytes", chunk.len());
                let (frame, consumed) = self.push_bytes(&chunk);
                if let Some(frame) = frame {
                    self.pending.extend_from_slice(&chunk[consumed..]);
                    self.reset();
                    return Ok(frame);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.expire(timeout));
            }

            if chunk.is_empty() {
                tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
            }
        }
    }

    fn expire(&mut self, timeout: Duration) -> MspError {
        let err = if self.in_frame() {
            let err = FramingError::Truncated {
                expected: MSP_HEADER_SIZE + self.length as usize + 1,
                actual: MSP_HEADER_SIZE + self.payload.len(),
            };
            warn!("MSP response cut short: {}", err);
            MspError::Timeout(timeout)
        } else if self.discarded > 0 {
            MspError::Desync {
                discarded: self.discarded,
            }
        } else {
            MspError::Timeout(timeout)
        };

        self.reset();
        err
    }
}
