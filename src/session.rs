//! # Protocol Session
//!
//! Owns the transport and every piece of protocol state for one flight
//! controller link.
//!
//! ```text
//!                ┌──────── tokio Mutex (access token) ────────┐
//! issue_command ─┤ transport.write ─► MspFramer.decode_response├─► MspFrame
//! poll ──────────┤ transport.read_available                    │
//!                └──────────────┬──────────────────────────────┘
//!                               ▼ bytes (incl. MSP leftovers)
//! ingest_bytes ──► CrsfFrameParser ─► decode ─► MedianFilter x16 ─► Event
//! ```
//!
//! The access token serializes MSP round trips and reads from the shared
//! transport, so CRSF ingestion from the transport pauses while a command is
//! in flight. Streaming state sits behind its own short-lived lock and is
//! never held across an `.await`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::crsf::decoder::{decode_battery_sensor, decode_gps, decode_link_statistics, decode_rc_channels};
use crate::crsf::parser::{CrsfFrameParser, ParsedEvent, ParserConfig, ParserStats};
use crate::crsf::protocol::*;
use crate::error::{DecodeError, MspError};
use crate::filter::{MedianFilter, DEFAULT_WINDOW_SIZE};
use crate::msp::framer::{encode_request, MspFramer, MspStats, DEFAULT_POLL_INTERVAL};
use crate::msp::protocol::{Direction, MspFrame};
use crate::serial::port_trait::Transport;

/// Default deadline for [`ProtocolSession::request`]
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(1000);

/// Session settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// CRSF address byte accepted by the parser
    pub device_address: u8,
    /// Largest accepted CRSF length byte
    pub max_frame_size: usize,
    /// Median filter window per channel
    pub median_window: usize,
    /// Delay between empty reads while waiting for an MSP response
    pub poll_interval: Duration,
    /// Deadline used by [`ProtocolSession::request`]
    pub command_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_address: CRSF_ADDRESS_FLIGHT_CONTROLLER,
            max_frame_size: CRSF_MAX_FRAME_SIZE,
            median_window: DEFAULT_WINDOW_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

/// Something decoded from the CRSF stream
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Filtered channel values after an RC channels frame
    ChannelUpdate(ChannelSet),
    /// Link statistics telemetry
    LinkStats(LinkStatistics),
    /// Battery sensor telemetry
    Battery(BatterySensor),
    /// GPS telemetry
    Gps(GpsData),
    /// A valid frame of a type without a decoder, or whose payload did not decode
    RawFrame(CrsfFrame),
}

struct Link<T> {
    transport: T,
    msp: MspFramer,
}

struct StreamState {
    parser: CrsfFrameParser,
    filters: [MedianFilter; CRSF_NUM_CHANNELS],
    channels: ChannelSet,
    last_frame_at: Instant,
    /// Events decoded from bytes that arrived during an MSP round trip
    pending: Vec<Event>,
}

impl StreamState {
    fn ingest(&mut self, bytes: &[u8], out: &mut Vec<Event>) {
        let Self {
            parser,
            filters,
            channels,
            last_frame_at,
            pending: _,
        } = self;

        parser.append(bytes);
        for parsed in parser.process() {
            let now = Instant::now();
            *last_frame_at = now;
            channels.updated_at = now;

            let event = match parsed {
                ParsedEvent::RcChannels(frame) => match decode_rc_channels(&frame.payload) {
                    Ok(values) => {
                        for ((slot, filter), value) in channels.channels.iter_mut().zip(filters.iter_mut()).zip(values) {
                            *slot = filter.update(value);
                        }
                        Event::ChannelUpdate(*channels)
                    }
                    Err(e) => undecodable(frame, e),
                },
                ParsedEvent::LinkStatistics(frame) => match decode_link_statistics(&frame.payload) {
                    Ok(stats) => Event::LinkStats(stats),
                    Err(e) => undecodable(frame, e),
                },
                ParsedEvent::BatterySensor(frame) => match decode_battery_sensor(&frame.payload) {
                    Ok(battery) => Event::Battery(battery),
                    Err(e) => undecodable(frame, e),
                },
                ParsedEvent::Gps(frame) => match decode_gps(&frame.payload) {
                    Ok(gps) => Event::Gps(gps),
                    Err(e) => undecodable(frame, e),
                },
                ParsedEvent::Raw(frame) => Event::RawFrame(frame),
            };
            out.push(event);
        }
    }
}

fn undecodable(frame: CrsfFrame, err: DecodeError) -> Event {
    warn!("CRSF frame type 0x{:02X} did not decode: {}", frame.frame_type, err);
    Event::RawFrame(frame)
}

/// MSP command and CRSF stream engine over one transport.
///
/// All methods take `&self`; share the session behind an `Arc` to issue
/// commands and ingest the stream from different tasks.
pub struct ProtocolSession<T: Transport> {
    link: tokio::sync::Mutex<Link<T>>,
    stream: Mutex<StreamState>,
    command_timeout: Duration,
}

impl<T: Transport> std::fmt::Debug for ProtocolSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolSession")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> ProtocolSession<T> {
    /// Take ownership of `transport`. The transport is expected to be open
    /// already; the session never opens or configures it.
    pub fn new(transport: T, config: SessionConfig) -> Self {
        let now = Instant::now();
        let parser = CrsfFrameParser::new(ParserConfig {
            device_address: config.device_address,
            max_frame_size: config.max_frame_size,
        });

        Self {
            link: tokio::sync::Mutex::new(Link {
                transport,
                msp: MspFramer::new(config.poll_interval),
            }),
            stream: Mutex::new(StreamState {
                parser,
                filters: std::array::from_fn(|_| MedianFilter::new(config.median_window)),
                channels: ChannelSet::centered(now),
                last_frame_at: now,
                pending: Vec::new(),
            }),
            command_timeout: config.command_timeout,
        }
    }

    fn stream(&self) -> MutexGuard<'_, StreamState> {
        self.stream.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Feed raw stream bytes and return the events they completed, in frame order.
    ///
    /// Events decoded from bytes that trailed an MSP response are returned
    /// first. Never performs I/O.
    pub fn ingest_bytes(&self, bytes: &[u8]) -> Vec<Event> {
        let mut state = self.stream();
        let mut events = std::mem::take(&mut state.pending);
        state.ingest(bytes, &mut events);
        events
    }

    /// Read whatever the transport has available and ingest it.
    ///
    /// Waits for any in-flight command to finish first.
    ///
    /// # Errors
    ///
    /// [`MspError::TransportClosed`] or [`MspError::Transport`]
    pub async fn poll(&self) -> Result<Vec<Event>, MspError> {
        let bytes = {
            let mut link = self.link.lock().await;
            if !link.transport.is_open() {
                return Err(MspError::TransportClosed);
            }
            link.transport.read_available().await?
        };
        Ok(self.ingest_bytes(&bytes))
    }

    /// Send `command` and wait for its validated response.
    ///
    /// Round trips are serialized. Well-formed responses to a different command
    /// are discarded and waiting continues within the same deadline.
    ///
    /// # Errors
    ///
    /// - [`MspError::Decode`] if `payload` exceeds 255 bytes
    /// - [`MspError::TransportClosed`] / [`MspError::Transport`] on link failure
    /// - [`MspError::Rejected`] if the device answered with an error frame
    /// - [`MspError::Timeout`] / [`MspError::Desync`] if no valid response arrived in time
    pub async fn issue_command(&self, command: u8, payload: &[u8], timeout: Duration) -> Result<MspFrame, MspError> {
        let request = encode_request(command, payload)?;

        let mut link = self.link.lock().await;
        let Link { transport, msp } = &mut *link;

        if !transport.is_open() {
            return Err(MspError::TransportClosed);
        }

        transport.write(&request).await?;
        debug!("Sent MSP command {} ({} byte payload)", command, payload.len());

        let deadline = Instant::now() + timeout;
        let outcome = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = msp.decode_response(transport, remaining).await;

            // Stream bytes that preceded the frame, in arrival order
            self.queue_stream_bytes(&msp.take_passthrough());

            match result {
                Ok(frame) if frame.command != command => {
                    // Bytes after a stale reply stay in the framer for the next scan
                    warn!("Discarding stale MSP response for command {} (waiting for {})", frame.command, command);
                }
                Ok(frame) if frame.direction == Direction::Error => break Err(MspError::Rejected { command }),
                Ok(frame) => break Ok(frame),
                Err(MspError::Timeout(_)) => break Err(MspError::Timeout(timeout)),
                Err(e) => break Err(e),
            }
        };

        self.queue_stream_bytes(&msp.take_leftover());
        outcome
    }

    /// Parse stream bytes seen during an MSP round trip; their events are
    /// returned by the next `ingest_bytes` or `poll`.
    fn queue_stream_bytes(&self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut state = self.stream();
        let mut pending = std::mem::take(&mut state.pending);
        state.ingest(bytes, &mut pending);
        state.pending = pending;
    }

    /// [`issue_command`](Self::issue_command) with the configured timeout
    pub async fn request(&self, command: u8, payload: &[u8]) -> Result<MspFrame, MspError> {
        self.issue_command(command, payload, self.command_timeout).await
    }

    /// Filtered value of `channel` (1-16) in microseconds; 1500 until the first update.
    ///
    /// # Errors
    ///
    /// [`DecodeError::OutOfRange`] outside 1-16
    pub fn get_channel(&self, channel: usize) -> Result<u16, DecodeError> {
        if !(1..=CRSF_NUM_CHANNELS).contains(&channel) {
            return Err(DecodeError::OutOfRange(channel));
        }
        Ok(self.stream().channels.channels[channel - 1])
    }

    /// Time since the last valid CRSF frame, or since construction if none arrived
    pub fn get_last_packet_age(&self) -> Duration {
        self.stream().last_frame_at.elapsed()
    }

    /// Snapshot of the current channel set
    pub fn channels(&self) -> ChannelSet {
        self.stream().channels
    }

    /// CRSF parser counters
    pub fn stats(&self) -> ParserStats {
        self.stream().parser.stats()
    }

    /// MSP framer counters; waits for any in-flight command
    pub async fn msp_stats(&self) -> MspStats {
        self.link.lock().await.msp.stats()
    }

    /// Tear down the session and hand the transport back
    pub fn into_transport(self) -> T {
        self.link.into_inner().transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crsf::encoder::{encode_frame, encode_rc_channels_frame};
    use crate::msp::protocol::commands::{MSP_ATTITUDE, MSP_STATUS};
    use crate::serial::port_trait::mocks::ScriptedTransport;
    use crate::serial::port_trait::MockTransport;
    use std::io;
    use tokio_test::{assert_err, assert_ok};

    const FC: u8 = CRSF_ADDRESS_FLIGHT_CONTROLLER;

    fn session() -> (ProtocolSession<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::new();
        (ProtocolSession::new(transport.clone(), SessionConfig::default()), transport)
    }

    fn rc_frame(raw: u16) -> Vec<u8> {
        encode_rc_channels_frame(FC, &[raw; CRSF_NUM_CHANNELS])
    }

    fn response(direction: Direction, command: u8, payload: &[u8]) -> Vec<u8> {
        MspFrame::new(direction, command, payload.to_vec()).unwrap().to_bytes()
    }

    #[test]
    fn test_config_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.device_address, 0xC8);
        assert_eq!(config.max_frame_size, 64);
        assert_eq!(config.median_window, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(2));
        assert_eq!(config.command_timeout, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_channels_default_to_center() {
        let (session, _) = session();
        for channel in 1..=16 {
            assert_eq!(session.get_channel(channel).unwrap(), 1500);
        }
    }

    #[tokio::test]
    async fn test_get_channel_out_of_range() {
        let (session, _) = session();
        assert_eq!(session.get_channel(0), Err(DecodeError::OutOfRange(0)));
        assert_eq!(session.get_channel(17), Err(DecodeError::OutOfRange(17)));
    }

    #[tokio::test]
    async fn test_garbage_then_rc_frame_yields_one_update() {
        let (session, _) = session();
        let mut bytes = vec![0x42];
        bytes.extend(rc_frame(CRSF_CHANNEL_VALUE_CENTER));

        let events = session.ingest_bytes(&bytes);
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::ChannelUpdate(set) => assert_eq!(set.channels, [1500; 16]),
            other => panic!("Expected channel update, got: {:?}", other),
        }
        assert_eq!(session.stats().bytes_discarded, 1);
    }

    #[tokio::test]
    async fn test_filter_warm_up_and_spike_rejection() {
        let (session, _) = session();

        // Warm-up: the first sample passes straight through
        session.ingest_bytes(&rc_frame(2047));
        assert_eq!(session.get_channel(1).unwrap(), 2044);

        session.ingest_bytes(&rc_frame(CRSF_CHANNEL_VALUE_CENTER));
        session.ingest_bytes(&rc_frame(CRSF_CHANNEL_VALUE_CENTER));
        assert_eq!(session.get_channel(1).unwrap(), 1500);

        session.ingest_bytes(&rc_frame(2047));
        assert_eq!(session.get_channel(16).unwrap(), 1500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_packet_age_grows_and_resets() {
        let (session, _) = session();

        tokio::time::advance(Duration::from_millis(10)).await;
        let first = session.get_last_packet_age();
        assert!(first >= Duration::from_millis(10));

        tokio::time::advance(Duration::from_millis(5)).await;
        let second = session.get_last_packet_age();
        assert!(second > first);

        let events = session.ingest_bytes(&encode_frame(FC, 0x29, &[1, 2]).unwrap());
        assert!(matches!(events[0], Event::RawFrame(_)));
        assert_eq!(session.get_last_packet_age(), Duration::ZERO);
        assert_eq!(session.channels().updated_at, Instant::now());
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_frame_does_not_reset_age() {
        let (session, _) = session();
        let mut frame = rc_frame(CRSF_CHANNEL_VALUE_CENTER);
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        tokio::time::advance(Duration::from_millis(20)).await;
        assert!(session.ingest_bytes(&frame).is_empty());
        assert!(session.get_last_packet_age() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn test_telemetry_events() {
        let (session, _) = session();
        let mut bytes = encode_frame(FC, CRSF_FRAMETYPE_LINK_STATISTICS, &[40, 42, 100, 9, 0, 4, 2, 50, 99, 8]).unwrap();
        bytes.extend(encode_frame(FC, CRSF_FRAMETYPE_BATTERY_SENSOR, &[0x00, 0xA8, 0x00, 0x0F, 0x00, 0x01, 0xF4, 75]).unwrap());

        let events = session.ingest_bytes(&bytes);
        assert_eq!(events.len(), 2);
        match &events[0] {
            Event::LinkStats(stats) => assert_eq!(stats.uplink_lq, 100),
            other => panic!("Expected link stats, got: {:?}", other),
        }
        assert!(matches!(events[1], Event::Battery(_)));
    }

    #[tokio::test]
    async fn test_short_telemetry_payload_is_raw_frame() {
        let (session, _) = session();
        let events = session.ingest_bytes(&encode_frame(FC, CRSF_FRAMETYPE_GPS, &[1, 2, 3]).unwrap());

        match &events[..] {
            [Event::RawFrame(frame)] => assert_eq!(frame.frame_type, CRSF_FRAMETYPE_GPS),
            other => panic!("Expected a raw frame, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_command_round_trip() {
        let (session, transport) = session();
        transport.push_incoming(&response(Direction::Response, MSP_STATUS, &[0u8; 11]));

        let frame = assert_ok!(session.issue_command(MSP_STATUS, &[], Duration::from_millis(100)).await);

        assert_eq!(frame.command, MSP_STATUS);
        assert_eq!(frame.payload.len(), 11);
        assert_eq!(transport.get_written_data(), vec![b"$M<\x00\x65\x65".to_vec()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_command_skips_stale_response() {
        let (session, transport) = session();
        transport.push_incoming(&response(Direction::Response, MSP_ATTITUDE, &[0u8; 6]));
        transport.push_incoming(&response(Direction::Response, MSP_STATUS, &[0u8; 11]));

        let frame = session
            .issue_command(MSP_STATUS, &[], Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(frame.command, MSP_STATUS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_matching_reply_in_one_read() {
        let (session, transport) = session();
        let mut chunk = response(Direction::Response, MSP_ATTITUDE, &[0u8; 6]);
        chunk.extend(response(Direction::Response, MSP_STATUS, &[0u8; 11]));
        transport.push_incoming(&chunk);

        let frame = assert_ok!(session.issue_command(MSP_STATUS, &[], Duration::from_millis(100)).await);
        assert_eq!(frame.command, MSP_STATUS);
        assert_eq!(frame.payload.len(), 11);
        // The stale reply is not stream data
        assert!(session.ingest_bytes(&[]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crsf_frame_before_msp_response_is_kept() {
        let (session, transport) = session();
        let mut chunk = rc_frame(2047);
        chunk.extend(response(Direction::Response, MSP_STATUS, &[0u8; 11]));
        transport.push_incoming(&chunk);

        assert_ok!(session.issue_command(MSP_STATUS, &[], Duration::from_millis(100)).await);

        assert_eq!(session.get_channel(1).unwrap(), 2044);
        let events = session.ingest_bytes(&[]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ChannelUpdate(_)));
        assert_eq!(session.stats().bytes_discarded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crsf_frames_around_stale_reply_keep_order() {
        let (session, transport) = session();
        let mut chunk = encode_frame(FC, 0x30, &[1]).unwrap();
        chunk.extend(response(Direction::Response, MSP_ATTITUDE, &[0u8; 6]));
        chunk.extend(encode_frame(FC, 0x31, &[2]).unwrap());
        chunk.extend(response(Direction::Response, MSP_STATUS, &[0u8; 11]));
        chunk.extend(encode_frame(FC, 0x32, &[3]).unwrap());
        transport.push_incoming(&chunk);

        assert_ok!(session.issue_command(MSP_STATUS, &[], Duration::from_millis(100)).await);

        let types: Vec<u8> = session
            .ingest_bytes(&[])
            .into_iter()
            .map(|event| match event {
                Event::RawFrame(frame) => frame.frame_type,
                other => panic!("Expected raw frame, got: {:?}", other),
            })
            .collect();
        assert_eq!(types, vec![0x30, 0x31, 0x32]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_uses_configured_timeout() {
        let transport = ScriptedTransport::new();
        let config = SessionConfig {
            command_timeout: Duration::from_millis(30),
            ..SessionConfig::default()
        };
        let session = ProtocolSession::new(transport, config);

        match session.request(MSP_STATUS, &[]).await {
            Err(MspError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(30)),
            other => panic!("Expected timeout, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_command_rejected() {
        let (session, transport) = session();
        transport.push_incoming(&response(Direction::Error, 250, &[]));

        let result = session.issue_command(250, &[], Duration::from_millis(100)).await;
        assert!(matches!(result, Err(MspError::Rejected { command: 250 })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_issue_command_timeout_reports_full_deadline() {
        let (session, _) = session();
        let start = Instant::now();

        let result = session.issue_command(MSP_STATUS, &[], Duration::from_millis(50)).await;

        match result {
            Err(MspError::Timeout(timeout)) => assert_eq!(timeout, Duration::from_millis(50)),
            other => panic!("Expected timeout, got: {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_issue_command_on_closed_transport() {
        let (session, transport) = session();
        transport.close();

        let result = session.issue_command(MSP_STATUS, &[], Duration::from_millis(10)).await;
        assert!(matches!(result, Err(MspError::TransportClosed)));
        assert!(transport.get_written_data().is_empty());
        assert!(matches!(session.poll().await, Err(MspError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_issue_command_payload_too_large() {
        let (session, transport) = session();
        let err = assert_err!(session.issue_command(200, &[0u8; 256], Duration::from_millis(10)).await);

        assert!(matches!(err, MspError::Decode(DecodeError::PayloadTooLarge { .. })));
        assert!(transport.get_written_data().is_empty());
    }

    #[tokio::test]
    async fn test_issue_command_write_error() {
        let mut transport = MockTransport::new();
        transport.expect_is_open().returning(|| true);
        transport
            .expect_write()
            .returning(|_| Err(io::Error::new(io::ErrorKind::BrokenPipe, "unplugged")));

        let session = ProtocolSession::new(transport, SessionConfig::default());
        let result = session.issue_command(MSP_STATUS, &[], Duration::from_millis(10)).await;

        match result {
            Err(MspError::Transport(e)) => assert_eq!(e.kind(), io::ErrorKind::BrokenPipe),
            other => panic!("Expected transport error, got: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_crsf_bytes_after_msp_response_are_kept() {
        let (session, transport) = session();
        let mut chunk = response(Direction::Response, MSP_STATUS, &[0u8; 11]);
        chunk.extend(rc_frame(2047));
        transport.push_incoming(&chunk);

        session
            .issue_command(MSP_STATUS, &[], Duration::from_millis(100))
            .await
            .unwrap();

        assert_eq!(session.get_channel(1).unwrap(), 2044);
        let events = session.ingest_bytes(&[]);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::ChannelUpdate(_)));
        assert!(session.ingest_bytes(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_poll_ingests_available_bytes() {
        let (session, transport) = session();
        transport.push_incoming(&rc_frame(CRSF_CHANNEL_VALUE_CENTER)[..10]);
        transport.push_incoming(&rc_frame(CRSF_CHANNEL_VALUE_CENTER)[10..]);

        assert!(session.poll().await.unwrap().is_empty());
        assert_eq!(session.poll().await.unwrap().len(), 1);
        assert_eq!(transport.pending_chunks(), 0);
    }

    #[tokio::test]
    async fn test_into_transport_returns_handle() {
        let (session, _) = session();
        let transport = session.into_transport();
        assert!(transport.is_open());
    }
}
