//! # CRSF Protocol Module
//!
//! Crossfire (CRSF) stream handling on the flight controller link.
//!
//! This module handles:
//! - Frame synchronization and validation (address, length, CRC8-DVB-S2)
//! - RC channels unpacking (16 channels, 11-bit, LSB-first)
//! - Telemetry decoding (link statistics, battery, GPS)
//! - Frame encoding for host-side output and test fixtures

pub mod protocol;
pub mod encoder;
pub mod decoder;
pub mod crc;
pub mod parser;
