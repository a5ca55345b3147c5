//! # MSP Protocol Module
//!
//! MultiWii Serial Protocol v1 request/response framing.
//!
//! This module handles:
//! - XOR checksum over length, command and payload
//! - Request encoding and response decoding
//! - Typed payloads for status, attitude, altitude and raw RC

pub mod checksum;
pub mod protocol;
pub mod framer;
