//! Trait abstraction for the byte-stream link to the flight controller

use async_trait::async_trait;
use std::io;

/// Byte-stream transport shared by MSP and CRSF traffic.
///
/// The protocol engine never opens, configures or closes a transport; it only
/// reads what is available and writes frames.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    /// Return the bytes received so far without waiting; empty if none are ready
    async fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Write all data and flush it to the device
    async fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Whether the link is usable
    fn is_open(&self) -> bool;
}
