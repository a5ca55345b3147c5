//! # MSP v1 Checksum
//!
//! XOR of the length byte, the command byte and every payload byte.

/// Compute the MSP checksum over `[length, command, payload...]`
///
/// # Examples
///
/// ```
/// use fc_link::msp::checksum;
///
/// // MSP_STATUS request with no payload
/// assert_eq!(checksum::compute(0, 101, &[]), 101);
/// assert_eq!(checksum::compute(2, 200, &[0xDC, 0x05]), 2 ^ 200 ^ 0xDC ^ 0x05);
/// ```
pub fn compute(length: u8, command: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(length ^ command, |acc, &byte| acc ^ byte)
}

/// Check a received checksum byte against [`compute`]
pub fn validate(length: u8, command: u8, payload: &[u8], received: u8) -> bool {
    compute(length, command, payload) == received
}
