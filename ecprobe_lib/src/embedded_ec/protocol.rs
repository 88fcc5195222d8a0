//! Wire framing for the EC host command protocol.
//!
//! Two mutually exclusive frame layouts exist, selected by the command
//! version. Version 0 is the legacy layout, anything above selects the
//! versioned layout with an explicit length byte:
//!
//! Legacy outbound:    `[command] [payload..] [checksum]`
//!                     (just `[command]` if the payload is empty)
//! Legacy inbound:     `[result] [payload..] [checksum]`
//!                     (just `[result]` if no payload is expected)
//! Versioned outbound: `[0xdc + version] [command] [len] [payload..] [checksum]`
//! Versioned inbound:  `[result] [len] [payload..] [checksum]`
//!
//! The checksum is the modulo-256 sum of all frame bytes preceding the
//! checksum byte. The firmware on the other end expects exactly these
//! layouts, so the constants here must be preserved bit-for-bit.

use num_derive::FromPrimitive;

use crate::embedded_ec::{EcError, EcResult};

/// Prefix byte of a versioned outbound frame; the command version is added
/// on top of this base value.
pub const EC_CMD_VERSION0: u8 = 0xdc;

/// Host parameter size limit. Neither an outbound payload nor an expected
/// inbound payload may exceed this.
pub const EC_MAX_PARAM_SIZE: usize = 128;

/// Response codes returned by commands
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
pub enum EcResponseStatus {
    Success = 0,
    InvalidCommand = 1,
    Error = 2,
    InvalidParameter = 3,
    AccessDenied = 4,
    InvalidResponse = 5,
    InvalidVersion = 6,
    InvalidChecksum = 7,
    /// Accepted, command in progress
    InProgress = 8,
    /// No response available
    Unavailable = 9,
    /// We got a timeout
    Timeout = 10,
    /// Table / data overflow
    Overflow = 11,
    /// Header contains invalid data
    InvalidHeader = 12,
    /// Didn't get the entire request
    RequestTruncated = 13,
    /// Response was too big to handle
    ResponseTooBig = 14,
    /// Communications bus error
    BusError = 15,
    /// Up but too busy. Should retry
    Busy = 16,
}

/// Modulo-256 rolling sum over a byte buffer. No carry, no XOR, no negation.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, x| acc.wrapping_add(*x))
}

/// How many raw bytes the transport has to read back for a response with
/// `expected` payload bytes.
pub fn response_frame_len(version: u8, expected: usize) -> usize {
    if version == 0 {
        // Explicit branch for the empty-payload case. The checksum byte is
        // omitted entirely, the frame is the result byte alone.
        if expected == 0 {
            1
        } else {
            expected + 2
        }
    } else {
        // result + length + payload + checksum
        expected + 3
    }
}

/// Build the outbound byte frame for one command exchange.
pub fn encode_request(command: u8, version: u8, payload: &[u8]) -> EcResult<Vec<u8>> {
    if payload.len() > EC_MAX_PARAM_SIZE {
        return Err(EcError::PayloadTooLarge(payload.len()));
    }

    if version == 0 {
        if payload.is_empty() {
            // No checksum byte for an empty legacy request
            return Ok(vec![command]);
        }
        let mut frame = Vec::with_capacity(payload.len() + 2);
        frame.push(command);
        frame.extend_from_slice(payload);
        frame.push(checksum(&frame));
        Ok(frame)
    } else {
        let prefix = EC_CMD_VERSION0
            .checked_add(version)
            .ok_or_else(|| EcError::Transport(format!("command version {} out of range", version)))?;
        let mut frame = Vec::with_capacity(payload.len() + 4);
        frame.push(prefix);
        frame.push(command);
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        frame.push(checksum(&frame));
        Ok(frame)
    }
}

/// Validate a raw response frame and copy its payload out.
///
/// `expected` is the payload length the caller asserted when issuing the
/// command; for the versioned layout the declared length must match it
/// exactly.
pub fn decode_response(version: u8, expected: usize, raw: &[u8]) -> EcResult<Vec<u8>> {
    if expected > EC_MAX_PARAM_SIZE {
        return Err(EcError::PayloadTooLarge(expected));
    }
    if raw.is_empty() {
        return Err(EcError::Transport("empty response frame".to_string()));
    }

    let result = raw[0];

    if version == 0 {
        if result != 0 {
            // Still check frame integrity for diagnostics, but the device
            // error wins.
            if expected > 0 && raw.len() >= expected + 2 {
                let cs = checksum(&raw[..expected + 1]);
                if cs != raw[expected + 1] {
                    warn!(
                        "checksum mismatch on error response (result {}): {:#04x} != {:#04x}",
                        result,
                        cs,
                        raw[expected + 1]
                    );
                }
            }
            return Err(EcError::Device(result as u16));
        }
        if expected == 0 {
            // Single result byte, no checksum
            return Ok(vec![]);
        }
        if raw.len() < expected + 2 {
            return Err(EcError::Transport(format!(
                "response frame truncated: {} of {} bytes",
                raw.len(),
                expected + 2
            )));
        }
        let cs = checksum(&raw[..expected + 1]);
        if cs != raw[expected + 1] {
            return Err(EcError::ChecksumMismatch {
                expected: raw[expected + 1],
                actual: cs,
            });
        }
        Ok(raw[1..expected + 1].to_vec())
    } else {
        if result != 0 {
            return Err(EcError::Device(result as u16));
        }
        if raw.len() < 2 {
            return Err(EcError::Transport(
                "response frame too short for length byte".to_string(),
            ));
        }
        let declared = raw[1] as usize;
        if declared != expected {
            return Err(EcError::LengthMismatch {
                expected,
                actual: declared,
            });
        }
        if raw.len() < declared + 3 {
            return Err(EcError::Transport(format!(
                "response frame truncated: {} of {} bytes",
                raw.len(),
                declared + 3
            )));
        }
        let cs = checksum(&raw[..declared + 2]);
        if cs != raw[declared + 2] {
            return Err(EcError::ChecksumMismatch {
                expected: raw[declared + 2],
                actual: cs,
            });
        }
        Ok(raw[2..declared + 2].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a well-formed response frame, the way the firmware would
    fn fake_response(version: u8, payload: &[u8]) -> Vec<u8> {
        if version == 0 {
            if payload.is_empty() {
                return vec![0x00];
            }
            let mut frame = vec![0x00];
            frame.extend_from_slice(payload);
            frame.push(checksum(&frame));
            frame
        } else {
            let mut frame = vec![0x00, payload.len() as u8];
            frame.extend_from_slice(payload);
            frame.push(checksum(&frame));
            frame
        }
    }

    #[test]
    fn legacy_hello_frame_matches_wire_example() {
        // Hello with the legacy-generation magic input 0xf0e0d0c0
        let payload = 0xf0e0d0c0u32.to_le_bytes();
        let frame = encode_request(0x01, 0, &payload).unwrap();
        let cs = (0x01u32 + 0xd0 + 0xc0 + 0xe0 + 0xf0) % 256;
        assert_eq!(frame, vec![0x01, 0xd0, 0xc0, 0xe0, 0xf0, cs as u8]);

        // And the matching response carries the output magic back
        let resp = fake_response(0, &0xf1e2d3c4u32.to_le_bytes());
        let out = decode_response(0, 4, &resp).unwrap();
        assert_eq!(u32::from_le_bytes(out.try_into().unwrap()), 0xf1e2d3c4);
    }

    #[test]
    fn roundtrip_all_payload_lengths() {
        for version in [0u8, 2] {
            for len in 0..=EC_MAX_PARAM_SIZE {
                let payload: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
                let frame = encode_request(0x10, version, &payload).unwrap();
                assert!(frame.len() <= EC_MAX_PARAM_SIZE + 4);
                let resp = fake_response(version, &payload);
                assert_eq!(resp.len(), response_frame_len(version, len));
                assert_eq!(decode_response(version, len, &resp).unwrap(), payload);
            }
        }
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        let payload = [0x11, 0x22, 0x33, 0x44];
        for version in [0u8, 2] {
            let good = fake_response(version, &payload);
            assert!(decode_response(version, 4, &good).is_ok());
            let payload_start = if version == 0 { 1 } else { 2 };
            // Flip each bit of the payload and of the checksum byte
            for byte in payload_start..good.len() {
                for bit in 0..8 {
                    let mut bad = good.clone();
                    bad[byte] ^= 1 << bit;
                    assert_eq!(
                        decode_response(version, 4, &bad),
                        Err(EcError::ChecksumMismatch {
                            expected: bad[bad.len() - 1],
                            actual: checksum(&bad[..bad.len() - 1]),
                        }),
                        "flip of byte {} bit {} went undetected",
                        byte,
                        bit
                    );
                }
            }
        }
    }

    #[test]
    fn versioned_length_mismatch_beats_checksum() {
        // Frame declares 6 payload bytes with a checksum that is valid for
        // that (wrong) length. The caller expects 4.
        let resp = fake_response(2, &[0xaa; 6]);
        assert_eq!(
            decode_response(2, 4, &resp),
            Err(EcError::LengthMismatch {
                expected: 4,
                actual: 6
            })
        );
    }

    #[test]
    fn zero_length_payload_boundary() {
        // Outbound: command byte alone, no checksum byte
        assert_eq!(encode_request(0x09, 0, &[]).unwrap(), vec![0x09]);
        // Inbound: result byte alone
        assert_eq!(decode_response(0, 0, &[0x00]).unwrap(), Vec::<u8>::new());
        // Versioned frames always carry length and checksum bytes
        assert_eq!(encode_request(0x09, 1, &[]).unwrap().len(), 4);
        let resp = fake_response(1, &[]);
        assert_eq!(resp.len(), 3);
        assert_eq!(decode_response(1, 0, &resp).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn device_error_code_is_surfaced() {
        // InvalidParameter from the controller
        assert_eq!(decode_response(0, 0, &[0x03]), Err(EcError::Device(3)));
        let resp = [0x07, 0x00, 0x07];
        assert_eq!(decode_response(1, 0, &resp), Err(EcError::Device(7)));
    }

    #[test]
    fn oversized_payload_is_rejected_before_io() {
        let big = [0u8; EC_MAX_PARAM_SIZE + 1];
        assert_eq!(
            encode_request(0x10, 0, &big),
            Err(EcError::PayloadTooLarge(EC_MAX_PARAM_SIZE + 1))
        );
        assert_eq!(
            decode_response(2, EC_MAX_PARAM_SIZE + 1, &[0x00]),
            Err(EcError::PayloadTooLarge(EC_MAX_PARAM_SIZE + 1))
        );
    }
}
