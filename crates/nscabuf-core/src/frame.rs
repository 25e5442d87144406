//! NSCA v3 check-result frame codec.
//!
//! Fixed 720-byte, big-endian layout:
//!
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 2    | protocol version (3)                    |
//! | 4      | 4    | CRC32 over the frame with this zeroed   |
//! | 8      | 4    | timestamp (unix seconds)                |
//! | 12     | 2    | state code                              |
//! | 14     | 64   | host name, NUL-padded                   |
//! | 78     | 128  | service name, NUL-padded                |
//! | 206    | 512  | description, NUL-padded                 |
//! | 718    | 2    | padding                                 |

use std::ops::Range;

use thiserror::Error;

use crate::types::{Message, ServiceState};

// ─── Layout ─────────────────────────────────────────────────────────

pub const FRAME_LEN: usize = 720;
pub const PROTOCOL_VERSION: u16 = 3;

const VERSION: Range<usize> = 0..2;
const CRC: Range<usize> = 4..8;
const TIMESTAMP: Range<usize> = 8..12;
const STATE: Range<usize> = 12..14;
const HOST: Range<usize> = 14..78;
const SERVICE: Range<usize> = 78..206;
const DESCRIPTION: Range<usize> = 206..718;

// ─── Errors ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected frame of {expected} bytes, received {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("unsupported protocol version {0}, only version 3 is accepted")]
    BadVersion(u16),

    #[error("crc mismatch: frame carries {given:#010x}, computed {computed:#010x}")]
    CrcMismatch { given: u32, computed: u32 },

    #[error("unknown state code {0}")]
    BadState(u16),
}

// ─── Decode ─────────────────────────────────────────────────────────

/// Decode one frame.
///
/// The CRC is only verified when the client sent a non-zero value.
pub fn decode_frame(bytes: &[u8]) -> Result<Message, DecodeError> {
    let frame: &[u8; FRAME_LEN] = bytes.try_into().map_err(|_| DecodeError::BadLength {
        expected: FRAME_LEN,
        actual: bytes.len(),
    })?;

    let version = read_u16(frame, VERSION);
    if version != PROTOCOL_VERSION {
        return Err(DecodeError::BadVersion(version));
    }

    let given = read_u32(frame, CRC);
    if given != 0 {
        let computed = frame_crc(frame);
        if computed != given {
            return Err(DecodeError::CrcMismatch { given, computed });
        }
    }

    let code = read_u16(frame, STATE);
    let state = ServiceState::try_from(code).map_err(|e| DecodeError::BadState(e.0))?;

    Ok(Message {
        timestamp: read_u32(frame, TIMESTAMP),
        state,
        host: read_text(&frame[HOST]),
        service: read_text(&frame[SERVICE]),
        description: read_text(&frame[DESCRIPTION]),
    })
}

// ─── Encode ─────────────────────────────────────────────────────────

/// Encode a message into a frame with a valid CRC.
///
/// Text longer than its field is cut at a char boundary, always leaving at
/// least one NUL terminator.
pub fn encode_frame(message: &Message) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[VERSION].copy_from_slice(&PROTOCOL_VERSION.to_be_bytes());
    frame[TIMESTAMP].copy_from_slice(&message.timestamp.to_be_bytes());
    frame[STATE].copy_from_slice(&message.state.code().to_be_bytes());
    write_text(&mut frame[HOST], &message.host);
    write_text(&mut frame[SERVICE], &message.service);
    write_text(&mut frame[DESCRIPTION], &message.description);

    let crc = frame_crc(&frame);
    frame[CRC].copy_from_slice(&crc.to_be_bytes());
    frame
}

// ─── Helpers ────────────────────────────────────────────────────────

/// CRC32 (IEEE) of the frame with the CRC field treated as zero.
fn frame_crc(frame: &[u8; FRAME_LEN]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&frame[..CRC.start]);
    hasher.update(&[0u8; 4]);
    hasher.update(&frame[CRC.end..]);
    hasher.finalize()
}

fn read_u16(frame: &[u8; FRAME_LEN], range: Range<usize>) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&frame[range]);
    u16::from_be_bytes(buf)
}

fn read_u32(frame: &[u8; FRAME_LEN], range: Range<usize>) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&frame[range]);
    u32::from_be_bytes(buf)
}

fn read_text(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

fn write_text(field: &mut [u8], text: &str) {
    let max = field.len() - 1;
    let mut end = text.len().min(max);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    field[..end].copy_from_slice(&text.as_bytes()[..end]);
}

// ─── Tests ──────────────────────────────────────────────────────────
