//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! Every message, in both directions, is one frame:
//! ```text
//! ┌──────────────┬─────────────────────────────┐
//! │ Len (4, BE)  │         Body                │
//! └──────────────┴─────────────────────────────┘
//! ```
//! The body is a bincode-serialized [`Request`] or [`Response`]. A reader
//! must collect exactly `Len` body bytes before decoding; a single socket
//! read may return only part of the prefix or body.

use std::io::{Read, Write};

use bytes::{Buf, Bytes, BytesMut};

use crate::error::{KvError, Result};
use super::{Request, Response};

/// Length prefix size: u32, big-endian
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum body size (16 MB)
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

// =============================================================================
// Body Encoding/Decoding
// =============================================================================

/// Serialize a request body (no length prefix)
pub fn encode_request(request: &Request) -> Result<Vec<u8>> {
    Ok(bincode::serialize(request)?)
}

/// Deserialize a request body
pub fn decode_request(body: &[u8]) -> Result<Request> {
    Ok(bincode::deserialize(body)?)
}

/// Serialize a response body (no length prefix)
pub fn encode_response(response: &Response) -> Result<Vec<u8>> {
    Ok(bincode::serialize(response)?)
}

/// Deserialize a response body
pub fn decode_response(body: &[u8]) -> Result<Response> {
    Ok(bincode::deserialize(body)?)
}

// =============================================================================
// Framing
// =============================================================================

/// Prefix a body with its length
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    let len = check_frame_len(body.len())?;

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

fn check_frame_len(len: usize) -> Result<u32> {
    if len > MAX_FRAME_SIZE as usize {
        return Err(KvError::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }
    Ok(len as u32)
}

/// Incremental frame decoder
///
/// Bytes are appended as they arrive from the socket; complete frame bodies
/// are handed out in order once all of their bytes have been buffered.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes read from the stream
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Take the next complete frame body, if one is fully buffered
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]);
        if len > MAX_FRAME_SIZE {
            return Err(KvError::Protocol(format!(
                "Frame too large: {} bytes (max {})",
                len, MAX_FRAME_SIZE
            )));
        }

        let total = LENGTH_PREFIX_SIZE + len as usize;
        if self.buffer.len() < total {
            self.buffer.reserve(total - self.buffer.len());
            return Ok(None);
        }

        self.buffer.advance(LENGTH_PREFIX_SIZE);
        Ok(Some(self.buffer.split_to(len as usize).freeze()))
    }

    /// Number of bytes buffered but not yet returned
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read one frame body from a stream
///
/// Blocks until the prefix and the whole body have arrived or an error occurs
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut prefix)?;

    let len = u32::from_be_bytes(prefix);
    if len > MAX_FRAME_SIZE {
        return Err(KvError::Protocol(format!(
            "Frame too large: {} bytes (max {})",
            len, MAX_FRAME_SIZE
        )));
    }

    let mut body = vec![0u8; len as usize];
    if len > 0 {
        reader.read_exact(&mut body)?;
    }
    Ok(body)
}

/// Write one length-prefixed frame and flush
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let frame = encode_frame(body)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Read a complete request from a stream
pub fn read_request<R: Read>(reader: &mut R) -> Result<Request> {
    let body = read_frame(reader)?;
    decode_request(&body)
}

/// Write a request to a stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> Result<()> {
    let body = encode_request(request)?;
    write_frame(writer, &body)
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    let body = read_frame(reader)?;
    decode_response(&body)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    let body = encode_response(response)?;
    write_frame(writer, &body)
}
