//! Protocol Module
//!
//! Defines the wire protocol shared by client and server.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────┬──────────────────────────────────┐
//! │ Len (4, BE)  │   Body (bincode, Len bytes)      │
//! └──────────────┴──────────────────────────────────┘
//! ```
//!
//! ### Request body
//! - id: u64 correlation id
//! - key: string
//! - value: optional string (absent or empty = GET, otherwise SET)
//!
//! ### Response body
//! - id: u64 (echoed)
//! - result: i32 (0 = OK, 1 = NOT_FOUND / CREATED, -1 = ERROR)
//! - value: string

mod message;
mod codec;

pub use message::{CorrelationId, Operation, Request, Response, ResultCode};
pub use codec::{
    decode_request, decode_response, encode_frame, encode_request, encode_response, read_frame,
    read_request, read_response, write_frame, write_request, write_response, FrameDecoder,
    LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE,
};
