//! Connection Handler
//!
//! Handles individual client connections.
//!
//! ## Protocol States
//! ```text
//! ReadingLength ─► ReadingBody ─► Dispatch ─► WritingResponse ─┐
//!       ▲                                                      │
//!       └──────────────────────────────────────────────────────┘
//! ```
//! Any I/O or decode error closes the connection. Requests on one
//! connection are handled strictly one at a time.

use std::io::{self, BufReader, BufWriter, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::Engine;
use crate::error::{KvError, Result};
use crate::protocol::{decode_request, write_response, Response, LENGTH_PREFIX_SIZE, MAX_FRAME_SIZE};

/// Where the handler is in the request cycle
#[derive(Debug)]
enum State {
    ReadingLength,
    ReadingBody(usize),
    Dispatch(Vec<u8>),
    WritingResponse(Response),
}

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// Reference to the store engine
    engine: Arc<Engine>,

    /// Peer address for logging
    peer_addr: String,

    /// Requests answered on this connection
    served: u64,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O on two handles of the same socket
    pub fn new(stream: TcpStream, engine: Arc<Engine>) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            engine,
            peer_addr,
            served: 0,
        })
    }

    /// Configure connection timeouts (0 leaves the socket blocking)
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Returns `Ok` when the client goes away cleanly, `Err` on a broken
    /// stream or an undecodable request.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        let mut state = State::ReadingLength;
        loop {
            state = match state {
                State::ReadingLength => {
                    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
                    match self.reader.read_exact(&mut prefix) {
                        Ok(()) => {}
                        Err(e) if is_disconnect(&e) => {
                            tracing::debug!(
                                "Client {} disconnected after {} requests",
                                self.peer_addr,
                                self.served
                            );
                            return Ok(());
                        }
                        Err(e)
                            if matches!(
                                e.kind(),
                                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                            ) =>
                        {
                            tracing::debug!("Read timeout for client {}", self.peer_addr);
                            return Ok(());
                        }
                        Err(e) => return Err(e.into()),
                    }

                    let len = u32::from_be_bytes(prefix);
                    if len > MAX_FRAME_SIZE {
                        return Err(KvError::Protocol(format!(
                            "Frame too large: {} bytes (max {})",
                            len, MAX_FRAME_SIZE
                        )));
                    }
                    State::ReadingBody(len as usize)
                }

                State::ReadingBody(len) => {
                    let mut body = vec![0u8; len];
                    self.reader.read_exact(&mut body)?;
                    State::Dispatch(body)
                }

                State::Dispatch(body) => {
                    let request = decode_request(&body)?;
                    tracing::trace!("Received request from {}: {:?}", self.peer_addr, request);
                    State::WritingResponse(self.engine.execute(&request))
                }

                State::WritingResponse(response) => {
                    if let Err(e) = write_response(&mut self.writer, &response) {
                        if let KvError::Io(ref io_err) = e {
                            if is_disconnect(io_err) {
                                tracing::debug!(
                                    "Client {} disconnected before response could be sent",
                                    self.peer_addr
                                );
                                return Ok(());
                            }
                        }
                        return Err(e);
                    }
                    self.served += 1;
                    State::ReadingLength
                }
            };
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

/// Errors that just mean the other side went away
fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}
