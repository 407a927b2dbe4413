//! Client
//!
//! One persistent connection per client. Callers on any thread send a request
//! and block on a private response slot; a background reader decodes every
//! response and hands it to the slot registered under its correlation id.
//!
//! ## Request Flow
//! ```text
//! caller ──► register slot(id) ──► write frame (under write lock) ──► wait on slot
//!                                                                        ▲
//! reader thread ──► read bytes ──► FrameDecoder ──► Response{id} ────────┘
//! ```

use std::collections::HashMap;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::config::ClientConfig;
use crate::error::{KvError, Result};
use crate::protocol::{
    decode_response, encode_request, write_frame, CorrelationId, FrameDecoder, Request, Response,
    ResultCode,
};

/// Size of each socket read in the reader thread
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Response slots waiting for their reply
#[derive(Default)]
struct PendingRequests {
    slots: HashMap<CorrelationId, Sender<Response>>,

    /// Set once the reader has stopped; no new slots are accepted
    closed: bool,
}

/// A connection to an EpochKV server
pub struct Client {
    /// Write half; the lock keeps frames from interleaving on the wire
    writer: Mutex<TcpStream>,

    pending: Arc<Mutex<PendingRequests>>,
    reader: Option<JoinHandle<()>>,
    config: ClientConfig,
    peer_addr: SocketAddr,
}

impl Client {
    /// Connect with default settings (no request timeout)
    pub fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        Self::connect_with(addr, ClientConfig::default())
    }

    /// Connect and start the background reader
    pub fn connect_with(addr: impl ToSocketAddrs, config: ClientConfig) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| KvError::Network(format!("cannot connect: {}", e)))?;
        stream.set_nodelay(true)?;
        let peer_addr = stream.peer_addr()?;

        let pending = Arc::new(Mutex::new(PendingRequests::default()));

        let read_stream = stream.try_clone()?;
        let reader_pending = Arc::clone(&pending);
        let reader = thread::Builder::new()
            .name("client-reader".to_string())
            .spawn(move || read_loop(read_stream, reader_pending))?;

        tracing::debug!("Connected to {}", peer_addr);

        Ok(Self {
            writer: Mutex::new(stream),
            pending,
            reader: Some(reader),
            config,
            peer_addr,
        })
    }

    /// Get a value by key
    ///
    /// `(Ok, value)` when present, `(NotFound, "")` when absent.
    pub fn get(&self, key: &str) -> Result<(ResultCode, String)> {
        let response = self.call(key, None)?;
        Ok((response.result, response.value))
    }

    /// Set a key, returning its prior state
    ///
    /// `(NotFound, "")` when the key was created, `(Ok, prior)` when it was
    /// overwritten. An empty value cannot be sent: the server would read the
    /// request as a Get.
    pub fn set(&self, key: &str, value: &str) -> Result<(ResultCode, String)> {
        if value.is_empty() {
            return Err(KvError::Protocol(
                "cannot set an empty value: it is indistinguishable from a get".to_string(),
            ));
        }
        let response = self.call(key, Some(value.to_string()))?;
        Ok((response.result, response.value))
    }

    /// Address of the server
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Requests sent but not yet answered
    pub fn in_flight(&self) -> usize {
        self.pending.lock().slots.len()
    }

    /// Close the connection and stop the reader
    pub fn close(self) {
        drop(self);
    }

    /// One request/response round trip
    fn call(&self, key: &str, value: Option<String>) -> Result<Response> {
        let (slot_tx, slot_rx) = channel::bounded(1);
        let id = self.register(slot_tx)?;

        let request = Request {
            id,
            key: key.to_string(),
            value,
        };

        if let Err(e) = self.send(&request) {
            self.pending.lock().slots.remove(&id);
            return Err(e);
        }

        match self.config.request_timeout {
            None => slot_rx.recv().map_err(|_| connection_closed()),
            Some(timeout) => match slot_rx.recv_timeout(timeout) {
                Ok(response) => Ok(response),
                Err(RecvTimeoutError::Timeout) => {
                    self.pending.lock().slots.remove(&id);
                    Err(KvError::Timeout(timeout))
                }
                Err(RecvTimeoutError::Disconnected) => Err(connection_closed()),
            },
        }
    }

    /// Reserve a correlation id not already in flight on this connection
    fn register(&self, slot: Sender<Response>) -> Result<CorrelationId> {
        let mut pending = self.pending.lock();
        if pending.closed {
            return Err(connection_closed());
        }

        let id = loop {
            let candidate = rand::random::<CorrelationId>();
            if !pending.slots.contains_key(&candidate) {
                break candidate;
            }
        };
        pending.slots.insert(id, slot);
        Ok(id)
    }

    fn send(&self, request: &Request) -> Result<()> {
        let body = encode_request(request)?;
        let mut writer = self.writer.lock();
        write_frame(&mut *writer, &body)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.writer.lock().shutdown(Shutdown::Both);
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                tracing::error!("Client reader thread panicked");
            }
        }
    }
}

fn connection_closed() -> KvError {
    KvError::Network("connection closed before a response arrived".to_string())
}

/// Background reader: decode responses and deliver them until the stream ends
fn read_loop(mut stream: TcpStream, pending: Arc<Mutex<PendingRequests>>) {
    let mut decoder = FrameDecoder::new();
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    if let Err(e) = pump(&mut stream, &mut decoder, &mut chunk, &pending) {
        tracing::warn!("Client connection closing: {}", e);
        let _ = stream.shutdown(Shutdown::Both);
    }

    // Dropping the slots wakes every waiting caller with an error.
    let mut pending = pending.lock();
    pending.closed = true;
    let abandoned = pending.slots.len();
    pending.slots.clear();
    if abandoned > 0 {
        tracing::warn!("{} requests abandoned by closed connection", abandoned);
    }
}

fn pump(
    stream: &mut TcpStream,
    decoder: &mut FrameDecoder,
    chunk: &mut [u8],
    pending: &Mutex<PendingRequests>,
) -> Result<()> {
    loop {
        let n = match stream.read(chunk) {
            Ok(0) => {
                tracing::debug!("Server closed the connection");
                return Ok(());
            }
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == io::ErrorKind::ConnectionAborted => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        decoder.extend(&chunk[..n]);

        while let Some(frame) = decoder.next_frame()? {
            let response = decode_response(&frame)?;
            deliver(pending, response);
        }
    }
}

fn deliver(pending: &Mutex<PendingRequests>, response: Response) {
    let slot = pending.lock().slots.remove(&response.id);
    match slot {
        Some(slot) => {
            // Caller may have timed out in between; nothing else to do.
            let _ = slot.send(response);
        }
        None => tracing::warn!("Dropping response for unknown correlation id {}", response.id),
    }
}
