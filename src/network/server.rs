//! TCP Server
//!
//! Accepts connections and gives each one its own handler thread.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::Config;
use crate::engine::Engine;
use crate::error::{KvError, Result};
use super::Connection;

/// Pause after a failed accept (e.g. out of file descriptors)
const ACCEPT_BACKOFF: Duration = Duration::from_millis(20);

/// TCP server for EpochKV
pub struct Server {
    config: Config,
    engine: Arc<Engine>,
    listener: Option<TcpListener>,
    shutdown: Arc<AtomicBool>,

    /// Bound address, used to wake the blocking accept on shutdown
    wake_addr: Arc<Mutex<Option<SocketAddr>>>,

    /// Read-side handles of open connections, closed on shutdown
    open: Arc<Mutex<HashMap<u64, TcpStream>>>,
    workers: Vec<JoinHandle<()>>,
    next_conn_id: AtomicU64,
}

/// Cloneable handle that observes and stops a running server
#[derive(Clone)]
pub struct ServerHandle {
    shutdown: Arc<AtomicBool>,
    wake_addr: Arc<Mutex<Option<SocketAddr>>>,
    open: Arc<Mutex<HashMap<u64, TcpStream>>>,
}

impl ServerHandle {
    /// Signal the server to shutdown gracefully
    ///
    /// The accept loop blocks, so a throwaway connection to the listener is
    /// made to wake it.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);

        let addr = *self.wake_addr.lock();
        if let Some(addr) = addr {
            if let Err(e) = TcpStream::connect(loopback(addr)) {
                tracing::debug!("Wake-up connection to {} failed: {}", addr, e);
            }
        }
    }

    /// Number of connections currently open
    pub fn connection_count(&self) -> usize {
        self.open.lock().len()
    }
}

/// Connectable form of a listen address (wildcards become loopback)
fn loopback(addr: SocketAddr) -> SocketAddr {
    match addr.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), addr.port())
        }
        IpAddr::V6(ip) if ip.is_unspecified() => {
            SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), addr.port())
        }
        _ => addr,
    }
}

impl Server {
    /// Create a new server with the given config and engine
    pub fn new(config: Config, engine: Arc<Engine>) -> Self {
        Self {
            config,
            engine,
            listener: None,
            shutdown: Arc::new(AtomicBool::new(false)),
            wake_addr: Arc::new(Mutex::new(None)),
            open: Arc::new(Mutex::new(HashMap::new())),
            workers: Vec::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Bind the listening socket
    ///
    /// Failing to bind is the one fatal error: it is reported as a
    /// configuration error.
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.config.listen_addr).map_err(|e| {
            KvError::Config(format!("cannot listen on {}: {}", self.config.listen_addr, e))
        })?;
        let addr = listener.local_addr()?;
        tracing::info!("Listening on {}", addr);
        self.listener = Some(listener);
        *self.wake_addr.lock() = Some(addr);
        Ok(addr)
    }

    /// Address of the bound listener
    pub fn local_addr(&self) -> Result<SocketAddr> {
        match &self.listener {
            Some(listener) => Ok(listener.local_addr()?),
            None => Err(KvError::Network("server is not bound".to_string())),
        }
    }

    /// Handle for stopping the server from another thread
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            shutdown: Arc::clone(&self.shutdown),
            wake_addr: Arc::clone(&self.wake_addr),
            open: Arc::clone(&self.open),
        }
    }

    /// Start the server (blocking until shutdown)
    ///
    /// On shutdown the listener is closed, every open connection has its read
    /// side shut so it finishes the request in flight and exits, and all
    /// handler threads are joined.
    pub fn run(&mut self) -> Result<()> {
        if self.listener.is_none() {
            self.bind()?;
        }

        while !self.shutdown.load(Ordering::Acquire) {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => break,
            };

            // Either the wake-up connection or a client that lost the race
            if self.shutdown.load(Ordering::Acquire) {
                break;
            }

            match accepted {
                Ok((stream, addr)) => {
                    if let Err(e) = self.spawn_connection(stream) {
                        tracing::warn!("Could not serve connection from {}: {}", addr, e);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    tracing::warn!("Accept failed: {}", e);
                    thread::sleep(ACCEPT_BACKOFF);
                }
            }
        }

        self.drain();
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    pub fn shutdown(&self) {
        self.handle().shutdown();
    }

    fn spawn_connection(&mut self, stream: TcpStream) -> Result<()> {
        self.workers.retain(|w| !w.is_finished());

        if self.open.lock().len() >= self.config.max_connections {
            tracing::warn!(
                "Rejecting connection: {} connections already open",
                self.config.max_connections
            );
            return Ok(());
        }

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let registry_handle = stream.try_clone()?;

        let mut conn = Connection::new(stream, Arc::clone(&self.engine))?;
        conn.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        self.open.lock().insert(id, registry_handle);
        let open = Arc::clone(&self.open);

        let worker = thread::Builder::new()
            .name(format!("conn-{}", id))
            .spawn(move || {
                if let Err(e) = conn.handle() {
                    tracing::warn!("Closing connection {}: {}", conn.peer_addr(), e);
                }
                open.lock().remove(&id);
            });

        match worker {
            Ok(handle) => {
                self.workers.push(handle);
                Ok(())
            }
            Err(e) => {
                self.open.lock().remove(&id);
                Err(e.into())
            }
        }
    }

    fn drain(&mut self) {
        drop(self.listener.take());

        for stream in self.open.lock().values() {
            let _ = stream.shutdown(Shutdown::Read);
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::error!("Connection thread panicked");
            }
        }

        tracing::info!("Server stopped accepting connections");
    }
}
