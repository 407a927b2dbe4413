//! Network Module
//!
//! TCP server and client handling.
//!
//! ## Architecture
//! - Single acceptor loop
//! - One handler thread per connection
//! - Requests routed through Engine

mod server;
mod connection;

pub use server::{Server, ServerHandle};
pub use connection::Connection;
