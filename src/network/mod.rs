//! Network Module
//!
//! TCP server, client and the connection pumps they share.
//!
//! ## Architecture
//! - A tokio runtime (the event loop) drives every socket operation
//! - `Connection` keeps one read and one write in flight per socket
//! - `Server` and `Client` observe their connections through an internal
//!   core and re-expose events through handler tables

use std::fmt;

mod server;
mod client;
mod connection;
mod handlers;

pub use server::Server;
pub use client::Client;
pub use connection::{Connection, ConnectionObserver};
pub use handlers::{ClientHandlers, ServerHandlers};

/// Identity of a connection
///
/// Client connections always use `ConnectionId(0)`. A server hands out
/// increasing identities starting at 0 and never reuses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Identity given to the single connection a client holds
    pub const CLIENT: ConnectionId = ConnectionId(0);
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
