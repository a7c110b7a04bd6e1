//! Event Handlers
//!
//! Callback tables through which servers and clients report events.
//! Every handler is optional; an unset handler is skipped.

use super::ConnectionId;

type Handler = Box<dyn Fn() + Send + Sync>;
type IdHandler = Box<dyn Fn(ConnectionId) + Send + Sync>;
type DataHandler = Box<dyn Fn(&[u8]) + Send + Sync>;
type IdDataHandler = Box<dyn Fn(ConnectionId, &[u8]) + Send + Sync>;

/// Events reported by a `Server`
#[derive(Default)]
pub struct ServerHandlers {
    on_connection_accepted: Option<IdHandler>,
    on_received: Option<IdDataHandler>,
    on_connection_closed: Option<IdHandler>,
}

impl ServerHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after a connection has been accepted and registered
    pub fn on_connection_accepted<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_connection_accepted = Some(Box::new(f));
        self
    }

    /// Called with every chunk read from a connection, in order
    pub fn on_received<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionId, &[u8]) + Send + Sync + 'static,
    {
        self.on_received = Some(Box::new(f));
        self
    }

    /// Called after a registered connection closed on its own
    ///
    /// Not called for connections torn down by `Server::close`.
    pub fn on_connection_closed<F>(mut self, f: F) -> Self
    where
        F: Fn(ConnectionId) + Send + Sync + 'static,
    {
        self.on_connection_closed = Some(Box::new(f));
        self
    }

    pub(crate) fn connection_accepted(&self, id: ConnectionId) {
        if let Some(f) = &self.on_connection_accepted {
            f(id);
        }
    }

    pub(crate) fn received(&self, id: ConnectionId, data: &[u8]) {
        if let Some(f) = &self.on_received {
            f(id, data);
        }
    }

    pub(crate) fn connection_closed(&self, id: ConnectionId) {
        if let Some(f) = &self.on_connection_closed {
            f(id);
        }
    }
}

/// Events reported by a `Client`
#[derive(Default)]
pub struct ClientHandlers {
    on_connected: Option<Handler>,
    on_received: Option<DataHandler>,
    on_disconnected: Option<Handler>,
}

impl ClientHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once the outbound connection is established
    pub fn on_connected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_connected = Some(Box::new(f));
        self
    }

    /// Called with every chunk read from the server, in order
    pub fn on_received<F>(mut self, f: F) -> Self
    where
        F: Fn(&[u8]) + Send + Sync + 'static,
    {
        self.on_received = Some(Box::new(f));
        self
    }

    /// Called when a connect attempt fails or the connection closes
    pub fn on_disconnected<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_disconnected = Some(Box::new(f));
        self
    }

    pub(crate) fn connected(&self) {
        if let Some(f) = &self.on_connected {
            f();
        }
    }

    pub(crate) fn received(&self, data: &[u8]) {
        if let Some(f) = &self.on_received {
            f(data);
        }
    }

    pub(crate) fn disconnected(&self) {
        if let Some(f) = &self.on_disconnected {
            f();
        }
    }
}
