//! TCP Client
//!
//! Holds at most one outbound connection.
//!
//! ## State machine
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      └────────── error ───────┴───── closed ─────┘
//! ```

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{NetpumpError, Result};

use super::connection::{Connection, ConnectionObserver};
use super::handlers::ClientHandlers;
use super::ConnectionId;

/// TCP client
///
/// Dropping the client disconnects it.
pub struct Client {
    core: Arc<ClientCore>,
}

enum ClientState {
    Disconnected,
    Connecting,
    Connected(Arc<Connection>),
}

struct ClientCore {
    handle: Handle,

    config: Config,

    handlers: ClientHandlers,

    state: Mutex<ClientState>,

    /// Abandons a pending connect once the client is dropped
    dropped: CancellationToken,
}

impl Client {
    /// Create a client with the default config
    pub fn new(handle: Handle, handlers: ClientHandlers) -> Self {
        Self::from_parts(handle, Config::default(), handlers)
    }

    /// Create a client whose connection uses `config`
    ///
    /// Fails if `config` does not pass `Config::validate`. The listener
    /// settings (`address_family`, `port`) are not used by a client.
    pub fn with_config(handle: Handle, config: Config, handlers: ClientHandlers) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(handle, config, handlers))
    }

    fn from_parts(handle: Handle, config: Config, handlers: ClientHandlers) -> Self {
        Self {
            core: Arc::new(ClientCore {
                handle,
                config,
                handlers,
                state: Mutex::new(ClientState::Disconnected),
                dropped: CancellationToken::new(),
            }),
        }
    }

    /// Start connecting to `addr`
    ///
    /// Ignored unless the client is disconnected. The outcome is reported
    /// through `on_connected` or `on_disconnected`.
    pub fn connect(&self, addr: SocketAddr) {
        {
            let mut state = self.core.state.lock();
            if !matches!(*state, ClientState::Disconnected) {
                tracing::debug!("Ignoring connect to {}: already connecting or connected", addr);
                return;
            }
            *state = ClientState::Connecting;
        }

        let core = Arc::clone(&self.core);
        self.core.handle.spawn(core.establish(addr));
    }

    /// Send bytes to the server
    pub fn send(&self, data: &[u8]) -> Result<()> {
        match self.core.connection() {
            Some(connection) => connection.send(data),
            None => {
                tracing::warn!("Cannot send: no connection");
                Err(NetpumpError::NotConnected)
            }
        }
    }

    /// Close the connection, if any
    ///
    /// `on_disconnected` follows from the event loop.
    pub fn disconnect(&self) {
        if let Some(connection) = self.core.connection() {
            connection.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.core.connection().is_some()
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.core.dropped.cancel();
        self.disconnect();
    }
}

impl ClientCore {
    fn connection(&self) -> Option<Arc<Connection>> {
        match &*self.state.lock() {
            ClientState::Connected(connection) => Some(Arc::clone(connection)),
            _ => None,
        }
    }

    async fn establish(self: Arc<Self>, addr: SocketAddr) {
        let result = tokio::select! {
            biased;
            _ = self.dropped.cancelled() => {
                *self.state.lock() = ClientState::Disconnected;
                return;
            }
            result = TcpStream::connect(addr) => result,
        };

        let stream = match result {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("Failed to connect to {}: {}", addr, e);
                *self.state.lock() = ClientState::Disconnected;
                self.handlers.disconnected();
                return;
            }
        };

        if self.dropped.is_cancelled() {
            *self.state.lock() = ClientState::Disconnected;
            return;
        }

        let weak: Weak<ClientCore> = Arc::downgrade(&self);
        let observer: Weak<dyn ConnectionObserver> = weak;
        let connection = Connection::create(
            stream,
            self.handle.clone(),
            observer,
            ConnectionId::CLIENT,
            &self.config,
        );

        *self.state.lock() = ClientState::Connected(Arc::clone(&connection));
        tracing::info!("Connected to {}", addr);

        self.handlers.connected();
        connection.start_reading();
    }
}

impl ConnectionObserver for ClientCore {
    fn on_received(&self, _id: ConnectionId, data: &[u8]) {
        self.handlers.received(data);
    }

    fn on_connection_closed(&self, _id: ConnectionId) {
        let was_connected = {
            let mut state = self.state.lock();
            if matches!(*state, ClientState::Connected(_)) {
                *state = ClientState::Disconnected;
                true
            } else {
                false
            }
        };

        if was_connected {
            tracing::info!("Disconnected");
            self.handlers.disconnected();
        }
    }
}
