//! TCP Server
//!
//! Accepts connections, keeps a registry of the live ones and relays their
//! events to the server's handlers.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::{AddressFamily, Config};
use crate::error::{NetpumpError, Result};

use super::connection::{Connection, ConnectionObserver};
use super::handlers::ServerHandlers;
use super::ConnectionId;

/// Backlog passed to listen(2); the kernel clamps it to its own maximum
const MAX_BACKLOG: u32 = i32::MAX as u32;

/// TCP server
///
/// Dropping the server closes it.
pub struct Server {
    core: Arc<ServerCore>,
}

/// State shared with the accept loop and observed by every connection
///
/// ## Concurrency:
/// - `connections`: mutated from accept completions, close relays and
///   `close`, possibly on different runtime threads
/// - `next_id`: atomic counter, never reset
struct ServerCore {
    /// Event loop for the accept loop and all connections
    handle: Handle,

    config: Config,

    handlers: ServerHandlers,

    /// Listening socket, present between `listen` and `close`
    listener: Mutex<Option<Arc<TcpListener>>>,

    /// Cancels the accept loop; replaced on every `listen`
    accept_cancel: Mutex<CancellationToken>,

    /// Live connections keyed by their identity
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,

    next_id: AtomicU64,

    accepting: AtomicBool,

    /// Set during `close`; suppresses per-connection closed notifications
    closing: AtomicBool,
}

impl Server {
    /// Create a server with the default config
    pub fn new(handle: Handle, handlers: ServerHandlers) -> Self {
        Self::from_parts(handle, Config::default(), handlers)
    }

    /// Create a server whose listener and connections use `config`
    ///
    /// Fails if `config` does not pass `Config::validate`.
    pub fn with_config(handle: Handle, config: Config, handlers: ServerHandlers) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_parts(handle, config, handlers))
    }

    fn from_parts(handle: Handle, config: Config, handlers: ServerHandlers) -> Self {
        Self {
            core: Arc::new(ServerCore {
                handle,
                config,
                handlers,
                listener: Mutex::new(None),
                accept_cancel: Mutex::new(CancellationToken::new()),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                accepting: AtomicBool::new(false),
                closing: AtomicBool::new(false),
            }),
        }
    }

    /// Listen on the address family and port from the server's config
    pub fn listen_configured(&self) -> Result<SocketAddr> {
        self.listen(self.core.config.address_family, self.core.config.port)
    }

    /// Bind every interface of `family` on `port` and start listening
    ///
    /// Address reuse is enabled. Port 0 lets the OS pick a free port.
    /// Returns the bound address; on failure the server stays unbound.
    pub fn listen(&self, family: AddressFamily, port: u16) -> Result<SocketAddr> {
        let addr = SocketAddr::new(family.unspecified(), port);

        let listener = match self.core.bind(family, addr) {
            Ok(listener) => listener,
            Err(e) => {
                tracing::error!("Failed to listen on {}: {}", addr, e);
                return Err(e.into());
            }
        };

        let local_addr = listener.local_addr()?;

        // A loop still accepting on a previous listener is retired
        let previous = mem::replace(&mut *self.core.accept_cancel.lock(), CancellationToken::new());
        previous.cancel();
        self.core.accepting.store(false, Ordering::Release);
        *self.core.listener.lock() = Some(Arc::new(listener));

        tracing::info!("Listening on {}", local_addr);
        Ok(local_addr)
    }

    /// Start the accept loop (no-op if it is already running)
    ///
    /// The loop stops on the first accept error; call this again to restart.
    pub fn start_accepting_connections(&self) {
        if self.core.accepting.swap(true, Ordering::AcqRel) {
            return;
        }

        let Some(listener) = self.core.listener.lock().clone() else {
            tracing::warn!("Cannot accept connections: {}", NetpumpError::NotListening);
            self.core.accepting.store(false, Ordering::Release);
            return;
        };

        let cancel = self.core.accept_cancel.lock().clone();
        let core = Arc::clone(&self.core);
        self.core.handle.spawn(core.accept_loop(listener, cancel));
    }

    /// Send bytes to the peer of connection `id`
    pub fn send(&self, id: ConnectionId, data: &[u8]) -> Result<()> {
        let connection = self.core.connections.lock().get(&id).cloned();

        match connection {
            Some(connection) => connection.send(data),
            None => {
                tracing::warn!("Cannot send to connection {}: not found", id);
                Err(NetpumpError::ConnectionNotFound(id))
            }
        }
    }

    /// Stop accepting and close every connection
    ///
    /// Closed connections are not reported through `on_connection_closed`.
    /// Restarting requires `listen` and `start_accepting_connections`.
    pub fn close(&self) {
        self.core.close();
    }

    /// Address of the listening socket, if listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.core
            .listener
            .lock()
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    pub fn is_accepting(&self) -> bool {
        self.core.accepting.load(Ordering::Acquire)
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.core.connections.lock().len()
    }

    /// Identities of the live connections, in ascending order
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.core.connections.lock().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.core.close();
    }
}

impl ServerCore {
    fn bind(&self, family: AddressFamily, addr: SocketAddr) -> io::Result<TcpListener> {
        // Registering the listener with the reactor needs the runtime context
        let _guard = self.handle.enter();

        let socket = match family {
            AddressFamily::V4 => TcpSocket::new_v4()?,
            AddressFamily::V6 => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        socket.listen(MAX_BACKLOG)
    }

    async fn accept_loop(self: Arc<Self>, listener: Arc<TcpListener>, cancel: CancellationToken) {
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(io::Error::new(
                    io::ErrorKind::Interrupted,
                    "accept cancelled",
                )),
                result = listener.accept() => result,
            };

            match result {
                Ok((stream, peer)) => {
                    if !self.register(stream, peer, &cancel) {
                        return;
                    }
                }
                Err(e) if cancel.is_cancelled() => {
                    // `close` already cleared the accepting flag
                    tracing::debug!("Accept loop stopped: {}", e);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Accept failed, no longer accepting: {}", e);
                    self.accepting.store(false, Ordering::Release);
                    return;
                }
            }
        }
    }

    /// Register an accepted stream; returns false if the loop was cancelled
    ///
    /// The cancellation check and the insert share the registry lock, and
    /// `close` cancels before it empties the registry, so nothing can be
    /// registered once `close` has taken the connections.
    fn register(
        self: &Arc<Self>,
        stream: TcpStream,
        peer: SocketAddr,
        cancel: &CancellationToken,
    ) -> bool {
        let connection = {
            let mut connections = self.connections.lock();
            if cancel.is_cancelled() {
                drop(connections);
                tracing::debug!("Dropping connection from {} accepted during close", peer);
                drop(stream);
                return false;
            }

            let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
            let weak: Weak<ServerCore> = Arc::downgrade(self);
            let observer: Weak<dyn ConnectionObserver> = weak;
            let connection =
                Connection::create(stream, self.handle.clone(), observer, id, &self.config);

            // Registered before reading starts so a fast close finds its entry
            connections.insert(id, Arc::clone(&connection));
            connection
        };

        let id = connection.id();
        tracing::info!("Accepted connection {} from {}", id, peer);

        self.handlers.connection_accepted(id);
        connection.start_reading();
        true
    }

    fn close(&self) {
        self.closing.store(true, Ordering::Release);

        // Must precede taking the registry; see `register`
        self.accept_cancel.lock().cancel();
        self.accepting.store(false, Ordering::Release);
        self.listener.lock().take();

        let connections = mem::take(&mut *self.connections.lock());
        for connection in connections.values() {
            connection.close();
        }

        self.closing.store(false, Ordering::Release);
        tracing::info!("Server closed ({} connections dropped)", connections.len());
    }
}

impl ConnectionObserver for ServerCore {
    fn on_received(&self, id: ConnectionId, data: &[u8]) {
        self.handlers.received(id, data);
    }

    fn on_connection_closed(&self, id: ConnectionId) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }

        let removed = self.connections.lock().remove(&id);
        if removed.is_some() {
            tracing::info!("Removed connection {}", id);
            self.handlers.connection_closed(id);
        }
    }
}
