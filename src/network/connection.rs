//! Connection Pump
//!
//! Duplex byte pump over a single TCP socket.
//!
//! ## Pumps
//! - Read pump: one bounded read at a time, each chunk handed to the
//!   observer while it is still in the inbound buffer, then re-issued
//! - Write pump: one write at a time over whatever is buffered, started by
//!   `send` when idle and stopped once the outbound buffer drains
//!
//! Each pump task owns an `Arc<Connection>` and the socket half it drives,
//! so a half checked out by a pump is the "in flight" marker.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::{Buf, BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{NetpumpError, Result};

use super::ConnectionId;

/// Receives the events of a `Connection`
///
/// Callbacks run on the event loop's worker threads.
pub trait ConnectionObserver: Send + Sync {
    /// Bytes read from the socket, in order, never overlapping
    fn on_received(&self, id: ConnectionId, data: &[u8]);

    /// The connection has been closed; reported exactly once
    fn on_connection_closed(&self, id: ConnectionId);
}

enum ReadState {
    Idle(OwnedReadHalf),
    Reading,
    Closed,
}

enum WriteState {
    Idle(OwnedWriteHalf),
    Writing,
    Closed,
}

/// Outbound bytes waiting for the write pump
struct Outbound {
    buffer: BytesMut,
    state: WriteState,
}

/// One live TCP socket with its read and write pumps
///
/// ## Concurrency:
/// - `reader`: checked out by the read pump while it runs
/// - `outbound`: appended by any `send` caller, drained only by the write
///   pump, always under the mutex
/// - `closed`: makes `close` (and its notification) happen once
pub struct Connection {
    /// Identity assigned by the owner
    id: ConnectionId,

    /// Peer address for logging
    peer_addr: String,

    /// Event loop the pumps run on
    handle: Handle,

    /// Owner of this connection (held weakly, the owner holds us)
    observer: Weak<dyn ConnectionObserver>,

    reader: Mutex<ReadState>,

    outbound: Mutex<Outbound>,

    /// Cancels in-flight reads and writes
    cancel: CancellationToken,

    closed: AtomicBool,

    read_chunk_size: usize,
}

impl Connection {
    /// Wrap an already connected socket
    ///
    /// Does not start any I/O; call `start_reading` and `send` for that.
    /// `config` must pass `Config::validate`; a zero `read_chunk_size` would
    /// read nothing and look like end of stream.
    pub fn create(
        stream: TcpStream,
        handle: Handle,
        observer: Weak<dyn ConnectionObserver>,
        id: ConnectionId,
        config: &Config,
    ) -> Arc<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        if config.nodelay {
            if let Err(e) = stream.set_nodelay(true) {
                tracing::warn!("Failed to disable Nagle for {}: {}", peer_addr, e);
            }
        }

        debug_assert!(config.read_chunk_size > 0, "read_chunk_size must be validated");

        let (read_half, write_half) = stream.into_split();

        Arc::new(Self {
            id,
            peer_addr,
            handle,
            observer,
            reader: Mutex::new(ReadState::Idle(read_half)),
            outbound: Mutex::new(Outbound {
                buffer: BytesMut::new(),
                state: WriteState::Idle(write_half),
            }),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            read_chunk_size: config.read_chunk_size,
        })
    }

    /// Start the read pump (no-op if it is already running or closed)
    pub fn start_reading(self: &Arc<Self>) {
        let reader = {
            let mut state = self.reader.lock();
            match mem::replace(&mut *state, ReadState::Reading) {
                ReadState::Idle(reader) => reader,
                other => {
                    *state = other;
                    return;
                }
            }
        };

        tracing::debug!("Connection {} ({}) started reading", self.id, self.peer_addr);
        let connection = Arc::clone(self);
        self.handle.spawn(connection.read_pump(reader));
    }

    /// Queue bytes for the peer, starting the write pump if it is idle
    ///
    /// Safe to call from any thread, including from inside callbacks.
    pub fn send(self: &Arc<Self>, data: &[u8]) -> Result<()> {
        let writer = {
            let mut outbound = self.outbound.lock();
            match mem::replace(&mut outbound.state, WriteState::Writing) {
                WriteState::Closed => {
                    outbound.state = WriteState::Closed;
                    return Err(NetpumpError::ConnectionClosed(self.id));
                }
                WriteState::Writing => {
                    // The running pump picks this up after its current write
                    outbound.buffer.extend_from_slice(data);
                    return Ok(());
                }
                WriteState::Idle(writer) if data.is_empty() => {
                    outbound.state = WriteState::Idle(writer);
                    return Ok(());
                }
                WriteState::Idle(writer) => {
                    outbound.buffer.extend_from_slice(data);
                    writer
                }
            }
        };

        let connection = Arc::clone(self);
        self.handle.spawn(connection.write_pump(writer));
        Ok(())
    }

    /// Cancel pending operations, release the socket and notify the observer
    ///
    /// Only the first call does anything. Unsent outbound bytes are dropped.
    /// The notification is dispatched onto the event loop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.cancel.cancel();

        // Idle halves are released here; halves held by a pump are released
        // when that pump observes the cancellation.
        drop(mem::replace(&mut *self.reader.lock(), ReadState::Closed));
        {
            let mut outbound = self.outbound.lock();
            outbound.buffer.clear();
            drop(mem::replace(&mut outbound.state, WriteState::Closed));
        }

        tracing::debug!("Connection {} ({}) closed", self.id, self.peer_addr);

        if let Some(observer) = self.observer.upgrade() {
            let id = self.id;
            self.handle.spawn(async move {
                observer.on_connection_closed(id);
            });
        }
    }

    /// Identity assigned by the owner
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn read_pump(self: Arc<Self>, mut reader: OwnedReadHalf) {
        let mut buffer = BytesMut::with_capacity(self.read_chunk_size);

        loop {
            buffer.reserve(self.read_chunk_size);
            let mut chunk = (&mut buffer).limit(self.read_chunk_size);

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(cancelled()),
                result = reader.read_buf(&mut chunk) => result,
            };

            match result {
                Ok(0) => {
                    tracing::debug!("Connection {} closed by peer {}", self.id, self.peer_addr);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("Connection {} read {} bytes", self.id, n);
                    if let Some(observer) = self.observer.upgrade() {
                        observer.on_received(self.id, &buffer[..n]);
                    }
                    buffer.advance(n);
                }
                Err(e) if self.cancel.is_cancelled() => {
                    tracing::debug!("Connection {} read cancelled: {}", self.id, e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    break;
                }
            }
        }

        drop(reader);
        self.close();
    }

    async fn write_pump(self: Arc<Self>, mut writer: OwnedWriteHalf) {
        let mut pending = Bytes::new();

        loop {
            if pending.is_empty() {
                let mut outbound = self.outbound.lock();
                if outbound.buffer.is_empty() {
                    if matches!(outbound.state, WriteState::Writing) {
                        outbound.state = WriteState::Idle(writer);
                    }
                    return;
                }
                pending = outbound.buffer.split().freeze();
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(cancelled()),
                result = writer.write(&pending) => result,
            };

            match result {
                Ok(0) => {
                    tracing::warn!("Connection {} to {} wrote zero bytes", self.id, self.peer_addr);
                    break;
                }
                Ok(n) => {
                    tracing::trace!("Connection {} wrote {} bytes", self.id, n);
                    pending.advance(n);
                }
                Err(e) if self.cancel.is_cancelled() => {
                    tracing::debug!("Connection {} write cancelled: {}", self.id, e);
                    break;
                }
                Err(e) => {
                    tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                    break;
                }
            }
        }

        drop(writer);
        self.close();
    }
}

fn cancelled() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "operation cancelled")
}
