//! # netpump
//!
//! Asynchronous TCP building blocks reported through callbacks:
//! - `Connection`: one socket, one read and one write in flight
//! - `Server`: accept loop plus a registry of live connections
//! - `Client`: a single outbound connection
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐        ┌──────────────────────────┐
//! │     ServerHandlers       │        │     ClientHandlers       │
//! │ accepted/received/closed │        │ connected/received/disc. │
//! └────────────▲─────────────┘        └────────────▲─────────────┘
//!              │                                   │
//! ┌────────────┴─────────────┐        ┌────────────┴─────────────┐
//! │          Server          │        │          Client          │
//! │ accept loop + registry   │        │  connect / disconnect    │
//! └────────────▲─────────────┘        └────────────▲─────────────┘
//!              │ ConnectionObserver                │
//!       ┌──────┴──────┐                     ┌──────┴──────┐
//!       │ Connection  │  ...                │ Connection  │
//!       │ read │write │                     │ read │write │
//!       └─────────────┘                     └─────────────┘
//!              ▲ all tasks run on a tokio runtime (the event loop)
//! ```
//!
//! No framing is applied: bytes pass through unmodified.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NetpumpError, Result};
pub use config::{AddressFamily, Config};
pub use network::{Client, ClientHandlers, ConnectionId, Server, ServerHandlers};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of netpump
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
