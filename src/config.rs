//! Configuration for netpump
//!
//! Centralized configuration with sensible defaults.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::{NetpumpError, Result};

/// Main configuration shared by servers and clients
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Listener Configuration
    // -------------------------------------------------------------------------
    /// Address family `Server::listen_configured` binds (all interfaces of that family)
    pub address_family: AddressFamily,

    /// TCP port `Server::listen_configured` binds (0 lets the OS choose)
    pub port: u16,

    // -------------------------------------------------------------------------
    // Connection Configuration
    // -------------------------------------------------------------------------
    /// Upper bound on bytes requested by a single read
    pub read_chunk_size: usize,

    /// Disable Nagle's algorithm on every connection
    pub nodelay: bool,
}

/// Protocol family of a listening socket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddressFamily {
    /// IPv4, binds `0.0.0.0`
    #[default]
    V4,

    /// IPv6, binds `::`
    V6,
}

impl AddressFamily {
    /// The unspecified ("any interface") address of this family
    pub fn unspecified(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }

    /// The loopback address of this family
    pub fn loopback(self) -> IpAddr {
        match self {
            AddressFamily::V4 => IpAddr::V4(Ipv4Addr::LOCALHOST),
            AddressFamily::V6 => IpAddr::V6(Ipv6Addr::LOCALHOST),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            address_family: AddressFamily::V4,
            port: 7878,
            read_chunk_size: 1024, // 1 KiB
            nodelay: true,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Check the values a connection cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.read_chunk_size == 0 {
            return Err(NetpumpError::Config(
                "read_chunk_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the address family to listen on
    pub fn address_family(mut self, family: AddressFamily) -> Self {
        self.config.address_family = family;
        self
    }

    /// Set the TCP port to listen on
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum number of bytes per read (in bytes)
    pub fn read_chunk_size(mut self, size: usize) -> Self {
        self.config.read_chunk_size = size;
        self
    }

    /// Enable or disable TCP_NODELAY on connections
    pub fn nodelay(mut self, enabled: bool) -> Self {
        self.config.nodelay = enabled;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
