//! netpump Server Binary
//!
//! Echo server: every chunk received on a connection is sent back to it.

use clap::Parser;
use crossbeam::channel;
use netpump::{AddressFamily, Config, ConnectionId, Server, ServerHandlers};
use tracing_subscriber::{fmt, EnvFilter};

/// netpump echo server
#[derive(Parser, Debug)]
#[command(name = "netpump-server")]
#[command(about = "TCP echo server built on netpump")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "7878")]
    port: u16,

    /// Listen on IPv6 instead of IPv4
    #[arg(long)]
    ipv6: bool,

    /// Maximum bytes per read
    #[arg(short = 'c', long, default_value = "1024")]
    chunk_size: usize,

    /// Event loop worker threads
    #[arg(short, long, default_value = "2")]
    workers: usize,
}

/// Server events handed to the main thread
enum Event {
    Accepted(ConnectionId),
    Received(ConnectionId, Vec<u8>),
    Closed(ConnectionId),
    Shutdown,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,netpump=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("netpump server v{}", netpump::VERSION);

    let family = if args.ipv6 {
        AddressFamily::V6
    } else {
        AddressFamily::V4
    };

    // Build config from args
    let config = Config::builder()
        .address_family(family)
        .port(args.port)
        .read_chunk_size(args.chunk_size)
        .build();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(args.workers.max(1))
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start event loop: {}", e);
            std::process::exit(1);
        }
    };

    let (tx, rx) = channel::unbounded();

    let handlers = ServerHandlers::new()
        .on_connection_accepted({
            let tx = tx.clone();
            move |id| {
                let _ = tx.send(Event::Accepted(id));
            }
        })
        .on_received({
            let tx = tx.clone();
            move |id, data| {
                let _ = tx.send(Event::Received(id, data.to_vec()));
            }
        })
        .on_connection_closed({
            let tx = tx.clone();
            move |id| {
                let _ = tx.send(Event::Closed(id));
            }
        });

    let server = match Server::with_config(runtime.handle().clone(), config, handlers) {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("Invalid arguments: {}", e);
            std::process::exit(1);
        }
    };
    if server.listen_configured().is_err() {
        std::process::exit(1);
    }
    server.start_accepting_connections();

    runtime.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
            let _ = tx.send(Event::Shutdown);
        }
    });

    for event in rx {
        match event {
            Event::Accepted(id) => {
                tracing::debug!("{} connection(s) open after accepting {}", server.connection_count(), id);
            }
            Event::Received(id, data) => {
                if let Err(e) = server.send(id, &data) {
                    tracing::warn!("Echo to {} failed: {}", id, e);
                }
            }
            Event::Closed(id) => {
                tracing::debug!("{} connection(s) open after closing {}", server.connection_count(), id);
            }
            Event::Shutdown => break,
        }
    }

    server.close();
    tracing::info!("Server stopped");
}
