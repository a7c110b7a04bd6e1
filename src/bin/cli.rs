//! netpump CLI Client
//!
//! Sends stdin line by line to a server and prints whatever comes back.

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::thread;

use clap::Parser;
use crossbeam::channel::{self, Sender};
use netpump::{Client, ClientHandlers};
use tracing_subscriber::{fmt, EnvFilter};

/// netpump CLI
#[derive(Parser, Debug)]
#[command(name = "netpump-cli")]
#[command(about = "Line-oriented TCP client built on netpump")]
#[command(version)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:7878")]
    server: SocketAddr,
}

/// Client and stdin events handed to the main thread
enum Event {
    Connected,
    Received(Vec<u8>),
    Disconnected,
    Line(String),
    InputClosed,
}

fn main() {
    // Logs go to stderr; stdout carries the received bytes
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
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

    let handlers = ClientHandlers::new()
        .on_connected({
            let tx = tx.clone();
            move || {
                let _ = tx.send(Event::Connected);
            }
        })
        .on_received({
            let tx = tx.clone();
            move |data| {
                let _ = tx.send(Event::Received(data.to_vec()));
            }
        })
        .on_disconnected({
            let tx = tx.clone();
            move || {
                let _ = tx.send(Event::Disconnected);
            }
        });

    let client = Client::new(runtime.handle().clone(), handlers);
    client.connect(args.server);

    let mut stdout = io::stdout();
    let mut connected = false;

    for event in rx.iter() {
        match event {
            Event::Connected => {
                connected = true;
                tracing::info!("Connected to {}", args.server);
                spawn_stdin_reader(tx.clone());
            }
            Event::Received(data) => {
                if stdout.write_all(&data).and_then(|_| stdout.flush()).is_err() {
                    client.disconnect();
                }
            }
            Event::Line(line) => {
                let mut payload = line.into_bytes();
                payload.push(b'\n');
                if let Err(e) = client.send(&payload) {
                    eprintln!("send failed: {}", e);
                }
            }
            Event::InputClosed => client.disconnect(),
            Event::Disconnected => break,
        }
    }

    if !connected {
        eprintln!("could not connect to {}", args.server);
        std::process::exit(1);
    }
    tracing::info!("Disconnected from {}", args.server);
}

/// Forward stdin lines until EOF
fn spawn_stdin_reader(tx: Sender<Event>) {
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(Event::Line(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(Event::InputClosed);
    });
}
