//! Server Tests
//!
//! Tests verify:
//! - Listening, including failure to bind a taken port
//! - Identity assignment (increasing, never reused)
//! - Data relay in both directions
//! - Send to an unknown identity
//! - Bulk close semantics and restart after close

use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use netpump::{AddressFamily, Client, Config, ConnectionId, NetpumpError, Server};

use crate::helpers::{
    client_handlers, collect_client_bytes, collect_server_bytes, connect_client, expect_accepted,
    expect_connected, expect_disconnected, expect_quiet, expect_server_closed, holds_throughout,
    loopback, random_payload, runtime, server_handlers, start_server, wait_until, ClientEvent,
    TIMEOUT,
};

// =============================================================================
// Listen Tests
// =============================================================================

#[test]
fn test_listen_on_free_port() {
    let rt = runtime();
    let (handlers, _events) = server_handlers();
    let server = Server::new(rt.handle().clone(), handlers);

    assert!(server.local_addr().is_none());

    let bound = server.listen(AddressFamily::V4, 0).unwrap();

    assert_ne!(bound.port(), 0);
    assert!(bound.ip().is_unspecified());
    assert_eq!(server.local_addr(), Some(bound));
}

#[test]
fn test_listen_on_taken_port_fails() {
    let rt = runtime();
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let (handlers, _events) = server_handlers();
    let server = Server::new(rt.handle().clone(), handlers);

    match server.listen(AddressFamily::V4, port) {
        Err(NetpumpError::Io(_)) => {}
        other => panic!("Expected Io error, got {:?}", other),
    }
    assert!(server.local_addr().is_none());
}

#[test]
fn test_listen_configured_uses_config() {
    let rt = runtime();
    let (handlers, events) = server_handlers();
    let config = Config::builder()
        .address_family(AddressFamily::V4)
        .port(0)
        .build();
    let server = Server::with_config(rt.handle().clone(), config, handlers).unwrap();

    let bound = server.listen_configured().unwrap();
    assert!(bound.is_ipv4());
    assert!(bound.ip().is_unspecified());
    assert_ne!(bound.port(), 0);

    server.start_accepting_connections();
    let (_client, _client_events, id) = connect_client(&rt, loopback(bound.port()), &events);
    assert_eq!(id, ConnectionId(0));
}

#[test]
fn test_listen_configured_on_taken_port_fails() {
    let rt = runtime();
    let taken = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
    let port = taken.local_addr().unwrap().port();

    let (handlers, _events) = server_handlers();
    let config = Config::builder().port(port).build();
    let server = Server::with_config(rt.handle().clone(), config, handlers).unwrap();

    assert!(matches!(server.listen_configured(), Err(NetpumpError::Io(_))));
    assert!(server.local_addr().is_none());
}

#[test]
fn test_with_config_rejects_invalid_config() {
    let rt = runtime();
    let (handlers, _events) = server_handlers();
    let config = Config::builder().read_chunk_size(0).build();

    assert!(matches!(
        Server::with_config(rt.handle().clone(), config, handlers),
        Err(NetpumpError::Config(_))
    ));
}

#[test]
fn test_accepting_requires_listen() {
    let rt = runtime();
    let (handlers, events) = server_handlers();
    let server = Server::new(rt.handle().clone(), handlers);

    server.start_accepting_connections();

    assert!(!server.is_accepting());
    expect_quiet(&events);
}

#[test]
fn test_start_accepting_is_idempotent() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);

    server.start_accepting_connections();
    assert!(server.is_accepting());

    let (_client, _client_events, id) = connect_client(&rt, addr, &events);
    assert_eq!(id, ConnectionId(0));
    expect_quiet(&events);
}

// =============================================================================
// Identity Tests
// =============================================================================

#[test]
fn test_identities_increase_and_are_never_reused() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);

    let (first, first_events, id0) = connect_client(&rt, addr, &events);
    let (_second, _second_events, id1) = connect_client(&rt, addr, &events);
    assert_eq!(id0, ConnectionId(0));
    assert_eq!(id1, ConnectionId(1));

    first.disconnect();
    expect_disconnected(&first_events);
    assert_eq!(expect_server_closed(&events), id0);

    let (_third, _third_events, id2) = connect_client(&rt, addr, &events);
    assert_eq!(id2, ConnectionId(2));
    assert_eq!(server.connection_ids(), vec![ConnectionId(1), ConnectionId(2)]);
}

// =============================================================================
// Data Relay Tests
// =============================================================================

#[test]
fn test_client_sends_to_server() {
    let rt = runtime();
    let (_server, events, addr) = start_server(&rt);
    let (client, _client_events, id) = connect_client(&rt, addr, &events);

    let payload = random_payload(5000);
    client.send(&payload).unwrap();

    assert_eq!(collect_server_bytes(&events, id, payload.len()), payload);
}

#[test]
fn test_server_sends_to_client() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (_client, client_events, id) = connect_client(&rt, addr, &events);

    let payload = random_payload(5000);
    server.send(id, &payload).unwrap();

    assert_eq!(collect_client_bytes(&client_events, payload.len()), payload);
}

#[test]
fn test_received_data_is_attributed_to_its_connection() {
    let rt = runtime();
    let (_server, events, addr) = start_server(&rt);
    let (first, _first_events, id0) = connect_client(&rt, addr, &events);
    let (second, _second_events, id1) = connect_client(&rt, addr, &events);

    first.send(b"from-first").unwrap();
    assert_eq!(collect_server_bytes(&events, id0, 10), b"from-first");

    second.send(b"from-second").unwrap();
    assert_eq!(collect_server_bytes(&events, id1, 11), b"from-second");
}

#[test]
fn test_send_to_unknown_connection() {
    let rt = runtime();
    let (server, _events, _addr) = start_server(&rt);

    match server.send(ConnectionId(99), b"nobody") {
        Err(NetpumpError::ConnectionNotFound(id)) => assert_eq!(id, ConnectionId(99)),
        other => panic!("Expected ConnectionNotFound, got {:?}", other),
    }
}

#[test]
fn test_send_to_removed_connection() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (client, client_events, id) = connect_client(&rt, addr, &events);

    client.disconnect();
    expect_disconnected(&client_events);
    assert_eq!(expect_server_closed(&events), id);

    assert!(matches!(
        server.send(id, b"gone"),
        Err(NetpumpError::ConnectionNotFound(_))
    ));
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_disconnects_clients_without_closed_events() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (_first, first_events, _) = connect_client(&rt, addr, &events);
    let (_second, second_events, _) = connect_client(&rt, addr, &events);
    assert_eq!(server.connection_count(), 2);

    server.close();

    expect_disconnected(&first_events);
    expect_disconnected(&second_events);
    expect_quiet(&events);
    assert_eq!(server.connection_count(), 0);
    assert!(!server.is_accepting());
    assert!(server.local_addr().is_none());
}

#[test]
fn test_close_stops_accepting() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);

    server.close();
    assert!(server.local_addr().is_none());
    assert!(!server.is_accepting());

    let (handlers, client_events) = client_handlers();
    let client = Client::new(rt.handle().clone(), handlers);
    client.connect(addr);

    // Whatever the client sees, it ends up disconnected and nothing is accepted
    match client_events.recv_timeout(TIMEOUT) {
        Ok(ClientEvent::Disconnected) => {}
        Ok(ClientEvent::Connected) => expect_disconnected(&client_events),
        other => panic!("Expected Disconnected, got {:?}", other),
    }
    expect_quiet(&events);
}

#[test]
fn test_close_during_connect_burst_leaves_nothing_registered() {
    const ROUNDS: usize = 100;
    const DIALERS: usize = 4;
    const HELD_PER_DIALER: usize = 32;

    let rt = runtime();

    for _ in 0..ROUNDS {
        let (server, _events, addr) = start_server(&rt);
        let stop = Arc::new(AtomicBool::new(false));

        // Dialers keep their streams open so a stray registration cannot
        // remove itself through a peer close
        let dialers: Vec<_> = (0..DIALERS)
            .map(|_| {
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut held = Vec::with_capacity(HELD_PER_DIALER);
                    while !stop.load(Ordering::Relaxed) && held.len() < HELD_PER_DIALER {
                        if let Ok(stream) = TcpStream::connect(addr) {
                            held.push(stream);
                        }
                    }
                    held
                })
            })
            .collect();

        wait_until("a first accepted connection", || server.connection_count() > 0);
        server.close();
        assert_eq!(server.connection_count(), 0);

        stop.store(true, Ordering::Relaxed);
        let held: Vec<_> = dialers.into_iter().map(|d| d.join().unwrap()).collect();

        assert_eq!(server.connection_count(), 0);
        assert!(!server.is_accepting());
        drop(held);
    }
}

#[test]
fn test_closed_server_stays_empty_while_peers_dial() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (_client, _client_events, _) = connect_client(&rt, addr, &events);

    server.close();

    // Dials may land in a backlog that is being torn down; none may register
    let streams: Vec<_> = (0..16).filter_map(|_| TcpStream::connect(addr).ok()).collect();
    holds_throughout("the closed server to stay empty", || {
        server.connection_count() == 0
    });
    expect_quiet(&events);
    drop(streams);
}

#[test]
fn test_restart_after_close_keeps_counting() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (_client, client_events, id0) = connect_client(&rt, addr, &events);
    assert_eq!(id0, ConnectionId(0));

    server.close();
    expect_disconnected(&client_events);

    let bound = server.listen(AddressFamily::V4, 0).unwrap();
    server.start_accepting_connections();

    let (_again, _again_events, id1) = connect_client(&rt, loopback(bound.port()), &events);
    assert_eq!(id1, ConnectionId(1));
}

#[test]
fn test_dropping_server_disconnects_clients() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (_client, client_events, _) = connect_client(&rt, addr, &events);

    drop(server);

    expect_disconnected(&client_events);
}

#[test]
fn test_connection_closed_reported_once_per_client() {
    let rt = runtime();
    let (server, events, addr) = start_server(&rt);
    let (client, client_events, id) = connect_client(&rt, addr, &events);

    client.disconnect();

    expect_disconnected(&client_events);
    assert_eq!(expect_server_closed(&events), id);
    expect_quiet(&events);

    // The registry entry is removed before the notification is delivered
    assert_eq!(server.connection_count(), 0);
}

#[test]
fn test_accepted_before_received() {
    let rt = runtime();
    let (_server, events, addr) = start_server(&rt);

    let (handlers, client_events) = client_handlers();
    let client = Client::new(rt.handle().clone(), handlers);
    client.connect(addr);
    expect_connected(&client_events);
    client.send(b"ping").unwrap();

    let id = expect_accepted(&events);
    assert_eq!(collect_server_bytes(&events, id, 4), b"ping");
}
