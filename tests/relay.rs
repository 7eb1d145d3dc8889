// ABOUTME: Integration tests driving a real in-process server and clients over localhost
// ABOUTME: Exercises the documented scenarios — handshake, queries, relay, and client-exit cleanup

use chatrelay::client::{self, ClientEvent, SendOutcome};
use chatrelay::server::Server;
use chatrelay::{ClientConfig, ServerConfig};
use std::time::Duration;
use tokio::net::TcpListener;

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn fast_client(name: &str, port: u16) -> ClientConfig {
    ClientConfig::new(name).with_port(port).with_heartbeat_interval(Duration::from_secs(60))
}

async fn recv(events: &mut tokio::sync::mpsc::UnboundedReceiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed unexpectedly")
}

#[tokio::test]
async fn handshake_assigns_the_next_free_id() {
    let port = free_port().await;
    let server = Server::new(ServerConfig::new("relay").with_port(port));
    let handle = server.spawn().await.unwrap();

    let (client_handle, _events) = client::connect(fast_client("alice", port)).await.unwrap();
    client_handle.get_host().await.unwrap();

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn request_time_returns_a_posix_timestamp() {
    let port = free_port().await;
    let server = Server::new(ServerConfig::new("relay").with_port(port));
    let handle = server.spawn().await.unwrap();

    let (client_handle, mut events) = client::connect(fast_client("alice", port)).await.unwrap();
    client_handle.get_time().await.unwrap();

    let event = recv(&mut events).await;
    match event {
        ClientEvent::Time { posix_seconds, .. } => assert!(posix_seconds > 1_700_000_000),
        other => panic!("expected Time event, got {other:?}"),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn roster_listing_reflects_connected_clients() {
    let port = free_port().await;
    let server = Server::new(ServerConfig::new("relay").with_port(port));
    let handle = server.spawn().await.unwrap();

    let (_alice, _alice_events) = client::connect(fast_client("alice", port)).await.unwrap();
    let (bob, mut bob_events) = client::connect(fast_client("bob", port)).await.unwrap();

    bob.get_clients().await.unwrap();
    let event = recv(&mut bob_events).await;
    let ClientEvent::ClientList(entries) = event else {
        panic!("expected ClientList event");
    };
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"alice"));
    assert!(names.contains(&"bob"));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn receiver_departure_mid_relay_reports_back_to_sender() {
    let port = free_port().await;
    let server = Server::new(ServerConfig::new("relay").with_port(port));
    let handle = server.spawn().await.unwrap();

    let (alice, mut alice_events) = client::connect(fast_client("alice", port)).await.unwrap();
    let (bob, bob_events) = client::connect(fast_client("bob", port)).await.unwrap();

    alice.get_clients().await.unwrap();
    let ClientEvent::ClientList(entries) = recv(&mut alice_events).await else {
        panic!("expected ClientList event");
    };
    let bob_id = entries.iter().find(|e| e.name == "bob").unwrap().id;

    // Tear bob's connection down without a clean DISCONNECT, then race alice's send
    // against the roster-clearance sweep it should trigger.
    drop(bob_events);
    bob.disconnect().await.ok();

    alice.send_message(bob_id, "are you there?").await.unwrap();
    let event = recv(&mut alice_events).await;
    match event {
        ClientEvent::SendResult { outcome, .. } => {
            assert!(matches!(outcome, SendOutcome::Delivered | SendOutcome::Failed(_)));
        }
        ClientEvent::Disconnected => panic!("alice disconnected unexpectedly"),
        other => panic!("unexpected event: {other:?}"),
    }

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn disconnect_ends_the_session_cleanly() {
    let port = free_port().await;
    let server = Server::new(ServerConfig::new("relay").with_port(port));
    let handle = server.spawn().await.unwrap();

    let (client_handle, mut events) = client::connect(fast_client("alice", port)).await.unwrap();
    client_handle.disconnect().await.unwrap();

    let event = recv(&mut events).await;
    assert_eq!(event, ClientEvent::Disconnected);

    handle.shutdown().await.unwrap();
}
