// ABOUTME: Server engine — accepts connections, assigns ids, and runs the relay state machine
// ABOUTME: Exports the Server type, its config-driven entry point, and the error surface

pub mod error;
pub mod relay;
pub mod roster;

pub use error::{ServerError, ServerResult};
pub use relay::{PacketInfo, PendingKind};
pub use roster::{Roster, RosterEntry};

use crate::config::ServerConfig;
use crate::connection::{self, PacketReader, PacketWriter};
use crate::correlation::InFlightTable;
use crate::heartbeat::HeartbeatMonitor;
use crate::packet::{Packet, PacketKind};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECEIVER_NOT_FOUND: &str = "The receiver is not found.";
const PEER_MISMATCH: &str = "Error in connection between the server and the receiver.";
const RECEIVER_DISCONNECTED: &str = "Error in connection because the receiver is disconnected.";

/// The server engine. Cheap to clone — every clone shares the same roster,
/// in-flight table, and task list.
pub struct Server {
    config: ServerConfig,
    roster: Arc<Roster>,
    in_flight: Arc<InFlightTable<PacketInfo>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// A handle returned by [`Server::spawn`], used to request an orderly shutdown.
pub struct ServerHandle {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<ServerResult<()>>,
}

impl ServerHandle {
    /// Signal the accept loop to stop and wait for the full shutdown sequence
    /// (every roster entry disconnected, every per-client task joined) to finish.
    pub async fn shutdown(self) -> ServerResult<()> {
        let _ = self.shutdown_tx.send(true);
        self.join.await.expect("server task panicked")
    }
}

impl Server {
    pub fn new(config: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            roster: Arc::new(Roster::new()),
            in_flight: Arc::new(InFlightTable::new()),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Bind the listener and spawn the accept loop, returning a handle to stop it.
    pub async fn spawn(self: Arc<Self>) -> ServerResult<ServerHandle> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        info!(addr = %self.config.socket_addr(), "listening");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = Arc::clone(&self);
        let join = tokio::spawn(async move { server.accept_loop(listener, shutdown_rx).await });
        Ok(ServerHandle { shutdown_tx, join })
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, mut shutdown: watch::Receiver<bool>) -> ServerResult<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.onboard(stream, addr).await {
                                    debug!(%addr, error = %e, "handshake failed");
                                }
                            });
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
                result = shutdown.changed() => {
                    if result.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.shutdown_all().await;
        Ok(())
    }

    async fn onboard(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> ServerResult<()> {
        let (mut reader, writer) = connection::split(stream, self.config.heartbeat_threshold);
        let packet = reader.read_one().await?;
        if packet.kind != PacketKind::Connect || packet.receiver_id != 0 || packet.fields.len() != 1 {
            return Err(ServerError::InvalidHandshake);
        }
        let name = packet.fields[0].clone();

        // Reserve the id and publish the roster entry in the same lock acquisition
        // that found it free, before any suspension point — otherwise a second
        // CONNECT handled concurrently could observe the same id still free.
        let id = self
            .roster
            .assign(self.config.max_clients, name.clone(), addr, Arc::clone(&writer))
            .await
            .ok_or(ServerError::NoFreeId)?;
        info!(id, name = %name, %addr, "client connected");

        if let Err(e) = writer.send_ack(packet.packet_id, 0, id, vec![]).await {
            self.roster.remove(id).await;
            return Err(e.into());
        }

        let missed = reader.missed_heartbeats();
        let incoming_heartbeats = reader.missed_heartbeats();
        let hb_writer = Arc::clone(&writer);
        let monitor = HeartbeatMonitor::spawn(missed, self.config.heartbeat_interval, move || {
            let writer = Arc::clone(&hb_writer);
            async move {
                let _ = writer.send_heartbeat(0, id).await;
            }
        });

        let server = Arc::clone(&self);
        let task = tokio::spawn(async move {
            server
                .client_receive_loop(id, reader, writer, monitor, incoming_heartbeats)
                .await;
        });
        self.tasks.lock().await.push(task);
        Ok(())
    }

    async fn client_receive_loop(
        self: Arc<Self>,
        id: u8,
        mut reader: PacketReader,
        writer: Arc<PacketWriter>,
        monitor: HeartbeatMonitor,
        missed_heartbeats: Arc<crate::heartbeat::MissedHeartbeats>,
    ) {
        loop {
            let packet = match reader.read_one().await {
                Ok(p) => p,
                Err(e) => {
                    debug!(id, error = %e, "client receive loop ending");
                    break;
                }
            };

            if packet.sender_id != id {
                warn!(id, sender_id = packet.sender_id, "sender id mismatch, dropping packet");
                continue;
            }

            match packet.kind {
                PacketKind::Disconnect => {
                    let _ = writer.send_ack(packet.packet_id, 0, id, vec![]).await;
                    break;
                }
                PacketKind::ReqTime => {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map(|d| d.as_secs())
                        .unwrap_or(0);
                    let _ = writer.send_ack(packet.packet_id, 0, id, vec![now.to_string()]).await;
                }
                PacketKind::ReqHost => {
                    let _ = writer
                        .send_ack(packet.packet_id, 0, id, vec![self.config.name.clone()])
                        .await;
                }
                PacketKind::ReqClientList => {
                    let snapshot = self.roster.snapshot().await;
                    let fields = snapshot
                        .iter()
                        .map(|e| format!("{}\0{}\0{}\0{}\0", e.id, e.name, e.addr.ip(), e.addr.port()))
                        .collect();
                    let _ = writer.send_ack(packet.packet_id, 0, id, fields).await;
                }
                PacketKind::ReqSend => {
                    self.handle_reqsend(id, packet).await;
                }
                PacketKind::Ack => {
                    if self.handle_ack(packet).await {
                        break;
                    }
                }
                PacketKind::Heartbeat => {
                    missed_heartbeats.reset();
                }
                other => {
                    warn!(id, kind = ?other, "unexpected packet kind at server");
                }
            }
        }

        monitor.stop();
        self.clear_in_flight_on_exit(id).await;
        self.roster.remove(id).await;
        info!(id, "client disconnected");
    }

    async fn handle_reqsend(&self, sender_id: u8, packet: Packet) {
        let receiver_id = packet.receiver_id;
        debug!(sender_id, receiver_id, packet_id = packet.packet_id, "REQSEND received");

        let Some(receiver_writer) = self.roster.writer_for(receiver_id).await else {
            if let Some(sender_writer) = self.roster.writer_for(sender_id).await {
                let _ = sender_writer
                    .send_ack(packet.packet_id, 0, sender_id, vec![RECEIVER_NOT_FOUND.to_string()])
                    .await;
            }
            return;
        };

        match receiver_writer.send_forward(&packet, receiver_id).await {
            Ok((fwd_id, _)) => {
                debug!(fwd_id, sender_id, receiver_id, "FWD issued");
                let _ = self
                    .in_flight
                    .insert(
                        fwd_id,
                        PacketInfo {
                            original_packet_id: packet.packet_id,
                            original_sender: sender_id,
                            original_receiver: receiver_id,
                            pending_kind: PendingKind::Fwd,
                        },
                    )
                    .await;
            }
            Err(e) => {
                warn!(receiver_id, error = %e, "failed to forward message to receiver");
            }
        }
    }

    /// Returns `true` if the receive loop that owns `ack`'s sender should exit
    /// (a server-initiated `DISCONNECT` was just acknowledged).
    async fn handle_ack(&self, ack: Packet) -> bool {
        let Some(info) = self.in_flight.take(ack.packet_id).await else {
            return false;
        };

        match info.pending_kind {
            PendingKind::Disconnect => true,
            PendingKind::Fwd => {
                let swap_matches = ack.sender_id == info.original_receiver && ack.receiver_id == info.original_sender;
                debug!(
                    original_packet_id = info.original_packet_id,
                    swap_matches, "relay completed"
                );
                if let Some(sender_writer) = self.roster.writer_for(info.original_sender).await {
                    let fields = if swap_matches {
                        vec![]
                    } else {
                        vec![PEER_MISMATCH.to_string()]
                    };
                    let _ = sender_writer
                        .send_ack(info.original_packet_id, 0, info.original_sender, fields)
                        .await;
                }
                false
            }
        }
    }

    async fn clear_in_flight_on_exit(&self, departing_id: u8) {
        let drained = self
            .in_flight
            .drain_where(|info| info.original_sender == departing_id || info.original_receiver == departing_id)
            .await;

        for (_, info) in drained {
            if info.pending_kind != PendingKind::Fwd {
                continue;
            }
            if info.original_sender == departing_id {
                continue;
            }
            if let Some(sender_writer) = self.roster.writer_for(info.original_sender).await {
                let _ = sender_writer
                    .send_ack(
                        info.original_packet_id,
                        0,
                        info.original_sender,
                        vec![RECEIVER_DISCONNECTED.to_string()],
                    )
                    .await;
            }
        }
    }

    async fn shutdown_all(&self) {
        for id in self.roster.all_ids().await {
            if let Some(writer) = self.roster.writer_for(id).await {
                if let Ok((packet_id, _)) = writer.send_disconnect(0, id).await {
                    let _ = self
                        .in_flight
                        .insert(
                            packet_id,
                            PacketInfo {
                                original_packet_id: packet_id,
                                original_sender: 0,
                                original_receiver: id,
                                pending_kind: PendingKind::Disconnect,
                            },
                        )
                        .await;
                }
            }
        }

        let tasks: Vec<_> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client;
    use crate::config::ClientConfig;

    async fn spawn_test_server(name: &str) -> (Arc<Server>, ServerHandle, u16) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let config = ServerConfig::new(name)
            .with_port(port)
            .with_heartbeat_interval(std::time::Duration::from_secs(60));
        let server = Server::new(config);
        let handle = Arc::clone(&server).spawn().await.unwrap();
        (server, handle, port)
    }

    #[tokio::test]
    async fn two_clients_connect_and_relay_a_message() {
        let (_server, handle, port) = spawn_test_server("relay-test").await;

        let alice_config = ClientConfig::new("alice")
            .with_port(port)
            .with_heartbeat_interval(std::time::Duration::from_secs(60));
        let bob_config = ClientConfig::new("bob")
            .with_port(port)
            .with_heartbeat_interval(std::time::Duration::from_secs(60));

        let (alice, mut alice_events) = client::connect(alice_config).await.unwrap();
        let (bob, mut bob_events) = client::connect(bob_config).await.unwrap();

        bob.get_host().await.unwrap();
        let host_event = tokio::time::timeout(std::time::Duration::from_secs(2), bob_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(host_event, client::ClientEvent::Host("relay-test".to_string()));

        // Discover bob's id via the roster rather than assuming assignment order.
        alice.get_clients().await.unwrap();
        let roster_event = tokio::time::timeout(std::time::Duration::from_secs(2), alice_events.recv())
            .await
            .unwrap()
            .unwrap();
        let client::ClientEvent::ClientList(entries) = roster_event else {
            panic!("expected ClientList event");
        };
        let bob_id = entries
            .iter()
            .find(|e| e.name == "bob")
            .expect("bob should be in the roster")
            .id;

        alice.send_message(bob_id, "hi bob").await.unwrap();

        let message_event = tokio::time::timeout(std::time::Duration::from_secs(2), bob_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(message_event, client::ClientEvent::Message { text, .. } if text == "hi bob"));

        let send_result = tokio::time::timeout(std::time::Duration::from_secs(2), alice_events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            send_result,
            client::ClientEvent::SendResult { outcome: client::SendOutcome::Delivered, .. }
        ));

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn reqsend_to_absent_receiver_reports_failure() {
        let (_server, handle, port) = spawn_test_server("absent-test").await;
        let config = ClientConfig::new("solo")
            .with_port(port)
            .with_heartbeat_interval(std::time::Duration::from_secs(60));
        let (client_handle, mut events) = client::connect(config).await.unwrap();

        client_handle.send_message(200, "hello?").await.unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            client::ClientEvent::SendResult { outcome: client::SendOutcome::Failed(_), .. }
        ));

        handle.shutdown().await.unwrap();
    }
}
