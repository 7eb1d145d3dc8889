// ABOUTME: Client engine module — connects to a server, issues requests, dispatches ACKs/forwards
// ABOUTME: Exports the connect entry point, error types, and the event surface

pub mod error;
pub mod events;

pub use error::{ClientError, ClientResult};
pub use events::{ClientEvent, RosterEntryInfo, SendOutcome};

use crate::config::ClientConfig;
use crate::connection::{self, ConnectionError, PacketWriter};
use crate::correlation::InFlightTable;
use crate::heartbeat::HeartbeatMonitor;
use crate::packet::PacketKind;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Which request kind a pending packet id corresponds to, so the receive loop
/// knows how to interpret the ACK payload once it arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestKind {
    Disconnect,
    ReqTime,
    ReqHost,
    ReqClientList,
    ReqSend { receiver_id: u8 },
}

/// A handle to a connected client. Cloning shares the same underlying socket and
/// in-flight table; every clone issues requests against the same connection.
#[derive(Clone)]
pub struct ClientHandle {
    writer: Arc<PacketWriter>,
    in_flight: Arc<InFlightTable<RequestKind>>,
    self_id: Arc<AtomicU8>,
}

/// Connect to a server at `config.addr:config.port`, perform the CONNECT handshake,
/// and spawn the dedicated receive task.
///
/// Returns the handle plus an event receiver. The receive task keeps running (and
/// the event channel stays open) until the connection ends for any reason.
pub async fn connect(config: ClientConfig) -> ClientResult<(ClientHandle, mpsc::UnboundedReceiver<ClientEvent>)> {
    let stream = TcpStream::connect(config.socket_addr()).await.map_err(ConnectionError::Socket)?;
    let (mut reader, writer) = connection::split(stream, config.heartbeat_threshold);

    let (packet_id, _) = writer.send_connect(&config.name).await?;
    let ack = reader.read_one().await?;
    if ack.kind != PacketKind::Ack || ack.packet_id != packet_id {
        return Err(ClientError::InvalidHandshake);
    }
    let self_id = ack.receiver_id;
    info!(self_id, name = %config.name, "connected to server");

    let in_flight = Arc::new(InFlightTable::new());
    let self_id = Arc::new(AtomicU8::new(self_id));
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let missed = reader.missed_heartbeats();
    let reset_on_heartbeat = reader.missed_heartbeats();
    let heartbeat_writer = Arc::clone(&writer);
    let heartbeat_self_id = Arc::clone(&self_id);
    let monitor = HeartbeatMonitor::spawn(missed, config.heartbeat_interval, move || {
        let writer = Arc::clone(&heartbeat_writer);
        let id = heartbeat_self_id.load(Ordering::Relaxed);
        async move {
            if let Err(e) = writer.send_heartbeat(id, 0).await {
                debug!(error = %e, "failed to send outgoing heartbeat");
            }
        }
    });

    let handle = ClientHandle {
        writer: Arc::clone(&writer),
        in_flight: Arc::clone(&in_flight),
        self_id: Arc::clone(&self_id),
    };

    tokio::spawn(receive_loop(
        reader,
        writer,
        in_flight,
        self_id,
        event_tx,
        monitor,
        reset_on_heartbeat,
    ));

    Ok((handle, event_rx))
}

impl ClientHandle {
    fn self_id(&self) -> u8 {
        self.self_id.load(Ordering::Relaxed)
    }

    pub async fn disconnect(&self) -> ClientResult<()> {
        let (packet_id, _) = self.writer.send_disconnect(self.self_id(), 0).await?;
        self.in_flight.insert(packet_id, RequestKind::Disconnect).await?;
        Ok(())
    }

    pub async fn get_time(&self) -> ClientResult<()> {
        let (packet_id, _) = self.writer.send_request_time(self.self_id()).await?;
        self.in_flight.insert(packet_id, RequestKind::ReqTime).await?;
        Ok(())
    }

    pub async fn get_host(&self) -> ClientResult<()> {
        let (packet_id, _) = self.writer.send_request_host(self.self_id()).await?;
        self.in_flight.insert(packet_id, RequestKind::ReqHost).await?;
        Ok(())
    }

    pub async fn get_clients(&self) -> ClientResult<()> {
        let (packet_id, _) = self.writer.send_request_clients(self.self_id()).await?;
        self.in_flight.insert(packet_id, RequestKind::ReqClientList).await?;
        Ok(())
    }

    pub async fn send_message(&self, receiver_id: u8, text: impl Into<String>) -> ClientResult<()> {
        let (packet_id, _) = self
            .writer
            .send_request_send(self.self_id(), receiver_id, text.into())
            .await?;
        self.in_flight
            .insert(packet_id, RequestKind::ReqSend { receiver_id })
            .await?;
        Ok(())
    }
}

async fn receive_loop(
    mut reader: connection::PacketReader,
    writer: Arc<PacketWriter>,
    in_flight: Arc<InFlightTable<RequestKind>>,
    self_id: Arc<AtomicU8>,
    events: mpsc::UnboundedSender<ClientEvent>,
    monitor: HeartbeatMonitor,
    missed_heartbeats: Arc<crate::heartbeat::MissedHeartbeats>,
) {
    loop {
        let packet = match reader.read_one().await {
            Ok(p) => p,
            Err(e) => {
                debug!(error = %e, "client receive loop ending");
                break;
            }
        };

        let my_id = self_id.load(Ordering::Relaxed);
        if packet.receiver_id != my_id {
            continue;
        }

        match packet.kind {
            PacketKind::Disconnect => {
                let _ = writer.send_ack(packet.packet_id, my_id, 0, vec![]).await;
                break;
            }
            PacketKind::Fwd => {
                let original_sender = packet.sender_id;
                let text = packet.fields.into_iter().next().unwrap_or_default();
                // Addressed to the original sender, not the server (receiver_id = 0),
                // so the server can verify the sender/receiver swap when bridging
                // this ack back to the relay's originator.
                let _ = writer.send_ack(packet.packet_id, my_id, original_sender, vec![]).await;
                let _ = events.send(ClientEvent::Message {
                    sender_id: original_sender,
                    text,
                });
            }
            PacketKind::Heartbeat => {
                missed_heartbeats.reset();
                let _ = writer.send_heartbeat(my_id, packet.sender_id).await;
            }
            PacketKind::Ack => {
                let Some(kind) = in_flight.take(packet.packet_id).await else {
                    continue;
                };
                dispatch_ack(kind, packet.fields, &events);
                if matches!(kind, RequestKind::Disconnect) {
                    break;
                }
            }
            other => {
                warn!(kind = ?other, "unexpected packet kind at client");
            }
        }
    }

    monitor.stop();
    let _ = events.send(ClientEvent::Disconnected);
}

fn dispatch_ack(kind: RequestKind, fields: Vec<String>, events: &mpsc::UnboundedSender<ClientEvent>) {
    match kind {
        RequestKind::Disconnect => {}
        RequestKind::ReqTime => {
            let Some(raw) = fields.into_iter().next() else {
                warn!("REQTIME ack missing payload field");
                return;
            };
            let Ok(posix_seconds) = raw.parse::<i64>() else {
                warn!(raw, "REQTIME ack payload was not an integer");
                return;
            };
            let formatted = format_unix_timestamp(posix_seconds);
            let _ = events.send(ClientEvent::Time { posix_seconds, formatted });
        }
        RequestKind::ReqHost => {
            let Some(name) = fields.into_iter().next() else {
                warn!("REQHOST ack missing payload field");
                return;
            };
            let _ = events.send(ClientEvent::Host(name));
        }
        RequestKind::ReqClientList => {
            let entries = fields.iter().filter_map(|f| parse_roster_entry(f)).collect();
            let _ = events.send(ClientEvent::ClientList(entries));
        }
        RequestKind::ReqSend { receiver_id } => {
            let outcome = match fields.into_iter().next() {
                None => SendOutcome::Delivered,
                Some(reason) => SendOutcome::Failed(reason),
            };
            let _ = events.send(ClientEvent::SendResult { receiver_id, outcome });
        }
    }
}

fn parse_roster_entry(field: &str) -> Option<RosterEntryInfo> {
    let mut parts = field.split('\0');
    let id: u8 = parts.next()?.parse().ok()?;
    let name = parts.next()?.to_string();
    let ip = parts.next()?.to_string();
    let port: u16 = parts.next()?.parse().ok()?;
    Some(RosterEntryInfo { id, name, ip, port })
}

/// Render a POSIX timestamp the way the REPL would show it to a user.
/// Kept dependency-free (no chrono in the teacher's stack) — days-since-epoch
/// arithmetic over the proleptic Gregorian calendar, UTC only.
fn format_unix_timestamp(posix_seconds: i64) -> String {
    let days = posix_seconds.div_euclid(86_400);
    let secs_of_day = posix_seconds.rem_euclid(86_400);
    let (year, month, day) = civil_from_days(days);
    format!(
        "{year:04}-{month:02}-{day:02} {:02}:{:02}:{:02} UTC",
        secs_of_day / 3600,
        (secs_of_day / 60) % 60,
        secs_of_day % 60
    )
}

/// Howard Hinnant's `civil_from_days` algorithm, days since 1970-01-01 -> (y, m, d).
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    (if m <= 2 { y + 1 } else { y }, m, d)
}
