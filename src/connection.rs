// ABOUTME: TCP connection management for the chat relay wire protocol
// ABOUTME: Splits a socket into an owned PacketReader/PacketWriter pair with frame-level I/O

use crate::allocator::PACKET_ID;
use crate::heartbeat::MissedHeartbeats;
use crate::packet::{self, CodecError, Packet, PacketKind};
use bytes::{Buf, BytesMut};
use std::io::{self, Cursor};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Largest single read the reader will attempt per syscall, matching the protocol's
/// documented maximum buffer size.
pub const MAX_BUFFER_SIZE: usize = 4096;

/// Connection-level failures. Codec errors (`Truncated`, `EncodingTooLarge`,
/// `UnknownKind`) never reach this type — they are recovered locally inside the
/// reader, which logs and drops the offending frame instead of tearing down the
/// socket.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("socket error: {0}")]
    Socket(#[from] io::Error),

    #[error("peer closed the connection")]
    PeerClosed,
}

/// Split a connected `TcpStream` into a reader/writer pair.
///
/// `heartbeat_threshold` is the number of consecutive missed heartbeat ticks the
/// reader tolerates before reporting the peer dead (see
/// [`ServerConfig`](crate::config::ServerConfig)/[`ClientConfig`](crate::config::ClientConfig)).
///
/// The writer is wrapped in an `Arc` because it is the one half legitimately shared
/// between several concurrent callers (the user-facing request API and, on the
/// receive task, ACK/heartbeat replies); the reader is not shared — it is owned
/// exclusively by the one dedicated receive task for the connection's lifetime.
pub fn split(stream: TcpStream, heartbeat_threshold: u32) -> (PacketReader, Arc<PacketWriter>) {
    let (read_half, write_half) = stream.into_split();
    (
        PacketReader::new(read_half, heartbeat_threshold),
        Arc::new(PacketWriter::new(write_half)),
    )
}

/// Owns the read half of a socket, a scratch read buffer, a carry-over buffer for
/// partial frames, and a queue of fully parsed packets.
pub struct PacketReader {
    stream: OwnedReadHalf,
    carry: BytesMut,
    queue: std::collections::VecDeque<Packet>,
    missed_heartbeats: Arc<MissedHeartbeats>,
}

impl PacketReader {
    pub fn new(stream: OwnedReadHalf, heartbeat_threshold: u32) -> Self {
        Self {
            stream,
            carry: BytesMut::with_capacity(MAX_BUFFER_SIZE),
            queue: std::collections::VecDeque::new(),
            missed_heartbeats: Arc::new(MissedHeartbeats::with_threshold(heartbeat_threshold)),
        }
    }

    /// A handle to this reader's miss counter, for wiring up a heartbeat ticker.
    pub fn missed_heartbeats(&self) -> Arc<MissedHeartbeats> {
        Arc::clone(&self.missed_heartbeats)
    }

    /// Return the next packet, pulling more bytes off the socket as needed.
    ///
    /// Drains the queue first; otherwise reads a chunk, feeds it through the
    /// frame-completeness check, and enqueues every whole frame found before
    /// looping back. A frame that fails to decode (e.g. an unrecognized kind byte)
    /// is logged and skipped rather than treated as fatal — only a socket-level
    /// error, peer close, or heartbeat timeout ends the connection.
    ///
    /// The socket read is bounded by [`DEFAULT_POLL_INTERVAL`](crate::config::DEFAULT_POLL_INTERVAL)
    /// so `is_dead` is re-checked on a silent connection rather than blocking forever
    /// inside a single `.read().await` — a peer that stops sending heartbeats without
    /// closing the TCP connection is still caught once the miss threshold is reached.
    pub async fn read_one(&mut self) -> Result<Packet, ConnectionError> {
        loop {
            if let Some(packet) = self.queue.pop_front() {
                return Ok(packet);
            }

            if self.missed_heartbeats.is_dead() {
                return Err(ConnectionError::PeerClosed);
            }

            let mut scratch = [0u8; MAX_BUFFER_SIZE];
            let n = match tokio::time::timeout(
                crate::config::DEFAULT_POLL_INTERVAL,
                self.stream.read(&mut scratch),
            )
            .await
            {
                Ok(result) => result?,
                Err(_elapsed) => continue,
            };
            if n == 0 {
                return Err(ConnectionError::PeerClosed);
            }
            self.carry.extend_from_slice(&scratch[..n]);

            while let Some(len) = packet::check(&self.carry) {
                let mut cursor = Cursor::new(&self.carry[..len]);
                match Packet::decode(&mut cursor) {
                    Ok(p) => self.queue.push_back(p),
                    Err(e) => warn!(error = %e, "dropping malformed frame"),
                }
                self.carry.advance(len);
            }
        }
    }
}

/// Owns the write half of a socket. A mutex serializes writes so concurrent
/// callers (the request API and the receive task's ACK replies) never interleave
/// the bytes of two different frames on the wire.
pub struct PacketWriter {
    stream: Mutex<OwnedWriteHalf>,
}

impl PacketWriter {
    pub fn new(stream: OwnedWriteHalf) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }

    /// Write an already-constructed packet, returning `(packet_id, bytes_written)`.
    pub async fn send(&self, packet: &Packet) -> Result<(u16, usize), ConnectionError> {
        let bytes = packet.to_bytes().map_err(encoding_too_large_is_a_bug)?;
        let mut stream = self.stream.lock().await;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
        Ok((packet.packet_id, bytes.len()))
    }

    pub async fn send_connect(&self, name: &str) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::Connect, 0, 0, vec![name.to_string()]);
        self.send(&packet).await
    }

    pub async fn send_disconnect(&self, sender_id: u8, receiver_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::Disconnect, sender_id, receiver_id, vec![]);
        self.send(&packet).await
    }

    pub async fn send_request_time(&self, sender_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::ReqTime, sender_id, 0, vec![]);
        self.send(&packet).await
    }

    pub async fn send_request_host(&self, sender_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::ReqHost, sender_id, 0, vec![]);
        self.send(&packet).await
    }

    pub async fn send_request_clients(&self, sender_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::ReqClientList, sender_id, 0, vec![]);
        self.send(&packet).await
    }

    pub async fn send_request_send(
        &self,
        sender_id: u8,
        receiver_id: u8,
        text: String,
    ) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::ReqSend, sender_id, receiver_id, vec![text]);
        self.send(&packet).await
    }

    pub async fn send_ack(
        &self,
        packet_id: u16,
        sender_id: u8,
        receiver_id: u8,
        fields: Vec<String>,
    ) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(packet_id, PacketKind::Ack, sender_id, receiver_id, fields);
        self.send(&packet).await
    }

    /// Retype an existing packet as `FWD` and reassign its id from the allocator.
    /// The original id lives on only in the server's in-flight record.
    pub async fn send_forward(&self, original: &Packet, receiver_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(
            PACKET_ID.next(),
            PacketKind::Fwd,
            original.sender_id,
            receiver_id,
            original.fields.clone(),
        );
        self.send(&packet).await
    }

    pub async fn send_heartbeat(&self, sender_id: u8, receiver_id: u8) -> Result<(u16, usize), ConnectionError> {
        let packet = Packet::new(PACKET_ID.next(), PacketKind::Heartbeat, sender_id, receiver_id, vec![]);
        self.send(&packet).await
    }
}

/// `encoded_size`/field-length violations can't happen for packets this crate
/// builds itself (all fields are bounded well under 255 bytes); treat one as a
/// connection-level bug rather than threading `CodecError` through every caller.
fn encoding_too_large_is_a_bug(e: CodecError) -> ConnectionError {
    debug!(error = %e, "encoding a locally constructed packet failed");
    ConnectionError::Socket(io::Error::new(io::ErrorKind::InvalidData, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::DEFAULT_MISS_THRESHOLD;
    use tokio::net::{TcpListener, TcpStream};

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let accept = listener.accept();
        let (client, (server, _)) = tokio::join!(connect, accept);
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn read_one_sees_a_packet_written_by_the_peer() {
        let (client_sock, server_sock) = loopback_pair().await;
        let (_client_reader, client_writer) = split(client_sock, DEFAULT_MISS_THRESHOLD);
        let (mut server_reader, _server_writer) = split(server_sock, DEFAULT_MISS_THRESHOLD);

        client_writer.send_request_time(2).await.unwrap();
        let packet = server_reader.read_one().await.unwrap();
        assert_eq!(packet.kind, PacketKind::ReqTime);
        assert_eq!(packet.sender_id, 2);
    }

    #[tokio::test]
    async fn two_writes_in_quick_succession_are_both_read() {
        let (client_sock, server_sock) = loopback_pair().await;
        let (_client_reader, client_writer) = split(client_sock, DEFAULT_MISS_THRESHOLD);
        let (mut server_reader, _server_writer) = split(server_sock, DEFAULT_MISS_THRESHOLD);

        client_writer.send_request_time(2).await.unwrap();
        client_writer.send_request_host(2).await.unwrap();

        let first = server_reader.read_one().await.unwrap();
        let second = server_reader.read_one().await.unwrap();
        assert_eq!(first.kind, PacketKind::ReqTime);
        assert_eq!(second.kind, PacketKind::ReqHost);
    }

    #[tokio::test]
    async fn peer_close_is_reported() {
        let (client_sock, server_sock) = loopback_pair().await;
        let (mut server_reader, _server_writer) = split(server_sock, DEFAULT_MISS_THRESHOLD);
        drop(client_sock);
        let err = server_reader.read_one().await.unwrap_err();
        assert!(matches!(err, ConnectionError::PeerClosed));
    }
}
