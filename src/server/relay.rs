// ABOUTME: Server-side in-flight bookkeeping for the REQSEND -> FWD -> ACK -> ACK relay
// ABOUTME: PacketInfo records what an outstanding ACK is standing in for, so it can be bridged back

/// What a pending server-side in-flight entry is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    /// Waiting for the receiver's ACK of a `FWD` we issued on a sender's behalf.
    Fwd,
    /// Waiting for a client's ACK of a server-initiated `DISCONNECT` (shutdown).
    Disconnect,
}

/// Recorded when the server issues a packet on a client's behalf and needs to
/// remember how to react once the matching ACK comes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// The packet id the *original* sender used (and expects echoed back).
    pub original_packet_id: u16,
    pub original_sender: u8,
    pub original_receiver: u8,
    pub pending_kind: PendingKind,
}
